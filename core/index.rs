// This file is part of a random-access media source library.
// SPDX-License-Identifier: GPL-v3.0-or-later WITH GPL-3.0-linking-exception.

//! Binary index persistence (spec §6.1, component C2). Grounded on the
//! teacher's `db/coding.rs` (which also delta-encodes a sequence of frame
//! records into a byte stream) and `db/db.rs` (header/magic/version framing
//! and integrity checks on open); unlike `coding.rs`'s varint+zigzag packing,
//! the persisted layout here is fixed-width per field, matching what the
//! distilled format calls for, so only the big-endian-vs-native byte order
//! discipline (via `byteorder`) and the "read the header, verify the
//! fingerprint before trusting the body" shape carry over.

use crate::contracts::{FrameType, Timebase, TrackKind};
use crate::track::{FrameRecord, TrackTable};
use base::{bail, Error, ErrorKind};
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use flate2::read::DeflateDecoder;
use flate2::write::DeflateEncoder;
use flate2::Compression;
use std::collections::BTreeMap;
use std::io::{Read, Write};

const MAGIC: &[u8; 4] = b"FDX1";
const FORMAT_VERSION: u32 = 1;
/// How many bytes from the start/end of the file contribute to the digest
/// (spec §3: "first and last megabyte").
const SIGNATURE_SAMPLE_LEN: u64 = 1 << 20;

/// A cheap, non-cryptographic fingerprint of the indexed file: its length
/// plus a digest of its first and last megabyte (spec §3). Used to detect
/// "this index was built for a different file" before trusting the rest of
/// it (spec §4.6, P3).
///
/// The distilled format's reference implementation hashed these bytes with a
/// custom Murmur-like function; we use `blake3` truncated to 20 bytes
/// instead; both are explicitly non-cryptographic fingerprints here, and
/// `blake3` is already part of this workspace's dependency stack.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FileSignature {
    pub file_len: u64,
    pub digest: [u8; 20],
}

impl FileSignature {
    /// Computes the signature from a reader positioned anywhere; seeks as
    /// needed. `file_len` must be the reader's total length.
    pub fn compute<R: Read + std::io::Seek>(
        reader: &mut R,
        file_len: u64,
    ) -> Result<Self, Error> {
        let mut hasher = blake3::Hasher::new();
        hasher.update(&file_len.to_le_bytes());

        let head_len = SIGNATURE_SAMPLE_LEN.min(file_len) as usize;
        reader
            .seek(std::io::SeekFrom::Start(0))
            .map_err(|e| Error::with_source(ErrorKind::Parser, "seeking to file start", e))?;
        let mut buf = vec![0u8; head_len];
        reader
            .read_exact(&mut buf)
            .map_err(|e| Error::with_source(ErrorKind::Parser, "reading file head", e))?;
        hasher.update(&buf);

        if file_len > SIGNATURE_SAMPLE_LEN {
            let tail_len = SIGNATURE_SAMPLE_LEN.min(file_len) as usize;
            let tail_start = file_len - tail_len as u64;
            reader
                .seek(std::io::SeekFrom::Start(tail_start))
                .map_err(|e| Error::with_source(ErrorKind::Parser, "seeking to file tail", e))?;
            let mut tail = vec![0u8; tail_len];
            reader
                .read_exact(&mut tail)
                .map_err(|e| Error::with_source(ErrorKind::Parser, "reading file tail", e))?;
            hasher.update(&tail);
        }

        let full = hasher.finalize();
        let mut digest = [0u8; 20];
        digest.copy_from_slice(&full.as_bytes()[..20]);
        Ok(FileSignature { file_len, digest })
    }

    fn write<W: Write>(&self, w: &mut W) -> Result<(), Error> {
        w.write_u64::<LittleEndian>(self.file_len)
            .map_err(io_err)?;
        w.write_all(&self.digest).map_err(io_err)
    }

    fn read<R: Read>(r: &mut R) -> Result<Self, Error> {
        let file_len = r.read_u64::<LittleEndian>().map_err(io_err)?;
        let mut digest = [0u8; 20];
        r.read_exact(&mut digest).map_err(io_err)?;
        Ok(FileSignature { file_len, digest })
    }
}

fn io_err(e: std::io::Error) -> Error {
    Error::with_source(ErrorKind::DataLoss, "malformed index stream", e)
}

/// The persisted index for one input file: one [`TrackTable`] per track, the
/// demuxer options the index was built with, and the [`FileSignature`] it was
/// built against (spec §3, §6.1).
#[derive(Debug)]
pub struct Index {
    pub signature: FileSignature,
    pub demuxer_options: BTreeMap<String, String>,
    tracks: Vec<TrackTable>,
}

impl Index {
    pub fn new(
        signature: FileSignature,
        demuxer_options: BTreeMap<String, String>,
        tracks: Vec<TrackTable>,
    ) -> Self {
        Index {
            signature,
            demuxer_options,
            tracks,
        }
    }

    pub fn tracks(&self) -> &[TrackTable] {
        &self.tracks
    }

    pub fn track(&self, i: usize) -> Option<&TrackTable> {
        self.tracks.get(i)
    }

    /// Spec P3: an index only ever drives seeking on the file it was built
    /// from, checked before any track query is trusted.
    pub fn matches_file(&self, candidate: &FileSignature) -> bool {
        self.signature == *candidate
    }

    /// Serializes the index, magic/version framed, deflate-compressed.
    pub fn write<W: Write>(&self, w: W) -> Result<(), Error> {
        let mut enc = DeflateEncoder::new(w, Compression::default());
        self.write_body(&mut enc)?;
        enc.finish().map_err(io_err)?;
        Ok(())
    }

    fn write_body<W: Write>(&self, w: &mut W) -> Result<(), Error> {
        w.write_all(MAGIC).map_err(io_err)?;
        w.write_u32::<LittleEndian>(FORMAT_VERSION).map_err(io_err)?;
        self.signature.write(w)?;

        w.write_u32::<LittleEndian>(self.demuxer_options.len() as u32)
            .map_err(io_err)?;
        for (k, v) in &self.demuxer_options {
            write_string(w, k)?;
            write_string(w, v)?;
        }

        w.write_u32::<LittleEndian>(self.tracks.len() as u32)
            .map_err(io_err)?;
        for t in &self.tracks {
            write_track(w, t)?;
        }
        Ok(())
    }

    /// Reads an index back. Verifies the magic and version before
    /// interpreting anything else; a version mismatch is reported as
    /// [`ErrorKind::Index`], not silently reinterpreted (spec §4.6).
    pub fn read<R: Read>(r: R) -> Result<Self, Error> {
        let mut dec = DeflateDecoder::new(r);
        let mut magic = [0u8; 4];
        dec.read_exact(&mut magic).map_err(io_err)?;
        if &magic != MAGIC {
            bail!(Index, msg("not a recognized index file"));
        }
        let version = dec.read_u32::<LittleEndian>().map_err(io_err)?;
        if version != FORMAT_VERSION {
            bail!(
                Index,
                msg("index format version {version} unsupported (want {FORMAT_VERSION})")
            );
        }
        let signature = FileSignature::read(&mut dec)?;

        let n_opts = dec.read_u32::<LittleEndian>().map_err(io_err)?;
        let mut demuxer_options = BTreeMap::new();
        for _ in 0..n_opts {
            let k = read_string(&mut dec)?;
            let v = read_string(&mut dec)?;
            demuxer_options.insert(k, v);
        }

        let n_tracks = dec.read_u32::<LittleEndian>().map_err(io_err)?;
        let mut tracks = Vec::with_capacity(n_tracks as usize);
        for _ in 0..n_tracks {
            tracks.push(read_track(&mut dec)?);
        }

        Ok(Index {
            signature,
            demuxer_options,
            tracks,
        })
    }
}

fn write_string<W: Write>(w: &mut W, s: &str) -> Result<(), Error> {
    let bytes = s.as_bytes();
    w.write_u32::<LittleEndian>(bytes.len() as u32)
        .map_err(io_err)?;
    w.write_all(bytes).map_err(io_err)
}

fn read_string<R: Read>(r: &mut R) -> Result<String, Error> {
    let len = r.read_u32::<LittleEndian>().map_err(io_err)? as usize;
    let mut buf = vec![0u8; len];
    r.read_exact(&mut buf).map_err(io_err)?;
    String::from_utf8(buf).map_err(|e| Error::with_source(ErrorKind::DataLoss, "bad utf-8 in index", e))
}

fn track_kind_tag(kind: TrackKind) -> u8 {
    match kind {
        TrackKind::Video => 0,
        TrackKind::Audio => 1,
        TrackKind::Other => 2,
    }
}

fn track_kind_from_tag(tag: u8) -> Result<TrackKind, Error> {
    match tag {
        0 => Ok(TrackKind::Video),
        1 => Ok(TrackKind::Audio),
        2 => Ok(TrackKind::Other),
        _ => Err(Error::new(ErrorKind::DataLoss, "bad track kind tag")),
    }
}

fn frame_type_tag(t: FrameType) -> u8 {
    match t {
        FrameType::I => 0,
        FrameType::P => 1,
        FrameType::B => 2,
        FrameType::Unknown => 3,
    }
}

fn frame_type_from_tag(tag: u8) -> Result<FrameType, Error> {
    match tag {
        0 => Ok(FrameType::I),
        1 => Ok(FrameType::P),
        2 => Ok(FrameType::B),
        3 => Ok(FrameType::Unknown),
        _ => Err(Error::new(ErrorKind::DataLoss, "bad frame type tag")),
    }
}

/// Writes one track: header fields, then one fixed-width record per line
/// (spec §6.1: "delta-encoded per frame using fixed-width integers" -- here
/// "delta" refers to `pts`/`file_pos`/`sample_start` each being stored as the
/// difference from the previous record, not a variable-width varint).
fn write_track<W: Write>(w: &mut W, t: &TrackTable) -> Result<(), Error> {
    w.write_u8(track_kind_tag(t.kind)).map_err(io_err)?;
    w.write_i64::<LittleEndian>(t.timebase.num).map_err(io_err)?;
    w.write_i64::<LittleEndian>(t.timebase.den).map_err(io_err)?;
    w.write_i32::<LittleEndian>(t.max_b_frames).map_err(io_err)?;
    w.write_u8(t.has_ts as u8).map_err(io_err)?;
    w.write_u8(t.use_dts as u8).map_err(io_err)?;
    w.write_u32::<LittleEndian>(t.records().len() as u32)
        .map_err(io_err)?;

    let mut prev_pts = 0i64;
    let mut prev_pos = 0i64;
    let mut prev_sample_start = 0u64;
    for r in t.records() {
        let has_pts = r.pts.is_some();
        let has_pos = r.file_pos.is_some();
        let flags = (has_pts as u8)
            | ((has_pos as u8) << 1)
            | ((r.key_frame as u8) << 2)
            | ((r.hidden as u8) << 3);
        w.write_u8(flags).map_err(io_err)?;

        let pts = r.pts.unwrap_or(prev_pts);
        w.write_i64::<LittleEndian>(pts - prev_pts).map_err(io_err)?;
        if has_pts {
            prev_pts = pts;
        }

        let pos = r.file_pos.unwrap_or(prev_pos);
        w.write_i64::<LittleEndian>(pos - prev_pos).map_err(io_err)?;
        if has_pos {
            prev_pos = pos;
        }

        w.write_u8(frame_type_tag(r.frame_type)).map_err(io_err)?;
        w.write_i32::<LittleEndian>(r.repeat_pict).map_err(io_err)?;
        w.write_i64::<LittleEndian>((r.sample_start as i64) - (prev_sample_start as i64))
            .map_err(io_err)?;
        prev_sample_start = r.sample_start;
        w.write_u32::<LittleEndian>(r.sample_count).map_err(io_err)?;
        w.write_u64::<LittleEndian>(r.original_pos).map_err(io_err)?;
    }
    Ok(())
}

fn read_track<R: Read>(r: &mut R) -> Result<TrackTable, Error> {
    let kind = track_kind_from_tag(r.read_u8().map_err(io_err)?)?;
    let num = r.read_i64::<LittleEndian>().map_err(io_err)?;
    let den = r.read_i64::<LittleEndian>().map_err(io_err)?;
    let max_b_frames = r.read_i32::<LittleEndian>().map_err(io_err)?;
    let has_ts = r.read_u8().map_err(io_err)? != 0;
    let use_dts = r.read_u8().map_err(io_err)? != 0;
    let n = r.read_u32::<LittleEndian>().map_err(io_err)?;

    let mut prev_pts = 0i64;
    let mut prev_pos = 0i64;
    let mut prev_sample_start = 0u64;
    let mut records = Vec::with_capacity(n as usize);
    for _ in 0..n {
        let flags = r.read_u8().map_err(io_err)?;
        let has_pts = flags & 0b0001 != 0;
        let has_pos = flags & 0b0010 != 0;
        let key_frame = flags & 0b0100 != 0;
        let hidden = flags & 0b1000 != 0;

        let dpts = r.read_i64::<LittleEndian>().map_err(io_err)?;
        let pts = prev_pts + dpts;
        if has_pts {
            prev_pts = pts;
        }
        let dpos = r.read_i64::<LittleEndian>().map_err(io_err)?;
        let pos = prev_pos + dpos;
        if has_pos {
            prev_pos = pos;
        }
        let frame_type = frame_type_from_tag(r.read_u8().map_err(io_err)?)?;
        let repeat_pict = r.read_i32::<LittleEndian>().map_err(io_err)?;
        let dsample = r.read_i64::<LittleEndian>().map_err(io_err)?;
        let sample_start = (prev_sample_start as i64 + dsample) as u64;
        prev_sample_start = sample_start;
        let sample_count = r.read_u32::<LittleEndian>().map_err(io_err)?;
        let original_pos = r.read_u64::<LittleEndian>().map_err(io_err)?;

        records.push(FrameRecord {
            pts: if has_pts { Some(pts) } else { None },
            file_pos: if has_pos { Some(pos) } else { None },
            key_frame,
            frame_type,
            repeat_pict,
            hidden,
            sample_start,
            sample_count,
            original_pos,
        });
    }

    Ok(TrackTable::from_finalized_parts(
        kind,
        Timebase { num, den },
        records,
        max_b_frames,
        has_ts,
        use_dts,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::track::{new_audio_record, new_video_record};
    use std::io::Cursor;

    fn sample_index() -> Index {
        let mut t = TrackTable::new(TrackKind::Video, Timebase { num: 1, den: 1000 });
        for (pts, pos, key) in [(0i64, 0i64, true), (40, 512, false), (80, 1024, false)] {
            let mut r = new_video_record();
            r.pts = Some(pts);
            r.file_pos = Some(pos);
            r.key_frame = key;
            r.frame_type = if key { FrameType::I } else { FrameType::P };
            t.push_video_record(r);
        }
        t.finalize(false).unwrap();

        let mut a = TrackTable::new(TrackKind::Audio, Timebase { num: 1, den: 48_000 });
        let mut start = 0u64;
        for count in [1024u32, 1024, 1024] {
            let mut r = new_audio_record(start);
            r.sample_count = count;
            a.push_audio_record(r);
            start += u64::from(count);
        }
        a.finalize(false).unwrap();

        let mut opts = BTreeMap::new();
        opts.insert("demuxer".to_string(), "matroska".to_string());
        Index::new(
            FileSignature {
                file_len: 123_456,
                digest: [7u8; 20],
            },
            opts,
            vec![t, a],
        )
    }

    /// Spec P2: round-tripping through the persisted format is lossless.
    #[test]
    fn round_trip_is_lossless() {
        let idx = sample_index();
        let mut buf = Vec::new();
        idx.write(&mut buf).unwrap();
        let back = Index::read(Cursor::new(buf)).unwrap();

        assert_eq!(back.signature, idx.signature);
        assert_eq!(back.demuxer_options, idx.demuxer_options);
        assert_eq!(back.tracks().len(), 2);
        for (a, b) in idx.tracks().iter().zip(back.tracks()) {
            assert_eq!(a.records(), b.records());
            assert_eq!(a.timebase, b.timebase);
            assert_eq!(a.max_b_frames, b.max_b_frames);
            assert_eq!(a.has_ts, b.has_ts);
            assert_eq!(a.visible_frame_count(), b.visible_frame_count());
        }
    }

    #[test]
    fn rejects_bad_magic() {
        let buf = {
            let mut enc = DeflateEncoder::new(Vec::new(), Compression::fast());
            enc.write_all(b"NOPE").unwrap();
            enc.finish().unwrap()
        };
        let err = Index::read(Cursor::new(buf)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Index);
    }

    /// Spec P3: a signature computed from a different file must not match.
    #[test]
    fn signature_guards_against_wrong_file() {
        let idx = sample_index();
        let other = FileSignature {
            file_len: idx.signature.file_len,
            digest: [9u8; 20],
        };
        assert!(!idx.matches_file(&other));
        assert!(idx.matches_file(&idx.signature.clone()));
    }

    #[test]
    fn signature_compute_is_deterministic() {
        let data = vec![0xabu8; 4096];
        let mut c1 = Cursor::new(data.clone());
        let mut c2 = Cursor::new(data);
        let s1 = FileSignature::compute(&mut c1, 4096).unwrap();
        let s2 = FileSignature::compute(&mut c2, 4096).unwrap();
        assert_eq!(s1, s2);
    }
}
