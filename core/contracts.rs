// This file is part of a random-access media source library.
// SPDX-License-Identifier: GPL-v3.0-or-later WITH GPL-3.0-linking-exception.

//! The collaborator contracts of spec §6.2, expressed as traits.
//!
//! The demuxer, the video/audio decoders, and the bitstream parser are all
//! *external* to this crate (spec §1): a real implementation talks to a
//! native codec library (see the sibling `framedex-ffmpeg` crate, grounded on
//! the teacher's `moonfire-ffmpeg` FFI wrapper), while a test implementation
//! can be a plain in-memory fixture (see `testutil`). Neither `framedex-core`
//! nor these trait definitions know or care which.

use base::Error;
use std::fmt;

/// The kind of a demuxer-level stream. Only `Video` and `Audio` tracks are
/// materialized into a [`crate::track::TrackTable`] (spec §3).
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum TrackKind {
    Video,
    Audio,
    Other,
}

/// A coarse video frame type tag, as stored on [`crate::track::FrameRecord`].
#[derive(Copy, Clone, Eq, PartialEq, Debug, Default)]
pub enum FrameType {
    I,
    P,
    B,
    #[default]
    Unknown,
}

/// The field/frame structure of a coded picture, used for H.264/HEVC PAFF
/// field-pair detection (spec §4.3 step 2).
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum PictureStructure {
    Frame,
    TopField,
    BottomField,
}

/// A rational timebase: `seconds = ts * num / den`.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub struct Timebase {
    pub num: i64,
    pub den: i64,
}

/// A single demuxed packet, as read from the container (spec §6.2).
#[derive(Clone, Debug)]
pub struct Packet {
    pub stream_index: usize,
    pub pts: Option<i64>,
    pub dts: Option<i64>,
    /// Byte offset of the packet's start in the container, or `-1` if unknown.
    pub file_pos: i64,
    pub key_frame: bool,
    pub duration: i32,
    /// `DISCARD`-equivalent hint from the demuxer: this packet should never
    /// produce a visible output frame (spec §3, `hidden`).
    pub discard: bool,
    pub data: Vec<u8>,
}

/// Demuxes packets from a seekable container of known, finite length (spec
/// §1 and §6.2).
pub trait Demuxer {
    fn track_count(&self) -> usize;
    fn track_kind(&self, track: usize) -> TrackKind;
    fn timebase(&self, track: usize) -> Timebase;
    /// Total length of the underlying byte stream, for `FileSignature` (§3)
    /// and for the indexer's progress callback.
    fn file_len(&self) -> u64;

    /// Reads and returns the next packet, or `Ok(None)` at end of stream.
    fn read_packet(&mut self) -> Result<Option<Packet>, Error>;

    /// Seeks so that the next `read_packet` returns a packet at or before
    /// `pts` on `track`. Returns `Err` if the demuxer cannot seek by PTS; the
    /// caller falls back to [`Demuxer::seek_by_byte`] (spec §4.5 step 3).
    fn seek_by_pts(&mut self, track: usize, pts: i64) -> Result<(), Error>;

    /// Seeks to the packet beginning at or before the given byte position.
    fn seek_by_byte(&mut self, pos: u64) -> Result<(), Error>;
}

/// A decoded video frame, as emitted by a [`VideoDecoder`] (spec §6.2).
#[derive(Clone, Debug)]
pub struct DecodedVideoFrame {
    pub pts: Option<i64>,
    pub key_frame: bool,
    pub pict_type: FrameType,
    pub width: u32,
    pub height: u32,
}

pub trait VideoDecoder {
    fn send_packet(&mut self, packet: &Packet) -> Result<(), Error>;
    /// Drains one decoded frame, if the decoder's internal reorder buffer has
    /// one ready. `Ok(None)` means "need another `send_packet` first", not
    /// end of stream.
    fn receive_frame(&mut self) -> Result<Option<DecodedVideoFrame>, Error>;
    /// Flushes the decoder's internal state, as after a seek (spec §4.5 step 3).
    fn flush(&mut self);
    /// Whether the codec is known to produce B-frames (used for the `delay`
    /// discipline of spec §4.5).
    fn has_b_frames(&self) -> bool;
    fn thread_count(&self) -> usize;
    fn codec_is_h264(&self) -> bool;
    fn codec_is_vc1(&self) -> bool;
    fn codec_is_av1(&self) -> bool;
    /// The codec's own declared reorder delay, if it publishes one (AV1 does;
    /// spec §4.5 uses it directly for that codec).
    fn declared_delay(&self) -> Option<u32>;
    /// Cheapens the forward walk to the target frame by skipping frames that
    /// are not needed as reference (spec §4.5 step 4).
    fn set_skip_non_reference_frames(&mut self, skip: bool);
}

/// PCM sample format, just enough detail to detect a mid-track format change
/// (spec §4.3 step 3).
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum SampleFormat {
    S16,
    S32,
    F32,
    F64,
}

impl SampleFormat {
    pub fn bytes_per_sample(self) -> u32 {
        match self {
            SampleFormat::S16 => 2,
            SampleFormat::S32 | SampleFormat::F32 => 4,
            SampleFormat::F64 => 8,
        }
    }
}

/// A contiguous chunk of decoded PCM audio (spec §6.2). `bytes` is
/// interleaved: `sample_count * channels * format.bytes_per_sample()` long.
#[derive(Clone, Debug)]
pub struct DecodedAudio {
    pub sample_count: u64,
    pub channels: u16,
    pub sample_rate: u32,
    pub format: SampleFormat,
    pub bytes: Vec<u8>,
}

impl DecodedAudio {
    pub fn bytes_per_sample_frame(&self) -> u32 {
        self.format.bytes_per_sample() * u32::from(self.channels)
    }
}

pub trait AudioDecoder {
    fn send_packet(&mut self, packet: &Packet) -> Result<(), Error>;
    fn receive_samples(&mut self) -> Result<Option<DecodedAudio>, Error>;
    fn flush(&mut self);
}

/// A parsed picture header, as produced by an (optional, per-codec)
/// [`BitstreamParser`] (spec §6.2 and §4.3 step 2).
#[derive(Copy, Clone, Debug)]
pub struct ParsedPicture {
    /// Pulldown/RFF hint; negative means unknown.
    pub repeat_pict: i32,
    pub pict_type: FrameType,
    pub picture_structure: PictureStructure,
    /// VP8/VP9 visibility bit / `show_frame`: `false` marks an alt-ref frame
    /// that refines decoder state without being displayed.
    pub show_frame: bool,
}

/// An optional, per-codec bitstream parser (spec §6.2). Used by the indexer
/// for H.264/HEVC field-pair detection; for VP8/VP9, the indexer instead
/// reads the uncompressed header byte directly and never consults this trait.
pub trait BitstreamParser {
    fn parse(&mut self, packet: &Packet) -> Option<ParsedPicture>;
}

/// `(current_bytes, total_bytes) -> cancel`. Spec §6.2; `user_data` is
/// whatever the closure captures.
pub type ProgressCallback<'a> = dyn FnMut(u64, u64) -> bool + 'a;

impl fmt::Display for TrackKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(match self {
            TrackKind::Video => "video",
            TrackKind::Audio => "audio",
            TrackKind::Other => "other",
        })
    }
}
