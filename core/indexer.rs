// This file is part of a random-access media source library.
// SPDX-License-Identifier: GPL-v3.0-or-later WITH GPL-3.0-linking-exception.

//! The forward indexing pass (spec §4.3, component C3): a single linear walk
//! over the demuxer building one [`TrackTable`] per track. Grounded on the
//! teacher's `db/recording.rs` `SampleIndexEncoder`, which plays the same
//! "accumulate one record per unit, commit once at the end" role, generalized
//! here from a single video stream to an arbitrary number of mixed video/audio
//! tracks plus the collaborator decoders spec §6.2 requires for audio sample
//! counting.

use crate::contracts::{AudioDecoder, BitstreamParser, Demuxer, ProgressCallback, SampleFormat, TrackKind};
use crate::index::{FileSignature, Index};
use crate::track::{new_audio_record, new_video_record, TrackTable};
use base::{bail, Error, ErrorKind};
use std::collections::BTreeMap;

/// What to do when indexing a single packet fails (spec §4.3, per-run policy;
/// applies uniformly to the whole run, not per track).
#[derive(Copy, Clone, Eq, PartialEq, Debug, Default)]
pub enum ErrorHandlingMode {
    /// Stop the entire indexing run and report the error.
    Abort,
    /// Discard everything indexed so far for the offending track, but keep
    /// indexing other tracks and the rest of this one from where it left off.
    ClearTrack,
    /// Keep whatever was indexed for the offending track so far, but stop
    /// indexing that track (other tracks continue).
    StopTrack,
    /// Skip the offending packet and continue indexing the same track.
    #[default]
    Ignore,
}

#[derive(Clone, Debug)]
pub struct IndexerConfig {
    pub error_handling: ErrorHandlingMode,
    pub demuxer_options: BTreeMap<String, String>,
    /// True for containers (e.g. ASF) whose packets legitimately share a PTS
    /// without being H.264 PAFF field pairs; see [`TrackTable::finalize`].
    pub container_shares_pts_legitimately: bool,
}

impl Default for IndexerConfig {
    fn default() -> Self {
        IndexerConfig {
            error_handling: ErrorHandlingMode::default(),
            demuxer_options: BTreeMap::new(),
            container_shares_pts_legitimately: false,
        }
    }
}

struct AudioFormatSeen {
    channels: u16,
    sample_rate: u32,
    format: SampleFormat,
}

enum TrackOutcome {
    Continue,
    StopThisTrack,
}

/// Indexes every track of `demuxer` in one forward pass.
///
/// `audio_decoders[i]` / `video_parsers[i]` are collaborators for track `i`
/// (spec §6.2): `None` for tracks of the wrong kind, or for video tracks
/// where no bitstream parser is available (in which case `frame_type` stays
/// [`crate::contracts::FrameType::Unknown`] and PAFF field pairs are never
/// detected for that track). `progress`, if given, is called after each
/// packet with `(bytes consumed so far, total file length)`; returning
/// `true` cancels the run with [`ErrorKind::Cancelled`].
pub fn build_index(
    demuxer: &mut dyn Demuxer,
    signature: FileSignature,
    config: &IndexerConfig,
    audio_decoders: &mut [Option<Box<dyn AudioDecoder>>],
    video_parsers: &mut [Option<Box<dyn BitstreamParser>>],
    mut progress: Option<&mut ProgressCallback>,
) -> Result<Index, Error> {
    let n = demuxer.track_count();
    let mut tables: Vec<TrackTable> = (0..n)
        .map(|i| TrackTable::new(demuxer.track_kind(i), demuxer.timebase(i)))
        .collect();
    let mut audio_format_seen: Vec<Option<AudioFormatSeen>> = (0..n).map(|_| None).collect();
    let mut stopped: Vec<bool> = vec![false; n];
    let file_len = demuxer.file_len();

    loop {
        let packet = match demuxer.read_packet() {
            Ok(Some(p)) => p,
            Ok(None) => break,
            Err(e) => {
                return handle_run_level_error(config.error_handling, e);
            }
        };

        if let Some(cb) = progress.as_deref_mut() {
            let consumed = (packet.file_pos.max(0)) as u64;
            if cb(consumed, file_len) {
                bail!(Cancelled, msg("indexing cancelled by caller"));
            }
        }

        let track = packet.stream_index;
        if track >= n || stopped[track] {
            continue;
        }

        let outcome = match tables[track].kind {
            TrackKind::Video => index_video_packet(
                &mut tables[track],
                video_parsers.get_mut(track).and_then(|p| p.as_deref_mut()),
                &packet,
                config.error_handling,
            ),
            TrackKind::Audio => index_audio_packet(
                &mut tables[track],
                audio_decoders.get_mut(track).and_then(|d| d.as_deref_mut()),
                &mut audio_format_seen[track],
                &packet,
                config.error_handling,
            ),
            TrackKind::Other => Ok(TrackOutcome::Continue),
        };

        match outcome {
            Ok(TrackOutcome::Continue) => {}
            Ok(TrackOutcome::StopThisTrack) => stopped[track] = true,
            Err(e) => match config.error_handling {
                ErrorHandlingMode::Abort => return Err(e),
                ErrorHandlingMode::Ignore => {
                    tracing::warn!(track, error = %e, "indexing error on track, ignoring packet");
                }
                ErrorHandlingMode::ClearTrack => {
                    tracing::warn!(track, error = %e, "indexing error on track, clearing records so far");
                    tables[track].clear();
                }
                ErrorHandlingMode::StopTrack => {
                    tracing::warn!(track, error = %e, "indexing error on track, stopping track");
                    stopped[track] = true;
                }
            },
        }
    }

    for t in tables.iter_mut() {
        if t.kind == TrackKind::Audio {
            t.maybe_drop_pathological_trailing_audio_record();
        }
        t.finalize(config.container_shares_pts_legitimately)?;
    }

    Ok(Index::new(signature, config.demuxer_options.clone(), tables))
}

fn handle_run_level_error(mode: ErrorHandlingMode, e: Error) -> Result<Index, Error> {
    match mode {
        ErrorHandlingMode::Abort => Err(e),
        // A demuxer-level read failure with no more specific track to blame:
        // there is nothing to clear or stop, only to report or swallow.
        _ => {
            tracing::warn!(error = %e, "demuxer read failed, stopping run");
            Err(e)
        }
    }
}

fn index_video_packet(
    table: &mut TrackTable,
    parser: Option<&mut dyn BitstreamParser>,
    packet: &crate::contracts::Packet,
    error_handling: ErrorHandlingMode,
) -> Result<TrackOutcome, Error> {
    let mut r = new_video_record();
    // PTS/DTS substitution: a packet missing PTS falls back to DTS (spec
    // §4.3 step 1); if *every* packet in the track lacks both, `finalize`
    // synthesizes ordinals instead.
    r.pts = packet.pts.or(packet.dts);
    r.file_pos = if packet.file_pos >= 0 {
        Some(packet.file_pos)
    } else {
        None
    };
    r.key_frame = packet.key_frame;
    r.hidden = packet.discard;

    if let Some(parser) = parser {
        if let Some(parsed) = parser.parse(packet) {
            r.frame_type = parsed.pict_type;
            r.repeat_pict = parsed.repeat_pict;
            if !parsed.show_frame {
                r.hidden = true;
            }
        }
    }

    table.push_video_record(r);
    let _ = error_handling;
    Ok(TrackOutcome::Continue)
}

fn index_audio_packet(
    table: &mut TrackTable,
    decoder: Option<&mut dyn AudioDecoder>,
    format_seen: &mut Option<AudioFormatSeen>,
    packet: &crate::contracts::Packet,
    error_handling: ErrorHandlingMode,
) -> Result<TrackOutcome, Error> {
    let decoder = match decoder {
        Some(d) => d,
        None => bail!(Unsupported, msg("no audio decoder supplied for audio track")),
    };

    decoder.send_packet(packet)?;
    let mut sample_start = table.total_samples();
    let mut produced_any = false;
    while let Some(decoded) = decoder.receive_samples()? {
        let seen = AudioFormatSeen {
            channels: decoded.channels,
            sample_rate: decoded.sample_rate,
            format: decoded.format,
        };
        match format_seen {
            None => *format_seen = Some(seen),
            Some(prev) => {
                if prev.channels != seen.channels
                    || prev.sample_rate != seen.sample_rate
                    || prev.format != seen.format
                {
                    match error_handling {
                        ErrorHandlingMode::Abort | ErrorHandlingMode::Ignore => {
                            bail!(Unsupported, msg("audio format changed mid-track"));
                        }
                        ErrorHandlingMode::StopTrack => return Ok(TrackOutcome::StopThisTrack),
                        ErrorHandlingMode::ClearTrack => {
                            *format_seen = Some(seen);
                            continue;
                        }
                    }
                }
            }
        }

        let mut r = new_audio_record(sample_start);
        r.sample_count = decoded.sample_count as u32;
        r.file_pos = if packet.file_pos >= 0 {
            Some(packet.file_pos)
        } else {
            None
        };
        table.push_audio_record(r);
        sample_start += decoded.sample_count;
        produced_any = true;
    }

    // A packet producing no samples yet (decoder still buffering) is not an
    // error; it's simply not reflected in the table until later.
    let _ = produced_any;
    Ok(TrackOutcome::Continue)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contracts::{Packet, Timebase};
    use crate::testutil::{FakeAudioDecoder, FakeDemuxer};

    #[test]
    fn indexes_video_and_audio_tracks_in_one_pass() {
        let mut demuxer = FakeDemuxer::new(
            vec![TrackKind::Video, TrackKind::Audio],
            vec![Timebase { num: 1, den: 1000 }, Timebase { num: 1, den: 48_000 }],
        );
        demuxer.push(Packet {
            stream_index: 0,
            pts: Some(0),
            dts: Some(0),
            file_pos: 0,
            key_frame: true,
            duration: 40,
            discard: false,
            data: vec![],
        });
        demuxer.push(Packet {
            stream_index: 1,
            pts: Some(0),
            dts: Some(0),
            file_pos: 4,
            key_frame: true,
            duration: 0,
            discard: false,
            data: vec![],
        });
        demuxer.push(Packet {
            stream_index: 0,
            pts: Some(40),
            dts: Some(40),
            file_pos: 8,
            key_frame: false,
            duration: 40,
            discard: false,
            data: vec![],
        });

        let mut audio_decoders: Vec<Option<Box<dyn AudioDecoder>>> =
            vec![None, Some(Box::new(FakeAudioDecoder::new(1024, 2, 48_000)))];
        let mut video_parsers: Vec<Option<Box<dyn BitstreamParser>>> = vec![None, None];

        let signature = FileSignature {
            file_len: 1024,
            digest: [0u8; 20],
        };
        let idx = build_index(
            &mut demuxer,
            signature,
            &IndexerConfig::default(),
            &mut audio_decoders,
            &mut video_parsers,
            None,
        )
        .unwrap();

        assert_eq!(idx.track(0).unwrap().visible_frame_count(), 2);
        assert_eq!(idx.track(1).unwrap().visible_frame_count(), 1);
        assert_eq!(idx.track(1).unwrap().total_samples(), 1024);
    }

    #[test]
    fn cancellation_via_progress_callback() {
        let mut demuxer = FakeDemuxer::new(vec![TrackKind::Video], vec![Timebase { num: 1, den: 1000 }]);
        demuxer.push(Packet {
            stream_index: 0,
            pts: Some(0),
            dts: Some(0),
            file_pos: 0,
            key_frame: true,
            duration: 0,
            discard: false,
            data: vec![],
        });
        let mut audio_decoders: Vec<Option<Box<dyn AudioDecoder>>> = vec![None];
        let mut video_parsers: Vec<Option<Box<dyn BitstreamParser>>> = vec![None];
        let signature = FileSignature {
            file_len: 0,
            digest: [0u8; 20],
        };
        let mut cancel = |_: u64, _: u64| true;
        let err = build_index(
            &mut demuxer,
            signature,
            &IndexerConfig::default(),
            &mut audio_decoders,
            &mut video_parsers,
            Some(&mut cancel),
        )
        .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Cancelled);
    }
}
