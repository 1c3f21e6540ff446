// This file is part of a random-access media source library.
// SPDX-License-Identifier: GPL-v3.0-or-later WITH GPL-3.0-linking-exception.

//! In-memory fixtures implementing the collaborator contracts of
//! [`crate::contracts`], used only by this crate's own tests. A real
//! implementation of these traits lives in the sibling `framedex-ffmpeg`
//! crate; nothing here is meant to be exported.

use crate::contracts::{
    AudioDecoder, DecodedAudio, DecodedVideoFrame, Demuxer, Packet, SampleFormat, Timebase,
    TrackKind, VideoDecoder,
};
use base::{bail, Error};
use std::collections::VecDeque;

/// A `Demuxer` backed by a pre-built list of packets, for deterministic
/// indexer/seek tests. `seek_by_pts`/`seek_by_byte` do a linear scan, which is
/// fine at fixture scale.
pub struct FakeDemuxer {
    kinds: Vec<TrackKind>,
    timebases: Vec<Timebase>,
    packets: Vec<Packet>,
    cursor: usize,
    file_len: u64,
    /// Total `read_packet` invocations, independent of `cursor`: a later
    /// `seek_by_*` can move `cursor` back over ground already read, so this
    /// is the only way tests can tell a direct seek from a long forward scan.
    read_calls: usize,
}

impl FakeDemuxer {
    pub fn new(kinds: Vec<TrackKind>, timebases: Vec<Timebase>) -> Self {
        FakeDemuxer {
            kinds,
            timebases,
            packets: Vec::new(),
            cursor: 0,
            file_len: 0,
            read_calls: 0,
        }
    }

    pub fn push(&mut self, p: Packet) {
        self.file_len = self.file_len.max(p.file_pos.max(0) as u64 + 1);
        self.packets.push(p);
    }

    pub fn with_file_len(mut self, n: u64) -> Self {
        self.file_len = n;
        self
    }

    /// Total number of `read_packet` calls so far.
    pub fn read_calls(&self) -> usize {
        self.read_calls
    }
}

impl Demuxer for FakeDemuxer {
    fn track_count(&self) -> usize {
        self.kinds.len()
    }

    fn track_kind(&self, track: usize) -> TrackKind {
        self.kinds[track]
    }

    fn timebase(&self, track: usize) -> Timebase {
        self.timebases[track]
    }

    fn file_len(&self) -> u64 {
        self.file_len
    }

    fn read_packet(&mut self) -> Result<Option<Packet>, Error> {
        self.read_calls += 1;
        if self.cursor >= self.packets.len() {
            return Ok(None);
        }
        let p = self.packets[self.cursor].clone();
        self.cursor += 1;
        Ok(Some(p))
    }

    fn seek_by_pts(&mut self, track: usize, pts: i64) -> Result<(), Error> {
        match self
            .packets
            .iter()
            .position(|p| p.stream_index == track && p.pts.map(|v| v >= pts).unwrap_or(false))
        {
            Some(i) => {
                self.cursor = i;
                Ok(())
            }
            None => bail!(Seeking, msg("no packet at or after pts {pts} on track {track}")),
        }
    }

    fn seek_by_byte(&mut self, pos: u64) -> Result<(), Error> {
        match self.packets.iter().position(|p| p.file_pos as u64 >= pos) {
            Some(i) => {
                self.cursor = i;
                Ok(())
            }
            None => {
                self.cursor = self.packets.len();
                Ok(())
            }
        }
    }
}

/// An `AudioDecoder` that turns every `send_packet` into exactly one
/// fixed-size chunk of silence, enough to exercise the indexer's and
/// `AudioSource`'s sample bookkeeping without a real codec.
pub struct FakeAudioDecoder {
    chunk_samples: u64,
    channels: u16,
    sample_rate: u32,
    pending: VecDeque<DecodedAudio>,
}

impl FakeAudioDecoder {
    pub fn new(chunk_samples: u64, channels: u16, sample_rate: u32) -> Self {
        FakeAudioDecoder {
            chunk_samples,
            channels,
            sample_rate,
            pending: VecDeque::new(),
        }
    }
}

impl AudioDecoder for FakeAudioDecoder {
    fn send_packet(&mut self, _packet: &Packet) -> Result<(), Error> {
        let frame_bytes = self.chunk_samples as usize * self.channels as usize * 2;
        self.pending.push_back(DecodedAudio {
            sample_count: self.chunk_samples,
            channels: self.channels,
            sample_rate: self.sample_rate,
            format: SampleFormat::S16,
            bytes: vec![0u8; frame_bytes],
        });
        Ok(())
    }

    fn receive_samples(&mut self) -> Result<Option<DecodedAudio>, Error> {
        Ok(self.pending.pop_front())
    }

    fn flush(&mut self) {
        self.pending.clear();
    }
}

/// A `VideoDecoder` that echoes back one frame per `send_packet`, carrying
/// the packet's PTS straight through (no reordering, no B-frame delay):
/// enough to exercise `VideoSource`'s correlation and delay bookkeeping
/// against a decoder whose behavior is fully known ahead of time.
pub struct FakeVideoDecoder {
    pending: VecDeque<DecodedVideoFrame>,
    pub delay: u32,
}

impl FakeVideoDecoder {
    pub fn new(delay: u32) -> Self {
        FakeVideoDecoder {
            pending: VecDeque::new(),
            delay,
        }
    }
}

impl VideoDecoder for FakeVideoDecoder {
    fn send_packet(&mut self, packet: &Packet) -> Result<(), Error> {
        self.pending.push_back(DecodedVideoFrame {
            pts: packet.pts,
            key_frame: packet.key_frame,
            pict_type: crate::contracts::FrameType::Unknown,
            width: 1920,
            height: 1080,
        });
        Ok(())
    }

    fn receive_frame(&mut self) -> Result<Option<DecodedVideoFrame>, Error> {
        if self.pending.len() as u32 <= self.delay {
            return Ok(None);
        }
        Ok(self.pending.pop_front())
    }

    fn flush(&mut self) {
        self.pending.clear();
    }

    fn has_b_frames(&self) -> bool {
        self.delay > 0
    }

    fn thread_count(&self) -> usize {
        1
    }

    fn codec_is_h264(&self) -> bool {
        true
    }

    fn codec_is_vc1(&self) -> bool {
        false
    }

    fn codec_is_av1(&self) -> bool {
        false
    }

    fn declared_delay(&self) -> Option<u32> {
        None
    }

    fn set_skip_non_reference_frames(&mut self, _skip: bool) {}
}
