// This file is part of a random-access media source library.
// SPDX-License-Identifier: GPL-v3.0-or-later WITH GPL-3.0-linking-exception.

//! Frame-accurate video access (spec §4.5, component C5): given a visible
//! frame number, seek to a keyframe, decode forward through the decoder's
//! reorder buffer, and hand back exactly the requested frame. Grounded on
//! the teacher's `db/stream/recent_frames.rs` for the "keep a short rolling
//! window, correlate by identity once decoding catches up" shape, though the
//! identity here is presentation timestamp rather than a monotonic sequence
//! number, and the buffering is a decoder reorder delay rather than a cache.

use crate::contracts::{DecodedVideoFrame, Demuxer, VideoDecoder};
use crate::track::TrackTable;
use base::{bail, Error, ErrorKind};

/// Spec P7 / §4.5 step 2: the seek-ahead threshold, in records, beyond which
/// continuing to decode forward is costlier than a fresh seek.
const SEEK_OFFSET_STEP: u64 = 10;

/// How aggressively [`VideoSource`] is allowed to seek (spec §4.5).
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum SeekMode {
    /// Frames must be requested in increasing order; never seeks backward,
    /// and never re-seeks forward either -- pure linear demux and decode.
    LinearNoRewind,
    /// Frames must be requested in increasing order; seeks forward only, but
    /// may still need to re-seek to an earlier keyframe than the decoder's
    /// current position when there's a large forward jump.
    Linear,
    /// Frames may be requested in any order; always seeks to the nearest
    /// keyframe at or before the target and decodes forward with a full
    /// safety margin for the decoder's reorder delay.
    Normal,
    /// Like `Normal`, but trusts the container's `key_frame` flag without
    /// the open-GOP anchor check (spec §4.1) -- faster, but can return the
    /// wrong frame on streams with actual open GOPs.
    Unsafe,
    /// Like `Normal`, but starts decoding as close to the target as
    /// possible instead of applying the full reorder-delay margin, trading
    /// a small risk of under-shooting near end of stream for speed.
    Aggressive,
}

/// Decodes frames from one video track, keyed by visible frame number.
pub struct VideoSource<'a> {
    demuxer: &'a mut dyn Demuxer,
    decoder: &'a mut dyn VideoDecoder,
    track: &'a TrackTable,
    track_index: usize,
    seek_mode: SeekMode,
    delay: u32,
    /// The record index the decoder is currently primed up through, decode
    /// order. `None` before the first `get_frame` call.
    decoded_through: Option<u64>,
    last_visible_frame: Option<u32>,
}

impl<'a> VideoSource<'a> {
    pub fn new(
        demuxer: &'a mut dyn Demuxer,
        decoder: &'a mut dyn VideoDecoder,
        track: &'a TrackTable,
        track_index: usize,
        seek_mode: SeekMode,
    ) -> Self {
        let delay = compute_delay(decoder, track);
        VideoSource {
            demuxer,
            decoder,
            track,
            track_index,
            seek_mode,
            delay,
            decoded_through: None,
            last_visible_frame: None,
        }
    }

    pub fn delay(&self) -> u32 {
        self.delay
    }

    /// Returns the decoded frame for visible frame number `n` (spec §4.5).
    pub fn get_frame(&mut self, n: u32) -> Result<DecodedVideoFrame, Error> {
        if n >= self.track.visible_frame_count() {
            bail!(OutOfRange, msg("frame {n} out of range"));
        }
        let record_index = self
            .track
            .real_frame_number(n)
            .expect("n already bounds-checked") as u64;

        self.check_ordering_constraint(n)?;
        let start_decode_pos = self.choose_seek_point(record_index)?;
        if let Some(pos) = start_decode_pos {
            self.seek_and_prime(pos)?;
        }

        let target_pts = self
            .track
            .record(record_index as usize)
            .and_then(|r| r.pts);
        let frame = self.decode_until(target_pts, record_index)?;
        self.last_visible_frame = Some(n);
        Ok(frame)
    }

    fn check_ordering_constraint(&self, n: u32) -> Result<(), Error> {
        if matches!(self.seek_mode, SeekMode::LinearNoRewind | SeekMode::Linear) {
            if let Some(last) = self.last_visible_frame {
                if n <= last && self.seek_mode == SeekMode::LinearNoRewind {
                    bail!(
                        Seeking,
                        msg("frame {n} requested after {last} in LinearNoRewind mode")
                    );
                }
            }
        }
        Ok(())
    }

    /// Decides whether (and where) to seek before decoding toward
    /// `record_index` (spec §4.5 steps 2-3). Returns `None` when the decoder
    /// is already correctly primed and decoding can simply continue forward.
    fn choose_seek_point(&mut self, record_index: u64) -> Result<Option<u64>, Error> {
        let current = self.decoded_through.unwrap_or(0);
        let rewinding = self
            .decoded_through
            .map(|d| record_index < d)
            .unwrap_or(true);

        match self.seek_mode {
            SeekMode::LinearNoRewind => {
                if self.decoded_through.is_none() {
                    return Ok(Some(0));
                }
                Ok(None)
            }
            SeekMode::Linear => {
                if !rewinding {
                    Ok(None)
                } else {
                    let key = self
                        .track
                        .closest_key_frame_before(record_index as usize)
                        .ok_or_else(|| Error::new(ErrorKind::Seeking, "no keyframe before target"))?;
                    Ok(Some(key as u64))
                }
            }
            SeekMode::Normal | SeekMode::Unsafe => {
                let key = if self.seek_mode == SeekMode::Unsafe {
                    self.track.closest_key_frame_before_unchecked(record_index as usize)
                } else {
                    self.track.closest_key_frame_before(record_index as usize)
                }
                .ok_or_else(|| Error::new(ErrorKind::Seeking, "no keyframe before target"))?;
                let keyframe_far_ahead = key as u64 > current + SEEK_OFFSET_STEP;
                if rewinding || keyframe_far_ahead {
                    Ok(Some(key as u64))
                } else {
                    Ok(None)
                }
            }
            SeekMode::Aggressive => {
                let key = self
                    .track
                    .closest_key_frame_before(record_index as usize)
                    .ok_or_else(|| Error::new(ErrorKind::Seeking, "no keyframe before target"))?;
                let keyframe_far_ahead = key as u64 > current + SEEK_OFFSET_STEP;
                let target_far_ahead = record_index > current + SEEK_OFFSET_STEP;
                if rewinding || keyframe_far_ahead || target_far_ahead {
                    // Aggressive seeks to the target record itself (spec §4.5
                    // step 3), clamped away from the tail so the decoder
                    // doesn't switch to drain mode before reaching it (spec
                    // §4.5 "End-of-stream flushing").
                    Ok(Some(record_index.min(self.aggressive_seek_ceiling())))
                } else {
                    Ok(None)
                }
            }
        }
    }

    /// The last record Aggressive mode may target without risking an early
    /// decoder drain: `num_frames - 1 - delay - 1` (spec §8 "Open Questions").
    fn aggressive_seek_ceiling(&self) -> u64 {
        (self.track.records().len() as u64)
            .saturating_sub(1)
            .saturating_sub(u64::from(self.delay))
            .saturating_sub(1)
    }

    fn seek_and_prime(&mut self, mut key_record: u64) -> Result<(), Error> {
        loop {
            let pts = self
                .track
                .record(key_record as usize)
                .and_then(|r| r.pts)
                .unwrap_or(0);
            let seek_result = self.demuxer.seek_by_pts(self.track_index, pts);
            if seek_result.is_err() {
                let pos = self
                    .track
                    .record(key_record as usize)
                    .and_then(|r| r.file_pos)
                    .unwrap_or(0);
                self.demuxer.seek_by_byte(pos.max(0) as u64)?;
            }
            self.decoder.flush();
            self.decoded_through = Some(key_record);

            // Correlate the demuxer's actual post-seek position with our
            // index: if the container landed somewhere other than expected
            // (spec §4.5 step 3), retreat up to 10 records, bounded at 0,
            // and retry once.
            match self.demuxer.read_packet() {
                Ok(Some(p)) => {
                    let lands_at_expected = self.correlates(&p, key_record);
                    // Put the packet "back" conceptually: re-seek by byte to
                    // its own position so the forward decode below re-reads
                    // it, since `Demuxer` has no peek/unread.
                    if let Ok(()) = self.demuxer.seek_by_byte(p.file_pos.max(0) as u64) {
                        if !lands_at_expected && key_record > 0 {
                            key_record = key_record.saturating_sub(10);
                            continue;
                        }
                    }
                }
                Ok(None) => bail!(Seeking, msg("seek landed at end of stream")),
                Err(e) => return Err(e),
            }
            return Ok(());
        }
    }

    fn correlates(&self, packet: &crate::contracts::Packet, expected_record: u64) -> bool {
        let expected = self.track.record(expected_record as usize);
        match expected {
            Some(r) => {
                if let (Some(want), Some(got)) = (r.pts, packet.pts) {
                    return want == got;
                }
                if packet.file_pos >= 0 {
                    return r.file_pos == Some(packet.file_pos);
                }
                true
            }
            None => false,
        }
    }

    /// Feeds packets to the decoder from the current demuxer position until
    /// a frame matching `target_pts` is produced (falling back to
    /// `target_record`'s position when PTS is unreliable), respecting the
    /// `delay`-deep reorder buffer (spec §4.5 steps 4-5).
    fn decode_until(
        &mut self,
        target_pts: Option<i64>,
        target_record: u64,
    ) -> Result<DecodedVideoFrame, Error> {
        let mut current_frame = self.decoded_through.unwrap_or(0);

        loop {
            // Cheapen the walk while still short of the target; stop
            // skipping once within `delay` of it so the target frame itself
            // decodes fully (spec §4.5 step 4).
            let skip_ref = current_frame + u64::from(self.delay) < target_record;
            self.decoder.set_skip_non_reference_frames(skip_ref);

            match self.demuxer.read_packet()? {
                Some(packet) => {
                    if packet.stream_index != self.track_index {
                        continue;
                    }
                    self.decoder.send_packet(&packet)?;
                    if let Some(frame) = self.decoder.receive_frame()? {
                        current_frame += 1;
                        self.decoded_through = Some(current_frame);
                        if frame.pts == target_pts || target_pts.is_none() {
                            self.decoder.set_skip_non_reference_frames(false);
                            return Ok(frame);
                        }
                        // Not yet the target: still in the reorder warm-up
                        // or decoding past it on the way there; discard and
                        // keep going.
                    }
                }
                None => {
                    self.decoder.flush();
                    if let Some(frame) = self.decoder.receive_frame()? {
                        current_frame += 1;
                        self.decoded_through = Some(current_frame);
                        if frame.pts == target_pts || target_pts.is_none() {
                            self.decoder.set_skip_non_reference_frames(false);
                            return Ok(frame);
                        }
                    }
                    bail!(Decoding, msg("end of stream before reaching target frame"));
                }
            }
        }
    }
}

/// Spec §4.5: the number of decode-order frames the decoder buffers before
/// emitting in presentation order. H.264 uses a fixed 15-frame DPB-sized
/// margin, doubled for PAFF streams (two fields per displayed frame); VC-1's
/// margin grows with thread count; AV1 publishes its own delay; everything
/// else falls back to the stream's observed maximum B-frame run.
fn compute_delay(decoder: &dyn VideoDecoder, track: &TrackTable) -> u32 {
    if decoder.codec_is_h264() {
        let is_paff = track.records().iter().any(|r| r.hidden);
        return if is_paff { 30 } else { 15 };
    }
    if decoder.codec_is_vc1() {
        return 7 + decoder.thread_count().saturating_sub(1) as u32;
    }
    if decoder.codec_is_av1() {
        return decoder.declared_delay().unwrap_or(0);
    }
    decoder
        .declared_delay()
        .unwrap_or_else(|| track.max_b_frames.max(0) as u32)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contracts::{FrameType, Packet, Timebase, TrackKind};
    use crate::testutil::{FakeDemuxer, FakeVideoDecoder};
    use crate::track::new_video_record;

    fn build_track_and_demuxer() -> (TrackTable, FakeDemuxer) {
        let mut t = TrackTable::new(TrackKind::Video, Timebase { num: 1, den: 1000 });
        let mut d = FakeDemuxer::new(vec![TrackKind::Video], vec![Timebase { num: 1, den: 1000 }]);
        let frames = [
            (0i64, true, FrameType::I),
            (40, false, FrameType::P),
            (80, false, FrameType::P),
            (120, false, FrameType::P),
        ];
        for (i, (pts, key, ty)) in frames.iter().enumerate() {
            let mut r = new_video_record();
            r.pts = Some(*pts);
            r.key_frame = *key;
            r.frame_type = *ty;
            r.file_pos = Some(i as i64 * 100);
            t.push_video_record(r);
            d.push(Packet {
                stream_index: 0,
                pts: Some(*pts),
                dts: Some(*pts),
                file_pos: i as i64 * 100,
                key_frame: *key,
                duration: 40,
                discard: false,
                data: vec![],
            });
        }
        t.finalize(false).unwrap();
        (t, d)
    }

    #[test]
    fn normal_mode_seeks_and_decodes_to_target() {
        let (track, mut demuxer) = build_track_and_demuxer();
        let mut decoder = FakeVideoDecoder::new(0);
        let mut src = VideoSource::new(&mut demuxer, &mut decoder, &track, 0, SeekMode::Normal);
        let frame = src.get_frame(2).unwrap();
        assert_eq!(frame.pts, Some(80));
    }

    #[test]
    fn linear_no_rewind_rejects_non_increasing_requests() {
        let (track, mut demuxer) = build_track_and_demuxer();
        let mut decoder = FakeVideoDecoder::new(0);
        let mut src = VideoSource::new(
            &mut demuxer,
            &mut decoder,
            &track,
            0,
            SeekMode::LinearNoRewind,
        );
        src.get_frame(1).unwrap();
        let err = src.get_frame(0).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Seeking);
    }

    /// Spec §4.5 step 3: Aggressive mode seeks to the target record itself,
    /// not the preceding keyframe, when there's enough trailing margin.
    #[test]
    fn aggressive_mode_seeks_directly_to_target() {
        let mut t = TrackTable::new(TrackKind::Video, Timebase { num: 1, den: 1000 });
        let mut d = FakeDemuxer::new(vec![TrackKind::Video], vec![Timebase { num: 1, den: 1000 }]);
        for i in 0..30i64 {
            let mut r = new_video_record();
            r.pts = Some(i * 40);
            r.key_frame = i == 0;
            r.frame_type = if i == 0 { FrameType::I } else { FrameType::P };
            r.file_pos = Some(i * 100);
            t.push_video_record(r);
            d.push(Packet {
                stream_index: 0,
                pts: Some(i * 40),
                dts: Some(i * 40),
                file_pos: i * 100,
                key_frame: i == 0,
                duration: 40,
                discard: false,
                data: vec![],
            });
        }
        t.finalize(false).unwrap();

        let mut decoder = FakeVideoDecoder::new(0);
        let mut src = VideoSource::new(&mut d, &mut decoder, &t, 0, SeekMode::Aggressive);
        let frame = src.get_frame(10).unwrap();
        assert_eq!(frame.pts, Some(400));
        // A direct seek to record 10 reads the one correlation packet plus
        // the one packet decoded to the target; decoding forward from the
        // keyframe at record 0 would have read at least 11.
        assert!(d.read_calls() <= 3, "read_calls = {}", d.read_calls());
    }

    /// Spec P7: repeated seeks to the same frame return the same result.
    #[test]
    fn seek_is_idempotent() {
        let (track, mut demuxer) = build_track_and_demuxer();
        let mut decoder = FakeVideoDecoder::new(0);
        let mut src = VideoSource::new(&mut demuxer, &mut decoder, &track, 0, SeekMode::Normal);
        let a = src.get_frame(3).unwrap();
        let b = src.get_frame(1).unwrap();
        let c = src.get_frame(3).unwrap();
        assert_eq!(a.pts, c.pts);
        assert_eq!(b.pts, Some(40));
    }
}
