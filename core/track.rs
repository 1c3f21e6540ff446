// This file is part of a random-access media source library.
// SPDX-License-Identifier: GPL-v3.0-or-later WITH GPL-3.0-linking-exception.

//! The track table (spec §4.1, component C1): pure data plus query
//! operators, no I/O. Grounded on the teacher's `db/recording.rs`, which
//! plays a similar role (a per-recording index of frame offsets/durations
//! queried by playback code) but is keyed on a packed byte encoding; here the
//! spec names the record fields directly; packing into the persisted format
//! is `crate::index`'s job, not this module's.

use crate::contracts::{FrameType, Timebase, TrackKind};
use base::{Error, ErrorKind};
use std::io::Write;

/// One record per demuxer packet belonging to an indexed track (spec §3).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FrameRecord {
    /// Presentation timestamp in track timebase units, or `None` if the
    /// container didn't supply one (synthesized on finalize; see `has_ts`).
    pub pts: Option<i64>,
    /// Byte offset of the packet's start, or `None` if unknown.
    pub file_pos: Option<i64>,
    pub key_frame: bool,
    pub frame_type: FrameType,
    /// Negative means "unknown".
    pub repeat_pict: i32,
    /// True iff this packet produces no visible frame (PAFF second field,
    /// VPx alt-ref, demuxer `DISCARD`, or a duplicated field).
    pub hidden: bool,
    /// Audio only: running sample offset of this packet.
    pub sample_start: u64,
    /// Audio only: number of output samples this packet decodes to.
    pub sample_count: u32,
    /// Video only: decoding-order rank. Set to `i` during the walk; after
    /// finalize, still holds the decode-order index, just carried along into
    /// the now presentation-sorted `records` vector (spec §4.1 step 3).
    pub original_pos: u64,
}

impl FrameRecord {
    fn video_default(original_pos: u64) -> Self {
        FrameRecord {
            pts: None,
            file_pos: None,
            key_frame: false,
            frame_type: FrameType::Unknown,
            repeat_pict: -1,
            hidden: false,
            sample_start: 0,
            sample_count: 0,
            original_pos,
        }
    }

    fn audio_default(sample_start: u64) -> Self {
        FrameRecord {
            pts: None,
            file_pos: None,
            key_frame: true,
            frame_type: FrameType::Unknown,
            repeat_pict: -1,
            hidden: false,
            sample_start,
            sample_count: 0,
            original_pos: 0,
        }
    }
}

/// One per track indexed (spec §3). Mutable only during indexing; frozen
/// after [`TrackTable::finalize`].
#[derive(Debug)]
pub struct TrackTable {
    pub kind: TrackKind,
    pub timebase: Timebase,
    records: Vec<FrameRecord>,
    pub max_b_frames: i32,
    /// False iff **all** records had unset PTS and were synthesized.
    pub has_ts: bool,
    /// True iff presentation timestamps are unreliable and decode
    /// timestamps must substitute.
    pub use_dts: bool,
    finalized: bool,
    /// `visible_frame_number -> record_index`. Empty until finalized.
    visible: Vec<u32>,
}

impl TrackTable {
    pub fn new(kind: TrackKind, timebase: Timebase) -> Self {
        TrackTable {
            kind,
            timebase,
            records: Vec::new(),
            max_b_frames: 0,
            has_ts: true,
            use_dts: false,
            finalized: false,
            visible: Vec::new(),
        }
    }

    /// Appends a video frame record during indexing (spec §4.3 step 2).
    pub fn push_video_record(&mut self, mut r: FrameRecord) {
        debug_assert!(!self.finalized, "pushed to a finalized TrackTable");
        r.original_pos = self.records.len() as u64;
        self.records.push(r);
    }

    /// Appends an audio frame record during indexing (spec §4.3 step 3).
    pub fn push_audio_record(&mut self, r: FrameRecord) {
        debug_assert!(!self.finalized, "pushed to a finalized TrackTable");
        self.records.push(r);
    }

    pub fn is_finalized(&self) -> bool {
        self.finalized
    }

    /// Discards every record indexed for this track so far (spec §4.3
    /// `ErrorHandlingMode::ClearTrack`). Indexing may continue afterward,
    /// starting the track over from the next packet.
    pub(crate) fn clear(&mut self) {
        debug_assert!(!self.finalized);
        self.records.clear();
    }

    /// Reconstructs an already-finalized table from persisted parts (used by
    /// [`crate::index`] when reading a saved index back in: the records are
    /// already in their final, presentation-sorted form, so only the visible
    /// map needs rebuilding).
    pub(crate) fn from_finalized_parts(
        kind: TrackKind,
        timebase: Timebase,
        records: Vec<FrameRecord>,
        max_b_frames: i32,
        has_ts: bool,
        use_dts: bool,
    ) -> Self {
        let mut t = TrackTable {
            kind,
            timebase,
            records,
            max_b_frames,
            has_ts,
            use_dts,
            finalized: false,
            visible: Vec::new(),
        };
        t.build_visible_map();
        t.finalized = true;
        t
    }

    pub fn records(&self) -> &[FrameRecord] {
        &self.records
    }

    pub fn record(&self, record_index: usize) -> Option<&FrameRecord> {
        self.records.get(record_index)
    }

    /// Drops a trailing pathological audio record (spec §4.3 heuristic
    /// guard): a final record with `sample_count > 1_000_000` on a track
    /// with `<= 10` records, a known issue with certain lossless audio
    /// streams' trailing packet.
    pub fn maybe_drop_pathological_trailing_audio_record(&mut self) {
        debug_assert!(!self.finalized);
        if self.records.len() <= 10 {
            if let Some(last) = self.records.last() {
                if last.sample_count > 1_000_000 {
                    tracing::warn!(
                        sample_count = last.sample_count,
                        "dropping pathological trailing audio record"
                    );
                    self.records.pop();
                }
            }
        }
    }

    /// Finalizes the table: reorders, hides PAFF pairs, assigns
    /// `original_pos`, and builds the visible-frame map (spec §4.1).
    ///
    /// `container_shares_pts_legitimately` should be true for containers
    /// (e.g. ASF) whose packets are known to legitimately share PTS without
    /// being H.264 PAFF; `maybe_hide_frames` is skipped in that case.
    pub fn finalize(&mut self, container_shares_pts_legitimately: bool) -> Result<(), Error> {
        debug_assert!(!self.finalized);
        if self.records.is_empty() {
            self.finalized = true;
            return Ok(());
        }

        if self.kind == TrackKind::Video {
            self.synthesize_missing_pts();
            self.maybe_reorder_frames();
            if !container_shares_pts_legitimately {
                self.maybe_hide_frames();
            }
            self.assign_original_pos_and_sort()?;
        }

        self.build_visible_map();
        self.finalized = true;
        Ok(())
    }

    /// If every record has `pts.is_none()`, assign synthetic ordinals `0, 1,
    /// 2, ...` and mark `has_ts = false` (spec §3 invariant 4, §4.3 step 1).
    fn synthesize_missing_pts(&mut self) {
        let all_unset = self.records.iter().all(|r| r.pts.is_none());
        if all_unset {
            self.has_ts = false;
            for (i, r) in self.records.iter_mut().enumerate() {
                r.pts = Some(i as i64);
            }
        } else {
            self.has_ts = true;
        }
    }

    /// Spec §4.1 step 1: if all PTS are monotonic non-decreasing but the
    /// stream contains B-frames, the "PTS" are actually DTS; recover
    /// presentation order by swapping each B-frame's PTS with its
    /// successor's (the P-frame it actually precedes in presentation order).
    /// Covers only the single-consecutive-B-frame case; if
    /// multiple consecutive B-frames appear with monotonic PTS, the stream is
    /// trusted as-is (spec §8 scenario 1).
    fn maybe_reorder_frames(&mut self) {
        let monotonic = self
            .records
            .windows(2)
            .all(|w| w[0].pts.unwrap() <= w[1].pts.unwrap());
        let has_b = self
            .records
            .iter()
            .any(|r| r.frame_type == FrameType::B);
        if !monotonic || !has_b {
            return;
        }
        let mut consecutive_b = 0usize;
        let mut max_consecutive_b = 0usize;
        for r in &self.records {
            if r.frame_type == FrameType::B {
                consecutive_b += 1;
                max_consecutive_b = max_consecutive_b.max(consecutive_b);
            } else {
                consecutive_b = 0;
            }
        }
        if max_consecutive_b > 1 {
            // Heuristic abandoned: trust the stream's PTS as given.
            tracing::warn!(
                max_consecutive_b,
                "multiple consecutive B-frames with monotonic PTS; not reordering"
            );
            return;
        }
        for i in 0..self.records.len().saturating_sub(1) {
            if self.records[i].frame_type == FrameType::B {
                let cur_pts = self.records[i].pts;
                let next_pts = self.records[i + 1].pts;
                self.records[i].pts = next_pts;
                self.records[i + 1].pts = cur_pts;
            }
        }
    }

    /// Spec §4.1 step 2: for H.264 PAFF, a packet sharing its predecessor's
    /// PTS with no independent file position is the second field of a pair;
    /// mark it hidden (spec §8 scenario 2).
    fn maybe_hide_frames(&mut self) {
        for i in 1..self.records.len() {
            let same_pts = self.records[i].pts == self.records[i - 1].pts;
            let no_independent_pos = self.records[i].file_pos.is_none();
            if same_pts && no_independent_pos {
                self.records[i].hidden = true;
            }
        }
    }

    /// Spec §4.1 step 3: record `original_pos = i` (decode order), sort by
    /// `(pts, original_pos)`, then keep each record's decode index as its
    /// `original_pos` so iterating `records` in `original_pos` order recovers
    /// decode order (spec §8 scenario 1).
    fn assign_original_pos_and_sort(&mut self) -> Result<(), Error> {
        let n = self.records.len();
        for (i, r) in self.records.iter_mut().enumerate() {
            r.original_pos = i as u64;
        }
        let mut order: Vec<usize> = (0..n).collect();
        order.sort_by(|&a, &b| {
            let ra = &self.records[a];
            let rb = &self.records[b];
            ra.pts
                .cmp(&rb.pts)
                .then(ra.original_pos.cmp(&rb.original_pos))
        });
        // `order[k]` is the decode-order index now at presentation position
        // `k`. Rebuild `records` in that presentation order, carrying each
        // record's decode index forward as its `original_pos` unchanged.
        let mut sorted = Vec::with_capacity(n);
        for &old_idx in &order {
            let mut r = self.records[old_idx].clone();
            r.original_pos = old_idx as u64;
            sorted.push(r);
        }
        self.records = sorted;
        self.recompute_max_b_frames();
        Ok(())
    }

    fn recompute_max_b_frames(&mut self) {
        // `original_pos` now holds decode order; walk records in decode
        // order and count consecutive B-frames.
        let mut by_decode_order: Vec<&FrameRecord> = self.records.iter().collect();
        by_decode_order.sort_by_key(|r| r.original_pos);
        let mut run = 0i32;
        let mut max_run = 0i32;
        for r in by_decode_order {
            if r.frame_type == FrameType::B {
                run += 1;
                max_run = max_run.max(run);
            } else {
                run = 0;
            }
        }
        self.max_b_frames = max_run;
    }

    fn build_visible_map(&mut self) {
        self.visible.clear();
        for (i, r) in self.records.iter().enumerate() {
            if !r.hidden {
                self.visible.push(i as u32);
            }
        }
    }

    // ---- queries (spec §4.1) ----

    /// Exact lookup: binary search over records; returns the visible frame
    /// number whose PTS equals `pts`, or `None`.
    pub fn frame_from_pts(&self, pts: i64) -> Option<u32> {
        debug_assert!(self.finalized);
        let idx = self
            .records
            .binary_search_by_key(&Some(pts), |r| r.pts)
            .ok()?;
        self.visible_frame_number_of_record(idx)
    }

    /// Lower-bound binary search, then choose the nearer of the two
    /// bracketing records by absolute PTS difference.
    pub fn closest_frame_from_pts(&self, pts: i64) -> Option<u32> {
        debug_assert!(self.finalized);
        if self.records.is_empty() {
            return None;
        }
        let lower = self.records.partition_point(|r| r.pts.unwrap() < pts);
        let candidates = [lower.checked_sub(1), Some(lower).filter(|&i| i < self.records.len())];
        let best = candidates
            .into_iter()
            .flatten()
            .min_by_key(|&i| (self.records[i].pts.unwrap() - pts).abs())?;
        self.visible_frame_number_of_record(best)
    }

    /// Linear scan (tables are small; this is a fallback when PTS is
    /// unreliable). Returns the visible frame whose packet begins at
    /// `file_pos`, or `None`.
    pub fn frame_from_pos(&self, file_pos: i64) -> Option<u32> {
        debug_assert!(self.finalized);
        let idx = self
            .records
            .iter()
            .position(|r| r.file_pos == Some(file_pos))?;
        self.visible_frame_number_of_record(idx)
    }

    /// Walks backward from record `n` until a non-hidden keyframe is found;
    /// for open-GOP, also checks that the anchor reached through
    /// `original_pos` is itself a keyframe (spec §4.1, supplemented in
    /// SPEC_FULL.md from `track.cpp`'s `FindClosestKeyFrame`).
    pub fn closest_key_frame_before(&self, n: usize) -> Option<usize> {
        self.closest_key_frame_before_impl(n, true)
    }

    /// Like [`Self::closest_key_frame_before`], but trusts the container's
    /// `key_frame` flag outright, skipping the open-GOP anchor check (spec
    /// §4.5 `Unsafe` seek mode).
    pub fn closest_key_frame_before_unchecked(&self, n: usize) -> Option<usize> {
        self.closest_key_frame_before_impl(n, false)
    }

    fn closest_key_frame_before_impl(&self, n: usize, check_open_gop: bool) -> Option<usize> {
        debug_assert!(self.finalized);
        let mut i = n.min(self.records.len().saturating_sub(1)) as isize;
        while i >= 0 {
            let r = &self.records[i as usize];
            if r.key_frame && !r.hidden && (!check_open_gop || self.open_gop_anchor_ok(i as usize))
            {
                return Some(i as usize);
            }
            i -= 1;
        }
        None
    }

    /// Open-GOP guard: a keyframe's decode-order neighborhood should not
    /// point further back to a non-key anchor it depends on. We approximate
    /// this the way the original does: accept unless the keyframe's
    /// decode-order predecessor is itself present and non-key with a lower
    /// `original_pos` referencing frames before any earlier keyframe -- in
    /// practice, for closed-GOP streams (the overwhelming majority), this is
    /// always true, and open-GOP streams keep walking backward to the true
    /// anchor.
    fn open_gop_anchor_ok(&self, record_index: usize) -> bool {
        let decode_pos = self.records[record_index].original_pos;
        if decode_pos == 0 {
            return true;
        }
        // Find the record whose original_pos == decode_pos - 1: if it is
        // itself a non-hidden keyframe or comes after this one in
        // presentation order, there's no open-GOP leakage to worry about.
        let prev_decode_pos = decode_pos - 1;
        match self
            .records
            .iter()
            .find(|r| r.original_pos == prev_decode_pos)
        {
            None => true,
            Some(prev) => prev.key_frame || prev.pts >= self.records[record_index].pts,
        }
    }

    pub fn visible_frame_count(&self) -> u32 {
        debug_assert!(self.finalized);
        self.visible.len() as u32
    }

    /// The record index corresponding to the `n`-th visible frame.
    pub fn real_frame_number(&self, n: u32) -> Option<usize> {
        debug_assert!(self.finalized);
        self.visible.get(n as usize).map(|&i| i as usize)
    }

    fn visible_frame_number_of_record(&self, record_index: usize) -> Option<u32> {
        if self.records[record_index].hidden {
            return None;
        }
        self.visible
            .binary_search(&(record_index as u32))
            .ok()
            .map(|i| i as u32)
    }

    /// Spec §6.3: dumps one PTS-converted-to-milliseconds line per visible
    /// frame, recovered from `ffvideosource.cpp`'s `WriteTimecodes`.
    pub fn write_timecodes<W: Write>(&self, mut w: W) -> Result<(), Error> {
        debug_assert!(self.finalized);
        writeln!(w, "# timecode format v2")
            .map_err(|e| Error::with_source(ErrorKind::Internal, "writing timecodes", e))?;
        for &record_index in &self.visible {
            let r = &self.records[record_index as usize];
            let pts = r.pts.unwrap_or(0);
            let ms = pts
                .checked_mul(self.timebase.num)
                .and_then(|v| v.checked_mul(1000))
                .map(|v| v / self.timebase.den)
                .ok_or_else(|| Error::new(ErrorKind::Internal, "timecode overflow"))?;
            writeln!(w, "{ms}")
                .map_err(|e| Error::with_source(ErrorKind::Internal, "writing timecodes", e))?;
        }
        Ok(())
    }

    /// Total decoded samples (audio tracks only).
    pub fn total_samples(&self) -> u64 {
        self.records
            .last()
            .map(|r| r.sample_start + u64::from(r.sample_count))
            .unwrap_or(0)
    }
}

/// Thin wrapper so callers outside this module can construct a record
/// without naming every field (used by the indexer).
pub fn new_video_record() -> FrameRecord {
    FrameRecord::video_default(0)
}

pub fn new_audio_record(sample_start: u64) -> FrameRecord {
    FrameRecord::audio_default(sample_start)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contracts::TrackKind;

    fn tb() -> Timebase {
        Timebase { num: 1, den: 1000 }
    }

    /// Spec §8 scenario 1: H.264 with B-frames, monotonic DTS masquerading
    /// as PTS.
    #[test]
    fn reorder_single_b_frame_run() {
        let mut t = TrackTable::new(TrackKind::Video, tb());
        let ptses = [0, 40, 80, 120, 160];
        let types = [
            FrameType::I,
            FrameType::B,
            FrameType::P,
            FrameType::B,
            FrameType::P,
        ];
        for (pts, ty) in ptses.iter().zip(types.iter()) {
            let mut r = new_video_record();
            r.pts = Some(*pts);
            r.frame_type = *ty;
            r.key_frame = *ty == FrameType::I;
            t.push_video_record(r);
        }
        t.finalize(false).unwrap();
        let ptses: Vec<i64> = t.records().iter().map(|r| r.pts.unwrap()).collect();
        assert_eq!(ptses, vec![0, 40, 80, 120, 160]);
        let original_pos: Vec<u64> = t.records().iter().map(|r| r.original_pos).collect();
        assert_eq!(original_pos, vec![0, 2, 1, 4, 3]);
    }

    /// Spec §8 scenario 2: PAFF pair detection.
    #[test]
    fn paff_pair_hidden() {
        let mut t = TrackTable::new(TrackKind::Video, tb());
        let mut r0 = new_video_record();
        r0.pts = Some(1000);
        r0.key_frame = true;
        r0.file_pos = Some(4096);
        t.push_video_record(r0);
        let mut r1 = new_video_record();
        r1.pts = Some(1000);
        r1.file_pos = None;
        t.push_video_record(r1);
        let mut r2 = new_video_record();
        r2.pts = Some(2000);
        r2.file_pos = Some(8192);
        t.push_video_record(r2);
        t.finalize(false).unwrap();
        assert_eq!(t.visible_frame_count(), 2);
        assert!(t.record(1).unwrap().hidden);
        assert_eq!(t.real_frame_number(1), Some(2));
    }

    #[test]
    fn asf_legit_shared_pts_not_hidden() {
        let mut t = TrackTable::new(TrackKind::Video, tb());
        for pts in [1000, 1000, 2000] {
            let mut r = new_video_record();
            r.pts = Some(pts);
            r.key_frame = true;
            t.push_video_record(r);
        }
        t.finalize(true).unwrap();
        assert_eq!(t.visible_frame_count(), 3);
    }

    #[test]
    fn synthetic_pts_when_all_unset() {
        let mut t = TrackTable::new(TrackKind::Video, tb());
        for _ in 0..3 {
            let mut r = new_video_record();
            r.key_frame = true;
            r.pts = None;
            t.push_video_record(r);
        }
        t.finalize(false).unwrap();
        assert!(!t.has_ts);
        let ptses: Vec<i64> = t.records().iter().map(|r| r.pts.unwrap()).collect();
        assert_eq!(ptses, vec![0, 1, 2]);
    }

    #[test]
    fn frame_from_pts_and_closest() {
        let mut t = TrackTable::new(TrackKind::Video, tb());
        for pts in [0, 100, 200, 300] {
            let mut r = new_video_record();
            r.pts = Some(pts);
            r.key_frame = true;
            t.push_video_record(r);
        }
        t.finalize(false).unwrap();
        assert_eq!(t.frame_from_pts(200), Some(2));
        assert_eq!(t.frame_from_pts(250), None);
        assert_eq!(t.closest_frame_from_pts(240), Some(2));
        assert_eq!(t.closest_frame_from_pts(260), Some(3));
    }

    #[test]
    fn closest_key_frame_before_walks_back() {
        let mut t = TrackTable::new(TrackKind::Video, tb());
        let keys = [true, false, false, true, false];
        for (i, k) in keys.iter().enumerate() {
            let mut r = new_video_record();
            r.pts = Some(i as i64 * 100);
            r.key_frame = *k;
            t.push_video_record(r);
        }
        t.finalize(false).unwrap();
        assert_eq!(t.closest_key_frame_before(4), Some(3));
        assert_eq!(t.closest_key_frame_before(2), Some(0));
    }

    /// Spec §4.5 `Unsafe` mode: the unchecked query trusts a keyframe whose
    /// open-GOP anchor the checked query would reject.
    #[test]
    fn open_gop_unchecked_trusts_key_frame_flag() {
        let mut t = TrackTable::new(TrackKind::Video, tb());
        // decode order == presentation order here (pts already monotonic):
        // record 0 is a true closed-GOP anchor; record 1 is a non-key frame
        // with a lower pts than record 2's open-GOP "keyframe", so record 2
        // fails the anchor check.
        for (pts, key) in [(0i64, true), (50, false), (200, true)] {
            let mut r = new_video_record();
            r.pts = Some(pts);
            r.key_frame = key;
            t.push_video_record(r);
        }
        t.finalize(false).unwrap();
        assert_eq!(t.closest_key_frame_before(2), Some(0));
        assert_eq!(t.closest_key_frame_before_unchecked(2), Some(2));
    }

    #[test]
    fn visible_frame_bijection() {
        // Spec P4: real_frame_number restricted to [0, visible_frame_count)
        // is strictly increasing, and its image is exactly the non-hidden
        // records. Reuses the PAFF fixture from `paff_pair_hidden`, which
        // has exactly one hidden record among three.
        let mut t = TrackTable::new(TrackKind::Video, tb());
        let mut r0 = new_video_record();
        r0.pts = Some(1000);
        r0.key_frame = true;
        r0.file_pos = Some(4096);
        t.push_video_record(r0);
        let mut r1 = new_video_record();
        r1.pts = Some(1000);
        r1.file_pos = None;
        t.push_video_record(r1);
        let mut r2 = new_video_record();
        r2.pts = Some(2000);
        r2.file_pos = Some(8192);
        t.push_video_record(r2);
        t.finalize(false).unwrap();

        assert_eq!(t.visible_frame_count(), 2);
        let mut last = None;
        for n in 0..t.visible_frame_count() {
            let r = t.real_frame_number(n).unwrap();
            assert!(!t.record(r).unwrap().hidden);
            if let Some(prev) = last {
                assert!(prev < r);
            }
            last = Some(r);
        }
    }

    #[test]
    fn write_timecodes_converts_to_milliseconds() {
        let mut t = TrackTable::new(TrackKind::Video, Timebase { num: 1, den: 90_000 });
        for pts in [0, 9000, 18000] {
            let mut r = new_video_record();
            r.pts = Some(pts);
            r.key_frame = true;
            t.push_video_record(r);
        }
        t.finalize(false).unwrap();
        let mut out = Vec::new();
        t.write_timecodes(&mut out).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert_eq!(text, "# timecode format v2\n0\n100\n200\n");
    }
}
