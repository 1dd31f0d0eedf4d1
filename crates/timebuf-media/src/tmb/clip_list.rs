// crates/timebuf-media/src/tmb/clip_list.rs
//
// A track's ordered, non-overlapping clip layout (spec §3 invariant 5,
// §4.3 "Clip lookup"). Kept as a flat sorted `Vec` rather than a BTreeMap
// keyed by `timeline_start` because lookup also needs the clip whose range
// *contains* a point, not just an exact-key match — `partition_point` on a
// sorted `Vec` gives that in O(log n) without a custom interval tree.

use timebuf_core::ClipInfo;

#[derive(Default)]
pub struct ClipList(Vec<ClipInfo>);

impl ClipList {
    pub fn set(&mut self, mut clips: Vec<ClipInfo>) {
        clips.sort_by_key(|c| c.timeline_start);
        self.0 = clips;
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// The clip whose half-open `[timeline_start, timeline_start+duration)`
    /// contains `f`, if any (spec §3 invariants 5-6).
    pub fn find_by_frame(&self, f: i64) -> Option<&ClipInfo> {
        // First clip with `timeline_start > f`; the candidate, if any, is
        // the one immediately before it.
        let idx = self.0.partition_point(|c| c.timeline_start <= f);
        if idx == 0 {
            return None;
        }
        let candidate = &self.0[idx - 1];
        candidate.contains_frame(f).then_some(candidate)
    }

    /// The clip with the smallest `timeline_start >= from`, used to decide
    /// what to prebuffer ahead of the playhead moving forward.
    pub fn next_clip_from(&self, from: i64) -> Option<&ClipInfo> {
        let idx = self.0.partition_point(|c| c.timeline_start < from);
        self.0.get(idx)
    }

    /// The clip with the largest `timeline_start+duration <= from`, the
    /// reverse-direction counterpart used when the playhead moves backward.
    pub fn prev_clip_before(&self, from: i64) -> Option<&ClipInfo> {
        self.0.iter().rev().find(|c| c.timeline_end() <= from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use timebuf_core::Rate;

    fn clip(id: &str, start: i64, dur: i64) -> ClipInfo {
        ClipInfo {
            clip_id: id.into(),
            media_path: PathBuf::from("p.mp4"),
            timeline_start: start,
            duration: dur,
            source_in: 0,
            rate: Rate::new(24, 1).unwrap(),
            speed_ratio: 1.0,
        }
    }

    #[test]
    fn empty_track_has_no_clip() {
        let list = ClipList::default();
        assert!(list.find_by_frame(100).is_none());
    }

    #[test]
    fn gap_between_clips_is_a_miss() {
        let mut list = ClipList::default();
        list.set(vec![clip("A", 0, 10), clip("B", 20, 10)]);
        assert!(list.find_by_frame(15).is_none());
    }

    #[test]
    fn clip_switch_at_the_exact_boundary() {
        let mut list = ClipList::default();
        list.set(vec![clip("A", 0, 50), clip("B", 50, 50)]);
        assert_eq!(list.find_by_frame(49).unwrap().clip_id, "A");
        assert_eq!(list.find_by_frame(50).unwrap().clip_id, "B");
    }

    #[test]
    fn next_clip_from_skips_the_current_one() {
        let mut list = ClipList::default();
        list.set(vec![clip("A", 0, 50), clip("B", 50, 50)]);
        assert_eq!(list.next_clip_from(10).unwrap().clip_id, "A");
        assert_eq!(list.next_clip_from(51).unwrap().clip_id, "B");
        assert!(list.next_clip_from(200).is_none());
    }

    #[test]
    fn prev_clip_before_is_the_reverse_counterpart() {
        let mut list = ClipList::default();
        list.set(vec![clip("A", 0, 50), clip("B", 50, 50)]);
        assert_eq!(list.prev_clip_before(100).unwrap().clip_id, "B");
        assert_eq!(list.prev_clip_before(50).unwrap().clip_id, "A");
        assert!(list.prev_clip_before(0).is_none());
    }
}
