// crates/timebuf-media/src/reader/cache.rs
//
// The per-Reader frame cache (spec §4.2.A/G). Keyed by source PTS in
// microseconds so it naturally absorbs decoder output that arrives out of
// presentation order — the B-frame reorder buffer problem the Scrub/Play
// decode paths both have to drain around.

use std::collections::BTreeMap;
use std::sync::Arc;

use timebuf_core::Frame;

pub struct FrameCache {
    frames: BTreeMap<i64, Arc<Frame>>,
    min_pts: i64,
    max_pts: i64,
    max_frames: usize,
}

impl FrameCache {
    pub fn new(max_frames: usize) -> Self {
        Self { frames: BTreeMap::new(), min_pts: i64::MAX, max_pts: i64::MIN, max_frames }
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn min_pts(&self) -> i64 {
        self.min_pts
    }

    pub fn max_pts(&self) -> i64 {
        self.max_pts
    }

    pub fn max_frames(&self) -> usize {
        self.max_frames
    }

    pub fn clear(&mut self) {
        self.frames.clear();
        self.min_pts = i64::MAX;
        self.max_pts = i64::MIN;
    }

    /// The largest-PTS frame with `pts <= t`, spec §4.2.A's `floor_by_pts`.
    pub fn floor(&self, t: i64) -> Option<(i64, Arc<Frame>)> {
        self.frames.range(..=t).next_back().map(|(&pts, f)| (pts, f.clone()))
    }

    pub fn contains(&self, pts: i64) -> bool {
        self.frames.contains_key(&pts)
    }

    /// The lowest-PTS cached frame, used as the Play-path fallback when
    /// `t` falls before everything currently cached.
    pub fn first(&self) -> Option<(i64, Arc<Frame>)> {
        self.frames.iter().next().map(|(&pts, f)| (pts, f.clone()))
    }

    /// Insert a frame and update bounds. Does not evict — call
    /// `evict_around` separately once all frames from a batch are in.
    pub fn insert(&mut self, pts: i64, frame: Arc<Frame>) {
        self.frames.insert(pts, frame);
        if pts < self.min_pts {
            self.min_pts = pts;
        }
        if pts > self.max_pts {
            self.max_pts = pts;
        }
    }

    /// Distance-from-`keep_around` eviction (spec §4.2.G): while over the
    /// limit, drop whichever of the lowest- or highest-keyed entry is
    /// farther from `keep_around`, ties going to the lowest.
    pub fn evict_around(&mut self, keep_around: i64, max_frames: usize) {
        self.max_frames = max_frames;
        while self.frames.len() > max_frames {
            let &first = self.frames.keys().next().unwrap();
            let &last = self.frames.keys().next_back().unwrap();
            let dist_first = (keep_around - first).abs();
            let dist_last = (keep_around - last).abs();
            if dist_first >= dist_last {
                self.frames.remove(&first);
            } else {
                self.frames.remove(&last);
            }
        }
        if self.frames.is_empty() {
            self.min_pts = i64::MAX;
            self.max_pts = i64::MIN;
        } else {
            self.min_pts = *self.frames.keys().next().unwrap();
            self.max_pts = *self.frames.keys().next_back().unwrap();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc as StdArc;

    fn dummy(pts: i64) -> Arc<Frame> {
        StdArc::new(Frame::from_cpu(2, 2, 32, pts, StdArc::from(vec![0u8; 64])).unwrap())
    }

    #[test]
    fn floor_returns_largest_pts_leq_target() {
        let mut c = FrameCache::new(10);
        c.insert(1000, dummy(1000));
        c.insert(2000, dummy(2000));
        c.insert(3000, dummy(3000));
        let (pts, _) = c.floor(2500).unwrap();
        assert_eq!(pts, 2000);
    }

    #[test]
    fn floor_before_first_frame_is_none() {
        let mut c = FrameCache::new(10);
        c.insert(1000, dummy(1000));
        assert!(c.floor(500).is_none());
    }

    #[test]
    fn eviction_drops_entry_farthest_from_keep_around() {
        let mut c = FrameCache::new(10);
        for pts in [0, 1000, 2000, 3000, 4000] {
            c.insert(pts, dummy(pts));
        }
        c.evict_around(4000, 3);
        assert_eq!(c.len(), 3);
        assert!(!c.contains(0));
        assert!(!c.contains(1000));
        assert_eq!(c.min_pts(), 2000);
        assert_eq!(c.max_pts(), 4000);
    }

    #[test]
    fn eviction_tie_drops_lowest() {
        let mut c = FrameCache::new(10);
        c.insert(0, dummy(0));
        c.insert(2000, dummy(2000));
        // keep_around=1000: both entries are 1000us away, tie drops lowest.
        c.evict_around(1000, 1);
        assert!(c.contains(2000));
        assert!(!c.contains(0));
    }

    #[test]
    fn clear_resets_bounds() {
        let mut c = FrameCache::new(10);
        c.insert(1000, dummy(1000));
        c.clear();
        assert!(c.is_empty());
        assert_eq!(c.min_pts(), i64::MAX);
        assert_eq!(c.max_pts(), i64::MIN);
    }
}
