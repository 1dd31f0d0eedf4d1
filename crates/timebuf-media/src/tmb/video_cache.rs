// crates/timebuf-media/src/tmb/video_cache.rs
//
// Small bounded per-track cache keyed by timeline frame (spec §4.3
// "Per-track video cache"). It only short-circuits a repeat query for the
// same (track, frame) — the Reader's own cache does the real floor-on-grid
// work, so this one can afford to be tiny (default 8) and FIFO.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use timebuf_core::{Frame, Rotation};

#[derive(Clone)]
pub struct VideoCacheEntry {
    pub clip_id: String,
    pub source_frame: i64,
    pub rotation: Rotation,
    pub frame: Arc<Frame>,
}

pub struct VideoCache {
    order: VecDeque<i64>,
    entries: HashMap<i64, VideoCacheEntry>,
    cap: usize,
}

impl VideoCache {
    pub fn new(cap: usize) -> Self {
        Self { order: VecDeque::new(), entries: HashMap::new(), cap: cap.max(1) }
    }

    pub fn get(&self, timeline_frame: i64) -> Option<&VideoCacheEntry> {
        self.entries.get(&timeline_frame)
    }

    pub fn insert(&mut self, timeline_frame: i64, entry: VideoCacheEntry) {
        if !self.entries.contains_key(&timeline_frame) {
            self.order.push_back(timeline_frame);
        }
        self.entries.insert(timeline_frame, entry);
        while self.entries.len() > self.cap {
            if let Some(oldest) = self.order.pop_front() {
                self.entries.remove(&oldest);
            } else {
                break;
            }
        }
    }

    pub fn clear(&mut self) {
        self.order.clear();
        self.entries.clear();
    }
}
