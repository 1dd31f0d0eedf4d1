// crates/timebuf-core/src/clip.rs
//
// Shared data shapes for the timeline side of the stack: a clip's placement
// on a track and the result handed back from a video frame query. Pure data
// — the track map, reader pool, and lookup logic that operate on these
// types live in timebuf_media::tmb.

use std::path::PathBuf;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::media_types::Frame;
use crate::media_types::Rotation;
use crate::rate::Rate;

/// One clip's placement on a track (original §3 "TMB state" / §4.3).
///
/// All positions are in frames at their respective rate except `rate`
/// itself: `timeline_start`/`duration` are sequence frames, `source_in` is a
/// frame at `rate` (the clip's own grid rate), and `speed_ratio` is
/// `sequence_fps / clip_fps` used to conform audio (original §4.3, §9
/// "Speed ratio").
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ClipInfo {
    pub clip_id: String,
    pub media_path: PathBuf,
    pub timeline_start: i64,
    pub duration: i64,
    pub source_in: i64,
    pub rate: Rate,
    pub speed_ratio: f64,
}

impl ClipInfo {
    /// Half-open `[timeline_start, timeline_start+duration)`; a
    /// `duration <= 0` clip never contains anything (original §3 invariant 6).
    pub fn contains_frame(&self, f: i64) -> bool {
        self.duration > 0 && f >= self.timeline_start && f < self.timeline_start + self.duration
    }

    pub fn timeline_end(&self) -> i64 {
        self.timeline_start + self.duration
    }
}

/// Result of `TimelineMediaBuffer::get_video_frame` (original §6).
#[derive(Clone)]
pub struct VideoResult {
    pub frame: Option<Arc<Frame>>,
    pub clip_id: String,
    pub rotation: Rotation,
    pub source_frame: i64,
    pub clip_fps: Rate,
    pub clip_start_frame: i64,
    pub clip_end_frame: i64,
    pub offline: bool,
}

impl VideoResult {
    /// The "no clip here" / "gap" result (original §8 scenarios 1-2):
    /// empty timeline, or a request landing between clips.
    pub fn gap() -> Self {
        Self {
            frame: None,
            clip_id: String::new(),
            rotation: Rotation::None,
            source_frame: 0,
            clip_fps: Rate::new(1, 1).unwrap(),
            clip_start_frame: 0,
            clip_end_frame: 0,
            offline: false,
        }
    }
}

impl Default for VideoResult {
    fn default() -> Self {
        Self::gap()
    }
}
