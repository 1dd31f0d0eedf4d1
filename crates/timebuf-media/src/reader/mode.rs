// crates/timebuf-media/src/reader/mode.rs
//
// DecodeMode is process-global: the transport (playback controller, ruler
// drag) sets it and every Reader observes it on each `decode_at` call,
// mirroring `emp::SetDecodeMode`/`GetDecodeMode`'s single atomic.

use std::sync::atomic::{AtomicU8, Ordering};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DecodeMode {
    /// Decode all frames in order, convert all to BGRA, cache contiguously,
    /// run prefetch actively.
    Play,
    /// Decode from keyframe through reordered B-frames, BGRA-convert only
    /// the floor frame for return; cache only it.
    Scrub,
    /// Same shape as Scrub; no expectation of further requests.
    Park,
}

impl DecodeMode {
    fn to_tag(self) -> u8 {
        match self {
            DecodeMode::Play => 0,
            DecodeMode::Scrub => 1,
            DecodeMode::Park => 2,
        }
    }

    fn from_tag(tag: u8) -> Self {
        match tag {
            0 => DecodeMode::Play,
            1 => DecodeMode::Scrub,
            _ => DecodeMode::Park,
        }
    }
}

static DECODE_MODE: AtomicU8 = AtomicU8::new(2); // Park, matching emp's initial last_mode

pub fn set_decode_mode(mode: DecodeMode) {
    DECODE_MODE.store(mode.to_tag(), Ordering::Release);
}

pub fn get_decode_mode() -> DecodeMode {
    DecodeMode::from_tag(DECODE_MODE.load(Ordering::Acquire))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_the_global_atomic() {
        set_decode_mode(DecodeMode::Scrub);
        assert_eq!(get_decode_mode(), DecodeMode::Scrub);
        set_decode_mode(DecodeMode::Play);
        assert_eq!(get_decode_mode(), DecodeMode::Play);
    }
}
