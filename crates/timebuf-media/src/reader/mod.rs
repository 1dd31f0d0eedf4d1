// crates/timebuf-media/src/reader/mod.rs
//
// Reader: per-file frame-accurate decoder with a floor-on-grid cache and a
// background prefetch worker. This is the Rust generalization of
// `emp::Reader`/`ReaderImpl` (original_source/emp_reader.cpp) — the same
// cache/prefetch/mode-transition logic, built on the DecoderFactory
// abstraction instead of raw FFmpeg calls so it can run against a mock
// backend in tests.

pub mod cache;
pub mod mode;
pub mod prefetch;

use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tracing::debug;

use timebuf_core::{AudioFormat, Frame, FrameTime, MediaError, MediaFileInfo, MediaResult, PcmChunk};

use crate::decoder::{DecoderFactory, RawFrame, VideoDecoderHandle};
use cache::FrameCache;
use mode::{get_decode_mode, DecodeMode};
use prefetch::Prefetch;

/// ~5s of cache at 24fps; larger than a single GOP so reverse scrub and
/// sequential play both stay mostly cache-hot (spec §5 resource caps).
pub const DEFAULT_MAX_CACHE_FRAMES: usize = 120;

/// B-frame reorder drain depth for Scrub/Park (spec §4.2.D).
pub const B_LOOKAHEAD_SCRUB: i64 = 10;
/// Completion threshold for a Play batch (spec §4.2.E).
pub const B_LOOKAHEAD_PLAY: i64 = 8;

const STALE_THRESHOLD_US: i64 = 1_000_000;
const NEED_SEEK_GAP_US: i64 = 2_000_000;
const DEFAULT_FLOOR_GAP_US: i64 = 84_000;
const PREFETCH_POLL_ATTEMPTS: u32 = 10;
const PREFETCH_POLL_INTERVAL: Duration = Duration::from_millis(5);

pub struct Reader {
    factory: Arc<dyn DecoderFactory>,
    path: PathBuf,
    info: MediaFileInfo,
    video: Option<Box<dyn VideoDecoderHandle>>,
    audio: Option<Box<dyn crate::decoder::AudioDecoderHandle>>,
    cache: Arc<Mutex<FrameCache>>,
    last_decode_pts: i64,
    have_decode_pos: bool,
    last_mode: DecodeMode,
    max_floor_gap_us: i64,
    current_audio_out_rate: u32,
    prefetch: Prefetch,
}

impl Reader {
    pub fn open(factory: Arc<dyn DecoderFactory>, path: impl Into<PathBuf>) -> MediaResult<Self> {
        let path = path.into();
        let opened = factory.open(&path)?;
        if !opened.info.has_video && !opened.info.has_audio {
            return Err(MediaError::unsupported("media file has no video or audio stream"));
        }
        Ok(Self {
            factory,
            path,
            info: opened.info,
            video: opened.video,
            audio: opened.audio,
            cache: Arc::new(Mutex::new(FrameCache::new(DEFAULT_MAX_CACHE_FRAMES))),
            last_decode_pts: i64::MIN,
            have_decode_pos: false,
            last_mode: DecodeMode::Park,
            max_floor_gap_us: DEFAULT_FLOOR_GAP_US,
            current_audio_out_rate: 0,
            prefetch: Prefetch::new(),
        })
    }

    pub fn info(&self) -> &MediaFileInfo {
        &self.info
    }

    pub fn seek(&mut self, t: FrameTime) -> MediaResult<()> {
        self.seek_us(t.to_us())
    }

    pub fn seek_us(&mut self, t_us: i64) -> MediaResult<()> {
        let dec = self
            .video
            .as_mut()
            .ok_or_else(|| MediaError::unsupported("Seek requires a video stream"))?;
        dec.seek(t_us)
        // Decoder state (not the BGRA cache) is what a seek invalidates; the
        // cache is left alone exactly as emp::Reader::SeekUS does, so handles
        // already returned to callers stay valid.
    }

    pub fn decode_at(&mut self, t: FrameTime) -> MediaResult<Arc<Frame>> {
        self.decode_at_us(t.to_us())
    }

    pub fn decode_at_us(&mut self, t_us: i64) -> MediaResult<Arc<Frame>> {
        if self.video.is_none() {
            return Err(MediaError::unsupported("DecodeAt requires a video stream"));
        }

        // C1: sync the prefetch target before anything else touches the cache.
        self.prefetch.update_target(t_us);

        // C2: large seek / pooled-reader reactivation invalidates the cache.
        {
            let mut c = self.cache.lock().unwrap();
            if !c.is_empty() {
                let outside = t_us > c.max_pts() + STALE_THRESHOLD_US || t_us < c.min_pts() - STALE_THRESHOLD_US;
                if outside {
                    debug!(target: "reader", path = %self.path.display(), t_us, cache_min = c.min_pts(), cache_max = c.max_pts(), "stale cache: target outside range, clearing");
                    c.clear();
                    self.have_decode_pos = false;
                }
            }
        }

        // C3: Park/Scrub -> Play clears the scattered-frame cache.
        let mode = get_decode_mode();
        if mode == DecodeMode::Play && self.last_mode != DecodeMode::Play {
            let mut c = self.cache.lock().unwrap();
            if !c.is_empty() {
                debug!(target: "reader", path = %self.path.display(), from = ?self.last_mode, "park/scrub -> play transition, clearing scattered cache");
                c.clear();
                self.have_decode_pos = false;
            }
        }
        self.last_mode = mode;

        let frame_dur_us = self.frame_duration_us();
        self.max_floor_gap_us = frame_dur_us.saturating_mul(2);

        // A. cache lookup: any cached frame at or before t_us within the
        // floor-gap tolerance is a hit, regardless of where it sits relative
        // to the cache's current high-water mark.
        {
            let c = self.cache.lock().unwrap();
            if !c.is_empty() {
                if let Some((pts, frame)) = c.floor(t_us) {
                    if t_us - pts <= self.max_floor_gap_us {
                        return Ok(frame);
                    }
                }
            }
        }

        // B. prefetch handoff: give the worker a short window to catch up.
        if self.prefetch.direction() != 0 {
            for _ in 0..PREFETCH_POLL_ATTEMPTS {
                std::thread::sleep(PREFETCH_POLL_INTERVAL);
                if let Some(frame) = self.get_cached_frame(t_us) {
                    return Ok(frame);
                }
            }
        }

        match mode {
            DecodeMode::Scrub | DecodeMode::Park => self.decode_scrub_or_park(t_us),
            DecodeMode::Play => self.decode_play(t_us),
        }
    }

    /// Non-blocking cache lookup for the display path; falls back to
    /// `decode_at_us` on a miss (spec §4.2 `GetCachedFrame`).
    pub fn get_cached_frame(&self, t_us: i64) -> Option<Arc<Frame>> {
        let c = self.cache.lock().unwrap();
        if c.is_empty() || t_us > c.max_pts() {
            return None;
        }
        let (pts, frame) = c.floor(t_us)?;
        if t_us - pts <= self.max_floor_gap_us {
            Some(frame)
        } else {
            None
        }
    }

    pub fn set_max_cache_frames(&mut self, max_frames: usize) {
        let mut c = self.cache.lock().unwrap();
        let keep_around = self.prefetch.target_us();
        c.evict_around(keep_around, max_frames);
    }

    pub fn start_prefetch(&mut self, direction: i32) {
        self.prefetch
            .start(direction, Arc::clone(&self.factory), self.path.clone(), Arc::clone(&self.cache));
    }

    pub fn stop_prefetch(&mut self) {
        self.prefetch.stop_direction();
    }

    pub fn update_prefetch_target(&mut self, t_us: i64) {
        self.prefetch.update_target(t_us);
    }

    pub fn prefetch_frames_decoded(&self) -> i64 {
        self.prefetch.decoded_count()
    }

    fn frame_duration_us(&self) -> i64 {
        let num = self.info.nominal_rate.num as i64;
        let den = self.info.nominal_rate.den as i64;
        if num <= 0 {
            return 42_000;
        }
        // Ceiling division: a floor gap of exactly one frame duration must
        // never reject a legitimately-adjacent frame to rounding.
        (1_000_000 * den + num - 1) / num
    }

    fn decode_scrub_or_park(&mut self, t_us: i64) -> MediaResult<Arc<Frame>> {
        let dec = self.video.as_mut().unwrap();
        dec.seek(t_us)?;
        let (floor_pts, best_raw) = decode_until_target(dec.as_mut(), t_us)?;
        let frame = Arc::new(dec.convert_to_bgra(&best_raw)?);

        // B-frame lookahead leaves the decoder's true position indeterminate.
        self.have_decode_pos = false;

        let mut c = self.cache.lock().unwrap();
        c.insert(floor_pts, frame.clone());
        let max_frames = c.max_frames();
        c.evict_around(t_us, max_frames);
        Ok(frame)
    }

    fn decode_play(&mut self, t_us: i64) -> MediaResult<Arc<Frame>> {
        if need_seek(self.last_decode_pts, t_us, self.have_decode_pos) {
            debug!(target: "reader", path = %self.path.display(), last = self.last_decode_pts, t_us, "play: seeking before batch decode");
            self.video.as_mut().unwrap().seek(t_us)?;
        }

        let batch = decode_frames_batch(self.video.as_mut().unwrap(), t_us)?;

        if let Some(batch_max) = batch.iter().map(|(pts, _)| *pts).max() {
            self.last_decode_pts = batch_max;
            self.have_decode_pos = true;
        }

        let mut c = self.cache.lock().unwrap();
        for (pts, raw) in &batch {
            if !c.contains(*pts) {
                let frame = self.video.as_mut().unwrap().convert_to_bgra(raw)?;
                c.insert(*pts, Arc::new(frame));
            }
        }
        let max_frames = c.max_frames();
        c.evict_around(t_us, max_frames);

        if let Some((_, frame)) = c.floor(t_us) {
            return Ok(frame);
        }
        if let Some((_, frame)) = c.first() {
            return Ok(frame);
        }
        Err(MediaError::internal("decode_play: no frames decoded"))
    }

    pub fn decode_audio_range(&mut self, t0: FrameTime, t1: FrameTime, fmt: AudioFormat) -> MediaResult<PcmChunk> {
        self.decode_audio_range_us(t0.to_us(), t1.to_us(), fmt)
    }

    pub fn decode_audio_range_us(&mut self, t0_us: i64, t1_us: i64, fmt: AudioFormat) -> MediaResult<PcmChunk> {
        if t1_us <= t0_us {
            return Err(MediaError::invalid_arg("decode_audio_range: t1 must be > t0"));
        }
        let audio = self
            .audio
            .as_mut()
            .ok_or_else(|| MediaError::unsupported("media file has no audio stream"))?;

        if audio.seek(t0_us).is_err() {
            audio.seek(0)?;
        }
        audio.reset_resampler(fmt.sample_rate)?;
        self.current_audio_out_rate = fmt.sample_rate;

        let mut samples: Vec<f32> = Vec::new();
        let mut first_pts: Option<i64> = None;

        loop {
            let raw = match audio.next_raw()? {
                Some(r) => r,
                None => break,
            };
            let frame_end_us = raw.pts_us + raw.duration_us;
            if frame_end_us <= t0_us {
                continue;
            }
            if raw.pts_us >= t1_us {
                break;
            }
            if first_pts.is_none() {
                first_pts = Some(raw.pts_us);
            }
            let resampled = audio.resample(&raw)?;
            samples.extend_from_slice(&resampled);

            if let Some(start) = first_pts {
                let decoded_duration_us = (samples.len() as i64 / 2) * 1_000_000 / fmt.sample_rate.max(1) as i64;
                if start + decoded_duration_us >= t1_us {
                    break;
                }
            }
        }

        let tail = audio.flush_resampler()?;
        samples.extend_from_slice(&tail);

        let start_time_us = first_pts.unwrap_or(t0_us);
        PcmChunk::new(fmt.sample_rate, start_time_us, Arc::from(samples))
    }
}

/// `need_seek(current, target, have_current)` (spec §4.2.I): a seek beats
/// sequential decode when we have no position, the target is behind us, or
/// it is far enough ahead that burning through intermediate frames would be
/// slower than a seek-and-redecode.
fn need_seek(current: i64, target: i64, have_current: bool) -> bool {
    !have_current || target < current || target - current > NEED_SEEK_GAP_US
}

/// Drain the decoder's B-frame reorder buffer until the floor-on-grid
/// candidate is confirmed (spec §4.2.D). The "frames past target" counter
/// only ever increments — a late B-frame with `pts <= target` updates
/// `best` but never resets it back toward zero.
fn decode_until_target(dec: &mut dyn VideoDecoderHandle, target_us: i64) -> MediaResult<(i64, RawFrame)> {
    let mut best: Option<RawFrame> = None;
    let mut best_pts: i64 = i64::MIN;
    let mut past_target: i64 = 0;

    loop {
        let raw = match dec.next_raw()? {
            Some(r) => r,
            None => break,
        };
        if raw.pts_us <= target_us {
            // Decode order is not presentation order: only replace `best`
            // when this frame is actually later, so a GOP with B-frames
            // (e.g. decode order I(0) P(4) B(1) B(2) B(3)) still floors
            // onto the largest pts <= target instead of the last one seen.
            if raw.pts_us > best_pts {
                best_pts = raw.pts_us;
                best = Some(raw);
            }
            continue;
        }
        past_target += 1;
        if best.is_some() {
            if past_target >= B_LOOKAHEAD_SCRUB {
                break;
            }
        } else if past_target >= 2 * B_LOOKAHEAD_SCRUB {
            return Err(MediaError::internal(
                "decode_until_target: no frame at or before target within the lookahead window",
            ));
        }
    }

    match best {
        Some(raw) => {
            let pts = raw.pts_us;
            Ok((pts, raw))
        }
        None => Err(MediaError::eof()),
    }
}

/// Collect a Play batch (spec §4.2.E): keep decoding until `B_LOOKAHEAD_PLAY`
/// frames with `pts_us >= target_us` have been seen. Frames that arrive
/// late with `pts_us < target_us` are kept (they still need BGRA conversion
/// and caching) but must never cause `completed` to go backwards.
fn decode_frames_batch(dec: &mut dyn VideoDecoderHandle, target_us: i64) -> MediaResult<Vec<(i64, RawFrame)>> {
    let mut collected = Vec::new();
    let mut completed: i64 = 0;

    loop {
        match dec.next_raw()? {
            Some(raw) => {
                let pts = raw.pts_us;
                if pts >= target_us {
                    completed += 1;
                }
                collected.push((pts, raw));
                if completed >= B_LOOKAHEAD_PLAY {
                    break;
                }
            }
            None => break,
        }
    }

    if collected.is_empty() {
        return Err(MediaError::eof());
    }
    Ok(collected)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decoder::mock::MockBackend;
    use mode::set_decode_mode;

    fn reader(frame_count: i64, frame_dur_us: i64) -> Reader {
        let factory: Arc<dyn DecoderFactory> = Arc::new(MockBackend::new(frame_count, frame_dur_us));
        Reader::open(factory, "mock.mov").unwrap()
    }

    /// Emits a fixed, caller-supplied sequence of pts values in decode order
    /// regardless of target, so a test can reproduce a GOP with B-frames
    /// (decode order I(0) P(4) B(1) B(2) B(3)) without a real demuxer.
    struct ReorderingDecoder {
        pts_sequence: Vec<i64>,
        next: usize,
    }

    impl VideoDecoderHandle for ReorderingDecoder {
        fn seek(&mut self, _target_us: i64) -> MediaResult<()> {
            self.next = 0;
            Ok(())
        }

        fn next_raw(&mut self) -> MediaResult<Option<RawFrame>> {
            if self.next >= self.pts_sequence.len() {
                return Ok(None);
            }
            let pts_us = self.pts_sequence[self.next];
            self.next += 1;
            Ok(Some(RawFrame::new(pts_us, Box::new(()))))
        }

        fn convert_to_bgra(&mut self, raw: &RawFrame) -> MediaResult<Frame> {
            let data: Arc<[u8]> = Arc::from(vec![0u8; 32 * 2]);
            Frame::from_cpu(2, 2, 32, raw.pts_us, data)
        }
    }

    #[test]
    fn decode_until_target_floors_onto_the_largest_pts_not_the_last_decoded() {
        // Decode order I(0) P(4) B(1) B(2) B(3) then enough lookahead past
        // the target to confirm: the true floor-on-grid pts for target=4 is
        // 4 (the P-frame), even though B(1..3) are *decoded* after it.
        let mut dec = ReorderingDecoder {
            pts_sequence: vec![0, 4, 1, 2, 3, 8, 12, 16, 20, 24, 28, 32, 36, 40],
            next: 0,
        };
        let (pts, _) = decode_until_target(&mut dec, 4).unwrap();
        assert_eq!(pts, 4);
    }

    #[test]
    fn park_decode_floors_onto_the_frame_grid() {
        set_decode_mode(DecodeMode::Park);
        let mut r = reader(50, 40_000);
        let frame = r.decode_at_us(105_000).unwrap();
        assert_eq!(frame.source_pts_us(), 80_000);
    }

    #[test]
    fn play_decode_advances_and_caches_a_batch() {
        set_decode_mode(DecodeMode::Play);
        let mut r = reader(50, 40_000);
        let frame = r.decode_at_us(0).unwrap();
        assert_eq!(frame.source_pts_us(), 0);
        let frame2 = r.decode_at_us(40_000).unwrap();
        assert_eq!(frame2.source_pts_us(), 40_000);
    }

    #[test]
    fn cache_hit_avoids_redecoding_within_the_floor_gap() {
        set_decode_mode(DecodeMode::Park);
        let mut r = reader(50, 40_000);
        let first = r.decode_at_us(80_000).unwrap();
        let second = r.decode_at_us(90_000).unwrap();
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn park_to_play_transition_clears_stale_scattered_cache() {
        set_decode_mode(DecodeMode::Park);
        let mut r = reader(50, 40_000);
        r.decode_at_us(1_000_000).unwrap();
        assert!(r.cache.lock().unwrap().contains(1_000_000));

        set_decode_mode(DecodeMode::Play);
        r.decode_at_us(0).unwrap();
        // the scattered scrub-mode frame must not survive the transition.
        assert!(!r.cache.lock().unwrap().contains(1_000_000));
    }

    #[test]
    fn scrubbing_past_the_last_frame_returns_the_final_frame() {
        set_decode_mode(DecodeMode::Scrub);
        let mut r = reader(10, 40_000);
        let frame = r.decode_at_us(10_000_000).unwrap();
        assert_eq!(frame.source_pts_us(), 360_000);
    }

    #[test]
    fn audio_range_decode_yields_nonempty_pcm() {
        let mut r = reader(50, 40_000);
        let fmt = AudioFormat::new(48_000);
        let chunk = r.decode_audio_range_us(0, 200_000, fmt).unwrap();
        assert!(chunk.frames > 0);
        assert_eq!(chunk.sample_rate, 48_000);
    }

    #[test]
    fn need_seek_triggers_on_backward_target_and_large_forward_gap() {
        assert!(need_seek(0, 0, false));
        assert!(need_seek(1_000, 500, true));
        assert!(need_seek(0, 3_000_000, true));
        assert!(!need_seek(0, 1_000_000, true));
    }

    #[test]
    fn prefetch_start_and_stop_toggle_direction() {
        set_decode_mode(DecodeMode::Play);
        let mut r = reader(200, 40_000);
        r.start_prefetch(1);
        assert_eq!(r.prefetch.direction(), 1);
        r.stop_prefetch();
        assert_eq!(r.prefetch.direction(), 0);
    }
}
