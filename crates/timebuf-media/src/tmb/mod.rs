// crates/timebuf-media/src/tmb/mod.rs
//
// TimelineMediaBuffer: per-track clip layout plus a shared Reader pool,
// servicing timeline-coordinate video and audio requests across clip
// boundaries (spec §4.3). Generalizes `velocut-media::worker.rs`'s
// single-clip scrub/decode thread into a multi-track, multi-clip buffer
// sitting in front of the same per-file Reader this crate already builds.

mod audio_conform;
mod clip_list;
mod pool;
mod prebuffer;
mod video_cache;

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicI32, AtomicI64, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

use crossbeam_channel::Sender;
use tracing::{debug, warn};

use timebuf_core::{
    AudioFormat, ClipInfo, FrameTime, MediaError, MediaFileInfo, MediaResult, PcmChunk, Rate, Rotation, VideoResult,
};

use crate::decoder::DecoderFactory;
use crate::reader::Reader;
use clip_list::ClipList;
use pool::{canonical_key_path, ReaderPool};
use prebuffer::PrebufferJob;
use video_cache::{VideoCache, VideoCacheEntry};

/// Open file handles + decoder contexts capped across the whole instance
/// (spec §5 "Resource caps").
pub const DEFAULT_MAX_READERS: usize = 16;
/// Per-track video cache capacity (spec §5).
pub const DEFAULT_VIDEO_CACHE_CAP: usize = 8;
/// Prebuffer job queue capacity (spec §3 "prebuffer_jobs: bounded work queue").
const PREBUFFER_QUEUE_CAP: usize = 64;
/// How close the playhead must be to a clip boundary before the TMB starts
/// warming the upcoming clip's Reader (2s at 24fps).
const PREBUFFER_LOOKAHEAD_FRAMES: i64 = 48;
/// Default prebuffer worker pool size (spec §6 `create(pool_threads=2)`).
pub const DEFAULT_POOL_THREADS: usize = 2;

struct TrackState {
    clips: ClipList,
    video_cache: VideoCache,
}

impl TrackState {
    fn new() -> Self {
        Self { clips: ClipList::default(), video_cache: VideoCache::new(DEFAULT_VIDEO_CACHE_CAP) }
    }
}

enum Acquire {
    Ready(Arc<Mutex<Reader>>, MediaFileInfo),
    Offline,
}

/// Everything the prebuffer workers and the public API both need; held
/// behind an `Arc` so workers can reach it without owning the
/// `TimelineMediaBuffer` itself (see `prebuffer::spawn_workers`, which only
/// takes a `Weak` reference).
pub(crate) struct Inner {
    factory: Arc<dyn DecoderFactory>,
    seq_rate: Mutex<Option<Rate>>,
    tracks: Mutex<HashMap<u64, TrackState>>,
    pool: Mutex<ReaderPool>,
    /// Paths that failed to open, persistent for the instance's lifetime
    /// (spec §7: "every subsequent query on that path returns offline=true
    /// ... without retrying").
    offline: Mutex<HashMap<PathBuf, MediaError>>,
    playhead_frame: AtomicI64,
    playhead_direction: AtomicI32,
    playhead_speed_bits: AtomicU64,
}

impl Inner {
    /// Pool hit or a fresh open; `FileNotFound`/any other open failure is
    /// folded into the persistent offline set rather than returned, since
    /// every caller of `acquire_reader` treats "can't open" the same way
    /// (spec §4.3 "Miss": "if open fails, insert into offline ... and
    /// return offline").
    fn acquire_reader(&self, track_id: u64, path: &Path) -> Acquire {
        let canon = canonical_key_path(path);
        if self.offline.lock().unwrap().contains_key(&canon) {
            return Acquire::Offline;
        }

        let key = (track_id, canon.clone());
        if let Some((reader, info)) = self.pool.lock().unwrap().touch(&key) {
            return Acquire::Ready(reader, info);
        }

        // Opened outside the pool lock: a slow open (remote volume, cold
        // cache) must not stall every other track's pool lookups.
        match Reader::open(self.factory.clone(), path) {
            Ok(reader) => {
                let info = reader.info().clone();
                let reader_arc = Arc::new(Mutex::new(reader));
                if let Some((evicted_track, evicted_path)) =
                    self.pool.lock().unwrap().insert(key, info.clone(), reader_arc.clone())
                {
                    debug!(target: "tmb", track_id = evicted_track, path = %evicted_path.display(), "reader pool over capacity, evicting LRU entry");
                }
                Acquire::Ready(reader_arc, info)
            }
            Err(e) => {
                warn!(target: "tmb", track_id, path = %path.display(), error = %e, "media path marked offline, will not retry");
                self.offline.lock().unwrap().insert(canon, e);
                Acquire::Offline
            }
        }
    }

    /// Warm the first few frames of a clip the playhead is about to enter
    /// (spec §4.3 "Playhead + prebuffer"). Droppable and idempotent: a
    /// decode failure here is silently swallowed, and every frame it
    /// decodes lands in the Reader's own cache, so a later real request for
    /// the same position is just a cache hit.
    fn run_prebuffer_job(&self, job: &PrebufferJob) {
        let Acquire::Ready(reader, _info) = self.acquire_reader(job.track_id, &job.clip.media_path) else {
            return;
        };
        let mut r = reader.lock().unwrap();
        for i in 0..prebuffer::PREBUFFER_FRAME_COUNT {
            let source_us = FrameTime::new(job.clip.source_in + i, job.clip.rate).to_us();
            if r.decode_at_us(source_us).is_err() {
                break;
            }
        }
    }
}

/// Per-track clip layout plus a shared Reader pool (spec §4.3 in full).
pub struct TimelineMediaBuffer {
    inner: Arc<Inner>,
    job_tx: Option<Sender<PrebufferJob>>,
    workers: Vec<JoinHandle<()>>,
}

impl TimelineMediaBuffer {
    pub fn create(factory: Arc<dyn DecoderFactory>, pool_threads: usize) -> Self {
        let inner = Arc::new(Inner {
            factory,
            seq_rate: Mutex::new(None),
            tracks: Mutex::new(HashMap::new()),
            pool: Mutex::new(ReaderPool::new(DEFAULT_MAX_READERS)),
            offline: Mutex::new(HashMap::new()),
            playhead_frame: AtomicI64::new(0),
            playhead_direction: AtomicI32::new(0),
            playhead_speed_bits: AtomicU64::new(1.0f64.to_bits()),
        });
        let (job_tx, job_rx) = crossbeam_channel::bounded(PREBUFFER_QUEUE_CAP);
        let workers = prebuffer::spawn_workers(&inner, job_rx, pool_threads);
        Self { inner, job_tx: Some(job_tx), workers }
    }

    pub fn set_sequence_rate(&self, rate: Rate) {
        *self.inner.seq_rate.lock().unwrap() = Some(rate);
    }

    pub fn set_track_clips(&self, track_id: u64, clips: Vec<ClipInfo>) {
        let mut tracks = self.inner.tracks.lock().unwrap();
        let track = tracks.entry(track_id).or_insert_with(TrackState::new);
        track.clips.set(clips);
        track.video_cache.clear();
    }

    pub fn set_playhead(&self, frame: i64, direction: i32, speed: f64) {
        self.inner.playhead_frame.store(frame, Ordering::Release);
        self.inner.playhead_direction.store(direction, Ordering::Release);
        self.inner.playhead_speed_bits.store(speed.to_bits(), Ordering::Release);
        self.maybe_trigger_prebuffer(frame, direction);
    }

    pub fn playhead(&self) -> (i64, i32, f64) {
        (
            self.inner.playhead_frame.load(Ordering::Acquire),
            self.inner.playhead_direction.load(Ordering::Acquire),
            f64::from_bits(self.inner.playhead_speed_bits.load(Ordering::Acquire)),
        )
    }

    /// Submits a prebuffer job per track whose upcoming clip boundary is
    /// within `PREBUFFER_LOOKAHEAD_FRAMES` of `frame`. Non-blocking: a full
    /// queue just drops the job, matching spec §5 "droppable".
    fn maybe_trigger_prebuffer(&self, frame: i64, direction: i32) {
        if direction == 0 {
            return;
        }
        let Some(tx) = &self.job_tx else { return };
        let tracks = self.inner.tracks.lock().unwrap();
        for (&track_id, track) in tracks.iter() {
            let current = track.clips.find_by_frame(frame);
            let (candidate, boundary) = if direction > 0 {
                let end = current.map(|c| c.timeline_end()).unwrap_or(frame);
                (track.clips.next_clip_from(end), end)
            } else {
                let start = current.map(|c| c.timeline_start).unwrap_or(frame);
                (track.clips.prev_clip_before(start), start)
            };
            if let Some(clip) = candidate {
                let edge = if direction > 0 { clip.timeline_start } else { clip.timeline_end() };
                if (edge - boundary).abs() <= PREBUFFER_LOOKAHEAD_FRAMES {
                    let _ = tx.try_send(PrebufferJob { track_id, clip: clip.clone() });
                }
            }
        }
    }

    /// Resolve the active clip on `track_id` at `timeline_frame`, acquire
    /// its Reader, and return the BGRA frame (spec §4.3 "Coordinate
    /// conversion (video)"). A track with no clip covering `timeline_frame`
    /// is a gap, not an error (§8 scenarios 1-2).
    pub fn get_video_frame(&self, track_id: u64, timeline_frame: i64) -> MediaResult<VideoResult> {
        let clip = {
            let tracks = self.inner.tracks.lock().unwrap();
            match tracks.get(&track_id).and_then(|t| t.clips.find_by_frame(timeline_frame)) {
                Some(c) => c.clone(),
                None => return Ok(VideoResult::gap()),
            }
        };

        let cached = {
            let tracks = self.inner.tracks.lock().unwrap();
            tracks.get(&track_id).and_then(|t| t.video_cache.get(timeline_frame)).cloned()
        };
        if let Some(entry) = cached {
            if entry.clip_id == clip.clip_id {
                return Ok(VideoResult {
                    frame: Some(entry.frame),
                    clip_id: clip.clip_id,
                    rotation: entry.rotation,
                    source_frame: entry.source_frame,
                    clip_fps: clip.rate,
                    clip_start_frame: clip.timeline_start,
                    clip_end_frame: clip.timeline_end(),
                    offline: false,
                });
            }
        }

        match self.inner.acquire_reader(track_id, &clip.media_path) {
            Acquire::Offline => Ok(VideoResult {
                frame: None,
                clip_id: clip.clip_id,
                rotation: Rotation::None,
                source_frame: 0,
                clip_fps: clip.rate,
                clip_start_frame: clip.timeline_start,
                clip_end_frame: clip.timeline_end(),
                offline: true,
            }),
            Acquire::Ready(reader, info) => {
                let source_frame = clip.source_in + (timeline_frame - clip.timeline_start);
                let source_us = FrameTime::new(source_frame, clip.rate).to_us();
                let frame = {
                    let mut r = reader.lock().unwrap();
                    r.decode_at_us(source_us)?
                };

                {
                    let mut tracks = self.inner.tracks.lock().unwrap();
                    if let Some(t) = tracks.get_mut(&track_id) {
                        t.video_cache.insert(
                            timeline_frame,
                            VideoCacheEntry {
                                clip_id: clip.clip_id.clone(),
                                source_frame,
                                rotation: info.rotation,
                                frame: frame.clone(),
                            },
                        );
                    }
                }

                Ok(VideoResult {
                    frame: Some(frame),
                    clip_id: clip.clip_id,
                    rotation: info.rotation,
                    source_frame,
                    clip_fps: clip.rate,
                    clip_start_frame: clip.timeline_start,
                    clip_end_frame: clip.timeline_end(),
                    offline: false,
                })
            }
        }
    }

    /// Timeline-coordinate audio (spec §4.3 "Audio (timeline coordinate)").
    /// Does not span clip boundaries in one call (original spec's explicit
    /// v1 decision, see SPEC_FULL.md Open Questions) — a request that runs
    /// past the covering clip's end is clamped to it.
    pub fn get_track_audio(
        &self,
        track_id: u64,
        t0_us: i64,
        t1_us: i64,
        fmt: AudioFormat,
    ) -> MediaResult<Option<PcmChunk>> {
        if t1_us <= t0_us {
            return Err(MediaError::invalid_arg("get_track_audio: t1 must be > t0"));
        }
        let seq_rate = self
            .inner
            .seq_rate
            .lock()
            .unwrap()
            .ok_or_else(|| MediaError::internal("get_track_audio: sequence rate not set"))?;

        let t0_frame = FrameTime::from_us(t0_us, seq_rate).frame;
        let clip = {
            let tracks = self.inner.tracks.lock().unwrap();
            match tracks.get(&track_id).and_then(|t| t.clips.find_by_frame(t0_frame)) {
                Some(c) => c.clone(),
                None => return Ok(None),
            }
        };

        let clip_start_us = FrameTime::new(clip.timeline_start, seq_rate).to_us();
        let clip_end_us = FrameTime::new(clip.timeline_end(), seq_rate).to_us();
        let t1_clamped = t1_us.min(clip_end_us);
        if t1_clamped <= t0_us {
            return Ok(None);
        }

        let source_in_us = FrameTime::new(clip.source_in, clip.rate).to_us();
        let source_t0 = source_in_us + ((t0_us - clip_start_us) as f64 * clip.speed_ratio).round() as i64;
        let source_t1 = source_in_us + ((t1_clamped - clip_start_us) as f64 * clip.speed_ratio).round() as i64;
        if source_t1 <= source_t0 {
            return Ok(None);
        }

        match self.inner.acquire_reader(track_id, &clip.media_path) {
            Acquire::Offline => Ok(None),
            Acquire::Ready(reader, _info) => {
                let chunk = {
                    let mut r = reader.lock().unwrap();
                    r.decode_audio_range_us(source_t0, source_t1, fmt)?
                };
                let timeline_duration_us = t1_clamped - t0_us;
                let target_frames = (timeline_duration_us * i64::from(fmt.sample_rate) / 1_000_000).max(0) as usize;
                let conformed = audio_conform::conform(chunk, clip.speed_ratio, target_frames, t0_us)?;
                Ok(Some(conformed))
            }
        }
    }

    pub fn set_max_readers(&self, n: usize) {
        self.inner.pool.lock().unwrap().set_max_readers(n);
    }

    pub fn probe_file(&self, path: &Path) -> MediaResult<MediaFileInfo> {
        self.inner.factory.probe(path)
    }

    pub fn release_track(&self, track_id: u64) {
        self.inner.tracks.lock().unwrap().remove(&track_id);
        self.inner.pool.lock().unwrap().remove_track(track_id);
    }

    pub fn release_all(&self) {
        self.inner.tracks.lock().unwrap().clear();
        self.inner.pool.lock().unwrap().clear();
    }
}

impl Drop for TimelineMediaBuffer {
    fn drop(&mut self) {
        // Dropping the sender closes the channel; each worker's blocking
        // `recv()` then returns `Err` and the thread exits on its own.
        self.job_tx.take();
        for w in self.workers.drain(..) {
            let _ = w.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decoder::mock::{MockBackend, OpenCounter};
    use crate::decoder::OpenedMedia;
    use timebuf_core::rate::canonical_rates;

    fn clip(id: &str, path: &str, start: i64, dur: i64, source_in: i64, rate: Rate, speed: f64) -> ClipInfo {
        ClipInfo {
            clip_id: id.into(),
            media_path: PathBuf::from(path),
            timeline_start: start,
            duration: dur,
            source_in,
            rate,
            speed_ratio: speed,
        }
    }

    fn tmb_with_mock(frame_count: i64, frame_dur_us: i64) -> TimelineMediaBuffer {
        let factory: Arc<dyn DecoderFactory> = Arc::new(MockBackend::new(frame_count, frame_dur_us));
        TimelineMediaBuffer::create(factory, 1)
    }

    #[test]
    fn empty_track_returns_a_gap() {
        let tmb = tmb_with_mock(50, 40_000);
        let result = tmb.get_video_frame(1, 100).unwrap();
        assert!(result.frame.is_none());
        assert!(!result.offline);
        assert_eq!(result.clip_id, "");
    }

    #[test]
    fn gap_between_clips_returns_no_frame() {
        let tmb = tmb_with_mock(50, 40_000);
        let rate = canonical_rates::RATE_24;
        tmb.set_track_clips(1, vec![clip("A", "p.mp4", 0, 10, 0, rate, 1.0), clip("B", "p.mp4", 20, 10, 0, rate, 1.0)]);
        let result = tmb.get_video_frame(1, 15).unwrap();
        assert!(result.frame.is_none());
        assert!(!result.offline);
    }

    #[test]
    fn clip_switch_reports_the_right_clip_and_source_frame() {
        let tmb = tmb_with_mock(200, 40_000);
        let rate = canonical_rates::RATE_24;
        tmb.set_track_clips(1, vec![clip("A", "p.mp4", 0, 50, 0, rate, 1.0), clip("B", "p.mp4", 50, 50, 0, rate, 1.0)]);

        let a = tmb.get_video_frame(1, 49).unwrap();
        assert_eq!(a.clip_id, "A");
        assert_eq!(a.source_frame, 49);

        let b = tmb.get_video_frame(1, 50).unwrap();
        assert_eq!(b.clip_id, "B");
        assert_eq!(b.source_frame, 0);
    }

    struct AlwaysFailFactory {
        opens: OpenCounter,
    }

    impl DecoderFactory for AlwaysFailFactory {
        fn open(&self, _path: &Path) -> MediaResult<OpenedMedia> {
            self.opens.bump();
            Err(MediaError::file_not_found("/nope.mp4"))
        }
    }

    #[test]
    fn offline_path_never_retries_open() {
        let opens = OpenCounter::new();
        let factory: Arc<dyn DecoderFactory> = Arc::new(AlwaysFailFactory { opens: opens.clone() });
        let tmb = TimelineMediaBuffer::create(factory, 1);
        let rate = canonical_rates::RATE_24;
        tmb.set_track_clips(1, vec![clip("A", "/nope.mp4", 0, 10, 0, rate, 1.0)]);

        let first = tmb.get_video_frame(1, 0).unwrap();
        assert!(first.offline);
        assert!(first.frame.is_none());

        let second = tmb.get_video_frame(1, 5).unwrap();
        assert!(second.offline);
        assert_eq!(opens.count(), 1, "a path already marked offline must not be reopened");
    }

    #[test]
    fn pool_eviction_reopens_a_previously_evicted_path() {
        let opens = OpenCounter::new();
        let factory: Arc<dyn DecoderFactory> = Arc::new(MockBackend::new(50, 40_000).with_counter(opens.clone()));
        let tmb = TimelineMediaBuffer::create(factory, 1);
        tmb.set_max_readers(2);
        let rate = canonical_rates::RATE_24;

        for (track, path) in [(1u64, "a.mp4"), (2, "b.mp4"), (3, "c.mp4")] {
            tmb.set_track_clips(track, vec![clip("A", path, 0, 10, 0, rate, 1.0)]);
            tmb.get_video_frame(track, 0).unwrap();
        }
        assert_eq!(opens.count(), 3);

        // track 1's reader (the LRU victim) must reopen on the next query.
        tmb.get_video_frame(1, 0).unwrap();
        assert_eq!(opens.count(), 4);
    }

    #[test]
    fn audio_conforms_clip_rate_onto_the_sequence_rate() {
        let tmb = tmb_with_mock(2_000, 40_000);
        tmb.set_sequence_rate(canonical_rates::RATE_30);
        let clip_rate = canonical_rates::RATE_24;
        tmb.set_track_clips(1, vec![clip("A", "p.mp4", 0, 1_000, 0, clip_rate, 1.25)]);

        let fmt = AudioFormat::new(48_000);
        let chunk = tmb.get_track_audio(1, 0, 500_000, fmt).unwrap().unwrap();
        assert!((chunk.frames as i64 - 24_000).abs() <= 50, "got {} frames", chunk.frames);
    }

    #[test]
    fn audio_past_clip_end_is_a_gap() {
        let tmb = tmb_with_mock(24, 1_000_000 / 24);
        let rate = canonical_rates::RATE_24;
        tmb.set_sequence_rate(rate);
        tmb.set_track_clips(1, vec![clip("A", "p.mp4", 0, 24, 0, rate, 1.0)]);

        let fmt = AudioFormat::new(48_000);
        let result = tmb.get_track_audio(1, 2_000_000, 3_000_000, fmt).unwrap();
        assert!(result.is_none());
    }

    #[test]
    fn release_all_then_queries_return_gaps_without_error() {
        let tmb = tmb_with_mock(50, 40_000);
        let rate = canonical_rates::RATE_24;
        tmb.set_track_clips(1, vec![clip("A", "p.mp4", 0, 10, 0, rate, 1.0)]);
        tmb.release_all();
        let result = tmb.get_video_frame(1, 0).unwrap();
        assert!(result.frame.is_none());
        assert!(!result.offline);
    }

    #[test]
    fn release_track_drops_its_pool_entries_but_not_other_tracks() {
        let tmb = tmb_with_mock(50, 40_000);
        let rate = canonical_rates::RATE_24;
        tmb.set_track_clips(1, vec![clip("A", "p.mp4", 0, 10, 0, rate, 1.0)]);
        tmb.set_track_clips(2, vec![clip("B", "p.mp4", 0, 10, 0, rate, 1.0)]);
        tmb.get_video_frame(1, 0).unwrap();
        tmb.get_video_frame(2, 0).unwrap();
        assert_eq!(tmb.inner.pool.lock().unwrap().len(), 2);

        tmb.release_track(1);
        assert_eq!(tmb.inner.pool.lock().unwrap().len(), 1);
        let still_there = tmb.get_video_frame(2, 0).unwrap();
        assert!(still_there.frame.is_some());
    }

    #[test]
    fn set_playhead_enqueues_a_prebuffer_job_near_a_clip_boundary() {
        let tmb = tmb_with_mock(200, 40_000);
        let rate = canonical_rates::RATE_24;
        tmb.set_track_clips(1, vec![clip("A", "p.mp4", 0, 50, 0, rate, 1.0), clip("B", "p.mp4", 50, 50, 0, rate, 1.0)]);
        // Within PREBUFFER_LOOKAHEAD_FRAMES of the A/B boundary at frame 50.
        tmb.set_playhead(40, 1, 1.0);
        std::thread::sleep(std::time::Duration::from_millis(50));
        // The prebuffer worker should have warmed clip B's reader.
        assert_eq!(tmb.inner.pool.lock().unwrap().len(), 1);
    }
}
