// crates/timebuf-media/src/reader/prefetch.rs
//
// Background prefetch worker (spec §4.2.F). Owns a second, fully independent
// decoder pipeline opened through the same `DecoderFactory` the Reader used
// for its main pipeline — never the same handle, never shared state, so the
// main thread's synchronous decode and the worker's background decode can
// never contend for the same AVCodecContext.
//
// Threading shape is the latest-wins-slot-plus-Condvar pattern
// `velocut-media::worker.rs`'s scrub decode thread uses, generalized from
// "wake on a new request" to "wake when direction flips away from parked".

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicI32, AtomicI64, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::{debug, warn};

use timebuf_core::MediaResult;

use crate::decoder::DecoderFactory;
use crate::reader::cache::FrameCache;

/// How far ahead of the playhead the worker tries to keep the cache filled.
/// Lifted from `emp_reader.cpp`'s comment describing the prefetch-catch-up
/// window ("prefetch_to = stale + 500ms").
pub const LOOKAHEAD_US: i64 = 500_000;

/// If the worker decoder's position is farther than this from the target,
/// seeking is cheaper than decoding forward to catch up — same 2s threshold
/// `need_seek` uses for the main decoder (spec §4.2.I).
pub const SANE_GAP_US: i64 = 2_000_000;

const IDLE_SLEEP: Duration = Duration::from_millis(5);

struct Shared {
    direction: AtomicI32,
    target_us: AtomicI64,
    decoded_count: AtomicI64,
    shutdown: AtomicBool,
    wake: (Mutex<()>, Condvar),
}

pub struct Prefetch {
    shared: Arc<Shared>,
    join: Option<JoinHandle<()>>,
}

impl Prefetch {
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Shared {
                direction: AtomicI32::new(0),
                target_us: AtomicI64::new(0),
                decoded_count: AtomicI64::new(0),
                shutdown: AtomicBool::new(false),
                wake: (Mutex::new(()), Condvar::new()),
            }),
            join: None,
        }
    }

    pub fn direction(&self) -> i32 {
        self.shared.direction.load(Ordering::Acquire)
    }

    pub fn decoded_count(&self) -> i64 {
        self.shared.decoded_count.load(Ordering::Relaxed)
    }

    pub fn update_target(&self, target_us: i64) {
        self.shared.target_us.store(target_us, Ordering::Release);
    }

    pub fn target_us(&self) -> i64 {
        self.shared.target_us.load(Ordering::Acquire)
    }

    /// `direction`: 1 = forward, -1 = reverse, 0 = stop (equivalent to
    /// `stop`). Lazily spawns the worker thread on first non-zero call.
    pub fn start(
        &mut self,
        direction: i32,
        factory: Arc<dyn DecoderFactory>,
        path: PathBuf,
        cache: Arc<Mutex<FrameCache>>,
    ) {
        if direction == 0 {
            self.stop_direction();
            return;
        }

        self.shared.decoded_count.store(0, Ordering::Relaxed);
        self.shared.direction.store(direction, Ordering::Release);

        if self.join.is_none() {
            let shared = Arc::clone(&self.shared);
            self.join = Some(thread::spawn(move || worker_loop(shared, factory, path, cache)));
        }

        let (lock, cvar) = &self.shared.wake;
        let _g = lock.lock().unwrap();
        cvar.notify_one();
    }

    /// Park the worker (direction 0); safe even if never started. The
    /// thread itself stays alive, parked on the condition variable — only
    /// `Drop` actually tears it down.
    pub fn stop_direction(&self) {
        self.shared.direction.store(0, Ordering::Release);
    }
}

impl Default for Prefetch {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for Prefetch {
    fn drop(&mut self) {
        self.shared.shutdown.store(true, Ordering::Release);
        let (lock, cvar) = &self.shared.wake;
        {
            let _g = lock.lock().unwrap();
        }
        cvar.notify_all();
        if let Some(j) = self.join.take() {
            let _ = j.join();
        }
    }
}

fn worker_loop(shared: Arc<Shared>, factory: Arc<dyn DecoderFactory>, path: PathBuf, cache: Arc<Mutex<FrameCache>>) {
    let mut video = None;
    let mut have_pos = false;
    let mut pos_us: i64 = i64::MIN;

    loop {
        if shared.shutdown.load(Ordering::Acquire) {
            return;
        }

        let direction = shared.direction.load(Ordering::Acquire);
        if direction == 0 {
            let (lock, cvar) = &shared.wake;
            let guard = lock.lock().unwrap();
            let (_guard, _timeout) = cvar.wait_timeout(guard, Duration::from_millis(100)).unwrap();
            continue;
        }

        let target = shared.target_us.load(Ordering::Acquire);
        let edge = if direction > 0 { target + LOOKAHEAD_US } else { target - LOOKAHEAD_US };

        let covers_edge = {
            let c = cache.lock().unwrap();
            !c.is_empty() && c.min_pts() <= edge && edge <= c.max_pts()
        };
        if covers_edge {
            thread::sleep(IDLE_SLEEP);
            continue;
        }

        if video.is_none() {
            match factory.open(&path) {
                Ok(opened) => video = opened.video,
                Err(e) => {
                    warn!(target: "reader", path = %path.display(), error = %e, "prefetch worker: open failed, retrying");
                    thread::sleep(IDLE_SLEEP);
                    continue;
                }
            }
        }
        let Some(dec) = video.as_mut() else {
            thread::sleep(IDLE_SLEEP);
            continue;
        };

        if !have_pos || (pos_us - target).abs() > SANE_GAP_US {
            debug!(target: "reader", path = %path.display(), target, "prefetch worker: seeking toward target");
            if dec.seek(target).is_err() {
                thread::sleep(IDLE_SLEEP);
                continue;
            }
            have_pos = false;
        }

        match decode_and_convert_one(dec.as_mut()) {
            Ok(Some((pts_us, frame))) => {
                pos_us = pts_us;
                have_pos = true;
                let mut c = cache.lock().unwrap();
                let keep_around = target;
                c.insert(pts_us, Arc::new(frame));
                let max_frames = c.max_frames();
                c.evict_around(keep_around, max_frames);
                drop(c);
                shared.decoded_count.fetch_add(1, Ordering::Relaxed);
            }
            Ok(None) => {
                // EOF in this direction; park until the target moves again.
                thread::sleep(Duration::from_millis(50));
            }
            Err(_) => {
                thread::sleep(IDLE_SLEEP);
            }
        }
    }
}

fn decode_and_convert_one(
    dec: &mut dyn crate::decoder::VideoDecoderHandle,
) -> MediaResult<Option<(i64, timebuf_core::Frame)>> {
    match dec.next_raw()? {
        Some(raw) => {
            let pts_us = raw.pts_us;
            let frame = dec.convert_to_bgra(&raw)?;
            Ok(Some((pts_us, frame)))
        }
        None => Ok(None),
    }
}
