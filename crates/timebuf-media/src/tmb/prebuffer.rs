// crates/timebuf-media/src/tmb/prebuffer.rs
//
// Prebuffer worker pool (spec §4.3 "Playhead + prebuffer", §5 "a small TMB
// prebuffer pool"). Jobs are bounded, idempotent (the Reader's own cache
// makes redundant decodes harmless), and droppable (a full queue just means
// we try again next time the playhead moves) — so the channel send is
// always non-blocking and a full queue is not an error.

use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle};

use crossbeam_channel::Receiver;
use timebuf_core::ClipInfo;

use super::Inner;

/// How many frames of the upcoming clip to warm (spec: "decode first N
/// frames of the next clip on this track").
pub const PREBUFFER_FRAME_COUNT: i64 = 8;

pub struct PrebufferJob {
    pub track_id: u64,
    pub clip: ClipInfo,
}

pub fn spawn_workers(inner: &Arc<Inner>, rx: Receiver<PrebufferJob>, count: usize) -> Vec<JoinHandle<()>> {
    (0..count.max(1))
        .map(|_| {
            let weak = Arc::downgrade(inner);
            let rx = rx.clone();
            thread::spawn(move || worker_loop(weak, rx))
        })
        .collect()
}

/// Holds only a `Weak` reference to `Inner` so the worker threads never
/// keep the TMB alive past its owner dropping it — shutdown is "close the
/// channel", not a flag the loop has to poll.
fn worker_loop(inner: Weak<Inner>, rx: Receiver<PrebufferJob>) {
    while let Ok(job) = rx.recv() {
        let Some(inner) = inner.upgrade() else { break };
        inner.run_prebuffer_job(&job);
    }
}
