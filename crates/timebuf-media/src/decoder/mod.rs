// crates/timebuf-media/src/decoder/mod.rs
//
// The small decoder surface the Reader and TMB consume (spec §4.1). This
// module is the private boundary: concrete FFmpeg types never cross out of
// it. `VideoDecoderHandle`/`AudioDecoderHandle` are trait objects so the
// Reader can hold two fully independent instances (main + prefetch) without
// knowing or caring which concrete backend produced them — and so tests can
// swap in `mock::MockBackend` without touching Reader/TMB code at all.

use std::any::Any;
use std::path::Path;

use timebuf_core::{Frame, MediaFileInfo, MediaResult};

pub mod ffmpeg;
#[cfg(test)]
pub mod mock;

/// One decoded-but-not-yet-converted video frame. Opaque outside the
/// decoder module: the Reader passes it straight back into
/// `VideoDecoderHandle::convert_to_bgra` on the same handle that produced
/// it, never inspecting `inner`.
pub struct RawFrame {
    pub pts_us: i64,
    inner: Box<dyn Any + Send>,
}

impl RawFrame {
    pub fn new(pts_us: i64, inner: Box<dyn Any + Send>) -> Self {
        Self { pts_us, inner }
    }

    pub(crate) fn downcast<T: 'static>(&self) -> MediaResult<&T> {
        self.inner.downcast_ref::<T>().ok_or_else(|| {
            timebuf_core::MediaError::internal(
                "RawFrame handed to the wrong decoder backend",
            )
        })
    }
}

/// One decoded-but-not-yet-resampled audio frame.
pub struct RawAudio {
    pub pts_us: i64,
    pub duration_us: i64,
    inner: Box<dyn Any + Send>,
}

impl RawAudio {
    pub fn new(pts_us: i64, duration_us: i64, inner: Box<dyn Any + Send>) -> Self {
        Self { pts_us, duration_us, inner }
    }

    pub(crate) fn downcast<T: 'static>(&self) -> MediaResult<&T> {
        self.inner.downcast_ref::<T>().ok_or_else(|| {
            timebuf_core::MediaError::internal(
                "RawAudio handed to the wrong decoder backend",
            )
        })
    }
}

/// One open video decode pipeline: one demuxer context, one video decoder,
/// one scaler. A Reader opens two of these (main + prefetch) against the
/// same file and they never touch each other's state (spec §4.2 invariant
/// 3, §9 "two parallel decoder pipelines").
pub trait VideoDecoderHandle: Send {
    /// Seek to the keyframe at or before `target_us`; flushes internal
    /// decoder buffers (spec §4.1).
    fn seek(&mut self, target_us: i64) -> MediaResult<()>;

    /// Decode the next frame in decode order (not necessarily presentation
    /// order — B-frame reordering is the caller's problem). `Ok(None)` at
    /// end of stream.
    fn next_raw(&mut self) -> MediaResult<Option<RawFrame>>;

    /// Scale/convert a previously decoded frame to BGRA32. Split out from
    /// `next_raw` so the Reader can skip conversion entirely for frames it
    /// is only burning through after a seek (Scrub/Park's B-frame drain,
    /// Play's post-seek GOP burn).
    fn convert_to_bgra(&mut self, raw: &RawFrame) -> MediaResult<Frame>;
}

/// One open audio decode + resample pipeline.
pub trait AudioDecoderHandle: Send {
    /// Seek the audio stream to `target_us` (backward — keyframe/packet at
    /// or before). Flushes the internal decoder buffer.
    fn seek(&mut self, target_us: i64) -> MediaResult<()>;

    /// Decode the next audio frame. `Ok(None)` at end of stream.
    fn next_raw(&mut self) -> MediaResult<Option<RawAudio>>;

    /// (Re)initialize the resampler for a new destination sample rate,
    /// clearing any internal FIFO. Must be called before the first
    /// `resample` call and again whenever the destination rate changes.
    fn reset_resampler(&mut self, dst_rate: u32) -> MediaResult<()>;

    /// Resample one decoded frame to interleaved F32 stereo at the rate
    /// passed to the last `reset_resampler` call.
    fn resample(&mut self, raw: &RawAudio) -> MediaResult<Vec<f32>>;

    /// Flush the resampler's internal FIFO tail (call once after the last
    /// `resample` in a range).
    fn flush_resampler(&mut self) -> MediaResult<Vec<f32>>;
}

/// Everything produced by opening one media file: probed info plus, if
/// present, independent video and audio decode handles.
pub struct OpenedMedia {
    pub info: MediaFileInfo,
    pub video: Option<Box<dyn VideoDecoderHandle>>,
    pub audio: Option<Box<dyn AudioDecoderHandle>>,
}

/// Opens independent decode pipelines against a path. The Reader calls this
/// once for its main pipeline and again (lazily) for its prefetch pipeline
/// — each call must produce fully independent decoder state so the two
/// pipelines never share a seek position or internal buffer.
pub trait DecoderFactory: Send + Sync {
    fn open(&self, path: &Path) -> MediaResult<OpenedMedia>;

    /// Probe-only open: same discovery as `open`, used by
    /// `TimelineMediaBuffer::probe_file`, which does not need decode
    /// handles at all.
    fn probe(&self, path: &Path) -> MediaResult<MediaFileInfo> {
        Ok(self.open(path)?.info)
    }
}
