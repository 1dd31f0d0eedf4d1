// crates/timebuf-media/src/decoder/mock.rs
//
// Synthetic in-memory backend for Reader/TMB tests. Generates a flat-color
// BGRA frame per PTS instead of touching FFmpeg, so the cache/prefetch/mode
// logic can be exercised deterministically and fast. Shaped after the real
// `ffmpeg::FfmpegBackend` — same `DecoderFactory`/`VideoDecoderHandle` split
// — so the Reader code under test never knows the difference.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use timebuf_core::{rate::canonical_rates, Frame, MediaFileInfo, MediaResult, Rotation};

use super::{AudioDecoderHandle, DecoderFactory, OpenedMedia, RawAudio, RawFrame, VideoDecoderHandle};

/// Counts every `open()` call across all `MockBackend` instances sharing an
/// `Arc<AtomicU32>`, so a test can assert the Reader/TMB never opens more
/// decoder pipelines than the dual-pipeline design calls for.
#[derive(Clone, Default)]
pub struct OpenCounter(Arc<AtomicU32>);

impl OpenCounter {
    pub fn new() -> Self {
        Self(Arc::new(AtomicU32::new(0)))
    }

    pub fn count(&self) -> u32 {
        self.0.load(Ordering::SeqCst)
    }
}

pub struct MockBackend {
    pub frame_count: i64,
    pub frame_dur_us: i64,
    pub width: u32,
    pub height: u32,
    pub opens: OpenCounter,
}

impl MockBackend {
    pub fn new(frame_count: i64, frame_dur_us: i64) -> Self {
        Self { frame_count, frame_dur_us, width: 4, height: 2, opens: OpenCounter::new() }
    }

    pub fn with_counter(mut self, opens: OpenCounter) -> Self {
        self.opens = opens;
        self
    }
}

impl DecoderFactory for MockBackend {
    fn open(&self, _path: &Path) -> MediaResult<OpenedMedia> {
        self.opens.0.fetch_add(1, Ordering::SeqCst);
        let duration_us = self.frame_count * self.frame_dur_us;
        let info = MediaFileInfo {
            path: PathBuf::from("mock.mov"),
            duration_us,
            has_video: true,
            width: self.width,
            height: self.height,
            nominal_rate: canonical_rates::RATE_24,
            is_vfr: false,
            rotation: Rotation::None,
            start_tc: 0,
            has_audio: true,
            audio_sample_rate: 48_000,
            audio_channels: 2,
        };
        let video = MockVideoDecoder::new(self.frame_count, self.frame_dur_us, self.width, self.height);
        let audio = MockAudioDecoder::new(self.frame_count, self.frame_dur_us, 48_000);
        Ok(OpenedMedia { info, video: Some(Box::new(video)), audio: Some(Box::new(audio)) })
    }
}

/// Marker payload stored inside `RawFrame`/`RawAudio` — the mock never needs
/// anything beyond the index that produced it.
struct MockPayload(i64);

pub struct MockVideoDecoder {
    frame_count: i64,
    frame_dur_us: i64,
    width: u32,
    height: u32,
    next_index: i64,
}

impl MockVideoDecoder {
    fn new(frame_count: i64, frame_dur_us: i64, width: u32, height: u32) -> Self {
        Self { frame_count, frame_dur_us, width, height, next_index: 0 }
    }
}

impl VideoDecoderHandle for MockVideoDecoder {
    fn seek(&mut self, target_us: i64) -> MediaResult<()> {
        // A real demuxer keeps decoding from the last available keyframe
        // when asked to seek past end of stream; clamp to the final frame
        // rather than to `frame_count` so a scrub past EOF still yields it.
        let idx = (target_us / self.frame_dur_us).clamp(0, (self.frame_count - 1).max(0));
        self.next_index = idx;
        Ok(())
    }

    fn next_raw(&mut self) -> MediaResult<Option<RawFrame>> {
        if self.next_index >= self.frame_count {
            return Ok(None);
        }
        let idx = self.next_index;
        self.next_index += 1;
        let pts_us = idx * self.frame_dur_us;
        Ok(Some(RawFrame::new(pts_us, Box::new(MockPayload(idx)))))
    }

    fn convert_to_bgra(&mut self, raw: &RawFrame) -> MediaResult<Frame> {
        let payload = raw.downcast::<MockPayload>()?;
        let stride = timebuf_core::yuv::bgra_stride(self.width);
        let fill = (payload.0 % 256) as u8;
        let data: Arc<[u8]> = Arc::from(vec![fill; stride as usize * self.height as usize]);
        Frame::from_cpu(self.width, self.height, stride, raw.pts_us, data)
    }
}

pub struct MockAudioDecoder {
    frame_count: i64,
    frame_dur_us: i64,
    sample_rate: u32,
    dst_rate: u32,
    next_index: i64,
}

impl MockAudioDecoder {
    fn new(frame_count: i64, frame_dur_us: i64, sample_rate: u32) -> Self {
        Self { frame_count, frame_dur_us, sample_rate, dst_rate: sample_rate, next_index: 0 }
    }
}

impl AudioDecoderHandle for MockAudioDecoder {
    fn seek(&mut self, target_us: i64) -> MediaResult<()> {
        let idx = (target_us / self.frame_dur_us).clamp(0, (self.frame_count - 1).max(0));
        self.next_index = idx;
        Ok(())
    }

    fn next_raw(&mut self) -> MediaResult<Option<RawAudio>> {
        if self.next_index >= self.frame_count {
            return Ok(None);
        }
        let idx = self.next_index;
        self.next_index += 1;
        let pts_us = idx * self.frame_dur_us;
        Ok(Some(RawAudio::new(pts_us, self.frame_dur_us, Box::new(MockPayload(idx)))))
    }

    fn reset_resampler(&mut self, dst_rate: u32) -> MediaResult<()> {
        self.dst_rate = dst_rate;
        Ok(())
    }

    fn resample(&mut self, raw: &RawAudio) -> MediaResult<Vec<f32>> {
        let payload = raw.downcast::<MockPayload>()?;
        let frames = (self.frame_dur_us as i64 * self.dst_rate as i64 / 1_000_000) as usize;
        let value = (payload.0 % 100) as f32 / 100.0;
        Ok(vec![value; frames * 2])
    }

    fn flush_resampler(&mut self) -> MediaResult<Vec<f32>> {
        let _ = self.sample_rate;
        Ok(Vec::new())
    }
}
