// crates/timebuf-core/src/media_types.rs
//
// Plain data types that flow between the decoder abstraction, the Reader,
// and the TMB. No ffmpeg, no threads — just the shapes.

use std::sync::{Arc, OnceLock};

use serde::{Deserialize, Serialize};

use crate::error::{ErrorKind, MediaError, MediaResult};
use crate::rate::Rate;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Rotation {
    None,
    Ninety,
    OneEighty,
    TwoSeventy,
}

impl Rotation {
    pub fn degrees(self) -> u32 {
        match self {
            Rotation::None => 0,
            Rotation::Ninety => 90,
            Rotation::OneEighty => 180,
            Rotation::TwoSeventy => 270,
        }
    }

    /// Maps an arbitrary container-reported rotation to the nearest of the
    /// four supported values; anything not exactly 0/90/180/270 is clamped
    /// to the nearest multiple of 90.
    pub fn from_degrees(deg: i32) -> Self {
        let normalized = ((deg % 360) + 360) % 360;
        match (normalized + 45) / 90 % 4 {
            1 => Rotation::Ninety,
            2 => Rotation::OneEighty,
            3 => Rotation::TwoSeventy,
            _ => Rotation::None,
        }
    }
}

/// Derived once at `open()`. See spec §3 "MediaFileInfo".
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MediaFileInfo {
    pub path: std::path::PathBuf,
    pub duration_us: i64,
    pub has_video: bool,
    pub width: u32,
    pub height: u32,
    pub nominal_rate: Rate,
    pub is_vfr: bool,
    pub rotation: Rotation,
    /// Start timecode, in frames at `nominal_rate`.
    pub start_tc: i64,
    pub has_audio: bool,
    pub audio_sample_rate: u32,
    pub audio_channels: u16,
}

/// A platform-native decode surface (e.g. a hardware frame) that can be
/// realized into packed BGRA bytes on demand. No real backend ships with
/// this crate; `FfmpegDecoder` never produces this variant today, but the
/// type exists so a VAAPI/NVDEC/VideoToolbox backend is additive later.
pub trait HardwareSurface: Send + Sync {
    /// Copy/convert this surface into packed BGRA32 bytes,
    /// `stride_bytes * height` long.
    fn realize_cpu(&self) -> MediaResult<Vec<u8>>;
}

pub enum FrameBuffer {
    Cpu(Arc<[u8]>),
    Hardware(Box<dyn HardwareSurface>),
}

/// Immutable, shareable decoded video frame in BGRA32 (alpha always 255).
///
/// Exactly one of {hardware buffer, cpu buffer} is ever present — enforced
/// by construction, not by a runtime flag pair, since `FrameBuffer` is an
/// enum rather than two `Option` fields.
pub struct Frame {
    width: u32,
    height: u32,
    stride_bytes: u32,
    source_pts_us: i64,
    buffer: FrameBuffer,
    /// Populated on first `cpu_bytes()` call when `buffer` is `Hardware`.
    /// Unused for the `Cpu` variant, whose bytes are already resident.
    realized: OnceLock<Arc<[u8]>>,
}

fn check_frame_geometry(width: u32, height: u32, stride_bytes: u32) -> MediaResult<()> {
    if width == 0 || height == 0 {
        return Err(MediaError::internal(format!(
            "frame dimensions must be positive, got {width}x{height}"
        )));
    }
    if stride_bytes < 4 * width {
        return Err(MediaError::internal(format!(
            "stride {stride_bytes} is narrower than 4*width ({})",
            4 * width
        )));
    }
    if stride_bytes % 32 != 0 {
        return Err(MediaError::internal(format!(
            "stride {stride_bytes} is not 32-byte aligned"
        )));
    }
    Ok(())
}

impl Frame {
    pub fn from_cpu(
        width: u32,
        height: u32,
        stride_bytes: u32,
        source_pts_us: i64,
        data: Arc<[u8]>,
    ) -> MediaResult<Self> {
        check_frame_geometry(width, height, stride_bytes)?;
        debug_assert!(
            data.len() >= stride_bytes as usize * height as usize,
            "cpu buffer shorter than stride*height"
        );
        if data.len() < stride_bytes as usize * height as usize {
            return Err(MediaError::internal("cpu buffer shorter than stride*height"));
        }
        Ok(Self {
            width,
            height,
            stride_bytes,
            source_pts_us,
            buffer: FrameBuffer::Cpu(data),
            realized: OnceLock::new(),
        })
    }

    pub fn from_hardware(
        width: u32,
        height: u32,
        stride_bytes: u32,
        source_pts_us: i64,
        surface: Box<dyn HardwareSurface>,
    ) -> MediaResult<Self> {
        check_frame_geometry(width, height, stride_bytes)?;
        Ok(Self {
            width,
            height,
            stride_bytes,
            source_pts_us,
            buffer: FrameBuffer::Hardware(surface),
            realized: OnceLock::new(),
        })
    }

    pub fn width(&self) -> u32 { self.width }
    pub fn height(&self) -> u32 { self.height }
    pub fn stride_bytes(&self) -> u32 { self.stride_bytes }
    pub fn source_pts_us(&self) -> i64 { self.source_pts_us }

    pub fn is_hardware(&self) -> bool {
        matches!(self.buffer, FrameBuffer::Hardware(_))
    }

    /// Return the packed BGRA32 bytes, realizing a hardware surface lazily
    /// (and caching the realized buffer) on first access.
    pub fn cpu_bytes(&self) -> MediaResult<Arc<[u8]>> {
        match &self.buffer {
            FrameBuffer::Cpu(bytes) => Ok(bytes.clone()),
            FrameBuffer::Hardware(surface) => {
                if let Some(cached) = self.realized.get() {
                    return Ok(cached.clone());
                }
                let raw = surface.realize_cpu()?;
                let needed = self.stride_bytes as usize * self.height as usize;
                if raw.len() < needed {
                    return Err(MediaError::internal(format!(
                        "realized hardware surface too small: got {}, need {needed}",
                        raw.len()
                    )));
                }
                let arc: Arc<[u8]> = Arc::from(raw);
                // Another thread may race us to populate the cache; either
                // value is byte-identical so we don't care which one wins.
                let _ = self.realized.set(arc.clone());
                Ok(arc)
            }
        }
    }
}

/// Always-stereo F32 interleaved PCM audio, covering `[start_time_us,
/// start_time_us + frames * 1_000_000 / sample_rate)`.
#[derive(Clone)]
pub struct PcmChunk {
    pub sample_rate: u32,
    pub start_time_us: i64,
    pub frames: usize,
    /// Interleaved L/R samples, `2 * frames` long.
    pub data: Arc<[f32]>,
}

impl PcmChunk {
    pub const CHANNELS: u16 = 2;

    pub fn new(sample_rate: u32, start_time_us: i64, data: Arc<[f32]>) -> MediaResult<Self> {
        if data.len() % 2 != 0 {
            return Err(MediaError::internal(
                "interleaved stereo PCM must have an even sample count",
            ));
        }
        Ok(Self { sample_rate, start_time_us, frames: data.len() / 2, data })
    }

    pub fn empty(sample_rate: u32, start_time_us: i64) -> Self {
        Self { sample_rate, start_time_us, frames: 0, data: Arc::from(Vec::new()) }
    }

    pub fn duration_us(&self) -> i64 {
        (self.frames as i64 * 1_000_000) / self.sample_rate.max(1) as i64
    }
}

/// Target format for an audio range decode: always F32 stereo at a
/// caller-chosen sample rate.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AudioFormat {
    pub sample_rate: u32,
}

impl AudioFormat {
    pub const fn new(sample_rate: u32) -> Self {
        Self { sample_rate }
    }

    pub const fn channels(self) -> u16 {
        PcmChunk::CHANNELS
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_rejects_narrow_stride() {
        let data: Arc<[u8]> = Arc::from(vec![0u8; 64 * 2]);
        let err = Frame::from_cpu(32, 2, 32, 0, data).unwrap_err();
        assert_eq!(err.kind, ErrorKind::Internal);
    }

    #[test]
    fn frame_rejects_unaligned_stride() {
        let data: Arc<[u8]> = Arc::from(vec![0u8; 200 * 2]);
        let err = Frame::from_cpu(32, 2, 200, 0, data).unwrap_err();
        assert_eq!(err.kind, ErrorKind::Internal);
    }

    #[test]
    fn frame_cpu_roundtrip() {
        let data: Arc<[u8]> = Arc::from(vec![7u8; 64 * 2]);
        let f = Frame::from_cpu(16, 2, 64, 1234, data).unwrap();
        assert_eq!(f.source_pts_us(), 1234);
        assert_eq!(&*f.cpu_bytes().unwrap(), &[7u8; 128][..]);
    }

    struct DummySurface(Vec<u8>);
    impl HardwareSurface for DummySurface {
        fn realize_cpu(&self) -> MediaResult<Vec<u8>> {
            Ok(self.0.clone())
        }
    }

    #[test]
    fn frame_hardware_lazy_realize_is_cached() {
        let f = Frame::from_hardware(
            16, 2, 64, 99, Box::new(DummySurface(vec![9u8; 128])),
        ).unwrap();
        assert!(f.is_hardware());
        let first = f.cpu_bytes().unwrap();
        let second = f.cpu_bytes().unwrap();
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn pcm_chunk_frame_count_from_interleaved_len() {
        let data: Arc<[f32]> = Arc::from(vec![0.0f32; 200]);
        let chunk = PcmChunk::new(48_000, 0, data).unwrap();
        assert_eq!(chunk.frames, 100);
    }
}
