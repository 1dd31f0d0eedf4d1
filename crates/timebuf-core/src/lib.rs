// crates/timebuf-core/src/lib.rs
//
// Pure data and arithmetic shared by the reader and the timeline media
// buffer: rational rates, frame<->microsecond conversion, the error
// taxonomy, and the plain data types (Frame, PcmChunk, MediaFileInfo) that
// cross the decoder-abstraction boundary. No threads, no FFmpeg.

pub mod clip;
pub mod error;
pub mod media_types;
pub mod rate;
pub mod yuv;

pub use clip::{ClipInfo, VideoResult};
pub use error::{ErrorKind, MediaError, MediaResult};
pub use media_types::{AudioFormat, Frame, FrameBuffer, HardwareSurface, MediaFileInfo, PcmChunk, Rotation};
pub use rate::{canonical_rates, FrameTime, Rate};
