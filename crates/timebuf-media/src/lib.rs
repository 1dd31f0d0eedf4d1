// crates/timebuf-media/src/lib.rs
//
// The I/O-owning half of the stack: the decoder abstraction (trait +
// ffmpeg-the-third adapter), the per-file Reader (cache, prefetch worker,
// mode machine), and the TimelineMediaBuffer (clip layout, reader pool,
// playhead, prebuffer workers). `timebuf-core` supplies the pure data and
// rate arithmetic both of these build on.

pub mod decoder;
pub mod logging;
pub mod reader;
pub mod tmb;

pub use decoder::ffmpeg::FfmpegBackend;
pub use decoder::DecoderFactory;
pub use reader::mode::{get_decode_mode, set_decode_mode, DecodeMode};
pub use reader::Reader;
pub use tmb::TimelineMediaBuffer;
