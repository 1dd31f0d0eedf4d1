// crates/timebuf-core/src/error.rs
//
// Closed error taxonomy shared by the Reader and the TMB. No FFmpeg error
// code or Debug string ever escapes through a MediaError — every fallible
// call into the decoder layer maps to one of these kinds at the boundary
// (see timebuf-media::decoder::ffmpeg::map_ffmpeg_error).

use thiserror::Error;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    FileNotFound,
    Unsupported,
    DecodeFailed,
    SeekFailed,
    EOFReached,
    InvalidArg,
    Internal,
}

#[derive(Error, Debug, Clone)]
#[error("{kind:?}: {context}")]
pub struct MediaError {
    pub kind: ErrorKind,
    pub context: String,
}

impl MediaError {
    pub fn new(kind: ErrorKind, context: impl Into<String>) -> Self {
        Self { kind, context: context.into() }
    }

    pub fn file_not_found(path: impl std::fmt::Display) -> Self {
        Self::new(ErrorKind::FileNotFound, format!("file not found: {path}"))
    }

    pub fn unsupported(detail: impl Into<String>) -> Self {
        Self::new(ErrorKind::Unsupported, detail)
    }

    pub fn decode_failed(detail: impl Into<String>) -> Self {
        Self::new(ErrorKind::DecodeFailed, detail)
    }

    pub fn seek_failed(detail: impl Into<String>) -> Self {
        Self::new(ErrorKind::SeekFailed, detail)
    }

    pub fn eof() -> Self {
        Self::new(ErrorKind::EOFReached, "end of file reached")
    }

    pub fn invalid_arg(detail: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidArg, detail)
    }

    pub fn internal(detail: impl Into<String>) -> Self {
        Self::new(ErrorKind::Internal, detail)
    }

    pub fn is_eof(&self) -> bool {
        self.kind == ErrorKind::EOFReached
    }
}

pub type MediaResult<T> = Result<T, MediaError>;
