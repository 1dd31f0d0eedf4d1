// crates/timebuf-media/src/decoder/ffmpeg/error.rs
//
// The single place ffmpeg_the_third::Error gets mapped into MediaError
// (spec §4.1). Every call site in this module routes through here instead
// of constructing MediaError ad hoc, so the mapping table lives once.

use ffmpeg_the_third as ff;

use timebuf_core::{ErrorKind, MediaError};

pub fn map_ffmpeg_error(context: &str, err: &ff::Error) -> MediaError {
    let kind = match err {
        ff::Error::Eof => ErrorKind::EOFReached,
        ff::Error::InvalidData => ErrorKind::Unsupported,
        ff::Error::DecoderNotFound
        | ff::Error::EncoderNotFound
        | ff::Error::DemuxerNotFound
        | ff::Error::MuxerNotFound
        | ff::Error::StreamNotFound
        | ff::Error::ProtocolNotFound => ErrorKind::Unsupported,
        ff::Error::Other { errno } if *errno == libc_enoent() => ErrorKind::FileNotFound,
        ff::Error::Bug | ff::Error::Bug2 => ErrorKind::Internal,
        _ => ErrorKind::Internal,
    };
    MediaError::new(kind, format!("{context}: {err}"))
}

/// `ENOENT`, without pulling in the `libc` crate for one constant — every
/// POSIX target and the values FFmpeg itself uses for `AVERROR(ENOENT)`
/// agree on 2.
fn libc_enoent() -> i32 {
    2
}
