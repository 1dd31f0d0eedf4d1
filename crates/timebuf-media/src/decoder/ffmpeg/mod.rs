// crates/timebuf-media/src/decoder/ffmpeg/mod.rs
//
// FFmpeg-backed implementation of the decoder abstraction, built the way
// `velocut-media::decode::LiveDecoder` opens and steps a stream, but split
// into the discrete seek/decode/convert operations the Reader's state
// machine (spec §4.2) needs to drive itself rather than one convenience
// "give me the next displayable frame" call.

mod audio;
mod error;
mod video;

use std::path::Path;
use std::sync::Arc;

use ffmpeg_the_third as ff;
use ffmpeg_the_third::media::Type as MediaType;

use tracing::warn;

use timebuf_core::{MediaFileInfo, MediaResult, Rate, Rotation};

use super::{DecoderFactory, OpenedMedia};

pub use error::map_ffmpeg_error;

/// Real `ffmpeg-the-third`-backed [`DecoderFactory`]. Stateless — every
/// `open()` call opens fresh `avformat` contexts, which is exactly what the
/// Reader needs for its independent main/prefetch pipelines.
#[derive(Default, Clone, Copy)]
pub struct FfmpegBackend;

impl FfmpegBackend {
    /// Must be called once, process-wide, before any other FFmpeg call.
    /// Mirrors `ffmpeg_the_third::init()` in `velocut-ui/src/main.rs`.
    pub fn global_init() -> MediaResult<()> {
        ff::init().map_err(|e| map_ffmpeg_error("ffmpeg init", &e))
    }
}

impl DecoderFactory for FfmpegBackend {
    fn open(&self, path: &Path) -> MediaResult<OpenedMedia> {
        if !path.exists() {
            return Err(timebuf_core::MediaError::file_not_found(path.display()));
        }

        let ictx = ff::format::input(path)
            .map_err(|e| map_ffmpeg_error(&format!("open {}", path.display()), &e))?;

        let info = probe_info(path, &ictx)?;

        let video = ictx
            .streams()
            .best(MediaType::Video)
            .map(|s| s.index());
        let audio = ictx
            .streams()
            .best(MediaType::Audio)
            .map(|s| s.index());
        drop(ictx);

        let video_handle = match video {
            Some(idx) => Some(Box::new(video::FfmpegVideoDecoder::open(path, idx)?)
                as Box<dyn super::VideoDecoderHandle>),
            None => None,
        };
        let audio_handle = match audio {
            Some(idx) => Some(Box::new(audio::FfmpegAudioDecoder::open(path, idx)?)
                as Box<dyn super::AudioDecoderHandle>),
            None => None,
        };

        Ok(OpenedMedia { info, video: video_handle, audio: audio_handle })
    }
}

/// Derive [`MediaFileInfo`] the way spec §3 describes: prefer average rate,
/// fall back to reference rate, mark VFR when they disagree or neither is
/// valid.
fn probe_info(path: &Path, ictx: &ff::format::context::Input) -> MediaResult<MediaFileInfo> {
    let duration_us = if ictx.duration() > 0 {
        ictx.duration() * 1_000_000 / i64::from(ff::ffi::AV_TIME_BASE)
    } else {
        0
    };

    let video_stream = ictx.streams().best(MediaType::Video);
    let audio_stream = ictx.streams().best(MediaType::Audio);

    let (width, height, nominal_rate, is_vfr, rotation, start_tc) = match &video_stream {
        Some(stream) => {
            let params = stream.parameters();
            let (w, h) = unsafe {
                let p = params.as_ptr();
                ((*p).width as u32, (*p).height as u32)
            };

            let avg = stream.avg_frame_rate();
            let refr = stream.rate();
            let avg_rate = Rate::new(avg.numerator().max(0) as u32, avg.denominator().max(1) as u32).ok();
            let ref_rate = Rate::new(refr.numerator().max(0) as u32, refr.denominator().max(1) as u32).ok();

            let (rate, vfr) = select_rate(avg_rate, ref_rate);

            // Display-matrix side data (stream rotation) and the TC side
            // data (start timecode) both require raw AVPacketSideData
            // access this binding doesn't surface; callers that need exact
            // rotation/start_tc should read it themselves from the
            // container until a higher-level accessor lands upstream.
            let start_tc = 0i64;

            (w, h, rate, vfr, Rotation::None, start_tc)
        }
        None => {
            warn!(target: "decoder", path = %path.display(), "no video stream found, defaulting nominal rate to 30/1 and flagging VFR");
            (0, 0, Rate::new(30, 1).unwrap(), true, Rotation::None, 0)
        }
    };

    let (audio_rate, audio_channels) = match &audio_stream {
        Some(stream) => {
            let params = stream.parameters();
            unsafe {
                let p = params.as_ptr();
                ((*p).sample_rate as u32, (*p).ch_layout.nb_channels as u16)
            }
        }
        None => (0, 0),
    };

    Ok(MediaFileInfo {
        path: path.to_path_buf(),
        duration_us,
        has_video: video_stream.is_some(),
        width,
        height,
        nominal_rate,
        is_vfr,
        rotation,
        start_tc,
        has_audio: audio_stream.is_some(),
        audio_sample_rate: audio_rate,
        audio_channels,
    })
}

/// Spec §3: "if both are valid and close, use average; if they disagree,
/// mark VFR and prefer whichever snaps to a canonical rate. With neither
/// valid, default to 30/1 and flag VFR."
fn select_rate(avg: Option<Rate>, reference: Option<Rate>) -> (Rate, bool) {
    match (avg, reference) {
        (Some(a), Some(r)) => {
            if Rate::are_close(a, r) {
                (a, false)
            } else {
                // Disagreement: prefer whichever rate snapping actually
                // moved onto a canonical value (avg first, then ref) —
                // that is the side the container got right, not the side
                // that already happened to land exactly on one. Falling
                // back to `a` unsnapped keeps a non-canonical average
                // rather than silently substituting the reference rate.
                let a_snapped = a.snap_to_canonical();
                let r_snapped = r.snap_to_canonical();
                let chosen = if a_snapped != a {
                    a_snapped
                } else if r_snapped != r {
                    r_snapped
                } else {
                    a
                };
                (chosen, true)
            }
        }
        (Some(a), None) => (a, false),
        (None, Some(r)) => (r, false),
        (None, None) => (Rate::new(30, 1).unwrap(), true),
    }
}

pub(crate) fn rational_to_us(pts: i64, tb: ff::Rational) -> i64 {
    if tb.denominator() == 0 {
        return 0;
    }
    (pts as i128 * 1_000_000i128 * tb.numerator() as i128 / tb.denominator() as i128) as i64
}

pub(crate) fn us_to_rational_pts(us: i64, tb: ff::Rational) -> i64 {
    if tb.numerator() == 0 {
        return 0;
    }
    (us as i128 * tb.denominator() as i128 / (1_000_000i128 * tb.numerator() as i128)) as i64
}

pub(crate) fn shared_bytes(data: &[u8]) -> Arc<[u8]> {
    Arc::from(data.to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;
    use timebuf_core::canonical_rates;

    #[test]
    fn select_rate_prefers_average_when_it_snaps_to_canonical() {
        // avg=23.98 (close to 24000/1001 but not exact) disagrees with a
        // reference rate of 25/1; the average is the one the container got
        // right, so snapping it should win over falling back to the ref.
        let avg = Rate::new(2398, 100).unwrap();
        let reference = canonical_rates::RATE_25;
        let (chosen, vfr) = select_rate(Some(avg), Some(reference));
        assert_eq!(chosen, canonical_rates::RATE_23_976);
        assert!(vfr);
    }

    #[test]
    fn select_rate_falls_back_to_reference_when_only_it_snaps() {
        let avg = canonical_rates::RATE_25; // already exact, doesn't move
        let reference = Rate::new(2997, 100).unwrap(); // close to 29.97 but not exact
        let (chosen, vfr) = select_rate(Some(avg), Some(reference));
        assert_eq!(chosen, canonical_rates::RATE_29_97);
        assert!(vfr);
    }

    #[test]
    fn select_rate_uses_average_directly_when_both_already_exact() {
        let avg = canonical_rates::RATE_24;
        let reference = canonical_rates::RATE_30;
        let (chosen, vfr) = select_rate(Some(avg), Some(reference));
        assert_eq!(chosen, avg);
        assert!(vfr);
    }

    #[test]
    fn select_rate_uses_average_when_close_to_reference() {
        let avg = Rate::new(24, 1).unwrap();
        let reference = Rate::new(24, 1).unwrap();
        let (chosen, vfr) = select_rate(Some(avg), Some(reference));
        assert_eq!(chosen, avg);
        assert!(!vfr);
    }
}
