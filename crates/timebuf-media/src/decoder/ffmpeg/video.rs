// crates/timebuf-media/src/decoder/ffmpeg/video.rs
//
// FfmpegVideoDecoder: one demuxer + one video decoder + one swscale context,
// built the way velocut-media::decode::LiveDecoder opens and steps a clip,
// but with seek/decode/convert pulled apart into the three discrete steps
// VideoDecoderHandle exposes. The Reader's state machine drives these itself
// to implement B-frame lookahead (spec §4.2.D/E) — this module never guesses
// at presentation order.

use std::path::{Path, PathBuf};

use ffmpeg_the_third as ff;
use ffmpeg_the_third::format::Pixel;
use ffmpeg_the_third::media::Type as MediaType;
use ffmpeg_the_third::software::scaling::{context::Context as SwsContext, flag::Flags};

use timebuf_core::{Frame, MediaResult};

use super::{map_ffmpeg_error, rational_to_us, shared_bytes};
use crate::decoder::{RawFrame, VideoDecoderHandle};

/// `EAGAIN`, used the same way `libc_enoent` is in `ffmpeg/error.rs`: a
/// narrow constant lifted by value rather than pulling in `libc` for it.
const EAGAIN: i32 = 11;

/// `ffmpeg::util::frame::video::Video` wraps a raw `AVFrame*`. Each handle is
/// only ever touched by the thread that owns it (Reader's main or prefetch
/// pipeline never share one), so it is safe to move across the thread
/// boundary a `Box<dyn Any + Send>` requires.
struct SendVideoFrame(ff::util::frame::video::Video);
unsafe impl Send for SendVideoFrame {}

pub struct FfmpegVideoDecoder {
    path: PathBuf,
    ictx: ff::format::context::Input,
    decoder: ff::decoder::video::Video,
    video_idx: usize,
    time_base: ff::Rational,
    scaler: Option<SwsContext>,
    last_pts_us: i64,
}

impl FfmpegVideoDecoder {
    pub fn open(path: &Path, video_idx: usize) -> MediaResult<Self> {
        let ictx = ff::format::input(path)
            .map_err(|e| map_ffmpeg_error(&format!("open {}", path.display()), &e))?;

        let stream = ictx
            .stream(video_idx)
            .ok_or_else(|| timebuf_core::MediaError::internal("video stream vanished between probe and open"))?;
        let time_base = stream.time_base();
        let decoder = open_decoder(&stream)?;

        Ok(Self {
            path: path.to_path_buf(),
            ictx,
            decoder,
            video_idx,
            time_base,
            scaler: None,
            last_pts_us: -1,
        })
    }
}

/// Build a fresh decoder from a stream's parameters. Reused on open and on
/// every seek: H.264/H.265 decoders retain reference-frame state across
/// seeks that a reopen avoids having to reason about, mirroring the
/// two-ictx pattern `LiveDecoder::open` and `decode_frame` both use to keep
/// decoder construction separate from the context doing the seeking.
fn open_decoder(stream: &ff::format::stream::Stream) -> MediaResult<ff::decoder::video::Video> {
    let ctx = ff::codec::context::Context::from_parameters(stream.parameters())
        .map_err(|e| map_ffmpeg_error("build video decoder context", &e))?;
    ctx.decoder()
        .video()
        .map_err(|e| map_ffmpeg_error("open video decoder", &e))
}

impl VideoDecoderHandle for FfmpegVideoDecoder {
    fn seek(&mut self, target_us: i64) -> MediaResult<()> {
        let seek_ts = target_us.saturating_mul(i64::from(ff::ffi::AV_TIME_BASE)) / 1_000_000;
        // Backward seek: lands on the keyframe at or before target_us, never
        // past it (spec §4.1 "seek: backward to keyframe at or before").
        self.ictx
            .seek(seek_ts, ..=seek_ts)
            .map_err(|e| map_ffmpeg_error(&format!("seek {}", self.path.display()), &e))?;

        let stream = self
            .ictx
            .stream(self.video_idx)
            .ok_or_else(|| timebuf_core::MediaError::internal("video stream vanished on seek"))?;
        self.decoder = open_decoder(&stream)?;
        self.last_pts_us = target_us - 1;
        Ok(())
    }

    fn next_raw(&mut self) -> MediaResult<Option<RawFrame>> {
        loop {
            let mut decoded = ff::util::frame::video::Video::empty();
            match self.decoder.receive_frame(&mut decoded) {
                Ok(()) => {
                    let pts = decoded.pts().unwrap_or(self.last_pts_us + 1);
                    let pts_us = rational_to_us(pts, self.time_base);
                    self.last_pts_us = pts_us;
                    return Ok(Some(RawFrame::new(pts_us, Box::new(SendVideoFrame(decoded)))));
                }
                Err(ff::Error::Other { errno }) if errno == EAGAIN => {
                    // Decoder wants another packet before it can produce a frame.
                }
                Err(ff::Error::Eof) => return Ok(None),
                Err(e) => return Err(map_ffmpeg_error("receive video frame", &e)),
            }

            let mut found_packet = false;
            for (stream, packet) in self.ictx.packets().flatten() {
                if stream.index() != self.video_idx {
                    continue;
                }
                self.decoder
                    .send_packet(&packet)
                    .map_err(|e| map_ffmpeg_error("send video packet", &e))?;
                found_packet = true;
                break;
            }
            if !found_packet {
                // Demuxer is exhausted; tell the decoder and drain whatever it
                // was still holding back on the next loop iteration.
                let _ = self.decoder.send_eof();
            }
        }
    }

    fn convert_to_bgra(&mut self, raw: &RawFrame) -> MediaResult<Frame> {
        let wrapped = raw.downcast::<SendVideoFrame>()?;
        let decoded = &wrapped.0;

        let (w, h) = (decoded.width(), decoded.height());
        let scaler = match &mut self.scaler {
            Some(s) => s,
            None => {
                let s = SwsContext::get(decoded.format(), w, h, Pixel::BGRA, w, h, Flags::BILINEAR)
                    .map_err(|e| map_ffmpeg_error("create swscale context", &e))?;
                self.scaler = Some(s);
                self.scaler.as_mut().unwrap()
            }
        };

        let mut out = ff::util::frame::video::Video::empty();
        scaler
            .run(decoded, &mut out)
            .map_err(|e| map_ffmpeg_error("scale to bgra", &e))?;

        let src_stride = out.stride(0);
        let dst_stride = timebuf_core::yuv::bgra_stride(w);
        let src = out.data(0);
        let mut packed = vec![0u8; dst_stride as usize * h as usize];
        let row_bytes = w as usize * 4;
        for row in 0..h as usize {
            let s = row * src_stride;
            let d = row * dst_stride as usize;
            packed[d..d + row_bytes].copy_from_slice(&src[s..s + row_bytes]);
        }

        Frame::from_cpu(w, h, dst_stride, raw.pts_us, shared_bytes(&packed))
    }
}

