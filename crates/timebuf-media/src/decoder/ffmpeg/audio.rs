// crates/timebuf-media/src/decoder/ffmpeg/audio.rs
//
// FfmpegAudioDecoder: demuxer + audio decoder + lazily (re)built resampler,
// grounded on the resample path in velocut-media::encode.rs (the
// `audio_resampler.get_or_insert_with` block) — generalized from "always
// resample to FLTP stereo 44100" to "resample to whatever sample rate the
// caller's `reset_resampler` asks for", since TMB's speed-ratio conforming
// (spec §4.3) can change the destination rate per range request.

use std::path::{Path, PathBuf};

use ffmpeg_the_third as ff;
use ffmpeg_the_third::software::resampling;
use ffmpeg_the_third::util::channel_layout::ChannelLayout;
use ffmpeg_the_third::util::format::sample::{Sample, Type as SampleType};
use ffmpeg_the_third::util::frame::audio::Audio as AudioFrame;

use timebuf_core::MediaResult;

use super::{map_ffmpeg_error, rational_to_us};
use crate::decoder::{AudioDecoderHandle, RawAudio};

const EAGAIN: i32 = 11;

struct SendAudioFrame(AudioFrame);
unsafe impl Send for SendAudioFrame {}

pub struct FfmpegAudioDecoder {
    path: PathBuf,
    ictx: ff::format::context::Input,
    decoder: ff::decoder::audio::Audio,
    audio_idx: usize,
    time_base: ff::Rational,
    resampler: Option<resampling::Context>,
    dst_rate: u32,
    last_pts_us: i64,
}

impl FfmpegAudioDecoder {
    pub fn open(path: &Path, audio_idx: usize) -> MediaResult<Self> {
        let ictx = ff::format::input(path)
            .map_err(|e| map_ffmpeg_error(&format!("open {}", path.display()), &e))?;

        let stream = ictx
            .stream(audio_idx)
            .ok_or_else(|| timebuf_core::MediaError::internal("audio stream vanished between probe and open"))?;
        let time_base = stream.time_base();
        let decoder = open_decoder(&stream)?;

        Ok(Self {
            path: path.to_path_buf(),
            ictx,
            decoder,
            audio_idx,
            time_base,
            resampler: None,
            dst_rate: 0,
            last_pts_us: -1,
        })
    }
}

fn open_decoder(stream: &ff::format::stream::Stream) -> MediaResult<ff::decoder::audio::Audio> {
    let ctx = ff::codec::context::Context::from_parameters(stream.parameters())
        .map_err(|e| map_ffmpeg_error("build audio decoder context", &e))?;
    ctx.decoder()
        .audio()
        .map_err(|e| map_ffmpeg_error("open audio decoder", &e))
}

impl AudioDecoderHandle for FfmpegAudioDecoder {
    fn seek(&mut self, target_us: i64) -> MediaResult<()> {
        let seek_ts = target_us.saturating_mul(i64::from(ff::ffi::AV_TIME_BASE)) / 1_000_000;
        self.ictx
            .seek(seek_ts, ..=seek_ts)
            .map_err(|e| map_ffmpeg_error(&format!("seek {}", self.path.display()), &e))?;

        let stream = self
            .ictx
            .stream(self.audio_idx)
            .ok_or_else(|| timebuf_core::MediaError::internal("audio stream vanished on seek"))?;
        self.decoder = open_decoder(&stream)?;
        self.last_pts_us = target_us - 1;
        Ok(())
    }

    fn next_raw(&mut self) -> MediaResult<Option<RawAudio>> {
        loop {
            let mut decoded = AudioFrame::empty();
            match self.decoder.receive_frame(&mut decoded) {
                Ok(()) => {
                    let pts = decoded.pts().unwrap_or(self.last_pts_us + 1);
                    let pts_us = rational_to_us(pts, self.time_base);
                    self.last_pts_us = pts_us;
                    let duration_us = if decoded.rate() > 0 {
                        (decoded.samples() as i64 * 1_000_000) / i64::from(decoded.rate())
                    } else {
                        0
                    };
                    return Ok(Some(RawAudio::new(pts_us, duration_us, Box::new(SendAudioFrame(decoded)))));
                }
                Err(ff::Error::Other { errno }) if errno == EAGAIN => {}
                Err(ff::Error::Eof) => return Ok(None),
                Err(e) => return Err(map_ffmpeg_error("receive audio frame", &e)),
            }

            let mut found_packet = false;
            for (stream, packet) in self.ictx.packets().flatten() {
                if stream.index() != self.audio_idx {
                    continue;
                }
                self.decoder
                    .send_packet(&packet)
                    .map_err(|e| map_ffmpeg_error("send audio packet", &e))?;
                found_packet = true;
                break;
            }
            if !found_packet {
                let _ = self.decoder.send_eof();
            }
        }
    }

    fn reset_resampler(&mut self, dst_rate: u32) -> MediaResult<()> {
        self.resampler = None;
        self.dst_rate = dst_rate;
        Ok(())
    }

    fn resample(&mut self, raw: &RawAudio) -> MediaResult<Vec<f32>> {
        let wrapped = raw.downcast::<SendAudioFrame>()?;
        let frame = &wrapped.0;

        let target_fmt = Sample::F32(SampleType::Packed);
        let src_channels = frame.ch_layout().channels();
        let needs_resample =
            frame.format() != target_fmt || frame.rate() != self.dst_rate || src_channels != 2;

        if !needs_resample {
            return Ok(interleaved_f32(frame));
        }

        if self.resampler.is_none() {
            // Mono sources must be declared MONO explicitly or swr misreads
            // the channel layout (velocut-media::encode.rs's audio resample
            // path hits the same gotcha).
            let src_layout = if src_channels >= 2 {
                frame.ch_layout()
            } else {
                ChannelLayout::MONO
            };
            let ctx = resampling::Context::get2(
                frame.format(),
                src_layout,
                frame.rate(),
                target_fmt,
                ChannelLayout::STEREO,
                self.dst_rate,
            )
            .map_err(|e| map_ffmpeg_error("create audio resampler", &e))?;
            self.resampler = Some(ctx);
        }

        let rs = self.resampler.as_mut().unwrap();
        let mut out = AudioFrame::empty();
        rs.run(frame, &mut out)
            .map_err(|e| map_ffmpeg_error("resample audio frame", &e))?;
        Ok(interleaved_f32(&out))
    }

    fn flush_resampler(&mut self) -> MediaResult<Vec<f32>> {
        let Some(rs) = self.resampler.as_mut() else {
            return Ok(Vec::new());
        };
        let mut out = AudioFrame::empty();
        match rs.flush(&mut out) {
            Ok(_) => Ok(interleaved_f32(&out)),
            Err(ff::Error::Eof) => Ok(Vec::new()),
            Err(e) => Err(map_ffmpeg_error("flush audio resampler", &e)),
        }
    }
}

/// Pull interleaved stereo F32 samples out of a packed-format audio frame.
fn interleaved_f32(frame: &AudioFrame) -> Vec<f32> {
    if frame.samples() == 0 {
        return Vec::new();
    }
    let bytes = frame.data(0);
    let channels = frame.ch_layout().channels().max(1) as usize;
    let want = frame.samples() * channels;
    let mut out = Vec::with_capacity(want);
    for i in 0..want.min(bytes.len() / 4) {
        let b = [bytes[i * 4], bytes[i * 4 + 1], bytes[i * 4 + 2], bytes[i * 4 + 3]];
        out.push(f32::from_le_bytes(b));
    }
    out
}
