// crates/timebuf-media/src/tmb/audio_conform.rs
//
// Speed-ratio conforming for clip audio (spec §4.3 "Audio (timeline
// coordinate)" step 5). A clip running at `speed_ratio != 1.0` decodes a
// source-time window that is `1/speed_ratio` of the requested timeline
// duration; this resamples the decoded chunk onto the timeline grid. v1 is
// resample-only, per the spec's explicit decision against time-stretch.

use timebuf_core::{MediaResult, PcmChunk};

const SPEED_EPSILON: f64 = 1e-6;

/// Conform `chunk` (decoded from source time) onto a `target_frames`-long
/// window starting at `new_start_us` on the timeline.
pub fn conform(chunk: PcmChunk, speed_ratio: f64, target_frames: usize, new_start_us: i64) -> MediaResult<PcmChunk> {
    if chunk.frames == 0 || target_frames == 0 {
        return Ok(PcmChunk::empty(chunk.sample_rate, new_start_us));
    }
    let resampled = if (speed_ratio - 1.0).abs() <= SPEED_EPSILON && chunk.frames == target_frames {
        chunk.data.to_vec()
    } else {
        linear_resample_stereo(&chunk.data, chunk.frames, target_frames)
    };
    PcmChunk::new(chunk.sample_rate, new_start_us, resampled.into())
}

/// Linear-interpolation resample of interleaved stereo F32 from
/// `src_frames` to `dst_frames`. Not a high-quality resampler (no
/// anti-aliasing filter) — adequate for the speed ratios a clip-to-sequence
/// rate mismatch produces (typically within a few percent of 1.0), and
/// matches the spec's "v1 may resample-only" scope rather than a full
/// time-stretch engine (explicitly out of scope, see original §1).
fn linear_resample_stereo(data: &[f32], src_frames: usize, dst_frames: usize) -> Vec<f32> {
    if src_frames == dst_frames {
        return data.to_vec();
    }
    let mut out = Vec::with_capacity(dst_frames * 2);
    let scale = (src_frames - 1).max(1) as f64 / (dst_frames.max(1) - 1).max(1) as f64;
    for i in 0..dst_frames {
        let src_pos = i as f64 * scale;
        let i0 = src_pos.floor() as usize;
        let i1 = (i0 + 1).min(src_frames - 1);
        let frac = (src_pos - i0 as f64) as f32;
        for ch in 0..2 {
            let a = data[i0 * 2 + ch];
            let b = data[i1 * 2 + ch];
            out.push(a + (b - a) * frac);
        }
    }
    out
}
