// crates/timebuf-core/src/rate.rs
//
// Rational frame rates, canonical snapping, and exact frame<->microsecond
// conversion. Shared by the Reader and the Timeline Media Buffer so both
// sides of a clip boundary agree on exactly the same arithmetic.

use serde::{Deserialize, Serialize};

use crate::error::{ErrorKind, MediaError, MediaResult};

/// A frame rate expressed as a reduced-or-not rational `num/den`.
///
/// Both fields must be non-zero; use [`Rate::new`] rather than constructing
/// the struct literal directly so that invariant holds everywhere.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Rate {
    pub num: u32,
    pub den: u32,
}

impl Rate {
    pub fn new(num: u32, den: u32) -> MediaResult<Self> {
        if num == 0 || den == 0 {
            return Err(MediaError::new(
                ErrorKind::InvalidArg,
                format!("rate must have num>0 and den>0, got {num}/{den}"),
            ));
        }
        Ok(Self { num, den })
    }

    pub fn to_fps(self) -> f64 {
        self.num as f64 / self.den as f64
    }

    /// Two rates are "close" iff their fps differ by at most 0.2% relative
    /// to `b`. This treats 23.976<->24 and 29.97<->30 as interchangeable for
    /// grid-selection purposes.
    pub fn are_close(a: Rate, b: Rate) -> bool {
        let fps_b = b.to_fps();
        if fps_b == 0.0 {
            return false;
        }
        ((a.to_fps() - fps_b) / fps_b).abs() <= 0.002
    }

    /// Snap to the first canonical rate that is "close", else return `self`
    /// unchanged. Idempotent: `snap(snap(r)) == snap(r)`.
    pub fn snap_to_canonical(self) -> Rate {
        for candidate in canonical_rates::ALL {
            if Rate::are_close(self, candidate) {
                return candidate;
            }
        }
        self
    }

    /// Select the grid rate a source viewer (or clip-local coordinate
    /// system) should use: snap the clip's nominal rate, then prefer the
    /// sequence rate outright if the snapped nominal is close to it — this
    /// avoids drift between a 23.976 clip and a 24000/1001 sequence that
    /// would otherwise be treated as two "close but distinct" rates.
    ///
    /// Carried over from `original_source/emp_rate.h`'s `select_grid_rate`;
    /// the distilled spec covers canonical snapping but not this selection
    /// rule, which every clip-to-sequence rate comparison in the TMB needs.
    pub fn select_grid_rate(nominal: Rate, sequence: Rate) -> Rate {
        let snapped = nominal.snap_to_canonical();
        if Rate::are_close(snapped, sequence) {
            sequence
        } else {
            snapped
        }
    }
}

pub mod canonical_rates {
    use super::Rate;

    pub const RATE_23_976: Rate = Rate { num: 24000, den: 1001 };
    pub const RATE_24: Rate = Rate { num: 24, den: 1 };
    pub const RATE_25: Rate = Rate { num: 25, den: 1 };
    pub const RATE_29_97: Rate = Rate { num: 30000, den: 1001 };
    pub const RATE_30: Rate = Rate { num: 30, den: 1 };
    pub const RATE_50: Rate = Rate { num: 50, den: 1 };
    pub const RATE_59_94: Rate = Rate { num: 60000, den: 1001 };
    pub const RATE_60: Rate = Rate { num: 60, den: 1 };

    pub const ALL: [Rate; 8] = [
        RATE_23_976, RATE_24, RATE_25, RATE_29_97, RATE_30, RATE_50, RATE_59_94, RATE_60,
    ];
}

/// A frame index paired with the rate it is expressed at.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameTime {
    pub frame: i64,
    pub rate: Rate,
}

impl FrameTime {
    pub fn new(frame: i64, rate: Rate) -> Self {
        Self { frame, rate }
    }

    /// `floor(frame * 1_000_000 * rate.den / rate.num)`, computed with an
    /// i128 intermediate so a multi-hour timeline at 60000/1001 does not
    /// overflow i64 before the division.
    pub fn to_us(self) -> i64 {
        let num = self.frame as i128 * 1_000_000i128 * self.rate.den as i128;
        (num.div_euclid(self.rate.num as i128)) as i64
    }

    /// Inverse of [`Self::to_us`]: the largest frame index whose `to_us()`
    /// is `<= us`.
    pub fn from_us(us: i64, rate: Rate) -> Self {
        let frame = (us as i128 * rate.num as i128)
            .div_euclid(1_000_000i128 * rate.den as i128) as i64;
        Self { frame, rate }
    }
}
