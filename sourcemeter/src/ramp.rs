//! Setpoint arithmetic: current clamping, range selection and ramp points.

/// Smallest current magnitude the driver will source, in amps.
pub const MIN_CURRENT: f64 = 1e-6;
/// Largest current magnitude the driver will source, in amps.
pub const MAX_CURRENT: f64 = 1.0;
/// Largest voltage magnitude the instrument can source, in volts.
pub const MAX_VOLTAGE: f64 = 210.0;
/// Smallest current ramp step, in amps.
pub const MIN_CURRENT_STEP: f64 = 1e-9;
/// Smallest voltage ramp step, in volts.
pub const MIN_VOLTAGE_STEP: f64 = 1e-6;

/// Clamp the magnitude of a nonzero current to `[MIN_CURRENT, MAX_CURRENT]`,
/// keeping its sign. Zero is passed through.
pub fn clamp_current(amps: f64) -> f64 {
    if amps == 0.0 {
        return 0.0;
    }
    amps.signum() * amps.abs().clamp(MIN_CURRENT, MAX_CURRENT)
}

// exact for |exp| <= 22
fn power_of_ten(exp: i32) -> f64 {
    if exp >= 0 {
        10f64.powi(exp)
    } else {
        1.0 / 10f64.powi(-exp)
    }
}

/// The smallest power of ten not less than `|value|`.
///
/// Returns `0.0` for zero and non-finite input, which have no range.
pub fn decade_range(value: f64) -> f64 {
    let magnitude = value.abs();
    if magnitude == 0.0 || !magnitude.is_finite() {
        return 0.0;
    }
    // log10 may be off by one ulp at exact powers of ten
    let mut exp = magnitude.log10().ceil() as i32;
    while power_of_ten(exp) < magnitude {
        exp += 1;
    }
    while power_of_ten(exp - 1) >= magnitude {
        exp -= 1;
    }
    power_of_ten(exp)
}

/// The values to write when moving a setpoint from `from` to `to`.
///
/// Without a step (or with a non-positive one) this is just `[to]`. Otherwise
/// `floor(|from - to| / step)` equally spaced points, excluding `from` and
/// ending exactly at `to`. A change smaller than one step is a single jump to
/// `to`, so the target is always reached.
pub fn ramp_points(from: f64, to: f64, step: Option<f64>) -> Ramp {
    let n = match step {
        // saturating cast
        Some(step) if step > 0.0 => ((from - to).abs() / step).floor() as u64,
        _ => 1,
    };
    let n = if n == 0 && from != to { 1 } else { n };
    Ramp { from, to, n, i: 0 }
}

/// Iterator over the points of a setpoint ramp, see [`ramp_points`].
#[derive(Clone, Debug)]
pub struct Ramp {
    from: f64,
    to: f64,
    n: u64,
    i: u64,
}

impl Iterator for Ramp {
    type Item = f64;

    fn next(&mut self) -> Option<f64> {
        if self.i >= self.n {
            return None;
        }
        self.i += 1;
        if self.i == self.n {
            Some(self.to)
        } else {
            Some(self.from + (self.to - self.from) * (self.i as f64) / (self.n as f64))
        }
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let left = self.n - self.i;
        if left > usize::MAX as u64 {
            (usize::MAX, None)
        } else {
            (left as usize, Some(left as usize))
        }
    }
}
