use std::fs;
use std::path::Path;
use std::time::Duration;

use anyhow::anyhow;
use serde::{Deserialize, Serialize};

use crate::ramp;
use crate::Error;

/// Construction options of a [`SourceMeter`](crate::SourceMeter).
///
/// Step sizes of `None` disable ramping: setpoint changes jump straight to
/// the target.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Options {
    /// Compliance voltage in volts, applied by `initialize()`.
    pub protection_voltage: f64,
    /// Compliance current in amps, applied by `initialize()`.
    pub protection_current: f64,
    pub curr_step: Option<f64>,
    pub volt_step: Option<f64>,
    /// Settling time after each written setpoint.
    pub step_delay_ms: u64,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            protection_voltage: 4.0,
            protection_current: 200e-3,
            curr_step: Some(1.0e-3),
            volt_step: Some(0.1),
            step_delay_ms: 0,
        }
    }
}

impl Options {
    /// Same defaults, but setpoints are never ramped.
    pub fn no_ramp() -> Self {
        Self {
            curr_step: None,
            volt_step: None,
            ..Default::default()
        }
    }

    pub fn step_delay(&self) -> Duration {
        Duration::from_millis(self.step_delay_ms)
    }

    /// Read options from a JSON file. Missing fields take their default.
    pub fn load<P: AsRef<Path>>(path: P) -> crate::Result<Self> {
        let path = path.as_ref();
        let data = fs::read_to_string(path).map_err(Error::transport)?;
        let ret: Options = serde_json::from_str(&data)
            .map_err(|err| Error::argument(anyhow!("Invalid options in {}: {}", path.display(), err)))?;
        ret.validate()?;
        Ok(ret)
    }

    pub fn validate(&self) -> crate::Result<()> {
        check_step("curr_step", self.curr_step, ramp::MIN_CURRENT_STEP)?;
        check_step("volt_step", self.volt_step, ramp::MIN_VOLTAGE_STEP)?;
        if !(self.protection_voltage > 0.0 && self.protection_current > 0.0) {
            return Err(Error::argument(anyhow!("Protection limits must be positive")));
        }
        Ok(())
    }
}

/// A ramp step must be finite and at least `min`.
pub(crate) fn check_step(name: &str, step: Option<f64>, min: f64) -> crate::Result<()> {
    match step {
        Some(step) if !(step.is_finite() && step >= min) => Err(Error::argument(anyhow!(
            "`{}` must be at least {}, got {}",
            name,
            min,
            step
        ))),
        _ => Ok(()),
    }
}
