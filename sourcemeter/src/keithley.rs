//! Keithley 2400 SourceMeter.
//!
//! Manual: http://research.physics.illinois.edu/bezryadin/labprotocol/Keithley2400Manual.pdf
//!
//! The instrument either sources current and senses voltage or the other way
//! around. Setpoint changes are ramped in steps of
//! [`Options::curr_step`](crate::Options) / `volt_step` while the output is
//! on, so a connected load never sees a large discontinuity. Disabling the
//! output ramps the active source to zero first.
//!
//! ```no_run
//! use sourcemeter::{Options, SourceMeter, TcpTransport};
//! # fn main() -> sourcemeter::Result<()> {
//! let addr = "192.168.1.20:1234".parse().unwrap();
//! let transport = TcpTransport::connect(addr, std::time::Duration::from_secs(3))?;
//! let mut smu = SourceMeter::new(transport, Options::default());
//! smu.initialize()?;
//! smu.set_current_source_mode(2.0)?;
//! smu.set_enabled(Some(true))?;
//! smu.set_current(10e-3)?;
//! println!("{} V", smu.measure_voltage()?);
//! smu.set_enabled(Some(false))?;
//! # Ok(())
//! # }
//! ```

use std::collections::BTreeMap;
use std::thread;

use anyhow::anyhow;
use serde::{Deserialize, Serialize};

use crate::configurable::{Configurable, ParamCache};
use crate::options::{check_step, Options};
use crate::protocol::scpi::parse_field;
use crate::protocol::{
    ParamValue, ProtocolError, Reading, Scalar, ScpiRequest, ScpiResponse, SourceMeterRequest,
    SourceMeterResponse, SourceMode, Terminal,
};
use crate::ramp;
use crate::transport::Transport;
use crate::Error;

/// Driver state that outlives a connection: the last commanded setpoints and
/// the parameter cache.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct State {
    pub latest_current: f64,
    pub latest_voltage: f64,
    pub params: BTreeMap<String, ParamValue>,
}

pub struct SourceMeter<C> {
    config: C,
    options: Options,
    latest_current: f64,
    latest_voltage: f64,
}

impl<T: Transport> SourceMeter<Configurable<T>> {
    pub fn new(transport: T, options: Options) -> Self {
        Self::with_cache(Configurable::new(transport), options)
    }

    /// A driver whose setpoints jump instead of ramping.
    pub fn no_ramp(transport: T) -> Self {
        Self::new(transport, Options::no_ramp())
    }

    pub fn transport(&self) -> &T {
        self.config.transport()
    }

    pub fn transport_mut(&mut self) -> &mut T {
        self.config.transport_mut()
    }

    pub fn into_inner(self) -> T {
        self.config.into_inner()
    }
}

fn is_on(value: &ParamValue) -> bool {
    match value.scalar() {
        Some(Scalar::Number(x)) => *x == 1.0,
        Some(Scalar::Text(x)) => matches!(x.trim().to_uppercase().as_str(), "ON" | "1"),
        None => false,
    }
}

/// Power in mW when `measured` saturates at `limit`, `None` below it.
/// `sourced` is the commanded value of the complementary quantity.
fn compliance_power(measured: f64, limit: f64, sourced: f64) -> Option<f64> {
    if measured.abs() >= limit {
        Some(measured * sourced * 1e3)
    } else {
        None
    }
}

fn check_finite(value: f64, what: &str) -> crate::Result<()> {
    if value.is_finite() {
        Ok(())
    } else {
        Err(Error::argument(anyhow!("{} must be finite, got {}", what, value)))
    }
}

impl<C: ParamCache + Transport> SourceMeter<C> {
    pub fn with_cache(config: C, options: Options) -> Self {
        Self {
            config,
            options,
            latest_current: 0.0,
            latest_voltage: 0.0,
        }
    }

    pub fn cache(&self) -> &C {
        &self.config
    }

    pub fn options(&self) -> &Options {
        &self.options
    }

    pub fn set_current_step(&mut self, step: Option<f64>) -> crate::Result<()> {
        check_step("curr_step", step, ramp::MIN_CURRENT_STEP)?;
        self.options.curr_step = step;
        Ok(())
    }

    pub fn set_voltage_step(&mut self, step: Option<f64>) -> crate::Result<()> {
        check_step("volt_step", step, ramp::MIN_VOLTAGE_STEP)?;
        self.options.volt_step = step;
        Ok(())
    }

    /// The current most recently written to the instrument, in amps.
    pub fn last_current(&self) -> f64 {
        self.latest_current
    }

    /// The voltage most recently written to the instrument, in volts.
    pub fn last_voltage(&self) -> f64 {
        self.latest_voltage
    }

    fn set_param<V: Into<Scalar>>(&mut self, key: &str, value: V) -> crate::Result<()> {
        self.config.set_config_param(key, Some(value.into()), false)
    }

    fn param_f64(&mut self, key: &str) -> crate::Result<f64> {
        let value = self.config.get_config_param(key, false)?;
        value.as_f64().ok_or_else(|| {
            Error::protocol(ProtocolError::UnexpectedResponse(format!(
                "{} is not numeric: {:?}",
                key, value
            )))
        })
    }

    /// Reset the instrument. Everything cached about it is dropped and the
    /// configured protection limits are applied again.
    pub fn initialize(&mut self) -> crate::Result<()> {
        log::debug!("Resetting instrument");
        self.config.write("*RST")?;
        self.config.invalidate();
        self.latest_current = 0.0;
        self.latest_voltage = 0.0;
        let protection_voltage = self.options.protection_voltage;
        let protection_current = self.options.protection_current;
        self.set_protection_voltage(protection_voltage)?;
        self.set_protection_current(protection_current)
    }

    pub fn identify(&mut self) -> crate::Result<String> {
        Ok(self.config.query("*IDN?")?.trim().to_string())
    }

    pub fn select_terminal(&mut self, terminal: Terminal) -> crate::Result<()> {
        self.set_param("ROUT:TERM", terminal.scpi())
    }

    /// Switch between sourcing current and sourcing voltage.
    ///
    /// The output is disabled first. Only the complementary quantity is
    /// sensed afterwards, auto-ranged, with manual resistance ranging.
    pub fn set_source_mode(&mut self, mode: SourceMode) -> crate::Result<()> {
        self.set_enabled(Some(false))?;
        let source = mode.scpi();
        let sense = mode.sensed().scpi();
        self.set_param("SOURCE:FUNC", source)?;
        self.set_param(&format!("SOURCE:{}:MODE", source), "FIXED")?;
        self.config.set_config_param("SENSE:FUNCTION:OFF:ALL", None, false)?;
        // OFF:ALL invalidates whatever was cached for ON
        self.config
            .set_config_param("SENSE:FUNCTION:ON", Some(format!("\"{}\"", sense).into()), true)?;
        self.set_param(&format!("SENSE:{}:RANGE:AUTO", sense), "ON")?;
        self.set_param("RES:MODE", "MAN")
    }

    /// Read back the sourced quantity from `SOURCE:FUNC`.
    pub fn source_mode(&mut self) -> crate::Result<SourceMode> {
        let value = self.config.get_config_param("SOURCE:FUNC", false)?;
        value
            .as_text()
            .and_then(SourceMode::from_scpi)
            .ok_or_else(|| {
                Error::protocol(ProtocolError::UnexpectedResponse(format!(
                    "SOURCE:FUNC is {:?}",
                    value
                )))
            })
    }

    pub fn set_current_source_mode(&mut self, protection_voltage: f64) -> crate::Result<()> {
        self.set_source_mode(SourceMode::Current)?;
        self.set_protection_voltage(protection_voltage)?;
        self.config_current(0.0)
    }

    pub fn set_voltage_source_mode(&mut self, protection_current: f64) -> crate::Result<()> {
        self.set_source_mode(SourceMode::Voltage)?;
        self.set_protection_current(protection_current)?;
        self.config_voltage(0.0)
    }

    fn config_current(&mut self, amps: f64) -> crate::Result<()> {
        let amps = ramp::clamp_current(amps);
        if amps != 0.0 {
            self.set_param("SOURCE:CURR:RANGE", ramp::decade_range(amps))?;
        }
        self.config.set_config_param("SOURCE:CURR", Some(amps.into()), true)?;
        self.latest_current = amps;
        self.settle();
        Ok(())
    }

    fn config_voltage(&mut self, volts: f64) -> crate::Result<()> {
        if volts != 0.0 {
            self.set_param("SOURCE:VOLT:RANGE", ramp::decade_range(volts))?;
        }
        self.config.set_config_param("SOURCE:VOLT", Some(volts.into()), true)?;
        self.latest_voltage = volts;
        self.settle();
        Ok(())
    }

    fn settle(&self) {
        let delay = self.options.step_delay();
        if !delay.is_zero() {
            thread::sleep(delay);
        }
    }

    /// Source `amps`, ramping from the previous setpoint while the output is
    /// on. Nonzero magnitudes are clamped to 1 uA ..= 1 A.
    pub fn set_current(&mut self, amps: f64) -> crate::Result<()> {
        check_finite(amps, "Current")?;
        let target = ramp::clamp_current(amps);
        if target != amps {
            log::warn!("Current setpoint of {} A is out of range, using {} A", amps, target);
        }
        let step = if self.enabled()? { self.options.curr_step } else { None };
        for amps in ramp::ramp_points(self.latest_current, target, step) {
            self.config_current(amps)?;
        }
        Ok(())
    }

    /// Source `volts`, ramping from the previous setpoint while the output is on.
    /// Targets beyond 210 V in magnitude are rejected.
    pub fn set_voltage(&mut self, volts: f64) -> crate::Result<()> {
        check_finite(volts, "Voltage")?;
        if volts.abs() > ramp::MAX_VOLTAGE {
            return Err(Error::argument(anyhow!(
                "Voltage of {} V is out of range, the limit is {} V",
                volts,
                ramp::MAX_VOLTAGE
            )));
        }
        let step = if self.enabled()? { self.options.volt_step } else { None };
        for volts in ramp::ramp_points(self.latest_voltage, volts, step) {
            self.config_voltage(volts)?;
        }
        Ok(())
    }

    pub fn current_setpoint(&mut self) -> crate::Result<f64> {
        self.param_f64("SOURCE:CURR")
    }

    pub fn voltage_setpoint(&mut self) -> crate::Result<f64> {
        self.param_f64("SOURCE:VOLT")
    }

    pub fn set_protection_voltage(&mut self, volts: f64) -> crate::Result<()> {
        check_finite(volts, "Protection voltage")?;
        self.set_param("VOLT:PROT", volts)
    }

    pub fn set_protection_current(&mut self, amps: f64) -> crate::Result<()> {
        check_finite(amps, "Protection current")?;
        self.set_param("CURR:PROT", amps)
    }

    pub fn protection_voltage(&mut self) -> crate::Result<f64> {
        self.param_f64("VOLT:PROT")
    }

    pub fn protection_current(&mut self) -> crate::Result<f64> {
        self.param_f64("CURR:PROT")
    }

    /// Check a measured voltage against the protection voltage. Returns the
    /// estimated power into the load in mW if the instrument is in compliance.
    fn voltage_compliance(&mut self, volts: f64) -> crate::Result<Option<f64>> {
        let limit = self.protection_voltage()?;
        let ret = compliance_power(volts, limit, self.latest_current);
        if let Some(mw) = ret {
            log::warn!("Compliance voltage of {} V reached", limit);
            log::warn!("Sourcing {:.3} mW into the load", mw);
        }
        Ok(ret)
    }

    fn current_compliance(&mut self, amps: f64) -> crate::Result<Option<f64>> {
        let limit = self.protection_current()?;
        let ret = compliance_power(amps, limit, self.latest_voltage);
        if let Some(mw) = ret {
            log::warn!("Compliance current of {} A reached", limit);
            log::warn!("Sourcing {:.3} mW into the load", mw);
        }
        Ok(ret)
    }

    /// Measure the voltage across the output, first field of the reading.
    pub fn measure_voltage(&mut self) -> crate::Result<f64> {
        let reply = self.config.query("MEASURE:VOLT?")?;
        let volts = parse_field(&reply, 0)?;
        self.voltage_compliance(volts)?;
        Ok(volts)
    }

    /// Measure the current through the output, second field of the reading.
    pub fn measure_current(&mut self) -> crate::Result<f64> {
        let reply = self.config.query("MEASURE:CURR?")?;
        let amps = parse_field(&reply, 1)?;
        self.current_compliance(amps)?;
        Ok(amps)
    }

    /// Measure the sensed quantity and return voltage and current of the
    /// same reading.
    pub fn measure(&mut self) -> crate::Result<Reading> {
        let sensed = self.source_mode()?.sensed();
        let reply = self.config.query(&format!("MEASURE:{}?", sensed.scpi()))?;
        let reading = Reading {
            voltage: parse_field(&reply, 0)?,
            current: parse_field(&reply, 1)?,
        };
        match sensed {
            SourceMode::Voltage => self.voltage_compliance(reading.voltage)?,
            SourceMode::Current => self.current_compliance(reading.current)?,
        };
        Ok(reading)
    }

    /// Get and optionally set the output state.
    ///
    /// Disabling ramps the active source to zero before the output is turned
    /// off. The returned state is always read from the hardware.
    pub fn set_enabled(&mut self, state: Option<bool>) -> crate::Result<bool> {
        if state == Some(false) {
            match self.source_mode() {
                Ok(SourceMode::Current) => self.set_current(0.0)?,
                Ok(SourceMode::Voltage) => self.set_voltage(0.0)?,
                Err(Error::Protocol(ProtocolError::UnexpectedResponse(x))) => {
                    log::warn!("Not ramping down before disabling output: {}", x);
                }
                Err(err) => return Err(err),
            }
        }
        if let Some(state) = state {
            let value = if state { 1.0 } else { 0.0 };
            self.config.set_config_param("OUTP:STATE", Some(value.into()), true)?;
        }
        let ret = self.config.get_config_param("OUTP:STATE", true)?;
        Ok(is_on(&ret))
    }

    pub fn enabled(&mut self) -> crate::Result<bool> {
        self.set_enabled(None)
    }

    pub fn snapshot(&self) -> State {
        State {
            latest_current: self.latest_current,
            latest_voltage: self.latest_voltage,
            params: self.config.snapshot(),
        }
    }

    pub fn restore(&mut self, state: State) {
        self.latest_current = state.latest_current;
        self.latest_voltage = state.latest_voltage;
        self.config.restore(state.params);
    }

    /// Pass a raw SCPI request to the instrument.
    ///
    /// A raw write may change any setting, so the parameter cache is dropped
    /// and the next access reads back from the hardware. A `*RST` also zeroes
    /// the commanded setpoints.
    pub fn handle_scpi(&mut self, req: ScpiRequest) -> crate::Result<ScpiResponse> {
        if let ScpiRequest::Write(cmd) = &req {
            log::debug!("Raw write `{}`, dropping cached parameters", cmd);
            self.config.invalidate();
            if cmd.split(';').any(|x| x.trim().eq_ignore_ascii_case("*RST")) {
                self.latest_current = 0.0;
                self.latest_voltage = 0.0;
            }
        }
        self.config.handle(req)
    }

    pub fn handle(&mut self, req: SourceMeterRequest) -> crate::Result<SourceMeterResponse> {
        use SourceMeterResponse::{Done, Value};
        match req {
            SourceMeterRequest::Initialize => self.initialize().map(|_| Done),
            SourceMeterRequest::SelectTerminal(x) => self.select_terminal(x).map(|_| Done),
            SourceMeterRequest::SetSourceMode(x) => self.set_source_mode(x).map(|_| Done),
            SourceMeterRequest::SetCurrentSourceMode { protection_voltage } => {
                self.set_current_source_mode(protection_voltage).map(|_| Done)
            }
            SourceMeterRequest::SetVoltageSourceMode { protection_current } => {
                self.set_voltage_source_mode(protection_current).map(|_| Done)
            }
            SourceMeterRequest::SetCurrent(x) => self.set_current(x).map(|_| Done),
            SourceMeterRequest::SetVoltage(x) => self.set_voltage(x).map(|_| Done),
            SourceMeterRequest::GetCurrent => self.current_setpoint().map(Value),
            SourceMeterRequest::GetVoltage => self.voltage_setpoint().map(Value),
            SourceMeterRequest::SetProtectionVoltage(x) => self.set_protection_voltage(x).map(|_| Done),
            SourceMeterRequest::SetProtectionCurrent(x) => self.set_protection_current(x).map(|_| Done),
            SourceMeterRequest::GetProtectionVoltage => self.protection_voltage().map(Value),
            SourceMeterRequest::GetProtectionCurrent => self.protection_current().map(Value),
            SourceMeterRequest::MeasureVoltage => self.measure_voltage().map(Value),
            SourceMeterRequest::MeasureCurrent => self.measure_current().map(Value),
            SourceMeterRequest::Measure => self.measure().map(SourceMeterResponse::Reading),
            SourceMeterRequest::SetEnabled(x) => self.set_enabled(x).map(SourceMeterResponse::Enabled),
            SourceMeterRequest::Identify => self.identify().map(SourceMeterResponse::Text),
            SourceMeterRequest::Scpi(x) => self.handle_scpi(x).map(SourceMeterResponse::Scpi),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::Loopback;

    fn ramping(curr_step: f64, volt_step: f64) -> Options {
        Options {
            curr_step: Some(curr_step),
            volt_step: Some(volt_step),
            ..Default::default()
        }
    }

    fn source_writes<'a>(smu: &'a SourceMeter<Configurable<Loopback>>, key: &str) -> Vec<&'a str> {
        let prefix = format!("{} ", key);
        smu.transport()
            .writes()
            .into_iter()
            .filter(|x| x.starts_with(&prefix))
            .collect()
    }

    #[test]
    fn initialize_resets_and_applies_protection() {
        let mut smu = SourceMeter::new(Loopback::new(), Options::default());
        smu.initialize().unwrap();
        assert_eq!(smu.transport().writes(), vec!["*RST", "VOLT:PROT 4", "CURR:PROT 0.2"]);
        assert_eq!(smu.protection_voltage().unwrap(), 4.0);
        assert_eq!(smu.protection_current().unwrap(), 0.2);
    }

    #[test]
    fn terminal_selection() {
        let mut smu = SourceMeter::new(Loopback::new(), Options::default());
        smu.select_terminal(Terminal::Rear).unwrap();
        smu.select_terminal("front".parse().unwrap()).unwrap();
        assert_eq!(smu.transport().writes(), vec!["ROUT:TERM REAR", "ROUT:TERM FRON"]);
    }

    #[test]
    fn source_mode_switch_sequence() {
        let mut smu = SourceMeter::new(Loopback::new(), Options::default());
        smu.set_source_mode(SourceMode::Current).unwrap();
        let writes = smu.transport().writes();
        assert_eq!(
            &writes[writes.len() - 6..],
            &[
                "SOURCE:FUNC CURR",
                "SOURCE:CURR:MODE FIXED",
                "SENSE:FUNCTION:OFF:ALL",
                "SENSE:FUNCTION:ON \"VOLT\"",
                "SENSE:VOLT:RANGE:AUTO ON",
                "RES:MODE MAN",
            ]
        );
        let disable = writes.iter().position(|x| *x == "OUTP:STATE 0").unwrap();
        assert!(disable < writes.len() - 6);
        assert_eq!(smu.source_mode().unwrap(), SourceMode::Current);

        smu.set_source_mode(SourceMode::Voltage).unwrap();
        smu.set_source_mode(SourceMode::Current).unwrap();
        // mode and ranging params are cached, only the sense selection is rewritten
        let writes = smu.transport().writes();
        assert_eq!(writes.last(), Some(&"SENSE:FUNCTION:ON \"VOLT\""));
    }

    #[test]
    fn current_source_mode_resets_setpoint() {
        let mut smu = SourceMeter::new(Loopback::new(), Options::default());
        smu.set_current_source_mode(2.0).unwrap();
        let writes = smu.transport().writes();
        assert_eq!(&writes[writes.len() - 2..], &["VOLT:PROT 2", "SOURCE:CURR 0"]);
        assert_eq!(smu.last_current(), 0.0);
        assert_eq!(smu.protection_voltage().unwrap(), 2.0);
    }

    #[test]
    fn voltage_source_mode_resets_setpoint() {
        let mut smu = SourceMeter::new(Loopback::new(), Options::default());
        smu.set_voltage_source_mode(0.05).unwrap();
        let writes = smu.transport().writes();
        assert_eq!(&writes[writes.len() - 2..], &["CURR:PROT 0.05", "SOURCE:VOLT 0"]);
        assert_eq!(smu.source_mode().unwrap(), SourceMode::Voltage);
    }

    #[test]
    fn disabled_output_jumps() {
        let mut smu = SourceMeter::new(Loopback::new(), ramping(0.001, 0.1));
        smu.set_current(0.5).unwrap();
        assert_eq!(source_writes(&smu, "SOURCE:CURR"), vec!["SOURCE:CURR 0.5"]);
        assert_eq!(source_writes(&smu, "SOURCE:CURR:RANGE"), vec!["SOURCE:CURR:RANGE 1"]);
        assert_eq!(smu.last_current(), 0.5);
    }

    #[test]
    fn no_ramp_jumps_with_output_on() {
        let mut smu = SourceMeter::no_ramp(Loopback::new());
        smu.set_enabled(Some(true)).unwrap();
        smu.set_current(0.75).unwrap();
        assert_eq!(source_writes(&smu, "SOURCE:CURR"), vec!["SOURCE:CURR 0.75"]);
    }

    #[test]
    fn enabled_output_ramps() {
        let mut smu = SourceMeter::new(Loopback::new(), ramping(0.25, 0.1));
        smu.set_enabled(Some(true)).unwrap();
        smu.set_current(1.0).unwrap();
        assert_eq!(
            source_writes(&smu, "SOURCE:CURR"),
            vec!["SOURCE:CURR 0.25", "SOURCE:CURR 0.5", "SOURCE:CURR 0.75", "SOURCE:CURR 1"]
        );
        // the range is only rewritten when it changes
        assert_eq!(source_writes(&smu, "SOURCE:CURR:RANGE"), vec!["SOURCE:CURR:RANGE 1"]);
    }

    #[test]
    fn current_is_clamped() {
        let mut smu = SourceMeter::no_ramp(Loopback::new());
        smu.set_current(5.0).unwrap();
        smu.set_current(-1e-9).unwrap();
        smu.set_current(-0.0025).unwrap();
        assert_eq!(
            source_writes(&smu, "SOURCE:CURR"),
            vec!["SOURCE:CURR 1", "SOURCE:CURR -0.000001", "SOURCE:CURR -0.0025"]
        );
        assert_eq!(
            source_writes(&smu, "SOURCE:CURR:RANGE"),
            vec!["SOURCE:CURR:RANGE 1", "SOURCE:CURR:RANGE 0.000001", "SOURCE:CURR:RANGE 0.01"]
        );
        assert_eq!(smu.last_current(), -0.0025);
    }

    #[test]
    fn non_finite_setpoint_is_rejected() {
        let mut smu = SourceMeter::no_ramp(Loopback::new());
        assert!(smu.set_current(f64::NAN).unwrap_err().is_argument());
        assert!(smu.set_voltage(f64::INFINITY).unwrap_err().is_argument());
        assert!(smu.transport().writes().is_empty());
    }

    #[test]
    fn voltage_ramp_tracks_voltage() {
        let mut smu = SourceMeter::new(Loopback::new(), ramping(0.001, 0.5));
        smu.set_enabled(Some(true)).unwrap();
        smu.set_voltage(1.0).unwrap();
        assert_eq!(smu.last_voltage(), 1.0);
        assert_eq!(smu.last_current(), 0.0);
        smu.set_voltage(2.0).unwrap();
        assert_eq!(
            source_writes(&smu, "SOURCE:VOLT"),
            vec!["SOURCE:VOLT 0.5", "SOURCE:VOLT 1", "SOURCE:VOLT 1.5", "SOURCE:VOLT 2"]
        );
        assert!(source_writes(&smu, "SOURCE:CURR").is_empty());
        assert_eq!(
            source_writes(&smu, "SOURCE:VOLT:RANGE"),
            vec!["SOURCE:VOLT:RANGE 1", "SOURCE:VOLT:RANGE 10"]
        );
        assert_eq!(smu.voltage_setpoint().unwrap(), 2.0);
    }

    #[test]
    fn disabling_ramps_current_down_first() {
        let mut smu = SourceMeter::new(Loopback::new(), ramping(0.25, 0.1));
        smu.set_current_source_mode(4.0).unwrap();
        smu.set_enabled(Some(true)).unwrap();
        smu.set_current(1.0).unwrap();
        smu.transport_mut().clear_history();

        assert!(!smu.set_enabled(Some(false)).unwrap());
        assert_eq!(
            smu.transport().writes(),
            vec![
                "SOURCE:CURR 0.75",
                "SOURCE:CURR 0.5",
                "SOURCE:CURR 0.25",
                "SOURCE:CURR 0",
                "OUTP:STATE 0",
            ]
        );
        assert_eq!(smu.last_current(), 0.0);
    }

    #[test]
    fn disabling_in_voltage_mode_ramps_voltage() {
        let mut smu = SourceMeter::new(Loopback::new(), ramping(0.001, 0.5));
        smu.set_voltage_source_mode(0.1).unwrap();
        smu.set_enabled(Some(true)).unwrap();
        smu.set_voltage(1.0).unwrap();
        smu.transport_mut().clear_history();

        smu.set_enabled(Some(false)).unwrap();
        assert_eq!(
            smu.transport().writes(),
            vec!["SOURCE:VOLT 0.5", "SOURCE:VOLT 0", "OUTP:STATE 0"]
        );
    }

    #[test]
    fn enabled_getter_never_writes() {
        let mut smu = SourceMeter::new(Loopback::new(), Options::default());
        assert!(!smu.enabled().unwrap());
        assert!(!smu.set_enabled(None).unwrap());
        assert_eq!(
            smu.transport().history(),
            &[
                ScpiRequest::QueryString("OUTP:STATE?".to_string()),
                ScpiRequest::QueryString("OUTP:STATE?".to_string()),
            ]
        );
    }

    #[test]
    fn on_states() {
        let mut smu = SourceMeter::new(Loopback::new(), Options::default());
        smu.transport_mut().set_reply("OUTP:STATE?", "ON");
        assert!(smu.enabled().unwrap());
        smu.transport_mut().set_reply("OUTP:STATE?", "1");
        assert!(smu.enabled().unwrap());
        smu.transport_mut().set_reply("OUTP:STATE?", "OFF");
        assert!(!smu.enabled().unwrap());
    }

    #[test]
    fn measurement_fields() {
        let mut lb = Loopback::new();
        lb.set_reply("MEASURE:VOLT?", "1.5,0.02");
        lb.set_reply("MEASURE:CURR?", "1.5,0.02");
        let mut smu = SourceMeter::new(lb, Options::default());
        assert_eq!(smu.measure_voltage().unwrap(), 1.5);
        assert_eq!(smu.measure_current().unwrap(), 0.02);
    }

    #[test]
    fn compliance_still_returns_value() {
        let mut smu = SourceMeter::new(Loopback::with_reading(4.0, 0.001), Options::default());
        smu.set_protection_voltage(1.0).unwrap();
        assert_eq!(smu.measure_voltage().unwrap(), 4.0);
    }

    #[test]
    fn malformed_reading() {
        let mut lb = Loopback::new();
        lb.set_reply("MEASURE:CURR?", "1.5");
        lb.set_reply("MEASURE:VOLT?", "OVERFLOW,1");
        let mut smu = SourceMeter::new(lb, Options::default());
        assert!(smu.measure_current().unwrap_err().is_parse());
        assert!(smu.measure_voltage().unwrap_err().is_parse());
    }

    #[test]
    fn combined_reading() {
        let mut smu = SourceMeter::new(Loopback::with_reading(2.0, 0.5), Options::default());
        smu.set_current_source_mode(4.0).unwrap();
        smu.transport_mut().clear_history();
        let reading = smu.measure().unwrap();
        assert_eq!(reading.voltage, 2.0);
        assert_eq!(reading.current, 0.5);
        assert_eq!(reading.resistance(), 4.0);
        assert_eq!(
            smu.transport().history()[0],
            ScpiRequest::QueryString("MEASURE:VOLT?".to_string())
        );
    }

    #[test]
    fn setpoint_from_channel_mapping() {
        let mut smu = SourceMeter::new(Loopback::new(), Options::default());
        let state: State = serde_json::from_str(
            r#"{"latest_current": 0.3, "latest_voltage": 0.0,
                "params": {"SOURCE:CURR": {"&": 0.3, "1": 0.3}}}"#,
        )
        .unwrap();
        smu.restore(state);
        assert_eq!(smu.current_setpoint().unwrap(), 0.3);
        assert_eq!(smu.last_current(), 0.3);
        assert!(smu.transport().history().is_empty());
    }

    #[test]
    fn snapshot_continues_ramp() {
        let mut smu = SourceMeter::new(Loopback::new(), ramping(0.25, 0.1));
        smu.set_enabled(Some(true)).unwrap();
        smu.set_current(0.5).unwrap();
        let state = smu.snapshot();

        let mut lb = smu.into_inner();
        lb.clear_history();
        let mut smu = SourceMeter::new(lb, ramping(0.25, 0.1));
        smu.restore(state);
        smu.set_current(1.0).unwrap();
        assert_eq!(
            source_writes(&smu, "SOURCE:CURR"),
            vec!["SOURCE:CURR 0.75", "SOURCE:CURR 1"]
        );
    }

    #[test]
    fn requests_dispatch() {
        let mut smu = SourceMeter::new(Loopback::with_reading(1.5, 0.02), Options::default());
        assert_eq!(
            smu.handle(SourceMeterRequest::MeasureCurrent).unwrap(),
            SourceMeterResponse::Value(0.02)
        );
        assert_eq!(
            smu.handle(SourceMeterRequest::SetEnabled(Some(true))).unwrap(),
            SourceMeterResponse::Enabled(true)
        );
        match smu.handle(SourceMeterRequest::Identify).unwrap() {
            SourceMeterResponse::Text(x) => assert!(x.contains("MODEL 2400")),
            x => panic!("{:?}", x),
        }
    }

    #[test]
    fn compliance_power_estimate() {
        assert_eq!(compliance_power(4.0, 4.0, 0.25), Some(1000.0));
        assert_eq!(compliance_power(3.9, 4.0, 0.25), None);
        assert_eq!(compliance_power(-4.5, 4.0, 0.25), Some(-1125.0));
    }

    #[test]
    fn voltage_compliance_uses_commanded_current() {
        let mut smu = SourceMeter::no_ramp(Loopback::new());
        smu.set_current_source_mode(4.0).unwrap();
        smu.set_current(0.25).unwrap();
        assert_eq!(smu.voltage_compliance(4.0).unwrap(), Some(1000.0));
        assert_eq!(smu.voltage_compliance(-4.0).unwrap(), Some(-1000.0));
        assert_eq!(smu.voltage_compliance(3.5).unwrap(), None);
    }

    #[test]
    fn current_compliance_uses_commanded_voltage() {
        let mut smu = SourceMeter::no_ramp(Loopback::new());
        smu.set_voltage_source_mode(0.5).unwrap();
        smu.set_voltage(2.0).unwrap();
        assert_eq!(smu.current_compliance(0.5).unwrap(), Some(1000.0));
        assert_eq!(smu.current_compliance(-0.75).unwrap(), Some(-1500.0));
        assert_eq!(smu.current_compliance(0.25).unwrap(), None);
    }

    #[test]
    fn raw_write_drops_cached_limits() {
        let mut smu = SourceMeter::new(Loopback::new(), Options::default());
        smu.set_protection_voltage(4.0).unwrap();
        smu.handle(SourceMeterRequest::Scpi(ScpiRequest::Write("VOLT:PROT 20".to_string())))
            .unwrap();
        assert_eq!(smu.protection_voltage().unwrap(), 20.0);
        smu.set_protection_voltage(4.0).unwrap();
        assert_eq!(smu.transport().param("VOLT:PROT"), Some("4"));
    }

    #[test]
    fn raw_reset_drops_source_mode() {
        let mut smu = SourceMeter::new(Loopback::new(), ramping(0.25, 0.1));
        smu.set_current_source_mode(4.0).unwrap();
        smu.set_enabled(Some(true)).unwrap();
        smu.set_current(0.5).unwrap();

        smu.handle(SourceMeterRequest::Scpi(ScpiRequest::Write("*RST".to_string())))
            .unwrap();
        assert_eq!(smu.transport().param("SOURCE:FUNC"), Some("VOLT"));
        assert_eq!(smu.source_mode().unwrap(), SourceMode::Voltage);
        assert_eq!(smu.last_current(), 0.0);

        smu.transport_mut().clear_history();
        assert!(!smu.set_enabled(Some(false)).unwrap());
        assert_eq!(smu.transport().writes(), vec!["SOURCE:VOLT 0", "OUTP:STATE 0"]);
    }

    #[test]
    fn raw_query_keeps_cache() {
        let mut smu = SourceMeter::new(Loopback::new(), Options::default());
        smu.set_protection_voltage(4.0).unwrap();
        smu.handle_scpi(ScpiRequest::QueryString("VOLT:PROT?".to_string()))
            .unwrap();
        smu.set_protection_voltage(4.0).unwrap();
        assert_eq!(smu.transport().writes(), vec!["VOLT:PROT 4"]);
    }

    #[test]
    fn voltage_target_and_steps_are_bounded() {
        let mut smu = SourceMeter::new(Loopback::new(), Options::default());
        assert!(smu.set_voltage(1e9).unwrap_err().is_argument());
        assert!(smu.set_voltage(-210.5).unwrap_err().is_argument());
        assert!(smu.set_current_step(Some(1e-300)).unwrap_err().is_argument());
        assert!(smu.set_voltage_step(Some(0.0)).unwrap_err().is_argument());
        assert_eq!(smu.options().curr_step, Some(1e-3));
        assert!(smu.transport().history().is_empty());

        smu.set_voltage_step(None).unwrap();
        smu.set_voltage(210.0).unwrap();
        assert!(smu.transport().writes().contains(&"SOURCE:VOLT 210"));
    }
}
