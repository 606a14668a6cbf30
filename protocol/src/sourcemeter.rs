use std::fmt;
use std::str::FromStr;

use anyhow::anyhow;
use serde::{Deserialize, Serialize};

use crate::scpi::{ScpiRequest, ScpiResponse};
use crate::Error;

/// Physical output terminals of the instrument.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Terminal {
    Front,
    Rear,
}

impl Terminal {
    pub fn scpi(&self) -> &'static str {
        match self {
            Terminal::Front => "FRON",
            Terminal::Rear => "REAR",
        }
    }
}

impl FromStr for Terminal {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "front" | "fron" => Ok(Terminal::Front),
            "rear" => Ok(Terminal::Rear),
            _ => Err(Error::argument(anyhow!(
                "Invalid terminal `{}`, expected `front` or `rear`",
                s
            ))),
        }
    }
}

impl fmt::Display for Terminal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Terminal::Front => f.write_str("front"),
            Terminal::Rear => f.write_str("rear"),
        }
    }
}

/// The sourced quantity. The sensed quantity is always the other one.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum SourceMode {
    Current,
    Voltage,
}

impl SourceMode {
    pub fn scpi(&self) -> &'static str {
        match self {
            SourceMode::Current => "CURR",
            SourceMode::Voltage => "VOLT",
        }
    }

    pub fn sensed(&self) -> SourceMode {
        match self {
            SourceMode::Current => SourceMode::Voltage,
            SourceMode::Voltage => SourceMode::Current,
        }
    }

    pub fn from_scpi(s: &str) -> Option<Self> {
        match s.trim().trim_matches('"').to_uppercase().as_str() {
            "CURR" | "CURRENT" => Some(SourceMode::Current),
            "VOLT" | "VOLTAGE" => Some(SourceMode::Voltage),
            _ => None,
        }
    }
}

/// Voltage and current of a single measurement.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Reading {
    pub voltage: f64,
    pub current: f64,
}

impl Reading {
    pub fn resistance(&self) -> f64 {
        self.voltage / self.current
    }

    pub fn power(&self) -> f64 {
        self.voltage * self.current
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum SourceMeterRequest {
    Initialize,
    SelectTerminal(Terminal),
    SetSourceMode(SourceMode),
    SetCurrentSourceMode { protection_voltage: f64 },
    SetVoltageSourceMode { protection_current: f64 },
    SetCurrent(f64),
    SetVoltage(f64),
    GetCurrent,
    GetVoltage,
    SetProtectionVoltage(f64),
    SetProtectionCurrent(f64),
    GetProtectionVoltage,
    GetProtectionCurrent,
    MeasureVoltage,
    MeasureCurrent,
    Measure,
    SetEnabled(Option<bool>),
    Identify,
    Scpi(ScpiRequest),
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum SourceMeterResponse {
    Done,
    Value(f64),
    Enabled(bool),
    Reading(Reading),
    Text(String),
    Scpi(ScpiResponse),
}
