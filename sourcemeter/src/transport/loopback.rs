use std::collections::HashMap;

use super::Transport;
use crate::protocol::{Reading, ScpiRequest};
use crate::Error;

pub const IDN: &str = "KEITHLEY INSTRUMENTS INC.,MODEL 2400,0000000,C32 Oct 4 2010 14:20:11/A02 /S/K";

/// Parameter values after `*RST`.
const RESET_STATE: &[(&str, &str)] = &[
    ("OUTP:STATE", "0"),
    ("SOURCE:FUNC", "VOLT"),
    ("SOURCE:CURR", "0"),
    ("SOURCE:VOLT", "0"),
    ("VOLT:PROT", "21"),
    ("CURR:PROT", "0.000105"),
    ("ROUT:TERM", "FRON"),
];

/// An in-memory stand-in for a SourceMeter.
///
/// `KEY VALUE` writes are stored and answered by `KEY?` queries, measurement
/// queries return the configured [`Reading`]. Every request is recorded.
/// Queries for unknown keys time out, as a real instrument would.
pub struct Loopback {
    params: HashMap<String, String>,
    replies: HashMap<String, String>,
    reading: Reading,
    history: Vec<ScpiRequest>,
}

impl Loopback {
    pub fn new() -> Self {
        let mut ret = Self {
            params: HashMap::new(),
            replies: HashMap::new(),
            reading: Reading {
                voltage: 0.0,
                current: 0.0,
            },
            history: Vec::new(),
        };
        ret.reset();
        ret
    }

    pub fn with_reading(voltage: f64, current: f64) -> Self {
        let mut ret = Self::new();
        ret.set_reading(voltage, current);
        ret
    }

    pub fn set_reading(&mut self, voltage: f64, current: f64) {
        self.reading = Reading { voltage, current };
    }

    /// Answer `query` with `reply`, regardless of the stored state.
    pub fn set_reply(&mut self, query: &str, reply: &str) {
        self.replies.insert(query.to_string(), reply.to_string());
    }

    pub fn param(&self, key: &str) -> Option<&str> {
        self.params.get(key).map(|x| x.as_str())
    }

    pub fn history(&self) -> &[ScpiRequest] {
        &self.history
    }

    /// All commands written so far, queries excluded.
    pub fn writes(&self) -> Vec<&str> {
        self.history
            .iter()
            .filter_map(|x| match x {
                ScpiRequest::Write(x) => Some(x.as_str()),
                ScpiRequest::QueryString(_) => None,
            })
            .collect()
    }

    pub fn clear_history(&mut self) {
        self.history.clear();
    }

    fn reset(&mut self) {
        self.params.clear();
        for (key, value) in RESET_STATE {
            self.params.insert(key.to_string(), value.to_string());
        }
    }
}

impl Default for Loopback {
    fn default() -> Self {
        Self::new()
    }
}

impl Transport for Loopback {
    fn write(&mut self, msg: &str) -> crate::Result<()> {
        self.history.push(ScpiRequest::Write(msg.to_string()));
        let msg = msg.trim();
        if msg == "*RST" {
            self.reset();
        } else if let Some(idx) = msg.find(' ') {
            let (key, value) = msg.split_at(idx);
            self.params.insert(key.to_string(), value.trim().to_string());
        }
        Ok(())
    }

    fn query(&mut self, msg: &str) -> crate::Result<String> {
        self.history.push(ScpiRequest::QueryString(msg.to_string()));
        let msg = msg.trim();
        if let Some(reply) = self.replies.get(msg) {
            return Ok(reply.clone());
        }
        if msg == "*IDN?" {
            return Ok(IDN.to_string());
        }
        if msg.starts_with("MEASURE:") || msg.starts_with("MEAS:") {
            return Ok(format!(
                "{:E},{:E},9.91E37,0E0,1.9E4",
                self.reading.voltage, self.reading.current
            ));
        }
        let key = msg.trim_end_matches('?');
        self.params
            .get(key)
            .cloned()
            .ok_or_else(Error::protocol_timeout)
    }
}
