use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Key of the aggregate entry in a per-channel parameter.
pub const DEFAULT_CHANNEL: &str = "&";

/// A single parameter value as written to or read from the instrument.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Scalar {
    Number(f64),
    Text(String),
}

impl Scalar {
    /// Interpret an instrument reply. Numeric text becomes a `Number`.
    pub fn from_reply(reply: &str) -> Self {
        let reply = reply.trim();
        match reply.parse::<f64>() {
            Ok(x) => Scalar::Number(x),
            Err(_) => Scalar::Text(reply.to_string()),
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Scalar::Number(x) => Some(*x),
            Scalar::Text(x) => x.trim().parse().ok(),
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Scalar::Number(_) => None,
            Scalar::Text(x) => Some(x),
        }
    }
}

impl fmt::Display for Scalar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scalar::Number(x) => write!(f, "{}", x),
            Scalar::Text(x) => f.write_str(x),
        }
    }
}

impl From<f64> for Scalar {
    fn from(x: f64) -> Self {
        Scalar::Number(x)
    }
}

impl From<&str> for Scalar {
    fn from(x: &str) -> Self {
        Scalar::Text(x.to_string())
    }
}

impl From<String> for Scalar {
    fn from(x: String) -> Self {
        Scalar::Text(x)
    }
}

/// A cached parameter: either a plain value or one value per channel.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParamValue {
    Scalar(Scalar),
    Channels(BTreeMap<String, Scalar>),
}

impl ParamValue {
    /// The scalar of interest. For per-channel values this is the
    /// [`DEFAULT_CHANNEL`] entry.
    pub fn scalar(&self) -> Option<&Scalar> {
        match self {
            ParamValue::Scalar(x) => Some(x),
            ParamValue::Channels(x) => x.get(DEFAULT_CHANNEL),
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        self.scalar().and_then(Scalar::as_f64)
    }

    pub fn as_text(&self) -> Option<&str> {
        self.scalar().and_then(Scalar::as_text)
    }
}

impl From<Scalar> for ParamValue {
    fn from(x: Scalar) -> Self {
        ParamValue::Scalar(x)
    }
}
