/// Base types and reply parsing for SCPI message-based instruments
use serde::{Deserialize, Serialize};

use crate::Error;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum ScpiRequest {
    Write(String),
    QueryString(String),
}

impl ScpiRequest {
    pub fn command(&self) -> &str {
        match self {
            ScpiRequest::Write(x) => x,
            ScpiRequest::QueryString(x) => x,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum ScpiResponse {
    Done,
    String(String),
}

/// Parse the numeric field at `index` of a comma separated reply such as
/// `+1.500000E+00,+2.000000E-02,+9.910000E+37,+1.234E+03,+1.94E+04`.
pub fn parse_field(reply: &str, index: usize) -> crate::Result<f64> {
    let field = reply
        .trim()
        .split(',')
        .nth(index)
        .ok_or_else(|| Error::parse(reply))?;
    field.trim().parse::<f64>().map_err(|_| Error::parse(reply))
}
