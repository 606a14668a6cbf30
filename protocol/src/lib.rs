//! Wire types shared by the `sourcemeter` driver, its CLI and anything that
//! wants to send requests to a Keithley 2400 over a channel.

pub mod error;
pub mod param;
pub mod scpi;
pub mod sourcemeter;

pub use crate::error::{Error, ProtocolError, TransportError};
pub use crate::param::{ParamValue, Scalar, DEFAULT_CHANNEL};
pub use crate::scpi::{ScpiRequest, ScpiResponse};
pub use crate::sourcemeter::{Reading, SourceMeterRequest, SourceMeterResponse, SourceMode, Terminal};

pub type Result<T> = std::result::Result<T, Error>;
