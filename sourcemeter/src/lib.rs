//! Driver for the Keithley 2400 SourceMeter.
//!
//! [`SourceMeter`] talks SCPI over any [`Transport`], caches instrument
//! parameters so unchanged values are not rewritten and ramps setpoints while
//! the output is on. [`asynced::SourceMeter`] moves a driver onto its own
//! thread for use from async code.

pub mod address;
pub mod asynced;
pub mod configurable;
pub mod keithley;
pub mod options;
pub mod ramp;
pub mod transport;

pub use sourcemeter_protocol as protocol;

pub use crate::address::Address;
pub use crate::configurable::{Configurable, ParamCache};
pub use crate::keithley::{SourceMeter, State};
pub use crate::options::Options;
pub use crate::transport::{Loopback, PrologixTransport, TcpTransport, Transport};
pub use sourcemeter_protocol::{Error, ProtocolError, Reading, Result, SourceMode, Terminal, TransportError};
