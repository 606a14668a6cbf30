/// This module implements `Address` which is used for parsing
/// address strings of the form "prologix::192.168.0.20:1234::24"
use std::fmt;
use std::fmt::{Display, Formatter};
use std::net::SocketAddr;
use std::time::Duration;

use anyhow::anyhow;

use crate::transport::{Loopback, PrologixTransport, TcpTransport, Transport};
use crate::Error;

/// Represents a parsed address string.
#[derive(Clone, Debug, PartialEq)]
pub enum Address {
    Tcp { addr: SocketAddr },
    Prologix { addr: SocketAddr, gpib_addr: u8 },
    Loopback,
}

fn invalid(addr: &str) -> Error {
    Error::argument(anyhow!("Invalid Address: `{}`", addr))
}

impl Address {
    /// Create a new `Address` by parsing the given address string.
    pub fn parse(addr: &str) -> crate::Result<Self> {
        let splits: Vec<_> = addr.trim().split("::").collect();
        let kind = splits[0].to_lowercase();

        if kind == "loopback" {
            // loopback or loopback::
            if splits.len() > 2 || splits.get(1).map_or(false, |x| !x.is_empty()) {
                return Err(invalid(addr));
            }
            Ok(Address::Loopback)
        } else if kind == "tcp" {
            // tcp::192.168.0.1:5025
            if splits.len() != 2 {
                return Err(invalid(addr));
            }
            let sock: SocketAddr = splits[1].parse().map_err(|_| invalid(addr))?;
            Ok(Address::Tcp { addr: sock })
        } else if kind == "prologix" {
            // prologix::192.168.0.1:1234::24
            if splits.len() != 3 {
                return Err(invalid(addr));
            }
            let sock: SocketAddr = splits[1].parse().map_err(|_| invalid(addr))?;
            let gpib_addr: u8 = splits[2].parse().map_err(|_| invalid(addr))?;
            if gpib_addr > 30 {
                return Err(invalid(addr));
            }
            Ok(Address::Prologix {
                addr: sock,
                gpib_addr,
            })
        } else {
            Err(invalid(addr))
        }
    }

    /// Connect to the instrument behind this address.
    pub fn open(&self, timeout: Duration) -> crate::Result<Box<dyn Transport + Send>> {
        let ret: Box<dyn Transport + Send> = match self {
            Address::Tcp { addr } => Box::new(TcpTransport::connect(*addr, timeout)?),
            Address::Prologix { addr, gpib_addr } => {
                Box::new(PrologixTransport::connect(*addr, *gpib_addr, timeout)?)
            }
            Address::Loopback => Box::new(Loopback::new()),
        };
        Ok(ret)
    }
}

impl Display for Address {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Address::Tcp { addr } => write!(f, "tcp::{}", addr),
            Address::Prologix { addr, gpib_addr } => write!(f, "prologix::{}::{}", addr, gpib_addr),
            Address::Loopback => f.write_str("loopback"),
        }
    }
}
