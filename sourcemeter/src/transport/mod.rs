//! Message based links to the instrument.
//!
//! Everything the driver needs from a link is `write` and `query`. The
//! implementations in here are deliberately thin: they frame commands with a
//! line feed, read one line per query and map socket timeouts to
//! [`ProtocolError::Timeout`](crate::protocol::ProtocolError::Timeout). Retrying
//! is left to the caller.

use std::io::{self, BufRead, Write};

use anyhow::anyhow;

use crate::protocol::{ScpiRequest, ScpiResponse};
use crate::Error;

pub mod loopback;
pub mod prologix;
pub mod tcp;

pub use loopback::Loopback;
pub use prologix::PrologixTransport;
pub use tcp::TcpTransport;

pub trait Transport {
    /// Send a command which does not produce a reply.
    fn write(&mut self, msg: &str) -> crate::Result<()>;

    /// Send a command and return the reply line, without its terminator.
    fn query(&mut self, msg: &str) -> crate::Result<String>;

    fn handle(&mut self, req: ScpiRequest) -> crate::Result<ScpiResponse> {
        match req {
            ScpiRequest::Write(x) => self.write(&x).map(|_| ScpiResponse::Done),
            ScpiRequest::QueryString(x) => self.query(&x).map(ScpiResponse::String),
        }
    }
}

impl<T: Transport + ?Sized> Transport for Box<T> {
    fn write(&mut self, msg: &str) -> crate::Result<()> {
        (**self).write(msg)
    }

    fn query(&mut self, msg: &str) -> crate::Result<String> {
        (**self).query(msg)
    }
}

pub(crate) fn write_line<W: Write>(stream: &mut W, msg: &str) -> crate::Result<()> {
    let mut msg = msg.to_string();
    if !msg.ends_with('\n') {
        msg.push('\n');
    }
    stream.write_all(msg.as_bytes()).map_err(map_io_error)?;
    stream.flush().map_err(map_io_error)
}

pub(crate) fn read_line<R: BufRead>(stream: &mut R) -> crate::Result<String> {
    let mut ret = String::new();
    let cnt = stream.read_line(&mut ret).map_err(map_io_error)?;
    if cnt == 0 {
        return Err(Error::transport(anyhow!("Connection closed by instrument")));
    }
    let len = ret.trim_end_matches(&['\r', '\n'][..]).len();
    ret.truncate(len);
    Ok(ret)
}

fn map_io_error(err: io::Error) -> Error {
    match err.kind() {
        io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut => {
            log::debug!("instrument read timeout");
            Error::protocol_timeout()
        }
        _ => Error::transport(err),
    }
}
