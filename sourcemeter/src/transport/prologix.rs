//! Prologix GPIB-ETHERNET controller.
//! http://prologix.biz/gpib-ethernet-controller.html
//!
//! The controller listens on TCP port 1234. Lines starting with `++` are
//! consumed by the controller, everything else is forwarded to the GPIB
//! device selected with `++addr`.

use std::io::{BufRead, BufReader, Read};
use std::net::{SocketAddr, TcpStream};
use std::time::Duration;

use super::{read_line, write_line, Transport};
use crate::Error;

pub const DEFAULT_PORT: u16 = 1234;

pub struct PrologixTransport {
    addr: SocketAddr,
    gpib_addr: u8,
    stream: BufReader<TcpStream>,
}

impl PrologixTransport {
    pub fn connect(addr: SocketAddr, gpib_addr: u8, timeout: Duration) -> crate::Result<Self> {
        log::debug!("Connecting to prologix at {}, GPIB address {}", addr, gpib_addr);
        let stream = TcpStream::connect_timeout(&addr, timeout).map_err(Error::transport)?;
        stream.set_read_timeout(Some(timeout)).map_err(Error::transport)?;
        stream.set_write_timeout(Some(timeout)).map_err(Error::transport)?;
        stream.set_nodelay(true).map_err(Error::transport)?;
        let mut ret = Self {
            addr,
            gpib_addr,
            stream: BufReader::new(stream),
        };
        ret.init()?;
        Ok(ret)
    }

    pub fn gpib_addr(&self) -> u8 {
        self.gpib_addr
    }

    fn init(&mut self) -> crate::Result<()> {
        log::debug!("Initalizing prologix.");
        write_line(self.stream.get_mut(), "++savecfg 0")?;
        write_line(self.stream.get_mut(), "++auto 0")?;
        // we manually append termination chars
        write_line(self.stream.get_mut(), "++eos 3")
    }

    /// Discard anything left over from an earlier, possibly timed out, query.
    fn drain(&mut self) -> crate::Result<()> {
        let buffered = self.stream.buffer().len();
        self.stream.consume(buffered);
        let stream = self.stream.get_mut();
        stream.set_nonblocking(true).map_err(Error::transport)?;
        let mut buf = [0u8; 256];
        loop {
            match stream.read(&mut buf) {
                Ok(0) => break,
                Ok(_) => continue,
                Err(_) => break,
            }
        }
        stream.set_nonblocking(false).map_err(Error::transport)
    }

    fn select(&mut self) -> crate::Result<()> {
        self.drain()?;
        let addr_set = format!("++addr {}", self.gpib_addr);
        write_line(self.stream.get_mut(), &addr_set)
    }
}

impl Transport for PrologixTransport {
    fn write(&mut self, msg: &str) -> crate::Result<()> {
        log::debug!("{}::{} <- {}", self.addr, self.gpib_addr, msg);
        self.select()?;
        write_line(self.stream.get_mut(), msg)
    }

    fn query(&mut self, msg: &str) -> crate::Result<String> {
        self.write(msg)?;
        write_line(self.stream.get_mut(), "++read eoi")?;
        let reply = read_line(&mut self.stream)?;
        log::debug!("{}::{} -> {}", self.addr, self.gpib_addr, reply);
        Ok(reply)
    }
}
