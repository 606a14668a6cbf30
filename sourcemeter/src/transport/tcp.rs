use std::io::BufReader;
use std::net::{SocketAddr, TcpStream};
use std::time::Duration;

use super::{read_line, write_line, Transport};
use crate::Error;

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(3);

/// Raw line terminated SCPI over a TCP socket, e.g. a LAN to GPIB/RS-232
/// bridge in transparent mode.
pub struct TcpTransport {
    addr: SocketAddr,
    stream: BufReader<TcpStream>,
}

impl TcpTransport {
    pub fn connect(addr: SocketAddr, timeout: Duration) -> crate::Result<Self> {
        log::debug!("Connecting to {}", addr);
        let stream = TcpStream::connect_timeout(&addr, timeout).map_err(Error::transport)?;
        stream.set_read_timeout(Some(timeout)).map_err(Error::transport)?;
        stream.set_write_timeout(Some(timeout)).map_err(Error::transport)?;
        stream.set_nodelay(true).map_err(Error::transport)?;
        Ok(Self {
            addr,
            stream: BufReader::new(stream),
        })
    }

    pub fn addr(&self) -> &SocketAddr {
        &self.addr
    }
}

impl Transport for TcpTransport {
    fn write(&mut self, msg: &str) -> crate::Result<()> {
        log::debug!("{} <- {}", self.addr, msg);
        write_line(self.stream.get_mut(), msg)
    }

    fn query(&mut self, msg: &str) -> crate::Result<String> {
        self.write(msg)?;
        let reply = read_line(&mut self.stream)?;
        log::debug!("{} -> {}", self.addr, reply);
        Ok(reply)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{BufRead, Write};
    use std::net::TcpListener;
    use std::thread;

    #[test]
    fn query_over_socket() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let server = thread::spawn(move || {
            let (stream, _) = listener.accept().unwrap();
            let mut reader = BufReader::new(stream.try_clone().unwrap());
            let mut writer = stream;
            let mut received = Vec::new();
            for _ in 0..2 {
                let mut line = String::new();
                reader.read_line(&mut line).unwrap();
                received.push(line.clone());
                if line.trim_end().ends_with('?') {
                    writer.write_all(b"1.5,0.02\n").unwrap();
                }
            }
            received
        });

        let mut transport = TcpTransport::connect(addr, DEFAULT_TIMEOUT).unwrap();
        transport.write("OUTP:STATE 1").unwrap();
        assert_eq!(transport.query("MEASURE:VOLT?").unwrap(), "1.5,0.02");

        let received = server.join().unwrap();
        assert_eq!(received, vec!["OUTP:STATE 1\n", "MEASURE:VOLT?\n"]);
    }

    #[test]
    fn silent_instrument_times_out() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let server = thread::spawn(move || {
            let (stream, _) = listener.accept().unwrap();
            thread::sleep(Duration::from_millis(300));
            drop(stream);
        });

        let mut transport = TcpTransport::connect(addr, Duration::from_millis(50)).unwrap();
        let err = transport.query("*IDN?").unwrap_err();
        assert!(matches!(
            err,
            Error::Protocol(crate::protocol::ProtocolError::Timeout)
        ));
        server.join().unwrap();
    }
}
