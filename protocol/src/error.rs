use serde::{self, Deserializer, Serializer};
use std::{io, sync::Arc};

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Serialize, Deserialize)]
struct AnyHowError {
    description: String,
    backtrace: String,
}

#[derive(Serialize, Deserialize)]
struct IoError {
    description: String,
    kind: String,
}

fn serialize_io_error<S>(error: &Arc<io::Error>, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    let to_serialize = IoError {
        description: format!("{}", error),
        kind: format!("{:?}", error.kind()),
    };
    to_serialize.serialize(serializer)
}

fn deserialize_io_error<'de, D>(deserializer: D) -> Result<Arc<io::Error>, D::Error>
where
    D: Deserializer<'de>,
{
    let ret = IoError::deserialize(deserializer)?;
    let kind = match ret.kind.as_str() {
        "TimedOut" => io::ErrorKind::TimedOut,
        "ConnectionRefused" => io::ErrorKind::ConnectionRefused,
        "ConnectionReset" => io::ErrorKind::ConnectionReset,
        "ConnectionAborted" => io::ErrorKind::ConnectionAborted,
        "BrokenPipe" => io::ErrorKind::BrokenPipe,
        "UnexpectedEof" => io::ErrorKind::UnexpectedEof,
        "NotFound" => io::ErrorKind::NotFound,
        _ => io::ErrorKind::Other,
    };
    Ok(Arc::new(io::Error::new(kind, ret.description)))
}

fn serialize_anyhow_error<S>(error: &Arc<anyhow::Error>, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    let to_serialize = AnyHowError {
        description: error.to_string(),
        backtrace: format!("{:?}", error.backtrace()),
    };
    to_serialize.serialize(serializer)
}

fn deserialize_anyhow_error<'de, D>(deserializer: D) -> Result<Arc<anyhow::Error>, D::Error>
where
    D: Deserializer<'de>,
{
    let ret = AnyHowError::deserialize(deserializer)?;
    let ret = anyhow::Error::msg(ret.description);
    Ok(Arc::new(ret))
}

/// Failures of the link to the instrument (socket, bridge, worker thread).
#[derive(Error, Clone, Debug, Serialize, Deserialize)]
pub enum TransportError {
    #[error("IO Error: {0:?}")]
    Io(
        #[serde(
            serialize_with = "serialize_io_error",
            deserialize_with = "deserialize_io_error"
        )]
        Arc<io::Error>,
    ),
    #[error("Other Error: {0}")]
    Other(
        #[serde(
            serialize_with = "serialize_anyhow_error",
            deserialize_with = "deserialize_anyhow_error"
        )]
        Arc<anyhow::Error>,
    ),
}

impl From<io::Error> for TransportError {
    fn from(err: io::Error) -> Self {
        TransportError::Io(Arc::new(err))
    }
}

impl From<anyhow::Error> for TransportError {
    fn from(x: anyhow::Error) -> Self {
        TransportError::Other(Arc::new(x))
    }
}

/// The instrument answered, but not in a way we understand.
#[derive(Error, Clone, Debug, Serialize, Deserialize)]
pub enum ProtocolError {
    #[error("Timeout")]
    Timeout,
    #[error("Unexpected Response: {0}")]
    UnexpectedResponse(String),
    #[error("Cannot parse reply: {0:?}")]
    Parse(String),
}

#[derive(Error, Debug, Clone, Serialize, Deserialize)]
pub enum Error {
    #[error("Transport Error {0}")]
    Transport(TransportError),
    #[error("Protocol Error {0}")]
    Protocol(ProtocolError),
    #[error("Argument Error {0}")]
    Argument(
        #[serde(
            serialize_with = "serialize_anyhow_error",
            deserialize_with = "deserialize_anyhow_error"
        )]
        Arc<anyhow::Error>,
    ),
    #[error("Internal Error {0}")]
    Internal(
        #[serde(
            serialize_with = "serialize_anyhow_error",
            deserialize_with = "deserialize_anyhow_error"
        )]
        Arc<anyhow::Error>,
    ),
}

impl Error {
    pub fn transport<T: Into<TransportError>>(err: T) -> Self {
        Self::Transport(err.into())
    }

    pub fn protocol<T: Into<ProtocolError>>(err: T) -> Self {
        Self::Protocol(err.into())
    }

    pub fn protocol_timeout() -> Self {
        Error::Protocol(ProtocolError::Timeout)
    }

    /// A reply that does not contain the expected numeric fields.
    pub fn parse<T: Into<String>>(reply: T) -> Self {
        Error::Protocol(ProtocolError::Parse(reply.into()))
    }

    pub fn internal<T: Into<anyhow::Error>>(err: T) -> Self {
        Self::Internal(Arc::new(err.into()))
    }

    pub fn argument<T: Into<anyhow::Error>>(err: T) -> Self {
        Self::Argument(Arc::new(err.into()))
    }

    pub fn is_argument(&self) -> bool {
        matches!(self, Error::Argument(_))
    }

    pub fn is_parse(&self) -> bool {
        matches!(self, Error::Protocol(ProtocolError::Parse(_)))
    }
}

impl From<io::Error> for Error {
    fn from(x: io::Error) -> Self {
        Error::Transport(TransportError::Io(Arc::new(x)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;

    #[test]
    fn argument_is_not_internal() {
        let err = Error::argument(anyhow!("Invalid terminal `side`"));
        assert!(err.is_argument());
        assert!(!err.is_parse());
    }

    #[test]
    fn io_error_survives_json() {
        let err = Error::from(io::Error::new(io::ErrorKind::TimedOut, "no reply"));
        let json = serde_json::to_string(&err).unwrap();
        let back: Error = serde_json::from_str(&json).unwrap();
        match back {
            Error::Transport(TransportError::Io(x)) => {
                assert_eq!(x.kind(), io::ErrorKind::TimedOut);
                assert!(x.to_string().contains("no reply"));
            }
            x => panic!("{:?}", x),
        }
    }

    #[test]
    fn parse_error_keeps_reply() {
        let err = Error::parse("garbage");
        assert!(err.is_parse());
        match err {
            Error::Protocol(ProtocolError::Parse(reply)) => assert_eq!(reply, "garbage"),
            _ => panic!(),
        }
    }
}
