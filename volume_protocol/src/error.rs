use crate::command::CommandError;
use crate::status::ParseError;
use strum::{AsRefStr, Display};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("Could not find an (IPv4) address for host: {0}")]
    Resolution(String),

    #[error("Timed out {0}")]
    Timeout(String),

    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error("Got error message from server:{0}")]
    Server(String),

    #[error("Unknown response from server: {0}")]
    UnknownReply(String),

    #[error("Response from server longer than {0} bytes")]
    LineTooLong(usize),

    #[error("Trying to connect, but already connected")]
    AlreadyConnected,

    #[error("Trying to disconnect, but already disconnected")]
    AlreadyDisconnected,

    #[error("Not connected to server")]
    NotConnected,

    #[error("Lost \"connection\" with server")]
    ConnectionLost,

    #[error("Problem reading response from server: {0}")]
    Read(std::io::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid command: {0}")]
    Command(#[from] CommandError),
}

/// Error categories reported through [`crate::TransportEvent::Error`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, AsRefStr)]
pub enum ErrorKind {
    Resolution,
    Timeout,
    Parse,
    Protocol,
    State,
    ConnectionLost,
    Io,
    Command,
}

impl TransportError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            TransportError::Resolution(_) => ErrorKind::Resolution,
            TransportError::Timeout(_) => ErrorKind::Timeout,
            TransportError::Parse(_) => ErrorKind::Parse,
            TransportError::Server(_)
            | TransportError::UnknownReply(_)
            | TransportError::LineTooLong(_) => ErrorKind::Protocol,
            TransportError::AlreadyConnected
            | TransportError::AlreadyDisconnected
            | TransportError::NotConnected => ErrorKind::State,
            TransportError::ConnectionLost => ErrorKind::ConnectionLost,
            TransportError::Read(_) | TransportError::Io(_) => ErrorKind::Io,
            TransportError::Command(_) => ErrorKind::Command,
        }
    }

    /// Whether the error is a socket timeout rather than a hard failure
    pub(crate) fn is_timeout(err: &std::io::Error) -> bool {
        matches!(
            err.kind(),
            std::io::ErrorKind::TimedOut | std::io::ErrorKind::WouldBlock
        )
    }
}
