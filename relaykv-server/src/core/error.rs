use crate::protocol::Frame;
use thiserror::Error;

/// Main error type for relaykv operations
#[derive(Debug, Error)]
pub enum KvError {
    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("snapshot format error: {0}")]
    Format(String),

    #[error("unsupported feature: {0}")]
    UnsupportedFeature(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("unknown command '{0}'")]
    UnknownCommand(String),

    #[error("wrong number of arguments for '{0}' command")]
    WrongArity(String),

    #[error("{0}")]
    Syntax(String),

    #[error("You can't write against a read only replica.")]
    ReadOnly,

    #[error("{0}")]
    InvalidRequest(String),
}

impl KvError {
    /// Errors that leave the byte stream in an unknown state. The connection
    /// carrying them must be torn down.
    pub fn is_fatal_to_connection(&self) -> bool {
        matches!(self, Self::Protocol(_) | Self::Io(_))
    }

    /// Render this error as a RESP error reply.
    pub fn to_frame(&self) -> Frame {
        match self {
            Self::ReadOnly => Frame::Error(format!("READONLY {}", self)),
            Self::Syntax(msg) | Self::InvalidRequest(msg) => Frame::Error(format!("ERR {}", msg)),
            _ => Frame::Error(format!("ERR {}", self)),
        }
    }
}

/// Result type alias for relaykv operations
pub type Result<T> = std::result::Result<T, KvError>;
