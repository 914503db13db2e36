use serde::{Deserialize, Serialize};
use thiserror::Error as ThisError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    /// Malformed row: null/incomplete id, primary-key mismatch, bad schema.
    Validation,
    /// Database or table does not exist.
    NotFound,
    /// Malformed frame, envelope or payload.
    Decode,
    /// The task queue is at capacity.
    QueueFull,
    /// A frame would exceed `max_frame_len`.
    TooLarge,
    /// The task was dropped before it ran.
    Cancelled,
    Io,
    InvalidConfig,
    Internal,
}

#[derive(Debug, Clone, PartialEq, ThisError)]
#[error("{kind:?}: {context}")]
pub struct Error {
    pub kind: ErrorKind,
    pub context: String,
}

impl Error {
    pub fn new(kind: ErrorKind, context: impl Into<String>) -> Self {
        Error { kind, context: context.into() }
    }

    pub fn validation(context: impl Into<String>) -> Self {
        Self::new(ErrorKind::Validation, context)
    }

    pub fn not_found(context: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotFound, context)
    }

    pub fn decode(context: impl Into<String>) -> Self {
        Self::new(ErrorKind::Decode, context)
    }

    pub fn internal(context: impl Into<String>) -> Self {
        Self::new(ErrorKind::Internal, context)
    }

    pub fn is(&self, kind: ErrorKind) -> bool {
        self.kind == kind
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error {
            kind: ErrorKind::Io,
            context: err.to_string(),
        }
    }
}

impl From<bincode::Error> for Error {
    fn from(err: bincode::Error) -> Self {
        Error {
            kind: ErrorKind::Decode,
            context: err.to_string(),
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error {
            kind: ErrorKind::InvalidConfig,
            context: format!("config: {}", err),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_kind_and_context() {
        let err = Error::not_found("table `orders`");
        assert_eq!(err.to_string(), "NotFound: table `orders`");
        assert!(err.is(ErrorKind::NotFound));
    }

    #[test]
    fn bincode_errors_map_to_decode() {
        let err: Error = bincode::deserialize::<String>(&[0xff]).unwrap_err().into();
        assert_eq!(err.kind, ErrorKind::Decode);
    }
}
