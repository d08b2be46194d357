use std::{io::Error as IoError, result::Result as StdResult};

use axrelay_protocol::ipc::codec::Error as CodecError;
use ron::error::SpannedError;
use thiserror::Error;

/// The main error type for axrelay-server operations.
#[derive(Error, Debug)]
pub enum Error {
    /// Error in IPC communication
    #[error("IPC error: {0}")]
    Ipc(String),

    /// IO-related errors
    #[error("IO error: {0}")]
    Io(#[from] IoError),

    /// Serialization/deserialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Configuration could not be read or is invalid.
    #[error("Config error: {0}")]
    Config(String),
}

/// Convenience type alias for Results using our Error type
pub type Result<T> = StdResult<T, Error>;

impl From<CodecError> for Error {
    fn from(err: CodecError) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl From<SpannedError> for Error {
    fn from(err: SpannedError) -> Self {
        Self::Config(err.to_string())
    }
}
