use std::result::Result as StdResult;

use thiserror::Error;

use crate::source::SourceError;

/// Convenient result type for the engine crate.
pub type Result<T> = StdResult<T, Error>;

/// Unified error type for the axrelay engine.
#[derive(Debug, Error)]
pub enum Error {
    /// Errors reported by the accessibility source.
    #[error("Accessibility source error: {0}")]
    Source(#[from] SourceError),

    /// None of the application-level subscriptions could be established.
    #[error("Rebuild failed for pid {pid}: no subscriptions established")]
    RebuildFailed {
        /// Application the rebuild was attempted for.
        pid: i32,
    },
}
