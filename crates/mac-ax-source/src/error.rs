use axrelay_engine::SourceError;
use thiserror::Error;

/// AX error code for a process that is not trusted for accessibility.
pub(crate) const AX_ERROR_API_DISABLED: i32 = -25211;
/// AX error code for "no value" on an attribute read.
pub(crate) const AX_ERROR_NO_VALUE: i32 = -25212;

/// Errors from the macOS accessibility layer.
#[derive(Debug, Error)]
pub enum Error {
    /// An AX call returned a non-zero error code.
    #[error("{op} failed with AX error {code}")]
    Ax {
        /// The failing call.
        op: &'static str,
        /// AX error code.
        code: i32,
    },

    /// A create call returned a null reference.
    #[error("{0} returned null")]
    Null(&'static str),
}

impl From<Error> for SourceError {
    fn from(err: Error) -> Self {
        match err {
            Error::Ax {
                code: AX_ERROR_API_DISABLED,
                ..
            } => Self::PermissionDenied,
            Error::Ax { op, code } => Self::Os { op, code },
            Error::Null(op) => Self::Os { op, code: 0 },
        }
    }
}
