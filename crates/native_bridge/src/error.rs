// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use thiserror::Error;

/// Boxed error of unknown type, attached to an [`Error::UnknownFailure`] as its source.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// The ways in which a bridged native operation can fail to produce a value.
///
/// A canceled operation is reported as [`Error::Canceled`] and not as a failure, so callers can
/// distinguish "I canceled this" from "this failed" via [`is_canceled()`][Self::is_canceled].
///
/// # Thread safety
///
/// This type is thread-safe.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// The operation was canceled, either because the caller asked for it or because the native
    /// runtime gave up on the operation (e.g. the handle was released before completion).
    #[error("operation canceled")]
    Canceled,

    /// The native runtime reported a domain-specific error. The code and message are forwarded
    /// verbatim, so callers can match on their own error taxonomy (object not found,
    /// quota exceeded, ...).
    #[error("native error {code}: {message}")]
    Domain {
        /// The native error code. Never zero and never the canceled sentinel.
        code: i32,
        /// The message reported by the native runtime alongside the code.
        message: String,
    },

    /// The bridging layer could not classify the outcome of the operation. This indicates an
    /// invariant violation somewhere between the caller and the native runtime.
    #[error("unknown failure: {message}")]
    UnknownFailure {
        /// Describes what the bridge observed.
        message: String,
        /// The underlying error, if one was available.
        #[source]
        source: Option<BoxError>,
    },
}

impl Error {
    pub(crate) fn unknown(message: impl Into<String>) -> Self {
        Self::UnknownFailure {
            message: message.into(),
            source: None,
        }
    }

    pub(crate) fn unknown_with_source(message: impl Into<String>, source: BoxError) -> Self {
        Self::UnknownFailure {
            message: message.into(),
            source: Some(source),
        }
    }

    /// Whether the operation ended because it was canceled.
    #[must_use]
    pub const fn is_canceled(&self) -> bool {
        matches!(self, Self::Canceled)
    }

    /// The native error code, if the native runtime reported one.
    #[must_use]
    pub const fn code(&self) -> Option<i32> {
        match self {
            Self::Domain { code, .. } => Some(*code),
            _ => None,
        }
    }
}

/// A specialized `Result` for the outcome of bridged native operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Represents a bridge error as a standard I/O error, for interop with code that expects those.
impl From<Error> for std::io::Error {
    fn from(value: Error) -> Self {
        match value {
            Error::Canceled => Self::new(std::io::ErrorKind::Interrupted, value),
            _ => Self::other(value),
        }
    }
}
