// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use crate::constants::{CANCELED_SENTINEL, MSG_STILL_PENDING};
use crate::{Error, HandleStatus, NativeHandle};

/// How a completed native operation ended, as far as the bridge can tell.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum ErrorKind {
    /// The operation succeeded and its result can be extracted from the handle.
    Success,

    /// The operation was canceled.
    Canceled,

    /// The native runtime reported a domain error. The code is carried verbatim.
    Domain {
        /// Native error code.
        code: i32,
        /// Native error message.
        message: String,
    },

    /// The outcome could not be classified.
    UnknownFailure {
        /// What the bridge observed.
        message: String,
    },
}

impl ErrorKind {
    /// Converts a failed classification into the error reported to the caller.
    ///
    /// Returns `None` for [`ErrorKind::Success`].
    #[must_use]
    pub fn into_error(self) -> Option<Error> {
        match self {
            Self::Success => None,
            Self::Canceled => Some(Error::Canceled),
            Self::Domain { code, message } => Some(Error::Domain { code, message }),
            Self::UnknownFailure { message } => Some(Error::unknown(message)),
        }
    }
}

/// Maps native error codes to [`ErrorKind`].
///
/// `0` is success and the canceled sentinel is cancellation; any other code is a domain
/// error whose meaning is left to the caller.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct ErrorClassifier {
    canceled_code: i32,
}

impl ErrorClassifier {
    /// Creates a classifier that treats `canceled_code` as the cancellation sentinel.
    #[must_use]
    pub const fn new(canceled_code: i32) -> Self {
        Self { canceled_code }
    }

    /// The code this classifier treats as cancellation.
    #[must_use]
    pub const fn canceled_code(&self) -> i32 {
        self.canceled_code
    }

    /// Classifies a native outcome.
    ///
    /// `canceled` reports whether cancellation was observed outside the error code. It takes
    /// priority over every code, including success: once cancellation has been requested, a
    /// success that raced ahead of the cancellation acknowledgment is still reported as canceled.
    #[must_use]
    pub fn classify(&self, error_code: i32, message: &str, canceled: bool) -> ErrorKind {
        if canceled || error_code == self.canceled_code {
            return ErrorKind::Canceled;
        }

        match error_code {
            0 => ErrorKind::Success,
            code => ErrorKind::Domain {
                code,
                message: message.to_string(),
            },
        }
    }
}

impl Default for ErrorClassifier {
    fn default() -> Self {
        Self::new(CANCELED_SENTINEL)
    }
}

/// A point-in-time copy of everything a native handle reports about its completion.
///
/// Reading the handle once and classifying the copy keeps the status, code and message
/// consistent with each other even if the native side keeps mutating the handle.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CompletionStatus {
    /// Lifecycle status at capture time.
    pub status: HandleStatus,
    /// Native error code at capture time.
    pub error_code: i32,
    /// Native error message at capture time.
    pub error_message: String,
}

impl CompletionStatus {
    /// Reads the completion status of a handle.
    ///
    /// The code and message of a handle that is no longer valid are never read.
    pub fn capture<H: NativeHandle + ?Sized>(handle: &H) -> Self {
        let status = handle.status();

        if !status.is_valid() {
            return Self {
                status,
                error_code: 0,
                error_message: String::new(),
            };
        }

        Self {
            status,
            error_code: handle.error_code(),
            error_message: handle.error_message(),
        }
    }

    /// Classifies the captured status.
    ///
    /// On top of the code-level rules of [`ErrorClassifier::classify()`]:
    ///
    /// * A handle that became invalid before delivery was released or moved away, which is
    ///   reported as cancellation.
    /// * A delivery for an operation that is not complete yet cannot be classified.
    #[must_use]
    pub fn classify(&self, classifier: ErrorClassifier, canceled: bool) -> ErrorKind {
        match self.status {
            HandleStatus::Invalid => ErrorKind::Canceled,
            HandleStatus::Complete => classifier.classify(self.error_code, &self.error_message, canceled),
            HandleStatus::NotStarted | HandleStatus::Pending if canceled => ErrorKind::Canceled,
            HandleStatus::NotStarted | HandleStatus::Pending => ErrorKind::UnknownFailure {
                message: MSG_STILL_PENDING.to_string(),
            },
        }
    }
}
