// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

/// The native error code that reports an operation as canceled, unless a domain overrides it
/// via [`CompletionBridge::with_canceled_code()`][crate::CompletionBridge::with_canceled_code].
///
/// Error code `0` always means success. Every other code is a domain error that is passed to the
/// caller verbatim.
pub const CANCELED_SENTINEL: i32 = 1;

/// Native handles report a negative total size when the size of a transfer is not known.
pub const UNKNOWN_SIZE: i64 = -1;

pub(crate) const MSG_NOT_STARTED: &str = "operation not started";
pub(crate) const MSG_STILL_PENDING: &str = "completion delivered while the operation was still pending";
pub(crate) const MSG_EXTRACTION_PANICKED: &str = "result extraction panicked";
