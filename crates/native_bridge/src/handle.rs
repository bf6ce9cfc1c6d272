// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::fmt::Debug;
use std::ops::Deref;

use tracing::{Level, event};

use crate::CompletionToken;

/// The lifecycle status of a native operation, as reported by its handle.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum HandleStatus {
    /// The native runtime accepted the operation but has not started it yet.
    NotStarted,

    /// The operation is running.
    Pending,

    /// The operation has finished, successfully or not. The error code tells which.
    Complete,

    /// The handle no longer refers to a native operation (it was released or moved away).
    Invalid,
}

impl HandleStatus {
    /// Whether the handle still refers to a native operation.
    #[must_use]
    pub const fn is_valid(self) -> bool {
        !matches!(self, Self::Invalid)
    }
}

/// The contract of an opaque handle to a pending native operation.
///
/// The memory behind the handle is owned by the native runtime. Implementations are thin
/// wrappers over the native calls; all lifetime management is done by the bridge that takes
/// ownership of the handle.
///
/// # Callbacks
///
/// The native runtime cannot carry a Rust closure across the boundary, only an integer. After
/// [`set_completion_callback()`][Self::set_completion_callback], the native runtime reports
/// completion by delivering the token to the registry it was registered in (for the global
/// registry, via [`native_bridge_complete()`][crate::ffi::native_bridge_complete]). It may do so
/// from any thread, including immediately if the operation is already complete.
///
/// # Thread safety
///
/// All methods may be called from the caller's thread and from native delivery threads.
/// [`release()`][Self::release] must be safe to call more than once, though the bridge only
/// ever calls it once.
#[cfg_attr(test, mockall::automock)]
pub trait NativeHandle: Send + Sync + 'static {
    /// The current lifecycle status of the operation.
    fn status(&self) -> HandleStatus;

    /// The native error code. `0` means success.
    fn error_code(&self) -> i32;

    /// The native error message. Empty when there is no error.
    fn error_message(&self) -> String;

    /// Asks the native runtime to deliver `token` once the operation completes.
    fn set_completion_callback(&self, token: CompletionToken);

    /// Asks the native runtime to cancel the operation. Best effort - the operation may still
    /// complete normally. Returns whether the native runtime accepted the request.
    fn cancel(&self) -> bool;

    /// Releases the native memory behind the handle.
    fn release(&self);
}

/// Exclusive owner of a native handle, guaranteeing that it is released exactly once on every
/// exit path: explicit disposal after completion or drop on abandonment.
pub(crate) struct OwnedHandle<H: NativeHandle> {
    handle: H,
    released: bool,
}

impl<H: NativeHandle> OwnedHandle<H> {
    pub(crate) const fn new(handle: H) -> Self {
        Self { handle, released: false }
    }

    /// Releases the native handle. Calling this again is a no-op.
    pub(crate) fn dispose(&mut self) {
        if self.released {
            return;
        }

        self.released = true;
        self.handle.release();

        event!(Level::TRACE, message = "native handle released");
    }
}

impl<H: NativeHandle> Deref for OwnedHandle<H> {
    type Target = H;

    fn deref(&self) -> &H {
        debug_assert!(!self.released, "native handle used after release");
        &self.handle
    }
}

impl<H: NativeHandle> Drop for OwnedHandle<H> {
    fn drop(&mut self) {
        self.dispose();
    }
}

impl<H: NativeHandle> Debug for OwnedHandle<H> {
    #[cfg_attr(test, mutants::skip)] // There is no API contract this needs to satisfy.
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OwnedHandle").field("released", &self.released).finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_invalid_is_not_valid() {
        assert!(HandleStatus::NotStarted.is_valid());
        assert!(HandleStatus::Pending.is_valid());
        assert!(HandleStatus::Complete.is_valid());
        assert!(!HandleStatus::Invalid.is_valid());
    }

    #[test]
    fn dispose_releases_once() {
        let mut handle = MockNativeHandle::new();
        handle.expect_release().times(1).return_const(());

        let mut owned = OwnedHandle::new(handle);
        owned.dispose();
        owned.dispose();
        drop(owned);
    }

    #[test]
    fn drop_releases_abandoned_handle() {
        let mut handle = MockNativeHandle::new();
        handle.expect_release().times(1).return_const(());

        drop(OwnedHandle::new(handle));
    }
}
