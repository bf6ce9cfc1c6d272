// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::fmt::Debug;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tracing::{Level, event};

type CancelCallback = Box<dyn FnOnce() + Send>;

/// A caller-side signal asking an in-flight native operation to stop.
///
/// Cancellation is cooperative: signaling the token forwards a cancel request to the native
/// runtime but does not resolve anything locally. The operation still resolves through its
/// completion delivery, which then reports [`Error::Canceled`][crate::Error::Canceled].
///
/// A token binds to at most one in-flight operation at a time. Binding it to a new operation
/// detaches it from the previous one.
///
/// Clones share the same signal.
///
/// # Thread safety
///
/// This type is thread-safe.
#[derive(Clone, Default)]
pub struct CancellationToken {
    inner: Arc<TokenInner>,
}

#[derive(Default)]
struct TokenInner {
    canceled: AtomicBool,
    next_binding_id: AtomicU64,
    binding: Mutex<Option<(u64, CancelCallback)>>,
}

impl CancellationToken {
    /// Creates a token that has not been signaled.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Signals cancellation, forwarding it to the bound operation (if any).
    ///
    /// Only the first call has any effect.
    pub fn cancel(&self) {
        if self.inner.canceled.swap(true, Ordering::AcqRel) {
            return;
        }

        let binding = self.inner.binding.lock().take();

        if let Some((id, callback)) = binding {
            event!(Level::DEBUG, message = "forwarding cancellation", binding = id);
            callback();
        }
    }

    /// Whether [`cancel()`][Self::cancel] has been called.
    #[must_use]
    pub fn is_canceled(&self) -> bool {
        self.inner.canceled.load(Ordering::Acquire)
    }

    /// Binds the token to an operation. `on_cancel` runs once when the token is signaled, or
    /// immediately if it already was.
    ///
    /// The binding lasts until the returned [`CancelBinding`] is dropped or the token is bound
    /// to another operation.
    pub(crate) fn bind<F>(&self, on_cancel: F) -> CancelBinding
    where
        F: FnOnce() + Send + 'static,
    {
        let id = self.inner.next_binding_id.fetch_add(1, Ordering::Relaxed);

        let mut binding = self.inner.binding.lock();

        // Checked under the lock, so a concurrent cancel() either sees this binding or we see
        // its flag.
        if self.is_canceled() {
            drop(binding);
            on_cancel();
            return CancelBinding { token: Weak::new(), id };
        }

        if let Some((previous, _)) = binding.replace((id, Box::new(on_cancel))) {
            event!(
                Level::WARN,
                message = "cancellation token rebound while another operation was still bound",
                previous,
                binding = id
            );
        }

        CancelBinding {
            token: Arc::downgrade(&self.inner),
            id,
        }
    }
}

impl Debug for CancellationToken {
    #[cfg_attr(test, mutants::skip)] // There is no API contract this needs to satisfy.
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CancellationToken").field("canceled", &self.is_canceled()).finish()
    }
}

/// Keeps an operation bound to a [`CancellationToken`]. Dropping it detaches the operation, so a
/// later signal no longer reaches it.
#[derive(Debug)]
pub(crate) struct CancelBinding {
    token: Weak<TokenInner>,
    id: u64,
}

impl Drop for CancelBinding {
    fn drop(&mut self) {
        let Some(token) = self.token.upgrade() else {
            return;
        };

        let mut binding = token.binding.lock();
        if binding.as_ref().is_some_and(|(id, _)| *id == self.id) {
            let detached = binding.take();
            drop(binding);
            drop(detached);
        }
    }
}
