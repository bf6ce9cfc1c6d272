// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

#![cfg(any(test, feature = "unstable-testing"))]

//! Fakes of the native side, used in unit tests and by crates that test their own use of the
//! bridge. This is not an officially supported API and may change at any time.
//!
//! The contents are published only when the `unstable-testing` feature is enabled.

use std::sync::Arc;
use std::sync::atomic::{AtomicI32, AtomicUsize, Ordering};

use parking_lot::Mutex;

use crate::{CallbackRegistry, CompletionToken, HandleStatus, NativeHandle, TransferProgress};

/// An in-memory stand-in for a native operation handle.
///
/// Clones share state, so a test keeps one clone to play the native runtime while the bridge
/// owns the other. Completion is delivered through the registry given at construction, on the
/// thread that calls [`complete()`][Self::complete] or [`fail()`][Self::fail].
#[derive(Clone, Debug)]
pub struct FakeHandle {
    inner: Arc<FakeHandleInner>,
}

#[derive(Debug)]
struct FakeHandleInner {
    registry: Arc<CallbackRegistry>,
    status: Mutex<HandleStatus>,
    error_code: AtomicI32,
    error_message: Mutex<String>,
    value: Mutex<Option<i64>>,
    token: Mutex<Option<CompletionToken>>,
    complete_on_callback: Mutex<Option<i64>>,
    callback_calls: AtomicUsize,
    cancel_calls: AtomicUsize,
    release_calls: AtomicUsize,
}

impl FakeHandle {
    /// Creates a handle for a pending operation whose completion is delivered to `registry`.
    #[must_use]
    pub fn new(registry: Arc<CallbackRegistry>) -> Self {
        Self {
            inner: Arc::new(FakeHandleInner {
                registry,
                status: Mutex::new(HandleStatus::Pending),
                error_code: AtomicI32::new(0),
                error_message: Mutex::new(String::new()),
                value: Mutex::new(None),
                token: Mutex::new(None),
                complete_on_callback: Mutex::new(None),
                callback_calls: AtomicUsize::new(0),
                cancel_calls: AtomicUsize::new(0),
                release_calls: AtomicUsize::new(0),
            }),
        }
    }

    /// Overrides the reported status without delivering anything.
    pub fn set_status(&self, status: HandleStatus) {
        *self.inner.status.lock() = status;
    }

    /// Makes the operation complete successfully with `value` from inside
    /// `set_completion_callback`, like a native runtime that finished before the callback was set.
    pub fn complete_on_callback(&self, value: i64) {
        *self.inner.complete_on_callback.lock() = Some(value);
    }

    /// Completes the operation successfully with `value` and delivers the completion.
    pub fn complete(&self, value: i64) {
        *self.inner.value.lock() = Some(value);
        self.finish(0, "");
    }

    /// Completes the operation with a native error and delivers the completion.
    pub fn fail(&self, error_code: i32, error_message: &str) {
        self.finish(error_code, error_message);
    }

    /// Delivers the registered token as is. Returns whether a registration was still pending.
    pub fn deliver(&self) -> bool {
        let Some(token) = *self.inner.token.lock() else {
            return false;
        };

        self.inner.registry.deliver(token).is_some()
    }

    /// The token passed to `set_completion_callback`, if any.
    #[must_use]
    pub fn token(&self) -> Option<CompletionToken> {
        *self.inner.token.lock()
    }

    /// The value of a successfully completed operation.
    #[must_use]
    pub fn value(&self) -> Option<i64> {
        *self.inner.value.lock()
    }

    /// How many times `set_completion_callback` was called.
    #[must_use]
    pub fn callback_count(&self) -> usize {
        self.inner.callback_calls.load(Ordering::Acquire)
    }

    /// How many times `cancel` was called.
    #[must_use]
    pub fn cancel_count(&self) -> usize {
        self.inner.cancel_calls.load(Ordering::Acquire)
    }

    /// How many times `release` was called.
    #[must_use]
    pub fn release_count(&self) -> usize {
        self.inner.release_calls.load(Ordering::Acquire)
    }

    fn finish(&self, error_code: i32, error_message: &str) {
        self.inner.error_code.store(error_code, Ordering::Release);
        *self.inner.error_message.lock() = error_message.to_string();
        *self.inner.status.lock() = HandleStatus::Complete;

        self.deliver();
    }
}

impl NativeHandle for FakeHandle {
    fn status(&self) -> HandleStatus {
        *self.inner.status.lock()
    }

    fn error_code(&self) -> i32 {
        self.inner.error_code.load(Ordering::Acquire)
    }

    fn error_message(&self) -> String {
        self.inner.error_message.lock().clone()
    }

    fn set_completion_callback(&self, token: CompletionToken) {
        self.inner.callback_calls.fetch_add(1, Ordering::AcqRel);
        *self.inner.token.lock() = Some(token);

        let immediate = self.inner.complete_on_callback.lock().take();
        if let Some(value) = immediate {
            self.complete(value);
        }
    }

    fn cancel(&self) -> bool {
        self.inner.cancel_calls.fetch_add(1, Ordering::AcqRel);
        true
    }

    fn release(&self) {
        self.inner.release_calls.fetch_add(1, Ordering::AcqRel);
    }
}

/// A progress observer that keeps every snapshot it receives. Clones share the recording.
#[derive(Debug)]
pub struct RecordingObserver<M = ()> {
    snapshots: Arc<Mutex<Vec<TransferProgress<M>>>>,
}

impl<M: Clone> RecordingObserver<M> {
    /// Creates an observer with an empty recording.
    #[must_use]
    pub fn new() -> Self {
        Self {
            snapshots: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// All snapshots received so far, oldest first.
    #[must_use]
    pub fn snapshots(&self) -> Vec<TransferProgress<M>> {
        self.snapshots.lock().clone()
    }

    /// The most recent snapshot.
    #[must_use]
    pub fn last(&self) -> Option<TransferProgress<M>> {
        self.snapshots.lock().last().cloned()
    }

    /// Number of snapshots received so far.
    #[must_use]
    pub fn len(&self) -> usize {
        self.snapshots.lock().len()
    }

    /// Whether no snapshot has been received yet.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.snapshots.lock().is_empty()
    }
}

impl<M: Clone> Default for RecordingObserver<M> {
    fn default() -> Self {
        Self::new()
    }
}

impl<M> Clone for RecordingObserver<M> {
    fn clone(&self) -> Self {
        Self {
            snapshots: Arc::clone(&self.snapshots),
        }
    }
}

impl<M> crate::ProgressObserver<M> for RecordingObserver<M>
where
    M: Clone + Send + 'static,
{
    fn on_progress(&self, progress: &TransferProgress<M>) {
        self.snapshots.lock().push(progress.clone());
    }
}
