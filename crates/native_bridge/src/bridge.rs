// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::fmt::Debug;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::task::{Context, Poll};

use tracing::{Level, event};

use crate::cancellation::CancelBinding;
use crate::constants::{MSG_EXTRACTION_PANICKED, MSG_NOT_STARTED};
use crate::handle::OwnedHandle;
use crate::{
    BoxError, CallbackRegistry, CancellationToken, CompletionStatus, Error, ErrorClassifier, ErrorKind, NativeHandle,
    Result, UserResource,
};

const MSG_RESULT_TAKEN: &str = "operation result was already taken";

/// Converts the eventual completion of one native handle into one resolution of a
/// [`PendingResult`].
///
/// The bridge takes exclusive ownership of the handle. It registers a completion callback with
/// the native runtime and, when the completion is delivered, classifies the outcome, extracts
/// the result, releases the handle and resolves the returned future, in that order.
///
/// # Lifetime guarantees
///
/// * The handle is released exactly once: after its completion has been delivered, or when
///   the registration is revoked without delivery, or immediately if it was never valid.
/// * Dropping the [`PendingResult`] does not affect the native operation. Its completion is
///   still processed when it arrives, which releases the handle and any attached resources.
///
/// # Cancellation
///
/// A bound [`CancellationToken`] forwards cancellation to the native runtime but never resolves
/// the operation locally. If the token is signaled before the completion is delivered, the
/// operation resolves as [`Error::Canceled`] even if the native runtime reports success.
///
/// # Example
///
/// ```
/// # use native_bridge::{CompletionBridge, NativeHandle};
/// # async fn example(handle: impl NativeHandle + ReadSize) -> native_bridge::Result<u64> {
/// let size = CompletionBridge::new(handle)
///     .begin(|handle| Ok(handle.read_size()))
///     .await?;
/// # Ok(size)
/// # }
/// # trait ReadSize { fn read_size(&self) -> u64; }
/// ```
pub struct CompletionBridge<H: NativeHandle> {
    handle: H,
    registry: Arc<CallbackRegistry>,
    cancellation: Option<CancellationToken>,
    classifier: ErrorClassifier,
    user_resources: Option<Box<dyn UserResource>>,
}

impl<H: NativeHandle> CompletionBridge<H> {
    /// Prepares to bridge `handle`, with completions routed through the process-wide registry.
    pub fn new(handle: H) -> Self {
        Self {
            handle,
            registry: CallbackRegistry::global(),
            cancellation: None,
            classifier: ErrorClassifier::default(),
            user_resources: None,
        }
    }

    /// Routes the completion through `registry` instead of the process-wide one. The native
    /// side of the handle must deliver the token to this registry.
    #[must_use]
    pub fn with_registry(mut self, registry: Arc<CallbackRegistry>) -> Self {
        self.registry = registry;
        self
    }

    /// Binds the operation to a cancellation token.
    #[must_use]
    pub fn with_cancellation(mut self, token: &CancellationToken) -> Self {
        self.cancellation = Some(token.clone());
        self
    }

    /// Sets the native error code that the handle's domain uses to report cancellation.
    /// Defaults to [`CANCELED_SENTINEL`][crate::CANCELED_SENTINEL].
    #[must_use]
    pub fn with_canceled_code(mut self, code: i32) -> Self {
        self.classifier = ErrorClassifier::new(code);
        self
    }

    /// Attaches an arbitrary value to the operation, to be dropped once the operation completes.
    /// This keeps memory the native runtime is using (e.g. a [`PinnedBuffer`][crate::PinnedBuffer])
    /// alive while the operation is in progress, even if the [`PendingResult`] is dropped.
    #[must_use]
    pub fn with_resources(mut self, resources: impl UserResource) -> Self {
        self.user_resources = Some(Box::new(resources));
        self
    }

    /// Starts waiting for the completion of the native operation.
    ///
    /// `extract` reads the result out of the handle once the operation has completed
    /// successfully. An error or panic in `extract` resolves the operation as
    /// [`Error::UnknownFailure`].
    pub fn begin<T, X>(self, extract: X) -> PendingResult<T>
    where
        T: Send + 'static,
        X: FnOnce(&H) -> std::result::Result<T, BoxError> + Send + 'static,
    {
        self.begin_observed(extract, |_| {})
    }

    /// Like [`begin()`][Self::begin], additionally calling `observe` with the outcome right
    /// before the returned future resolves.
    ///
    /// `observe` runs on the thread that delivers the completion. A panic in `observe` is
    /// logged and otherwise ignored.
    pub fn begin_observed<T, X, O>(self, extract: X, observe: O) -> PendingResult<T>
    where
        T: Send + 'static,
        X: FnOnce(&H) -> std::result::Result<T, BoxError> + Send + 'static,
        O: FnOnce(&Result<T>) + Send + 'static,
    {
        let Self {
            handle,
            registry,
            cancellation,
            classifier,
            user_resources,
        } = self;

        let (sender, receiver) = oneshot::channel();
        let resolver = Resolver {
            sender: Some(sender),
            observe: Some(observe),
        };
        let pending = PendingResult {
            receiver: Some(receiver),
        };

        let handle = Arc::new(OwnedHandle::new(handle));

        if !handle.status().is_valid() {
            event!(Level::DEBUG, message = "bridged handle is not valid, failing immediately");

            drop(handle);
            drop(user_resources);
            resolver.resolve(Err(Error::unknown(MSG_NOT_STARTED)));

            return pending;
        }

        let cancel_requested = Arc::new(AtomicBool::new(false));

        let binding = cancellation.map(|token| {
            token.bind(forward_cancellation(
                Arc::downgrade(&handle),
                Arc::clone(&cancel_requested),
            ))
        });

        let delivery = Delivery {
            handle: Arc::clone(&handle),
            cancel_requested,
            binding,
            classifier,
            user_resources,
            resolver,
        };

        let token = registry.register(move || delivery.complete(extract));

        event!(Level::TRACE, message = "bridge begin", token = token.0);

        // The native side may deliver the completion from another thread before this call even
        // returns. Our reference keeps the handle alive until the call is over.
        handle.set_completion_callback(token);
        drop(handle);

        pending
    }
}

impl<H: NativeHandle> Debug for CompletionBridge<H> {
    #[cfg_attr(test, mutants::skip)] // There is no API contract this needs to satisfy.
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompletionBridge")
            .field("registry", &self.registry)
            .field("cancellation", &self.cancellation)
            .field("classifier", &self.classifier)
            .field("user_resources", &self.user_resources)
            .finish_non_exhaustive()
    }
}

fn forward_cancellation<H: NativeHandle>(
    handle: Weak<OwnedHandle<H>>,
    cancel_requested: Arc<AtomicBool>,
) -> impl FnOnce() + Send + 'static {
    move || {
        cancel_requested.store(true, Ordering::Release);

        // If the completion was already processed, there is nothing left to cancel.
        let Some(handle) = handle.upgrade() else {
            return;
        };

        let accepted = handle.cancel();
        event!(Level::DEBUG, message = "cancellation forwarded to native runtime", accepted);
    }
}

/// Everything the completion closure needs, owned by the registry entry until delivery.
struct Delivery<H: NativeHandle, T, O: FnOnce(&Result<T>)> {
    handle: Arc<OwnedHandle<H>>,
    cancel_requested: Arc<AtomicBool>,
    binding: Option<CancelBinding>,
    classifier: ErrorClassifier,
    user_resources: Option<Box<dyn UserResource>>,
    resolver: Resolver<T, O>,
}

impl<H: NativeHandle, T, O: FnOnce(&Result<T>)> Delivery<H, T, O> {
    fn complete<X>(self, extract: X)
    where
        X: FnOnce(&H) -> std::result::Result<T, BoxError>,
    {
        let Self {
            handle,
            cancel_requested,
            binding,
            classifier,
            user_resources,
            resolver,
        } = self;

        // From here on, a cancellation signal no longer reaches this operation.
        drop(binding);

        let native: &H = &handle;
        let status = CompletionStatus::capture(native);
        let canceled = cancel_requested.load(Ordering::Acquire);

        let outcome = match status.classify(classifier, canceled) {
            ErrorKind::Success => extract_result(native, extract),
            ErrorKind::Canceled => Err(Error::Canceled),
            ErrorKind::Domain { code, message } => Err(Error::Domain { code, message }),
            ErrorKind::UnknownFailure { message } => {
                event!(
                    Level::ERROR,
                    message = "unclassifiable native completion",
                    reason = message.as_str(),
                    status = ?status.status,
                    error_code = status.error_code,
                    error_message = status.error_message.as_str(),
                );

                Err(Error::unknown(message))
            }
        };

        event!(
            Level::TRACE,
            message = "bridge resolved",
            succeeded = outcome.is_ok(),
            canceled = outcome.as_ref().is_err_and(Error::is_canceled),
        );

        // Releases the handle, unless a concurrent cancellation still holds a reference, in
        // which case that reference releases it once the cancel call returns.
        drop(handle);
        drop(user_resources);

        resolver.resolve(outcome);
    }
}

fn extract_result<H, T, X>(handle: &H, extract: X) -> Result<T>
where
    X: FnOnce(&H) -> std::result::Result<T, BoxError>,
{
    match catch_unwind(AssertUnwindSafe(|| extract(handle))) {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(e)) => {
            event!(Level::ERROR, message = "result extraction failed", error = %e);
            Err(Error::unknown_with_source("result extraction failed", e))
        }
        Err(_) => {
            event!(Level::ERROR, message = MSG_EXTRACTION_PANICKED);
            Err(Error::unknown(MSG_EXTRACTION_PANICKED))
        }
    }
}

/// Sets the outcome of an operation exactly once. Resolves as canceled if dropped first,
/// e.g. when the native runtime revokes the registration without delivering it.
struct Resolver<T, O: FnOnce(&Result<T>)> {
    sender: Option<oneshot::Sender<Result<T>>>,
    observe: Option<O>,
}

impl<T, O: FnOnce(&Result<T>)> Resolver<T, O> {
    fn resolve(mut self, outcome: Result<T>) {
        self.set(outcome);
    }

    fn set(&mut self, outcome: Result<T>) {
        let Some(sender) = self.sender.take() else {
            return;
        };

        if let Some(observe) = self.observe.take()
            && catch_unwind(AssertUnwindSafe(|| observe(&outcome))).is_err()
        {
            event!(Level::ERROR, message = "completion observer panicked");
        }

        // We do not care if the receiver has been dropped - the caller abandoned the operation.
        _ = sender.send(outcome);
    }
}

impl<T, O: FnOnce(&Result<T>)> Drop for Resolver<T, O> {
    fn drop(&mut self) {
        if self.sender.is_some() {
            event!(Level::DEBUG, message = "completion registration dropped without delivery");
            self.set(Err(Error::Canceled));
        }
    }
}

/// The outcome of a bridged native operation, available once its completion is delivered.
///
/// Awaiting yields `Ok(value)` on success, [`Err(Error::Canceled)`][Error::Canceled] if the
/// operation was canceled and any other [`Error`] if it failed.
///
/// Dropping this abandons the result but not the operation, see [`CompletionBridge`].
#[must_use = "dropping a pending result abandons the outcome of the native operation"]
pub struct PendingResult<T> {
    receiver: Option<oneshot::Receiver<Result<T>>>,
}

impl<T> PendingResult<T> {
    /// Takes the outcome if the operation has already been resolved, without waiting.
    ///
    /// Once this has returned `Some`, the outcome has been taken and awaiting the pending result
    /// yields an [`Error::UnknownFailure`].
    pub fn try_result(&mut self) -> Option<Result<T>> {
        let receiver = self.receiver.as_ref()?;

        match receiver.try_recv() {
            Ok(outcome) => {
                self.receiver = None;
                Some(outcome)
            }
            Err(oneshot::TryRecvError::Empty) => None,
            Err(oneshot::TryRecvError::Disconnected) => {
                self.receiver = None;
                Some(Err(Error::unknown(MSG_RESULT_TAKEN)))
            }
        }
    }
}

impl<T> Debug for PendingResult<T> {
    #[cfg_attr(test, mutants::skip)] // There is no API contract this needs to satisfy.
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PendingResult")
            .field("taken", &self.receiver.is_none())
            .finish()
    }
}

impl<T> Future for PendingResult<T> {
    type Output = Result<T>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let Some(receiver) = self.receiver.as_mut() else {
            return Poll::Ready(Err(Error::unknown(MSG_RESULT_TAKEN)));
        };

        let outcome = match Pin::new(receiver).poll(cx) {
            Poll::Pending => return Poll::Pending,
            Poll::Ready(Ok(outcome)) => outcome,
            // The resolver always sends before it goes away, so this is only reachable if the
            // result was already taken.
            Poll::Ready(Err(_)) => Err(Error::unknown(MSG_RESULT_TAKEN)),
        };

        self.receiver = None;
        Poll::Ready(outcome)
    }
}
