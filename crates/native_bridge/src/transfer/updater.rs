// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::fmt::Debug;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, AtomicU64, Ordering};

use parking_lot::ReentrantMutex;
use tracing::{Level, event};

use crate::{BoxError, CompletionBridge, NativeHandle, PendingResult, Result, TransferMonitor, TransferProgress, TransferState};

/// Receives progress snapshots of a transfer.
///
/// Called synchronously on native delivery threads, so implementations should return quickly.
/// Notifications of one updater never overlap and none follows the terminal one.
/// A panic is caught and logged; it never reaches the native runtime.
pub trait ProgressObserver<M>: Send + Sync + 'static {
    /// Called with the latest state of the transfer.
    fn on_progress(&self, progress: &TransferProgress<M>);
}

impl<M, F> ProgressObserver<M> for F
where
    F: Fn(&TransferProgress<M>) + Send + Sync + 'static,
{
    fn on_progress(&self, progress: &TransferProgress<M>) {
        self(progress);
    }
}

/// Connects a [`TransferMonitor`] to a [`ProgressObserver`].
///
/// Native progress ticks go through [`on_progress()`][Self::on_progress], which updates the
/// monitor and notifies the observer. When the bridged operation resolves, the monitor is
/// finalized and the observer receives one last notification with the terminal state and, on
/// success, the result metadata.
///
/// # Example
///
/// ```
/// # use std::sync::Arc;
/// # use native_bridge::{CompletionBridge, NativeHandle, TransferMonitor, TransferStateUpdater};
/// # async fn example(handle: impl NativeHandle) -> native_bridge::Result<()> {
/// let updater = Arc::new(TransferStateUpdater::new(
///     Arc::new(TransferMonitor::new()),
///     |progress: &native_bridge::TransferProgress| println!("{} bytes", progress.bytes_transferred),
/// ));
///
/// // The native progress callback calls `updater.on_progress(bytes, total)`.
/// updater.begin(CompletionBridge::new(handle), |_| Ok(())).await
/// # }
/// ```
pub struct TransferStateUpdater<M = ()> {
    monitor: Arc<TransferMonitor<M>>,
    observer: Box<dyn ProgressObserver<M>>,
    min_progress_delta: u64,
    last_forwarded_bytes: AtomicU64,
    last_forwarded_state: AtomicU8,
    // Orders notifications: nothing is forwarded after the terminal one. Reentrant so that an
    // observer may call back into the updater.
    notify_lock: ReentrantMutex<()>,
}

impl<M> TransferStateUpdater<M>
where
    M: Clone + Send + Sync + 'static,
{
    /// Binds `monitor` to `observer`.
    pub fn new(monitor: Arc<TransferMonitor<M>>, observer: impl ProgressObserver<M>) -> Self {
        let state = monitor.state();

        Self {
            monitor,
            observer: Box::new(observer),
            min_progress_delta: 0,
            last_forwarded_bytes: AtomicU64::new(0),
            last_forwarded_state: AtomicU8::new(state as u8),
            notify_lock: ReentrantMutex::new(()),
        }
    }

    /// Only forwards a tick if it advanced at least `delta` bytes past the last forwarded one.
    /// State changes and the final notification are always forwarded. Defaults to 0, which
    /// forwards every tick.
    #[must_use]
    pub fn with_min_progress_delta(mut self, delta: u64) -> Self {
        self.min_progress_delta = delta;
        self
    }

    /// The monitor this updater drives.
    #[must_use]
    pub fn monitor(&self) -> &Arc<TransferMonitor<M>> {
        &self.monitor
    }

    /// Records a native progress tick and notifies the observer.
    ///
    /// Returns whether the observer was notified. Ticks that changed nothing, arrived after the
    /// transfer finished or fell under the minimum delta are not forwarded.
    pub fn on_progress(&self, bytes_transferred: i64, total_bytes: i64) -> bool {
        if !self.monitor.on_progress(bytes_transferred, total_bytes) {
            return false;
        }

        let _guard = self.notify_lock.lock();

        // The transfer may have finished since the tick was recorded. The final notification
        // belongs to finalize().
        let snapshot = self.monitor.snapshot();
        if snapshot.state.is_terminal() {
            return false;
        }

        let state_changed =
            self.last_forwarded_state.swap(snapshot.state as u8, Ordering::AcqRel) != snapshot.state as u8;
        let advanced = snapshot
            .bytes_transferred
            .saturating_sub(self.last_forwarded_bytes.load(Ordering::Acquire));

        if !state_changed && advanced < self.min_progress_delta {
            return false;
        }

        self.last_forwarded_bytes.fetch_max(snapshot.bytes_transferred, Ordering::AcqRel);
        self.notify(&snapshot);

        true
    }

    /// Asks the native runtime to pause the transfer, notifying the observer if it did.
    pub fn request_pause(&self) -> bool {
        self.monitor.request_pause() && self.notify_state_change()
    }

    /// Asks the native runtime to resume the transfer, notifying the observer if it did.
    pub fn request_resume(&self) -> bool {
        self.monitor.request_resume() && self.notify_state_change()
    }

    /// Asks for the transfer to be canceled. See [`TransferMonitor::request_cancel()`].
    pub fn request_cancel(&self) -> bool {
        self.monitor.request_cancel()
    }

    /// Finishes the monitor according to `outcome` and sends the final notification.
    ///
    /// Only the first call has an effect. Returns whether this call finished the transfer.
    pub fn finalize(&self, outcome: &Result<M>) -> bool {
        if !self.monitor.finish(outcome) {
            return false;
        }

        let _guard = self.notify_lock.lock();
        let snapshot = self.monitor.snapshot();
        self.last_forwarded_state.store(snapshot.state as u8, Ordering::Release);
        self.notify(&snapshot);

        true
    }

    /// Begins the bridged operation of the transfer.
    ///
    /// The bridge is bound to the monitor's [`cancellation()`][TransferMonitor::cancellation]
    /// token and the updater is finalized with the outcome before the returned future resolves.
    pub fn begin<H, X>(self: &Arc<Self>, bridge: CompletionBridge<H>, extract: X) -> PendingResult<M>
    where
        H: NativeHandle,
        X: FnOnce(&H) -> std::result::Result<M, BoxError> + Send + 'static,
    {
        let updater = Arc::clone(self);

        bridge
            .with_cancellation(self.monitor.cancellation())
            .begin_observed(extract, move |outcome| {
                updater.finalize(outcome);
            })
    }

    fn notify_state_change(&self) -> bool {
        let _guard = self.notify_lock.lock();
        let snapshot = self.monitor.snapshot();
        if snapshot.state.is_terminal() {
            return false;
        }

        self.last_forwarded_state.store(snapshot.state as u8, Ordering::Release);
        self.notify(&snapshot);

        true
    }

    fn notify(&self, snapshot: &TransferProgress<M>) {
        if catch_unwind(AssertUnwindSafe(|| self.observer.on_progress(snapshot))).is_err() {
            event!(
                Level::ERROR,
                message = "progress observer panicked",
                state = ?snapshot.state,
                bytes_transferred = snapshot.bytes_transferred,
            );
        }
    }
}

impl<M> Debug for TransferStateUpdater<M> {
    #[cfg_attr(test, mutants::skip)] // There is no API contract this needs to satisfy.
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransferStateUpdater")
            .field("monitor", &self.monitor)
            .field("min_progress_delta", &self.min_progress_delta)
            .field(
                "last_forwarded_state",
                &TransferState::from_repr(self.last_forwarded_state.load(Ordering::Relaxed)),
            )
            .finish_non_exhaustive()
    }
}
