// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::fmt::Debug;
use std::sync::OnceLock;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU8, AtomicU64, Ordering};

use tracing::{Level, event};

use crate::constants::UNKNOWN_SIZE;
use crate::{CancellationToken, Result, TransferProgress, TransferState};

/// Set in the byte counter once the transfer has finished. Byte counts fit in 63 bits since
/// they arrive as non-negative `i64`.
const BYTES_FROZEN: u64 = 1 << 63;

/// Replaces an unknown total once the transfer has finished, so a late total is not accepted.
const TOTAL_FROZEN_UNKNOWN: i64 = i64::MIN;

/// The native sub-handle of a transfer that accepts control requests while the transfer is
/// running. All requests are best effort: the native runtime may decline them or the transfer
/// may finish first.
#[cfg_attr(test, mockall::automock)]
pub trait TransferController: Send + Sync + 'static {
    /// Asks the native runtime to cancel the transfer. Returns whether it accepted the request.
    fn cancel(&self) -> bool;

    /// Asks the native runtime to pause the transfer. Returns whether it accepted the request.
    fn pause(&self) -> bool;

    /// Asks the native runtime to resume a paused transfer. Returns whether it accepted the
    /// request.
    fn resume(&self) -> bool;
}

/// Tracks bytes transferred, expected total and coarse state of one upload or download.
///
/// Progress ticks arrive from native threads at high frequency, so all updates and
/// [`snapshot()`][Self::snapshot] are lock-free. Ticks are sanitized rather than rejected:
///
/// * negative byte counts count as zero;
/// * byte counts never exceed a known total;
/// * byte counts never go backwards;
/// * a negative total means "unknown size", and once a total is known it never changes;
/// * ticks arriving after the transfer has finished are ignored.
///
/// The monitor is finalized by [`finish()`][Self::finish], usually through a
/// [`TransferStateUpdater`][crate::TransferStateUpdater] bound to the bridged operation.
pub struct TransferMonitor<M = ()> {
    bytes_transferred: AtomicU64,
    total_bytes: AtomicI64,
    state: AtomicU8,
    finished: AtomicBool,
    metadata: OnceLock<M>,
    cancellation: CancellationToken,
    controller: Option<Box<dyn TransferController>>,
}

impl<M> TransferMonitor<M> {
    /// Creates a monitor for a transfer of unknown size.
    #[must_use]
    pub fn new() -> Self {
        Self {
            bytes_transferred: AtomicU64::new(0),
            total_bytes: AtomicI64::new(UNKNOWN_SIZE),
            state: AtomicU8::new(TransferState::Pending as u8),
            finished: AtomicBool::new(false),
            metadata: OnceLock::new(),
            cancellation: CancellationToken::new(),
            controller: None,
        }
    }

    /// Sets the expected size of the transfer up front. A negative value means unknown.
    #[must_use]
    pub fn with_total_bytes(self, total_bytes: i64) -> Self {
        self.total_bytes.store(total_bytes.max(UNKNOWN_SIZE), Ordering::Relaxed);
        self
    }

    /// Forwards cancel, pause and resume requests to the native runtime through `controller`.
    /// Without a controller, pause and resume are not supported and cancellation only reaches
    /// operations bound to [`cancellation()`][Self::cancellation].
    #[must_use]
    pub fn with_controller(mut self, controller: impl TransferController) -> Self {
        self.controller = Some(Box::new(controller));
        self
    }

    /// The token signaled by [`request_cancel()`][Self::request_cancel]. Bind the bridged
    /// operation to it so that cancellation reaches the native handle.
    #[must_use]
    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancellation
    }

    /// Records a progress tick from the native runtime.
    ///
    /// Returns whether the tick changed anything: more bytes, a newly known total or the
    /// transfer moving from pending to in progress.
    pub fn on_progress(&self, bytes_transferred: i64, total_bytes: i64) -> bool {
        if self.finished.load(Ordering::Acquire) {
            event!(
                Level::WARN,
                message = "progress reported after the transfer finished",
                bytes_transferred,
                total_bytes
            );
            return false;
        }

        // Fails once the transfer has finished, which replaces an unknown total with a marker.
        let mut changed = total_bytes >= 0
            && self
                .total_bytes
                .compare_exchange(UNKNOWN_SIZE, total_bytes, Ordering::AcqRel, Ordering::Acquire)
                .is_ok();

        changed |= self.advance_bytes(u64::try_from(bytes_transferred).unwrap_or(0));

        changed |= self
            .state
            .compare_exchange(
                TransferState::Pending as u8,
                TransferState::InProgress as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok();

        changed
    }

    /// Raises the byte count to `bytes`, clamped to the known total. Never succeeds after
    /// [`finish()`][Self::finish] has frozen the count.
    fn advance_bytes(&self, bytes: u64) -> bool {
        let mut current = self.bytes_transferred.load(Ordering::Acquire);

        loop {
            if current & BYTES_FROZEN != 0 {
                return false;
            }

            let mut target = current.max(bytes);

            // Bytes reported before the total became known may exceed it.
            if let Some(total) = self.known_total() {
                target = target.min(total);
            }

            if target == current {
                return false;
            }

            match self
                .bytes_transferred
                .compare_exchange_weak(current, target, Ordering::AcqRel, Ordering::Acquire)
            {
                Ok(_) => return true,
                Err(actual) => current = actual,
            }
        }
    }

    /// Asks for the transfer to be canceled.
    ///
    /// Signals [`cancellation()`][Self::cancellation] and forwards the request to the native
    /// controller, if any. The state only becomes [`TransferState::Canceled`] once the operation
    /// resolves as canceled. Returns `false` if the transfer has already finished or
    /// cancellation was already requested.
    pub fn request_cancel(&self) -> bool {
        if self.state().is_terminal() || self.cancellation.is_canceled() {
            return false;
        }

        self.cancellation.cancel();

        if let Some(controller) = &self.controller {
            let accepted = controller.cancel();
            event!(Level::DEBUG, message = "transfer cancellation forwarded", accepted);
        }

        true
    }

    /// Whether [`request_cancel()`][Self::request_cancel] has been called.
    #[must_use]
    pub fn is_cancel_requested(&self) -> bool {
        self.cancellation.is_canceled()
    }

    /// Asks the native runtime to pause an in-progress transfer. The state changes to
    /// [`TransferState::Paused`] only if the native runtime accepts.
    pub fn request_pause(&self) -> bool {
        self.request_transition(TransferState::InProgress, TransferState::Paused, |c| c.pause())
    }

    /// Asks the native runtime to resume a paused transfer. The state changes back to
    /// [`TransferState::InProgress`] only if the native runtime accepts.
    pub fn request_resume(&self) -> bool {
        self.request_transition(TransferState::Paused, TransferState::InProgress, |c| c.resume())
    }

    fn request_transition(
        &self,
        from: TransferState,
        to: TransferState,
        forward: impl FnOnce(&dyn TransferController) -> bool,
    ) -> bool {
        let Some(controller) = &self.controller else {
            return false;
        };

        if self.state() != from || !forward(controller.as_ref()) {
            return false;
        }

        // The transfer may have finished while the native runtime was processing the request.
        let moved = self
            .state
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok();

        event!(Level::DEBUG, message = "transfer state change requested", from = ?from, to = ?to, moved);

        moved
    }

    /// Moves the transfer to its terminal state according to the outcome of the operation:
    /// success to [`TransferState::Succeeded`] (keeping the metadata), cancellation to
    /// [`TransferState::Canceled`] and any other error to [`TransferState::Failed`].
    ///
    /// Only the first call has an effect. Returns whether this call finished the transfer.
    pub fn finish(&self, outcome: &Result<M>) -> bool
    where
        M: Clone,
    {
        if self.finished.swap(true, Ordering::AcqRel) {
            return false;
        }

        // Ticks already past the check in on_progress() can no longer move the counters.
        self.bytes_transferred.fetch_or(BYTES_FROZEN, Ordering::AcqRel);
        _ = self
            .total_bytes
            .compare_exchange(UNKNOWN_SIZE, TOTAL_FROZEN_UNKNOWN, Ordering::AcqRel, Ordering::Acquire);

        let state = match outcome {
            Ok(metadata) => {
                // We are the only writer, so this cannot fail.
                _ = self.metadata.set(metadata.clone());
                TransferState::Succeeded
            }
            Err(e) if e.is_canceled() => TransferState::Canceled,
            Err(_) => TransferState::Failed,
        };

        self.state.store(state as u8, Ordering::Release);

        event!(
            Level::TRACE,
            message = "transfer finished",
            state = ?state,
            bytes_transferred = self.bytes(),
        );

        true
    }

    /// The current state of the transfer.
    #[must_use]
    pub fn state(&self) -> TransferState {
        TransferState::from_repr(self.state.load(Ordering::Acquire))
    }

    /// A consistent-enough view of the transfer, safe to take at any time from any thread.
    #[must_use]
    pub fn snapshot(&self) -> TransferProgress<M>
    where
        M: Clone,
    {
        // State first: a terminal state read here guarantees the metadata is visible.
        let state = self.state();
        let total_bytes = self.known_total();
        let bytes_transferred = self.bytes();

        TransferProgress {
            bytes_transferred: total_bytes.map_or(bytes_transferred, |total| bytes_transferred.min(total)),
            total_bytes,
            state,
            metadata: if state == TransferState::Succeeded {
                self.metadata.get().cloned()
            } else {
                None
            },
        }
    }

    fn bytes(&self) -> u64 {
        self.bytes_transferred.load(Ordering::Acquire) & !BYTES_FROZEN
    }

    fn known_total(&self) -> Option<u64> {
        u64::try_from(self.total_bytes.load(Ordering::Acquire)).ok()
    }
}

impl<M> Default for TransferMonitor<M> {
    fn default() -> Self {
        Self::new()
    }
}

impl<M> Debug for TransferMonitor<M> {
    #[cfg_attr(test, mutants::skip)] // There is no API contract this needs to satisfy.
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransferMonitor")
            .field("bytes_transferred", &self.bytes())
            .field("total_bytes", &self.total_bytes.load(Ordering::Relaxed))
            .field("state", &self.state())
            .field("cancellation", &self.cancellation)
            .field("has_controller", &self.controller.is_some())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::thread;

    use static_assertions::assert_impl_all;

    use super::*;
    use crate::Error;

    #[test]
    fn thread_safe_type() {
        assert_impl_all!(TransferMonitor<String>: Send, Sync);
    }

    #[test]
    fn starts_pending_and_unknown() {
        let monitor = TransferMonitor::<()>::new();
        let snapshot = monitor.snapshot();

        assert_eq!(snapshot.state, TransferState::Pending);
        assert_eq!(snapshot.bytes_transferred, 0);
        assert_eq!(snapshot.total_bytes, None);
        assert!(!monitor.is_cancel_requested());
    }

    #[test]
    fn scenario_progress_then_success() {
        let monitor = TransferMonitor::new().with_total_bytes(1000);

        assert!(monitor.on_progress(400, 1000));
        let first = monitor.snapshot();
        assert_eq!(first.state, TransferState::InProgress);
        assert_eq!(first.bytes_transferred, 400);

        assert!(monitor.on_progress(1000, 1000));
        let second = monitor.snapshot();
        assert_eq!(second.state, TransferState::InProgress);
        assert_eq!(second.bytes_transferred, 1000);

        assert!(monitor.finish(&Ok("etag-1".to_string())));
        let last = monitor.snapshot();
        assert_eq!(last.state, TransferState::Succeeded);
        assert_eq!(last.bytes_transferred, 1000);
        assert_eq!(last.metadata.as_deref(), Some("etag-1"));
    }

    #[test]
    fn clamps_to_known_total() {
        let monitor = TransferMonitor::<()>::new();

        monitor.on_progress(1500, 1000);
        assert_eq!(monitor.snapshot().bytes_transferred, 1000);
        assert_eq!(monitor.snapshot().total_bytes, Some(1000));
    }

    #[test]
    fn total_is_fixed_once_known() {
        let monitor = TransferMonitor::<()>::new();

        monitor.on_progress(10, 100);
        monitor.on_progress(20, 5000);

        assert_eq!(monitor.snapshot().total_bytes, Some(100));
    }

    #[test]
    fn late_total_clamps_earlier_bytes() {
        let monitor = TransferMonitor::<()>::new();

        monitor.on_progress(500, UNKNOWN_SIZE);
        monitor.on_progress(600, 400);

        assert_eq!(monitor.snapshot().bytes_transferred, 400);
    }

    #[test]
    fn negative_values_are_sanitized() {
        let monitor = TransferMonitor::<()>::new();

        assert!(monitor.on_progress(-5, -20));
        let snapshot = monitor.snapshot();

        assert_eq!(snapshot.bytes_transferred, 0);
        assert_eq!(snapshot.total_bytes, None);
        assert_eq!(snapshot.state, TransferState::InProgress);
    }

    #[test]
    fn unknown_size_disables_clamp() {
        let monitor = TransferMonitor::<()>::new();

        monitor.on_progress(i64::MAX, UNKNOWN_SIZE);

        assert_eq!(monitor.snapshot().bytes_transferred, u64::try_from(i64::MAX).unwrap());
    }

    #[test]
    fn regressions_are_ignored() {
        let monitor = TransferMonitor::<()>::new();

        assert!(monitor.on_progress(300, 1000));
        assert!(!monitor.on_progress(200, 1000));
        assert!(!monitor.on_progress(300, 1000));

        assert_eq!(monitor.snapshot().bytes_transferred, 300);
    }

    #[test]
    fn progress_after_terminal_is_ignored() {
        let monitor = TransferMonitor::<()>::new();
        monitor.on_progress(10, 100);
        monitor.finish(&Err(Error::Domain {
            code: 5,
            message: "disk full".to_string(),
        }));

        assert!(!monitor.on_progress(90, 100));

        let snapshot = monitor.snapshot();
        assert_eq!(snapshot.state, TransferState::Failed);
        assert_eq!(snapshot.bytes_transferred, 10);
        assert_eq!(snapshot.metadata, None);
    }

    #[test]
    fn finish_only_once() {
        let monitor = TransferMonitor::<u32>::new();

        assert!(monitor.finish(&Err(Error::Canceled)));
        assert!(!monitor.finish(&Ok(1)));

        let snapshot = monitor.snapshot();
        assert_eq!(snapshot.state, TransferState::Canceled);
        assert_eq!(snapshot.metadata, None);
    }

    #[test]
    fn cancel_without_controller_signals_token() {
        let monitor = TransferMonitor::<()>::new();

        assert!(monitor.request_cancel());
        assert!(monitor.is_cancel_requested());
        assert!(monitor.cancellation().is_canceled());
        assert!(!monitor.request_cancel());

        // The state only changes once the operation resolves.
        assert_eq!(monitor.state(), TransferState::Pending);
    }

    #[test]
    fn cancel_is_forwarded_once() {
        let mut controller = MockTransferController::new();
        controller.expect_cancel().times(1).return_const(true);

        let monitor = TransferMonitor::<()>::new().with_controller(controller);

        assert!(monitor.request_cancel());
        assert!(!monitor.request_cancel());
    }

    #[test]
    fn cancel_after_finish_is_rejected() {
        let mut controller = MockTransferController::new();
        controller.expect_cancel().never();

        let monitor = TransferMonitor::<()>::new().with_controller(controller);
        monitor.finish(&Ok(()));

        assert!(!monitor.request_cancel());
        assert!(!monitor.is_cancel_requested());
    }

    #[test]
    fn pause_and_resume_when_accepted() {
        let mut controller = MockTransferController::new();
        controller.expect_pause().times(1).return_const(true);
        controller.expect_resume().times(1).return_const(true);

        let monitor = TransferMonitor::<()>::new().with_controller(controller);
        monitor.on_progress(1, 10);

        assert!(monitor.request_pause());
        assert_eq!(monitor.state(), TransferState::Paused);

        // Ticks while paused keep counting but do not resume the transfer.
        monitor.on_progress(2, 10);
        assert_eq!(monitor.snapshot().bytes_transferred, 2);
        assert_eq!(monitor.state(), TransferState::Paused);

        assert!(monitor.request_resume());
        assert_eq!(monitor.state(), TransferState::InProgress);
    }

    #[test]
    fn pause_declined_by_native() {
        let mut controller = MockTransferController::new();
        controller.expect_pause().times(1).return_const(false);

        let monitor = TransferMonitor::<()>::new().with_controller(controller);
        monitor.on_progress(1, 10);

        assert!(!monitor.request_pause());
        assert_eq!(monitor.state(), TransferState::InProgress);
    }

    #[test]
    fn pause_requires_in_progress() {
        let mut controller = MockTransferController::new();
        controller.expect_pause().never();
        controller.expect_resume().never();

        let monitor = TransferMonitor::<()>::new().with_controller(controller);

        assert!(!monitor.request_pause());
        assert!(!monitor.request_resume());
        assert_eq!(monitor.state(), TransferState::Pending);
    }

    #[test]
    fn pause_without_controller_is_unsupported() {
        let monitor = TransferMonitor::<()>::new();
        monitor.on_progress(1, 10);

        assert!(!monitor.request_pause());
        assert_eq!(monitor.state(), TransferState::InProgress);
    }

    #[test]
    fn paused_transfer_can_finish() {
        let mut controller = MockTransferController::new();
        controller.expect_pause().return_const(true);

        let monitor = TransferMonitor::<()>::new().with_controller(controller);
        monitor.on_progress(1, 10);
        monitor.request_pause();

        assert!(monitor.finish(&Err(Error::Canceled)));
        assert_eq!(monitor.state(), TransferState::Canceled);
    }

    #[test]
    fn finish_freezes_counters() {
        let monitor = TransferMonitor::<()>::new();
        monitor.on_progress(100, UNKNOWN_SIZE);

        assert!(monitor.finish(&Ok(())));

        // Calls that raced past the finished check still cannot move anything.
        assert!(!monitor.advance_bytes(900));
        assert!(
            monitor
                .total_bytes
                .compare_exchange(UNKNOWN_SIZE, 1000, Ordering::AcqRel, Ordering::Acquire)
                .is_err()
        );

        let snapshot = monitor.snapshot();
        assert_eq!(snapshot.bytes_transferred, 100);
        assert_eq!(snapshot.total_bytes, None);
        assert_eq!(snapshot.state, TransferState::Succeeded);
    }

    #[test]
    fn ticks_racing_finish_do_not_change_terminal_snapshot() {
        for _ in 0..200 {
            let monitor = Arc::new(TransferMonitor::<()>::new());

            let workers: Vec<_> = (0..4_i64)
                .map(|worker| {
                    let monitor = Arc::clone(&monitor);
                    thread::spawn(move || {
                        for step in 0..500 {
                            monitor.on_progress(step * 4 + worker, UNKNOWN_SIZE);
                        }
                    })
                })
                .collect();

            thread::yield_now();
            monitor.finish(&Err(Error::Canceled));
            let at_finish = monitor.snapshot();

            for worker in workers {
                worker.join().unwrap();
            }

            assert_eq!(monitor.snapshot(), at_finish);
            assert_eq!(at_finish.state, TransferState::Canceled);
        }
    }

    #[test]
    fn concurrent_ticks_are_monotonic() {
        let monitor = Arc::new(TransferMonitor::<()>::new().with_total_bytes(10_000));

        let workers: Vec<_> = (0..4)
            .map(|worker| {
                let monitor = Arc::clone(&monitor);
                thread::spawn(move || {
                    let mut last = 0;
                    for step in 0..1000 {
                        monitor.on_progress(step * 10 + worker, 10_000);

                        let seen = monitor.snapshot().bytes_transferred;
                        assert!(seen >= last);
                        assert!(seen <= 10_000);
                        last = seen;
                    }
                })
            })
            .collect();

        for worker in workers {
            worker.join().unwrap();
        }

        assert_eq!(monitor.snapshot().bytes_transferred, 9993);
    }
}
