// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Byte-level progress tracking for uploads and downloads executed by the native runtime.
//!
//! A [`TransferMonitor`] receives progress ticks from native threads and cancellation or
//! pause requests from the caller, and exposes a lock-free [`snapshot()`][TransferMonitor::snapshot].
//! A [`TransferStateUpdater`] forwards the monitor's changes to a caller-supplied
//! [`ProgressObserver`] and finalizes the monitor when the bridged operation resolves.

mod monitor;
mod state;
mod updater;

pub use monitor::{TransferController, TransferMonitor};
pub use state::{TransferProgress, TransferState};
pub use updater::{ProgressObserver, TransferStateUpdater};
