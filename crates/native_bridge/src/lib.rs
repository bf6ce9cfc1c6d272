// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

#![cfg_attr(coverage_nightly, feature(coverage_attribute))]

//! Bridges long-running operations executed by an external native runtime (uploads, downloads,
//! metadata fetches, query execution) to Rust futures.
//!
//! The native runtime hands out opaque handles and reports completion through callbacks that
//! can only carry an integer. This crate reconciles that model with Rust ownership:
//!
//! * [`CompletionBridge`] takes ownership of a [`NativeHandle`], registers a completion closure
//!   in a [`CallbackRegistry`] under an integer [`CompletionToken`] and returns a
//!   [`PendingResult`] that resolves once the native runtime delivers the token. The handle is
//!   released exactly once, whether the caller awaits, cancels or abandons the result.
//! * [`CancellationToken`] lets the caller request cancellation, which is forwarded to the
//!   native runtime. The operation still resolves only when the native runtime reports back.
//! * [`ErrorClassifier`] maps native status and error codes to the outcome taxonomy of
//!   [`Error`]: canceled, domain error or unknown failure.
//! * [`TransferMonitor`] and [`TransferStateUpdater`] track the byte-level progress and coarse
//!   [`TransferState`] of uploads and downloads and report them to a [`ProgressObserver`].
//!
//! The native runtime reports completions of operations registered in the process-wide
//! registry through the C entry points in [`ffi`].
//!
//! # Example
//!
//! ```
//! use native_bridge::{CancellationToken, CompletionBridge, NativeHandle, PinnedBuffer};
//!
//! # trait Download: NativeHandle { fn bytes_written(&self) -> usize; }
//! async fn download(handle: impl Download, buffer: PinnedBuffer) -> native_bridge::Result<usize> {
//!     let cancel = CancellationToken::new();
//!
//!     CompletionBridge::new(handle)
//!         .with_cancellation(&cancel)
//!         .with_resources(buffer)
//!         .begin(|handle| Ok(handle.bytes_written()))
//!         .await
//! }
//! ```
//!
//! # Logging
//!
//! The crate emits [`tracing`] events: lifecycle at trace level, cancellation forwarding at
//! debug level, ignored late progress ticks and displaced cancellation bindings at warn level,
//! and unclassifiable completions or panicking callbacks at error level. No subscriber is
//! installed by the crate.

mod bridge;
mod cancellation;
mod classify;
mod constants;
mod error;
pub mod ffi;
mod handle;
mod registry;
mod resources;
pub mod testing;
mod transfer;

pub use bridge::*;
pub use cancellation::CancellationToken;
pub use classify::*;
pub use constants::{CANCELED_SENTINEL, UNKNOWN_SIZE};
pub use error::*;
pub use handle::{HandleStatus, NativeHandle};
pub use registry::*;
pub use resources::*;
pub use transfer::*;
