// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Entry points the native runtime calls to report on operations registered in the
//! process-wide [`CallbackRegistry`].
//!
//! Both functions take the integer token that was passed to
//! [`NativeHandle::set_completion_callback()`][crate::NativeHandle::set_completion_callback] and
//! may be called from any native thread. A panic inside Rust code never unwinds into the native
//! caller; it is logged and reported through the return value.

use std::panic::{AssertUnwindSafe, catch_unwind};

use tracing::{Level, event};

use crate::{CallbackRegistry, CompletionToken};

/// The token was found and processed.
pub const FFI_OK: i32 = 0;

/// No pending registration has this token. Duplicate and late deliveries end up here.
pub const FFI_UNKNOWN_TOKEN: i32 = 1;

/// Processing the token panicked. The registration is gone.
pub const FFI_PANICKED: i32 = -1;

/// Reports that the operation registered under `token` has completed.
///
/// Returns [`FFI_OK`], [`FFI_UNKNOWN_TOKEN`] or [`FFI_PANICKED`].
#[unsafe(no_mangle)]
pub extern "C" fn native_bridge_complete(token: i32) -> i32 {
    guarded("native_bridge_complete", token, |registry, token| {
        registry.deliver(token).is_some()
    })
}

/// Reports that the operation registered under `token` will never complete, e.g. because the
/// native runtime is shutting down. The operation resolves as canceled and its handle is
/// released.
///
/// Returns [`FFI_OK`], [`FFI_UNKNOWN_TOKEN`] or [`FFI_PANICKED`].
#[unsafe(no_mangle)]
pub extern "C" fn native_bridge_revoke(token: i32) -> i32 {
    guarded("native_bridge_revoke", token, |registry, token| {
        registry.cancel_registration(token)
    })
}

fn guarded(entry_point: &'static str, token: i32, f: impl FnOnce(&CallbackRegistry, CompletionToken) -> bool) -> i32 {
    let registry = CallbackRegistry::global();

    match catch_unwind(AssertUnwindSafe(|| f(&*registry, CompletionToken(token)))) {
        Ok(true) => FFI_OK,
        Ok(false) => {
            event!(Level::DEBUG, message = "native entry point called with unknown token", entry_point, token);
            FFI_UNKNOWN_TOKEN
        }
        Err(_) => {
            event!(Level::ERROR, message = "panic while processing native entry point", entry_point, token);
            FFI_PANICKED
        }
    }
}
