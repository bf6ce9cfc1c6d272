// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::collections::HashMap;
use std::fmt::Debug;
use std::sync::{Arc, LazyLock};

use parking_lot::Mutex;
use tracing::{Level, event};

/// Identifies one pending completion closure in a [`CallbackRegistry`].
///
/// This is the only value that crosses the native boundary: the native runtime stores it next
/// to the operation and hands it back when the operation completes. Tokens are always positive.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub struct CompletionToken(pub i32);

type PendingClosure<R> = Box<dyn FnOnce() -> R + Send>;

static GLOBAL: LazyLock<Arc<CallbackRegistry>> = LazyLock::new(|| Arc::new(CallbackRegistry::new()));

/// Maps integer tokens to pending completion closures, so the native runtime can trigger a Rust
/// closure while only carrying an integer.
///
/// Every closure is invoked at most once. The first delivery of a token removes its entry;
/// later deliveries of the same token (duplicate or late native callbacks) are ignored.
///
/// Keys are handed out from a rolling counter and skip keys that are still pending, so a token
/// that wraps around never collides with an operation that is still in flight.
///
/// # Thread safety
///
/// This type is thread-safe. All operations serialize through one lock, which is never held
/// while a closure runs or is dropped - a closure may itself register new tokens.
pub struct CallbackRegistry<R = ()> {
    state: Mutex<RegistryState<R>>,
}

struct RegistryState<R> {
    next_key: i32,
    pending: HashMap<i32, PendingClosure<R>>,
}

impl CallbackRegistry {
    /// The process-wide registry, used by the native entry points in [`ffi`][crate::ffi].
    ///
    /// Created on first use and never torn down; entries are removed individually as their
    /// operations complete.
    #[must_use]
    pub fn global() -> Arc<Self> {
        Arc::clone(&GLOBAL)
    }
}

impl<R> CallbackRegistry<R> {
    /// Creates an empty registry, independent of the process-wide one.
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Mutex::new(RegistryState {
                next_key: 1,
                pending: HashMap::new(),
            }),
        }
    }

    /// Stores a closure and returns the token that triggers it.
    ///
    /// # Panics
    ///
    /// Panics if every positive `i32` is already in use as a pending token.
    pub fn register<F>(&self, closure: F) -> CompletionToken
    where
        F: FnOnce() -> R + Send + 'static,
    {
        let mut state = self.state.lock();

        assert!(
            state.pending.len() < i32::MAX as usize,
            "completion token space exhausted - too many pending native operations"
        );

        let key = loop {
            let candidate = state.next_key;
            state.next_key = candidate.checked_add(1).unwrap_or(1);

            if !state.pending.contains_key(&candidate) {
                break candidate;
            }
        };

        state.pending.insert(key, Box::new(closure));

        event!(Level::TRACE, message = "completion registered", token = key);

        CompletionToken(key)
    }

    /// Invokes and removes the closure registered for `token`, returning its result.
    ///
    /// Returns `None` if the token is not (or no longer) registered, which is not an error.
    pub fn deliver(&self, token: CompletionToken) -> Option<R> {
        let closure = self.state.lock().pending.remove(&token.0);

        let Some(closure) = closure else {
            event!(Level::DEBUG, message = "ignoring delivery of unknown completion token", token = token.0);
            return None;
        };

        event!(Level::TRACE, message = "completion delivered", token = token.0);

        Some(closure())
    }

    /// Removes the closure registered for `token` without invoking it.
    ///
    /// Returns whether the token was registered.
    pub fn cancel_registration(&self, token: CompletionToken) -> bool {
        let closure = self.state.lock().pending.remove(&token.0);

        // Dropped outside the lock - closures own arbitrary resources.
        let removed = closure.is_some();
        drop(closure);

        if removed {
            event!(Level::TRACE, message = "completion registration canceled", token = token.0);
        }

        removed
    }

    /// The number of closures waiting for delivery.
    #[must_use]
    pub fn len(&self) -> usize {
        self.state.lock().pending.len()
    }

    /// Whether no closures are waiting for delivery.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.state.lock().pending.is_empty()
    }

    #[cfg(test)]
    fn set_next_key(&self, key: i32) {
        self.state.lock().next_key = key;
    }
}

impl<R> Default for CallbackRegistry<R> {
    fn default() -> Self {
        Self::new()
    }
}

impl<R> Debug for CallbackRegistry<R> {
    #[cfg_attr(test, mutants::skip)] // There is no API contract this needs to satisfy.
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallbackRegistry").field("pending", &self.len()).finish()
    }
}
