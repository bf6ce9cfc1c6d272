// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

#![allow(missing_docs, reason = "test code")]

//! End-to-end tests of bridged operations against a simulated native runtime that delivers
//! completions from its own threads through the C entry points.

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use futures::executor::block_on;
use native_bridge::ffi::{FFI_OK, native_bridge_complete};
use native_bridge::{
    CANCELED_SENTINEL, CancellationToken, CompletionBridge, CompletionToken, Error, HandleStatus, NativeHandle,
    PinnedBuffer,
};
use parking_lot::Mutex;

#[derive(Clone, Copy, Debug)]
enum Plan {
    Succeed(u32),
    Fail(i32),
    Hang,
}

#[derive(Debug)]
struct Operation {
    plan: Plan,
    status: HandleStatus,
    error_code: i32,
    error_message: String,
    payload: u32,
    token: Option<CompletionToken>,
    cancel_calls: usize,
    release_calls: usize,
}

/// A handle to an operation executed by the simulated runtime. Clones share the operation.
#[derive(Clone, Debug)]
struct SimHandle(Arc<Mutex<Operation>>);

impl SimHandle {
    fn new(plan: Plan) -> Self {
        Self(Arc::new(Mutex::new(Operation {
            plan,
            status: HandleStatus::Pending,
            error_code: 0,
            error_message: String::new(),
            payload: 0,
            token: None,
            cancel_calls: 0,
            release_calls: 0,
        })))
    }

    fn invalid() -> Self {
        let handle = Self::new(Plan::Hang);
        handle.0.lock().status = HandleStatus::Invalid;
        handle
    }

    /// Completes the operation on a runtime thread after a short delay.
    fn finish_later(&self, error_code: i32, error_message: &str, payload: u32) {
        let handle = self.clone();
        let error_message = error_message.to_string();

        thread::spawn(move || {
            thread::sleep(Duration::from_millis(5));
            handle.finish_now(error_code, &error_message, payload);
        });
    }

    fn finish_now(&self, error_code: i32, error_message: &str, payload: u32) {
        let token = {
            let mut op = self.0.lock();
            op.status = HandleStatus::Complete;
            op.error_code = error_code;
            op.error_message = error_message.to_string();
            op.payload = payload;
            op.token.expect("completion callback was never set")
        };

        assert_eq!(native_bridge_complete(token.0), FFI_OK);
    }

    fn payload(&self) -> u32 {
        self.0.lock().payload
    }

    fn cancel_calls(&self) -> usize {
        self.0.lock().cancel_calls
    }

    fn release_calls(&self) -> usize {
        self.0.lock().release_calls
    }
}

impl NativeHandle for SimHandle {
    fn status(&self) -> HandleStatus {
        self.0.lock().status
    }

    fn error_code(&self) -> i32 {
        self.0.lock().error_code
    }

    fn error_message(&self) -> String {
        self.0.lock().error_message.clone()
    }

    fn set_completion_callback(&self, token: CompletionToken) {
        let plan = {
            let mut op = self.0.lock();
            op.token = Some(token);
            op.plan
        };

        match plan {
            Plan::Succeed(payload) => self.finish_later(0, "", payload),
            Plan::Fail(code) => self.finish_later(code, "simulated failure", 0),
            Plan::Hang => {}
        }
    }

    fn cancel(&self) -> bool {
        let plan = {
            let mut op = self.0.lock();
            op.cancel_calls += 1;
            op.plan
        };

        if matches!(plan, Plan::Hang) {
            self.finish_later(CANCELED_SENTINEL, "operation cancelled", 0);
            true
        } else {
            false
        }
    }

    fn release(&self) {
        let mut op = self.0.lock();
        op.release_calls += 1;
        op.status = HandleStatus::Invalid;
    }
}

#[test]
fn successful_operation_yields_extracted_value() {
    let handle = SimHandle::new(Plan::Succeed(1234));

    let value = block_on(CompletionBridge::new(handle.clone()).begin(|h| Ok(h.payload()))).unwrap();

    assert_eq!(value, 1234);
    assert_eq!(handle.release_calls(), 1);
}

#[test]
fn domain_failure_carries_code_and_message() {
    let handle = SimHandle::new(Plan::Fail(-2));

    let error = block_on(CompletionBridge::new(handle.clone()).begin(|h| Ok(h.payload()))).unwrap_err();

    assert!(!error.is_canceled());
    assert_eq!(error.code(), Some(-2));
    assert!(matches!(error, Error::Domain { ref message, .. } if message == "simulated failure"));
    assert_eq!(handle.release_calls(), 1);
}

#[test]
fn caller_cancellation_round_trips_through_native() {
    let handle = SimHandle::new(Plan::Hang);
    let cancel = CancellationToken::new();

    let pending = CompletionBridge::new(handle.clone())
        .with_cancellation(&cancel)
        .begin(|h| Ok(h.payload()));

    cancel.cancel();

    let error = block_on(pending).unwrap_err();
    assert!(error.is_canceled());
    assert_eq!(handle.cancel_calls(), 1);
    assert_eq!(handle.release_calls(), 1);

    let io_error: std::io::Error = error.into();
    assert_eq!(io_error.kind(), std::io::ErrorKind::Interrupted);
}

#[test]
fn abandoned_operation_is_cleaned_up_on_late_completion() {
    let handle = SimHandle::new(Plan::Hang);

    drop(
        CompletionBridge::new(handle.clone())
            .with_resources(PinnedBuffer::zeroed(4096))
            .begin(|h| Ok(h.payload())),
    );

    assert_eq!(handle.release_calls(), 0);

    handle.finish_now(0, "", 1);

    assert_eq!(handle.release_calls(), 1);
}

#[test]
fn invalid_handle_fails_immediately() {
    let handle = SimHandle::invalid();

    let mut pending = CompletionBridge::new(handle.clone()).begin(|h| Ok(h.payload()));

    let error = pending.try_result().expect("must resolve without a native callback").unwrap_err();
    assert!(matches!(error, Error::UnknownFailure { .. }));
    assert_eq!(error.to_string(), "unknown failure: operation not started");
    assert_eq!(handle.release_calls(), 1);
}

#[test]
fn concurrent_operations_resolve_independently() {
    let callers: Vec<_> = (0..16_u32)
        .map(|caller| {
            thread::spawn(move || {
                let operations: Vec<_> = (0..8_u32)
                    .map(|i| {
                        let handle = SimHandle::new(Plan::Succeed(caller * 100 + i));
                        let pending = CompletionBridge::new(handle.clone()).begin(|h| Ok(h.payload()));
                        (caller * 100 + i, handle, pending)
                    })
                    .collect();

                for (expected, handle, pending) in operations {
                    assert_eq!(block_on(pending).unwrap(), expected);
                    assert_eq!(handle.release_calls(), 1);
                }
            })
        })
        .collect();

    for caller in callers {
        caller.join().unwrap();
    }
}
