// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::fmt::Debug;
use std::pin::Pin;

/// Marker trait to indicate that a type is suitable for attaching to a bridged operation
/// as a user resource, to be dropped once the operation has completed.
pub trait UserResource: Send + Sync + Debug + 'static {}

impl<T> UserResource for T where T: Send + Sync + Debug + 'static {}

/// A byte buffer whose address stays fixed for its entire lifetime, for handing to the native
/// runtime as the source or destination of a byte-oriented transfer.
///
/// The native runtime reads or writes the buffer through the raw pointer while the operation is
/// in flight. Attach the buffer to the operation via
/// [`CompletionBridge::with_resources()`][crate::CompletionBridge::with_resources] so it is only
/// released after the completion has been delivered, even if the caller abandons the operation.
pub struct PinnedBuffer {
    bytes: Pin<Box<[u8]>>,
}

impl PinnedBuffer {
    /// Allocates a zeroed buffer of `len` bytes.
    #[must_use]
    pub fn zeroed(len: usize) -> Self {
        Self::from_vec(vec![0; len])
    }

    /// Takes ownership of existing bytes without copying them.
    #[must_use]
    pub fn from_vec(bytes: Vec<u8>) -> Self {
        Self {
            bytes: Pin::new(bytes.into_boxed_slice()),
        }
    }

    /// The address of the first byte, for the native runtime to read from.
    #[must_use]
    pub fn as_ptr(&self) -> *const u8 {
        self.bytes.as_ptr()
    }

    /// The address of the first byte, for the native runtime to write to.
    #[must_use]
    pub fn as_mut_ptr(&mut self) -> *mut u8 {
        self.bytes.as_mut().get_mut().as_mut_ptr()
    }

    /// The size of the buffer in bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// Whether the buffer has zero length.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// The buffer contents.
    #[must_use]
    pub fn as_slice(&self) -> &[u8] {
        &self.bytes
    }

    /// Returns the contents, ending the pinned lifetime of the buffer.
    #[must_use]
    pub fn into_vec(self) -> Vec<u8> {
        Pin::into_inner(self.bytes).into_vec()
    }
}

impl Debug for PinnedBuffer {
    #[cfg_attr(test, mutants::skip)] // There is no API contract this needs to satisfy.
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PinnedBuffer")
            .field("ptr", &self.as_ptr())
            .field("len", &self.len())
            .finish()
    }
}
