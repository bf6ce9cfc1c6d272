// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

/// Coarse state of a transfer.
///
/// ```text
/// Pending -> InProgress <-> Paused
///               |             |
///               v             v
///        Succeeded | Failed | Canceled
/// ```
///
/// The last three are terminal: once reached, the state never changes again.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
#[repr(u8)]
pub enum TransferState {
    /// No progress has been reported yet.
    Pending = 0,

    /// The native runtime is moving bytes.
    InProgress = 1,

    /// The native runtime accepted a pause request.
    Paused = 2,

    /// The operation completed successfully.
    Succeeded = 3,

    /// The operation failed.
    Failed = 4,

    /// The operation was canceled, by the caller or by the native runtime.
    Canceled = 5,
}

impl TransferState {
    /// Whether the transfer has finished, one way or another.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::Canceled)
    }

    pub(crate) const fn from_repr(value: u8) -> Self {
        match value {
            0 => Self::Pending,
            1 => Self::InProgress,
            2 => Self::Paused,
            3 => Self::Succeeded,
            4 => Self::Failed,
            // Only values produced by `as u8` on this enum are ever stored.
            _ => Self::Canceled,
        }
    }
}

/// A point-in-time view of a transfer.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct TransferProgress<M = ()> {
    /// Bytes moved so far. Never decreases while the transfer is active and never exceeds
    /// `total_bytes` when that is known.
    pub bytes_transferred: u64,

    /// Expected size of the transfer, if the native runtime has reported one.
    pub total_bytes: Option<u64>,

    /// Coarse state of the transfer.
    pub state: TransferState,

    /// Result metadata. Only present once the transfer has succeeded.
    pub metadata: Option<M>,
}

impl<M> TransferProgress<M> {
    /// Completed share of the transfer in `0.0..=1.0`, if the total size is known.
    #[must_use]
    #[expect(clippy::cast_precision_loss, reason = "a progress ratio does not need 64-bit precision")]
    pub fn fraction(&self) -> Option<f64> {
        match self.total_bytes {
            Some(0) => Some(1.0),
            Some(total) => Some(self.bytes_transferred as f64 / total as f64),
            None => None,
        }
    }
}
