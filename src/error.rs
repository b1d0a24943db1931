//! Error taxonomy for the transfer engine.

use thiserror::Error;

/// Errors surfaced by a controller transaction.
///
/// Per-byte and per-command failures are recorded on the in-flight transfer
/// and force the state machine onto the STOP path; the caller sees the first
/// recorded error for the whole chain. There is no partial-success
/// signaling and no internal retry.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// The initial START found the bus already busy.
    #[error("bus is busy")]
    BusBusy,
    /// The slave failed to acknowledge its address or a data byte.
    #[error("no acknowledge from slave")]
    NoAcknowledge,
    /// Another master won the bus mid-transfer.
    #[error("arbitration lost")]
    ArbitrationLost,
    /// The wait strategy exceeded its bound.
    #[error("transfer timed out")]
    Timeout,
    /// The hardware rejected the enable write, e.g. an external lock on the
    /// bus fabric holds the controller.
    #[error("controller is disabled")]
    ControllerDisabled,
    /// The controller's transaction lock is already held; callers must
    /// retry, the driver never blocks waiting for it.
    #[error("controller transaction lock is held")]
    LockContention,
    /// Unrecognized or malformed special operation.
    #[error("invalid special operation")]
    InvalidOperation,
}

/// Driver result alias.
pub type Result<T> = core::result::Result<T, Error>;
