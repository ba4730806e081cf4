//! Error types for MAC operations.

use std::fmt;

/// Classification of a failed MAC operation.
///
/// Each kind maps onto the numeric status contract shared with the rest of the
/// RFID host stack (see [`ErrorKind::code`]).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, thiserror::Error)]
pub enum ErrorKind {
    /// Generic failure inside the host driver.
    #[error("failure")]
    Failure,
    /// A caller-supplied value was out of range, or the MAC reported a
    /// bounds/selector error, or an echoed register address did not match.
    #[error("invalid parameter")]
    InvalidParameter,
    /// The operation is not supported by this MAC.
    #[error("not supported")]
    NotSupported,
    /// The operation was cancelled or aborted by the caller.
    #[error("operation cancelled")]
    OperationCancelled,
    /// Another operation is already in flight on this radio.
    #[error("radio busy")]
    RadioBusy,
    /// The MAC reported an error status not otherwise classified.
    #[error("radio failure")]
    RadioFailure,
    /// The operation is not allowed from the calling context.
    #[error("currently not allowed")]
    CurrentlyNotAllowed,
    /// The MAC stopped producing bytes for longer than the responsiveness timeout.
    #[error("radio not responding")]
    RadioNotResponding,
    /// The MAC did not enter nonvolatile-memory update mode.
    #[error("nonvolatile update init failed")]
    NonvolatileInitFailed,
    /// The MAC rejected an update range as outside its memory.
    #[error("nonvolatile update out of bounds")]
    NonvolatileOutOfBounds,
    /// The MAC failed to program nonvolatile memory.
    #[error("nonvolatile write failed")]
    NonvolatileWriteFailed,
    /// An update packet failed its CRC check on every attempt.
    #[error("nonvolatile CRC failed")]
    NonvolatileCrcFailed,
    /// The MAC could not receive an update packet.
    #[error("nonvolatile packet error")]
    NonvolatilePacketError,
    /// A packet arrived that is not valid for the current exchange state.
    #[error("unexpected packet")]
    UnexpectedPacket,
    /// The transport collaborator failed.
    #[error("transport error")]
    Transport,
}

impl ErrorKind {
    /// Numeric status code for this error kind. `0` is reserved for success.
    pub fn code(self) -> i32 {
        match self {
            ErrorKind::Failure => -9997,
            ErrorKind::InvalidParameter => -9991,
            ErrorKind::NotSupported => -9988,
            ErrorKind::OperationCancelled => -9987,
            ErrorKind::RadioBusy => -9985,
            ErrorKind::RadioFailure => -9984,
            ErrorKind::CurrentlyNotAllowed => -9982,
            ErrorKind::RadioNotResponding => -9981,
            ErrorKind::NonvolatileInitFailed => -9980,
            ErrorKind::NonvolatileOutOfBounds => -9979,
            ErrorKind::NonvolatileWriteFailed => -9978,
            ErrorKind::NonvolatileCrcFailed => -9976,
            ErrorKind::NonvolatilePacketError => -9975,
            ErrorKind::UnexpectedPacket => -9974,
            ErrorKind::Transport => -9973,
        }
    }

    /// Whether an exchange that failed with this kind should be followed by a
    /// MAC abort to bring the device back to a known state.
    pub(crate) fn needs_resync(self) -> bool {
        !matches!(
            self,
            ErrorKind::OperationCancelled | ErrorKind::RadioNotResponding | ErrorKind::RadioBusy
        )
    }
}

/// Error returned by every fallible radio operation.
///
/// Carries the [`ErrorKind`], the name of the operation that raised it and a
/// human-readable detail.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{operation}: {kind} ({detail})")]
pub struct Error {
    kind: ErrorKind,
    operation: &'static str,
    detail: String,
}

impl Error {
    pub fn new(kind: ErrorKind, operation: &'static str, detail: impl Into<String>) -> Self {
        Self {
            kind,
            operation,
            detail: detail.into(),
        }
    }

    pub(crate) fn transport(operation: &'static str, err: impl fmt::Debug) -> Self {
        Self::new(ErrorKind::Transport, operation, format!("{:?}", err))
    }

    pub(crate) fn invalid(operation: &'static str, detail: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidParameter, operation, detail)
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// Name of the operation that failed.
    pub fn operation(&self) -> &'static str {
        self.operation
    }

    pub fn detail(&self) -> &str {
        &self.detail
    }

    /// Numeric status code, see [`ErrorKind::code`].
    pub fn code(&self) -> i32 {
        self.kind.code()
    }

    pub fn is_cancelled(&self) -> bool {
        self.kind == ErrorKind::OperationCancelled
    }
}

/// A convenience `Result` alias using [`Error`].
pub type Result<T> = std::result::Result<T, Error>;
