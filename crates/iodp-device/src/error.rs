use std::collections::TryReserveError;
use std::time::Duration;

use iodp_frame::Operation;

/// Errors that can occur in device operations.
#[derive(Debug, thiserror::Error)]
pub enum DeviceError {
    /// Link-level error.
    #[error("transport error: {0}")]
    Transport(#[from] iodp_transport::TransportError),

    /// Frame-level error.
    #[error("frame error: {0}")]
    Frame(#[from] iodp_frame::FrameError),

    /// The configuration cannot be used.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// A request payload exceeds what one frame or reply buffer can carry.
    #[error("payload too large ({size} bytes, max {max})")]
    PayloadTooLarge { size: usize, max: usize },

    /// No reply arrived in time.
    #[error("no reply within {0:?}")]
    Timeout(Duration),

    /// The buffered reply is shorter than its fixed header.
    #[error("reply too short ({len} bytes, need at least {min})")]
    ShortResponse { len: usize, min: usize },

    /// The echoed address or function code differs from the request.
    #[error("reply echoes {actual:#06x}, expected {expected:#06x}")]
    EchoMismatch { expected: u16, actual: u16 },

    /// The reply's length field disagrees with the bytes received.
    #[error("reply declares {declared} data bytes but carries {actual}")]
    LengthMismatch { declared: usize, actual: usize },

    /// The peer answered with an error reply.
    #[error("peer rejected {op} with error code {code:#04x}")]
    Remote { op: Operation, code: u8 },

    /// The reply carries neither the success nor the error kind.
    #[error("unexpected reply kind {actual:#06x} (expected {expected:#06x})")]
    UnexpectedKind { expected: u16, actual: u16 },

    /// A function is already registered under this code.
    #[error("function {0:#06x} is already registered")]
    DuplicateFunction(u16),

    /// The function table has reached its configured size.
    #[error("function table full ({max} entries)")]
    RegistryFull { max: usize },

    /// Growing the function table failed.
    #[error("function table allocation failed: {0}")]
    Allocation(#[from] TryReserveError),

    /// Frame stepping was requested on a device with background ingress.
    #[error("device is not in cooperative mode")]
    NotCooperative,

    /// A background ingress thread could not be started.
    #[error("failed to spawn ingress thread: {0}")]
    Spawn(#[source] std::io::Error),

    /// The device has been shut down.
    #[error("device is shut down")]
    Shutdown,
}

pub type Result<T> = std::result::Result<T, DeviceError>;
