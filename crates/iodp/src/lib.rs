//! Duplex device protocol over any byte link.
//!
//! iodp lets two endpoints expose a memory space and a table of functions to
//! each other. Either side can write or read the other's memory and call its
//! functions, with calls blocking until the reply or a timeout.
//!
//! # Crate Structure
//!
//! - [`transport`]: Byte links (UDP, in-memory pairs, unix streams)
//! - [`frame`]: CRC32-trailed framing, ring buffer and parser
//! - [`device`]: Device context, correlation and dispatch (behind `device` feature)

/// Re-export transport types.
pub mod transport {
    pub use iodp_transport::*;
}

/// Re-export frame types.
pub mod frame {
    pub use iodp_frame::*;
}

/// Re-export device types (requires `device` feature).
#[cfg(feature = "device")]
pub mod device {
    pub use iodp_device::*;
}
