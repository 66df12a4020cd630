//! Byte link abstraction for iodp.
//!
//! The protocol core only needs an ordered, two-way byte channel. A [`Link`]
//! is anything that can `read` and `write` bytes through a shared reference:
//! - UDP sockets connected to a single remote ([`UdpLink`])
//! - In-process duplex pipes ([`MemoryLink`])
//! - Unix domain streams (Linux/macOS)
//!
//! This is the lowest layer of iodp. Everything else builds on top of the
//! [`Link`] trait provided here.

pub mod error;
pub mod memory;
pub mod traits;
pub mod udp;

pub use error::{Result, TransportError};
pub use memory::MemoryLink;
pub use traits::{is_idle, Link};
pub use udp::UdpLink;
