//! Device context for the iodp protocol.
//!
//! A [`Device`] turns one duplex [`Link`](iodp_transport::Link) into both
//! roles at once:
//! - a responder exposing a local memory space and a table of functions
//! - a requester that writes/reads the peer's memory and calls its functions
//!   as blocking, timeout-bounded operations
//!
//! Inbound bytes are pumped either by two background threads or, in
//! cooperative mode, by whichever call is waiting for its reply.

pub mod config;
pub mod correlation;
pub mod device;
pub mod error;
pub mod memory;
pub mod registry;
pub mod stats;

mod pump;
mod router;
mod sync;

pub use config::{DeviceConfig, SchedulingMode};
pub use correlation::CallClass;
pub use device::{Device, StepOutcome};
pub use error::{DeviceError, Result};
pub use memory::{MemoryError, MemorySpace};
pub use registry::{FunctionRegistry, Handler, HandlerError, HandlerResult};
pub use stats::DeviceStats;
