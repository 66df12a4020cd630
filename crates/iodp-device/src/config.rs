use std::time::Duration;

use iodp_frame::{max_payload, DEFAULT_MAX_FRAME_SIZE, FRAME_OVERHEAD, PREFIX_SIZE};

use crate::error::{DeviceError, Result};

/// Default size of the local memory space.
pub const DEFAULT_MEMORY_SIZE: usize = 512;
/// Default ingress ring capacity.
pub const DEFAULT_INGRESS_CAPACITY: usize = 1024;
/// Default bound on the data one reply may bring back.
pub const DEFAULT_RESPONSE_CAPACITY: usize = 512;
/// Default bound on a function's return payload.
pub const DEFAULT_MAX_RETURN_SIZE: usize = 512;
/// Default time a call waits for its reply.
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(3);

/// Header bytes in front of read and call data: address/code + length.
const ECHO_HEADER: usize = 4;
/// Kind + echo header, as buffered for a waiting caller.
const REPLY_HEADER: usize = 2 + ECHO_HEADER;

/// How inbound bytes get processed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SchedulingMode {
    /// Two background threads: one reads the link into the ingress ring,
    /// one parses and routes frames. Calls block on a condition variable.
    #[default]
    Threaded,
    /// No background threads. Calls drive frame processing themselves, and
    /// a responder loops on [`crate::Device::process_one_frame_or_timeout`].
    Cooperative,
}

/// Device configuration.
#[derive(Debug, Clone)]
pub struct DeviceConfig {
    /// Bytes in the locally exposed memory space (at most 65536).
    pub memory_size: usize,
    /// Ingress ring capacity; one slot is reserved.
    pub ingress_capacity: usize,
    /// Largest data block (read data or return bytes) a reply may bring
    /// back to this device. Sizes the per-class reply buffers.
    pub response_capacity: usize,
    /// Exclusive upper bound on a whole frame.
    pub max_frame_size: usize,
    /// Largest return payload a local function may produce.
    pub max_return_size: usize,
    /// How long a read or call waits for its reply.
    pub call_timeout: Duration,
    /// Wake-up interval of the background threads, used to notice shutdown.
    pub poll_interval: Duration,
    /// Maximum number of registered functions.
    pub max_functions: usize,
    /// Scheduling model.
    pub mode: SchedulingMode,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            memory_size: DEFAULT_MEMORY_SIZE,
            ingress_capacity: DEFAULT_INGRESS_CAPACITY,
            response_capacity: DEFAULT_RESPONSE_CAPACITY,
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            max_return_size: DEFAULT_MAX_RETURN_SIZE,
            call_timeout: DEFAULT_CALL_TIMEOUT,
            poll_interval: Duration::from_millis(50),
            max_functions: 256,
            mode: SchedulingMode::Threaded,
        }
    }
}

impl DeviceConfig {
    /// Default configuration in cooperative mode.
    pub fn cooperative() -> Self {
        Self {
            mode: SchedulingMode::Cooperative,
            ..Self::default()
        }
    }

    /// Check internal consistency.
    pub fn validate(&self) -> Result<()> {
        if self.memory_size == 0 || self.memory_size > usize::from(u16::MAX) + 1 {
            return Err(invalid(format!(
                "memory_size must be 1..=65536, got {}",
                self.memory_size
            )));
        }
        let frame_ceiling = usize::from(u16::MAX) + PREFIX_SIZE + 1;
        if self.max_frame_size <= FRAME_OVERHEAD + 1 || self.max_frame_size > frame_ceiling {
            return Err(invalid(format!(
                "max_frame_size must be {}..={frame_ceiling}, got {}",
                FRAME_OVERHEAD + 2,
                self.max_frame_size
            )));
        }
        if self.ingress_capacity < self.max_frame_size {
            return Err(invalid(format!(
                "ingress_capacity ({}) must hold a full frame ({})",
                self.ingress_capacity, self.max_frame_size
            )));
        }
        if self.response_capacity == 0 {
            return Err(invalid("response_capacity must be non-zero"));
        }
        if self.call_timeout.is_zero() || self.poll_interval.is_zero() {
            return Err(invalid("call_timeout and poll_interval must be non-zero"));
        }
        if self.max_functions == 0 {
            return Err(invalid("max_functions must be non-zero"));
        }
        Ok(())
    }

    /// Largest data block one write request can carry.
    pub fn max_write_len(&self) -> usize {
        max_payload(self.max_frame_size).saturating_sub(ECHO_HEADER)
    }

    /// Largest argument block one call request can carry.
    pub fn max_call_args(&self) -> usize {
        self.max_write_len()
    }

    /// Largest read this device can request: bounded by the reply frame and
    /// by the reply buffer of the read class.
    pub fn max_read_len(&self) -> usize {
        self.max_write_len().min(self.response_capacity)
    }

    /// Ring capacity that holds one reply of `response_capacity` data bytes
    /// plus its header, with the reserved slot.
    pub fn reply_ring_capacity(&self) -> usize {
        self.response_capacity + REPLY_HEADER + 1
    }

    /// Largest return payload a local function can send back.
    pub fn max_reply_return(&self) -> usize {
        self.max_return_size.min(self.max_write_len())
    }
}

fn invalid(message: impl Into<String>) -> DeviceError {
    DeviceError::InvalidConfig(message.into())
}
