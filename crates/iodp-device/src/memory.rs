use bytes::Bytes;
use iodp_frame::kind::ERR_ILLEGAL_ADDRESS;
use iodp_frame::Reply;

/// Errors from local memory access.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MemoryError {
    /// The start address is outside the memory space.
    #[error("address {addr:#06x} outside memory of {size} bytes")]
    IllegalAddress { addr: u16, size: usize },

    /// A write ran past the end; the in-range prefix was still stored.
    #[error("write at {addr:#06x} overflows memory of {size} bytes ({written} bytes stored)")]
    AddressOverflow {
        addr: u16,
        size: usize,
        written: usize,
    },
}

/// The byte array a device exposes to its peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemorySpace {
    bytes: Vec<u8>,
}

impl MemorySpace {
    /// Zero-filled memory of `size` bytes.
    pub fn new(size: usize) -> Self {
        Self {
            bytes: vec![0u8; size],
        }
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.bytes
    }

    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.bytes
    }

    /// Store `data` at `addr`.
    ///
    /// Bytes falling past the end are dropped, but the in-range prefix is
    /// kept and an `AddressOverflow` reports how much landed.
    pub fn write(&mut self, addr: u16, data: &[u8]) -> Result<usize, MemoryError> {
        let start = usize::from(addr);
        let size = self.bytes.len();
        if start >= size {
            return Err(MemoryError::AddressOverflow {
                addr,
                size,
                written: 0,
            });
        }
        let written = data.len().min(size - start);
        self.bytes[start..start + written].copy_from_slice(&data[..written]);
        if written < data.len() {
            return Err(MemoryError::AddressOverflow {
                addr,
                size,
                written,
            });
        }
        Ok(written)
    }

    /// Copy out up to `len` bytes at `addr`, clamped to the end of memory.
    pub fn read(&self, addr: u16, len: usize) -> Result<&[u8], MemoryError> {
        let start = usize::from(addr);
        let size = self.bytes.len();
        if start >= size {
            return Err(MemoryError::IllegalAddress { addr, size });
        }
        let end = start + len.min(size - start);
        Ok(&self.bytes[start..end])
    }

    /// Build the reply to a read request, holding at most `limit` data bytes.
    pub fn reply_to_read(&self, addr: u16, len: u16, limit: usize) -> Reply {
        match self.read(addr, usize::from(len).min(limit)) {
            Ok(data) => Reply::Read {
                addr,
                data: Bytes::copy_from_slice(data),
            },
            Err(_) => Reply::ReadError {
                code: ERR_ILLEGAL_ADDRESS,
            },
        }
    }
}
