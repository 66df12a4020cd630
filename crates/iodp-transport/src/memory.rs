use std::io;
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::time::Duration;

use bytes::{Buf, BytesMut};

use crate::traits::Link;

/// One direction of an in-memory pipe.
#[derive(Debug, Default)]
struct Lane {
    state: Mutex<LaneState>,
    readable: Condvar,
}

#[derive(Debug, Default)]
struct LaneState {
    bytes: BytesMut,
    closed: bool,
}

impl Lane {
    fn lock(&self) -> MutexGuard<'_, LaneState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// In-process duplex byte pipe.
///
/// [`MemoryLink::pair`] returns two connected endpoints: bytes written to one
/// are read from the other, in order. Reads block until data arrives, the
/// configured read timeout elapses (`TimedOut`), or the peer endpoint is
/// dropped (`Ok(0)` forever after).
#[derive(Debug)]
pub struct MemoryLink {
    inbound: Arc<Lane>,
    outbound: Arc<Lane>,
    read_timeout: Mutex<Option<Duration>>,
}

impl MemoryLink {
    /// Create two connected endpoints.
    pub fn pair() -> (Self, Self) {
        let a_to_b = Arc::new(Lane::default());
        let b_to_a = Arc::new(Lane::default());
        let a = Self {
            inbound: Arc::clone(&b_to_a),
            outbound: Arc::clone(&a_to_b),
            read_timeout: Mutex::new(None),
        };
        let b = Self {
            inbound: a_to_b,
            outbound: b_to_a,
            read_timeout: Mutex::new(None),
        };
        (a, b)
    }

    /// Bytes written by the peer and not yet read.
    pub fn pending(&self) -> usize {
        self.inbound.lock().bytes.len()
    }

    fn timeout(&self) -> Option<Duration> {
        *self
            .read_timeout
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Link for MemoryLink {
    fn read(&self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }

        let timeout = self.timeout();
        let mut state = self.inbound.lock();
        while state.bytes.is_empty() && !state.closed {
            state = match timeout {
                Some(limit) => {
                    let (guard, result) = self
                        .inbound
                        .readable
                        .wait_timeout(state, limit)
                        .unwrap_or_else(|poisoned| poisoned.into_inner());
                    if result.timed_out() && guard.bytes.is_empty() && !guard.closed {
                        return Err(io::Error::from(io::ErrorKind::TimedOut));
                    }
                    guard
                }
                None => self
                    .inbound
                    .readable
                    .wait(state)
                    .unwrap_or_else(|poisoned| poisoned.into_inner()),
            };
        }

        let n = state.bytes.len().min(buf.len());
        buf[..n].copy_from_slice(&state.bytes[..n]);
        state.bytes.advance(n);
        Ok(n)
    }

    fn write(&self, buf: &[u8]) -> io::Result<usize> {
        let mut state = self.outbound.lock();
        if state.closed {
            return Err(io::Error::from(io::ErrorKind::BrokenPipe));
        }
        state.bytes.extend_from_slice(buf);
        drop(state);
        self.outbound.readable.notify_all();
        Ok(buf.len())
    }

    fn set_read_timeout(&self, timeout: Option<Duration>) -> io::Result<()> {
        *self
            .read_timeout
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = timeout;
        Ok(())
    }
}

impl Drop for MemoryLink {
    fn drop(&mut self) {
        for lane in [&self.inbound, &self.outbound] {
            lane.lock().closed = true;
            lane.readable.notify_all();
        }
    }
}
