use crate::error::{FrameError, Result};

/// Fixed-capacity circular byte queue.
///
/// `head == tail` means empty, so one slot always stays free: a buffer of
/// capacity `N` holds at most `N - 1` live bytes. `put` is all-or-nothing and
/// `get` never blocks. There is no internal locking; one producer and one
/// consumer must coordinate access (the device layer wraps it in a mutex).
#[derive(Debug, Clone)]
pub struct RingBuffer {
    buf: Box<[u8]>,
    head: usize,
    tail: usize,
}

impl RingBuffer {
    /// Create an empty buffer. Capacities below 2 are raised to 2.
    pub fn new(capacity: usize) -> Self {
        Self {
            buf: vec![0u8; capacity.max(2)].into_boxed_slice(),
            head: 0,
            tail: 0,
        }
    }

    /// Total slots, including the reserved one.
    pub fn capacity(&self) -> usize {
        self.buf.len()
    }

    /// Live bytes currently queued.
    pub fn len(&self) -> usize {
        if self.head >= self.tail {
            self.head - self.tail
        } else {
            self.buf.len() - (self.tail - self.head)
        }
    }

    pub fn is_empty(&self) -> bool {
        self.head == self.tail
    }

    /// Bytes a single `put` can still accept.
    pub fn free(&self) -> usize {
        self.capacity() - 1 - self.len()
    }

    /// Append all of `data`, or nothing.
    ///
    /// Rejected when `data.len() + len() >= capacity()`.
    pub fn put(&mut self, data: &[u8]) -> Result<usize> {
        let occupied = self.len();
        if data.len() + occupied >= self.capacity() {
            return Err(FrameError::RingFull {
                incoming: data.len(),
                occupied,
                capacity: self.capacity(),
            });
        }

        let first = data.len().min(self.capacity() - self.head);
        self.buf[self.head..self.head + first].copy_from_slice(&data[..first]);
        let rest = data.len() - first;
        self.buf[..rest].copy_from_slice(&data[first..]);
        self.head = (self.head + data.len()) % self.capacity();
        Ok(data.len())
    }

    /// Move up to `out.len()` queued bytes into `out`, returning how many.
    pub fn get(&mut self, out: &mut [u8]) -> usize {
        let n = out.len().min(self.len());
        let first = n.min(self.capacity() - self.tail);
        out[..first].copy_from_slice(&self.buf[self.tail..self.tail + first]);
        out[first..n].copy_from_slice(&self.buf[..n - first]);
        self.tail = (self.tail + n) % self.capacity();
        n
    }

    /// Drain everything queued into a new vector.
    pub fn take_all(&mut self) -> Vec<u8> {
        let mut out = vec![0u8; self.len()];
        let n = self.get(&mut out);
        out.truncate(n);
        out
    }

    /// Discard all queued bytes.
    pub fn clear(&mut self) {
        self.head = 0;
        self.tail = 0;
    }
}
