use bytes::Bytes;
use tracing::{trace, warn};

use crate::codec::{DEFAULT_MAX_FRAME_SIZE, MIN_SIZE_FIELD, PREFIX_SIZE, SYNC};
use crate::ring::RingBuffer;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    /// Discarding bytes until the first sync byte.
    SeekSync,
    /// Collecting the second sync byte and the size field.
    ReadLength,
    /// Collecting the rest of a frame of `total` bytes.
    ReadBody { total: usize },
}

/// Counters for bytes and frames the parser threw away.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ParserStats {
    /// Bytes skipped while looking for a sync word.
    pub skipped_bytes: u64,
    /// Frames abandoned on a bad second sync byte or size field.
    pub rejected_frames: u64,
    /// Complete frames handed out.
    pub frames: u64,
}

/// Cuts a byte stream into candidate frames.
///
/// The parser pulls from a [`RingBuffer`] and never blocks: when the ring runs
/// dry mid-frame it keeps the partial frame and resumes on the next call.
/// Returned frames are complete per their size field but not yet checked
/// against their CRC trailer; that happens in [`crate::decode_frame`].
#[derive(Debug)]
pub struct FrameParser {
    state: State,
    buf: Vec<u8>,
    max_frame_size: usize,
    stats: ParserStats,
}

impl Default for FrameParser {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_FRAME_SIZE)
    }
}

impl FrameParser {
    /// Create a parser that rejects frames of `max_frame_size` bytes or more.
    pub fn new(max_frame_size: usize) -> Self {
        Self {
            state: State::SeekSync,
            buf: Vec::with_capacity(max_frame_size),
            max_frame_size,
            stats: ParserStats::default(),
        }
    }

    /// Pull bytes from `ring` until a whole frame is assembled or the ring is
    /// empty. Malformed prefixes are logged and skipped.
    pub fn next_frame(&mut self, ring: &mut RingBuffer) -> Option<Bytes> {
        loop {
            match self.state {
                State::SeekSync => {
                    let mut byte = [0u8; 1];
                    if ring.get(&mut byte) == 0 {
                        return None;
                    }
                    if byte[0] == SYNC[0] {
                        self.buf.clear();
                        self.buf.push(byte[0]);
                        self.state = State::ReadLength;
                    } else {
                        self.stats.skipped_bytes += 1;
                        trace!(byte = byte[0], "skipping byte outside frame");
                    }
                }
                State::ReadLength => {
                    if !self.fill(ring, 2) {
                        return None;
                    }
                    if self.buf[1] != SYNC[1] {
                        self.stats.rejected_frames += 1;
                        warn!(byte = self.buf[1], "second sync byte mismatch, resynchronizing");
                        let candidate = self.buf[1];
                        self.buf.clear();
                        if candidate == SYNC[0] {
                            self.buf.push(candidate);
                        } else {
                            self.state = State::SeekSync;
                        }
                        continue;
                    }
                    if !self.fill(ring, PREFIX_SIZE) {
                        return None;
                    }
                    let size = u16::from_be_bytes([self.buf[2], self.buf[3]]) as usize;
                    if size < MIN_SIZE_FIELD || size + PREFIX_SIZE >= self.max_frame_size {
                        self.stats.rejected_frames += 1;
                        warn!(size, max = self.max_frame_size, "size field out of range, dropping frame");
                        self.buf.clear();
                        self.state = State::SeekSync;
                        continue;
                    }
                    self.state = State::ReadBody {
                        total: size + PREFIX_SIZE,
                    };
                }
                State::ReadBody { total } => {
                    if !self.fill(ring, total) {
                        return None;
                    }
                    let frame = Bytes::copy_from_slice(&self.buf);
                    self.buf.clear();
                    self.state = State::SeekSync;
                    self.stats.frames += 1;
                    return Some(frame);
                }
            }
        }
    }

    /// Top up the assembly buffer towards `target` bytes.
    fn fill(&mut self, ring: &mut RingBuffer, target: usize) -> bool {
        let start = self.buf.len();
        if start < target {
            self.buf.resize(target, 0);
            let n = ring.get(&mut self.buf[start..]);
            self.buf.truncate(start + n);
        }
        self.buf.len() >= target
    }

    /// True when no partial frame is held.
    pub fn is_idle(&self) -> bool {
        self.state == State::SeekSync
    }

    /// Bytes of a partial frame currently held.
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    pub fn stats(&self) -> ParserStats {
        self.stats
    }

    pub fn max_frame_size(&self) -> usize {
        self.max_frame_size
    }

    /// Drop any partial frame and start over at the next sync byte.
    pub fn reset(&mut self) {
        self.buf.clear();
        self.state = State::SeekSync;
    }
}
