//! Ingress: moving link bytes into the ring and frames out of it.

use std::sync::atomic::Ordering;
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use bytes::{Buf, Bytes, BytesMut};
use iodp_frame::{FrameParser, RingBuffer};
use iodp_transport::is_idle;
use tracing::{debug, trace, warn};

use crate::device::{Shared, StepOutcome};
use crate::error::{DeviceError, Result};
use crate::router;
use crate::sync::lock;

/// Ingress ring shared by the push and process threads.
#[derive(Debug)]
pub(crate) struct IngressQueue {
    ring: Mutex<RingBuffer>,
    readable: Condvar,
    writable: Condvar,
}

impl IngressQueue {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            ring: Mutex::new(RingBuffer::new(capacity)),
            readable: Condvar::new(),
            writable: Condvar::new(),
        }
    }

    /// Append `bytes`, waiting in `poll` steps for room while `running`
    /// holds. Returns `false` if the bytes were abandoned.
    fn push(&self, bytes: &[u8], poll: Duration, running: impl Fn() -> bool) -> bool {
        let mut ring = lock(&self.ring);
        loop {
            if ring.put(bytes).is_ok() {
                drop(ring);
                self.readable.notify_one();
                return true;
            }
            if !running() {
                return false;
            }
            ring = match self.writable.wait_timeout(ring, poll) {
                Ok((guard, _)) => guard,
                Err(poisoned) => poisoned.into_inner().0,
            };
        }
    }

    /// Run the parser over the ring until it yields a frame or `timeout`
    /// elapses with no complete frame.
    fn next_frame(&self, parser: &mut FrameParser, timeout: Duration) -> Option<Bytes> {
        let deadline = Instant::now() + timeout;
        let mut ring = lock(&self.ring);
        loop {
            let frame = parser.next_frame(&mut ring);
            // The parser consumed bytes either way.
            self.writable.notify_one();
            if frame.is_some() {
                return frame;
            }
            let now = Instant::now();
            if now >= deadline {
                return None;
            }
            ring = match self.readable.wait_timeout(ring, deadline - now) {
                Ok((guard, _)) => guard,
                Err(poisoned) => poisoned.into_inner().0,
            };
        }
    }

    pub(crate) fn wake_all(&self) {
        self.readable.notify_all();
        self.writable.notify_all();
    }
}

/// Start the two background ingress threads.
pub(crate) fn spawn(shared: Arc<Shared>, queue: Arc<IngressQueue>) -> Result<Vec<JoinHandle<()>>> {
    shared
        .link
        .set_read_timeout(Some(shared.config.poll_interval))
        .map_err(|err| DeviceError::Transport(err.into()))?;

    let push = {
        let shared = Arc::clone(&shared);
        let queue = Arc::clone(&queue);
        thread::Builder::new()
            .name("iodp-push".into())
            .spawn(move || push_loop(&shared, &queue))
            .map_err(DeviceError::Spawn)?
    };
    let process = thread::Builder::new()
        .name("iodp-process".into())
        .spawn(move || process_loop(&shared, &queue))
        .map_err(DeviceError::Spawn)?;
    Ok(vec![push, process])
}

fn push_loop(shared: &Shared, queue: &IngressQueue) {
    let running = || shared.running.load(Ordering::Acquire);
    let poll = shared.config.poll_interval;
    let mut chunk = vec![0u8; chunk_size(shared.config.max_frame_size, shared.config.ingress_capacity)];
    debug!("ingress push thread started");

    while running() {
        match shared.link.read(&mut chunk) {
            Ok(0) => thread::sleep(poll),
            Ok(n) => {
                trace!(len = n, "link read");
                shared.stats.received(n);
                if !queue.push(&chunk[..n], poll, running) {
                    break;
                }
            }
            Err(err) if is_idle(&err) => {}
            Err(err) => {
                warn!(error = %err, "link read failed, retrying");
                thread::sleep(poll);
            }
        }
    }
    debug!("ingress push thread stopped");
}

fn process_loop(shared: &Shared, queue: &IngressQueue) {
    let mut parser = FrameParser::new(shared.config.max_frame_size);
    debug!("ingress process thread started");

    while shared.running.load(Ordering::Acquire) {
        if let Some(raw) = queue.next_frame(&mut parser, shared.config.poll_interval) {
            router::route(shared, &raw);
        }
        shared.stats.sync_parser(parser.stats());
    }
    debug!("ingress process thread stopped");
}

/// Largest single read; always fits an empty ring.
fn chunk_size(max_frame_size: usize, ingress_capacity: usize) -> usize {
    max_frame_size.min(ingress_capacity - 1)
}

/// Ingress state of a cooperative device, driven by callers.
#[derive(Debug)]
pub(crate) struct StepIngress {
    ring: RingBuffer,
    parser: FrameParser,
    chunk: Vec<u8>,
    /// Read bytes that did not fit the ring yet.
    pending: BytesMut,
}

impl StepIngress {
    pub(crate) fn new(max_frame_size: usize, ingress_capacity: usize) -> Self {
        Self {
            ring: RingBuffer::new(ingress_capacity),
            parser: FrameParser::new(max_frame_size),
            chunk: vec![0u8; chunk_size(max_frame_size, ingress_capacity)],
            pending: BytesMut::new(),
        }
    }

    /// Move as much pending input into the ring as fits.
    fn fill(&mut self) {
        let n = self.pending.len().min(self.ring.free());
        if n > 0 && self.ring.put(&self.pending[..n]).is_ok() {
            self.pending.advance(n);
        }
    }
}

/// Read from the link until one frame has been routed or `deadline` passes.
///
/// Every read asks for a whole chunk so datagram links never truncate;
/// whatever the ring cannot take yet waits in `pending`. Link errors are
/// logged and retried; nothing here ends the pump.
pub(crate) fn step(shared: &Shared, ingress: &mut StepIngress, deadline: Instant) -> StepOutcome {
    let poll = shared.config.poll_interval;
    loop {
        ingress.fill();
        if let Some(raw) = ingress.parser.next_frame(&mut ingress.ring) {
            let kind = router::route(shared, &raw);
            shared.stats.sync_parser(ingress.parser.stats());
            return StepOutcome::Processed { kind };
        }
        shared.stats.sync_parser(ingress.parser.stats());

        if !ingress.pending.is_empty() {
            if ingress.ring.free() > 0 {
                // The parser made room; keep feeding before reading more.
                continue;
            }
            warn!(dropped = ingress.pending.len(), "ingress ring stuck full, dropping input");
            ingress.pending.clear();
        }

        let now = Instant::now();
        if now >= deadline {
            return StepOutcome::TimedOut;
        }
        let remaining = deadline - now;
        if let Err(err) = shared.link.set_read_timeout(Some(remaining)) {
            debug!(error = %err, "could not bound link read");
        }

        match shared.link.read(&mut ingress.chunk) {
            Ok(0) => thread::sleep(poll.min(remaining)),
            Ok(n) => {
                trace!(len = n, "link read");
                shared.stats.received(n);
                ingress.pending.extend_from_slice(&ingress.chunk[..n]);
            }
            Err(err) if is_idle(&err) => {}
            Err(err) => {
                warn!(error = %err, "link read failed, retrying");
                thread::sleep(poll.min(remaining));
            }
        }
    }
}
