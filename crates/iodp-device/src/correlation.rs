//! Turns replies arriving on the shared stream into results for blocking
//! callers.
//!
//! Each correlated class (memory reads, function calls) owns one slot. A slot
//! holds a permit taken for the whole call, so at most one call per class is
//! outstanding, and a small ring the ingress side appends reply bodies to.
//! Replies carry no request id: the echoed address or function code plus the
//! declared length are the only checks that a reply belongs to its call.

use std::fmt;
use std::sync::{Condvar, Mutex, MutexGuard};
use std::time::Instant;

use bytes::{Buf, Bytes};
use iodp_frame::{Operation, RingBuffer};
use tracing::warn;

use crate::error::{DeviceError, Result};
use crate::sync::lock;

/// Kind (2) + echo (2) + length (2).
const SUCCESS_HEADER: usize = 6;
/// Kind (2) + error code (1).
const ERROR_REPLY_LEN: usize = 3;
/// Just the kind.
const MIN_REPLY_LEN: usize = 2;

/// A request class whose replies are correlated with a waiting caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CallClass {
    ReadMemory,
    CallFunction,
}

impl CallClass {
    /// The class replies of `op` belong to. Writes are never answered.
    pub fn from_operation(op: Operation) -> Option<Self> {
        match op {
            Operation::ReadMemory => Some(Self::ReadMemory),
            Operation::CallFunction => Some(Self::CallFunction),
            Operation::WriteMemory => None,
        }
    }

    pub fn operation(self) -> Operation {
        match self {
            Self::ReadMemory => Operation::ReadMemory,
            Self::CallFunction => Operation::CallFunction,
        }
    }
}

impl fmt::Display for CallClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.operation().name())
    }
}

#[derive(Debug)]
struct Inbox {
    ring: RingBuffer,
    replies: usize,
    closed: bool,
}

/// Reply buffer, wait primitive and call permit of one class.
#[derive(Debug)]
pub(crate) struct CallSlot {
    permit: Mutex<()>,
    inbox: Mutex<Inbox>,
    ready: Condvar,
}

impl CallSlot {
    fn new(capacity: usize) -> Self {
        Self {
            permit: Mutex::new(()),
            inbox: Mutex::new(Inbox {
                ring: RingBuffer::new(capacity),
                replies: 0,
                closed: false,
            }),
            ready: Condvar::new(),
        }
    }

    /// Take the class permit and discard anything a previous, abandoned
    /// call left behind. The permit is released when the guard drops.
    pub(crate) fn begin(&self) -> MutexGuard<'_, ()> {
        let permit = lock(&self.permit);
        let mut inbox = lock(&self.inbox);
        inbox.ring.clear();
        inbox.replies = 0;
        permit
    }

    /// Append a reply body and wake the waiting caller. Returns `false` when
    /// the body does not fit and was dropped.
    pub(crate) fn deliver(&self, body: &[u8]) -> bool {
        let mut inbox = lock(&self.inbox);
        if let Err(err) = inbox.ring.put(body) {
            warn!(error = %err, "reply buffer full, dropping reply");
            return false;
        }
        inbox.replies += 1;
        drop(inbox);
        self.ready.notify_all();
        true
    }

    /// Block until a reply is buffered or `deadline` passes.
    ///
    /// Fails with [`DeviceError::Shutdown`] once the slot is closed.
    pub(crate) fn wait_until(&self, deadline: Instant) -> Result<Option<Vec<u8>>> {
        let mut inbox = lock(&self.inbox);
        loop {
            if inbox.replies > 0 {
                return Ok(Some(take(&mut inbox)));
            }
            if inbox.closed {
                return Err(DeviceError::Shutdown);
            }
            let now = Instant::now();
            if now >= deadline {
                return Ok(None);
            }
            inbox = match self.ready.wait_timeout(inbox, deadline - now) {
                Ok((guard, _)) => guard,
                Err(poisoned) => poisoned.into_inner().0,
            };
        }
    }

    /// Take a buffered reply without waiting.
    pub(crate) fn try_take(&self) -> Option<Vec<u8>> {
        let mut inbox = lock(&self.inbox);
        (inbox.replies > 0).then(|| take(&mut inbox))
    }

    /// Fail current and future waiters with [`DeviceError::Shutdown`].
    pub(crate) fn close(&self) {
        lock(&self.inbox).closed = true;
        self.ready.notify_all();
    }

    /// Bytes currently buffered.
    pub(crate) fn buffered(&self) -> usize {
        lock(&self.inbox).ring.len()
    }
}

fn take(inbox: &mut Inbox) -> Vec<u8> {
    inbox.replies = 0;
    inbox.ring.take_all()
}

/// One slot per correlated class.
#[derive(Debug)]
pub(crate) struct Correlator {
    read: CallSlot,
    call: CallSlot,
}

impl Correlator {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            read: CallSlot::new(capacity),
            call: CallSlot::new(capacity),
        }
    }

    pub(crate) fn close(&self) {
        self.read.close();
        self.call.close();
    }

    pub(crate) fn slot(&self, class: CallClass) -> &CallSlot {
        match class {
            CallClass::ReadMemory => &self.read,
            CallClass::CallFunction => &self.call,
        }
    }
}

/// Validate a buffered read reply and return its data.
pub(crate) fn read_reply(addr: u16, body: &[u8]) -> Result<Bytes> {
    check_reply(Operation::ReadMemory, addr, body)
}

/// Validate a buffered call reply and return the function's return bytes.
pub(crate) fn call_reply(code: u16, body: &[u8]) -> Result<Bytes> {
    check_reply(Operation::CallFunction, code, body)
}

fn check_reply(op: Operation, echo: u16, body: &[u8]) -> Result<Bytes> {
    if body.len() < MIN_REPLY_LEN {
        return Err(DeviceError::ShortResponse {
            len: body.len(),
            min: MIN_REPLY_LEN,
        });
    }
    let mut buf = Bytes::copy_from_slice(body);
    let kind = buf.get_u16();
    let success = op.reply_kind().unwrap_or_default();

    if kind == success {
        if body.len() < SUCCESS_HEADER {
            return Err(DeviceError::ShortResponse {
                len: body.len(),
                min: SUCCESS_HEADER,
            });
        }
        let actual_echo = buf.get_u16();
        if actual_echo != echo {
            return Err(DeviceError::EchoMismatch {
                expected: echo,
                actual: actual_echo,
            });
        }
        let declared = usize::from(buf.get_u16());
        if declared != buf.len() {
            return Err(DeviceError::LengthMismatch {
                declared,
                actual: buf.len(),
            });
        }
        return Ok(buf);
    }

    if Some(kind) == op.error_kind() {
        if body.len() < ERROR_REPLY_LEN {
            return Err(DeviceError::ShortResponse {
                len: body.len(),
                min: ERROR_REPLY_LEN,
            });
        }
        return Err(DeviceError::Remote { op, code: buf.get_u8() });
    }

    Err(DeviceError::UnexpectedKind {
        expected: success,
        actual: kind,
    })
}
