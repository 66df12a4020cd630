use std::collections::HashMap;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use bytes::Bytes;
use iodp_frame::kind::{ERR_HANDLER_FAILED, ERR_RETURN_OVERFLOW, ERR_UNKNOWN_FUNCTION};
use iodp_frame::Reply;
use tracing::{debug, warn};

use crate::error::{DeviceError, Result};

/// Failure reported by a local function.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{0}")]
pub struct HandlerError(pub String);

impl HandlerError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

/// What a local function produces: its return bytes, or a failure.
pub type HandlerResult = std::result::Result<Vec<u8>, HandlerError>;

/// A function the peer can invoke by code.
///
/// Handlers run on the thread that processes inbound frames and must not
/// issue calls to the peer that wait on that same thread.
pub trait Handler: Send + Sync + 'static {
    fn call(&self, args: &[u8]) -> HandlerResult;
}

impl<F> Handler for F
where
    F: Fn(&[u8]) -> HandlerResult + Send + Sync + 'static,
{
    fn call(&self, args: &[u8]) -> HandlerResult {
        self(args)
    }
}

/// Table mapping 16-bit function codes to handlers.
pub struct FunctionRegistry {
    handlers: HashMap<u16, Arc<dyn Handler>>,
    max_functions: usize,
}

impl fmt::Debug for FunctionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FunctionRegistry")
            .field("codes", &self.codes())
            .field("max_functions", &self.max_functions)
            .finish()
    }
}

impl FunctionRegistry {
    pub fn new(max_functions: usize) -> Self {
        Self {
            handlers: HashMap::new(),
            max_functions,
        }
    }

    /// Add a handler under `code`. Codes are unique.
    pub fn register(&mut self, code: u16, handler: Arc<dyn Handler>) -> Result<()> {
        if self.handlers.contains_key(&code) {
            return Err(DeviceError::DuplicateFunction(code));
        }
        if self.handlers.len() >= self.max_functions {
            return Err(DeviceError::RegistryFull {
                max: self.max_functions,
            });
        }
        self.handlers.try_reserve(1)?;
        self.handlers.insert(code, handler);
        debug!(code = format_args!("{code:#06x}"), "function registered");
        Ok(())
    }

    pub fn lookup(&self, code: u16) -> Option<Arc<dyn Handler>> {
        self.handlers.get(&code).cloned()
    }

    /// Registered codes in ascending order.
    pub fn codes(&self) -> Vec<u16> {
        let mut codes: Vec<u16> = self.handlers.keys().copied().collect();
        codes.sort_unstable();
        codes
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// Run the handler for `code` and shape its outcome as a reply.
    pub fn dispatch(&self, code: u16, args: &[u8], max_return: usize) -> Reply {
        match self.lookup(code) {
            Some(handler) => invoke(code, handler.as_ref(), args, max_return),
            None => {
                debug!(code = format_args!("{code:#06x}"), "call to unknown function");
                call_error(ERR_UNKNOWN_FUNCTION)
            }
        }
    }
}

/// Invoke `handler`, turning failures, panics and oversized returns into
/// call error replies.
fn invoke(code: u16, handler: &dyn Handler, args: &[u8], max_return: usize) -> Reply {
    match panic::catch_unwind(AssertUnwindSafe(|| handler.call(args))) {
        Ok(Ok(ret)) if ret.len() > max_return => {
            warn!(
                code = format_args!("{code:#06x}"),
                len = ret.len(),
                max = max_return,
                "function return exceeds reply limit"
            );
            call_error(ERR_RETURN_OVERFLOW)
        }
        Ok(Ok(ret)) => Reply::Call {
            code,
            ret: Bytes::from(ret),
        },
        Ok(Err(err)) => {
            warn!(code = format_args!("{code:#06x}"), error = %err, "function failed");
            call_error(ERR_HANDLER_FAILED)
        }
        Err(_) => {
            warn!(code = format_args!("{code:#06x}"), "function panicked");
            call_error(ERR_HANDLER_FAILED)
        }
    }
}

fn call_error(code: u8) -> Reply {
    Reply::CallError { code }
}
