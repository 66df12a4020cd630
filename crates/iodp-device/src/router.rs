use iodp_frame::{decode_frame, kind, Frame, Message, Reply, Request};
use tracing::{debug, trace, warn};

use crate::correlation::CallClass;
use crate::device::Shared;
use crate::sync::{lock, read};

/// Verify one raw frame and act on it. Returns the kind of a routed frame,
/// or `None` when the frame was dropped.
pub(crate) fn route(shared: &Shared, raw: &[u8]) -> Option<u16> {
    let frame = match decode_frame(raw) {
        Ok(frame) => frame,
        Err(err) => {
            warn!(error = %err, len = raw.len(), "dropping frame");
            shared.stats.dropped();
            return None;
        }
    };
    trace!(
        kind = format_args!("{:#06x}", frame.kind),
        name = kind::kind_name(frame.kind),
        len = frame.payload.len(),
        "frame received"
    );

    let routed = if frame.is_request() {
        serve(shared, &frame)
    } else {
        deliver(shared, &frame)
    };
    if routed {
        shared.stats.routed();
        Some(frame.kind)
    } else {
        shared.stats.dropped();
        None
    }
}

fn serve(shared: &Shared, frame: &Frame) -> bool {
    let request = match Request::parse(frame) {
        Ok(request) => request,
        Err(err) => {
            warn!(kind = format_args!("{:#06x}", frame.kind), error = %err, "dropping request");
            return false;
        }
    };

    let reply = match request {
        Request::WriteMemory { addr, data } => {
            if let Err(err) = lock(&shared.memory).write(addr, &data) {
                debug!(error = %err, "memory write truncated");
            }
            None
        }
        Request::ReadMemory { addr, len } => {
            let limit = shared.config.max_write_len();
            Some(lock(&shared.memory).reply_to_read(addr, len, limit))
        }
        Request::CallFunction { code, args } => {
            let max_return = shared.config.max_reply_return();
            Some(read(&shared.registry).dispatch(code, &args, max_return))
        }
    };
    shared.stats.served();

    if let Some(reply) = reply {
        send_reply(shared, &reply);
    }
    true
}

fn send_reply(shared: &Shared, reply: &Reply) {
    if let Err(err) = lock(&shared.writer).send(reply) {
        warn!(kind = format_args!("{:#06x}", reply.kind()), error = %err, "failed to send reply");
    }
}

fn deliver(shared: &Shared, frame: &Frame) -> bool {
    let Some(class) = frame.operation().and_then(CallClass::from_operation) else {
        warn!(kind = format_args!("{:#06x}", frame.kind), "dropping reply of unknown class");
        return false;
    };
    if shared.correlator.slot(class).deliver(&frame.body()) {
        shared.stats.delivered();
    } else {
        shared.stats.discarded();
    }
    true
}
