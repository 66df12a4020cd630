use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::crc;
use crate::error::{FrameError, Result};
use crate::kind::{self, Operation};

/// Sync word opening every frame.
pub const SYNC: [u8; 2] = [0xEB, 0x90];

/// Sync (2) + size (2). The size field counts everything after this prefix.
pub const PREFIX_SIZE: usize = 4;

/// Kind field width.
pub const KIND_SIZE: usize = 2;

/// CRC32 trailer width.
pub const TRAILER_SIZE: usize = 4;

/// Smallest legal size field: kind + trailer, empty payload.
pub const MIN_SIZE_FIELD: usize = KIND_SIZE + TRAILER_SIZE;

/// Bytes a frame adds around its payload.
pub const FRAME_OVERHEAD: usize = PREFIX_SIZE + KIND_SIZE + TRAILER_SIZE;

/// Default frame size bound, matching the parser's assembly buffer.
pub const DEFAULT_MAX_FRAME_SIZE: usize = 1024;

/// Largest payload a frame can carry under `max_frame_size`.
///
/// Frames must be strictly shorter than `max_frame_size`.
pub fn max_payload(max_frame_size: usize) -> usize {
    max_frame_size.saturating_sub(FRAME_OVERHEAD + 1)
}

/// A decoded frame with sync, size and trailer stripped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// The kind code.
    pub kind: u16,
    /// Everything between the kind and the trailer.
    pub payload: Bytes,
}

impl Frame {
    /// Create a new frame.
    pub fn new(kind: u16, payload: impl Into<Bytes>) -> Self {
        Self {
            kind,
            payload: payload.into(),
        }
    }

    pub fn is_request(&self) -> bool {
        kind::is_request(self.kind)
    }

    pub fn operation(&self) -> Option<Operation> {
        Operation::from_kind(self.kind)
    }

    /// Kind followed by payload, as handed to a waiting caller.
    pub fn body(&self) -> Bytes {
        let mut body = BytesMut::with_capacity(KIND_SIZE + self.payload.len());
        body.put_u16(self.kind);
        body.put_slice(&self.payload);
        body.freeze()
    }

    /// The total wire size of this frame.
    pub fn wire_size(&self) -> usize {
        FRAME_OVERHEAD + self.payload.len()
    }
}

/// Configuration for the frame codec.
#[derive(Debug, Clone)]
pub struct FrameConfig {
    /// Exclusive upper bound on a whole frame in bytes. Default: 1024.
    pub max_frame_size: usize,
}

impl Default for FrameConfig {
    fn default() -> Self {
        Self {
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
        }
    }
}

/// Anything that knows its kind and how to lay out its payload.
pub trait Message {
    fn kind(&self) -> u16;
    fn payload_len(&self) -> usize;
    fn put_payload(&self, dst: &mut BytesMut);
}

/// Encode a frame into the wire format.
///
/// Wire format:
/// ```text
/// ┌────────────┬────────────┬────────────┬──────────────┬────────────┐
/// │ Sync (2B)  │ Size       │ Kind       │ Payload      │ CRC32      │
/// │ 0xEB 0x90  │ (2B BE)    │ (2B BE)    │ (Size-6 B)   │ (4B BE)    │
/// └────────────┴────────────┴────────────┴──────────────┴────────────┘
/// ```
/// The CRC covers sync through payload.
pub fn encode_frame(
    kind: u16,
    payload: &[u8],
    max_frame_size: usize,
    dst: &mut BytesMut,
) -> Result<()> {
    encode_with(kind, payload.len(), max_frame_size, dst, |dst| {
        dst.put_slice(payload)
    })
}

/// Encode a typed message into the wire format.
pub fn encode_message<M: Message + ?Sized>(
    message: &M,
    max_frame_size: usize,
    dst: &mut BytesMut,
) -> Result<()> {
    encode_with(
        message.kind(),
        message.payload_len(),
        max_frame_size,
        dst,
        |dst| message.put_payload(dst),
    )
}

fn encode_with(
    kind: u16,
    payload_len: usize,
    max_frame_size: usize,
    dst: &mut BytesMut,
    put_payload: impl FnOnce(&mut BytesMut),
) -> Result<()> {
    let total = FRAME_OVERHEAD + payload_len;
    let size = total - PREFIX_SIZE;
    if total >= max_frame_size || size > u16::MAX as usize {
        return Err(FrameError::FrameTooLarge {
            size: total,
            max: max_frame_size,
        });
    }

    let start = dst.len();
    dst.reserve(total);
    dst.put_slice(&SYNC);
    dst.put_u16(size as u16);
    dst.put_u16(kind);
    put_payload(dst);
    dst.put_u32(0);
    debug_assert_eq!(dst.len() - start, total);
    crc::store_trailer(&mut dst[start..]);
    Ok(())
}

/// Decode one complete frame, verifying sync word, size field and trailer.
///
/// Bytes past the length declared by the size field are ignored.
pub fn decode_frame(bytes: &[u8]) -> Result<Frame> {
    if bytes.len() < FRAME_OVERHEAD {
        return Err(FrameError::Truncated {
            needed: FRAME_OVERHEAD,
            actual: bytes.len(),
        });
    }
    if bytes[..2] != SYNC {
        return Err(FrameError::InvalidSync);
    }

    let size = u16::from_be_bytes([bytes[2], bytes[3]]) as usize;
    if size < MIN_SIZE_FIELD {
        return Err(FrameError::Truncated {
            needed: FRAME_OVERHEAD,
            actual: PREFIX_SIZE + size,
        });
    }
    let total = PREFIX_SIZE + size;
    if bytes.len() < total {
        return Err(FrameError::Truncated {
            needed: total,
            actual: bytes.len(),
        });
    }

    let frame = &bytes[..total];
    let expected = crc::stored_trailer(frame).unwrap_or_default();
    let actual = crc::checksum(&frame[..total - TRAILER_SIZE]);
    if expected != actual {
        return Err(FrameError::ChecksumMismatch { expected, actual });
    }

    let kind = u16::from_be_bytes([frame[4], frame[5]]);
    let payload = Bytes::copy_from_slice(&frame[PREFIX_SIZE + KIND_SIZE..total - TRAILER_SIZE]);
    Ok(Frame { kind, payload })
}

/// An inbound request as seen by the responder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    /// Payload: addr(2) len(2) data(len).
    WriteMemory { addr: u16, data: Bytes },
    /// Payload: addr(2) len(2).
    ReadMemory { addr: u16, len: u16 },
    /// Payload: code(2) arglen(2) args(arglen).
    CallFunction { code: u16, args: Bytes },
}

impl Request {
    /// Interpret a request frame. Only the operation byte of the kind is
    /// consulted; the caller has already checked the request bit.
    pub fn parse(frame: &Frame) -> Result<Self> {
        let op = frame
            .operation()
            .ok_or(FrameError::UnknownKind(frame.kind))?;
        let mut payload = frame.payload.clone();
        if payload.len() < 4 {
            return Err(FrameError::Truncated {
                needed: 4,
                actual: payload.len(),
            });
        }
        let first = payload.get_u16();
        let len = payload.get_u16();

        match op {
            Operation::ReadMemory => Ok(Self::ReadMemory { addr: first, len }),
            Operation::WriteMemory | Operation::CallFunction => {
                let len = len as usize;
                if payload.len() < len {
                    return Err(FrameError::Truncated {
                        needed: 4 + len,
                        actual: 4 + payload.len(),
                    });
                }
                let data = payload.split_to(len);
                Ok(match op {
                    Operation::WriteMemory => Self::WriteMemory { addr: first, data },
                    _ => Self::CallFunction {
                        code: first,
                        args: data,
                    },
                })
            }
        }
    }

    pub fn operation(&self) -> Operation {
        match self {
            Self::WriteMemory { .. } => Operation::WriteMemory,
            Self::ReadMemory { .. } => Operation::ReadMemory,
            Self::CallFunction { .. } => Operation::CallFunction,
        }
    }
}

impl Message for Request {
    fn kind(&self) -> u16 {
        self.operation().request_kind()
    }

    fn payload_len(&self) -> usize {
        match self {
            Self::WriteMemory { data, .. } => 4 + data.len(),
            Self::ReadMemory { .. } => 4,
            Self::CallFunction { args, .. } => 4 + args.len(),
        }
    }

    fn put_payload(&self, dst: &mut BytesMut) {
        match self {
            Self::WriteMemory { addr, data } => {
                dst.put_u16(*addr);
                dst.put_u16(data.len() as u16);
                dst.put_slice(data);
            }
            Self::ReadMemory { addr, len } => {
                dst.put_u16(*addr);
                dst.put_u16(*len);
            }
            Self::CallFunction { code, args } => {
                dst.put_u16(*code);
                dst.put_u16(args.len() as u16);
                dst.put_slice(args);
            }
        }
    }
}

/// An outbound reply from the responder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    /// Payload: addr(2) len(2) data(len).
    Read { addr: u16, data: Bytes },
    /// Payload: code(2) retlen(2) ret(retlen).
    Call { code: u16, ret: Bytes },
    /// Failed read. Payload: error code (1).
    ReadError { code: u8 },
    /// Failed call. Payload: error code (1).
    CallError { code: u8 },
}

impl Reply {
    /// The operation this reply answers. Writes are never answered.
    pub fn operation(&self) -> Operation {
        match self {
            Self::Read { .. } | Self::ReadError { .. } => Operation::ReadMemory,
            Self::Call { .. } | Self::CallError { .. } => Operation::CallFunction,
        }
    }
}

impl Message for Reply {
    fn kind(&self) -> u16 {
        match self {
            Self::Read { .. } => kind::READ_REPLY,
            Self::Call { .. } => kind::CALL_REPLY,
            Self::ReadError { .. } => kind::READ_ERROR,
            Self::CallError { .. } => kind::CALL_ERROR,
        }
    }

    fn payload_len(&self) -> usize {
        match self {
            Self::Read { data, .. } => 4 + data.len(),
            Self::Call { ret, .. } => 4 + ret.len(),
            Self::ReadError { .. } | Self::CallError { .. } => 1,
        }
    }

    fn put_payload(&self, dst: &mut BytesMut) {
        match self {
            Self::Read { addr, data } => {
                dst.put_u16(*addr);
                dst.put_u16(data.len() as u16);
                dst.put_slice(data);
            }
            Self::Call { code, ret } => {
                dst.put_u16(*code);
                dst.put_u16(ret.len() as u16);
                dst.put_slice(ret);
            }
            Self::ReadError { code } | Self::CallError { code } => dst.put_u8(*code),
        }
    }
}
