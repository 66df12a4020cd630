//! Frame layer of the iodp device protocol.
//!
//! Every packet on the wire is framed as:
//! - A 2-byte sync word (`0xEB 0x90`) for stream synchronization
//! - A 2-byte big-endian size covering kind, payload and trailer
//! - A 2-byte big-endian kind (request/response bit, status, operation)
//! - The payload, then a 4-byte big-endian CRC32 over everything before it
//!
//! Inbound bytes are staged in a [`RingBuffer`] and cut into frames by the
//! resumable [`FrameParser`]; outbound frames go through a [`FrameWriter`].

pub mod codec;
pub mod crc;
pub mod error;
pub mod kind;
pub mod parser;
pub mod ring;
pub mod writer;

pub use codec::{
    decode_frame, encode_frame, encode_message, max_payload, Frame, FrameConfig, Message, Reply,
    Request, DEFAULT_MAX_FRAME_SIZE, FRAME_OVERHEAD, PREFIX_SIZE, SYNC, TRAILER_SIZE,
};
pub use error::{FrameError, Result};
pub use kind::Operation;
pub use parser::{FrameParser, ParserStats};
pub use ring::RingBuffer;
pub use writer::FrameWriter;
