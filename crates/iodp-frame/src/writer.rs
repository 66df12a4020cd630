use std::io::ErrorKind;

use bytes::BytesMut;
use iodp_transport::Link;

use crate::codec::{encode_frame, encode_message, FrameConfig, Message};
use crate::error::{FrameError, Result};

const INITIAL_BUFFER_CAPACITY: usize = 1024;

/// Writes complete frames to a [`Link`].
///
/// Each frame is encoded into a reused buffer and pushed out whole; partial
/// writes are continued, `Interrupted` and `WouldBlock` are retried.
pub struct FrameWriter<L> {
    link: L,
    buf: BytesMut,
    config: FrameConfig,
}

impl<L: Link> FrameWriter<L> {
    /// Create a new frame writer with default configuration.
    pub fn new(link: L) -> Self {
        Self::with_config(link, FrameConfig::default())
    }

    /// Create a new frame writer with explicit configuration.
    pub fn with_config(link: L, config: FrameConfig) -> Self {
        Self {
            link,
            buf: BytesMut::with_capacity(INITIAL_BUFFER_CAPACITY.min(config.max_frame_size)),
            config,
        }
    }

    /// Encode and send a typed message. Returns the frame's wire size.
    pub fn send<M: Message + ?Sized>(&mut self, message: &M) -> Result<usize> {
        self.buf.clear();
        encode_message(message, self.config.max_frame_size, &mut self.buf)?;
        self.flush_buf()
    }

    /// Encode and send a raw kind and payload. Returns the frame's wire size.
    pub fn send_raw(&mut self, kind: u16, payload: &[u8]) -> Result<usize> {
        self.buf.clear();
        encode_frame(kind, payload, self.config.max_frame_size, &mut self.buf)?;
        self.flush_buf()
    }

    fn flush_buf(&mut self) -> Result<usize> {
        let mut offset = 0usize;
        while offset < self.buf.len() {
            match self.link.write(&self.buf[offset..]) {
                Ok(0) => return Err(FrameError::ConnectionClosed),
                Ok(n) => offset += n,
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) if err.kind() == ErrorKind::WouldBlock => continue,
                Err(err) => return Err(FrameError::Io(err)),
            }
        }
        Ok(self.buf.len())
    }

    /// Borrow the underlying link.
    pub fn get_ref(&self) -> &L {
        &self.link
    }

    /// Consume the writer and return the inner link.
    pub fn into_inner(self) -> L {
        self.link
    }

    /// Current frame writer configuration.
    pub fn config(&self) -> &FrameConfig {
        &self.config
    }
}
