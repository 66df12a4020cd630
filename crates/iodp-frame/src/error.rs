/// Errors that can occur during frame encoding, decoding and buffering.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    /// The frame does not start with the sync word.
    #[error("invalid sync word (expected 0xEB90)")]
    InvalidSync,

    /// An outbound frame would not fit the configured maximum frame size.
    #[error("frame too large ({size} bytes, must be shorter than {max})")]
    FrameTooLarge { size: usize, max: usize },

    /// Fewer bytes are present than the frame or payload declares.
    #[error("truncated frame (needed {needed} bytes, got {actual})")]
    Truncated { needed: usize, actual: usize },

    /// The CRC32 trailer does not match the frame contents.
    #[error("checksum mismatch (trailer {expected:#010x}, computed {actual:#010x})")]
    ChecksumMismatch { expected: u32, actual: u32 },

    /// The kind field names no known operation.
    #[error("unknown frame kind {0:#06x}")]
    UnknownKind(u16),

    /// A ring buffer write would close the reserved slot.
    #[error("ring buffer full ({incoming} incoming, {occupied} of {capacity} occupied)")]
    RingFull {
        incoming: usize,
        occupied: usize,
        capacity: usize,
    },

    /// An I/O error occurred while writing frames to the link.
    #[error("frame I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The link accepted zero bytes.
    #[error("link closed")]
    ConnectionClosed,
}

pub type Result<T> = std::result::Result<T, FrameError>;
