/// Errors that can occur during frame encoding/decoding.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    /// The buffer ended before the fixed header or the declared payload.
    #[error("truncated frame ({available} bytes available, {needed} needed)")]
    Truncated { needed: usize, available: usize },

    /// The payload does not fit the 4-byte length field.
    #[error("payload too large ({size} bytes, max {max})")]
    PayloadTooLarge { size: usize, max: usize },

    /// A text payload is not valid UTF-8.
    #[error("frame payload is not valid UTF-8: {0}")]
    InvalidText(#[from] std::str::Utf8Error),

    /// The origin trailer carries an address family this codec cannot represent.
    #[error("unsupported origin address family {0}")]
    UnsupportedFamily(i8),
}

pub type Result<T> = std::result::Result<T, FrameError>;
