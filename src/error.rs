//! Error types for framewire.

use thiserror::Error;

/// Main error type for all framewire operations.
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error from the underlying socket (connect, read, write).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Declared payload length exceeds the session's read buffer size.
    #[error("Message size {declared} exceeds read buffer size {limit}")]
    MessageSize { declared: u64, limit: usize },

    /// Length prefix encoded in more bytes than the framing permits
    /// (8 for fixed-width prefixes, 9 for varint).
    #[error("Length prefix too large")]
    ValueTooLarge,

    /// Declared length smaller than the prefix it is supposed to include.
    #[error("Declared length smaller than included prefix")]
    BadMessage,

    /// The framing configuration is not supported.
    #[error("Protocol not supported")]
    ProtocolNotSupported,

    /// A handler callback panicked and the `except` callback panicked as
    /// well while handling it.
    #[error("Unexpected panic from {0} handler")]
    HandlerPanic(&'static str),
}

impl Error {
    /// Check if this error is an end-of-stream condition.
    #[inline]
    pub fn is_eof(&self) -> bool {
        matches!(self, Error::Io(e) if e.kind() == std::io::ErrorKind::UnexpectedEof)
    }
}

/// Result type alias using [`Error`].
pub type Result<T> = std::result::Result<T, Error>;
