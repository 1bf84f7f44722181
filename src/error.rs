use std::io;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Errors produced by the framing, key exchange, and transfer layers.
///
/// Every layer returns the first error to its caller; there is no retry
/// here. None of these are treated as fatal to the process - the caller
/// decides whether to drop the transfer, the connection, or neither.
#[derive(Debug, Error)]
pub enum Error {
    /// The stream or source file ended before the expected byte count.
    #[error("short read: stream ended before the expected byte count")]
    ShortRead,

    /// A frame carried an error code outside the known table.
    #[error("unknown wire error code {0}")]
    UnknownErrorCode(u8),

    /// A chunk arrived with an index other than the next expected one.
    #[error("chunk out of order: expected index {expected}, got {got}")]
    ChunkOutOfOrder { expected: u16, got: u16 },

    /// The stream ended before all declared chunks were accepted.
    #[error("incomplete file: transfer ended before all declared chunks arrived")]
    IncompleteFile,

    /// The key bundle signature did not verify under the sender's public key.
    #[error("signature mismatch: key bundle failed verification")]
    SignatureMismatch,

    /// AEAD seal/open failure - tampered ciphertext, nonce, or tag.
    #[error("cipher error: ciphertext or tag rejected")]
    Cipher,

    /// Underlying I/O failure (stream, open/create/rename/remove).
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),

    /// Reported by callers/transport with an external deadline; the framing
    /// and cipher layers never enforce one themselves.
    #[error("operation timed out")]
    Timeout,

    /// The file needs more chunks than a 16-bit index can address.
    #[error("file too large to transfer: {0} bytes")]
    FileTooLarge(u64),

    /// A pooled buffer was requested for more bytes than it can hold.
    #[error("buffer too small: need {needed} bytes, pool buffers hold {capacity}")]
    BufferTooSmall { needed: usize, capacity: usize },

    /// The decrypted file name is empty, not UTF-8, or tries to escape the
    /// download directory.
    #[error("bad file name: {0}")]
    BadFileName(String),

    /// A frame payload exceeds the u32 length prefix.
    #[error("frame payload too large: {0} bytes")]
    FrameTooLarge(usize),

    /// The key bundle message did not split into key and chunk count.
    #[error("malformed key bundle message")]
    InvalidKeyBundle,

    /// RSA key generation, encoding, or padding failure.
    #[error("key error: {0}")]
    Key(String),

    /// The peer embedded a non-zero error code in a frame.
    #[error("peer reported error: {0}")]
    Peer(ErrorCode),

    /// Relay or handshake message that could not be understood.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// A failed transfer left a temp file behind that could not be removed.
    /// Carries both the transfer error and the cleanup error so neither is
    /// silently dropped.
    #[error("cleanup failed: {cleanup} (after transfer error: {transfer})")]
    CleanupFailed {
        transfer: Box<Error>,
        cleanup: io::Error,
    },
}

/// The wire error-code table. Code 0 is reserved for "no error"; every
/// reportable condition maps to one stable byte, and unmapped bytes decode
/// to [`Error::UnknownErrorCode`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ErrorCode {
    ShortRead = 1,
    UnknownErrorCode = 2,
    ChunkOutOfOrder = 3,
    IncompleteFile = 4,
    SignatureMismatch = 5,
    Cipher = 6,
    Io = 7,
    Timeout = 8,
    FileTooLarge = 9,
    BufferTooSmall = 10,
    BadFileName = 11,
    FrameTooLarge = 12,
    InvalidKeyBundle = 13,
    Key = 14,
    Protocol = 15,
    CleanupFailed = 16,
}

impl ErrorCode {
    pub fn from_byte(byte: u8) -> Option<ErrorCode> {
        match byte {
            1 => Some(ErrorCode::ShortRead),
            2 => Some(ErrorCode::UnknownErrorCode),
            3 => Some(ErrorCode::ChunkOutOfOrder),
            4 => Some(ErrorCode::IncompleteFile),
            5 => Some(ErrorCode::SignatureMismatch),
            6 => Some(ErrorCode::Cipher),
            7 => Some(ErrorCode::Io),
            8 => Some(ErrorCode::Timeout),
            9 => Some(ErrorCode::FileTooLarge),
            10 => Some(ErrorCode::BufferTooSmall),
            11 => Some(ErrorCode::BadFileName),
            12 => Some(ErrorCode::FrameTooLarge),
            13 => Some(ErrorCode::InvalidKeyBundle),
            14 => Some(ErrorCode::Key),
            15 => Some(ErrorCode::Protocol),
            16 => Some(ErrorCode::CleanupFailed),
            _ => None,
        }
    }

    pub fn as_byte(self) -> u8 {
        self as u8
    }

    fn name(self) -> &'static str {
        match self {
            ErrorCode::ShortRead => "short read",
            ErrorCode::UnknownErrorCode => "unknown error code",
            ErrorCode::ChunkOutOfOrder => "chunk out of order",
            ErrorCode::IncompleteFile => "incomplete file",
            ErrorCode::SignatureMismatch => "signature mismatch",
            ErrorCode::Cipher => "cipher error",
            ErrorCode::Io => "i/o error",
            ErrorCode::Timeout => "timeout",
            ErrorCode::FileTooLarge => "file too large",
            ErrorCode::BufferTooSmall => "buffer too small",
            ErrorCode::BadFileName => "bad file name",
            ErrorCode::FrameTooLarge => "frame too large",
            ErrorCode::InvalidKeyBundle => "invalid key bundle",
            ErrorCode::Key => "key error",
            ErrorCode::Protocol => "protocol error",
            ErrorCode::CleanupFailed => "cleanup failed",
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

impl Error {
    /// The byte embedded in a frame header when this error is signaled to
    /// the peer.
    pub fn wire_code(&self) -> u8 {
        match self {
            Error::ShortRead => ErrorCode::ShortRead.as_byte(),
            Error::UnknownErrorCode(_) => ErrorCode::UnknownErrorCode.as_byte(),
            Error::ChunkOutOfOrder { .. } => ErrorCode::ChunkOutOfOrder.as_byte(),
            Error::IncompleteFile => ErrorCode::IncompleteFile.as_byte(),
            Error::SignatureMismatch => ErrorCode::SignatureMismatch.as_byte(),
            Error::Cipher => ErrorCode::Cipher.as_byte(),
            Error::Io(_) => ErrorCode::Io.as_byte(),
            Error::Timeout => ErrorCode::Timeout.as_byte(),
            Error::FileTooLarge(_) => ErrorCode::FileTooLarge.as_byte(),
            Error::BufferTooSmall { .. } => ErrorCode::BufferTooSmall.as_byte(),
            Error::BadFileName(_) => ErrorCode::BadFileName.as_byte(),
            Error::FrameTooLarge(_) => ErrorCode::FrameTooLarge.as_byte(),
            Error::InvalidKeyBundle => ErrorCode::InvalidKeyBundle.as_byte(),
            Error::Key(_) => ErrorCode::Key.as_byte(),
            Error::Peer(code) => code.as_byte(),
            Error::Protocol(_) => ErrorCode::Protocol.as_byte(),
            Error::CleanupFailed { .. } => ErrorCode::CleanupFailed.as_byte(),
        }
    }

    /// Decode a frame's error-code byte. Returns `None` for 0 (no error),
    /// a [`Error::Peer`] for any mapped code, and
    /// [`Error::UnknownErrorCode`] for the rest.
    pub fn decode_wire_code(byte: u8) -> Option<Error> {
        if byte == 0 {
            return None;
        }
        Some(match ErrorCode::from_byte(byte) {
            Some(code) => Error::Peer(code),
            None => Error::UnknownErrorCode(byte),
        })
    }
}
