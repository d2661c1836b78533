//! Shared error type across mbguard crates.

use thiserror::Error;

/// Stable error codes used in logs and operational APIs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    /// Byte stream could not be framed as Modbus TCP.
    FrameError,
    /// Configuration rejected at load or compile time.
    BadConfig,
    /// Backend controller unreachable or its socket failed.
    BackendUnavailable,
    /// Client-side socket failure.
    Io,
    /// Internal fault.
    Internal,
}

impl ErrorCode {
    /// String representation used in logs and JSON responses.
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorCode::FrameError => "FRAME_ERROR",
            ErrorCode::BadConfig => "BAD_CONFIG",
            ErrorCode::BackendUnavailable => "BACKEND_UNAVAILABLE",
            ErrorCode::Io => "IO",
            ErrorCode::Internal => "INTERNAL",
        }
    }
}

/// Framing failures. All of them are fatal for the connection: a stream
/// that produced one cannot be resynchronized.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FrameError {
    #[error("protocol identifier mismatch: expected 0x0000, got {0:#06x}")]
    ProtocolMismatch(u16),
    #[error("declared length {declared} outside [{min}, {max}]")]
    LengthOutOfRange { declared: u16, min: u16, max: u16 },
}

impl FrameError {
    /// Short reason tag used in metrics labels.
    pub fn kind(&self) -> &'static str {
        match self {
            FrameError::ProtocolMismatch(_) => "protocol_mismatch",
            FrameError::LengthOutOfRange { .. } => "length_out_of_range",
        }
    }
}

/// Shared result type.
pub type Result<T> = std::result::Result<T, MbGuardError>;

/// Unified error type used by core and proxy.
#[derive(Debug, Error)]
pub enum MbGuardError {
    #[error("malformed frame: {0}")]
    Frame(#[from] FrameError),
    #[error("bad config: {0}")]
    BadConfig(String),
    #[error("backend unavailable: {0}")]
    BackendUnavailable(String),
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error("internal: {0}")]
    Internal(String),
}

impl MbGuardError {
    /// Map internal error to a stable code.
    pub fn code(&self) -> ErrorCode {
        match self {
            MbGuardError::Frame(_) => ErrorCode::FrameError,
            MbGuardError::BadConfig(_) => ErrorCode::BadConfig,
            MbGuardError::BackendUnavailable(_) => ErrorCode::BackendUnavailable,
            MbGuardError::Io(_) => ErrorCode::Io,
            MbGuardError::Internal(_) => ErrorCode::Internal,
        }
    }
}
