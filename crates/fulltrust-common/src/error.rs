//! Error types for the FullTrust protocol

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Packet checksum mismatch: header {expected:#018x}, content {actual:#018x}")]
    ChecksumMismatch { expected: u64, actual: u64 },

    #[error("Invalid content length: {0}")]
    InvalidContentLength(i32),

    #[error("Unexpected content: {0}")]
    UnexpectedContent(String),

    #[error("Unexpected packet: {0}")]
    UnexpectedPacket(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Whether the channel can no longer be trusted after this error.
    ///
    /// Short reads, corrupted payloads and impossible lengths leave the byte
    /// stream out of sync. Serialization and content-kind errors are raised
    /// only after the payload has been fully consumed and verified, so the
    /// next header is still aligned.
    pub fn is_connection_fault(&self) -> bool {
        matches!(
            self,
            Error::Io(_)
                | Error::ChecksumMismatch { .. }
                | Error::InvalidContentLength(_)
                | Error::UnexpectedPacket(_)
        )
    }

    /// Whether this is a clean end-of-stream while waiting for a header
    pub fn is_disconnect(&self) -> bool {
        match self {
            Error::Io(e) => matches!(
                e.kind(),
                std::io::ErrorKind::UnexpectedEof
                    | std::io::ErrorKind::BrokenPipe
                    | std::io::ErrorKind::ConnectionReset
                    | std::io::ErrorKind::ConnectionAborted
            ),
            _ => false,
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}
