//! Error types for the data channel.

use chunkstream_transfer::TransferError;

/// Errors produced by the TCP data channel.
#[derive(Debug, thiserror::Error)]
pub enum DataChannelError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("connection timed out")]
    Timeout,

    #[error("cancelled")]
    Cancelled,

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error(transparent)]
    Transfer(#[from] TransferError),
}

impl From<DataChannelError> for TransferError {
    fn from(err: DataChannelError) -> Self {
        match err {
            DataChannelError::Transfer(e) => e,
            DataChannelError::Cancelled => TransferError::Cancelled,
            other => TransferError::Channel(other.to_string()),
        }
    }
}
