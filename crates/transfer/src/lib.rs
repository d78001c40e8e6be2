//! Chunked single-file upload.
//!
//! The sending side partitions a file with [`Chunker`] and streams it through
//! an [`UploadSink`]. The receiving side runs a [`Receiver`] over an
//! [`UploadStream`]: every chunk is checked against the expected next offset,
//! persisted as an intermediate artifact, and the artifacts are merged into
//! the final file once the stream ends.

pub mod channel;
mod checksum;
mod chunker;
mod merger;
mod receiver;
mod session;
mod store;

pub use channel::{UploadSink, UploadStream};
pub use checksum::checksum_bytes;
pub use chunker::{Chunker, read_source, upload_file};
pub use merger::{MergeSummary, merge_artifacts};
pub use receiver::{CleanupPolicy, ReceiveSummary, Receiver, ReceiverConfig};
pub use session::{SessionState, TransferSession};
pub use store::{ArtifactKey, ArtifactStore};

pub use chunkstream_protocol::{DEFAULT_BLOCK_SIZE, Status, StatusCode};

/// Failure category of a [`TransferError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Local file read or write failure, on either side.
    Io,
    /// A chunk declared an offset other than the expected next offset.
    Sequence,
    /// A chunk or parameter violated the chunk invariants.
    InvalidInput,
    /// Channel-level send/receive failure, including premature close.
    Transfer,
}

/// Leading text of every [`TransferError::Sequence`] message.
///
/// Sequence errors and malformed input share `InvalidArgument` on the wire;
/// the client tells them apart by this prefix.
const SEQUENCE_MESSAGE_PREFIX: &str = "invalid chunk received";

/// Errors produced by the transfer crate.
#[derive(Debug, thiserror::Error)]
pub enum TransferError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to write chunk at offset {offset}: {source}")]
    Persist {
        offset: i64,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to merge chunks: {0}")]
    Merge(#[source] std::io::Error),

    #[error("invalid chunk received, expected offset {expected} but got {actual}")]
    Sequence { expected: i64, actual: i64 },

    #[error("malformed chunk at offset {offset}: {reason}")]
    MalformedChunk { offset: i64, reason: String },

    #[error("invalid block size: {0}")]
    InvalidBlockSize(usize),

    #[error("channel error: {0}")]
    Channel(String),

    #[error("session is {0}")]
    SessionClosed(SessionState),

    #[error("cancelled")]
    Cancelled,

    #[error("upload failed on the server: {0}")]
    Remote(Status),
}

impl TransferError {
    /// Returns the failure category.
    ///
    /// For [`TransferError::Remote`] the category is recovered from the
    /// status code sent by the server.
    pub fn kind(&self) -> ErrorKind {
        match self {
            TransferError::Io(_) | TransferError::Persist { .. } | TransferError::Merge(_) => {
                ErrorKind::Io
            }
            TransferError::Sequence { .. } => ErrorKind::Sequence,
            TransferError::MalformedChunk { .. } | TransferError::InvalidBlockSize(_) => {
                ErrorKind::InvalidInput
            }
            TransferError::Channel(_)
            | TransferError::SessionClosed(_)
            | TransferError::Cancelled => ErrorKind::Transfer,
            TransferError::Remote(status) => match status.code {
                StatusCode::InvalidArgument
                    if status.message.starts_with(SEQUENCE_MESSAGE_PREFIX) =>
                {
                    ErrorKind::Sequence
                }
                StatusCode::InvalidArgument => ErrorKind::InvalidInput,
                StatusCode::Internal => ErrorKind::Io,
                StatusCode::Cancelled | StatusCode::Aborted | StatusCode::Unknown => {
                    ErrorKind::Transfer
                }
            },
        }
    }

    /// Converts the error into the status that terminates the stream.
    pub fn to_status(&self) -> Status {
        let code = match self {
            TransferError::Remote(status) => return status.clone(),
            TransferError::Cancelled => StatusCode::Cancelled,
            TransferError::Sequence { .. }
            | TransferError::MalformedChunk { .. }
            | TransferError::InvalidBlockSize(_) => StatusCode::InvalidArgument,
            TransferError::Io(_) | TransferError::Persist { .. } | TransferError::Merge(_) => {
                StatusCode::Internal
            }
            TransferError::Channel(_) | TransferError::SessionClosed(_) => StatusCode::Aborted,
        };
        Status::new(code, self.to_string())
    }
}
