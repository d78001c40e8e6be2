use std::fmt;
use std::path::Path;

use chunkstream_protocol::Chunk;
use uuid::Uuid;

use crate::TransferError;
use crate::merger::{MergeSummary, merge_artifacts};
use crate::store::{ArtifactKey, ArtifactStore};

/// Lifecycle of a [`TransferSession`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Waiting for the next chunk (or end-of-stream).
    AwaitingChunk,
    /// End-of-stream seen, artifacts being merged.
    Merging,
    /// Final artifact written.
    Done,
    /// Terminated by an error or cancellation.
    Aborted,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SessionState::AwaitingChunk => "awaiting chunk",
            SessionState::Merging => "merging",
            SessionState::Done => "done",
            SessionState::Aborted => "aborted",
        })
    }
}

/// Receiver-side state of one upload.
///
/// Enforces strict sequential delivery: a chunk is accepted only if its
/// offset equals the expected next offset. Nothing is buffered or reordered.
#[derive(Debug)]
pub struct TransferSession {
    id: Uuid,
    state: SessionState,
    expected_next_offset: i64,
    total_bytes: i64,
    artifacts: Vec<ArtifactKey>,
    store: ArtifactStore,
}

impl TransferSession {
    /// Opens a session with a fresh scratch namespace under `scratch_dir`.
    pub async fn open(scratch_dir: &Path) -> Result<Self, TransferError> {
        let id = Uuid::new_v4();
        let store = ArtifactStore::create(scratch_dir, id).await?;
        Ok(Self {
            id,
            state: SessionState::AwaitingChunk,
            expected_next_offset: 0,
            total_bytes: 0,
            artifacts: Vec::new(),
            store,
        })
    }

    /// Validates, persists and records one chunk.
    ///
    /// Any error moves the session to [`SessionState::Aborted`].
    pub async fn accept(&mut self, chunk: Chunk) -> Result<(), TransferError> {
        if self.state != SessionState::AwaitingChunk {
            return Err(TransferError::SessionClosed(self.state));
        }
        if let Err(e) = self.validate(&chunk) {
            self.state = SessionState::Aborted;
            return Err(e);
        }

        let key = match self.store.persist(&chunk).await {
            Ok(key) => key,
            Err(e) => {
                self.state = SessionState::Aborted;
                return Err(e);
            }
        };

        self.expected_next_offset = chunk.end();
        self.total_bytes += i64::from(chunk.size);
        self.artifacts.push(key);
        Ok(())
    }

    fn validate(&self, chunk: &Chunk) -> Result<(), TransferError> {
        if chunk.offset < 0 {
            return Err(TransferError::MalformedChunk {
                offset: chunk.offset,
                reason: "negative offset".into(),
            });
        }
        if chunk.offset != self.expected_next_offset {
            return Err(TransferError::Sequence {
                expected: self.expected_next_offset,
                actual: chunk.offset,
            });
        }
        if !chunk.is_consistent() {
            return Err(TransferError::MalformedChunk {
                offset: chunk.offset,
                reason: format!(
                    "declared size {} but carries {} bytes",
                    chunk.size,
                    chunk.data.len()
                ),
            });
        }
        Ok(())
    }

    /// Merges every accepted artifact into `output`.
    ///
    /// Called once end-of-stream has been seen.
    pub async fn finish(&mut self, output: &Path) -> Result<MergeSummary, TransferError> {
        if self.state != SessionState::AwaitingChunk {
            return Err(TransferError::SessionClosed(self.state));
        }
        self.state = SessionState::Merging;

        match merge_artifacts(&self.artifacts, output, self.id).await {
            Ok(summary) => {
                self.state = SessionState::Done;
                Ok(summary)
            }
            Err(e) => {
                self.state = SessionState::Aborted;
                Err(e)
            }
        }
    }

    /// Marks the session as aborted.
    pub fn abort(&mut self) {
        if self.state != SessionState::Done {
            self.state = SessionState::Aborted;
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Offset the next chunk must declare.
    pub fn expected_next_offset(&self) -> i64 {
        self.expected_next_offset
    }

    /// Sum of accepted chunk sizes.
    pub fn total_bytes(&self) -> i64 {
        self.total_bytes
    }

    /// Artifacts in acceptance order.
    pub fn artifacts(&self) -> &[ArtifactKey] {
        &self.artifacts
    }

    pub fn store(&self) -> &ArtifactStore {
        &self.store
    }
}
