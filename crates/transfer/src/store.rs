use std::path::{Path, PathBuf};

use chunkstream_protocol::Chunk;
use tracing::debug;
use uuid::Uuid;

use crate::TransferError;

/// Location and extent of one persisted chunk.
///
/// Merge order comes from `offset`, never from the file name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactKey {
    pub offset: i64,
    pub size: i32,
    pub path: PathBuf,
}

/// Per-session scratch namespace holding intermediate artifacts.
///
/// Each session gets its own `session-<uuid>` directory under the scratch
/// root, so concurrent uploads never share artifact paths.
#[derive(Debug)]
pub struct ArtifactStore {
    root: PathBuf,
}

impl ArtifactStore {
    /// Creates the scratch namespace for `session_id` under `scratch_dir`.
    pub async fn create(scratch_dir: &Path, session_id: Uuid) -> Result<Self, TransferError> {
        let root = scratch_dir.join(format!("session-{session_id}"));
        tokio::fs::create_dir_all(&root).await?;
        debug!(path = %root.display(), "scratch namespace created");
        Ok(Self { root })
    }

    /// Directory holding this session's artifacts.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Writes the chunk's bytes as an artifact addressed by its offset.
    pub async fn persist(&self, chunk: &Chunk) -> Result<ArtifactKey, TransferError> {
        let path = self.root.join(format!("chunk_{}", chunk.offset));
        tokio::fs::write(&path, &chunk.data)
            .await
            .map_err(|source| TransferError::Persist {
                offset: chunk.offset,
                source,
            })?;
        Ok(ArtifactKey {
            offset: chunk.offset,
            size: chunk.size,
            path,
        })
    }

    /// Removes the namespace and every artifact in it.
    pub async fn purge(&self) -> Result<(), TransferError> {
        match tokio::fs::remove_dir_all(&self.root).await {
            Ok(()) => {
                debug!(path = %self.root.display(), "scratch namespace removed");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
