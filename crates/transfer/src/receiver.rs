use std::path::PathBuf;

use chunkstream_protocol::UploadResponse;
use chunkstream_protocol::constants::UPLOAD_SUCCESS_MESSAGE;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::TransferError;
use crate::channel::UploadStream;
use crate::session::TransferSession;

/// What happens to a session's scratch namespace when it ends.
///
/// Both default to keeping the artifacts in place.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CleanupPolicy {
    /// Remove the artifacts once the final artifact has been written.
    pub after_merge: bool,
    /// Remove the artifacts of an aborted session.
    pub on_abort: bool,
}

/// Receiver configuration.
#[derive(Debug, Clone)]
pub struct ReceiverConfig {
    /// Root under which every session creates its own namespace.
    pub scratch_dir: PathBuf,
    /// Destination of the final artifact.
    pub output_path: PathBuf,
    pub cleanup: CleanupPolicy,
}

/// Outcome of a successful upload.
#[derive(Debug, Clone)]
pub struct ReceiveSummary {
    pub session_id: Uuid,
    pub chunks: usize,
    pub total_bytes: i64,
    pub output_path: PathBuf,
    /// SHA-256 hex digest of the final artifact.
    pub sha256: String,
}

/// Server side of `UploadFile`.
///
/// Each call to [`handle`](Self::handle) runs one independent session; a
/// single `Receiver` can serve any number of concurrent streams.
pub struct Receiver {
    config: ReceiverConfig,
}

impl Receiver {
    pub fn new(config: ReceiverConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ReceiverConfig {
        &self.config
    }

    /// Runs one upload session over `stream`.
    ///
    /// On success the client receives exactly one [`UploadResponse`]. On any
    /// failure the stream is terminated with the error's status instead and
    /// no response is sent.
    pub async fn handle<S: UploadStream>(
        &self,
        mut stream: S,
        cancel: &CancellationToken,
    ) -> Result<ReceiveSummary, TransferError> {
        let mut session = match TransferSession::open(&self.config.scratch_dir).await {
            Ok(session) => session,
            Err(e) => {
                warn!(error = %e, "could not open upload session");
                reject(stream, &e).await;
                return Err(e);
            }
        };
        let session_id = session.id();
        debug!(session = %session_id, "upload session opened");

        match self.drive(&mut stream, &mut session, cancel).await {
            Ok(summary) => {
                let delivered = stream
                    .send_and_close(UploadResponse::ok(UPLOAD_SUCCESS_MESSAGE))
                    .await;
                if let Err(e) = &delivered {
                    warn!(session = %session_id, error = %e, "failed to deliver upload response");
                }
                // The final artifact is complete either way.
                if self.config.cleanup.after_merge {
                    if let Err(e) = session.store().purge().await {
                        warn!(session = %session_id, error = %e, "failed to remove chunk artifacts");
                    }
                }
                delivered?;
                Ok(summary)
            }
            Err(e) => {
                session.abort();
                warn!(
                    session = %session_id,
                    kind = ?e.kind(),
                    error = %e,
                    "upload aborted"
                );
                reject(stream, &e).await;
                if self.config.cleanup.on_abort {
                    if let Err(e) = session.store().purge().await {
                        warn!(session = %session_id, error = %e, "failed to remove chunk artifacts");
                    }
                }
                Err(e)
            }
        }
    }

    async fn drive<S: UploadStream>(
        &self,
        stream: &mut S,
        session: &mut TransferSession,
        cancel: &CancellationToken,
    ) -> Result<ReceiveSummary, TransferError> {
        loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(TransferError::Cancelled),
                next = stream.recv() => next?,
            };

            let Some(chunk) = next else {
                break;
            };
            let (offset, size) = (chunk.offset, chunk.size);
            session.accept(chunk).await?;
            debug!(session = %session.id(), offset, size, "chunk accepted");
        }

        debug!(
            session = %session.id(),
            chunks = session.artifacts().len(),
            "end of stream, merging chunks"
        );
        let merged = session.finish(&self.config.output_path).await?;

        info!(
            session = %session.id(),
            total_bytes = session.total_bytes(),
            path = %self.config.output_path.display(),
            sha256 = %merged.sha256,
            "file received"
        );

        Ok(ReceiveSummary {
            session_id: session.id(),
            chunks: merged.artifacts,
            total_bytes: session.total_bytes(),
            output_path: self.config.output_path.clone(),
            sha256: merged.sha256,
        })
    }
}

async fn reject<S: UploadStream>(stream: S, err: &TransferError) {
    if let Err(e) = stream.abort(err.to_status()).await {
        debug!(error = %e, "could not deliver failure status");
    }
}
