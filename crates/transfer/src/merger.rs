use std::ffi::OsString;
use std::io;
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};
use tokio::io::AsyncWriteExt;
use tracing::debug;
use uuid::Uuid;

use crate::TransferError;
use crate::store::ArtifactKey;

/// Result of a successful merge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeSummary {
    /// Length of the final artifact.
    pub bytes: u64,
    /// Number of artifacts merged.
    pub artifacts: usize,
    /// SHA-256 hex digest of the final artifact.
    pub sha256: String,
}

/// Concatenates `artifacts` into `output` in ascending numeric offset order.
///
/// The output is assembled in a sibling `<output>.<session_id>.part` file and
/// renamed onto `output` only once every artifact has been written, so a
/// failed merge never leaves a partial final artifact behind. Sessions
/// merging onto the same output never share a staging file.
pub async fn merge_artifacts(
    artifacts: &[ArtifactKey],
    output: &Path,
    session_id: Uuid,
) -> Result<MergeSummary, TransferError> {
    let mut ordered: Vec<&ArtifactKey> = artifacts.iter().collect();
    ordered.sort_by_key(|artifact| artifact.offset);

    if let Some(parent) = output.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(TransferError::Merge)?;
    }

    let staging = staging_path(output, session_id);
    match write_merged(&ordered, &staging).await {
        Ok(summary) => {
            tokio::fs::rename(&staging, output)
                .await
                .map_err(TransferError::Merge)?;
            debug!(
                path = %output.display(),
                bytes = summary.bytes,
                artifacts = summary.artifacts,
                "artifacts merged"
            );
            Ok(summary)
        }
        Err(e) => {
            let _ = tokio::fs::remove_file(&staging).await;
            Err(e)
        }
    }
}

async fn write_merged(
    ordered: &[&ArtifactKey],
    staging: &Path,
) -> Result<MergeSummary, TransferError> {
    let mut file = tokio::fs::File::create(staging)
        .await
        .map_err(TransferError::Merge)?;
    let mut hasher = Sha256::new();
    let mut bytes = 0u64;

    for artifact in ordered {
        let data = tokio::fs::read(&artifact.path)
            .await
            .map_err(TransferError::Merge)?;
        if data.len() as u64 != artifact.size as u64 {
            return Err(TransferError::Merge(io::Error::new(
                io::ErrorKind::InvalidData,
                format!(
                    "chunk at offset {} holds {} bytes, expected {}",
                    artifact.offset,
                    data.len(),
                    artifact.size
                ),
            )));
        }

        hasher.update(&data);
        file.write_all(&data).await.map_err(TransferError::Merge)?;
        bytes += data.len() as u64;
    }

    file.flush().await.map_err(TransferError::Merge)?;
    file.sync_all().await.map_err(TransferError::Merge)?;

    Ok(MergeSummary {
        bytes,
        artifacts: ordered.len(),
        sha256: hex::encode(hasher.finalize()),
    })
}

fn staging_path(output: &Path, session_id: Uuid) -> PathBuf {
    let mut name = OsString::from(output.as_os_str());
    name.push(format!(".{session_id}.part"));
    PathBuf::from(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checksum_bytes;

    fn write_artifact(dir: &Path, offset: i64, data: &[u8]) -> ArtifactKey {
        let path = dir.join(format!("chunk_{offset}"));
        std::fs::write(&path, data).unwrap();
        ArtifactKey {
            offset,
            size: data.len() as i32,
            path,
        }
    }

    #[tokio::test]
    async fn merges_in_numeric_offset_order() {
        let dir = tempfile::tempdir().unwrap();
        // Listed in lexical order of their names: "0" < "10485760" < "1048576".
        let artifacts = vec![
            write_artifact(dir.path(), 0, b"first-"),
            write_artifact(dir.path(), 10_485_760, b"third"),
            write_artifact(dir.path(), 1_048_576, b"second-"),
        ];

        let output = dir.path().join("out.bin");
        let summary = merge_artifacts(&artifacts, &output, Uuid::new_v4()).await.unwrap();

        assert_eq!(std::fs::read(&output).unwrap(), b"first-second-third");
        assert_eq!(summary.bytes, 18);
        assert_eq!(summary.artifacts, 3);
        assert_eq!(summary.sha256, checksum_bytes(b"first-second-third"));
    }

    #[tokio::test]
    async fn single_digit_and_multi_digit_offsets() {
        let dir = tempfile::tempdir().unwrap();
        let mut artifacts = Vec::new();
        for i in 0..12i64 {
            artifacts.push(write_artifact(dir.path(), i, &[i as u8]));
        }
        // Reverse so that input order carries no information.
        artifacts.reverse();

        let output = dir.path().join("out.bin");
        merge_artifacts(&artifacts, &output, Uuid::new_v4()).await.unwrap();
        assert_eq!(
            std::fs::read(&output).unwrap(),
            (0..12u8).collect::<Vec<_>>()
        );
    }

    #[tokio::test]
    async fn no_artifacts_produces_empty_file() {
        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("nested/empty.bin");

        let summary = merge_artifacts(&[], &output, Uuid::new_v4()).await.unwrap();
        assert_eq!(summary.bytes, 0);
        assert!(std::fs::read(&output).unwrap().is_empty());
    }

    #[tokio::test]
    async fn missing_artifact_fails_without_output() {
        let dir = tempfile::tempdir().unwrap();
        let mut artifacts = vec![write_artifact(dir.path(), 0, b"abc")];
        artifacts.push(ArtifactKey {
            offset: 3,
            size: 3,
            path: dir.path().join("chunk_3"),
        });

        let output = dir.path().join("out.bin");
        let id = Uuid::new_v4();
        let err = merge_artifacts(&artifacts, &output, id).await.unwrap_err();
        assert!(matches!(err, TransferError::Merge(_)));
        assert!(!output.exists());
        assert!(!staging_path(&output, id).exists());
    }

    #[tokio::test]
    async fn truncated_artifact_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let mut artifact = write_artifact(dir.path(), 0, b"abc");
        artifact.size = 4;

        let output = dir.path().join("out.bin");
        let err = merge_artifacts(&[artifact], &output, Uuid::new_v4()).await.unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::Io);
        assert!(!output.exists());
    }

    #[tokio::test]
    async fn merge_replaces_previous_output() {
        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("out.bin");
        std::fs::write(&output, b"stale content that is longer").unwrap();

        let artifacts = vec![write_artifact(dir.path(), 0, b"fresh")];
        merge_artifacts(&artifacts, &output, Uuid::new_v4()).await.unwrap();
        assert_eq!(std::fs::read(&output).unwrap(), b"fresh");
    }

    #[test]
    fn staging_path_is_per_session() {
        let output = Path::new("/srv/out.bin");
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        assert_ne!(staging_path(output, a), staging_path(output, b));
        assert_eq!(
            staging_path(output, a),
            PathBuf::from(format!("/srv/out.bin.{a}.part"))
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_merges_to_one_output_stay_intact() {
        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("out.bin");

        let mut sessions = Vec::new();
        for fill in [0x00u8, 0x01u8] {
            let chunks = dir.path().join(format!("session-{fill}"));
            std::fs::create_dir(&chunks).unwrap();
            let block = vec![fill; 256 * 1024];
            let artifacts: Vec<ArtifactKey> = (0..64i64)
                .map(|i| write_artifact(&chunks, i * block.len() as i64, &block))
                .collect();
            sessions.push(artifacts);
        }

        let mut tasks = Vec::new();
        for artifacts in sessions {
            let output = output.clone();
            tasks.push(tokio::spawn(async move {
                merge_artifacts(&artifacts, &output, Uuid::new_v4()).await
            }));
        }
        for task in tasks {
            let summary = task.await.unwrap().unwrap();
            assert_eq!(summary.bytes, 64 * 256 * 1024);
        }

        // Whichever session renamed last owns the output, and its bytes are
        // not mixed with the other session's.
        let merged = std::fs::read(&output).unwrap();
        assert_eq!(merged.len(), 64 * 256 * 1024);
        assert!(merged.iter().all(|&b| b == merged[0]));

        let leftovers: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .filter(|name| name.ends_with(".part"))
            .collect();
        assert!(leftovers.is_empty(), "staging files left: {leftovers:?}");
    }
}
