use std::path::Path;

use chunkstream_protocol::constants::MAX_BLOCK_SIZE;
use chunkstream_protocol::{Chunk, UploadResponse};
use tracing::{debug, info};

use crate::channel::UploadSink;
use crate::{TransferError, checksum_bytes};

/// Reads the whole source file into memory.
pub async fn read_source(path: &Path) -> Result<Vec<u8>, TransferError> {
    Ok(tokio::fs::read(path).await?)
}

/// Splits an in-memory file into fixed-size chunks.
///
/// Chunks cover `[0, len)` in ascending offset order with no gaps and no
/// overlap; every chunk is `block_size` bytes except possibly the last.
/// An empty file yields no chunks.
pub struct Chunker<'a> {
    data: &'a [u8],
    block_size: usize,
    offset: usize,
}

impl<'a> Chunker<'a> {
    /// Creates a chunker over `data`.
    ///
    /// `block_size` must be in `1..=i32::MAX`.
    pub fn new(data: &'a [u8], block_size: usize) -> Result<Self, TransferError> {
        if block_size == 0 || block_size > MAX_BLOCK_SIZE {
            return Err(TransferError::InvalidBlockSize(block_size));
        }
        Ok(Self {
            data,
            block_size,
            offset: 0,
        })
    }

    /// Total number of chunks the file splits into.
    pub fn chunk_count(&self) -> usize {
        self.data.len().div_ceil(self.block_size)
    }

    /// Current byte offset.
    pub fn offset(&self) -> usize {
        self.offset
    }
}

impl Iterator for Chunker<'_> {
    type Item = Chunk;

    fn next(&mut self) -> Option<Chunk> {
        if self.offset >= self.data.len() {
            return None;
        }

        let end = std::cmp::min(self.offset + self.block_size, self.data.len());
        let chunk = Chunk {
            data: self.data[self.offset..end].to_vec(),
            offset: self.offset as i64,
            // block_size <= i32::MAX, checked in `new`.
            size: (end - self.offset) as i32,
        };
        self.offset = end;
        Some(chunk)
    }
}

/// Uploads the file at `path` through `sink`.
///
/// Sends every chunk in order, signals end-of-stream and waits for the
/// server's terminal message. The first send error aborts the upload.
pub async fn upload_file<S: UploadSink>(
    path: &Path,
    block_size: usize,
    mut sink: S,
) -> Result<UploadResponse, TransferError> {
    let data = read_source(path).await?;
    let chunker = Chunker::new(&data, block_size)?;

    debug!(
        path = %path.display(),
        size = data.len(),
        block_size,
        chunks = chunker.chunk_count(),
        sha256 = %checksum_bytes(&data),
        "starting upload"
    );

    for chunk in chunker {
        sink.send(chunk).await?;
    }

    let response = sink.close_and_recv().await?;
    info!(
        path = %path.display(),
        success = response.success,
        message = %response.message,
        "upload finished"
    );
    Ok(response)
}
