//! TCP upload client.
//!
//! Connects to the server, sends the preamble, and streams chunks.

use std::net::SocketAddr;
use std::path::Path;

use chunkstream_protocol::{Chunk, Status, UploadResponse};
use chunkstream_transfer::{TransferError, UploadSink};
use tokio::io::{AsyncWriteExt, BufReader, BufWriter};
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::error::DataChannelError;
use crate::wire::{Frame, MAX_CHUNK_DATA, read_frame, write_frame, write_preamble};
use crate::{STATUS_READ_TIMEOUT, TCP_BUFFER_SIZE, TCP_CONNECT_TIMEOUT};

/// Client half of an upload stream over TCP.
pub struct TcpUploadSink {
    reader: BufReader<OwnedReadHalf>,
    writer: BufWriter<OwnedWriteHalf>,
}

impl TcpUploadSink {
    /// Connects to `addr` and opens an upload stream.
    pub async fn connect(
        addr: SocketAddr,
        cancel: &CancellationToken,
    ) -> Result<Self, DataChannelError> {
        // Connect with timeout + cancellation.
        let stream = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                return Err(DataChannelError::Cancelled);
            }
            result = tokio::time::timeout(TCP_CONNECT_TIMEOUT, TcpStream::connect(addr)) => {
                match result {
                    Ok(Ok(s)) => {
                        info!(%addr, "connected to upload server");
                        s
                    }
                    Ok(Err(e)) => return Err(e.into()),
                    Err(_) => return Err(DataChannelError::Timeout),
                }
            }
        };
        stream.set_nodelay(true)?;

        let (reader, writer) = stream.into_split();
        let mut writer = BufWriter::with_capacity(TCP_BUFFER_SIZE, writer);
        write_preamble(&mut writer).await?;
        writer.flush().await?;

        Ok(Self {
            reader: BufReader::new(reader),
            writer,
        })
    }

    /// Reads a status frame the server may have sent before closing.
    ///
    /// Used after a write failed, to report the server's reason instead of
    /// a bare broken pipe.
    async fn pending_status(&mut self) -> Option<Status> {
        match tokio::time::timeout(STATUS_READ_TIMEOUT, read_frame(&mut self.reader)).await {
            Ok(Ok(Some(Frame::Status(status)))) => Some(status),
            _ => None,
        }
    }

    async fn finish_sending(&mut self) -> Result<(), DataChannelError> {
        write_frame(&mut self.writer, &Frame::End).await?;
        self.writer.flush().await?;
        self.writer.shutdown().await?;
        Ok(())
    }

    async fn write_failed(&mut self, err: DataChannelError) -> TransferError {
        match self.pending_status().await {
            Some(status) => TransferError::Remote(status),
            None => err.into(),
        }
    }
}

impl UploadSink for TcpUploadSink {
    async fn send(&mut self, chunk: Chunk) -> Result<(), TransferError> {
        let offset = chunk.offset;
        if let Err(e) = write_frame(&mut self.writer, &Frame::Chunk(chunk)).await {
            return Err(self.write_failed(e).await);
        }
        debug!(offset, "chunk sent");
        Ok(())
    }

    async fn close_and_recv(mut self) -> Result<UploadResponse, TransferError> {
        if let Err(e) = self.finish_sending().await {
            return Err(self.write_failed(e).await);
        }

        match read_frame(&mut self.reader).await? {
            Some(Frame::Response(response)) => Ok(response),
            Some(Frame::Status(status)) => Err(TransferError::Remote(status)),
            Some(other) => Err(TransferError::Channel(format!(
                "unexpected {} frame from server",
                other.name()
            ))),
            None => Err(TransferError::Channel(
                "connection closed before a response arrived".into(),
            )),
        }
    }
}

/// Convenience entry point for uploading a file over TCP.
pub struct TcpUploadClient;

impl TcpUploadClient {
    /// Uploads the file at `path` to the server at `addr`.
    ///
    /// `block_size` must be in `1..=MAX_CHUNK_DATA`, the largest chunk a
    /// frame can carry; anything else fails before connecting.
    ///
    /// Cancelling `cancel` drops the connection mid-transfer, which the
    /// server treats as a fatal error for the session.
    pub async fn upload_file(
        addr: SocketAddr,
        path: &Path,
        block_size: usize,
        cancel: &CancellationToken,
    ) -> Result<UploadResponse, TransferError> {
        if block_size == 0 || block_size > MAX_CHUNK_DATA {
            return Err(TransferError::InvalidBlockSize(block_size));
        }
        let sink = TcpUploadSink::connect(addr, cancel).await?;
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(TransferError::Cancelled),
            result = chunkstream_transfer::upload_file(path, block_size, sink) => result,
        }
    }
}
