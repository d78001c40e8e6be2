//! TCP upload server.
//!
//! Accepts connections until cancelled and runs one independent upload
//! session per connection on its own task.

use std::net::SocketAddr;
use std::sync::Arc;

use chunkstream_protocol::{Chunk, Status, UploadResponse};
use chunkstream_transfer::{Receiver, ReceiverConfig, TransferError, UploadStream};
use tokio::io::{AsyncReadExt, AsyncWriteExt, BufReader, BufWriter};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream, ToSocketAddrs};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::DataChannelError;
use crate::wire::{Frame, read_frame, read_preamble, write_frame};
use crate::{ABORT_DRAIN_TIMEOUT, TCP_BUFFER_SIZE, TCP_HANDSHAKE_TIMEOUT};

/// Server half of an upload stream over TCP.
pub struct TcpUploadStream {
    reader: BufReader<OwnedReadHalf>,
    writer: BufWriter<OwnedWriteHalf>,
}

impl TcpUploadStream {
    /// Wraps an accepted connection and validates the client preamble.
    pub async fn accept(stream: TcpStream) -> Result<Self, DataChannelError> {
        stream.set_nodelay(true)?;
        let (reader, writer) = stream.into_split();
        let mut reader = BufReader::with_capacity(TCP_BUFFER_SIZE, reader);

        match tokio::time::timeout(TCP_HANDSHAKE_TIMEOUT, read_preamble(&mut reader)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => return Err(e),
            Err(_) => return Err(DataChannelError::Timeout),
        }

        Ok(Self {
            reader,
            writer: BufWriter::new(writer),
        })
    }

    async fn close_with(&mut self, frame: Frame) -> Result<(), DataChannelError> {
        write_frame(&mut self.writer, &frame).await?;
        self.writer.flush().await?;
        self.writer.shutdown().await?;
        Ok(())
    }

    /// Discards client data until EOF so that closing the socket does not
    /// reset the connection before the client has read our status frame.
    async fn drain(reader: &mut BufReader<OwnedReadHalf>) {
        let mut buf = vec![0u8; TCP_BUFFER_SIZE];
        let _ = tokio::time::timeout(ABORT_DRAIN_TIMEOUT, async {
            while let Ok(n) = reader.read(&mut buf).await {
                if n == 0 {
                    break;
                }
            }
        })
        .await;
    }
}

impl UploadStream for TcpUploadStream {
    async fn recv(&mut self) -> Result<Option<Chunk>, TransferError> {
        match read_frame(&mut self.reader).await? {
            Some(Frame::Chunk(chunk)) => Ok(Some(chunk)),
            Some(Frame::End) => Ok(None),
            Some(other) => Err(TransferError::Channel(format!(
                "unexpected {} frame from client",
                other.name()
            ))),
            None => Err(TransferError::Channel(
                "connection closed before end-of-stream".into(),
            )),
        }
    }

    async fn send_and_close(mut self, response: UploadResponse) -> Result<(), TransferError> {
        self.close_with(Frame::Response(response)).await?;
        Ok(())
    }

    async fn abort(mut self, status: Status) -> Result<(), TransferError> {
        let sent = self.close_with(Frame::Status(status)).await;
        Self::drain(&mut self.reader).await;
        sent?;
        Ok(())
    }
}

/// Upload server: one [`Receiver`] session per accepted connection.
pub struct UploadServer {
    receiver: Arc<Receiver>,
    cancel: CancellationToken,
}

impl UploadServer {
    pub fn new(config: ReceiverConfig, cancel: CancellationToken) -> Self {
        Self {
            receiver: Arc::new(Receiver::new(config)),
            cancel,
        }
    }

    /// Binds the listening socket.
    pub async fn bind<A: ToSocketAddrs>(addr: A) -> Result<TcpListener, DataChannelError> {
        let listener = TcpListener::bind(addr).await?;
        info!(addr = %listener.local_addr()?, "upload server listening");
        Ok(listener)
    }

    /// Accepts connections until the cancellation token fires, then waits
    /// for in-flight sessions to finish.
    pub async fn serve(&self, listener: TcpListener) -> Result<(), DataChannelError> {
        let mut sessions = JoinSet::new();

        loop {
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => {
                    info!("upload server shutting down");
                    break;
                }
                Some(joined) = sessions.join_next(), if !sessions.is_empty() => {
                    if let Err(e) = joined {
                        warn!(error = %e, "upload session task failed");
                    }
                }
                accepted = listener.accept() => match accepted {
                    Ok((stream, addr)) => {
                        let receiver = Arc::clone(&self.receiver);
                        let cancel = self.cancel.child_token();
                        sessions.spawn(handle_connection(receiver, stream, addr, cancel));
                    }
                    Err(e) => warn!(error = %e, "failed to accept connection"),
                },
            }
        }

        drop(listener);
        while let Some(joined) = sessions.join_next().await {
            if let Err(e) = joined {
                warn!(error = %e, "upload session task failed");
            }
        }
        Ok(())
    }
}

async fn handle_connection(
    receiver: Arc<Receiver>,
    stream: TcpStream,
    addr: SocketAddr,
    cancel: CancellationToken,
) {
    info!(%addr, "connection accepted");
    let stream = match TcpUploadStream::accept(stream).await {
        Ok(stream) => stream,
        Err(e) => {
            warn!(%addr, error = %e, "rejected connection");
            return;
        }
    };

    match receiver.handle(stream, &cancel).await {
        Ok(summary) => info!(
            %addr,
            session = %summary.session_id,
            chunks = summary.chunks,
            total_bytes = summary.total_bytes,
            "upload complete"
        ),
        Err(e) => debug!(%addr, error = %e, "upload ended with error"),
    }
}

#[cfg(test)]
mod tests {
    use chunkstream_protocol::StatusCode;
    use chunkstream_transfer::CleanupPolicy;

    use super::*;
    use crate::wire::write_preamble;

    fn config(root: &std::path::Path) -> ReceiverConfig {
        ReceiverConfig {
            scratch_dir: root.join("scratch"),
            output_path: root.join("uploaded.bin"),
            cleanup: CleanupPolicy::default(),
        }
    }

    #[tokio::test]
    async fn server_rejects_bad_preamble() {
        let dir = tempfile::tempdir().unwrap();
        let cancel = CancellationToken::new();
        let server = UploadServer::new(config(dir.path()), cancel.clone());
        let listener = UploadServer::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let handle = tokio::spawn(async move { server.serve(listener).await });

        let mut stream = TcpStream::connect(addr).await.unwrap();
        stream.write_all(b"GET / HTTP/1.1\r\n").await.unwrap();

        // The server drops the connection without answering.
        let mut buf = Vec::new();
        let n = stream.read_to_end(&mut buf).await.unwrap_or(0);
        assert_eq!(n, 0);

        // No session was opened for the rejected connection.
        assert!(!dir.path().join("scratch").exists());

        cancel.cancel();
        handle.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn server_cancellation() {
        let dir = tempfile::tempdir().unwrap();
        let cancel = CancellationToken::new();
        let server = UploadServer::new(config(dir.path()), cancel.clone());
        let listener = UploadServer::bind("127.0.0.1:0").await.unwrap();

        // Cancel before anyone connects.
        cancel.cancel();

        server.serve(listener).await.unwrap();
    }

    #[tokio::test]
    async fn unexpected_frame_aborts_session() {
        let dir = tempfile::tempdir().unwrap();
        let cancel = CancellationToken::new();
        let server = UploadServer::new(config(dir.path()), cancel.clone());
        let listener = UploadServer::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let handle = tokio::spawn(async move { server.serve(listener).await });

        let stream = TcpStream::connect(addr).await.unwrap();
        let (reader, mut writer) = stream.into_split();
        write_preamble(&mut writer).await.unwrap();
        // Clients never send responses.
        write_frame(&mut writer, &Frame::Response(UploadResponse::ok("bogus")))
            .await
            .unwrap();
        writer.shutdown().await.unwrap();

        let mut reader = BufReader::new(reader);
        match read_frame(&mut reader).await.unwrap() {
            Some(Frame::Status(status)) => {
                assert_eq!(status.code, StatusCode::Aborted);
                assert!(status.message.contains("unexpected response frame"));
            }
            other => panic!("unexpected reply: {other:?}"),
        }
        assert!(!dir.path().join("uploaded.bin").exists());

        cancel.cancel();
        handle.await.unwrap().unwrap();
    }
}
