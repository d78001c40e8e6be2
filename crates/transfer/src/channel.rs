//! The ordered, reliable, bidirectional channel an upload runs over.
//!
//! The transfer core never touches a socket. The client drives an
//! [`UploadSink`] and the server drives an [`UploadStream`]; transports
//! implement both halves. [`in_memory`] provides an in-process pair.

use std::future::Future;

use chunkstream_protocol::{Chunk, Status, UploadResponse};
use tokio::sync::{mpsc, oneshot};

use crate::TransferError;

/// Client half of an upload stream.
pub trait UploadSink: Send {
    /// Sends one chunk. Chunks are delivered in the order they are sent.
    fn send(&mut self, chunk: Chunk) -> impl Future<Output = Result<(), TransferError>> + Send;

    /// Signals end-of-stream and waits for the single terminal message.
    ///
    /// A failure status from the server is returned as
    /// [`TransferError::Remote`].
    fn close_and_recv(self) -> impl Future<Output = Result<UploadResponse, TransferError>> + Send;
}

/// Server half of an upload stream.
pub trait UploadStream: Send {
    /// Receives the next chunk, or `None` once the client signalled
    /// end-of-stream.
    ///
    /// The peer going away without signalling end-of-stream is an error.
    fn recv(&mut self) -> impl Future<Output = Result<Option<Chunk>, TransferError>> + Send;

    /// Sends the success acknowledgement and closes the stream.
    fn send_and_close(
        self,
        response: UploadResponse,
    ) -> impl Future<Output = Result<(), TransferError>> + Send;

    /// Terminates the stream with an explicit failure status.
    fn abort(self, status: Status) -> impl Future<Output = Result<(), TransferError>> + Send;
}

enum Frame {
    Chunk(Chunk),
    End,
}

type Reply = Result<UploadResponse, Status>;

/// Creates a connected in-process sink/stream pair.
///
/// `capacity` bounds the number of chunks in flight.
pub fn in_memory(capacity: usize) -> (MemorySink, MemoryStream) {
    let (frames_tx, frames_rx) = mpsc::channel(capacity.max(1));
    let (reply_tx, reply_rx) = oneshot::channel();
    (
        MemorySink {
            frames: frames_tx,
            reply: reply_rx,
        },
        MemoryStream {
            frames: frames_rx,
            reply: reply_tx,
        },
    )
}

/// Client half of [`in_memory`].
pub struct MemorySink {
    frames: mpsc::Sender<Frame>,
    reply: oneshot::Receiver<Reply>,
}

impl MemorySink {
    fn closed_error(&mut self) -> TransferError {
        match self.reply.try_recv() {
            Ok(Err(status)) => TransferError::Remote(status),
            _ => TransferError::Channel("receiver closed the stream".into()),
        }
    }
}

impl UploadSink for MemorySink {
    async fn send(&mut self, chunk: Chunk) -> Result<(), TransferError> {
        if self.frames.send(Frame::Chunk(chunk)).await.is_err() {
            return Err(self.closed_error());
        }
        Ok(())
    }

    async fn close_and_recv(self) -> Result<UploadResponse, TransferError> {
        let MemorySink { frames, reply } = self;
        // A receiver that already hung up has left its reply behind.
        let _ = frames.send(Frame::End).await;
        drop(frames);

        match reply.await {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(status)) => Err(TransferError::Remote(status)),
            Err(_) => Err(TransferError::Channel(
                "stream closed before a response arrived".into(),
            )),
        }
    }
}

/// Server half of [`in_memory`].
pub struct MemoryStream {
    frames: mpsc::Receiver<Frame>,
    reply: oneshot::Sender<Reply>,
}

impl UploadStream for MemoryStream {
    async fn recv(&mut self) -> Result<Option<Chunk>, TransferError> {
        match self.frames.recv().await {
            Some(Frame::Chunk(chunk)) => Ok(Some(chunk)),
            Some(Frame::End) => Ok(None),
            None => Err(TransferError::Channel(
                "stream closed before end-of-stream".into(),
            )),
        }
    }

    async fn send_and_close(self, response: UploadResponse) -> Result<(), TransferError> {
        self.reply
            .send(Ok(response))
            .map_err(|_| TransferError::Channel("client went away before the response".into()))
    }

    async fn abort(self, status: Status) -> Result<(), TransferError> {
        self.reply
            .send(Err(status))
            .map_err(|_| TransferError::Channel("client went away before the status".into()))
    }
}

#[cfg(test)]
mod tests {
    use chunkstream_protocol::StatusCode;

    use super::*;

    fn chunk(offset: i64, data: &[u8]) -> Chunk {
        Chunk {
            data: data.to_vec(),
            offset,
            size: data.len() as i32,
        }
    }

    #[tokio::test]
    async fn chunks_then_end_of_stream() {
        let (mut sink, mut stream) = in_memory(4);

        sink.send(chunk(0, b"abc")).await.unwrap();
        sink.send(chunk(3, b"de")).await.unwrap();

        let client = tokio::spawn(async move { sink.close_and_recv().await });

        assert_eq!(stream.recv().await.unwrap(), Some(chunk(0, b"abc")));
        assert_eq!(stream.recv().await.unwrap(), Some(chunk(3, b"de")));
        assert_eq!(stream.recv().await.unwrap(), None);

        stream
            .send_and_close(UploadResponse::ok("done"))
            .await
            .unwrap();

        let response = client.await.unwrap().unwrap();
        assert!(response.success);
        assert_eq!(response.message, "done");
    }

    #[tokio::test]
    async fn dropped_sink_is_not_end_of_stream() {
        let (mut sink, mut stream) = in_memory(4);
        sink.send(chunk(0, b"abc")).await.unwrap();
        drop(sink);

        assert!(stream.recv().await.unwrap().is_some());
        let err = stream.recv().await.unwrap_err();
        assert!(matches!(err, TransferError::Channel(_)));
    }

    #[tokio::test]
    async fn abort_surfaces_remote_status() {
        let (sink, stream) = in_memory(4);
        stream
            .abort(Status::new(StatusCode::Internal, "disk full"))
            .await
            .unwrap();

        let err = sink.close_and_recv().await.unwrap_err();
        match err {
            TransferError::Remote(status) => {
                assert_eq!(status.code, StatusCode::Internal);
                assert_eq!(status.message, "disk full");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn send_after_abort_reports_status() {
        let (mut sink, stream) = in_memory(1);
        stream
            .abort(Status::new(StatusCode::InvalidArgument, "bad offset"))
            .await
            .unwrap();

        let err = sink.send(chunk(0, b"x")).await.unwrap_err();
        assert!(matches!(err, TransferError::Remote(ref s) if s.message == "bad offset"));
    }
}
