//! TCP wire format for uploads.
//!
//! # Wire format
//!
//! ```text
//! PREAMBLE (client -> server):  [4 bytes: "CHNK"] [1 byte: version]
//!
//! CHUNK (client -> server):
//!   [1 byte: 0x01]
//!   [8 bytes BE: offset]
//!   [4 bytes BE: declared size]
//!   [4 bytes BE: data_len]
//!   [data_len bytes: chunk data]
//!
//! END (client -> server):       [1 byte: 0x02]
//!
//! RESPONSE (server -> client):
//!   [1 byte: 0x03] [1 byte: success] [2 bytes BE: msg_len] [msg_len bytes: UTF-8]
//!
//! STATUS (server -> client):
//!   [1 byte: 0x04] [1 byte: code] [2 bytes BE: msg_len] [msg_len bytes: UTF-8]
//! ```
//!
//! The declared size travels separately from `data_len` so the receiver can
//! reject chunks whose size field disagrees with their payload.

use chunkstream_protocol::{Chunk, Status, StatusCode, UploadResponse};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::DataChannelError;

/// Magic bytes opening every connection.
pub const PREAMBLE_MAGIC: [u8; 4] = *b"CHNK";

/// Protocol version sent in the preamble.
pub const PROTOCOL_VERSION: u8 = 1;

pub const FRAME_CHUNK: u8 = 0x01;
pub const FRAME_END: u8 = 0x02;
pub const FRAME_RESPONSE: u8 = 0x03;
pub const FRAME_STATUS: u8 = 0x04;

/// Upper bound on the payload of a single chunk frame (64 MiB).
pub const MAX_CHUNK_DATA: usize = 64 * 1024 * 1024;

/// One message on the upload stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Chunk(Chunk),
    End,
    Response(UploadResponse),
    Status(Status),
}

impl Frame {
    /// Frame name, for diagnostics.
    pub fn name(&self) -> &'static str {
        match self {
            Frame::Chunk(_) => "chunk",
            Frame::End => "end",
            Frame::Response(_) => "response",
            Frame::Status(_) => "status",
        }
    }
}

/// Writes the connection preamble.
pub async fn write_preamble<W: AsyncWrite + Unpin>(writer: &mut W) -> Result<(), DataChannelError> {
    writer.write_all(&PREAMBLE_MAGIC).await?;
    writer.write_u8(PROTOCOL_VERSION).await?;
    Ok(())
}

/// Reads and validates the connection preamble.
pub async fn read_preamble<R: AsyncRead + Unpin>(reader: &mut R) -> Result<(), DataChannelError> {
    let mut magic = [0u8; 4];
    reader.read_exact(&mut magic).await?;
    if magic != PREAMBLE_MAGIC {
        return Err(DataChannelError::Protocol(format!(
            "bad preamble magic: {magic:02x?}"
        )));
    }

    let version = reader.read_u8().await?;
    if version != PROTOCOL_VERSION {
        return Err(DataChannelError::Protocol(format!(
            "unsupported protocol version {version} (expected {PROTOCOL_VERSION})"
        )));
    }
    Ok(())
}

/// Writes one frame to the stream.
pub async fn write_frame<W: AsyncWrite + Unpin>(
    writer: &mut W,
    frame: &Frame,
) -> Result<(), DataChannelError> {
    match frame {
        Frame::Chunk(chunk) => {
            let data_len = chunk.data.len();
            if data_len > MAX_CHUNK_DATA {
                return Err(DataChannelError::Protocol(format!(
                    "chunk too large: {data_len} bytes (max {MAX_CHUNK_DATA})"
                )));
            }
            writer.write_u8(FRAME_CHUNK).await?;
            writer.write_i64(chunk.offset).await?;
            writer.write_i32(chunk.size).await?;
            writer.write_u32(data_len as u32).await?;
            writer.write_all(&chunk.data).await?;
        }
        Frame::End => {
            writer.write_u8(FRAME_END).await?;
        }
        Frame::Response(response) => {
            writer.write_u8(FRAME_RESPONSE).await?;
            writer.write_u8(u8::from(response.success)).await?;
            write_message(writer, &response.message).await?;
        }
        Frame::Status(status) => {
            writer.write_u8(FRAME_STATUS).await?;
            writer.write_u8(status.code.as_u8()).await?;
            write_message(writer, &status.message).await?;
        }
    }
    Ok(())
}

/// Reads one frame from the stream.
///
/// Returns `None` if the peer closed the connection cleanly between frames.
pub async fn read_frame<R: AsyncRead + Unpin>(
    reader: &mut R,
) -> Result<Option<Frame>, DataChannelError> {
    let mut tag = [0u8; 1];
    if reader.read(&mut tag).await? == 0 {
        return Ok(None);
    }

    let frame = match tag[0] {
        FRAME_CHUNK => {
            let offset = reader.read_i64().await?;
            let size = reader.read_i32().await?;
            let data_len = reader.read_u32().await? as usize;
            if data_len > MAX_CHUNK_DATA {
                return Err(DataChannelError::Protocol(format!(
                    "chunk too large: {data_len} bytes (max {MAX_CHUNK_DATA})"
                )));
            }
            let mut data = vec![0u8; data_len];
            reader.read_exact(&mut data).await?;
            Frame::Chunk(Chunk { data, offset, size })
        }
        FRAME_END => Frame::End,
        FRAME_RESPONSE => {
            let success = reader.read_u8().await? != 0;
            let message = read_message(reader).await?;
            Frame::Response(UploadResponse { success, message })
        }
        FRAME_STATUS => {
            let raw = reader.read_u8().await?;
            let message = read_message(reader).await?;
            // Unknown codes from a newer peer still carry a usable message.
            let code = StatusCode::try_from(raw).unwrap_or(StatusCode::Unknown);
            Frame::Status(Status { code, message })
        }
        other => {
            return Err(DataChannelError::Protocol(format!(
                "unknown frame tag 0x{other:02x}"
            )));
        }
    };
    Ok(Some(frame))
}

async fn write_message<W: AsyncWrite + Unpin>(
    writer: &mut W,
    message: &str,
) -> Result<(), DataChannelError> {
    let bytes = truncate_utf8(message, u16::MAX as usize).as_bytes();
    writer.write_u16(bytes.len() as u16).await?;
    writer.write_all(bytes).await?;
    Ok(())
}

async fn read_message<R: AsyncRead + Unpin>(reader: &mut R) -> Result<String, DataChannelError> {
    let len = reader.read_u16().await?;
    let mut buf = vec![0u8; len as usize];
    reader.read_exact(&mut buf).await?;
    String::from_utf8(buf)
        .map_err(|e| DataChannelError::Protocol(format!("invalid UTF-8 message: {e}")))
}

/// Longest prefix of `s` that fits in `max` bytes without splitting a
/// character.
fn truncate_utf8(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}
