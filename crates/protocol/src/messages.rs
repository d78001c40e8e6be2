use serde::{Deserialize, Serialize};

/// A contiguous byte range of the source file.
///
/// `size` is carried separately from `data` so that the receiver can reject
/// chunks whose declared size disagrees with their payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    /// Raw chunk bytes.
    pub data: Vec<u8>,
    /// Byte offset of `data[0]` within the source file.
    pub offset: i64,
    /// Declared length of `data`.
    pub size: i32,
}

impl Chunk {
    /// Offset one past the last byte of this chunk.
    pub fn end(&self) -> i64 {
        self.offset + i64::from(self.size)
    }

    /// Returns `true` if the declared size matches the payload length.
    pub fn is_consistent(&self) -> bool {
        self.size >= 0 && self.size as usize == self.data.len()
    }
}

/// Terminal acknowledgement for a successful upload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadResponse {
    pub success: bool,
    pub message: String,
}

impl UploadResponse {
    /// Builds the acknowledgement sent after a successful merge.
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
        }
    }
}
