/// Default chunk size on the sending side (1 MiB).
pub const DEFAULT_BLOCK_SIZE: usize = 1024 * 1024;

/// Largest block size a chunk can declare (its `size` field is an `i32`).
pub const MAX_BLOCK_SIZE: usize = i32::MAX as usize;

/// Default address the server listens on.
pub const DEFAULT_LISTEN_ADDR: &str = "0.0.0.0:50051";

/// Default address the client connects to.
pub const DEFAULT_SERVER_ADDR: &str = "127.0.0.1:50051";

/// Message sent with a successful [`UploadResponse`](crate::UploadResponse).
pub const UPLOAD_SUCCESS_MESSAGE: &str = "File uploaded successfully";
