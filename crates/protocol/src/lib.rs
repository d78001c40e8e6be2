//! Message types for the chunkstream upload protocol.
//!
//! The protocol has one operation, `UploadFile`: the client streams
//! [`Chunk`]s in ascending offset order and the server answers with exactly
//! one terminal message, either an [`UploadResponse`] or a [`Status`].

pub mod constants;
pub mod messages;
pub mod status;

pub use constants::{DEFAULT_BLOCK_SIZE, DEFAULT_LISTEN_ADDR, DEFAULT_SERVER_ADDR};
pub use messages::{Chunk, UploadResponse};
pub use status::{ProtocolError, Status, StatusCode};
