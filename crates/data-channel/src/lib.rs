//! TCP transport for chunkstream uploads.
//!
//! Carries the `UploadFile` stream over a plain TCP connection: the client
//! side implements [`UploadSink`](chunkstream_transfer::UploadSink), the
//! server side implements [`UploadStream`](chunkstream_transfer::UploadStream)
//! and runs one session per accepted connection.
//!
//! # Wire format
//!
//! See the [`wire`] module for the frame layout.

pub mod client;
pub mod error;
pub mod server;
pub mod wire;

pub use client::{TcpUploadClient, TcpUploadSink};
pub use error::DataChannelError;
pub use server::{TcpUploadStream, UploadServer};
pub use wire::Frame;

use std::time::Duration;

/// TCP read/write buffer size (256 KB).
pub const TCP_BUFFER_SIZE: usize = 256 * 1024;

/// Timeout for the TCP connection attempt.
pub const TCP_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Timeout for the client preamble after a connection is accepted.
pub const TCP_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(5);

/// How long an aborting server keeps draining client data so that its
/// status frame is not lost to a connection reset.
pub const ABORT_DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

/// How long a client whose write failed waits for a pending status frame.
pub const STATUS_READ_TIMEOUT: Duration = Duration::from_secs(2);
