//! TCP transport for streamfile calls.
//!
//! One call per connection. [`RpcServer`] accepts connections and drives a
//! [`FileTransferService`](streamfile_transfer::FileTransferService);
//! [`RpcClient`] implements [`Channel`](streamfile_transfer::Channel) so the
//! client pipelines run unchanged over the network.
//!
//! # Wire format
//!
//! See [`streamfile_protocol::wire`] for the message framing.

pub mod client;
pub mod error;
pub mod server;

pub use client::RpcClient;
pub use error::RpcError;
pub use server::{RpcServer, RpcServerConfig};

use std::time::Duration;

use streamfile_protocol::{Status, WireError};

/// TCP read/write buffer size (256 KB).
pub const RPC_BUFFER_SIZE: usize = 256 * 1024;

/// Timeout for the TCP connection attempt.
pub const RPC_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// How long the server keeps reading an abandoned upload after replying.
pub const RPC_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Frames buffered per direction on the client side of a call.
pub const RPC_FRAME_BUFFER: usize = 8;

/// Maps a codec failure to the status reported for the call.
pub(crate) fn wire_status(err: &WireError) -> Status {
    match err {
        WireError::Io(e) => Status::unavailable(format!("connection error: {e}")),
        other => Status::invalid_argument(other.to_string()),
    }
}
