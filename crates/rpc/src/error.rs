//! Error types for the TCP transport.

use streamfile_protocol::WireError;

/// Errors produced while serving connections.
#[derive(Debug, thiserror::Error)]
pub enum RpcError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("wire error: {0}")]
    Wire(#[from] WireError),

    #[error("protocol error: {0}")]
    Protocol(String),
}
