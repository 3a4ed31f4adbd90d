//! Wire protocol types for streamfile transfers.
//!
//! Defines the frames exchanged by the upload (client-streaming) and
//! download (server-streaming) calls, the status codes a server reports,
//! the opaque header multimap, and a length-prefixed codec used by the
//! TCP transport.

pub mod constants;
pub mod headers;
pub mod messages;
pub mod status;
pub mod wire;

pub use constants::{CHUNK_SIZE, MAX_CHUNK_SIZE, Method};
pub use headers::Headers;
pub use messages::{
    Chunk, DownloadFrame, DownloadRequest, ServiceInfo, UploadFrame, UploadResponse,
};
pub use status::{Code, Status};
pub use wire::{WireError, WireMessage};
