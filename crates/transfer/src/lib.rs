//! Chunked file transfer pipelines with hook-driven authorization and
//! whole-file digest verification.
//!
//! - Upload: [`Uploader`] (client) streams an identifier frame, chunks and a
//!   verification frame; [`UploadReceiver`] (server) stores them.
//! - Download: [`Downloader`] (server) streams an optional digest and the
//!   chunks; [`DownloadReceiver`] (client) rebuilds the file.
//! - [`TransferHooks`] gates both pipelines on the server.
//!
//! The transport is abstracted by [`Channel`]; [`LocalChannel`] runs the
//! server in-process.

mod chunked;
mod client;
mod directory;
mod download;
mod error;
mod local;
mod service;
mod types;
mod upload;
mod validation;

pub mod channel;
pub mod digest;
pub mod hooks;
pub mod token;

pub use channel::{Channel, ChannelFuture, DownloadCall, FrameSender, FrameStream, UploadCall};
pub use chunked::{ChunkError, ChunkReader, ChunkWriter, chunk_count};
pub use client::TransferClient;
pub use directory::DirectoryHooks;
pub use download::{DownloadReceiver, Downloader};
pub use error::TransferError;
pub use hooks::{
    HookFuture, NoopHooks, PostHookResult, PreHookResult, TransferHooks, ValidationResult,
};
pub use local::LocalChannel;
pub use service::{FileTransferService, ServiceConfig};
pub use types::{Progress, TransferOptions, TransferOutcome};
pub use upload::{UploadReceiver, Uploader};
pub use validation::{InvalidPath, validate_relative_path};

/// Default block size when sending: 1 MiB.
pub const DEFAULT_CHUNK_SIZE: usize = streamfile_protocol::CHUNK_SIZE;

