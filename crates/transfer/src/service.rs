//! Server facade tying the pipelines to a set of hooks.

use streamfile_protocol::{
    CHUNK_SIZE, DownloadFrame, DownloadRequest, Headers, MAX_CHUNK_SIZE, ServiceInfo, Status,
    UploadFrame, UploadResponse,
};
use tokio_util::sync::CancellationToken;

use crate::channel::{FrameSender, FrameStream};
use crate::download::Downloader;
use crate::hooks::TransferHooks;
use crate::upload::UploadReceiver;

/// Server-side tuning.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// Block size for downloads.
    pub chunk_size: usize,
    /// Largest upload chunk accepted.
    pub max_chunk_size: usize,
    /// Frames buffered per direction of a call.
    pub frame_buffer: usize,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            chunk_size: CHUNK_SIZE,
            max_chunk_size: MAX_CHUNK_SIZE,
            frame_buffer: 8,
        }
    }
}

/// The file transfer service: upload, download and info calls.
pub struct FileTransferService<H: TransferHooks> {
    hooks: H,
    config: ServiceConfig,
    info: ServiceInfo,
}

impl<H: TransferHooks> FileTransferService<H> {
    pub fn new(hooks: H, info: ServiceInfo) -> Self {
        Self {
            hooks,
            config: ServiceConfig::default(),
            info,
        }
    }

    pub fn with_config(mut self, config: ServiceConfig) -> Self {
        self.config = config;
        self
    }

    pub fn hooks(&self) -> &H {
        &self.hooks
    }

    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    pub fn info(&self) -> ServiceInfo {
        self.info.clone()
    }

    /// Handles one upload call.
    pub async fn upload(
        &self,
        frames: FrameStream<UploadFrame>,
        headers: &Headers,
        cancel: &CancellationToken,
    ) -> Result<UploadResponse, Status> {
        UploadReceiver::new(&self.hooks, self.config.max_chunk_size)
            .receive(frames, headers, cancel)
            .await
    }

    /// Handles one download call. A failure is also delivered in-band on
    /// `sink` after any frames already sent.
    pub async fn download(
        &self,
        request: DownloadRequest,
        sink: FrameSender<DownloadFrame>,
        headers: &Headers,
        cancel: &CancellationToken,
    ) -> Result<(), Status> {
        let result = Downloader::new(&self.hooks, self.config.chunk_size)
            .send(&request, &sink, headers, cancel)
            .await;
        if let Err(status) = &result {
            sink.fail(status.clone()).await;
        }
        result
    }
}
