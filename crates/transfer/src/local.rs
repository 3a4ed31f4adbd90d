//! In-process channel: the server side of every call runs as a tokio task
//! against a shared [`FileTransferService`].

use std::sync::Arc;

use streamfile_protocol::{DownloadRequest, Headers, ServiceInfo};
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

use crate::channel::{Channel, ChannelFuture, DownloadCall, UploadCall, frame_channel};
use crate::hooks::TransferHooks;
use crate::service::FileTransferService;

pub struct LocalChannel<H: TransferHooks> {
    service: Arc<FileTransferService<H>>,
}

impl<H: TransferHooks> LocalChannel<H> {
    pub fn new(service: Arc<FileTransferService<H>>) -> Self {
        Self { service }
    }

    pub fn service(&self) -> &Arc<FileTransferService<H>> {
        &self.service
    }
}

impl<H: TransferHooks> Clone for LocalChannel<H> {
    fn clone(&self) -> Self {
        Self {
            service: Arc::clone(&self.service),
        }
    }
}

impl<H: TransferHooks> Channel for LocalChannel<H> {
    fn open_upload<'a>(&'a self, headers: Headers) -> ChannelFuture<'a, UploadCall> {
        Box::pin(async move {
            let (requests, frames) = frame_channel(self.service.config().frame_buffer);
            let (response_tx, response) = oneshot::channel();
            let cancel = CancellationToken::new();

            let service = Arc::clone(&self.service);
            let server_cancel = cancel.clone();
            tokio::spawn(async move {
                let result = service.upload(frames, &headers, &server_cancel).await;
                let _ = response_tx.send(result);
            });

            Ok(UploadCall {
                requests,
                response,
                cancel,
            })
        })
    }

    fn open_download<'a>(
        &'a self,
        request: DownloadRequest,
        headers: Headers,
    ) -> ChannelFuture<'a, DownloadCall> {
        Box::pin(async move {
            let (sink, responses) = frame_channel(self.service.config().frame_buffer);
            let cancel = CancellationToken::new();

            let service = Arc::clone(&self.service);
            let server_cancel = cancel.clone();
            tokio::spawn(async move {
                let _ = service
                    .download(request, sink, &headers, &server_cancel)
                    .await;
            });

            Ok(DownloadCall { responses, cancel })
        })
    }

    fn info<'a>(&'a self) -> ChannelFuture<'a, ServiceInfo> {
        Box::pin(async move { Ok(self.service.info()) })
    }
}
