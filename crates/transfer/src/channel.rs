//! Client view of the streaming transport.
//!
//! A [`Channel`] opens one call per transfer. Frames travel through bounded
//! tokio channels carrying `Result<T, Status>` so a transport failure can be
//! delivered in-band, after whatever frames already arrived.

use std::future::Future;
use std::pin::Pin;

use streamfile_protocol::{
    DownloadFrame, DownloadRequest, Headers, ServiceInfo, Status, UploadFrame, UploadResponse,
};
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

/// A boxed future returned by channel methods.
pub type ChannelFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, Status>> + Send + 'a>>;

/// Receiving half of a frame stream.
pub type FrameStream<T> = mpsc::Receiver<Result<T, Status>>;

/// Sending half of a frame stream. Dropping it half-closes the stream.
#[derive(Debug)]
pub struct FrameSender<T> {
    tx: mpsc::Sender<Result<T, Status>>,
}

impl<T> Clone for FrameSender<T> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
        }
    }
}

impl<T> FrameSender<T> {
    /// Sends one frame, waiting for buffer space.
    ///
    /// Fails with `Cancelled` once the receiving side is gone.
    pub async fn send(&self, frame: T) -> Result<(), Status> {
        self.tx
            .send(Ok(frame))
            .await
            .map_err(|_| Status::cancelled("receiver closed the stream"))
    }

    /// Terminates the stream with an error status.
    pub async fn fail(&self, status: Status) {
        // A closed receiver already stopped listening.
        let _ = self.tx.send(Err(status)).await;
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Creates a bounded frame stream holding up to `buffer` frames.
pub fn frame_channel<T>(buffer: usize) -> (FrameSender<T>, FrameStream<T>) {
    let (tx, rx) = mpsc::channel(buffer.max(1));
    (FrameSender { tx }, rx)
}

/// An open client-streaming upload call.
#[derive(Debug)]
pub struct UploadCall {
    pub requests: FrameSender<UploadFrame>,
    pub response: oneshot::Receiver<Result<UploadResponse, Status>>,
    /// Cancelling tells the server to abandon the call.
    pub cancel: CancellationToken,
}

/// An open server-streaming download call.
#[derive(Debug)]
pub struct DownloadCall {
    pub responses: FrameStream<DownloadFrame>,
    pub cancel: CancellationToken,
}

/// Transport used by the client pipelines.
pub trait Channel: Send + Sync {
    /// Opens an upload call carrying `headers`.
    fn open_upload<'a>(&'a self, headers: Headers) -> ChannelFuture<'a, UploadCall>;

    /// Opens a download call for `request`.
    fn open_download<'a>(
        &'a self,
        request: DownloadRequest,
        headers: Headers,
    ) -> ChannelFuture<'a, DownloadCall>;

    /// Unary informational call.
    fn info<'a>(&'a self) -> ChannelFuture<'a, ServiceInfo>;
}

impl<C: Channel + ?Sized> Channel for std::sync::Arc<C> {
    fn open_upload<'a>(&'a self, headers: Headers) -> ChannelFuture<'a, UploadCall> {
        (**self).open_upload(headers)
    }

    fn open_download<'a>(
        &'a self,
        request: DownloadRequest,
        headers: Headers,
    ) -> ChannelFuture<'a, DownloadCall> {
        (**self).open_download(request, headers)
    }

    fn info<'a>(&'a self) -> ChannelFuture<'a, ServiceInfo> {
        (**self).info()
    }
}
