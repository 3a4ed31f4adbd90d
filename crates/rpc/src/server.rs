//! TCP server.
//!
//! Accepts connections until shut down and serves exactly one call per
//! connection against the shared [`FileTransferService`].

use std::net::SocketAddr;
use std::sync::Arc;

use streamfile_protocol::wire::{read_message, write_message};
use streamfile_protocol::{Headers, Method, Status, UploadFrame, WireError, WireMessage};
use streamfile_transfer::{FileTransferService, FrameStream, TransferHooks, channel};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, BufReader, BufWriter};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, info, info_span, warn};
use uuid::Uuid;

use crate::error::RpcError;
use crate::{RPC_BUFFER_SIZE, RPC_DRAIN_TIMEOUT, wire_status};

type Reader = BufReader<OwnedReadHalf>;
type Writer = BufWriter<OwnedWriteHalf>;

/// Server configuration.
#[derive(Debug, Clone)]
pub struct RpcServerConfig {
    /// Address to listen on (port 0 = OS-assigned).
    pub addr: SocketAddr,
}

impl Default for RpcServerConfig {
    fn default() -> Self {
        Self {
            addr: ([0, 0, 0, 0], 0).into(),
        }
    }
}

/// The streamfile TCP server.
pub struct RpcServer<H: TransferHooks> {
    addr: SocketAddr,
    service: Arc<FileTransferService<H>>,
    cancel: CancellationToken,
    local_addr: Mutex<Option<SocketAddr>>,
}

impl<H: TransferHooks> RpcServer<H> {
    pub fn new(config: RpcServerConfig, service: FileTransferService<H>) -> Arc<Self> {
        Arc::new(Self {
            addr: config.addr,
            service: Arc::new(service),
            cancel: CancellationToken::new(),
            local_addr: Mutex::new(None),
        })
    }

    /// Returns the local address the server is listening on.
    ///
    /// Only available after [`listen`](Self::listen) binds the socket.
    pub async fn local_addr(&self) -> Option<SocketAddr> {
        *self.local_addr.lock().await
    }

    pub fn service(&self) -> &Arc<FileTransferService<H>> {
        &self.service
    }

    /// Gracefully shuts down the server. Calls in flight are cancelled.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }

    /// Binds the configured address.
    pub async fn listen(&self) -> Result<TcpListener, RpcError> {
        let listener = TcpListener::bind(self.addr).await?;
        let local_addr = listener.local_addr()?;
        *self.local_addr.lock().await = Some(local_addr);
        info!("streamfile server listening on {local_addr}");
        Ok(listener)
    }

    /// Binds and serves until shutdown.
    pub async fn run(self: &Arc<Self>) -> Result<(), RpcError> {
        let listener = self.listen().await?;
        self.serve(listener).await
    }

    /// Accepts connections on `listener` until shutdown.
    pub async fn serve(self: &Arc<Self>, listener: TcpListener) -> Result<(), RpcError> {
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    info!("server shutting down");
                    break Ok(());
                }

                result = listener.accept() => {
                    match result {
                        Ok((stream, peer_addr)) => {
                            let server = Arc::clone(self);
                            let span = info_span!("call", id = %Uuid::new_v4(), %peer_addr);
                            tokio::spawn(
                                async move {
                                    if let Err(e) = server.handle_connection(stream).await {
                                        warn!("connection error: {e}");
                                    }
                                }
                                .instrument(span),
                            );
                        }
                        Err(e) => {
                            tracing::error!("accept error: {e}");
                        }
                    }
                }
            }
        }
    }

    /// Reads the call header and dispatches on the method.
    async fn handle_connection(self: &Arc<Self>, stream: TcpStream) -> Result<(), RpcError> {
        stream.set_nodelay(true)?;
        let (reader, writer) = stream.into_split();
        let mut reader = BufReader::with_capacity(RPC_BUFFER_SIZE, reader);
        let mut writer = BufWriter::with_capacity(RPC_BUFFER_SIZE, writer);

        let (method, headers) = match read_message(&mut reader, 0).await? {
            Some(WireMessage::Call { method, headers }) => (method, headers),
            Some(other) => {
                let status = Status::invalid_argument(format!(
                    "expected call message, got {}",
                    other.kind()
                ));
                reply(&mut writer, &WireMessage::Status(status.clone())).await?;
                return Err(RpcError::Protocol(status.message));
            }
            None => {
                debug!("connection closed before a call");
                return Ok(());
            }
        };
        debug!(%method, "call started");

        match method {
            Method::Info => reply(&mut writer, &WireMessage::Info(self.service.info())).await,
            Method::Upload => self.serve_upload(reader, writer, headers).await,
            Method::Download => self.serve_download(reader, writer, headers).await,
        }
    }

    async fn serve_upload(
        self: &Arc<Self>,
        mut reader: Reader,
        mut writer: Writer,
        headers: Headers,
    ) -> Result<(), RpcError> {
        let config = self.service.config();
        let max_chunk_size = config.max_chunk_size;
        let (tx, frames) = channel::frame_channel(config.frame_buffer);
        let cancel = self.cancel.child_token();

        let mut handler = tokio::spawn({
            let service = Arc::clone(&self.service);
            let cancel = cancel.clone();
            async move { service.upload(frames, &headers, &cancel).await }
        });

        let mut tx = Some(tx);
        let mut reading = true;
        let result = loop {
            tokio::select! {
                result = &mut handler => break result,
                msg = read_message(&mut reader, max_chunk_size), if reading => {
                    match classify_upload(msg) {
                        Inbound::Frame(frame) => {
                            let delivered = match &tx {
                                Some(sender) => sender.send(frame).await.is_ok(),
                                None => false,
                            };
                            if !delivered {
                                tx = None;
                            }
                        }
                        Inbound::Finished => {
                            reading = false;
                            tx = None;
                        }
                        Inbound::Cancelled => {
                            debug!("client cancelled the upload");
                            reading = false;
                            cancel.cancel();
                            tx = None;
                        }
                        Inbound::Failed(status) => {
                            reading = false;
                            if let Some(sender) = tx.take() {
                                sender.fail(status).await;
                            }
                        }
                    }
                }
            }
        };

        let response = match result {
            Ok(Ok(response)) => WireMessage::UploadResponse(response),
            Ok(Err(status)) => WireMessage::Status(status),
            Err(e) => WireMessage::Status(Status::internal(format!("upload handler failed: {e}"))),
        };
        if let Err(e) = reply(&mut writer, &response).await {
            debug!("upload reply not delivered: {e}");
            return Ok(());
        }
        let _ = writer.shutdown().await;

        if reading {
            // The client may still be sending; keep reading so the reply is
            // not lost to a connection reset.
            let _ = tokio::time::timeout(RPC_DRAIN_TIMEOUT, drain(&mut reader, max_chunk_size))
                .await;
        }
        Ok(())
    }

    async fn serve_download(
        self: &Arc<Self>,
        mut reader: Reader,
        mut writer: Writer,
        headers: Headers,
    ) -> Result<(), RpcError> {
        let request = match read_message(&mut reader, 0).await? {
            Some(WireMessage::DownloadRequest(request)) => request,
            other => {
                let kind = other.as_ref().map_or("end of stream", WireMessage::kind);
                let status =
                    Status::invalid_argument(format!("expected download_request, got {kind}"));
                reply(&mut writer, &WireMessage::Status(status.clone())).await?;
                return Err(RpcError::Protocol(status.message));
            }
        };

        let (sink, mut responses) = channel::frame_channel(self.service.config().frame_buffer);
        let cancel = self.cancel.child_token();
        let watcher = tokio::spawn(watch_for_cancel(reader, cancel.clone()));
        let handler = tokio::spawn({
            let service = Arc::clone(&self.service);
            let cancel = cancel.clone();
            async move { service.download(request, sink, &headers, &cancel).await }
        });

        let forwarded = forward_download(&mut writer, &mut responses).await;
        if forwarded.is_err() {
            cancel.cancel();
        }
        drop(responses);
        // The post-download hook runs inside the handler; wait for it.
        let _ = handler.await;
        watcher.abort();
        forwarded
    }
}

/// What the read side of an upload connection produced.
enum Inbound {
    Frame(UploadFrame),
    Finished,
    Cancelled,
    Failed(Status),
}

fn classify_upload(msg: Result<Option<WireMessage>, WireError>) -> Inbound {
    match msg {
        Ok(Some(WireMessage::End)) | Ok(None) => Inbound::Finished,
        Ok(Some(WireMessage::Cancel)) => Inbound::Cancelled,
        Ok(Some(msg)) => match msg.into_upload_frame() {
            Ok(frame) => Inbound::Frame(frame),
            Err(other) => Inbound::Failed(Status::invalid_argument(format!(
                "unexpected {} message in upload",
                other.kind()
            ))),
        },
        Err(e) => Inbound::Failed(wire_status(&e)),
    }
}

/// Writes every download frame, then `end` or the failure status.
async fn forward_download(
    writer: &mut Writer,
    responses: &mut FrameStream<streamfile_protocol::DownloadFrame>,
) -> Result<(), RpcError> {
    while let Some(item) = responses.recv().await {
        match item {
            Ok(frame) => reply(writer, &WireMessage::from(frame)).await?,
            Err(status) => return reply(writer, &WireMessage::Status(status)).await,
        }
    }
    reply(writer, &WireMessage::End).await
}

/// Cancels `cancel` when the client sends `cancel` or goes away.
async fn watch_for_cancel<R: AsyncRead + Unpin>(mut reader: R, cancel: CancellationToken) {
    loop {
        match read_message(&mut reader, 0).await {
            Ok(Some(WireMessage::Cancel)) | Ok(None) | Err(_) => {
                cancel.cancel();
                return;
            }
            Ok(Some(other)) => debug!(kind = other.kind(), "ignoring message during download"),
        }
    }
}

/// Discards messages until the client finishes sending.
async fn drain<R: AsyncRead + Unpin>(reader: &mut R, max_payload: usize) {
    while let Ok(Some(msg)) = read_message(reader, max_payload).await {
        if matches!(msg, WireMessage::End | WireMessage::Cancel) {
            break;
        }
    }
}

async fn reply<W: AsyncWrite + Unpin>(writer: &mut W, msg: &WireMessage) -> Result<(), RpcError> {
    write_message(writer, msg).await?;
    writer.flush().await?;
    Ok(())
}
