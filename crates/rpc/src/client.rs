//! TCP client implementing [`Channel`].
//!
//! Each call opens its own connection. Background tasks pump frames
//! between the connection and the call's channels so the transfer
//! pipelines never touch the socket directly.

use std::net::SocketAddr;
use std::time::Duration;

use streamfile_protocol::wire::{read_message, write_message};
use streamfile_protocol::{
    DownloadFrame, DownloadRequest, Headers, MAX_CHUNK_SIZE, Method, ServiceInfo, Status,
    UploadFrame, UploadResponse, WireError, WireMessage,
};
use streamfile_transfer::{
    Channel, ChannelFuture, DownloadCall, FrameSender, FrameStream, UploadCall, channel,
};
use tokio::io::{AsyncWriteExt, BufReader, BufWriter};
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::{RPC_BUFFER_SIZE, RPC_CONNECT_TIMEOUT, RPC_FRAME_BUFFER, wire_status};

type Reader = BufReader<OwnedReadHalf>;
type Writer = BufWriter<OwnedWriteHalf>;

/// Connects to an [`RpcServer`](crate::RpcServer).
#[derive(Debug, Clone)]
pub struct RpcClient {
    addr: SocketAddr,
    headers: Headers,
    connect_timeout: Duration,
    max_chunk_size: usize,
}

impl RpcClient {
    pub fn new(addr: SocketAddr) -> Self {
        Self {
            addr,
            headers: Headers::new(),
            connect_timeout: RPC_CONNECT_TIMEOUT,
            max_chunk_size: MAX_CHUNK_SIZE,
        }
    }

    /// Headers sent with every call, ahead of per-call headers.
    pub fn with_headers(mut self, headers: Headers) -> Self {
        self.headers = headers;
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Largest download chunk accepted from the server.
    pub fn with_max_chunk_size(mut self, max_chunk_size: usize) -> Self {
        self.max_chunk_size = max_chunk_size;
        self
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Connects and writes the call header.
    async fn open_call(
        &self,
        method: Method,
        headers: &Headers,
    ) -> Result<(Reader, Writer), Status> {
        let stream =
            match tokio::time::timeout(self.connect_timeout, TcpStream::connect(self.addr)).await {
                Ok(Ok(stream)) => stream,
                Ok(Err(e)) => {
                    return Err(Status::unavailable(format!("connect to {}: {e}", self.addr)));
                }
                Err(_) => {
                    return Err(Status::unavailable(format!(
                        "connect to {} timed out",
                        self.addr
                    )));
                }
            };
        let _ = stream.set_nodelay(true);

        let (reader, writer) = stream.into_split();
        let reader = BufReader::with_capacity(RPC_BUFFER_SIZE, reader);
        let mut writer = BufWriter::with_capacity(RPC_BUFFER_SIZE, writer);

        let mut all = self.headers.clone();
        all.extend(headers);
        send(&mut writer, &WireMessage::Call { method, headers: all })
            .await
            .map_err(|e| wire_status(&e))?;
        debug!(addr = %self.addr, %method, "call opened");
        Ok((reader, writer))
    }
}

impl Channel for RpcClient {
    fn open_upload<'a>(&'a self, headers: Headers) -> ChannelFuture<'a, UploadCall> {
        Box::pin(async move {
            let (reader, writer) = self.open_call(Method::Upload, &headers).await?;
            let (requests, frames) = channel::frame_channel(RPC_FRAME_BUFFER);
            let (response_tx, response) = oneshot::channel();
            let cancel = CancellationToken::new();
            let answered = CancellationToken::new();

            tokio::spawn(pump_upload(writer, frames, cancel.clone(), answered.clone()));
            tokio::spawn(await_upload_response(reader, response_tx, cancel.clone(), answered));

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
            let (reader, mut writer) = self.open_call(Method::Download, &headers).await?;
            send(&mut writer, &WireMessage::DownloadRequest(request))
                .await
                .map_err(|e| wire_status(&e))?;

            let (sink, responses) = channel::frame_channel(RPC_FRAME_BUFFER);
            let cancel = CancellationToken::new();
            tokio::spawn(pump_download(
                reader,
                writer,
                sink,
                cancel.clone(),
                self.max_chunk_size,
            ));

            Ok(DownloadCall { responses, cancel })
        })
    }

    fn info<'a>(&'a self) -> ChannelFuture<'a, ServiceInfo> {
        Box::pin(async move {
            // The write half stays open until the answer arrives.
            let (mut reader, _writer) = self.open_call(Method::Info, &Headers::new()).await?;
            match read_message(&mut reader, 0).await {
                Ok(Some(WireMessage::Info(info))) => Ok(info),
                Ok(Some(WireMessage::Status(status))) => Err(status),
                Ok(Some(other)) => Err(unexpected(&other)),
                Ok(None) => Err(Status::unavailable("connection closed before the answer")),
                Err(e) => Err(wire_status(&e)),
            }
        })
    }
}

/// Writes upload frames until the stream ends, the call is cancelled, or the
/// server answers early.
async fn pump_upload(
    mut writer: Writer,
    mut frames: FrameStream<UploadFrame>,
    cancel: CancellationToken,
    answered: CancellationToken,
) {
    if let Err(e) = write_upload_frames(&mut writer, &mut frames, &cancel, &answered).await {
        debug!("upload stream interrupted: {e}");
    }
    let _ = writer.shutdown().await;
}

async fn write_upload_frames(
    writer: &mut Writer,
    frames: &mut FrameStream<UploadFrame>,
    cancel: &CancellationToken,
    answered: &CancellationToken,
) -> Result<(), WireError> {
    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => return send(writer, &WireMessage::Cancel).await,
            _ = answered.cancelled() => return Ok(()),
            frame = frames.recv() => match frame {
                Some(Ok(frame)) => send(writer, &WireMessage::from(frame)).await?,
                Some(Err(_)) => return send(writer, &WireMessage::Cancel).await,
                None => return send(writer, &WireMessage::End).await,
            },
        }
    }
}

async fn await_upload_response(
    mut reader: Reader,
    response_tx: oneshot::Sender<Result<UploadResponse, Status>>,
    cancel: CancellationToken,
    answered: CancellationToken,
) {
    let msg = tokio::select! {
        _ = cancel.cancelled() => return,
        msg = read_message(&mut reader, 0) => msg,
    };
    let result = match msg {
        Ok(Some(WireMessage::UploadResponse(response))) => Ok(response),
        Ok(Some(WireMessage::Status(status))) => Err(status),
        Ok(Some(other)) => Err(unexpected(&other)),
        Ok(None) => Err(Status::unavailable("connection closed before the response")),
        Err(e) => Err(wire_status(&e)),
    };
    answered.cancel();
    let _ = response_tx.send(result);
}

/// Forwards download frames to `sink` until `end`, a status, or
/// cancellation.
async fn pump_download(
    mut reader: Reader,
    mut writer: Writer,
    sink: FrameSender<DownloadFrame>,
    cancel: CancellationToken,
    max_chunk_size: usize,
) {
    loop {
        let msg = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            msg = read_message(&mut reader, max_chunk_size) => msg,
        };
        let frame = match msg {
            Ok(Some(WireMessage::End)) => return,
            Ok(Some(WireMessage::Status(status))) => return sink.fail(status).await,
            Ok(Some(msg)) => match msg.into_download_frame() {
                Ok(frame) => frame,
                Err(other) => return sink.fail(unexpected(&other)).await,
            },
            Ok(None) => {
                return sink
                    .fail(Status::unavailable("connection closed mid-stream"))
                    .await;
            }
            Err(e) => return sink.fail(wire_status(&e)).await,
        };
        let delivered = tokio::select! {
            biased;
            _ = cancel.cancelled() => false,
            sent = sink.send(frame) => sent.is_ok(),
        };
        if !delivered {
            break;
        }
    }
    // The receiving side gave up; tell the server.
    if let Err(e) = send(&mut writer, &WireMessage::Cancel).await {
        debug!("cancel not delivered: {e}");
    }
}

async fn send(writer: &mut Writer, msg: &WireMessage) -> Result<(), WireError> {
    write_message(writer, msg).await?;
    writer.flush().await?;
    Ok(())
}

fn unexpected(msg: &WireMessage) -> Status {
    Status::internal(format!("unexpected {} message from server", msg.kind()))
}
