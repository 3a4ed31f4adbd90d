//! Download pipeline: [`Downloader`] streams a stored file from the server,
//! [`DownloadReceiver`] rebuilds it on the client.

use std::path::Path;

use streamfile_protocol::{DownloadFrame, DownloadRequest, Headers, Status};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::channel::{Channel, DownloadCall, FrameSender};
use crate::chunked::{ChunkError, ChunkReader, ChunkWriter};
use crate::digest::{file_digest, verify_file};
use crate::hooks::TransferHooks;
use crate::{TransferError, TransferOptions, TransferOutcome};

// ---------------------------------------------------------------------------
// Server
// ---------------------------------------------------------------------------

/// Server side of the download call.
pub struct Downloader<'h, H: TransferHooks> {
    hooks: &'h H,
    chunk_size: usize,
}

impl<'h, H: TransferHooks> Downloader<'h, H> {
    pub fn new(hooks: &'h H, chunk_size: usize) -> Self {
        Self { hooks, chunk_size }
    }

    /// Streams the file named by `request` into `sink`.
    ///
    /// The returned status is the call's failure; the caller forwards it.
    pub async fn send(
        &self,
        request: &DownloadRequest,
        sink: &FrameSender<DownloadFrame>,
        headers: &Headers,
        cancel: &CancellationToken,
    ) -> Result<(), Status> {
        let validation = self.hooks.validate_headers(headers).await;
        if !validation.ok {
            let message = validation
                .message
                .unwrap_or_else(|| "header validation failed".into());
            warn!(%message, "download rejected: headers");
            return Err(Status::unauthenticated(message));
        }

        let identifier = request.identifier.as_str();
        if identifier.trim().is_empty() {
            return Err(Status::invalid_argument("identifier must not be blank"));
        }

        let pre = self.hooks.pre_download(identifier).await;
        if !pre.proceed {
            let message = pre.message.unwrap_or_else(|| "download refused".into());
            warn!(identifier, %message, "download refused by pre-download hook");
            return Err(Status::failed_precondition(message));
        }
        let path = pre.resolved_path;

        let streamed = self.stream(&path, request.verify, sink, cancel).await;
        let post = self.hooks.post_download(identifier, streamed.is_ok()).await;

        match streamed {
            Ok(()) if post.final_success => {
                info!(identifier, path = %path.display(), "download sent");
                Ok(())
            }
            Ok(()) => {
                let message = post.message.unwrap_or_else(|| "rejected by server".into());
                warn!(identifier, %message, "download vetoed by post-download hook");
                Err(Status::aborted(format!(
                    "download of '{identifier}' rejected: {message}"
                )))
            }
            Err(status) => {
                warn!(identifier, %status, "download failed");
                Err(status)
            }
        }
    }

    /// Data phase: optional digest, then every chunk.
    async fn stream(
        &self,
        path: &Path,
        verify: bool,
        sink: &FrameSender<DownloadFrame>,
        cancel: &CancellationToken,
    ) -> Result<(), Status> {
        match tokio::fs::metadata(path).await {
            Ok(meta) if meta.is_file() => {}
            _ => {
                return Err(Status::invalid_argument(format!(
                    "file not found: {}",
                    path.display()
                )));
            }
        }

        let mut reader = ChunkReader::open(path, self.chunk_size)
            .await
            .map_err(|e| Status::internal(format!("cannot open {}: {e}", path.display())))?;

        if verify {
            let digest = file_digest(path)
                .await
                .map_err(|e| Status::internal(e.to_string()))?;
            sink.send(DownloadFrame::Digest(digest)).await?;
        }

        while let Some(chunk) = reader
            .next_chunk()
            .await
            .map_err(|e| Status::internal(format!("read {} failed: {e}", path.display())))?
        {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(Status::aborted("transfer cancelled")),
                sent = sink.send(DownloadFrame::Chunk(chunk)) => sent?,
            }
        }

        debug!(
            path = %path.display(),
            bytes = reader.file_size(),
            chunks = reader.total_chunks(),
            "download stream complete"
        );
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

/// Client side of the download call.
pub struct DownloadReceiver<'c, C: Channel + ?Sized> {
    channel: &'c C,
}

impl<'c, C: Channel + ?Sized> DownloadReceiver<'c, C> {
    pub fn new(channel: &'c C) -> Self {
        Self { channel }
    }

    /// Downloads `identifier` into `local_path`.
    ///
    /// On cancellation the partial destination is left in place. Every other
    /// failure removes it.
    pub async fn download(
        &self,
        identifier: &str,
        local_path: &Path,
        options: &TransferOptions,
    ) -> Result<TransferOutcome, TransferError> {
        info!(
            identifier,
            path = %local_path.display(),
            verify = options.verify,
            "download started"
        );
        let result = self.run(identifier, local_path, options).await;
        match &result {
            Ok(outcome) => info!(identifier, digest = ?outcome.digest, "download finished"),
            Err(TransferError::Cancelled { .. }) => warn!(identifier, "download cancelled"),
            Err(e) => error!(identifier, error = %e, "download failed"),
        }
        result
    }

    async fn run(
        &self,
        identifier: &str,
        local_path: &Path,
        options: &TransferOptions,
    ) -> Result<TransferOutcome, TransferError> {
        if identifier.trim().is_empty() {
            return Err(TransferError::InvalidIdentifier);
        }

        let request = DownloadRequest::new(identifier, options.verify);
        let DownloadCall {
            mut responses,
            cancel: call_cancel,
        } = self
            .channel
            .open_download(request, options.headers.clone())
            .await
            .map_err(|status| TransferError::remote(identifier, local_path, status))?;

        let mut writer = match open_destination(local_path, options.max_chunk_size).await {
            Ok(writer) => writer,
            Err(e) => {
                call_cancel.cancel();
                return Err(e);
            }
        };
        let mut server_digest = None;

        loop {
            let frame = tokio::select! {
                biased;
                _ = options.cancel.cancelled() => {
                    call_cancel.cancel();
                    // Flush what arrived; the partial file stays.
                    let _ = writer.close().await;
                    return Err(TransferError::Cancelled {
                        identifier: identifier.to_string(),
                    });
                }
                frame = responses.recv() => frame,
            };

            let failure = match frame {
                None => break,
                Some(Err(status)) => TransferError::remote(identifier, local_path, status),
                Some(Ok(DownloadFrame::Digest(digest))) => {
                    if server_digest.is_none() && writer.chunks_written() == 0 {
                        server_digest = Some(digest);
                        continue;
                    }
                    TransferError::failed(identifier, local_path, "unexpected digest frame")
                }
                Some(Ok(DownloadFrame::Chunk(chunk))) => match writer.append(&chunk).await {
                    Ok(_) => {
                        options.report(identifier, writer.bytes_written(), None);
                        continue;
                    }
                    Err(ChunkError::Io(e)) => TransferError::Io(e),
                    Err(e) => TransferError::failed(identifier, local_path, e.to_string()),
                },
            };
            discard(writer, local_path).await;
            return Err(failure);
        }

        if !writer.is_complete() {
            discard(writer, local_path).await;
            return Err(TransferError::failed(
                identifier,
                local_path,
                "stream ended before the last chunk",
            ));
        }
        debug!(
            identifier,
            bytes = writer.bytes_written(),
            chunks = writer.chunks_written(),
            "download stream complete"
        );

        if !options.verify {
            return Ok(TransferOutcome::succeeded(server_digest));
        }
        let Some(remote) = server_digest else {
            remove_partial(local_path).await;
            return Err(TransferError::failed(
                identifier,
                local_path,
                "verification requested but the server sent no digest",
            ));
        };
        match verify_file(local_path, &remote).await {
            Ok(digest) => Ok(TransferOutcome::succeeded(Some(digest))),
            Err(e) => {
                remove_partial(local_path).await;
                Err(e)
            }
        }
    }
}

async fn open_destination(
    path: &Path,
    max_chunk_size: usize,
) -> Result<ChunkWriter, TransferError> {
    let access_denied = |source| TransferError::AccessDenied {
        path: path.to_path_buf(),
        source,
    };
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(access_denied)?;
    }
    ChunkWriter::create(path, max_chunk_size)
        .await
        .map_err(access_denied)
}

async fn discard(mut writer: ChunkWriter, path: &Path) {
    let _ = writer.close().await;
    drop(writer);
    remove_partial(path).await;
}

async fn remove_partial(path: &Path) {
    if let Err(e) = tokio::fs::remove_file(path).await {
        if e.kind() != std::io::ErrorKind::NotFound {
            warn!(path = %path.display(), error = %e, "failed to remove partial download");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};

    use streamfile_protocol::{Chunk, Code, ServiceInfo};
    use tempfile::TempDir;
    use tokio::sync::mpsc;

    use super::*;
    use crate::channel::{ChannelFuture, FrameStream, UploadCall, frame_channel};
    use crate::digest::digest_bytes;
    use crate::hooks::testing::RecordingHooks;

    async fn collect(
        hooks: &RecordingHooks,
        request: DownloadRequest,
        chunk_size: usize,
    ) -> (Vec<DownloadFrame>, Result<(), Status>) {
        let (sink, mut stream) = frame_channel(64);
        let result = Downloader::new(hooks, chunk_size)
            .send(&request, &sink, &Headers::new(), &CancellationToken::new())
            .await;
        drop(sink);
        let mut frames = Vec::new();
        while let Some(Ok(frame)) = stream.recv().await {
            frames.push(frame);
        }
        (frames, result)
    }

    #[tokio::test]
    async fn digest_precedes_chunks() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("a.bin"), b"0123456789").unwrap();
        let hooks = RecordingHooks::new(dir.path());

        let (frames, result) = collect(&hooks, DownloadRequest::new("a.bin", true), 4).await;
        result.unwrap();
        assert_eq!(
            frames,
            vec![
                DownloadFrame::Digest(digest_bytes(b"0123456789")),
                DownloadFrame::Chunk(Chunk::new(1, b"0123".to_vec(), false)),
                DownloadFrame::Chunk(Chunk::new(2, b"4567".to_vec(), false)),
                DownloadFrame::Chunk(Chunk::new(3, b"89".to_vec(), true)),
            ]
        );
        assert_eq!(hooks.posts(), vec![("a.bin".to_string(), true)]);
    }

    #[tokio::test]
    async fn empty_file_sends_single_last_chunk() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("empty"), b"").unwrap();
        let hooks = RecordingHooks::new(dir.path());

        let (frames, result) = collect(&hooks, DownloadRequest::new("empty", false), 4).await;
        result.unwrap();
        assert_eq!(
            frames,
            vec![DownloadFrame::Chunk(Chunk::new(1, Vec::new(), true))]
        );
    }

    #[tokio::test]
    async fn cancelled_stream_is_aborted_and_runs_post_hook() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("a.bin"), vec![7u8; 40]).unwrap();
        let hooks = RecordingHooks::new(dir.path());
        let cancel = CancellationToken::new();
        let (sink, mut stream) = frame_channel(1);

        let request = DownloadRequest::new("a.bin", false);
        let headers = Headers::new();
        let downloader = Downloader::new(&hooks, 4);
        let (result, first) = tokio::join!(
            downloader.send(&request, &sink, &headers, &cancel),
            async {
                let first = stream.recv().await;
                cancel.cancel();
                first
            }
        );

        assert!(matches!(first, Some(Ok(DownloadFrame::Chunk(_)))));
        assert_eq!(result.unwrap_err().code, Code::Aborted);
        assert_eq!(hooks.posts(), vec![("a.bin".to_string(), false)]);
        drop(stream);
    }

    #[tokio::test]
    async fn missing_file_is_invalid_argument_and_runs_post_hook() {
        let dir = TempDir::new().unwrap();
        let hooks = RecordingHooks::new(dir.path());

        let (frames, result) = collect(&hooks, DownloadRequest::new("nope", false), 4).await;
        assert!(frames.is_empty());
        assert_eq!(result.unwrap_err().code, Code::InvalidArgument);
        assert_eq!(hooks.posts(), vec![("nope".to_string(), false)]);
    }

    #[tokio::test]
    async fn refusal_and_header_rejection() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("a.bin"), b"x").unwrap();

        let mut hooks = RecordingHooks::new(dir.path());
        hooks.refuse = true;
        let (frames, result) = collect(&hooks, DownloadRequest::new("a.bin", false), 4).await;
        assert!(frames.is_empty());
        assert_eq!(result.unwrap_err().code, Code::FailedPrecondition);
        assert!(hooks.posts().is_empty());

        let mut hooks = RecordingHooks::new(dir.path());
        hooks.reject_headers = true;
        let (_, result) = collect(&hooks, DownloadRequest::new("a.bin", false), 4).await;
        assert_eq!(result.unwrap_err().code, Code::Unauthenticated);
    }

    #[tokio::test]
    async fn post_hook_veto_after_success_is_aborted() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("a.bin"), b"x").unwrap();
        let mut hooks = RecordingHooks::new(dir.path());
        hooks.veto = true;

        let (_, result) = collect(&hooks, DownloadRequest::new("a.bin", false), 4).await;
        let err = result.unwrap_err();
        assert_eq!(err.code, Code::Aborted);
        assert!(err.message.contains("quota exceeded"));

        // A genuine failure keeps its own status.
        let (_, result) = collect(&hooks, DownloadRequest::new("missing", false), 4).await;
        assert_eq!(result.unwrap_err().code, Code::InvalidArgument);
    }

    // -- client side ------------------------------------------------------

    /// Plays back a fixed download stream, optionally holding it open until
    /// the call is cancelled.
    struct ScriptedChannel {
        frames: Vec<Result<DownloadFrame, Status>>,
        hold_open: bool,
        cancelled: Arc<AtomicBool>,
    }

    impl ScriptedChannel {
        fn new(frames: Vec<Result<DownloadFrame, Status>>) -> Self {
            Self {
                frames,
                hold_open: false,
                cancelled: Arc::new(AtomicBool::new(false)),
            }
        }
    }

    impl Channel for ScriptedChannel {
        fn open_upload<'a>(&'a self, _headers: Headers) -> ChannelFuture<'a, UploadCall> {
            Box::pin(async { Err(Status::unavailable("downloads only")) })
        }

        fn open_download<'a>(
            &'a self,
            _request: DownloadRequest,
            _headers: Headers,
        ) -> ChannelFuture<'a, DownloadCall> {
            let frames = self.frames.clone();
            let hold_open = self.hold_open;
            let cancelled = Arc::clone(&self.cancelled);
            Box::pin(async move {
                let (tx, responses): (_, FrameStream<DownloadFrame>) = mpsc::channel(64);
                let cancel = CancellationToken::new();
                let server_cancel = cancel.clone();
                tokio::spawn(async move {
                    for frame in frames {
                        let _ = tx.send(frame).await;
                    }
                    if hold_open {
                        server_cancel.cancelled().await;
                        cancelled.store(true, Ordering::SeqCst);
                    }
                });
                Ok(DownloadCall { responses, cancel })
            })
        }

        fn info<'a>(&'a self) -> ChannelFuture<'a, ServiceInfo> {
            Box::pin(async { Ok(ServiceInfo::default()) })
        }
    }

    fn data(id: u64, content: &[u8], is_last: bool) -> Result<DownloadFrame, Status> {
        Ok(DownloadFrame::Chunk(Chunk::new(id, content.to_vec(), is_last)))
    }

    #[tokio::test]
    async fn client_rebuilds_and_verifies() {
        let dir = TempDir::new().unwrap();
        let dest = dir.path().join("out/file.bin");
        let channel = ScriptedChannel::new(vec![
            Ok(DownloadFrame::Digest(digest_bytes(b"abcdef"))),
            data(1, b"abc", false),
            data(2, b"def", true),
        ]);

        let opts = TransferOptions::new().verify(true);
        let outcome = DownloadReceiver::new(&channel)
            .download("file", &dest, &opts)
            .await
            .unwrap();
        assert!(outcome.success);
        assert_eq!(outcome.digest, Some(digest_bytes(b"abcdef")));
        assert_eq!(std::fs::read(&dest).unwrap(), b"abcdef");
    }

    #[tokio::test]
    async fn client_detects_single_byte_difference() {
        let dir = TempDir::new().unwrap();
        let dest = dir.path().join("file.bin");
        let channel = ScriptedChannel::new(vec![
            Ok(DownloadFrame::Digest(digest_bytes(b"abcdef"))),
            data(1, b"abcdeF", true),
        ]);

        let opts = TransferOptions::new().verify(true);
        let err = DownloadReceiver::new(&channel)
            .download("file", &dest, &opts)
            .await
            .unwrap_err();
        match err {
            TransferError::IntegrityMismatch { local, remote, .. } => {
                assert_eq!(local, digest_bytes(b"abcdeF"));
                assert_eq!(remote, digest_bytes(b"abcdef"));
            }
            other => panic!("expected mismatch, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn truncated_stream_removes_destination() {
        let dir = TempDir::new().unwrap();
        let dest = dir.path().join("file.bin");
        let channel = ScriptedChannel::new(vec![data(1, b"abc", false)]);

        let err = DownloadReceiver::new(&channel)
            .download("file", &dest, &TransferOptions::new())
            .await
            .unwrap_err();
        assert!(matches!(err, TransferError::Failed { .. }));
        assert!(!dest.exists());
    }

    #[tokio::test]
    async fn remote_failure_removes_destination() {
        let dir = TempDir::new().unwrap();
        let dest = dir.path().join("file.bin");
        let channel = ScriptedChannel::new(vec![Err(Status::failed_precondition(
            "unknown identifier 'abc'",
        ))]);

        let err = DownloadReceiver::new(&channel)
            .download("abc", &dest, &TransferOptions::new())
            .await
            .unwrap_err();
        assert_eq!(err.code(), Some(Code::FailedPrecondition));
        assert!(!dest.exists());
    }

    #[tokio::test]
    async fn late_digest_is_rejected() {
        let dir = TempDir::new().unwrap();
        let dest = dir.path().join("file.bin");
        let channel = ScriptedChannel::new(vec![
            data(1, b"abc", false),
            Ok(DownloadFrame::Digest(digest_bytes(b"abc"))),
            data(2, b"", true),
        ]);

        let err = DownloadReceiver::new(&channel)
            .download("file", &dest, &TransferOptions::new())
            .await
            .unwrap_err();
        assert!(matches!(err, TransferError::Failed { .. }));
        assert!(!dest.exists());
    }

    #[tokio::test]
    async fn unwritable_destination_is_access_denied() {
        let dir = TempDir::new().unwrap();
        let blocker = dir.path().join("blocker");
        std::fs::write(&blocker, b"file, not a directory").unwrap();
        let mut channel = ScriptedChannel::new(vec![data(1, b"x", true)]);
        channel.hold_open = true;

        let err = DownloadReceiver::new(&channel)
            .download("file", &blocker.join("file.bin"), &TransferOptions::new())
            .await
            .unwrap_err();
        assert!(matches!(err, TransferError::AccessDenied { .. }));

        // The abandoned call is cancelled so the server side can settle.
        for _ in 0..100 {
            if channel.cancelled.load(Ordering::SeqCst) {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        assert!(channel.cancelled.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn cancellation_keeps_partial_file() {
        let dir = TempDir::new().unwrap();
        let dest = dir.path().join("file.bin");
        let mut channel = ScriptedChannel::new(vec![data(1, b"abc", false)]);
        channel.hold_open = true;

        let cancel = CancellationToken::new();
        let (progress_tx, mut progress_rx) = mpsc::channel(4);
        let opts = TransferOptions::new()
            .verify(true)
            .cancel_token(cancel.clone())
            .progress(progress_tx);

        let receiver = DownloadReceiver::new(&channel);
        let (result, _) = tokio::join!(receiver.download("file", &dest, &opts), async {
            let progress = progress_rx.recv().await.unwrap();
            assert_eq!(progress.transferred, 3);
            cancel.cancel();
        });

        assert!(matches!(result, Err(TransferError::Cancelled { .. })));
        assert_eq!(std::fs::read(&dest).unwrap(), b"abc");

        // The server side observes the cancellation.
        for _ in 0..100 {
            if channel.cancelled.load(Ordering::SeqCst) {
                break;
            }
            tokio::task::yield_now().await;
        }
        assert!(channel.cancelled.load(Ordering::SeqCst));
    }
}
