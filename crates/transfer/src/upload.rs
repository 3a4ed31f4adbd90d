//! Upload pipeline: [`Uploader`] streams a local file to the server,
//! [`UploadReceiver`] stores it on the server side.

use std::path::Path;

use streamfile_protocol::{Chunk, Headers, Status, UploadFrame, UploadResponse};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::channel::{Channel, FrameStream, UploadCall};
use crate::chunked::{ChunkError, ChunkReader, ChunkWriter};
use crate::digest::{file_digest, verify_file};
use crate::hooks::TransferHooks;
use crate::{TransferError, TransferOptions, TransferOutcome};

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

/// Client side of the upload call.
pub struct Uploader<'c, C: Channel + ?Sized> {
    channel: &'c C,
}

impl<'c, C: Channel + ?Sized> Uploader<'c, C> {
    pub fn new(channel: &'c C) -> Self {
        Self { channel }
    }

    /// Uploads `local_path` under `identifier`.
    ///
    /// With `options.verify` the digest returned by the server is compared
    /// against the local file.
    pub async fn upload(
        &self,
        identifier: &str,
        local_path: &Path,
        options: &TransferOptions,
    ) -> Result<TransferOutcome, TransferError> {
        info!(
            identifier,
            path = %local_path.display(),
            verify = options.verify,
            "upload started"
        );
        let result = self.run(identifier, local_path, options).await;
        match &result {
            Ok(outcome) => info!(identifier, digest = ?outcome.digest, "upload finished"),
            Err(TransferError::Cancelled { .. }) => warn!(identifier, "upload cancelled"),
            Err(e) => error!(identifier, error = %e, "upload failed"),
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
        let mut reader = match ChunkReader::open(local_path, options.chunk_size).await {
            Ok(reader) => reader,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(TransferError::NotFound(local_path.to_path_buf()));
            }
            Err(e) => return Err(e.into()),
        };

        let call = self
            .channel
            .open_upload(options.headers.clone())
            .await
            .map_err(|status| TransferError::remote(identifier, local_path, status))?;
        let UploadCall {
            requests,
            response,
            cancel: call_cancel,
        } = call;

        let cancelled = || {
            call_cancel.cancel();
            TransferError::Cancelled {
                identifier: identifier.to_string(),
            }
        };

        // Every frame goes out in order. A failed send means the server
        // stopped reading; its status then arrives as the response.
        let mut frames_sent = requests
            .send(UploadFrame::Identifier(identifier.to_string()))
            .await
            .is_ok();
        let total = reader.file_size();

        while frames_sent {
            if options.cancel.is_cancelled() {
                return Err(cancelled());
            }
            let Some(chunk) = reader.next_chunk().await? else {
                break;
            };
            let is_last = chunk.is_last;
            tokio::select! {
                biased;
                _ = options.cancel.cancelled() => return Err(cancelled()),
                sent = requests.send(UploadFrame::Chunk(chunk)) => frames_sent = sent.is_ok(),
            }
            options.report(identifier, reader.offset(), Some(total));
            if is_last {
                break;
            }
        }

        if frames_sent {
            // Send errors surface through the response below.
            let _ = requests.send(UploadFrame::Verify(options.verify)).await;
            debug!(
                identifier,
                bytes = total,
                chunks = reader.total_chunks(),
                "upload payload sent"
            );
        }
        drop(requests);

        let response = tokio::select! {
            biased;
            _ = options.cancel.cancelled() => return Err(cancelled()),
            response = response => response,
        };
        let response = match response {
            Ok(Ok(response)) => response,
            Ok(Err(status)) => return Err(TransferError::remote(identifier, local_path, status)),
            Err(_) => {
                return Err(TransferError::failed(
                    identifier,
                    local_path,
                    "call closed without a response",
                ));
            }
        };

        if !options.verify {
            return Ok(TransferOutcome::succeeded(response.digest));
        }
        let Some(remote) = response.digest else {
            return Err(TransferError::failed(
                identifier,
                local_path,
                "verification requested but the server returned no digest",
            ));
        };
        let digest = verify_file(local_path, &remote).await?;
        Ok(TransferOutcome::succeeded(Some(digest)))
    }
}

// ---------------------------------------------------------------------------
// Server
// ---------------------------------------------------------------------------

/// What the data phase of an authorized upload achieved.
struct Written {
    /// The last-flagged chunk was written.
    complete: bool,
    digest: Option<String>,
}

/// Server side of the upload call.
///
/// States: awaiting identifier, writing, verifying, finalizing.
pub struct UploadReceiver<'h, H: TransferHooks> {
    hooks: &'h H,
    max_chunk_size: usize,
}

impl<'h, H: TransferHooks> UploadReceiver<'h, H> {
    pub fn new(hooks: &'h H, max_chunk_size: usize) -> Self {
        Self {
            hooks,
            max_chunk_size,
        }
    }

    /// Consumes one upload stream and produces the call's single response.
    pub async fn receive(
        &self,
        mut frames: FrameStream<UploadFrame>,
        headers: &Headers,
        cancel: &CancellationToken,
    ) -> Result<UploadResponse, Status> {
        let validation = self.hooks.validate_headers(headers).await;
        if !validation.ok {
            let message = validation
                .message
                .unwrap_or_else(|| "header validation failed".into());
            warn!(%message, "upload rejected: headers");
            return Err(Status::unauthenticated(message));
        }

        let identifier = match next_frame(&mut frames, cancel).await? {
            Some(UploadFrame::Identifier(id)) if !id.trim().is_empty() => id,
            Some(UploadFrame::Identifier(_)) => {
                return Err(Status::invalid_argument("identifier must not be blank"));
            }
            Some(other) => {
                return Err(Status::invalid_argument(format!(
                    "expected identifier frame, got {} frame",
                    other.kind()
                )));
            }
            None => return Err(Status::aborted("stream closed before the identifier frame")),
        };

        let pre = self.hooks.pre_upload(&identifier).await;
        if !pre.proceed {
            let message = pre.message.unwrap_or_else(|| "upload refused".into());
            warn!(identifier, %message, "upload refused by pre-upload hook");
            return Err(Status::failed_precondition(message));
        }
        let path = pre.resolved_path;
        info!(identifier, path = %path.display(), "receiving upload");

        let written = self.write(&path, &mut frames, cancel).await;
        self.finalize(&identifier, &path, written).await
    }

    /// Data phase: writing and verifying.
    async fn write(
        &self,
        path: &Path,
        frames: &mut FrameStream<UploadFrame>,
        cancel: &CancellationToken,
    ) -> Result<Written, Status> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await.map_err(|e| {
                Status::internal(format!("cannot create {}: {e}", parent.display()))
            })?;
        }
        let mut writer = ChunkWriter::create(path, self.max_chunk_size)
            .await
            .map_err(|e| Status::internal(format!("cannot open {}: {e}", path.display())))?;

        let mut digest = None;
        let mut verified = false;
        while let Some(frame) = next_frame(frames, cancel).await? {
            if verified {
                return Err(Status::invalid_argument(format!(
                    "{} frame after the verification frame",
                    frame.kind()
                )));
            }
            match frame {
                UploadFrame::Chunk(chunk) => append(&mut writer, &chunk).await?,
                UploadFrame::Verify(_) if writer.chunks_written() == 0 => {
                    return Err(Status::invalid_argument("verify frame before any chunk"));
                }
                UploadFrame::Verify(requested) => {
                    writer.close().await.map_err(|e| Status::internal(e.to_string()))?;
                    verified = true;
                    if requested && writer.is_complete() {
                        digest = Some(
                            file_digest(path)
                                .await
                                .map_err(|e| Status::internal(e.to_string()))?,
                        );
                    }
                }
                UploadFrame::Identifier(_) => {
                    return Err(Status::invalid_argument("duplicate identifier frame"));
                }
            }
        }

        debug!(
            path = %path.display(),
            bytes = writer.bytes_written(),
            chunks = writer.chunks_written(),
            "upload stream ended"
        );
        Ok(Written {
            complete: writer.is_complete(),
            digest,
        })
    }

    /// Runs the post-upload hook exactly once and settles the response.
    async fn finalize(
        &self,
        identifier: &str,
        path: &Path,
        written: Result<Written, Status>,
    ) -> Result<UploadResponse, Status> {
        let success = matches!(&written, Ok(w) if w.complete);
        let post = self.hooks.post_upload(identifier, success).await;

        let outcome = match written {
            Ok(w) if w.complete && post.final_success => {
                info!(identifier, path = %path.display(), "upload stored");
                return Ok(UploadResponse { digest: w.digest });
            }
            Ok(w) if w.complete => {
                let message = post.message.unwrap_or_else(|| "rejected by server".into());
                Status::aborted(format!("upload of '{identifier}' rejected: {message}"))
            }
            Ok(_) => {
                let mut message = format!("upload of '{identifier}' ended before the last chunk");
                if let Some(note) = post.message {
                    message.push_str(": ");
                    message.push_str(&note);
                }
                Status::aborted(message)
            }
            Err(status) => {
                if let Some(note) = post.message {
                    debug!(identifier, %note, "post-upload hook note on failed upload");
                }
                status
            }
        };

        remove_partial(path).await;
        warn!(identifier, status = %outcome, "upload failed");
        Err(outcome)
    }
}

async fn next_frame(
    frames: &mut FrameStream<UploadFrame>,
    cancel: &CancellationToken,
) -> Result<Option<UploadFrame>, Status> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(Status::aborted("transfer cancelled")),
        frame = frames.recv() => frame.transpose(),
    }
}

async fn append(writer: &mut ChunkWriter, chunk: &Chunk) -> Result<(), Status> {
    match writer.append(chunk).await {
        Ok(_) => Ok(()),
        Err(ChunkError::Io(e)) => Err(Status::internal(format!(
            "write to {} failed: {e}",
            writer.path().display()
        ))),
        Err(e) => Err(Status::invalid_argument(e.to_string())),
    }
}

async fn remove_partial(path: &Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => debug!(path = %path.display(), "removed partial upload"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!(path = %path.display(), error = %e, "failed to remove partial upload"),
    }
}
