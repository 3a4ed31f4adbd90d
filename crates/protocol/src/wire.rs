//! Length-prefixed wire format for the TCP transport.
//!
//! # Wire format
//!
//! ```text
//! MESSAGE:
//!   [4 bytes BE: header_len]
//!   [header_len bytes: JSON header, internally tagged by "type"]
//!   [4 bytes BE: payload_len]
//!   [payload_len bytes: raw chunk content, empty for other messages]
//!
//! CALL (client opens, one call per connection):
//!   upload:   call, identifier, chunk*, verify, end | cancel
//!             <- upload_response | status
//!   download: call, download_request
//!             <- digest?, chunk+, end | status
//!   info:     call
//!             <- info | status
//! ```
//!
//! A clean EOF exactly at a message boundary reads as `None`.

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::constants::{MAX_HEADER_SIZE, Method};
use crate::headers::Headers;
use crate::messages::{
    Chunk, DownloadFrame, DownloadRequest, ServiceInfo, UploadFrame, UploadResponse,
};
use crate::status::Status;

/// Errors produced by the wire codec.
#[derive(Debug, thiserror::Error)]
pub enum WireError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid header JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("header too large: {len} bytes (max {max})")]
    HeaderTooLarge { len: usize, max: usize },

    #[error("payload too large: {len} bytes (max {max})")]
    PayloadTooLarge { len: usize, max: usize },

    #[error("unexpected payload on {kind} message")]
    UnexpectedPayload { kind: &'static str },
}

/// Any message that can travel over a streamfile connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WireMessage {
    Call { method: Method, headers: Headers },
    Identifier(String),
    Chunk(Chunk),
    Verify(bool),
    DownloadRequest(DownloadRequest),
    Digest(String),
    UploadResponse(UploadResponse),
    Info(ServiceInfo),
    Status(Status),
    Cancel,
    End,
}

impl WireMessage {
    pub fn kind(&self) -> &'static str {
        match self {
            WireMessage::Call { .. } => "call",
            WireMessage::Identifier(_) => "identifier",
            WireMessage::Chunk(_) => "chunk",
            WireMessage::Verify(_) => "verify",
            WireMessage::DownloadRequest(_) => "download_request",
            WireMessage::Digest(_) => "digest",
            WireMessage::UploadResponse(_) => "upload_response",
            WireMessage::Info(_) => "info",
            WireMessage::Status(_) => "status",
            WireMessage::Cancel => "cancel",
            WireMessage::End => "end",
        }
    }

    /// Converts into an upload frame, handing the message back if it is not one.
    pub fn into_upload_frame(self) -> Result<UploadFrame, WireMessage> {
        match self {
            WireMessage::Identifier(id) => Ok(UploadFrame::Identifier(id)),
            WireMessage::Chunk(chunk) => Ok(UploadFrame::Chunk(chunk)),
            WireMessage::Verify(requested) => Ok(UploadFrame::Verify(requested)),
            other => Err(other),
        }
    }

    /// Converts into a download frame, handing the message back if it is not one.
    pub fn into_download_frame(self) -> Result<DownloadFrame, WireMessage> {
        match self {
            WireMessage::Digest(digest) => Ok(DownloadFrame::Digest(digest)),
            WireMessage::Chunk(chunk) => Ok(DownloadFrame::Chunk(chunk)),
            other => Err(other),
        }
    }
}

impl From<UploadFrame> for WireMessage {
    fn from(frame: UploadFrame) -> Self {
        match frame {
            UploadFrame::Identifier(id) => WireMessage::Identifier(id),
            UploadFrame::Chunk(chunk) => WireMessage::Chunk(chunk),
            UploadFrame::Verify(requested) => WireMessage::Verify(requested),
        }
    }
}

impl From<DownloadFrame> for WireMessage {
    fn from(frame: DownloadFrame) -> Self {
        match frame {
            DownloadFrame::Digest(digest) => WireMessage::Digest(digest),
            DownloadFrame::Chunk(chunk) => WireMessage::Chunk(chunk),
        }
    }
}

impl From<Status> for WireMessage {
    fn from(status: Status) -> Self {
        WireMessage::Status(status)
    }
}

/// JSON part of a message. Chunk content travels in the payload section.
#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum Header {
    Call {
        method: Method,
        #[serde(default, skip_serializing_if = "Headers::is_empty")]
        headers: Headers,
    },
    Identifier {
        identifier: String,
    },
    #[serde(rename_all = "camelCase")]
    Chunk {
        id: u64,
        is_last: bool,
    },
    Verify {
        requested: bool,
    },
    DownloadRequest(DownloadRequest),
    Digest {
        digest: String,
    },
    UploadResponse(UploadResponse),
    Info(ServiceInfo),
    Status(Status),
    Cancel,
    End,
}

/// Writes one message. Does not flush.
pub async fn write_message<W: AsyncWrite + Unpin>(
    writer: &mut W,
    msg: &WireMessage,
) -> Result<(), WireError> {
    let header = match msg {
        WireMessage::Call { method, headers } => Header::Call {
            method: *method,
            headers: headers.clone(),
        },
        WireMessage::Identifier(identifier) => Header::Identifier {
            identifier: identifier.clone(),
        },
        WireMessage::Chunk(chunk) => Header::Chunk {
            id: chunk.id,
            is_last: chunk.is_last,
        },
        WireMessage::Verify(requested) => Header::Verify {
            requested: *requested,
        },
        WireMessage::DownloadRequest(req) => Header::DownloadRequest(req.clone()),
        WireMessage::Digest(digest) => Header::Digest {
            digest: digest.clone(),
        },
        WireMessage::UploadResponse(resp) => Header::UploadResponse(resp.clone()),
        WireMessage::Info(info) => Header::Info(info.clone()),
        WireMessage::Status(status) => Header::Status(status.clone()),
        WireMessage::Cancel => Header::Cancel,
        WireMessage::End => Header::End,
    };
    let payload: &[u8] = match msg {
        WireMessage::Chunk(chunk) => &chunk.content,
        _ => &[],
    };

    let header_json = serde_json::to_vec(&header)?;
    if header_json.len() > MAX_HEADER_SIZE {
        return Err(WireError::HeaderTooLarge {
            len: header_json.len(),
            max: MAX_HEADER_SIZE,
        });
    }
    let payload_len = u32::try_from(payload.len()).map_err(|_| WireError::PayloadTooLarge {
        len: payload.len(),
        max: u32::MAX as usize,
    })?;

    writer.write_u32(header_json.len() as u32).await?;
    writer.write_all(&header_json).await?;
    writer.write_u32(payload_len).await?;
    writer.write_all(payload).await?;
    Ok(())
}

/// Reads one message, rejecting payloads larger than `max_payload`.
///
/// Returns `None` on a clean EOF before the first byte of a message.
pub async fn read_message<R: AsyncRead + Unpin>(
    reader: &mut R,
    max_payload: usize,
) -> Result<Option<WireMessage>, WireError> {
    let mut len_buf = [0u8; 4];
    let n = reader.read(&mut len_buf[..1]).await?;
    if n == 0 {
        return Ok(None);
    }
    reader.read_exact(&mut len_buf[1..]).await?;
    let header_len = u32::from_be_bytes(len_buf) as usize;
    if header_len > MAX_HEADER_SIZE {
        return Err(WireError::HeaderTooLarge {
            len: header_len,
            max: MAX_HEADER_SIZE,
        });
    }

    let mut header_buf = vec![0u8; header_len];
    reader.read_exact(&mut header_buf).await?;
    let header: Header = serde_json::from_slice(&header_buf)?;

    let payload_len = reader.read_u32().await? as usize;
    if payload_len > max_payload {
        return Err(WireError::PayloadTooLarge {
            len: payload_len,
            max: max_payload,
        });
    }
    let mut payload = vec![0u8; payload_len];
    reader.read_exact(&mut payload).await?;

    let msg = match header {
        Header::Chunk { id, is_last } => {
            return Ok(Some(WireMessage::Chunk(Chunk::new(id, payload, is_last))));
        }
        Header::Call { method, headers } => WireMessage::Call { method, headers },
        Header::Identifier { identifier } => WireMessage::Identifier(identifier),
        Header::Verify { requested } => WireMessage::Verify(requested),
        Header::DownloadRequest(req) => WireMessage::DownloadRequest(req),
        Header::Digest { digest } => WireMessage::Digest(digest),
        Header::UploadResponse(resp) => WireMessage::UploadResponse(resp),
        Header::Info(info) => WireMessage::Info(info),
        Header::Status(status) => WireMessage::Status(status),
        Header::Cancel => WireMessage::Cancel,
        Header::End => WireMessage::End,
    };

    if !payload.is_empty() {
        return Err(WireError::UnexpectedPayload { kind: msg.kind() });
    }
    Ok(Some(msg))
}
