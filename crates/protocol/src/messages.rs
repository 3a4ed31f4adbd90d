use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Payload unit
// ---------------------------------------------------------------------------

/// One slice of file content.
///
/// Ids are 1-based and increase by exactly one per chunk within a transfer.
/// Exactly one chunk of a transfer has `is_last` set, and it carries the
/// final bytes of the file (possibly none, for an empty file).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    pub id: u64,
    pub content: Vec<u8>,
    pub is_last: bool,
}

impl Chunk {
    pub fn new(id: u64, content: Vec<u8>, is_last: bool) -> Self {
        Self {
            id,
            content,
            is_last,
        }
    }

    pub fn len(&self) -> usize {
        self.content.len()
    }

    pub fn is_empty(&self) -> bool {
        self.content.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Upload (client -> server)
// ---------------------------------------------------------------------------

/// A frame of the upload request stream.
///
/// Order: one `Identifier`, one or more `Chunk`s, then optionally one
/// `Verify` which ends the payload phase.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UploadFrame {
    Identifier(String),
    Chunk(Chunk),
    Verify(bool),
}

impl UploadFrame {
    /// Short name used in diagnostics.
    pub fn kind(&self) -> &'static str {
        match self {
            UploadFrame::Identifier(_) => "identifier",
            UploadFrame::Chunk(_) => "chunk",
            UploadFrame::Verify(_) => "verify",
        }
    }
}

/// The single response closing an upload call.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadResponse {
    /// Digest of the stored file, present when verification was requested.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub digest: Option<String>,
}

// ---------------------------------------------------------------------------
// Download (server -> client)
// ---------------------------------------------------------------------------

/// The single request opening a download call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DownloadRequest {
    pub identifier: String,
    #[serde(default)]
    pub verify: bool,
}

impl DownloadRequest {
    pub fn new(identifier: impl Into<String>, verify: bool) -> Self {
        Self {
            identifier: identifier.into(),
            verify,
        }
    }
}

/// A frame of the download response stream.
///
/// At most one `Digest`, always before the first `Chunk`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DownloadFrame {
    Digest(String),
    Chunk(Chunk),
}

impl DownloadFrame {
    pub fn kind(&self) -> &'static str {
        match self {
            DownloadFrame::Digest(_) => "digest",
            DownloadFrame::Chunk(_) => "chunk",
        }
    }
}

// ---------------------------------------------------------------------------
// Info
// ---------------------------------------------------------------------------

/// Answer to the informational call, supplied by the hosting service.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceInfo {
    pub name: String,
    pub description: String,
    pub version: String,
}
