//! Client-side error types.

use std::path::PathBuf;

use streamfile_protocol::{Code, Status};

/// Errors returned to the caller of an upload or download.
#[derive(Debug, thiserror::Error)]
pub enum TransferError {
    #[error("local file not found: {}", .0.display())]
    NotFound(PathBuf),

    #[error("cannot write {}: {source}", path.display())]
    AccessDenied {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("identifier must not be blank")]
    InvalidIdentifier,

    #[error("integrity check failed for {}: local digest {local}, remote digest {remote}", file.display())]
    IntegrityMismatch {
        file: PathBuf,
        local: String,
        remote: String,
    },

    /// The server (or the transport) answered with a failure status.
    #[error("transfer of '{identifier}' ({}) failed: {status}", path.display())]
    Remote {
        identifier: String,
        path: PathBuf,
        status: Status,
    },

    /// The transfer ended without a confirmed completion.
    #[error("transfer of '{identifier}' ({}) failed: {message}", path.display())]
    Failed {
        identifier: String,
        path: PathBuf,
        message: String,
    },

    #[error("transfer of '{identifier}' cancelled")]
    Cancelled { identifier: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl TransferError {
    /// Remote status code, when the failure came from the other side.
    pub fn code(&self) -> Option<Code> {
        match self {
            TransferError::Remote { status, .. } => Some(status.code),
            _ => None,
        }
    }

    pub(crate) fn remote(identifier: &str, path: &std::path::Path, status: Status) -> Self {
        TransferError::Remote {
            identifier: identifier.to_string(),
            path: path.to_path_buf(),
            status,
        }
    }

    pub(crate) fn failed(
        identifier: &str,
        path: &std::path::Path,
        message: impl Into<String>,
    ) -> Self {
        TransferError::Failed {
            identifier: identifier.to_string(),
            path: path.to_path_buf(),
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn remote_exposes_code() {
        let err = TransferError::remote(
            "abc",
            std::path::Path::new("/tmp/out.bin"),
            Status::failed_precondition("unknown identifier"),
        );
        assert_eq!(err.code(), Some(Code::FailedPrecondition));
        assert!(err.to_string().contains("'abc'"));
        assert!(err.to_string().contains("unknown identifier"));
    }

    #[test]
    fn mismatch_names_both_digests() {
        let err = TransferError::IntegrityMismatch {
            file: PathBuf::from("data.bin"),
            local: "aaaa".into(),
            remote: "bbbb".into(),
        };
        let msg = err.to_string();
        assert!(msg.contains("data.bin"));
        assert!(msg.contains("aaaa"));
        assert!(msg.contains("bbbb"));
        assert_eq!(err.code(), None);
    }
}
