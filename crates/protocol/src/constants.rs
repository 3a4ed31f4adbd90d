use serde::{Deserialize, Serialize};

/// Block size used by senders when slicing a file into chunks (1 MiB).
///
/// Receivers do not depend on it: any chunk up to [`MAX_CHUNK_SIZE`] is
/// accepted.
pub const CHUNK_SIZE: usize = 1024 * 1024;

/// Largest chunk payload a receiver accepts by default (16 MiB).
pub const MAX_CHUNK_SIZE: usize = 16 * 1024 * 1024;

/// Largest JSON header accepted by the wire codec.
pub const MAX_HEADER_SIZE: usize = 1024 * 1024;

/// Header carrying the bearer token checked by header validation.
pub const AUTHORIZATION_HEADER: &str = "authorization";

/// RPC methods exposed by a streamfile service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Method {
    /// Bidirectional stream: client sends frames, server answers once.
    Upload,
    /// Server stream: one request, a stream of frames back.
    Download,
    /// Unary informational call.
    Info,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Upload => "upload",
            Method::Download => "download",
            Method::Info => "info",
        }
    }
}

impl std::fmt::Display for Method {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn method_serializes_snake_case() {
        let json = serde_json::to_string(&Method::Download).unwrap();
        assert_eq!(json, "\"download\"");
        let parsed: Method = serde_json::from_str("\"upload\"").unwrap();
        assert_eq!(parsed, Method::Upload);
    }

    #[test]
    fn chunk_size_is_below_receiver_limit() {
        assert!(CHUNK_SIZE <= MAX_CHUNK_SIZE);
    }
}
