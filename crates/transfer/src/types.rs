use streamfile_protocol::{CHUNK_SIZE, Headers, MAX_CHUNK_SIZE};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Terminal result of a transfer, built once all hooks have run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferOutcome {
    pub success: bool,
    pub digest: Option<String>,
    pub message: Option<String>,
}

impl TransferOutcome {
    pub fn succeeded(digest: Option<String>) -> Self {
        Self {
            success: true,
            digest,
            message: None,
        }
    }
}

/// Progress snapshot reported after every chunk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Progress {
    pub identifier: String,
    /// Payload bytes transferred so far.
    pub transferred: u64,
    /// Total size, when known up front (uploads).
    pub total: Option<u64>,
}

impl Progress {
    /// Completion in percent, when the total is known.
    pub fn percentage(&self) -> Option<f64> {
        match self.total {
            Some(0) => Some(100.0),
            Some(total) => Some(self.transferred as f64 / total as f64 * 100.0),
            None => None,
        }
    }
}

/// Per-call options for the client pipelines.
#[derive(Debug, Clone)]
pub struct TransferOptions {
    pub verify: bool,
    /// Extra headers sent with the call.
    pub headers: Headers,
    pub cancel: CancellationToken,
    pub progress: Option<mpsc::Sender<Progress>>,
    /// Block size used when sending.
    pub chunk_size: usize,
    /// Largest chunk accepted when receiving.
    pub max_chunk_size: usize,
}

impl Default for TransferOptions {
    fn default() -> Self {
        Self {
            verify: false,
            headers: Headers::new(),
            cancel: CancellationToken::new(),
            progress: None,
            chunk_size: CHUNK_SIZE,
            max_chunk_size: MAX_CHUNK_SIZE,
        }
    }
}

impl TransferOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn verify(mut self, verify: bool) -> Self {
        self.verify = verify;
        self
    }

    pub fn header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.append(key, value);
        self
    }

    pub fn headers(mut self, headers: Headers) -> Self {
        self.headers.extend(&headers);
        self
    }

    pub fn cancel_token(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn progress(mut self, tx: mpsc::Sender<Progress>) -> Self {
        self.progress = Some(tx);
        self
    }

    pub fn chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size;
        self
    }

    pub fn max_chunk_size(mut self, max_chunk_size: usize) -> Self {
        self.max_chunk_size = max_chunk_size;
        self
    }

    /// Reports progress without blocking; snapshots are dropped when the
    /// receiver lags.
    pub(crate) fn report(&self, identifier: &str, transferred: u64, total: Option<u64>) {
        if let Some(tx) = &self.progress {
            let _ = tx.try_send(Progress {
                identifier: identifier.to_string(),
                transferred,
                total,
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_sets_fields() {
        let cancel = CancellationToken::new();
        let opts = TransferOptions::new()
            .verify(true)
            .header("authorization", "Bearer x")
            .headers(Headers::new().with("x-trace", "1"))
            .cancel_token(cancel.clone())
            .chunk_size(4096);

        assert!(opts.verify);
        assert_eq!(opts.headers.len(), 2);
        assert_eq!(opts.headers.get("x-trace"), Some("1"));
        assert_eq!(opts.chunk_size, 4096);
        assert_eq!(opts.max_chunk_size, MAX_CHUNK_SIZE);
        cancel.cancel();
        assert!(opts.cancel.is_cancelled());
    }

    #[test]
    fn report_drops_when_full() {
        let (tx, mut rx) = mpsc::channel(1);
        let opts = TransferOptions::new().progress(tx);
        opts.report("a", 10, Some(20));
        opts.report("a", 20, Some(20));

        let first = rx.try_recv().unwrap();
        assert_eq!(first.transferred, 10);
        assert_eq!(first.percentage(), Some(50.0));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn percentage_rules() {
        let p = |transferred, total| Progress {
            identifier: "x".into(),
            transferred,
            total,
        };
        assert_eq!(p(0, Some(0)).percentage(), Some(100.0));
        assert_eq!(p(5, None).percentage(), None);
    }
}
