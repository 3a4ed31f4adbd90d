//! Hooks storing transfers below a root directory.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use streamfile_protocol::Headers;
use tokio::sync::Mutex;
use tracing::debug;

use crate::hooks::{HookFuture, PostHookResult, PreHookResult, TransferHooks, ValidationResult};
use crate::token::{bearer_token, tokens_match};
use crate::validation::validate_relative_path;

/// Maps identifiers to files below `root`, optionally behind a bearer token.
///
/// Only one upload per path may be in flight; downloads of a path that is
/// being uploaded are refused.
pub struct DirectoryHooks {
    root: PathBuf,
    token: Option<String>,
    uploads: Mutex<HashSet<PathBuf>>,
}

impl DirectoryHooks {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            token: None,
            uploads: Mutex::new(HashSet::new()),
        }
    }

    /// Requires `authorization: Bearer <token>` on every call.
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path an identifier is stored at.
    pub fn resolve(&self, identifier: &str) -> Result<PathBuf, String> {
        validate_relative_path(identifier).map_err(|e| e.to_string())?;
        Ok(self.root.join(identifier))
    }

    /// Number of uploads currently in flight.
    pub async fn active_uploads(&self) -> usize {
        self.uploads.lock().await.len()
    }
}

impl TransferHooks for DirectoryHooks {
    fn validate_headers<'a>(&'a self, headers: &'a Headers) -> HookFuture<'a, ValidationResult> {
        Box::pin(async move {
            let Some(expected) = &self.token else {
                return ValidationResult::ok();
            };
            match bearer_token(headers) {
                Some(received) if tokens_match(received, expected) => ValidationResult::ok(),
                Some(_) => ValidationResult::reject("invalid token"),
                None => ValidationResult::reject("missing bearer token"),
            }
        })
    }

    fn pre_upload<'a>(&'a self, identifier: &'a str) -> HookFuture<'a, PreHookResult> {
        Box::pin(async move {
            let path = match self.resolve(identifier) {
                Ok(path) => path,
                Err(message) => return PreHookResult::refuse(message),
            };
            if !self.uploads.lock().await.insert(path.clone()) {
                return PreHookResult::refuse(format!(
                    "upload of '{identifier}' already in progress"
                ));
            }
            debug!(identifier, path = %path.display(), "upload slot taken");
            PreHookResult::proceed(path)
        })
    }

    fn pre_download<'a>(&'a self, identifier: &'a str) -> HookFuture<'a, PreHookResult> {
        Box::pin(async move {
            let path = match self.resolve(identifier) {
                Ok(path) => path,
                Err(message) => return PreHookResult::refuse(message),
            };
            if self.uploads.lock().await.contains(&path) {
                return PreHookResult::refuse(format!("'{identifier}' is being uploaded"));
            }
            if !tokio::fs::try_exists(&path).await.unwrap_or(false) {
                return PreHookResult::refuse(format!("unknown identifier '{identifier}'"));
            }
            PreHookResult::proceed(path)
        })
    }

    fn post_upload<'a>(
        &'a self,
        identifier: &'a str,
        success: bool,
    ) -> HookFuture<'a, PostHookResult> {
        Box::pin(async move {
            if let Ok(path) = self.resolve(identifier) {
                self.uploads.lock().await.remove(&path);
                debug!(identifier, success, "upload slot released");
            }
            PostHookResult::accept(success)
        })
    }
}
