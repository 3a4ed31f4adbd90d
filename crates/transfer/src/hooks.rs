//! Server-side extension points around the transfer pipelines.
//!
//! The hosting application implements [`TransferHooks`] and injects it
//! into the service. Every hook is called at most once per transfer and may
//! complete synchronously (`Box::pin(async move { .. })` with no awaits) or
//! after real asynchronous work.
//!
//! Call order for one transfer:
//!
//! 1. `validate_headers`
//! 2. `pre_upload` / `pre_download`
//! 3. data phase
//! 4. `post_upload` / `post_download`, on every exit path once step 2 said
//!    proceed
//!
//! Default implementations proceed, succeed, and resolve the identifier to
//! itself.

use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;

use streamfile_protocol::Headers;

/// A boxed future returned by hook methods.
pub type HookFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Outcome of header validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationResult {
    pub ok: bool,
    pub message: Option<String>,
}

impl ValidationResult {
    pub fn ok() -> Self {
        Self {
            ok: true,
            message: None,
        }
    }

    pub fn reject(message: impl Into<String>) -> Self {
        Self {
            ok: false,
            message: Some(message.into()),
        }
    }
}

/// Outcome of a pre-transfer hook.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreHookResult {
    pub proceed: bool,
    /// Local path the transfer reads from or writes to.
    pub resolved_path: PathBuf,
    pub message: Option<String>,
}

impl PreHookResult {
    pub fn proceed(path: impl Into<PathBuf>) -> Self {
        Self {
            proceed: true,
            resolved_path: path.into(),
            message: None,
        }
    }

    pub fn refuse(message: impl Into<String>) -> Self {
        Self {
            proceed: false,
            resolved_path: PathBuf::new(),
            message: Some(message.into()),
        }
    }
}

/// Outcome of a post-transfer hook: the authoritative final verdict.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PostHookResult {
    pub final_success: bool,
    pub message: Option<String>,
}

impl PostHookResult {
    /// Keeps the pipeline's own verdict.
    pub fn accept(success: bool) -> Self {
        Self {
            final_success: success,
            message: None,
        }
    }

    pub fn veto(message: impl Into<String>) -> Self {
        Self {
            final_success: false,
            message: Some(message.into()),
        }
    }
}

/// Capability interface implemented by the hosting application.
pub trait TransferHooks: Send + Sync + 'static {
    /// Called once per transfer before any other hook.
    fn validate_headers<'a>(&'a self, headers: &'a Headers) -> HookFuture<'a, ValidationResult> {
        let _ = headers;
        Box::pin(async { ValidationResult::ok() })
    }

    /// Authorizes an upload and resolves where it is stored.
    fn pre_upload<'a>(&'a self, identifier: &'a str) -> HookFuture<'a, PreHookResult> {
        Box::pin(async move { PreHookResult::proceed(identifier) })
    }

    /// Authorizes a download and resolves which file is sent.
    fn pre_download<'a>(&'a self, identifier: &'a str) -> HookFuture<'a, PreHookResult> {
        Box::pin(async move { PreHookResult::proceed(identifier) })
    }

    /// Called exactly once after an authorized upload, on every exit path.
    fn post_upload<'a>(
        &'a self,
        identifier: &'a str,
        success: bool,
    ) -> HookFuture<'a, PostHookResult> {
        let _ = identifier;
        Box::pin(async move { PostHookResult::accept(success) })
    }

    /// Called exactly once after an authorized download, on every exit path.
    fn post_download<'a>(
        &'a self,
        identifier: &'a str,
        success: bool,
    ) -> HookFuture<'a, PostHookResult> {
        let _ = identifier;
        Box::pin(async move { PostHookResult::accept(success) })
    }
}

/// Hooks with the default behaviour everywhere.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopHooks;

impl TransferHooks for NoopHooks {}

impl<H: TransferHooks> TransferHooks for std::sync::Arc<H> {
    fn validate_headers<'a>(&'a self, headers: &'a Headers) -> HookFuture<'a, ValidationResult> {
        (**self).validate_headers(headers)
    }

    fn pre_upload<'a>(&'a self, identifier: &'a str) -> HookFuture<'a, PreHookResult> {
        (**self).pre_upload(identifier)
    }

    fn pre_download<'a>(&'a self, identifier: &'a str) -> HookFuture<'a, PreHookResult> {
        (**self).pre_download(identifier)
    }

    fn post_upload<'a>(
        &'a self,
        identifier: &'a str,
        success: bool,
    ) -> HookFuture<'a, PostHookResult> {
        (**self).post_upload(identifier, success)
    }

    fn post_download<'a>(
        &'a self,
        identifier: &'a str,
        success: bool,
    ) -> HookFuture<'a, PostHookResult> {
        (**self).post_download(identifier, success)
    }
}
