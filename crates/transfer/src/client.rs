use std::path::Path;

use streamfile_protocol::{ServiceInfo, Status};

use crate::channel::Channel;
use crate::download::DownloadReceiver;
use crate::upload::Uploader;
use crate::{TransferError, TransferOptions, TransferOutcome};

/// Convenience client owning a channel.
pub struct TransferClient<C: Channel> {
    channel: C,
}

impl<C: Channel> TransferClient<C> {
    pub fn new(channel: C) -> Self {
        Self { channel }
    }

    pub fn channel(&self) -> &C {
        &self.channel
    }

    pub async fn upload(
        &self,
        identifier: &str,
        local_path: &Path,
        options: &TransferOptions,
    ) -> Result<TransferOutcome, TransferError> {
        Uploader::new(&self.channel)
            .upload(identifier, local_path, options)
            .await
    }

    pub async fn download(
        &self,
        identifier: &str,
        local_path: &Path,
        options: &TransferOptions,
    ) -> Result<TransferOutcome, TransferError> {
        DownloadReceiver::new(&self.channel)
            .download(identifier, local_path, options)
            .await
    }

    pub async fn info(&self) -> Result<ServiceInfo, Status> {
        self.channel.info().await
    }
}
