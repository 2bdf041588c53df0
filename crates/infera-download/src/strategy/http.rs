use async_trait::async_trait;
use tracing::debug;

use infera_core::DownloadError;

use super::{TransferContext, TransferStrategy, write_stream};

/// Streams an HTTP(S) response body.
pub struct UrlTransfer {
    client: reqwest::Client,
    url: url::Url,
}

impl UrlTransfer {
    pub const fn new(client: reqwest::Client, url: url::Url) -> Self {
        Self { client, url }
    }
}

#[async_trait]
impl TransferStrategy for UrlTransfer {
    async fn transfer(&self, ctx: &TransferContext) -> Result<u64, DownloadError> {
        ctx.checkpoint()?;
        let request = self.client.get(self.url.clone()).send();
        let response = tokio::select! {
            biased;
            () = ctx.cancel.cancelled() => return Err(DownloadError::Cancelled),
            response = request => response,
        }
        .and_then(reqwest::Response::error_for_status)
        .map_err(|e| DownloadError::transfer(e.to_string()))?;

        let total = response.content_length().unwrap_or(0);
        debug!(url = %self.url, total, "Response received");
        write_stream(response.bytes_stream(), ctx, total).await
    }
}
