use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use infera_core::{DownloadError, ObjectStorePort};

use super::{TransferContext, TransferStrategy, write_stream};

/// Streams an object through the injected store client.
pub struct ObjectStoreTransfer {
    client: Arc<dyn ObjectStorePort>,
    bucket: String,
    key: String,
}

impl ObjectStoreTransfer {
    pub fn new(client: Arc<dyn ObjectStorePort>, bucket: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            client,
            bucket: bucket.into(),
            key: key.into(),
        }
    }
}

#[async_trait]
impl TransferStrategy for ObjectStoreTransfer {
    async fn transfer(&self, ctx: &TransferContext) -> Result<u64, DownloadError> {
        ctx.checkpoint()?;
        let opened = async {
            let total = self.client.head_object(&self.bucket, &self.key).await?;
            let body = self.client.get_object(&self.bucket, &self.key).await?;
            Ok::<_, infera_core::ObjectStoreError>((total, body))
        };
        let (total, body) = tokio::select! {
            biased;
            () = ctx.cancel.cancelled() => return Err(DownloadError::Cancelled),
            opened = opened => opened.map_err(|e| DownloadError::transfer(e.to_string()))?,
        };
        debug!(bucket = %self.bucket, key = %self.key, total, "Object opened");
        write_stream(body, ctx, total).await
    }
}
