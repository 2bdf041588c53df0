use futures_util::{Stream, StreamExt};
use tokio::fs::File;
use tokio::io::AsyncWriteExt;

use infera_core::DownloadError;

use super::TransferContext;
use crate::progress::TransferProgress;

/// Drain a byte stream into the staging file.
///
/// Cancellation is observed between chunks. `total` is `0` when unknown.
/// The staging file is left behind on failure; cleanup belongs to the caller.
pub async fn write_stream<S, B, E>(
    stream: S,
    ctx: &TransferContext,
    total: u64,
) -> Result<u64, DownloadError>
where
    S: Stream<Item = Result<B, E>> + Send,
    B: AsRef<[u8]> + Send,
    E: std::fmt::Display + Send,
{
    ctx.checkpoint()?;
    if let Some(parent) = ctx.staging.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let mut file = File::create(&ctx.staging).await?;
    let mut downloaded: u64 = 0;
    ctx.report(TransferProgress::Bytes { downloaded, total });

    let mut stream = std::pin::pin!(stream);
    loop {
        let next = tokio::select! {
            biased;
            () = ctx.cancel.cancelled() => return Err(DownloadError::Cancelled),
            next = stream.next() => next,
        };
        let Some(chunk) = next else { break };
        let chunk = chunk.map_err(|e| DownloadError::transfer(e.to_string()))?;
        let chunk = chunk.as_ref();
        file.write_all(chunk).await?;
        downloaded += chunk.len() as u64;
        ctx.report(TransferProgress::Bytes { downloaded, total });
    }

    file.flush().await?;
    file.sync_all().await?;
    ctx.checkpoint()?;

    if total > 0 && downloaded != total {
        return Err(DownloadError::transfer(format!(
            "incomplete body: received {downloaded} of {total} bytes"
        )));
    }
    Ok(downloaded)
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use bytes::Bytes;
    use tokio_util::sync::CancellationToken;

    use super::*;

    fn context(dir: &std::path::Path) -> (TransferContext, Arc<Mutex<Vec<TransferProgress>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let ctx = TransferContext {
            staging: dir.join("out.bin.part"),
            cancel: CancellationToken::new(),
            progress: Arc::new(move |p: TransferProgress| sink.lock().unwrap().push(p)),
        };
        (ctx, seen)
    }

    #[tokio::test]
    async fn test_writes_chunks_and_reports_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let (ctx, seen) = context(dir.path());
        let chunks = futures_util::stream::iter(vec![
            Ok::<_, std::io::Error>(Bytes::from_static(b"abc")),
            Ok(Bytes::from_static(b"defg")),
        ]);

        let written = write_stream(chunks, &ctx, 7).await.unwrap();

        assert_eq!(written, 7);
        assert_eq!(std::fs::read(&ctx.staging).unwrap(), b"abcdefg");
        let seen = seen.lock().unwrap();
        assert_eq!(
            seen.last(),
            Some(&TransferProgress::Bytes {
                downloaded: 7,
                total: 7
            })
        );
    }

    #[tokio::test]
    async fn test_short_body_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let (ctx, _) = context(dir.path());
        let chunks = futures_util::stream::iter(vec![Ok::<_, std::io::Error>(Bytes::from_static(b"ab"))]);

        let err = write_stream(chunks, &ctx, 10).await.unwrap_err();
        assert!(matches!(err, DownloadError::Transfer(ref m) if m.contains("2 of 10")));
    }

    #[tokio::test]
    async fn test_stream_error_maps_to_transfer() {
        let dir = tempfile::tempdir().unwrap();
        let (ctx, _) = context(dir.path());
        let chunks = futures_util::stream::iter(vec![
            Ok(Bytes::from_static(b"ab")),
            Err(std::io::Error::other("connection reset")),
        ]);

        let err = write_stream(chunks, &ctx, 0).await.unwrap_err();
        assert_eq!(err, DownloadError::transfer("connection reset"));
    }

    #[tokio::test]
    async fn test_cancelled_before_start() {
        let dir = tempfile::tempdir().unwrap();
        let (ctx, _) = context(dir.path());
        ctx.cancel.cancel();
        let chunks = futures_util::stream::iter(vec![Ok::<_, std::io::Error>(Bytes::from_static(b"ab"))]);

        let err = write_stream(chunks, &ctx, 0).await.unwrap_err();
        assert!(err.is_cancelled());
        assert!(!ctx.staging.exists());
    }
}
