//! Repository fetches delegated to an external command-line tool.
//!
//! The tool is invoked as
//!
//! ```text
//! <command> download <repo> <file> [--revision <rev>] --local-dir <dir>
//! ```
//!
//! with `<dir>` a scratch directory next to the destination. Progress bars
//! are redrawn with `\r`, so output is split on both `\r` and `\n` before it
//! reaches the parser. Once the tool exits successfully the file it wrote is
//! renamed onto the staging path.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use infera_core::DownloadError;

use super::{TransferContext, TransferStrategy};
use crate::filename::join_within;
use crate::progress::{ProgressCallback, ProgressParser, TransferProgress};

/// Environment variable carrying the repository token to the tool.
pub const TOKEN_ENV: &str = "HF_TOKEN";

const KILL_WAIT: Duration = Duration::from_secs(5);
const PUMP_DRAIN: Duration = Duration::from_millis(500);

type LastLine = Arc<Mutex<Option<String>>>;

/// Runs the external fetch tool for one repository file.
pub struct RepositoryTransfer {
    command: Vec<String>,
    token: Option<String>,
    repo: String,
    file: String,
    revision: Option<String>,
    parser: Arc<dyn ProgressParser>,
}

impl RepositoryTransfer {
    /// `command` is the executable followed by any leading arguments.
    pub fn new(
        command: Vec<String>,
        token: Option<String>,
        repo: impl Into<String>,
        file: impl Into<String>,
        revision: Option<String>,
        parser: Arc<dyn ProgressParser>,
    ) -> Self {
        Self {
            command,
            token,
            repo: repo.into(),
            file: file.into(),
            revision,
            parser,
        }
    }

    fn build_command(&self, local_dir: &Path) -> Result<Command, DownloadError> {
        let (program, leading) = self
            .command
            .split_first()
            .ok_or_else(|| DownloadError::transfer("fetch command is empty"))?;
        let mut cmd = Command::new(program);
        cmd.args(leading)
            .arg("download")
            .arg(&self.repo)
            .arg(&self.file);
        if let Some(revision) = &self.revision {
            cmd.arg("--revision").arg(revision);
        }
        cmd.arg("--local-dir")
            .arg(local_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(token) = &self.token {
            cmd.env(TOKEN_ENV, token);
        }
        Ok(cmd)
    }
}

#[async_trait]
impl TransferStrategy for RepositoryTransfer {
    async fn transfer(&self, ctx: &TransferContext) -> Result<u64, DownloadError> {
        ctx.checkpoint()?;
        let parent = ctx
            .staging
            .parent()
            .map_or_else(|| PathBuf::from("."), Path::to_path_buf);
        tokio::fs::create_dir_all(&parent).await?;
        let scratch = tempfile::Builder::new()
            .prefix(".infera-fetch-")
            .tempdir_in(&parent)?;

        let mut child = self.build_command(scratch.path())?.spawn().map_err(|e| {
            DownloadError::transfer(format!("failed to run fetch tool '{}': {e}", self.command.join(" ")))
        })?;
        debug!(repo = %self.repo, file = %self.file, pid = ?child.id(), "Fetch tool started");

        let last_line: LastLine = Arc::new(Mutex::new(None));
        let mut pumps = Vec::with_capacity(2);
        if let Some(stdout) = child.stdout.take() {
            pumps.push(spawn_pump(stdout, Arc::clone(&self.parser), Arc::clone(&ctx.progress), Arc::clone(&last_line)));
        }
        if let Some(stderr) = child.stderr.take() {
            pumps.push(spawn_pump(stderr, Arc::clone(&self.parser), Arc::clone(&ctx.progress), Arc::clone(&last_line)));
        }

        let status = tokio::select! {
            biased;
            () = ctx.cancel.cancelled() => None,
            status = child.wait() => Some(status),
        };

        let Some(status) = status else {
            debug!(repo = %self.repo, "Cancelling fetch tool");
            if let Err(e) = child.start_kill() {
                warn!(error = %e, "Failed to signal fetch tool");
            }
            if tokio::time::timeout(KILL_WAIT, child.wait()).await.is_err() {
                warn!(repo = %self.repo, "Fetch tool did not exit after kill");
            }
            for pump in pumps {
                pump.abort();
            }
            return Err(DownloadError::Cancelled);
        };
        let status = status.map_err(|e| DownloadError::transfer(format!("fetch tool wait failed: {e}")))?;

        for pump in pumps {
            if tokio::time::timeout(PUMP_DRAIN, pump).await.is_err() {
                debug!("Fetch tool output reader did not finish");
            }
        }

        if !status.success() {
            let detail = last_line
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .take()
                .unwrap_or_default();
            let code = status
                .code()
                .map_or_else(|| "killed by signal".to_string(), |c| format!("exit code {c}"));
            return Err(DownloadError::transfer(if detail.is_empty() {
                format!("fetch tool failed ({code})")
            } else {
                format!("fetch tool failed ({code}): {detail}")
            }));
        }
        ctx.checkpoint()?;

        let fetched = join_within(scratch.path(), &self.file).ok_or_else(|| {
            DownloadError::transfer(format!("refusing to read {} outside the fetch directory", self.file))
        })?;
        let size = tokio::fs::metadata(&fetched)
            .await
            .map_err(|_| DownloadError::transfer(format!("fetch tool did not produce {}", self.file)))?
            .len();
        tokio::fs::rename(&fetched, &ctx.staging).await?;
        ctx.report(TransferProgress::Bytes {
            downloaded: size,
            total: size,
        });
        Ok(size)
    }
}

/// Read tool output, splitting on `\r` and `\n`, feeding each segment to the parser.
fn spawn_pump<R>(
    mut reader: R,
    parser: Arc<dyn ProgressParser>,
    progress: ProgressCallback,
    last_line: LastLine,
) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut chunk = [0u8; 4096];
        let mut pending: Vec<u8> = Vec::with_capacity(256);
        let handle_segment = |segment: &[u8]| {
            let line = String::from_utf8_lossy(segment);
            let line = line.trim();
            if line.is_empty() {
                return;
            }
            if let Some(update) = parser.parse(line).and_then(|p| p.into_transfer()) {
                progress(update);
            }
            *last_line.lock().unwrap_or_else(PoisonError::into_inner) = Some(line.to_string());
        };

        loop {
            match reader.read(&mut chunk).await {
                Ok(0) => break,
                Ok(n) => {
                    for &byte in &chunk[..n] {
                        if byte == b'\r' || byte == b'\n' {
                            handle_segment(&pending);
                            pending.clear();
                        } else {
                            pending.push(byte);
                        }
                    }
                }
                Err(e) => {
                    debug!(error = %e, "Fetch tool output reader exiting on read error");
                    break;
                }
            }
        }
        handle_segment(&pending);
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progress::FetchToolProgressParser;

    #[tokio::test]
    async fn test_pump_splits_carriage_returns() {
        let input: &[u8] = b"x:  10%| | 1.0k/10.0k\rx:  50%| | 5.0k/10.0k\rdone\n";
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let progress: ProgressCallback = Arc::new(move |p: TransferProgress| sink.lock().unwrap().push(p));
        let last_line: LastLine = Arc::new(Mutex::new(None));

        spawn_pump(input, Arc::new(FetchToolProgressParser::new()), progress, Arc::clone(&last_line))
            .await
            .unwrap();

        let seen = seen.lock().unwrap();
        assert_eq!(
            *seen,
            vec![
                TransferProgress::Bytes {
                    downloaded: 1_000,
                    total: 10_000
                },
                TransferProgress::Bytes {
                    downloaded: 5_000,
                    total: 10_000
                },
            ]
        );
        assert_eq!(last_line.lock().unwrap().as_deref(), Some("done"));
    }

    #[test]
    fn test_command_shape() {
        let transfer = RepositoryTransfer::new(
            vec!["fetch".into(), "--quiet".into()],
            Some("secret".into()),
            "org/repo",
            "x.gguf",
            Some("v2".into()),
            Arc::new(FetchToolProgressParser::new()),
        );
        let cmd = transfer.build_command(Path::new("/tmp/scratch")).unwrap();
        let std_cmd = cmd.as_std();
        assert_eq!(std_cmd.get_program(), "fetch");
        let args: Vec<_> = std_cmd.get_args().map(|a| a.to_string_lossy().into_owned()).collect();
        assert_eq!(
            args,
            [
                "--quiet",
                "download",
                "org/repo",
                "x.gguf",
                "--revision",
                "v2",
                "--local-dir",
                "/tmp/scratch"
            ]
        );
        let token = std_cmd
            .get_envs()
            .find(|(k, _)| k.to_str() == Some(TOKEN_ENV))
            .and_then(|(_, v)| v);
        assert_eq!(token, Some(std::ffi::OsStr::new("secret")));
    }

    #[test]
    fn test_empty_command_rejected() {
        let transfer = RepositoryTransfer::new(
            Vec::new(),
            None,
            "org/repo",
            "x.gguf",
            None,
            Arc::new(FetchToolProgressParser::new()),
        );
        assert!(transfer.build_command(Path::new("/tmp")).is_err());
    }
}
