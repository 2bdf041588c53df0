//! Async stream log readers (non-UTF8-safe).
//!
//! Inference servers can emit non-UTF8 bytes on stdout/stderr. Using
//! `BufReader::lines()` would terminate the reader task on invalid UTF-8, so
//! lines are read as bytes and decoded lossily.

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::task::JoinHandle;
use tracing::debug;

use infera_core::{LogStream, ProcessId};

/// Read `stream` line by line, handing each decoded line to `on_line`.
///
/// The returned task finishes at EOF or on the first read error.
pub fn spawn_stream_reader<F>(
    stream: impl AsyncRead + Unpin + Send + 'static,
    id: ProcessId,
    kind: LogStream,
    on_line: F,
) -> JoinHandle<()>
where
    F: Fn(String) + Send + 'static,
{
    tokio::spawn(async move {
        let mut reader = BufReader::new(stream);
        let mut buf: Vec<u8> = Vec::with_capacity(1024);

        loop {
            buf.clear();
            match reader.read_until(b'\n', &mut buf).await {
                Ok(0) => break, // EOF
                Ok(_) => {
                    if buf.last() == Some(&b'\n') {
                        buf.pop();
                        if buf.last() == Some(&b'\r') {
                            buf.pop();
                        }
                    }
                    on_line(String::from_utf8_lossy(&buf).into_owned());
                }
                Err(e) => {
                    debug!(process = %id, stream = kind.as_str(), error = %e, "log stream reader exiting due to read error");
                    break;
                }
            }
        }

        debug!(process = %id, stream = kind.as_str(), "log stream reader task exiting");
    })
}
