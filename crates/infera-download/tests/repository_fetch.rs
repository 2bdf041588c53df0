//! Repository downloads against fake fetch tools.
//!
//! The fake tools are shell scripts accepting the real tool's
//! `download <repo> <file> [--revision R] --local-dir DIR` arguments.

#![cfg(unix)]

mod common;

use std::path::Path;
use std::time::{Duration, Instant};

use common::{HarnessBuilder, partial_path, wait_for_status};
use infera_core::{DownloadError, DownloadSource, DownloadStatus};

/// Writes `weights!` to the requested file, reporting progress on stderr.
const FETCH_OK: &str = r#"
file="$3"
shift 3
while [ $# -gt 0 ]; do
  case "$1" in
    --local-dir) dir="$2"; shift 2 ;;
    --revision) echo "revision $2"; shift 2 ;;
    *) shift ;;
  esac
done
printf '%s:  50%%|#####     | 4B/8B [00:00<00:00]\r' "$file" >&2
mkdir -p "$dir/$(dirname "$file")"
printf 'weights!' > "$dir/$file"
printf '%s: 100%%|##########| 8B/8B [00:00<00:00]\n' "$file" >&2
echo "$dir/$file"
"#;

/// Reports a rounded `1.0k` total but writes 999 bytes.
const FETCH_ROUNDED: &str = r#"
file="$3"
shift 3
while [ $# -gt 0 ]; do
  case "$1" in
    --local-dir) dir="$2"; shift 2 ;;
    *) shift ;;
  esac
done
printf '%s: 100%%|##########| 1.0k/1.0k [00:00<00:00]\n' "$file" >&2
head -c 999 /dev/zero > "$dir/$file"
"#;

const FETCH_FAIL: &str = r#"
echo "Downloading..."
echo "404 Client Error: Repository Not Found" >&2
exit 2
"#;

/// Succeeds without writing anything.
const FETCH_NOTHING: &str = "exit 0\n";

const FETCH_HANG: &str = r#"
echo "connecting"
exec sleep 30
"#;

fn write_tool(dir: &Path, script: &str) -> Vec<String> {
    let path = dir.join("fetch.sh");
    std::fs::write(&path, script).unwrap();
    vec!["sh".to_string(), path.display().to_string()]
}

fn repository(file: &str) -> DownloadSource {
    DownloadSource::Repository {
        repo: "org/tiny".into(),
        file: file.into(),
        revision: Some("main".into()),
    }
}

#[tokio::test]
async fn fetch_tool_output_is_moved_into_place() {
    let tools = tempfile::TempDir::new().unwrap();
    let command = write_tool(tools.path(), FETCH_OK);
    let h = HarnessBuilder::new()
        .config(|mut c| {
            c.fetch_command = command;
            c
        })
        .build();

    let record = h
        .coordinator
        .start_download("tiny", repository("quant/tiny-q4.gguf"))
        .unwrap();
    assert_eq!(record.filename, "tiny-q4.gguf");

    let done = wait_for_status(&h.coordinator, &record.id, DownloadStatus::Completed).await;
    assert_eq!(
        std::fs::read(h.dir.path().join("tiny-q4.gguf")).unwrap(),
        b"weights!"
    );
    assert_eq!(done.progress.downloaded, 8);
    assert_eq!(done.progress.total, 8);
    assert!(!partial_path(h.dir.path(), "tiny-q4.gguf").exists());

    // Scratch directories are cleaned up with the transfer.
    let leftovers: Vec<_> = std::fs::read_dir(h.dir.path())
        .unwrap()
        .filter_map(Result::ok)
        .filter(|e| e.file_name().to_string_lossy().starts_with(".infera-fetch-"))
        .collect();
    assert!(leftovers.is_empty());
}

#[tokio::test]
async fn fetch_tool_failure_reports_last_line() {
    let tools = tempfile::TempDir::new().unwrap();
    let command = write_tool(tools.path(), FETCH_FAIL);
    let h = HarnessBuilder::new()
        .config(|mut c| {
            c.fetch_command = command;
            c
        })
        .build();

    let record = h
        .coordinator
        .start_download("tiny", repository("tiny.gguf"))
        .unwrap();
    let done = wait_for_status(&h.coordinator, &record.id, DownloadStatus::Error).await;
    let error = done.error.unwrap();
    assert!(error.contains("exit code 2"), "{error}");
    assert!(error.contains("Repository Not Found"), "{error}");
    assert!(!h.dir.path().join("tiny.gguf").exists());
}

#[tokio::test]
async fn fetch_tool_without_output_file_is_an_error() {
    let tools = tempfile::TempDir::new().unwrap();
    let command = write_tool(tools.path(), FETCH_NOTHING);
    let h = HarnessBuilder::new()
        .config(|mut c| {
            c.fetch_command = command;
            c
        })
        .build();

    let record = h
        .coordinator
        .start_download("tiny", repository("tiny.gguf"))
        .unwrap();
    let done = wait_for_status(&h.coordinator, &record.id, DownloadStatus::Error).await;
    assert!(done.error.unwrap().contains("did not produce tiny.gguf"));
}

#[tokio::test]
async fn missing_fetch_tool_is_an_error() {
    let h = HarnessBuilder::new()
        .config(|mut c| {
            c.fetch_command = vec!["/nonexistent/infera-fetch-tool".to_string()];
            c
        })
        .build();

    let record = h
        .coordinator
        .start_download("tiny", repository("tiny.gguf"))
        .unwrap();
    let done = wait_for_status(&h.coordinator, &record.id, DownloadStatus::Error).await;
    assert!(done.error.unwrap().contains("failed to run fetch tool"));
}

#[tokio::test]
async fn cancel_stops_fetch_tool() {
    let tools = tempfile::TempDir::new().unwrap();
    let command = write_tool(tools.path(), FETCH_HANG);
    let h = HarnessBuilder::new()
        .config(|mut c| {
            c.fetch_command = command;
            c
        })
        .build();

    let record = h
        .coordinator
        .start_download("tiny", repository("tiny.gguf"))
        .unwrap();
    wait_for_status(&h.coordinator, &record.id, DownloadStatus::Downloading).await;
    tokio::time::sleep(Duration::from_millis(100)).await;

    let started = Instant::now();
    assert!(h.coordinator.cancel_download(&record.id));
    let done = wait_for_status(&h.coordinator, &record.id, DownloadStatus::Cancelled).await;
    assert!(started.elapsed() < Duration::from_secs(5));
    assert!(done.error.is_none());
    assert!(!h.dir.path().join("tiny.gguf").exists());
}

#[tokio::test]
async fn committed_size_replaces_rounded_tool_estimate() {
    let tools = tempfile::TempDir::new().unwrap();
    let command = write_tool(tools.path(), FETCH_ROUNDED);
    let h = HarnessBuilder::new()
        .config(|mut c| {
            c.fetch_command = command;
            c
        })
        .build();

    let record = h
        .coordinator
        .start_download("tiny", repository("tiny.gguf"))
        .unwrap();
    let done = wait_for_status(&h.coordinator, &record.id, DownloadStatus::Completed).await;

    let size = std::fs::metadata(h.dir.path().join("tiny.gguf")).unwrap().len();
    assert_eq!(size, 999);
    assert_eq!(done.progress.downloaded, 999);
    assert_eq!(done.progress.total, 999);
    assert!((done.progress.percent - 100.0).abs() < f64::EPSILON);
    assert_eq!(h.registry.registered.lock().unwrap()[0].size, 999);
}

#[tokio::test]
async fn repository_paths_escaping_the_fetch_dir_are_rejected() {
    let tools = tempfile::TempDir::new().unwrap();
    let command = write_tool(tools.path(), FETCH_OK);
    let h = HarnessBuilder::new()
        .config(|mut c| {
            c.fetch_command = command;
            c
        })
        .build();
    let outside = h.dir.path().join("outside.gguf");
    std::fs::write(&outside, b"keep").unwrap();

    for file in ["../outside.gguf", "../../outside.gguf", "/etc/passwd.gguf", "a/../../x.gguf"] {
        let err = h
            .coordinator
            .start_download("evil", repository(file))
            .unwrap_err();
        match err {
            DownloadError::Validation(e) => assert_eq!(e.field, "file", "{file}"),
            other => panic!("{file}: unexpected {other:?}"),
        }
    }
    assert!(h.coordinator.list().is_empty());
    assert_eq!(std::fs::read(&outside).unwrap(), b"keep");
}
