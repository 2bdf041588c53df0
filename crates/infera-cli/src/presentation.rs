//! Terminal output helpers: tables and the download progress display.
//!
//! Format-only; nothing here touches the supervisors.

use std::io::{self, IsTerminal};
use std::time::Duration;

use chrono::{DateTime, Local, Utc};
use indicatif::{HumanBytes, ProgressBar, ProgressDrawTarget, ProgressState, ProgressStyle};

use infera_core::Progress;

/// Truncates a string to `max_len` characters, adding "..." if needed.
pub fn truncate_string(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{kept}...")
    }
}

pub fn print_separator(width: usize) {
    println!("{}", "-".repeat(width));
}

/// Format an optional value for table display, returning a default if None.
pub fn format_optional<T: std::fmt::Display>(value: Option<T>, default: &str) -> String {
    value.map_or_else(|| default.to_string(), |v| v.to_string())
}

/// Local `YYYY-MM-DD HH:MM:SS`, or `--`.
pub fn format_time(time: Option<DateTime<Utc>>) -> String {
    time.map_or_else(
        || "--".to_string(),
        |t| t.with_timezone(&Local).format("%Y-%m-%d %H:%M:%S").to_string(),
    )
}

/// Shortened id for tables; full ids are accepted wherever a prefix is.
pub fn short_id(id: &str) -> &str {
    id.get(..8).unwrap_or(id)
}

// ============================================================================
// Download progress
// ============================================================================

/// Download progress display: an indicatif bar on a terminal, occasional
/// plain lines otherwise.
pub struct DownloadProgress {
    render: Render,
}

enum Render {
    Fancy { bar: ProgressBar, saw_length: bool },
    Plain { last_decile: Option<u64> },
}

impl DownloadProgress {
    pub fn new(label: &str) -> Self {
        let render = if io::stderr().is_terminal() {
            let bar = ProgressBar::with_draw_target(None, ProgressDrawTarget::stderr());
            bar.set_style(spinner_style());
            bar.set_message(truncate_string(label, 40));
            bar.enable_steady_tick(Duration::from_millis(120));
            Render::Fancy {
                bar,
                saw_length: false,
            }
        } else {
            eprintln!("Downloading {label}");
            Render::Plain { last_decile: None }
        };
        Self { render }
    }

    pub fn update(&mut self, progress: &Progress) {
        match &mut self.render {
            Render::Fancy { bar, saw_length } => {
                if progress.total > 0 {
                    if !*saw_length {
                        bar.set_style(bar_style());
                        *saw_length = true;
                    }
                    if bar.length() != Some(progress.total) {
                        bar.set_length(progress.total);
                    }
                    bar.set_position(progress.downloaded.min(progress.total));
                } else {
                    bar.set_position(progress.downloaded);
                }
            }
            Render::Plain { last_decile } => {
                #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
                let decile = (progress.percent / 10.0).floor() as u64;
                if progress.total > 0 && *last_decile != Some(decile) {
                    *last_decile = Some(decile);
                    eprintln!(
                        "  {} / {} ({:.0}%)",
                        HumanBytes(progress.downloaded),
                        HumanBytes(progress.total),
                        progress.percent
                    );
                }
            }
        }
    }

    /// Clear the bar; the caller prints the outcome.
    pub fn finish(&self) {
        if let Render::Fancy { bar, .. } = &self.render {
            bar.finish_and_clear();
        }
    }
}

fn spinner_style() -> ProgressStyle {
    ProgressStyle::with_template("{msg} {spinner} {human_bytes}")
        .expect("valid progress template")
        .with_key("human_bytes", |state: &ProgressState, w: &mut dyn std::fmt::Write| {
            let _ = write!(w, "{}", HumanBytes(state.pos()));
        })
}

fn bar_style() -> ProgressStyle {
    ProgressStyle::with_template(
        "{msg} {bar:28.cyan/blue} {human_bytes:>9} / {human_total:>9} ({percent:>3}%) @ {binary_bytes_per_sec} ETA {eta}",
    )
    .expect("valid progress template")
    .with_key("human_bytes", |state: &ProgressState, w: &mut dyn std::fmt::Write| {
        let _ = write!(w, "{}", HumanBytes(state.pos()));
    })
    .with_key("human_total", |state: &ProgressState, w: &mut dyn std::fmt::Write| {
        let value = state
            .len()
            .map_or_else(|| "?".to_string(), |len| HumanBytes(len).to_string());
        let _ = write!(w, "{value}");
    })
}
