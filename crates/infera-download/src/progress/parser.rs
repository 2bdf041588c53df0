//! Parsing of human-readable progress lines from external fetch tools.
//!
//! Fetch tools render progress bars like
//!
//! ```text
//! model.gguf:  45%|████▌     | 1.20G/2.67G [00:10<00:12, 120MB/s]
//! ```
//!
//! Only the percentage and the `done/total` size pair are extracted. A bare
//! count pair without units (`1/3`, as printed by "Fetching 3 files") is not
//! a byte count and is ignored.

use std::sync::LazyLock;

use regex::Regex;

use super::TransferProgress;

/// What could be read from one output line.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ParsedProgress {
    pub percent: Option<f64>,
    pub downloaded: Option<u64>,
    pub total: Option<u64>,
}

impl ParsedProgress {
    /// Byte counts win over a bare percentage.
    pub fn into_transfer(self) -> Option<TransferProgress> {
        match (self.downloaded, self.total, self.percent) {
            (Some(downloaded), Some(total), _) => Some(TransferProgress::Bytes { downloaded, total }),
            (_, _, Some(percent)) => Some(TransferProgress::Percent(percent)),
            _ => None,
        }
    }
}

/// Turns one line of tool output into progress, if it carries any.
pub trait ProgressParser: Send + Sync {
    fn parse(&self, line: &str) -> Option<ParsedProgress>;
}

static PERCENT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?P<pct>\d{1,3}(?:\.\d+)?)\s*%").expect("valid percent pattern"));

static FRACTION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?P<done>\d+(?:\.\d+)?)\s*(?P<du>[kKMGT]i?B?|B)?\s*/\s*(?P<total>\d+(?:\.\d+)?)\s*(?P<tu>[kKMGT]i?B?|B)?",
    )
    .expect("valid fraction pattern")
});

/// Percent / fraction matcher for tqdm-style progress bars.
#[derive(Debug, Clone, Copy)]
pub struct FetchToolProgressParser;

impl FetchToolProgressParser {
    pub const fn new() -> Self {
        Self
    }

    fn fraction(line: &str) -> Option<(u64, u64)> {
        FRACTION.captures_iter(line).find_map(|caps| {
            let done_unit = caps.name("du").map(|m| m.as_str());
            let total_unit = caps.name("tu").map(|m| m.as_str());
            if done_unit.is_none() && total_unit.is_none() {
                return None;
            }
            let done = to_bytes(&caps["done"], done_unit.or(total_unit))?;
            let total = to_bytes(&caps["total"], total_unit.or(done_unit))?;
            Some((done, total))
        })
    }
}

impl Default for FetchToolProgressParser {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressParser for FetchToolProgressParser {
    #[allow(clippy::cast_precision_loss)]
    fn parse(&self, line: &str) -> Option<ParsedProgress> {
        let percent = PERCENT
            .captures(line)
            .and_then(|caps| caps["pct"].parse::<f64>().ok())
            .filter(|p| *p <= 100.0);
        let fraction = Self::fraction(line);

        if percent.is_none() && fraction.is_none() {
            return None;
        }
        let percent = percent.or_else(|| {
            fraction
                .filter(|(_, total)| *total > 0)
                .map(|(done, total)| (done as f64 / total as f64 * 100.0).min(100.0))
        });
        Some(ParsedProgress {
            percent,
            downloaded: fraction.map(|(done, _)| done),
            total: fraction.map(|(_, total)| total),
        })
    }
}

/// Scale a size with an optional `k`/`M`/`G`/`T` (decimal) or `Ki`/`Mi`/...
/// (binary) suffix to bytes.
#[allow(
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::cast_precision_loss
)]
fn to_bytes(value: &str, unit: Option<&str>) -> Option<u64> {
    let value: f64 = value.parse().ok()?;
    let unit = unit.unwrap_or("B");
    let binary = unit.contains('i');
    let base: f64 = if binary { 1024.0 } else { 1000.0 };
    let exponent = match unit.chars().next() {
        Some('k' | 'K') => 1,
        Some('M') => 2,
        Some('G') => 3,
        Some('T') => 4,
        _ => 0,
    };
    Some((value * base.powi(exponent)).round() as u64)
}
