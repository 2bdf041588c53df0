//! Destination filename derivation and source validation.

use std::path::{Component, Path, PathBuf};

use infera_core::{DownloadSource, ValidationError};
use url::Url;

/// Extensions accepted as-is from a URL path.
pub const ACCEPTED_EXTENSIONS: &[&str] = &[
    "gguf",
    "safetensors",
    "bin",
    "pt",
    "pth",
    "onnx",
    "ckpt",
    "tar",
    "zip",
    "gz",
];

/// Extension used when a filename has to be synthesized from the name.
pub const FALLBACK_EXTENSION: &str = "gguf";

/// Parse a download URL, allowing only `http` and `https`.
pub fn parse_download_url(raw: &str) -> Result<Url, ValidationError> {
    let url = Url::parse(raw.trim()).map_err(|e| ValidationError::new("url", e.to_string()))?;
    match url.scheme() {
        "http" | "https" => {}
        other => {
            return Err(ValidationError::new(
                "url",
                format!("unsupported scheme '{other}' (expected http or https)"),
            ));
        }
    }
    if url.host_str().is_none_or(str::is_empty) {
        return Err(ValidationError::new("url", "missing host"));
    }
    Ok(url)
}

/// Lowercase ASCII slug of a display name. Never empty.
pub fn slugify(name: &str) -> String {
    let mut slug = String::with_capacity(name.len());
    let mut pending_dash = false;
    for c in name.chars() {
        if c.is_ascii_alphanumeric() || c == '.' || c == '_' {
            if pending_dash && !slug.is_empty() {
                slug.push('-');
            }
            pending_dash = false;
            slug.push(c.to_ascii_lowercase());
        } else {
            pending_dash = true;
        }
    }
    let slug = slug.trim_matches('.').to_string();
    if slug.is_empty() {
        "download".to_string()
    } else {
        slug
    }
}

fn has_accepted_extension(filename: &str) -> bool {
    filename
        .rsplit_once('.')
        .is_some_and(|(stem, ext)| !stem.is_empty() && ACCEPTED_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
}

/// A single safe path component, or `None`.
fn safe_component(candidate: &str) -> Option<String> {
    let candidate = candidate.trim();
    if candidate.is_empty()
        || candidate == "."
        || candidate == ".."
        || candidate.contains(['/', '\\', '\0'])
    {
        return None;
    }
    Some(candidate.to_string())
}

/// Last non-empty `/`-separated component of a path.
pub fn basename(path: &str) -> Option<String> {
    path.rsplit('/')
        .find(|segment| !segment.trim().is_empty())
        .and_then(safe_component)
}

/// Check that `value` is a plain relative `/`-separated path: no leading
/// `/`, no backslashes, no `.` or `..` segments.
pub fn check_relative_path(field: &str, value: &str) -> Result<(), ValidationError> {
    let value = value.trim();
    if value.starts_with('/') || value.contains(['\\', '\0']) {
        return Err(ValidationError::new(field, "must be a relative path"));
    }
    if value.split('/').any(|segment| matches!(segment.trim(), "." | "..")) {
        return Err(ValidationError::new(field, "must not contain '.' or '..' segments"));
    }
    Ok(())
}

/// Join `relative` onto `root`, or `None` if the result would leave `root`.
pub fn join_within(root: &Path, relative: &str) -> Option<PathBuf> {
    let relative = Path::new(relative);
    relative
        .components()
        .all(|c| matches!(c, Component::Normal(_)))
        .then(|| root.join(relative))
}

/// Filename for a URL download: the last path segment when it carries an
/// accepted extension, otherwise `<slug(name)>.gguf`.
pub fn filename_from_url(url: &Url, name: &str) -> String {
    url.path_segments()
        .and_then(|mut segments| segments.rfind(|s| !s.is_empty()))
        .and_then(|segment| urlencoding::decode(segment).ok())
        .and_then(|decoded| safe_component(&decoded))
        .filter(|segment| has_accepted_extension(segment))
        .unwrap_or_else(|| format!("{}.{FALLBACK_EXTENSION}", slugify(name)))
}

/// Validate `source` and derive the destination filename for it.
pub fn destination_filename(name: &str, source: &DownloadSource) -> Result<String, ValidationError> {
    source.validate_fields()?;
    match source {
        DownloadSource::Url { url } => Ok(filename_from_url(&parse_download_url(url)?, name)),
        DownloadSource::ObjectStore { key, .. } => {
            check_relative_path("key", key)?;
            basename(key).ok_or_else(|| ValidationError::new("key", "does not name an object"))
        }
        DownloadSource::Repository { file, .. } => {
            check_relative_path("file", file)?;
            basename(file).ok_or_else(|| ValidationError::new("file", "does not name a file"))
        }
    }
}
