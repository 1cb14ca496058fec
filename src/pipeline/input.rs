//! Input resolution: normalise a user-supplied path or URL to document bytes.
//!
//! The pipeline core takes `(bytes, filename)` — the chat-bot and CLI
//! callers both end up there. This module is the CLI-side convenience that
//! turns "some string the user typed" into that pair, downloading when the
//! string is an HTTP/HTTPS URL. The filename matters because the renderer
//! uses its extension to pick PDF vs. raster-image handling.

use crate::error::InvoxError;
use std::path::PathBuf;
use tracing::{debug, info};

/// A resolved document: raw bytes plus the filename they came with.
#[derive(Debug, Clone)]
pub struct DocumentSource {
    pub bytes: Vec<u8>,
    pub filename: String,
}

/// Check if the input string looks like a URL.
pub fn is_url(input: &str) -> bool {
    input.starts_with("http://") || input.starts_with("https://")
}

/// Resolve the input string to document bytes.
///
/// If the input is a URL, download it; if it is a local file, read it,
/// distinguishing missing files from permission problems.
pub async fn resolve_input(input: &str, timeout_secs: u64) -> Result<DocumentSource, InvoxError> {
    if is_url(input) {
        download_url(input, timeout_secs).await
    } else {
        resolve_local(input).await
    }
}

async fn resolve_local(path_str: &str) -> Result<DocumentSource, InvoxError> {
    let path = PathBuf::from(path_str);

    let bytes = match tokio::fs::read(&path).await {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(InvoxError::FileNotFound { path });
        }
        Err(e) if e.kind() == std::io::ErrorKind::PermissionDenied => {
            return Err(InvoxError::PermissionDenied { path });
        }
        Err(_) => return Err(InvoxError::FileNotFound { path }),
    };

    let filename = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .ok_or_else(|| InvoxError::InvalidInput {
            input: path_str.to_string(),
        })?;

    debug!("resolved local document: {} ({} bytes)", path.display(), bytes.len());
    Ok(DocumentSource { bytes, filename })
}

async fn download_url(url: &str, timeout_secs: u64) -> Result<DocumentSource, InvoxError> {
    info!("downloading document from: {url}");

    let client = reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(timeout_secs))
        .build()
        .map_err(|e| InvoxError::DownloadFailed {
            url: url.to_string(),
            reason: e.to_string(),
        })?;

    let response = client.get(url).send().await.map_err(|e| {
        if e.is_timeout() {
            InvoxError::DownloadTimeout {
                url: url.to_string(),
                secs: timeout_secs,
            }
        } else {
            InvoxError::DownloadFailed {
                url: url.to_string(),
                reason: e.to_string(),
            }
        }
    })?;

    if !response.status().is_success() {
        return Err(InvoxError::DownloadFailed {
            url: url.to_string(),
            reason: format!("HTTP {}", response.status()),
        });
    }

    let filename = extract_filename(url);

    let bytes = response
        .bytes()
        .await
        .map_err(|e| InvoxError::DownloadFailed {
            url: url.to_string(),
            reason: e.to_string(),
        })?
        .to_vec();

    info!("downloaded {} bytes as '{filename}'", bytes.len());
    Ok(DocumentSource { bytes, filename })
}

/// Extract a reasonable filename from the URL path; fall back to a PDF name
/// so the renderer has an extension to dispatch on.
fn extract_filename(url: &str) -> String {
    if let Ok(parsed) = reqwest::Url::parse(url) {
        if let Some(mut segments) = parsed.path_segments() {
            if let Some(last) = segments.next_back() {
                if !last.is_empty() && last.contains('.') {
                    return last.to_string();
                }
            }
        }
    }
    "downloaded.pdf".to_string()
}
