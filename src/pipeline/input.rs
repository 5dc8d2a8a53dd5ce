//! Input intake: turn a user-supplied path or URL into image bytes.
//!
//! The core pipeline only needs bytes; this stage exists for the CLI and for
//! batch callers. Format is sniffed from the leading bytes with
//! [`image::guess_format`] so a mislabelled upload is rejected here rather
//! than surfacing later as an OCR decode error. Empty files pass through
//! untouched: rejecting empty input is the pipeline's job ([`crate::ExtractionError::NoInput`]).

use crate::error::ExtractionError;
use image::ImageFormat;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, info};

/// Image formats the OCR stage can decode.
const SUPPORTED: &[ImageFormat] = &[ImageFormat::Png, ImageFormat::Jpeg];

/// Check if the input string looks like a URL.
pub fn is_url(input: &str) -> bool {
    input.starts_with("http://") || input.starts_with("https://")
}

/// Load an image from a local path or an HTTP/HTTPS URL.
pub async fn load_image(input: &str, timeout_secs: u64) -> Result<Vec<u8>, ExtractionError> {
    let bytes = if is_url(input) {
        download_url(input, timeout_secs).await?
    } else if input.trim().is_empty() {
        return Err(ExtractionError::InvalidInput {
            input: input.to_string(),
        });
    } else {
        read_local(input).await?
    };

    check_image(input, &bytes)?;
    Ok(bytes)
}

/// Reject bytes that are not one of the [`SUPPORTED`] formats.
pub fn check_image(input: &str, bytes: &[u8]) -> Result<(), ExtractionError> {
    if bytes.is_empty() {
        return Ok(());
    }
    match image::guess_format(bytes) {
        Ok(format) if SUPPORTED.contains(&format) => Ok(()),
        _ => Err(ExtractionError::NotAnImage {
            input: input.to_string(),
            magic: bytes.iter().take(4).copied().collect(),
        }),
    }
}

async fn read_local(path_str: &str) -> Result<Vec<u8>, ExtractionError> {
    let path = PathBuf::from(path_str);
    match tokio::fs::read(&path).await {
        Ok(bytes) => {
            debug!("Read {} bytes from {}", bytes.len(), path.display());
            Ok(bytes)
        }
        Err(e) if e.kind() == std::io::ErrorKind::PermissionDenied => {
            Err(ExtractionError::PermissionDenied { path })
        }
        Err(_) => Err(ExtractionError::FileNotFound { path }),
    }
}

async fn download_url(url: &str, timeout_secs: u64) -> Result<Vec<u8>, ExtractionError> {
    info!("Downloading image from: {}", url);

    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .build()
        .map_err(|e| ExtractionError::DownloadFailed {
            url: url.to_string(),
            reason: e.to_string(),
        })?;

    let map_err = |e: reqwest::Error| {
        if e.is_timeout() {
            ExtractionError::DownloadTimeout {
                url: url.to_string(),
                secs: timeout_secs,
            }
        } else {
            ExtractionError::DownloadFailed {
                url: url.to_string(),
                reason: e.to_string(),
            }
        }
    };

    let response = client.get(url).send().await.map_err(map_err)?;
    if !response.status().is_success() {
        return Err(ExtractionError::DownloadFailed {
            url: url.to_string(),
            reason: format!("HTTP {}", response.status()),
        });
    }

    let bytes = response.bytes().await.map_err(map_err)?;
    info!("Downloaded {} bytes", bytes.len());
    Ok(bytes.to_vec())
}
