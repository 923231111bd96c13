//! Block-wise archive download with progress and cooperative cancellation
//!
//! The response body is written to disk in fixed-size blocks. The
//! [`CancelToken`] is checked before each block is written, so a
//! cancellation requested mid-block takes effect at the next boundary.
//! A cancelled download leaves the partial file in place; discarding it
//! is the caller's job.

use crate::error::{BazaarError, Result};
use crate::models::registry::error_message;
use futures::StreamExt;
use reqwest::{Client, StatusCode};
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::io::AsyncWriteExt;

/// Shared flag observed by the download manager at block boundaries
///
/// Owned by the caller; clones share the same flag.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

/// How a download ended when it did not fail
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DownloadOutcome {
    /// Every expected byte was written
    Completed { bytes: u64 },
    /// Stopped on request after writing `bytes`
    Cancelled { bytes: u64 },
}

/// Stream `url` into `destination`
///
/// `expected_bytes` takes precedence over the server's `Content-Length`;
/// if neither is known the download is refused, since the size gate could
/// not be applied. Finishing with any other byte count than expected is a
/// [`BazaarError::SizeMismatch`] and the file must be discarded.
///
/// `on_progress` receives the cumulative fraction written after each
/// block, clamped to `[0, 1]`.
pub async fn download<F>(
    client: &Client,
    url: &str,
    destination: &Path,
    expected_bytes: Option<u64>,
    block_size: usize,
    mut on_progress: F,
    cancel: &CancelToken,
) -> Result<DownloadOutcome>
where
    F: FnMut(f64) + Send,
{
    let block_size = block_size.max(1);
    let response = client.get(url).send().await?;

    let status = response.status();
    if !status.is_success() {
        let message = error_message(response).await;
        return Err(match status {
            StatusCode::NOT_FOUND => BazaarError::NotFound(message),
            _ => BazaarError::Http {
                status: status.as_u16(),
                message,
            },
        });
    }

    let declared = response.content_length();
    let expected = expected_bytes
        .or(declared)
        .ok_or_else(|| BazaarError::UnknownLength(redact_query(url)))?;
    if let Some(declared) = declared
        && declared != expected
    {
        tracing::warn!(declared, expected, "Server declared a different length than the registry");
    }

    tracing::info!(
        destination = %destination.display(),
        expected_bytes = expected,
        block_size,
        "Starting download"
    );

    let mut file = tokio::fs::File::create(destination).await?;
    let mut stream = response.bytes_stream();
    let mut buffer: Vec<u8> = Vec::with_capacity(block_size);
    let mut written: u64 = 0;
    let mut stream_error = None;

    while let Some(chunk) = stream.next().await {
        let chunk = match chunk {
            Ok(chunk) => chunk,
            Err(e) => {
                // A body cut short is judged by the length check below
                tracing::warn!(error = %e, written, "Download stream ended early");
                stream_error = Some(e);
                break;
            }
        };
        buffer.extend_from_slice(&chunk);

        while buffer.len() >= block_size {
            if cancel.is_cancelled() {
                return finish_cancelled(file, written).await;
            }
            let rest = buffer.split_off(block_size);
            file.write_all(&buffer).await?;
            written += buffer.len() as u64;
            buffer = rest;
            on_progress(fraction(written, expected));
        }
    }

    if !buffer.is_empty() {
        if cancel.is_cancelled() {
            return finish_cancelled(file, written).await;
        }
        file.write_all(&buffer).await?;
        written += buffer.len() as u64;
        on_progress(fraction(written, expected));
    }

    file.flush().await?;
    file.sync_all().await?;
    crate::metrics::record_download_bytes(written);

    if written != expected {
        tracing::warn!(expected, written, "Download length mismatch");
        return Err(BazaarError::SizeMismatch {
            expected,
            actual: written,
        });
    }
    if let Some(e) = stream_error {
        return Err(e.into());
    }

    tracing::info!(bytes = written, "Download complete");
    Ok(DownloadOutcome::Completed { bytes: written })
}

async fn finish_cancelled(mut file: tokio::fs::File, written: u64) -> Result<DownloadOutcome> {
    file.flush().await?;
    crate::metrics::record_download_bytes(written);
    tracing::info!(bytes = written, "Download cancelled");
    Ok(DownloadOutcome::Cancelled { bytes: written })
}

fn fraction(written: u64, expected: u64) -> f64 {
    if expected == 0 {
        return 1.0;
    }
    (written as f64 / expected as f64).clamp(0.0, 1.0)
}

/// Signed URLs carry credentials in the query string
fn redact_query(url: &str) -> String {
    url.split('?').next().unwrap_or(url).to_string()
}
