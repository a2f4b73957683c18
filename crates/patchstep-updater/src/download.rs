//! HTTP transfers: small documents into memory, patch targets onto disk.
//!
//! Target downloads resume from a partial file left by an earlier,
//! interrupted rollout.

use std::path::Path;
use std::time::Duration;

use futures_util::StreamExt;
use reqwest::header::RANGE;
use reqwest::StatusCode;
use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

use crate::config::NetworkConfig;
use crate::error::UpdateError;

/// Shared HTTP client for version histories, listings and targets.
#[derive(Clone)]
pub struct Downloader {
    client: reqwest::Client,
}

impl Downloader {
    /// # Errors
    ///
    /// `HttpError` if the client cannot be built (TLS backend failure).
    pub fn new(config: &NetworkConfig) -> Result<Self, UpdateError> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(config.timeout_seconds))
            .read_timeout(Duration::from_secs(config.read_timeout_seconds))
            .user_agent(config.user_agent.as_str())
            .build()?;
        Ok(Self { client })
    }

    /// GET `url` into memory.
    pub async fn fetch(&self, url: &str) -> Result<Vec<u8>, UpdateError> {
        let response = self.client.get(url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(UpdateError::DownloadFailed {
                status: status.as_u16(),
            });
        }
        let body = response.bytes().await?;
        debug!(url, bytes = body.len(), "Fetched document");
        Ok(body.to_vec())
    }

    /// Stream `url` to `dest`, which must end up exactly `length` bytes.
    ///
    /// A shorter file already at `dest` is continued with a Range request;
    /// a full-length one is accepted as is (the caller verifies the digest).
    pub async fn download_with_resume(
        &self,
        url: &str,
        dest: &Path,
        length: u64,
    ) -> Result<(), UpdateError> {
        let existing = match fs::metadata(dest).await {
            Ok(meta) => Some(meta.len()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
            Err(e) => return Err(e.into()),
        };
        let offset = match resume_offset(existing, length) {
            Resume::Complete => {
                debug!(dest = %dest.display(), length, "Target already downloaded");
                return Ok(());
            }
            Resume::Restart => {
                if existing.is_some() {
                    fs::remove_file(dest).await?;
                }
                0
            }
            Resume::From(offset) => offset,
        };
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent).await?;
        }

        info!(url, dest = %dest.display(), offset, length, "Downloading target");
        let mut request = self.client.get(url);
        if offset > 0 {
            request = request.header(RANGE, format!("bytes={offset}-"));
        }
        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(UpdateError::DownloadFailed {
                status: status.as_u16(),
            });
        }

        let append = offset > 0 && status == StatusCode::PARTIAL_CONTENT;
        if offset > 0 && !append {
            warn!(url, "Range ignored by server, downloading from the start");
        }
        let mut file = OpenOptions::new()
            .create(true)
            .write(true)
            .append(append)
            .truncate(!append)
            .open(dest)
            .await?;

        let mut body = response.bytes_stream();
        while let Some(chunk) = body.next().await {
            let chunk = chunk.map_err(|e| UpdateError::NetworkError(e.to_string()))?;
            file.write_all(&chunk).await?;
        }
        file.flush().await?;
        file.sync_all().await?;
        drop(file);

        let actual = fs::metadata(dest).await?.len();
        if actual != length {
            return Err(UpdateError::SizeMismatch {
                expected: length,
                actual,
            });
        }
        Ok(())
    }
}

#[derive(Debug, PartialEq, Eq)]
enum Resume {
    Complete,
    Restart,
    From(u64),
}

/// Where to pick up given the size of a file already on disk.
fn resume_offset(existing: Option<u64>, length: u64) -> Resume {
    match existing {
        Some(size) if size == length => Resume::Complete,
        // longer than listed: not a prefix of the target
        Some(size) if size > length => Resume::Restart,
        Some(0) | None => Resume::Restart,
        Some(size) => Resume::From(size),
    }
}
