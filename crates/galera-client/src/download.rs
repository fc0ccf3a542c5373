//! Streaming file downloads (PDFs, CSVs, archives) straight to disk.

use std::path::Path;
use std::time::Duration;

use futures::StreamExt;
use galera_core::config::ScrapeConfig;
use galera_core::error::AppError;
use reqwest::Client;
use tokio::fs::File;
use tokio::io::AsyncWriteExt;

use crate::transport::{build_client, header_map, send_error};

/// Downloads remote files without buffering the whole body in memory.
#[derive(Clone)]
pub struct FileDownloader {
    client: Client,
    timeout: Duration,
}

impl FileDownloader {
    pub fn new() -> Result<Self, AppError> {
        Self::from_config(&ScrapeConfig::default())
    }

    /// Sends the configured extra headers and honours the request timeout.
    pub fn from_config(config: &ScrapeConfig) -> Result<Self, AppError> {
        let headers = header_map(&config.headers)?;
        Ok(Self {
            client: build_client(&headers, config.timeout, None)?,
            timeout: config.timeout,
        })
    }

    /// Streams `url` into `destination`, creating missing parent directories.
    ///
    /// Returns the number of bytes written. A non-success status is an
    /// `HttpError` and leaves nothing on disk; a transfer that fails midway
    /// removes the partial file.
    pub async fn download(&self, url: &str, destination: impl AsRef<Path>) -> Result<u64, AppError> {
        let destination = destination.as_ref();
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| send_error(url, self.timeout, e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(AppError::HttpError(format!(
                "HTTP {} for {}",
                status.as_u16(),
                url
            )));
        }

        if let Some(parent) = destination.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| storage_error(parent, e))?;
        }
        let mut file = File::create(destination)
            .await
            .map_err(|e| storage_error(destination, e))?;

        match write_body(response, &mut file, destination).await {
            Ok(written) => {
                tracing::info!(
                    component = "download",
                    url = %url,
                    path = %destination.display(),
                    bytes = written,
                    "File downloaded"
                );
                Ok(written)
            }
            Err(e) => {
                drop(file);
                if let Err(remove) = tokio::fs::remove_file(destination).await {
                    tracing::warn!(component = "download", path = %destination.display(), error = %remove, "Failed to remove partial download");
                }
                Err(e)
            }
        }
    }
}

async fn write_body(response: reqwest::Response, file: &mut File, path: &Path) -> Result<u64, AppError> {
    let mut chunks = response.bytes_stream();
    let mut written = 0u64;
    while let Some(chunk) = chunks.next().await {
        let chunk = chunk.map_err(|e| AppError::NetworkError(format!("Download interrupted: {e}")))?;
        file.write_all(&chunk)
            .await
            .map_err(|e| storage_error(path, e))?;
        written += chunk.len() as u64;
    }
    file.flush().await.map_err(|e| storage_error(path, e))?;
    Ok(written)
}

fn storage_error(path: &Path, e: std::io::Error) -> AppError {
    AppError::StorageError(format!("Failed to write {}: {e}", path.display()))
}
