use std::io::ErrorKind as IoErrorKind;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use galera_core::error::{AppError, ErrorKind};
use galera_core::models::{ExtractionRecord, FetchMode, ScrapeFailure, ScrapeResult};
use galera_core::traits::ResultStore;
use serde::{Deserialize, Serialize};

use crate::ensure_parent;

/// One flat row per result.
#[derive(Debug, Serialize, Deserialize)]
struct Row {
    status: String,
    url: String,
    title: String,
    text: String,
    link_count: usize,
    image_count: usize,
    video_count: usize,
    status_code: Option<u16>,
    error_kind: Option<ErrorKind>,
    message: String,
    timestamp: DateTime<Utc>,
}

impl From<&ScrapeResult> for Row {
    fn from(result: &ScrapeResult) -> Self {
        match result {
            ScrapeResult::Success(record) => Row {
                status: "success".into(),
                url: record.url.clone(),
                title: record.title.clone(),
                text: record.text.clone(),
                link_count: record.links.len(),
                image_count: record.images.len(),
                video_count: record.videos.len(),
                status_code: record.status_code,
                error_kind: None,
                message: String::new(),
                timestamp: record.timestamp,
            },
            ScrapeResult::Failure(failure) => Row {
                status: "failure".into(),
                url: failure.url.clone(),
                title: String::new(),
                text: String::new(),
                link_count: 0,
                image_count: 0,
                video_count: 0,
                status_code: None,
                error_kind: Some(failure.error_kind),
                message: failure.message.clone(),
                timestamp: failure.timestamp,
            },
        }
    }
}

impl Row {
    /// Success rows come back as summary records: links, images and videos
    /// are only counted in the file, so they load empty.
    fn into_result(self) -> Result<ScrapeResult, AppError> {
        match self.status.as_str() {
            "success" => Ok(ScrapeResult::success(ExtractionRecord {
                url: self.url.clone(),
                final_url: self.url,
                fetch_mode: FetchMode::Static,
                title: self.title,
                text: self.text,
                links: Vec::new(),
                images: Vec::new(),
                videos: Vec::new(),
                iframes: None,
                shadow_dom: None,
                xhr_payloads: None,
                cookies: None,
                local_storage: None,
                status_code: self.status_code,
                headers: None,
                timestamp: self.timestamp,
                raw_html: String::new(),
                extra: serde_json::Map::new(),
            })),
            "failure" => Ok(ScrapeResult::Failure(ScrapeFailure {
                url: self.url,
                error_kind: self.error_kind.unwrap_or(ErrorKind::Internal),
                message: self.message,
                timestamp: self.timestamp,
            })),
            other => Err(AppError::StorageError(format!(
                "Unknown status '{other}' for {}",
                self.url
            ))),
        }
    }
}

/// Results as a flat CSV table with a header row.
#[derive(Debug, Clone)]
pub struct CsvStore {
    path: PathBuf,
}

impl CsvStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

fn csv_error(e: csv::Error) -> AppError {
    AppError::StorageError(format!("CSV error: {e}"))
}

impl ResultStore for CsvStore {
    async fn save(&self, results: &[ScrapeResult]) -> Result<(), AppError> {
        ensure_parent(&self.path).await?;

        let mut writer = csv::Writer::from_writer(Vec::new());
        for result in results {
            writer.serialize(Row::from(result)).map_err(csv_error)?;
        }
        let bytes = writer
            .into_inner()
            .map_err(|e| AppError::StorageError(format!("CSV flush failed: {e}")))?;

        tokio::fs::write(&self.path, bytes)
            .await
            .map_err(|e| AppError::StorageError(format!("Failed to write {}: {e}", self.path.display())))?;
        tracing::info!(component = "store", path = %self.path.display(), count = results.len(), "Saved results");
        Ok(())
    }

    async fn load(&self) -> Result<Vec<ScrapeResult>, AppError> {
        let raw = match tokio::fs::read(&self.path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == IoErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(AppError::StorageError(format!(
                    "Failed to read {}: {e}",
                    self.path.display()
                )));
            }
        };

        csv::Reader::from_reader(raw.as_slice())
            .deserialize::<Row>()
            .map(|row| row.map_err(csv_error)?.into_result())
            .collect()
    }
}
