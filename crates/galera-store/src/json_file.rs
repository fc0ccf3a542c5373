use std::io::ErrorKind as IoErrorKind;
use std::path::{Path, PathBuf};

use galera_core::error::AppError;
use galera_core::models::ScrapeResult;
use galera_core::traits::ResultStore;

use crate::ensure_parent;

/// Results as a pretty-printed JSON array in a single file.
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ResultStore for JsonFileStore {
    async fn save(&self, results: &[ScrapeResult]) -> Result<(), AppError> {
        ensure_parent(&self.path).await?;
        let json = serde_json::to_string_pretty(results)?;
        tokio::fs::write(&self.path, json)
            .await
            .map_err(|e| AppError::StorageError(format!("Failed to write {}: {e}", self.path.display())))?;
        tracing::info!(component = "store", path = %self.path.display(), count = results.len(), "Saved results");
        Ok(())
    }

    /// A missing file loads as no results.
    async fn load(&self) -> Result<Vec<ScrapeResult>, AppError> {
        let raw = match tokio::fs::read_to_string(&self.path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == IoErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(AppError::StorageError(format!(
                    "Failed to read {}: {e}",
                    self.path.display()
                )));
            }
        };
        Ok(serde_json::from_str(&raw)?)
    }
}
