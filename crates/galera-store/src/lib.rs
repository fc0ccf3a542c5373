pub mod csv_file;
pub mod json_file;

pub use csv_file::CsvStore;
pub use json_file::JsonFileStore;

use std::path::Path;

use galera_core::error::AppError;

/// Creates the parent directory of `path` if it has one.
pub(crate) async fn ensure_parent(path: &Path) -> Result<(), AppError> {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| AppError::StorageError(format!("Failed to create {}: {e}", parent.display()))),
        _ => Ok(()),
    }
}
