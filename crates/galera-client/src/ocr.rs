use std::io::Write;
use std::path::Path;

use galera_core::error::AppError;
use galera_core::traits::OcrEngine;

/// OCR through the `tesseract` command-line tool.
///
/// The image is written to a temporary file and recognized with
/// `tesseract <file> stdout`.
#[derive(Debug, Clone)]
pub struct TesseractOcr {
    binary: String,
    language: Option<String>,
}

impl Default for TesseractOcr {
    fn default() -> Self {
        Self {
            binary: "tesseract".to_string(),
            language: None,
        }
    }
}

impl TesseractOcr {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_binary(mut self, binary: impl Into<String>) -> Self {
        self.binary = binary.into();
        self
    }

    /// Language pack passed as `-l`, e.g. `eng`.
    pub fn with_language(mut self, language: impl Into<String>) -> Self {
        self.language = Some(language.into());
        self
    }

    fn args(&self, image: &Path) -> Vec<String> {
        let mut args = vec![image.display().to_string(), "stdout".to_string()];
        if let Some(language) = &self.language {
            args.push("-l".to_string());
            args.push(language.clone());
        }
        args
    }
}

impl OcrEngine for TesseractOcr {
    async fn recognize(&self, image: &[u8]) -> Result<String, AppError> {
        let mut file = tempfile::NamedTempFile::new()
            .map_err(|e| AppError::OcrError(format!("Failed to create temp file: {e}")))?;
        file.write_all(image)
            .map_err(|e| AppError::OcrError(format!("Failed to write image: {e}")))?;

        let output = tokio::process::Command::new(&self.binary)
            .args(self.args(file.path()))
            .output()
            .await
            .map_err(|e| AppError::OcrError(format!("Failed to run {}: {e}", self.binary)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(AppError::OcrError(format!(
                "{} exited with {}: {}",
                self.binary,
                output.status,
                stderr.trim()
            )));
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}
