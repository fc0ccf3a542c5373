use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Application-wide error types for Galera.
#[derive(Error, Debug)]
pub enum AppError {
    /// HTTP request failed (fetching a page).
    #[error("HTTP error: {0}")]
    HttpError(String),

    /// Request timed out.
    #[error("Request timed out after {0} seconds")]
    Timeout(u64),

    /// Network/connection error.
    #[error("Network error: {0}")]
    NetworkError(String),

    /// The response carried a blocking signal.
    #[error("Blocked: {0}")]
    Blocked(String),

    /// A challenge was presented and no solution was produced.
    #[error("Challenge unsolved: {0}")]
    ChallengeUnsolved(String),

    /// Browser automation failed (crashed context, script evaluation).
    #[error("Render error: {0}")]
    RenderError(String),

    /// A document could not be processed by an extractor.
    #[error("Extraction error: {0}")]
    ExtractionError(String),

    /// CAPTCHA backend call failed.
    #[error("CAPTCHA error: {0}")]
    CaptchaError(String),

    /// Proxy source or proxy health check failed.
    #[error("Proxy error: {0}")]
    ProxyError(String),

    /// OCR engine failed.
    #[error("OCR error: {0}")]
    OcrError(String),

    /// Result store operation failed.
    #[error("Storage error: {0}")]
    StorageError(String),

    /// Invalid or missing configuration.
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// JSON serialization/deserialization failed.
    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    /// Generic error.
    #[error("{0}")]
    Generic(String),
}

/// User-visible classification carried by failure records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Transport,
    Blocked,
    ChallengeUnsolved,
    Render,
    Extraction,
    Internal,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Transport => "transport",
            ErrorKind::Blocked => "blocked",
            ErrorKind::ChallengeUnsolved => "challenge_unsolved",
            ErrorKind::Render => "render",
            ErrorKind::Extraction => "extraction",
            ErrorKind::Internal => "internal",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ErrorKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "transport" => Ok(ErrorKind::Transport),
            "blocked" => Ok(ErrorKind::Blocked),
            "challenge_unsolved" => Ok(ErrorKind::ChallengeUnsolved),
            "render" => Ok(ErrorKind::Render),
            "extraction" => Ok(ErrorKind::Extraction),
            "internal" => Ok(ErrorKind::Internal),
            _ => Err(format!("Unknown error kind: {}", s)),
        }
    }
}

impl AppError {
    /// Maps the error onto the kind reported in failure records.
    pub fn kind(&self) -> ErrorKind {
        match self {
            AppError::HttpError(_)
            | AppError::Timeout(_)
            | AppError::NetworkError(_)
            | AppError::ProxyError(_) => ErrorKind::Transport,
            AppError::Blocked(_) => ErrorKind::Blocked,
            AppError::ChallengeUnsolved(_) | AppError::CaptchaError(_) | AppError::OcrError(_) => {
                ErrorKind::ChallengeUnsolved
            }
            AppError::RenderError(_) => ErrorKind::Render,
            AppError::ExtractionError(_) => ErrorKind::Extraction,
            AppError::StorageError(_)
            | AppError::ConfigError(_)
            | AppError::SerializationError(_)
            | AppError::Generic(_) => ErrorKind::Internal,
        }
    }

    /// Returns true if the identity used for the attempt should be penalised.
    pub fn penalises_identity(&self) -> bool {
        matches!(
            self,
            AppError::Blocked(_)
                | AppError::NetworkError(_)
                | AppError::Timeout(_)
                | AppError::HttpError(_)
        )
    }
}
