//! Error types for the VQA grader.

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Result type alias using our custom error.
pub type Result<T> = std::result::Result<T, GraderError>;

/// Errors that can occur while collecting or grading answers.
#[derive(Error, Debug)]
pub enum GraderError {
    /// Error reading or writing files.
    #[error("I/O error for path '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// CSV reader/writer failure that is not tied to a single row.
    #[error("CSV error: {0}")]
    Csv(String),

    /// A row could not be parsed into its record structure.
    #[error("Malformed record at row {line}: {reason}")]
    MalformedRecord { line: u64, reason: String },

    /// A record required by the join is absent.
    #[error("No {what} for image '{image_id}', question '{question_id}'")]
    InputMissing {
        what: &'static str,
        image_id: String,
        question_id: String,
    },

    /// The image file referenced by a record does not exist.
    #[error("Image not found at '{0}'")]
    ImageNotFound(PathBuf),

    /// A single pair took longer than the configured limit.
    #[error("Timed out after {0:?}")]
    Timeout(Duration),

    /// The embedding or VQA backend could not be initialized.
    #[error("Model unavailable: {0}")]
    ModelUnavailable(String),

    /// Embedding inference failed.
    #[error("Embedding error: {0}")]
    Embedding(String),

    /// Caller passed arguments that violate an operation's contract.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// VQA API error.
    #[error("VQA API error: {0}")]
    VqaApi(String),

    /// HTTP request error.
    #[error("HTTP request failed: {0}")]
    Http(String),

    /// Configuration file error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Error during serialization/deserialization.
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl GraderError {
    /// Create an I/O error with path context.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Whether this error only affects the pair being processed.
    ///
    /// Everything except backend initialization and configuration errors is
    /// recoverable at the pipeline's per-pair boundary.
    pub fn is_per_pair(&self) -> bool {
        !matches!(self, Self::ModelUnavailable(_) | Self::Config(_))
    }
}

impl From<reqwest::Error> for GraderError {
    fn from(err: reqwest::Error) -> Self {
        GraderError::Http(err.to_string())
    }
}

impl From<serde_json::Error> for GraderError {
    fn from(err: serde_json::Error) -> Self {
        GraderError::Serialization(err.to_string())
    }
}

impl From<csv::Error> for GraderError {
    fn from(err: csv::Error) -> Self {
        match err.kind() {
            csv::ErrorKind::Io(_) => GraderError::Csv(err.to_string()),
            _ => {
                let line = err.position().map(|p| p.line()).unwrap_or(0);
                GraderError::MalformedRecord {
                    line,
                    reason: err.to_string(),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_per_pair_classification() {
        assert!(GraderError::ImageNotFound(PathBuf::from("x.png")).is_per_pair());
        assert!(GraderError::Timeout(Duration::from_secs(1)).is_per_pair());
        assert!(!GraderError::ModelUnavailable("no gpu".into()).is_per_pair());
    }

    #[test]
    fn test_input_missing_message() {
        let err = GraderError::InputMissing {
            what: "raw answer",
            image_id: "42".into(),
            question_id: "3".into(),
        };
        assert_eq!(
            err.to_string(),
            "No raw answer for image '42', question '3'"
        );
    }
}
