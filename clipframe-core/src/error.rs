use std::io;
use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Io { source: io::Error, path: PathBuf },
    #[error("failed to parse config {path}: {source}")]
    Parse {
        source: toml::de::Error,
        path: PathBuf,
    },
    #[error("invalid config value for {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

pub type Result<T> = std::result::Result<T, ConfigError>;

/// Terminal failures of a single media request. None of them are retried.
#[derive(Debug, Error)]
pub enum MediaError {
    #[error("invalid input: {0}")]
    InputValidation(String),
    #[error("could not determine video duration: {0}")]
    Probe(String),
    #[error("video reports unusable duration {0}s")]
    InvalidDuration(f64),
    #[error("frame extraction failed: {0}")]
    Extraction(String),
    #[error("decoder produced unexpected output file {file_name}: {reason}")]
    MalformedOutput { file_name: String, reason: String },
    #[error("decoder produced {produced} of {expected} frames")]
    IncompleteBatch { expected: usize, produced: usize },
    #[error("speed transcode failed: {0}")]
    Transcode(String),
    #[error("upload failed: {0}")]
    Upload(String),
    #[error("io error at {path}: {source}")]
    Io { source: io::Error, path: PathBuf },
}

impl MediaError {
    pub fn kind(&self) -> &'static str {
        match self {
            MediaError::InputValidation(_) => "input_validation",
            MediaError::Probe(_) => "probe",
            MediaError::InvalidDuration(_) => "invalid_duration",
            MediaError::Extraction(_) => "extraction",
            MediaError::MalformedOutput { .. } => "malformed_output",
            MediaError::IncompleteBatch { .. } => "incomplete_batch",
            MediaError::Transcode(_) => "transcode",
            MediaError::Upload(_) => "upload",
            MediaError::Io { .. } => "io",
        }
    }

    pub fn is_client_error(&self) -> bool {
        matches!(self, MediaError::InputValidation(_))
    }

    /// HTTP-style status for the response carrying this error.
    pub fn status_code(&self) -> u16 {
        if self.is_client_error() {
            400
        } else {
            500
        }
    }

    pub(crate) fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        MediaError::Io {
            source,
            path: path.into(),
        }
    }
}

impl From<reqwest::Error> for MediaError {
    fn from(error: reqwest::Error) -> Self {
        MediaError::Upload(error.to_string())
    }
}

pub type MediaResult<T> = std::result::Result<T, MediaError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_input_validation_is_a_client_error() {
        assert_eq!(MediaError::InputValidation("empty".into()).status_code(), 400);
        assert_eq!(MediaError::Probe("corrupt".into()).status_code(), 500);
        assert_eq!(
            MediaError::IncompleteBatch {
                expected: 3,
                produced: 2
            }
            .status_code(),
            500
        );
    }

    #[test]
    fn incomplete_batch_message_reports_counts() {
        let err = MediaError::IncompleteBatch {
            expected: 3,
            produced: 2,
        };
        assert_eq!(err.to_string(), "decoder produced 2 of 3 frames");
        assert_eq!(err.kind(), "incomplete_batch");
    }
}
