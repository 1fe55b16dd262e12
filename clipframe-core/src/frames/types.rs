use std::path::Path;

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

const DEFAULT_EXTENSION: &str = "mp4";

/// Video payload received with a request. Never retained past the request.
#[derive(Debug, Clone)]
pub struct UploadedVideo {
    pub bytes: Vec<u8>,
    pub media_type: String,
    pub file_name: Option<String>,
}

impl UploadedVideo {
    pub fn new(bytes: Vec<u8>, media_type: impl Into<String>) -> Self {
        Self {
            bytes,
            media_type: media_type.into(),
            file_name: None,
        }
    }

    pub fn with_file_name(mut self, file_name: impl Into<String>) -> Self {
        self.file_name = Some(file_name.into());
        self
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Extension used for the scratch copy of the upload.
    pub fn extension(&self) -> String {
        let from_name = self
            .file_name
            .as_deref()
            .and_then(|name| Path::new(name).extension())
            .and_then(|ext| ext.to_str())
            .map(|ext| ext.to_ascii_lowercase())
            .filter(|ext| is_safe_extension(ext));
        if let Some(ext) = from_name {
            return ext;
        }
        let from_type = match self.media_type.as_str() {
            "video/quicktime" => "mov",
            "video/webm" => "webm",
            "video/x-matroska" => "mkv",
            "video/x-msvideo" => "avi",
            "video/mp2t" => "ts",
            _ => DEFAULT_EXTENSION,
        };
        from_type.to_string()
    }
}

fn is_safe_extension(ext: &str) -> bool {
    !ext.is_empty() && ext.len() <= 8 && ext.chars().all(|c| c.is_ascii_alphanumeric())
}

/// Point in playback time at which one frame is captured.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SampleTimestamp {
    pub ordinal: usize,
    pub seconds: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ExtractedFrame {
    pub ordinal: usize,
    pub timestamp_seconds: f64,
    pub file_name: String,
    pub media_type: String,
    /// Base64 (standard alphabet) image bytes.
    #[serde(skip)]
    pub encoded: String,
}

impl ExtractedFrame {
    pub fn data_uri(&self) -> String {
        format!("data:{};base64,{}", self.media_type, self.encoded)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct FrameBatch {
    pub batch_id: Uuid,
    pub duration_seconds: f64,
    pub frames: Vec<ExtractedFrame>,
    pub completed_at: DateTime<Utc>,
}

impl FrameBatch {
    pub fn new(batch_id: Uuid, duration_seconds: f64, frames: Vec<ExtractedFrame>) -> Self {
        Self {
            batch_id,
            duration_seconds,
            frames,
            completed_at: Utc::now(),
        }
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }
}
