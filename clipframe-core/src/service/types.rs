use serde::Serialize;
use uuid::Uuid;

use crate::error::MediaError;
use crate::frames::{FrameBatch, UploadedVideo};
use crate::storage::StoredObject;

/// Inbound frame-extraction request, fields as they arrive from a form.
#[derive(Debug, Clone, Default)]
pub struct FrameRequest {
    pub video: Option<UploadedVideo>,
    pub frame_count: Option<String>,
}

/// Inbound speed-change request.
#[derive(Debug, Clone, Default)]
pub struct SpeedRequest {
    pub video: Option<UploadedVideo>,
    pub speed: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct FramePayload {
    pub frame: String,
    pub filename: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FramesResponse {
    pub success: bool,
    pub frames: Vec<FramePayload>,
    pub batch_id: Uuid,
}

impl From<FrameBatch> for FramesResponse {
    fn from(batch: FrameBatch) -> Self {
        let frames = batch
            .frames
            .iter()
            .map(|frame| FramePayload {
                frame: frame.data_uri(),
                filename: frame.file_name.clone(),
            })
            .collect();
        Self {
            success: true,
            frames,
            batch_id: batch.batch_id,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SpeedResponse {
    pub video_url: String,
}

impl From<StoredObject> for SpeedResponse {
    fn from(stored: StoredObject) -> Self {
        Self {
            video_url: stored.url,
        }
    }
}

/// Failure body. Carries no internal detail; that goes to the log.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorResponse {
    #[serde(skip)]
    pub status: u16,
    pub error: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Frames,
    Speed,
}

impl Operation {
    pub fn label(&self) -> &'static str {
        match self {
            Operation::Frames => "frames",
            Operation::Speed => "speed",
        }
    }

    fn generic_failure(&self) -> &'static str {
        match self {
            Operation::Frames => "Failed to extract frames",
            Operation::Speed => "Error processing video",
        }
    }
}

impl ErrorResponse {
    pub fn from_error(operation: Operation, error: &MediaError) -> Self {
        let message = match error {
            MediaError::InputValidation(message) => message.clone(),
            _ => operation.generic_failure().to_string(),
        };
        Self {
            status: error.status_code(),
            error: message,
        }
    }
}
