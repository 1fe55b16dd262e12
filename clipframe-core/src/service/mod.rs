mod types;

use std::sync::Arc;

use tracing::{error, info, warn};

use crate::config::ServiceConfig;
use crate::error::{MediaError, MediaResult};
use crate::frames::{FrameBatch, FramePipeline, UploadedVideo};
use crate::speed::{SpeedFactor, SpeedTranscoder};
use crate::storage::{HttpObjectStore, ObjectStore, StoredObject};

pub use types::{
    ErrorResponse, FramePayload, FrameRequest, FramesResponse, Operation, SpeedRequest,
    SpeedResponse,
};

#[derive(Debug, Clone, Copy)]
pub struct FrameLimits {
    pub default_frames: usize,
    pub max_frames: usize,
}

/// Request boundary: validates inbound fields, runs a pipeline, and turns
/// failures into responses that carry no internal detail.
#[derive(Clone)]
pub struct MediaService {
    frames: FramePipeline,
    transcoder: SpeedTranscoder,
    store: Arc<dyn ObjectStore>,
    limits: FrameLimits,
    resource_type: String,
}

impl MediaService {
    pub fn new(
        frames: FramePipeline,
        transcoder: SpeedTranscoder,
        store: Arc<dyn ObjectStore>,
        limits: FrameLimits,
    ) -> Self {
        Self {
            frames,
            transcoder,
            store,
            limits,
            resource_type: "video".to_string(),
        }
    }

    pub fn with_resource_type(mut self, resource_type: impl Into<String>) -> Self {
        self.resource_type = resource_type.into();
        self
    }

    pub fn from_config(config: &ServiceConfig) -> MediaResult<Self> {
        let store = Arc::new(HttpObjectStore::from_config(&config.storage)?);
        let limits = FrameLimits {
            default_frames: config.extraction.default_frames,
            max_frames: config.extraction.max_frames,
        };
        Ok(Self::new(
            FramePipeline::from_config(config),
            SpeedTranscoder::from_config(&config.tools),
            store,
            limits,
        )
        .with_resource_type(&config.storage.resource_type))
    }

    pub fn limits(&self) -> FrameLimits {
        self.limits
    }

    pub async fn extract_frames(&self, request: FrameRequest) -> MediaResult<FrameBatch> {
        let video = require_video(request.video)?;
        let count = parse_frame_count(request.frame_count.as_deref(), self.limits.default_frames);
        if count > self.limits.max_frames {
            return Err(MediaError::InputValidation(format!(
                "frame count {count} exceeds the maximum of {}",
                self.limits.max_frames
            )));
        }
        self.frames.run(&video, count).await
    }

    pub async fn change_speed(&self, request: SpeedRequest) -> MediaResult<StoredObject> {
        let video = require_video(request.video)?;
        let speed = SpeedFactor::new(parse_speed(request.speed.as_deref())?)?;
        self.transcoder
            .transcode(video, speed, self.store.as_ref(), &self.resource_type)
            .await
    }

    pub async fn handle_frames(
        &self,
        request: FrameRequest,
    ) -> Result<FramesResponse, ErrorResponse> {
        match self.extract_frames(request).await {
            Ok(batch) => {
                info!(batch = %batch.batch_id, frames = batch.len(), "frames request completed");
                Ok(FramesResponse::from(batch))
            }
            Err(err) => Err(self.reject(Operation::Frames, &err)),
        }
    }

    pub async fn handle_speed(&self, request: SpeedRequest) -> Result<SpeedResponse, ErrorResponse> {
        match self.change_speed(request).await {
            Ok(stored) => Ok(SpeedResponse::from(stored)),
            Err(err) => Err(self.reject(Operation::Speed, &err)),
        }
    }

    fn reject(&self, operation: Operation, err: &MediaError) -> ErrorResponse {
        if err.is_client_error() {
            warn!(operation = operation.label(), kind = err.kind(), error = %err, "request rejected");
        } else {
            error!(operation = operation.label(), kind = err.kind(), error = %err, "request failed");
        }
        ErrorResponse::from_error(operation, err)
    }
}

fn require_video(video: Option<UploadedVideo>) -> MediaResult<UploadedVideo> {
    let video =
        video.ok_or_else(|| MediaError::InputValidation("No video file provided".into()))?;
    if video.is_empty() {
        return Err(MediaError::InputValidation("Uploaded video is empty".into()));
    }
    let media_type = video.media_type.to_ascii_lowercase();
    if !(media_type.starts_with("video/") || media_type == "application/octet-stream") {
        return Err(MediaError::InputValidation(format!(
            "Unsupported media type {}",
            video.media_type
        )));
    }
    Ok(video)
}

/// Leading integer of `raw`; `default` when absent, non-numeric or below 1.
pub fn parse_frame_count(raw: Option<&str>, default: usize) -> usize {
    let Some(raw) = raw.map(str::trim) else {
        return default;
    };
    let (negative, digits) = match raw.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, raw.strip_prefix('+').unwrap_or(raw)),
    };
    let end = digits
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(digits.len());
    let digits = &digits[..end];
    if digits.is_empty() {
        return default;
    }
    if negative {
        return default;
    }
    match digits.parse::<usize>() {
        Ok(0) => default,
        Ok(value) => value,
        Err(_) => usize::MAX,
    }
}

pub fn parse_speed(raw: Option<&str>) -> MediaResult<f64> {
    let raw = raw
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .ok_or_else(|| MediaError::InputValidation("speed is required".into()))?;
    raw.parse::<f64>()
        .map_err(|_| MediaError::InputValidation(format!("speed must be numeric, got {raw:?}")))
}
