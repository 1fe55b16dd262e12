pub mod config;
pub mod error;
pub mod frames;
pub mod service;
pub mod speed;
pub mod storage;

pub use config::{
    load_service_config, ExtractionSection, PathsSection, ServiceConfig, StorageSection,
    ToolsSection,
};
pub use error::{ConfigError, MediaError, MediaResult, Result};
pub use frames::{
    schedule, DurationProbe, ExtractedFrame, FfmpegFrameDecoder, FfprobeDurationProbe,
    FrameBatch, FrameDecoder, FrameExtractor, FramePipeline, ResultAssembler, SampleTimestamp,
    ScratchArea, UploadedVideo, Workspace,
};
pub use service::{
    ErrorResponse, FrameLimits, FrameRequest, FramesResponse, MediaService, SpeedRequest,
    SpeedResponse,
};
pub use speed::{SpeedFactor, SpeedTranscoder};
pub use storage::{HttpObjectStore, ObjectBody, ObjectStore, StoredObject, UploadRequest};
