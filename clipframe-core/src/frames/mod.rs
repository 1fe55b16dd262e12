mod assemble;
mod extract;
mod probe;
mod schedule;
mod types;
mod workspace;

use std::sync::Arc;

use tracing::{debug, info};

use crate::config::ServiceConfig;
use crate::error::MediaResult;

pub use assemble::ResultAssembler;
pub use extract::{
    frame_file_name, parse_frame_ordinal, FfmpegFrameDecoder, FrameDecoder, FrameExtractor,
    FRAME_EXTENSION, FRAME_FILE_PREFIX,
};
pub use probe::{parse_probe_output, DurationProbe, FfprobeDurationProbe};
pub use schedule::{schedule, EDGE_EPSILON_SECONDS};
pub use types::{ExtractedFrame, FrameBatch, SampleTimestamp, UploadedVideo};
pub use workspace::{ScratchArea, Workspace};

/// Probe, schedule, extract and assemble inside one request-scoped workspace.
#[derive(Clone)]
pub struct FramePipeline {
    scratch: ScratchArea,
    probe: Arc<dyn DurationProbe>,
    extractor: FrameExtractor,
    assembler: ResultAssembler,
}

impl FramePipeline {
    pub fn new(
        scratch: ScratchArea,
        probe: Arc<dyn DurationProbe>,
        extractor: FrameExtractor,
    ) -> Self {
        Self {
            scratch,
            probe,
            extractor,
            assembler: ResultAssembler::new(),
        }
    }

    pub fn from_config(config: &ServiceConfig) -> Self {
        let probe = Arc::new(FfprobeDurationProbe::from_config(&config.tools));
        let decoder = Arc::new(FfmpegFrameDecoder::from_config(
            &config.tools,
            &config.extraction,
        ));
        let extractor = FrameExtractor::new(decoder, config.tools.extract_timeout());
        Self::new(ScratchArea::new(config.scratch_root()), probe, extractor)
    }

    pub fn scratch(&self) -> &ScratchArea {
        &self.scratch
    }

    /// The workspace is released on every path out of this function, after
    /// the stages have finished or failed.
    pub async fn run(&self, video: &UploadedVideo, frame_count: usize) -> MediaResult<FrameBatch> {
        let mut workspace = self.scratch.acquire(&video.extension()).await?;
        let outcome = self.run_in(&workspace, video, frame_count).await;
        workspace.release().await;
        outcome
    }

    async fn run_in(
        &self,
        workspace: &Workspace,
        video: &UploadedVideo,
        frame_count: usize,
    ) -> MediaResult<FrameBatch> {
        workspace.write_input(&video.bytes).await?;

        let duration = self.probe.probe(workspace.input_path()).await?;
        let timestamps = schedule(duration, frame_count)?;
        debug!(
            workspace = %workspace.id(),
            duration,
            frames = timestamps.len(),
            "sample schedule computed"
        );

        self.extractor
            .extract(workspace.input_path(), &timestamps, workspace.output_dir())
            .await?;
        let frames = self
            .assembler
            .assemble(workspace.output_dir(), &timestamps)
            .await?;

        info!(workspace = %workspace.id(), frames = frames.len(), "frames extracted");
        Ok(FrameBatch::new(workspace.id(), duration, frames))
    }
}
