use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use tokio::process::Command;
use tokio::time::timeout;
use tracing::debug;

use crate::config::{ExtractionSection, ToolsSection};
use crate::error::{MediaError, MediaResult};

use super::types::SampleTimestamp;

pub const FRAME_FILE_PREFIX: &str = "frame-";
pub const FRAME_EXTENSION: &str = "jpg";

const STDERR_TAIL_CHARS: usize = 2_000;

pub fn frame_file_name(ordinal: usize) -> String {
    format!("{FRAME_FILE_PREFIX}{ordinal}.{FRAME_EXTENSION}")
}

/// Ordinal embedded in a decoder output name such as `frame-12.jpg`.
pub fn parse_frame_ordinal(file_name: &str) -> Option<usize> {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    let pattern = PATTERN.get_or_init(|| {
        Regex::new(r"^frame-(\d+)\.[A-Za-z0-9]+$").expect("frame name pattern is valid")
    });
    pattern
        .captures(file_name)?
        .get(1)?
        .as_str()
        .parse()
        .ok()
}

/// External decode capability: writes one image per timestamp into
/// `output_dir`, named with [`frame_file_name`].
#[async_trait]
pub trait FrameDecoder: Send + Sync {
    async fn decode(
        &self,
        input: &Path,
        timestamps: &[SampleTimestamp],
        output_dir: &Path,
    ) -> MediaResult<()>;
}

#[derive(Debug, Clone)]
pub struct FfmpegFrameDecoder {
    binary: PathBuf,
    image_width: u32,
    jpeg_quality: u32,
}

impl FfmpegFrameDecoder {
    pub fn new(binary: impl Into<PathBuf>, image_width: u32, jpeg_quality: u32) -> Self {
        Self {
            binary: binary.into(),
            image_width,
            jpeg_quality,
        }
    }

    pub fn from_config(tools: &ToolsSection, extraction: &ExtractionSection) -> Self {
        Self::new(
            &tools.ffmpeg_path,
            extraction.image_width,
            extraction.jpeg_quality,
        )
    }

    /// One decode pass with one single-frame output per timestamp; each output
    /// seeks on its own with an output-side `-ss`.
    pub fn build_args(
        &self,
        input: &Path,
        timestamps: &[SampleTimestamp],
        output_dir: &Path,
    ) -> Vec<OsString> {
        let mut args: Vec<OsString> = ["-hide_banner", "-loglevel", "error", "-nostdin", "-y", "-i"]
            .iter()
            .map(OsString::from)
            .collect();
        args.push(input.as_os_str().to_owned());
        let scale = format!("scale={}:-2", self.image_width);
        for timestamp in timestamps {
            args.extend(
                [
                    "-map".to_string(),
                    "0:v:0".to_string(),
                    "-ss".to_string(),
                    format!("{:.6}", timestamp.seconds),
                    "-frames:v".to_string(),
                    "1".to_string(),
                    "-vf".to_string(),
                    scale.clone(),
                    "-q:v".to_string(),
                    self.jpeg_quality.to_string(),
                ]
                .into_iter()
                .map(OsString::from),
            );
            args.push(
                output_dir
                    .join(frame_file_name(timestamp.ordinal))
                    .into_os_string(),
            );
        }
        args
    }
}

#[async_trait]
impl FrameDecoder for FfmpegFrameDecoder {
    async fn decode(
        &self,
        input: &Path,
        timestamps: &[SampleTimestamp],
        output_dir: &Path,
    ) -> MediaResult<()> {
        let output = Command::new(&self.binary)
            .kill_on_drop(true)
            .stdin(Stdio::null())
            .args(self.build_args(input, timestamps, output_dir))
            .output()
            .await
            .map_err(|err| {
                MediaError::Extraction(format!(
                    "failed to launch {}: {err}",
                    self.binary.display()
                ))
            })?;
        if !output.status.success() {
            return Err(MediaError::Extraction(format!(
                "ffmpeg exited with {}: {}",
                output.status,
                stderr_tail(&output.stderr)
            )));
        }
        Ok(())
    }
}

fn stderr_tail(stderr: &[u8]) -> String {
    let text = String::from_utf8_lossy(stderr);
    let trimmed = text.trim();
    let skip = trimmed.chars().count().saturating_sub(STDERR_TAIL_CHARS);
    trimmed.chars().skip(skip).collect()
}

/// Drives a [`FrameDecoder`] once per request under a wall-clock limit.
#[derive(Clone)]
pub struct FrameExtractor {
    decoder: Arc<dyn FrameDecoder>,
    timeout: Duration,
}

impl FrameExtractor {
    pub fn new(decoder: Arc<dyn FrameDecoder>, timeout: Duration) -> Self {
        Self { decoder, timeout }
    }

    pub async fn extract(
        &self,
        input: &Path,
        timestamps: &[SampleTimestamp],
        output_dir: &Path,
    ) -> MediaResult<()> {
        if timestamps.is_empty() {
            return Err(MediaError::Extraction("no timestamps to extract".into()));
        }
        debug!(frames = timestamps.len(), output = %output_dir.display(), "extracting frames");
        match timeout(self.timeout, self.decoder.decode(input, timestamps, output_dir)).await {
            Ok(result) => result,
            Err(_) => Err(MediaError::Extraction(format!(
                "decoder timed out after {:?}",
                self.timeout
            ))),
        }
    }
}
