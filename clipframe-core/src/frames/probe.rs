use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::process::Command;
use tokio::time::timeout;

use crate::config::ToolsSection;
use crate::error::{MediaError, MediaResult};

/// Reports the total playable duration of a media file, in seconds.
#[async_trait]
pub trait DurationProbe: Send + Sync {
    async fn probe(&self, path: &Path) -> MediaResult<f64>;
}

#[derive(Debug, Clone)]
pub struct FfprobeDurationProbe {
    binary: PathBuf,
    timeout: Duration,
}

impl FfprobeDurationProbe {
    pub fn new(binary: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            binary: binary.into(),
            timeout,
        }
    }

    pub fn from_config(tools: &ToolsSection) -> Self {
        Self::new(&tools.ffprobe_path, tools.probe_timeout())
    }
}

#[async_trait]
impl DurationProbe for FfprobeDurationProbe {
    async fn probe(&self, path: &Path) -> MediaResult<f64> {
        let mut command = Command::new(&self.binary);
        command
            .kill_on_drop(true)
            .stdin(Stdio::null())
            .arg("-v")
            .arg("error")
            .arg("-print_format")
            .arg("json")
            .arg("-show_format")
            .arg("-show_streams")
            .arg(path);
        match timeout(self.timeout, command.output()).await {
            Ok(Ok(output)) if output.status.success() => parse_probe_output(&output.stdout),
            Ok(Ok(output)) => {
                let stderr = String::from_utf8_lossy(&output.stderr);
                Err(MediaError::Probe(format!(
                    "ffprobe exited with {}: {}",
                    output.status,
                    stderr.trim()
                )))
            }
            Ok(Err(err)) => Err(MediaError::Probe(format!(
                "failed to launch {}: {err}",
                self.binary.display()
            ))),
            Err(_) => Err(MediaError::Probe(format!(
                "ffprobe timed out after {:?}",
                self.timeout
            ))),
        }
    }
}

#[derive(Debug, Deserialize)]
struct FfprobeOutput {
    format: Option<FfprobeFormat>,
    #[serde(default)]
    streams: Vec<FfprobeStream>,
}

#[derive(Debug, Deserialize)]
struct FfprobeFormat {
    duration: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FfprobeStream {
    codec_type: Option<String>,
    duration: Option<String>,
}

/// Container duration first, then the first video stream's.
pub fn parse_probe_output(stdout: &[u8]) -> MediaResult<f64> {
    let parsed: FfprobeOutput = serde_json::from_slice(stdout)
        .map_err(|err| MediaError::Probe(format!("invalid ffprobe payload: {err}")))?;
    let container = parsed
        .format
        .as_ref()
        .and_then(|format| format.duration.as_deref())
        .and_then(|value| value.parse::<f64>().ok());
    let stream = || {
        parsed
            .streams
            .iter()
            .filter(|stream| stream.codec_type.as_deref() == Some("video"))
            .find_map(|stream| stream.duration.as_deref()?.parse::<f64>().ok())
    };
    container
        .or_else(stream)
        .ok_or_else(|| MediaError::Probe("ffprobe reported no duration".into()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_container_duration() {
        let payload = br#"{"format":{"duration":"10.010000"},"streams":[]}"#;
        let duration = parse_probe_output(payload).unwrap();
        assert!((duration - 10.01).abs() < 1e-9);
    }

    #[test]
    fn falls_back_to_video_stream() {
        let payload = br#"{
            "format": {"duration": "N/A"},
            "streams": [
                {"codec_type": "audio", "duration": "99.0"},
                {"codec_type": "video", "duration": "4.5"}
            ]
        }"#;
        assert_eq!(parse_probe_output(payload).unwrap(), 4.5);
    }

    #[test]
    fn missing_duration_is_a_probe_error() {
        let err = parse_probe_output(br#"{"format":{}}"#).unwrap_err();
        assert!(matches!(err, MediaError::Probe(_)));
        let err = parse_probe_output(b"not json").unwrap_err();
        assert!(matches!(err, MediaError::Probe(_)));
    }

    #[tokio::test]
    async fn missing_binary_is_a_probe_error() {
        let probe = FfprobeDurationProbe::new(
            "/nonexistent/clipframe-ffprobe",
            Duration::from_secs(1),
        );
        let err = probe.probe(Path::new("/tmp/none.mp4")).await.unwrap_err();
        assert!(matches!(err, MediaError::Probe(_)));
    }
}
