//! Playback-rate re-encode streamed from ffmpeg straight into an object store.

use std::ffi::OsString;
use std::io;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::ToolsSection;
use crate::error::{MediaError, MediaResult};
use crate::frames::UploadedVideo;
use crate::storage::{ObjectStore, StoredObject, UploadRequest};

const CHUNK_SIZE: usize = 64 * 1024;
const CHANNEL_DEPTH: usize = 8;
const OUTPUT_CONTENT_TYPE: &str = "video/mp4";

/// Playback-rate multiplier; `> 1` speeds up, `< 1` slows down.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SpeedFactor(f64);

impl SpeedFactor {
    pub fn new(value: f64) -> MediaResult<Self> {
        if !value.is_finite() || value <= 0.0 {
            return Err(MediaError::Transcode(format!(
                "speed factor must be a positive number, got {value}"
            )));
        }
        Ok(Self(value))
    }

    pub fn value(&self) -> f64 {
        self.0
    }

    /// Presentation-timestamp scaling, e.g. `setpts=0.5*PTS` for 2x.
    pub fn setpts_filter(&self) -> String {
        format!("setpts={}*PTS", 1.0 / self.0)
    }
}

#[derive(Debug, Clone)]
pub struct SpeedTranscoder {
    binary: PathBuf,
    timeout: Duration,
}

enum PumpOutcome {
    Completed,
    ConsumerClosed,
    Failed(MediaError),
}

impl SpeedTranscoder {
    pub fn new(binary: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            binary: binary.into(),
            timeout,
        }
    }

    pub fn from_config(tools: &ToolsSection) -> Self {
        Self::new(&tools.ffmpeg_path, tools.transcode_timeout())
    }

    pub fn build_args(&self, speed: SpeedFactor) -> Vec<OsString> {
        [
            "-hide_banner".to_string(),
            "-loglevel".to_string(),
            "error".to_string(),
            "-i".to_string(),
            "pipe:0".to_string(),
            "-vf".to_string(),
            speed.setpts_filter(),
            "-movflags".to_string(),
            "frag_keyframe+empty_moov".to_string(),
            "-f".to_string(),
            "mp4".to_string(),
            "pipe:1".to_string(),
        ]
        .into_iter()
        .map(OsString::from)
        .collect()
    }

    /// Re-encodes `video` at `speed` and uploads the result. Nothing touches
    /// local disk. A failure after the encoder starts aborts the upload; a
    /// launch failure never contacts the store.
    pub async fn transcode(
        &self,
        video: UploadedVideo,
        speed: SpeedFactor,
        store: &dyn ObjectStore,
        resource_type: &str,
    ) -> MediaResult<StoredObject> {
        let key = format!("{}.mp4", Uuid::new_v4());
        let request = UploadRequest {
            key: key.clone(),
            resource_type: resource_type.to_string(),
            content_type: OUTPUT_CONTENT_TYPE.to_string(),
        };
        debug!(key = %key, speed = speed.value(), "starting speed transcode");

        // Nothing has reached the store yet, so there is nothing to abort.
        let encoder = self.spawn(speed)?;
        let outcome = timeout(self.timeout, stream(encoder, video, store, request)).await;
        let result = match outcome {
            Ok(result) => result,
            Err(_) => Err(MediaError::Transcode(format!(
                "transcode timed out after {:?}",
                self.timeout
            ))),
        };

        match result {
            Ok(stored) => {
                info!(key = %stored.key, url = %stored.url, "speed transcode uploaded");
                Ok(stored)
            }
            Err(err) => {
                if let Err(abort_err) = store.abort(resource_type, &key).await {
                    warn!(key = %key, error = %abort_err, "failed to abort partial upload");
                }
                Err(err)
            }
        }
    }

    fn spawn(&self, speed: SpeedFactor) -> MediaResult<Encoder> {
        let mut child = Command::new(&self.binary)
            .kill_on_drop(true)
            .args(self.build_args(speed))
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|err| {
                MediaError::Transcode(format!(
                    "failed to launch {}: {err}",
                    self.binary.display()
                ))
            })?;
        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| MediaError::Transcode("ffmpeg stdin unavailable".into()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| MediaError::Transcode("ffmpeg stdout unavailable".into()))?;
        Ok(Encoder {
            child,
            stdin,
            stdout,
        })
    }
}

/// A running ffmpeg whose pipes have not been wired to the upload yet.
struct Encoder {
    child: Child,
    stdin: ChildStdin,
    stdout: ChildStdout,
}

async fn stream(
    encoder: Encoder,
    video: UploadedVideo,
    store: &dyn ObjectStore,
    request: UploadRequest,
) -> MediaResult<StoredObject> {
    let Encoder {
        child,
        stdin,
        stdout,
    } = encoder;
    let (sender, receiver) = mpsc::channel(CHANNEL_DEPTH);
    let (fed, pumped, uploaded) = tokio::join!(
        feed_stdin(stdin, video.bytes),
        pump_stdout(child, stdout, sender),
        store.put_stream(request, ReceiverStream::new(receiver)),
    );
    if let Err(err) = fed {
        debug!(error = %err, "ffmpeg stopped reading input early");
    }

    match (pumped, uploaded) {
        (PumpOutcome::Failed(err), _) => Err(err),
        (_, Err(err)) => Err(err),
        (PumpOutcome::ConsumerClosed, Ok(_)) => Err(MediaError::Upload(
            "store committed before the transcode finished".into(),
        )),
        (PumpOutcome::Completed, Ok(stored)) => Ok(stored),
    }
}

async fn feed_stdin(mut stdin: ChildStdin, bytes: Vec<u8>) -> io::Result<()> {
    stdin.write_all(&bytes).await?;
    stdin.shutdown().await
}

/// Forwards stdout chunks to the upload. The channel closes cleanly only
/// after ffmpeg has exited successfully; otherwise an error item is sent.
async fn pump_stdout(
    mut child: Child,
    mut stdout: ChildStdout,
    sender: mpsc::Sender<io::Result<Vec<u8>>>,
) -> PumpOutcome {
    let stderr = child.stderr.take();
    let stderr_task = tokio::spawn(read_to_string_lossy(stderr));
    let mut buffer = vec![0u8; CHUNK_SIZE];
    loop {
        match stdout.read(&mut buffer).await {
            Ok(0) => break,
            Ok(read) => {
                if sender.send(Ok(buffer[..read].to_vec())).await.is_err() {
                    let _ = child.kill().await;
                    return PumpOutcome::ConsumerClosed;
                }
            }
            Err(err) => {
                let _ = child.kill().await;
                let message = format!("failed reading ffmpeg output: {err}");
                let _ = sender.send(Err(io::Error::other(message.clone()))).await;
                return PumpOutcome::Failed(MediaError::Transcode(message));
            }
        }
    }

    let status = child.wait().await;
    let stderr = stderr_task.await.unwrap_or_default();
    let failure = match status {
        Ok(status) if status.success() => return PumpOutcome::Completed,
        Ok(status) => format!("ffmpeg exited with {status}: {}", stderr.trim()),
        Err(err) => format!("failed waiting for ffmpeg: {err}"),
    };
    let _ = sender.send(Err(io::Error::other(failure.clone()))).await;
    PumpOutcome::Failed(MediaError::Transcode(failure))
}

async fn read_to_string_lossy<R: AsyncRead + Unpin>(reader: Option<R>) -> String {
    let Some(mut reader) = reader else {
        return String::new();
    };
    let mut buffer = Vec::new();
    if let Err(err) = reader.read_to_end(&mut buffer).await {
        debug!(error = %err, "failed reading ffmpeg stderr");
    }
    String::from_utf8_lossy(&buffer).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_non_positive_speeds() {
        for value in [0.0, -1.0, f64::NAN, f64::INFINITY] {
            assert!(matches!(
                SpeedFactor::new(value),
                Err(MediaError::Transcode(_))
            ));
        }
    }

    #[test]
    fn filter_scales_timestamps_by_inverse_speed() {
        assert_eq!(SpeedFactor::new(2.0).unwrap().setpts_filter(), "setpts=0.5*PTS");
        assert_eq!(SpeedFactor::new(0.5).unwrap().setpts_filter(), "setpts=2*PTS");
        assert_eq!(SpeedFactor::new(1.0).unwrap().setpts_filter(), "setpts=1*PTS");
    }

    #[test]
    fn args_stream_through_pipes() {
        let transcoder = SpeedTranscoder::new("ffmpeg", Duration::from_secs(1));
        let args: Vec<String> = transcoder
            .build_args(SpeedFactor::new(4.0).unwrap())
            .into_iter()
            .map(|arg| arg.to_string_lossy().into_owned())
            .collect();
        assert_eq!(args.first().map(String::as_str), Some("-hide_banner"));
        assert!(args.windows(2).any(|w| w[0] == "-i" && w[1] == "pipe:0"));
        assert!(args.windows(2).any(|w| w[0] == "-vf" && w[1] == "setpts=0.25*PTS"));
        assert!(args.windows(2).any(|w| w[0] == "-f" && w[1] == "mp4"));
        assert_eq!(args.last().map(String::as_str), Some("pipe:1"));
    }
}
