use std::fmt;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use clap::{Args, CommandFactory, Parser, Subcommand, ValueEnum};
use clap_complete::Shell;
use serde::Serialize;
use thiserror::Error;
use tokio::process::Command;
use tokio::time::timeout;
use tracing::debug;

use clipframe_core::service::{FrameRequest, SpeedRequest};
use clipframe_core::{
    load_service_config, schedule, ConfigError, DurationProbe, FfprobeDurationProbe,
    FramesResponse, MediaError, MediaService, SampleTimestamp, ScratchArea, ServiceConfig,
    SpeedResponse, UploadedVideo,
};

pub type Result<T> = std::result::Result<T, AppError>;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("config error: {0}")]
    Config(#[from] ConfigError),
    #[error("media error: {0}")]
    Media(#[from] MediaError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("request failed with status {status}: {message}")]
    Request { status: u16, message: String },
    #[error("{0}")]
    HealthCheck(String),
}

#[derive(Parser, Debug)]
#[command(author, version, about = "Frame extraction and speed transcoding control interface", long_about = None)]
pub struct Cli {
    /// Path to clipframe.toml
    #[arg(long, default_value = "configs/clipframe.toml")]
    pub config: PathBuf,
    /// Overrides paths.scratch_root
    #[arg(long)]
    pub scratch_root: Option<PathBuf>,
    /// Output format
    #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
    pub format: OutputFormat,
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Extracts evenly spaced frames from a video file
    Frames(FramesArgs),
    /// Re-encodes a video at a different playback speed and uploads it
    Speed(SpeedArgs),
    /// Prints the sample timestamps for a duration without decoding anything
    Schedule(ScheduleArgs),
    /// Reports the duration ffprobe sees for a file
    Probe(ProbeArgs),
    /// Checks external tools, scratch space and storage credentials
    Health,
    /// Generates shell completions
    Completions {
        #[arg(value_enum)]
        shell: Shell,
    },
}

#[derive(Args, Debug)]
pub struct FramesArgs {
    /// Video file to sample
    pub input: PathBuf,
    /// Number of frames, read the same way as the form field
    #[arg(long)]
    pub count: Option<String>,
    /// Media type of the upload; guessed from the extension when omitted
    #[arg(long)]
    pub media_type: Option<String>,
}

#[derive(Args, Debug)]
pub struct SpeedArgs {
    /// Video file to re-encode
    pub input: PathBuf,
    /// Playback-rate multiplier, e.g. 2.0 or 0.5
    #[arg(long)]
    pub speed: String,
    #[arg(long)]
    pub media_type: Option<String>,
}

#[derive(Args, Debug)]
pub struct ScheduleArgs {
    #[arg(long)]
    pub duration: f64,
    #[arg(long, default_value_t = 1)]
    pub count: usize,
}

#[derive(Args, Debug)]
pub struct ProbeArgs {
    pub input: PathBuf,
}

pub async fn run(cli: Cli) -> Result<()> {
    if let Commands::Completions { shell } = &cli.command {
        let mut command = Cli::command();
        clap_complete::generate(*shell, &mut command, "clipframectl", &mut std::io::stdout());
        return Ok(());
    }

    let context = AppContext::new(&cli)?;
    match &cli.command {
        Commands::Frames(args) => {
            let response = context.frames(args).await?;
            render(&response, cli.format)?;
        }
        Commands::Speed(args) => {
            let response = context.speed(args).await?;
            render(&response, cli.format)?;
        }
        Commands::Schedule(args) => {
            let report = context.schedule(args)?;
            render(&report, cli.format)?;
        }
        Commands::Probe(args) => {
            let report = context.probe(args).await?;
            render(&report, cli.format)?;
        }
        Commands::Health => {
            let report = context.health_check().await;
            render(&report, cli.format)?;
            if report
                .iter()
                .any(|entry| matches!(entry.status, CheckStatus::Error))
            {
                return Err(AppError::HealthCheck(
                    "one or more checks failed".to_string(),
                ));
            }
        }
        Commands::Completions { .. } => {}
    }

    Ok(())
}

fn render<T>(value: &T, format: OutputFormat) -> Result<()>
where
    T: Serialize + DisplayFallback,
{
    match format {
        OutputFormat::Text => {
            println!("{}", value.display());
            Ok(())
        }
        OutputFormat::Json => {
            let json = serde_json::to_string_pretty(value)?;
            println!("{}", json);
            Ok(())
        }
    }
}

trait DisplayFallback {
    fn display(&self) -> String;
}

#[derive(Debug)]
struct AppContext {
    config: ServiceConfig,
    config_path: PathBuf,
}

impl AppContext {
    fn new(cli: &Cli) -> Result<Self> {
        let config_path = cli.config.clone();
        let mut config = load_service_config(&config_path)?;
        if let Some(root) = &cli.scratch_root {
            config.paths.scratch_root = root.display().to_string();
        }
        debug!(config = %config_path.display(), scratch_root = %config.paths.scratch_root, "configuration loaded");
        Ok(Self {
            config,
            config_path,
        })
    }

    fn service(&self) -> Result<MediaService> {
        Ok(MediaService::from_config(&self.config)?)
    }

    async fn frames(&self, args: &FramesArgs) -> Result<FramesResponse> {
        let video = read_video(&args.input, args.media_type.as_deref()).await?;
        let request = FrameRequest {
            video: Some(video),
            frame_count: args.count.clone(),
        };
        self.service()?
            .handle_frames(request)
            .await
            .map_err(|err| AppError::Request {
                status: err.status,
                message: err.error,
            })
    }

    async fn speed(&self, args: &SpeedArgs) -> Result<SpeedResponse> {
        let video = read_video(&args.input, args.media_type.as_deref()).await?;
        let request = SpeedRequest {
            video: Some(video),
            speed: Some(args.speed.clone()),
        };
        self.service()?
            .handle_speed(request)
            .await
            .map_err(|err| AppError::Request {
                status: err.status,
                message: err.error,
            })
    }

    fn schedule(&self, args: &ScheduleArgs) -> Result<ScheduleReport> {
        let max_frames = self.config.extraction.max_frames;
        if args.count > max_frames {
            return Err(MediaError::InputValidation(format!(
                "frame count {} exceeds the maximum of {max_frames}",
                args.count
            ))
            .into());
        }
        let timestamps = schedule(args.duration, args.count)?;
        Ok(ScheduleReport {
            duration_seconds: args.duration,
            timestamps,
        })
    }

    async fn probe(&self, args: &ProbeArgs) -> Result<ProbeReport> {
        let probe = FfprobeDurationProbe::from_config(&self.config.tools);
        let duration_seconds = probe.probe(&args.input).await?;
        Ok(ProbeReport {
            path: args.input.clone(),
            duration_seconds,
        })
    }

    async fn health_check(&self) -> Vec<HealthEntry> {
        let mut results = vec![HealthEntry::ok(
            "config",
            self.config_path.display().to_string(),
        )];
        results.push(self.check_tool("ffmpeg", &self.config.tools.ffmpeg_path).await);
        results.push(self.check_tool("ffprobe", &self.config.tools.ffprobe_path).await);
        results.push(self.check_scratch_root().await);
        results.push(self.check_storage_token());
        results
    }

    async fn check_tool(&self, name: &str, binary: &str) -> HealthEntry {
        let mut command = Command::new(binary);
        command
            .kill_on_drop(true)
            .arg("-version")
            .stdin(Stdio::null())
            .stderr(Stdio::null());
        match timeout(self.config.tools.probe_timeout(), command.output()).await {
            Ok(Ok(output)) if output.status.success() => {
                let stdout = String::from_utf8_lossy(&output.stdout);
                let banner = stdout.lines().next().unwrap_or(binary).trim().to_string();
                HealthEntry::ok(name, banner)
            }
            Ok(Ok(output)) => HealthEntry::error(name, format!("{binary} exited with {}", output.status)),
            Ok(Err(err)) => HealthEntry::error(name, format!("{binary} unavailable: {err}")),
            Err(_) => HealthEntry::error(name, format!("{binary} did not answer -version")),
        }
    }

    async fn check_scratch_root(&self) -> HealthEntry {
        let root = self.config.scratch_root();
        let scratch = ScratchArea::new(&root);
        match scratch.acquire("probe").await {
            Ok(mut workspace) => {
                let written = workspace.write_input(b"clipframe").await;
                workspace.release().await;
                match written {
                    Ok(()) => HealthEntry::ok("scratch_root", format!("{} writable", root.display())),
                    Err(err) => HealthEntry::error("scratch_root", err.to_string()),
                }
            }
            Err(err) => HealthEntry::error("scratch_root", err.to_string()),
        }
    }

    fn check_storage_token(&self) -> HealthEntry {
        let Some(variable) = self.config.storage.api_token_env.as_deref() else {
            return HealthEntry::ok("storage_token", "not configured");
        };
        match std::env::var(variable) {
            Ok(token) if !token.trim().is_empty() => {
                HealthEntry::ok("storage_token", format!("{variable} set"))
            }
            _ => HealthEntry::warn(
                "storage_token",
                format!("{variable} is empty; uploads will be anonymous"),
            ),
        }
    }
}

async fn read_video(path: &Path, media_type: Option<&str>) -> Result<UploadedVideo> {
    let bytes = tokio::fs::read(path).await?;
    let media_type = media_type
        .map(str::to_string)
        .unwrap_or_else(|| guess_media_type(path).to_string());
    let mut video = UploadedVideo::new(bytes, media_type);
    if let Some(name) = path.file_name().and_then(|name| name.to_str()) {
        video = video.with_file_name(name);
    }
    Ok(video)
}

fn guess_media_type(path: &Path) -> &'static str {
    let extension = path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(str::to_ascii_lowercase);
    match extension.as_deref() {
        Some("mp4") | Some("m4v") => "video/mp4",
        Some("mov") => "video/quicktime",
        Some("webm") => "video/webm",
        Some("mkv") => "video/x-matroska",
        Some("avi") => "video/x-msvideo",
        _ => "application/octet-stream",
    }
}

impl DisplayFallback for FramesResponse {
    fn display(&self) -> String {
        let mut lines = vec![format!(
            "batch {id}: {count} frame(s)",
            id = self.batch_id,
            count = self.frames.len()
        )];
        for frame in &self.frames {
            lines.push(format!(
                "  {name} ({size} chars)",
                name = frame.filename,
                size = frame.frame.len()
            ));
        }
        lines.join("\n")
    }
}

impl DisplayFallback for SpeedResponse {
    fn display(&self) -> String {
        self.video_url.clone()
    }
}

#[derive(Debug, Serialize)]
pub struct ScheduleReport {
    pub duration_seconds: f64,
    pub timestamps: Vec<SampleTimestamp>,
}

impl DisplayFallback for ScheduleReport {
    fn display(&self) -> String {
        self.timestamps
            .iter()
            .map(|t| format!("{:>4}  {:.3}s", t.ordinal, t.seconds))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

#[derive(Debug, Serialize)]
pub struct ProbeReport {
    pub path: PathBuf,
    pub duration_seconds: f64,
}

impl DisplayFallback for ProbeReport {
    fn display(&self) -> String {
        format!("{}: {:.3}s", self.path.display(), self.duration_seconds)
    }
}

#[derive(Debug, Serialize)]
pub struct HealthEntry {
    pub name: String,
    pub status: CheckStatus,
    pub detail: String,
}

#[derive(Debug, Serialize)]
pub enum CheckStatus {
    #[serde(rename = "ok")]
    Ok,
    #[serde(rename = "warn")]
    Warn,
    #[serde(rename = "error")]
    Error,
}

impl fmt::Display for CheckStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            CheckStatus::Ok => "OK",
            CheckStatus::Warn => "WARN",
            CheckStatus::Error => "ERROR",
        };
        write!(f, "{}", label)
    }
}

impl HealthEntry {
    fn ok(name: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            status: CheckStatus::Ok,
            detail: detail.into(),
        }
    }

    fn warn(name: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            status: CheckStatus::Warn,
            detail: detail.into(),
        }
    }

    fn error(name: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            status: CheckStatus::Error,
            detail: detail.into(),
        }
    }
}

impl DisplayFallback for Vec<HealthEntry> {
    fn display(&self) -> String {
        self.iter()
            .map(|entry| {
                format!(
                    "[{status}] {name}: {detail}",
                    status = entry.status,
                    name = entry.name,
                    detail = entry.detail
                )
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn prepare_test_context(tools: &[(&str, &str)]) -> (TempDir, AppContext) {
        let temp = TempDir::new().unwrap();
        let mut config = fs::read_to_string("../configs/clipframe.toml").unwrap();
        for (from, to) in tools {
            config = config.replace(from, to);
        }
        let config_path = temp.path().join("clipframe.toml");
        fs::write(&config_path, config).unwrap();

        let cli = Cli {
            config: config_path,
            scratch_root: Some(temp.path().join("scratch")),
            format: OutputFormat::Json,
            command: Commands::Health,
        };
        let context = AppContext::new(&cli).unwrap();
        (temp, context)
    }

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parses_frames_invocation() {
        let cli = Cli::try_parse_from([
            "clipframectl",
            "--format",
            "json",
            "frames",
            "clip.mp4",
            "--count",
            "5",
        ])
        .unwrap();
        assert_eq!(cli.config, PathBuf::from("configs/clipframe.toml"));
        match cli.command {
            Commands::Frames(args) => {
                assert_eq!(args.input, PathBuf::from("clip.mp4"));
                assert_eq!(args.count.as_deref(), Some("5"));
                assert!(args.media_type.is_none());
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn scratch_root_override_wins() {
        let (temp, context) = prepare_test_context(&[]);
        assert_eq!(context.config.scratch_root(), temp.path().join("scratch"));
    }

    #[test]
    fn schedule_report_lists_timestamps() {
        let (_temp, context) = prepare_test_context(&[]);
        let report = context
            .schedule(&ScheduleArgs {
                duration: 10.0,
                count: 5,
            })
            .unwrap();
        let seconds: Vec<f64> = report.timestamps.iter().map(|t| t.seconds).collect();
        assert_eq!(seconds, vec![0.0, 2.0, 4.0, 6.0, 8.0]);
        assert!(report.display().contains("8.000s"));
    }

    #[test]
    fn schedule_rejects_zero_duration() {
        let (_temp, context) = prepare_test_context(&[]);
        let err = context
            .schedule(&ScheduleArgs {
                duration: 0.0,
                count: 3,
            })
            .unwrap_err();
        assert!(matches!(err, AppError::Media(MediaError::InvalidDuration(_))));
    }

    #[test]
    fn schedule_rejects_counts_above_the_cap() {
        let (_temp, context) = prepare_test_context(&[]);
        for count in [context.config.extraction.max_frames + 1, usize::MAX] {
            let err = context
                .schedule(&ScheduleArgs {
                    duration: 10.0,
                    count,
                })
                .unwrap_err();
            assert!(matches!(
                err,
                AppError::Media(MediaError::InputValidation(_))
            ));
        }
        let at_cap = context
            .schedule(&ScheduleArgs {
                duration: 10.0,
                count: context.config.extraction.max_frames,
            })
            .unwrap();
        assert_eq!(
            at_cap.timestamps.len(),
            context.config.extraction.max_frames
        );
    }

    #[tokio::test]
    async fn health_reports_missing_tools_and_writable_scratch() {
        let (temp, context) = prepare_test_context(&[
            ("ffmpeg_path = \"ffmpeg\"", "ffmpeg_path = \"/nonexistent/ffmpeg\""),
            ("ffprobe_path = \"ffprobe\"", "ffprobe_path = \"/nonexistent/ffprobe\""),
        ]);
        let report = context.health_check().await;

        let status_of = |name: &str| {
            report
                .iter()
                .find(|entry| entry.name == name)
                .map(|entry| entry.status.to_string())
                .unwrap()
        };
        assert_eq!(status_of("config"), "OK");
        assert_eq!(status_of("ffmpeg"), "ERROR");
        assert_eq!(status_of("ffprobe"), "ERROR");
        assert_eq!(status_of("scratch_root"), "OK");

        let frames_dir = temp.path().join("scratch").join("frames");
        assert_eq!(fs::read_dir(frames_dir).unwrap().count(), 0);
        assert!(report.display().contains("[ERROR] ffmpeg"));
    }

    #[tokio::test]
    async fn frames_for_missing_file_is_an_io_error() {
        let (temp, context) = prepare_test_context(&[]);
        let err = context
            .frames(&FramesArgs {
                input: temp.path().join("absent.mp4"),
                count: None,
                media_type: None,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Io(_)));
    }

    #[test]
    fn media_type_follows_extension() {
        assert_eq!(guess_media_type(Path::new("a.MP4")), "video/mp4");
        assert_eq!(guess_media_type(Path::new("a.mov")), "video/quicktime");
        assert_eq!(guess_media_type(Path::new("a")), "application/octet-stream");
    }

    #[test]
    fn health_entries_render_as_lines() {
        let report = vec![
            HealthEntry::ok("config", "configs/clipframe.toml"),
            HealthEntry::warn("storage_token", "CLIPFRAME_STORAGE_TOKEN is empty"),
        ];
        assert_eq!(
            report.display(),
            "[OK] config: configs/clipframe.toml\n[WARN] storage_token: CLIPFRAME_STORAGE_TOKEN is empty"
        );
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json[1]["status"], "warn");
    }
}
