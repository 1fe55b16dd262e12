use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Deserialize;

use crate::error::{ConfigError, Result};

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct ServiceConfig {
    pub paths: PathsSection,
    pub extraction: ExtractionSection,
    pub tools: ToolsSection,
    pub storage: StorageSection,
}

impl ServiceConfig {
    pub fn scratch_root(&self) -> PathBuf {
        PathBuf::from(&self.paths.scratch_root)
    }

    pub fn validate(&self) -> Result<()> {
        if self.paths.scratch_root.trim().is_empty() {
            return Err(ConfigError::Invalid {
                field: "paths.scratch_root",
                reason: "must not be empty".into(),
            });
        }
        if self.extraction.max_frames == 0 {
            return Err(ConfigError::Invalid {
                field: "extraction.max_frames",
                reason: "must be greater than zero".into(),
            });
        }
        if self.extraction.default_frames == 0
            || self.extraction.default_frames > self.extraction.max_frames
        {
            return Err(ConfigError::Invalid {
                field: "extraction.default_frames",
                reason: format!("must be within 1..={}", self.extraction.max_frames),
            });
        }
        if self.extraction.image_width == 0 {
            return Err(ConfigError::Invalid {
                field: "extraction.image_width",
                reason: "must be greater than zero".into(),
            });
        }
        if !(2..=31).contains(&self.extraction.jpeg_quality) {
            return Err(ConfigError::Invalid {
                field: "extraction.jpeg_quality",
                reason: "ffmpeg qscale must be within 2..=31".into(),
            });
        }
        for (field, seconds) in [
            ("tools.probe_timeout_seconds", self.tools.probe_timeout_seconds),
            ("tools.extract_timeout_seconds", self.tools.extract_timeout_seconds),
            ("tools.transcode_timeout_seconds", self.tools.transcode_timeout_seconds),
        ] {
            if seconds == 0 {
                return Err(ConfigError::Invalid {
                    field,
                    reason: "must be greater than zero".into(),
                });
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct PathsSection {
    pub scratch_root: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExtractionSection {
    pub default_frames: usize,
    pub max_frames: usize,
    pub image_width: u32,
    pub jpeg_quality: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ToolsSection {
    pub ffmpeg_path: String,
    pub ffprobe_path: String,
    pub probe_timeout_seconds: u64,
    pub extract_timeout_seconds: u64,
    pub transcode_timeout_seconds: u64,
}

impl ToolsSection {
    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.probe_timeout_seconds)
    }

    pub fn extract_timeout(&self) -> Duration {
        Duration::from_secs(self.extract_timeout_seconds)
    }

    pub fn transcode_timeout(&self) -> Duration {
        Duration::from_secs(self.transcode_timeout_seconds)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct StorageSection {
    pub endpoint: String,
    pub public_base_url: Option<String>,
    #[serde(default = "default_resource_type")]
    pub resource_type: String,
    pub api_token_env: Option<String>,
}

fn default_resource_type() -> String {
    "video".to_string()
}

pub fn load_service_config<P: AsRef<Path>>(path: P) -> Result<ServiceConfig> {
    let config: ServiceConfig = load_toml(path)?;
    config.validate()?;
    Ok(config)
}

fn load_toml<T, P>(path: P) -> Result<T>
where
    T: DeserializeOwned,
    P: AsRef<Path>,
{
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        source,
        path: path.to_path_buf(),
    })?;
    toml::from_str(&content).map_err(|source| ConfigError::Parse {
        source,
        path: path.to_path_buf(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fixture() -> PathBuf {
        Path::new(env!("CARGO_MANIFEST_DIR")).join("../configs/clipframe.toml")
    }

    #[test]
    fn load_fixture_config() {
        let config = load_service_config(fixture()).expect("config should parse");
        assert_eq!(config.extraction.default_frames, 1);
        assert_eq!(config.extraction.image_width, 480);
        assert_eq!(config.tools.ffmpeg_path, "ffmpeg");
        assert_eq!(config.storage.resource_type, "video");
        assert_eq!(config.tools.probe_timeout(), Duration::from_secs(20));
    }

    #[test]
    fn rejects_default_above_maximum() {
        let mut config = load_service_config(fixture()).unwrap();
        config.extraction.default_frames = config.extraction.max_frames + 1;
        let err = config.validate().unwrap_err();
        assert!(matches!(
            err,
            ConfigError::Invalid {
                field: "extraction.default_frames",
                ..
            }
        ));
    }

    #[test]
    fn rejects_zero_timeouts() {
        let base = load_service_config(fixture()).unwrap();

        let mut config = base.clone();
        config.tools.probe_timeout_seconds = 0;
        assert!(matches!(
            config.validate().unwrap_err(),
            ConfigError::Invalid {
                field: "tools.probe_timeout_seconds",
                ..
            }
        ));

        let mut config = base.clone();
        config.tools.extract_timeout_seconds = 0;
        assert!(matches!(
            config.validate().unwrap_err(),
            ConfigError::Invalid {
                field: "tools.extract_timeout_seconds",
                ..
            }
        ));

        let mut config = base;
        config.tools.transcode_timeout_seconds = 0;
        assert!(matches!(
            config.validate().unwrap_err(),
            ConfigError::Invalid {
                field: "tools.transcode_timeout_seconds",
                ..
            }
        ));
    }

    #[test]
    fn rejects_zero_image_width() {
        let mut config = load_service_config(fixture()).unwrap();
        config.extraction.image_width = 0;
        assert!(matches!(
            config.validate().unwrap_err(),
            ConfigError::Invalid {
                field: "extraction.image_width",
                ..
            }
        ));
    }

    #[test]
    fn missing_file_reports_path() {
        let err = load_service_config("/definitely/not/here.toml").unwrap_err();
        assert!(err.to_string().contains("/definitely/not/here.toml"));
    }
}
