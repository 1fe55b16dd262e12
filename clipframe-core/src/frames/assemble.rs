use std::collections::HashSet;
use std::path::{Path, PathBuf};

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use tokio::fs;
use tracing::warn;

use crate::error::{MediaError, MediaResult};

use super::extract::parse_frame_ordinal;
use super::types::{ExtractedFrame, SampleTimestamp};

/// Collects decoder output into request order. Directory enumeration order is
/// never used; the ordinal in each file name is.
#[derive(Debug, Default, Clone, Copy)]
pub struct ResultAssembler;

struct FrameFile {
    ordinal: usize,
    file_name: String,
    path: PathBuf,
}

impl ResultAssembler {
    pub fn new() -> Self {
        Self
    }

    /// Reads, encodes and deletes every frame file in `output_dir`. Files are
    /// removed one at a time as they are consumed.
    pub async fn assemble(
        &self,
        output_dir: &Path,
        timestamps: &[SampleTimestamp],
    ) -> MediaResult<Vec<ExtractedFrame>> {
        let mut files = self.collect(output_dir, timestamps.len()).await?;
        if files.len() < timestamps.len() {
            return Err(MediaError::IncompleteBatch {
                expected: timestamps.len(),
                produced: files.len(),
            });
        }
        files.sort_by_key(|file| file.ordinal);

        let mut frames = Vec::with_capacity(files.len());
        for file in files {
            let bytes = fs::read(&file.path)
                .await
                .map_err(|source| MediaError::io(&file.path, source))?;
            let encoded = STANDARD.encode(&bytes);
            drop(bytes);
            if let Err(err) = fs::remove_file(&file.path).await {
                warn!(path = %file.path.display(), error = %err, "failed to remove consumed frame");
            }
            frames.push(ExtractedFrame {
                ordinal: file.ordinal,
                timestamp_seconds: timestamps[file.ordinal].seconds,
                media_type: media_type_for(&file.file_name).to_string(),
                file_name: file.file_name,
                encoded,
            });
        }
        Ok(frames)
    }

    async fn collect(&self, output_dir: &Path, expected: usize) -> MediaResult<Vec<FrameFile>> {
        let mut entries = fs::read_dir(output_dir)
            .await
            .map_err(|source| MediaError::io(output_dir, source))?;
        let mut seen = HashSet::new();
        let mut files = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|source| MediaError::io(output_dir, source))?
        {
            let file_name = entry.file_name().to_string_lossy().into_owned();
            let ordinal = parse_frame_ordinal(&file_name).ok_or_else(|| {
                MediaError::MalformedOutput {
                    file_name: file_name.clone(),
                    reason: "name carries no frame ordinal".into(),
                }
            })?;
            if ordinal >= expected {
                return Err(MediaError::MalformedOutput {
                    file_name,
                    reason: format!("ordinal outside requested range 0..{expected}"),
                });
            }
            if !seen.insert(ordinal) {
                return Err(MediaError::MalformedOutput {
                    file_name,
                    reason: format!("duplicate ordinal {ordinal}"),
                });
            }
            files.push(FrameFile {
                ordinal,
                file_name,
                path: entry.path(),
            });
        }
        Ok(files)
    }
}

fn media_type_for(file_name: &str) -> &'static str {
    let extension = Path::new(file_name)
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_ascii_lowercase());
    match extension.as_deref() {
        Some("png") => "image/png",
        Some("webp") => "image/webp",
        _ => "image/jpeg",
    }
}
