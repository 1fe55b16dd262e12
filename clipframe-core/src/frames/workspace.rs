use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::{MediaError, MediaResult};

const FRAMES_DIR: &str = "frames";
const INPUT_PREFIX: &str = "clipframe-";

/// Shared scratch root. Workspaces beneath it are named by random UUIDs, so
/// concurrent requests never coordinate.
#[derive(Debug, Clone)]
pub struct ScratchArea {
    root: PathBuf,
}

impl ScratchArea {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub async fn acquire(&self, input_extension: &str) -> MediaResult<Workspace> {
        let frames_root = self.root.join(FRAMES_DIR);
        fs::create_dir_all(&frames_root)
            .await
            .map_err(|source| MediaError::io(&frames_root, source))?;

        let id = Uuid::new_v4();
        let output_dir = frames_root.join(id.to_string());
        // create_dir, not create_dir_all: an existing directory means a collision.
        fs::create_dir(&output_dir)
            .await
            .map_err(|source| MediaError::io(&output_dir, source))?;
        let input_path = self.root.join(format!("{INPUT_PREFIX}{id}.{input_extension}"));
        debug!(workspace = %id, output = %output_dir.display(), "workspace acquired");

        Ok(Workspace {
            id,
            input_path,
            output_dir,
            released: false,
        })
    }
}

/// Request-scoped scratch paths: one input file and one output directory.
#[derive(Debug)]
pub struct Workspace {
    id: Uuid,
    input_path: PathBuf,
    output_dir: PathBuf,
    released: bool,
}

impl Workspace {
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn input_path(&self) -> &Path {
        &self.input_path
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    pub fn is_released(&self) -> bool {
        self.released
    }

    pub async fn write_input(&self, bytes: &[u8]) -> MediaResult<()> {
        let mut file = fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&self.input_path)
            .await
            .map_err(|source| MediaError::io(&self.input_path, source))?;
        file.write_all(bytes)
            .await
            .map_err(|source| MediaError::io(&self.input_path, source))?;
        file.flush()
            .await
            .map_err(|source| MediaError::io(&self.input_path, source))?;
        Ok(())
    }

    /// Removes the output directory and the input file. Never fails; a second
    /// call does nothing.
    pub async fn release(&mut self) {
        if self.released {
            return;
        }
        self.released = true;

        if let Err(err) = fs::remove_dir_all(&self.output_dir).await {
            if err.kind() != ErrorKind::NotFound {
                warn!(workspace = %self.id, path = %self.output_dir.display(), error = %err, "failed to remove frame directory");
            }
        }
        if let Err(err) = fs::remove_file(&self.input_path).await {
            if err.kind() != ErrorKind::NotFound {
                warn!(workspace = %self.id, path = %self.input_path.display(), error = %err, "failed to remove input video");
            }
        }
        debug!(workspace = %self.id, "workspace released");
    }
}

impl Drop for Workspace {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        warn!(workspace = %self.id, "workspace dropped without release, cleaning up");
        if let Err(err) = std::fs::remove_dir_all(&self.output_dir) {
            if err.kind() != ErrorKind::NotFound {
                warn!(workspace = %self.id, error = %err, "failed to remove frame directory");
            }
        }
        if let Err(err) = std::fs::remove_file(&self.input_path) {
            if err.kind() != ErrorKind::NotFound {
                warn!(workspace = %self.id, error = %err, "failed to remove input video");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use tempfile::tempdir;

    #[tokio::test]
    async fn acquire_creates_output_dir_and_reserves_input() {
        let dir = tempdir().unwrap();
        let scratch = ScratchArea::new(dir.path().join("scratch"));
        let mut workspace = scratch.acquire("mp4").await.unwrap();

        assert!(workspace.output_dir().is_dir());
        assert!(!workspace.input_path().exists());
        assert!(workspace
            .input_path()
            .to_string_lossy()
            .ends_with(&format!("{}.mp4", workspace.id())));

        workspace.write_input(b"video").await.unwrap();
        assert_eq!(std::fs::read(workspace.input_path()).unwrap(), b"video");
        workspace.release().await;
    }

    #[tokio::test]
    async fn release_is_idempotent_and_scoped() {
        let dir = tempdir().unwrap();
        let scratch = ScratchArea::new(dir.path());
        let mut first = scratch.acquire("mp4").await.unwrap();
        let mut second = scratch.acquire("mp4").await.unwrap();
        first.write_input(b"a").await.unwrap();
        second.write_input(b"b").await.unwrap();
        std::fs::write(first.output_dir().join("frame-0.jpg"), b"img").unwrap();

        first.release().await;
        first.release().await;

        assert!(first.is_released());
        assert!(!first.output_dir().exists());
        assert!(!first.input_path().exists());
        assert!(second.output_dir().is_dir());
        assert!(second.input_path().exists());

        second.release().await;
        assert!(!second.output_dir().exists());
    }

    #[tokio::test]
    async fn release_tolerates_missing_paths() {
        let dir = tempdir().unwrap();
        let scratch = ScratchArea::new(dir.path());
        let mut workspace = scratch.acquire("mp4").await.unwrap();
        std::fs::remove_dir_all(workspace.output_dir()).unwrap();
        workspace.release().await;
        assert!(workspace.is_released());
    }

    #[tokio::test]
    async fn drop_without_release_cleans_up() {
        let dir = tempdir().unwrap();
        let scratch = ScratchArea::new(dir.path());
        let workspace = scratch.acquire("webm").await.unwrap();
        workspace.write_input(b"clip").await.unwrap();
        let output = workspace.output_dir().to_path_buf();
        let input = workspace.input_path().to_path_buf();
        drop(workspace);
        assert!(!output.exists());
        assert!(!input.exists());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_acquires_never_collide() {
        let dir = tempdir().unwrap();
        let scratch = ScratchArea::new(dir.path());
        let mut handles = Vec::new();
        for _ in 0..32 {
            let scratch = scratch.clone();
            handles.push(tokio::spawn(async move {
                let mut workspace = scratch.acquire("mp4").await.unwrap();
                let id = workspace.id();
                workspace.release().await;
                id
            }));
        }
        let mut ids = HashSet::new();
        for handle in handles {
            assert!(ids.insert(handle.await.unwrap()));
        }
        assert_eq!(ids.len(), 32);
        let leftovers = std::fs::read_dir(dir.path().join(FRAMES_DIR)).unwrap().count();
        assert_eq!(leftovers, 0);
    }
}
