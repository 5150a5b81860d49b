//! File-system checkpointer.
//!
//! ## Layout
//!
//! ```text
//! <base>/<thread_id>/00000000000000000001.json
//! <base>/<thread_id>/00000000000000000002.json
//! ```
//!
//! Each file holds one serialized [`Checkpoint`]. Files are written to a hidden
//! temporary name, synced, then renamed into place, so readers only ever see
//! complete checkpoints.

use anyhow::Context;
use async_trait::async_trait;
use chatloop_core::error::StorageError;
use chatloop_core::persistence::Checkpointer;
use chatloop_core::state::{Checkpoint, CheckpointVersion, ConversationState, ThreadId};
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

const CHECKPOINT_EXT: &str = "json";
const MAX_LOAD_ATTEMPTS: usize = 64;

pub struct FileCheckpointer {
    base_path: PathBuf,
    max_history: Option<usize>,
    /// Serializes writers so version numbers are never handed out twice.
    write_lock: Mutex<()>,
}

impl FileCheckpointer {
    pub fn new(base_path: impl Into<PathBuf>) -> Self {
        Self {
            base_path: base_path.into(),
            max_history: None,
            write_lock: Mutex::new(()),
        }
    }

    /// Keep only the newest `versions` checkpoint files per thread (at least one).
    pub fn with_max_history(mut self, versions: usize) -> Self {
        self.max_history = Some(versions.max(1));
        self
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    fn thread_dir(&self, thread_id: &str) -> Result<PathBuf, StorageError> {
        validate_thread_id(thread_id)?;
        Ok(self.base_path.join(thread_id))
    }

    fn checkpoint_path(dir: &Path, version: CheckpointVersion) -> PathBuf {
        dir.join(format!("{:020}.{CHECKPOINT_EXT}", version.get()))
    }

    /// Committed versions in `dir`, ascending. Temporary and foreign files are ignored.
    async fn versions(dir: &Path) -> Result<Vec<CheckpointVersion>, StorageError> {
        let mut entries = match tokio::fs::read_dir(dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(anyhow::Error::new(e)
                    .context(format!("Failed to read directory {}", dir.display()))
                    .into())
            }
        };

        let mut versions = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .context("Failed to read checkpoint directory entry")?
        {
            let path = entry.path();
            if path.extension().is_some_and(|ext| ext == CHECKPOINT_EXT) {
                if let Some(version) = path
                    .file_stem()
                    .and_then(|stem| stem.to_str())
                    .and_then(|stem| stem.parse::<u64>().ok())
                {
                    versions.push(CheckpointVersion(version));
                }
            }
        }
        versions.sort();
        Ok(versions)
    }

    async fn write_atomically(dir: &Path, path: &Path, content: &[u8]) -> std::io::Result<()> {
        let tmp_path = dir.join(format!(".{}.tmp", uuid::Uuid::new_v4().simple()));

        let write_result = async {
            let mut file = tokio::fs::File::create(&tmp_path).await?;
            file.write_all(content).await?;
            file.flush().await?;
            file.sync_all().await?;
            drop(file);
            tokio::fs::rename(&tmp_path, path).await
        }
        .await;

        if write_result.is_err() {
            let _ = tokio::fs::remove_file(&tmp_path).await;
        }
        write_result
    }

    async fn prune(&self, dir: &Path, versions: &[CheckpointVersion]) {
        let Some(max) = self.max_history else {
            return;
        };
        if versions.len() <= max {
            return;
        }
        for version in &versions[..versions.len() - max] {
            let path = Self::checkpoint_path(dir, *version);
            if let Err(e) = tokio::fs::remove_file(&path).await {
                tracing::warn!(path = %path.display(), error = %e, "Failed to prune old checkpoint");
            }
        }
    }
}

/// Reject ids that are unsafe as a directory name.
fn validate_thread_id(thread_id: &str) -> Result<(), StorageError> {
    if thread_id.is_empty() {
        return Err(StorageError::InvalidThreadId(
            "thread id cannot be empty".to_string(),
        ));
    }
    if thread_id.starts_with('.')
        || thread_id.contains('/')
        || thread_id.contains('\\')
        || thread_id.chars().any(|c| c.is_control())
    {
        return Err(StorageError::InvalidThreadId(format!(
            "thread id contains invalid characters: {thread_id:?}"
        )));
    }
    Ok(())
}

#[async_trait]
impl Checkpointer for FileCheckpointer {
    async fn load(&self, thread_id: &ThreadId) -> Result<Option<Checkpoint>, StorageError> {
        let dir = self.thread_dir(thread_id)?;
        let mut attempts = 0;
        let (latest, path, content) = loop {
            let Some(latest) = Self::versions(&dir).await?.pop() else {
                tracing::debug!(thread_id = %thread_id, "No checkpoint found on disk");
                return Ok(None);
            };
            let path = Self::checkpoint_path(&dir, latest);
            match tokio::fs::read_to_string(&path).await {
                Ok(content) => break (latest, path, content),
                // Pruned by a concurrent save after the listing; a newer version exists.
                Err(e)
                    if e.kind() == std::io::ErrorKind::NotFound && attempts < MAX_LOAD_ATTEMPTS =>
                {
                    attempts += 1;
                    tracing::trace!(
                        thread_id = %thread_id,
                        version = %latest,
                        "Checkpoint pruned while loading, retrying"
                    );
                }
                Err(e) => {
                    return Err(anyhow::Error::new(e)
                        .context(format!("Failed to read {}", path.display()))
                        .into())
                }
            }
        };
        let checkpoint: Checkpoint = serde_json::from_str(&content)
            .map_err(|e| StorageError::corrupt(thread_id.clone(), e))?;
        if checkpoint.thread_id != *thread_id || checkpoint.version != latest {
            return Err(StorageError::corrupt(
                thread_id.clone(),
                format!(
                    "file {} holds checkpoint {} of thread '{}'",
                    path.display(),
                    checkpoint.version,
                    checkpoint.thread_id
                ),
            ));
        }

        tracing::debug!(thread_id = %thread_id, version = %latest, "Loaded checkpoint from disk");
        Ok(Some(checkpoint))
    }

    async fn save(
        &self,
        thread_id: &ThreadId,
        state: &ConversationState,
    ) -> Result<CheckpointVersion, StorageError> {
        let dir = self.thread_dir(thread_id)?;
        let _guard = self.write_lock.lock().await;

        tokio::fs::create_dir_all(&dir)
            .await
            .with_context(|| format!("Failed to create {}", dir.display()))?;

        let mut versions = Self::versions(&dir).await?;
        let version = versions
            .last()
            .map(|v| v.next())
            .unwrap_or(CheckpointVersion::INITIAL);

        let checkpoint = Checkpoint::new(thread_id.clone(), version, state.clone());
        let content = serde_json::to_vec_pretty(&checkpoint)
            .context("Failed to serialize checkpoint to JSON")?;
        let path = Self::checkpoint_path(&dir, version);
        Self::write_atomically(&dir, &path, &content)
            .await
            .with_context(|| format!("Failed to write {}", path.display()))?;

        versions.push(version);
        self.prune(&dir, &versions).await;

        tracing::debug!(thread_id = %thread_id, version = %version, "Saved checkpoint to disk");
        Ok(version)
    }

    async fn delete_thread(&self, thread_id: &ThreadId) -> Result<(), StorageError> {
        let dir = self.thread_dir(thread_id)?;
        let _guard = self.write_lock.lock().await;
        match tokio::fs::remove_dir_all(&dir).await {
            Ok(()) => {
                tracing::debug!(thread_id = %thread_id, "Deleted thread from disk");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(anyhow::Error::new(e)
                .context(format!("Failed to delete {}", dir.display()))
                .into()),
        }
    }

    async fn list_threads(&self) -> Result<Vec<ThreadId>, StorageError> {
        let mut entries = match tokio::fs::read_dir(&self.base_path).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(anyhow::Error::new(e)
                    .context("Failed to read checkpoint base directory")
                    .into())
            }
        };

        let mut threads = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .context("Failed to read checkpoint base directory entry")?
        {
            let Some(name) = entry.file_name().to_str().map(str::to_string) else {
                continue;
            };
            if validate_thread_id(&name).is_err() {
                continue;
            }
            if !Self::versions(&entry.path()).await?.is_empty() {
                threads.push(name);
            }
        }
        threads.sort();
        Ok(threads)
    }
}
