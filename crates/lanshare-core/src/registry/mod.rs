//! Pending-file registry and transfer history.
//!
//! The registry is the only state shared between the HTTP staging surface
//! and the rest of the node. Every operation is one atomic step on the
//! in-memory maps:
//!
//! - [`TransferRegistry::stage`] persists bytes, then publishes a [`PendingFile`]
//! - [`TransferRegistry::fetch`] claims an entry, opens its storage for
//!   streaming and appends a [`TransferRecord`]
//! - [`TransferRegistry::remove`] claims an entry and deletes its storage
//!   without recording history
//!
//! Claiming removes the entry under the lock, so among concurrent fetches of
//! the same id exactly one wins and the rest see [`Error::NotFound`]. File
//! I/O always happens outside the lock.
//!
//! Uploads are written to `<id>.part` and renamed to `<id>` on commit; an
//! upload that fails or is dropped never becomes visible.

mod record;

pub use record::{PendingFile, PendingStatus, RecordStatus, TransferRecord};

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::Local;
use tokio::fs::File;
use tokio::io::AsyncWriteExt;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::protocol::sanitize_file_name;

const PART_EXTENSION: &str = "part";

/// Entries behind the registry lock.
#[derive(Debug, Default)]
struct RegistryState {
    pending: HashMap<String, PendingFile>,
    history: Vec<TransferRecord>,
}

/// A claimed file together with an open handle on its stored bytes.
///
/// The storage path is already unlinked; the handle stays readable until
/// it is dropped.
#[derive(Debug)]
pub struct FetchedFile {
    /// The entry that was removed from the pending set
    pub file: PendingFile,
    /// Stored contents, positioned at the start
    pub contents: File,
}

/// Concurrency-safe store of staged files and completed transfers.
#[derive(Debug)]
pub struct TransferRegistry {
    storage_dir: PathBuf,
    history_limit: Option<usize>,
    state: Mutex<RegistryState>,
}

impl TransferRegistry {
    /// Open a registry backed by `storage_dir`.
    ///
    /// The directory is created if needed. Staged files left over from a
    /// previous run are deleted, since pending entries live only in memory.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created or read.
    pub async fn open(storage_dir: impl Into<PathBuf>, history_limit: Option<usize>) -> Result<Self> {
        let storage_dir = storage_dir.into();
        tokio::fs::create_dir_all(&storage_dir)
            .await
            .map_err(|e| Error::from_fs(&e, &storage_dir))?;

        let removed = remove_orphans(&storage_dir).await?;
        if removed > 0 {
            tracing::info!(
                "Removed {} orphaned staged file(s) from {}",
                removed,
                storage_dir.display()
            );
        }

        Ok(Self {
            storage_dir,
            history_limit,
            state: Mutex::new(RegistryState::default()),
        })
    }

    /// Open a registry from the staging configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the storage directory cannot be prepared.
    pub async fn from_config(config: &crate::config::StagingConfig) -> Result<Self> {
        Self::open(config.storage_dir(), config.history_limit).await
    }

    /// Directory holding staged files.
    #[must_use]
    pub fn storage_dir(&self) -> &Path {
        &self.storage_dir
    }

    fn lock(&self) -> MutexGuard<'_, RegistryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Start a streamed upload.
    ///
    /// Nothing is visible in [`Self::list_pending`] until
    /// [`Self::commit`] succeeds.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidFileName`] if no usable name remains after
    /// stripping directory parts, or a file system error if the temporary
    /// file cannot be created.
    pub async fn begin_stage(&self, name: &str) -> Result<StagedUpload> {
        let clean = sanitize_file_name(name).ok_or_else(|| Error::InvalidFileName(name.to_string()))?;
        let id = Uuid::new_v4().to_string();
        let part_path = self.storage_dir.join(format!("{id}.{PART_EXTENSION}"));

        let file = File::create(&part_path)
            .await
            .map_err(|e| Error::from_fs(&e, &part_path))?;

        Ok(StagedUpload {
            id,
            name: clean,
            part_path,
            file: Some(file),
            written: 0,
            finished: false,
        })
    }

    /// Publish a finished upload and return its entry.
    ///
    /// # Errors
    ///
    /// Returns a file system error if the data cannot be flushed or moved
    /// into place. The temporary file is removed in that case.
    pub async fn commit(&self, mut upload: StagedUpload) -> Result<PendingFile> {
        let storage_path = self.storage_dir.join(&upload.id);

        if let Some(mut file) = upload.file.take() {
            file.flush()
                .await
                .map_err(|e| Error::from_fs(&e, &upload.part_path))?;
            file.sync_all()
                .await
                .map_err(|e| Error::from_fs(&e, &upload.part_path))?;
        }

        tokio::fs::rename(&upload.part_path, &storage_path)
            .await
            .map_err(|e| Error::from_fs(&e, &storage_path))?;
        upload.finished = true;

        let size = match tokio::fs::metadata(&storage_path).await {
            Ok(meta) => meta.len(),
            Err(e) => {
                let _ = tokio::fs::remove_file(&storage_path).await;
                return Err(Error::from_fs(&e, &storage_path));
            }
        };

        let file = PendingFile {
            id: upload.id.clone(),
            name: upload.name.clone(),
            storage_path,
            size,
            upload_time: Local::now(),
            status: PendingStatus::Pending,
        };

        self.lock().pending.insert(file.id.clone(), file.clone());
        tracing::info!("Staged {} as {} ({} bytes)", file.name, file.id, file.size);

        Ok(file)
    }

    /// Stage a complete in-memory file. Returns the new entry.
    ///
    /// # Errors
    ///
    /// Same as [`Self::begin_stage`] and [`Self::commit`]. No entry is
    /// created on failure.
    pub async fn stage(&self, name: &str, bytes: &[u8]) -> Result<PendingFile> {
        let mut upload = self.begin_stage(name).await?;
        upload.write_chunk(bytes).await?;
        self.commit(upload).await
    }

    /// Claim a pending file, open its bytes and record the delivery.
    ///
    /// `device_name` identifies the fetching device in the history record.
    /// The bytes are not read here; callers stream them from
    /// [`FetchedFile::contents`].
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] if `id` is not pending, including when a
    /// concurrent fetch or remove claimed it first. If the stored bytes
    /// cannot be opened the entry is put back and a file system error is
    /// returned.
    pub async fn fetch(&self, id: &str, device_name: &str) -> Result<FetchedFile> {
        let file = self.claim(id)?;

        let contents = match File::open(&file.storage_path).await {
            Ok(contents) => contents,
            Err(e) => {
                let err = Error::from_fs(&e, &file.storage_path);
                if e.kind() != std::io::ErrorKind::NotFound {
                    self.lock().pending.insert(file.id.clone(), file);
                }
                return Err(err);
            }
        };

        let record = TransferRecord::completed(&file.name, device_name);
        self.push_history(record);

        if let Err(e) = tokio::fs::remove_file(&file.storage_path).await {
            tracing::warn!(
                "Failed to delete delivered file {}: {}",
                file.storage_path.display(),
                e
            );
        }

        tracing::info!("Delivered {} ({}) to {}", file.name, file.id, device_name);
        Ok(FetchedFile { file, contents })
    }

    /// Delete a pending file without recording history.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] if `id` is not pending. If the backing
    /// file exists but cannot be deleted, the entry is put back and a file
    /// system error is returned.
    pub async fn remove(&self, id: &str) -> Result<PendingFile> {
        let file = self.claim(id)?;

        match tokio::fs::remove_file(&file.storage_path).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                let err = Error::from_fs(&e, &file.storage_path);
                self.lock().pending.insert(file.id.clone(), file);
                return Err(err);
            }
        }

        tracing::info!("Removed staged file {} ({})", file.name, file.id);
        Ok(file)
    }

    fn claim(&self, id: &str) -> Result<PendingFile> {
        self.lock()
            .pending
            .remove(id)
            .ok_or_else(|| Error::NotFound(id.to_string()))
    }

    fn push_history(&self, record: TransferRecord) {
        let mut state = self.lock();
        state.history.push(record);
        if let Some(limit) = self.history_limit {
            let excess = state.history.len().saturating_sub(limit);
            state.history.drain(..excess);
        }
    }

    /// Look up a pending file without claiming it.
    #[must_use]
    pub fn get(&self, id: &str) -> Option<PendingFile> {
        self.lock().pending.get(id).cloned()
    }

    /// Snapshot of pending files, oldest upload first.
    #[must_use]
    pub fn list_pending(&self) -> Vec<PendingFile> {
        let mut files: Vec<PendingFile> = self.lock().pending.values().cloned().collect();
        files.sort_by(|a, b| a.upload_time.cmp(&b.upload_time).then_with(|| a.id.cmp(&b.id)));
        files
    }

    /// Snapshot of completed transfers, oldest first.
    #[must_use]
    pub fn list_history(&self) -> Vec<TransferRecord> {
        self.lock().history.clone()
    }

    /// Number of pending files.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.lock().pending.len()
    }
}

/// An upload in progress.
///
/// Dropping it without [`TransferRegistry::commit`] deletes the temporary
/// file.
#[derive(Debug)]
pub struct StagedUpload {
    id: String,
    name: String,
    part_path: PathBuf,
    file: Option<File>,
    written: u64,
    finished: bool,
}

impl StagedUpload {
    /// Id the file will be published under.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Sanitized file name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Bytes written so far.
    #[must_use]
    pub const fn written(&self) -> u64 {
        self.written
    }

    /// Append a chunk to the temporary file.
    ///
    /// # Errors
    ///
    /// Returns a file system error if the write fails (e.g. disk full).
    pub async fn write_chunk(&mut self, chunk: &[u8]) -> Result<()> {
        let file = self
            .file
            .as_mut()
            .ok_or_else(|| Error::Internal("write after upload was closed".to_string()))?;
        file.write_all(chunk)
            .await
            .map_err(|e| Error::from_fs(&e, &self.part_path))?;
        self.written += chunk.len() as u64;
        Ok(())
    }

    /// Discard the upload and its temporary file.
    pub async fn abort(mut self) {
        drop(self.file.take());
        if let Err(e) = tokio::fs::remove_file(&self.part_path).await {
            tracing::debug!("Could not remove {}: {}", self.part_path.display(), e);
        }
        self.finished = true;
    }
}

impl Drop for StagedUpload {
    fn drop(&mut self) {
        if !self.finished {
            drop(self.file.take());
            let _ = std::fs::remove_file(&self.part_path);
        }
    }
}

/// Delete files named like staged uploads. Returns how many were removed.
async fn remove_orphans(dir: &Path) -> Result<usize> {
    let mut entries = tokio::fs::read_dir(dir)
        .await
        .map_err(|e| Error::from_fs(&e, dir))?;
    let mut removed = 0;

    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        let is_staged = path
            .file_name()
            .and_then(|n| n.to_str())
            .map(|n| n.strip_suffix(".part").unwrap_or(n))
            .is_some_and(|stem| Uuid::parse_str(stem).is_ok());

        if is_staged && tokio::fs::remove_file(&path).await.is_ok() {
            removed += 1;
        }
    }

    Ok(removed)
}
