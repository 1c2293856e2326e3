// # File State Store
//
// File-based implementation of StateStore with crash recovery.
//
// ## Purpose
//
// Provides persistent state storage across daemon restarts and crashes, so
// that a comment is never notified twice while its id is remembered.
//
// ## Crash Recovery
//
// - Atomic writes: full content goes to `<file>.tmp`, is synced, then renamed
//   over the target
// - Cleanup: the temporary file is removed on every failure path
// - Automatic backup: keeps `<file>.backup` of the last known good state
// - Recovery: falls back to the backup, then to empty state, if the main
//   file cannot be read or parsed
//
// ## File Format
//
// ```json
// {
//   "version": "1",
//   "seen_comment_ids": ["4711", "4712"],
//   "last_successful_poll": "2025-01-09T12:00:00Z"
// }
// ```
//
// Unknown fields are ignored and missing fields default, so older and newer
// versions of the daemon can read each other's files.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;

use super::{SeenSet, State};
use crate::Error;
use crate::traits::state_store::StateStore;

/// State file format version
/// Used for future migration if format changes
const STATE_FILE_VERSION: &str = "1";

/// File-based state store with crash recovery
///
/// # Example
///
/// ```rust,no_run
/// use threadwatch_core::state::FileStateStore;
/// use threadwatch_core::traits::StateStore;
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let store = FileStateStore::new("/var/lib/threadwatch/state.json", 5000).await?;
///
///     let mut state = store.load().await;
///     state.seen.insert("4711");
///     store.save(&mut state).await?;
///
///     Ok(())
/// }
/// ```
#[derive(Debug, Clone)]
pub struct FileStateStore {
    path: PathBuf,
    seen_limit: usize,
}

/// Serializable state file format
#[derive(Debug, serde::Deserialize)]
struct StateFileFormat {
    #[serde(default)]
    version: Option<String>,
    #[serde(default)]
    seen_comment_ids: SeenSet,
    #[serde(default)]
    last_successful_poll: Option<DateTime<Utc>>,
}

#[derive(Debug, serde::Serialize)]
struct StateFileRef<'a> {
    version: &'a str,
    seen_comment_ids: &'a SeenSet,
    last_successful_poll: Option<DateTime<Utc>>,
}

/// Removes the temporary file unless the write was committed
struct TempFileGuard {
    path: PathBuf,
    committed: bool,
}

impl TempFileGuard {
    fn new(path: PathBuf) -> Self {
        Self {
            path,
            committed: false,
        }
    }

    fn commit(mut self) {
        self.committed = true;
    }
}

impl Drop for TempFileGuard {
    fn drop(&mut self) {
        if !self.committed {
            if let Err(e) = std::fs::remove_file(&self.path) {
                if e.kind() != std::io::ErrorKind::NotFound {
                    tracing::warn!(
                        "Failed to remove temp state file {}: {}",
                        self.path.display(),
                        e
                    );
                }
            }
        }
    }
}

impl FileStateStore {
    /// Open a file state store
    ///
    /// Creates the parent directory if needed and checks that it is
    /// writable. This is the only place the store can fail hard: an
    /// unusable state location is an unrecoverable startup condition.
    pub async fn new<P: AsRef<Path>>(path: P, seen_limit: usize) -> Result<Self, Error> {
        let path = path.as_ref().to_path_buf();

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                fs::create_dir_all(parent).await.map_err(|e| {
                    Error::config(format!(
                        "Failed to create state directory {}: {}",
                        parent.display(),
                        e
                    ))
                })?;
            }
        }

        let store = Self { path, seen_limit };
        store.check_writable().await?;
        Ok(store)
    }

    /// Path of the state file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Write and remove a scratch file next to the state file
    async fn check_writable(&self) -> Result<(), Error> {
        let scratch = Self::sibling(&self.path, "writecheck");
        fs::write(&scratch, b"").await.map_err(|e| {
            Error::config(format!(
                "State location {} is not writable: {}",
                scratch.display(),
                e
            ))
        })?;
        if let Err(e) = fs::remove_file(&scratch).await {
            tracing::warn!("Failed to remove write-check file {}: {}", scratch.display(), e);
        }
        Ok(())
    }

    /// Load state from file with automatic recovery
    ///
    /// Recovery strategy:
    /// 1. Missing main file → empty state (first run)
    /// 2. Unreadable or malformed main file → try the backup
    /// 3. Backup missing or also broken → empty state
    async fn load_state_with_recovery(path: &Path) -> State {
        if !path.exists() {
            tracing::debug!("State file does not exist: {}", path.display());
            return State::default();
        }

        let e = match Self::load_state(path).await {
            Ok(state) => {
                tracing::debug!("Loaded state from file: {} seen ids", state.seen.len());
                return state;
            }
            Err(e) => e,
        };

        tracing::warn!(
            "State file unusable: {}. Attempting recovery from backup.",
            e
        );

        let backup_path = Self::backup_path(path);
        if !backup_path.exists() {
            tracing::warn!("No backup file found. Starting with empty state.");
            return State::default();
        }

        match Self::load_state(&backup_path).await {
            Ok(state) => {
                tracing::info!("Recovered state from backup: {} seen ids", state.seen.len());
                state
            }
            Err(backup_err) => {
                tracing::warn!(
                    "Backup also unusable: {}. Starting with empty state.",
                    backup_err
                );
                State::default()
            }
        }
    }

    /// Load state from file
    async fn load_state(path: &Path) -> Result<State, Error> {
        let content = fs::read_to_string(path).await.map_err(|e| {
            Error::state_store(format!(
                "Failed to read state file {}: {}",
                path.display(),
                e
            ))
        })?;

        let state_file: StateFileFormat = serde_json::from_str(&content).map_err(|e| {
            Error::state_store(format!(
                "Failed to parse state file {}: {}",
                path.display(),
                e
            ))
        })?;

        match state_file.version.as_deref() {
            Some(STATE_FILE_VERSION) | None => {}
            Some(other) => tracing::warn!(
                "State file version mismatch: expected {}, got {}. Attempting to load anyway.",
                STATE_FILE_VERSION,
                other
            ),
        }

        Ok(State {
            seen: state_file.seen_comment_ids,
            last_successful_poll: state_file.last_successful_poll,
        })
    }

    /// Write state to file atomically
    async fn write_state(&self, state: &State) -> Result<(), Error> {
        let state_file = StateFileRef {
            version: STATE_FILE_VERSION,
            seen_comment_ids: &state.seen,
            last_successful_poll: state.last_successful_poll,
        };

        let json = serde_json::to_string_pretty(&state_file)
            .map_err(|e| Error::state_store(format!("Failed to serialize state: {}", e)))?;

        // Write to temporary file first
        let temp_path = self.temp_path();
        let guard = TempFileGuard::new(temp_path.clone());
        {
            let mut file = fs::File::create(&temp_path).await.map_err(|e| {
                Error::state_store(format!(
                    "Failed to create temp file {}: {}",
                    temp_path.display(),
                    e
                ))
            })?;

            file.write_all(json.as_bytes()).await.map_err(|e| {
                Error::state_store(format!(
                    "Failed to write to temp file {}: {}",
                    temp_path.display(),
                    e
                ))
            })?;

            file.flush().await.map_err(|e| {
                Error::state_store(format!(
                    "Failed to flush temp file {}: {}",
                    temp_path.display(),
                    e
                ))
            })?;

            file.sync_all().await.map_err(|e| {
                Error::state_store(format!(
                    "Failed to sync temp file {}: {}",
                    temp_path.display(),
                    e
                ))
            })?;
        }

        // Create backup of current file (if it exists)
        if self.path.is_file() {
            let backup_path = Self::backup_path(&self.path);
            if let Err(e) = fs::copy(&self.path, &backup_path).await {
                tracing::warn!("Failed to create backup: {}", e);
            }
        }

        // Atomic rename (temp -> actual)
        fs::rename(&temp_path, &self.path).await.map_err(|e| {
            Error::state_store(format!(
                "Failed to rename {} to {}: {}",
                temp_path.display(),
                self.path.display(),
                e
            ))
        })?;
        guard.commit();

        tracing::trace!("State written to file: {}", self.path.display());
        Ok(())
    }

    /// `<file>.<suffix>` next to the state file
    fn sibling(path: &Path, suffix: &str) -> PathBuf {
        let mut name: OsString = path.file_name().map(OsString::from).unwrap_or_default();
        name.push(".");
        name.push(suffix);
        path.with_file_name(name)
    }

    /// Get path to temporary file for atomic writes
    fn temp_path(&self) -> PathBuf {
        Self::sibling(&self.path, "tmp")
    }

    /// Get path to backup file
    fn backup_path(path: &Path) -> PathBuf {
        Self::sibling(path, "backup")
    }
}

#[async_trait]
impl StateStore for FileStateStore {
    async fn load(&self) -> State {
        Self::load_state_with_recovery(&self.path).await
    }

    async fn save(&self, state: &mut State) -> Result<(), Error> {
        let evicted = state.seen.prune(self.seen_limit);
        if evicted > 0 {
            tracing::debug!("Evicted {} oldest seen ids (cap {})", evicted, self.seen_limit);
        }
        self.write_state(state).await
    }
}
