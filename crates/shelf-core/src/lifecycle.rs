//! Database lifecycle: export and whole-store import.
//!
//! Every regular operation holds the store gate shared. Import stages and
//! validates the incoming file first, then takes the gate exclusively,
//! which drains in-flight operations and blocks new ones until the swap
//! completes.
//!
//! ```text
//! Idle -> Draining -> Swapping -> Idle
//!                             \-> Failed   (no store could be opened)
//! ```

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, RwLock};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::Serialize;

use crate::error::{Result, ShelfError};
use crate::fs::{replace_atomic, sibling_temp_path, write_new_synced};
use crate::storage::sqlite::validation::{check_header, validate_store_file};
use crate::storage::{SqliteStorage, StorageEngine, StoreCounts};

/// Required extension for uploaded store files.
pub const IMPORT_EXTENSION: &str = ".db";

/// Where the lifecycle manager is in the swap protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleState {
    Idle,
    Draining,
    Swapping,
    Failed,
}

/// Moves a staged file over the live path.
type SwapFn = fn(&Path, &Path) -> std::io::Result<()>;

/// Owns the live store and the swap protocol around it.
pub struct Database {
    path: PathBuf,
    staging_dir: PathBuf,
    store: RwLock<Option<SqliteStorage>>,
    state: Mutex<LifecycleState>,
    import_lock: Mutex<()>,
    swap: SwapFn,
}

impl Database {
    /// Open the live store, creating it if absent, and prepare the staging
    /// directory.
    pub fn open(path: &Path, staging_dir: &Path) -> Result<Self> {
        fs::create_dir_all(staging_dir)?;
        let store = SqliteStorage::open_or_create(path)?;
        Ok(Self {
            path: path.to_path_buf(),
            staging_dir: staging_dir.to_path_buf(),
            store: RwLock::new(Some(store)),
            state: Mutex::new(LifecycleState::Idle),
            import_lock: Mutex::new(()),
            swap: replace_atomic,
        })
    }

    #[cfg(test)]
    fn with_swap(mut self, swap: SwapFn) -> Self {
        self.swap = swap;
        self
    }

    /// Path of the live store file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn state(&self) -> LifecycleState {
        *self.lock_state()
    }

    /// Run `f` against the live store while holding the gate shared.
    ///
    /// Blocks while an import is draining or swapping.
    ///
    /// # Errors
    ///
    /// Returns `ShelfError::StoreUnavailable` if the last import left the
    /// store unopened.
    pub fn with_store<T>(&self, f: impl FnOnce(&SqliteStorage) -> Result<T>) -> Result<T> {
        let guard = self
            .store
            .read()
            .map_err(|_| ShelfError::Storage("Store gate poisoned".to_string()))?;
        match guard.as_ref() {
            Some(store) => f(store),
            None => Err(ShelfError::StoreUnavailable),
        }
    }

    /// Copy of the live store file, byte for byte.
    ///
    /// `authorize` runs against the same store the bytes are read from.
    pub fn export(
        &self,
        authorize: impl FnOnce(&SqliteStorage) -> Result<()>,
    ) -> Result<Vec<u8>> {
        let bytes = self.with_store(|store| {
            authorize(store)?;
            store.snapshot_bytes()
        })?;
        tracing::info!(bytes = bytes.len(), "exported store");
        Ok(bytes)
    }

    /// Replace the live store with an uploaded store file.
    ///
    /// The live file is untouched unless validation and staging both
    /// succeed, and it is only ever replaced by an atomic rename.
    ///
    /// Once every in-flight operation has drained, `authorize` runs against
    /// the store about to be replaced. `on_swapped` runs as soon as the live
    /// file has changed, before any other operation can see the new store.
    ///
    /// # Errors
    ///
    /// Returns `ShelfError::InvalidFormat` for a bad name or artifact,
    /// the `authorize` error unchanged, `ShelfError::Io` if staging or the
    /// rename fails (live store intact), or the open error if the new store
    /// cannot be opened (state `Failed`).
    pub fn import(
        &self,
        filename: &str,
        bytes: &[u8],
        authorize: impl FnOnce(&SqliteStorage) -> Result<()>,
        on_swapped: impl FnOnce(),
    ) -> Result<StoreCounts> {
        let _serialized = self
            .import_lock
            .lock()
            .map_err(|_| ShelfError::Storage("Import lock poisoned".to_string()))?;

        if !filename.ends_with(IMPORT_EXTENSION) {
            return Err(ShelfError::InvalidFormat(format!(
                "expected a {} file",
                IMPORT_EXTENSION
            )));
        }
        check_header(bytes)?;

        self.stage_and_validate(bytes)?;

        let temp_path = sibling_temp_path(&self.path, "import")?;
        write_new_synced(&temp_path, bytes)?;

        self.set_state(LifecycleState::Draining);
        let mut gate = match self.store.write() {
            Ok(gate) => gate,
            Err(_) => {
                let _ = fs::remove_file(&temp_path);
                self.set_state(LifecycleState::Failed);
                return Err(ShelfError::Storage("Store gate poisoned".to_string()));
            }
        };

        let authorized = match gate.as_ref() {
            Some(current) => authorize(current),
            None => Err(ShelfError::StoreUnavailable),
        };
        if let Err(err) = authorized {
            let _ = fs::remove_file(&temp_path);
            let state = if gate.is_some() {
                LifecycleState::Idle
            } else {
                LifecycleState::Failed
            };
            self.set_state(state);
            return Err(err);
        }
        self.set_state(LifecycleState::Swapping);

        if let Some(current) = gate.take() {
            if let Err(err) = current.close() {
                tracing::warn!(error = %err, "closing live store before swap failed");
            }
        }

        if let Err(err) = (self.swap)(&temp_path, &self.path) {
            let _ = fs::remove_file(&temp_path);
            tracing::error!(error = %err, "store swap failed; reopening previous store");
            match SqliteStorage::open(&self.path) {
                Ok(previous) => {
                    *gate = Some(previous);
                    self.set_state(LifecycleState::Idle);
                }
                Err(reopen_err) => {
                    tracing::error!(error = %reopen_err, "previous store could not be reopened");
                    on_swapped();
                    self.set_state(LifecycleState::Failed);
                }
            }
            return Err(err.into());
        }
        on_swapped();

        match SqliteStorage::open(&self.path) {
            Ok(store) => {
                let counts = store.counts();
                *gate = Some(store);
                self.set_state(LifecycleState::Idle);
                let counts = counts?;
                tracing::info!(users = counts.users, items = counts.items, "imported store");
                Ok(counts)
            }
            Err(err) => {
                tracing::error!(error = %err, "imported store could not be opened");
                self.set_state(LifecycleState::Failed);
                Err(err)
            }
        }
    }

    /// Write `bytes` into the staging directory and fully validate them
    /// there. The staged file is always removed afterwards.
    fn stage_and_validate(&self, bytes: &[u8]) -> Result<()> {
        fs::create_dir_all(&self.staging_dir)?;
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_err(|e| ShelfError::Storage(format!("System time error: {}", e)))?
            .as_nanos();
        let staged = self
            .staging_dir
            .join(format!("upload-{}-{}.db", std::process::id(), nanos));

        write_new_synced(&staged, bytes)?;
        let validated = validate_store_file(&staged);
        let _ = fs::remove_file(&staged);
        if let Err(ref err) = validated {
            tracing::warn!(error = %err, "rejected store upload");
        }
        validated
    }

    fn lock_state(&self) -> MutexGuard<'_, LifecycleState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn set_state(&self, state: LifecycleState) {
        *self.lock_state() = state;
        tracing::debug!(?state, "lifecycle state");
    }
}
