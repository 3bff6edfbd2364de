//! Storage for the working state and its lock

use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;

use crate::error::{AccResult, AccTestError, LockError};
use crate::lock::{Command, LockInfo};
use crate::state::StateFile;

/// Where the harness keeps its working state
#[async_trait]
pub trait StateBackend: Send + Sync {
    /// Returns `None` before the first write
    async fn read_state(&self) -> AccResult<Option<StateFile>>;

    /// Persist the state; the caller increments the serial
    async fn write_state(&self, state: &StateFile) -> AccResult<()>;

    /// Fails with `Locked` while another unexpired lock is held
    async fn acquire_lock(&self, command: Command) -> AccResult<LockInfo>;

    async fn release_lock(&self, lock: &LockInfo) -> AccResult<()>;
}

/// In-process backend, the default for test cases
#[derive(Default)]
pub struct InMemoryBackend {
    state: Mutex<Option<StateFile>>,
    lock: Mutex<Option<LockInfo>>,
}

impl InMemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

fn guard<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[async_trait]
impl StateBackend for InMemoryBackend {
    async fn read_state(&self) -> AccResult<Option<StateFile>> {
        Ok(guard(&self.state).clone())
    }

    async fn write_state(&self, state: &StateFile) -> AccResult<()> {
        *guard(&self.state) = Some(state.clone());
        Ok(())
    }

    async fn acquire_lock(&self, command: Command) -> AccResult<LockInfo> {
        let mut held = guard(&self.lock);
        if let Some(existing) = held.as_ref()
            && !existing.is_expired()
        {
            return Err(LockError::locked(existing).into());
        }
        let lock = LockInfo::new(command);
        *held = Some(lock.clone());
        Ok(lock)
    }

    async fn release_lock(&self, lock: &LockInfo) -> AccResult<()> {
        let mut held = guard(&self.lock);
        match held.as_ref() {
            None => Err(LockError::LockNotFound(lock.id.clone()).into()),
            Some(existing) if existing.id != lock.id => Err(LockError::LockMismatch {
                expected: lock.id.clone(),
                actual: existing.id.clone(),
            }
            .into()),
            Some(_) => {
                *held = None;
                Ok(())
            }
        }
    }
}

/// JSON state file with a sibling `.lock` file
pub struct LocalBackend {
    state_path: PathBuf,
    lock_path: PathBuf,
}

impl LocalBackend {
    pub const DEFAULT_STATE_FILE: &'static str = "stratus.acctest.state.json";

    pub fn with_path(state_path: impl Into<PathBuf>) -> Self {
        let state_path = state_path.into();
        let lock_path = state_path.with_extension("lock");
        Self {
            state_path,
            lock_path,
        }
    }

    /// Backend storing its state in `dir`
    pub fn in_dir(dir: &Path) -> Self {
        Self::with_path(dir.join(Self::DEFAULT_STATE_FILE))
    }

    pub fn state_path(&self) -> &Path {
        &self.state_path
    }

    fn read_lock(&self) -> AccResult<Option<LockInfo>> {
        if !self.lock_path.exists() {
            return Ok(None);
        }
        let content = std::fs::read_to_string(&self.lock_path)
            .map_err(|e| AccTestError::Io(format!("Failed to read lock file: {}", e)))?;
        serde_json::from_str(&content)
            .map(Some)
            .map_err(|e| AccTestError::InvalidState(format!("Failed to parse lock file: {}", e)))
    }
}

#[async_trait]
impl StateBackend for LocalBackend {
    async fn read_state(&self) -> AccResult<Option<StateFile>> {
        if !self.state_path.exists() {
            return Ok(None);
        }

        let content = std::fs::read_to_string(&self.state_path)
            .map_err(|e| AccTestError::Io(format!("Failed to read state file: {}", e)))?;

        let state: StateFile = serde_json::from_str(&content).map_err(|e| {
            AccTestError::InvalidState(format!("Failed to parse state file: {}", e))
        })?;

        Ok(Some(state))
    }

    async fn write_state(&self, state: &StateFile) -> AccResult<()> {
        let content = serde_json::to_string_pretty(state).map_err(|e| {
            AccTestError::Serialization(format!("Failed to serialize state: {}", e))
        })?;

        std::fs::write(&self.state_path, content)
            .map_err(|e| AccTestError::Io(format!("Failed to write state file: {}", e)))
    }

    async fn acquire_lock(&self, command: Command) -> AccResult<LockInfo> {
        // An unreadable lock file is treated as stale
        if let Ok(Some(existing)) = self.read_lock()
            && !existing.is_expired()
        {
            return Err(LockError::locked(&existing).into());
        }

        let lock = LockInfo::new(command);
        let content = serde_json::to_string_pretty(&lock).map_err(|e| {
            AccTestError::Serialization(format!("Failed to serialize lock: {}", e))
        })?;
        std::fs::write(&self.lock_path, content)
            .map_err(|e| AccTestError::Io(format!("Failed to write lock file: {}", e)))?;

        Ok(lock)
    }

    async fn release_lock(&self, lock: &LockInfo) -> AccResult<()> {
        let Some(existing) = self.read_lock()? else {
            return Err(LockError::LockNotFound(lock.id.clone()).into());
        };

        if existing.id != lock.id {
            return Err(LockError::LockMismatch {
                expected: lock.id.clone(),
                actual: existing.id,
            }
            .into());
        }

        std::fs::remove_file(&self.lock_path)
            .map_err(|e| AccTestError::Io(format!("Failed to remove lock file: {}", e)))
    }
}
