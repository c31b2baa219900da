//! Durable tracking preferences.
//!
//! [`PersistedState`] is what a cold start resumes from. The store keeps the
//! current value in memory and rewrites the backing file on every change.

use std::{
    fs,
    path::{Path, PathBuf},
    sync::Mutex as StdMutex,
};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::dispatch::EndpointDescriptor;
use crate::tracking::{AccuracyTier, DEFAULT_CAPTURE_INTERVAL_SECS, DEFAULT_DISPATCH_INTERVAL_SECS};

#[derive(Debug, Error)]
pub enum StateError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("State file is corrupt: {0}")]
    Corrupt(#[from] serde_json::Error),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PersistedState {
    pub tracking_enabled: bool,
    pub endpoints: Vec<EndpointDescriptor>,
    pub capture_interval_secs: u64,
    pub dispatch_interval_secs: u64,
    pub accuracy: AccuracyTier,
    pub service_running: bool,
    /// Set once `initialize` has copied configured intervals and accuracy
    /// into the record. From then on the record wins over the config file.
    pub seeded: bool,
    /// Due time of a one-shot wake-up that has not fired yet.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pending_wakeup: Option<DateTime<Utc>>,
}

impl Default for PersistedState {
    fn default() -> Self {
        Self {
            tracking_enabled: false,
            endpoints: Vec::new(),
            capture_interval_secs: DEFAULT_CAPTURE_INTERVAL_SECS,
            dispatch_interval_secs: DEFAULT_DISPATCH_INTERVAL_SECS,
            accuracy: AccuracyTier::default(),
            service_running: false,
            seeded: false,
            pending_wakeup: None,
        }
    }
}

pub struct StateStore {
    path: Option<PathBuf>,
    state: StdMutex<PersistedState>,
}

impl StateStore {
    /// Opens the record at `path`, starting from defaults if it does not
    /// exist yet.
    pub fn open(path: PathBuf) -> Result<Self, StateError> {
        let state = if path.exists() {
            let content = fs::read_to_string(&path)?;
            serde_json::from_str(&content)?
        } else {
            PersistedState::default()
        };

        Ok(Self {
            path: Some(path),
            state: StdMutex::new(state),
        })
    }

    /// A store that never touches the filesystem.
    pub fn in_memory(state: PersistedState) -> Self {
        Self {
            path: None,
            state: StdMutex::new(state),
        }
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn snapshot(&self) -> PersistedState {
        self.state.lock().unwrap().clone()
    }

    pub fn tracking_enabled(&self) -> bool {
        self.state.lock().unwrap().tracking_enabled
    }

    /// Applies `change` and writes the result through.
    ///
    /// The in-memory value is updated even when the write fails, so readers
    /// in this process always see the latest decision.
    pub fn update<F>(&self, change: F) -> Result<PersistedState, StateError>
    where
        F: FnOnce(&mut PersistedState),
    {
        let mut locked = self.state.lock().unwrap();
        change(&mut locked);
        let updated = locked.clone();

        if let Some(path) = &self.path {
            if let Err(e) = write_atomic(path, &updated) {
                log::error!("Failed to persist tracking state to {}: {}", path.display(), e);
                return Err(e);
            }
        }
        Ok(updated)
    }
}

fn write_atomic(path: &Path, state: &PersistedState) -> Result<(), StateError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, serde_json::to_string_pretty(state)?)?;
    fs::rename(tmp, path)?;
    Ok(())
}
