//! Persistence: envelope assembly and debounced autosave

use lexis_core::{PersistedEnvelope, StateError, StateResult};
use parking_lot::Mutex;
use serde_json::{Map, Value};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::memory::SharedStorage;
use crate::path::{get_at, normalize_path};

/// What `persist` writes
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum PersistTarget {
    /// Every top-level branch except the excluded transient ones
    #[default]
    All,
    /// A list of paths
    Paths(Vec<String>),
    /// A single path
    Path(String),
}

/// Result of `restore`
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RestoreOutcome {
    /// Entries written back into the tree
    Restored { entries: usize },
    /// Nothing stored under the key
    NotFound,
    /// Stored envelope has a different version; defaults kept
    VersionMismatch { stored: String },
    /// Persistence is turned off
    Disabled,
}

/// Build the envelope data for a target: a flat map of path to value
pub fn collect_persisted(
    tree: &Value,
    target: &PersistTarget,
    exclude: &[String],
) -> Map<String, Value> {
    let mut data = Map::new();
    match target {
        PersistTarget::All => {
            if let Some(root) = tree.as_object() {
                for (key, value) in root {
                    if exclude.iter().any(|x| x == key) {
                        continue;
                    }
                    data.insert(key.clone(), value.clone());
                }
            }
        }
        PersistTarget::Paths(paths) => {
            for path in paths {
                collect_path(tree, path, &mut data);
            }
        }
        PersistTarget::Path(path) => collect_path(tree, path, &mut data),
    }
    data
}

fn collect_path(tree: &Value, path: &str, data: &mut Map<String, Value>) {
    let path = normalize_path(path);
    if path.is_empty() {
        return;
    }
    if let Some(value) = get_at(tree, &path) {
        data.insert(path, value.clone());
    }
}

/// Envelope reader/writer bound to one storage key
pub struct Persistence {
    storage: SharedStorage,
    key: String,
    version: String,
}

impl Persistence {
    pub fn new(storage: SharedStorage, key: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            storage,
            key: key.into(),
            version: version.into(),
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    /// Write an envelope around the `data` collected for `target`
    pub fn write(&self, target: &PersistTarget, data: Map<String, Value>) -> StateResult<usize> {
        let count = data.len();
        let envelope = match target {
            PersistTarget::All => PersistedEnvelope::top_level(self.version.clone(), data),
            _ => PersistedEnvelope::new(self.version.clone(), data),
        };
        self.storage.set_item(&self.key, &envelope.to_json()?)?;
        debug!("Persisted {} entries under '{}'", count, self.key);
        Ok(count)
    }

    /// Read the stored envelope, if any
    pub fn read(&self) -> StateResult<Option<PersistedEnvelope>> {
        let Some(raw) = self.storage.get_item(&self.key)? else {
            return Ok(None);
        };
        PersistedEnvelope::from_json(&raw)
            .map(Some)
            .map_err(|e| StateError::Serialization(format!("envelope under '{}': {}", self.key, e)))
    }

    /// Fail with `VersionMismatch` unless the envelope matches this version
    pub fn check_version(&self, envelope: &PersistedEnvelope) -> StateResult<()> {
        if envelope.version != self.version {
            return Err(StateError::VersionMismatch {
                expected: self.version.clone(),
                got: envelope.version.clone(),
            });
        }
        Ok(())
    }

    pub fn clear(&self) -> StateResult<()> {
        self.storage.remove_item(&self.key)
    }
}

/// Debounce timer for autosave
///
/// Every `schedule` aborts the pending task and starts a new one. Without a
/// tokio runtime nothing is spawned and the save stays pending until the
/// owner flushes it.
pub struct SaveTimer {
    delay: Duration,
    task: Mutex<Option<JoinHandle<()>>>,
    dirty: AtomicBool,
}

impl SaveTimer {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            task: Mutex::new(None),
            dirty: AtomicBool::new(false),
        }
    }

    pub fn schedule<F>(&self, save: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.dirty.store(true, Ordering::Release);

        let mut task = self.task.lock();
        if let Some(pending) = task.take() {
            pending.abort();
        }

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let delay = self.delay;
                *task = Some(handle.spawn(async move {
                    tokio::time::sleep(delay).await;
                    save();
                }));
            }
            Err(_) => debug!("No async runtime, save deferred until flush"),
        }
    }

    /// Abort the pending task; returns whether a save was outstanding
    pub fn cancel(&self) -> bool {
        if let Some(pending) = self.task.lock().take() {
            pending.abort();
        }
        self.dirty.swap(false, Ordering::AcqRel)
    }

    pub fn mark_clean(&self) {
        self.dirty.store(false, Ordering::Release);
    }

    pub fn is_pending(&self) -> bool {
        self.dirty.load(Ordering::Acquire)
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }
}

impl Drop for SaveTimer {
    fn drop(&mut self) {
        if let Some(pending) = self.task.get_mut().take() {
            pending.abort();
        }
    }
}
