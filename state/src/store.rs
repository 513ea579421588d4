//! The state manager: mutation protocol, dispatch, persistence and snapshots
//!
//! A single tree of JSON values addressed by dot-separated paths. Every
//! committed write replaces the tree wholesale, so callbacks never observe a
//! tree that changes under them. Locks are released before any callback runs.

use lexis_core::{
    HistoryEntry, MutationKind, StateError, StateMutator, StateProvider, StateResult, StoreConfig,
    Timestamp, Validator, MODULES_NAMESPACE, WILDCARD_PATH,
};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use serde_json::{Map, Value};
use std::cell::RefCell;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use tracing::{debug, error, info, warn};

use crate::history::MutationHistory;
use crate::memory::SharedStorage;
use crate::module::{ModuleOptions, ModuleScope};
use crate::path::{ancestors, get_at, join_path, merge_values, normalize_path, remove_at, set_at};
use crate::persistence::{collect_persisted, PersistTarget, Persistence, RestoreOutcome, SaveTimer};
use crate::snapshot::StateSnapshot;
use crate::subscription::{subscriber, SubscribeOptions, Subscription, SubscriptionRegistry};

/// Options for a single write
#[derive(Clone, Default)]
pub struct SetOptions {
    /// Commit without notifying subscribers or scheduling a save
    pub silent: bool,
    /// Shallow-merge object values into the existing object
    pub merge: bool,
    /// Reject the write when this returns false
    pub validate: Option<Validator>,
    /// Recorded in the history entry
    pub source: Option<String>,
}

impl SetOptions {
    pub fn silent() -> Self {
        Self {
            silent: true,
            ..Self::default()
        }
    }

    pub fn merge() -> Self {
        Self {
            merge: true,
            ..Self::default()
        }
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    pub fn with_validator<F>(mut self, validate: F) -> Self
    where
        F: Fn(&Value) -> bool + Send + Sync + 'static,
    {
        self.validate = Some(Arc::new(validate));
        self
    }
}

impl std::fmt::Debug for SetOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SetOptions")
            .field("silent", &self.silent)
            .field("merge", &self.merge)
            .field("validate", &self.validate.is_some())
            .field("source", &self.source)
            .finish()
    }
}

/// Diagnostic view of the store
#[derive(Debug, Clone, Serialize)]
pub struct DebugInfo {
    pub state: Value,
    pub state_bytes: usize,
    pub history_len: usize,
    pub history_capacity: usize,
    pub last_mutation: Option<HistoryEntry>,
    pub subscription_count: usize,
    pub subscribed_paths: Vec<String>,
    pub modules: Vec<String>,
    pub persistence_enabled: bool,
    pub save_pending: bool,
    pub destroyed: bool,
}

thread_local! {
    /// Dispatch depth of each store on the current thread, keyed by store address
    static NOTIFY_DEPTH: RefCell<HashMap<usize, usize>> = RefCell::new(HashMap::new());
}

/// Marks one level of dispatch for a store on the current thread
struct DepthGuard {
    key: usize,
}

impl DepthGuard {
    fn enter(key: usize) -> Self {
        NOTIFY_DEPTH.with(|depths| *depths.borrow_mut().entry(key).or_insert(0) += 1);
        Self { key }
    }

    fn current(key: usize) -> usize {
        NOTIFY_DEPTH.with(|depths| depths.borrow().get(&key).copied().unwrap_or(0))
    }
}

impl Drop for DepthGuard {
    fn drop(&mut self) {
        let _ = NOTIFY_DEPTH.try_with(|depths| {
            let mut depths = depths.borrow_mut();
            if let Some(depth) = depths.get_mut(&self.key) {
                *depth -= 1;
                if *depth == 0 {
                    depths.remove(&self.key);
                }
            }
        });
    }
}

/// Reactive state store
///
/// Re-entrant writes are bounded per thread: a `set` issued from inside a
/// callback counts against the depth of the dispatch that called it, while
/// writes from other threads start at depth zero.
pub struct StateManager {
    config: StoreConfig,
    tree: RwLock<Arc<Value>>,
    history: Mutex<MutationHistory>,
    subscriptions: Arc<SubscriptionRegistry>,
    /// Module name -> module path
    modules: RwLock<HashMap<String, String>>,
    persistence: Option<Persistence>,
    save_timer: SaveTimer,
    destroyed: AtomicBool,
    self_ref: Weak<StateManager>,
}

impl StateManager {
    /// Create a store; `storage` is ignored when persistence is disabled
    pub fn new(config: StoreConfig, storage: Option<SharedStorage>) -> StateResult<Arc<Self>> {
        Self::with_state(config, storage, Value::Object(Map::new()))
    }

    /// Create a store seeded with an initial tree
    pub fn with_state(
        config: StoreConfig,
        storage: Option<SharedStorage>,
        initial: Value,
    ) -> StateResult<Arc<Self>> {
        config.validate()?;
        if !initial.is_object() {
            return Err(StateError::InvalidPath(
                "initial state must be an object".to_string(),
            ));
        }

        let persistence = match (config.enable_persistence, storage) {
            (true, Some(storage)) => Some(Persistence::new(
                storage,
                config.persistence_key.clone(),
                config.state_version.clone(),
            )),
            (true, None) => {
                warn!("Persistence enabled without storage, running memory-only");
                None
            }
            (false, _) => None,
        };

        Ok(Self::assemble(config, persistence, initial))
    }

    /// Purely in-memory store with default settings
    pub fn in_memory() -> Arc<Self> {
        Self::assemble(StoreConfig::memory_only(), None, Value::Object(Map::new()))
    }

    fn assemble(
        config: StoreConfig,
        persistence: Option<Persistence>,
        initial: Value,
    ) -> Arc<Self> {
        let history = MutationHistory::new(config.max_history);
        let save_timer = SaveTimer::new(config.save_delay());

        Arc::new_cyclic(|self_ref| Self {
            config,
            tree: RwLock::new(Arc::new(initial)),
            history: Mutex::new(history),
            subscriptions: Arc::new(SubscriptionRegistry::new()),
            modules: RwLock::new(HashMap::new()),
            persistence,
            save_timer,
            destroyed: AtomicBool::new(false),
            self_ref: self_ref.clone(),
        })
    }

    /// Restore persisted state at startup; failures leave the defaults in place
    pub fn init(&self) -> RestoreOutcome {
        match self.restore() {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!("Restore failed, continuing with in-memory defaults: {}", e);
                RestoreOutcome::NotFound
            }
        }
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// Owned copy of the whole tree
    pub fn state(&self) -> Value {
        self.current_tree().as_ref().clone()
    }

    fn current_tree(&self) -> Arc<Value> {
        self.tree.read().clone()
    }

    fn depth_key(&self) -> usize {
        self as *const Self as usize
    }

    // ============ Mutation Protocol ============

    /// Write `value` at `path`; returns false when the write was a no-op
    pub fn set_with(&self, path: &str, value: Value, options: SetOptions) -> StateResult<bool> {
        self.mutate(path, Some(value), options)
    }

    /// Remove the value at `path`; returns false when nothing was there
    pub fn unset_with(&self, path: &str, options: SetOptions) -> StateResult<bool> {
        if normalize_path(path).is_empty() {
            return Err(StateError::InvalidPath("cannot unset the root".to_string()));
        }
        self.mutate(path, None, options)
    }

    fn mutate(&self, path: &str, value: Option<Value>, options: SetOptions) -> StateResult<bool> {
        let depth = DepthGuard::current(self.depth_key());
        if depth >= self.config.max_notify_depth {
            warn!("Mutation depth limit reached at '{}'", path);
            return Err(StateError::RecursionLimit {
                depth,
                path: path.to_string(),
            });
        }

        if path.trim() == WILDCARD_PATH {
            return Err(StateError::InvalidPath(format!(
                "'{}' is reserved for wildcard subscriptions",
                WILDCARD_PATH
            )));
        }
        let path = normalize_path(path);

        // Validating
        if let (Some(validate), Some(value)) = (&options.validate, &value) {
            if !validate(value) {
                return Err(StateError::Validation(path));
            }
        }

        // Committing
        let (old_value, new_value, kind) = {
            let mut tree = self.tree.write();
            let old_value = get_at(&tree, &path).cloned();
            let (new_value, kind) = match value {
                Some(value) if options.merge => {
                    let (merged, did_merge) = merge_values(old_value.as_ref(), value);
                    let kind = if did_merge { MutationKind::Merge } else { MutationKind::Set };
                    (Some(merged), kind)
                }
                Some(value) => (Some(value), MutationKind::Set),
                None => (None, MutationKind::Unset),
            };

            if old_value == new_value {
                return Ok(false);
            }

            let mut next = (**tree).clone();
            match &new_value {
                Some(value) => set_at(&mut next, &path, value.clone(), self.config.strict_paths)?,
                None => {
                    remove_at(&mut next, &path);
                }
            }
            *tree = Arc::new(next);
            (old_value, new_value, kind)
        };

        let source = options.source.unwrap_or_else(|| "direct".to_string());
        if self.config.debug {
            info!("State {} '{}' (source: {})", kind, path, source);
        } else {
            debug!("State {} '{}' (source: {})", kind, path, source);
        }

        if self.config.enable_history {
            self.history.lock().push(HistoryEntry {
                kind,
                path: path.clone(),
                old_value: old_value.clone(),
                new_value: new_value.clone(),
                timestamp: Timestamp::now(),
                source,
            });
        }

        if !options.silent {
            {
                let _guard = DepthGuard::enter(self.depth_key());
                self.notify(&path, new_value.as_ref(), old_value.as_ref());
            }
            self.schedule_save();
        }

        Ok(true)
    }

    fn notify(&self, path: &str, new_value: Option<&Value>, old_value: Option<&Value>) {
        for entry in self.subscriptions.exact(path) {
            entry.invoke(new_value, old_value, path);
        }

        for ancestor in ancestors(path) {
            let deep = self.subscriptions.deep_at(&ancestor);
            if deep.is_empty() {
                continue;
            }
            let current = self.get(&ancestor);
            for entry in deep {
                entry.invoke(current.as_ref(), None, path);
            }
        }

        for entry in self.subscriptions.wildcard() {
            entry.invoke(new_value, old_value, path);
        }
    }

    // ============ Subscriptions ============

    /// Watch `path`; use `*` to receive every mutation
    pub fn subscribe<F>(&self, path: &str, callback: F, options: SubscribeOptions) -> Subscription
    where
        F: Fn(Option<&Value>, Option<&Value>, &str) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        let path = if path.trim() == WILDCARD_PATH {
            WILDCARD_PATH.to_string()
        } else {
            normalize_path(path)
        };

        let subscription = self
            .subscriptions
            .insert(&path, subscriber(callback), &options);

        if options.immediate {
            let current = if path == WILDCARD_PATH {
                Some(self.state())
            } else {
                self.get(&path)
            };
            subscription.entry().invoke(current.as_ref(), None, &path);
        }

        subscription
    }

    // ============ Module Scopes ============

    /// Write a module's initial state and return its scoped accessor
    pub fn register_module(
        self: &Arc<Self>,
        name: &str,
        initial_state: Value,
        options: ModuleOptions,
    ) -> StateResult<ModuleScope> {
        let name = name.trim();
        if name.is_empty() || name.contains('.') || name == WILDCARD_PATH {
            return Err(StateError::InvalidPath(format!("invalid module name '{}'", name)));
        }

        let namespace = options.namespace.as_deref().unwrap_or(MODULES_NAMESPACE);
        let path = join_path(namespace, name);

        self.set_with(
            &path,
            initial_state,
            SetOptions {
                silent: false,
                merge: options.merge,
                validate: options.validate.clone(),
                source: Some(format!("module:{}", name)),
            },
        )?;

        self.modules.write().insert(name.to_string(), path.clone());
        info!("Registered module '{}' at '{}'", name, path);

        Ok(ModuleScope::new(self.clone(), name, path))
    }

    /// Accessor for a registered module, `None` while its path is empty
    pub fn get_module(self: &Arc<Self>, name: &str) -> Option<ModuleScope> {
        let path = self
            .modules
            .read()
            .get(name)
            .cloned()
            .unwrap_or_else(|| join_path(MODULES_NAMESPACE, name));

        match self.get(&path) {
            None | Some(Value::Null) => None,
            Some(_) => Some(ModuleScope::new(self.clone(), name, path)),
        }
    }

    pub(crate) fn unregister_module(&self, name: &str, path: &str) -> StateResult<()> {
        self.unset_with(path, SetOptions::default().with_source(format!("module:{}", name)))?;
        self.modules.write().remove(name);
        info!("Unregistered module '{}'", name);
        Ok(())
    }

    /// Registered module names, sorted
    pub fn modules(&self) -> Vec<String> {
        let mut names: Vec<String> = self.modules.read().keys().cloned().collect();
        names.sort();
        names
    }

    // ============ Persistence ============

    /// Write the target paths to durable storage; returns the entry count
    pub fn persist(&self, target: PersistTarget) -> StateResult<usize> {
        let persistence = self
            .persistence
            .as_ref()
            .ok_or(StateError::PersistenceDisabled)?;

        let tree = self.current_tree();
        let data = collect_persisted(&tree, &target, &self.config.persist_exclude);
        let count = persistence.write(&target, data)?;

        if target == PersistTarget::All {
            self.save_timer.mark_clean();
        }
        Ok(count)
    }

    /// Load the persisted envelope back into the tree without notifying
    pub fn restore(&self) -> StateResult<RestoreOutcome> {
        let Some(persistence) = &self.persistence else {
            return Ok(RestoreOutcome::Disabled);
        };

        let envelope = match persistence.read() {
            Ok(Some(envelope)) => envelope,
            Ok(None) => return Ok(RestoreOutcome::NotFound),
            Err(e) => {
                warn!("Failed to read persisted state: {}", e);
                return Err(e);
            }
        };

        if let Err(e) = persistence.check_version(&envelope) {
            warn!("Skipping restore: {}", e);
            return Ok(RestoreOutcome::VersionMismatch {
                stored: envelope.version,
            });
        }

        let entries = if envelope.top_level {
            self.restore_top_level(envelope.data)?
        } else {
            let mut entries = 0;
            for (path, value) in envelope.data {
                match self.set_with(&path, value, SetOptions::silent().with_source("restore")) {
                    Ok(_) => entries += 1,
                    Err(e) => warn!("Failed to restore '{}': {}", path, e),
                }
            }
            entries
        };

        info!("Restored {} entries from '{}'", entries, persistence.key());
        Ok(RestoreOutcome::Restored { entries })
    }

    /// Put whole top-level branches back as keys in one silent commit
    fn restore_top_level(&self, data: Map<String, Value>) -> StateResult<usize> {
        let entries = data.len();
        let mut root = match self.state() {
            Value::Object(root) => root,
            _ => Map::new(),
        };
        root.extend(data);

        self.set_with("", Value::Object(root), SetOptions::silent().with_source("restore"))?;
        Ok(entries)
    }

    /// Remove the stored envelope and drop any pending autosave
    pub fn clear_persisted(&self) -> StateResult<()> {
        let persistence = self
            .persistence
            .as_ref()
            .ok_or(StateError::PersistenceDisabled)?;

        self.save_timer.cancel();
        persistence.clear()?;
        info!("Cleared persisted state under '{}'", persistence.key());
        Ok(())
    }

    fn schedule_save(&self) {
        if !self.config.auto_save
            || self.persistence.is_none()
            || self.destroyed.load(Ordering::Acquire)
        {
            return;
        }

        let manager = self.self_ref.clone();
        self.save_timer.schedule(move || {
            let Some(manager) = manager.upgrade() else {
                return;
            };
            if let Err(e) = manager.persist(PersistTarget::All) {
                warn!("Autosave failed: {}", e);
            }
        });
    }

    // ============ History & Snapshots ============

    /// Recorded mutations, oldest first
    pub fn history(&self) -> Vec<HistoryEntry> {
        self.history.lock().entries()
    }

    pub fn clear_history(&self) {
        self.history.lock().clear();
    }

    /// Deep copy of the tree and history
    pub fn snapshot(&self) -> StateSnapshot {
        let state = self.state();
        let history = self.history();
        StateSnapshot::new(state, history)
    }

    /// Replace the tree and history wholesale and notify wildcard subscribers
    pub fn restore_snapshot(&self, snapshot: &StateSnapshot) -> StateResult<()> {
        snapshot.verify()?;

        let depth = DepthGuard::current(self.depth_key());
        if depth >= self.config.max_notify_depth {
            return Err(StateError::RecursionLimit {
                depth,
                path: WILDCARD_PATH.to_string(),
            });
        }

        let (old_tree, new_tree) = {
            let mut tree = self.tree.write();
            let new_tree = Arc::new(snapshot.state.clone());
            let old_tree = std::mem::replace(&mut *tree, new_tree.clone());
            (old_tree, new_tree)
        };
        if self.config.enable_history {
            self.history.lock().replace(snapshot.history.clone());
        }

        info!("Restored snapshot {}", snapshot.id);

        {
            let _guard = DepthGuard::enter(self.depth_key());
            for entry in self.subscriptions.wildcard() {
                entry.invoke(Some(new_tree.as_ref()), Some(old_tree.as_ref()), WILDCARD_PATH);
            }
        }
        self.schedule_save();
        Ok(())
    }

    // ============ Lifecycle ============

    pub fn get_debug_info(&self) -> DebugInfo {
        let state = self.state();
        let state_bytes = serde_json::to_vec(&state).map(|b| b.len()).unwrap_or(0);
        let history = self.history.lock();

        DebugInfo {
            state,
            state_bytes,
            history_len: history.len(),
            history_capacity: history.capacity(),
            last_mutation: history.latest().cloned(),
            subscription_count: self.subscriptions.count(),
            subscribed_paths: self.subscriptions.paths(),
            modules: self.modules(),
            persistence_enabled: self.persistence.is_some(),
            save_pending: self.save_timer.is_pending(),
            destroyed: self.is_destroyed(),
        }
    }

    /// Final save, then drop every subscription and module registration
    pub fn destroy(&self) {
        if self.destroyed.swap(true, Ordering::AcqRel) {
            return;
        }

        self.save_timer.cancel();
        if self.persistence.is_some() {
            match self.persist(PersistTarget::All) {
                Ok(count) => debug!("Final save wrote {} entries", count),
                Err(e) => error!("Final save failed: {}", e),
            }
        }

        self.subscriptions.clear();
        self.modules.write().clear();
        info!("State manager destroyed");
    }

    pub fn is_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::Acquire)
    }
}

impl StateProvider for StateManager {
    fn get(&self, path: &str) -> Option<Value> {
        let tree = self.current_tree();
        get_at(&tree, path).cloned()
    }
}

impl StateMutator for StateManager {
    fn set(&self, path: &str, value: Value) -> StateResult<()> {
        self.set_with(path, value, SetOptions::default()).map(|_| ())
    }

    fn unset(&self, path: &str) -> StateResult<()> {
        self.unset_with(path, SetOptions::default()).map(|_| ())
    }
}

/// Builder for state managers
pub struct StateManagerBuilder {
    config: StoreConfig,
    storage: Option<SharedStorage>,
    initial: Value,
}

impl StateManagerBuilder {
    pub fn new() -> Self {
        Self {
            config: StoreConfig::default(),
            storage: None,
            initial: Value::Object(Map::new()),
        }
    }

    pub fn config(mut self, config: StoreConfig) -> Self {
        self.config = config;
        self
    }

    pub fn storage(mut self, storage: SharedStorage) -> Self {
        self.storage = Some(storage);
        self
    }

    pub fn initial_state(mut self, state: Value) -> Self {
        self.initial = state;
        self
    }

    pub fn persistence_key(mut self, key: &str) -> Self {
        self.config.persistence_key = key.to_string();
        self
    }

    pub fn without_history(mut self) -> Self {
        self.config.enable_history = false;
        self
    }

    pub fn build(self) -> StateResult<Arc<StateManager>> {
        StateManager::with_state(self.config, self.storage, self.initial)
    }
}

impl Default for StateManagerBuilder {
    fn default() -> Self {
        Self::new()
    }
}
