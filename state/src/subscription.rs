//! Subscription registry
//!
//! Callbacks are keyed by the path they watch. Dispatch order for one
//! mutation is exact path, then deep subscribers on each ancestor (nearest
//! first), then the wildcard path.

use lexis_core::{SubscriptionId, Timestamp, WILDCARD_PATH};
use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use std::any::Any;
use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};
use tracing::{debug, error, warn};

/// Subscriber callback: `(new_value, old_value, mutated_path)`
pub type SubscriberFn =
    dyn Fn(Option<&Value>, Option<&Value>, &str) -> anyhow::Result<()> + Send + Sync;

/// Box a closure as a subscriber callback
pub fn subscriber<F>(callback: F) -> Arc<SubscriberFn>
where
    F: Fn(Option<&Value>, Option<&Value>, &str) -> anyhow::Result<()> + Send + Sync + 'static,
{
    Arc::new(callback)
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(message) = payload.downcast_ref::<&str>() {
        *message
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.as_str()
    } else {
        "non-string panic payload"
    }
}

/// Options for `subscribe`
#[derive(Debug, Clone, Default)]
pub struct SubscribeOptions {
    /// Fire once at subscribe time with the current value
    pub immediate: bool,
    /// Also fire when any descendant changes
    pub deep: bool,
    /// Leading-edge throttle window
    pub throttle: Option<Duration>,
}

impl SubscribeOptions {
    pub fn immediate() -> Self {
        Self {
            immediate: true,
            ..Self::default()
        }
    }

    pub fn deep() -> Self {
        Self {
            deep: true,
            ..Self::default()
        }
    }

    pub fn with_immediate(mut self) -> Self {
        self.immediate = true;
        self
    }

    pub fn with_deep(mut self) -> Self {
        self.deep = true;
        self
    }

    pub fn with_throttle(mut self, window: Duration) -> Self {
        self.throttle = Some(window);
        self
    }
}

/// A registered callback
pub struct SubscriptionEntry {
    pub id: SubscriptionId,
    pub path: String,
    pub deep: bool,
    pub created: Timestamp,
    callback: Arc<SubscriberFn>,
    throttle: Option<Duration>,
    last_fired: Mutex<Option<Instant>>,
    active: AtomicBool,
}

impl SubscriptionEntry {
    /// Run the callback unless unsubscribed or inside its throttle window
    ///
    /// Returns whether the callback ran. Callback errors are logged, never
    /// propagated.
    pub fn invoke(&self, new_value: Option<&Value>, old_value: Option<&Value>, path: &str) -> bool {
        if !self.is_active() {
            return false;
        }

        if let Some(window) = self.throttle {
            let mut last = self.last_fired.lock();
            let now = Instant::now();
            if let Some(fired) = *last {
                if now.duration_since(fired) < window {
                    return false;
                }
            }
            *last = Some(now);
        }

        let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
            (self.callback)(new_value, old_value, path)
        }));
        match outcome {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(
                "Subscriber {} on '{}' failed for change at '{}': {:#}",
                self.id, self.path, path, e
            ),
            Err(payload) => error!(
                "Subscriber {} on '{}' panicked for change at '{}': {}",
                self.id,
                self.path,
                path,
                panic_message(&*payload)
            ),
        }
        true
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }
}

/// Path-keyed callback registry
pub struct SubscriptionRegistry {
    next_id: AtomicU64,
    by_path: RwLock<HashMap<String, Vec<Arc<SubscriptionEntry>>>>,
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            by_path: RwLock::new(HashMap::new()),
        }
    }

    /// Register a callback at `path`
    pub fn insert(
        self: &Arc<Self>,
        path: &str,
        callback: Arc<SubscriberFn>,
        options: &SubscribeOptions,
    ) -> Subscription {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let entry = Arc::new(SubscriptionEntry {
            id,
            path: path.to_string(),
            deep: options.deep,
            created: Timestamp::now(),
            callback,
            throttle: options.throttle,
            last_fired: Mutex::new(None),
            active: AtomicBool::new(true),
        });

        self.by_path
            .write()
            .entry(path.to_string())
            .or_default()
            .push(entry.clone());

        debug!("Subscribed {} to '{}' (deep: {})", id, path, options.deep);

        Subscription {
            entry,
            registry: Arc::downgrade(self),
        }
    }

    /// Drop a subscription; the path entry goes once its list is empty
    pub fn remove(&self, path: &str, id: SubscriptionId) -> bool {
        let mut by_path = self.by_path.write();
        let Some(entries) = by_path.get_mut(path) else {
            return false;
        };

        let before = entries.len();
        entries.retain(|e| e.id != id);
        let removed = entries.len() != before;

        if entries.is_empty() {
            by_path.remove(path);
        }
        removed
    }

    /// Subscribers registered exactly at `path`
    pub fn exact(&self, path: &str) -> Vec<Arc<SubscriptionEntry>> {
        self.by_path.read().get(path).cloned().unwrap_or_default()
    }

    /// Deep subscribers registered at `path`
    pub fn deep_at(&self, path: &str) -> Vec<Arc<SubscriptionEntry>> {
        self.by_path
            .read()
            .get(path)
            .map(|entries| entries.iter().filter(|e| e.deep).cloned().collect())
            .unwrap_or_default()
    }

    pub fn wildcard(&self) -> Vec<Arc<SubscriptionEntry>> {
        self.exact(WILDCARD_PATH)
    }

    pub fn count(&self) -> usize {
        self.by_path.read().values().map(|v| v.len()).sum()
    }

    /// Watched paths, sorted
    pub fn paths(&self) -> Vec<String> {
        let mut paths: Vec<String> = self.by_path.read().keys().cloned().collect();
        paths.sort();
        paths
    }

    pub fn contains_path(&self, path: &str) -> bool {
        self.by_path.read().contains_key(path)
    }

    /// Deactivate and drop every subscription
    pub fn clear(&self) {
        let mut by_path = self.by_path.write();
        for entry in by_path.values().flatten() {
            entry.active.store(false, Ordering::Release);
        }
        by_path.clear();
    }
}

impl Default for SubscriptionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Handle returned by `subscribe`
pub struct Subscription {
    entry: Arc<SubscriptionEntry>,
    registry: Weak<SubscriptionRegistry>,
}

impl Subscription {
    pub fn id(&self) -> SubscriptionId {
        self.entry.id
    }

    pub fn path(&self) -> &str {
        &self.entry.path
    }

    pub fn is_active(&self) -> bool {
        self.entry.is_active()
    }

    /// Stop receiving notifications; repeated calls are no-ops
    pub fn unsubscribe(&self) {
        if !self.entry.active.swap(false, Ordering::AcqRel) {
            return;
        }
        if let Some(registry) = self.registry.upgrade() {
            registry.remove(&self.entry.path, self.entry.id);
            debug!("Unsubscribed {} from '{}'", self.entry.id, self.entry.path);
        }
    }

    pub(crate) fn entry(&self) -> &Arc<SubscriptionEntry> {
        &self.entry
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.entry.id)
            .field("path", &self.entry.path)
            .field("deep", &self.entry.deep)
            .field("active", &self.is_active())
            .finish()
    }
}
