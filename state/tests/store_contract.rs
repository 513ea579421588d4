//! Behavioural contract of the state store as seen by its consumers

use lexis_core::{DurableStorage, PersistedEnvelope, StateError, StoreConfig};
use lexis_state::{
    MemoryStorage, ModuleOptions, PersistTarget, RestoreOutcome, SetOptions, SledStorage,
    StateManager, StatePath, StateMutator, StateProvider, StateSnapshot, SubscribeOptions,
    TypedPath, TypedStateExt,
};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Duration;
use tempfile::TempDir;

fn counter() -> (
    Arc<AtomicUsize>,
    impl Fn(Option<&Value>, Option<&Value>, &str) -> anyhow::Result<()> + Send + Sync + 'static,
) {
    let count = Arc::new(AtomicUsize::new(0));
    let inner = count.clone();
    let callback = move |_: Option<&Value>, _: Option<&Value>, _: &str| -> anyhow::Result<()> {
        inner.fetch_add(1, Ordering::SeqCst);
        Ok(())
    };
    (count, callback)
}

fn persistent_store(storage: Arc<MemoryStorage>) -> Arc<StateManager> {
    let config = StoreConfig {
        auto_save: false,
        ..StoreConfig::default()
    };
    StateManager::new(config, Some(storage)).unwrap()
}

#[test]
fn repeated_write_commits_once() {
    let store = StateManager::in_memory();
    let (calls, callback) = counter();
    let _sub = store.subscribe("modules.navigation.isOpen", callback, SubscribeOptions::default());

    store.set("modules.navigation.isOpen", json!(true)).unwrap();
    store.set("modules.navigation.isOpen", json!(true)).unwrap();

    assert_eq!(store.history().len(), 1);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[test]
fn sibling_paths_are_isolated() {
    let store = StateManager::in_memory();
    let (calls, callback) = counter();
    let _sub = store.subscribe("a.b", callback, SubscribeOptions::default());

    store.set("a.c", json!(1)).unwrap();
    store.set("a.b.nested", json!(1)).unwrap();

    // a.b is not deep, so neither write reaches it
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[test]
fn deep_subscriber_receives_ancestor_value() {
    let store = StateManager::in_memory();
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    let _sub = store.subscribe(
        "a",
        move |new, old, path| {
            sink.lock().push((new.cloned(), old.cloned(), path.to_string()));
            Ok(())
        },
        SubscribeOptions::deep(),
    );

    store.set("a.b.c", json!(7)).unwrap();

    let seen = seen.lock();
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0], (Some(json!({"b": {"c": 7}})), None, "a.b.c".to_string()));
}

#[test]
fn wildcard_sees_every_notifying_mutation_once() {
    let store = StateManager::in_memory();
    let (calls, callback) = counter();
    let _sub = store.subscribe("*", callback, SubscribeOptions::default());

    store.set("a", json!(1)).unwrap();
    store.set("b.c", json!(2)).unwrap();
    store.set_with("b", json!({"d": 3}), SetOptions::merge()).unwrap();
    store.unset("a").unwrap();
    store.set_with("hidden", json!(true), SetOptions::silent()).unwrap();

    assert_eq!(calls.load(Ordering::SeqCst), 4);
}

#[test]
fn documented_example_first_and_second_write() {
    let store = StateManager::in_memory();
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    let _sub = store.subscribe(
        "modules.navigation.isOpen",
        move |new, old, path| {
            sink.lock().push((new.cloned(), old.cloned(), path.to_string()));
            Ok(())
        },
        SubscribeOptions::default(),
    );

    store.set("modules.navigation.isOpen", json!(true)).unwrap();
    store.set("modules.navigation.isOpen", json!(false)).unwrap();
    store.set("modules.navigation.isOpen", json!(true)).unwrap();

    assert_eq!(store.get("modules.navigation.isOpen"), Some(json!(true)));
    let seen = seen.lock();
    let path = "modules.navigation.isOpen".to_string();
    assert_eq!(seen[0], (Some(json!(true)), None, path.clone()));
    assert_eq!(seen[2], (Some(json!(true)), Some(json!(false)), path));
}

#[test]
fn immediate_fires_with_current_value() {
    let store = StateManager::in_memory();
    store.set("modules.glossary.term", json!("morpheme")).unwrap();

    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    let _sub = store.subscribe(
        "modules.glossary.term",
        move |new, old, _| {
            sink.lock().push((new.cloned(), old.cloned()));
            Ok(())
        },
        SubscribeOptions::immediate(),
    );

    assert_eq!(*seen.lock(), vec![(Some(json!("morpheme")), None)]);
}

#[test]
fn throttled_subscriber_drops_burst() {
    let store = StateManager::in_memory();
    let (calls, callback) = counter();
    let options = SubscribeOptions::default().with_throttle(Duration::from_secs(60));
    let _sub = store.subscribe("modules.audio.position", callback, options);

    for i in 0..10 {
        store.set("modules.audio.position", json!(i)).unwrap();
    }

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(store.get("modules.audio.position"), Some(json!(9)));
}

#[test]
fn failing_subscriber_does_not_block_others() {
    let store = StateManager::in_memory();
    let (calls, callback) = counter();
    let _bad = store.subscribe(
        "x",
        |_, _, _| Err(anyhow::anyhow!("render failed")),
        SubscribeOptions::default(),
    );
    let _good = store.subscribe("x", callback, SubscribeOptions::default());

    store.set("x", json!(1)).unwrap();

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(store.get("x"), Some(json!(1)));
}

#[test]
fn panicking_subscriber_does_not_block_others() {
    let storage = Arc::new(MemoryStorage::new());
    let store = StateManager::new(StoreConfig::default(), Some(storage)).unwrap();
    let (calls, callback) = counter();
    let _bad = store.subscribe("x", |_, _, _| panic!("render bug"), SubscribeOptions::default());
    let _wildcard = store.subscribe("*", callback, SubscribeOptions::default());

    store.set("x", json!(1)).unwrap();

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(store.get("x"), Some(json!(1)));
    assert!(store.get_debug_info().save_pending);
}

#[test]
fn throttled_subscriber_fires_again_after_window() {
    let store = StateManager::in_memory();
    let (calls, callback) = counter();
    let options = SubscribeOptions::default().with_throttle(Duration::from_millis(20));
    let _sub = store.subscribe("modules.audio.position", callback, options);

    store.set("modules.audio.position", json!(1)).unwrap();
    store.set("modules.audio.position", json!(2)).unwrap();
    thread::sleep(Duration::from_millis(60));
    store.set("modules.audio.position", json!(3)).unwrap();

    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[test]
fn writes_from_other_threads_do_not_count_toward_nesting() {
    let config = StoreConfig {
        max_notify_depth: 1,
        ..StoreConfig::memory_only()
    };
    let store = StateManager::new(config, None).unwrap();
    let barrier = Arc::new(Barrier::new(2));

    let gate = barrier.clone();
    let _sub = store.subscribe(
        "a",
        move |_, _, _| -> anyhow::Result<()> {
            gate.wait();
            gate.wait();
            Ok(())
        },
        SubscribeOptions::default(),
    );

    let writer = store.clone();
    let handle = thread::spawn(move || writer.set("a", json!(1)));

    // The other thread is now inside its dispatch
    barrier.wait();
    let result = store.set("b", json!(1));
    barrier.wait();

    assert!(result.is_ok());
    assert!(handle.join().unwrap().is_ok());
    assert_eq!(store.get("b"), Some(json!(1)));
}

#[test]
fn unsubscribe_during_dispatch_skips_later_callbacks() {
    let store = StateManager::in_memory();
    let (calls, callback) = counter();
    let slot: Arc<Mutex<Option<lexis_state::Subscription>>> = Arc::default();

    let target = slot.clone();
    let _first = store.subscribe(
        "x",
        move |_, _, _| {
            if let Some(sub) = target.lock().as_ref() {
                sub.unsubscribe();
            }
            Ok(())
        },
        SubscribeOptions::default(),
    );
    *slot.lock() = Some(store.subscribe("x", callback, SubscribeOptions::default()));

    store.set("x", json!(1)).unwrap();
    store.set("x", json!(2)).unwrap();

    assert_eq!(calls.load(Ordering::SeqCst), 0);
    assert_eq!(store.get_debug_info().subscription_count, 1);
}

#[test]
fn history_keeps_newest_entries() {
    let config = StoreConfig {
        max_history: 5,
        ..StoreConfig::memory_only()
    };
    let store = StateManager::new(config, None).unwrap();

    for i in 0..6 {
        store.set("counter", json!(i)).unwrap();
    }

    let history = store.history();
    assert_eq!(history.len(), 5);
    assert_eq!(history[0].new_value, Some(json!(1)));
    assert_eq!(history[0].old_value, Some(json!(0)));
    assert_eq!(history[4].new_value, Some(json!(5)));
}

#[test]
fn disabled_history_records_nothing() {
    let config = StoreConfig {
        enable_history: false,
        ..StoreConfig::memory_only()
    };
    let store = StateManager::new(config, None).unwrap();
    store.set("a", json!(1)).unwrap();

    assert!(store.history().is_empty());
}

#[test]
fn snapshot_restore_is_faithful_and_always_notifies() {
    let store = StateManager::in_memory();
    store.set("modules.navigation.isOpen", json!(true)).unwrap();
    store.set("modules.wordFreq.query", json!("the")).unwrap();

    let (calls, callback) = counter();
    let _sub = store.subscribe("*", callback, SubscribeOptions::default());

    let snapshot = store.snapshot();
    store.restore_snapshot(&snapshot).unwrap();

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(store.state(), snapshot.state);
    assert_eq!(store.history(), snapshot.history);
}

#[test]
fn snapshot_restore_respects_disabled_history() {
    let source = StateManager::in_memory();
    source.set("modules.glossary.term", json!("lemma")).unwrap();
    let snapshot = source.snapshot();
    assert_eq!(snapshot.history.len(), 1);

    let config = StoreConfig {
        enable_history: false,
        ..StoreConfig::memory_only()
    };
    let store = StateManager::new(config, None).unwrap();
    store.restore_snapshot(&snapshot).unwrap();

    assert_eq!(store.get("modules.glossary.term"), Some(json!("lemma")));
    assert!(store.history().is_empty());
}

#[test]
fn snapshot_restore_rewinds_tree_and_history() {
    let store = StateManager::in_memory();
    store.set("level", json!(1)).unwrap();
    let snapshot = store.snapshot();

    store.set("level", json!(2)).unwrap();
    store.set("extra", json!(true)).unwrap();

    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    let _sub = store.subscribe(
        "*",
        move |new, old, path| {
            sink.lock().push((new.cloned(), old.cloned(), path.to_string()));
            Ok(())
        },
        SubscribeOptions::default(),
    );

    store.restore_snapshot(&snapshot).unwrap();

    assert_eq!(store.get("level"), Some(json!(1)));
    assert_eq!(store.get("extra"), None);
    assert_eq!(store.history().len(), 1);

    let seen = seen.lock();
    assert_eq!(seen[0].0, Some(json!({"level": 1})));
    assert_eq!(seen[0].1, Some(json!({"level": 2, "extra": true})));
    assert_eq!(seen[0].2, "*");
}

#[test]
fn malformed_snapshot_is_rejected() {
    let store = StateManager::in_memory();
    store.set("keep", json!(1)).unwrap();

    let mut snapshot = store.snapshot();
    snapshot.state = json!("not a tree");

    let err = store.restore_snapshot(&snapshot).unwrap_err();
    assert!(matches!(err, StateError::MalformedSnapshot(_)));
    assert_eq!(store.get("keep"), Some(json!(1)));

    assert!(StateSnapshot::from_json("{").is_err());
}

#[test]
fn persist_and_restore_round_trip() {
    let storage = Arc::new(MemoryStorage::new());

    let store = persistent_store(storage.clone());
    store.set("modules.navigation.isOpen", json!(true)).unwrap();
    store.set("modules.glossary.recent", json!(["lemma", "affix"])).unwrap();
    store.set("cache.pages", json!({"intro": "<p>..</p>"})).unwrap();
    assert_eq!(store.persist(PersistTarget::All).unwrap(), 1);

    let fresh = persistent_store(storage);
    let (calls, callback) = counter();
    let _sub = fresh.subscribe("*", callback, SubscribeOptions::default());

    assert_eq!(fresh.restore().unwrap(), RestoreOutcome::Restored { entries: 1 });
    assert_eq!(fresh.get("modules.navigation.isOpen"), Some(json!(true)));
    assert_eq!(fresh.get("modules.glossary.recent"), Some(json!(["lemma", "affix"])));
    assert_eq!(fresh.get("cache"), None);
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[test]
fn dotted_top_level_keys_survive_round_trip() {
    let storage = Arc::new(MemoryStorage::new());
    let store = persistent_store(storage.clone());
    store.set("", json!({"v1.2": {"seen": true}, "plain": 1})).unwrap();
    store.persist(PersistTarget::All).unwrap();

    let fresh = persistent_store(storage);
    assert_eq!(fresh.restore().unwrap(), RestoreOutcome::Restored { entries: 2 });
    assert_eq!(fresh.state(), json!({"v1.2": {"seen": true}, "plain": 1}));
}

#[test]
fn persist_named_paths_only() {
    let storage = Arc::new(MemoryStorage::new());
    let store = persistent_store(storage.clone());
    store.set("modules.navigation.isOpen", json!(true)).unwrap();
    store.set("modules.navigation.width", json!(320)).unwrap();

    store
        .persist(PersistTarget::Path("modules.navigation.width".to_string()))
        .unwrap();

    let raw = storage.get_item("lexis_state").unwrap().unwrap();
    let envelope = PersistedEnvelope::from_json(&raw).unwrap();
    assert_eq!(envelope.version, "1.0.0");
    assert_eq!(envelope.data.len(), 1);

    let fresh = persistent_store(storage);
    fresh.set("modules.navigation.isOpen", json!(false)).unwrap();
    fresh.restore().unwrap();
    assert_eq!(fresh.get("modules.navigation.width"), Some(json!(320)));
    assert_eq!(fresh.get("modules.navigation.isOpen"), Some(json!(false)));
}

#[test]
fn version_mismatch_keeps_defaults() {
    let storage = Arc::new(MemoryStorage::new());
    let store = persistent_store(storage.clone());
    store.set("modules.navigation.isOpen", json!(true)).unwrap();
    store.persist(PersistTarget::All).unwrap();

    let config = StoreConfig {
        state_version: "2.0.0".to_string(),
        auto_save: false,
        ..StoreConfig::default()
    };
    let upgraded = StateManager::with_state(
        config,
        Some(storage),
        json!({"modules": {"navigation": {"isOpen": false}}}),
    )
    .unwrap();

    assert_eq!(
        upgraded.restore().unwrap(),
        RestoreOutcome::VersionMismatch {
            stored: "1.0.0".to_string()
        }
    );
    assert_eq!(upgraded.get("modules.navigation.isOpen"), Some(json!(false)));
}

#[test]
fn cleared_storage_restores_nothing() {
    let storage = Arc::new(MemoryStorage::new());
    let store = persistent_store(storage.clone());
    store.set("modules.navigation.isOpen", json!(true)).unwrap();
    store.persist(PersistTarget::All).unwrap();

    store.clear_persisted().unwrap();
    assert!(storage.is_empty());

    let fresh = persistent_store(storage);
    assert_eq!(fresh.restore().unwrap(), RestoreOutcome::NotFound);
    assert_eq!(fresh.get("modules"), None);
}

#[test]
fn corrupt_storage_falls_back_to_memory() {
    let storage = Arc::new(MemoryStorage::new());
    storage.set_item("lexis_state", "{{{").unwrap();

    let store = persistent_store(storage);
    assert_eq!(store.init(), RestoreOutcome::NotFound);

    store.set("still.works", json!(true)).unwrap();
    assert_eq!(store.get("still.works"), Some(json!(true)));
}

#[test]
fn persistence_disabled() {
    let store = StateManager::in_memory();
    assert!(matches!(
        store.persist(PersistTarget::All),
        Err(StateError::PersistenceDisabled)
    ));
    assert_eq!(store.restore().unwrap(), RestoreOutcome::Disabled);
}

#[test]
fn sled_backed_round_trip() {
    let tmp = TempDir::new().unwrap();

    {
        let storage = Arc::new(SledStorage::open(tmp.path()).unwrap());
        let store = StateManager::new(StoreConfig::default(), Some(storage)).unwrap();
        store
            .register_module(
                "wordFreq",
                json!({"manager": null, "limit": 50}),
                ModuleOptions::default(),
            )
            .unwrap();
        store.destroy();
    }

    {
        let storage = Arc::new(SledStorage::open(tmp.path()).unwrap());
        let store = StateManager::new(StoreConfig::default(), Some(storage)).unwrap();
        assert_eq!(store.init(), RestoreOutcome::Restored { entries: 1 });
        assert_eq!(store.get("modules.wordFreq.limit"), Some(json!(50)));
        assert!(store.get_module("wordFreq").is_some());
    }
}

#[test]
fn strict_paths_reject_scalar_intermediates() {
    let config = StoreConfig {
        strict_paths: true,
        ..StoreConfig::memory_only()
    };
    let store = StateManager::new(config, None).unwrap();
    store.set("a", json!(1)).unwrap();

    let err = store.set("a.b", json!(2)).unwrap_err();
    assert!(matches!(err, StateError::PathConflict { .. }));
    assert_eq!(store.get("a"), Some(json!(1)));

    // Default mode overwrites
    let lenient = StateManager::in_memory();
    lenient.set("a", json!(1)).unwrap();
    lenient.set("a.b", json!(2)).unwrap();
    assert_eq!(lenient.get("a"), Some(json!({"b": 2})));
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct NavigationState {
    is_open: bool,
    expanded: Vec<String>,
}

#[test]
fn typed_paths_round_trip() {
    let store = StateManager::in_memory();
    let nav: TypedPath<NavigationState> = StatePath::module("navigation").key("tree").typed();

    let state = NavigationState {
        is_open: true,
        expanded: vec!["unit-1".to_string()],
    };
    store.set_typed(&nav, &state).unwrap();

    assert_eq!(store.get_typed(&nav).unwrap(), Some(state));
    assert_eq!(store.get("modules.navigation.tree.is_open"), Some(json!(true)));

    let wrong: TypedPath<u32> = TypedPath::new("modules.navigation.tree");
    assert!(matches!(store.get_typed(&wrong), Err(StateError::TypeMismatch { .. })));
}

#[test]
fn returned_values_are_copies() {
    let store = StateManager::in_memory();
    store.set("list", json!([1, 2])).unwrap();

    let mut copy = store.get("list").unwrap();
    copy.as_array_mut().unwrap().push(json!(3));

    assert_eq!(store.get("list"), Some(json!([1, 2])));
}

#[tokio::test]
async fn autosave_debounces_bursts() {
    let storage = Arc::new(MemoryStorage::new());
    let config = StoreConfig {
        save_delay_ms: 25,
        ..StoreConfig::default()
    };
    let store = StateManager::new(config, Some(storage.clone())).unwrap();

    store.set("modules.wordFreq.query", json!("a")).unwrap();
    tokio::time::sleep(Duration::from_millis(5)).await;
    store.set("modules.wordFreq.query", json!("ab")).unwrap();
    assert_eq!(storage.get_item("lexis_state").unwrap(), None);

    tokio::time::sleep(Duration::from_millis(150)).await;

    let raw = storage.get_item("lexis_state").unwrap().unwrap();
    let envelope = PersistedEnvelope::from_json(&raw).unwrap();
    assert_eq!(envelope.data["modules"]["wordFreq"]["query"], json!("ab"));

    // Silent writes never schedule a save
    store.set_with("modules.wordFreq.query", json!("abc"), SetOptions::silent()).unwrap();
    assert!(!store.get_debug_info().save_pending);
}
