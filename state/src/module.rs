//! Module scopes: path-prefixed views over the shared tree

use lexis_core::{StateMutator, StateProvider, StateResult, Validator};
use serde_json::Value;
use std::sync::Arc;

use crate::path::join_path;
use crate::store::{SetOptions, StateManager};
use crate::subscription::{SubscribeOptions, Subscription};

/// Options for `register_module`
#[derive(Clone, Default)]
pub struct ModuleOptions {
    /// Merge the initial state into whatever is already at the module path
    pub merge: bool,
    /// Validator for the initial state
    pub validate: Option<Validator>,
    /// Parent path, `modules` when unset
    pub namespace: Option<String>,
}

impl ModuleOptions {
    pub fn merge() -> Self {
        Self {
            merge: true,
            ..Self::default()
        }
    }

    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
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

/// Accessor bound to one module's path
///
/// Owns no state; every call goes through the parent store with the module
/// path prefixed.
#[derive(Clone)]
pub struct ModuleScope {
    manager: Arc<StateManager>,
    name: String,
    prefix: String,
}

impl ModuleScope {
    pub(crate) fn new(manager: Arc<StateManager>, name: &str, prefix: String) -> Self {
        Self {
            manager,
            name: name.to_string(),
            prefix,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// The module's own path, e.g. `modules.navigation`
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Full path of `sub_path` inside this module
    pub fn path(&self, sub_path: &str) -> String {
        join_path(&self.prefix, sub_path)
    }

    /// The whole module value
    pub fn state(&self) -> Option<Value> {
        self.manager.get(&self.prefix)
    }

    pub fn set_with(&self, sub_path: &str, value: Value, options: SetOptions) -> StateResult<bool> {
        let options = match options.source {
            Some(_) => options,
            None => options.with_source(format!("module:{}", self.name)),
        };
        self.manager.set_with(&self.path(sub_path), value, options)
    }

    pub fn subscribe<F>(
        &self,
        sub_path: &str,
        callback: F,
        options: SubscribeOptions,
    ) -> Subscription
    where
        F: Fn(Option<&Value>, Option<&Value>, &str) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.manager.subscribe(&self.path(sub_path), callback, options)
    }

    /// Remove the module from the tree; recorded history is kept
    pub fn unregister(&self) -> StateResult<()> {
        self.manager.unregister_module(&self.name, &self.prefix)
    }

    pub fn manager(&self) -> &Arc<StateManager> {
        &self.manager
    }
}

impl StateProvider for ModuleScope {
    fn get(&self, sub_path: &str) -> Option<Value> {
        self.manager.get(&self.path(sub_path))
    }
}

impl StateMutator for ModuleScope {
    fn set(&self, sub_path: &str, value: Value) -> StateResult<()> {
        self.set_with(sub_path, value, SetOptions::default()).map(|_| ())
    }

    fn unset(&self, sub_path: &str) -> StateResult<()> {
        self.manager
            .unset_with(
                &self.path(sub_path),
                SetOptions::default().with_source(format!("module:{}", self.name)),
            )
            .map(|_| ())
    }
}

impl std::fmt::Debug for ModuleScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModuleScope")
            .field("name", &self.name)
            .field("prefix", &self.prefix)
            .finish()
    }
}
