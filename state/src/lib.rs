//! LEXIS State Management
//! 
//! A reactive, path-addressed state tree shared by every feature module of
//! the learning client. Provides change subscriptions, module scopes,
//! versioned persistence, and a bounded mutation history with snapshots.

pub mod path;
pub mod history;
pub mod subscription;
pub mod store;
pub mod module;
pub mod memory;
pub mod persistent;
pub mod persistence;
pub mod snapshot;

pub use path::{StatePath, TypedPath, TypedStateExt};
pub use history::*;
pub use subscription::{SubscribeOptions, SubscriberFn, Subscription};
pub use store::*;
pub use module::*;
pub use memory::*;
pub use persistent::*;
pub use persistence::{PersistTarget, RestoreOutcome};
pub use snapshot::*;

pub use lexis_core::{StateError, StateMutator, StateProvider, StateResult, StoreConfig};
