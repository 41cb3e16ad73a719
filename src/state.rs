//! Process-wide singleton storage (type-based, not a per-request context slot).
//!
//! This store exists for exactly one purpose: holding the handful of values constructed once at
//! startup and shared for the life of the process — the loaded config, the endpoint policy
//! tables, the response cache, the deduplicator, the circuit breaker, the upstream clients.
//! Per-request values (deadline, user identity, request id) must never go through here — they're
//! passed explicitly as a `RequestContext` through the pipeline instead, see `pipeline.rs`.
//!
//! # Examples
//!
//! ```rust
//! use altproxy::state::{set_state, get_state};
//!
//! #[derive(Clone, Debug, PartialEq)]
//! struct ExampleSingleton {
//!     label: String,
//! }
//!
//! set_state(ExampleSingleton { label: "ready".to_string() });
//! let retrieved: Option<std::sync::Arc<ExampleSingleton>> = get_state::<ExampleSingleton>();
//! assert_eq!(retrieved.as_ref().map(|c| c.label.as_str()), Some("ready"));
//! ```

use std::{
  any::{Any, TypeId},
  sync::Arc,
};

use dashmap::DashMap;
use once_cell::sync::Lazy;

/// Global state storage, keyed by the `TypeId` of the value stored.
pub(crate) static GLOBAL_STATE: Lazy<DashMap<TypeId, Arc<dyn Any + Send + Sync>>> =
  Lazy::new(DashMap::new);

/// Stores a value in the global state, keyed by its concrete type `T`.
///
/// Storing again for the same type replaces the previous value.
pub fn set_state<T: Send + Sync + 'static>(value: T) {
  GLOBAL_STATE.insert(TypeId::of::<T>(), Arc::new(value));
}

/// Retrieves a value from the global state by its concrete type `T`.
pub fn get_state<T: Send + Sync + 'static>() -> Option<Arc<T>> {
  GLOBAL_STATE
    .get(&TypeId::of::<T>())
    .map(|v| v.clone())
    .and_then(|v| v.downcast::<T>().ok())
}
