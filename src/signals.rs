//! In-process signal arbiter and dispatch system.
//!
//! This module defines a small abstraction for named signals that can be emitted and handled
//! within the proxy process. It backs the lifecycle observability hooks described in the
//! startup/shutdown design (server started/stopped, connection opened/closed) without pulling in
//! a full metrics stack.

use std::{
  collections::HashMap,
  sync::Arc,
};

use dashmap::DashMap;
use futures_util::future::{join_all, BoxFuture};
use once_cell::sync::Lazy;

/// Well-known signal identifiers for common lifecycle and request events.
pub mod ids {
  pub const SERVER_STARTED: &str = "server.started";
  pub const SERVER_STOPPED: &str = "server.stopped";
  pub const CONNECTION_OPENED: &str = "connection.opened";
  pub const CONNECTION_CLOSED: &str = "connection.closed";
  pub const REQUEST_STARTED: &str = "request.started";
  pub const REQUEST_COMPLETED: &str = "request.completed";
}

/// A signal emitted through the arbiter.
///
/// Signals are identified by an arbitrary string and can carry a map of
/// metadata. Callers are free to define their own conventions for ids and
/// fields.
#[derive(Clone, Debug, Default)]
pub struct Signal {
  /// Identifier of the signal, for example "request.started" or "metrics.tick".
  pub id: String,
  /// Optional metadata payload carried with the signal.
  pub metadata: HashMap<String, String>,
}

impl Signal {
  /// Creates a new signal with the given id and empty metadata.
  pub fn new(id: impl Into<String>) -> Self {
    Self {
      id: id.into(),
      metadata: HashMap::new(),
    }
  }

  /// Creates a new signal with initial metadata.
  pub fn with_metadata(id: impl Into<String>, metadata: HashMap<String, String>) -> Self {
    Self {
      id: id.into(),
      metadata,
    }
  }
}

/// Boxed async signal handler.
pub type SignalHandler = Arc<dyn Fn(Signal) -> BoxFuture<'static, ()> + Send + Sync>;

#[derive(Default)]
struct Inner {
  handlers: DashMap<String, Vec<SignalHandler>>,
}

/// Shared arbiter used to register and dispatch named signals.
#[derive(Clone, Default)]
pub struct SignalArbiter {
  inner: Arc<Inner>,
}

/// Global application-level signal arbiter.
static APP_SIGNAL_ARBITER: Lazy<SignalArbiter> = Lazy::new(SignalArbiter::new);

/// Returns a reference to the global application-level signal arbiter.
pub fn app_signals() -> &'static SignalArbiter {
  &APP_SIGNAL_ARBITER
}

/// Alias for using the signal arbiter as a general event bus.
pub type EventBus = SignalArbiter;

/// Returns the global application-level event bus.
pub fn app_events() -> &'static EventBus {
  app_signals()
}

impl SignalArbiter {
  /// Creates a new, empty signal arbiter.
  pub fn new() -> Self {
    Self::default()
  }

  /// Registers a handler for the given signal id.
  ///
  /// Handlers are invoked in registration order whenever a matching signal is emitted.
  pub fn on<F, Fut>(&self, id: impl Into<String>, handler: F)
  where
    F: Fn(Signal) -> Fut + Send + Sync + 'static,
    Fut: std::future::Future<Output = ()> + Send + 'static,
  {
    let id = id.into();
    let handler: SignalHandler = Arc::new(move |signal: Signal| {
      let fut = handler(signal);
      Box::pin(async move { fut.await })
    });

    self
      .inner
      .handlers
      .entry(id)
      .or_insert_with(Vec::new)
      .push(handler);
  }

  /// Emits a signal and awaits all registered handlers.
  ///
  /// Handlers run concurrently and this method resolves once all handlers have completed.
  pub async fn emit(&self, signal: Signal) {
    if let Some(entry) = self.inner.handlers.get(&signal.id) {
      let handlers = entry.clone();
      drop(entry);

      let futures = handlers.into_iter().map(|handler| {
        let s = signal.clone();
        handler(s)
      });

      let _ = join_all(futures).await;
    }
  }

  /// Emits a signal using the global application-level arbiter.
  pub async fn emit_app(signal: Signal) {
    app_signals().emit(signal).await;
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::sync::atomic::{AtomicUsize, Ordering};

  #[tokio::test]
  async fn handlers_run_on_emit() {
    let arbiter = SignalArbiter::new();
    let hits = Arc::new(AtomicUsize::new(0));
    let hits_clone = hits.clone();
    arbiter.on(ids::SERVER_STARTED, move |_signal| {
      let hits = hits_clone.clone();
      async move {
        hits.fetch_add(1, Ordering::SeqCst);
      }
    });

    arbiter.emit(Signal::new(ids::SERVER_STARTED)).await;
    assert_eq!(hits.load(Ordering::SeqCst), 1);
  }

  #[tokio::test]
  async fn unregistered_signal_is_a_noop() {
    let arbiter = SignalArbiter::new();
    arbiter.emit(Signal::new("nothing.registered")).await;
  }
}
