//! Singleflight request deduplication with deep-copy broadcast to waiters.
//!
//! Generalizes the idempotency plugin's `Entry::InFlight { notify: Arc<Notify>, .. }` /
//! `store.insert_inflight` / `notify.notify_waiters()` mechanics, but drops that plugin's
//! persistent `Completed` cache slot — that's `cache.rs`'s job here, a separate component with its
//! own TTL and eviction policy. This module only coalesces concurrent in-flight callers.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry as DashEntry;
use http::HeaderMap;
use parking_lot::Mutex;
use tokio::sync::Notify;

/// The side-effectful call's successful result, cloned (deep copy) to every waiter.
#[derive(Clone, Debug)]
pub struct DedupResult {
  pub status: http::StatusCode,
  pub headers: HeaderMap,
  pub body: Bytes,
}

/// The thunk's outcome: either a deep-copyable result, or an error message shared verbatim.
pub type DedupOutcome = Result<DedupResult, String>;

struct Inflight {
  notify: Notify,
  outcome: Mutex<Option<DedupOutcome>>,
}

/// Singleflight coalescer keyed by request fingerprint.
pub struct Deduplicator {
  pending: DashMap<String, Arc<Inflight>>,
  last_used: Mutex<HashMap<String, Instant>>,
  window: Duration,
}

impl Deduplicator {
  pub fn new(window: Duration) -> Self {
    Self {
      pending: DashMap::new(),
      last_used: Mutex::new(HashMap::new()),
      window,
    }
  }

  /// Runs `thunk` exactly once per distinct `key` among concurrent callers. The first caller to
  /// observe an absent entry becomes the leader and invokes `thunk`; all others wait for its
  /// outcome and receive a deep copy.
  ///
  /// The pending entry is removed from the index *before* the outcome is broadcast, so a caller
  /// arriving in that narrow window installs a fresh entry and re-invokes `thunk` — this is
  /// accepted behavior (see DESIGN.md's Open Question log), not a bug to be papered over.
  pub async fn do_dedup<F, Fut>(&self, key: &str, thunk: F) -> DedupOutcome
  where
    F: FnOnce() -> Fut,
    Fut: std::future::Future<Output = DedupOutcome>,
  {
    self
      .last_used
      .lock()
      .insert(key.to_string(), Instant::now());

    let new_inflight = Arc::new(Inflight {
      notify: Notify::new(),
      outcome: Mutex::new(None),
    });

    let existing = match self.pending.entry(key.to_string()) {
      DashEntry::Occupied(occ) => Some(occ.get().clone()),
      DashEntry::Vacant(vac) => {
        vac.insert(new_inflight.clone());
        None
      }
    };

    match existing {
      Some(inflight) => {
        // Register interest before checking the outcome slot: Notify guarantees a
        // `notify_waiters()` call after this point is not lost, even if it fires before we
        // actually poll the future below.
        let notified = inflight.notify.notified();
        if let Some(result) = inflight.outcome.lock().clone() {
          return result;
        }
        notified.await;
        inflight
          .outcome
          .lock()
          .clone()
          .expect("outcome is set before notify_waiters fires")
      }
      None => {
        let result = thunk().await;
        *new_inflight.outcome.lock() = Some(result.clone());
        self.pending.remove(key);
        new_inflight.notify.notify_waiters();
        result
      }
    }
  }

  /// Drops housekeeping timestamps older than `2 * window`. Does not touch in-flight entries —
  /// those are removed by `do_dedup` itself once their thunk completes.
  pub fn cleanup(&self) {
    let cutoff = self.window * 2;
    let now = Instant::now();
    self
      .last_used
      .lock()
      .retain(|_, last| now.duration_since(*last) < cutoff);
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::sync::atomic::{AtomicUsize, Ordering};

  fn ok_result(body: &'static str) -> DedupOutcome {
    Ok(DedupResult {
      status: http::StatusCode::OK,
      headers: HeaderMap::new(),
      body: Bytes::from_static(body.as_bytes()),
    })
  }

  #[tokio::test]
  async fn single_caller_runs_thunk_once() {
    let dedup = Deduplicator::new(Duration::from_millis(100));
    let calls = Arc::new(AtomicUsize::new(0));
    let calls_clone = calls.clone();
    let result = dedup
      .do_dedup("k", || async move {
        calls_clone.fetch_add(1, Ordering::SeqCst);
        ok_result("hello")
      })
      .await;
    assert!(result.is_ok());
    assert_eq!(calls.load(Ordering::SeqCst), 1);
  }

  #[tokio::test]
  async fn concurrent_callers_collapse_to_one_thunk_invocation() {
    let dedup = Arc::new(Deduplicator::new(Duration::from_millis(100)));
    let calls = Arc::new(AtomicUsize::new(0));

    let mut handles = Vec::new();
    for _ in 0..8 {
      let dedup = dedup.clone();
      let calls = calls.clone();
      handles.push(tokio::spawn(async move {
        dedup
          .do_dedup("shared-key", || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(20)).await;
            ok_result("shared-body")
          })
          .await
      }));
    }

    let mut bodies = Vec::new();
    for handle in handles {
      let outcome = handle.await.unwrap().unwrap();
      bodies.push(outcome.body);
    }

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert!(bodies.iter().all(|b| b == &Bytes::from_static(b"shared-body")));
  }

  #[tokio::test]
  async fn errors_are_shared_verbatim() {
    let dedup = Arc::new(Deduplicator::new(Duration::from_millis(100)));
    let mut handles = Vec::new();
    for _ in 0..4 {
      let dedup = dedup.clone();
      handles.push(tokio::spawn(async move {
        dedup
          .do_dedup("err-key", || async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            Err::<DedupResult, String>("upstream exploded".to_string())
          })
          .await
      }));
    }

    for handle in handles {
      let outcome = handle.await.unwrap();
      assert_eq!(outcome.unwrap_err(), "upstream exploded");
    }
  }

  #[tokio::test]
  async fn cleanup_drops_old_timestamps_only() {
    let dedup = Deduplicator::new(Duration::from_millis(5));
    dedup
      .do_dedup("k", || async { ok_result("x") })
      .await
      .unwrap();
    assert!(dedup.last_used.lock().contains_key("k"));
    tokio::time::sleep(Duration::from_millis(20)).await;
    dedup.cleanup();
    assert!(!dedup.last_used.lock().contains_key("k"));
  }
}
