//! Endpoint policy: which RPC paths are cacheable, streaming, or mutating.
//!
//! Tables are built once at process startup from compile-time constants and never mutated
//! afterward — `once_cell::sync::Lazy` statics, the same pattern the global state store uses for
//! its backing map, just shaped for a fixed, known-in-advance set of paths instead of arbitrary
//! injected types.

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use once_cell::sync::Lazy;

/// Paths with a configured cache TTL, keyed by canonical path string.
static CACHEABLE: Lazy<HashMap<&'static str, Duration>> = Lazy::new(|| {
  HashMap::from([
    (
      "/alt.feeds.v2.FeedService/GetFeedStats",
      Duration::from_secs(30),
    ),
    (
      "/alt.feeds.v2.FeedService/ListFeeds",
      Duration::from_secs(30),
    ),
    (
      "/alt.feeds.v2.FeedService/GetFeedDetail",
      Duration::from_secs(30),
    ),
  ])
});

/// Paths whose response is a multi-chunk stream and therefore never cacheable.
static STREAMING: Lazy<HashSet<&'static str>> = Lazy::new(|| {
  HashSet::from([
    "/alt.feeds.v2.FeedService/StreamFeedStats",
    "/alt.feeds.v2.FeedService/StreamFeedUpdates",
  ])
});

/// Paths explicitly classified as state-changing, overriding any configured TTL.
static MUTATION: Lazy<HashSet<&'static str>> = Lazy::new(|| {
  HashSet::from([
    "/alt.feeds.v2.FeedService/MarkFeedRead",
    "/alt.feeds.v2.FeedService/CreateFeed",
    "/alt.feeds.v2.FeedService/DeleteFeed",
  ])
});

/// Path substrings that heuristically mark an otherwise-unlisted path as a mutation.
const MUTATION_HEURISTIC_SEGMENTS: &[&str] =
  &["/create", "/update", "/delete", "/mark", "/set", "/add", "/remove"];

/// Returns true if `path` changes server state, either by explicit table or heuristic.
pub fn is_mutation(path: &str) -> bool {
  if MUTATION.contains(path) {
    return true;
  }
  let lower = path.to_ascii_lowercase();
  MUTATION_HEURISTIC_SEGMENTS
    .iter()
    .any(|segment| lower.contains(segment))
}

/// Returns true if `path` emits a multi-chunk streaming response.
pub fn is_streaming(path: &str) -> bool {
  STREAMING.contains(path)
}

/// Returns the configured TTL for `path`, or `Duration::ZERO` if none is configured.
pub fn ttl_for(path: &str) -> Duration {
  CACHEABLE.get(path).copied().unwrap_or(Duration::ZERO)
}

/// Returns true iff `path` has a positive TTL and is neither streaming nor a mutation.
///
/// Streaming and mutation classifications override any configured TTL — a path present in both
/// `CACHEABLE` and `STREAMING`/`MUTATION` is never cacheable.
pub fn is_cacheable(path: &str, caching_enabled: bool) -> bool {
  caching_enabled && ttl_for(path) > Duration::ZERO && !is_streaming(path) && !is_mutation(path)
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn cacheable_paths_have_positive_ttl_and_no_other_classification() {
    for path in CACHEABLE.keys() {
      assert!(is_cacheable(path, true), "{path} should be cacheable");
      assert!(!is_streaming(path), "{path} should not be streaming");
      assert!(!is_mutation(path), "{path} should not be a mutation");
      assert!(ttl_for(path) > Duration::ZERO);
    }
  }

  #[test]
  fn streaming_and_mutation_paths_are_never_cacheable() {
    for path in STREAMING.iter().chain(MUTATION.iter()) {
      assert!(!is_cacheable(path, true));
    }
  }

  #[test]
  fn disabling_caching_globally_overrides_everything() {
    let any_cacheable = CACHEABLE.keys().next().unwrap();
    assert!(!is_cacheable(any_cacheable, false));
  }

  #[test]
  fn heuristic_catches_unlisted_mutation_paths() {
    assert!(is_mutation("/alt.other.v1.Thing/CreateWidget"));
    assert!(is_mutation("/alt.other.v1.Thing/update_widget"));
    assert!(!is_mutation("/alt.other.v1.Thing/GetWidget"));
  }

  #[test]
  fn unknown_path_is_not_cacheable() {
    assert!(!is_cacheable("/unknown/path", true));
    assert_eq!(ttl_for("/unknown/path"), Duration::ZERO);
  }
}
