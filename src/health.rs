//! Health check bypass.
//!
//! Kept deliberately tiny: the health path skips auth, caching, dedup, and the breaker entirely,
//! so it is checked first in the pipeline rather than folded into a middleware stage.

/// Returns true if `path` is the configured health check path.
pub fn is_health_path(path: &str, configured_health_path: &str) -> bool {
  path == configured_health_path
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn matches_configured_path_only() {
    assert!(is_health_path("/healthz", "/healthz"));
    assert!(!is_health_path("/healthy", "/healthz"));
    assert!(!is_health_path("/alt.feeds.v2.FeedService/GetFeedStats", "/healthz"));
  }
}
