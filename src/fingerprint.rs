//! Stable request fingerprinting for caching and deduplication.
//!
//! Generalizes the idempotency plugin's Sha1-based payload signature (method + path + body) into
//! the three-input fingerprint the cache and deduplicator key on: user id, endpoint path, and a
//! hex-encoded prefix of the body's cryptographic hash.

use sha2::{Digest, Sha256};

/// Number of hash bytes rendered into the fingerprint's hex suffix.
const BODY_HASH_PREFIX_LEN: usize = 8;

/// Computes the deterministic fingerprint for `(user_id, path, body)`.
///
/// Same inputs always produce the same output; any differing input produces a different one,
/// bounded by `Sha256`'s collision resistance.
pub fn fingerprint(user_id: &str, path: &str, body: &[u8]) -> String {
  let mut hasher = Sha256::new();
  hasher.update(body);
  let digest = hasher.finalize();
  let prefix_hex = hex_encode(&digest[..BODY_HASH_PREFIX_LEN]);
  format!("{user_id}:{path}:{prefix_hex}")
}

fn hex_encode(bytes: &[u8]) -> String {
  use std::fmt::Write;
  let mut out = String::with_capacity(bytes.len() * 2);
  for byte in bytes {
    write!(out, "{byte:02x}").expect("writing to a String never fails");
  }
  out
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn deterministic_for_identical_inputs() {
    let a = fingerprint("user-1", "/svc/Method", b"{}");
    let b = fingerprint("user-1", "/svc/Method", b"{}");
    assert_eq!(a, b);
  }

  #[test]
  fn differs_when_body_differs() {
    let a = fingerprint("user-1", "/svc/Method", b"{}");
    let b = fingerprint("user-1", "/svc/Method", b"{\"x\":1}");
    assert_ne!(a, b);
  }

  #[test]
  fn differs_when_user_or_path_differs() {
    let base = fingerprint("user-1", "/svc/Method", b"{}");
    assert_ne!(base, fingerprint("user-2", "/svc/Method", b"{}"));
    assert_ne!(base, fingerprint("user-1", "/svc/Other", b"{}"));
  }
}
