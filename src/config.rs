//! Environment-driven process configuration.
//!
//! Every knob in this struct has a default, except the backend base URL and the JWT secret
//! material, both of which must be supplied or startup fails fast (per §7: configuration errors
//! are fatal and happen before a listener binds).

use std::env;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use url::Url;

const ENV_PREFIX: &str = "ALTPROXY_";

/// Fully resolved process configuration, loaded once at startup and never mutated.
#[derive(Debug, Clone)]
pub struct Config {
  pub listen_port: u16,
  pub backend_base_url: Url,
  pub jwt_secret: String,
  pub jwt_issuer: String,
  pub jwt_audience: String,
  pub backend_auth_header: String,
  pub unary_timeout: Duration,
  pub streaming_timeout: Duration,
  pub health_path: String,
  pub log_filter: String,

  pub enable_cache: bool,
  pub enable_breaker: bool,
  pub enable_dedup: bool,
  pub enable_error_normalization: bool,

  pub cache_capacity: usize,
  pub cache_default_ttl: Duration,

  pub breaker_failure_threshold: u32,
  pub breaker_success_threshold: u32,
  pub breaker_open_timeout: Duration,

  pub dedup_window: Duration,
}

impl Config {
  /// Loads configuration from the process environment, applying defaults and validating
  /// required values. Returns an error describing exactly what's missing or malformed.
  pub fn from_env() -> Result<Self> {
    let backend_base_url_raw = require_env("BACKEND_BASE_URL")?;
    let backend_base_url = Url::parse(&backend_base_url_raw)
      .with_context(|| format!("{ENV_PREFIX}BACKEND_BASE_URL is not a valid URL: {backend_base_url_raw}"))?;

    let jwt_secret = resolve_jwt_secret()?;
    if jwt_secret.trim().is_empty() {
      bail!("{ENV_PREFIX}JWT_SECRET resolved to an empty value");
    }

    let jwt_issuer = require_env("JWT_ISSUER")?;
    let jwt_audience = require_env("JWT_AUDIENCE")?;

    Ok(Self {
      listen_port: env_u16("LISTEN_PORT", 9200)?,
      backend_base_url,
      jwt_secret,
      jwt_issuer,
      jwt_audience,
      backend_auth_header: env_string("BACKEND_AUTH_HEADER", "X-Alt-Backend-Token"),
      unary_timeout: Duration::from_secs(env_u64("UNARY_TIMEOUT_SECS", 30)?),
      streaming_timeout: Duration::from_secs(env_u64("STREAMING_TIMEOUT_SECS", 300)?),
      health_path: env_string("HEALTH_PATH", "/healthz"),
      log_filter: env_string("LOG_FILTER", "info"),

      enable_cache: env_bool("ENABLE_CACHE", true)?,
      enable_breaker: env_bool("ENABLE_BREAKER", true)?,
      enable_dedup: env_bool("ENABLE_DEDUP", true)?,
      enable_error_normalization: env_bool("ENABLE_ERROR_NORMALIZATION", true)?,

      cache_capacity: env_u64("CACHE_CAPACITY", 1000)? as usize,
      cache_default_ttl: Duration::from_secs(env_u64("CACHE_DEFAULT_TTL_SECS", 30)?),

      breaker_failure_threshold: env_u64("BREAKER_FAILURE_THRESHOLD", 5)? as u32,
      breaker_success_threshold: env_u64("BREAKER_SUCCESS_THRESHOLD", 2)? as u32,
      breaker_open_timeout: Duration::from_secs(env_u64("BREAKER_OPEN_TIMEOUT_SECS", 30)?),

      dedup_window: Duration::from_millis(env_u64("DEDUP_WINDOW_MS", 100)?),
    })
  }
}

fn var_name(key: &str) -> String {
  format!("{ENV_PREFIX}{key}")
}

fn require_env(key: &str) -> Result<String> {
  let name = var_name(key);
  env::var(&name).with_context(|| format!("missing required environment variable {name}"))
}

fn env_string(key: &str, default: &str) -> String {
  env::var(var_name(key)).unwrap_or_else(|_| default.to_string())
}

fn env_u16(key: &str, default: u16) -> Result<u16> {
  match env::var(var_name(key)) {
    Ok(raw) => raw
      .parse()
      .with_context(|| format!("{} must be a u16, got {raw:?}", var_name(key))),
    Err(_) => Ok(default),
  }
}

fn env_u64(key: &str, default: u64) -> Result<u64> {
  match env::var(var_name(key)) {
    Ok(raw) => raw
      .parse()
      .with_context(|| format!("{} must be a non-negative integer, got {raw:?}", var_name(key))),
    Err(_) => Ok(default),
  }
}

fn env_bool(key: &str, default: bool) -> Result<bool> {
  match env::var(var_name(key)) {
    Ok(raw) => match raw.to_ascii_lowercase().as_str() {
      "1" | "true" | "yes" | "on" => Ok(true),
      "0" | "false" | "no" | "off" => Ok(false),
      other => bail!("{} must be a boolean-like value, got {other:?}", var_name(key)),
    },
    Err(_) => Ok(default),
  }
}

fn resolve_jwt_secret() -> Result<String> {
  if let Ok(inline) = env::var(var_name("JWT_SECRET")) {
    return Ok(inline);
  }
  if let Ok(path) = env::var(var_name("JWT_SECRET_FILE")) {
    return std::fs::read_to_string(&path)
      .map(|s| s.trim().to_string())
      .with_context(|| format!("failed to read {} from {path}", var_name("JWT_SECRET_FILE")));
  }
  bail!(
    "one of {} or {} must be set",
    var_name("JWT_SECRET"),
    var_name("JWT_SECRET_FILE")
  )
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::sync::Mutex;

  static ENV_LOCK: Mutex<()> = Mutex::new(());

  fn clear_all() {
    for key in [
      "BACKEND_BASE_URL",
      "JWT_SECRET",
      "JWT_SECRET_FILE",
      "JWT_ISSUER",
      "JWT_AUDIENCE",
      "LISTEN_PORT",
      "CACHE_CAPACITY",
      "ENABLE_CACHE",
    ] {
      unsafe { env::remove_var(var_name(key)) };
    }
  }

  #[test]
  fn missing_backend_url_is_rejected() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_all();
    let err = Config::from_env().unwrap_err();
    assert!(err.to_string().contains("BACKEND_BASE_URL"));
  }

  #[test]
  fn defaults_apply_when_optional_vars_absent() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_all();
    unsafe {
      env::set_var(var_name("BACKEND_BASE_URL"), "http://backend.internal:8080");
      env::set_var(var_name("JWT_SECRET"), "test-secret");
      env::set_var(var_name("JWT_ISSUER"), "auth-hub");
      env::set_var(var_name("JWT_AUDIENCE"), "alt-backend");
    }

    let cfg = Config::from_env().unwrap();
    assert_eq!(cfg.listen_port, 9200);
    assert_eq!(cfg.cache_capacity, 1000);
    assert!(cfg.enable_cache);
    clear_all();
  }

  #[test]
  fn invalid_bool_is_rejected() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_all();
    unsafe {
      env::set_var(var_name("BACKEND_BASE_URL"), "http://backend.internal:8080");
      env::set_var(var_name("JWT_SECRET"), "test-secret");
      env::set_var(var_name("JWT_ISSUER"), "auth-hub");
      env::set_var(var_name("JWT_AUDIENCE"), "alt-backend");
      env::set_var(var_name("ENABLE_CACHE"), "maybe");
    }

    let err = Config::from_env().unwrap_err();
    assert!(err.to_string().contains("ENABLE_CACHE"));
    clear_all();
  }
}
