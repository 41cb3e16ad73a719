//! Proxy pipeline: composes policy, auth, cache, dedup, breaker, and the upstream client into
//! the request-handling sequence described in the design's proxy pipeline component.
//!
//! The proxy has exactly one implicit route (forward everything), so every stage runs in a
//! fixed sequence here rather than through a declarative, per-route dispatch chain.

use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode};
use http_body_util::BodyExt;
use tracing::{debug, instrument, warn};
use uuid::Uuid;

use crate::auth::{SharedTokenValidator, UserContext};
use crate::body::ProxyBody;
use crate::breaker::CircuitBreaker;
use crate::cache::{CacheEntry, ResponseCache};
use crate::config::Config;
use crate::dedup::{DedupOutcome, DedupResult, Deduplicator};
use crate::errors;
use crate::fingerprint::fingerprint;
use crate::health;
use crate::policy;
use crate::responder::Responder;
use crate::types::{Request, Response};
use crate::upstream::{self, UpstreamClient};

/// The hard ceiling on any derived deadline, regardless of what the caller asked for.
const HARD_MAX_DEADLINE: Duration = Duration::from_secs(300);

const X_CACHE: &str = "x-cache";
const CONNECT_TIMEOUT_MS_HEADER: &str = "connect-timeout-ms";

/// Process-wide singletons, constructed once at startup and shared across every request.
/// Per-request values never live here — see [`RequestContext`].
pub struct AppState {
  pub config: Arc<Config>,
  pub validator: SharedTokenValidator,
  pub cache: Arc<ResponseCache>,
  pub dedup: Arc<Deduplicator>,
  pub breaker: Arc<CircuitBreaker>,
  pub unary_client: Arc<UpstreamClient>,
  pub streaming_client: Arc<UpstreamClient>,
}

/// Per-request, explicitly-propagated context: request ID, deadline, and (once validated) the
/// caller's identity. Never stashed in `state::set_state` — passed by value through every stage.
#[derive(Clone)]
pub struct RequestContext {
  pub request_id: String,
  pub deadline: Instant,
  pub user: Option<UserContext>,
}

impl RequestContext {
  fn remaining(&self) -> Duration {
    self.deadline.saturating_duration_since(Instant::now())
  }

  fn deadline_elapsed(&self) -> bool {
    Instant::now() >= self.deadline
  }
}

/// Request data needed to build the upstream call, cloned into the dedup thunk's closure when
/// deduplication applies.
#[derive(Clone)]
struct ForwardRequest {
  method: Method,
  path_and_query: String,
  headers: HeaderMap,
  body: Bytes,
}

/// Entry point: runs the full pipeline for one inbound request and produces the response to
/// write back to the frontend.
#[instrument(skip_all, fields(request_id = tracing::field::Empty))]
pub async fn dispatch(state: Arc<AppState>, req: Request) -> Response {
  let request_id = Uuid::new_v4().to_string();
  tracing::Span::current().record("request_id", request_id.as_str());

  let path = req.uri().path().to_string();

  // Step 0: health bypass, before auth or any other component runs.
  if health::is_health_path(&path, &state.config.health_path) {
    return Response::new(ProxyBody::empty());
  }

  // Step 1: deadline derivation.
  let deadline_duration = derive_deadline(req.headers(), &path, &state.config);
  let mut ctx = RequestContext {
    request_id,
    deadline: Instant::now() + deadline_duration,
    user: None,
  };

  // Step 2: token validation.
  let user = match state.validator.authenticate(&req) {
    Ok(user) => user,
    Err(err) => {
      debug!(?err, "authentication failed");
      return auth_failure_response(&state, &ctx);
    }
  };
  ctx.user = Some(user);
  let user_id = ctx.user.as_ref().expect("just set").user_id.to_string();

  // Step 3: circuit breaker gate.
  if state.config.enable_breaker && !state.breaker.allow() {
    warn!("circuit breaker open, refusing upstream call");
    return breaker_open_response(&state, &ctx);
  }

  let method = req.method().clone();
  let is_streaming = policy::is_streaming(&path);
  let is_cacheable = !is_streaming
    && policy::is_cacheable(&path, state.config.enable_cache)
    && matches!(method, Method::GET | Method::POST);

  // Buffer the request body once; the rest of the pipeline threads it by value instead of
  // re-reading the original request — the natural shape for an owned `Bytes` in Rust, and
  // equivalent to the spec's "re-install the body on the request" instruction.
  let (parts, body) = req.into_parts();
  let body_bytes = match body.collect().await {
    Ok(collected) => collected.to_bytes(),
    Err(err) => {
      warn!(%err, "failed to read request body");
      return plain_status(StatusCode::BAD_REQUEST, "failed to read request body");
    }
  };

  let fp = fingerprint(&user_id, &path, &body_bytes);

  // Step 4 (reordered after body buffering out of necessity — a fingerprint needs the body
  // hash, see DESIGN.md): cache probe.
  if is_cacheable {
    if let Some(entry) = state.cache.get(&fp) {
      debug!(fingerprint = %fp, "cache hit");
      return cache_hit_response(entry);
    }
  }

  let forward = ForwardRequest {
    method: method.clone(),
    path_and_query: path_and_query(&parts.uri),
    headers: parts.headers,
    body: body_bytes,
  };

  // Streaming endpoints bypass dedup and cache entirely: a live body stream can't be
  // deep-copied to waiters the way `do_dedup` requires. Write the response directly.
  if is_streaming {
    let response = forward_streaming(&state, &ctx, forward).await;
    return match response {
      Ok(response) => response,
      Err(message) => transport_failure_response(&state, &ctx, message),
    };
  }

  // Steps 6-7: dedup (POST only) wraps the forward; everything else calls it directly.
  let outcome = if method == Method::POST && state.config.enable_dedup {
    let state_for_thunk = state.clone();
    let ctx_for_thunk = ctx.clone();
    state
      .dedup
      .do_dedup(&fp, move || forward_unary(state_for_thunk, ctx_for_thunk, forward))
      .await
  } else {
    forward_unary(state.clone(), ctx.clone(), forward).await
  };

  // A late dedup waiter's own deadline may already have elapsed even though the leader's thunk
  // completed — re-check before writing anything back, per the cancellation contract in §5.
  if ctx.deadline_elapsed() {
    warn!("deadline elapsed before response could be written");
    return timeout_response(&state, &ctx);
  }

  match outcome {
    Ok(result) => finish_unary_response(&state, &ctx, result, is_cacheable, &fp, &path),
    Err(message) => {
      warn!(%message, "upstream call failed");
      transport_failure_response(&state, &ctx, message)
    }
  }
}

/// Builds and sends the unary upstream call, records the breaker outcome, and returns a
/// deep-copyable [`DedupResult`] (body + headers, both owned) for the dedup layer to broadcast.
async fn forward_unary(state: Arc<AppState>, ctx: RequestContext, forward: ForwardRequest) -> DedupOutcome {
  let backend_auth_header = backend_auth_header_name(&state.config.backend_auth_header);
  let client = &state.unary_client;

  let req = client
    .build_request(
      forward.method,
      &forward.path_and_query,
      &forward.headers,
      &backend_auth_header,
      forward.body,
    )
    .map_err(|err| err.to_string())?;

  let response = match tokio::time::timeout(ctx.remaining(), client.call(req)).await {
    Ok(Ok(response)) => response,
    Ok(Err(err)) => {
      record_breaker(&state.breaker, state.config.enable_breaker, false);
      return Err(err.to_string());
    }
    Err(_) => {
      record_breaker(&state.breaker, state.config.enable_breaker, false);
      return Err("deadline exceeded waiting for upstream".to_string());
    }
  };

  let status = response.status;
  let mut headers = HeaderMap::new();
  upstream::copy_whitelisted(&response.headers, &upstream::FORWARD_RESPONSE_HEADERS, &mut headers);

  let body = response
    .body
    .collect()
    .await
    .map_err(|err| {
      record_breaker(&state.breaker, state.config.enable_breaker, false);
      err.to_string()
    })?
    .to_bytes();

  record_breaker(&state.breaker, state.config.enable_breaker, status.as_u16() < 400);

  Ok(DedupResult { status, headers, body })
}

/// Streams the upstream response straight through to the client with a per-chunk flush,
/// recording the breaker outcome from the initial status (streaming responses can't be
/// buffered to observe a final body-level failure the way unary calls can).
async fn forward_streaming(
  state: &Arc<AppState>,
  ctx: &RequestContext,
  forward: ForwardRequest,
) -> Result<Response, String> {
  let backend_auth_header = backend_auth_header_name(&state.config.backend_auth_header);
  let client = &state.streaming_client;

  let req = client
    .build_request(
      forward.method,
      &forward.path_and_query,
      &forward.headers,
      &backend_auth_header,
      forward.body,
    )
    .map_err(|err| err.to_string())?;

  let response = match tokio::time::timeout(ctx.remaining(), client.call(req)).await {
    Ok(Ok(response)) => response,
    Ok(Err(err)) => {
      record_breaker(&state.breaker, state.config.enable_breaker, false);
      return Err(err.to_string());
    }
    Err(_) => {
      record_breaker(&state.breaker, state.config.enable_breaker, false);
      return Err("deadline exceeded waiting for upstream".to_string());
    }
  };

  record_breaker(&state.breaker, state.config.enable_breaker, response.status.as_u16() < 400);

  let mut headers = HeaderMap::new();
  upstream::copy_whitelisted(&response.headers, &upstream::FORWARD_RESPONSE_HEADERS, &mut headers);
  headers.insert(X_CACHE, HeaderValue::from_static("MISS"));

  let stream = response.body.into_data_stream();
  let mut out = Response::new(ProxyBody::from_stream(stream));
  *out.status_mut() = response.status;
  *out.headers_mut() = headers;
  Ok(out)
}

fn record_breaker(breaker: &CircuitBreaker, enabled: bool, success: bool) {
  if !enabled {
    return;
  }
  if success {
    breaker.record_success();
  } else {
    breaker.record_failure();
  }
}

fn finish_unary_response(
  state: &Arc<AppState>,
  ctx: &RequestContext,
  result: DedupResult,
  is_cacheable: bool,
  fingerprint: &str,
  path: &str,
) -> Response {
  let DedupResult { status, mut headers, body } = result;

  if status.as_u16() >= 400 && state.config.enable_error_normalization {
    return errors::normalize_status(status, &headers, &ctx.request_id).into_response();
  }

  if status.is_success() && is_cacheable {
    state.cache.set(
      fingerprint.to_string(),
      CacheEntry::new(status, headers.clone(), body.clone(), policy::ttl_for(path)),
    );
  }

  headers.insert(X_CACHE, HeaderValue::from_static("MISS"));
  let mut response = Response::new(ProxyBody::new(http_body_util::Full::from(body)));
  *response.status_mut() = status;
  *response.headers_mut() = headers;
  response
}

fn cache_hit_response(entry: CacheEntry) -> Response {
  let mut headers = entry.headers.clone();
  headers.insert(X_CACHE, HeaderValue::from_static("HIT"));
  let mut response = Response::new(ProxyBody::new(http_body_util::Full::from(entry.body.clone())));
  *response.status_mut() = entry.status;
  *response.headers_mut() = headers;
  response
}

fn auth_failure_response(state: &Arc<AppState>, ctx: &RequestContext) -> Response {
  if state.config.enable_error_normalization {
    errors::normalize_status(StatusCode::UNAUTHORIZED, &HeaderMap::new(), &ctx.request_id).into_response()
  } else {
    plain_status(StatusCode::UNAUTHORIZED, "unauthorized")
  }
}

fn breaker_open_response(state: &Arc<AppState>, ctx: &RequestContext) -> Response {
  if state.config.enable_error_normalization {
    errors::breaker_open(state.breaker.remaining_open_secs(), &ctx.request_id).into_response()
  } else {
    plain_status(StatusCode::SERVICE_UNAVAILABLE, "service unavailable")
  }
}

fn transport_failure_response(state: &Arc<AppState>, ctx: &RequestContext, message: String) -> Response {
  if state.config.enable_error_normalization {
    errors::normalize_transport_error(message, &ctx.request_id).into_response()
  } else {
    plain_status(StatusCode::BAD_GATEWAY, "bad gateway")
  }
}

fn timeout_response(state: &Arc<AppState>, ctx: &RequestContext) -> Response {
  if state.config.enable_error_normalization {
    errors::normalize_transport_error("request deadline exceeded", &ctx.request_id).into_response()
  } else {
    plain_status(StatusCode::GATEWAY_TIMEOUT, "deadline exceeded")
  }
}

fn plain_status(status: StatusCode, body: &'static str) -> Response {
  (status, body).into_response()
}

fn backend_auth_header_name(configured: &str) -> HeaderName {
  HeaderName::from_bytes(configured.to_ascii_lowercase().as_bytes())
    .unwrap_or_else(|_| HeaderName::from_static("x-alt-backend-token"))
}

fn path_and_query(uri: &http::Uri) -> String {
  uri
    .path_and_query()
    .map(|pq| pq.as_str().to_string())
    .unwrap_or_else(|| uri.path().to_string())
}

/// Derives the request deadline from `Connect-Timeout-Ms`, falling back to the configured unary
/// or streaming default, and clamping to the hard 5-minute maximum. A zero, negative, or
/// non-numeric header value is ignored (defaults apply), per the boundary spec.
fn derive_deadline(headers: &HeaderMap, path: &str, config: &Config) -> Duration {
  let header_ms = headers
    .get(CONNECT_TIMEOUT_MS_HEADER)
    .and_then(|v| v.to_str().ok())
    .and_then(|raw| raw.parse::<i64>().ok())
    .filter(|ms| *ms > 0)
    .map(|ms| Duration::from_millis(ms as u64));

  let derived = header_ms.unwrap_or_else(|| {
    if policy::is_streaming(path) {
      config.streaming_timeout
    } else {
      config.unary_timeout
    }
  });

  derived.min(HARD_MAX_DEADLINE)
}

#[cfg(test)]
mod tests {
  use super::*;

  fn config() -> Config {
    Config {
      listen_port: 9200,
      backend_base_url: url::Url::parse("http://backend.internal:8080").unwrap(),
      jwt_secret: "secret".to_string(),
      jwt_issuer: "auth-hub".to_string(),
      jwt_audience: "alt-backend".to_string(),
      backend_auth_header: "X-Alt-Backend-Token".to_string(),
      unary_timeout: Duration::from_secs(30),
      streaming_timeout: Duration::from_secs(300),
      health_path: "/healthz".to_string(),
      log_filter: "info".to_string(),
      enable_cache: true,
      enable_breaker: true,
      enable_dedup: true,
      enable_error_normalization: true,
      cache_capacity: 1000,
      cache_default_ttl: Duration::from_secs(30),
      breaker_failure_threshold: 5,
      breaker_success_threshold: 2,
      breaker_open_timeout: Duration::from_secs(30),
      dedup_window: Duration::from_millis(100),
    }
  }

  #[test]
  fn timeout_header_overrides_default() {
    let cfg = config();
    let mut headers = HeaderMap::new();
    headers.insert(CONNECT_TIMEOUT_MS_HEADER, "5000".parse().unwrap());
    let d = derive_deadline(&headers, "/alt.feeds.v2.FeedService/GetFeedStats", &cfg);
    assert_eq!(d, Duration::from_millis(5000));
  }

  #[test]
  fn zero_negative_and_non_numeric_headers_are_ignored() {
    let cfg = config();
    for raw in ["0", "-5", "not-a-number"] {
      let mut headers = HeaderMap::new();
      headers.insert(CONNECT_TIMEOUT_MS_HEADER, raw.parse().unwrap());
      let d = derive_deadline(&headers, "/alt.feeds.v2.FeedService/GetFeedStats", &cfg);
      assert_eq!(d, cfg.unary_timeout);
    }
  }

  #[test]
  fn header_above_hard_max_is_clamped() {
    let cfg = config();
    let mut headers = HeaderMap::new();
    headers.insert(CONNECT_TIMEOUT_MS_HEADER, "600000".parse().unwrap());
    let d = derive_deadline(&headers, "/alt.feeds.v2.FeedService/GetFeedStats", &cfg);
    assert_eq!(d, HARD_MAX_DEADLINE);
  }

  #[test]
  fn streaming_path_defaults_to_streaming_timeout() {
    let cfg = config();
    let headers = HeaderMap::new();
    let d = derive_deadline(&headers, "/alt.feeds.v2.FeedService/StreamFeedStats", &cfg);
    assert_eq!(d, cfg.streaming_timeout);
  }

  #[test]
  fn unary_path_defaults_to_unary_timeout() {
    let cfg = config();
    let headers = HeaderMap::new();
    let d = derive_deadline(&headers, "/alt.feeds.v2.FeedService/GetFeedStats", &cfg);
    assert_eq!(d, cfg.unary_timeout);
  }

  #[test]
  fn backend_header_name_lowercases_the_configured_name() {
    let name = backend_auth_header_name("X-Alt-Backend-Token");
    assert_eq!(name.as_str(), "x-alt-backend-token");
  }

  #[test]
  fn path_and_query_preserves_query_string() {
    let uri: http::Uri = "/svc/Method?x=1".parse().unwrap();
    assert_eq!(path_and_query(&uri), "/svc/Method?x=1");
  }

  #[test]
  fn path_and_query_without_query_returns_bare_path() {
    let uri: http::Uri = "/svc/Method".parse().unwrap();
    assert_eq!(path_and_query(&uri), "/svc/Method");
  }
}
