//! Error normalization: mapping backend HTTP statuses and transport failures onto a stable JSON
//! envelope so callers never have to interpret raw Connect-RPC status codes.
//!
//! Grounded on the `Responder` trait's `impl Responder for anyhow::Error` (errors become HTTP
//! responses, not panics) and the bearer-auth extractor's per-variant status mapping, generalized
//! from "one auth failure enum" to "any backend status code".

use http::{HeaderMap, StatusCode};
use serde::Serialize;

use crate::responder::Responder;
use crate::types::Response;

/// Stable, serializable error code. Callers match on this, not on `message`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
  BadRequest,
  InvalidToken,
  AccessDenied,
  NotFound,
  RateLimitExceeded,
  InternalError,
  BackendUnavailable,
  ServiceUnavailable,
  GatewayTimeout,
  NetworkError,
  UnknownError,
}

/// The JSON envelope every error response carries, regardless of its origin.
#[derive(Debug, Clone, Serialize)]
pub struct NormalizedError {
  pub code: ErrorCode,
  pub message: String,
  pub is_retryable: bool,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub retry_after: Option<u64>,
  pub request_id: String,
  #[serde(skip)]
  pub status: StatusCode,
}

impl NormalizedError {
  fn new(
    status: StatusCode,
    code: ErrorCode,
    message: impl Into<String>,
    is_retryable: bool,
    retry_after: Option<u64>,
    request_id: impl Into<String>,
  ) -> Self {
    Self {
      code,
      message: message.into(),
      is_retryable,
      retry_after,
      request_id: request_id.into(),
      status,
    }
  }
}

/// Maps a backend HTTP response status (plus its headers, for `Retry-After`) to a normalized
/// error. Callers only invoke this for non-2xx statuses.
pub fn normalize_status(status: StatusCode, headers: &HeaderMap, request_id: &str) -> NormalizedError {
  let retry_after = headers
    .get(http::header::RETRY_AFTER)
    .and_then(|v| v.to_str().ok())
    .and_then(|v| v.parse::<u64>().ok())
    .filter(|secs| *secs > 0);

  match status {
    StatusCode::BAD_REQUEST => NormalizedError::new(
      status,
      ErrorCode::BadRequest,
      "the request was malformed",
      false,
      None,
      request_id,
    ),
    StatusCode::UNAUTHORIZED => NormalizedError::new(
      status,
      ErrorCode::InvalidToken,
      "Authentication token is invalid or expired",
      false,
      None,
      request_id,
    ),
    StatusCode::FORBIDDEN => NormalizedError::new(
      status,
      ErrorCode::AccessDenied,
      "access to this resource is denied",
      false,
      None,
      request_id,
    ),
    StatusCode::NOT_FOUND => NormalizedError::new(
      status,
      ErrorCode::NotFound,
      "the requested resource was not found",
      false,
      None,
      request_id,
    ),
    StatusCode::TOO_MANY_REQUESTS => NormalizedError::new(
      status,
      ErrorCode::RateLimitExceeded,
      "rate limit exceeded",
      true,
      Some(retry_after.unwrap_or(60)),
      request_id,
    ),
    StatusCode::INTERNAL_SERVER_ERROR => NormalizedError::new(
      status,
      ErrorCode::InternalError,
      "the backend encountered an internal error",
      true,
      Some(retry_after.unwrap_or(5)),
      request_id,
    ),
    StatusCode::BAD_GATEWAY => NormalizedError::new(
      status,
      ErrorCode::BackendUnavailable,
      "the backend is unreachable",
      true,
      Some(retry_after.unwrap_or(5)),
      request_id,
    ),
    StatusCode::SERVICE_UNAVAILABLE => NormalizedError::new(
      status,
      ErrorCode::ServiceUnavailable,
      "the service is temporarily unavailable",
      true,
      Some(retry_after.unwrap_or(10)),
      request_id,
    ),
    StatusCode::GATEWAY_TIMEOUT => NormalizedError::new(
      status,
      ErrorCode::GatewayTimeout,
      "the backend did not respond in time",
      true,
      Some(retry_after.unwrap_or(10)),
      request_id,
    ),
    other => NormalizedError::new(
      other,
      ErrorCode::UnknownError,
      format!("unexpected upstream status {other}"),
      false,
      None,
      request_id,
    ),
  }
}

/// Builds the normalized error for a transport-level failure (connection refused, handshake
/// failure, stream reset) where there is no backend status code to map from.
pub fn normalize_transport_error(message: impl Into<String>, request_id: &str) -> NormalizedError {
  NormalizedError::new(
    StatusCode::BAD_GATEWAY,
    ErrorCode::NetworkError,
    message,
    true,
    Some(5),
    request_id,
  )
}

/// Builds the `SERVICE_UNAVAILABLE` error the pipeline returns when the circuit breaker refuses a
/// call, with `retry_after` set to the breaker's remaining open timeout rather than the generic
/// status-table default.
pub fn breaker_open(retry_after_secs: u64, request_id: &str) -> NormalizedError {
  NormalizedError::new(
    StatusCode::SERVICE_UNAVAILABLE,
    ErrorCode::ServiceUnavailable,
    "the service is temporarily unavailable",
    true,
    Some(retry_after_secs),
    request_id,
  )
}

impl Responder for NormalizedError {
  fn into_response(self) -> Response {
    let status = self.status;
    let body = serde_json::to_vec(&self).unwrap_or_else(|_| b"{}".to_vec());
    let mut response = hyper::Response::new(crate::body::ProxyBody::from(body));
    *response.status_mut() = status;
    response.headers_mut().insert(
      http::header::CONTENT_TYPE,
      http::HeaderValue::from_static("application/json"),
    );
    response
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn rate_limit_honors_retry_after_header() {
    let mut headers = HeaderMap::new();
    headers.insert(http::header::RETRY_AFTER, "30".parse().unwrap());
    let err = normalize_status(StatusCode::TOO_MANY_REQUESTS, &headers, "req-1");
    assert_eq!(err.code, ErrorCode::RateLimitExceeded);
    assert_eq!(err.retry_after, Some(30));
    assert!(err.is_retryable);
  }

  #[test]
  fn rate_limit_without_header_defaults_to_sixty_seconds() {
    let err = normalize_status(StatusCode::TOO_MANY_REQUESTS, &HeaderMap::new(), "req-1");
    assert_eq!(err.retry_after, Some(60));
  }

  #[test]
  fn zero_retry_after_header_is_ignored_in_favor_of_the_default() {
    let mut headers = HeaderMap::new();
    headers.insert(http::header::RETRY_AFTER, "0".parse().unwrap());
    let err = normalize_status(StatusCode::TOO_MANY_REQUESTS, &headers, "req-1");
    assert_eq!(err.retry_after, Some(60));
  }

  #[test]
  fn unauthorized_is_non_retryable_invalid_token() {
    let err = normalize_status(StatusCode::UNAUTHORIZED, &HeaderMap::new(), "req-2");
    assert_eq!(err.code, ErrorCode::InvalidToken);
    assert!(!err.is_retryable);
    assert!(err.retry_after.is_none());
  }

  #[test]
  fn unmapped_status_becomes_unknown_error() {
    let err = normalize_status(StatusCode::IM_A_TEAPOT, &HeaderMap::new(), "req-3");
    assert_eq!(err.code, ErrorCode::UnknownError);
  }

  #[test]
  fn transport_error_is_retryable_backend_unavailable() {
    let err = normalize_transport_error("connection refused", "req-4");
    assert_eq!(err.code, ErrorCode::NetworkError);
    assert_eq!(err.status, StatusCode::BAD_GATEWAY);
    assert_eq!(err.retry_after, Some(5));
  }

  #[test]
  fn serializes_without_retry_after_when_absent() {
    let err = normalize_status(StatusCode::NOT_FOUND, &HeaderMap::new(), "req-5");
    let json = serde_json::to_string(&err).unwrap();
    assert!(!json.contains("retry_after"));
    assert!(json.contains("\"code\":\"NOT_FOUND\""));
  }
}
