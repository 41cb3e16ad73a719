//! HTTP/2-cleartext (h2c) upstream client.
//!
//! Generalizes `client.rs`'s `TakoClient`/`TakoTlsClient` connection-management shape
//! (`SendRequest` handle plus a background `JoinHandle` driving the connection) from HTTP/1.1
//! to HTTP/2 prior-knowledge cleartext, the same `client::conn::http2`/`TokioExecutor` builder
//! `server_tls.rs` demonstrates for its ALPN `h2` branch, used here with no TLS/ALPN negotiation
//! at all. Two instances of this type exist per process: one for unary calls (no built-in
//! timeout — the caller's deadline is the only bound) and one for streaming calls (a wall-clock
//! timeout baked into the client itself, per the resilience envelope's streaming story).

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use http::{HeaderMap, HeaderName, HeaderValue, Request as HttpRequest, StatusCode, Uri};
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::client::conn::http2::{self, SendRequest};
use hyper_util::rt::{TokioExecutor, TokioIo};
use once_cell::sync::Lazy;
use parking_lot::RwLock;
use tokio::net::TcpStream;
use tracing::{error, warn};
use url::Url;

use crate::types::BoxError;

/// Headers forwarded from the inbound request to the upstream call, verbatim. Built as an
/// explicit allow-list rather than copied by iterating the source headers, so nothing — in
/// particular `Accept-Encoding` or cookies — slips through by accident.
pub static FORWARD_REQUEST_HEADERS: Lazy<Vec<HeaderName>> = Lazy::new(|| {
  vec![
    http::header::CONTENT_TYPE,
    http::header::ACCEPT,
    HeaderName::from_static("connect-protocol-version"),
    HeaderName::from_static("connect-timeout-ms"),
    HeaderName::from_static("grpc-timeout"),
    HeaderName::from_static("x-service-token"),
  ]
});

/// Headers copied back from the upstream response to the client response, verbatim.
pub static FORWARD_RESPONSE_HEADERS: Lazy<Vec<HeaderName>> = Lazy::new(|| {
  vec![
    http::header::CONTENT_TYPE,
    HeaderName::from_static("grpc-status"),
    HeaderName::from_static("grpc-message"),
    HeaderName::from_static("connect-content-encoding"),
    HeaderName::from_static("connect-accept-encoding"),
    http::header::TRAILER,
  ]
});

/// Copies the whitelisted subset of `from` into `into`, skipping anything absent.
pub fn copy_whitelisted(from: &HeaderMap, whitelist: &[HeaderName], into: &mut HeaderMap) {
  for name in whitelist {
    if let Some(value) = from.get(name) {
      into.insert(name.clone(), value.clone());
    }
  }
}

/// A transport-level failure: connection refused, DNS failure, handshake failure, or the h2
/// connection going away mid-call. Never carries an HTTP status — that's `normalize_status`'s
/// job once a response is actually received.
#[derive(Debug)]
pub struct UpstreamError(pub String);

impl fmt::Display for UpstreamError {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "upstream transport error: {}", self.0)
  }
}

impl std::error::Error for UpstreamError {}

impl From<BoxError> for UpstreamError {
  fn from(err: BoxError) -> Self {
    UpstreamError(err.to_string())
  }
}

impl From<hyper::Error> for UpstreamError {
  fn from(err: hyper::Error) -> Self {
    UpstreamError(err.to_string())
  }
}

/// A received upstream response, split into its parts so the pipeline can decide whether to
/// buffer it (unary, for caching) or stream it straight through (streaming endpoints).
pub struct UpstreamResponse {
  pub status: StatusCode,
  pub headers: HeaderMap,
  pub body: Incoming,
}

/// Shared HTTP/2 cleartext client. One long-lived connection, reconnected with backoff if the
/// background driver task observes it go away; `SendRequest` is cheaply `Clone`, so the current
/// handle is swapped under a `parking_lot::RwLock` rather than needing `arc-swap` for a single
/// `Arc`-sized value.
pub struct UpstreamClient {
  authority: String,
  scheme_is_https: bool,
  sender: RwLock<SendRequest<Full<Bytes>>>,
  call_timeout: Option<Duration>,
}

impl UpstreamClient {
  /// Establishes the initial connection eagerly and spawns the background driver/reconnect
  /// loop. `call_timeout` is `None` for the unary client (timeout=0, deadline flows from the
  /// caller's request context) and `Some(streaming_timeout)` for the streaming client.
  pub async fn connect(base_url: &Url, call_timeout: Option<Duration>) -> anyhow::Result<Arc<Self>> {
    let authority = authority_of(base_url)?;
    let scheme_is_https = base_url.scheme() == "https";
    let sender = handshake(&authority).await?;

    let client = Arc::new(Self {
      authority,
      scheme_is_https,
      sender: RwLock::new(sender),
      call_timeout,
    });

    spawn_reconnect_loop(client.clone());
    Ok(client)
  }

  /// Sends `req` and returns the response's parts without consuming the body, so the caller can
  /// choose to buffer it (unary/cacheable) or stream it onward (streaming endpoints).
  pub async fn call(&self, req: HttpRequest<Full<Bytes>>) -> Result<UpstreamResponse, UpstreamError> {
    let mut sender = self.sender.read().clone();
    let send = sender.send_request(req);

    let result = match self.call_timeout {
      Some(timeout) => tokio::time::timeout(timeout, send)
        .await
        .map_err(|_| UpstreamError("streaming call exceeded its wall-clock timeout".to_string()))?,
      None => send.await,
    };

    let response = result.map_err(UpstreamError::from)?;
    let (parts, body) = response.into_parts();
    Ok(UpstreamResponse {
      status: parts.status,
      headers: parts.headers,
      body,
    })
  }

  /// Builds the outbound request: whitelisted headers, the backend-auth header re-forwarded
  /// under its configured name, and the upstream-prefixed path.
  pub fn build_request(
    &self,
    method: http::Method,
    path_and_query: &str,
    inbound_headers: &HeaderMap,
    backend_auth_header: &HeaderName,
    body: Bytes,
  ) -> Result<HttpRequest<Full<Bytes>>, UpstreamError> {
    let uri: Uri = format!(
      "{}://{}{}",
      if self.scheme_is_https { "https" } else { "http" },
      self.authority,
      path_and_query
    )
    .parse()
    .map_err(|e: http::uri::InvalidUri| UpstreamError(e.to_string()))?;

    let mut builder = HttpRequest::builder().method(method).uri(uri);
    {
      let headers = builder.headers_mut().expect("builder has no error yet");
      copy_whitelisted(inbound_headers, &FORWARD_REQUEST_HEADERS, headers);
      if let Some(token) = inbound_headers.get(backend_auth_header) {
        headers.insert(backend_auth_header.clone(), token.clone());
      }
    }

    builder
      .body(Full::new(body))
      .map_err(|e| UpstreamError(e.to_string()))
  }
}

async fn handshake(authority: &str) -> anyhow::Result<SendRequest<Full<Bytes>>> {
  let stream = TcpStream::connect(authority).await?;
  let io = TokioIo::new(stream);
  let (sender, conn) = http2::Builder::new(TokioExecutor::new())
    .handshake(io)
    .await?;

  tokio::spawn(async move {
    if let Err(err) = conn.await {
      error!(%err, "upstream h2c connection driver exited");
    }
  });

  Ok(sender)
}

fn authority_of(base_url: &Url) -> anyhow::Result<String> {
  let host = base_url
    .host_str()
    .ok_or_else(|| anyhow::anyhow!("backend base URL has no host"))?;
  let port = base_url
    .port_or_known_default()
    .ok_or_else(|| anyhow::anyhow!("backend base URL has no resolvable port"))?;
  Ok(format!("{host}:{port}"))
}

/// Reconnects with capped exponential backoff whenever the shared `SendRequest` handle stops
/// accepting new streams (observed via `SendRequest::ready`'s failure, not via the connection
/// driver task exiting, since a request is needed to notice a half-closed h2 session promptly).
fn spawn_reconnect_loop(client: Arc<UpstreamClient>) {
  tokio::spawn(async move {
    let mut backoff = Duration::from_millis(100);
    const MAX_BACKOFF: Duration = Duration::from_secs(10);

    loop {
      let mut sender = client.sender.read().clone();
      if std::future::poll_fn(|cx| sender.poll_ready(cx)).await.is_ok() {
        tokio::time::sleep(Duration::from_millis(500)).await;
        backoff = Duration::from_millis(100);
        continue;
      }

      warn!(authority = %client.authority, "upstream h2c connection unready, reconnecting");
      match handshake(&client.authority).await {
        Ok(new_sender) => {
          *client.sender.write() = new_sender;
          backoff = Duration::from_millis(100);
        }
        Err(err) => {
          error!(%err, authority = %client.authority, "upstream reconnect attempt failed");
          tokio::time::sleep(backoff).await;
          backoff = (backoff * 2).min(MAX_BACKOFF);
        }
      }
    }
  });
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn request_whitelist_excludes_accept_encoding() {
    assert!(!FORWARD_REQUEST_HEADERS.iter().any(|h| h == http::header::ACCEPT_ENCODING));
  }

  #[test]
  fn copy_whitelisted_only_copies_listed_headers() {
    let mut from = HeaderMap::new();
    from.insert(http::header::CONTENT_TYPE, HeaderValue::from_static("application/json"));
    from.insert(http::header::ACCEPT_ENCODING, HeaderValue::from_static("gzip"));

    let mut into = HeaderMap::new();
    copy_whitelisted(&from, &FORWARD_REQUEST_HEADERS, &mut into);

    assert!(into.contains_key(http::header::CONTENT_TYPE));
    assert!(!into.contains_key(http::header::ACCEPT_ENCODING));
  }

  #[test]
  fn response_whitelist_carries_grpc_status_fields() {
    assert!(FORWARD_RESPONSE_HEADERS.iter().any(|h| h.as_str() == "grpc-status"));
    assert!(FORWARD_RESPONSE_HEADERS.iter().any(|h| h.as_str() == "grpc-message"));
  }
}
