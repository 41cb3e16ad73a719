//! Conversion of handler return values into HTTP responses.
//!
//! The pipeline's stages often want to return a plain string, a status-code-plus-body tuple, or
//! a fully built response. `Responder` gives all of those a single `into_response` conversion so
//! call sites don't have to match on each shape themselves.

use std::{convert::Infallible, fmt::Display};

use bytes::Bytes;
use http::{HeaderName, HeaderValue, Response, StatusCode};
use http_body_util::Full;

use crate::body::ProxyBody;

/// Trait for converting types into HTTP responses.
pub trait Responder {
  fn into_response(self) -> Response<ProxyBody>;
}

impl Responder for Response<ProxyBody> {
  fn into_response(self) -> Response<ProxyBody> {
    self
  }
}

impl Responder for &'static str {
  fn into_response(self) -> Response<ProxyBody> {
    Response::new(ProxyBody::new(Full::from(Bytes::from_static(
      self.as_bytes(),
    ))))
  }
}

impl Responder for String {
  fn into_response(self) -> Response<ProxyBody> {
    Response::new(ProxyBody::new(Full::from(Bytes::from(self))))
  }
}

impl Responder for () {
  fn into_response(self) -> Response<ProxyBody> {
    Response::new(ProxyBody::empty())
  }
}

impl Responder for Infallible {
  fn into_response(self) -> Response<ProxyBody> {
    match self {}
  }
}

/// Static header name/value pairs, for responses that only need a handful of fixed headers.
pub struct StaticHeaders<const N: usize>(pub [(HeaderName, &'static str); N]);

impl<const N: usize> Responder for (StatusCode, StaticHeaders<N>) {
  fn into_response(self) -> Response<ProxyBody> {
    let (status, StaticHeaders(headers)) = self;
    let mut res = Response::new(ProxyBody::empty());
    *res.status_mut() = status;

    for (name, value) in headers {
      res
        .headers_mut()
        .append(name, HeaderValue::from_static(value));
    }
    res
  }
}

impl<R> Responder for (StatusCode, R)
where
  R: Display,
{
  fn into_response(self) -> Response<ProxyBody> {
    let (status, body) = self;
    let mut res = Response::new(ProxyBody::new(Full::from(Bytes::from(body.to_string()))));
    *res.status_mut() = status;
    res
  }
}

impl Responder for ProxyBody {
  fn into_response(self) -> Response<ProxyBody> {
    Response::new(self)
  }
}

impl Responder for anyhow::Error {
  fn into_response(self) -> Response<ProxyBody> {
    (StatusCode::BAD_REQUEST, self.to_string()).into_response()
  }
}
