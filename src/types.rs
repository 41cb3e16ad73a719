//! Core type aliases shared across the proxy pipeline.
//!
//! These aliases standardize the request/response/middleware types so the rest of the crate
//! doesn't have to spell out `hyper::Request<Incoming>` or box error types by hand.

use bytes::Bytes;
use http_body_util::combinators::UnsyncBoxBody;
use hyper::body::Incoming;

use crate::body::ProxyBody;

/// Inbound HTTP request with a streaming body.
pub type Request = hyper::Request<Incoming>;

/// Outbound HTTP response using the proxy's body wrapper.
pub type Response = hyper::Response<ProxyBody>;

/// Boxed body type used internally for response composition.
pub(crate) type BoxBody = UnsyncBoxBody<Bytes, BoxError>;

/// Boxed error type for thread-safe, dynamically dispatched errors.
pub(crate) type BoxError = Box<dyn std::error::Error + Send + Sync>;
