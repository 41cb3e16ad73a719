//! HTTP body wrapper used for both inbound buffering and outbound streaming.
//!
//! `ProxyBody` wraps hyper's body system so the rest of the crate can construct responses from
//! static bytes, a stream of chunks (for streaming passthrough), or nothing at all, without
//! caring which shape the caller needs.

use std::{
  fmt::Debug,
  pin::Pin,
  task::{Context, Poll},
};

use bytes::Bytes;

use anyhow::Result;
use futures_util::{Stream, TryStream, TryStreamExt};
use http_body_util::{BodyExt, Empty, StreamBody};
use hyper::body::{Body, Frame, SizeHint};

use crate::types::{BoxBody, BoxError};

/// HTTP body wrapper with streaming and conversion support.
pub struct ProxyBody(BoxBody);

impl ProxyBody {
  /// Wraps any `Body` implementation, boxing it for uniform storage.
  pub fn new<B>(body: B) -> Self
  where
    B: Body<Data = Bytes> + Send + 'static,
    B::Error: Into<BoxError>,
  {
    Self(body.map_err(|e| e.into()).boxed_unsync())
  }

  /// Builds a body from a stream of byte-chunk results, used for streaming passthrough.
  pub fn from_stream<S, E>(stream: S) -> Self
  where
    S: Stream<Item = Result<Bytes, E>> + Send + 'static,
    E: Into<BoxError> + Debug + 'static,
  {
    let stream = stream.map_err(Into::into).map_ok(hyper::body::Frame::data);
    let body = StreamBody::new(stream).boxed_unsync();
    Self(body)
  }

  /// Builds a body from a stream of hyper frames, allowing trailers alongside data.
  pub fn from_try_stream<S, E>(stream: S) -> Self
  where
    S: TryStream<Ok = Frame<Bytes>, Error = E> + Send + 'static,
    E: Into<BoxError> + 'static,
  {
    let body = StreamBody::new(stream.map_err(Into::into)).boxed_unsync();
    Self(body)
  }

  /// An empty body — used for 204-style responses and the health endpoint.
  pub fn empty() -> Self {
    Self::new(Empty::new())
  }
}

impl Default for ProxyBody {
  fn default() -> Self {
    Self::empty()
  }
}

impl From<()> for ProxyBody {
  fn from(_: ()) -> Self {
    Self::empty()
  }
}

impl From<&str> for ProxyBody {
  fn from(buf: &str) -> Self {
    let owned = buf.to_owned();
    Self::new(http_body_util::Full::from(owned))
  }
}

macro_rules! body_from_impl {
  ($ty:ty) => {
    impl From<$ty> for ProxyBody {
      fn from(buf: $ty) -> Self {
        Self::new(http_body_util::Full::from(buf))
      }
    }
  };
}

body_from_impl!(String);
body_from_impl!(Vec<u8>);
body_from_impl!(Bytes);

impl Body for ProxyBody {
  type Data = Bytes;
  type Error = BoxError;

  #[inline]
  fn poll_frame(
    mut self: Pin<&mut Self>,
    cx: &mut Context<'_>,
  ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
    Pin::new(&mut self.0).poll_frame(cx)
  }

  #[inline]
  fn size_hint(&self) -> SizeHint {
    self.0.size_hint()
  }

  #[inline]
  fn is_end_stream(&self) -> bool {
    self.0.is_end_stream()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn empty_body_reports_end_of_stream() {
    let body = ProxyBody::empty();
    assert!(body.is_end_stream());
    assert_eq!(body.size_hint().exact(), Some(0));
  }

  #[test]
  fn default_is_empty() {
    let body = ProxyBody::default();
    assert!(body.is_end_stream());
  }
}
