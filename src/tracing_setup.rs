//! Structured logging initialization.
//!
//! Generalizes the framework's fixed `LevelFilter::DEBUG` subscriber into one driven by
//! `ALTPROXY_LOG_FILTER` (an `EnvFilter` directive string, e.g. `info`, `altproxy=debug,warn`),
//! since a proxy that sits in front of production traffic can't ship with the log level baked in.

use tracing_subscriber::{EnvFilter, Layer, fmt::format::FmtSpan, layer::SubscriberExt, util::SubscriberInitExt};

/// Initializes the global tracing subscriber, honoring `ALTPROXY_LOG_FILTER` (default `info`).
pub fn init_tracing(filter_directive: &str) {
  let filter = EnvFilter::try_new(filter_directive).unwrap_or_else(|_| EnvFilter::new("info"));

  tracing_subscriber::registry()
    .with(
      tracing_subscriber::fmt::layer()
        .with_span_events(FmtSpan::CLOSE)
        .with_file(true)
        .with_line_number(true)
        .with_level(true)
        .with_filter(filter),
    )
    .init();
}
