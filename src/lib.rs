#![cfg_attr(docsrs, feature(doc_cfg))]

//! A backend-for-frontend reverse proxy terminating HTTP/2 cleartext requests from internal
//! frontends and forwarding them to an HTTP/2-cleartext Connect-RPC backend.
//!
//! The proxy authenticates every call with a shared-secret bearer token, normalizes backend
//! failures into a stable JSON error envelope, and layers response caching, singleflight
//! deduplication, and a circuit breaker on top of the upstream connection — all configurable via
//! environment variables (see [`config`]).
//!
//! # Request lifecycle
//! - [`pipeline::dispatch`] is the single entry point: health bypass, deadline derivation,
//!   [`auth`] validation, the [`breaker`] gate, request buffering and [`fingerprint`]ing,
//!   [`cache`] probe, [`dedup`]-wrapped (or direct) forwarding through [`upstream`], and finally
//!   [`errors`] normalization of any non-2xx status or transport failure.
//! - [`policy`] classifies each RPC path as cacheable, streaming, or mutating — the pipeline
//!   consults it rather than hardcoding per-path logic.
//! - [`server`] drives the h2c accept loop and graceful shutdown; the `altproxy` binary wires a
//!   [`config::Config`] into a [`pipeline::AppState`] and runs it to completion.
//!
//! # Ambient modules
//! - [`body`] and [`responder`] standardize response construction.
//! - [`state`] is reserved for process-wide singletons, never per-request data — see
//!   [`pipeline::RequestContext`] for the latter.
//! - [`signals`] is a lightweight in-process event bus used for lifecycle observability
//!   (connection opened/closed, server started/stopped).
//! - [`tracing_setup`] configures the `tracing` subscriber from the configured log filter.
//!
//! # Feature flags
//! - `jemalloc` — use jemalloc as the global allocator

/// HS256 bearer token validation and the authenticated-caller type it produces.
pub mod auth;

/// HTTP body wrapper used for both inbound buffering and outbound streaming.
pub mod body;

/// Circuit breaker gating upstream calls.
pub mod breaker;

/// Bounded, TTL-expiring response cache.
pub mod cache;

/// Environment-driven process configuration.
pub mod config;

/// Singleflight request deduplication with deep-copy broadcast to waiters.
pub mod dedup;

/// Error normalization: backend statuses and transport failures to a stable JSON envelope.
pub mod errors;

/// Stable request fingerprinting for caching and deduplication.
pub mod fingerprint;

/// Health check bypass.
pub mod health;

/// Request pipeline orchestration: `AppState`, `RequestContext`, and `dispatch`.
pub mod pipeline;

/// Endpoint policy: which RPC paths are cacheable, streaming, or mutating.
pub mod policy;

/// Response generation utilities and the `Responder` trait.
pub mod responder;

/// HTTP/2 cleartext server loop and graceful shutdown.
pub mod server;

/// In-process signal arbiter for lifecycle observability.
pub mod signals;

/// Process-wide singleton storage, keyed by type. Never used for per-request context.
pub mod state;

/// Structured logging setup driven by the configured filter directive.
pub mod tracing_setup;

/// Core type definitions shared across the proxy pipeline.
pub mod types;

/// HTTP/2 cleartext upstream client.
pub mod upstream;

pub use config::Config;
pub use pipeline::{dispatch, AppState};
pub use server::serve;

/// Global memory allocator using jemalloc for improved performance under sustained proxy load.
#[cfg(feature = "jemalloc")]
#[cfg_attr(docsrs, doc(cfg(feature = "jemalloc")))]
#[global_allocator]
static GLOBAL: tikv_jemallocator::Jemalloc = tikv_jemallocator::Jemalloc;
