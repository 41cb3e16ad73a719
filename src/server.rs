//! HTTP/2 cleartext server loop and lifecycle management.
//!
//! Generalizes the original HTTP/1.1 accept loop (connection per task, `http1::Builder`,
//! `.with_upgrades()`) to prior-knowledge h2c: no ALPN negotiation, every connection served
//! directly with `hyper::server::conn::http2`'s builder (the same one the ALPN `h2` branch of
//! the TLS server variant uses, minus the TLS handshake in front of it). Graceful shutdown is
//! layered on with `hyper_util::server::graceful::GracefulShutdown`, tracked against the
//! frontend's own signal arbiter so other components can observe
//! `SERVER_STARTED`/`SERVER_STOPPED`.

use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use hyper::server::conn::http2;
use hyper::service::service_fn;
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::graceful::GracefulShutdown;
use tokio::net::TcpListener;
use tracing::{error, info, warn};

use crate::pipeline::{self, AppState};
use crate::signals::{self, ids, Signal};
use crate::types::{BoxError, Request};

/// How long a graceful shutdown waits for in-flight connections before giving up and dropping
/// them anyway.
const SHUTDOWN_GRACE_PERIOD: Duration = Duration::from_secs(20);

/// Runs the h2c accept loop until `shutdown` resolves, then drains in-flight connections for up
/// to [`SHUTDOWN_GRACE_PERIOD`] before returning.
pub async fn serve(
  listener: TcpListener,
  state: Arc<AppState>,
  shutdown: impl std::future::Future<Output = ()>,
) -> Result<(), BoxError> {
  let local_addr = listener.local_addr()?;
  info!(%local_addr, "listening");
  signals::app_signals().emit(Signal::new(ids::SERVER_STARTED)).await;

  let graceful = GracefulShutdown::new();
  tokio::pin!(shutdown);

  loop {
    tokio::select! {
      accepted = listener.accept() => {
        let (stream, peer_addr) = match accepted {
          Ok(pair) => pair,
          Err(err) => {
            warn!(%err, "failed to accept connection");
            continue;
          }
        };

        let io = TokioIo::new(stream);
        let state = state.clone();
        let svc = service_fn(move |req: Request| {
          let state = state.clone();
          async move { Ok::<_, Infallible>(pipeline::dispatch(state, req).await) }
        });

        let conn = http2::Builder::new(TokioExecutor::new()).serve_connection(io, svc);
        let conn = graceful.watch(conn);

        signals::app_signals()
          .emit(Signal::new(ids::CONNECTION_OPENED))
          .await;
        tokio::spawn(async move {
          if let Err(err) = conn.await {
            error!(%err, %peer_addr, "connection error");
          }
          signals::app_signals()
            .emit(Signal::new(ids::CONNECTION_CLOSED))
            .await;
        });
      }
      _ = &mut shutdown => {
        info!("shutdown signal received, draining connections");
        break;
      }
    }
  }

  signals::app_signals().emit(Signal::new(ids::SERVER_STOPPED)).await;

  tokio::select! {
    _ = graceful.shutdown() => {
      info!("all connections drained");
    }
    _ = tokio::time::sleep(SHUTDOWN_GRACE_PERIOD) => {
      warn!("graceful shutdown grace period elapsed, dropping remaining connections");
    }
  }

  Ok(())
}
