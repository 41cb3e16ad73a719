use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use altproxy::auth::TokenValidator;
use altproxy::breaker::CircuitBreaker;
use altproxy::cache::ResponseCache;
use altproxy::config::Config;
use altproxy::dedup::Deduplicator;
use altproxy::pipeline::AppState;
use altproxy::upstream::UpstreamClient;
use http::HeaderName;
use tokio::net::TcpListener;
use tracing::{error, info};

#[tokio::main]
async fn main() -> ExitCode {
  let config = match Config::from_env() {
    Ok(config) => config,
    Err(err) => {
      eprintln!("configuration error: {err:#}");
      return ExitCode::FAILURE;
    }
  };

  altproxy::tracing_setup::init_tracing(&config.log_filter);

  match run(config).await {
    Ok(()) => ExitCode::SUCCESS,
    Err(err) => {
      error!(%err, "fatal startup or runtime error");
      ExitCode::FAILURE
    }
  }
}

async fn run(config: Config) -> anyhow::Result<()> {
  let config = Arc::new(config);

  let header_name = HeaderName::from_bytes(config.backend_auth_header.to_ascii_lowercase().as_bytes())
    .map_err(|_| anyhow::anyhow!("invalid ALTPROXY_BACKEND_AUTH_HEADER value"))?;
  let validator = Arc::new(TokenValidator::new(
    config.jwt_secret.as_bytes(),
    config.jwt_issuer.clone(),
    config.jwt_audience.clone(),
    header_name,
  ));

  let cache = Arc::new(ResponseCache::new(config.cache_capacity));
  let dedup = Arc::new(Deduplicator::new(config.dedup_window));
  let breaker = Arc::new(CircuitBreaker::new(
    config.breaker_failure_threshold,
    config.breaker_success_threshold,
    config.breaker_open_timeout,
  ));

  let unary_client = UpstreamClient::connect(&config.backend_base_url, None).await?;
  let streaming_client =
    UpstreamClient::connect(&config.backend_base_url, Some(config.streaming_timeout)).await?;

  let state = Arc::new(AppState {
    config: config.clone(),
    validator,
    cache,
    dedup,
    breaker,
    unary_client,
    streaming_client,
  });

  spawn_dedup_janitor(state.dedup.clone());

  let listener = TcpListener::bind(("0.0.0.0", config.listen_port)).await?;
  info!(port = config.listen_port, "altproxy starting");

  altproxy::server::serve(listener, state, shutdown_signal()).await?;
  Ok(())
}

/// Periodically drops the deduplicator's housekeeping timestamps for keys that have gone quiet.
fn spawn_dedup_janitor(dedup: Arc<Deduplicator>) {
  tokio::spawn(async move {
    let mut interval = tokio::time::interval(Duration::from_secs(30));
    loop {
      interval.tick().await;
      dedup.cleanup();
    }
  });
}

/// Resolves once SIGINT or SIGTERM is received, triggering graceful shutdown.
async fn shutdown_signal() {
  #[cfg(unix)]
  {
    use tokio::signal::unix::{signal, SignalKind};
    let mut sigterm = signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");
    let mut sigint = signal(SignalKind::interrupt()).expect("failed to install SIGINT handler");
    tokio::select! {
      _ = sigterm.recv() => {}
      _ = sigint.recv() => {}
    }
  }

  #[cfg(not(unix))]
  {
    let _ = tokio::signal::ctrl_c().await;
  }
}
