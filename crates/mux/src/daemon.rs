//! Daemon lifecycle: wire the backend and server together, run until
//! shutdown.

use std::sync::Arc;

use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::{
  backend::{CodesearchBackend, CodesearchError},
  config::Config,
  server::{Server, ServerConfig, ServerError},
};

#[derive(Debug, thiserror::Error)]
pub enum DaemonError {
  #[error("Backend error: {0}")]
  Backend(#[from] CodesearchError),
  #[error("Server error: {0}")]
  Server(#[from] ServerError),
}

/// Daemon runtime options on top of the file config.
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
  pub config: Config,
  /// Foreground mode: log to console, shut down on ctrl-c.
  pub foreground: bool,
}

/// The grepmux daemon: one shared backend session, one multiplexing server.
pub struct Daemon {
  runtime_config: RuntimeConfig,
}

impl Daemon {
  pub fn new(runtime_config: RuntimeConfig) -> Self {
    Self { runtime_config }
  }

  /// Run until ctrl-c (blocking the current task).
  ///
  /// Launches the codesearch process, then serves callers over it. The
  /// backend session is created exactly once here and lives for the whole
  /// daemon; a backend crash is not recovered from.
  pub async fn run(self) -> Result<(), DaemonError> {
    let config = &self.runtime_config.config;

    info!("Starting grepmux daemon");
    info!("Listen: {}", config.server.listen_addr);
    info!("Repo: {} ({})", config.backend.repo, config.backend.refs.join(", "));

    let cancel = CancellationToken::new();

    let backend = Arc::new(CodesearchBackend::launch(&config.backend)?);

    let server = Server::new(ServerConfig {
      listen_addr: config.server.listen_addr.clone(),
      backend,
      match_batch_size: config.server.match_batch_size,
    });

    let cancel_for_signal = cancel.clone();
    tokio::spawn(async move {
      if let Err(e) = signal::ctrl_c().await {
        warn!("Failed to listen for ctrl-c: {}", e);
        return;
      }
      info!("Received ctrl-c, shutting down...");
      cancel_for_signal.cancel();
    });

    let result = server.run(cancel.child_token()).await;
    cancel.cancel();

    info!("Daemon shutdown complete");
    result.map_err(DaemonError::from)
  }
}
