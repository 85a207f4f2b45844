//! TCP server multiplexing remote callers over one shared backend.
//!
//! The server accepts connections on the configured address and spawns a
//! task for each. A connection gets its own [`ClientActor`] (and through it,
//! its own backend sub-connection); the only cross-connection state is the
//! handle table, kept so lookups by connection identity work and entries are
//! guaranteed to disappear on disconnect.
//!
//! # Protocol
//!
//! - Requests: JSON objects, one per line
//! - Replies: JSON objects, one per line, many per request
//! - Parse errors produce an error reply but don't close the connection

use std::sync::{
  Arc,
  atomic::{AtomicU64, Ordering},
};

use dashmap::DashMap;
use futures::{SinkExt, StreamExt};
use tokio::{
  net::{TcpListener, TcpStream},
  sync::mpsc,
};
use tokio_util::{
  codec::{Framed, LinesCodec},
  sync::CancellationToken,
};
use tracing::{debug, error, info, warn};

use ipc::{IpcError, Reply, Request, RequestData};

use crate::{
  backend::SearchBackend,
  client::{ClientActor, ClientHandle, SearchRequest},
};

/// Identity of one transport connection, unique while it is open.
pub type ConnectionId = u64;

/// Outbound reply channel depth per connection.
const REPLY_CHANNEL_CAPACITY: usize = 64;

#[derive(Debug, thiserror::Error)]
pub enum ServerError {
  #[error("IO error: {0}")]
  Io(#[from] std::io::Error),
  #[error("Codec error: {0}")]
  Codec(#[from] tokio_util::codec::LinesCodecError),
  #[error("Ser/de error: {0}")]
  Serde(#[from] serde_json::Error),
}

// ============================================================================
// Server
// ============================================================================

/// Configuration for the multiplexing server.
///
/// All dependencies are passed in up front; in particular the shared backend
/// is an explicitly owned collaborator, never ambient state, so tests can
/// substitute a scripted fake.
pub struct ServerConfig {
  /// Address the caller-facing listener binds to.
  pub listen_addr: String,
  /// The single shared backend session for the server's lifetime.
  pub backend: Arc<dyn SearchBackend>,
  /// Match items per `match` reply.
  pub match_batch_size: usize,
}

pub struct Server {
  config: ServerConfig,
  /// Active caller handles, keyed by connection identity.
  clients: Arc<DashMap<ConnectionId, ClientHandle>>,
  next_id: AtomicU64,
}

impl Server {
  pub fn new(config: ServerConfig) -> Self {
    Self {
      config,
      clients: Arc::new(DashMap::new()),
      next_id: AtomicU64::new(1),
    }
  }

  /// Bind the configured address and serve until cancelled.
  pub async fn run(&self, cancel: CancellationToken) -> Result<(), ServerError> {
    let listener = TcpListener::bind(&self.config.listen_addr).await?;
    info!("Server listening on {}", self.config.listen_addr);
    self.serve(listener, cancel).await
  }

  /// Serve connections from an already-bound listener until cancelled.
  pub async fn serve(&self, listener: TcpListener, cancel: CancellationToken) -> Result<(), ServerError> {
    loop {
      tokio::select! {
        biased;

        _ = cancel.cancelled() => {
          info!("Server shutting down (cancelled)");
          break;
        }

        result = listener.accept() => {
          match result {
            Ok((stream, peer)) => {
              let id = self.next_id.fetch_add(1, Ordering::Relaxed);
              debug!(id, %peer, "Connection accepted");

              let clients = Arc::clone(&self.clients);
              let backend = Arc::clone(&self.config.backend);
              let batch_size = self.config.match_batch_size;
              let cancel = cancel.child_token();

              tokio::spawn(handle_connection(stream, id, clients, backend, batch_size, cancel));
            }
            Err(e) => {
              error!("Accept error: {}", e);
            }
          }
        }
      }
    }

    Ok(())
  }

  /// Look up the caller handle for a connection identity.
  ///
  /// Fails for identities whose connection has closed.
  pub fn client(&self, id: ConnectionId) -> Option<ClientHandle> {
    self.clients.get(&id).map(|h| h.value().clone())
  }

  /// Number of currently connected callers.
  pub fn client_count(&self) -> usize {
    self.clients.len()
  }
}

// ============================================================================
// Connection handler
// ============================================================================

/// Handle one transport connection for its whole lifetime.
///
/// Creates the caller's actor (which opens its backend sub-connection
/// immediately), registers it in the handle table, and pumps requests in and
/// replies out until the socket closes. The table entry is removed when this
/// task exits, whatever the reason.
async fn handle_connection(
  stream: TcpStream,
  id: ConnectionId,
  clients: Arc<DashMap<ConnectionId, ClientHandle>>,
  backend: Arc<dyn SearchBackend>,
  batch_size: usize,
  cancel: CancellationToken,
) {
  let framed = Framed::new(stream, LinesCodec::new());
  let (mut sink, mut stream) = framed.split();

  let (reply_tx, mut reply_rx) = mpsc::channel::<Reply>(REPLY_CHANNEL_CAPACITY);
  let handle = ClientActor::spawn(backend.connect(), reply_tx, batch_size, cancel.clone());
  clients.insert(id, handle.clone());

  loop {
    tokio::select! {
      Some(reply) = reply_rx.recv() => {
        let json = match serde_json::to_string(&reply) {
          Ok(json) => json,
          Err(e) => {
            error!(id, "Failed to serialize reply: {}", e);
            continue;
          }
        };
        if let Err(e) = sink.send(json).await {
          warn!(id, "Error writing to caller: {}", e);
          break;
        }
      }

      result = stream.next() => {
        let line = match result {
          Some(Ok(line)) => line,
          Some(Err(e)) => {
            warn!(id, "Error reading from caller: {}", e);
            break;
          }
          None => {
            debug!(id, "Caller disconnected");
            break;
          }
        };

        let trimmed = line.trim();
        if trimmed.is_empty() {
          continue;
        }

        let request: Request = match serde_json::from_str(trimmed) {
          Ok(request) => request,
          Err(e) => {
            warn!(id, "Invalid request JSON: {}", e);
            let reply = Reply::error(None, IpcError::InvalidRequest(e.to_string()));
            match serde_json::to_string(&reply) {
              Ok(json) => {
                if sink.send(json).await.is_err() {
                  break;
                }
              }
              Err(e) => error!(id, "Failed to serialize error reply: {}", e),
            }
            continue;
          }
        };

        if dispatch(&handle, request).await.is_err() {
          debug!(id, "Client actor gone, closing connection");
          break;
        }
      }
    }
  }

  // Scoped cleanup: the identity must never outlive the connection.
  clients.remove(&id);
  cancel.cancel();
  debug!(id, "Connection closed, handle removed");
}

async fn dispatch(handle: &ClientHandle, request: Request) -> Result<(), crate::client::SendError> {
  match request.data {
    RequestData::Search(params) => {
      handle
        .search(SearchRequest {
          id: request.id,
          pattern: params.pattern,
          file_filter: params.file_filter,
        })
        .await
    }
    RequestData::TrySearch(params) => {
      handle
        .try_search(SearchRequest {
          id: request.id,
          pattern: params.pattern,
          file_filter: params.file_filter,
        })
        .await
    }
  }
}
