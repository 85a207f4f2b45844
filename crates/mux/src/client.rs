//! Per-caller actor wrapping one backend sub-connection.
//!
//! Each transport connection gets exactly one [`ClientActor`]. The actor
//! owns the sub-connection and the pending queue for its whole lifetime, so
//! no per-caller state is ever shared across tasks: requests, readiness
//! transitions, and shutdown all interleave inside one event loop.
//!
//! Readiness handling: the actor waits for the sub-connection's single
//! `Connecting -> Ready` transition. When it fires, every request queued by
//! `search` is drained in FIFO order; if nothing was queued and no search
//! has already been started, a single `ready` notification is pushed to the
//! caller instead. Commands are polled before the readiness watch, so a
//! search that arrives in the same instant the backend becomes ready is
//! serviced first and counts as "not idle". The drain arms exactly once and
//! never re-arms on later state changes.

use std::collections::VecDeque;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use ipc::{IpcError, Reply};

use crate::{
  backend::{ReadyState, SearchEvent, SubConnection},
  batch::Batch,
};

/// One deferred or in-flight search request.
///
/// Immutable once created; consumed at most once (forwarded to the backend
/// or answered with `not_ready`).
#[derive(Debug, Clone)]
pub struct SearchRequest {
  /// Caller-chosen request id, echoed on every reply.
  pub id: u64,
  pub pattern: String,
  pub file_filter: Option<String>,
}

/// A command from the connection handler to the actor.
#[derive(Debug)]
pub enum ClientCommand {
  /// Queue until ready, then search.
  Search(SearchRequest),
  /// Fail fast with `not_ready` unless the sub-connection is ready.
  TrySearch(SearchRequest),
}

// ============================================================================
// Handle
// ============================================================================

/// Handle to communicate with a [`ClientActor`]. Cheap to clone.
#[derive(Clone, Debug)]
pub struct ClientHandle {
  tx: mpsc::Sender<ClientCommand>,
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum SendError {
  #[error("Client actor has shut down")]
  ActorGone,
}

impl ClientHandle {
  pub async fn search(&self, request: SearchRequest) -> Result<(), SendError> {
    self
      .tx
      .send(ClientCommand::Search(request))
      .await
      .map_err(|_| SendError::ActorGone)
  }

  pub async fn try_search(&self, request: SearchRequest) -> Result<(), SendError> {
    self
      .tx
      .send(ClientCommand::TrySearch(request))
      .await
      .map_err(|_| SendError::ActorGone)
  }
}

// ============================================================================
// Actor
// ============================================================================

/// Per-caller state: one sub-connection, one pending queue, one reply sink.
pub struct ClientActor {
  conn: SubConnection,
  pending: VecDeque<SearchRequest>,
  replies: mpsc::Sender<Reply>,
  batch_size: usize,
  /// Whether any search has been started or queued. Gates the idle `ready`
  /// notification: readiness is only "idle" if no search beat it.
  saw_search: bool,
}

impl ClientActor {
  /// Spawn the actor and return its handle.
  ///
  /// `replies` is the connection's outbound sink; every reply this caller
  /// ever sees flows through it. `cancel` tears the actor down when the
  /// transport connection goes away.
  pub fn spawn(
    conn: SubConnection,
    replies: mpsc::Sender<Reply>,
    batch_size: usize,
    cancel: CancellationToken,
  ) -> ClientHandle {
    let (tx, rx) = mpsc::channel(64);
    let actor = Self {
      conn,
      pending: VecDeque::new(),
      replies,
      batch_size,
      saw_search: false,
    };
    tokio::spawn(actor.run(rx, cancel));
    ClientHandle { tx }
  }

  async fn run(mut self, mut commands: mpsc::Receiver<ClientCommand>, cancel: CancellationToken) {
    let mut readiness = self.conn.readiness();
    // The queue drain fires on the first transition out of Connecting and
    // never again.
    let mut armed = self.conn.ready_state() == ReadyState::Connecting;

    if !armed && self.conn.ready_state() == ReadyState::Ready {
      // Sub-connection was ready before the actor started; nothing can be
      // queued yet, so this is the idle-readiness case.
      let _ = self.replies.send(Reply::ready()).await;
    }

    loop {
      tokio::select! {
        biased;

        _ = cancel.cancelled() => {
          debug!("client actor cancelled");
          break;
        }

        command = commands.recv() => {
          let Some(command) = command else {
            debug!("client actor channel closed");
            break;
          };
          self.on_command(command).await;
        }

        changed = readiness.changed(), if armed => {
          if changed.is_err() {
            // Driver gone without a transition; treat as closed.
            armed = false;
            continue;
          }
          // Copy the state out: the watch read guard must not be held
          // across an await, and on_ready can block on the reply channel.
          let state = *readiness.borrow();
          match state {
            ReadyState::Ready => {
              armed = false;
              self.on_ready().await;
            }
            ReadyState::Closed => {
              // Never became ready. Queued requests stay abandoned; the
              // fail-fast path keeps answering not_ready via ready_state().
              armed = false;
            }
            ReadyState::Connecting => {}
          }
        }
      }
    }
  }

  /// Single readiness transition: drain the entire pending queue in order,
  /// or signal idleness if nothing was ever waiting. A search that was
  /// already started directly (state flipped before the watch woke us) means
  /// the caller is not idle, so no notification is sent.
  async fn on_ready(&mut self) {
    if self.pending.is_empty() {
      if !self.saw_search {
        trace!("sub-connection ready, queue empty");
        let _ = self.replies.send(Reply::ready()).await;
      }
      return;
    }

    debug!(queued = self.pending.len(), "sub-connection ready, draining queue");
    while let Some(request) = self.pending.pop_front() {
      self.start_search(request);
    }
  }

  async fn on_command(&mut self, command: ClientCommand) {
    let ready = self.conn.ready_state() == ReadyState::Ready;
    match command {
      ClientCommand::Search(request) => {
        self.saw_search = true;
        if ready {
          self.start_search(request);
        } else {
          trace!(id = request.id, "queueing search until ready");
          self.pending.push_back(request);
        }
      }
      ClientCommand::TrySearch(request) => {
        if ready {
          self.start_search(request);
        } else {
          trace!(id = request.id, "rejecting try_search, backend not ready");
          let _ = self.replies.send(Reply::not_ready(request.id)).await;
        }
      }
    }
  }

  /// Open a raw event stream for one request and spawn its relay. Each
  /// search gets its own stream and its own batch; concurrent searches from
  /// the same caller do not share ordering.
  fn start_search(&self, request: SearchRequest) {
    trace!(id = request.id, pattern = %request.pattern, "starting backend search");
    let events = self.conn.search(&request.pattern, request.file_filter.as_deref());
    tokio::spawn(relay(request.id, events, self.replies.clone(), self.batch_size));
  }
}

// ============================================================================
// Relay
// ============================================================================

/// Forward one search's raw events to the caller, batching matches.
///
/// The batch is flushed before `done` is forwarded, so the terminal reply
/// always follows every match group. An `error` is forwarded verbatim and
/// ends the relay; buffered matches past the last full batch are dropped
/// with it, matching the backend's "stream is terminated" contract.
async fn relay(id: u64, mut events: mpsc::Receiver<SearchEvent>, replies: mpsc::Sender<Reply>, batch_size: usize) {
  let mut batch = Batch::new(batch_size);

  while let Some(event) = events.recv().await {
    match event {
      SearchEvent::Match(item) => {
        if let Some(group) = batch.send(item)
          && replies.send(Reply::matches(id, group)).await.is_err()
        {
          return;
        }
      }
      SearchEvent::Error(details) => {
        let _ = replies.send(Reply::error(id, IpcError::Backend(details))).await;
        return;
      }
      SearchEvent::Done(stats) => {
        if let Some(group) = batch.flush()
          && replies.send(Reply::matches(id, group)).await.is_err()
        {
          return;
        }
        let _ = replies.send(Reply::done(id, stats)).await;
        return;
      }
    }
  }

  // Stream ended without a terminal event: the sub-connection died mid
  // search. The caller is abandoned rather than lied to with a done.
  debug!(id, "search stream ended without terminal event");
}
