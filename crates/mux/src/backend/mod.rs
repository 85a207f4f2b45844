//! Abstraction over the shared codesearch backend.
//!
//! The server owns exactly one [`SearchBackend`] for its whole lifetime and
//! only ever asks it for new sub-connections; caller activity never mutates
//! the backend itself. A [`SubConnection`] is channel-driven so that the
//! process-backed implementation and the test fake are built the same way:
//! a driving task publishes readiness through a `watch` channel and services
//! search jobs from an `mpsc` queue.

use tokio::sync::{mpsc, watch};

pub use ipc::{MatchItem, SearchStats};

mod process;
pub use process::{CodesearchBackend, CodesearchError};

/// Capacity of the raw event channel between a backend driver and a relay.
const EVENT_CHANNEL_CAPACITY: usize = 256;

// ============================================================================
// Backend capability
// ============================================================================

/// A connection to the shared search backend that can open per-caller
/// sub-connections.
pub trait SearchBackend: Send + Sync + 'static {
  /// Open a new sub-connection. Returns immediately; the sub-connection
  /// starts in [`ReadyState::Connecting`] and transitions asynchronously.
  fn connect(&self) -> SubConnection;
}

/// Readiness lifecycle of a sub-connection.
///
/// Transitions are `Connecting -> Ready -> Closed`; there is no way back
/// from `Closed` and no `Ready -> Connecting` transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadyState {
  Connecting,
  Ready,
  Closed,
}

/// One raw event from a backend search stream.
///
/// `Match` repeats; `Error` is terminal and occurs at most once; `Done` is
/// terminal and occurs exactly once on success.
#[derive(Debug, Clone)]
pub enum SearchEvent {
  Match(MatchItem),
  Error(String),
  Done(SearchStats),
}

/// A search handed to the sub-connection's driving task.
#[derive(Debug)]
pub struct SearchJob {
  pub pattern: String,
  pub file_filter: Option<String>,
  /// Sink for the raw event stream of this search.
  pub events: mpsc::Sender<SearchEvent>,
}

// ============================================================================
// Sub-connection
// ============================================================================

/// A per-caller connection to the shared backend.
///
/// Owned exclusively by one caller actor for its entire lifetime. The actual
/// I/O happens in the driving task behind the channels; dropping the
/// sub-connection lets that task wind down on its own.
#[derive(Debug)]
pub struct SubConnection {
  state: watch::Receiver<ReadyState>,
  jobs: mpsc::UnboundedSender<SearchJob>,
}

impl SubConnection {
  /// Wire up a sub-connection from its driving task's channels.
  pub fn new(state: watch::Receiver<ReadyState>, jobs: mpsc::UnboundedSender<SearchJob>) -> Self {
    Self { state, jobs }
  }

  /// Current readiness state.
  pub fn ready_state(&self) -> ReadyState {
    *self.state.borrow()
  }

  /// A watcher for readiness transitions.
  pub fn readiness(&self) -> watch::Receiver<ReadyState> {
    self.state.clone()
  }

  /// Start a backend search, returning its raw event stream.
  ///
  /// The job queue is unbounded: any number of searches may be outstanding
  /// at once, serviced in order by the driving task. Only when that task is
  /// gone does the stream yield a single `Error` event.
  pub fn search(&self, pattern: &str, file_filter: Option<&str>) -> mpsc::Receiver<SearchEvent> {
    let (events, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
    let job = SearchJob {
      pattern: pattern.to_string(),
      file_filter: file_filter.map(str::to_string),
      events: events.clone(),
    };
    if self.jobs.send(job).is_err() {
      let _ = events.try_send(SearchEvent::Error("backend connection closed".to_string()));
    }
    rx
  }
}
