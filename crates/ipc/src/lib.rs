//! Wire protocol shared by the grepmux server and remote callers.
//!
//! Requests and replies travel as newline-delimited JSON over TCP. Each
//! request carries a caller-chosen `id`; every reply for that request echoes
//! the same id so a single connection can interleave any number of searches.
//! Server-push notifications (currently only `ready`) carry no id.

use serde::{Deserialize, Serialize};

pub mod client;

pub use client::{Client, collect_events};

#[derive(Debug, Clone, thiserror::Error, Serialize, Deserialize)]
pub enum IpcError {
  #[error("Ser/de error: {0}")]
  Serde(String),
  #[error("IO error: {0}")]
  Io(String),
  #[error("Connection error: {0}")]
  Connection(String),
  #[error("Codec error: {0}")]
  Codec(String),
  #[error("Backend error: {0}")]
  Backend(String),
  #[error("Invalid request: {0}")]
  InvalidRequest(String),
}

impl From<serde_json::Error> for IpcError {
  fn from(err: serde_json::Error) -> Self {
    IpcError::Serde(err.to_string())
  }
}

impl From<std::io::Error> for IpcError {
  fn from(err: std::io::Error) -> Self {
    IpcError::Io(err.to_string())
  }
}

impl From<tokio_util::codec::LinesCodecError> for IpcError {
  fn from(err: tokio_util::codec::LinesCodecError) -> Self {
    IpcError::Codec(err.to_string())
  }
}

// ============================================================================
// Request envelope
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
  pub id: u64,
  #[serde(flatten)]
  pub data: RequestData,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "method", content = "params")]
pub enum RequestData {
  /// Start a search, queueing it server-side if the backend is not ready yet.
  Search(SearchParams),
  /// Start a search, failing fast with `not_ready` if the backend is not ready.
  TrySearch(SearchParams),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchParams {
  /// Regex text, passed through to the backend unparsed.
  pub pattern: String,
  /// Optional path filter, equally opaque to the front end.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub file_filter: Option<String>,
}

// ============================================================================
// Reply envelope
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Reply {
  /// Id of the originating request. `None` for server-push notifications.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub id: Option<u64>,
  #[serde(flatten)]
  pub event: ReplyEvent,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "event")]
pub enum ReplyEvent {
  /// A batch of matches, at most the server's batch capacity per reply.
  Match { items: Vec<MatchItem> },
  /// Terminal: the search completed, with backend summary statistics.
  Done { stats: SearchStats },
  /// Terminal: the backend reported a search error.
  Error { error: IpcError },
  /// Terminal: fail-fast rejection of a `try_search` before readiness.
  NotReady,
  /// Notification: the caller's backend sub-connection became ready with
  /// nothing queued. Callers without a ready hook ignore it.
  Ready,
}

impl Reply {
  pub fn matches(id: u64, items: Vec<MatchItem>) -> Self {
    Self {
      id: Some(id),
      event: ReplyEvent::Match { items },
    }
  }

  pub fn done(id: u64, stats: SearchStats) -> Self {
    Self {
      id: Some(id),
      event: ReplyEvent::Done { stats },
    }
  }

  pub fn error(id: impl Into<Option<u64>>, error: IpcError) -> Self {
    Self {
      id: id.into(),
      event: ReplyEvent::Error { error },
    }
  }

  pub fn not_ready(id: u64) -> Self {
    Self {
      id: Some(id),
      event: ReplyEvent::NotReady,
    }
  }

  pub fn ready() -> Self {
    Self {
      id: None,
      event: ReplyEvent::Ready,
    }
  }

  /// Whether this reply ends the stream for its request id.
  pub fn is_final(&self) -> bool {
    matches!(
      self.event,
      ReplyEvent::Done { .. } | ReplyEvent::Error { .. } | ReplyEvent::NotReady
    )
  }
}

// ============================================================================
// Payload types
// ============================================================================

/// One match produced by the backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchItem {
  /// Repository-relative path of the matching file.
  pub path: String,
  /// 1-based line number.
  pub line_number: u64,
  /// The matching line text.
  pub line: String,
}

/// Summary statistics the backend attaches to `done`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchStats {
  /// Total matches produced before the backend stopped.
  pub matches: u64,
  /// Wall-clock search time reported by the backend.
  pub elapsed_ms: u64,
}
