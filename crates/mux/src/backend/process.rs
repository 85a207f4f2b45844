//! Process-backed implementation of [`SearchBackend`].
//!
//! Launches the codesearch binary once with a prebuilt index and opens one
//! TCP connection to its query port per sub-connection. The query protocol
//! is newline-delimited JSON: the backend announces itself with a `ready`
//! line, then answers each query with zero or more `match` lines followed by
//! exactly one `done` (or `error`) line.

use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::{
  net::TcpStream,
  process::{Child, Command},
  sync::{mpsc, watch},
};
use tokio_util::codec::{Framed, LinesCodec};
use tracing::{debug, info, warn};

use super::{MatchItem, ReadyState, SearchBackend, SearchEvent, SearchJob, SearchStats, SubConnection};
use crate::config::BackendSettings;

#[derive(Debug, thiserror::Error)]
pub enum CodesearchError {
  #[error("Failed to spawn codesearch: {0}")]
  Spawn(#[source] std::io::Error),
  #[error("IO error: {0}")]
  Io(#[from] std::io::Error),
  #[error("Codec error: {0}")]
  Codec(#[from] tokio_util::codec::LinesCodecError),
  #[error("Malformed backend line: {0}")]
  Protocol(#[from] serde_json::Error),
  #[error("Backend closed the connection")]
  Disconnected,
}

// ============================================================================
// Query wire format
// ============================================================================

#[derive(Serialize)]
struct WireQuery<'a> {
  line: &'a str,
  #[serde(skip_serializing_if = "Option::is_none")]
  file: Option<&'a str>,
}

#[derive(Deserialize)]
#[serde(rename_all = "snake_case", tag = "type")]
enum WireEvent {
  Ready,
  Match {
    path: String,
    line_number: u64,
    line: String,
  },
  Done {
    matches: u64,
    #[serde(default)]
    elapsed_ms: u64,
  },
  Error {
    message: String,
  },
}

// ============================================================================
// Backend
// ============================================================================

/// The shared codesearch process and its query address.
///
/// Constructed once at daemon startup and never recreated; a backend crash
/// is not recovered from. Dropping the backend kills the child process.
pub struct CodesearchBackend {
  query_addr: String,
  _child: Option<Child>,
}

impl CodesearchBackend {
  /// Spawn the codesearch process with the configured index and arguments.
  pub fn launch(settings: &BackendSettings) -> Result<Self, CodesearchError> {
    let mut command = Command::new(&settings.binary);
    command
      .args(&settings.args)
      .arg("--load_index")
      .arg(&settings.index_path)
      .arg("--listen")
      .arg(&settings.query_addr)
      .arg("--repo")
      .arg(&settings.repo);
    for reference in &settings.refs {
      command.arg("--ref").arg(reference);
    }

    let child = command.kill_on_drop(true).spawn().map_err(CodesearchError::Spawn)?;
    info!(
      binary = %settings.binary.display(),
      index = %settings.index_path.display(),
      addr = %settings.query_addr,
      "Launched codesearch backend"
    );

    Ok(Self {
      query_addr: settings.query_addr.clone(),
      _child: Some(child),
    })
  }

  /// Use a backend that is already running at `query_addr`.
  pub fn attach(query_addr: impl Into<String>) -> Self {
    Self {
      query_addr: query_addr.into(),
      _child: None,
    }
  }
}

impl SearchBackend for CodesearchBackend {
  fn connect(&self) -> SubConnection {
    let (state_tx, state_rx) = watch::channel(ReadyState::Connecting);
    let (job_tx, job_rx) = mpsc::unbounded_channel();

    tokio::spawn(drive(self.query_addr.clone(), state_tx, job_rx));

    SubConnection::new(state_rx, job_tx)
  }
}

// ============================================================================
// Sub-connection driver
// ============================================================================

/// Drive one sub-connection: connect, wait for the backend hello, then
/// service search jobs sequentially until the caller or the socket goes away.
async fn drive(addr: String, state: watch::Sender<ReadyState>, mut jobs: mpsc::UnboundedReceiver<SearchJob>) {
  let mut framed = match connect(&addr).await {
    Ok(framed) => framed,
    Err(e) => {
      warn!(addr = %addr, error = %e, "Backend sub-connection failed");
      let _ = state.send(ReadyState::Closed);
      return;
    }
  };

  let _ = state.send(ReadyState::Ready);
  debug!(addr = %addr, "Backend sub-connection ready");

  while let Some(job) = jobs.recv().await {
    if let Err(e) = run_query(&mut framed, &job).await {
      warn!(error = %e, "Backend query failed");
      let _ = job.events.send(SearchEvent::Error(e.to_string())).await;
      break;
    }
  }

  let _ = state.send(ReadyState::Closed);
  debug!(addr = %addr, "Backend sub-connection closed");
}

async fn connect(addr: &str) -> Result<Framed<TcpStream, LinesCodec>, CodesearchError> {
  let stream = TcpStream::connect(addr).await?;
  let mut framed = Framed::new(stream, LinesCodec::new());

  // The backend greets each connection with a ready line once its index is
  // loaded; anything else before that is a protocol violation.
  match framed.next().await {
    Some(line) => match serde_json::from_str::<WireEvent>(&line?)? {
      WireEvent::Ready => Ok(framed),
      _ => Err(CodesearchError::Disconnected),
    },
    None => Err(CodesearchError::Disconnected),
  }
}

/// Send one query and forward its results until the terminal line.
///
/// A dropped caller does not abort the query: lines are drained to keep the
/// connection in sync for the next job.
async fn run_query(framed: &mut Framed<TcpStream, LinesCodec>, job: &SearchJob) -> Result<(), CodesearchError> {
  let query = serde_json::to_string(&WireQuery {
    line: &job.pattern,
    file: job.file_filter.as_deref(),
  })?;
  framed.send(query).await?;

  while let Some(line) = framed.next().await {
    match serde_json::from_str::<WireEvent>(&line?)? {
      WireEvent::Match {
        path,
        line_number,
        line,
      } => {
        let item = MatchItem {
          path,
          line_number,
          line,
        };
        let _ = job.events.send(SearchEvent::Match(item)).await;
      }
      WireEvent::Done { matches, elapsed_ms } => {
        let _ = job.events.send(SearchEvent::Done(SearchStats { matches, elapsed_ms })).await;
        return Ok(());
      }
      WireEvent::Error { message } => {
        let _ = job.events.send(SearchEvent::Error(message)).await;
        return Ok(());
      }
      WireEvent::Ready => {}
    }
  }

  Err(CodesearchError::Disconnected)
}
