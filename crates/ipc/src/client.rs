//! Async client for the grepmux server.
//!
//! A background multiplexer task owns the framed TCP stream and correlates
//! replies to in-flight requests by id, so one connection can carry any
//! number of concurrent searches. Server-push `ready` notifications are
//! surfaced through a separate channel handed out at connect time; callers
//! that do not care simply drop the receiver.

use std::{
  collections::HashMap,
  sync::{
    Arc,
    atomic::{AtomicU64, Ordering},
  },
};

use futures::{SinkExt, StreamExt};
use tokio::{net::TcpStream, sync::mpsc};
use tokio_util::codec::{Framed, LinesCodec};
use tracing::{debug, error, warn};

use crate::{IpcError, Reply, ReplyEvent, Request, RequestData, SearchParams};

type FramedStream = Framed<TcpStream, LinesCodec>;

struct OutboundRequest {
  request: Request,
  reply_tx: mpsc::Sender<ReplyEvent>,
}

/// Client for one connection to the grepmux server.
#[derive(Clone)]
pub struct Client {
  request_tx: mpsc::Sender<OutboundRequest>,
  counter: Arc<AtomicU64>,
}

impl Client {
  /// Connect to the server.
  ///
  /// Returns the client plus the receiver for `ready` notifications. The
  /// receiver yields at most one item per connection; drop it if unused.
  pub async fn connect(addr: &str) -> Result<(Self, mpsc::Receiver<()>), IpcError> {
    let stream = TcpStream::connect(addr).await?;
    let framed = Framed::new(stream, LinesCodec::new());
    let (sink, read_stream) = framed.split();

    let (request_tx, request_rx) = mpsc::channel(64);
    let (ready_tx, ready_rx) = mpsc::channel(1);
    tokio::spawn(Self::multiplexer(sink, read_stream, request_rx, ready_tx));

    Ok((
      Self {
        request_tx,
        counter: Arc::new(AtomicU64::new(1)),
      },
      ready_rx,
    ))
  }

  async fn multiplexer(
    mut sink: futures::stream::SplitSink<FramedStream, String>,
    mut stream: futures::stream::SplitStream<FramedStream>,
    mut request_rx: mpsc::Receiver<OutboundRequest>,
    ready_tx: mpsc::Sender<()>,
  ) {
    let mut pending: HashMap<u64, mpsc::Sender<ReplyEvent>> = HashMap::new();

    loop {
      tokio::select! {
        outbound = request_rx.recv() => {
          let Some(outbound) = outbound else {
            // Every Client clone is gone; drop the stream to disconnect.
            debug!("client dropped, closing connection");
            break;
          };
          let id = outbound.request.id;
          match serde_json::to_string(&outbound.request) {
            Ok(json) => {
              pending.insert(id, outbound.reply_tx);
              if let Err(e) = sink.send(json).await {
                error!("failed to send request: {e}");
                if let Some(tx) = pending.remove(&id) {
                  let _ = tx.send(ReplyEvent::Error { error: IpcError::Connection(e.to_string()) }).await;
                }
              }
            }
            Err(e) => {
              let _ = outbound.reply_tx.send(ReplyEvent::Error { error: IpcError::Serde(e.to_string()) }).await;
            }
          }
        }

        result = stream.next() => {
          match result {
            Some(Ok(line)) => {
              match serde_json::from_str::<Reply>(&line) {
                Ok(reply) => Self::route_reply(reply, &mut pending, &ready_tx).await,
                Err(e) => error!("failed to parse reply: {e}"),
              }
            }
            Some(Err(e)) => {
              error!("connection error: {e}");
              break;
            }
            None => {
              debug!("connection closed");
              break;
            }
          }
        }
      }
    }

    for (_, tx) in pending {
      let _ = tx
        .send(ReplyEvent::Error {
          error: IpcError::Connection("connection closed".into()),
        })
        .await;
    }

    debug!("multiplexer exited");
  }

  async fn route_reply(reply: Reply, pending: &mut HashMap<u64, mpsc::Sender<ReplyEvent>>, ready_tx: &mpsc::Sender<()>) {
    let Some(id) = reply.id else {
      // Server-push notification
      if matches!(reply.event, ReplyEvent::Ready) {
        let _ = ready_tx.try_send(());
      }
      return;
    };

    let is_final = reply.is_final();
    if let Some(tx) = pending.get(&id) {
      if tx.send(reply.event).await.is_err() {
        debug!("receiver dropped for request {id}");
        pending.remove(&id);
      } else if is_final {
        pending.remove(&id);
      }
    } else {
      warn!("received reply for unknown request id: {id}");
    }
  }

  /// Start a search, letting the server queue it until the backend is ready.
  ///
  /// Yields `Match` events (batched), then exactly one terminal event.
  pub async fn search(&self, pattern: &str, file_filter: Option<&str>) -> Result<mpsc::Receiver<ReplyEvent>, IpcError> {
    self.request(RequestData::Search(params(pattern, file_filter))).await
  }

  /// Start a search that fails fast with `NotReady` if the backend is not ready.
  pub async fn try_search(
    &self,
    pattern: &str,
    file_filter: Option<&str>,
  ) -> Result<mpsc::Receiver<ReplyEvent>, IpcError> {
    self.request(RequestData::TrySearch(params(pattern, file_filter))).await
  }

  async fn request(&self, data: RequestData) -> Result<mpsc::Receiver<ReplyEvent>, IpcError> {
    let id = self.counter.fetch_add(1, Ordering::Relaxed);
    let (reply_tx, reply_rx) = mpsc::channel(16);

    self
      .request_tx
      .send(OutboundRequest {
        request: Request { id, data },
        reply_tx,
      })
      .await
      .map_err(|_| IpcError::Connection("multiplexer died".into()))?;

    Ok(reply_rx)
  }
}

fn params(pattern: &str, file_filter: Option<&str>) -> SearchParams {
  SearchParams {
    pattern: pattern.to_string(),
    file_filter: file_filter.map(str::to_string),
  }
}

/// Collect a reply stream until its terminal event, inclusive.
pub async fn collect_events(mut rx: mpsc::Receiver<ReplyEvent>) -> Vec<ReplyEvent> {
  let mut events = Vec::new();
  while let Some(event) = rx.recv().await {
    let is_final = !matches!(event, ReplyEvent::Match { .. } | ReplyEvent::Ready);
    events.push(event);
    if is_final {
      break;
    }
  }
  events
}
