//! Behavior of the per-caller actor: queueing, fail-fast, readiness
//! draining, and match batching.

use ipc::ReplyEvent;

use super::helpers::*;
use crate::{
  backend::ReadyState,
  client::SearchRequest,
};

fn request(id: u64, pattern: &str) -> SearchRequest {
  SearchRequest {
    id,
    pattern: pattern.to_string(),
    file_filter: None,
  }
}

#[tokio::test]
async fn test_search_queued_until_ready() {
  let (backend, mut conns) = FakeBackend::new(ReadyState::Connecting);
  let (handle, mut replies, mut conn, _cancel) = spawn_client(&backend, &mut conns, 50);

  handle.search(request(1, "foo")).await.expect("send search");

  // Nothing may reach the caller before readiness.
  assert_no_reply(&mut replies).await;

  conn.make_ready();
  let job = conn.expect_job().await;
  assert_eq!(job.pattern, "foo");
  serve_matches(&job, 1).await;

  match recv_reply(&mut replies).await.event {
    ReplyEvent::Match { items } => assert_eq!(items.len(), 1),
    other => panic!("expected match, got {other:?}"),
  }
  let done = recv_reply(&mut replies).await;
  assert_eq!(done.id, Some(1));
  assert!(matches!(done.event, ReplyEvent::Done { .. }));
}

#[tokio::test]
async fn test_readiness_drains_entire_queue_in_order() {
  let (backend, mut conns) = FakeBackend::new(ReadyState::Connecting);
  let (handle, mut replies, mut conn, _cancel) = spawn_client(&backend, &mut conns, 50);

  // More than one request queued before the single readiness transition.
  for (id, pattern) in [(1, "alpha"), (2, "beta"), (3, "gamma")] {
    handle.search(request(id, pattern)).await.expect("send search");
  }
  assert_no_reply(&mut replies).await;

  conn.make_ready();

  // All three are forwarded, FIFO.
  for expected in ["alpha", "beta", "gamma"] {
    let job = conn.expect_job().await;
    assert_eq!(job.pattern, expected);
    serve_matches(&job, 0).await;
  }

  let mut done_ids = Vec::new();
  for _ in 0..3 {
    let reply = recv_reply(&mut replies).await;
    assert!(matches!(reply.event, ReplyEvent::Done { .. }));
    done_ids.push(reply.id.expect("done carries the request id"));
  }
  done_ids.sort_unstable();
  assert_eq!(done_ids, vec![1, 2, 3]);
}

#[tokio::test]
async fn test_ready_with_empty_queue_notifies_once() {
  let (backend, mut conns) = FakeBackend::new(ReadyState::Connecting);
  let (_handle, mut replies, conn, _cancel) = spawn_client(&backend, &mut conns, 50);

  conn.make_ready();

  let reply = recv_reply(&mut replies).await;
  assert_eq!(reply.id, None);
  assert!(matches!(reply.event, ReplyEvent::Ready));

  // Exactly once: no duplicate on subsequent state noise.
  conn.make_ready();
  assert_no_reply(&mut replies).await;
}

#[tokio::test]
async fn test_try_search_rejected_while_connecting() {
  let (backend, mut conns) = FakeBackend::new(ReadyState::Connecting);
  let (handle, mut replies, _conn, _cancel) = spawn_client(&backend, &mut conns, 50);

  handle.try_search(request(7, "foo")).await.expect("send try_search");

  let reply = recv_reply(&mut replies).await;
  assert_eq!(reply.id, Some(7));
  assert!(matches!(reply.event, ReplyEvent::NotReady));

  // No queueing happened: that id never produces another reply.
  assert_no_reply(&mut replies).await;
}

#[tokio::test]
async fn test_matches_batched_with_final_partial_group() {
  let (backend, mut conns) = FakeBackend::new(ReadyState::Ready);
  let (handle, mut replies, mut conn, _cancel) = spawn_client(&backend, &mut conns, 50);

  // Pre-ready sub-connection signals idleness first.
  assert!(matches!(recv_reply(&mut replies).await.event, ReplyEvent::Ready));

  handle.search(request(1, "needle")).await.expect("send search");
  let job = conn.expect_job().await;
  serve_matches(&job, 120).await;

  // ceil(120/50) match replies sized 50, 50, 20, then exactly one done.
  let mut sizes = Vec::new();
  loop {
    let reply = recv_reply(&mut replies).await;
    assert_eq!(reply.id, Some(1));
    match reply.event {
      ReplyEvent::Match { items } => sizes.push(items.len()),
      ReplyEvent::Done { stats } => {
        assert_eq!(stats.matches, 120);
        break;
      }
      other => panic!("unexpected reply {other:?}"),
    }
  }
  assert_eq!(sizes, vec![50, 50, 20]);
  assert_no_reply(&mut replies).await;
}

#[tokio::test]
async fn test_small_capacity_example_scenario() {
  // capacity 2, matches [A,B,C,D,E]: match([A,B]), match([C,D]), match([E]), done
  let (backend, mut conns) = FakeBackend::new(ReadyState::Ready);
  let (handle, mut replies, mut conn, _cancel) = spawn_client(&backend, &mut conns, 2);

  assert!(matches!(recv_reply(&mut replies).await.event, ReplyEvent::Ready));

  handle.search(request(1, "abc")).await.expect("send search");
  let job = conn.expect_job().await;
  serve_matches(&job, 5).await;

  let mut sizes = Vec::new();
  loop {
    match recv_reply(&mut replies).await.event {
      ReplyEvent::Match { items } => sizes.push(items.len()),
      ReplyEvent::Done { .. } => break,
      other => panic!("unexpected reply {other:?}"),
    }
  }
  assert_eq!(sizes, vec![2, 2, 1]);
}

#[tokio::test]
async fn test_error_forwarded_without_done() {
  let (backend, mut conns) = FakeBackend::new(ReadyState::Ready);
  let (handle, mut replies, mut conn, _cancel) = spawn_client(&backend, &mut conns, 2);

  assert!(matches!(recv_reply(&mut replies).await.event, ReplyEvent::Ready));

  handle.search(request(4, "(unbalanced")).await.expect("send search");
  let job = conn.expect_job().await;
  // Three matches emit one full batch of two; the third is still buffered
  // when the error lands and goes down with the stream.
  serve_error(&job, 3, "invalid regex").await;

  match recv_reply(&mut replies).await.event {
    ReplyEvent::Match { items } => assert_eq!(items.len(), 2),
    other => panic!("expected match, got {other:?}"),
  }
  let reply = recv_reply(&mut replies).await;
  assert_eq!(reply.id, Some(4));
  assert!(matches!(reply.event, ReplyEvent::Error { .. }));

  // One error, no done afterwards.
  assert_no_reply(&mut replies).await;
}

#[tokio::test]
async fn test_concurrent_searches_get_separate_batches() {
  let (backend, mut conns) = FakeBackend::new(ReadyState::Ready);
  let (handle, mut replies, mut conn, _cancel) = spawn_client(&backend, &mut conns, 50);

  assert!(matches!(recv_reply(&mut replies).await.event, ReplyEvent::Ready));

  handle.search(request(1, "first")).await.expect("send search");
  handle.search(request(2, "second")).await.expect("send search");

  let job1 = conn.expect_job().await;
  let job2 = conn.expect_job().await;
  assert_eq!(job1.pattern, "first");
  assert_eq!(job2.pattern, "second");

  serve_matches(&job1, 3).await;
  serve_matches(&job2, 4).await;

  // Each id sees its own matches then its own done; per-id ordering holds
  // even though the two streams interleave.
  let mut seen: std::collections::HashMap<u64, (usize, bool)> = std::collections::HashMap::new();
  for _ in 0..4 {
    let reply = recv_reply(&mut replies).await;
    let id = reply.id.expect("search replies carry ids");
    let entry = seen.entry(id).or_default();
    match reply.event {
      ReplyEvent::Match { items } => {
        assert!(!entry.1, "match after done for id {id}");
        entry.0 += items.len();
      }
      ReplyEvent::Done { .. } => entry.1 = true,
      other => panic!("unexpected reply {other:?}"),
    }
  }
  assert_eq!(seen[&1], (3, true));
  assert_eq!(seen[&2], (4, true));
}

#[tokio::test]
async fn test_deep_backlog_of_searches_none_rejected() {
  let (backend, mut conns) = FakeBackend::new(ReadyState::Ready);
  let (handle, mut replies, mut conn, _cancel) = spawn_client(&backend, &mut conns, 50);

  assert!(matches!(recv_reply(&mut replies).await.event, ReplyEvent::Ready));

  // Pile up far more outstanding searches than the backend has serviced.
  // Every one of them must reach the backend; none may be bounced with a
  // connection error just because the queue got deep.
  for id in 1..=40 {
    handle.search(request(id, &format!("p{id}"))).await.expect("send search");
  }

  for _ in 0..40 {
    let job = conn.expect_job().await;
    serve_matches(&job, 0).await;
  }

  let mut done_ids = Vec::new();
  for _ in 0..40 {
    let reply = recv_reply(&mut replies).await;
    match reply.event {
      ReplyEvent::Done { .. } => done_ids.push(reply.id.expect("done carries the request id")),
      other => panic!("unexpected reply {other:?}"),
    }
  }
  done_ids.sort_unstable();
  assert_eq!(done_ids, (1..=40).collect::<Vec<_>>());
}

#[tokio::test]
async fn test_no_idle_ready_when_search_races_transition() {
  let (backend, mut conns) = FakeBackend::new(ReadyState::Connecting);
  let (handle, mut replies, mut conn, _cancel) = spawn_client(&backend, &mut conns, 50);

  // The state flips and a search lands before the actor observes either.
  // The search runs immediately against the now-ready sub-connection, so the
  // caller is not idle and must not get a stray ready notification.
  conn.make_ready();
  handle.search(request(1, "eager")).await.expect("send search");

  let job = conn.expect_job().await;
  assert_eq!(job.pattern, "eager");
  serve_matches(&job, 1).await;

  match recv_reply(&mut replies).await.event {
    ReplyEvent::Match { items } => assert_eq!(items.len(), 1),
    other => panic!("expected match, got {other:?}"),
  }
  assert!(matches!(recv_reply(&mut replies).await.event, ReplyEvent::Done { .. }));
  assert_no_reply(&mut replies).await;
}

#[tokio::test]
async fn test_closed_before_ready_abandons_queue() {
  let (backend, mut conns) = FakeBackend::new(ReadyState::Connecting);
  let (handle, mut replies, conn, _cancel) = spawn_client(&backend, &mut conns, 50);

  handle.search(request(1, "foo")).await.expect("send search");
  conn.close();

  // The queued request is silently abandoned and the drain never arms
  // again; fail-fast requests keep getting not_ready.
  assert_no_reply(&mut replies).await;

  handle.try_search(request(2, "bar")).await.expect("send try_search");
  let reply = recv_reply(&mut replies).await;
  assert_eq!(reply.id, Some(2));
  assert!(matches!(reply.event, ReplyEvent::NotReady));
}
