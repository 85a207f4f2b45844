//! Fixed-size batching of streamed items.
//!
//! Decouples the rate of raw result production from the rate of delivery:
//! items go in one at a time, groups come out `capacity` at a time, plus one
//! final partial group on flush. The batch knows nothing about search
//! semantics and never blocks; the caller awaits delivery of each emitted
//! group, which keeps the async boundary out of this type.

/// Accumulates items and emits them in fixed-size groups.
#[derive(Debug)]
pub struct Batch<T> {
  capacity: usize,
  buffer: Vec<T>,
}

impl<T> Batch<T> {
  /// Create a batch with the given capacity. Capacity must be at least 1.
  pub fn new(capacity: usize) -> Self {
    debug_assert!(capacity >= 1, "batch capacity must be at least 1");
    Self {
      capacity: capacity.max(1),
      buffer: Vec::new(),
    }
  }

  /// Append an item, returning the full group exactly when the buffer
  /// reaches capacity.
  pub fn send(&mut self, item: T) -> Option<Vec<T>> {
    self.buffer.push(item);
    if self.buffer.len() >= self.capacity {
      Some(std::mem::take(&mut self.buffer))
    } else {
      None
    }
  }

  /// Take the remaining partial group, `None` if the buffer is empty.
  ///
  /// Must be called once after the last `send`, on the producer's terminal
  /// signal, so trailing items are not lost.
  pub fn flush(&mut self) -> Option<Vec<T>> {
    if self.buffer.is_empty() {
      None
    } else {
      Some(std::mem::take(&mut self.buffer))
    }
  }

  pub fn len(&self) -> usize {
    self.buffer.len()
  }

  pub fn is_empty(&self) -> bool {
    self.buffer.is_empty()
  }
}
