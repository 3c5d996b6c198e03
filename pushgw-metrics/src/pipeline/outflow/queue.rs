// pushgw - bitdrift's metrics ingestion gateway
// Copyright Bitdrift, Inc. All rights reserved.
//
// Use of this source code is governed by a source available license that can be found in the
// LICENSE file or at:
// https://polyformproject.org/wp-content/uploads/2020/06/PolyForm-Shield-1.0.0.txt

#[cfg(test)]
#[path = "./queue_test.rs"]
mod queue_test;

use parking_lot::Mutex;
use std::collections::VecDeque;

//
// BoundedQueue
//

/// Producers push at the front and the consumer pops from the back, so items come out in push
/// order.
pub struct BoundedQueue<T> {
  items: Mutex<VecDeque<T>>,
  max_size: usize,
}

impl<T> BoundedQueue<T> {
  #[must_use]
  pub const fn new(max_size: usize) -> Self {
    Self {
      items: Mutex::new(VecDeque::new()),
      max_size,
    }
  }

  /// Returns false and drops `item` if the queue is full.
  pub fn push_front(&self, item: T) -> bool {
    let mut items = self.items.lock();
    if items.len() >= self.max_size {
      return false;
    }
    items.push_front(item);
    true
  }

  /// Removes up to `max` of the oldest items.
  pub fn pop_back(&self, max: usize) -> Vec<T> {
    let mut items = self.items.lock();
    let count = max.min(items.len());
    let mut popped = Vec::with_capacity(count);
    for _ in 0 .. count {
      if let Some(item) = items.pop_back() {
        popped.push(item);
      }
    }
    popped
  }

  #[must_use]
  pub fn len(&self) -> usize {
    self.items.lock().len()
  }

  #[must_use]
  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }
}
