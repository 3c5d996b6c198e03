// pushgw - bitdrift's metrics ingestion gateway
// Copyright Bitdrift, Inc. All rights reserved.
//
// Use of this source code is governed by a source available license that can be found in the
// LICENSE file or at:
// https://polyformproject.org/wp-content/uploads/2020/06/PolyForm-Shield-1.0.0.txt

use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};
use time::OffsetDateTime;

//
// TimeProvider
//

pub trait TimeProvider: Send + Sync + 'static {
  fn unix_now(&self) -> i64;

  fn unix_now_millis(&self) -> i64 {
    self.unix_now() * 1000
  }
}

//
// RealTimeProvider
//

pub struct RealTimeProvider {}

impl TimeProvider for RealTimeProvider {
  fn unix_now(&self) -> i64 {
    OffsetDateTime::now_utc().unix_timestamp()
  }

  fn unix_now_millis(&self) -> i64 {
    i64::try_from(OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000).unwrap_or(i64::MAX)
  }
}

//
// TestTimeProvider
//

#[derive(Default, Clone)]
pub struct TestTimeProvider {
  pub time: Arc<AtomicI64>,
}

impl TestTimeProvider {
  #[must_use]
  pub fn new(now: i64) -> Self {
    Self {
      time: Arc::new(AtomicI64::new(now)),
    }
  }
}

impl TimeProvider for TestTimeProvider {
  fn unix_now(&self) -> i64 {
    self.time.load(Ordering::SeqCst)
  }
}
