// pushgw - bitdrift's metrics ingestion gateway
// Copyright Bitdrift, Inc. All rights reserved.
//
// Use of this source code is governed by a source available license that can be found in the
// LICENSE file or at:
// https://polyformproject.org/wp-content/uploads/2020/06/PolyForm-Shield-1.0.0.txt

#[cfg(test)]
#[path = "./stats_test.rs"]
mod stats_test;

use crate::admin::stats::Scope;
use parking_lot::Mutex;
use prometheus::{Histogram, IntGaugeVec};
use pushgw_common::LossyIntoToFloat;
use pushgw_common::shutdown::ComponentShutdown;
use serde::Deserialize;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{Instant, MissedTickBehavior};

const IDENT_SAMPLES_BUCKETS: &[f64] = &[
  10.0, 100.0, 1000.0, 5000.0, 10_000.0, 20_000.0, 50_000.0, 100_000.0, 500_000.0,
];

#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct IdentStatsConfig {
  pub enable: bool,
  #[serde(with = "humantime_serde")]
  pub interval: Duration,
  pub threshold: u64,
}

impl Default for IdentStatsConfig {
  fn default() -> Self {
    Self {
      enable: true,
      interval: Duration::from_secs(60),
      threshold: 1000,
    }
  }
}

//
// IdentStats
//

/// Per ident sample counts over a reporting window.
pub struct IdentStats {
  enabled: bool,
  interval: Duration,
  threshold: u64,
  window: Mutex<HashMap<String, u64>>,
  reported: Mutex<HashSet<String>>,
  ident_samples: Histogram,
  ident_stats: IntGaugeVec,
}

impl IdentStats {
  pub fn new(config: &IdentStatsConfig, scope: &Scope) -> Self {
    Self {
      enabled: config.enable,
      interval: config.interval.max(Duration::from_millis(1)),
      threshold: config.threshold,
      window: Mutex::default(),
      reported: Mutex::default(),
      ident_samples: scope.histogram_with_buckets("ident_samples", IDENT_SAMPLES_BUCKETS.to_vec()),
      ident_stats: scope.gauge_vec("ident_stats", &["ident"]),
    }
  }

  pub fn increase(&self, ident: &str, n: u64) {
    if !self.enabled || ident.is_empty() {
      return;
    }
    let mut window = self.window.lock();
    if let Some(count) = window.get_mut(ident) {
      *count += n;
    } else {
      window.insert(ident.to_string(), n);
    }
  }

  #[must_use]
  pub fn get(&self, ident: &str) -> u64 {
    self.window.lock().get(ident).copied().unwrap_or_default()
  }

  /// Close the current window and publish it.
  pub fn report(&self) {
    if !self.enabled {
      return;
    }

    let window = std::mem::take(&mut *self.window.lock());
    let mut above = HashSet::new();
    for (ident, count) in window {
      self.ident_samples.observe(count.lossy_to_f64());
      if count >= self.threshold {
        self
          .ident_stats
          .with_label_values(&[ident.as_str()])
          .set(i64::try_from(count).unwrap_or(i64::MAX));
        above.insert(ident);
      }
    }

    let mut reported = self.reported.lock();
    for stale in reported.difference(&above) {
      let _ignored = self.ident_stats.remove_label_values(&[stale.as_str()]);
    }
    *reported = above;
  }

  pub fn spawn_reporter(self: Arc<Self>, shutdown: ComponentShutdown) {
    if !self.enabled {
      return;
    }
    tokio::spawn(self.report_loop(shutdown));
  }

  async fn report_loop(self: Arc<Self>, mut shutdown: ComponentShutdown) {
    let mut interval = tokio::time::interval_at(Instant::now() + self.interval, self.interval);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
    loop {
      tokio::select! {
        () = shutdown.cancelled() => return,
        _ = interval.tick() => self.report(),
      }
    }
  }
}
