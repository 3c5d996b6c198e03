// pushgw - bitdrift's metrics ingestion gateway
// Copyright Bitdrift, Inc. All rights reserved.
//
// Use of this source code is governed by a source available license that can be found in the
// LICENSE file or at:
// https://polyformproject.org/wp-content/uploads/2020/06/PolyForm-Shield-1.0.0.txt

#[cfg(test)]
#[path = "./fabric_test.rs"]
mod fabric_test;

use super::queue::BoundedQueue;
use super::writer::Writer;
use crate::admin::stats::Scope;
use crate::pipeline::config::{ShardingKey, WriterOptions};
use crate::protos::sample::metric_name;
use futures::future::join_all;
use parking_lot::{Mutex, RwLock};
use prometheus::{IntCounterVec, IntGauge, IntGaugeVec};
use pushgw_common::shutdown::ComponentShutdown;
use pushgw_common::warn_every;
use pushgw_protobuf::protos::prometheus::TimeSeries;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use time::ext::NumericalDuration;
use tokio::sync::Semaphore;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

const QUEUE_EXPIRY: Duration = Duration::from_secs(3600);
const SWEEP_INTERVAL: Duration = Duration::from_secs(600);
const EMPTY_QUEUE_SLEEP: Duration = Duration::from_millis(400);
const QUEUE_SIZE_REPORT_INTERVAL: Duration = Duration::from_secs(15);
const EMPTY_KEY: &str = "-";

/// Pick the queue a sample goes to. By ident, samples without an ident share the `-` queue. By
/// metric, the first two characters of the name are used so that a single hot metric does not
/// get a queue to itself.
#[must_use]
pub fn shard_key(sharding_key: ShardingKey, ident: &str, series: &TimeSeries) -> String {
  match sharding_key {
    ShardingKey::Ident => {
      if ident.is_empty() {
        EMPTY_KEY.to_string()
      } else {
        ident.to_string()
      }
    },
    ShardingKey::Metric => {
      let prefix: String = metric_name(series).chars().take(2).collect();
      if prefix.is_empty() {
        EMPTY_KEY.to_string()
      } else {
        prefix
      }
    },
  }
}

//
// IdentQueue
//

struct IdentQueue {
  samples: BoundedQueue<TimeSeries>,
  last_used: Mutex<Instant>,
  close: CancellationToken,
}

//
// FabricStats
//

#[derive(Clone)]
struct FabricStats {
  push_queue_error_total: IntCounterVec,
  sample_queue_size: IntGaugeVec,
  all_queue_len: IntGauge,
}

impl FabricStats {
  fn new(scope: &Scope) -> Self {
    Self {
      push_queue_error_total: scope.counter_vec("push_queue_error_total", &["host_ident"]),
      sample_queue_size: scope.gauge_vec("sample_queue_size", &["host_ident"]),
      all_queue_len: scope.gauge("all_queue_len"),
    }
  }
}

//
// Fabric
//

/// Per key bounded queues, each drained by its own consumer task that hands every batch to all
/// writers. Outbound writes across all consumers share one semaphore.
pub struct Fabric {
  queues: RwLock<HashMap<String, Arc<IdentQueue>>>,
  writers: Arc<[Arc<dyn Writer>]>,
  semaphore: Arc<Semaphore>,
  queue_max_size: usize,
  queue_pop_size: usize,
  all_queue_len: AtomicUsize,
  all_queue_len_interval: Duration,
  close_all: CancellationToken,
  stats: FabricStats,
}

impl Fabric {
  pub fn new(
    options: &WriterOptions,
    write_concurrency: usize,
    writers: Vec<Arc<dyn Writer>>,
    scope: &Scope,
    shutdown: ComponentShutdown,
  ) -> Arc<Self> {
    let fabric = Arc::new(Self {
      queues: RwLock::new(HashMap::with_capacity(options.queue_count)),
      writers: writers.into(),
      semaphore: Arc::new(Semaphore::new(write_concurrency.max(1))),
      queue_max_size: options.queue_max_size,
      queue_pop_size: options.queue_pop_size.max(1),
      all_queue_len: AtomicUsize::new(0),
      all_queue_len_interval: options.all_queue_len_interval.max(Duration::from_millis(1)),
      close_all: CancellationToken::new(),
      stats: FabricStats::new(scope),
    });
    tokio::spawn(fabric.clone().housekeeping(shutdown));
    fabric
  }

  /// Never blocks. Returns false if the queue for `key` is full, in which case the sample is
  /// dropped.
  pub fn push_sample(&self, key: &str, series: TimeSeries) -> bool {
    // The sweep removes queues under the write lock, so a queue found under the read lock stays
    // live until the push lands.
    {
      let queues = self.queues.read();
      if let Some(queue) = queues.get(key) {
        return self.push_to_queue(key, queue, series);
      }
    }
    let queue = self.create_queue(key);
    self.push_to_queue(key, &queue, series)
  }

  fn push_to_queue(&self, key: &str, queue: &IdentQueue, series: TimeSeries) -> bool {
    *queue.last_used.lock() = Instant::now();
    if queue.samples.push_front(series) {
      return true;
    }
    warn_every!(
      1.minutes(),
      "write queue {} full, current size: {}",
      key,
      queue.samples.len()
    );
    self
      .stats
      .push_queue_error_total
      .with_label_values(&[key])
      .inc();
    false
  }

  #[must_use]
  pub fn queue_count(&self) -> usize {
    self.queues.read().len()
  }

  #[must_use]
  pub fn has_queue(&self, key: &str) -> bool {
    self.queues.read().contains_key(key)
  }

  /// Total number of queued samples as of the last refresh.
  #[must_use]
  pub fn all_queue_len(&self) -> usize {
    self.all_queue_len.load(Ordering::Relaxed)
  }

  #[cfg(test)]
  fn queue_ref(&self, key: &str) -> Option<Weak<IdentQueue>> {
    self.queues.read().get(key).map(Arc::downgrade)
  }

  fn create_queue(&self, key: &str) -> Arc<IdentQueue> {
    let mut queues = self.queues.write();
    if let Some(queue) = queues.get(key) {
      return queue.clone();
    }

    log::debug!("creating write queue {key}");
    let queue = Arc::new(IdentQueue {
      samples: BoundedQueue::new(self.queue_max_size),
      last_used: Mutex::new(Instant::now()),
      close: self.close_all.child_token(),
    });
    queues.insert(key.to_string(), queue.clone());

    tokio::spawn(Self::consume(
      key.to_string(),
      queue.clone(),
      self.writers.clone(),
      self.semaphore.clone(),
      self.queue_pop_size,
    ));
    tokio::spawn(Self::report_queue_size(
      key.to_string(),
      Arc::downgrade(&queue),
      queue.close.clone(),
      self.stats.sample_queue_size.clone(),
    ));
    queue
  }

  async fn consume(
    key: String,
    queue: Arc<IdentQueue>,
    writers: Arc<[Arc<dyn Writer>]>,
    semaphore: Arc<Semaphore>,
    pop_size: usize,
  ) {
    loop {
      if queue.close.is_cancelled() {
        log::info!("write queue {key} closed");
        return;
      }

      let batch = queue.samples.pop_back(pop_size);
      if batch.is_empty() {
        tokio::select! {
          () = queue.close.cancelled() => {},
          () = tokio::time::sleep(EMPTY_QUEUE_SLEEP) => {},
        }
        continue;
      }

      // Wait for every writer before popping again so each writer sees batches in order.
      let queue_key = key.as_str();
      let semaphore = &semaphore;
      join_all(writers.iter().map(|writer| {
        let batch = batch.clone();
        async move {
          let Ok(_permit) = semaphore.acquire().await else {
            return;
          };
          writer.write(queue_key, batch, None).await;
        }
      }))
      .await;
    }
  }

  async fn report_queue_size(
    key: String,
    queue: Weak<IdentQueue>,
    close: CancellationToken,
    gauge: IntGaugeVec,
  ) {
    let mut interval = tokio::time::interval_at(
      Instant::now() + QUEUE_SIZE_REPORT_INTERVAL,
      QUEUE_SIZE_REPORT_INTERVAL,
    );
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
    loop {
      tokio::select! {
        () = close.cancelled() => break,
        _ = interval.tick() => {
          let Some(queue) = queue.upgrade() else {
            break;
          };
          gauge
            .with_label_values(&[key.as_str()])
            .set(i64::try_from(queue.samples.len()).unwrap_or(i64::MAX));
        },
      }
    }
    let _ignored = gauge.remove_label_values(&[key.as_str()]);
  }

  async fn housekeeping(self: Arc<Self>, mut shutdown: ComponentShutdown) {
    let mut sweep = tokio::time::interval_at(Instant::now() + SWEEP_INTERVAL, SWEEP_INTERVAL);
    sweep.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut refresh = tokio::time::interval(self.all_queue_len_interval);
    refresh.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
      tokio::select! {
        () = shutdown.cancelled() => {
          log::info!("closing {} write queues", self.queue_count());
          self.close_all.cancel();
          self.queues.write().clear();
          return;
        },
        _ = sweep.tick() => self.clean_expired_queues(),
        _ = refresh.tick() => self.refresh_all_queue_len(),
      }
    }
  }

  fn clean_expired_queues(&self) {
    let now = Instant::now();
    self.queues.write().retain(|key, queue| {
      let idle = now.saturating_duration_since(*queue.last_used.lock());
      if idle > QUEUE_EXPIRY {
        log::info!("closing idle write queue {key}");
        queue.close.cancel();
        false
      } else {
        true
      }
    });
  }

  fn refresh_all_queue_len(&self) {
    let total: usize = self.queues.read().values().map(|q| q.samples.len()).sum();
    self.all_queue_len.store(total, Ordering::Relaxed);
    self
      .stats
      .all_queue_len
      .set(i64::try_from(total).unwrap_or(i64::MAX));
  }
}
