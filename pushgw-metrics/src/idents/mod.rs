// pushgw - bitdrift's metrics ingestion gateway
// Copyright Bitdrift, Inc. All rights reserved.
//
// Use of this source code is governed by a source available license that can be found in the
// LICENSE file or at:
// https://polyformproject.org/wp-content/uploads/2020/06/PolyForm-Shield-1.0.0.txt


pub mod stats;
pub mod store;

use crate::pipeline::time::TimeProvider;
use crate::protos::n9e::HostMeta;
use parking_lot::{Mutex, RwLock};
use pushgw_common::shutdown::ComponentShutdown;
use serde::Deserialize;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use store::TargetStore;
use tokio::time::{Instant, MissedTickBehavior};

//
// IdentSetConfig
//

#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct IdentSetConfig {
  #[serde(with = "humantime_serde")]
  pub persist_interval: Duration,
  pub batch_size: usize,
  /// Center mode: where the `target` table lives.
  pub database_url: String,
  pub database_max_connections: u32,
  /// Edge mode: centers receiving `/v1/n9e/target-update`.
  pub center_urls: Vec<String>,
  pub center_basic_auth_user: String,
  pub center_basic_auth_pass: String,
  #[serde(with = "humantime_serde")]
  pub center_timeout: Duration,
}

impl Default for IdentSetConfig {
  fn default() -> Self {
    Self {
      persist_interval: Duration::from_secs(1),
      batch_size: 100,
      database_url: String::new(),
      database_max_connections: 4,
      center_urls: Vec::new(),
      center_basic_auth_user: String::new(),
      center_basic_auth_pass: String::new(),
      center_timeout: Duration::from_secs(10),
    }
  }
}

//
// IdentSet
//

/// Idents seen since the last persist. Writers only ever union into the set; the persister swaps
/// the whole set out and writes it to the store without holding the lock.
pub struct IdentSet {
  items: Mutex<HashSet<String>>,
  store: Arc<dyn TargetStore>,
  batch_size: usize,
  persist_interval: Duration,
  time_provider: Arc<dyn TimeProvider>,
}

impl IdentSet {
  pub fn new(
    config: &IdentSetConfig,
    store: Arc<dyn TargetStore>,
    time_provider: Arc<dyn TimeProvider>,
  ) -> Self {
    Self {
      items: Mutex::new(HashSet::new()),
      store,
      batch_size: config.batch_size.max(1),
      persist_interval: config.persist_interval.max(Duration::from_millis(1)),
      time_provider,
    }
  }

  pub fn mset<I, S>(&self, items: I)
  where
    I: IntoIterator<Item = S>,
    S: Into<String>,
  {
    let mut set = self.items.lock();
    for item in items {
      set.insert(item.into());
    }
  }

  #[must_use]
  pub fn len(&self) -> usize {
    self.items.lock().len()
  }

  #[must_use]
  pub fn is_empty(&self) -> bool {
    self.items.lock().is_empty()
  }

  #[must_use]
  pub fn contains(&self, ident: &str) -> bool {
    self.items.lock().contains(ident)
  }

  fn swap(&self) -> HashSet<String> {
    std::mem::take(&mut *self.items.lock())
  }

  /// Swap out the current set and write it to the store in batches. Failed batches are logged
  /// and not retried; idents seen again will be picked up by a later cycle.
  pub async fn persist_once(&self) {
    let snapshot = self.swap();
    if snapshot.is_empty() {
      return;
    }

    let now = self.time_provider.unix_now();
    let idents: Vec<String> = snapshot.into_iter().collect();
    log::debug!("persisting {} idents", idents.len());
    for batch in idents.chunks(self.batch_size) {
      if let Err(e) = self.store.touch(batch, now).await {
        log::warn!("failed to persist {} idents: {e}", batch.len());
      }
    }
  }

  pub fn spawn_persister(self: Arc<Self>, shutdown: ComponentShutdown) {
    tokio::spawn(self.persist_loop(shutdown));
  }

  async fn persist_loop(self: Arc<Self>, mut shutdown: ComponentShutdown) {
    let mut interval =
      tokio::time::interval_at(Instant::now() + self.persist_interval, self.persist_interval);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
      tokio::select! {
        () = shutdown.cancelled() => {
          self.persist_once().await;
          log::info!("ident persister stopped");
          return;
        },
        _ = interval.tick() => self.persist_once().await,
      }
    }
  }
}

//
// HostMetaCache
//

/// Latest heartbeat of every host seen by a center.
#[derive(Default)]
pub struct HostMetaCache {
  hosts: RwLock<HashMap<String, Arc<HostMeta>>>,
}

impl HostMetaCache {
  pub fn set(&self, meta: HostMeta) {
    self
      .hosts
      .write()
      .insert(meta.hostname.clone(), Arc::new(meta));
  }

  #[must_use]
  pub fn get(&self, hostname: &str) -> Option<Arc<HostMeta>> {
    self.hosts.read().get(hostname).cloned()
  }

  #[must_use]
  pub fn len(&self) -> usize {
    self.hosts.read().len()
  }

  #[must_use]
  pub fn is_empty(&self) -> bool {
    self.hosts.read().is_empty()
  }
}
