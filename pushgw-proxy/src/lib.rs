// pushgw - bitdrift's metrics ingestion gateway
// Copyright Bitdrift, Inc. All rights reserved.
//
// Use of this source code is governed by a source available license that can be found in the
// LICENSE file or at:
// https://polyformproject.org/wp-content/uploads/2020/06/PolyForm-Shield-1.0.0.txt

pub mod config;

#[cfg(test)]
#[path = "./lib_test.rs"]
mod lib_test;

use crate::config::Config;
use anyhow::Context;
use futures::Future;
use log::info;
use pushgw_common::shutdown::ComponentShutdownTrigger;
use pushgw_metrics::admin::server::AdminState;
use pushgw_metrics::admin::stats::Collector;
use pushgw_metrics::clients::center::CenterClient;
use pushgw_metrics::idents::stats::IdentStats;
use pushgw_metrics::idents::store::{DatabaseTargetStore, HttpTargetStore, TargetStore};
use pushgw_metrics::idents::{HostMetaCache, IdentSet};
use pushgw_metrics::pipeline::Pipeline;
use pushgw_metrics::pipeline::config::Mode;
use pushgw_metrics::pipeline::inflow::http_inflow::{HttpInflow, HttpInflowOptions};
use pushgw_metrics::pipeline::processor::enrich::{
  InMemoryBusiGroupCache,
  InMemoryTargetCache,
  Target,
};
use pushgw_metrics::pipeline::time::{RealTimeProvider, TimeProvider};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;

#[cfg(test)]
#[ctor::ctor]
fn test_global_init() {
  use pushgw_common::global_initialize;

  global_initialize();
}

//
// ServerStarted
//

pub struct ServerStarted {
  pub collector: Collector,
  pub ingest_addr: SocketAddr,
  pub admin_addr: Option<SocketAddr>,
}

//
// ServerHooks
//

#[async_trait::async_trait]
pub trait ServerHooks {
  async fn server_started(&self, started: ServerStarted);
}

fn make_target_store(
  config: &Config,
) -> anyhow::Result<(Arc<dyn TargetStore>, Option<Arc<CenterClient>>)> {
  let ident_set = &config.ident_set;
  match config.mode {
    Mode::Center => {
      let store = DatabaseTargetStore::connect_lazy(
        &ident_set.database_url,
        ident_set.database_max_connections,
      )
      .context("invalid ident_set.database_url")?;
      Ok((Arc::new(store), None))
    },
    Mode::Edge => {
      let center = Arc::new(
        CenterClient::new(
          &ident_set.center_urls,
          &ident_set.center_basic_auth_user,
          &ident_set.center_basic_auth_pass,
          ident_set.center_timeout,
        )
        .context("can't build center client")?,
      );
      Ok((Arc::new(HttpTargetStore::new(center.clone())), Some(center)))
    },
  }
}

pub async fn run_server<ShutdownFuture: Future<Output = ()>>(
  config: Config,
  config_check_only: bool,
  shutdown: impl FnOnce() -> ShutdownFuture,
  shutdown_delay: Duration,
  hooks: impl ServerHooks,
) -> anyhow::Result<()> {
  let collector = Collector::default();
  let scope = collector.scope("n9e_pushgw");
  let time_provider: Arc<dyn TimeProvider> = Arc::new(RealTimeProvider {});
  let shutdown_trigger = ComponentShutdownTrigger::default();

  let targets = Arc::new(InMemoryTargetCache::default());
  targets.set(config.targets.iter().cloned().map(Target::from));
  let busi_groups = Arc::new(InMemoryBusiGroupCache::default());
  busi_groups.set(config.busi_groups.iter().cloned());
  info!(
    "loaded {} static targets and {} business groups",
    targets.len(),
    config.busi_groups.len()
  );

  let (store, center) = make_target_store(&config)?;
  let ident_set = Arc::new(IdentSet::new(
    &config.ident_set,
    store,
    time_provider.clone(),
  ));
  let ident_stats = Arc::new(IdentStats::new(&config.ident_stats, &scope));

  let pipeline = Pipeline::new(
    &config.pushgw,
    targets,
    busi_groups,
    ident_set.clone(),
    ident_stats.clone(),
    time_provider.clone(),
    &scope,
    shutdown_trigger.make_shutdown(),
  )?;

  if config_check_only {
    info!("--config-check-and-exit set, exiting");
    return Ok(());
  }

  let inflow = HttpInflow::new(
    HttpInflowOptions {
      basic_auth: config.basic_auth.clone(),
      datadog_accounts: config.datadog_accounts.clone(),
    },
    Arc::new(pipeline),
    Arc::new(HostMetaCache::default()),
    center,
    time_provider,
    &scope,
  );

  let listener = TcpListener::bind(&config.bind)
    .await
    .with_context(|| format!("can't bind ingest server to {}", config.bind))?;
  let ingest_addr = listener.local_addr()?;
  let ingest_shutdown = shutdown_trigger.make_shutdown();
  tokio::spawn(async move {
    if let Err(e) = inflow.spawn_server(listener, ingest_shutdown).await {
      log::error!("ingest server failed: {e}");
    }
  });

  let admin_addr = if let Some(admin) = &config.admin {
    let listener = TcpListener::bind(&admin.bind)
      .await
      .with_context(|| format!("can't bind admin server to {}", admin.bind))?;
    let admin_addr = listener.local_addr()?;
    let admin_state = AdminState::new(collector.clone());
    let admin_shutdown = shutdown_trigger.make_shutdown();
    tokio::spawn(async move {
      if let Err(e) = admin_state.spawn_server(listener, admin_shutdown).await {
        log::error!("admin server failed: {e}");
      }
    });
    Some(admin_addr)
  } else {
    None
  };

  ident_set.spawn_persister(shutdown_trigger.make_shutdown());
  ident_stats.spawn_reporter(shutdown_trigger.make_shutdown());
  info!("pushgw started in {:?} mode", config.mode);
  hooks
    .server_started(ServerStarted {
      collector,
      ingest_addr,
      admin_addr,
    })
    .await;

  shutdown().await;

  if !shutdown_delay.is_zero() {
    info!(
      "waiting {:?} before shutting down (--shutdown-delay set)",
      shutdown_delay
    );
    tokio::time::sleep(shutdown_delay).await;
  }
  shutdown_trigger.shutdown().await;
  info!("runtime terminated");
  Ok(())
}
