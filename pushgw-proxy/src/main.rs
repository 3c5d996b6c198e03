// pushgw - bitdrift's metrics ingestion gateway
// Copyright Bitdrift, Inc. All rights reserved.
//
// Use of this source code is governed by a source available license that can be found in the
// LICENSE file or at:
// https://polyformproject.org/wp-content/uploads/2020/06/PolyForm-Shield-1.0.0.txt

use anyhow::Context;
use clap::Parser;
use log::info;
use pushgw_common::{PanicMode, global_initialize_with};
use pushgw_proxy::{ServerHooks, ServerStarted, run_server};
use std::num::NonZeroUsize;
use std::path::PathBuf;
use tikv_jemallocator::Jemalloc;
use tokio::select;
use tokio::signal::unix::{SignalKind, signal};
use tokio::time::Duration;

#[global_allocator]
static GLOBAL: Jemalloc = Jemalloc;

#[derive(Parser, Debug, Clone)]
struct Options {
  #[arg(short = 'c', long = "config", default_value = "etc/pushgw.yaml")]
  pub config: PathBuf,

  #[arg(long = "config-check-and-exit")]
  pub config_check: bool,

  #[arg(long = "version")]
  pub version: bool,

  /// Seconds to keep serving after a shutdown signal before draining.
  #[arg(long = "shutdown-delay", default_value = "0")]
  pub shutdown_delay: u32,
}

struct NullHooks {}

#[async_trait::async_trait]
impl ServerHooks for NullHooks {
  async fn server_started(&self, _started: ServerStarted) {}
}

async fn wait_for_signal() {
  let (mut sigint, mut sigterm) = match (
    signal(SignalKind::interrupt()),
    signal(SignalKind::terminate()),
  ) {
    (Ok(sigint), Ok(sigterm)) => (sigint, sigterm),
    (Err(e), _) | (_, Err(e)) => {
      log::error!("can't install signal handlers, waiting on ctrl+c only: {e}");
      if let Err(e) = tokio::signal::ctrl_c().await {
        log::error!("ctrl+c handler failed: {e}");
      }
      return;
    },
  };
  select! {
    _ = sigint.recv() => info!("received sigint"),
    _ = sigterm.recv() => info!("received sigterm"),
  }
}

fn main() -> anyhow::Result<()> {
  global_initialize_with(PanicMode::ForceAbort);
  let opts = Options::parse();

  if opts.version {
    println!("pushgw: {}", env!("CARGO_PKG_VERSION"));
    return Ok(());
  }
  info!("pushgw loading: {}", env!("CARGO_PKG_VERSION"));

  let config = pushgw_proxy::config::load_from_file(&opts.config)
    .with_context(|| format!("can't load config file from {}", opts.config.display()))?;
  info!("loaded config file {}", opts.config.display());

  let num_threads = std::thread::available_parallelism().unwrap_or_else(|_| {
    log::warn!("could not determine number of CPUs. Defaulting to 1");
    NonZeroUsize::MIN
  });
  info!("running server with {num_threads} workers");
  let runtime = tokio::runtime::Builder::new_multi_thread()
    .worker_threads(num_threads.into())
    .enable_all()
    .build()
    .context("can't build tokio runtime")?;

  runtime.block_on(run_server(
    config,
    opts.config_check,
    wait_for_signal,
    Duration::from_secs(opts.shutdown_delay.into()),
    NullHooks {},
  ))
}
