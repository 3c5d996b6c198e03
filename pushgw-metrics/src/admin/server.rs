// pushgw - bitdrift's metrics ingestion gateway
// Copyright Bitdrift, Inc. All rights reserved.
//
// Use of this source code is governed by a source available license that can be found in the
// LICENSE file or at:
// https://polyformproject.org/wp-content/uploads/2020/06/PolyForm-Shield-1.0.0.txt

#[cfg(test)]
#[path = "./server_test.rs"]
mod server_test;

use super::stats::Collector;
use axum::Router;
use axum::extract::{Query, State};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use log::info;
use pushgw_common::logging;
use pushgw_common::shutdown::ComponentShutdown;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::net::TcpListener;

//
// AdminState
//

pub struct AdminState {
  collector: Collector,
}

impl AdminState {
  #[must_use]
  pub fn new(collector: Collector) -> Arc<Self> {
    Arc::new(Self { collector })
  }

  #[allow(clippy::unused_async)]
  async fn metrics(State(state): State<Arc<Self>>) -> Response {
    (
      [(axum::http::header::CONTENT_TYPE, prometheus::TEXT_FORMAT)],
      state.collector.prometheus_output(),
    )
      .into_response()
  }

  #[allow(clippy::unused_async)]
  async fn root() -> String {
    "pushgw admin server".to_string()
  }

  #[allow(clippy::unused_async)]
  async fn healthcheck() -> String {
    "OK".to_string()
  }

  #[allow(clippy::unused_async)]
  async fn log_filter(Query(mut params): Query<HashMap<String, String>>) -> String {
    let Some(filter) = params.remove("filter") else {
      return "usage: /log_filter?filter=RUST_LOG".to_string();
    };
    log::info!("updating log filter: {filter}");
    if let Err(e) = logging::swap_filter(&filter) {
      log::warn!("error updating log filter: {e}");
      return format!("error: {e}");
    }

    "OK".to_string()
  }

  pub(crate) fn make_router(self: Arc<Self>) -> Router {
    Router::new()
      .route("/", get(Self::root))
      .route("/healthcheck", get(Self::healthcheck))
      .route("/log_filter", post(Self::log_filter))
      .route("/metrics", get(Self::metrics))
      .with_state(self)
  }

  pub async fn spawn_server(
    self: Arc<Self>,
    listener: TcpListener,
    mut shutdown: ComponentShutdown,
  ) -> anyhow::Result<()> {
    let router = self.make_router();
    info!("admin server starting on: {}", listener.local_addr()?);
    axum::serve(listener, router)
      .with_graceful_shutdown(async move { shutdown.cancelled().await })
      .await?;
    Ok(())
  }
}
