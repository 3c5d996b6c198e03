// pushgw - bitdrift's metrics ingestion gateway
// Copyright Bitdrift, Inc. All rights reserved.
//
// Use of this source code is governed by a source available license that can be found in the
// LICENSE file or at:
// https://polyformproject.org/wp-content/uploads/2020/06/PolyForm-Shield-1.0.0.txt

#[cfg(test)]
#[path = "./http_inflow_test.rs"]
mod http_inflow_test;

use super::decode::{
  MAX_ALLOWED_REQUEST_SIZE,
  check_basic_auth,
  decode_body,
  decode_write_request,
};
use crate::admin::stats::Scope;
use crate::clients::center::CenterClient;
use crate::idents::HostMetaCache;
use crate::pipeline::time::TimeProvider;
use crate::pipeline::{Channel, PipelineDispatch};
use crate::protos::n9e::{HostMeta, IngestReply, Reply, TargetUpdate};
use crate::protos::sample::ParseResult;
use crate::protos::{datadog, openfalcon, opentsdb, prom};
use axum::extract::{DefaultBodyLimit, MatchedPath, Query, Request, State};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use bytes::Bytes;
use http::header::{CONTENT_ENCODING, CONTENT_TYPE};
use http::{HeaderMap, StatusCode};
use log::info;
use prometheus::IntCounterVec;
use pushgw_common::shutdown::ComponentShutdown;
use pushgw_common::warn_every;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use time::ext::NumericalDuration;
use tokio::net::TcpListener;

pub const HEARTBEAT_PATH: &str = "/v1/n9e/heartbeat";

type JsonParser = fn(&[u8], i64) -> Result<ParseResult, serde_json::Error>;

//
// Stats
//

struct Stats {
  http_requests_total: IntCounterVec,
}

impl Stats {
  fn new(scope: &Scope) -> Self {
    Self {
      http_requests_total: scope.counter_vec("http_requests_total", &["path", "code"]),
    }
  }
}

//
// HttpInflowOptions
//

#[derive(Clone, Debug, Default)]
pub struct HttpInflowOptions {
  /// user -> password. Empty disables basic auth.
  pub basic_auth: BTreeMap<String, String>,
  /// Accepted Datadog api keys. Empty accepts any key.
  pub datadog_accounts: Vec<String>,
}

#[derive(Deserialize)]
struct DatadogQuery {
  api_key: Option<String>,
}

//
// HttpInflow
//

/// The ingest HTTP server. Protocol bodies are decoded here and handed to the pipeline; the n9e
/// endpoints mark idents alive directly.
pub struct HttpInflow {
  options: HttpInflowOptions,
  dispatch: Arc<dyn PipelineDispatch>,
  host_meta: Arc<HostMetaCache>,
  // Set in edge mode, where heartbeats belong to the center.
  center: Option<Arc<CenterClient>>,
  time_provider: Arc<dyn TimeProvider>,
  stats: Stats,
}

impl HttpInflow {
  pub fn new(
    options: HttpInflowOptions,
    dispatch: Arc<dyn PipelineDispatch>,
    host_meta: Arc<HostMetaCache>,
    center: Option<Arc<CenterClient>>,
    time_provider: Arc<dyn TimeProvider>,
    scope: &Scope,
  ) -> Arc<Self> {
    Arc::new(Self {
      options,
      dispatch,
      host_meta,
      center,
      time_provider,
      stats: Stats::new(scope),
    })
  }

  pub(crate) fn make_router(self: Arc<Self>) -> Router {
    let authenticated = Router::new()
      .route("/opentsdb/put", post(Self::opentsdb_put))
      .route("/openfalcon/push", post(Self::openfalcon_push))
      .route("/prometheus/v1/write", post(Self::prometheus_write))
      .route("/v1/n9e/target-update", post(Self::target_update))
      .route(HEARTBEAT_PATH, post(Self::heartbeat))
      .route_layer(middleware::from_fn_with_state(
        self.clone(),
        Self::basic_auth,
      ));

    let datadog = Router::new()
      .route("/datadog/api/v1/series", post(Self::datadog_series))
      .route("/datadog/api/v1/check_run", post(Self::datadog_accepted))
      .route("/datadog/intake/", post(Self::datadog_accepted))
      .route("/datadog/api/v1/metadata", post(Self::datadog_accepted))
      .route(
        "/datadog/api/v1/validate",
        post(Self::datadog_validate).get(Self::datadog_validate),
      )
      .route_layer(middleware::from_fn_with_state(
        self.clone(),
        Self::datadog_api_key,
      ));

    authenticated
      .merge(datadog)
      .layer(DefaultBodyLimit::max(MAX_ALLOWED_REQUEST_SIZE))
      .layer(middleware::from_fn_with_state(
        self.clone(),
        Self::track_requests,
      ))
      .with_state(self)
  }

  pub async fn spawn_server(
    self: Arc<Self>,
    listener: TcpListener,
    mut shutdown: ComponentShutdown,
  ) -> anyhow::Result<()> {
    let router = self.make_router();
    info!("ingest server starting on: {}", listener.local_addr()?);
    axum::serve(listener, router)
      .with_graceful_shutdown(async move { shutdown.cancelled().await })
      .await?;
    Ok(())
  }

  //
  // Middleware
  //

  async fn track_requests(State(state): State<Arc<Self>>, request: Request, next: Next) -> Response {
    let path = request
      .extensions()
      .get::<MatchedPath>()
      .map_or_else(|| "unknown".to_string(), |p| p.as_str().to_string());
    let response = next.run(request).await;
    state
      .stats
      .http_requests_total
      .with_label_values(&[path.as_str(), response.status().as_str()])
      .inc();
    response
  }

  async fn basic_auth(State(state): State<Arc<Self>>, request: Request, next: Next) -> Response {
    if !check_basic_auth(request.headers(), &state.options.basic_auth) {
      return (
        StatusCode::UNAUTHORIZED,
        [(http::header::WWW_AUTHENTICATE, "Basic realm=\"pushgw\"")],
        "unauthorized",
      )
        .into_response();
    }
    next.run(request).await
  }

  async fn datadog_api_key(
    State(state): State<Arc<Self>>,
    Query(query): Query<DatadogQuery>,
    request: Request,
    next: Next,
  ) -> Response {
    if !state.options.datadog_accounts.is_empty() {
      let api_key = query.api_key.or_else(|| {
        request
          .headers()
          .get("dd-api-key")
          .and_then(|v| v.to_str().ok())
          .map(ToString::to_string)
      });
      if !api_key.is_some_and(|key| state.options.datadog_accounts.contains(&key)) {
        return (StatusCode::FORBIDDEN, "invalid api_key").into_response();
      }
    }
    next.run(request).await
  }

  //
  // Sample endpoints
  //

  fn bad_request(channel: Channel, error: &impl std::fmt::Display) -> Response {
    warn_every!(1.minutes(), "failed to decode {} request: {}", channel, error);
    (StatusCode::BAD_REQUEST, error.to_string()).into_response()
  }

  fn forward(&self, channel: Channel, result: ParseResult) -> IngestReply {
    let reply = IngestReply {
      succ: result.series.len(),
      fail: result.fail,
      msg: result.message(),
    };
    if reply.fail > 0 {
      warn_every!(
        1.minutes(),
        "{} request had {} invalid samples: {}",
        channel,
        reply.fail,
        reply.msg
      );
    }
    self.dispatch.forward(channel, result.series, result.idents);
    reply
  }

  fn json_samples(&self, channel: Channel, headers: &HeaderMap, body: Bytes, parse: JsonParser) -> Response {
    let body = match decode_body(headers, body) {
      Ok(body) => body,
      Err(e) => return Self::bad_request(channel, &e),
    };
    match parse(&body, self.time_provider.unix_now()) {
      Ok(result) => Json(self.forward(channel, result)).into_response(),
      Err(e) => Self::bad_request(channel, &e),
    }
  }

  #[allow(clippy::unused_async)]
  async fn opentsdb_put(State(state): State<Arc<Self>>, headers: HeaderMap, body: Bytes) -> Response {
    state.json_samples(Channel::OpenTsdb, &headers, body, opentsdb::parse)
  }

  #[allow(clippy::unused_async)]
  async fn openfalcon_push(State(state): State<Arc<Self>>, headers: HeaderMap, body: Bytes) -> Response {
    state.json_samples(Channel::OpenFalcon, &headers, body, openfalcon::parse)
  }

  #[allow(clippy::unused_async)]
  async fn datadog_series(State(state): State<Arc<Self>>, headers: HeaderMap, body: Bytes) -> Response {
    state.json_samples(Channel::Datadog, &headers, body, datadog::parse)
  }

  #[allow(clippy::unused_async)]
  async fn prometheus_write(State(state): State<Arc<Self>>, headers: HeaderMap, body: Bytes) -> Response {
    match decode_write_request(&headers, &body) {
      Ok(write_request) => {
        state.forward(Channel::Prometheus, prom::from_write_request(write_request));
        StatusCode::OK.into_response()
      },
      Err(e) => Self::bad_request(Channel::Prometheus, &e),
    }
  }

  #[allow(clippy::unused_async)]
  async fn datadog_accepted() -> Response {
    (StatusCode::ACCEPTED, Json(serde_json::json!({"status": "ok"}))).into_response()
  }

  #[allow(clippy::unused_async)]
  async fn datadog_validate() -> Response {
    Json(serde_json::json!({"valid": true})).into_response()
  }

  //
  // n9e endpoints
  //

  fn decode_json<T: serde::de::DeserializeOwned>(headers: &HeaderMap, body: Bytes) -> Result<T, Response> {
    let body = decode_body(headers, body)
      .map_err(|e| (StatusCode::BAD_REQUEST, Json(Reply::error(e))).into_response())?;
    serde_json::from_slice(&body)
      .map_err(|e| (StatusCode::BAD_REQUEST, Json(Reply::error(e))).into_response())
  }

  #[allow(clippy::unused_async)]
  async fn target_update(State(state): State<Arc<Self>>, headers: HeaderMap, body: Bytes) -> Response {
    let update: TargetUpdate = match Self::decode_json(&headers, body) {
      Ok(update) => update,
      Err(response) => return response,
    };
    log::debug!("target update of {} idents", update.lst.len());
    state.dispatch.touch_idents(update.lst);
    Json(Reply::ok()).into_response()
  }

  async fn heartbeat(State(state): State<Arc<Self>>, headers: HeaderMap, body: Bytes) -> Response {
    if let Some(center) = &state.center {
      return Self::forward_heartbeat(center, &headers, body).await;
    }

    let meta: HostMeta = match Self::decode_json(&headers, body) {
      Ok(meta) => meta,
      Err(response) => return response,
    };
    if meta.hostname.is_empty() {
      return (
        StatusCode::BAD_REQUEST,
        Json(Reply::error("hostname is blank")),
      )
        .into_response();
    }
    state.dispatch.touch_idents(vec![meta.hostname.clone()]);
    state.host_meta.set(meta);
    Json(Reply::ok()).into_response()
  }

  async fn forward_heartbeat(center: &CenterClient, headers: &HeaderMap, body: Bytes) -> Response {
    let mut forwarded = HeaderMap::new();
    for name in [CONTENT_TYPE, CONTENT_ENCODING] {
      if let Some(value) = headers.get(&name) {
        forwarded.insert(name, value.clone());
      }
    }

    match center.post(HEARTBEAT_PATH, forwarded, body).await {
      Ok((status, reply)) => (
        status,
        [(CONTENT_TYPE, "application/json; charset=utf-8")],
        reply,
      )
        .into_response(),
      Err(e) => (StatusCode::BAD_GATEWAY, Json(Reply::error(e))).into_response(),
    }
  }
}
