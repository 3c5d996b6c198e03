// pushgw - bitdrift's metrics ingestion gateway
// Copyright Bitdrift, Inc. All rights reserved.
//
// Use of this source code is governed by a source available license that can be found in the
// LICENSE file or at:
// https://polyformproject.org/wp-content/uploads/2020/06/PolyForm-Shield-1.0.0.txt

use crate::admin::stats::Collector;
use crate::protos::sample::METRIC_NAME_LABEL;
use axum::Router;
use axum::extract::State;
use bytes::Bytes;
use http::{HeaderMap, StatusCode, Uri};
use parking_lot::Mutex;
use prost::Message;
use pushgw_protobuf::protos::prometheus::{Label, Sample, TimeSeries, WriteRequest};
use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

#[must_use]
pub fn make_labels(labels: &[(&str, &str)]) -> Vec<Label> {
  labels
    .iter()
    .map(|(name, value)| Label::new(*name, *value))
    .collect()
}

/// A single sample series with `__name__` first followed by `tags` in the given order.
#[must_use]
pub fn make_timeseries(name: &str, tags: &[(&str, &str)], timestamp: i64, value: f64) -> TimeSeries {
  let mut labels = vec![Label::new(METRIC_NAME_LABEL, name)];
  labels.extend(make_labels(tags));
  TimeSeries {
    labels,
    samples: vec![Sample::new(timestamp, value)],
  }
}

/// Labels of a series as owned pairs sorted by name.
#[must_use]
pub fn label_pairs(series: &TimeSeries) -> Vec<(String, String)> {
  let mut pairs: Vec<_> = series
    .labels
    .iter()
    .map(|l| (l.name.clone(), l.value.clone()))
    .collect();
  pairs.sort();
  pairs
}

//
// StatsHelper
//

/// Wraps a private `Collector` and reads values back out of it.
#[derive(Default)]
pub struct StatsHelper {
  collector: Collector,
}

impl StatsHelper {
  #[must_use]
  pub const fn collector(&self) -> &Collector {
    &self.collector
  }

  fn find(&self, name: &str, labels: &[(&str, &str)]) -> Option<prometheus::proto::Metric> {
    self
      .collector
      .gather()
      .into_iter()
      .filter(|mf| mf.name() == name)
      .flat_map(|mf| mf.get_metric().to_vec())
      .find(|m| {
        let mut actual: Vec<_> = m.get_label().iter().map(|l| (l.name(), l.value())).collect();
        actual.sort_unstable();
        let mut expected = labels.to_vec();
        expected.sort_unstable();
        actual == expected
      })
  }

  #[must_use]
  pub fn counter_value(&self, name: &str, labels: &[(&str, &str)]) -> Option<u64> {
    self
      .find(name, labels)
      .map(|m| m.get_counter().value().round() as u64)
  }

  #[must_use]
  pub fn gauge_value(&self, name: &str, labels: &[(&str, &str)]) -> Option<i64> {
    self
      .find(name, labels)
      .map(|m| m.get_gauge().value().round() as i64)
  }

  #[track_caller]
  pub fn assert_counter_eq(&self, value: u64, name: &str, labels: &[(&str, &str)]) {
    assert_eq!(
      Some(value),
      self.counter_value(name, labels),
      "counter {name} {labels:?}"
    );
  }

  #[track_caller]
  pub fn assert_gauge_eq(&self, value: i64, name: &str, labels: &[(&str, &str)]) {
    assert_eq!(
      Some(value),
      self.gauge_value(name, labels),
      "gauge {name} {labels:?}"
    );
  }
}

#[must_use]
pub fn decode_write_request(body: &[u8]) -> WriteRequest {
  let decompressed = snap::raw::Decoder::new().decompress_vec(body).unwrap();
  WriteRequest::decode(decompressed.as_slice()).unwrap()
}

//
// TestHttpServer
//

#[derive(Clone, Debug)]
pub struct RecordedRequest {
  pub path: String,
  pub headers: HeaderMap,
  pub body: Bytes,
}

#[derive(Default)]
struct TestHttpServerState {
  requests: Vec<RecordedRequest>,
  responses: VecDeque<(StatusCode, String)>,
}

/// Local HTTP server that records every request and answers with queued responses, falling back
/// to an empty 200 once the queue is empty.
pub struct TestHttpServer {
  addr: SocketAddr,
  state: Arc<Mutex<TestHttpServerState>>,
  handle: JoinHandle<()>,
}

impl TestHttpServer {
  pub async fn start(responses: Vec<(StatusCode, &str)>) -> Self {
    async fn record(
      State(state): State<Arc<Mutex<TestHttpServerState>>>,
      uri: Uri,
      headers: HeaderMap,
      body: Bytes,
    ) -> (StatusCode, String) {
      let mut state = state.lock();
      state.requests.push(RecordedRequest {
        path: uri.path().to_string(),
        headers,
        body,
      });
      state
        .responses
        .pop_front()
        .unwrap_or((StatusCode::OK, String::new()))
    }

    let state = Arc::new(Mutex::new(TestHttpServerState {
      requests: Vec::new(),
      responses: responses
        .into_iter()
        .map(|(status, body)| (status, body.to_string()))
        .collect(),
    }));
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let router = Router::new().fallback(record).with_state(state.clone());
    let handle = tokio::spawn(async move {
      axum::serve(listener, router).await.unwrap();
    });
    Self {
      addr,
      state,
      handle,
    }
  }

  #[must_use]
  pub fn url(&self, path: &str) -> String {
    format!("http://{}{path}", self.addr)
  }

  #[must_use]
  pub fn requests(&self) -> Vec<RecordedRequest> {
    self.state.lock().requests.clone()
  }
}

impl Drop for TestHttpServer {
  fn drop(&mut self) {
    self.handle.abort();
  }
}
