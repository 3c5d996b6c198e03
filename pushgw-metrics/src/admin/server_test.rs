// pushgw - bitdrift's metrics ingestion gateway
// Copyright Bitdrift, Inc. All rights reserved.
//
// Use of this source code is governed by a source available license that can be found in the
// LICENSE file or at:
// https://polyformproject.org/wp-content/uploads/2020/06/PolyForm-Shield-1.0.0.txt

use super::*;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use http_body_util::BodyExt;
use tower::ServiceExt;

async fn call(router: Router, method: &str, uri: &str) -> (StatusCode, String) {
  let response = router
    .oneshot(
      Request::builder()
        .method(method)
        .uri(uri)
        .body(Body::empty())
        .unwrap(),
    )
    .await
    .unwrap();
  let status = response.status();
  let body = response.into_body().collect().await.unwrap().to_bytes();
  (status, String::from_utf8(body.to_vec()).unwrap())
}

#[tokio::test]
async fn metrics_endpoint() {
  let collector = Collector::default();
  collector
    .scope("n9e_pushgw")
    .counter_vec("samples_received_total", &["channel"])
    .with_label_values(&["opentsdb"])
    .inc_by(4);
  let router = AdminState::new(collector).make_router();

  let (status, body) = call(router.clone(), "GET", "/metrics").await;
  assert_eq!(StatusCode::OK, status);
  assert!(body.contains("n9e_pushgw_samples_received_total{channel=\"opentsdb\"} 4"));

  let (status, body) = call(router, "GET", "/healthcheck").await;
  assert_eq!(StatusCode::OK, status);
  assert_eq!("OK", body);
}

#[tokio::test]
async fn log_filter_usage() {
  let router = AdminState::new(Collector::default()).make_router();
  let (_, body) = call(router.clone(), "POST", "/log_filter").await;
  assert_eq!("usage: /log_filter?filter=RUST_LOG", body);
  let (_, body) = call(router, "POST", "/log_filter?filter=info").await;
  assert_eq!("OK", body);
}
