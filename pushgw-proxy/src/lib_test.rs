// pushgw - bitdrift's metrics ingestion gateway
// Copyright Bitdrift, Inc. All rights reserved.
//
// Use of this source code is governed by a source available license that can be found in the
// LICENSE file or at:
// https://polyformproject.org/wp-content/uploads/2020/06/PolyForm-Shield-1.0.0.txt

use super::*;
use crate::config::AdminConfig;
use axum::Router;
use axum::extract::State;
use bytes::Bytes;
use parking_lot::Mutex;
use prost::Message;
use pushgw_metrics::pipeline::config::WriterConfig;
use pushgw_protobuf::protos::prometheus::WriteRequest;
use sqlx::AnyPool;
use sqlx::any::AnyPoolOptions;
use std::time::SystemTime;
use tokio::sync::{mpsc, oneshot};

struct StartedHooks {
  tx: mpsc::Sender<ServerStarted>,
}

#[async_trait::async_trait]
impl ServerHooks for StartedHooks {
  async fn server_started(&self, started: ServerStarted) {
    self.tx.send(started).await.unwrap();
  }
}

type Received = Arc<Mutex<Vec<WriteRequest>>>;

async fn start_backend() -> (SocketAddr, Received) {
  async fn write(State(received): State<Received>, body: Bytes) {
    let decompressed = snap::raw::Decoder::new().decompress_vec(&body).unwrap();
    received
      .lock()
      .push(WriteRequest::decode(decompressed.as_slice()).unwrap());
  }

  let received = Received::default();
  let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
  let addr = listener.local_addr().unwrap();
  let router = Router::new()
    .route("/api/v1/write", axum::routing::post(write))
    .with_state(received.clone());
  tokio::spawn(async move { axum::serve(listener, router).await.unwrap() });
  (addr, received)
}

async fn make_database(dir: &tempfile::TempDir) -> (String, AnyPool) {
  sqlx::any::install_default_drivers();
  let url = format!("sqlite://{}?mode=rwc", dir.path().join("n9e.db").display());
  let pool = AnyPoolOptions::new()
    .max_connections(1)
    .connect(&url)
    .await
    .unwrap();
  sqlx::query("CREATE TABLE target(ident VARCHAR(191) PRIMARY KEY, update_at BIGINT NOT NULL)")
    .execute(&pool)
    .await
    .unwrap();
  (url, pool)
}

async fn wait_for<T>(mut check: impl FnMut() -> Option<T>) -> T {
  for _ in 0 .. 200 {
    if let Some(value) = check() {
      return value;
    }
    tokio::time::sleep(Duration::from_millis(50)).await;
  }
  panic!("condition not reached in time");
}

#[tokio::test(flavor = "multi_thread")]
async fn opentsdb_end_to_end() {
  let dir = tempfile::tempdir().unwrap();
  let (database_url, pool) = make_database(&dir).await;
  let (backend, received) = start_backend().await;

  let mut config = Config {
    bind: "127.0.0.1:0".to_string(),
    admin: Some(AdminConfig {
      bind: "127.0.0.1:0".to_string(),
    }),
    ..Default::default()
  };
  config.ident_set.database_url = database_url;
  config.ident_set.persist_interval = Duration::from_millis(100);
  config.pushgw.writers.push(WriterConfig {
    url: format!("http://{backend}/api/v1/write"),
    ..Default::default()
  });

  let (started_tx, mut started_rx) = mpsc::channel(1);
  let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
  let server = tokio::spawn(run_server(
    config,
    false,
    || async move {
      let _ = shutdown_rx.await;
    },
    Duration::ZERO,
    StartedHooks { tx: started_tx },
  ));
  let started = started_rx.recv().await.unwrap();

  let now = SystemTime::now()
    .duration_since(SystemTime::UNIX_EPOCH)
    .unwrap()
    .as_secs();
  let client = reqwest::Client::new();
  let response = client
    .post(format!("http://{}/opentsdb/put", started.ingest_addr))
    .body(format!(
      r#"[{{"metric":"cpu_idle","timestamp":{now},"value":97.5,"tags":{{"host":"web01"}}}}]"#
    ))
    .send()
    .await
    .unwrap();
  assert_eq!(200, response.status().as_u16());
  let reply = response.text().await.unwrap();
  assert!(reply.contains(r#""succ":1"#), "{reply}");

  let series = wait_for(|| received.lock().first().map(|w| w.timeseries.clone())).await;
  assert_eq!(1, series.len());
  assert!(
    series[0]
      .labels
      .iter()
      .any(|l| l.name == "ident" && l.value == "web01")
  );
  assert_eq!(97.5, series[0].samples[0].value);

  let mut persisted = None;
  for _ in 0 .. 200 {
    let rows: Vec<(String,)> = sqlx::query_as("SELECT ident FROM target")
      .fetch_all(&pool)
      .await
      .unwrap();
    if !rows.is_empty() {
      persisted = Some(rows);
      break;
    }
    tokio::time::sleep(Duration::from_millis(50)).await;
  }
  assert_eq!(Some(vec![("web01".to_string(),)]), persisted);

  let metrics = client
    .get(format!("http://{}/metrics", started.admin_addr.unwrap()))
    .send()
    .await
    .unwrap()
    .text()
    .await
    .unwrap();
  assert!(
    metrics.contains("n9e_pushgw_samples_received_total{channel=\"opentsdb\"} 1"),
    "{metrics}"
  );

  shutdown_tx.send(()).unwrap();
  server.await.unwrap().unwrap();
}

#[tokio::test]
async fn config_check_only_does_not_bind() {
  let mut config = Config {
    // An address that can't be bound proves nothing was.
    bind: "256.0.0.1:1".to_string(),
    ..Default::default()
  };
  config.ident_set.database_url = "sqlite::memory:".to_string();
  run_server(
    config,
    true,
    || async {},
    Duration::ZERO,
    StartedHooks {
      tx: mpsc::channel(1).0,
    },
  )
  .await
  .unwrap();
}

#[tokio::test]
async fn invalid_relabel_fails_startup() {
  let mut config = Config::default();
  config.ident_set.database_url = "sqlite::memory:".to_string();
  config.pushgw.relabels = vec![pushgw_metrics::relabel::RelabelConfig {
    regex: Some("(".to_string()),
    ..Default::default()
  }];
  assert!(
    run_server(
      config,
      true,
      || async {},
      Duration::ZERO,
      StartedHooks {
        tx: mpsc::channel(1).0,
      },
    )
    .await
    .is_err()
  );
}
