// pushgw - bitdrift's metrics ingestion gateway
// Copyright Bitdrift, Inc. All rights reserved.
//
// Use of this source code is governed by a source available license that can be found in the
// LICENSE file or at:
// https://polyformproject.org/wp-content/uploads/2020/06/PolyForm-Shield-1.0.0.txt

use super::{DatabaseTargetStore, HttpTargetStore, PersistError, TARGET_UPDATE_PATH, TargetStore};
use crate::clients::center::{CenterClient, CenterError};
use crate::protos::n9e::TargetUpdate;
use crate::test::TestHttpServer;
use http::StatusCode;
use pretty_assertions::assert_eq;
use sqlx::AnyPool;
use sqlx::any::AnyPoolOptions;
use std::sync::Arc;
use std::time::Duration;

async fn make_pool() -> AnyPool {
  sqlx::any::install_default_drivers();
  let pool = AnyPoolOptions::new()
    .max_connections(1)
    .connect("sqlite::memory:")
    .await
    .unwrap();
  sqlx::query("CREATE TABLE target(ident VARCHAR(191) PRIMARY KEY, update_at BIGINT NOT NULL)")
    .execute(&pool)
    .await
    .unwrap();
  pool
}

async fn targets(pool: &AnyPool) -> Vec<(String, i64)> {
  sqlx::query_as("SELECT ident, update_at FROM target ORDER BY ident")
    .fetch_all(pool)
    .await
    .unwrap()
}

fn idents(items: &[&str]) -> Vec<String> {
  items.iter().map(ToString::to_string).collect()
}

#[tokio::test]
async fn database_updates_and_inserts() {
  let pool = make_pool().await;
  sqlx::query("INSERT INTO target(ident, update_at) VALUES('a', 1)")
    .execute(&pool)
    .await
    .unwrap();

  let store = DatabaseTargetStore::new(pool.clone());
  store.touch(&idents(&["a", "b", "c"]), 100).await.unwrap();
  assert_eq!(
    vec![
      ("a".to_string(), 100),
      ("b".to_string(), 100),
      ("c".to_string(), 100)
    ],
    targets(&pool).await
  );

  // Everything exists now so only the update runs.
  store.touch(&idents(&["a", "c"]), 200).await.unwrap();
  assert_eq!(
    vec![
      ("a".to_string(), 200),
      ("b".to_string(), 100),
      ("c".to_string(), 200)
    ],
    targets(&pool).await
  );

  store.touch(&[], 300).await.unwrap();
}

#[tokio::test]
async fn database_errors_propagate() {
  sqlx::any::install_default_drivers();
  let pool = AnyPoolOptions::new()
    .max_connections(1)
    .connect("sqlite::memory:")
    .await
    .unwrap();
  let store = DatabaseTargetStore::new(pool);
  assert!(matches!(
    store.touch(&idents(&["a"]), 1).await,
    Err(PersistError::Database(_))
  ));
}

#[tokio::test]
async fn http_falls_through_centers() {
  let failing = TestHttpServer::start(vec![(StatusCode::INTERNAL_SERVER_ERROR, "boom")]).await;
  let working = TestHttpServer::start(vec![]).await;
  let unused = TestHttpServer::start(vec![]).await;
  let store = HttpTargetStore::new(Arc::new(
    CenterClient::new(
      &[failing.url(""), working.url("/"), unused.url("")],
      "user",
      "pass",
      Duration::from_secs(5),
    )
    .unwrap(),
  ));

  store.touch(&idents(&["h1", "h2"]), 1_700_000_000).await.unwrap();

  assert_eq!(1, failing.requests().len());
  let requests = working.requests();
  assert_eq!(1, requests.len());
  assert_eq!(TARGET_UPDATE_PATH, requests[0].path);
  assert!(requests[0].headers.contains_key(http::header::AUTHORIZATION));
  let update: TargetUpdate = serde_json::from_slice(&requests[0].body).unwrap();
  assert_eq!(
    TargetUpdate {
      lst: idents(&["h1", "h2"]),
      now: 1_700_000_000,
    },
    update
  );
  assert!(unused.requests().is_empty());
}

#[tokio::test]
async fn http_all_centers_fail() {
  let failing = TestHttpServer::start(vec![(StatusCode::BAD_GATEWAY, "")]).await;
  let store = HttpTargetStore::new(Arc::new(
    CenterClient::new(&[failing.url("")], "", "", Duration::from_secs(5)).unwrap(),
  ));
  assert!(matches!(
    store.touch(&idents(&["h1"]), 1).await,
    Err(PersistError::Center(CenterError::AllCentersFailed))
  ));
  assert_eq!(1, failing.requests().len());
}

#[tokio::test]
async fn connect_lazy() {
  assert!(DatabaseTargetStore::connect_lazy("sqlite::memory:", 1).is_ok());
  assert!(matches!(
    DatabaseTargetStore::connect_lazy("nosuchdb://localhost/db", 1),
    Err(PersistError::Database(_))
  ));
}
