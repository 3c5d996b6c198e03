// pushgw - bitdrift's metrics ingestion gateway
// Copyright Bitdrift, Inc. All rights reserved.
//
// Use of this source code is governed by a source available license that can be found in the
// LICENSE file or at:
// https://polyformproject.org/wp-content/uploads/2020/06/PolyForm-Shield-1.0.0.txt

#[cfg(test)]
#[path = "./store_test.rs"]
mod store_test;

use crate::clients::center::{CenterClient, CenterError};
use crate::protos::n9e::TargetUpdate;
use async_trait::async_trait;
use http::header::CONTENT_TYPE;
use http::{HeaderMap, HeaderValue};
use itertools::Itertools;
use sqlx::AnyPool;
use sqlx::any::AnyPoolOptions;
use std::collections::HashSet;
use std::sync::Arc;

pub const TARGET_UPDATE_PATH: &str = "/v1/n9e/target-update";

#[derive(thiserror::Error, Debug)]
pub enum PersistError {
  #[error("database error: {0}")]
  Database(#[from] sqlx::Error),
  #[error("center error: {0}")]
  Center(#[from] CenterError),
  #[error("json error: {0}")]
  Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, PersistError>;

//
// TargetStore
//

/// Records that a batch of idents was alive at `now` (unix seconds).
#[mockall::automock]
#[async_trait]
pub trait TargetStore: Send + Sync {
  async fn touch(&self, idents: &[String], now: i64) -> Result<()>;
}

//
// DatabaseTargetStore
//

/// Center mode store writing `target(ident, update_at)`.
pub struct DatabaseTargetStore {
  pool: AnyPool,
  numbered_placeholders: bool,
}

impl DatabaseTargetStore {
  /// Connections are opened on first use.
  pub fn connect_lazy(database_url: &str, max_connections: u32) -> Result<Self> {
    sqlx::any::install_default_drivers();
    let pool = AnyPoolOptions::new()
      .max_connections(max_connections.max(1))
      .connect_lazy(database_url)?;
    Ok(Self::new(pool))
  }

  #[must_use]
  pub fn new(pool: AnyPool) -> Self {
    let numbered_placeholders = pool
      .connect_options()
      .database_url
      .scheme()
      .starts_with("postgres");
    Self {
      pool,
      numbered_placeholders,
    }
  }

  // Placeholders for binds `first ..= first + count - 1`.
  fn placeholders(&self, first: usize, count: usize) -> String {
    if self.numbered_placeholders {
      (first .. first + count).map(|i| format!("${i}")).join(", ")
    } else {
      std::iter::repeat_n("?", count).join(", ")
    }
  }

  async fn insert(&self, ident: &str, now: i64) -> Result<()> {
    let sql = format!(
      "INSERT INTO target(ident, update_at) VALUES({})",
      self.placeholders(1, 2)
    );
    sqlx::query(&sql)
      .bind(ident.to_string())
      .bind(now)
      .execute(&self.pool)
      .await?;
    Ok(())
  }
}

#[async_trait]
impl TargetStore for DatabaseTargetStore {
  async fn touch(&self, idents: &[String], now: i64) -> Result<()> {
    if idents.is_empty() {
      return Ok(());
    }

    let sql = format!(
      "UPDATE target SET update_at = {} WHERE ident IN ({})",
      self.placeholders(1, 1),
      self.placeholders(2, idents.len())
    );
    let mut query = sqlx::query(&sql).bind(now);
    for ident in idents {
      query = query.bind(ident.clone());
    }
    let updated = query.execute(&self.pool).await?.rows_affected();
    if usize::try_from(updated).is_ok_and(|updated| updated == idents.len()) {
      return Ok(());
    }

    let sql = format!(
      "SELECT ident FROM target WHERE ident IN ({})",
      self.placeholders(1, idents.len())
    );
    let mut query = sqlx::query_scalar::<_, String>(&sql);
    for ident in idents {
      query = query.bind(ident.clone());
    }
    let existing: HashSet<String> = query.fetch_all(&self.pool).await?.into_iter().collect();

    // Not transactional: a failed insert is logged and the rest of the batch continues.
    for ident in idents.iter().filter(|i| !existing.contains(*i)) {
      if let Err(e) = self.insert(ident, now).await {
        log::warn!("failed to insert target {ident}: {e}");
      }
    }
    Ok(())
  }
}

//
// HttpTargetStore
//

/// Edge mode store forwarding updates to the first center that accepts them.
pub struct HttpTargetStore {
  center: Arc<CenterClient>,
}

impl HttpTargetStore {
  #[must_use]
  pub const fn new(center: Arc<CenterClient>) -> Self {
    Self { center }
  }
}

#[async_trait]
impl TargetStore for HttpTargetStore {
  async fn touch(&self, idents: &[String], now: i64) -> Result<()> {
    if idents.is_empty() {
      return Ok(());
    }

    let body = serde_json::to_vec(&TargetUpdate {
      lst: idents.to_vec(),
      now,
    })?;
    let mut headers = HeaderMap::new();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    self
      .center
      .post(TARGET_UPDATE_PATH, headers, body.into())
      .await?;
    Ok(())
  }
}
