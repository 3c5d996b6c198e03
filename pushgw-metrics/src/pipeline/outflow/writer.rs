// pushgw - bitdrift's metrics ingestion gateway
// Copyright Bitdrift, Inc. All rights reserved.
//
// Use of this source code is governed by a source available license that can be found in the
// LICENSE file or at:
// https://polyformproject.org/wp-content/uploads/2020/06/PolyForm-Shield-1.0.0.txt

#[cfg(test)]
#[path = "./writer_test.rs"]
mod writer_test;

use crate::admin::stats::Scope;
use crate::clients::prom::{
  PromRemoteWriteClient,
  PromRemoteWriteError,
  ReqwestPromRemoteWriteClient,
  compress_write_request,
};
use crate::pipeline::config::{WriterConfig, WriterOptions};
use crate::pipeline::time::TimeProvider;
use crate::relabel::{RelabelError, RelabelRule, relabel_series};
use async_trait::async_trait;
use bytes::Bytes;
use http::HeaderMap;
use prometheus::{Histogram, IntCounter};
use pushgw_common::warn_every;
use pushgw_protobuf::protos::prometheus::{TimeSeries, WriteRequest};
use std::sync::Arc;
use std::time::Duration;
use time::ext::NumericalDuration;

// Number of series logged when a backend rejects a batch.
const MAX_REJECTED_EXAMPLES: usize = 5;

#[derive(thiserror::Error, Debug)]
pub enum WriterError {
  #[error("client error: {0}")]
  Client(#[from] PromRemoteWriteError),
  #[error("write relabel error: {0}")]
  Relabel(#[from] RelabelError),
}

pub type Result<T> = std::result::Result<T, WriterError>;

//
// Writer
//

/// A backend that receives every batch popped from every queue.
#[allow(clippy::ref_option_ref)] // Spurious
#[mockall::automock]
#[async_trait]
pub trait Writer: Send + Sync {
  async fn write<'a>(&self, key: &str, batch: Vec<TimeSeries>, extra_headers: Option<&'a HeaderMap>);
}

//
// WriterStats
//

struct WriterStats {
  write_total: IntCounter,
  write_error_total: IntCounter,
  forward_duration: Histogram,
}

impl WriterStats {
  fn new(scope: &Scope, url: &str) -> Self {
    Self {
      write_total: scope
        .counter_vec("write_total", &["url"])
        .with_label_values(&[url]),
      write_error_total: scope
        .counter_vec("write_error_total", &["url"])
        .with_label_values(&[url]),
      forward_duration: scope
        .histogram_vec("forward_duration_seconds", &["url"])
        .with_label_values(&[url]),
    }
  }
}

//
// RemoteWriteWriter
//

pub struct RemoteWriteWriter {
  url: String,
  client: Arc<dyn PromRemoteWriteClient>,
  relabels: Vec<RelabelRule>,
  force_use_server_ts: bool,
  retry_count: u32,
  retry_interval: Duration,
  time_provider: Arc<dyn TimeProvider>,
  stats: WriterStats,
}

impl RemoteWriteWriter {
  pub fn new(
    config: &WriterConfig,
    options: &WriterOptions,
    force_use_server_ts: bool,
    time_provider: Arc<dyn TimeProvider>,
    scope: &Scope,
  ) -> Result<Self> {
    let client = Arc::new(ReqwestPromRemoteWriteClient::new(config)?);
    Self::new_with_client(
      config,
      client,
      options,
      force_use_server_ts,
      time_provider,
      scope,
    )
  }

  pub fn new_with_client(
    config: &WriterConfig,
    client: Arc<dyn PromRemoteWriteClient>,
    options: &WriterOptions,
    force_use_server_ts: bool,
    time_provider: Arc<dyn TimeProvider>,
    scope: &Scope,
  ) -> Result<Self> {
    Ok(Self {
      url: config.url.clone(),
      client,
      relabels: RelabelRule::compile_all(&config.write_relabels)?,
      force_use_server_ts,
      retry_count: options.retry_count.max(1),
      retry_interval: options.retry_interval,
      time_provider,
      stats: WriterStats::new(scope, &config.url),
    })
  }

  #[must_use]
  pub fn url(&self) -> &str {
    &self.url
  }

  fn log_rejected(&self, error: &PromRemoteWriteError, timeseries: &[TimeSeries]) {
    log::warn!(
      "remote write to {} rejected: {error}, timeseries count: {}",
      self.url,
      timeseries.len()
    );
    for (i, series) in timeseries.iter().take(MAX_REJECTED_EXAMPLES).enumerate() {
      log::warn!("remote write to {} timeseries: [{i}] {series}", self.url);
    }
  }
}

#[async_trait]
impl Writer for RemoteWriteWriter {
  async fn write<'a>(&self, key: &str, batch: Vec<TimeSeries>, extra_headers: Option<&'a HeaderMap>) {
    if batch.is_empty() {
      return;
    }
    let mut batch = relabel_series(batch, &self.relabels);
    if batch.is_empty() {
      return;
    }

    let _timer = self.stats.forward_duration.start_timer();
    let count = batch.len() as u64;
    self.stats.write_total.inc_by(count);

    if self.force_use_server_ts {
      let now = self.time_provider.unix_now_millis();
      for series in &mut batch {
        if let Some(sample) = series.samples.first_mut() {
          sample.timestamp = now;
        }
      }
    }

    let write_request = WriteRequest { timeseries: batch };
    let compressed: Bytes = match compress_write_request(&write_request) {
      Ok(compressed) => compressed.into(),
      Err(e) => {
        log::warn!("failed to encode write request for {key}: {e}");
        return;
      },
    };

    for attempt in 0 .. self.retry_count {
      let Err(e) = self
        .client
        .send_write_request(compressed.clone(), extra_headers)
        .await
      else {
        return;
      };

      self.stats.write_error_total.inc_by(count);
      warn_every!(
        1.minutes(),
        "post to {} got error: {} in {} times",
        self.url,
        e,
        attempt
      );
      if e.is_client_error() {
        self.log_rejected(&e, &write_request.timeseries);
      }
      if attempt == 0 {
        log::warn!("example timeseries: {}", write_request.timeseries[0]);
      }
      if attempt + 1 < self.retry_count {
        tokio::time::sleep(self.retry_interval).await;
      }
    }
  }
}
