// pushgw - bitdrift's metrics ingestion gateway
// Copyright Bitdrift, Inc. All rights reserved.
//
// Use of this source code is governed by a source available license that can be found in the
// LICENSE file or at:
// https://polyformproject.org/wp-content/uploads/2020/06/PolyForm-Shield-1.0.0.txt

#[cfg(test)]
#[path = "./config_test.rs"]
mod config_test;

use crate::relabel::RelabelConfig;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_BUSI_GROUP_LABEL_KEY: &str = "busigroup";

#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
  #[error("writer has an empty url")]
  EmptyUrl,
  #[error("writer {0}: headers must be a list of name/value pairs")]
  OddHeaders(String),
  #[error("queue_pop_size must be greater than zero")]
  ZeroPopSize,
  #[error("write_concurrency must be greater than zero")]
  ZeroWriteConcurrency,
}

pub type Result<T> = std::result::Result<T, ConfigError>;

//
// PushgwConfig
//

/// Options of the ingest and forward core.
#[derive(Deserialize, Debug, Clone)]
#[serde(default, deny_unknown_fields)]
pub struct PushgwConfig {
  pub busi_group_label_key: String,
  // Whether target tags overwrite labels the sample already carries.
  pub label_rewrite: bool,
  pub force_use_server_ts: bool,
  pub debug_sample: BTreeMap<String, String>,
  pub drop_sample: Vec<BTreeMap<String, String>>,
  pub writer_opt: WriterOptions,
  pub write_concurrency: usize,
  pub writers: Vec<WriterConfig>,
  // Applied to every sample before sharding.
  pub relabels: Vec<RelabelConfig>,
}

impl Default for PushgwConfig {
  fn default() -> Self {
    Self {
      busi_group_label_key: DEFAULT_BUSI_GROUP_LABEL_KEY.to_string(),
      label_rewrite: false,
      force_use_server_ts: false,
      debug_sample: BTreeMap::new(),
      drop_sample: Vec::new(),
      writer_opt: WriterOptions::default(),
      write_concurrency: 5000,
      writers: Vec::new(),
      relabels: Vec::new(),
    }
  }
}

impl PushgwConfig {
  /// Checks that can't be expressed through serde. Relabel rules are checked when they are
  /// compiled.
  pub fn validate(&self) -> Result<()> {
    if self.writer_opt.queue_pop_size == 0 {
      return Err(ConfigError::ZeroPopSize);
    }
    if self.write_concurrency == 0 {
      return Err(ConfigError::ZeroWriteConcurrency);
    }
    for writer in &self.writers {
      if writer.urls().next().is_none() {
        return Err(ConfigError::EmptyUrl);
      }
      if writer.headers.len() % 2 != 0 {
        return Err(ConfigError::OddHeaders(writer.url.clone()));
      }
    }
    Ok(())
  }
}

//
// Mode
//

/// Where ident liveness goes: straight to the inventory database (center) or to an upstream
/// center over HTTP (edge).
#[derive(Deserialize, Debug, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
  #[default]
  Center,
  Edge,
}

//
// ShardingKey
//

#[derive(Deserialize, Debug, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ShardingKey {
  #[default]
  Ident,
  Metric,
}

//
// WriterOptions
//

#[derive(Deserialize, Debug, Clone)]
#[serde(default, deny_unknown_fields)]
pub struct WriterOptions {
  // Initial capacity of the queue map.
  pub queue_count: usize,
  pub queue_max_size: usize,
  pub queue_pop_size: usize,
  pub sharding_key: ShardingKey,
  pub retry_count: u32,
  #[serde(with = "humantime_serde")]
  pub retry_interval: Duration,
  #[serde(with = "humantime_serde")]
  pub all_queue_len_interval: Duration,
}

impl Default for WriterOptions {
  fn default() -> Self {
    Self {
      queue_count: 1000,
      queue_max_size: 10_000_000,
      queue_pop_size: 1000,
      sharding_key: ShardingKey::Ident,
      retry_count: 3,
      retry_interval: Duration::from_secs(1),
      all_queue_len_interval: Duration::from_millis(200),
    }
  }
}

//
// TlsConfig
//

#[derive(Deserialize, Debug, Clone, Default)]
#[serde(default, deny_unknown_fields)]
pub struct TlsConfig {
  pub ca_file: Option<PathBuf>,
  pub cert_file: Option<PathBuf>,
  pub key_file: Option<PathBuf>,
  pub insecure_skip_verify: bool,
}

//
// WriterConfig
//

/// One remote write backend.
#[derive(Deserialize, Debug, Clone)]
#[serde(default, deny_unknown_fields)]
pub struct WriterConfig {
  // Comma separated, tried in order.
  pub url: String,
  pub basic_auth_user: String,
  pub basic_auth_pass: String,
  // Flat list: name, value, name, value...
  pub headers: Vec<String>,
  #[serde(with = "humantime_serde")]
  pub timeout: Duration,
  #[serde(with = "humantime_serde")]
  pub dial_timeout: Duration,
  #[serde(with = "humantime_serde")]
  pub keep_alive: Duration,
  #[serde(with = "humantime_serde")]
  pub tls_handshake_timeout: Duration,
  #[serde(with = "humantime_serde")]
  pub response_header_timeout: Option<Duration>,
  #[serde(with = "humantime_serde")]
  pub expect_continue_timeout: Duration,
  // 0 means unlimited.
  pub max_conns_per_host: usize,
  pub max_idle_conns: usize,
  pub max_idle_conns_per_host: usize,
  #[serde(with = "humantime_serde")]
  pub idle_conn_timeout: Duration,
  pub tls: Option<TlsConfig>,
  pub write_relabels: Vec<RelabelConfig>,
}

impl Default for WriterConfig {
  fn default() -> Self {
    Self {
      url: String::new(),
      basic_auth_user: String::new(),
      basic_auth_pass: String::new(),
      headers: Vec::new(),
      timeout: Duration::from_secs(10),
      dial_timeout: Duration::from_secs(3),
      keep_alive: Duration::from_secs(30),
      tls_handshake_timeout: Duration::from_secs(30),
      response_header_timeout: None,
      expect_continue_timeout: Duration::from_secs(1),
      max_conns_per_host: 0,
      max_idle_conns: 100,
      max_idle_conns_per_host: 100,
      idle_conn_timeout: Duration::from_secs(90),
      tls: None,
      write_relabels: Vec::new(),
    }
  }
}

impl WriterConfig {
  pub fn urls(&self) -> impl Iterator<Item = &str> {
    self.url.split(',').map(str::trim).filter(|u| !u.is_empty())
  }

  /// `headers` folded into pairs. A trailing unpaired name is ignored; `validate` rejects it.
  pub fn header_pairs(&self) -> impl Iterator<Item = (&str, &str)> {
    self
      .headers
      .chunks_exact(2)
      .map(|pair| (pair[0].as_str(), pair[1].as_str()))
  }
}
