// pushgw - bitdrift's metrics ingestion gateway
// Copyright Bitdrift, Inc. All rights reserved.
//
// Use of this source code is governed by a source available license that can be found in the
// LICENSE file or at:
// https://polyformproject.org/wp-content/uploads/2020/06/PolyForm-Shield-1.0.0.txt

#[cfg(test)]
#[path = "./config_test.rs"]
mod config_test;

use anyhow::{Context, bail};
use pushgw_metrics::idents::IdentSetConfig;
use pushgw_metrics::idents::stats::IdentStatsConfig;
use pushgw_metrics::pipeline::config::{Mode, PushgwConfig};
use pushgw_metrics::pipeline::processor::enrich::{BusiGroup, TargetSeed};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::Path;

pub const DEFAULT_BIND: &str = "0.0.0.0:17000";

//
// AdminConfig
//

#[derive(Deserialize, Debug, Clone)]
#[serde(deny_unknown_fields)]
pub struct AdminConfig {
  pub bind: String,
}

//
// Config
//

/// Process configuration, loaded from a single YAML file.
#[derive(Deserialize, Debug, Clone)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
  pub bind: String,
  pub admin: Option<AdminConfig>,
  pub mode: Mode,
  pub basic_auth: BTreeMap<String, String>,
  pub datadog_accounts: Vec<String>,
  pub pushgw: PushgwConfig,
  pub ident_set: IdentSetConfig,
  pub ident_stats: IdentStatsConfig,
  pub targets: Vec<TargetSeed>,
  pub busi_groups: Vec<BusiGroup>,
}

impl Default for Config {
  fn default() -> Self {
    Self {
      bind: DEFAULT_BIND.to_string(),
      admin: None,
      mode: Mode::default(),
      basic_auth: BTreeMap::new(),
      datadog_accounts: Vec::new(),
      pushgw: PushgwConfig::default(),
      ident_set: IdentSetConfig::default(),
      ident_stats: IdentStatsConfig::default(),
      targets: Vec::new(),
      busi_groups: Vec::new(),
    }
  }
}

impl Config {
  pub fn validate(&self) -> anyhow::Result<()> {
    self.pushgw.validate().context("invalid pushgw section")?;
    match self.mode {
      Mode::Center if self.ident_set.database_url.is_empty() => {
        bail!("ident_set.database_url is required in center mode")
      },
      Mode::Edge if self.ident_set.center_urls.is_empty() => {
        bail!("ident_set.center_urls is required in edge mode")
      },
      _ => Ok(()),
    }
  }
}

pub fn load_from_str(contents: &str) -> anyhow::Result<Config> {
  let config: Config = serde_yaml::from_str(contents)?;
  config.validate()?;
  Ok(config)
}

pub fn load_from_file(path: &Path) -> anyhow::Result<Config> {
  let contents = std::fs::read_to_string(path)?;
  load_from_str(&contents)
}
