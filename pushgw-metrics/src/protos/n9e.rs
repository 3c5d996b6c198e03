// pushgw - bitdrift's metrics ingestion gateway
// Copyright Bitdrift, Inc. All rights reserved.
//
// Use of this source code is governed by a source available license that can be found in the
// LICENSE file or at:
// https://polyformproject.org/wp-content/uploads/2020/06/PolyForm-Shield-1.0.0.txt

// Bodies exchanged between edge and center deployments.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// `/v1/n9e/target-update` body.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct TargetUpdate {
  pub lst: Vec<String>,
  pub now: i64,
}

/// `/v1/n9e/heartbeat` body sent by agents. Fields the gateway does not interpret are kept so
/// they can be served back verbatim.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct HostMeta {
  #[serde(default)]
  pub hostname: String,
  #[serde(default, skip_serializing_if = "String::is_empty")]
  pub agent_version: String,
  #[serde(default, skip_serializing_if = "String::is_empty")]
  pub os: String,
  #[serde(default, skip_serializing_if = "String::is_empty")]
  pub arch: String,
  #[serde(default)]
  pub cpu_num: i64,
  #[serde(default)]
  pub mem_util: f64,
  #[serde(default)]
  pub unixtime: i64,
  #[serde(flatten)]
  pub extra: BTreeMap<String, serde_json::Value>,
}

/// Standard `{err, dat}` reply of the n9e API.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Reply {
  pub err: String,
  pub dat: serde_json::Value,
}

impl Reply {
  #[must_use]
  pub fn ok() -> Self {
    Self {
      err: String::new(),
      dat: serde_json::Value::String("ok".to_string()),
    }
  }

  #[must_use]
  pub fn error(err: impl ToString) -> Self {
    Self {
      err: err.to_string(),
      dat: serde_json::Value::Null,
    }
  }
}

/// Reply of the OpenTSDB, OpenFalcon and Datadog series endpoints.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct IngestReply {
  pub succ: usize,
  pub fail: usize,
  pub msg: String,
}
