// pushgw - bitdrift's metrics ingestion gateway
// Copyright Bitdrift, Inc. All rights reserved.
//
// Use of this source code is governed by a source available license that can be found in the
// LICENSE file or at:
// https://polyformproject.org/wp-content/uploads/2020/06/PolyForm-Shield-1.0.0.txt

#[cfg(test)]
#[path = "./openfalcon_test.rs"]
mod openfalcon_test;

use super::sample::{
  ENDPOINT_LABEL,
  IDENT_LABEL,
  ParseError,
  ParseResult,
  clean_metric_name,
  clean_tag_name,
  clean_timestamp_millis,
  make_series,
  parse_value,
  reject_duplicate_labels,
};
use pushgw_protobuf::protos::prometheus::TimeSeries;
use serde::Deserialize;
use std::collections::BTreeMap;

//
// FalconItem
//

#[derive(Deserialize, Debug)]
pub struct FalconItem {
  pub metric: String,
  #[serde(default)]
  pub endpoint: String,
  #[serde(default)]
  pub timestamp: i64,
  pub value: serde_json::Value,
  // "k=v,k=v"
  #[serde(default)]
  pub tags: String,
}

impl FalconItem {
  pub fn into_series(self, now: i64) -> Result<(TimeSeries, String), ParseError> {
    let name = clean_metric_name(&self.metric)?;
    let value = parse_value(&self.value)?;
    let timestamp = clean_timestamp_millis(self.timestamp, now)?;

    let mut tags: BTreeMap<String, String> = self
      .tags
      .split(',')
      .filter_map(|pair| pair.split_once('='))
      .map(|(k, v)| (k.trim().to_string(), v.trim().to_string()))
      .collect();

    let mut ident = String::new();
    if !self.endpoint.is_empty() {
      if let Some(tag_ident) = tags.get(IDENT_LABEL) {
        ident.clone_from(tag_ident);
        tags.insert(ENDPOINT_LABEL.to_string(), self.endpoint);
      } else {
        ident.clone_from(&self.endpoint);
        tags.insert(IDENT_LABEL.to_string(), self.endpoint);
      }
    }

    let mut labels = Vec::with_capacity(tags.len());
    for (key, value) in tags {
      labels.push((clean_tag_name(&key)?, value));
    }

    let series = reject_duplicate_labels(make_series(name, labels, timestamp, value))?;
    Ok((series, ident))
  }
}

/// Parse an `/openfalcon/push` body, either a single item or an array.
pub fn parse(body: &[u8], now: i64) -> Result<ParseResult, serde_json::Error> {
  let value: serde_json::Value = serde_json::from_slice(body)?;
  let items = match value {
    serde_json::Value::Array(items) => items,
    other => vec![other],
  };

  let mut result = ParseResult::default();
  for item in items {
    match serde_json::from_value::<FalconItem>(item)
      .map_err(|e| ParseError::Malformed(e.to_string()))
      .and_then(|item| item.into_series(now))
    {
      Ok((series, ident)) => result.push(series, ident, true),
      Err(e) => result.fail(e),
    }
  }
  Ok(result)
}
