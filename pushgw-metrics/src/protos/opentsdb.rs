// pushgw - bitdrift's metrics ingestion gateway
// Copyright Bitdrift, Inc. All rights reserved.
//
// Use of this source code is governed by a source available license that can be found in the
// LICENSE file or at:
// https://polyformproject.org/wp-content/uploads/2020/06/PolyForm-Shield-1.0.0.txt

#[cfg(test)]
#[path = "./opentsdb_test.rs"]
mod opentsdb_test;

use super::sample::{
  HOST_LABEL,
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
// OpenTsdbItem
//

/// One `/api/put` data point.
#[derive(Deserialize, Debug)]
pub struct OpenTsdbItem {
  pub metric: String,
  #[serde(default)]
  pub timestamp: i64,
  pub value: serde_json::Value,
  #[serde(default)]
  pub tags: BTreeMap<String, String>,
}

impl OpenTsdbItem {
  /// Normalize the item and build its series. Returns the series and its identity.
  pub fn into_series(self, now: i64) -> Result<(TimeSeries, String), ParseError> {
    let name = clean_metric_name(&self.metric)?;
    let value = parse_value(&self.value)?;
    let timestamp = clean_timestamp_millis(self.timestamp, now)?;

    let mut tags = self.tags;
    if !tags.contains_key(IDENT_LABEL) {
      if let Some(host) = tags.remove(HOST_LABEL) {
        tags.insert(IDENT_LABEL.to_string(), host);
      }
    }
    let ident = tags.get(IDENT_LABEL).cloned().unwrap_or_default();

    let mut labels = Vec::with_capacity(tags.len());
    for (key, value) in tags {
      labels.push((clean_tag_name(&key)?, value));
    }

    let series = reject_duplicate_labels(make_series(name, labels, timestamp, value))?;
    Ok((series, ident))
  }
}

/// Parse an `/opentsdb/put` body, which is either a single item or an array of items. Invalid
/// items are counted and skipped.
pub fn parse(body: &[u8], now: i64) -> Result<ParseResult, serde_json::Error> {
  let value: serde_json::Value = serde_json::from_slice(body)?;
  let items = match value {
    serde_json::Value::Array(items) => items,
    other => vec![other],
  };

  let mut result = ParseResult::default();
  for item in items {
    match serde_json::from_value::<OpenTsdbItem>(item)
      .map_err(|e| ParseError::Malformed(e.to_string()))
      .and_then(|item| item.into_series(now))
    {
      Ok((series, ident)) => result.push(series, ident, true),
      Err(e) => result.fail(e),
    }
  }
  Ok(result)
}
