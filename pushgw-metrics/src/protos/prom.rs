// pushgw - bitdrift's metrics ingestion gateway
// Copyright Bitdrift, Inc. All rights reserved.
//
// Use of this source code is governed by a source available license that can be found in the
// LICENSE file or at:
// https://polyformproject.org/wp-content/uploads/2020/06/PolyForm-Shield-1.0.0.txt

#[cfg(test)]
#[path = "./prom_test.rs"]
mod prom_test;

use super::sample::{
  AGENT_HOSTNAME_LABEL,
  HOST_LABEL,
  IDENT_LABEL,
  ParseError,
  ParseResult,
  has_duplicate_labels,
  metric_name,
};
use pushgw_protobuf::protos::prometheus::{TimeSeries, WriteRequest};

// Series generated by the scraper itself. They still get forwarded but they must not keep a
// target alive.
const IGNORE_IDENT_METRICS: &[&str] = &[
  "up",
  "scrape_series_added",
  "scrape_samples_post_metric_relabeling",
  "scrape_samples_scraped",
  "scrape_duration_seconds",
];

/// Find the identity of a series, renaming `agent_hostname` or `host` to `ident` when they are
/// the source. Precedence is `ident` > `agent_hostname` > `host`.
pub fn extract_ident(series: &mut TimeSeries) -> String {
  if let Some(ident) = series.label_value(IDENT_LABEL) {
    return ident.to_string();
  }

  for candidate in [AGENT_HOSTNAME_LABEL, HOST_LABEL] {
    if let Some(label) = series.labels.iter_mut().find(|l| l.name == candidate) {
      IDENT_LABEL.clone_into(&mut label.name);
      return label.value.clone();
    }
  }

  String::new()
}

/// Convert a decoded remote write request into canonical series. Series with duplicate label
/// names are counted as failures and skipped.
#[must_use]
pub fn from_write_request(write_request: WriteRequest) -> ParseResult {
  let mut result = ParseResult::default();
  for mut series in write_request.timeseries {
    if let Some(duplicate) = has_duplicate_labels(&series.labels) {
      result.fail(ParseError::DuplicateLabel(duplicate.to_string()));
      continue;
    }

    let ident = extract_ident(&mut series);
    let touch_ident = !IGNORE_IDENT_METRICS.contains(&metric_name(&series));
    result.push(series, ident, touch_ident);
  }
  result
}
