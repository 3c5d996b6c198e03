// pushgw - bitdrift's metrics ingestion gateway
// Copyright Bitdrift, Inc. All rights reserved.
//
// Use of this source code is governed by a source available license that can be found in the
// LICENSE file or at:
// https://polyformproject.org/wp-content/uploads/2020/06/PolyForm-Shield-1.0.0.txt

#[cfg(test)]
#[path = "./sample_test.rs"]
mod sample_test;

use pushgw_protobuf::protos::prometheus::{Label, Sample, TimeSeries};
use std::borrow::Cow;
use std::collections::HashSet;

pub const METRIC_NAME_LABEL: &str = "__name__";
pub const IDENT_LABEL: &str = "ident";
pub const HOST_LABEL: &str = "host";
pub const ENDPOINT_LABEL: &str = "endpoint";
pub const AGENT_HOSTNAME_LABEL: &str = "agent_hostname";

// Anything at or above this is assumed to be milliseconds.
const MILLISECOND_THRESHOLD: i64 = 0xffff_ffff;
const MAX_FUTURE_SKEW_SECONDS: i64 = 300;

//
// ParseError
//

#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum ParseError {
  #[error("metric is blank")]
  BlankMetric,
  #[error("invalid metric name: {0}")]
  InvalidMetricName(String),
  #[error("invalid tag name: {0}")]
  InvalidTagName(String),
  #[error("duplicate label: {0}")]
  DuplicateLabel(String),
  #[error("invalid value: {0}")]
  InvalidValue(String),
  #[error("no points")]
  NoPoints,
  #[error("timestamp out of range: {0}")]
  InvalidTimestamp(i64),
  #[error("malformed item: {0}")]
  Malformed(String),
}

//
// IdentifiedSeries
//

/// A canonical series plus the identity (possibly empty) it belongs to.
#[derive(Clone, Debug, PartialEq)]
pub struct IdentifiedSeries {
  pub ident: String,
  pub series: TimeSeries,
}

//
// ParseResult
//

/// What a protocol adapter produces for one request body.
#[derive(Debug, Default)]
pub struct ParseResult {
  pub series: Vec<IdentifiedSeries>,
  // Identities that should be marked alive. This can be a subset of the series' idents.
  pub idents: HashSet<String>,
  pub fail: usize,
  pub errors: Vec<ParseError>,
}

impl ParseResult {
  pub fn push(&mut self, series: TimeSeries, ident: String, touch_ident: bool) {
    if touch_ident && !ident.is_empty() {
      self.idents.insert(ident.clone());
    }
    self.series.push(IdentifiedSeries { ident, series });
  }

  pub fn fail(&mut self, error: ParseError) {
    self.fail += 1;
    self.errors.push(error);
  }

  /// The `msg` of a `{succ, fail, msg}` reply.
  #[must_use]
  pub fn message(&self) -> String {
    self.errors.first().map(ToString::to_string).unwrap_or_default()
  }
}

/// Replace characters outside `[A-Za-z0-9_]` with `_`.
#[must_use]
pub fn normalize_name(name: &str) -> Cow<'_, str> {
  if name
    .bytes()
    .all(|b| b.is_ascii_alphanumeric() || b == b'_')
  {
    return Cow::Borrowed(name);
  }

  Cow::Owned(
    name
      .chars()
      .map(|c| {
        if c.is_ascii_alphanumeric() || c == '_' {
          c
        } else {
          '_'
        }
      })
      .collect(),
  )
}

/// `[a-zA-Z_][a-zA-Z0-9_]*`
#[must_use]
pub fn is_valid_name(name: &str) -> bool {
  let mut bytes = name.bytes();
  match bytes.next() {
    Some(first) if first.is_ascii_alphabetic() || first == b'_' => {},
    _ => return false,
  }
  bytes.all(|b| b.is_ascii_alphanumeric() || b == b'_')
}

/// Normalize and validate a metric name from a non Prometheus protocol.
pub fn clean_metric_name(name: &str) -> Result<String, ParseError> {
  if name.is_empty() {
    return Err(ParseError::BlankMetric);
  }
  let normalized = normalize_name(name);
  if !is_valid_name(&normalized) {
    return Err(ParseError::InvalidMetricName(name.to_string()));
  }
  Ok(normalized.into_owned())
}

/// Normalize and validate a tag name from a non Prometheus protocol.
pub fn clean_tag_name(name: &str) -> Result<String, ParseError> {
  let normalized = normalize_name(name);
  if !is_valid_name(&normalized) {
    return Err(ParseError::InvalidTagName(name.to_string()));
  }
  Ok(normalized.into_owned())
}

/// Turn a seconds or milliseconds timestamp into milliseconds, replacing 0 with `now` and
/// clamping anything more than 5 minutes in the future to `now`. Negative timestamps are
/// rejected. `now` is in seconds.
pub fn clean_timestamp_millis(timestamp: i64, now: i64) -> Result<i64, ParseError> {
  let mut seconds = timestamp;
  if seconds < 0 {
    return Err(ParseError::InvalidTimestamp(timestamp));
  }
  if seconds > MILLISECOND_THRESHOLD {
    seconds /= 1000;
  }
  if seconds == 0 || seconds.saturating_sub(now) > MAX_FUTURE_SKEW_SECONDS {
    seconds = now;
  }
  seconds
    .checked_mul(1000)
    .ok_or(ParseError::InvalidTimestamp(timestamp))
}

#[must_use]
pub fn has_duplicate_labels(labels: &[Label]) -> Option<&str> {
  let mut seen = HashSet::with_capacity(labels.len());
  labels
    .iter()
    .find(|l| !seen.insert(l.name.as_str()))
    .map(|l| l.name.as_str())
}

/// Drop a series whose labels repeat a name, which can happen once tag names are normalized.
pub fn reject_duplicate_labels(series: TimeSeries) -> Result<TimeSeries, ParseError> {
  if let Some(name) = has_duplicate_labels(&series.labels) {
    return Err(ParseError::DuplicateLabel(name.to_string()));
  }
  Ok(series)
}

#[must_use]
pub fn metric_name(series: &TimeSeries) -> &str {
  series.label_value(METRIC_NAME_LABEL).unwrap_or_default()
}

/// Build a single point series from a metric name and (name, value) tags.
#[must_use]
pub fn make_series(
  name: String,
  tags: impl IntoIterator<Item = (String, String)>,
  timestamp_ms: i64,
  value: f64,
) -> TimeSeries {
  let mut labels = vec![Label {
    name: METRIC_NAME_LABEL.to_string(),
    value: name,
  }];
  labels.extend(tags.into_iter().map(|(name, value)| Label { name, value }));
  TimeSeries {
    labels,
    samples: vec![Sample::new(timestamp_ms, value)],
  }
}

/// Parse a JSON value that can be a number or a numeric string.
pub fn parse_value(value: &serde_json::Value) -> Result<f64, ParseError> {
  match value {
    serde_json::Value::Number(n) => n
      .as_f64()
      .ok_or_else(|| ParseError::InvalidValue(n.to_string())),
    serde_json::Value::String(s) => s
      .trim()
      .parse::<f64>()
      .map_err(|_| ParseError::InvalidValue(s.clone())),
    other => Err(ParseError::InvalidValue(other.to_string())),
  }
}
