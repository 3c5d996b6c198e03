// pushgw - bitdrift's metrics ingestion gateway
// Copyright Bitdrift, Inc. All rights reserved.
//
// Use of this source code is governed by a source available license that can be found in the
// LICENSE file or at:
// https://polyformproject.org/wp-content/uploads/2020/06/PolyForm-Shield-1.0.0.txt

#[cfg(test)]
#[path = "./datadog_test.rs"]
mod datadog_test;

use super::sample::{
  HOST_LABEL,
  IDENT_LABEL,
  METRIC_NAME_LABEL,
  ParseError,
  ParseResult,
  clean_metric_name,
  clean_tag_name,
  reject_duplicate_labels,
};
use pushgw_common::LossyFloatToInt;
use pushgw_protobuf::protos::prometheus::{Label, Sample, TimeSeries};
use serde::Deserialize;

//
// DatadogPayload
//

#[derive(Deserialize, Debug)]
struct DatadogPayload {
  #[serde(default)]
  series: Vec<serde_json::Value>,
}

//
// DatadogSeries
//

/// One entry of a `/api/v1/series` payload.
#[derive(Deserialize, Debug)]
pub struct DatadogSeries {
  pub metric: String,
  // [[timestamp_seconds, value], ...]
  #[serde(default)]
  pub points: Vec<(f64, f64)>,
  #[serde(default)]
  pub host: String,
  #[serde(default)]
  pub tags: Vec<String>,
}

impl DatadogSeries {
  pub fn into_series(self, now: i64) -> Result<(TimeSeries, String), ParseError> {
    if self.points.is_empty() {
      return Err(ParseError::NoPoints);
    }
    let name = clean_metric_name(&self.metric)?;

    let samples = self
      .points
      .iter()
      .map(|(timestamp, value)| {
        Ok(Sample::new(
          point_timestamp_millis(*timestamp, now)?,
          *value,
        ))
      })
      .collect::<Result<Vec<_>, ParseError>>()?;

    let mut labels = vec![Label::new(METRIC_NAME_LABEL, name)];
    let mut ident_in_tag = None;
    let mut host_in_tag = None;
    for tag in &self.tags {
      let Some((key, value)) = tag.split_once(':') else {
        continue;
      };
      match key {
        IDENT_LABEL => {
          ident_in_tag = Some(value.to_string());
          labels.push(Label::new(IDENT_LABEL, value));
        },
        HOST_LABEL => host_in_tag = Some(value.to_string()),
        _ => labels.push(Label::new(clean_tag_name(key)?, value)),
      }
    }

    // The host field beats a host tag.
    let host = if self.host.is_empty() {
      host_in_tag
    } else {
      Some(self.host)
    };
    if let Some(host) = &host {
      if ident_in_tag.is_some() {
        labels.push(Label::new(HOST_LABEL, host.as_str()));
      } else {
        labels.push(Label::new(IDENT_LABEL, host.as_str()));
      }
    }

    let ident = ident_in_tag.or(host).unwrap_or_default();
    let series = reject_duplicate_labels(TimeSeries { labels, samples })?;
    Ok((series, ident))
  }
}

// Point timestamps are seconds. 0 means now.
fn point_timestamp_millis(timestamp: f64, now: i64) -> Result<i64, ParseError> {
  let seconds = match timestamp.lossy_to_i64() {
    0 => now,
    seconds => seconds,
  };
  if !timestamp.is_finite() || seconds < 0 {
    return Err(ParseError::InvalidTimestamp(seconds));
  }
  seconds
    .checked_mul(1000)
    .ok_or(ParseError::InvalidTimestamp(seconds))
}

/// Parse a `/datadog/api/v1/series` body.
pub fn parse(body: &[u8], now: i64) -> Result<ParseResult, serde_json::Error> {
  let payload: DatadogPayload = serde_json::from_slice(body)?;

  let mut result = ParseResult::default();
  for item in payload.series {
    match serde_json::from_value::<DatadogSeries>(item)
      .map_err(|e| ParseError::Malformed(e.to_string()))
      .and_then(|item| item.into_series(now))
    {
      Ok((series, ident)) => result.push(series, ident, true),
      Err(e) => result.fail(e),
    }
  }
  Ok(result)
}
