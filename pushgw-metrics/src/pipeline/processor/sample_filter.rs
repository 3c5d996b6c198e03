// pushgw - bitdrift's metrics ingestion gateway
// Copyright Bitdrift, Inc. All rights reserved.
//
// Use of this source code is governed by a source available license that can be found in the
// LICENSE file or at:
// https://polyformproject.org/wp-content/uploads/2020/06/PolyForm-Shield-1.0.0.txt

#[cfg(test)]
#[path = "./sample_filter_test.rs"]
mod sample_filter_test;

use pushgw_protobuf::protos::prometheus::TimeSeries;
use std::collections::BTreeMap;

type LabelMatcher = Vec<(String, String)>;

fn matches(matcher: &LabelMatcher, series: &TimeSeries) -> bool {
  matcher
    .iter()
    .all(|(name, value)| series.label_value(name) == Some(value.as_str()))
}

//
// SampleFilter
//

/// Debug logging and dropping of samples by exact label matches. An empty matcher never matches.
#[derive(Debug, Default)]
pub struct SampleFilter {
  debug: LabelMatcher,
  drop: Vec<LabelMatcher>,
}

impl SampleFilter {
  #[must_use]
  pub fn new(debug: &BTreeMap<String, String>, drop: &[BTreeMap<String, String>]) -> Self {
    let to_matcher = |map: &BTreeMap<String, String>| -> LabelMatcher {
      map.iter().map(|(k, v)| (k.clone(), v.clone())).collect()
    };
    Self {
      debug: to_matcher(debug),
      drop: drop
        .iter()
        .filter(|m| !m.is_empty())
        .map(to_matcher)
        .collect(),
    }
  }

  #[must_use]
  pub fn is_debug(&self, series: &TimeSeries) -> bool {
    !self.debug.is_empty() && matches(&self.debug, series)
  }

  pub fn maybe_debug(&self, source: &str, series: &TimeSeries) {
    if self.is_debug(series) {
      log::debug!("[debug sample] source: {source} sample: {series}");
    }
  }

  #[must_use]
  pub fn should_drop(&self, series: &TimeSeries) -> bool {
    self.drop.iter().any(|m| matches(m, series))
  }
}
