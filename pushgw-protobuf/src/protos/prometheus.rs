// pushgw - bitdrift's metrics ingestion gateway
// Copyright Bitdrift, Inc. All rights reserved.
//
// Use of this source code is governed by a source available license that can be found in the
// LICENSE file or at:
// https://polyformproject.org/wp-content/uploads/2020/06/PolyForm-Shield-1.0.0.txt

//! Prometheus remote write v1 messages (prompb `remote.proto` / `types.proto`). Only the fields
//! the gateway reads or writes are declared; unknown fields such as exemplars, native histograms
//! and metadata are skipped on decode.

#[cfg(test)]
#[path = "./prometheus_test.rs"]
mod prometheus_test;

#[derive(prost::Message, Clone, PartialEq)]
pub struct WriteRequest {
  #[prost(message, repeated, tag = "1")]
  pub timeseries: Vec<TimeSeries>,
}

#[derive(prost::Message, Clone, PartialEq)]
pub struct TimeSeries {
  #[prost(message, repeated, tag = "1")]
  pub labels: Vec<Label>,
  #[prost(message, repeated, tag = "2")]
  pub samples: Vec<Sample>,
}

#[derive(prost::Message, Clone, Hash, PartialEq, Eq)]
pub struct Label {
  #[prost(string, tag = "1")]
  pub name: String,
  #[prost(string, tag = "2")]
  pub value: String,
}

#[derive(prost::Message, Clone, PartialEq)]
pub struct Sample {
  #[prost(double, tag = "1")]
  pub value: f64,
  #[prost(int64, tag = "2")]
  pub timestamp: i64,
}

impl Label {
  pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
    Self {
      name: name.into(),
      value: value.into(),
    }
  }
}

impl Sample {
  #[must_use]
  pub const fn new(timestamp: i64, value: f64) -> Self {
    Self { value, timestamp }
  }
}

impl TimeSeries {
  /// Value of the label with the given name, if present.
  #[must_use]
  pub fn label_value(&self, name: &str) -> Option<&str> {
    self
      .labels
      .iter()
      .find(|l| l.name == name)
      .map(|l| l.value.as_str())
  }
}

impl std::fmt::Display for TimeSeries {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    write!(f, "{{")?;
    for (i, label) in self.labels.iter().enumerate() {
      if i > 0 {
        write!(f, ", ")?;
      }
      write!(f, "{}={:?}", label.name, label.value)?;
    }
    write!(f, "}}")?;
    for sample in &self.samples {
      write!(f, " {}@{}", sample.value, sample.timestamp)?;
    }
    Ok(())
  }
}
