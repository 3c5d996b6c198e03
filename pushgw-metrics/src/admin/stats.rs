// pushgw - bitdrift's metrics ingestion gateway
// Copyright Bitdrift, Inc. All rights reserved.
//
// Use of this source code is governed by a source available license that can be found in the
// LICENSE file or at:
// https://polyformproject.org/wp-content/uploads/2020/06/PolyForm-Shield-1.0.0.txt

#[cfg(test)]
#[path = "./stats_test.rs"]
mod stats_test;

use parking_lot::Mutex;
use prometheus::{
  Histogram,
  HistogramOpts,
  HistogramVec,
  IntCounter,
  IntCounterVec,
  IntGauge,
  IntGaugeVec,
  Opts,
  Registry,
  TextEncoder,
};
use std::collections::HashMap;
use std::sync::Arc;

//
// Registered
//

#[derive(Clone)]
enum Registered {
  Counter(IntCounter),
  CounterVec(IntCounterVec),
  Gauge(IntGauge),
  GaugeVec(IntGaugeVec),
  Histogram(Histogram),
  HistogramVec(HistogramVec),
}

//
// Collector
//

/// Owns the prometheus registry for the process. Metrics are created through a `Scope` and are
/// deduplicated by full name, so asking twice for the same counter returns the same counter.
#[derive(Clone, Default)]
pub struct Collector {
  registry: Registry,
  metrics: Arc<Mutex<HashMap<String, Registered>>>,
}

impl Collector {
  #[must_use]
  pub fn scope(&self, name: &str) -> Scope {
    Scope {
      collector: self.clone(),
      prefix: name.to_string(),
    }
  }

  #[must_use]
  pub fn gather(&self) -> Vec<prometheus::proto::MetricFamily> {
    self.registry.gather()
  }

  /// Text exposition of everything in the registry.
  #[must_use]
  pub fn prometheus_output(&self) -> String {
    TextEncoder::new()
      .encode_to_string(&self.gather())
      .unwrap_or_else(|e| {
        log::warn!("failed to encode metrics: {e}");
        String::new()
      })
  }

  fn get_or_register(
    &self,
    name: String,
    make: impl FnOnce(&str) -> prometheus::Result<Registered>,
    matches: impl Fn(&Registered) -> bool,
  ) -> Registered {
    let mut metrics = self.metrics.lock();
    if let Some(existing) = metrics.get(&name) {
      if matches(existing) {
        return existing.clone();
      }
      log::warn!("metric {name} already registered with a different type");
    }

    let created = make(&name).unwrap_or_else(|e| panic!("invalid metric {name}: {e}"));
    let collector: Box<dyn prometheus::core::Collector> = match &created {
      Registered::Counter(m) => Box::new(m.clone()),
      Registered::CounterVec(m) => Box::new(m.clone()),
      Registered::Gauge(m) => Box::new(m.clone()),
      Registered::GaugeVec(m) => Box::new(m.clone()),
      Registered::Histogram(m) => Box::new(m.clone()),
      Registered::HistogramVec(m) => Box::new(m.clone()),
    };
    if let Err(e) = self.registry.register(collector) {
      log::warn!("failed to register metric {name}: {e}");
    } else {
      metrics.insert(name, created.clone());
    }
    created
  }
}

//
// Scope
//

/// A name prefix inside a `Collector`. Names are joined with `_`.
#[derive(Clone)]
pub struct Scope {
  collector: Collector,
  prefix: String,
}

impl Scope {
  #[must_use]
  pub fn scope(&self, name: &str) -> Self {
    Self {
      collector: self.collector.clone(),
      prefix: self.full_name(name),
    }
  }

  fn full_name(&self, name: &str) -> String {
    if self.prefix.is_empty() {
      name.to_string()
    } else {
      format!("{}_{name}", self.prefix)
    }
  }

  #[must_use]
  pub fn counter(&self, name: &str) -> IntCounter {
    match self.collector.get_or_register(
      self.full_name(name),
      |name| Ok(Registered::Counter(IntCounter::new(name, name)?)),
      |r| matches!(r, Registered::Counter(_)),
    ) {
      Registered::Counter(c) => c,
      _ => unreachable!(),
    }
  }

  #[must_use]
  pub fn counter_vec(&self, name: &str, labels: &[&str]) -> IntCounterVec {
    match self.collector.get_or_register(
      self.full_name(name),
      |name| {
        Ok(Registered::CounterVec(IntCounterVec::new(
          Opts::new(name, name),
          labels,
        )?))
      },
      |r| matches!(r, Registered::CounterVec(_)),
    ) {
      Registered::CounterVec(c) => c,
      _ => unreachable!(),
    }
  }

  #[must_use]
  pub fn gauge(&self, name: &str) -> IntGauge {
    match self.collector.get_or_register(
      self.full_name(name),
      |name| Ok(Registered::Gauge(IntGauge::new(name, name)?)),
      |r| matches!(r, Registered::Gauge(_)),
    ) {
      Registered::Gauge(g) => g,
      _ => unreachable!(),
    }
  }

  #[must_use]
  pub fn gauge_vec(&self, name: &str, labels: &[&str]) -> IntGaugeVec {
    match self.collector.get_or_register(
      self.full_name(name),
      |name| {
        Ok(Registered::GaugeVec(IntGaugeVec::new(
          Opts::new(name, name),
          labels,
        )?))
      },
      |r| matches!(r, Registered::GaugeVec(_)),
    ) {
      Registered::GaugeVec(g) => g,
      _ => unreachable!(),
    }
  }

  #[must_use]
  pub fn histogram_with_buckets(&self, name: &str, buckets: Vec<f64>) -> Histogram {
    match self.collector.get_or_register(
      self.full_name(name),
      |name| {
        Ok(Registered::Histogram(Histogram::with_opts(
          HistogramOpts::new(name, name).buckets(buckets),
        )?))
      },
      |r| matches!(r, Registered::Histogram(_)),
    ) {
      Registered::Histogram(h) => h,
      _ => unreachable!(),
    }
  }

  #[must_use]
  pub fn histogram_vec(&self, name: &str, labels: &[&str]) -> HistogramVec {
    match self.collector.get_or_register(
      self.full_name(name),
      |name| {
        Ok(Registered::HistogramVec(HistogramVec::new(
          HistogramOpts::new(name, name),
          labels,
        )?))
      },
      |r| matches!(r, Registered::HistogramVec(_)),
    ) {
      Registered::HistogramVec(h) => h,
      _ => unreachable!(),
    }
  }
}
