// pushgw - bitdrift's metrics ingestion gateway
// Copyright Bitdrift, Inc. All rights reserved.
//
// Use of this source code is governed by a source available license that can be found in the
// LICENSE file or at:
// https://polyformproject.org/wp-content/uploads/2020/06/PolyForm-Shield-1.0.0.txt


use self::config::{PushgwConfig, ShardingKey};
use self::outflow::fabric::{Fabric, shard_key};
use self::outflow::writer::{RemoteWriteWriter, Writer};
use self::processor::enrich::{BusiGroupCache, Enricher, TargetCache};
use self::processor::sample_filter::SampleFilter;
use self::time::TimeProvider;
use crate::admin::stats::Scope;
use crate::idents::IdentSet;
use crate::idents::stats::IdentStats;
use crate::protos::sample::IdentifiedSeries;
use crate::relabel::{self, RelabelRule};
use anyhow::Context;
use mockall::automock;
use prometheus::{IntCounter, IntCounterVec};
use pushgw_common::shutdown::ComponentShutdown;
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

pub mod config;
pub mod inflow;
pub mod outflow;
pub mod processor;
pub mod time;

//
// Channel
//

/// The protocol a batch of samples arrived on.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Channel {
  Prometheus,
  OpenTsdb,
  OpenFalcon,
  Datadog,
}

impl Channel {
  #[must_use]
  pub const fn as_str(self) -> &'static str {
    match self {
      Self::Prometheus => "prometheus",
      Self::OpenTsdb => "opentsdb",
      Self::OpenFalcon => "openfalcon",
      Self::Datadog => "datadog",
    }
  }
}

impl fmt::Display for Channel {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

//
// PipelineDispatch
//

/// What ingest handlers hand their parsed samples to.
#[automock]
pub trait PipelineDispatch: Send + Sync {
  /// Enrich, filter, relabel and enqueue `series`, then mark `idents` alive.
  fn forward(&self, channel: Channel, series: Vec<IdentifiedSeries>, idents: HashSet<String>);

  /// Mark idents alive without any samples.
  fn touch_idents(&self, idents: Vec<String>);
}

//
// Pipeline
//

pub struct Pipeline {
  enricher: Enricher,
  filter: SampleFilter,
  relabels: Vec<RelabelRule>,
  sharding_key: ShardingKey,
  fabric: Arc<Fabric>,
  ident_set: Arc<IdentSet>,
  ident_stats: Arc<IdentStats>,
  samples_received_total: IntCounterVec,
  // Dropped by drop_sample or by a relabel rule.
  samples_dropped_total: IntCounter,
}

impl Pipeline {
  /// Build the writers and the fabric from `config`. Invalid relabel rules or unusable writer
  /// TLS settings fail here.
  #[allow(clippy::too_many_arguments)]
  pub fn new(
    config: &PushgwConfig,
    targets: Arc<dyn TargetCache>,
    busi_groups: Arc<dyn BusiGroupCache>,
    ident_set: Arc<IdentSet>,
    ident_stats: Arc<IdentStats>,
    time_provider: Arc<dyn TimeProvider>,
    scope: &Scope,
    shutdown: ComponentShutdown,
  ) -> anyhow::Result<Self> {
    config.validate()?;
    let writers = config
      .writers
      .iter()
      .map(|writer| {
        RemoteWriteWriter::new(
          writer,
          &config.writer_opt,
          config.force_use_server_ts,
          time_provider.clone(),
          scope,
        )
        .map(|w| Arc::new(w) as Arc<dyn Writer>)
        .with_context(|| format!("writer {}", writer.url))
      })
      .collect::<anyhow::Result<Vec<_>>>()?;
    if writers.is_empty() {
      log::warn!("no writers configured, samples will be queued and dropped");
    }

    let fabric = Fabric::new(
      &config.writer_opt,
      config.write_concurrency,
      writers,
      scope,
      shutdown,
    );
    Self::new_with_fabric(
      config,
      targets,
      busi_groups,
      fabric,
      ident_set,
      ident_stats,
      scope,
    )
  }

  pub fn new_with_fabric(
    config: &PushgwConfig,
    targets: Arc<dyn TargetCache>,
    busi_groups: Arc<dyn BusiGroupCache>,
    fabric: Arc<Fabric>,
    ident_set: Arc<IdentSet>,
    ident_stats: Arc<IdentStats>,
    scope: &Scope,
  ) -> anyhow::Result<Self> {
    Ok(Self {
      enricher: Enricher::new(
        targets,
        busi_groups,
        config.busi_group_label_key.clone(),
        config.label_rewrite,
      ),
      filter: SampleFilter::new(&config.debug_sample, &config.drop_sample),
      relabels: RelabelRule::compile_all(&config.relabels).context("relabels")?,
      sharding_key: config.writer_opt.sharding_key,
      fabric,
      ident_set,
      ident_stats,
      samples_received_total: scope.counter_vec("samples_received_total", &["channel"]),
      samples_dropped_total: scope.counter("samples_dropped_total"),
    })
  }

  #[must_use]
  pub const fn fabric(&self) -> &Arc<Fabric> {
    &self.fabric
  }
}

impl PipelineDispatch for Pipeline {
  fn forward(&self, channel: Channel, series: Vec<IdentifiedSeries>, idents: HashSet<String>) {
    self
      .samples_received_total
      .with_label_values(&[channel.as_str()])
      .inc_by(u64::try_from(series.len()).unwrap_or(u64::MAX));

    for IdentifiedSeries { ident, mut series } in series {
      self.enricher.enrich(&ident, &mut series);
      self.filter.maybe_debug(channel.as_str(), &series);
      if self.filter.should_drop(&series) {
        log::trace!("dropping sample of {ident}");
        self.samples_dropped_total.inc();
        continue;
      }

      if !self.relabels.is_empty() {
        let Some(labels) = relabel::process(std::mem::take(&mut series.labels), &self.relabels)
        else {
          self.samples_dropped_total.inc();
          continue;
        };
        series.labels = labels;
      }

      self.ident_stats.increase(&ident, 1);
      let key = shard_key(self.sharding_key, &ident, &series);
      self.fabric.push_sample(&key, series);
    }

    if !idents.is_empty() {
      self.ident_set.mset(idents);
    }
  }

  fn touch_idents(&self, idents: Vec<String>) {
    self.ident_set.mset(idents);
  }
}
