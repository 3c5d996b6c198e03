// pushgw - bitdrift's metrics ingestion gateway
// Copyright Bitdrift, Inc. All rights reserved.
//
// Use of this source code is governed by a source available license that can be found in the
// LICENSE file or at:
// https://polyformproject.org/wp-content/uploads/2020/06/PolyForm-Shield-1.0.0.txt

#[cfg(test)]
#[path = "./enrich_test.rs"]
mod enrich_test;

use parking_lot::RwLock;
use pushgw_protobuf::protos::prometheus::{Label, TimeSeries};
use serde::Deserialize;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

//
// Target
//

/// A reporting host or agent as known by the inventory.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Target {
  pub ident: String,
  pub group_id: i64,
  pub tags_map: BTreeMap<String, String>,
}

impl Target {
  /// Build the tag map from space separated `k=v` user tags followed by `k=v` host tags. Items
  /// that aren't exactly one `k=v` pair are skipped. Later entries win.
  #[must_use]
  pub fn tags_map_from(tags: &str, host_tags: &[String]) -> BTreeMap<String, String> {
    tags
      .split_whitespace()
      .chain(host_tags.iter().map(String::as_str))
      .filter_map(|item| {
        let mut parts = item.split('=');
        match (parts.next(), parts.next(), parts.next()) {
          (Some(key), Some(value), None) => Some((key.to_string(), value.to_string())),
          _ => None,
        }
      })
      .collect()
  }
}

/// Static target definition as it appears in configuration.
#[derive(Deserialize, Debug, Clone, Default)]
#[serde(default, deny_unknown_fields)]
pub struct TargetSeed {
  pub ident: String,
  pub group_id: i64,
  pub tags: String,
  pub host_tags: Vec<String>,
}

impl From<TargetSeed> for Target {
  fn from(seed: TargetSeed) -> Self {
    Self {
      tags_map: Self::tags_map_from(&seed.tags, &seed.host_tags),
      ident: seed.ident,
      group_id: seed.group_id,
    }
  }
}

//
// BusiGroup
//

#[derive(Deserialize, Debug, Clone, Default, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct BusiGroup {
  pub id: i64,
  pub label_enable: bool,
  pub label_value: String,
}

//
// TargetCache
//

#[mockall::automock]
pub trait TargetCache: Send + Sync {
  fn get(&self, ident: &str) -> Option<Arc<Target>>;
}

//
// BusiGroupCache
//

#[mockall::automock]
pub trait BusiGroupCache: Send + Sync {
  fn get(&self, id: i64) -> Option<Arc<BusiGroup>>;
}

//
// InMemoryTargetCache
//

/// Readers clone the current snapshot; `set` replaces it wholesale.
#[derive(Default)]
pub struct InMemoryTargetCache {
  snapshot: RwLock<Arc<HashMap<String, Arc<Target>>>>,
}

impl InMemoryTargetCache {
  pub fn set(&self, targets: impl IntoIterator<Item = Target>) {
    let snapshot = targets
      .into_iter()
      .map(|t| (t.ident.clone(), Arc::new(t)))
      .collect();
    *self.snapshot.write() = Arc::new(snapshot);
  }

  #[must_use]
  pub fn len(&self) -> usize {
    self.snapshot.read().len()
  }

  #[must_use]
  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }
}

impl TargetCache for InMemoryTargetCache {
  fn get(&self, ident: &str) -> Option<Arc<Target>> {
    self.snapshot.read().get(ident).cloned()
  }
}

//
// InMemoryBusiGroupCache
//

#[derive(Default)]
pub struct InMemoryBusiGroupCache {
  snapshot: RwLock<Arc<HashMap<i64, Arc<BusiGroup>>>>,
}

impl InMemoryBusiGroupCache {
  pub fn set(&self, groups: impl IntoIterator<Item = BusiGroup>) {
    let snapshot = groups.into_iter().map(|g| (g.id, Arc::new(g))).collect();
    *self.snapshot.write() = Arc::new(snapshot);
  }
}

impl BusiGroupCache for InMemoryBusiGroupCache {
  fn get(&self, id: i64) -> Option<Arc<BusiGroup>> {
    self.snapshot.read().get(&id).cloned()
  }
}

//
// Enricher
//

/// Appends target tags and the business group label to samples of known targets.
pub struct Enricher {
  targets: Arc<dyn TargetCache>,
  busi_groups: Arc<dyn BusiGroupCache>,
  busi_group_label_key: String,
  label_rewrite: bool,
}

impl Enricher {
  #[must_use]
  pub fn new(
    targets: Arc<dyn TargetCache>,
    busi_groups: Arc<dyn BusiGroupCache>,
    busi_group_label_key: String,
    label_rewrite: bool,
  ) -> Self {
    Self {
      targets,
      busi_groups,
      busi_group_label_key,
      label_rewrite,
    }
  }

  pub fn enrich(&self, ident: &str, series: &mut TimeSeries) {
    if ident.is_empty() {
      return;
    }
    if let Some(target) = self.targets.get(ident) {
      self.append_labels(series, &target);
    }
  }

  pub fn append_labels(&self, series: &mut TimeSeries, target: &Target) {
    let mut index: HashMap<String, usize> = series
      .labels
      .iter()
      .enumerate()
      .map(|(i, l)| (l.name.clone(), i))
      .collect();

    for (name, value) in &target.tags_map {
      if let Some(i) = index.get(name) {
        if self.label_rewrite {
          value.clone_into(&mut series.labels[*i].value);
        }
        continue;
      }
      index.insert(name.clone(), series.labels.len());
      series.labels.push(Label::new(name.as_str(), value.as_str()));
    }

    if self.busi_group_label_key.is_empty()
      || index.contains_key(&self.busi_group_label_key)
      || target.group_id <= 0
    {
      return;
    }
    let Some(group) = self.busi_groups.get(target.group_id) else {
      return;
    };
    if group.label_enable {
      series.labels.push(Label::new(
        self.busi_group_label_key.as_str(),
        group.label_value.as_str(),
      ));
    }
  }
}
