// pushgw - bitdrift's metrics ingestion gateway
// Copyright Bitdrift, Inc. All rights reserved.
//
// Use of this source code is governed by a source available license that can be found in the
// LICENSE file or at:
// https://polyformproject.org/wp-content/uploads/2020/06/PolyForm-Shield-1.0.0.txt


use crate::protos::sample::is_valid_name;
use pushgw_protobuf::protos::prometheus::{Label, TimeSeries};
use regex::Regex;
use serde::Deserialize;
use std::collections::HashMap;

const DEFAULT_REGEX: &str = "(.*)";
const DEFAULT_SEPARATOR: &str = ";";
const DEFAULT_REPLACEMENT: &str = "$1";

#[derive(thiserror::Error, Debug)]
pub enum RelabelError {
  #[error("invalid regex '{0}': {1}")]
  InvalidRegex(String, regex::Error),
  #[error("action {0:?} requires a target_label")]
  MissingTargetLabel(Action),
  #[error("hashmod requires a non zero modulus")]
  MissingModulus,
}

pub type Result<T> = std::result::Result<T, RelabelError>;

//
// Action
//

#[derive(Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Action {
  #[default]
  Replace,
  Keep,
  Drop,
  Hashmod,
  Labelmap,
  Labeldrop,
  Labelkeep,
  Lowercase,
  Uppercase,
  DropIfEqual,
}

//
// RelabelConfig
//

/// A relabel rule as written in configuration. Unset fields take their defaults when the rule is
/// compiled; an explicitly empty `replacement` stays empty.
#[derive(Deserialize, Clone, Debug, Default)]
#[serde(deny_unknown_fields)]
pub struct RelabelConfig {
  #[serde(default)]
  pub source_labels: Vec<String>,
  pub separator: Option<String>,
  pub regex: Option<String>,
  #[serde(default)]
  pub modulus: u64,
  #[serde(default)]
  pub target_label: String,
  pub replacement: Option<String>,
  #[serde(default)]
  pub action: Action,
  #[serde(rename = "if")]
  pub if_expr: Option<String>,
}

//
// RelabelRule
//

/// A compiled relabel rule. The regex is anchored at both ends.
#[derive(Debug, Clone)]
pub struct RelabelRule {
  source_labels: Vec<String>,
  separator: String,
  regex: Regex,
  modulus: u64,
  target_label: String,
  replacement: String,
  action: Action,
  if_regex: Option<Regex>,
}

impl RelabelRule {
  pub fn new(config: &RelabelConfig) -> Result<Self> {
    let pattern = config
      .regex
      .as_deref()
      .filter(|r| !r.is_empty())
      .unwrap_or(DEFAULT_REGEX);
    let regex = Regex::new(&format!("^(?:{pattern})$"))
      .map_err(|e| RelabelError::InvalidRegex(pattern.to_string(), e))?;
    let if_regex = config
      .if_expr
      .as_deref()
      .filter(|r| !r.is_empty())
      .map(|r| Regex::new(r).map_err(|e| RelabelError::InvalidRegex(r.to_string(), e)))
      .transpose()?;

    match config.action {
      Action::Replace | Action::Hashmod | Action::Lowercase | Action::Uppercase
        if config.target_label.is_empty() =>
      {
        return Err(RelabelError::MissingTargetLabel(config.action));
      },
      Action::Hashmod if config.modulus == 0 => return Err(RelabelError::MissingModulus),
      _ => {},
    }

    Ok(Self {
      source_labels: config.source_labels.clone(),
      separator: config
        .separator
        .as_deref()
        .filter(|s| !s.is_empty())
        .unwrap_or(DEFAULT_SEPARATOR)
        .to_string(),
      regex,
      modulus: config.modulus,
      target_label: config.target_label.clone(),
      replacement: config
        .replacement
        .clone()
        .unwrap_or_else(|| DEFAULT_REPLACEMENT.to_string()),
      action: config.action,
      if_regex,
    })
  }

  pub fn compile_all(configs: &[RelabelConfig]) -> Result<Vec<Self>> {
    configs.iter().map(Self::new).collect()
  }

  fn source_value(&self, labels: &[Label]) -> String {
    let mut value = String::new();
    for (i, name) in self.source_labels.iter().enumerate() {
      if i > 0 {
        value.push_str(&self.separator);
      }
      if let Some(label) = labels.iter().find(|l| &l.name == name) {
        value.push_str(&label.value);
      }
    }
    value
  }

  /// Apply the rule. `None` means the series must be dropped.
  #[must_use]
  pub fn apply(&self, labels: Vec<Label>) -> Option<Vec<Label>> {
    let value = self.source_value(&labels);
    match self.action {
      Action::Drop => (!self.regex.is_match(&value)).then(|| LabelBuilder::new(labels).labels()),
      Action::Keep => self
        .regex
        .is_match(&value)
        .then(|| LabelBuilder::new(labels).labels()),
      Action::Replace => Some(self.replace(labels, &value)),
      Action::Lowercase => {
        let mut builder = LabelBuilder::new(labels);
        builder.set(&self.target_label, value.to_lowercase());
        Some(builder.labels())
      },
      Action::Uppercase => {
        let mut builder = LabelBuilder::new(labels);
        builder.set(&self.target_label, value.to_uppercase());
        Some(builder.labels())
      },
      Action::Hashmod => {
        let digest = md5::compute(value.as_bytes());
        let mut low = [0; 8];
        low.copy_from_slice(&digest.0[8 ..]);
        let hash = u64::from_be_bytes(low) % self.modulus;
        let mut builder = LabelBuilder::new(labels);
        builder.set(&self.target_label, hash.to_string());
        Some(builder.labels())
      },
      Action::Labelmap => {
        let mut builder = LabelBuilder::new(labels.clone());
        for label in &labels {
          if self.regex.is_match(&label.name) {
            let name = self.regex.replace_all(&label.name, self.replacement.as_str());
            builder.set(&name, label.value.clone());
          }
        }
        Some(builder.labels())
      },
      Action::Labeldrop => {
        let mut builder = LabelBuilder::new(labels);
        builder.retain(|name| !self.regex.is_match(name));
        Some(builder.labels())
      },
      Action::Labelkeep => {
        let mut builder = LabelBuilder::new(labels);
        builder.retain(|name| self.regex.is_match(name));
        Some(builder.labels())
      },
      Action::DropIfEqual => {
        if self.source_labels.len() < 2 {
          return Some(LabelBuilder::new(labels).labels());
        }
        let value_of = |name: &String| {
          labels
            .iter()
            .find(|l| &l.name == name)
            .map_or("", |l| l.value.as_str())
        };
        let first = value_of(&self.source_labels[0]);
        if self.source_labels[1 ..].iter().all(|n| value_of(n) == first) {
          None
        } else {
          Some(LabelBuilder::new(labels).labels())
        }
      },
    }
  }

  fn replace(&self, labels: Vec<Label>, value: &str) -> Vec<Label> {
    if let Some(if_regex) = &self.if_regex {
      let matched = labels
        .iter()
        .any(|l| if_regex.is_match(&format!("{}=\"{}\"", l.name, l.value)));
      if !matched {
        return labels;
      }
    }

    let mut builder = LabelBuilder::new(labels);
    if self.source_labels.is_empty() {
      builder.set(&self.target_label, self.replacement.clone());
      return builder.labels();
    }

    if self.replacement.is_empty() && self.source_labels.len() > 1 {
      builder.set(&self.target_label, value.to_string());
      return builder.labels();
    }

    let Some(captures) = self.regex.captures(value) else {
      return builder.labels();
    };
    if !is_valid_name(&self.target_label) {
      builder.delete(&self.target_label);
      return builder.labels();
    }

    let mut expanded = String::new();
    captures.expand(&self.replacement, &mut expanded);
    if expanded.is_empty() {
      builder.delete(&self.target_label);
    } else {
      builder.set(&self.target_label, expanded);
    }
    builder.labels()
  }
}

/// Run every rule in order. Stops at the first rule that drops the series.
#[must_use]
pub fn process(labels: Vec<Label>, rules: &[RelabelRule]) -> Option<Vec<Label>> {
  let mut labels = labels;
  for rule in rules {
    labels = rule.apply(labels)?;
  }
  Some(labels)
}

/// Relabel a batch of series, dropping series that are dropped by a rule or end up with no
/// labels.
#[must_use]
pub fn relabel_series(series: Vec<TimeSeries>, rules: &[RelabelRule]) -> Vec<TimeSeries> {
  if rules.is_empty() {
    return series;
  }

  series
    .into_iter()
    .filter_map(|s| {
      let labels = process(s.labels, rules).filter(|l| !l.is_empty())?;
      Some(TimeSeries {
        labels,
        samples: s.samples,
      })
    })
    .collect()
}

//
// LabelBuilder
//

struct LabelBuilder {
  labels: HashMap<String, String>,
}

impl LabelBuilder {
  fn new(labels: Vec<Label>) -> Self {
    Self {
      labels: labels.into_iter().map(|l| (l.name, l.value)).collect(),
    }
  }

  fn set(&mut self, name: &str, value: String) {
    self.labels.insert(name.to_string(), value);
  }

  fn delete(&mut self, name: &str) {
    self.labels.remove(name);
  }

  fn retain(&mut self, keep: impl Fn(&str) -> bool) {
    self.labels.retain(|name, _| keep(name));
  }

  // Sorted by name, descending.
  fn labels(self) -> Vec<Label> {
    let mut labels: Vec<Label> = self
      .labels
      .into_iter()
      .map(|(name, value)| Label { name, value })
      .collect();
    labels.sort_unstable_by(|a, b| b.name.cmp(&a.name));
    labels
  }
}
