// pushgw - bitdrift's metrics ingestion gateway
// Copyright Bitdrift, Inc. All rights reserved.
//
// Use of this source code is governed by a source available license that can be found in the
// LICENSE file or at:
// https://polyformproject.org/wp-content/uploads/2020/06/PolyForm-Shield-1.0.0.txt

use super::*;
use pretty_assertions::assert_eq;
use pushgw_metrics::pipeline::config::ShardingKey;
use std::io::Write;
use std::time::Duration;
use tempfile::NamedTempFile;

const CENTER: &str = r"
ident_set:
  database_url: sqlite::memory:
";

#[test]
fn defaults() {
  let config = load_from_str(CENTER).unwrap();
  assert_eq!(DEFAULT_BIND, config.bind);
  assert!(config.admin.is_none());
  assert_eq!(Mode::Center, config.mode);
  assert!(config.basic_auth.is_empty());
  assert_eq!("busigroup", config.pushgw.busi_group_label_key);
  assert_eq!(5000, config.pushgw.write_concurrency);
  assert_eq!(ShardingKey::Ident, config.pushgw.writer_opt.sharding_key);
  assert_eq!(Duration::from_secs(1), config.ident_set.persist_interval);
  assert_eq!(100, config.ident_set.batch_size);
  assert!(config.ident_stats.enable);
}

#[test]
fn example_config() {
  let path = concat!(env!("CARGO_MANIFEST_DIR"), "/config/pushgw.yaml");
  let config = load_from_file(Path::new(path)).unwrap();
  assert_eq!("0.0.0.0:17001", config.admin.unwrap().bind);
  assert_eq!(1, config.pushgw.writers.len());
  assert_eq!(
    vec![("X-Scope-OrgID", "n9e")],
    config.pushgw.writers[0].header_pairs().collect::<Vec<_>>()
  );
  assert_eq!(1, config.pushgw.relabels.len());
  assert_eq!(1, config.targets.len());
  assert_eq!(1, config.busi_groups.len());
  assert_eq!(Some(&"changeme".to_string()), config.basic_auth.get("agent"));
}

#[test]
fn edge_mode() {
  let mut file = NamedTempFile::new().unwrap();
  file
    .write_all(
      br"
mode: edge
ident_set:
  center_urls: [http://center:17000]
  center_timeout: 3s
",
    )
    .unwrap();
  let config = load_from_file(file.path()).unwrap();
  assert_eq!(Mode::Edge, config.mode);
  assert_eq!(
    vec!["http://center:17000".to_string()],
    config.ident_set.center_urls
  );
  assert_eq!(Duration::from_secs(3), config.ident_set.center_timeout);
}

#[test]
fn validation_errors() {
  let error = load_from_str("mode: center").unwrap_err();
  assert!(error.to_string().contains("database_url"), "{error}");

  let error = load_from_str("mode: edge").unwrap_err();
  assert!(error.to_string().contains("center_urls"), "{error}");

  let error = load_from_str(
    r"
ident_set:
  database_url: sqlite::memory:
pushgw:
  write_concurrency: 0
",
  )
  .unwrap_err();
  assert!(error.to_string().contains("pushgw"), "{error}");

  let error = load_from_str(
    r"
ident_set:
  database_url: sqlite::memory:
pushgw:
  writers:
    - url: http://a
      headers: [X-Only-Name]
",
  )
  .unwrap_err();
  assert!(format!("{error:#}").contains("name/value pairs"), "{error:#}");
}

#[test]
fn unknown_fields() {
  assert!(load_from_str("bogus: 1").is_err());
  assert!(
    load_from_str(
      r"
ident_set:
  database_url: sqlite::memory:
  nope: true
"
    )
    .is_err()
  );
  assert!(load_from_str("mode: satellite").is_err());
}

#[test]
fn missing_file() {
  assert!(load_from_file(Path::new("/nonexistent/pushgw.yaml")).is_err());
}
