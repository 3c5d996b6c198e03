// pushgw - bitdrift's metrics ingestion gateway
// Copyright Bitdrift, Inc. All rights reserved.
//
// Use of this source code is governed by a source available license that can be found in the
// LICENSE file or at:
// https://polyformproject.org/wp-content/uploads/2020/06/PolyForm-Shield-1.0.0.txt

use super::*;
use crate::test::label_pairs;
use pretty_assertions::assert_eq;

const NOW: i64 = 1_700_000_100;

fn pairs(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
  pairs
    .iter()
    .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
    .collect()
}

#[test]
fn ident_tag_promotes_endpoint() {
  let body = br#"{"metric":"net","endpoint":"h1","tags":"ident=real,dc=nj",
    "timestamp":1700000000,"value":3}"#;
  let result = parse(body, NOW).unwrap();
  assert_eq!(0, result.fail);
  let series = &result.series[0];
  assert_eq!("real", series.ident);
  assert_eq!(
    pairs(&[
      ("__name__", "net"),
      ("dc", "nj"),
      ("endpoint", "h1"),
      ("ident", "real"),
    ]),
    label_pairs(&series.series)
  );
  assert_eq!(1_700_000_000_000, series.series.samples[0].timestamp);
  assert_eq!(3.0, series.series.samples[0].value);
}

#[test]
fn endpoint_becomes_ident() {
  let body = br#"[{"metric":"disk.used","endpoint":"h2","tags":"","timestamp":0,"value":"7"}]"#;
  let result = parse(body, NOW).unwrap();
  let series = &result.series[0];
  assert_eq!("h2", series.ident);
  assert_eq!(
    pairs(&[("__name__", "disk_used"), ("ident", "h2")]),
    label_pairs(&series.series)
  );
  assert_eq!(NOW * 1000, series.series.samples[0].timestamp);
  assert!(result.idents.contains("h2"));
}

#[test]
fn no_endpoint() {
  let body = br#"[{"metric":"m","tags":"a=b,garbage,c=d=e","timestamp":1700000000,"value":1},
    {"metric":"m","endpoint":"x","tags":"1bad=1","timestamp":1700000000,"value":1},
    {"metric":"m","timestamp":1700000000,"value":[1]}]"#;
  let result = parse(body, NOW).unwrap();
  assert_eq!(1, result.series.len());
  assert_eq!(2, result.fail);
  assert_eq!("", result.series[0].ident);
  assert_eq!(
    pairs(&[("__name__", "m"), ("a", "b"), ("c", "d=e")]),
    label_pairs(&result.series[0].series)
  );
}

#[test]
fn colliding_tags_are_rejected() {
  let body = br#"[{"metric":"m","endpoint":"h","tags":"a.b=1,a_b=2","timestamp":1700000000,"value":1},
    {"metric":"m","endpoint":"h","tags":"__name__=x","timestamp":1700000000,"value":1}]"#;
  let result = parse(body, NOW).unwrap();
  assert_eq!(2, result.fail);
  assert!(result.series.is_empty());
  assert_eq!(
    vec![
      ParseError::DuplicateLabel("a_b".to_string()),
      ParseError::DuplicateLabel("__name__".to_string()),
    ],
    result.errors
  );
}

#[test]
fn negative_timestamp() {
  let body = br#"{"metric":"m","endpoint":"h","timestamp":-9223372036854775807,"value":1}"#;
  let result = parse(body, NOW).unwrap();
  assert_eq!(1, result.fail);
  assert!(result.series.is_empty());
  assert!(result.idents.is_empty());
}
