// pushgw - bitdrift's metrics ingestion gateway
// Copyright Bitdrift, Inc. All rights reserved.
//
// Use of this source code is governed by a source available license that can be found in the
// LICENSE file or at:
// https://polyformproject.org/wp-content/uploads/2020/06/PolyForm-Shield-1.0.0.txt

use super::*;
use crate::test::{label_pairs, make_timeseries};
use pretty_assertions::assert_eq;

const NOW: i64 = 1_700_000_100;

#[test]
fn single_object() {
  let body = br#"{"metric":"sys.cpu-util","timestamp":1700000000000,"value":"12.5",
    "tags":{"host":"h1","core.id":"0"}}"#;
  let result = parse(body, NOW).unwrap();
  assert_eq!(0, result.fail);
  assert_eq!(1, result.series.len());
  assert_eq!("h1", result.series[0].ident);
  assert_eq!(
    make_timeseries(
      "sys_cpu_util",
      &[("core_id", "0"), ("ident", "h1")],
      1_700_000_000_000,
      12.5
    ),
    result.series[0].series
  );
}

#[test]
fn ident_wins_over_host() {
  let body = br#"[{"metric":"m","timestamp":1700000000,"value":1,"tags":{"host":"h","ident":"i"}}]"#;
  let result = parse(body, NOW).unwrap();
  assert_eq!("i", result.series[0].ident);
  assert_eq!(
    vec![
      ("__name__".to_string(), "m".to_string()),
      ("host".to_string(), "h".to_string()),
      ("ident".to_string(), "i".to_string()),
    ],
    label_pairs(&result.series[0].series)
  );
}

#[test]
fn bad_items_are_skipped() {
  let body = br#"[
    {"metric":"ok","timestamp":1700000000,"value":1,"tags":{}},
    {"metric":"","timestamp":1700000000,"value":1,"tags":{}},
    {"metric":"bad_value","timestamp":1700000000,"value":"x","tags":{}},
    {"metric":"bad_tag","timestamp":1700000000,"value":1,"tags":{"1x":"y"}},
    {"timestamp":1700000000,"value":1},
    {"metric":"future","timestamp":1700000500,"value":1}
  ]"#;
  let result = parse(body, NOW).unwrap();
  assert_eq!(4, result.fail);
  assert_eq!(2, result.series.len());
  assert_eq!(
    NOW * 1000,
    result.series[1].series.samples[0].timestamp,
    "future timestamps are clamped"
  );
  assert_eq!("metric is blank", result.message());
  assert!(result.idents.is_empty());
}

#[test]
fn unreadable_body() {
  assert!(parse(b"{not json", NOW).is_err());
}

#[test]
fn colliding_tags_are_rejected() {
  let body = br#"[
    {"metric":"m","timestamp":1700000000,"value":1,"tags":{"a.b":"1","a_b":"2"}},
    {"metric":"m","timestamp":1700000000,"value":1,"tags":{"__name__":"x"}},
    {"metric":"m","timestamp":1700000000,"value":1,"tags":{"a.b":"1"}}
  ]"#;
  let result = parse(body, NOW).unwrap();
  assert_eq!(2, result.fail);
  assert_eq!(
    vec![
      ParseError::DuplicateLabel("a_b".to_string()),
      ParseError::DuplicateLabel("__name__".to_string()),
    ],
    result.errors
  );
  assert_eq!(1, result.series.len());
  assert_eq!(
    vec![
      ("__name__".to_string(), "m".to_string()),
      ("a_b".to_string(), "1".to_string()),
    ],
    label_pairs(&result.series[0].series)
  );
}

#[test]
fn out_of_range_timestamps() {
  let body = br#"[
    {"metric":"m","timestamp":-9223372036854775807,"value":1},
    {"metric":"m","timestamp":-1,"value":1},
    {"metric":"m","timestamp":9223372036854775807,"value":1}
  ]"#;
  let result = parse(body, NOW).unwrap();
  assert_eq!(2, result.fail);
  assert_eq!(
    ParseError::InvalidTimestamp(-9_223_372_036_854_775_807),
    result.errors[0]
  );
  assert_eq!(1, result.series.len());
  assert_eq!(NOW * 1000, result.series[0].series.samples[0].timestamp);
}
