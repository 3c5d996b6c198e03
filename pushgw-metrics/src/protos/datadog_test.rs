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
fn host_field() {
  let body = br#"{"series":[{"metric":"system.load.1","points":[[1700000000,0.5],[0,1.5]],
    "host":"h1","tags":["env:prod","host:ignored","role"],"type":"gauge"}]}"#;
  let result = parse(body, NOW).unwrap();
  assert_eq!(0, result.fail);
  let series = &result.series[0];
  assert_eq!("h1", series.ident);
  assert_eq!(
    pairs(&[("__name__", "system_load_1"), ("env", "prod"), ("ident", "h1")]),
    label_pairs(&series.series)
  );
  assert_eq!(
    vec![
      Sample::new(1_700_000_000_000, 0.5),
      Sample::new(NOW * 1000, 1.5)
    ],
    series.series.samples
  );
}

#[test]
fn ident_tag_wins() {
  let body = br#"{"series":[{"metric":"m","points":[[1700000000,1]],
    "host":"h1","tags":["ident:real"]}]}"#;
  let result = parse(body, NOW).unwrap();
  let series = &result.series[0];
  assert_eq!("real", series.ident);
  assert_eq!(
    pairs(&[("__name__", "m"), ("host", "h1"), ("ident", "real")]),
    label_pairs(&series.series)
  );
}

#[test]
fn host_tag_fallback() {
  let body = br#"{"series":[{"metric":"m","points":[[1700000000,1]],"tags":["host:h9"]}]}"#;
  let result = parse(body, NOW).unwrap();
  assert_eq!("h9", result.series[0].ident);
  assert_eq!(
    pairs(&[("__name__", "m"), ("ident", "h9")]),
    label_pairs(&result.series[0].series)
  );
}

#[test]
fn failures() {
  let body = br#"{"series":[{"metric":"m","points":[]},{"metric":"9m","points":[[1,1]]},
    {"metric":"m","points":[[1,1]],"tags":["0x:y"]},{"points":[[1,1]]}]}"#;
  let result = parse(body, NOW).unwrap();
  assert_eq!(4, result.fail);
  assert!(result.series.is_empty());
  assert_eq!(ParseError::NoPoints, result.errors[0]);

  assert!(parse(br#"[1,2]"#, NOW).is_err());
}

#[test]
fn repeated_tags_are_rejected() {
  let body = br#"{"series":[
    {"metric":"m","points":[[1700000000,1]],"tags":["env:a","env:b"]},
    {"metric":"m","points":[[1700000000,1]],"tags":["ident:x","ident:y"]},
    {"metric":"m","points":[[1700000000,1]],"tags":["env.x:a","env_x:b"]},
    {"metric":"m","points":[[1700000000,1]],"tags":["__name__:x"]},
    {"metric":"m","points":[[1700000000,1]],"tags":["env:a","ident:x"]}
  ]}"#;
  let result = parse(body, NOW).unwrap();
  assert_eq!(4, result.fail);
  assert_eq!(
    vec![
      ParseError::DuplicateLabel("env".to_string()),
      ParseError::DuplicateLabel("ident".to_string()),
      ParseError::DuplicateLabel("env_x".to_string()),
      ParseError::DuplicateLabel("__name__".to_string()),
    ],
    result.errors
  );
  assert_eq!(1, result.series.len());
  assert_eq!("x", result.series[0].ident);
}

#[test]
fn out_of_range_points() {
  let body = br#"{"series":[
    {"metric":"m","points":[[1e30,1]]},
    {"metric":"m","points":[[1700000000,1],[-5,1]]},
    {"metric":"m","points":[[1700000000.9,1]]}
  ]}"#;
  let result = parse(body, NOW).unwrap();
  assert_eq!(2, result.fail);
  assert_eq!(ParseError::InvalidTimestamp(i64::MAX), result.errors[0]);
  assert_eq!(ParseError::InvalidTimestamp(-5), result.errors[1]);
  assert_eq!(
    vec![Sample::new(1_700_000_000_000, 1.0)],
    result.series[0].series.samples
  );
}
