// pushgw - bitdrift's metrics ingestion gateway
// Copyright Bitdrift, Inc. All rights reserved.
//
// Use of this source code is governed by a source available license that can be found in the
// LICENSE file or at:
// https://polyformproject.org/wp-content/uploads/2020/06/PolyForm-Shield-1.0.0.txt

use super::*;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

#[tokio::test]
async fn shutdown_waits_for_components() {
  let trigger = ComponentShutdownTrigger::default();
  let mut shutdown = trigger.make_handle().make_shutdown();
  let finished = Arc::new(AtomicBool::new(false));
  let cloned_finished = finished.clone();
  tokio::spawn(async move {
    shutdown.cancelled().await;
    tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    cloned_finished.store(true, Ordering::SeqCst);
  });

  trigger.shutdown().await;
  assert!(finished.load(Ordering::SeqCst));
}

#[tokio::test]
async fn shutdown_without_components() {
  let trigger = ComponentShutdownTrigger::default();
  let shutdown = trigger.make_shutdown();
  assert!(!shutdown.is_cancelled());
  drop(shutdown);
  trigger.shutdown().await;
}
