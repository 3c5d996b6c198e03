// pushgw - bitdrift's metrics ingestion gateway
// Copyright Bitdrift, Inc. All rights reserved.
//
// Use of this source code is governed by a source available license that can be found in the
// LICENSE file or at:
// https://polyformproject.org/wp-content/uploads/2020/06/PolyForm-Shield-1.0.0.txt

#[cfg(test)]
#[path = "./logging_test.rs"]
mod logging_test;

use parking_lot::Mutex;
use std::sync::OnceLock;
use std::time::{Duration, Instant};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Registry, reload};

const DEFAULT_FILTER: &str = "info";

static FILTER_HANDLE: OnceLock<reload::Handle<EnvFilter, Registry>> = OnceLock::new();

#[derive(thiserror::Error, Debug)]
pub enum LogFilterError {
  #[error("logging is not initialized")]
  NotInitialized,
  #[error("invalid filter: {0}")]
  Parse(#[from] tracing_subscriber::filter::ParseError),
  #[error("reload error: {0}")]
  Reload(#[from] reload::Error),
}

// Installs the global subscriber. `log` records are bridged into tracing so library code only
// needs the `log` macros. Safe to call more than once.
pub fn initialize() {
  FILTER_HANDLE.get_or_init(|| {
    let filter =
      EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));
    let (filter, handle) = reload::Layer::new(filter);
    let _ignored = tracing_subscriber::registry()
      .with(filter)
      .with(tracing_subscriber::fmt::layer().with_thread_ids(true))
      .try_init();
    handle
  });
}

/// Replace the active filter with new `RUST_LOG` style directives.
pub fn swap_filter(directives: &str) -> Result<(), LogFilterError> {
  let handle = FILTER_HANDLE.get().ok_or(LogFilterError::NotInitialized)?;
  let filter = EnvFilter::try_new(directives)?;
  handle.reload(filter)?;
  Ok(())
}

//
// EveryGate
//

/// Per call site state for `warn_every!`.
pub struct EveryGate {
  last: Mutex<Option<Instant>>,
}

impl EveryGate {
  #[must_use]
  pub const fn new() -> Self {
    Self {
      last: Mutex::new(None),
    }
  }

  pub fn should_log(&self, interval: Duration) -> bool {
    let now = Instant::now();
    let mut last = self.last.lock();
    match *last {
      Some(previous) if now.duration_since(previous) < interval => false,
      _ => {
        *last = Some(now);
        true
      },
    }
  }
}

impl Default for EveryGate {
  fn default() -> Self {
    Self::new()
  }
}

/// Log a warning at most once per interval for the calling site. The interval is a
/// `time::Duration` or anything that converts into a `std::time::Duration`.
#[macro_export]
macro_rules! warn_every {
  ($interval:expr, $($arg:tt)+) => {{
    static GATE: $crate::logging::EveryGate = $crate::logging::EveryGate::new();
    if GATE.should_log($crate::logging::to_std_duration($interval)) {
      $crate::log_facade::warn!($($arg)+);
    }
  }};
}

#[doc(hidden)]
pub fn to_std_duration(interval: impl IntoStdDuration) -> Duration {
  interval.into_std_duration()
}

#[doc(hidden)]
pub trait IntoStdDuration {
  fn into_std_duration(self) -> Duration;
}

impl IntoStdDuration for Duration {
  fn into_std_duration(self) -> Duration {
    self
  }
}

impl IntoStdDuration for time::Duration {
  fn into_std_duration(self) -> Duration {
    self.unsigned_abs()
  }
}
