// pushgw - bitdrift's metrics ingestion gateway
// Copyright Bitdrift, Inc. All rights reserved.
//
// Use of this source code is governed by a source available license that can be found in the
// LICENSE file or at:
// https://polyformproject.org/wp-content/uploads/2020/06/PolyForm-Shield-1.0.0.txt

pub mod logging;
pub mod shutdown;

#[doc(hidden)]
pub use log as log_facade;

use std::sync::Once;

#[cfg(test)]
#[ctor::ctor]
fn test_global_init() {
  global_initialize();
}

/// What the process panic hook does after logging the panic.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PanicMode {
  /// Log and continue with the default hook. A panicking tokio task only takes down itself.
  Log,
  /// Log and abort the process.
  ForceAbort,
}

pub fn global_initialize() {
  global_initialize_with(PanicMode::Log);
}

/// Logging first so the panic hook has somewhere to write. Only the first call installs anything.
pub fn global_initialize_with(panic_mode: PanicMode) {
  static PANIC_HOOK: Once = Once::new();

  logging::initialize();
  PANIC_HOOK.call_once(|| {
    let default_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
      log::error!(
        "panic: {info}\n{}",
        std::backtrace::Backtrace::force_capture()
      );
      default_hook(info);
      if panic_mode == PanicMode::ForceAbort {
        std::process::abort();
      }
    }));
  });
}

pub trait LossyIntoToFloat {
  fn lossy_to_f64(self) -> f64;
}

impl LossyIntoToFloat for u64 {
  #[allow(clippy::cast_precision_loss)]
  fn lossy_to_f64(self) -> f64 {
    self as f64
  }
}

pub trait LossyFloatToInt {
  fn lossy_to_i64(self) -> i64;
}

impl LossyFloatToInt for f64 {
  #[allow(clippy::cast_possible_truncation)]
  fn lossy_to_i64(self) -> i64 {
    self as i64
  }
}
