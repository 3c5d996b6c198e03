// pushgw - bitdrift's metrics ingestion gateway
// Copyright Bitdrift, Inc. All rights reserved.
//
// Use of this source code is governed by a source available license that can be found in the
// LICENSE file or at:
// https://polyformproject.org/wp-content/uploads/2020/06/PolyForm-Shield-1.0.0.txt

#[cfg(test)]
#[path = "./shutdown_test.rs"]
mod shutdown_test;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

//
// ComponentShutdownTrigger
//

/// Owner side of a shutdown signal. Every `ComponentShutdown` made from the trigger holds a
/// completion sender; `shutdown()` cancels and then waits until all of them have been dropped.
pub struct ComponentShutdownTrigger {
  token: CancellationToken,
  complete_tx: mpsc::Sender<()>,
  complete_rx: mpsc::Receiver<()>,
}

impl Default for ComponentShutdownTrigger {
  fn default() -> Self {
    let (complete_tx, complete_rx) = mpsc::channel(1);
    Self {
      token: CancellationToken::new(),
      complete_tx,
      complete_rx,
    }
  }
}

impl ComponentShutdownTrigger {
  #[must_use]
  pub fn make_shutdown(&self) -> ComponentShutdown {
    ComponentShutdown {
      token: self.token.clone(),
      _complete_tx: self.complete_tx.clone(),
    }
  }

  #[must_use]
  pub fn make_handle(&self) -> ComponentShutdownTriggerHandle {
    ComponentShutdownTriggerHandle {
      token: self.token.clone(),
      complete_tx: self.complete_tx.clone(),
    }
  }

  pub async fn shutdown(self) {
    let Self {
      token,
      complete_tx,
      mut complete_rx,
    } = self;
    token.cancel();
    drop(complete_tx);
    // Resolves to None once every outstanding sender is gone.
    let _ignored = complete_rx.recv().await;
  }
}

//
// ComponentShutdownTriggerHandle
//

/// Cloneable handle used to hand out shutdowns from places that do not own the trigger.
#[derive(Clone)]
pub struct ComponentShutdownTriggerHandle {
  token: CancellationToken,
  complete_tx: mpsc::Sender<()>,
}

impl ComponentShutdownTriggerHandle {
  #[must_use]
  pub fn make_shutdown(&self) -> ComponentShutdown {
    ComponentShutdown {
      token: self.token.clone(),
      _complete_tx: self.complete_tx.clone(),
    }
  }
}

//
// ComponentShutdown
//

pub struct ComponentShutdown {
  token: CancellationToken,
  _complete_tx: mpsc::Sender<()>,
}

impl ComponentShutdown {
  pub async fn cancelled(&mut self) {
    self.token.cancelled().await;
  }

  #[must_use]
  pub fn is_cancelled(&self) -> bool {
    self.token.is_cancelled()
  }
}
