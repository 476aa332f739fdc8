use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::broadcast;

/// Cooperative shutdown handle.
///
/// Every clone observes the same signal. Long-running loops either poll
/// [`Shutdown::is_shutdown`] between iterations or race [`Shutdown::recv`]
/// against their blocking point in a `tokio::select!`.
#[derive(Debug)]
pub struct Shutdown {
  shutdown: bool,
  flag: Arc<AtomicBool>,
  receiver: broadcast::Receiver<()>,
  sender: broadcast::Sender<()>,
}

impl Shutdown {
  pub fn new() -> Shutdown {
    let (sender, receiver) = broadcast::channel(1);
    Shutdown {
      shutdown: false,
      flag: Arc::new(AtomicBool::new(false)),
      receiver,
      sender,
    }
  }

  pub fn is_shutdown(&self) -> bool {
    self.shutdown || self.flag.load(Ordering::SeqCst)
  }

  /// Waits until shutdown has been triggered by any clone.
  pub async fn recv(&mut self) {
    if self.is_shutdown() {
      self.shutdown = true;
      return;
    }

    let _ = self.receiver.recv().await;
    self.shutdown = true;
  }

  pub fn trigger(&self) {
    self.flag.store(true, Ordering::SeqCst);
    let _ = self.sender.send(());
  }
}

impl Default for Shutdown {
  fn default() -> Self {
    Self::new()
  }
}

impl Clone for Shutdown {
  fn clone(&self) -> Shutdown {
    Shutdown {
      shutdown: self.is_shutdown(),
      flag: self.flag.clone(),
      receiver: self.sender.subscribe(),
      sender: self.sender.clone(),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::time::Duration;

  #[tokio::test]
  async fn clones_observe_trigger() {
    let shutdown = Shutdown::new();
    let mut waiter = shutdown.clone();
    let handle = tokio::spawn(async move {
      waiter.recv().await;
      waiter.is_shutdown()
    });

    shutdown.trigger();
    let observed = tokio::time::timeout(Duration::from_secs(1), handle)
      .await
      .unwrap()
      .unwrap();
    assert!(observed);
  }

  #[tokio::test]
  async fn late_clone_sees_earlier_trigger() {
    let shutdown = Shutdown::new();
    shutdown.trigger();
    let mut late = shutdown.clone();
    assert!(late.is_shutdown());
    tokio::time::timeout(Duration::from_millis(100), late.recv())
      .await
      .unwrap();
  }
}
