use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use log::{debug, error};
use thiserror::Error;
use tokio::sync::mpsc::{self, error::TrySendError, Permit};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

pub type Job = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum PoolError {
  #[error("worker queue is full")]
  Full,
  #[error("worker pool is closed")]
  Closed,
}

/// Fixed number of workers pulling jobs off a bounded queue.
///
/// At most `workers` jobs run at once and at most `capacity` wait; anything
/// beyond that is refused by [`WorkerPool::try_reserve`] so the caller can
/// push back on the client.
pub struct WorkerPool {
  sender: mpsc::Sender<Job>,
  workers: Vec<JoinHandle<()>>,
}

/// A reserved queue slot. Submitting through it cannot fail.
pub struct Slot<'a> {
  permit: Permit<'a, Job>,
}

impl<'a> Slot<'a> {
  pub fn submit<F>(self, job: F)
  where
    F: Future<Output = ()> + Send + 'static,
  {
    self.permit.send(Box::pin(job));
  }
}

impl WorkerPool {
  pub fn new(workers: usize, capacity: usize) -> Self {
    let (sender, receiver) = mpsc::channel::<Job>(capacity.max(1));
    let receiver = Arc::new(Mutex::new(receiver));

    let workers = (0..workers.max(1))
      .map(|id| {
        let receiver = receiver.clone();
        tokio::spawn(async move {
          loop {
            let job = { receiver.lock().await.recv().await };
            let Some(job) = job else { break };
            // run on its own task so a panicking job does not take the worker down
            if let Err(e) = tokio::spawn(job).await {
              error!("worker {}: job panicked: {}", id, e);
            }
          }
          debug!("worker {} stopped", id);
        })
      })
      .collect();

    Self { sender, workers }
  }

  pub fn try_reserve(&self) -> Result<Slot<'_>, PoolError> {
    match self.sender.try_reserve() {
      Ok(permit) => Ok(Slot { permit }),
      Err(TrySendError::Full(_)) => Err(PoolError::Full),
      Err(TrySendError::Closed(_)) => Err(PoolError::Closed),
    }
  }

  pub fn submit<F>(&self, job: F) -> Result<(), PoolError>
  where
    F: Future<Output = ()> + Send + 'static,
  {
    self.try_reserve()?.submit(job);
    Ok(())
  }

  /// Stops accepting work and waits for queued and running jobs to finish.
  pub async fn join(self) {
    drop(self.sender);
    for worker in self.workers {
      let _ = worker.await;
    }
  }
}
