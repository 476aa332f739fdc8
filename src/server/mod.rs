use std::io;
use std::net::SocketAddr;
use std::time::Duration;

use log::{error, info, warn};
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};

pub mod framing;
pub mod message;
pub mod session;
pub mod transfer;

use crate::config::ServerConfig;
use crate::pool::WorkerPool;
use crate::shutdown::Shutdown;
use crate::storage::Storage;

use self::session::Session;

pub const SERVER_BUSY: &str = "ERROR: Server busy\n";

/// Accept errors that leave the listener usable.
fn is_transient_accept_error(e: &io::Error) -> bool {
  use std::io::ErrorKind;
  matches!(
    e.kind(),
    ErrorKind::ConnectionAborted
      | ErrorKind::ConnectionReset
      | ErrorKind::ConnectionRefused
      | ErrorKind::Interrupted
      | ErrorKind::WouldBlock
      | ErrorKind::TimedOut
  ) || is_descriptor_exhaustion(e)
}

/// Out of file descriptors: retry once running sessions have released some.
#[cfg(unix)]
fn is_descriptor_exhaustion(e: &io::Error) -> bool {
  matches!(e.raw_os_error(), Some(libc::EMFILE) | Some(libc::ENFILE))
}

#[cfg(not(unix))]
fn is_descriptor_exhaustion(_e: &io::Error) -> bool {
  false
}

/// The stream (TCP) side: accepts connections and hands each one to the
/// worker pool as an independent [`Session`].
pub struct Server {
  listener: TcpListener,
  storage: Storage,
  pool: WorkerPool,
  shutdown: Shutdown,
}

impl Server {
  /// Binds the listener. `storage` is shared with the datagram side so file
  /// leases cover both protocols.
  pub async fn bind(
    addr: &str,
    storage: Storage,
    cfg: &ServerConfig,
    shutdown: Shutdown,
  ) -> Result<Self, io::Error> {
    let listener = TcpListener::bind(addr).await?;
    storage.ensure_root().await?;

    Ok(Self {
      listener,
      storage,
      pool: WorkerPool::new(cfg.workers, cfg.queue_capacity),
      shutdown,
    })
  }

  pub fn local_addr(&self) -> io::Result<SocketAddr> {
    self.listener.local_addr()
  }

  /// Accepts until shutdown or a fatal accept error, then waits for running
  /// sessions to drain.
  pub async fn listen(mut self) -> Result<(), io::Error> {
    info!("[TCP] listening on {}", self.local_addr()?);
    info!("[TCP] root folder: {}", self.storage.root().display());

    let mut result = Ok(());
    while !self.shutdown.is_shutdown() {
      let accepted = tokio::select! {
        accepted = self.listener.accept() => accepted,
        _ = self.shutdown.recv() => break,
      };
      match accepted {
        Ok((socket, addr)) => self.handle(socket, addr).await,
        Err(e) if is_transient_accept_error(&e) => {
          warn!("[TCP] accept failed: {}", e);
          tokio::time::sleep(Duration::from_millis(100)).await;
        }
        Err(e) => {
          error!("[TCP] accept failed, stopping listener: {}", e);
          result = Err(e);
          break;
        }
      }
    }

    info!("[TCP] no longer accepting, draining sessions");
    self.pool.join().await;
    result
  }

  async fn handle(&self, mut socket: TcpStream, addr: SocketAddr) {
    let slot = match self.pool.try_reserve() {
      Ok(slot) => slot,
      Err(e) => {
        warn!("[TCP] rejecting {}: {}", addr, e);
        let _ = socket.write_all(SERVER_BUSY.as_bytes()).await;
        return;
      }
    };

    let session = Session::new(socket, self.storage.clone(), self.shutdown.clone());
    info!("[TCP] client connected: {} (session {})", addr, session.id);
    slot.submit(async move {
      let id = session.id;
      match session.run().await {
        Ok(()) => info!("[TCP] session {} for {} ended", id, addr),
        Err(e) => warn!("[TCP] session {} for {} aborted: {}", id, addr, e),
      }
    });
  }
}
