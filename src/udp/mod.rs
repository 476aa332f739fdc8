use std::io;
use std::net::SocketAddr;

use log::{error, info, warn};
use tokio::fs::{self, File};
use tokio::net::UdpSocket;

pub mod arq;
pub mod command;
pub mod packet;
pub mod socket;

use crate::config::{ArqConfig, ServerConfig, BUFFER_SIZE};
use crate::error::TransferError;
use crate::server::message::time_reply;
use crate::server::transfer::throughput_kbps;
use crate::shutdown::Shutdown;
use crate::storage::{file_len, FileLease, Storage};

use self::command::{parse_command, DatagramCommand, UNKNOWN_COMMAND};
use self::socket::{send_text, DatagramSocket};

/// The datagram (UDP) side.
///
/// Commands are served one at a time: a transfer in progress owns the socket
/// until it finishes, times out, or is abandoned.
pub struct UdpServer<S = UdpSocket> {
  socket: S,
  storage: Storage,
  arq: ArqConfig,
  shutdown: Shutdown,
}

impl UdpServer<UdpSocket> {
  pub async fn bind(
    addr: &str,
    storage: Storage,
    cfg: &ServerConfig,
    shutdown: Shutdown,
  ) -> Result<Self, io::Error> {
    let socket = UdpSocket::bind(addr).await?;
    storage.ensure_root().await?;
    info!("[UDP] server started on {}", socket.local_addr()?);
    Ok(Self::with_socket(socket, storage, cfg.arq, shutdown))
  }

  pub fn local_addr(&self) -> io::Result<SocketAddr> {
    self.socket.local_addr()
  }
}

impl<S> UdpServer<S>
where
  S: DatagramSocket,
{
  pub fn with_socket(socket: S, storage: Storage, arq: ArqConfig, shutdown: Shutdown) -> Self {
    Self {
      socket,
      storage,
      arq,
      shutdown,
    }
  }

  pub async fn listen(mut self) -> Result<(), io::Error> {
    let mut buf = vec![0u8; BUFFER_SIZE];
    while !self.shutdown.is_shutdown() {
      let received = tokio::select! {
        received = self.socket.recv_from(&mut buf) => received,
        _ = self.shutdown.recv() => break,
      };
      match received {
        Ok((0, _)) => continue,
        Ok((n, peer)) => self.dispatch(&buf[..n], peer).await,
        Err(e) => warn!("[UDP] receive failed: {}", e),
      }
    }
    info!("[UDP] server stopped");
    Ok(())
  }

  pub async fn dispatch(&mut self, datagram: &[u8], peer: SocketAddr) {
    let cmd = parse_command(datagram);
    info!("[UDP] {}: {:?}", peer, cmd);
    let result = match cmd {
      DatagramCommand::UDP_TIME => self.reply(peer, &time_reply()).await,
      DatagramCommand::UDP_DOWNLOAD(file_name) => self.download(&file_name, peer).await,
      DatagramCommand::UDP_UPLOAD { file_name, size } => self.upload(&file_name, &size, peer).await,
      DatagramCommand::Invalid(usage) => self.reply(peer, usage).await,
      DatagramCommand::Unknown(_) => self.reply(peer, UNKNOWN_COMMAND).await,
    };
    if let Err(e) = result {
      warn!("[UDP] request from {} failed: {}", peer, e);
    }
  }

  async fn reply(&self, peer: SocketAddr, msg: &str) -> Result<(), TransferError> {
    send_text(&self.socket, peer, msg).await?;
    Ok(())
  }

  /// Tells the peer why its request was refused and hands the error back.
  async fn refuse(&self, peer: SocketAddr, e: TransferError) -> Result<(), TransferError> {
    self.reply(peer, &e.reply()).await?;
    Err(e)
  }

  fn claim(&self, file_name: &str) -> Result<FileLease, TransferError> {
    let path = self.storage.resolve(file_name)?;
    self.storage.lease(&path)
  }

  async fn download(&mut self, file_name: &str, peer: SocketAddr) -> Result<(), TransferError> {
    let lease = match self.claim(file_name) {
      Ok(lease) => lease,
      Err(e) => return self.refuse(peer, e).await,
    };
    let size = match file_len(lease.path()).await {
      Ok(Some(size)) => size,
      Ok(None) => return self.refuse(peer, TransferError::NotFound).await,
      Err(e) => return self.refuse(peer, TransferError::CannotOpen(e)).await,
    };
    let mut file = match File::open(lease.path()).await {
      Ok(file) => file,
      Err(e) => return self.refuse(peer, TransferError::CannotOpen(e)).await,
    };

    self.reply(peer, &format!("READY {}\n", size)).await?;
    match arq::send(&self.socket, peer, &mut file, &self.arq, &mut self.shutdown).await {
      Ok(report) => {
        info!(
          "[UDP] sent {} to {}: {} bytes in {} packets ({:.2} KB/s)",
          file_name,
          peer,
          report.bytes,
          report.packets,
          throughput_kbps(report.bytes, report.started)
        );
        Ok(())
      }
      Err(e) => {
        error!("[UDP] sending {} to {} abandoned: {}", file_name, peer, e);
        Err(e)
      }
    }
  }

  async fn upload(&mut self, file_name: &str, size: &str, peer: SocketAddr) -> Result<(), TransferError> {
    let size: u64 = match size.trim().parse() {
      Ok(size) => size,
      Err(_) => return self.refuse(peer, TransferError::InvalidSize).await,
    };
    let lease = match self.claim(file_name) {
      Ok(lease) => lease,
      Err(e) => return self.refuse(peer, e).await,
    };
    if let Err(e) = self.storage.ensure_root().await {
      return self.refuse(peer, TransferError::CannotCreate(e)).await;
    }
    match self.storage.available_space() {
      Ok(available) if available >= size => {}
      _ => return self.refuse(peer, TransferError::InsufficientSpace).await,
    }

    self.reply(peer, "READY\n").await?;

    let path = lease.path().to_path_buf();
    let created = match path.parent() {
      Some(parent) => fs::create_dir_all(parent).await,
      None => Ok(()),
    };
    let mut file = match created {
      Ok(()) => match File::create(&path).await {
        Ok(file) => file,
        Err(e) => return self.refuse(peer, TransferError::CannotCreate(e)).await,
      },
      Err(e) => return self.refuse(peer, TransferError::CannotCreate(e)).await,
    };

    let result = arq::receive(&self.socket, peer, &mut file, size, &self.arq, &mut self.shutdown).await;
    drop(file);
    match result {
      Ok(report) => {
        info!(
          "[UDP] upload complete: {} ({} bytes) in {:?} ({:.2} KB/s)",
          file_name,
          report.bytes,
          report.started.elapsed(),
          throughput_kbps(report.bytes, report.started)
        );
        Ok(())
      }
      Err(e) => {
        warn!("[UDP] upload of {} failed or incomplete, removing it", file_name);
        if let Err(rm) = fs::remove_file(&path).await {
          warn!("[UDP] could not remove {}: {}", path.display(), rm);
        }
        Err(e)
      }
    }
  }
}
