use std::path::PathBuf;
use std::time::Duration;

/// Largest payload carried by one datagram transfer packet.
pub const MAX_CHUNK_SIZE: usize = 4096;

/// Read buffer size used by stream sessions and file copies.
pub const BUFFER_SIZE: usize = 4096;

#[derive(Debug, Clone)]
pub struct ServerConfig {
  /// Directory every transferred file lives under.
  pub root: PathBuf,
  /// Number of workers serving stream connections.
  pub workers: usize,
  /// Connections that may wait for a free worker before new ones are rejected.
  pub queue_capacity: usize,
  pub arq: ArqConfig,
}

impl Default for ServerConfig {
  fn default() -> Self {
    Self {
      root: PathBuf::from("uploads"),
      workers: 4,
      queue_capacity: 16,
      arq: ArqConfig::default(),
    }
  }
}

/// Stop-and-wait tuning for the datagram protocol.
#[derive(Debug, Clone, Copy)]
pub struct ArqConfig {
  pub chunk_size: usize,
  /// How long the sender waits for `ACK <seq>` before resending.
  pub ack_timeout: Duration,
  /// Send attempts per packet before the transfer is abandoned.
  pub max_retries: u32,
  /// How long the receiver waits for the next packet.
  pub recv_timeout: Duration,
}

impl Default for ArqConfig {
  fn default() -> Self {
    Self {
      chunk_size: MAX_CHUNK_SIZE,
      ack_timeout: Duration::from_secs(2),
      max_retries: 5,
      recv_timeout: Duration::from_secs(10),
    }
  }
}
