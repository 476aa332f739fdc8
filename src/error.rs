use thiserror::Error;

use crate::udp::packet::PacketError;

/// Failures of a single file operation.
///
/// Resource variants are reported to the peer as one `ERROR: ...` line and the
/// session carries on; [`TransferError::Io`] on the socket ends the session.
#[derive(Error, Debug)]
pub enum TransferError {
  #[error("File not found")]
  NotFound,
  #[error("Invalid filename")]
  InvalidName,
  #[error("File busy")]
  Busy,
  #[error("Could not open file")]
  CannotOpen(#[source] std::io::Error),
  #[error("Can't create file")]
  CannotCreate(#[source] std::io::Error),
  #[error("Invalid file size")]
  InvalidSize,
  #[error("Not enough disk space")]
  InsufficientSpace,
  #[error("no ACK for packet {seq} after {attempts} attempts")]
  RetriesExhausted { seq: u32, attempts: u32 },
  #[error("timed out waiting for packet {expected_seq}")]
  Timeout { expected_seq: u32 },
  #[error("incomplete transfer: {received}/{expected} bytes")]
  Incomplete { received: u64, expected: u64 },
  #[error("transfer cancelled by shutdown")]
  Cancelled,
  #[error("malformed packet: {0}")]
  Packet(#[from] PacketError),
  #[error("I/O error: {0}")]
  Io(#[from] std::io::Error),
}

impl TransferError {
  /// The protocol line sent back to the peer for resource errors.
  pub fn reply(&self) -> String {
    format!("ERROR: {}\n", self)
  }
}
