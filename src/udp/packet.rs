//! Wire format of the datagram transfer.
//!
//! ```text
//!  0                   4          6
//!  +-------------------+----------+------------------+
//!  | seq (u32, BE)     | len (BE) | payload (len)    |
//!  +-------------------+----------+------------------+
//! ```
//!
//! Acknowledgments are plain text: `ACK <seq>\n`.

use thiserror::Error;

pub const HEADER_LEN: usize = 6;

/// Sequence number of the packet that ends a transfer.
pub const END_OF_TRANSFER: u32 = u32::MAX;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum PacketError {
  #[error("datagram of {0} bytes is shorter than the 6 byte header")]
  TooShort(usize),
  #[error("payload of {0} bytes does not fit the length field")]
  TooLong(usize),
}

/// A decoded packet borrowing its payload from the receive buffer.
///
/// `declared_len` is what the header claims; it is kept apart from
/// `payload.len()` so the receiver can reject truncated or padded chunks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Packet<'a> {
  pub seq: u32,
  pub declared_len: u16,
  pub payload: &'a [u8],
}

impl<'a> Packet<'a> {
  pub fn decode(buf: &'a [u8]) -> Result<Self, PacketError> {
    if buf.len() < HEADER_LEN {
      return Err(PacketError::TooShort(buf.len()));
    }
    let seq = u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]);
    let declared_len = u16::from_be_bytes([buf[4], buf[5]]);
    Ok(Self {
      seq,
      declared_len,
      payload: &buf[HEADER_LEN..],
    })
  }

  pub fn is_end(&self) -> bool {
    self.seq == END_OF_TRANSFER
  }

  /// Header length field agrees with the bytes actually carried.
  pub fn is_consistent(&self) -> bool {
    self.declared_len as usize == self.payload.len()
  }
}

pub fn encode(seq: u32, payload: &[u8]) -> Result<Vec<u8>, PacketError> {
  let len = u16::try_from(payload.len()).map_err(|_| PacketError::TooLong(payload.len()))?;
  let mut out = Vec::with_capacity(HEADER_LEN + payload.len());
  out.extend_from_slice(&seq.to_be_bytes());
  out.extend_from_slice(&len.to_be_bytes());
  out.extend_from_slice(payload);
  Ok(out)
}

pub fn end_packet() -> Vec<u8> {
  let mut out = Vec::with_capacity(HEADER_LEN);
  out.extend_from_slice(&END_OF_TRANSFER.to_be_bytes());
  out.extend_from_slice(&0u16.to_be_bytes());
  out
}

pub fn ack(seq: u32) -> String {
  format!("ACK {}\n", seq)
}

/// Parses `ACK <seq>` with optional trailing CR/LF.
pub fn parse_ack(buf: &[u8]) -> Option<u32> {
  let text = std::str::from_utf8(buf).ok()?;
  let text = text.trim_end_matches(['\r', '\n']);
  text.strip_prefix("ACK ")?.parse().ok()
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn header_is_network_byte_order() {
    let bytes = encode(0x0102_0304, b"xyz").unwrap();
    assert_eq!(&bytes[..HEADER_LEN], &[1, 2, 3, 4, 0, 3]);
    assert_eq!(&bytes[HEADER_LEN..], b"xyz");
  }

  #[test]
  fn decode_keeps_declared_and_actual_length_apart() {
    let mut bytes = encode(7, b"abcd").unwrap();
    bytes.truncate(bytes.len() - 1);
    let packet = Packet::decode(&bytes).unwrap();
    assert_eq!(packet.seq, 7);
    assert_eq!(packet.declared_len, 4);
    assert_eq!(packet.payload, b"abc");
    assert!(!packet.is_consistent());
  }

  #[test]
  fn short_datagrams_are_rejected() {
    assert_eq!(Packet::decode(&[0, 0, 0, 1, 0]), Err(PacketError::TooShort(5)));
  }

  #[test]
  fn end_packet_has_reserved_seq_and_no_payload() {
    let bytes = end_packet();
    let packet = Packet::decode(&bytes).unwrap();
    assert!(packet.is_end());
    assert_eq!(packet.declared_len, 0);
    assert!(packet.payload.is_empty());
  }

  #[test]
  fn oversized_payload_is_refused() {
    let big = vec![0u8; u16::MAX as usize + 1];
    assert_eq!(encode(0, &big), Err(PacketError::TooLong(big.len())));
  }

  #[test]
  fn ack_parsing() {
    assert_eq!(parse_ack(ack(42).as_bytes()), Some(42));
    assert_eq!(parse_ack(b"ACK 4294967295\r\n"), Some(END_OF_TRANSFER));
    assert_eq!(parse_ack(b"ACK"), None);
    assert_eq!(parse_ack(b"NAK 1"), None);
    assert_eq!(parse_ack(b"ACK x"), None);
  }
}
