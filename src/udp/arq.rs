//! Stop-and-wait ARQ over a [`DatagramSocket`].
//!
//! The sender keeps exactly one data packet in flight and resends it until
//! `ACK <seq>` comes back from the peer or the retry budget runs out. The
//! receiver accepts packets strictly in sequence, acknowledges everything it
//! can parse, and only writes the packet it is waiting for.

use std::io;
use std::net::SocketAddr;
use std::time::Instant;

use log::{debug, trace, warn};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::time;

use crate::config::ArqConfig;
use crate::error::TransferError;
use crate::shutdown::Shutdown;
use crate::udp::packet::{self, Packet, HEADER_LEN};
use crate::udp::socket::{send_text, DatagramSocket};

const ACK_BUFFER: usize = 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferReport {
  /// Data packets delivered, not counting the end packet.
  pub packets: u32,
  pub bytes: u64,
  pub started: Instant,
}

impl TransferReport {
  fn new() -> Self {
    Self {
      packets: 0,
      bytes: 0,
      started: Instant::now(),
    }
  }
}

/// Windows reports ICMP port-unreachable as a reset on the next receive; it
/// says nothing about the current peer.
fn is_spurious_reset(e: &io::Error) -> bool {
  e.kind() == io::ErrorKind::ConnectionReset
}

/// Fills `buf` from `reader`, short only at end of input.
async fn read_chunk<R>(reader: &mut R, buf: &mut [u8]) -> io::Result<usize>
where
  R: AsyncRead + Unpin,
{
  let mut filled = 0;
  while filled < buf.len() {
    let n = reader.read(&mut buf[filled..]).await?;
    if n == 0 {
      break;
    }
    filled += n;
  }
  Ok(filled)
}

/// Waits up to the ACK timeout for the peer's answer to `seq`.
///
/// Datagrams from other addresses are skipped; any other answer from the peer
/// counts as a failed attempt.
async fn wait_for_ack<S>(
  socket: &S,
  peer: SocketAddr,
  seq: u32,
  cfg: &ArqConfig,
  shutdown: &mut Shutdown,
) -> Result<bool, TransferError>
where
  S: DatagramSocket + ?Sized,
{
  let deadline = time::Instant::now() + cfg.ack_timeout;
  let mut buf = [0u8; ACK_BUFFER];
  loop {
    let received = tokio::select! {
      received = time::timeout_at(deadline, socket.recv_from(&mut buf)) => received,
      _ = shutdown.recv() => return Err(TransferError::Cancelled),
    };
    let (n, from) = match received {
      Err(_elapsed) => return Ok(false),
      Ok(Err(e)) if is_spurious_reset(&e) => continue,
      Ok(Err(e)) => return Err(e.into()),
      Ok(Ok(received)) => received,
    };
    if from != peer {
      trace!("ignoring {} bytes from {} while waiting for ACK {}", n, from, seq);
      continue;
    }
    let acked = packet::parse_ack(&buf[..n]);
    if acked != Some(seq) {
      debug!("expected ACK {}, got {:?}", seq, acked);
    }
    return Ok(acked == Some(seq));
  }
}

async fn send_until_acked<S>(
  socket: &S,
  peer: SocketAddr,
  seq: u32,
  datagram: &[u8],
  cfg: &ArqConfig,
  shutdown: &mut Shutdown,
) -> Result<(), TransferError>
where
  S: DatagramSocket + ?Sized,
{
  for attempt in 1..=cfg.max_retries {
    socket.send_to(datagram, peer).await?;
    if wait_for_ack(socket, peer, seq, cfg, shutdown).await? {
      return Ok(());
    }
    debug!("packet {} to {}: attempt {}/{} unacknowledged", seq, peer, attempt, cfg.max_retries);
  }
  Err(TransferError::RetriesExhausted {
    seq,
    attempts: cfg.max_retries,
  })
}

/// Sends everything `reader` yields to `peer`, one acknowledged chunk at a
/// time, followed by a single unacknowledged end packet.
///
/// If a chunk exhausts its retries the transfer stops right there; the end
/// packet is not sent.
pub async fn send<S, R>(
  socket: &S,
  peer: SocketAddr,
  reader: &mut R,
  cfg: &ArqConfig,
  shutdown: &mut Shutdown,
) -> Result<TransferReport, TransferError>
where
  S: DatagramSocket + ?Sized,
  R: AsyncRead + Unpin,
{
  let mut report = TransferReport::new();
  let mut chunk = vec![0u8; cfg.chunk_size];
  let mut seq: u32 = 0;
  loop {
    let n = read_chunk(reader, &mut chunk).await?;
    if n == 0 {
      break;
    }
    if seq == packet::END_OF_TRANSFER {
      return Err(io::Error::new(io::ErrorKind::InvalidInput, "file too large for sequence space").into());
    }
    let datagram = packet::encode(seq, &chunk[..n])?;
    send_until_acked(socket, peer, seq, &datagram, cfg, shutdown).await?;
    report.packets += 1;
    report.bytes += n as u64;
    seq += 1;
  }
  socket.send_to(&packet::end_packet(), peer).await?;
  Ok(report)
}

/// Receives a transfer of `expected_size` bytes from `peer` into `writer`.
///
/// Succeeds only when the end packet arrives after exactly `expected_size`
/// bytes. A receive timeout ends the transfer with [`TransferError::Timeout`].
pub async fn receive<S, W>(
  socket: &S,
  peer: SocketAddr,
  writer: &mut W,
  expected_size: u64,
  cfg: &ArqConfig,
  shutdown: &mut Shutdown,
) -> Result<TransferReport, TransferError>
where
  S: DatagramSocket + ?Sized,
  W: AsyncWrite + Unpin,
{
  let mut report = TransferReport::new();
  let mut buf = vec![0u8; HEADER_LEN + u16::MAX as usize];
  let mut expected_seq: u32 = 0;

  loop {
    let received = tokio::select! {
      received = time::timeout(cfg.recv_timeout, socket.recv_from(&mut buf)) => received,
      _ = shutdown.recv() => return Err(TransferError::Cancelled),
    };
    let (n, from) = match received {
      Err(_elapsed) => {
        warn!("timeout waiting for packet {} from {}", expected_seq, peer);
        writer.flush().await?;
        return Err(TransferError::Timeout { expected_seq });
      }
      Ok(Err(e)) if is_spurious_reset(&e) => continue,
      Ok(Err(e)) => return Err(e.into()),
      Ok(Ok(received)) => received,
    };
    if from != peer {
      trace!("ignoring datagram from {} during upload from {}", from, peer);
      continue;
    }
    let packet = match Packet::decode(&buf[..n]) {
      Ok(packet) => packet,
      Err(e) => {
        debug!("dropping datagram from {}: {}", peer, e);
        continue;
      }
    };

    if packet.is_end() {
      send_text(socket, peer, &packet::ack(packet.seq)).await?;
      break;
    }

    if packet.seq == expected_seq {
      let len = packet.declared_len as u64;
      if !packet.is_consistent() || report.bytes + len > expected_size {
        warn!(
          "invalid chunk {}: declared {} bytes, carried {}, {}/{} received",
          packet.seq,
          len,
          packet.payload.len(),
          report.bytes,
          expected_size
        );
      } else {
        writer.write_all(packet.payload).await?;
        report.bytes += len;
        report.packets += 1;
        expected_seq = expected_seq.wrapping_add(1);
        debug!("received {}/{} bytes from {}", report.bytes, expected_size, peer);
      }
    }
    send_text(socket, peer, &packet::ack(packet.seq)).await?;
  }

  writer.flush().await?;
  if report.bytes != expected_size {
    return Err(TransferError::Incomplete {
      received: report.bytes,
      expected: expected_size,
    });
  }
  Ok(report)
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::udp::packet::{end_packet, parse_ack, END_OF_TRANSFER};
  use crate::udp::socket::DatagramSocket;
  use async_trait::async_trait;
  use std::sync::atomic::{AtomicUsize, Ordering};
  use std::sync::Arc;
  use std::time::Duration;
  use tokio::sync::{mpsc, Mutex};

  type Datagram = (Vec<u8>, SocketAddr);

  /// In-memory datagram endpoint that can drop its first `drop_first` sends.
  struct MemorySocket {
    local: SocketAddr,
    tx: mpsc::UnboundedSender<Datagram>,
    rx: Mutex<mpsc::UnboundedReceiver<Datagram>>,
    drop_first: AtomicUsize,
    sent: Arc<AtomicUsize>,
  }

  fn pair() -> (MemorySocket, MemorySocket) {
    let (a_tx, b_rx) = mpsc::unbounded_channel();
    let (b_tx, a_rx) = mpsc::unbounded_channel();
    let a = MemorySocket {
      local: "127.0.0.1:1000".parse().unwrap(),
      tx: a_tx,
      rx: Mutex::new(a_rx),
      drop_first: AtomicUsize::new(0),
      sent: Arc::new(AtomicUsize::new(0)),
    };
    let b = MemorySocket {
      local: "127.0.0.1:2000".parse().unwrap(),
      tx: b_tx,
      rx: Mutex::new(b_rx),
      drop_first: AtomicUsize::new(0),
      sent: Arc::new(AtomicUsize::new(0)),
    };
    (a, b)
  }

  #[async_trait]
  impl DatagramSocket for MemorySocket {
    async fn send_to(&self, buf: &[u8], _target: SocketAddr) -> io::Result<usize> {
      self.sent.fetch_add(1, Ordering::SeqCst);
      let dropped = self
        .drop_first
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok();
      if !dropped {
        let _ = self.tx.send((buf.to_vec(), self.local));
      }
      Ok(buf.len())
    }

    async fn recv_from(&self, buf: &mut [u8]) -> io::Result<(usize, SocketAddr)> {
      let (data, from) = self
        .rx
        .lock()
        .await
        .recv()
        .await
        .ok_or_else(|| io::Error::from(io::ErrorKind::BrokenPipe))?;
      buf[..data.len()].copy_from_slice(&data);
      Ok((data.len(), from))
    }
  }

  fn fast() -> ArqConfig {
    ArqConfig {
      chunk_size: 4,
      ack_timeout: Duration::from_millis(50),
      max_retries: 5,
      recv_timeout: Duration::from_millis(500),
    }
  }

  async fn recv_ack(socket: &MemorySocket) -> Option<u32> {
    let mut buf = [0u8; 64];
    let (n, _) = socket.recv_from(&mut buf).await.unwrap();
    parse_ack(&buf[..n])
  }

  #[tokio::test]
  async fn round_trip_preserves_bytes() {
    let (server, client) = pair();
    let data: Vec<u8> = (0..=42u8).collect();
    let cfg = fast();
    let mut reader: &[u8] = &data;
    let mut out = Vec::new();

    let mut send_shutdown = Shutdown::new();
    let mut recv_shutdown = Shutdown::new();
    let (sent, received) = tokio::join!(
      send(&server, client.local, &mut reader, &cfg, &mut send_shutdown),
      receive(&client, server.local, &mut out, data.len() as u64, &cfg, &mut recv_shutdown),
    );
    let sent = sent.unwrap();
    assert_eq!(sent.packets, 11);
    assert_eq!(sent.bytes, 43);
    assert_eq!(received.unwrap().bytes, 43);
    assert_eq!(out, data);
  }

  #[tokio::test]
  async fn lost_packets_are_resent() {
    let (server, client) = pair();
    server.drop_first.store(2, Ordering::SeqCst);
    let data = b"retransmit me".to_vec();
    let cfg = fast();
    let mut reader: &[u8] = &data;
    let mut out = Vec::new();

    let mut send_shutdown = Shutdown::new();
    let mut recv_shutdown = Shutdown::new();
    let (sent, received) = tokio::join!(
      send(&server, client.local, &mut reader, &cfg, &mut send_shutdown),
      receive(&client, server.local, &mut out, data.len() as u64, &cfg, &mut recv_shutdown),
    );
    sent.unwrap();
    received.unwrap();
    assert_eq!(out, data);
  }

  #[tokio::test]
  async fn sender_stops_after_max_retries() {
    let (server, silent) = pair();
    let cfg = fast();
    let data = vec![9u8; 12];
    let mut reader: &[u8] = &data;

    let err = send(&server, silent.local, &mut reader, &cfg, &mut Shutdown::new())
      .await
      .unwrap_err();
    assert!(matches!(err, TransferError::RetriesExhausted { seq: 0, attempts: 5 }));
    assert_eq!(server.sent.load(Ordering::SeqCst), 5);

    // only copies of packet 0 reached the peer, and no end packet
    let mut rx = silent.rx.lock().await;
    let mut seen = 0;
    while let Ok((datagram, _)) = rx.try_recv() {
      assert_eq!(Packet::decode(&datagram).unwrap().seq, 0);
      seen += 1;
    }
    assert_eq!(seen, 5);
  }

  #[tokio::test]
  async fn mismatched_ack_triggers_resend() {
    let (server, client) = pair();
    let cfg = fast();
    let data = b"abc".to_vec();
    let mut reader: &[u8] = &data;

    let driver = async {
      let mut buf = [0u8; 64];
      let (n, _) = client.recv_from(&mut buf).await.unwrap();
      assert_eq!(Packet::decode(&buf[..n]).unwrap().seq, 0);
      client.send_to(b"ACK 7\n", server.local).await.unwrap();
      let (n, _) = client.recv_from(&mut buf).await.unwrap();
      assert_eq!(Packet::decode(&buf[..n]).unwrap().seq, 0);
      client.send_to(b"ACK 0\n", server.local).await.unwrap();
      let (n, _) = client.recv_from(&mut buf).await.unwrap();
      assert!(Packet::decode(&buf[..n]).unwrap().is_end());
    };
    let mut shutdown = Shutdown::new();
    let (sent, ()) = tokio::join!(
      send(&server, client.local, &mut reader, &cfg, &mut shutdown),
      driver
    );
    assert_eq!(sent.unwrap().packets, 1);
    assert_eq!(server.sent.load(Ordering::SeqCst), 3);
  }

  #[tokio::test]
  async fn duplicates_are_acked_but_written_once() {
    let (server, client) = pair();
    let cfg = fast();
    let mut out = Vec::new();

    let driver = async {
      let first = packet::encode(0, b"abcd").unwrap();
      let second = packet::encode(1, b"ef").unwrap();
      client.send_to(&first, server.local).await.unwrap();
      assert_eq!(recv_ack(&client).await, Some(0));
      client.send_to(&first, server.local).await.unwrap();
      assert_eq!(recv_ack(&client).await, Some(0));
      client.send_to(&second, server.local).await.unwrap();
      assert_eq!(recv_ack(&client).await, Some(1));
      client.send_to(&end_packet(), server.local).await.unwrap();
      assert_eq!(recv_ack(&client).await, Some(END_OF_TRANSFER));
    };
    let mut shutdown = Shutdown::new();
    let (received, ()) = tokio::join!(
      receive(&server, client.local, &mut out, 6, &cfg, &mut shutdown),
      driver
    );
    assert_eq!(received.unwrap().packets, 2);
    assert_eq!(out, b"abcdef");
  }

  #[tokio::test]
  async fn inconsistent_and_out_of_order_chunks_are_not_written() {
    let (server, client) = pair();
    let cfg = fast();
    let mut out = Vec::new();

    let driver = async {
      // header claims 4 bytes, only 3 carried
      let mut truncated = packet::encode(0, b"abcd").unwrap();
      truncated.pop();
      client.send_to(&truncated, server.local).await.unwrap();
      assert_eq!(recv_ack(&client).await, Some(0));
      // ahead of sequence
      client.send_to(&packet::encode(3, b"zz").unwrap(), server.local).await.unwrap();
      assert_eq!(recv_ack(&client).await, Some(3));
      // too short to hold a header: silently dropped
      client.send_to(&[0, 0, 0], server.local).await.unwrap();
      client.send_to(&packet::encode(0, b"abcd").unwrap(), server.local).await.unwrap();
      assert_eq!(recv_ack(&client).await, Some(0));
      client.send_to(&end_packet(), server.local).await.unwrap();
      assert_eq!(recv_ack(&client).await, Some(END_OF_TRANSFER));
    };
    let mut shutdown = Shutdown::new();
    let (received, ()) = tokio::join!(
      receive(&server, client.local, &mut out, 4, &cfg, &mut shutdown),
      driver
    );
    received.unwrap();
    assert_eq!(out, b"abcd");
  }

  #[tokio::test]
  async fn chunk_past_declared_size_is_rejected() {
    let (server, client) = pair();
    let cfg = fast();
    let mut out = Vec::new();

    let driver = async {
      client.send_to(&packet::encode(0, b"abcdef").unwrap(), server.local).await.unwrap();
      assert_eq!(recv_ack(&client).await, Some(0));
      client.send_to(&end_packet(), server.local).await.unwrap();
      assert_eq!(recv_ack(&client).await, Some(END_OF_TRANSFER));
    };
    let mut shutdown = Shutdown::new();
    let (received, ()) = tokio::join!(
      receive(&server, client.local, &mut out, 4, &cfg, &mut shutdown),
      driver
    );
    assert!(matches!(
      received.unwrap_err(),
      TransferError::Incomplete { received: 0, expected: 4 }
    ));
    assert!(out.is_empty());
  }

  #[tokio::test]
  async fn receiver_times_out() {
    let (server, client) = pair();
    let cfg = ArqConfig {
      recv_timeout: Duration::from_millis(30),
      ..fast()
    };
    let mut out = Vec::new();
    let err = receive(&server, client.local, &mut out, 10, &cfg, &mut Shutdown::new())
      .await
      .unwrap_err();
    assert!(matches!(err, TransferError::Timeout { expected_seq: 0 }));
  }

  #[tokio::test]
  async fn shutdown_cancels_waiting_receiver() {
    let (server, client) = pair();
    let cfg = fast();
    let shutdown = Shutdown::new();
    shutdown.trigger();
    let mut out = Vec::new();
    let err = receive(&server, client.local, &mut out, 10, &cfg, &mut shutdown.clone())
      .await
      .unwrap_err();
    assert!(matches!(err, TransferError::Cancelled));
  }
}
