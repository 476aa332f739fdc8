use std::io;
use std::net::SocketAddr;

use async_trait::async_trait;
use tokio::net::UdpSocket;

/// The datagram operations the transfer engine needs.
///
/// Implemented for `tokio::net::UdpSocket`; the ARQ tests run over an
/// in-memory pair that can drop packets.
#[async_trait]
pub trait DatagramSocket: Send + Sync {
  async fn send_to(&self, buf: &[u8], target: SocketAddr) -> io::Result<usize>;
  async fn recv_from(&self, buf: &mut [u8]) -> io::Result<(usize, SocketAddr)>;
}

#[async_trait]
impl DatagramSocket for UdpSocket {
  async fn send_to(&self, buf: &[u8], target: SocketAddr) -> io::Result<usize> {
    UdpSocket::send_to(self, buf, target).await
  }

  async fn recv_from(&self, buf: &mut [u8]) -> io::Result<(usize, SocketAddr)> {
    UdpSocket::recv_from(self, buf).await
  }
}

/// Sends a text reply as a single datagram.
pub async fn send_text<S>(socket: &S, target: SocketAddr, msg: &str) -> io::Result<()>
where
  S: DatagramSocket + ?Sized,
{
  socket.send_to(msg.as_bytes(), target).await?;
  Ok(())
}
