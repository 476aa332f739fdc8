//! `rxfer`: a file transfer and command server speaking two protocols.
//!
//! - [`server`] is the line-oriented TCP protocol (ECHO, TIME, UPLOAD,
//!   DOWNLOAD, CLOSE) with resumable transfers.
//! - [`udp`] is the datagram protocol with its stop-and-wait ARQ layer.
//!
//! Both sides share the uploads directory through [`storage::Storage`] and
//! stop on the same [`shutdown::Shutdown`] signal.

pub mod config;
pub mod error;
pub mod pool;
pub mod server;
pub mod shutdown;
pub mod storage;
pub mod udp;

pub use config::{ArqConfig, ServerConfig};
pub use error::TransferError;
pub use server::Server;
pub use shutdown::Shutdown;
pub use storage::Storage;
pub use udp::UdpServer;
