mod arg_parser;

use anyhow::Context;
use log::{error, info};

use rxfer::{Server, ServerConfig, Shutdown, Storage, UdpServer};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
  env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

  let args = arg_parser::Args::parse_args();
  let cfg = ServerConfig::default();
  let shutdown = Shutdown::new();
  // one lease set for both protocols
  let storage = Storage::new(&cfg.root);

  let tcp = Server::bind(&args.tcp_addr(), storage.clone(), &cfg, shutdown.clone())
    .await
    .with_context(|| format!("failed to bind TCP listener on {}", args.tcp_addr()))?;
  let udp = UdpServer::bind(&args.udp_addr(), storage, &cfg, shutdown.clone())
    .await
    .with_context(|| format!("failed to bind UDP socket on {}", args.udp_addr()))?;

  let signal = shutdown.clone();
  tokio::spawn(async move {
    if tokio::signal::ctrl_c().await.is_ok() {
      info!("Detected SIGINT, closing server...");
      signal.trigger();
    }
  });

  let udp_task = tokio::spawn(udp.listen());
  let tcp_result = tcp.listen().await;

  // the TCP side only returns on shutdown or a fatal accept error; stop UDP too
  shutdown.trigger();
  match udp_task.await {
    Ok(Err(e)) => error!("UDP server failed: {}", e),
    Err(e) => error!("UDP server task panicked: {}", e),
    Ok(Ok(())) => {}
  }
  tcp_result.context("TCP server failed")?;
  info!("bye");
  Ok(())
}
