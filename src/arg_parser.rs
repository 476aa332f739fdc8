use clap::Parser;

/// Dual-protocol (TCP + UDP) file transfer server
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// Listening host
  #[arg(long, default_value_t = String::from("0.0.0.0"))]
  pub host: String,

  /// TCP (stream protocol) listening port
  #[arg(long, default_value_t = 8080)]
  pub tcp_port: u16,

  /// UDP (datagram protocol) listening port
  #[arg(long, default_value_t = 8081)]
  pub udp_port: u16,
}

impl Args {
  pub fn parse_args() -> Args {
    self::Parser::parse()
  }

  pub fn tcp_addr(&self) -> String {
    format!("{}:{}", self.host, self.tcp_port)
  }

  pub fn udp_addr(&self) -> String {
    format!("{}:{}", self.host, self.udp_port)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn defaults_to_fixed_ports() {
    let args = Args::parse_from(["rxfer"]);
    assert_eq!(args.tcp_addr(), "0.0.0.0:8080");
    assert_eq!(args.udp_addr(), "0.0.0.0:8081");
  }

  #[test]
  fn ports_can_be_overridden() {
    let args = Args::parse_from(["rxfer", "--host", "127.0.0.1", "--tcp-port", "9000", "--udp-port", "9001"]);
    assert_eq!(args.tcp_addr(), "127.0.0.1:9000");
    assert_eq!(args.udp_addr(), "127.0.0.1:9001");
  }
}
