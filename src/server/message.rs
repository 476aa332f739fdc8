use chrono::{DateTime, Local};

/**
  ECHO <SP> <text> <LF>
  TIME <LF>
  UPLOAD <SP> <filename> <SP> <size> <LF>
  DOWNLOAD <SP> <filename> [<SP> <offset>] <LF>
  CLOSE | EXIT | QUIT <LF>

  A trailing <CR> before <LF> is tolerated.
 */

pub const UPLOAD_USAGE: &str = "ERROR: usage: UPLOAD <filename> <size>\n";
pub const DOWNLOAD_USAGE: &str = "ERROR: usage: DOWNLOAD <filename> [offset]\n";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamCommand {
  ECHO(String),
  TIME,
  UPLOAD { file_name: String, size: u64 },
  DOWNLOAD { file_name: String, offset: u64 },
  CLOSE,
  /// Recognised verb with unusable arguments; carries the usage reply.
  Invalid(&'static str),
  Unknown(String),
}

pub fn parse_command(line: &str) -> StreamCommand {
  if let Some(text) = line.strip_prefix("ECHO ") {
    return StreamCommand::ECHO(text.to_string());
  }
  let mut iter = line.split_whitespace();
  let cmd = iter.next().unwrap_or("");
  match cmd {
    "TIME" if line == "TIME" => StreamCommand::TIME,
    "CLOSE" | "EXIT" | "QUIT" if line == cmd => StreamCommand::CLOSE,
    "UPLOAD" => {
      let file_name = iter.next();
      let size = iter.next().and_then(|s| s.parse::<u64>().ok());
      match (file_name, size) {
        (Some(file_name), Some(size)) => StreamCommand::UPLOAD {
          file_name: file_name.to_string(),
          size,
        },
        _ => StreamCommand::Invalid(UPLOAD_USAGE),
      }
    }
    "DOWNLOAD" => match iter.next() {
      Some(file_name) => StreamCommand::DOWNLOAD {
        file_name: file_name.to_string(),
        // an unreadable offset means "from the start"
        offset: iter.next().and_then(|s| s.parse().ok()).unwrap_or(0),
      },
      None => StreamCommand::Invalid(DOWNLOAD_USAGE),
    },
    _ => StreamCommand::Unknown(line.to_string()),
  }
}

/// `ctime(3)` style timestamp, e.g. `Sun Oct 18 14:03:09 2026`.
pub fn format_time(now: DateTime<Local>) -> String {
  now.format("%a %b %e %H:%M:%S %Y").to_string()
}

pub fn time_reply() -> String {
  format!("{}\n", format_time(Local::now()))
}
