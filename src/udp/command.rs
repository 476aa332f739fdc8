/**
  UDP_TIME [<SP>]
  UDP_DOWNLOAD <SP> <filename>
  UDP_UPLOAD <SP> <filename> <SP> <size>

  Each command is one datagram; surrounding whitespace is ignored.
 */

pub const UPLOAD_USAGE: &str = "ERROR: Invalid format. Use: UDP_UPLOAD <filename> <size>\n";
pub const UNKNOWN_COMMAND: &str = "UNKNOWN COMMAND\n";

#[allow(non_camel_case_types)]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DatagramCommand {
  UDP_TIME,
  UDP_DOWNLOAD(String),
  /// The size is kept as text: validating it is part of the upload itself.
  UDP_UPLOAD { file_name: String, size: String },
  Invalid(&'static str),
  Unknown(String),
}

pub fn parse_command(datagram: &[u8]) -> DatagramCommand {
  let text = String::from_utf8_lossy(datagram);
  let text = text.trim();

  if text == "UDP_TIME" || text.starts_with("UDP_TIME ") {
    return DatagramCommand::UDP_TIME;
  }
  if let Some(file_name) = text.strip_prefix("UDP_DOWNLOAD ") {
    return DatagramCommand::UDP_DOWNLOAD(file_name.trim().to_string());
  }
  if let Some(args) = text.strip_prefix("UDP_UPLOAD ") {
    // the size is the last word; everything before it is the filename
    return match args.trim().rsplit_once(' ') {
      Some((file_name, size)) => DatagramCommand::UDP_UPLOAD {
        file_name: file_name.trim().to_string(),
        size: size.to_string(),
      },
      None => DatagramCommand::Invalid(UPLOAD_USAGE),
    };
  }
  DatagramCommand::Unknown(text.to_string())
}
