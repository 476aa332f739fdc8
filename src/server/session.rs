use std::time::Instant;

use log::{debug, info, warn};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use uuid::Uuid;

use crate::config::BUFFER_SIZE;
use crate::error::TransferError;
use crate::server::framing::LineReader;
use crate::server::message::{parse_command, time_reply, StreamCommand};
use crate::server::transfer::{open_download, send_file, throughput_kbps, Upload};
use crate::shutdown::Shutdown;
use crate::storage::Storage;

pub const UNKNOWN_COMMAND: &str = "Unknown command\n";
pub const UPLOAD_COMPLETE: &str = "File upload complete.\n";

#[derive(Debug)]
pub enum SessionState {
  AwaitingCommand,
  /// Raw payload mode: every received byte belongs to the file.
  ReceivingUpload(Upload),
}

#[derive(Debug, PartialEq, Eq)]
pub enum Flow {
  Continue,
  Close,
}

/// One stream connection and everything it owns.
///
/// Dropping the session closes the connection and releases any upload in
/// progress; the partial file stays on disk for a later resume.
pub struct Session<S> {
  pub id: Uuid,
  stream: S,
  storage: Storage,
  reader: LineReader,
  state: SessionState,
  shutdown: Shutdown,
}

impl<S> Session<S>
where
  S: AsyncRead + AsyncWrite + Unpin + Send,
{
  pub fn new(stream: S, storage: Storage, shutdown: Shutdown) -> Self {
    Self {
      id: Uuid::new_v4(),
      stream,
      storage,
      reader: LineReader::new(),
      state: SessionState::AwaitingCommand,
      shutdown,
    }
  }

  pub fn state(&self) -> &SessionState {
    &self.state
  }

  /// Serves the connection until the peer leaves, asks to close, or the
  /// server shuts down.
  pub async fn run(mut self) -> Result<(), TransferError> {
    let mut buf = vec![0u8; BUFFER_SIZE];
    loop {
      let n = tokio::select! {
        read = self.stream.read(&mut buf) => read?,
        _ = self.shutdown.recv() => {
          info!("[{}] server shutting down, closing session", self.id);
          break;
        }
      };
      if n == 0 {
        debug!("[{}] peer closed the connection", self.id);
        break;
      }
      if self.feed(&buf[..n]).await? == Flow::Close {
        info!("[{}] closing connection", self.id);
        break;
      }
    }
    if let SessionState::ReceivingUpload(upload) = &self.state {
      info!(
        "[{}] upload interrupted at {} bytes, kept for resume",
        self.id,
        upload.received()
      );
    }
    let _ = self.stream.shutdown().await;
    Ok(())
  }

  /// Processes one batch of received bytes.
  pub async fn feed(&mut self, data: &[u8]) -> Result<Flow, TransferError> {
    let mut pending = data.to_vec();
    while !pending.is_empty() {
      match &mut self.state {
        SessionState::ReceivingUpload(upload) => {
          let taken = upload.write(&pending).await?;
          pending.drain(..taken);
          if upload.is_complete() {
            self.complete_upload().await?;
          }
        }
        SessionState::AwaitingCommand => {
          self.reader.push(&pending);
          pending.clear();
          while let Some(line) = self.reader.next_line() {
            if self.dispatch(&line).await? == Flow::Close {
              return Ok(Flow::Close);
            }
            // bytes after an UPLOAD line are payload, not commands
            if matches!(self.state, SessionState::ReceivingUpload(_)) {
              pending = self.reader.take_remaining();
              break;
            }
          }
        }
      }
    }
    Ok(Flow::Continue)
  }

  async fn dispatch(&mut self, line: &str) -> Result<Flow, TransferError> {
    let cmd = parse_command(line);
    debug!("[{}] cmd: {:?}", self.id, cmd);
    match cmd {
      StreamCommand::ECHO(text) => self.reply(&format!("{}\n", text)).await?,
      StreamCommand::TIME => self.reply(&time_reply()).await?,
      StreamCommand::UPLOAD { file_name, size } => self.upload(&file_name, size).await?,
      StreamCommand::DOWNLOAD { file_name, offset } => self.download(&file_name, offset).await?,
      StreamCommand::CLOSE => return Ok(Flow::Close),
      StreamCommand::Invalid(usage) => self.reply(usage).await?,
      StreamCommand::Unknown(_) => self.reply(UNKNOWN_COMMAND).await?,
    }
    Ok(Flow::Continue)
  }

  async fn reply(&mut self, msg: &str) -> Result<(), TransferError> {
    self.stream.write_all(msg.as_bytes()).await?;
    Ok(())
  }

  async fn upload(&mut self, file_name: &str, size: u64) -> Result<(), TransferError> {
    let begun = match self.storage.resolve(file_name) {
      Ok(path) => match self.storage.lease(&path) {
        Ok(lease) => Upload::begin(lease, size).await,
        Err(e) => Err(e),
      },
      Err(e) => Err(e),
    };
    let upload = match begun {
      Ok(upload) => upload,
      Err(e) => {
        warn!("[{}] UPLOAD {} refused: {}", self.id, file_name, e);
        return self.reply(&e.reply()).await;
      }
    };

    info!("[{}] UPLOAD {} ({} bytes, resume at {})", self.id, file_name, size, upload.offset());
    self.reply(&format!("READY {}\n", upload.offset())).await?;
    let done = upload.is_complete();
    self.state = SessionState::ReceivingUpload(upload);
    if done {
      self.complete_upload().await?;
    }
    Ok(())
  }

  async fn complete_upload(&mut self) -> Result<(), TransferError> {
    let state = std::mem::replace(&mut self.state, SessionState::AwaitingCommand);
    if let SessionState::ReceivingUpload(upload) = state {
      let started = upload.started();
      let written = upload.finish().await?;
      info!(
        "[{}] upload complete: {} new bytes in {:?} ({:.2} KB/s)",
        self.id,
        written,
        started.elapsed(),
        throughput_kbps(written, started)
      );
      self.reply(UPLOAD_COMPLETE).await?;
    }
    Ok(())
  }

  async fn download(&mut self, file_name: &str, offset: u64) -> Result<(), TransferError> {
    let opened = match self.storage.resolve(file_name) {
      Ok(path) => match self.storage.lease(&path) {
        Ok(lease) => open_download(&path, offset).await.map(|opened| (lease, opened)),
        Err(e) => Err(e),
      },
      Err(e) => Err(e),
    };
    let (_lease, (file, remaining)) = match opened {
      Ok(opened) => opened,
      Err(e) => {
        warn!("[{}] DOWNLOAD {} refused: {}", self.id, file_name, e);
        return self.reply(&e.reply()).await;
      }
    };

    info!("[{}] DOWNLOAD {} from {} ({} bytes)", self.id, file_name, offset, remaining);
    self.reply(&format!("READY {}\n", remaining)).await?;
    let started = Instant::now();
    let sent = send_file(&mut self.stream, file, remaining).await?;
    info!(
      "[{}] sent {} bytes of {} in {:?} ({:.2} KB/s)",
      self.id,
      sent,
      file_name,
      started.elapsed(),
      throughput_kbps(sent, started)
    );
    Ok(())
  }
}
