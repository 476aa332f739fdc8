use std::io::SeekFrom;
use std::path::Path;
use std::time::Instant;

use log::debug;
use tokio::fs::{self, File, OpenOptions};
use tokio::io::{self, AsyncReadExt, AsyncSeekExt, AsyncWrite, AsyncWriteExt};

use crate::config::BUFFER_SIZE;
use crate::error::TransferError;
use crate::storage::{file_len, FileLease};

/// KB/s over `elapsed`, guarding against a zero duration.
pub(crate) fn throughput_kbps(bytes: u64, started: Instant) -> f64 {
  let secs = started.elapsed().as_secs_f64().max(1e-6);
  (bytes as f64 / 1024.0) / secs
}

/// Opens `path` for a download starting at `offset`.
///
/// An offset past the end is clamped to the file size. Returns the file
/// positioned at the offset and the number of bytes left to send.
pub async fn open_download(path: &Path, offset: u64) -> Result<(File, u64), TransferError> {
  let size = file_len(path)
    .await
    .map_err(TransferError::CannotOpen)?
    .ok_or(TransferError::NotFound)?;
  let mut file = File::open(path).await.map_err(TransferError::CannotOpen)?;
  let offset = offset.min(size);
  file.seek(SeekFrom::Start(offset)).await?;
  Ok((file, size - offset))
}

/// Copies exactly `remaining` bytes (or until EOF) from `file` to `writer`.
pub async fn send_file<W>(writer: &mut W, mut file: File, remaining: u64) -> io::Result<u64>
where
  W: AsyncWrite + Unpin,
{
  let mut buf = vec![0u8; BUFFER_SIZE];
  let mut sent: u64 = 0;
  while sent < remaining {
    let want = (remaining - sent).min(buf.len() as u64) as usize;
    let n = file.read(&mut buf[..want]).await?;
    if n == 0 {
      break;
    }
    writer.write_all(&buf[..n]).await?;
    sent += n as u64;
  }
  writer.flush().await?;
  Ok(sent)
}

/// An append-only upload in progress.
///
/// Whatever is already on disk counts as received, so an interrupted upload
/// resumes where it stopped when the same name is uploaded again.
#[derive(Debug)]
pub struct Upload {
  file: File,
  lease: FileLease,
  expected: u64,
  offset: u64,
  received: u64,
  started: Instant,
}

impl Upload {
  pub async fn begin(lease: FileLease, expected: u64) -> Result<Upload, TransferError> {
    let path = lease.path().to_path_buf();
    if let Some(parent) = path.parent() {
      fs::create_dir_all(parent).await.map_err(TransferError::CannotOpen)?;
    }
    let offset = file_len(&path)
      .await
      .map_err(TransferError::CannotOpen)?
      .unwrap_or(0);
    let file = OpenOptions::new()
      .create(true)
      .append(true)
      .open(&path)
      .await
      .map_err(TransferError::CannotOpen)?;
    debug!("upload {} resumes at {}/{}", path.display(), offset, expected);
    Ok(Upload {
      file,
      lease,
      expected,
      offset,
      received: offset,
      started: Instant::now(),
    })
  }

  /// Resume point reported to the client.
  pub fn offset(&self) -> u64 {
    self.offset
  }

  pub fn received(&self) -> u64 {
    self.received
  }

  pub fn started(&self) -> Instant {
    self.started
  }

  pub fn remaining(&self) -> u64 {
    self.expected.saturating_sub(self.received)
  }

  pub fn is_complete(&self) -> bool {
    self.received >= self.expected
  }

  /// Appends as much of `data` as the declared size still allows and returns
  /// how many bytes were taken.
  pub async fn write(&mut self, data: &[u8]) -> io::Result<usize> {
    let take = (self.remaining().min(data.len() as u64)) as usize;
    if take > 0 {
      self.file.write_all(&data[..take]).await?;
      self.file.flush().await?;
      self.received += take as u64;
    }
    Ok(take)
  }

  /// Flushes the file and releases the lease; returns the bytes written by
  /// this upload, not counting what was on disk before.
  pub async fn finish(mut self) -> io::Result<u64> {
    self.file.flush().await?;
    debug!("closing {}", self.lease.path().display());
    Ok(self.received - self.offset)
  }
}
