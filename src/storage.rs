use std::collections::HashSet;
use std::io;
use std::path::{Component, Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use log::debug;
use tokio::fs;

use crate::error::TransferError;

type LeaseSet = Arc<Mutex<HashSet<PathBuf>>>;

/// The uploads directory and the set of files currently being transferred.
#[derive(Debug, Clone)]
pub struct Storage {
  root: PathBuf,
  leases: LeaseSet,
}

/// Exclusive claim on one file for the duration of a transfer.
#[derive(Debug)]
pub struct FileLease {
  path: PathBuf,
  leases: LeaseSet,
}

fn lock(leases: &LeaseSet) -> MutexGuard<'_, HashSet<PathBuf>> {
  leases.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl Storage {
  pub fn new(root: impl Into<PathBuf>) -> Self {
    Self {
      root: root.into(),
      leases: Arc::new(Mutex::new(HashSet::new())),
    }
  }

  pub fn root(&self) -> &Path {
    &self.root
  }

  pub async fn ensure_root(&self) -> io::Result<()> {
    fs::create_dir_all(&self.root).await
  }

  /// Maps a client supplied name to a path under the root.
  ///
  /// Only plain relative components are accepted, and whatever already exists
  /// along the path must still lie under the root once symlinks are followed.
  pub fn resolve(&self, name: &str) -> Result<PathBuf, TransferError> {
    if name.is_empty() || name.contains('\0') {
      return Err(TransferError::InvalidName);
    }
    let mut relative = PathBuf::new();
    for component in Path::new(name).components() {
      match component {
        Component::Normal(part) => relative.push(part),
        Component::CurDir => {}
        Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
          return Err(TransferError::InvalidName);
        }
      }
    }
    if relative.as_os_str().is_empty() {
      return Err(TransferError::InvalidName);
    }
    let path = self.root.join(relative);
    if !self.stays_under_root(&path) {
      debug!("{} leads outside {}", name, self.root.display());
      return Err(TransferError::InvalidName);
    }
    Ok(path)
  }

  /// Follows symlinks on the deepest existing prefix of `path`. A dangling
  /// link counts as escaping: creating through it would land anywhere.
  fn stays_under_root(&self, path: &Path) -> bool {
    let Ok(root) = std::fs::canonicalize(&self.root) else {
      // no root yet, so nothing under it can be a link
      return true;
    };
    let mut probe = path;
    loop {
      match std::fs::canonicalize(probe) {
        Ok(real) => return real.starts_with(&root),
        Err(_) if std::fs::symlink_metadata(probe).is_ok() => return false,
        Err(_) => match probe.parent() {
          Some(parent) => probe = parent,
          None => return true,
        },
      }
    }
  }

  /// Claims `path` for one transfer; fails with [`TransferError::Busy`] while
  /// another lease on it is alive.
  pub fn lease(&self, path: &Path) -> Result<FileLease, TransferError> {
    let mut leases = lock(&self.leases);
    if !leases.insert(path.to_path_buf()) {
      return Err(TransferError::Busy);
    }
    debug!("leased {}", path.display());
    Ok(FileLease {
      path: path.to_path_buf(),
      leases: self.leases.clone(),
    })
  }

  pub fn available_space(&self) -> io::Result<u64> {
    fs2::available_space(&self.root)
  }
}

impl FileLease {
  pub fn path(&self) -> &Path {
    &self.path
  }
}

impl Drop for FileLease {
  fn drop(&mut self) {
    lock(&self.leases).remove(&self.path);
  }
}

/// Length of a regular file, `None` if nothing exists at `path`.
pub async fn file_len(path: &Path) -> io::Result<Option<u64>> {
  match fs::metadata(path).await {
    Ok(meta) if meta.is_file() => Ok(Some(meta.len())),
    Ok(_) => Err(io::Error::new(io::ErrorKind::Other, "not a regular file")),
    Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
    Err(e) => Err(e),
  }
}
