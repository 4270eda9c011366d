use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use log::{debug, warn};

use crate::error_handling::types::ControllerError;

/// Keeps a second proxy from starting on the same caches.
///
/// The lock is a file created with create-new semantics and holding the
/// owner's process id. It is removed when the lock is released or dropped.
#[derive(Debug)]
pub struct InstanceLock {
    path: PathBuf,
    released: bool,
}

impl InstanceLock {
    pub fn acquire<P: AsRef<Path>>(path: P) -> Result<Self, ControllerError> {
        let path = path.as_ref().to_path_buf();
        let mut file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .map_err(|e| match e.kind() {
                ErrorKind::AlreadyExists => ControllerError::AlreadyRunning(path.display().to_string()),
                _ => ControllerError::InitializationFailed(format!(
                    "cannot create lock file {}: {}",
                    path.display(),
                    e
                )),
            })?;
        if let Err(e) = writeln!(file, "{}", std::process::id()) {
            warn!("Could not write pid to {}: {}", path.display(), e);
        }
        debug!("Acquired instance lock {}", path.display());
        Ok(Self {
            path,
            released: false,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn release(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        match fs::remove_file(&self.path) {
            Ok(()) => debug!("Released instance lock {}", self.path.display()),
            Err(e) => warn!("Could not remove lock file {}: {}", self.path.display(), e),
        }
    }
}

impl Drop for InstanceLock {
    fn drop(&mut self) {
        self.release();
    }
}
