use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{DateTime, Duration, Utc};
use log::{debug, error, info};

use crate::error_handling::types::StorageError;
use crate::storage::corpus::Corpus;

/// A directory of message files, one per message, evicted by age.
///
/// Only files whose names look like message identifiers (digits and dashes)
/// belong to the corpus; anything else in the directory is left alone.
pub struct ExpiryFileCorpus {
    name: String,
    directory: PathBuf,
    expiry: Duration,
    // Serializes writers with the expiry sweep.
    guard: Mutex<()>,
}

impl ExpiryFileCorpus {
    pub fn new<P: AsRef<Path>>(name: &str, directory: P, expiry_days: u64) -> Result<Self, StorageError> {
        let directory = directory.as_ref().to_path_buf();
        fs::create_dir_all(&directory).map_err(|e| {
            error!("Failed to create {} cache dir {}: {}", name, directory.display(), e);
            StorageError::WriteFailed(format!("{}: {}", directory.display(), e))
        })?;
        info!("{} cache at {}", name, directory.display());

        Ok(Self {
            name: name.to_string(),
            directory,
            expiry: Duration::days(expiry_days as i64),
            guard: Mutex::new(()),
        })
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    fn is_message_name(name: &str) -> bool {
        !name.is_empty() && name.bytes().all(|b| b.is_ascii_digit() || b == b'-')
    }

    fn message_files(&self) -> Result<Vec<PathBuf>, StorageError> {
        let entries = fs::read_dir(&self.directory).map_err(|e| {
            error!("Failed to read {} cache dir {}: {}", self.name, self.directory.display(), e);
            StorageError::ReadFailed(format!("{}: {}", self.directory.display(), e))
        })?;

        let mut files = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| {
                error!("Dir entry error: {}", e);
                StorageError::ReadFailed(e.to_string())
            })?;
            let path = entry.path();
            let is_message = path
                .file_name()
                .and_then(|n| n.to_str())
                .is_some_and(Self::is_message_name);
            if is_message && path.is_file() {
                files.push(path);
            }
        }
        Ok(files)
    }

    /// Removes every message last modified before `cutoff`.
    pub fn remove_messages_older_than(&self, cutoff: DateTime<Utc>) -> Result<usize, StorageError> {
        let _guard = self.guard.lock().unwrap_or_else(|p| p.into_inner());
        let mut removed = 0usize;
        for path in self.message_files()? {
            let modified = match fs::metadata(&path).and_then(|m| m.modified()) {
                Ok(t) => DateTime::<Utc>::from(t),
                Err(e) => {
                    debug!("Skipping {}: {}", path.display(), e);
                    continue;
                }
            };
            if modified < cutoff {
                match fs::remove_file(&path) {
                    Ok(()) => removed += 1,
                    Err(e) => debug!("Could not remove {}: {}", path.display(), e),
                }
            }
        }
        debug!(
            "Removed {} message(s) from {} (cutoff: {})",
            removed,
            self.directory.display(),
            cutoff.to_rfc3339()
        );
        Ok(removed)
    }
}

impl Corpus for ExpiryFileCorpus {
    fn name(&self) -> &str {
        &self.name
    }

    fn add_message(&self, id: &str, raw: &[u8]) -> Result<(), StorageError> {
        if !Self::is_message_name(id) {
            return Err(StorageError::WriteFailed(format!("invalid message name {:?}", id)));
        }
        let _guard = self.guard.lock().unwrap_or_else(|p| p.into_inner());
        let path = self.directory.join(id);
        let mut f = File::create(&path).map_err(|e| {
            error!("Create failed: {}: {}", path.display(), e);
            StorageError::WriteFailed(format!("{}: {}", path.display(), e))
        })?;
        f.write_all(raw).map_err(|e| {
            error!("Write failed: {}: {}", path.display(), e);
            StorageError::WriteFailed(format!("{}: {}", path.display(), e))
        })?;
        debug!("Cached {} byte(s) as {}", raw.len(), path.display());
        Ok(())
    }

    fn remove_expired_messages(&self) -> Result<usize, StorageError> {
        self.remove_messages_older_than(Utc::now() - self.expiry)
    }

    fn message_count(&self) -> Result<usize, StorageError> {
        Ok(self.message_files()?.len())
    }
}
