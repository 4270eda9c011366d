//! Raw transcript of client conversations.
//!
//! When verbose mode is on, every byte read from or written to an email
//! client is appended to one shared file, flushed after each write so the
//! file can be tailed while the proxy runs. Recording is best effort: an I/O
//! failure is logged and the session carries on.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use log::{debug, error, info, trace};
use uuid::Uuid;

use super::types::Direction;
use crate::error_handling::types::StorageError;

const PREVIEW: usize = 64;

pub struct TranscriptRecorder {
    path: PathBuf,
    file: Mutex<File>,
}

impl TranscriptRecorder {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StorageError> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| {
                error!("Failed to open transcript {}: {}", path.display(), e);
                StorageError::WriteFailed(format!("{}: {}", path.display(), e))
            })?;
        info!("Recording client transcripts to {}", path.display());
        Ok(Self {
            path,
            file: Mutex::new(file),
        })
    }

    pub fn record(&self, session_id: Uuid, direction: Direction, data: &[u8]) {
        if data.is_empty() {
            return;
        }
        let preview = &data[..data.len().min(PREVIEW)];
        trace!(
            "[{}] captured {} {} bytes: {}{}",
            session_id,
            direction.arrow(),
            data.len(),
            String::from_utf8_lossy(preview).trim_end(),
            if data.len() > PREVIEW { " ..." } else { "" }
        );

        let mut file = self.file.lock().unwrap_or_else(|p| p.into_inner());
        if let Err(e) = file.write_all(data).and_then(|_| file.flush()) {
            debug!("[{}] transcript write to {} failed: {}", session_id, self.path.display(), e);
        }
    }
}
