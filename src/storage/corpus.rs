//! Corpus Trait
//!
//! A corpus is a managed collection of stored messages. The proxy only adds
//! messages and asks for expired ones to be evicted; the storage format and
//! the eviction policy belong to the implementation.

use std::sync::Arc;

use log::{info, warn};
use tokio::runtime::Handle;

use crate::error_handling::types::StorageError;

pub trait Corpus: Send + Sync {
    /// Short name used in logs (`spam`, `ham`, `unknown`).
    fn name(&self) -> &str;

    /// Stores `raw` under the message identifier `id`.
    fn add_message(&self, id: &str, raw: &[u8]) -> Result<(), StorageError>;

    /// Evicts every message past its expiry; returns how many were removed.
    fn remove_expired_messages(&self) -> Result<usize, StorageError>;

    fn message_count(&self) -> Result<usize, StorageError>;
}

/// The three message caches the proxy maintains.
#[derive(Clone)]
pub struct Corpora {
    pub spam: Arc<dyn Corpus>,
    pub ham: Arc<dyn Corpus>,
    pub unknown: Arc<dyn Corpus>,
}

impl Corpora {
    pub fn all(&self) -> [Arc<dyn Corpus>; 3] {
        [self.spam.clone(), self.ham.clone(), self.unknown.clone()]
    }
}

/// Runs an expiry sweep on one corpus, logging the outcome. Meant to be
/// called from blocking background work.
pub fn sweep(corpus: &dyn Corpus) {
    match corpus.remove_expired_messages() {
        Ok(0) => {}
        Ok(removed) => info!("Expired {} message(s) from the {} cache", removed, corpus.name()),
        Err(e) => warn!("Expiry of the {} cache failed: {}", corpus.name(), e),
    }
}

/// Runs `work` off the I/O loop: on the blocking pool when called inside a
/// runtime, on a plain thread otherwise. Nobody waits for it.
pub fn in_background<F>(work: F)
where
    F: FnOnce() + Send + 'static,
{
    match Handle::try_current() {
        Ok(handle) => {
            handle.spawn_blocking(work);
        }
        Err(_) => {
            std::thread::spawn(work);
        }
    }
}

/// Caches one message in the background; failures are logged.
pub fn store(corpus: Arc<dyn Corpus>, id: String, raw: Vec<u8>) {
    in_background(move || {
        if let Err(e) = corpus.add_message(&id, &raw) {
            warn!("Caching message {} in the {} cache failed: {}", id, corpus.name(), e);
        }
    });
}
