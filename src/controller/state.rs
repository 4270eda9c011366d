//! Shared proxy context.
//!
//! Everything sessions need beyond their own sockets lives in one
//! `ProxyState`, shared as `Arc<ProxyState>`. It goes through `init` (options
//! only, no side effects), `prepare` (lock, caches, transcript, first expiry
//! sweep) and `close` (final counters, lock released).

use std::sync::{Arc, Mutex};

use log::{info, warn};

use super::instance_lock::InstanceLock;
use crate::classification::{Classifier, UntrainedClassifier};
use crate::configuration::config::Config;
use crate::data_capture::TranscriptRecorder;
use crate::error_handling::types::ControllerError;
use crate::session_management::registry::SessionRegistry;
use crate::storage::corpus::{self, Corpora};
use crate::storage::ExpiryFileCorpus;

pub struct ProxyState {
    pub config: Config,
    pub registry: Arc<SessionRegistry>,
    pub classifier: Arc<dyn Classifier>,
    corpora: Option<Corpora>,
    transcript: Option<Arc<TranscriptRecorder>>,
    lock: Mutex<Option<InstanceLock>>,
    prepared: bool,
}

impl ProxyState {
    pub fn init(config: Config) -> Self {
        Self {
            config,
            registry: Arc::new(SessionRegistry::new()),
            classifier: Arc::new(UntrainedClassifier),
            corpora: None,
            transcript: None,
            lock: Mutex::new(None),
            prepared: false,
        }
    }

    pub fn with_classifier(mut self, classifier: Arc<dyn Classifier>) -> Self {
        self.classifier = classifier;
        self
    }

    pub fn with_corpora(mut self, corpora: Corpora) -> Self {
        self.corpora = Some(corpora);
        self
    }

    pub fn with_transcript(mut self, transcript: Arc<TranscriptRecorder>) -> Self {
        self.transcript = Some(transcript);
        self
    }

    /// Acquires the instance lock, then opens the caches and the transcript.
    ///
    /// # Errors
    /// `ControllerError::AlreadyRunning` when another proxy holds the lock;
    /// nothing else has been touched at that point.
    pub fn prepare(&mut self) -> Result<(), ControllerError> {
        if self.prepared {
            return Ok(());
        }
        let lock = InstanceLock::acquire(&self.config.storage.lock_file)?;

        if self.config.globals.self_test {
            info!("Self-test mode: retrieved messages will not be cached");
        } else if self.corpora.is_none() {
            let storage = &self.config.storage;
            let days = storage.cache_expiry_days;
            self.corpora = Some(Corpora {
                spam: Arc::new(ExpiryFileCorpus::new("spam", &storage.spam_cache, days)?),
                ham: Arc::new(ExpiryFileCorpus::new("ham", &storage.ham_cache, days)?),
                unknown: Arc::new(ExpiryFileCorpus::new("unknown", &storage.unknown_cache, days)?),
            });
        }

        if let Some(ref corpora) = self.corpora {
            for c in corpora.all() {
                corpus::sweep(c.as_ref());
            }
        }

        if self.config.globals.verbose && self.transcript.is_none() {
            match TranscriptRecorder::open(&self.config.globals.transcript_path) {
                Ok(recorder) => self.transcript = Some(Arc::new(recorder)),
                Err(e) => warn!("Continuing without a transcript: {}", e),
            }
        }

        *self.lock.lock().unwrap_or_else(|p| p.into_inner()) = Some(lock);
        self.prepared = true;
        Ok(())
    }

    pub fn is_prepared(&self) -> bool {
        self.prepared
    }

    /// The message caches; `None` in self-test mode.
    pub fn corpora(&self) -> Option<&Corpora> {
        self.corpora.as_ref()
    }

    pub fn transcript(&self) -> Option<&Arc<TranscriptRecorder>> {
        self.transcript.as_ref()
    }

    /// Logs the final counters and releases the instance lock. Safe to call
    /// more than once.
    pub fn close(&self) {
        let mut lock = self.lock.lock().unwrap_or_else(|p| p.into_inner());
        if let Some(mut held) = lock.take() {
            let s = self.registry.snapshot();
            info!(
                "Closing: {} session(s) served, {} active, {} spam / {} ham / {} unsure",
                s.total_sessions, s.active_sessions, s.num_spams, s.num_hams, s.num_unsure
            );
            held.release();
        }
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use crate::error_handling::types::StorageError;
    use crate::storage::Corpus;

    /// In-memory corpus recording what the proxy cached.
    #[derive(Default)]
    pub struct MemoryCorpus {
        pub name: String,
        pub messages: Mutex<Vec<(String, Vec<u8>)>>,
        pub sweeps: Mutex<usize>,
    }

    impl MemoryCorpus {
        pub fn named(name: &str) -> Arc<Self> {
            Arc::new(Self {
                name: name.to_string(),
                ..Self::default()
            })
        }

        /// Waits for background writes to deliver at least `count` messages.
        pub fn wait_for_messages(&self, count: usize) -> Vec<(String, Vec<u8>)> {
            for _ in 0..200 {
                {
                    let messages = self.messages.lock().unwrap();
                    if messages.len() >= count {
                        return messages.clone();
                    }
                }
                std::thread::sleep(std::time::Duration::from_millis(10));
            }
            panic!("{} cache never reached {} message(s)", self.name, count);
        }
    }

    impl Corpus for MemoryCorpus {
        fn name(&self) -> &str {
            &self.name
        }

        fn add_message(&self, id: &str, raw: &[u8]) -> Result<(), StorageError> {
            self.messages.lock().unwrap().push((id.to_string(), raw.to_vec()));
            Ok(())
        }

        fn remove_expired_messages(&self) -> Result<usize, StorageError> {
            *self.sweeps.lock().unwrap() += 1;
            Ok(0)
        }

        fn message_count(&self) -> Result<usize, StorageError> {
            Ok(self.messages.lock().unwrap().len())
        }
    }

    pub struct MemoryCorpora {
        pub spam: Arc<MemoryCorpus>,
        pub ham: Arc<MemoryCorpus>,
        pub unknown: Arc<MemoryCorpus>,
    }

    impl MemoryCorpora {
        pub fn new() -> Self {
            Self {
                spam: MemoryCorpus::named("spam"),
                ham: MemoryCorpus::named("ham"),
                unknown: MemoryCorpus::named("unknown"),
            }
        }

        pub fn corpora(&self) -> Corpora {
            Corpora {
                spam: self.spam.clone(),
                ham: self.ham.clone(),
                unknown: self.unknown.clone(),
            }
        }
    }
}
