use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use chrono::Utc;
use log::debug;
use serde::Serialize;

use crate::classification::Disposition;

/// Process-wide counters shared by every session.
///
/// Counters are atomics so sessions and background expiry work can touch
/// them without further coordination. `active_sessions` only moves through
/// [`SessionTicket`]s, which decrement at most once.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    total_sessions: AtomicU64,
    active_sessions: AtomicU64,
    num_hams: AtomicU64,
    num_spams: AtomicU64,
    num_unsure: AtomicU64,
    last_name: Mutex<LastName>,
}

#[derive(Debug, Default)]
struct LastName {
    base: i64,
    uniquifier: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RegistrySnapshot {
    pub total_sessions: u64,
    pub active_sessions: u64,
    pub num_hams: u64,
    pub num_spams: u64,
    pub num_unsure: u64,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn open_session(self: &Arc<Self>) -> SessionTicket {
        self.total_sessions.fetch_add(1, Ordering::SeqCst);
        self.active_sessions.fetch_add(1, Ordering::SeqCst);
        SessionTicket {
            registry: Arc::clone(self),
            closed: AtomicBool::new(false),
        }
    }

    pub fn record_disposition(&self, disposition: Disposition) {
        let counter = match disposition {
            Disposition::Ham => &self.num_hams,
            Disposition::Spam => &self.num_spams,
            Disposition::Unsure => &self.num_unsure,
        };
        counter.fetch_add(1, Ordering::SeqCst);
    }

    pub fn snapshot(&self) -> RegistrySnapshot {
        RegistrySnapshot {
            total_sessions: self.total_sessions.load(Ordering::SeqCst),
            active_sessions: self.active_sessions.load(Ordering::SeqCst),
            num_hams: self.num_hams.load(Ordering::SeqCst),
            num_spams: self.num_spams.load(Ordering::SeqCst),
            num_unsure: self.num_unsure.load(Ordering::SeqCst),
        }
    }

    /// A new message identifier based on the current time.
    pub fn next_message_name(&self) -> String {
        self.next_message_name_at(Utc::now().timestamp())
    }

    /// Ten-digit seconds, with `-2`, `-3`, ... appended when several
    /// messages arrive within the same second. A clock that steps back
    /// keeps issuing names for the last second seen.
    pub fn next_message_name_at(&self, seconds: i64) -> String {
        let mut last = self.last_name.lock().unwrap_or_else(|p| p.into_inner());
        let seconds = seconds.max(last.base);
        if seconds == last.base && last.uniquifier > 0 {
            last.uniquifier += 1;
            format!("{:010}-{}", seconds, last.uniquifier)
        } else {
            last.base = seconds;
            last.uniquifier = 1;
            format!("{:010}", seconds)
        }
    }

    fn release(&self) {
        let _ = self
            .active_sessions
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
    }
}

/// Membership of one session in the active count.
///
/// Closing is idempotent, and dropping an unclosed ticket closes it.
#[derive(Debug)]
pub struct SessionTicket {
    registry: Arc<SessionRegistry>,
    closed: AtomicBool,
}

impl SessionTicket {
    pub fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.registry.release();
            debug!(
                "Session released, {} still active",
                self.registry.active_sessions.load(Ordering::SeqCst)
            );
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

impl Drop for SessionTicket {
    fn drop(&mut self) {
        self.close();
    }
}
