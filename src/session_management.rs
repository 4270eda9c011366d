//! Session management core module.
//!
//! Everything tied to the lifetime of one client conversation: the
//! bookkeeping record, the shared counters, the POP3 session driver and the
//! manager that runs one task per accepted client.

use serde::{Deserialize, Serialize};

/// Submodule for the proxied conversation itself.
pub mod proxy_session;
/// Submodule for process-wide counters and message naming.
pub mod registry;
/// Submodule for session data structures and utilities.
pub mod session;
/// Submodule for session manager implementation.
pub mod session_manager;

/// Represents the current status of a session.
///
/// Variants:
/// - `Active`: The session is relaying traffic.
/// - `Completed`: One side closed the connection.
/// - `Killed`: The client sent `KILL`.
/// - `Error`: A client socket failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionStatus {
    Active,
    Completed,
    Killed,
    Error,
}
