//! Common data types used across the data_capture subsystem.

use serde::{Deserialize, Serialize};

/// Direction of client traffic as seen by the proxy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Direction {
    /// Bytes read from the email client.
    ClientToProxy,
    /// Bytes written back to the email client.
    ProxyToClient,
}

impl Direction {
    pub fn arrow(&self) -> &'static str {
        match self {
            Direction::ClientToProxy => "C->P",
            Direction::ProxyToClient => "P->C",
        }
    }
}
