use crate::configuration::ProxyEndpoint;
use crate::session_management::SessionStatus;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::net::SocketAddr;
use uuid::Uuid;

/// Bookkeeping for one client conversation, logged when it ends.
#[derive(Debug, Clone, Serialize)]
pub struct Session {
    pub id: Uuid,
    pub upstream: String,
    pub client_addr: SocketAddr,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub commands: u64,
    pub bytes_from_client: u64,
    pub bytes_to_client: u64,
    pub status: SessionStatus,
}

impl Session {
    pub fn new(endpoint: &ProxyEndpoint, client_addr: SocketAddr) -> Self {
        Self {
            id: Uuid::new_v4(),
            upstream: endpoint.upstream.to_string(),
            client_addr,
            start_time: Utc::now(),
            end_time: None,
            commands: 0,
            bytes_from_client: 0,
            bytes_to_client: 0,
            status: SessionStatus::Active,
        }
    }

    pub fn finish(&mut self, status: SessionStatus) {
        self.end_time = Some(Utc::now());
        self.status = status;
    }

    pub fn duration(&self) -> chrono::Duration {
        self.end_time.unwrap_or_else(Utc::now) - self.start_time
    }
}
