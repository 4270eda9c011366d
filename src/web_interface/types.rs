use serde::Serialize;

use crate::session_management::registry::RegistrySnapshot;

/// Body of `GET /status`.
#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub counters: RegistrySnapshot,
    pub servers: Vec<String>,
    pub listen_ports: Vec<String>,
    pub caching: bool,
}

/// API error payload
#[derive(Debug, Serialize)]
pub struct ApiError {
    pub message: String,
}
