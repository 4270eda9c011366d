use crate::configuration::ProxyEndpoint;
use chrono::{DateTime, Utc};
use std::net::SocketAddr;
use tokio::net::TcpStream;

/// An admitted client connection, handed from the listener to the session
/// manager.
pub struct SessionRequest<S = TcpStream> {
    pub stream: S,
    pub endpoint: ProxyEndpoint,
    pub client_addr: SocketAddr,
    pub timestamp: DateTime<Utc>,
}
