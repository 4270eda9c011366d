//! # Network Listener Module
//!
//! Accepts email clients on every configured proxy port and routes each
//! admitted connection to the [`SessionManager`] through an async channel.
//!
//! ```text
//! ┌─────────────────┐    ┌──────────────────┐    ┌─────────────────┐
//! │ Email clients   │───▶│ NetworkListener  │───▶│ SessionManager  │
//! │                 │    │                  │    │ (via mpsc)      │
//! └─────────────────┘    │ - one socket per │    └─────────────────┘
//!                        │   proxy endpoint │
//!                        │ - allow-list     │
//!                        └──────────────────┘
//! ```
//!
//! [`SessionManager`]: crate::session_management::session_manager::SessionManager

use super::connection_filter::ConnectionFilter;
use super::types::SessionRequest;
use crate::configuration::ProxyEndpoint;
use crate::error_handling::types::{NetworkError, SessionError};
use chrono::Utc;
use log::{debug, error, info, warn};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc::Sender;
use tokio::task::JoinSet;

const REJECTION: &[u8] = b"-ERR Connection not allowed\r\n";

/// Pause after a failed accept, so a full descriptor table does not spin
/// the loop.
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// Owns the listening sockets of the proxy.
///
/// Each socket is bound to one [`ProxyEndpoint`], so a connection arriving
/// on it is proxied to that endpoint's upstream server. Clients failing the
/// allow-list receive a POP3 error line and are disconnected before a
/// session exists.
pub struct NetworkListener {
    listeners: Vec<(ProxyEndpoint, TcpListener)>,
    session_tx: Sender<SessionRequest>,
    connection_filter: ConnectionFilter,
}

impl NetworkListener {
    pub fn new(session_tx: Sender<SessionRequest>, connection_filter: ConnectionFilter) -> Self {
        Self {
            listeners: Vec::new(),
            session_tx,
            connection_filter,
        }
    }

    /// Binds one socket per endpoint.
    ///
    /// # Errors
    /// `NetworkError::BindError` for the first endpoint that cannot be bound;
    /// configuration problems of this kind are fatal at startup.
    pub async fn bind_endpoints(&mut self, endpoints: &[ProxyEndpoint]) -> Result<(), NetworkError> {
        for endpoint in endpoints {
            let address = endpoint.listen.bind_string();
            let listener = TcpListener::bind(&address).await.map_err(|e| {
                error!("[!] Cannot listen on {}: {}", address, e);
                NetworkError::BindError(e)
            })?;
            info!(
                "Listener on {} proxying to {}",
                listener.local_addr().map(|a| a.to_string()).unwrap_or(address),
                endpoint.upstream
            );
            self.listeners.push((endpoint.clone(), listener));
        }
        Ok(())
    }

    /// Addresses actually bound, in endpoint order.
    pub fn local_addrs(&self) -> Vec<SocketAddr> {
        self.listeners
            .iter()
            .filter_map(|(_, l)| l.local_addr().ok())
            .collect()
    }

    /// Runs the accept loops of every bound endpoint.
    ///
    /// Returns `Err(NetworkError::ChannelFailed)` once the session manager is
    /// gone; accept failures are logged and retried.
    pub async fn start_listening(self) -> Result<(), NetworkError> {
        let mut loops = JoinSet::new();
        for (endpoint, listener) in self.listeners {
            let tx = self.session_tx.clone();
            let filter = self.connection_filter.clone();
            loops.spawn(accept_loop(listener, endpoint, filter, tx));
        }
        drop(self.session_tx);

        while let Some(result) = loops.join_next().await {
            match result {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    loops.abort_all();
                    return Err(e);
                }
                Err(e) => error!("Accept loop ended abnormally: {}", e),
            }
        }
        Ok(())
    }
}

async fn accept_loop(
    listener: TcpListener,
    endpoint: ProxyEndpoint,
    filter: ConnectionFilter,
    session_tx: Sender<SessionRequest>,
) -> Result<(), NetworkError> {
    loop {
        let (stream, client_addr) = match listener.accept().await {
            Ok(accepted) => accepted,
            Err(e) => {
                warn!("Accept on {} failed: {}", endpoint.listen, NetworkError::AcceptError(e));
                tokio::time::sleep(ACCEPT_BACKOFF).await;
                continue;
            }
        };

        let local_ip = match stream.local_addr() {
            Ok(addr) => addr.ip(),
            Err(e) => {
                debug!("Dropping {}: no local address ({})", client_addr, e);
                continue;
            }
        };
        if !filter.is_allowed(client_addr.ip(), local_ip) {
            warn!("{}", SessionError::Rejected(client_addr.to_string()));
            tokio::spawn(reject(stream));
            continue;
        }

        debug!("Accepted {} on {}", client_addr, endpoint.listen);
        let request = SessionRequest {
            stream,
            endpoint: endpoint.clone(),
            client_addr,
            timestamp: Utc::now(),
        };
        if session_tx.send(request).await.is_err() {
            return Err(NetworkError::ChannelFailed);
        }
    }
}

async fn reject(mut stream: TcpStream) {
    let _ = stream.write_all(REJECTION).await;
    let _ = stream.shutdown().await;
}
