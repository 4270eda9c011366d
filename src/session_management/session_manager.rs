use crate::configuration::ProxyEndpoint;
use crate::controller::state::ProxyState;
use crate::network::types::SessionRequest;
use crate::network::upstream::UpstreamConnection;
use crate::rewrite::RewritePolicy;
use crate::session_management::proxy_session::ProxySession;
use crate::session_management::session::Session;
use log::{debug, error};
use std::sync::Arc;
use tokio::sync::mpsc::Receiver;
use tokio::task::{JoinError, JoinSet};

/// The structure related to session management
///
/// This structure receives the session requests produced by the network
/// listener and runs each one as its own task.
///
/// # Fields Overview
///
/// - `policy`: Rewrites completed responses; shares the proxy state with every session
/// - `session_rx`: Admitted connections from the listener
/// - `sessions`: Running session tasks, reaped as they finish
///
/// A session that fails or panics is logged and dropped; its siblings and the
/// accept loops carry on.
pub struct SessionManager {
    policy: RewritePolicy,
    session_rx: Receiver<SessionRequest>,
    sessions: JoinSet<Session>,
}

impl SessionManager {
    pub fn new(state: Arc<ProxyState>, session_rx: Receiver<SessionRequest>) -> Self {
        Self {
            policy: RewritePolicy::new(state),
            session_rx,
            sessions: JoinSet::new(),
        }
    }

    /// Serves session requests until the listener side of the channel is
    /// dropped, then waits for the remaining sessions to finish.
    pub async fn run(mut self) {
        loop {
            tokio::select! {
                request = self.session_rx.recv() => match request {
                    Some(request) => self.handle_session(request),
                    None => break,
                },
                Some(finished) = self.sessions.join_next(), if !self.sessions.is_empty() => {
                    Self::reap(finished);
                }
            }
        }

        debug!("No more session requests, draining {} session(s)", self.sessions.len());
        while let Some(finished) = self.sessions.join_next().await {
            Self::reap(finished);
        }
    }

    pub fn handle_session(&mut self, request: SessionRequest) {
        let policy = self.policy.clone();
        self.sessions.spawn(async move {
            let SessionRequest {
                stream,
                endpoint,
                client_addr,
                timestamp,
            } = request;
            debug!("Serving {} accepted at {}", client_addr, timestamp);
            let upstream = connect_upstream(&endpoint).await;
            ProxySession::new(stream, client_addr, &endpoint, upstream, policy)
                .run()
                .await
        });
    }

    fn reap(finished: Result<Session, JoinError>) {
        match finished {
            Ok(session) => debug!("[{}] Session task finished", session.id),
            Err(e) if e.is_panic() => error!("A session task panicked: {}", e),
            Err(e) => debug!("A session task was cancelled: {}", e),
        }
    }
}

async fn connect_upstream(endpoint: &ProxyEndpoint) -> UpstreamConnection {
    UpstreamConnection::connect(&endpoint.upstream.host, endpoint.upstream.port).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::configuration::config::Config;
    use crate::network::connection_filter::ConnectionFilter;
    use crate::network::network_listener::NetworkListener;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::{TcpListener, TcpStream};
    use tokio::sync::mpsc;

    async fn read_exact_text(stream: &mut TcpStream, len: usize) -> String {
        let mut buf = vec![0u8; len];
        stream.read_exact(&mut buf).await.unwrap();
        String::from_utf8(buf).unwrap()
    }

    /// Listener, manager and a scripted upstream over loopback TCP.
    async fn proxy_to(upstream_port: u16) -> (std::net::SocketAddr, Arc<ProxyState>) {
        let _ = env_logger::builder().is_test(true).try_init();
        let state = Arc::new(ProxyState::init(Config::default()));
        let (tx, rx) = mpsc::channel(8);
        let mut listener = NetworkListener::new(tx, ConnectionFilter::default());
        let endpoint = ProxyEndpoint {
            listen: "127.0.0.1:0".parse().unwrap(),
            upstream: format!("127.0.0.1:{}", upstream_port).parse().unwrap(),
        };
        listener.bind_endpoints(&[endpoint]).await.unwrap();
        let addr = listener.local_addrs()[0];
        tokio::spawn(listener.start_listening());
        tokio::spawn(SessionManager::new(Arc::clone(&state), rx).run());
        (addr, state)
    }

    #[tokio::test]
    async fn test_proxies_a_mailbox_listing_over_tcp() {
        let server = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let server_port = server.local_addr().unwrap().port();
        let (proxy_addr, state) = proxy_to(server_port).await;

        let mut client = TcpStream::connect(proxy_addr).await.unwrap();
        let (mut upstream, _) = server.accept().await.unwrap();

        upstream.write_all(b"+OK ready\r\n").await.unwrap();
        assert_eq!(read_exact_text(&mut client, 11).await, "+OK ready\r\n");

        client.write_all(b"STAT\r\n").await.unwrap();
        assert_eq!(read_exact_text(&mut upstream, 6).await, "STAT\r\n");
        upstream.write_all(b"+OK 2 500\r\n").await.unwrap();
        assert_eq!(read_exact_text(&mut client, 12).await, "+OK 2 1524\r\n");

        client.write_all(b"QUIT\r\n").await.unwrap();
        assert_eq!(read_exact_text(&mut upstream, 6).await, "QUIT\r\n");
        upstream.write_all(b"+OK bye\r\n").await.unwrap();
        drop(upstream);

        let mut rest = Vec::new();
        client.read_to_end(&mut rest).await.unwrap();
        assert_eq!(rest, b"+OK bye\r\n");
        assert_eq!(state.registry.snapshot().total_sessions, 1);
    }

    #[tokio::test]
    async fn test_unreachable_server_still_gets_a_pop3_answer() {
        // Bind and drop to find a port nobody listens on.
        let port = {
            let probe = TcpListener::bind("127.0.0.1:0").await.unwrap();
            probe.local_addr().unwrap().port()
        };
        let (proxy_addr, _state) = proxy_to(port).await;

        let mut client = TcpStream::connect(proxy_addr).await.unwrap();
        let mut reply = Vec::new();
        client.read_to_end(&mut reply).await.unwrap();
        let reply = String::from_utf8(reply).unwrap();
        assert!(reply.starts_with(&format!("-ERR Can't connect to 127.0.0.1:{}", port)));
        assert!(reply.ends_with("\r\n"));
    }

    #[tokio::test]
    async fn test_sessions_are_independent() {
        let server = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let (proxy_addr, state) = proxy_to(server.local_addr().unwrap().port()).await;

        let mut first = TcpStream::connect(proxy_addr).await.unwrap();
        let (mut first_up, _) = server.accept().await.unwrap();
        let mut second = TcpStream::connect(proxy_addr).await.unwrap();
        let (mut second_up, _) = server.accept().await.unwrap();

        first.write_all(b"KILL\r\n").await.unwrap();
        let mut quit = Vec::new();
        first_up.read_to_end(&mut quit).await.unwrap();
        assert_eq!(quit, b"QUIT\r\n");

        second.write_all(b"NOOP\r\n").await.unwrap();
        assert_eq!(read_exact_text(&mut second_up, 6).await, "NOOP\r\n");
        second_up.write_all(b"+OK\r\n").await.unwrap();
        assert_eq!(read_exact_text(&mut second, 5).await, "+OK\r\n");

        assert_eq!(state.registry.snapshot().total_sessions, 2);
    }

    #[tokio::test]
    async fn test_manager_drains_when_listener_goes_away() {
        let state = Arc::new(ProxyState::init(Config::default()));
        let (tx, rx) = mpsc::channel::<SessionRequest>(1);
        let manager = tokio::spawn(SessionManager::new(state, rx).run());
        drop(tx);
        manager.await.unwrap();
    }
}
