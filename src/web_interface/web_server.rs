use std::net::SocketAddr;
use std::sync::Arc;

use log::info;

use super::routes::routes;
use crate::controller::state::ProxyState;
use crate::error_handling::types::WebError;

/// Status server for the running proxy.
pub struct WebServer {
    state: Arc<ProxyState>,
}

impl WebServer {
    pub fn new(state: Arc<ProxyState>) -> Self {
        Self { state }
    }

    /// Serves the status routes on `port` until the task is dropped.
    pub async fn start(&self, port: u16) -> Result<(), WebError> {
        let addr: SocketAddr = ([127, 0, 0, 1], port).into();

        // warp panics on a failed bind; check the port is free first.
        std::net::TcpListener::bind(addr)
            .map_err(|e| WebError::BindFailed(format!("{}: {}", addr, e)))?;

        info!("Status page on http://{}/", addr);
        warp::serve(routes(Arc::clone(&self.state))).run(addr).await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::configuration::config::Config;

    #[tokio::test]
    async fn test_busy_port_is_reported() {
        let taken = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = taken.local_addr().unwrap().port();
        let server = WebServer::new(Arc::new(ProxyState::init(Config::default())));
        assert!(matches!(server.start(port).await, Err(WebError::BindFailed(_))));
    }
}
