use crate::configuration::config::Config;
use crate::configuration::ProxyEndpoint;
use crate::controller::state::ProxyState;
use crate::error_handling::types::*;
use crate::network::connection_filter::ConnectionFilter;
use crate::network::network_listener::NetworkListener;
use crate::session_management::session_manager::SessionManager;
use crate::web_interface::web_server::WebServer;
use log::{debug, error, info, warn};
use std::future::Future;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Admitted connections waiting for the session manager.
const SESSION_QUEUE: usize = 64;

pub struct Controller {
    pub config: Config,
    state: Option<Arc<ProxyState>>,
}

impl Controller {
    pub fn new(config: Config) -> Result<Self, ControllerError> {
        info!("[+] Creating the controller");
        config.validate()?;
        if config.pop3proxy.remote_servers.is_empty() {
            return Err(ControllerError::InitializationFailed(
                "no POP3 server to proxy; configure remote_servers or name one on the command line"
                    .to_string(),
            ));
        }
        Ok(Self {
            config,
            state: None,
        })
    }

    /// Runs the proxy until Ctrl-C.
    pub async fn run(&mut self) -> Result<(), ControllerError> {
        self.run_until(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!("[!] Cannot wait for Ctrl-C: {}", e);
                std::future::pending::<()>().await;
            }
        })
        .await
    }

    /// Runs the proxy until `shutdown` resolves, then closes the state.
    ///
    /// # Errors
    /// `ControllerError::AlreadyRunning` when another instance holds the
    /// lock, in which case no listener was started.
    pub async fn run_until<F>(&mut self, shutdown: F) -> Result<(), ControllerError>
    where
        F: Future<Output = ()>,
    {
        let endpoints = self.config.endpoints()?;
        let mut state = ProxyState::init(self.config.clone());
        state.prepare()?;
        let state = Arc::new(state);
        self.state = Some(Arc::clone(&state));

        let result = self.serve(state, &endpoints, shutdown).await;
        self.shutdown();
        result
    }

    /// Releases the state. Safe to call more than once.
    pub fn shutdown(&mut self) {
        if let Some(state) = self.state.take() {
            info!("[+] Shutting down");
            state.close();
        }
    }

    async fn serve<F>(
        &self,
        state: Arc<ProxyState>,
        endpoints: &[ProxyEndpoint],
        shutdown: F,
    ) -> Result<(), ControllerError>
    where
        F: Future<Output = ()>,
    {
        let (session_tx, session_rx) = mpsc::channel(SESSION_QUEUE);
        let filter = ConnectionFilter::new(&self.config.pop3proxy.allow_remote_connections);
        let mut listener = NetworkListener::new(session_tx, filter);
        listener.bind_endpoints(endpoints).await?;

        let manager = tokio::spawn(SessionManager::new(Arc::clone(&state), session_rx).run());

        let web = if self.config.html_ui.enabled {
            let server = WebServer::new(Arc::clone(&state));
            let port = self.config.html_ui.port;
            Some(tokio::spawn(async move {
                if let Err(e) = server.start(port).await {
                    error!("[!] {}", e);
                }
            }))
        } else {
            None
        };

        let result = tokio::select! {
            listening = listener.start_listening() => match listening {
                Ok(()) => {
                    warn!("Every listener stopped");
                    Ok(())
                }
                Err(e) => Err(ControllerError::from(e)),
            },
            _ = shutdown => {
                debug!("Shutdown requested");
                Ok(())
            }
        };

        manager.abort();
        if let Some(web) = web {
            web.abort();
        }
        result
    }
}
