use super::types::*;
use crate::error_handling::types::ConfigError;
use clap::Parser;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Command line of the proxy binary.
///
/// Every switch overrides the matching value of the configuration file. A
/// server given positionally replaces the configured server list, in which
/// case the proxy listens on port 110 unless `--listen-port` says otherwise.
#[derive(Parser, Debug, Clone)]
#[command(name = "pop3bayes")]
#[command(version = "0.0.1")]
#[command(about = "POP3 proxy that tags retrieved mail with a spam classification header")]
pub struct CliArgs {
    /// TOML configuration file
    #[arg(short, long, env = "POP3BAYES_CONFIG")]
    pub config: Option<PathBuf>,

    /// Port the proxy listens on, optionally prefixed with a bind address
    #[arg(short = 'l', long)]
    pub listen_port: Option<String>,

    /// Port of the status interface; implies enabling it
    #[arg(short = 'u', long)]
    pub ui_port: Option<u16>,

    /// Write the whole client conversation to the transcript file
    #[arg(short = 'v', long, action = clap::ArgAction::SetTrue)]
    pub verbose: bool,

    /// Name of the real POP3 server
    pub server: Option<String>,

    /// Port of the real POP3 server
    pub server_port: Option<u16>,
}

/// Application configuration, loaded from a TOML file.
///
/// Sections mirror the option groups of the proxy: `[pop3proxy]` defines the
/// listening surface, `[headers]` and `[categorization]` drive the injected
/// classification header, `[storage]` controls the message caches,
/// `[globals]` the transcript and `[html_ui]` the status endpoint. Every
/// field has a default, so an empty file is a valid configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub pop3proxy: ProxySection,
    pub headers: HeaderOptions,
    pub categorization: CategorizationOptions,
    pub storage: StorageOptions,
    pub globals: GlobalOptions,
    pub html_ui: UiOptions,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProxySection {
    /// Real servers, `host[:port]`
    pub remote_servers: Vec<String>,
    /// Listen ports, `[addr:]port`, paired with `remote_servers` by position
    pub listen_ports: Vec<String>,
    /// Comma separated IPv4 patterns where `*` stands for one octet
    pub allow_remote_connections: String,
}

impl Default for ProxySection {
    fn default() -> Self {
        Self {
            remote_servers: Vec::new(),
            listen_ports: Vec::new(),
            allow_remote_connections: "localhost".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HeaderOptions {
    pub classification_header_name: String,
    pub header_ham_string: String,
    pub header_spam_string: String,
    pub header_unsure_string: String,
    /// Append `; <probability>` to the classification header
    pub include_score: bool,
    pub include_evidence: bool,
    pub evidence_header_name: String,
    pub add_unique_id: bool,
    pub mailid_header_name: String,
}

impl Default for HeaderOptions {
    fn default() -> Self {
        Self {
            classification_header_name: "X-Spambayes-Classification".to_string(),
            header_ham_string: "ham".to_string(),
            header_spam_string: "spam".to_string(),
            header_unsure_string: "unsure".to_string(),
            include_score: false,
            include_evidence: false,
            evidence_header_name: "X-Spambayes-Evidence".to_string(),
            add_unique_id: true,
            mailid_header_name: "X-Spambayes-MailId".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CategorizationOptions {
    pub ham_cutoff: f64,
    pub spam_cutoff: f64,
}

impl Default for CategorizationOptions {
    fn default() -> Self {
        Self {
            ham_cutoff: 0.20,
            spam_cutoff: 0.90,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageOptions {
    pub cache_messages: bool,
    /// Skip caching ham carrying `Precedence: bulk` or `Precedence: list`
    pub no_cache_bulk_ham: bool,
    /// Skip caching messages larger than this many bytes; 0 disables the limit
    pub no_cache_large_messages: usize,
    pub cache_expiry_days: u64,
    pub spam_cache: PathBuf,
    pub ham_cache: PathBuf,
    pub unknown_cache: PathBuf,
    pub lock_file: PathBuf,
}

impl Default for StorageOptions {
    fn default() -> Self {
        Self {
            cache_messages: true,
            no_cache_bulk_ham: false,
            no_cache_large_messages: 0,
            cache_expiry_days: 7,
            spam_cache: PathBuf::from("pop3proxy-spam-cache"),
            ham_cache: PathBuf::from("pop3proxy-ham-cache"),
            unknown_cache: PathBuf::from("pop3proxy-unknown-cache"),
            lock_file: PathBuf::from("pop3bayes.lock"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GlobalOptions {
    pub verbose: bool,
    pub transcript_path: PathBuf,
    /// Self-test mode: nothing is written to the message caches
    pub self_test: bool,
}

impl Default for GlobalOptions {
    fn default() -> Self {
        Self {
            verbose: false,
            transcript_path: PathBuf::from("_pop3proxy.log"),
            self_test: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UiOptions {
    pub enabled: bool,
    pub port: u16,
}

impl Default for UiOptions {
    fn default() -> Self {
        Self {
            enabled: false,
            port: 8880,
        }
    }
}

impl Config {
    /// Reads and validates a configuration file.
    ///
    /// # Errors
    /// - `ConfigError::IoError` if the file cannot be read
    /// - `ConfigError::TomlError` if it is not valid TOML for this schema
    /// - any error of [`Config::validate`]
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let config: Config =
            toml::from_str(content).map_err(|e| ConfigError::TomlError(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Applies command line overrides on top of the file values.
    pub fn apply_args(&mut self, args: &CliArgs) {
        if let Some(ref listen) = args.listen_port {
            self.pop3proxy.listen_ports = vec![listen.clone()];
        }
        if let Some(ref server) = args.server {
            let port = args.server_port.unwrap_or(DEFAULT_POP3_PORT);
            self.pop3proxy.remote_servers = vec![format!("{}:{}", server, port)];
            if self.pop3proxy.listen_ports.is_empty() {
                self.pop3proxy.listen_ports = vec![DEFAULT_POP3_PORT.to_string()];
            }
        }
        if let Some(port) = args.ui_port {
            self.html_ui.port = port;
            self.html_ui.enabled = true;
        }
        if args.verbose {
            self.globals.verbose = true;
        }
    }

    /// Checks the cross-field constraints that serde cannot express.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.endpoints()?;
        let cut = &self.categorization;
        for (name, value) in [("ham_cutoff", cut.ham_cutoff), ("spam_cutoff", cut.spam_cutoff)] {
            if !(0.0..=1.0).contains(&value) {
                return Err(ConfigError::NotInRange(format!(
                    "{} must lie in [0, 1], got {}",
                    name, value
                )));
            }
        }
        Ok(())
    }

    /// Pairs every configured server with its listen port.
    ///
    /// # Errors
    /// `ConfigError::ServersMismatch` when the two lists differ in length, or
    /// the parse error of the first malformed entry.
    pub fn endpoints(&self) -> Result<Vec<ProxyEndpoint>, ConfigError> {
        let proxy = &self.pop3proxy;
        if proxy.remote_servers.len() != proxy.listen_ports.len() {
            return Err(ConfigError::ServersMismatch(format!(
                "{} remote server(s) but {} listen port(s)",
                proxy.remote_servers.len(),
                proxy.listen_ports.len()
            )));
        }
        proxy
            .remote_servers
            .iter()
            .zip(proxy.listen_ports.iter())
            .map(|(server, listen)| {
                Ok(ProxyEndpoint {
                    listen: listen.parse()?,
                    upstream: server.parse()?,
                })
            })
            .collect()
    }
}
