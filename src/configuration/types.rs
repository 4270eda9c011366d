use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error_handling::types::ConfigError;

/// Port used for an upstream server written without an explicit port.
pub const DEFAULT_POP3_PORT: u16 = 110;

/// Local address a proxy listener binds to, written `[addr:]port`.
///
/// An empty address means every interface.
#[derive(Debug, PartialEq, Eq, Clone, Serialize, Deserialize)]
pub struct ListenAddr {
    pub addr: String,
    pub port: u16,
}

impl ListenAddr {
    pub fn bind_string(&self) -> String {
        if self.addr.is_empty() {
            format!("0.0.0.0:{}", self.port)
        } else {
            format!("{}:{}", self.addr, self.port)
        }
    }
}

impl FromStr for ListenAddr {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let (addr, port) = match s.rsplit_once(':') {
            Some((addr, port)) => (addr.trim().to_string(), port),
            None => (String::new(), s),
        };
        let port = port
            .trim()
            .parse::<u16>()
            .map_err(|_| ConfigError::BadPort(format!("invalid listen port in {:?}", s)))?;
        Ok(Self { addr, port })
    }
}

impl fmt::Display for ListenAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.addr.is_empty() {
            write!(f, "{}", self.port)
        } else {
            write!(f, "{}:{}", self.addr, self.port)
        }
    }
}

/// The real POP3 server a listener proxies to, written `host[:port]`.
#[derive(Debug, PartialEq, Eq, Clone, Serialize, Deserialize)]
pub struct UpstreamServer {
    pub host: String,
    pub port: u16,
}

impl FromStr for UpstreamServer {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Err(ConfigError::BadAddress("empty server name".to_string()));
        }
        match s.split_once(':') {
            Some((host, port)) => {
                let port = port
                    .trim()
                    .parse::<u16>()
                    .map_err(|_| ConfigError::BadPort(format!("invalid server port in {:?}", s)))?;
                Ok(Self {
                    host: host.trim().to_string(),
                    port,
                })
            }
            None => Ok(Self {
                host: s.to_string(),
                port: DEFAULT_POP3_PORT,
            }),
        }
    }
}

impl fmt::Display for UpstreamServer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// One `listen port -> upstream server` mapping. Immutable once sessions run.
#[derive(Debug, PartialEq, Eq, Clone, Serialize, Deserialize)]
pub struct ProxyEndpoint {
    pub listen: ListenAddr,
    pub upstream: UpstreamServer,
}

impl fmt::Display for ProxyEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} -> {}", self.listen, self.upstream)
    }
}
