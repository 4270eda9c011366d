use std::net::IpAddr;

use log::warn;
use regex::Regex;

/// Matches one dotted-quad octet, 0 to 255.
const OCTET: &str = r"([01]?\d\d?|2[0-4]\d|25[0-5])";

/// Address allow-list applied before a client session starts.
///
/// The list is written as comma separated IPv4 patterns in which `*` stands
/// for any single octet, e.g. `192.168.1.*,10.0.*.*`. A lone `*` admits
/// everybody. Connections from the proxy's own bind address are always
/// admitted. This is pattern matching on the textual address, not CIDR.
#[derive(Debug, Clone)]
pub struct ConnectionFilter {
    allow_all: bool,
    patterns: Vec<Regex>,
}

impl ConnectionFilter {
    pub fn new(allow_list: &str) -> Self {
        let allow_list = allow_list.trim();
        if allow_list == "*" {
            return Self {
                allow_all: true,
                patterns: Vec::new(),
            };
        }

        let patterns = allow_list
            .split(',')
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .filter_map(|p| {
                let body = p
                    .split('*')
                    .map(regex::escape)
                    .collect::<Vec<_>>()
                    .join(OCTET);
                match Regex::new(&format!("^{}$", body)) {
                    Ok(re) => Some(re),
                    Err(e) => {
                        warn!("Ignoring allow-list entry {:?}: {}", p, e);
                        None
                    }
                }
            })
            .collect();

        Self {
            allow_all: false,
            patterns,
        }
    }

    /// `remote` is the client's address, `local` the address the client
    /// connected to.
    pub fn is_allowed(&self, remote: IpAddr, local: IpAddr) -> bool {
        let remote = remote.to_canonical();
        if self.allow_all || remote == local.to_canonical() {
            return true;
        }
        let text = remote.to_string();
        self.patterns.iter().any(|re| re.is_match(&text))
    }
}

impl Default for ConnectionFilter {
    fn default() -> Self {
        Self::new("localhost")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    fn ip(s: &str) -> IpAddr {
        s.parse().unwrap()
    }

    const LOCAL: IpAddr = IpAddr::V4(Ipv4Addr::new(192, 168, 1, 10));

    #[test]
    fn star_allows_everyone() {
        let filter = ConnectionFilter::new("*");
        assert!(filter.is_allowed(ip("203.0.113.45"), LOCAL));
    }

    #[test]
    fn own_bind_address_is_always_allowed() {
        let filter = ConnectionFilter::new("localhost");
        assert!(filter.is_allowed(LOCAL, LOCAL));
        assert!(!filter.is_allowed(ip("192.168.1.11"), LOCAL));
    }

    #[test]
    fn wildcard_expands_to_one_octet() {
        let filter = ConnectionFilter::new("192.168.1.*, 10.*.0.1");
        assert!(filter.is_allowed(ip("192.168.1.0"), LOCAL));
        assert!(filter.is_allowed(ip("192.168.1.255"), LOCAL));
        assert!(filter.is_allowed(ip("192.168.1.231"), LOCAL));
        assert!(filter.is_allowed(ip("10.42.0.1"), LOCAL));
        assert!(!filter.is_allowed(ip("192.168.2.1"), LOCAL));
        assert!(!filter.is_allowed(ip("10.42.1.1"), LOCAL));
    }

    #[test]
    fn wildcard_covers_every_octet_value() {
        let filter = ConnectionFilter::new("10.0.0.*");
        for octet in 0..=255u8 {
            let peer = IpAddr::V4(Ipv4Addr::new(10, 0, 0, octet));
            assert!(filter.is_allowed(peer, LOCAL), "10.0.0.{} refused", octet);
        }
    }

    #[test]
    fn dots_are_literal() {
        let filter = ConnectionFilter::new("127.0.0.1");
        assert!(filter.is_allowed(ip("127.0.0.1"), LOCAL));
        assert!(!filter.is_allowed(ip("127.0.0.10"), LOCAL));
        assert!(!filter.is_allowed(ip("127.0.9.1"), LOCAL));
    }

    #[test]
    fn ipv4_mapped_ipv6_peer_matches_ipv4_pattern() {
        let filter = ConnectionFilter::new("192.168.1.*");
        assert!(filter.is_allowed(ip("::ffff:192.168.1.20"), LOCAL));
    }

    #[test]
    fn default_only_admits_local_connections() {
        let filter = ConnectionFilter::default();
        assert!(filter.is_allowed(ip("127.0.0.1"), ip("127.0.0.1")));
        assert!(!filter.is_allowed(ip("203.0.113.45"), ip("127.0.0.1")));
    }
}
