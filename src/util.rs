// Helpers for turning target URLs into dialable endpoints.

use std::net::IpAddr;

use url::{Host, Url};

/// Where a URL points at, split the way the dialer needs it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    /// Host without IPv6 brackets, usable as a DNS name or TLS server name.
    pub host: String,
    /// Set when the host is an IP literal and needs no lookup.
    pub ip: Option<IpAddr>,
    pub port: u16,
    pub tls: bool,
    /// Value for the `Host` header: host plus port when it is not the default.
    pub authority: String,
}

impl Endpoint {
    pub fn from_url(url: &Url) -> Result<Self, String> {
        let tls = match url.scheme() {
            "http" => false,
            "https" => true,
            other => return Err(format!("unsupported scheme {other:?}")),
        };
        let (host, ip) = match url.host() {
            Some(Host::Domain(d)) if !d.is_empty() => (d.to_string(), None),
            Some(Host::Ipv4(v4)) => (v4.to_string(), Some(IpAddr::V4(v4))),
            Some(Host::Ipv6(v6)) => (v6.to_string(), Some(IpAddr::V6(v6))),
            _ => return Err("missing host".to_string()),
        };
        let port = url
            .port_or_known_default()
            .ok_or_else(|| "missing port".to_string())?;
        let host_str = url.host_str().unwrap_or(&host);
        let authority = match url.port() {
            Some(p) => format!("{host_str}:{p}"),
            None => host_str.to_string(),
        };
        Ok(Self {
            host,
            ip,
            port,
            tls,
            authority,
        })
    }

    /// `host:port` form used in a proxy CONNECT request.
    pub fn connect_authority(&self) -> String {
        match self.ip {
            Some(IpAddr::V6(_)) => format!("[{}]:{}", self.host, self.port),
            _ => format!("{}:{}", self.host, self.port),
        }
    }
}

pub fn parse_host_port(s: &str, default_port: u16) -> (String, u16) {
    if let Some(rest) = s.strip_prefix('[') {
        if let Some((host, tail)) = rest.split_once(']') {
            let port = tail
                .strip_prefix(':')
                .and_then(|p| p.parse::<u16>().ok())
                .unwrap_or(default_port);
            return (host.to_string(), port);
        }
    }
    if let Some(idx) = s.rfind(':') {
        // a bare IPv6 address has several colons and no port
        if s[..idx].contains(':') {
            return (s.to_string(), default_port);
        }
        if let Ok(port) = s[idx + 1..].parse::<u16>() {
            return (s[..idx].to_string(), port);
        }
    }
    (s.to_string(), default_port)
}

pub fn is_loopback_host(host: &str) -> bool {
    if host.eq_ignore_ascii_case("localhost") {
        return true;
    }
    let bare = host.trim_start_matches('[').trim_end_matches(']');
    bare.parse::<IpAddr>().map(|ip| ip.is_loopback()).unwrap_or(false)
}
