use std::io;
use std::net::SocketAddr;
use std::time::Duration;

use thiserror::Error;
use trust_dns_resolver::error::ResolveError;

/// Why a probe produced no response.
#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("invalid target {target:?}: {reason}")]
    InvalidTarget { target: String, reason: String },

    #[error("dns lookup for {host} failed: {source}")]
    Dns {
        host: String,
        #[source]
        source: ResolveError,
    },

    #[error("dns lookup for {host} returned no addresses")]
    NoAddresses { host: String },

    #[error("connect to {addr} failed: {source}")]
    Connect {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },

    #[error("proxy {proxy} tunnel failed: {reason}")]
    Proxy { proxy: String, reason: String },

    #[error("tls handshake with {host} failed: {source}")]
    Tls {
        host: String,
        #[source]
        source: io::Error,
    },

    #[error("building request failed: {0}")]
    Request(#[from] http::Error),

    #[error("http exchange failed: {0}")]
    Http(#[from] hyper::Error),

    #[error("stopped after {0} redirects")]
    TooManyRedirects(usize),

    #[error("probe timed out after {0:?}")]
    Timeout(Duration),

    #[error("probe cancelled")]
    Cancelled,
}

impl ProbeError {
    /// Lifecycle phase the probe was in when it failed, for log context.
    pub fn phase(&self) -> &'static str {
        match self {
            ProbeError::InvalidTarget { .. } => "config",
            ProbeError::Dns { .. } | ProbeError::NoAddresses { .. } => "dns",
            ProbeError::Connect { .. } => "connect",
            ProbeError::Proxy { .. } => "proxy",
            ProbeError::Tls { .. } => "tls",
            ProbeError::Request(_) | ProbeError::Http(_) => "http",
            ProbeError::TooManyRedirects(_) => "redirect",
            ProbeError::Timeout(_) => "timeout",
            ProbeError::Cancelled => "cancelled",
        }
    }

    pub fn is_configuration(&self) -> bool {
        matches!(self, ProbeError::InvalidTarget { .. })
    }
}
