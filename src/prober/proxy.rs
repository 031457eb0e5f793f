//! Proxy selection from `HTTP_PROXY` / `HTTPS_PROXY` / `NO_PROXY` and the
//! CONNECT tunnel used to reach TLS targets through a proxy.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use percent_encoding::percent_decode_str;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::warn;
use url::Url;

use super::error::ProbeError;
use crate::util::{Endpoint, is_loopback_host, parse_host_port};

const MAX_CONNECT_RESPONSE: usize = 8 * 1024;

#[derive(Debug, Clone, PartialEq, Eq)]
enum NoProxy {
    All,
    Host { suffix: String, port: Option<u16> },
}

/// Proxy settings read once from the environment.
#[derive(Debug, Clone, Default)]
pub struct ProxyEnv {
    http: Option<Url>,
    https: Option<Url>,
    no_proxy: Vec<NoProxy>,
}

impl ProxyEnv {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// No proxies at all.
    pub fn direct() -> Self {
        Self::default()
    }

    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |upper: &str, lower: &str| {
            lookup(upper)
                .or_else(|| lookup(lower))
                .filter(|v| !v.trim().is_empty())
        };
        Self {
            http: var("HTTP_PROXY", "http_proxy").and_then(|v| parse_proxy_url(&v)),
            https: var("HTTPS_PROXY", "https_proxy").and_then(|v| parse_proxy_url(&v)),
            no_proxy: var("NO_PROXY", "no_proxy")
                .map(|v| parse_no_proxy(&v))
                .unwrap_or_default(),
        }
    }

    /// The proxy to dial for `target`, if any.
    pub fn proxy_for(&self, target: &Url) -> Option<&Url> {
        let proxy = match target.scheme() {
            "https" => self.https.as_ref(),
            "http" => self.http.as_ref(),
            _ => None,
        }?;
        let host = target.host_str()?;
        if is_loopback_host(host) {
            return None;
        }
        let host = host
            .trim_start_matches('[')
            .trim_end_matches(']')
            .to_ascii_lowercase();
        let port = target.port_or_known_default();
        let bypassed = self.no_proxy.iter().any(|rule| match rule {
            NoProxy::All => true,
            NoProxy::Host {
                suffix,
                port: rule_port,
            } => {
                let host_matches = host == *suffix || host.ends_with(&format!(".{suffix}"));
                host_matches && rule_port.is_none_or(|p| Some(p) == port)
            }
        });
        (!bypassed).then_some(proxy)
    }
}

fn parse_proxy_url(raw: &str) -> Option<Url> {
    let raw = raw.trim();
    let candidate = if raw.contains("://") {
        raw.to_string()
    } else {
        format!("http://{raw}")
    };
    match Url::parse(&candidate) {
        Ok(url) if url.scheme() == "http" && url.host_str().is_some() => Some(url),
        Ok(url) => {
            warn!(proxy = %redacted(&url), "ignoring proxy with unsupported scheme");
            None
        }
        Err(e) => {
            warn!(proxy = raw, error = %e, "ignoring unparsable proxy setting");
            None
        }
    }
}

fn parse_no_proxy(raw: &str) -> Vec<NoProxy> {
    raw.split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(|entry| {
            if entry == "*" {
                return NoProxy::All;
            }
            let (host, port) = parse_host_port(entry, 0);
            NoProxy::Host {
                suffix: host
                    .trim_start_matches("*.")
                    .trim_start_matches('.')
                    .to_ascii_lowercase(),
                port: (port != 0).then_some(port),
            }
        })
        .collect()
}

/// The proxy URL without its password, for logs and errors.
pub fn redacted(proxy: &Url) -> String {
    let mut shown = proxy.clone();
    if shown.password().is_some() {
        let _ = shown.set_password(Some("***"));
    }
    shown.to_string()
}

/// `Proxy-Authorization` value for credentials carried in the proxy URL.
pub fn proxy_authorization(proxy: &Url) -> Option<String> {
    if proxy.username().is_empty() {
        return None;
    }
    let decode = |raw: &str| percent_decode_str(raw).decode_utf8_lossy().into_owned();
    let user = decode(proxy.username());
    let password = proxy.password().map(decode).unwrap_or_default();
    Some(format!("Basic {}", STANDARD.encode(format!("{user}:{password}"))))
}

/// Host and port to dial for a proxy URL.
pub fn proxy_endpoint(proxy: &Url) -> Result<Endpoint, ProbeError> {
    Endpoint::from_url(proxy).map_err(|reason| ProbeError::Proxy {
        proxy: redacted(proxy),
        reason,
    })
}

/// Asks the proxy to open a tunnel to `authority` and consumes its reply.
pub async fn tunnel(stream: &mut TcpStream, authority: &str, proxy: &Url) -> Result<(), ProbeError> {
    let proxy_err = |reason: String| ProbeError::Proxy {
        proxy: redacted(proxy),
        reason,
    };

    let mut request = format!("CONNECT {authority} HTTP/1.1\r\nHost: {authority}\r\n");
    if let Some(credentials) = proxy_authorization(proxy) {
        request.push_str(&format!("Proxy-Authorization: {credentials}\r\n"));
    }
    request.push_str("\r\n");
    stream
        .write_all(request.as_bytes())
        .await
        .map_err(|e| proxy_err(e.to_string()))?;

    let mut response = Vec::with_capacity(256);
    let mut chunk = [0u8; 512];
    while !response.windows(4).any(|w| w == b"\r\n\r\n") {
        if response.len() > MAX_CONNECT_RESPONSE {
            return Err(proxy_err("CONNECT response too large".to_string()));
        }
        let n = stream
            .read(&mut chunk)
            .await
            .map_err(|e| proxy_err(e.to_string()))?;
        if n == 0 {
            return Err(proxy_err("proxy closed the connection".to_string()));
        }
        response.extend_from_slice(&chunk[..n]);
    }

    let status_line = response
        .split(|&b| b == b'\n')
        .next()
        .map(|line| String::from_utf8_lossy(line).trim().to_string())
        .unwrap_or_default();
    let status = status_line.split_whitespace().nth(1).unwrap_or_default();
    if status == "200" {
        Ok(())
    } else {
        Err(proxy_err(format!("unexpected reply {status_line:?}")))
    }
}
