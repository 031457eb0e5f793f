use std::net::{IpAddr, SocketAddr};

use tracing::debug;
use trust_dns_resolver::TokioAsyncResolver;
use trust_dns_resolver::config::{ResolverConfig, ResolverOpts};

use super::error::ProbeError;
use crate::trace::{Checkpoint, TraceRecorder};

/// Resolves `host` to dialable addresses, stamping DnsStart/DnsDone.
///
/// IP literals are returned as-is and leave both DNS checkpoints unset.
pub async fn resolve(
    host: &str,
    ip: Option<IpAddr>,
    port: u16,
    recorder: &mut TraceRecorder,
) -> Result<Vec<SocketAddr>, ProbeError> {
    if let Some(ip) = ip {
        return Ok(vec![SocketAddr::new(ip, port)]);
    }

    // A fresh resolver per probe: its cache dies with the scrape.
    let resolver = TokioAsyncResolver::tokio_from_system_conf().unwrap_or_else(|e| {
        debug!(error = %e, "system resolver config unavailable, using defaults");
        TokioAsyncResolver::tokio(ResolverConfig::default(), ResolverOpts::default())
    });

    recorder.mark(Checkpoint::DnsStart);
    let lookup = resolver.lookup_ip(host).await;
    recorder.mark(Checkpoint::DnsDone);

    let addrs: Vec<SocketAddr> = lookup
        .map_err(|source| ProbeError::Dns {
            host: host.to_string(),
            source,
        })?
        .iter()
        .map(|ip| SocketAddr::new(ip, port))
        .collect();

    if addrs.is_empty() {
        return Err(ProbeError::NoAddresses {
            host: host.to_string(),
        });
    }
    Ok(addrs)
}
