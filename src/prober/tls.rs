use std::sync::Arc;

use rustls::pki_types::{CertificateDer, ServerName};
use rustls::{ClientConfig, RootCertStore};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_rustls::TlsConnector;
use tokio_rustls::client::TlsStream;

use super::error::ProbeError;
use crate::trace::{Checkpoint, TraceRecorder};

/// Client config trusting the Mozilla root set.
pub fn default_client_config() -> Result<Arc<ClientConfig>, rustls::Error> {
    let mut roots = RootCertStore::empty();
    roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
    client_config_with_roots(roots)
}

pub fn client_config_with_roots(roots: RootCertStore) -> Result<Arc<ClientConfig>, rustls::Error> {
    let mut config =
        ClientConfig::builder_with_provider(rustls::crypto::ring::default_provider().into())
            .with_safe_default_protocol_versions()?
            .with_root_certificates(roots)
            .with_no_client_auth();
    // the exchange speaks HTTP/1.1 only
    config.alpn_protocols = vec![b"http/1.1".to_vec()];
    Ok(Arc::new(config))
}

/// Runs the handshake between TlsStart and TlsDone and captures the leaf
/// certificate the server presented.
pub async fn handshake<S>(
    stream: S,
    host: &str,
    config: Arc<ClientConfig>,
    recorder: &mut TraceRecorder,
) -> Result<(TlsStream<S>, Option<CertificateDer<'static>>), ProbeError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let server_name =
        ServerName::try_from(host.to_string()).map_err(|e| ProbeError::InvalidTarget {
            target: host.to_string(),
            reason: e.to_string(),
        })?;
    let connector = TlsConnector::from(config);

    recorder.mark(Checkpoint::TlsStart);
    let result = connector.connect(server_name, stream).await;
    recorder.mark(Checkpoint::TlsDone);

    let tls = result.map_err(|source| ProbeError::Tls {
        host: host.to_string(),
        source,
    })?;
    let leaf = tls
        .get_ref()
        .1
        .peer_certificates()
        .and_then(|chain| chain.first())
        .cloned();
    Ok((tls, leaf))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_offers_http11() {
        let config = default_client_config().unwrap();
        assert_eq!(config.alpn_protocols, vec![b"http/1.1".to_vec()]);
    }
}
