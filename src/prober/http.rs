use std::sync::Arc;

use bytes::Bytes;
use http::header::{HOST, LOCATION, PROXY_AUTHORIZATION, USER_AGENT};
use http::{Method, Request, StatusCode};
use http_body_util::{BodyExt, Empty};
use hyper::body::Incoming;
use hyper_util::rt::TokioIo;
use rustls::ClientConfig;
use rustls::pki_types::CertificateDer;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::task::JoinHandle;
use tracing::debug;
use url::{Position, Url};

use super::error::ProbeError;
use super::first_byte::FirstByteIo;
use super::{dns, proxy, tcp_connect, tls};
use crate::trace::{Checkpoint, TraceRecorder};
use crate::util::Endpoint;

const USER_AGENT_VALUE: &str = concat!("http-probe-exporter/", env!("CARGO_PKG_VERSION"));

trait ProbeStream: AsyncRead + AsyncWrite + Send + Unpin {}

impl<T: AsyncRead + AsyncWrite + Send + Unpin> ProbeStream for T {}

/// One request/response over a dedicated connection. The connection stays
/// open until [`Exchange::release`].
pub struct Exchange {
    pub response: hyper::Response<Incoming>,
    pub peer_certificate: Option<CertificateDer<'static>>,
    connection: JoinHandle<()>,
}

impl Exchange {
    pub fn status(&self) -> StatusCode {
        self.response.status()
    }

    /// Where a redirect response points, resolved against `base`.
    pub fn redirect_location(&self, base: &Url) -> Option<Url> {
        let status = self.response.status();
        let redirects = matches!(
            status,
            StatusCode::MOVED_PERMANENTLY
                | StatusCode::FOUND
                | StatusCode::SEE_OTHER
                | StatusCode::TEMPORARY_REDIRECT
                | StatusCode::PERMANENT_REDIRECT
        );
        if !redirects {
            return None;
        }
        let location = self.response.headers().get(LOCATION)?.to_str().ok()?;
        base.join(location).ok()
    }

    /// Reads the body to its end.
    pub async fn drain(&mut self) -> Result<(), ProbeError> {
        let body = self.response.body_mut();
        while let Some(frame) = body.frame().await {
            frame?;
        }
        Ok(())
    }

    /// Drops the response and tears the connection down, waiting until the
    /// socket is closed.
    pub async fn release(self) {
        drop(self.response);
        self.connection.abort();
        let _ = self.connection.await;
    }
}

/// Dials `url` (directly or through `proxy`), stamping every lifecycle
/// checkpoint on the way, and returns once the response head is in.
pub async fn exchange(
    url: &Url,
    proxy: Option<&Url>,
    tls_config: &Arc<ClientConfig>,
    recorder: &mut TraceRecorder,
) -> Result<Exchange, ProbeError> {
    let endpoint = Endpoint::from_url(url).map_err(|reason| ProbeError::InvalidTarget {
        target: url.to_string(),
        reason,
    })?;
    let dial = match proxy {
        Some(p) => proxy::proxy_endpoint(p)?,
        None => endpoint.clone(),
    };

    let addrs = dns::resolve(&dial.host, dial.ip, dial.port, recorder).await?;
    let mut tcp = tcp_connect::connect(&addrs, recorder).await?;

    if let (Some(p), true) = (proxy, endpoint.tls) {
        proxy::tunnel(&mut tcp, &endpoint.connect_authority(), p).await?;
    }

    let stream: Box<dyn ProbeStream>;
    let mut peer_certificate = None;
    if endpoint.tls {
        let (tls_stream, leaf) =
            tls::handshake(tcp, &endpoint.host, tls_config.clone(), recorder).await?;
        stream = Box::new(tls_stream);
        peer_certificate = leaf;
    } else {
        stream = Box::new(tcp);
    }

    let io = FirstByteIo::new(stream, recorder.clock().clone());
    let first_byte = io.marker();
    let (mut sender, conn) = hyper::client::conn::http1::handshake(TokioIo::new(io)).await?;
    let connection = tokio::spawn(async move {
        if let Err(error) = conn.await {
            debug!(%error, "probe connection closed with error");
        }
    });
    recorder.mark(Checkpoint::GotConnection);

    // Plain requests through a proxy carry the absolute URL.
    let (request_target, proxy_credentials) = match (proxy, endpoint.tls) {
        (Some(p), false) => (
            url[..Position::AfterQuery].to_string(),
            proxy::proxy_authorization(p),
        ),
        _ => (url[Position::BeforePath..Position::AfterQuery].to_string(), None),
    };
    let mut builder = Request::builder()
        .method(Method::GET)
        .uri(request_target)
        .header(HOST, endpoint.authority.as_str())
        .header(USER_AGENT, USER_AGENT_VALUE);
    if let Some(credentials) = proxy_credentials {
        builder = builder.header(PROXY_AUTHORIZATION, credentials);
    }
    let request = match builder.body(Empty::<Bytes>::new()) {
        Ok(request) => request,
        Err(e) => {
            connection.abort();
            return Err(e.into());
        }
    };

    let response = match sender.send_request(request).await {
        Ok(response) => response,
        Err(e) => {
            connection.abort();
            return Err(e.into());
        }
    };
    if let Some(at) = first_byte.get() {
        recorder.record_at(Checkpoint::FirstResponseByte, at);
    }

    Ok(Exchange {
        response,
        peer_certificate,
        connection,
    })
}
