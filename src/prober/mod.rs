//! One instrumented HTTP(S) fetch per call, with a checkpoint timestamp for
//! every step of the connection lifecycle.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use rustls::ClientConfig;
use rustls::pki_types::CertificateDer;
use tracing::debug;
use url::Url;

use crate::timestamp::{Clock, MonotonicClock};
use crate::trace::{Checkpoint, TimingTrace, TraceRecorder};
use crate::util::Endpoint;

pub mod dns;
pub mod error;
pub mod first_byte;
pub mod http;
pub mod proxy;
pub mod tcp_connect;
pub mod tls;

pub use error::ProbeError;
pub use proxy::ProxyEnv;

/// Applied when the caller passes a zero or negative timeout.
pub const DEFAULT_TIMEOUT_SECS: u64 = 10;
pub const DEFAULT_MAX_REDIRECTS: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProbeOptions {
    /// Redirect hops to follow before giving up. Zero reports the 3xx as is.
    pub max_redirects: usize,
    /// Take `finish` after the body is drained instead of when the response
    /// head arrives.
    pub read_body: bool,
}

impl Default for ProbeOptions {
    fn default() -> Self {
        Self {
            max_redirects: DEFAULT_MAX_REDIRECTS,
            read_body: false,
        }
    }
}

#[derive(Debug)]
pub enum ProbeOutcome {
    /// A response arrived, whatever its status.
    Success {
        status_code: u16,
        trace: TimingTrace,
        /// Leaf certificate of a TLS target. Informational only.
        peer_certificate: Option<CertificateDer<'static>>,
    },
    Failure { error: ProbeError },
}

impl ProbeOutcome {
    pub fn status_code(&self) -> Option<u16> {
        match self {
            ProbeOutcome::Success { status_code, .. } => Some(*status_code),
            ProbeOutcome::Failure { .. } => None,
        }
    }

    pub fn trace(&self) -> Option<&TimingTrace> {
        match self {
            ProbeOutcome::Success { trace, .. } => Some(trace),
            ProbeOutcome::Failure { .. } => None,
        }
    }
}

/// Immutable probe settings. Cheap to clone; every `run` builds its own
/// trace, connection and resolver.
#[derive(Debug, Clone)]
pub struct Probe {
    clock: Arc<dyn Clock>,
    tls_config: Arc<ClientConfig>,
    proxies: Arc<ProxyEnv>,
    options: ProbeOptions,
}

pub fn effective_timeout(timeout_secs: i64) -> Duration {
    if timeout_secs <= 0 {
        Duration::from_secs(DEFAULT_TIMEOUT_SECS)
    } else {
        Duration::from_secs(timeout_secs as u64)
    }
}

fn parse_target(target: &str) -> Result<Url, ProbeError> {
    let invalid = |reason: String| ProbeError::InvalidTarget {
        target: target.to_string(),
        reason,
    };
    let url = Url::parse(target).map_err(|e| invalid(e.to_string()))?;
    Endpoint::from_url(&url).map_err(invalid)?;
    Ok(url)
}

impl Probe {
    /// Probe using the monotonic clock, Mozilla roots and the proxy
    /// settings currently in the environment.
    pub fn new(options: ProbeOptions) -> Result<Self, rustls::Error> {
        Ok(Self {
            clock: Arc::new(MonotonicClock),
            tls_config: tls::default_client_config()?,
            proxies: Arc::new(ProxyEnv::from_env()),
            options,
        })
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_tls_config(mut self, tls_config: Arc<ClientConfig>) -> Self {
        self.tls_config = tls_config;
        self
    }

    pub fn with_proxies(mut self, proxies: ProxyEnv) -> Self {
        self.proxies = Arc::new(proxies);
        self
    }

    pub fn options(&self) -> ProbeOptions {
        self.options
    }

    pub async fn run(&self, target: &str, timeout_secs: i64) -> ProbeOutcome {
        self.run_until(target, timeout_secs, std::future::pending())
            .await
    }

    /// Like [`Probe::run`], but gives up as soon as `cancelled` resolves.
    pub async fn run_until<C>(&self, target: &str, timeout_secs: i64, cancelled: C) -> ProbeOutcome
    where
        C: Future<Output = ()>,
    {
        let url = match parse_target(target) {
            Ok(url) => url,
            Err(error) => return ProbeOutcome::Failure { error },
        };
        let timeout = effective_timeout(timeout_secs);

        let result = tokio::select! {
            fetched = tokio::time::timeout(timeout, self.fetch(url)) => {
                fetched.unwrap_or(Err(ProbeError::Timeout(timeout)))
            }
            () = cancelled => Err(ProbeError::Cancelled),
        };

        match result {
            Ok(outcome) => outcome,
            Err(error) => ProbeOutcome::Failure { error },
        }
    }

    async fn fetch(&self, mut url: Url) -> Result<ProbeOutcome, ProbeError> {
        let mut recorder = TraceRecorder::new(self.clock.clone());
        recorder.mark(Checkpoint::Start);
        let mut redirects = 0;

        loop {
            recorder.reset_hop();
            let proxy = self.proxies.proxy_for(&url);
            let mut exchange = http::exchange(&url, proxy, &self.tls_config, &mut recorder).await?;

            if self.options.max_redirects > 0 {
                if let Some(next) = exchange.redirect_location(&url) {
                    exchange.release().await;
                    if redirects >= self.options.max_redirects {
                        return Err(ProbeError::TooManyRedirects(redirects));
                    }
                    redirects += 1;
                    debug!(from = %url, to = %next, "following redirect");
                    url = next;
                    continue;
                }
            }

            let status_code = exchange.status().as_u16();
            if self.options.read_body {
                let drained = exchange.drain().await;
                recorder.mark(Checkpoint::Finish);
                if let Err(error) = drained {
                    exchange.release().await;
                    return Err(error);
                }
            } else {
                recorder.mark(Checkpoint::Finish);
            }

            let peer_certificate = exchange.peer_certificate.take();
            exchange.release().await;
            return Ok(ProbeOutcome::Success {
                status_code,
                trace: recorder.into_trace(),
                peer_certificate,
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{
        BLACKHOLE, reply, serve_http, serve_https, serve_silent, serve_stalled_body, serve_status,
    };
    use crate::timestamp::testing::StepClock;
    use ::http::StatusCode;
    use std::time::Instant;

    fn probe() -> Probe {
        Probe::new(ProbeOptions::default())
            .unwrap()
            .with_proxies(ProxyEnv::direct())
    }

    #[test]
    fn non_positive_timeouts_fall_back_to_default() {
        assert_eq!(effective_timeout(0), Duration::from_secs(10));
        assert_eq!(effective_timeout(-3), Duration::from_secs(10));
        assert_eq!(effective_timeout(2), Duration::from_secs(2));
    }

    #[tokio::test]
    async fn empty_target_is_a_configuration_failure() {
        let outcome = probe().run("", 5).await;
        match outcome {
            ProbeOutcome::Failure { error } => assert!(error.is_configuration(), "{error}"),
            other => panic!("expected failure, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn unsupported_scheme_is_a_configuration_failure() {
        let outcome = probe().run("ftp://example.com/file", 5).await;
        assert!(matches!(
            outcome,
            ProbeOutcome::Failure { ref error } if error.is_configuration()
        ));
    }

    #[tokio::test]
    async fn plain_http_success_has_no_tls_phase() {
        let addr = serve_status(StatusCode::OK).await;
        let outcome = probe().run(&format!("http://{addr}/"), 5).await;
        let ProbeOutcome::Success {
            status_code,
            trace,
            peer_certificate,
        } = outcome
        else {
            panic!("expected a successful probe");
        };
        assert_eq!(status_code, 200);
        assert!(peer_certificate.is_none());
        assert_eq!(trace.tls_handshake(), Duration::ZERO);
        assert!(!trace.tls_start.is_set());
        assert!(trace.start <= trace.connect_start);
        assert!(trace.connect_start <= trace.connect_done);
        assert!(trace.connect_done <= trace.got_connection);
        assert!(trace.got_connection <= trace.first_response_byte);
        assert!(trace.first_response_byte <= trace.finish);
    }

    #[tokio::test]
    async fn error_statuses_are_still_successful_probes() {
        let addr = serve_status(StatusCode::SERVICE_UNAVAILABLE).await;
        let outcome = probe().run(&format!("http://{addr}/"), 5).await;
        assert_eq!(outcome.status_code(), Some(503));
    }

    #[tokio::test]
    async fn injected_clock_yields_exact_phase_durations() {
        let addr = serve_status(StatusCode::OK).await;
        let clock = Arc::new(StepClock::new(Duration::from_millis(1)));
        let outcome = probe()
            .with_clock(clock)
            .run(&format!("http://{addr}/"), 5)
            .await;
        let trace = *outcome.trace().expect("success");
        // start, connect start/done, got connection, first byte, finish
        assert_eq!(trace.dns_lookup(), Duration::ZERO);
        assert_eq!(trace.tcp_connect(), Duration::from_millis(1));
        assert_eq!(trace.tls_handshake(), Duration::ZERO);
        assert_eq!(trace.server_processing(), Duration::from_millis(1));
        assert_eq!(trace.content_transfer(), Duration::from_millis(1));
        assert_eq!(trace.time_to_first_byte(), Duration::from_millis(4));
    }

    #[tokio::test]
    async fn https_success_records_handshake_and_leaf() {
        let server = serve_https(StatusCode::OK).await;
        let outcome = probe()
            .with_tls_config(server.client_config())
            .run(&format!("https://{}/", server.addr), 5)
            .await;
        let ProbeOutcome::Success {
            status_code,
            trace,
            peer_certificate,
        } = outcome
        else {
            panic!("expected a successful probe");
        };
        assert_eq!(status_code, 200);
        assert!(trace.tls_handshake() > Duration::ZERO);
        assert!(trace.connect_done <= trace.tls_start);
        assert!(trace.tls_done <= trace.got_connection);
        assert_eq!(peer_certificate, Some(server.certificate.clone()));
    }

    #[tokio::test]
    async fn untrusted_certificate_fails_in_tls_phase() {
        let server = serve_https(StatusCode::OK).await;
        let outcome = probe().run(&format!("https://{}/", server.addr), 5).await;
        match outcome {
            ProbeOutcome::Failure { error } => assert_eq!(error.phase(), "tls"),
            other => panic!("expected failure, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn unreachable_host_fails_within_timeout() {
        let started = Instant::now();
        let outcome = probe().run(BLACKHOLE, 1).await;
        assert!(matches!(outcome, ProbeOutcome::Failure { .. }));
        assert!(started.elapsed() < Duration::from_millis(1_500));
    }

    #[tokio::test]
    async fn silent_server_times_out() {
        let addr = serve_silent().await;
        let started = Instant::now();
        let outcome = probe().run(&format!("http://{addr}/"), 1).await;
        match outcome {
            ProbeOutcome::Failure { error } => assert_eq!(error.phase(), "timeout"),
            other => panic!("expected failure, got {other:?}"),
        }
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_secs(1));
        assert!(elapsed < Duration::from_millis(1_500));
    }

    #[tokio::test]
    async fn cancellation_stops_the_probe() {
        let addr = serve_silent().await;
        let outcome = probe()
            .run_until(&format!("http://{addr}/"), 30, async {
                tokio::time::sleep(Duration::from_millis(50)).await;
            })
            .await;
        match outcome {
            ProbeOutcome::Failure { error } => assert_eq!(error.phase(), "cancelled"),
            other => panic!("expected failure, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn follows_redirects_to_final_response() {
        let addr = serve_http(|req: ::http::Request<hyper::body::Incoming>| async move {
            if req.uri().path() == "/final" {
                reply(StatusCode::ACCEPTED, "done")
            } else {
                let mut moved = reply(StatusCode::FOUND, "");
                moved
                    .headers_mut()
                    .insert(::http::header::LOCATION, "/final".parse().unwrap());
                moved
            }
        })
        .await;
        let outcome = probe().run(&format!("http://{addr}/start"), 5).await;
        assert_eq!(outcome.status_code(), Some(202));
    }

    #[tokio::test]
    async fn redirect_loops_are_capped() {
        let addr = serve_http(|_req| async move {
            let mut moved = reply(StatusCode::MOVED_PERMANENTLY, "");
            moved
                .headers_mut()
                .insert(::http::header::LOCATION, "/again".parse().unwrap());
            moved
        })
        .await;
        let capped = Probe::new(ProbeOptions {
            max_redirects: 2,
            read_body: false,
        })
        .unwrap()
        .with_proxies(ProxyEnv::direct());
        match capped.run(&format!("http://{addr}/"), 5).await {
            ProbeOutcome::Failure { error } => {
                assert!(matches!(error, ProbeError::TooManyRedirects(2)), "{error}")
            }
            other => panic!("expected failure, got {other:?}"),
        }

        let not_following = Probe::new(ProbeOptions {
            max_redirects: 0,
            read_body: false,
        })
        .unwrap()
        .with_proxies(ProxyEnv::direct());
        let outcome = not_following.run(&format!("http://{addr}/"), 5).await;
        assert_eq!(outcome.status_code(), Some(301));
    }

    fn probe_with(options: ProbeOptions) -> Probe {
        Probe::new(options).unwrap().with_proxies(ProxyEnv::direct())
    }

    #[tokio::test]
    async fn read_body_moves_finish_after_drain() {
        let gap = Duration::from_millis(200);
        let addr = serve_stalled_body(gap, true).await;
        let target = format!("http://{addr}/");

        let draining = probe_with(ProbeOptions {
            max_redirects: 0,
            read_body: true,
        });
        let drained = draining.run(&target, 5).await;
        assert_eq!(drained.status_code(), Some(200));
        let content = drained.trace().unwrap().content_transfer();
        // allow for the first read landing a little after the first write
        assert!(content >= gap * 3 / 4, "{content:?}");

        let head_only = probe_with(ProbeOptions {
            max_redirects: 0,
            read_body: false,
        });
        let outcome = head_only.run(&target, 5).await;
        assert_eq!(outcome.status_code(), Some(200));
        let content = outcome.trace().unwrap().content_transfer();
        assert!(content < gap, "{content:?}");
    }

    #[tokio::test]
    async fn truncated_body_fails_only_when_read() {
        let addr = serve_stalled_body(Duration::from_millis(20), false).await;
        let target = format!("http://{addr}/");

        let draining = probe_with(ProbeOptions {
            max_redirects: 0,
            read_body: true,
        });
        match draining.run(&target, 5).await {
            ProbeOutcome::Failure { error } => assert_eq!(error.phase(), "http", "{error}"),
            other => panic!("expected failure, got {other:?}"),
        }

        let head_only = probe_with(ProbeOptions {
            max_redirects: 0,
            read_body: false,
        });
        assert_eq!(head_only.run(&target, 5).await.status_code(), Some(200));
    }

    #[tokio::test]
    async fn concurrent_probes_do_not_share_traces() {
        let addr = serve_status(StatusCode::OK).await;
        let target = format!("http://{addr}/");
        let shared = probe();
        let (a, b) = tokio::join!(shared.run(&target, 5), shared.run(&target, 5));
        let (a, b) = (*a.trace().unwrap(), *b.trace().unwrap());
        assert_ne!(a, b);
        assert_ne!(a.connect_start, b.connect_start);
    }

    #[tokio::test]
    async fn plain_target_goes_through_http_proxy() {
        // The "proxy" answers absolute-form requests itself.
        let proxy_addr = serve_http(|req: ::http::Request<hyper::body::Incoming>| async move {
            if req.uri().scheme_str() == Some("http")
                && req.uri().host() == Some("probe-target.invalid")
            {
                reply(StatusCode::OK, "via proxy")
            } else {
                reply(StatusCode::BAD_REQUEST, "not proxied")
            }
        })
        .await;
        let proxies = ProxyEnv::from_lookup(|key| {
            (key == "HTTP_PROXY").then(|| format!("http://{proxy_addr}"))
        });
        let outcome = probe()
            .with_proxies(proxies)
            .run("http://probe-target.invalid/path", 5)
            .await;
        assert_eq!(outcome.status_code(), Some(200));
        let trace = outcome.trace().unwrap();
        // proxy is dialed by IP, so no lookup happened
        assert!(!trace.dns_start.is_set());
    }

    #[tokio::test]
    async fn proxy_credentials_are_forwarded() {
        let proxy_addr = serve_http(|req: ::http::Request<hyper::body::Incoming>| async move {
            let credentials = req
                .headers()
                .get(::http::header::PROXY_AUTHORIZATION)
                .and_then(|v| v.to_str().ok());
            if credentials == Some("Basic bW9uaXRvcjpzZWNyZXQ=") {
                reply(StatusCode::OK, "via proxy")
            } else {
                reply(StatusCode::PROXY_AUTHENTICATION_REQUIRED, "who are you")
            }
        })
        .await;
        let proxies = ProxyEnv::from_lookup(|key| {
            (key == "HTTP_PROXY").then(|| format!("http://monitor:secret@{proxy_addr}"))
        });
        let outcome = probe()
            .with_proxies(proxies)
            .run("http://probe-target.invalid/", 5)
            .await;
        assert_eq!(outcome.status_code(), Some(200));
    }
}
