//! `/metrics?target=<url>&timeout=<secs>`: one fresh probe per scrape,
//! rendered from a registry that lives only as long as the request.

use std::convert::Infallible;
use std::net::SocketAddr;

use anyhow::Context;
use prometheus::{Encoder, Registry, TextEncoder};
use serde::Deserialize;
use tokio::runtime::Handle;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};
use warp::Filter;
use warp::http::StatusCode;
use warp::http::header::CONTENT_TYPE;

use crate::collector::SnapshotCollector;
use crate::prober::{DEFAULT_TIMEOUT_SECS, Probe};

const MISSING_TARGET: &str = "Target param is missing";

#[derive(Debug, Default, Deserialize)]
pub struct ScrapeParams {
    pub target: Option<String>,
    pub timeout: Option<String>,
}

/// A rendered scrape, ready to become an HTTP response.
#[derive(Debug)]
pub struct Scrape {
    pub status: StatusCode,
    pub content_type: String,
    pub body: Vec<u8>,
}

impl Scrape {
    fn plain(status: StatusCode, body: &str) -> Self {
        Self {
            status,
            content_type: "text/plain; charset=utf-8".to_string(),
            body: body.as_bytes().to_vec(),
        }
    }
}

fn parse_timeout(raw: Option<&str>) -> i64 {
    match raw {
        None => DEFAULT_TIMEOUT_SECS as i64,
        Some(raw) => raw.trim().parse().unwrap_or_else(|_| {
            warn!(timeout = raw, "unparseable timeout, using default");
            DEFAULT_TIMEOUT_SECS as i64
        }),
    }
}

/// Registers `collector` in a throwaway registry and encodes what it yields.
/// Blocks while the probe runs.
pub fn render_snapshot(collector: SnapshotCollector) -> anyhow::Result<Vec<u8>> {
    let registry = Registry::new();
    registry
        .register(Box::new(collector))
        .context("registering snapshot collector")?;

    let families = registry.gather();
    let mut buf = Vec::new();
    TextEncoder::new()
        .encode(&families, &mut buf)
        .context("encoding metric families")?;
    Ok(buf)
}

pub async fn scrape(params: ScrapeParams, probe: Probe) -> Scrape {
    let target = match params.target {
        Some(target) if !target.is_empty() => target,
        _ => return Scrape::plain(StatusCode::BAD_REQUEST, MISSING_TARGET),
    };
    let timeout_secs = parse_timeout(params.timeout.as_deref());

    let collector = match SnapshotCollector::new(target.clone(), timeout_secs, probe, Handle::current()) {
        Ok(collector) => collector,
        Err(e) => {
            error!(url = %target, error = %e, "building collector failed");
            return Scrape::plain(StatusCode::INTERNAL_SERVER_ERROR, &e.to_string());
        }
    };

    // Dropping this future (client gone) drops `_alive` and aborts the probe.
    let (_alive, cancel) = watch::channel(());
    let collector = collector.with_cancellation(cancel);
    let rendered = tokio::task::spawn_blocking(move || render_snapshot(collector)).await;

    match rendered {
        Ok(Ok(body)) => {
            debug!(url = %target, bytes = body.len(), "scrape rendered");
            Scrape {
                status: StatusCode::OK,
                content_type: TextEncoder::new().format_type().to_string(),
                body,
            }
        }
        Ok(Err(e)) => {
            error!(url = %target, error = %e, "rendering metrics failed");
            Scrape::plain(StatusCode::INTERNAL_SERVER_ERROR, &format!("{e:#}"))
        }
        Err(e) => {
            error!(url = %target, error = %e, "scrape task failed");
            Scrape::plain(StatusCode::INTERNAL_SERVER_ERROR, &e.to_string())
        }
    }
}

async fn handle_scrape(params: ScrapeParams, probe: Probe) -> Result<impl warp::Reply, Infallible> {
    let scrape = scrape(params, probe).await;
    Ok(warp::reply::with_header(
        warp::reply::with_status(scrape.body, scrape.status),
        CONTENT_TYPE,
        scrape.content_type,
    ))
}

pub fn routes(
    probe: Probe,
) -> impl Filter<Extract = (impl warp::Reply,), Error = warp::Rejection> + Clone {
    warp::path!("metrics")
        .and(warp::get())
        .and(warp::query::<ScrapeParams>())
        .and(warp::any().map(move || probe.clone()))
        .and_then(handle_scrape)
}

pub async fn serve_metrics(addr: SocketAddr, probe: Probe) {
    info!(%addr, "serving probe metrics");
    warp::serve(routes(probe)).run(addr).await;
}
