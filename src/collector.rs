//! Prometheus collector that runs one live probe each time it is collected.

use std::fmt;
use std::time::Duration;

use prometheus::core::{Collector, Desc};
use prometheus::proto::MetricFamily;
use prometheus::{GaugeVec, Opts};
use tokio::runtime::Handle;
use tokio::sync::watch;
use tracing::{debug, error, warn};

use crate::prober::{Probe, ProbeOutcome};
use crate::trace::Phase;

pub const STATUS_CODE_LABEL: &str = "status_code";

/// Hundreds-digit bucket of a response status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StatusClass {
    Informational,
    Success,
    Redirection,
    ClientError,
    ServerError,
    Unknown,
}

impl StatusClass {
    /// `None` stands for "no response was obtained".
    pub fn from_code(code: Option<u16>) -> Self {
        match code {
            Some(100..=199) => StatusClass::Informational,
            Some(200..=299) => StatusClass::Success,
            Some(300..=399) => StatusClass::Redirection,
            Some(400..=499) => StatusClass::ClientError,
            Some(500..=599) => StatusClass::ServerError,
            _ => StatusClass::Unknown,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            StatusClass::Informational => "1xx",
            StatusClass::Success => "2xx",
            StatusClass::Redirection => "3xx",
            StatusClass::ClientError => "4xx",
            StatusClass::ServerError => "5xx",
            StatusClass::Unknown => "unknown",
        }
    }
}

impl fmt::Display for StatusClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

fn metric_opts(phase: Phase) -> Opts {
    let (name, help) = match phase {
        Phase::DnsLookup => ("dns_lookup_time", "A gauge of the DNS lookup duration(ms)"),
        Phase::TcpConnect => ("tcp_handshake_time", "A gauge of the TCP handshake duration(ms)"),
        Phase::TlsHandshake => ("tls_handshake_time", "A gauge of the TLS handshake duration(ms)"),
        Phase::ServerProcessing => (
            "server_processing_time",
            "A gauge of the server processing duration(ms)",
        ),
        Phase::ContentTransfer => (
            "content_transfer_time",
            "A gauge of the content transfer duration(ms)",
        ),
        Phase::TimeToFirstByte => ("ttfb", "A gauge of the time to first byte(ms)"),
    };
    Opts::new(name, help)
}

/// Nanoseconds over nanoseconds-per-millisecond, in one division.
fn to_millis(d: Duration) -> f64 {
    d.as_nanos() as f64 / 1_000_000.0
}

/// Built per scrape for one `(target, timeout)` pair and collected once.
/// Nothing is cached: collecting always performs a fresh probe.
pub struct SnapshotCollector {
    target: String,
    timeout_secs: i64,
    probe: Probe,
    runtime: Handle,
    cancel: Option<watch::Receiver<()>>,
    gauges: Vec<(Phase, GaugeVec)>,
}

impl SnapshotCollector {
    /// `runtime` drives the probe from the synchronous `collect` call, which
    /// therefore must not run on a runtime worker thread.
    pub fn new(
        target: impl Into<String>,
        timeout_secs: i64,
        probe: Probe,
        runtime: Handle,
    ) -> prometheus::Result<Self> {
        let gauges = Phase::ALL
            .into_iter()
            .map(|phase| Ok((phase, GaugeVec::new(metric_opts(phase), &[STATUS_CODE_LABEL])?)))
            .collect::<prometheus::Result<Vec<_>>>()?;
        Ok(Self {
            target: target.into(),
            timeout_secs,
            probe,
            runtime,
            cancel: None,
            gauges,
        })
    }

    /// Abort the probe once every sender of `cancel` is gone.
    pub fn with_cancellation(mut self, cancel: watch::Receiver<()>) -> Self {
        self.cancel = Some(cancel);
        self
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    fn probe_once(&self) -> ProbeOutcome {
        let cancel = self.cancel.clone();
        let cancelled = async move {
            match cancel {
                Some(mut rx) => {
                    // Only resolves once the sender is dropped.
                    while rx.changed().await.is_ok() {}
                }
                None => std::future::pending::<()>().await,
            }
        };
        self.runtime
            .block_on(self.probe.run_until(&self.target, self.timeout_secs, cancelled))
    }
}

impl Collector for SnapshotCollector {
    fn desc(&self) -> Vec<&Desc> {
        self.gauges.iter().flat_map(|(_, gauge)| gauge.desc()).collect()
    }

    fn collect(&self) -> Vec<MetricFamily> {
        let (status_code, trace) = match self.probe_once() {
            ProbeOutcome::Success {
                status_code, trace, ..
            } => (status_code, trace),
            ProbeOutcome::Failure { error } => {
                warn!(
                    url = %self.target,
                    phase = error.phase(),
                    %error,
                    "URL visit failed"
                );
                return Vec::new();
            }
        };

        let class = StatusClass::from_code(Some(status_code));
        let mut families = Vec::with_capacity(self.gauges.len());
        for (phase, gauge) in &self.gauges {
            // drop the label set of any earlier collect
            gauge.reset();
            match gauge.get_metric_with_label_values(&[class.as_str()]) {
                Ok(sample) => {
                    sample.set(to_millis(phase.duration(&trace)));
                    families.extend(gauge.collect());
                }
                Err(e) => {
                    error!(url = %self.target, ?phase, error = %e, "metric generation failed");
                }
            }
        }
        debug!(url = %self.target, status_code, samples = families.len(), "probe collected");
        families
    }
}
