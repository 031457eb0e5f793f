//! Checkpoint timestamps for a single probe and the phase durations derived
//! from them.

use std::sync::Arc;
use std::time::Duration;

use crate::timestamp::{Clock, Timestamp};

/// A named point in the lifecycle of one fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Checkpoint {
    Start,
    DnsStart,
    DnsDone,
    ConnectStart,
    ConnectDone,
    TlsStart,
    TlsDone,
    GotConnection,
    FirstResponseByte,
    Finish,
}

/// Timestamps captured while probing one target. Unreached checkpoints stay
/// at [`Timestamp::UNSET`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TimingTrace {
    pub start: Timestamp,
    pub dns_start: Timestamp,
    pub dns_done: Timestamp,
    pub connect_start: Timestamp,
    pub connect_done: Timestamp,
    pub tls_start: Timestamp,
    pub tls_done: Timestamp,
    pub got_connection: Timestamp,
    pub first_response_byte: Timestamp,
    pub finish: Timestamp,
}

impl TimingTrace {
    pub fn record(&mut self, checkpoint: Checkpoint, at: Timestamp) {
        *self.slot(checkpoint) = at;
    }

    pub fn get(&self, checkpoint: Checkpoint) -> Timestamp {
        match checkpoint {
            Checkpoint::Start => self.start,
            Checkpoint::DnsStart => self.dns_start,
            Checkpoint::DnsDone => self.dns_done,
            Checkpoint::ConnectStart => self.connect_start,
            Checkpoint::ConnectDone => self.connect_done,
            Checkpoint::TlsStart => self.tls_start,
            Checkpoint::TlsDone => self.tls_done,
            Checkpoint::GotConnection => self.got_connection,
            Checkpoint::FirstResponseByte => self.first_response_byte,
            Checkpoint::Finish => self.finish,
        }
    }

    fn slot(&mut self, checkpoint: Checkpoint) -> &mut Timestamp {
        match checkpoint {
            Checkpoint::Start => &mut self.start,
            Checkpoint::DnsStart => &mut self.dns_start,
            Checkpoint::DnsDone => &mut self.dns_done,
            Checkpoint::ConnectStart => &mut self.connect_start,
            Checkpoint::ConnectDone => &mut self.connect_done,
            Checkpoint::TlsStart => &mut self.tls_start,
            Checkpoint::TlsDone => &mut self.tls_done,
            Checkpoint::GotConnection => &mut self.got_connection,
            Checkpoint::FirstResponseByte => &mut self.first_response_byte,
            Checkpoint::Finish => &mut self.finish,
        }
    }

    /// Clears everything but `start`, so a redirect hop is measured on its own.
    pub fn reset_hop(&mut self) {
        *self = TimingTrace {
            start: self.start,
            ..TimingTrace::default()
        };
    }

    pub fn dns_lookup(&self) -> Duration {
        self.dns_start.until(self.dns_done)
    }

    pub fn tcp_connect(&self) -> Duration {
        self.connect_start.until(self.connect_done)
    }

    pub fn tls_handshake(&self) -> Duration {
        self.tls_start.until(self.tls_done)
    }

    pub fn server_processing(&self) -> Duration {
        self.got_connection.until(self.first_response_byte)
    }

    pub fn content_transfer(&self) -> Duration {
        self.first_response_byte.until(self.finish)
    }

    pub fn time_to_first_byte(&self) -> Duration {
        self.start.until(self.first_response_byte)
    }
}

/// The six durations reported for every successful probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    DnsLookup,
    TcpConnect,
    TlsHandshake,
    ServerProcessing,
    ContentTransfer,
    TimeToFirstByte,
}

impl Phase {
    pub const ALL: [Phase; 6] = [
        Phase::DnsLookup,
        Phase::TcpConnect,
        Phase::TlsHandshake,
        Phase::ServerProcessing,
        Phase::ContentTransfer,
        Phase::TimeToFirstByte,
    ];

    pub fn duration(self, trace: &TimingTrace) -> Duration {
        match self {
            Phase::DnsLookup => trace.dns_lookup(),
            Phase::TcpConnect => trace.tcp_connect(),
            Phase::TlsHandshake => trace.tls_handshake(),
            Phase::ServerProcessing => trace.server_processing(),
            Phase::ContentTransfer => trace.content_transfer(),
            Phase::TimeToFirstByte => trace.time_to_first_byte(),
        }
    }
}

/// Lifecycle hooks for one probe: every hook stamps one checkpoint with the
/// injected clock and does nothing else.
#[derive(Debug, Clone)]
pub struct TraceRecorder {
    clock: Arc<dyn Clock>,
    trace: TimingTrace,
}

impl TraceRecorder {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            trace: TimingTrace::default(),
        }
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    pub fn mark(&mut self, checkpoint: Checkpoint) {
        let now = self.clock.now();
        self.trace.record(checkpoint, now);
    }

    /// Stores a timestamp observed elsewhere (e.g. inside the transport).
    pub fn record_at(&mut self, checkpoint: Checkpoint, at: Timestamp) {
        self.trace.record(checkpoint, at);
    }

    pub fn reset_hop(&mut self) {
        self.trace.reset_hop();
    }

    pub fn trace(&self) -> &TimingTrace {
        &self.trace
    }

    pub fn into_trace(self) -> TimingTrace {
        self.trace
    }
}
