//! Timing records attached to step results.
//!
//! The transport does not expose per-phase connection timings, so a
//! [`TimingEstimator`] turns what it does know (elapsed time, scheme,
//! payload size) into an [`HttpStat`]. The runner never inspects the
//! record; any estimator is acceptable.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Per-phase HTTP timings in milliseconds.
///
/// The first five fields are cumulative time points (curl `-w` style);
/// the rest are phase durations derived from them.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct HttpStat {
    pub namelookup: f64,
    pub connect: f64,
    pub pretransfer: f64,
    pub starttransfer: f64,
    pub total: f64,

    pub dns_lookup: f64,
    pub tcp_connection: f64,
    pub tls_handshake: f64,
    pub server_processing: f64,
    pub content_transfer: f64,
}

impl HttpStat {
    /// Build from cumulative time points, deriving phase durations.
    pub fn from_timepoints(
        namelookup: f64,
        connect: f64,
        pretransfer: f64,
        starttransfer: f64,
        total: f64,
    ) -> Self {
        Self {
            namelookup: round2(namelookup),
            connect: round2(connect),
            pretransfer: round2(pretransfer),
            starttransfer: round2(starttransfer),
            total: round2(total),
            dns_lookup: round2(namelookup.max(0.0)),
            tcp_connection: round2((connect - namelookup).max(0.0)),
            tls_handshake: round2((pretransfer - connect).max(0.0)),
            server_processing: round2((starttransfer - pretransfer).max(0.0)),
            content_transfer: round2((total - starttransfer).max(0.0)),
        }
    }

    /// No DNS, TCP or TLS time means an idle pooled connection was reused.
    pub fn is_connection_reused(&self) -> bool {
        self.dns_lookup == 0.0 && self.tcp_connection == 0.0 && self.tls_handshake == 0.0
    }

    pub fn is_https(&self) -> bool {
        self.tls_handshake > 0.0
    }
}

impl fmt::Display for HttpStat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "DNS={:.0}ms TCP={:.0}ms TLS={:.0}ms Server={:.0}ms Transfer={:.0}ms Total={:.0}ms",
            self.dns_lookup,
            self.tcp_connection,
            self.tls_handshake,
            self.server_processing,
            self.content_transfer,
            self.total
        )
    }
}

fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}

/// What the transport knows about a finished exchange.
#[derive(Debug, Clone, Copy)]
pub struct TimingSample {
    pub elapsed_ms: f64,
    pub https: bool,
    /// The server asked to close the connection.
    pub connection_close: bool,
    pub content_length: usize,
}

/// Produces the optional timing record for a step.
pub trait TimingEstimator: Send + Sync {
    fn estimate(&self, sample: &TimingSample) -> Option<HttpStat>;
}

/// Attaches no timing record.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoTiming;

impl TimingEstimator for NoTiming {
    fn estimate(&self, _sample: &TimingSample) -> Option<HttpStat> {
        None
    }
}

/// Records only the measured total.
#[derive(Debug, Default, Clone, Copy)]
pub struct ElapsedOnly;

impl TimingEstimator for ElapsedOnly {
    fn estimate(&self, sample: &TimingSample) -> Option<HttpStat> {
        let total = sample.elapsed_ms;
        Some(HttpStat::from_timepoints(0.0, 0.0, 0.0, total, total))
    }
}

/// Splits the elapsed time into phases with fixed ratios.
///
/// Short exchanges with small payloads are assumed to run on a reused
/// connection. The ratios are a rough guess, not a measurement.
#[derive(Debug, Clone, Copy)]
pub struct RatioEstimator {
    pub reuse_below_ms: f64,
    pub reuse_below_bytes: usize,
}

impl Default for RatioEstimator {
    fn default() -> Self {
        Self {
            reuse_below_ms: 50.0,
            reuse_below_bytes: 1024,
        }
    }
}

impl RatioEstimator {
    fn looks_reused(&self, sample: &TimingSample) -> bool {
        !sample.connection_close
            && sample.elapsed_ms < self.reuse_below_ms
            && sample.content_length < self.reuse_below_bytes
    }
}

impl TimingEstimator for RatioEstimator {
    fn estimate(&self, sample: &TimingSample) -> Option<HttpStat> {
        let total = sample.elapsed_ms;
        if self.looks_reused(sample) {
            return Some(HttpStat::from_timepoints(0.0, 0.0, 0.0, total * 0.8, total));
        }
        let stat = if sample.https {
            HttpStat::from_timepoints(
                total * 0.05,
                total * 0.20,
                total * 0.55,
                total * 0.95,
                total,
            )
        } else {
            let connect = total * 0.28;
            HttpStat::from_timepoints(total * 0.08, connect, connect, total * 0.93, total)
        };
        Some(stat)
    }
}
