//! Per-port and aggregate counters, and the periodic/final report text.

use std::time::Duration;

/// Counters for a single configured port (or the single stdin source).
#[derive(Debug, Clone, Default)]
pub struct PortCounters {
    pub port: u16,
    pub seen: u64,
    pub dropped: u64,
    pub bytes_written: u64,
    pub good: u64,
    pub first_packno: Option<i64>,
    pub last_packno: Option<i64>,

    /// Snapshots as of the last progress report, for incremental deltas.
    seen_at_last: u64,
    dropped_at_last: u64,
    bytes_at_last: u64,
    good_at_last: u64,
}

impl PortCounters {
    pub fn new(port: u16) -> Self {
        Self {
            port,
            ..Default::default()
        }
    }

    pub fn record_seen(&mut self) {
        self.seen += 1;
    }

    pub fn record_dropped(&mut self) {
        self.dropped += 1;
    }

    pub fn record_written(&mut self, n: u64) {
        self.bytes_written += n;
    }

    pub fn record_packno(&mut self, packno: i64, good: bool) {
        if self.first_packno.is_none() {
            self.first_packno = Some(packno);
        }
        self.last_packno = Some(packno);
        if good {
            self.good += 1;
        }
    }

    /// `expected = last - first + 1` when beamformed checking is active.
    pub fn expected(&self) -> Option<u64> {
        match (self.first_packno, self.last_packno) {
            (Some(f), Some(l)) if l >= f => Some((l - f + 1) as u64),
            _ => None,
        }
    }

    pub fn missed(&self) -> Option<u64> {
        self.expected().map(|e| e.saturating_sub(self.seen))
    }

    /// One-line incremental report since the previous call, then updates
    /// the snapshots.
    pub fn progress_line(&mut self, checked: bool) -> String {
        let d_seen = self.seen - self.seen_at_last;
        let d_dropped = self.dropped - self.dropped_at_last;
        let d_bytes = self.bytes_written - self.bytes_at_last;
        let d_good = self.good - self.good_at_last;
        self.seen_at_last = self.seen;
        self.dropped_at_last = self.dropped;
        self.bytes_at_last = self.bytes_written;
        self.good_at_last = self.good;

        if checked {
            format!(
                "port {}: seen={} good={} dropped={} written={} ({:.3} GiB)",
                self.port,
                d_seen,
                d_good,
                d_dropped,
                d_bytes,
                gib(d_bytes)
            )
        } else {
            format!(
                "port {}: seen={} dropped={} written={} ({:.3} GiB)",
                self.port,
                d_seen,
                d_dropped,
                d_bytes,
                gib(d_bytes)
            )
        }
    }

    /// Final summary line at program exit.
    pub fn final_report(&self, checked: bool) -> String {
        if checked {
            let expected = self.expected().unwrap_or(0);
            let missed = self.missed().unwrap_or(0);
            format!(
                "port {}: expected={} missed={} ({:.2}%) seen={} good={} ({:.2}%) dropped={} written={:.3} GiB",
                self.port,
                expected,
                missed,
                pct(missed, expected),
                self.seen,
                self.good,
                pct(self.good, self.seen),
                self.dropped,
                gib(self.bytes_written),
            )
        } else {
            format!(
                "port {}: seen={} dropped={} written={:.3} GiB",
                self.port,
                self.seen,
                self.dropped,
                gib(self.bytes_written),
            )
        }
    }
}

/// Counters shared across all ports: peak fill, capacity, running mean
/// fill level.
#[derive(Debug, Default)]
pub struct AggregateStats {
    pub capacity: usize,
    pub maxfill: usize,
    pub totlen: u64,
    sum_filllevel: f64,
    n_filllevel: u64,
}

impl AggregateStats {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            ..Default::default()
        }
    }

    pub fn record_insert(&mut self, fill_after: usize, n: u64) {
        self.maxfill = self.maxfill.max(fill_after);
        self.totlen += n;
        self.sum_filllevel += fill_after as f64 / self.capacity as f64;
        self.n_filllevel += 1;
    }

    pub fn mean_fill_fraction(&self) -> f64 {
        if self.n_filllevel == 0 {
            0.0
        } else {
            self.sum_filllevel / self.n_filllevel as f64
        }
    }

    pub fn peak_fullness_pct(&self) -> f64 {
        pct(self.maxfill as u64, self.capacity as u64)
    }

    pub fn final_report(&self) -> String {
        format!(
            "total written={:.3} GiB peak fill={}/{} ({:.2}%) mean fill={:.2}%",
            gib(self.totlen),
            self.maxfill,
            self.capacity,
            self.peak_fullness_pct(),
            self.mean_fill_fraction() * 100.0,
        )
    }
}

fn gib(bytes: u64) -> f64 {
    bytes as f64 / (1024.0 * 1024.0 * 1024.0)
}

fn pct(part: u64, whole: u64) -> f64 {
    if whole == 0 {
        0.0
    } else {
        100.0 * part as f64 / whole as f64
    }
}

/// Threshold at which Ingress raises a progress event: once cumulative
/// bytes since the last report exceed this, print a block summary.
pub const PROGRESS_BYTES: u64 = 1 << 30;

/// Default idle timeout, matched against `--timeout` validation.
pub const MIN_TIMEOUT: Duration = Duration::from_millis(1);
