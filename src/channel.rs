//! The shared state and synchronization between Ingress and Egress.
//!
//! Two mutexes, matching the concurrency model: `region` guards the VRB and
//! every counter fed by it, `stop` guards the stop level alone. Two
//! condition variables are paired with `region`: `data_available` (Ingress
//! and Control wake Egress) and `space_available` (Egress wakes a
//! backpressured stdin Ingress).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Condvar, Mutex};
use std::time::Duration;

use crate::stats::{AggregateStats, PortCounters};
use crate::vrb::Vrb;

/// Stop level: `0` running, `1` stop current file, `2` stop program, `-1`
/// split current file and continue.
pub const RUNNING: i32 = 0;
pub const STOP_FILE: i32 = 1;
pub const STOP_PROGRAM: i32 = 2;
pub const SPLIT: i32 = -1;

struct Region {
    vrb: Vrb,
    ports: Vec<PortCounters>,
    agg: AggregateStats,
}

pub struct Channel {
    region: Mutex<Region>,
    stop: Mutex<i32>,
    data_available: Condvar,
    space_available: Condvar,
    stop_changed: Condvar,
    sink_open: AtomicBool,
}

impl Channel {
    pub fn new(capacity: usize, port_numbers: &[u16]) -> std::io::Result<Self> {
        let vrb = Vrb::new(capacity)?;
        let agg = AggregateStats::new(vrb.capacity());
        let ports = port_numbers.iter().map(|&p| PortCounters::new(p)).collect();
        Ok(Self {
            region: Mutex::new(Region { vrb, ports, agg }),
            stop: Mutex::new(RUNNING),
            data_available: Condvar::new(),
            space_available: Condvar::new(),
            stop_changed: Condvar::new(),
            sink_open: AtomicBool::new(false),
        })
    }

    /// Whether Egress currently has a sink open. Read by Control and
    /// Ingress to decide whether an idle timeout or SIGHUP ends the
    /// current file or is a no-op.
    pub fn sink_open(&self) -> bool {
        self.sink_open.load(Ordering::SeqCst)
    }

    pub fn set_sink_open(&self, open: bool) {
        self.sink_open.store(open, Ordering::SeqCst);
    }

    pub fn capacity(&self) -> usize {
        self.region.lock().unwrap().vrb.capacity()
    }

    pub fn stop_level(&self) -> i32 {
        *self.stop.lock().unwrap()
    }

    /// Unconditionally sets the stop level and wakes a blocked Egress.
    pub fn set_stop_level(&self, level: i32) {
        *self.stop.lock().unwrap() = level;
        self.data_available.notify_all();
        self.stop_changed.notify_all();
    }

    /// Sets the stop level only if it is currently `RUNNING`; used by
    /// SIGHUP and the idle timeout, which must not downgrade a stronger
    /// stop already in flight. Returns whether it applied.
    pub fn set_stop_if_running(&self, level: i32) -> bool {
        let mut guard = self.stop.lock().unwrap();
        if *guard == RUNNING {
            *guard = level;
            drop(guard);
            self.data_available.notify_all();
            self.stop_changed.notify_all();
            true
        } else {
            false
        }
    }

    /// Resets the stop level to `RUNNING` iff it still equals `snapshot`
    /// and is not `STOP_PROGRAM` — preserving a stronger stop that arrived
    /// while Egress was acting on `snapshot`.
    pub fn reset_stop_if_unchanged(&self, snapshot: i32) {
        let mut guard = self.stop.lock().unwrap();
        if *guard == snapshot && *guard != STOP_PROGRAM {
            *guard = RUNNING;
        }
    }

    /// Records one ingested datagram for `port_idx` without blocking. On a
    /// full buffer, counts a drop and returns `false`.
    pub fn record_packet(&self, port_idx: usize, payload: &[u8]) -> bool {
        let mut region = self.region.lock().unwrap();
        region.ports[port_idx].record_seen();
        match region.vrb.reserve(payload.len()) {
            None => {
                region.ports[port_idx].record_dropped();
                false
            }
            Some(ptr) => {
                unsafe {
                    std::ptr::copy_nonoverlapping(payload.as_ptr(), ptr, payload.len());
                    region.vrb.commit(payload.len());
                }
                let fill = region.vrb.fill();
                region.agg.record_insert(fill, payload.len() as u64);
                region.ports[port_idx].record_written(payload.len() as u64);
                drop(region);
                self.data_available.notify_all();
                true
            }
        }
    }

    /// Records one datagram for `port_idx`, blocking on space if the
    /// buffer is full — the stdin backpressure path, which never drops.
    pub fn record_packet_blocking(&self, port_idx: usize, payload: &[u8]) {
        let mut region = self.region.lock().unwrap();
        region.ports[port_idx].record_seen();
        loop {
            if let Some(ptr) = region.vrb.reserve(payload.len()) {
                unsafe {
                    std::ptr::copy_nonoverlapping(payload.as_ptr(), ptr, payload.len());
                    region.vrb.commit(payload.len());
                }
                let fill = region.vrb.fill();
                region.agg.record_insert(fill, payload.len() as u64);
                region.ports[port_idx].record_written(payload.len() as u64);
                drop(region);
                self.data_available.notify_all();
                return;
            }
            region = self.space_available.wait(region).unwrap();
        }
    }

    /// Records the beamformed packet number and validity for `port_idx`.
    pub fn record_packno(&self, port_idx: usize, packno: i64, good: bool) {
        self.region.lock().unwrap().ports[port_idx].record_packno(packno, good);
    }

    /// Blocks until either the buffer holds data or the stop level is no
    /// longer `RUNNING`. Returns the observed fill and stop snapshot.
    pub fn wait_for_data(&self) -> (usize, i32) {
        let mut guard = self.region.lock().unwrap();
        loop {
            let stop = *self.stop.lock().unwrap();
            let fill = guard.vrb.fill();
            if fill > 0 || stop != RUNNING {
                return (fill, stop);
            }
            guard = self.data_available.wait(guard).unwrap();
        }
    }

    /// Returns the current fill without waiting.
    pub fn fill(&self) -> usize {
        self.region.lock().unwrap().vrb.fill()
    }

    /// Looks up the head region under the region mutex and returns a raw
    /// pointer/length pair. The caller must finish using the returned
    /// region — typically a single synchronous write — before any further
    /// `reserve` could overlap it; that never happens here because Egress
    /// is the sole releaser and Ingress only ever writes into unreserved
    /// tail bytes.
    pub fn peek(&self) -> Option<(*const u8, usize)> {
        self.region.lock().unwrap().vrb.peek()
    }

    /// Advances the head by `n` after a write of that many bytes has
    /// completed, and wakes a backpressured stdin Ingress.
    pub fn release(&self, n: usize) {
        let mut region = self.region.lock().unwrap();
        unsafe { region.vrb.release(n) };
        drop(region);
        self.space_available.notify_all();
    }

    pub fn with_port<R>(&self, port_idx: usize, f: impl FnOnce(&mut PortCounters) -> R) -> R {
        f(&mut self.region.lock().unwrap().ports[port_idx])
    }

    pub fn port_count(&self) -> usize {
        self.region.lock().unwrap().ports.len()
    }

    /// Incremental per-port reports since the last call (or the last
    /// report of any kind), for a split boundary where `--Maxfilesize`'s
    /// sign requests per-file rather than combined stats.
    pub fn file_reports(&self, checked: bool) -> Vec<String> {
        let mut region = self.region.lock().unwrap();
        region.ports.iter_mut().map(|p| p.progress_line(checked)).collect()
    }

    pub fn final_reports(&self, checked: bool) -> Vec<String> {
        let region = self.region.lock().unwrap();
        region
            .ports
            .iter()
            .map(|p| p.final_report(checked))
            .collect()
    }

    pub fn aggregate_report(&self) -> String {
        self.region.lock().unwrap().agg.final_report()
    }

    /// Sleeps up to `timeout`, waking early if the stop level changes from
    /// `RUNNING` — used by the Control thread's scheduled-deadline waits.
    pub fn sleep_or_stop(&self, timeout: Duration) {
        let guard = self.stop.lock().unwrap();
        let _ = self
            .stop_changed
            .wait_timeout_while(guard, timeout, |level| *level == RUNNING);
    }
}
