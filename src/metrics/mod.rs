//! Per-machine throughput metrics: counters fed by every successful
//! read/write, periodic background snapshot computation, and snapshot
//! selection (instantaneous / averaged / full-run) at query time.
//!
//! Grounded on `original_source/src/machine-metrics.c`: a global list of
//! tracked metric directions, two independent background timers (updater,
//! printer) that merely raise a flag, and the actual snapshot math —
//! `elapsed`, `data_rate`, `req_rate`, `avg_req_size`, `avg_rec_size`,
//! `utilization` — computed lazily on the next data-path call that observes
//! its flag raised. `Weak` references replace the C source's raw pointer
//! list so a dropped machine's metrics simply stop being visited rather than
//! needing explicit de-registration.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, OnceLock, Weak};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use parking_lot::Mutex;

const MAX_HISTORY: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Snapshot {
    pub elapsed_secs: f64,
    pub data_rate: f64,
    pub req_rate: f64,
    pub avg_req_size: f64,
    pub avg_rec_size: f64,
    pub utilization: f64,
}

impl Snapshot {
    const ZERO: Snapshot = Snapshot {
        elapsed_secs: 0.0,
        data_rate: 0.0,
        req_rate: 0.0,
        avg_req_size: 0.0,
        avg_rec_size: 0.0,
        utilization: 0.0,
    };
}

/// Which window a [`MetricsDirection::snapshot`] call should report over.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SnapshotKind {
    /// The most recently computed window.
    Inst,
    /// The mean of the last `n` windows.
    Avg(usize),
    /// Computed on the fly from the totals accumulated since the direction
    /// was created.
    Full,
}

#[derive(Default)]
struct Counters {
    req_count: u64,
    req_bytes: u64,
    rec_count: u64,
    rec_bytes: u64,
}

struct Totals {
    req_count: AtomicU64,
    req_bytes: AtomicU64,
    rec_count: AtomicU64,
    rec_bytes: AtomicU64,
}

impl Totals {
    fn new() -> Self {
        Totals {
            req_count: AtomicU64::new(0),
            req_bytes: AtomicU64::new(0),
            rec_count: AtomicU64::new(0),
            rec_bytes: AtomicU64::new(0),
        }
    }
}

/// One direction's (input or output) counters, clock and snapshot history.
pub struct MetricsDirection {
    start: Instant,
    window: Mutex<Counters>,
    prev: Mutex<Instant>,
    cur: Mutex<Instant>,
    totals: Totals,
    update_signal: AtomicBool,
    print_signal: AtomicBool,
    history: Mutex<Vec<Snapshot>>,
}

fn registry() -> &'static Mutex<Vec<Weak<MetricsDirection>>> {
    static REGISTRY: OnceLock<Mutex<Vec<Weak<MetricsDirection>>>> = OnceLock::new();
    REGISTRY.get_or_init(|| Mutex::new(Vec::new()))
}

impl MetricsDirection {
    fn new() -> Arc<Self> {
        let now = Instant::now();
        let dir = Arc::new(MetricsDirection {
            start: now,
            window: Mutex::new(Counters::default()),
            prev: Mutex::new(now),
            cur: Mutex::new(now),
            totals: Totals::new(),
            update_signal: AtomicBool::new(false),
            print_signal: AtomicBool::new(false),
            history: Mutex::new(Vec::new()),
        });
        registry().lock().push(Arc::downgrade(&dir));
        dir
    }

    /// Called on every successful read/write: `req_bytes` is how much was
    /// requested, `rec_bytes` how much was actually transferred.
    pub fn record(&self, req_bytes: u64, rec_bytes: u64) {
        {
            let mut w = self.window.lock();
            w.req_count += 1;
            w.req_bytes += req_bytes;
            if rec_bytes > 0 {
                w.rec_count += 1;
                w.rec_bytes += rec_bytes;
            }
        }
        let now = Instant::now();
        {
            let mut prev = self.prev.lock();
            let mut cur = self.cur.lock();
            *prev = *cur;
            *cur = now;
        }

        if self.update_signal.swap(false, Ordering::AcqRel) {
            self.compute_and_roll();
        }
        if self.print_signal.swap(false, Ordering::AcqRel) {
            tracing::info!(snapshot = ?self.snapshot(SnapshotKind::Inst), "metrics");
        }
    }

    fn compute_and_roll(&self) {
        let elapsed = {
            let prev = *self.prev.lock();
            let cur = *self.cur.lock();
            cur.duration_since(prev).as_secs_f64()
        };
        let mut window = self.window.lock();
        let snap = Snapshot {
            elapsed_secs: elapsed,
            data_rate: safe_div(window.rec_bytes as f64, elapsed),
            req_rate: safe_div(window.req_count as f64, elapsed),
            avg_req_size: safe_div(window.req_bytes as f64, window.req_count as f64),
            avg_rec_size: safe_div(window.rec_bytes as f64, window.rec_count as f64),
            utilization: safe_div(window.rec_count as f64, window.req_count as f64),
        };

        self.totals.req_count.fetch_add(window.req_count, Ordering::Relaxed);
        self.totals.req_bytes.fetch_add(window.req_bytes, Ordering::Relaxed);
        self.totals.rec_count.fetch_add(window.rec_count, Ordering::Relaxed);
        self.totals.rec_bytes.fetch_add(window.rec_bytes, Ordering::Relaxed);
        *window = Counters::default();
        drop(window);

        let mut history = self.history.lock();
        history.push(snap);
        if history.len() > MAX_HISTORY {
            let overflow = history.len() - MAX_HISTORY;
            history.drain(0..overflow);
        }
    }

    pub fn snapshot(&self, kind: SnapshotKind) -> Snapshot {
        match kind {
            SnapshotKind::Inst => self.history.lock().last().copied().unwrap_or(Snapshot::ZERO),
            SnapshotKind::Avg(n) => {
                let history = self.history.lock();
                let take = n.min(history.len());
                if take == 0 {
                    return Snapshot::ZERO;
                }
                let tail = &history[history.len() - take..];
                let sum = tail.iter().fold(Snapshot::ZERO, |acc, s| Snapshot {
                    elapsed_secs: acc.elapsed_secs + s.elapsed_secs,
                    data_rate: acc.data_rate + s.data_rate,
                    req_rate: acc.req_rate + s.req_rate,
                    avg_req_size: acc.avg_req_size + s.avg_req_size,
                    avg_rec_size: acc.avg_rec_size + s.avg_rec_size,
                    utilization: acc.utilization + s.utilization,
                });
                let n = take as f64;
                Snapshot {
                    elapsed_secs: sum.elapsed_secs / n,
                    data_rate: sum.data_rate / n,
                    req_rate: sum.req_rate / n,
                    avg_req_size: sum.avg_req_size / n,
                    avg_rec_size: sum.avg_rec_size / n,
                    utilization: sum.utilization / n,
                }
            }
            SnapshotKind::Full => {
                let elapsed = self.start.elapsed().as_secs_f64();
                let req_count = self.totals.req_count.load(Ordering::Relaxed);
                let req_bytes = self.totals.req_bytes.load(Ordering::Relaxed);
                let rec_count = self.totals.rec_count.load(Ordering::Relaxed);
                let rec_bytes = self.totals.rec_bytes.load(Ordering::Relaxed);
                Snapshot {
                    elapsed_secs: elapsed,
                    data_rate: safe_div(rec_bytes as f64, elapsed),
                    req_rate: safe_div(req_count as f64, elapsed),
                    avg_req_size: safe_div(req_bytes as f64, req_count as f64),
                    avg_rec_size: safe_div(rec_bytes as f64, rec_count as f64),
                    utilization: safe_div(rec_count as f64, req_count as f64),
                }
            }
        }
    }

    pub fn format(&self, kind: SnapshotKind) -> String {
        let s = self.snapshot(kind);
        format!(
            "elapsed={:.3}s rate={:.1}B/s req_rate={:.1}/s avg_req={:.1}B avg_rec={:.1}B util={:.2}",
            s.elapsed_secs, s.data_rate, s.req_rate, s.avg_req_size, s.avg_rec_size, s.utilization
        )
    }

    fn raise_update_signal(&self) {
        self.update_signal.store(true, Ordering::Release);
    }

    fn raise_print_signal(&self) {
        self.print_signal.store(true, Ordering::Release);
    }
}

fn safe_div(n: f64, d: f64) -> f64 {
    if d == 0.0 {
        0.0
    } else {
        n / d
    }
}

/// The pair of counters a [`crate::machine::MachineDesc`] optionally carries.
pub struct MetricsPair {
    pub input: Arc<MetricsDirection>,
    pub output: Arc<MetricsDirection>,
}

impl MetricsPair {
    pub fn new() -> Self {
        MetricsPair {
            input: MetricsDirection::new(),
            output: MetricsDirection::new(),
        }
    }
}

impl Default for MetricsPair {
    fn default() -> Self {
        MetricsPair::new()
    }
}

/// Starts the background "updater" thread: every `period_ms`, every live
/// metrics direction has its update flag raised, so the *next* read/write on
/// that machine computes a fresh snapshot. Runs for the life of the process,
/// matching the original engine's timer threads.
pub fn start_metrics_updater(period_ms: u64) -> JoinHandle<()> {
    thread::spawn(move || loop {
        thread::sleep(Duration::from_millis(period_ms));
        for weak in registry().lock().iter() {
            if let Some(dir) = weak.upgrade() {
                dir.raise_update_signal();
            }
        }
    })
}

/// Starts the background "printer" thread: every `period_ms`, every live
/// metrics direction has its print flag raised, so the next data-path call
/// logs an `INST` snapshot via `tracing`.
pub fn start_metrics_printer(period_ms: u64) -> JoinHandle<()> {
    thread::spawn(move || loop {
        thread::sleep(Duration::from_millis(period_ms));
        for weak in registry().lock().iter() {
            if let Some(dir) = weak.upgrade() {
                dir.raise_print_signal();
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_accumulates_full_snapshot() {
        let dir = MetricsDirection::new();
        dir.record(100, 100);
        dir.record(100, 50);
        let full = dir.snapshot(SnapshotKind::Full);
        assert!(full.req_rate >= 0.0);

        dir.raise_update_signal();
        dir.record(10, 10);
        let inst = dir.snapshot(SnapshotKind::Inst);
        // The window rolled on this third `record` call, so its average
        // covers all three requests made since the last roll, not just the
        // triggering one: (100 + 100 + 10) / 3.
        assert_eq!(inst.avg_req_size, 70.0);
    }

    #[test]
    fn avg_of_zero_history_is_zero() {
        let dir = MetricsDirection::new();
        let avg = dir.snapshot(SnapshotKind::Avg(5));
        assert_eq!(avg, Snapshot::ZERO);
    }
}
