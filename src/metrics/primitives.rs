//! Metric primitives: counter, gauge, histogram, timer.
//!
//! All primitives take `&self` and synchronise internally, so a registry can
//! hand out shared references freely.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::future::Future;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::clock::SharedClock;

/// Default histogram bucket upper bounds, in milliseconds.
pub const DEFAULT_BUCKETS: [f64; 9] = [10.0, 50.0, 100.0, 250.0, 500.0, 1000.0, 2500.0, 5000.0, 10000.0];

/// Timer buckets: the defaults extended for slow archive submissions.
pub const TIMER_BUCKETS: [f64; 11] = [
    10.0, 50.0, 100.0, 250.0, 500.0, 1000.0, 2500.0, 5000.0, 10000.0, 30000.0, 60000.0,
];

pub const DEFAULT_MAX_SAMPLES: usize = 10_000;

const COUNTER_HISTORY: usize = 1000;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Monotonic counter with a short timestamped history for rate queries.
#[derive(Debug)]
pub struct Counter {
    name: String,
    value: AtomicU64,
    history: Mutex<VecDeque<(u64, u64)>>,
    clock: SharedClock,
}

impl Counter {
    pub fn new(name: impl Into<String>, clock: SharedClock) -> Self {
        Self {
            name: name.into(),
            value: AtomicU64::new(0),
            history: Mutex::new(VecDeque::new()),
            clock,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn inc(&self) {
        self.inc_by(1);
    }

    pub fn inc_by(&self, delta: u64) {
        let mut history = lock(&self.history);
        let value = self.value.fetch_add(delta, Ordering::Relaxed) + delta;
        history.push_back((self.clock.now_millis(), value));
        if history.len() > COUNTER_HISTORY {
            history.pop_front();
        }
    }

    pub fn get(&self) -> u64 {
        self.value.load(Ordering::Relaxed)
    }

    /// Increments per second over the last `window_ms`. Zero with fewer than two points.
    pub fn rate(&self, window_ms: u64) -> f64 {
        let since = self.clock.now_millis().saturating_sub(window_ms);
        let history = lock(&self.history);
        let mut in_window = history.iter().filter(|(at, _)| *at >= since);
        let Some(&(first_at, first_value)) = in_window.next() else {
            return 0.0;
        };
        let Some(&(last_at, last_value)) = in_window.last() else {
            return 0.0;
        };
        let seconds = (last_at - first_at) as f64 / 1000.0;
        if seconds > 0.0 {
            (last_value - first_value) as f64 / seconds
        } else {
            0.0
        }
    }

    pub fn reset(&self) {
        let mut history = lock(&self.history);
        self.value.store(0, Ordering::Relaxed);
        history.clear();
    }
}

/// Value that can move in both directions.
#[derive(Debug, Default)]
pub struct Gauge {
    value: AtomicI64,
}

impl Gauge {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, value: i64) {
        self.value.store(value, Ordering::Relaxed);
    }

    /// Returns the new value.
    pub fn inc(&self) -> i64 {
        self.value.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Returns the new value.
    pub fn dec(&self) -> i64 {
        self.value.fetch_sub(1, Ordering::Relaxed) - 1
    }

    pub fn get(&self) -> i64 {
        self.value.load(Ordering::Relaxed)
    }
}

#[derive(Debug)]
struct HistogramInner {
    samples: VecDeque<f64>,
    bucket_counts: Vec<u64>,
    overflow: u64,
    sum: f64,
    count: u64,
}

/// Fixed-bucket histogram plus a capped window of raw samples.
///
/// Bucket counts, sum and count cover every observation; percentiles only
/// cover the retained samples.
#[derive(Debug)]
pub struct Histogram {
    bounds: Vec<f64>,
    max_samples: usize,
    inner: Mutex<HistogramInner>,
}

impl Histogram {
    pub fn new(bounds: &[f64], max_samples: usize) -> Self {
        let mut bounds = bounds.to_vec();
        bounds.sort_by(f64::total_cmp);
        bounds.dedup();
        Self {
            inner: Mutex::new(HistogramInner {
                samples: VecDeque::new(),
                bucket_counts: vec![0; bounds.len()],
                overflow: 0,
                sum: 0.0,
                count: 0,
            }),
            bounds,
            max_samples: max_samples.max(1),
        }
    }

    pub fn observe(&self, value: f64) {
        let mut inner = lock(&self.inner);
        inner.samples.push_back(value);
        if inner.samples.len() > self.max_samples {
            inner.samples.pop_front();
        }
        inner.sum += value;
        inner.count += 1;
        match self.bounds.iter().position(|bound| value <= *bound) {
            Some(idx) => inner.bucket_counts[idx] += 1,
            None => inner.overflow += 1,
        }
    }

    /// Nearest-rank percentile over the retained samples; 0 when empty.
    pub fn percentile(&self, p: f64) -> f64 {
        let mut sorted: Vec<f64> = lock(&self.inner).samples.iter().copied().collect();
        if sorted.is_empty() {
            return 0.0;
        }
        sorted.sort_by(f64::total_cmp);
        let rank = ((p / 100.0) * sorted.len() as f64).ceil() as usize;
        sorted[rank.saturating_sub(1).min(sorted.len() - 1)]
    }

    pub fn mean(&self) -> f64 {
        let inner = lock(&self.inner);
        if inner.count == 0 {
            0.0
        } else {
            inner.sum / inner.count as f64
        }
    }

    pub fn count(&self) -> u64 {
        lock(&self.inner).count
    }

    pub fn sum(&self) -> f64 {
        lock(&self.inner).sum
    }

    /// Cumulative counts keyed by upper bound, Prometheus style. The last
    /// entry (`"+Inf"`) equals [`count`](Self::count).
    pub fn buckets(&self) -> BTreeMap<String, u64> {
        let inner = lock(&self.inner);
        let mut running = 0;
        let mut out = BTreeMap::new();
        for (bound, n) in self.bounds.iter().zip(&inner.bucket_counts) {
            running += n;
            out.insert(format!("{bound}"), running);
        }
        out.insert("+Inf".to_string(), running + inner.overflow);
        out
    }

    pub fn reset(&self) {
        let mut inner = lock(&self.inner);
        inner.samples.clear();
        inner.bucket_counts.iter_mut().for_each(|n| *n = 0);
        inner.overflow = 0;
        inner.sum = 0.0;
        inner.count = 0;
    }
}

/// Duration histogram with named start/stop handles.
#[derive(Debug)]
pub struct Timer {
    name: String,
    histogram: Histogram,
    active: Mutex<HashMap<String, u64>>,
    clock: SharedClock,
}

impl Timer {
    pub fn new(name: impl Into<String>, max_samples: usize, clock: SharedClock) -> Self {
        Self {
            name: name.into(),
            histogram: Histogram::new(&TIMER_BUCKETS, max_samples),
            active: Mutex::new(HashMap::new()),
            clock,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Start (or restart) the handle `id`.
    pub fn start(&self, id: &str) {
        lock(&self.active).insert(id.to_string(), self.clock.now_millis());
    }

    /// Stop `id` and record its duration. Unknown handles record nothing and return 0.
    pub fn stop(&self, id: &str) -> u64 {
        let Some(started) = lock(&self.active).remove(id) else {
            return 0;
        };
        let duration = self.clock.now_millis().saturating_sub(started);
        self.histogram.observe(duration as f64);
        duration
    }

    pub fn observe(&self, duration_ms: u64) {
        self.histogram.observe(duration_ms as f64);
    }

    /// Await `fut`, recording its duration whatever it returns.
    pub async fn time<F: Future>(&self, fut: F) -> (F::Output, u64) {
        let started = self.clock.now_millis();
        let output = fut.await;
        let duration = self.clock.now_millis().saturating_sub(started);
        self.histogram.observe(duration as f64);
        (output, duration)
    }

    pub fn percentile(&self, p: f64) -> f64 {
        self.histogram.percentile(p)
    }

    pub fn mean(&self) -> f64 {
        self.histogram.mean()
    }

    pub fn count(&self) -> u64 {
        self.histogram.count()
    }

    pub fn histogram(&self) -> &Histogram {
        &self.histogram
    }

    pub fn reset(&self) {
        lock(&self.active).clear();
        self.histogram.reset();
    }
}
