use std::sync::{
    atomic::{AtomicI64, AtomicU64, Ordering::Relaxed},
    Arc,
};

/// A monotonic-ish counter.
///
/// Counters are never reset by reporting: each report carries the current total.
#[derive(Clone, Debug, Default)]
pub struct Counter {
    count: Arc<AtomicI64>,
}

impl Counter {
    /// Creates a new `Counter` starting at zero.
    pub fn new() -> Self {
        Self::default()
    }

    /// Increments the counter by `n`.
    pub fn inc(&self, n: i64) {
        self.count.fetch_add(n, Relaxed);
    }

    /// Decrements the counter by `n`.
    pub fn dec(&self, n: i64) {
        self.count.fetch_sub(n, Relaxed);
    }

    /// Returns the current count.
    pub fn count(&self) -> i64 {
        self.count.load(Relaxed)
    }

    /// Resets the counter to zero.
    pub fn clear(&self) {
        self.count.store(0, Relaxed);
    }
}

/// An integer gauge.
#[derive(Clone, Debug, Default)]
pub struct Gauge {
    value: Arc<AtomicI64>,
}

impl Gauge {
    /// Creates a new `Gauge` with a value of zero.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the gauge to `value`.
    pub fn update(&self, value: i64) {
        self.value.store(value, Relaxed);
    }

    /// Returns the current value.
    pub fn value(&self) -> i64 {
        self.value.load(Relaxed)
    }
}

/// A floating-point gauge.
#[derive(Clone, Debug, Default)]
pub struct GaugeFloat {
    // Holds the bits of an `f64`; zero bits are `0.0`, so the default is correct.
    bits: Arc<AtomicU64>,
}

impl GaugeFloat {
    /// Creates a new `GaugeFloat` with a value of zero.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the gauge to `value`.
    pub fn update(&self, value: f64) {
        self.bits.store(value.to_bits(), Relaxed);
    }

    /// Returns the current value.
    pub fn value(&self) -> f64 {
        f64::from_bits(self.bits.load(Relaxed))
    }
}
