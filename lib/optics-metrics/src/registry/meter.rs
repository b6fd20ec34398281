use std::{
    sync::{Arc, Mutex, PoisonError},
    time::{Duration, Instant},
};

const TICK_INTERVAL: Duration = Duration::from_secs(5);
const ONE_MINUTE: Duration = Duration::from_secs(60);
const FIVE_MINUTES: Duration = Duration::from_secs(5 * 60);
const FIFTEEN_MINUTES: Duration = Duration::from_secs(15 * 60);

/// Exponentially-weighted moving average of a per-second rate, updated every [`TICK_INTERVAL`].
#[derive(Debug)]
struct Ewma {
    alpha: f64,
    rate: f64,
    initialized: bool,
}

impl Ewma {
    fn new(window: Duration) -> Self {
        Self {
            alpha: 1.0 - (-TICK_INTERVAL.as_secs_f64() / window.as_secs_f64()).exp(),
            rate: 0.0,
            initialized: false,
        }
    }

    /// Applies `ticks` ticks, the first carrying `uncounted` events and the rest carrying none.
    fn tick(&mut self, uncounted: i64, ticks: u64) {
        let instant_rate = uncounted as f64 / TICK_INTERVAL.as_secs_f64();
        if self.initialized {
            self.rate += self.alpha * (instant_rate - self.rate);
        } else {
            self.rate = instant_rate;
            self.initialized = true;
        }

        // Every empty tick just decays the rate by `(1 - alpha)`.
        if ticks > 1 {
            let idle_ticks = i32::try_from(ticks - 1).unwrap_or(i32::MAX);
            self.rate *= (1.0 - self.alpha).powi(idle_ticks);
        }
    }
}

#[derive(Debug)]
pub(super) struct MeterState {
    count: i64,
    uncounted: i64,
    m1: Ewma,
    m5: Ewma,
    m15: Ewma,
    start: Instant,
    last_tick: Instant,
}

impl MeterState {
    pub(super) fn new(now: Instant) -> Self {
        Self {
            count: 0,
            uncounted: 0,
            m1: Ewma::new(ONE_MINUTE),
            m5: Ewma::new(FIVE_MINUTES),
            m15: Ewma::new(FIFTEEN_MINUTES),
            start: now,
            last_tick: now,
        }
    }

    fn tick_if_necessary(&mut self, now: Instant) {
        let elapsed = now.saturating_duration_since(self.last_tick);
        if elapsed < TICK_INTERVAL {
            return;
        }

        let ticks = u64::try_from(elapsed.as_nanos() / TICK_INTERVAL.as_nanos()).unwrap_or(u64::MAX);
        let uncounted = std::mem::take(&mut self.uncounted);
        self.m1.tick(uncounted, ticks);
        self.m5.tick(uncounted, ticks);
        self.m15.tick(uncounted, ticks);

        let advance = TICK_INTERVAL.saturating_mul(u32::try_from(ticks).unwrap_or(u32::MAX));
        self.last_tick = self.last_tick.checked_add(advance).unwrap_or(now);
    }

    pub(super) fn mark(&mut self, n: i64, now: Instant) {
        self.tick_if_necessary(now);
        self.count = self.count.wrapping_add(n);
        self.uncounted = self.uncounted.wrapping_add(n);
    }

    pub(super) fn snapshot(&mut self, now: Instant) -> MeterSnapshot {
        self.tick_if_necessary(now);

        let elapsed = now.saturating_duration_since(self.start).as_secs_f64();
        let rate_mean = if elapsed > 0.0 {
            self.count as f64 / elapsed
        } else {
            0.0
        };

        MeterSnapshot {
            count: self.count,
            rate1: self.m1.rate,
            rate5: self.m5.rate,
            rate15: self.m15.rate,
            rate_mean,
        }
    }
}

/// Counts events and tracks their rate over the last 1, 5 and 15 minutes.
///
/// Rates are exponentially-weighted moving averages, in events per second, updated lazily whenever the meter is marked
/// or read.
#[derive(Clone, Debug)]
pub struct Meter {
    state: Arc<Mutex<MeterState>>,
}

impl Meter {
    /// Creates a new `Meter`.
    pub fn new() -> Self {
        Self::started_at(Instant::now())
    }

    pub(crate) fn started_at(now: Instant) -> Self {
        Self {
            state: Arc::new(Mutex::new(MeterState::new(now))),
        }
    }

    /// Records `n` events.
    pub fn mark(&self, n: i64) {
        self.mark_at(n, Instant::now());
    }

    pub(crate) fn mark_at(&self, n: i64, now: Instant) {
        self.state.lock().unwrap_or_else(PoisonError::into_inner).mark(n, now);
    }

    /// Returns the total number of events recorded.
    pub fn count(&self) -> i64 {
        self.state.lock().unwrap_or_else(PoisonError::into_inner).count
    }

    /// Takes a point-in-time snapshot of the meter.
    pub fn snapshot(&self) -> MeterSnapshot {
        self.snapshot_at(Instant::now())
    }

    pub(crate) fn snapshot_at(&self, now: Instant) -> MeterSnapshot {
        self.state.lock().unwrap_or_else(PoisonError::into_inner).snapshot(now)
    }
}

impl Default for Meter {
    fn default() -> Self {
        Self::new()
    }
}

/// Point-in-time view of a [`Meter`].
#[derive(Clone, Debug, PartialEq)]
pub struct MeterSnapshot {
    /// Total number of events recorded.
    pub count: i64,

    /// One-minute moving average rate, in events per second.
    pub rate1: f64,

    /// Five-minute moving average rate, in events per second.
    pub rate5: f64,

    /// Fifteen-minute moving average rate, in events per second.
    pub rate15: f64,

    /// Mean rate since the meter was created, in events per second.
    pub rate_mean: f64,
}
