use std::{
    sync::{Arc, Mutex, PoisonError},
    time::{Duration, Instant},
};

use super::{histogram::HistogramState, meter::MeterState, HistogramSnapshot, MeterSnapshot, SamplingStrategy};

#[derive(Debug)]
struct TimerState {
    histogram: HistogramState,
    meter: MeterState,
}

/// Measures durations, tracking both their distribution and the rate at which they occur.
///
/// Durations are recorded in nanoseconds. The distribution and the rate share a single lock, so a snapshot never sees
/// a duration in one without the other.
#[derive(Clone, Debug)]
pub struct Timer {
    state: Arc<Mutex<TimerState>>,
}

impl Timer {
    /// Creates a new `Timer` using the default uniform reservoir.
    pub fn new() -> Self {
        Self::with_sampling(SamplingStrategy::default())
    }

    /// Creates a new `Timer` using the given sampling strategy for its duration distribution.
    pub fn with_sampling(strategy: SamplingStrategy) -> Self {
        Self::started_at(strategy, Instant::now())
    }

    fn started_at(strategy: SamplingStrategy, now: Instant) -> Self {
        Self {
            state: Arc::new(Mutex::new(TimerState {
                histogram: HistogramState::new(strategy),
                meter: MeterState::new(now),
            })),
        }
    }

    /// Records a duration.
    pub fn update(&self, duration: Duration) {
        self.update_at(duration, Instant::now());
    }

    fn update_at(&self, duration: Duration, now: Instant) {
        let nanos = i64::try_from(duration.as_nanos()).unwrap_or(i64::MAX);
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.histogram.update(nanos);
        state.meter.mark(1, now);
    }

    /// Records the time elapsed since `start`.
    pub fn update_since(&self, start: Instant) {
        self.update(start.elapsed());
    }

    /// Runs `f`, recording how long it took.
    pub fn time<F, R>(&self, f: F) -> R
    where
        F: FnOnce() -> R,
    {
        let start = Instant::now();
        let result = f();
        self.update_since(start);
        result
    }

    /// Returns the number of durations recorded.
    pub fn count(&self) -> u64 {
        self.state.lock().unwrap_or_else(PoisonError::into_inner).histogram.count()
    }

    /// Takes a point-in-time snapshot of the timer.
    pub fn snapshot(&self) -> TimerSnapshot {
        self.snapshot_at(Instant::now())
    }

    fn snapshot_at(&self, now: Instant) -> TimerSnapshot {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        TimerSnapshot {
            histogram: state.histogram.snapshot(),
            meter: state.meter.snapshot(now),
        }
    }
}

impl Default for Timer {
    fn default() -> Self {
        Self::new()
    }
}

/// Point-in-time view of a [`Timer`].
#[derive(Clone, Debug, PartialEq)]
pub struct TimerSnapshot {
    /// Distribution of recorded durations, in nanoseconds.
    pub histogram: HistogramSnapshot,

    /// Rate at which durations were recorded.
    pub meter: MeterSnapshot,
}

impl TimerSnapshot {
    /// Returns the number of durations recorded.
    pub fn count(&self) -> u64 {
        self.histogram.count()
    }
}
