use std::{
    collections::VecDeque,
    sync::{Arc, Mutex, PoisonError},
};

use rand::Rng as _;

/// Default reservoir size for uniformly-sampled histograms.
pub const DEFAULT_RESERVOIR_SIZE: usize = 1028;

/// Strategy for choosing which values a histogram keeps for computing its statistics.
///
/// Histograms only ever hold a bounded number of values, so statistics like percentiles and standard deviation are
/// computed over a sample of everything recorded rather than the full history.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SamplingStrategy {
    /// Keeps a uniformly random sample of every value ever recorded, using Vitter's algorithm R.
    Uniform {
        /// Maximum number of values held.
        reservoir_size: usize,
    },

    /// Keeps only the most recently recorded values.
    SlidingWindow {
        /// Number of recent values held.
        size: usize,
    },
}

impl Default for SamplingStrategy {
    fn default() -> Self {
        Self::Uniform {
            reservoir_size: DEFAULT_RESERVOIR_SIZE,
        }
    }
}

#[derive(Debug)]
enum Reservoir {
    Uniform { size: usize, seen: u64, values: Vec<i64> },
    SlidingWindow { size: usize, values: VecDeque<i64> },
}

impl Reservoir {
    fn from_strategy(strategy: SamplingStrategy) -> Self {
        match strategy {
            SamplingStrategy::Uniform { reservoir_size } => Self::Uniform {
                size: reservoir_size.max(1),
                seen: 0,
                values: Vec::new(),
            },
            SamplingStrategy::SlidingWindow { size } => Self::SlidingWindow {
                size: size.max(1),
                values: VecDeque::new(),
            },
        }
    }

    fn update(&mut self, value: i64) {
        match self {
            Self::Uniform { size, seen, values } => {
                *seen += 1;
                if values.len() < *size {
                    values.push(value);
                } else {
                    let idx = rand::rng().random_range(0..*seen);
                    if let Ok(idx) = usize::try_from(idx) {
                        if idx < *size {
                            values[idx] = value;
                        }
                    }
                }
            }
            Self::SlidingWindow { size, values } => {
                if values.len() == *size {
                    values.pop_front();
                }
                values.push_back(value);
            }
        }
    }

    fn values(&self) -> Vec<i64> {
        match self {
            Self::Uniform { values, .. } => values.clone(),
            Self::SlidingWindow { values, .. } => values.iter().copied().collect(),
        }
    }

    fn clear(&mut self) {
        match self {
            Self::Uniform { seen, values, .. } => {
                *seen = 0;
                values.clear();
            }
            Self::SlidingWindow { values, .. } => values.clear(),
        }
    }
}

#[derive(Debug)]
pub(super) struct HistogramState {
    count: u64,
    reservoir: Reservoir,
}

impl HistogramState {
    pub(super) fn new(strategy: SamplingStrategy) -> Self {
        Self {
            count: 0,
            reservoir: Reservoir::from_strategy(strategy),
        }
    }

    pub(super) fn update(&mut self, value: i64) {
        self.count = self.count.wrapping_add(1);
        self.reservoir.update(value);
    }

    pub(super) fn count(&self) -> u64 {
        self.count
    }

    fn clear(&mut self) {
        self.count = 0;
        self.reservoir.clear();
    }

    pub(super) fn snapshot(&self) -> HistogramSnapshot {
        HistogramSnapshot::new(self.count, self.reservoir.values())
    }
}

/// Tracks the distribution of a stream of integer values.
#[derive(Clone, Debug)]
pub struct Histogram {
    state: Arc<Mutex<HistogramState>>,
}

impl Histogram {
    /// Creates a new `Histogram` using the given sampling strategy.
    pub fn new(strategy: SamplingStrategy) -> Self {
        Self {
            state: Arc::new(Mutex::new(HistogramState::new(strategy))),
        }
    }

    /// Records a value.
    pub fn update(&self, value: i64) {
        self.state.lock().unwrap_or_else(PoisonError::into_inner).update(value);
    }

    /// Returns the number of values recorded over the lifetime of the histogram.
    pub fn count(&self) -> u64 {
        self.state.lock().unwrap_or_else(PoisonError::into_inner).count()
    }

    /// Discards all recorded values.
    pub fn clear(&self) {
        self.state.lock().unwrap_or_else(PoisonError::into_inner).clear();
    }

    /// Takes a point-in-time snapshot of the histogram.
    pub fn snapshot(&self) -> HistogramSnapshot {
        self.state.lock().unwrap_or_else(PoisonError::into_inner).snapshot()
    }
}

impl Default for Histogram {
    fn default() -> Self {
        Self::new(SamplingStrategy::default())
    }
}

/// Point-in-time view of a [`Histogram`].
///
/// `count` covers every value ever recorded, while every other statistic is computed over the current sample.
#[derive(Clone, Debug, PartialEq)]
pub struct HistogramSnapshot {
    count: u64,
    values: Vec<i64>,
}

impl HistogramSnapshot {
    pub(crate) fn new(count: u64, mut values: Vec<i64>) -> Self {
        values.sort_unstable();
        Self { count, values }
    }

    /// Returns the number of values recorded over the lifetime of the histogram.
    pub fn count(&self) -> u64 {
        self.count
    }

    /// Returns the number of values in the current sample.
    pub fn size(&self) -> usize {
        self.values.len()
    }

    /// Returns `true` if the current sample holds no values.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Returns the smallest sampled value, or zero if the sample is empty.
    pub fn min(&self) -> i64 {
        self.values.first().copied().unwrap_or(0)
    }

    /// Returns the largest sampled value, or zero if the sample is empty.
    pub fn max(&self) -> i64 {
        self.values.last().copied().unwrap_or(0)
    }

    /// Returns the sum of the sampled values.
    pub fn sum(&self) -> i64 {
        self.values.iter().fold(0i64, |acc, v| acc.saturating_add(*v))
    }

    /// Returns the mean of the sampled values, or zero if the sample is empty.
    pub fn mean(&self) -> f64 {
        if self.values.is_empty() {
            return 0.0;
        }
        self.values.iter().map(|v| *v as f64).sum::<f64>() / self.values.len() as f64
    }

    /// Returns the population variance of the sampled values.
    pub fn variance(&self) -> f64 {
        if self.values.is_empty() {
            return 0.0;
        }
        let mean = self.mean();
        let squared_diffs = self
            .values
            .iter()
            .map(|v| {
                let diff = *v as f64 - mean;
                diff * diff
            })
            .sum::<f64>();
        squared_diffs / self.values.len() as f64
    }

    /// Returns the population standard deviation of the sampled values.
    pub fn stddev(&self) -> f64 {
        self.variance().sqrt()
    }

    /// Returns the value at the given percentile, where `p` is a fraction between 0 and 1.
    ///
    /// Uses linear interpolation at rank `p * (n + 1)`, clamped to the smallest and largest sampled values.
    pub fn percentile(&self, p: f64) -> f64 {
        let n = self.values.len();
        if n == 0 {
            return 0.0;
        }

        let pos = p * (n as f64 + 1.0);
        if pos < 1.0 {
            self.values[0] as f64
        } else if pos >= n as f64 {
            self.values[n - 1] as f64
        } else {
            let rank = pos.floor();
            // `pos` is within `[1, n)` here, so both indexes are in bounds.
            let lower = self.values[rank as usize - 1] as f64;
            let upper = self.values[rank as usize] as f64;
            lower + (pos - rank) * (upper - lower)
        }
    }

    /// Returns the values at each of the given percentiles.
    pub fn percentiles(&self, ps: &[f64]) -> Vec<f64> {
        ps.iter().map(|p| self.percentile(*p)).collect()
    }
}
