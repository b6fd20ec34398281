//! Instrument registry.
//!
//! A [`Registry`] is a flat, string-keyed table of instruments that can be shared freely between threads. Instruments
//! are created on first use through the `get_or_register_*` methods, which always hand back the existing instrument
//! when one is already registered under the same key, and then live for as long as the registry does.
//!
//! Keys are usually produced by [`MetricBuilder`][crate::MetricBuilder], which encodes tags into the key itself.

use std::{fmt, sync::Arc};

use snafu::Snafu;

mod counter;
pub use self::counter::{Counter, Gauge, GaugeFloat};

mod histogram;
pub use self::histogram::{Histogram, HistogramSnapshot, SamplingStrategy, DEFAULT_RESERVOIR_SIZE};

mod meter;
pub use self::meter::{Meter, MeterSnapshot};

mod timer;
pub use self::timer::{Timer, TimerSnapshot};

/// A registry error.
#[derive(Debug, Snafu)]
#[snafu(context(suffix(false)))]
pub enum RegistryError {
    /// An instrument of a different kind is already registered under the requested key.
    #[snafu(display("Metric '{}' is already registered as a {}, not a {}.", key, actual, expected))]
    KindMismatch {
        /// Registry key.
        key: String,

        /// Kind of instrument that was requested.
        expected: InstrumentKind,

        /// Kind of instrument that is registered.
        actual: InstrumentKind,
    },
}

/// Kind of an instrument.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum InstrumentKind {
    /// Counter.
    Counter,

    /// Integer gauge.
    Gauge,

    /// Floating-point gauge.
    GaugeFloat,

    /// Meter.
    Meter,

    /// Histogram.
    Histogram,

    /// Timer.
    Timer,
}

impl InstrumentKind {
    /// Returns the name of this kind.
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Counter => "counter",
            Self::Gauge => "gauge",
            Self::GaugeFloat => "floating-point gauge",
            Self::Meter => "meter",
            Self::Histogram => "histogram",
            Self::Timer => "timer",
        }
    }
}

impl fmt::Display for InstrumentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A registered instrument.
#[derive(Clone, Debug)]
pub enum Instrument {
    /// Counter.
    Counter(Counter),

    /// Integer gauge.
    Gauge(Gauge),

    /// Floating-point gauge.
    GaugeFloat(GaugeFloat),

    /// Meter.
    Meter(Meter),

    /// Histogram.
    Histogram(Histogram),

    /// Timer.
    Timer(Timer),
}

impl Instrument {
    /// Returns the kind of this instrument.
    pub fn kind(&self) -> InstrumentKind {
        match self {
            Self::Counter(_) => InstrumentKind::Counter,
            Self::Gauge(_) => InstrumentKind::Gauge,
            Self::GaugeFloat(_) => InstrumentKind::GaugeFloat,
            Self::Meter(_) => InstrumentKind::Meter,
            Self::Histogram(_) => InstrumentKind::Histogram,
            Self::Timer(_) => InstrumentKind::Timer,
        }
    }

    /// Takes a point-in-time snapshot of this instrument.
    pub fn snapshot(&self) -> InstrumentSnapshot {
        match self {
            Self::Counter(counter) => InstrumentSnapshot::Counter { count: counter.count() },
            Self::Gauge(gauge) => InstrumentSnapshot::Gauge { value: gauge.value() },
            Self::GaugeFloat(gauge) => InstrumentSnapshot::GaugeFloat { value: gauge.value() },
            Self::Meter(meter) => InstrumentSnapshot::Meter(meter.snapshot()),
            Self::Histogram(histogram) => InstrumentSnapshot::Histogram(histogram.snapshot()),
            Self::Timer(timer) => InstrumentSnapshot::Timer(timer.snapshot()),
        }
    }
}

/// Point-in-time view of an instrument, carrying only what is needed to report it.
#[derive(Clone, Debug, PartialEq)]
pub enum InstrumentSnapshot {
    /// Counter.
    Counter {
        /// Current count.
        count: i64,
    },

    /// Integer gauge.
    Gauge {
        /// Current value.
        value: i64,
    },

    /// Floating-point gauge.
    GaugeFloat {
        /// Current value.
        value: f64,
    },

    /// Meter.
    Meter(MeterSnapshot),

    /// Histogram.
    Histogram(HistogramSnapshot),

    /// Timer.
    Timer(TimerSnapshot),
}

/// A shared, thread-safe instrument registry.
///
/// Cloning a `Registry` is cheap, and all clones refer to the same set of instruments.
#[derive(Clone, Debug, Default)]
pub struct Registry {
    instruments: Arc<papaya::HashMap<String, Instrument>>,
}

impl Registry {
    /// Creates an empty `Registry`.
    pub fn new() -> Self {
        Self::default()
    }

    fn get_or_register_with<F>(&self, key: &str, f: F) -> Instrument
    where
        F: FnOnce() -> Instrument,
    {
        let instruments = self.instruments.pin();
        match instruments.get(key) {
            Some(instrument) => instrument.clone(),
            None => instruments.get_or_insert_with(key.to_string(), f).clone(),
        }
    }

    /// Gets the counter registered under `key`, registering a new one if none exists.
    ///
    /// # Errors
    ///
    /// If a different kind of instrument is already registered under `key`, an error is returned.
    pub fn get_or_register_counter(&self, key: &str) -> Result<Counter, RegistryError> {
        match self.get_or_register_with(key, || Instrument::Counter(Counter::new())) {
            Instrument::Counter(counter) => Ok(counter),
            other => Err(mismatch(key, InstrumentKind::Counter, &other)),
        }
    }

    /// Gets the integer gauge registered under `key`, registering a new one if none exists.
    ///
    /// # Errors
    ///
    /// If a different kind of instrument is already registered under `key`, an error is returned.
    pub fn get_or_register_gauge(&self, key: &str) -> Result<Gauge, RegistryError> {
        match self.get_or_register_with(key, || Instrument::Gauge(Gauge::new())) {
            Instrument::Gauge(gauge) => Ok(gauge),
            other => Err(mismatch(key, InstrumentKind::Gauge, &other)),
        }
    }

    /// Gets the floating-point gauge registered under `key`, registering a new one if none exists.
    ///
    /// # Errors
    ///
    /// If a different kind of instrument is already registered under `key`, an error is returned.
    pub fn get_or_register_gauge_float(&self, key: &str) -> Result<GaugeFloat, RegistryError> {
        match self.get_or_register_with(key, || Instrument::GaugeFloat(GaugeFloat::new())) {
            Instrument::GaugeFloat(gauge) => Ok(gauge),
            other => Err(mismatch(key, InstrumentKind::GaugeFloat, &other)),
        }
    }

    /// Gets the meter registered under `key`, registering a new one if none exists.
    ///
    /// # Errors
    ///
    /// If a different kind of instrument is already registered under `key`, an error is returned.
    pub fn get_or_register_meter(&self, key: &str) -> Result<Meter, RegistryError> {
        match self.get_or_register_with(key, || Instrument::Meter(Meter::new())) {
            Instrument::Meter(meter) => Ok(meter),
            other => Err(mismatch(key, InstrumentKind::Meter, &other)),
        }
    }

    /// Gets the histogram registered under `key`, registering a new one if none exists.
    ///
    /// `strategy` is only used when a new histogram is registered.
    ///
    /// # Errors
    ///
    /// If a different kind of instrument is already registered under `key`, an error is returned.
    pub fn get_or_register_histogram(&self, key: &str, strategy: SamplingStrategy) -> Result<Histogram, RegistryError> {
        match self.get_or_register_with(key, || Instrument::Histogram(Histogram::new(strategy))) {
            Instrument::Histogram(histogram) => Ok(histogram),
            other => Err(mismatch(key, InstrumentKind::Histogram, &other)),
        }
    }

    /// Gets the timer registered under `key`, registering a new one if none exists.
    ///
    /// # Errors
    ///
    /// If a different kind of instrument is already registered under `key`, an error is returned.
    pub fn get_or_register_timer(&self, key: &str) -> Result<Timer, RegistryError> {
        match self.get_or_register_with(key, || Instrument::Timer(Timer::new())) {
            Instrument::Timer(timer) => Ok(timer),
            other => Err(mismatch(key, InstrumentKind::Timer, &other)),
        }
    }

    /// Returns the instrument registered under `key`, if any.
    pub fn get(&self, key: &str) -> Option<Instrument> {
        self.instruments.pin().get(key).cloned()
    }

    /// Removes the instrument registered under `key`.
    ///
    /// Returns `true` if an instrument was removed. Handles to the instrument held elsewhere keep working, but are no
    /// longer reported.
    pub fn unregister(&self, key: &str) -> bool {
        self.instruments.pin().remove(key).is_some()
    }

    /// Returns the number of registered instruments.
    pub fn len(&self) -> usize {
        self.instruments.len()
    }

    /// Returns `true` if no instruments are registered.
    pub fn is_empty(&self) -> bool {
        self.instruments.is_empty()
    }

    /// Takes a snapshot of every registered instrument, ordered by key.
    ///
    /// Each instrument is snapshotted on its own: instruments registered or updated concurrently with this call may or
    /// may not be reflected.
    pub fn snapshot(&self) -> Vec<(String, InstrumentSnapshot)> {
        let mut snapshots = self
            .instruments
            .pin()
            .iter()
            .map(|(key, instrument)| (key.clone(), instrument.snapshot()))
            .collect::<Vec<_>>();
        snapshots.sort_by(|a, b| a.0.cmp(&b.0));
        snapshots
    }
}

fn mismatch(key: &str, expected: InstrumentKind, actual: &Instrument) -> RegistryError {
    RegistryError::KindMismatch {
        key: key.to_string(),
        expected,
        actual: actual.kind(),
    }
}
