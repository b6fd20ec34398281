//! Translation of instrument snapshots into measurements.

use std::{
    collections::HashSet,
    time::{SystemTime, SystemTimeError},
};

use snafu::{ResultExt as _, Snafu};
use tracing::debug;

use crate::{
    config::ReporterConfiguration,
    payload::{Attributes, Batch, Measurement},
    registry::{HistogramSnapshot, InstrumentSnapshot, MeterSnapshot, Registry, TimerSnapshot},
    tags::{decode, Tags},
};

/// Namespace of metrics subject to the runtime metrics allowlist.
pub const RUNTIME_NAMESPACE: &str = "runtime.";

/// A translation error.
#[derive(Debug, Snafu)]
#[snafu(context(suffix(false)))]
pub enum TranslateError {
    /// The tick time could not be expressed as a Unix timestamp.
    #[snafu(display("Tick time is before the Unix epoch."))]
    ClockBeforeEpoch {
        /// Error source.
        source: SystemTimeError,
    },
}

/// Translates instrument snapshots into a batch of measurements.
///
/// Each instrument's key is decoded back into a name and tags, the name is prefixed, and the tags are merged over the
/// configured global tags. Depending on the kind of instrument, one or more measurements are then produced:
///
/// - counters: `<name>.count`, only when the count is positive
/// - gauges: `<name>`
/// - histograms: `<name>.hist` summarizing the current sample, plus `<name>.hist.<percentile>` for each configured
///   percentile, only when the sample is not empty
/// - meters: `<name>` with the total count, plus `<name>.1min`, `<name>.5min` and `<name>.15min` rates
/// - timers: `<name>` with the total count and, when it is positive, `<name>.timer.mean`, `<name>.timer.<percentile>`
///   for each configured percentile, plus `<name>.rate.1min`, `<name>.rate.5min` and `<name>.rate.15min`
#[derive(Clone, Debug)]
pub struct Translator {
    prefix: String,
    global_tags: Tags,
    percentiles: Vec<f64>,
    timer_attributes: Attributes,
    runtime_allowlist: Option<HashSet<String>>,
    interval_secs: u64,
}

impl Translator {
    /// Creates a new `Translator` from the given configuration.
    pub fn new(config: &ReporterConfiguration) -> Self {
        Self {
            prefix: config.metric_prefix.clone(),
            global_tags: config.tags.clone(),
            percentiles: config.percentiles.clone(),
            timer_attributes: Attributes::duration(config.timer_display_unit),
            runtime_allowlist: config
                .runtime_metrics_allowlist
                .as_ref()
                .map(|names| names.iter().cloned().collect()),
            interval_secs: config.interval_secs.max(1),
        }
    }

    /// Translates every instrument in `registry` into a batch.
    ///
    /// # Errors
    ///
    /// If `now` is before the Unix epoch, an error is returned.
    pub fn translate_registry(&self, now: SystemTime, registry: &Registry) -> Result<Batch, TranslateError> {
        self.translate(now, &registry.snapshot())
    }

    /// Translates the given instrument snapshots into a batch.
    ///
    /// The batch time is `now` rounded down to a multiple of the reporting interval, so that successive batches line up
    /// on a fixed grid.
    ///
    /// # Errors
    ///
    /// If `now` is before the Unix epoch, an error is returned.
    pub fn translate(&self, now: SystemTime, snapshots: &[(String, InstrumentSnapshot)]) -> Result<Batch, TranslateError> {
        let now_secs = now.duration_since(SystemTime::UNIX_EPOCH).context(ClockBeforeEpoch)?.as_secs();

        let mut measurements = Vec::with_capacity(snapshots.len());
        for (key, snapshot) in snapshots {
            let (name, tags) = decode(key);
            if name.is_empty() {
                debug!(metric_key = %key, "Skipping metric with empty name.");
                continue;
            }

            if !self.is_allowed(&name) {
                debug!(metric_name = %name, "Skipping runtime metric not present in allowlist.");
                continue;
            }

            let name = format!("{}{}", self.prefix, name);
            let tags = self.merge_tags(tags);
            self.translate_snapshot(&name, tags, snapshot, &mut measurements);
        }

        Ok(Batch {
            time: align_to_interval(now_secs, self.interval_secs),
            tags: self.global_tags.clone(),
            measurements,
        })
    }

    fn is_allowed(&self, name: &str) -> bool {
        let allowlist = match &self.runtime_allowlist {
            Some(allowlist) => allowlist,
            None => return true,
        };

        match name.strip_prefix(RUNTIME_NAMESPACE) {
            Some(base_name) => allowlist.contains(base_name) || allowlist.contains(name),
            None => true,
        }
    }

    fn merge_tags(&self, tags: Tags) -> Tags {
        let mut merged = self.global_tags.clone();
        merged.extend(tags);
        merged
    }

    fn translate_snapshot(&self, name: &str, tags: Tags, snapshot: &InstrumentSnapshot, out: &mut Vec<Measurement>) {
        let period = self.interval_secs;

        match snapshot {
            InstrumentSnapshot::Counter { count } => {
                if *count > 0 {
                    out.push(
                        Measurement::value(format!("{}.count", name), *count as f64, period, tags)
                            .with_attributes(Attributes::operations()),
                    );
                }
            }
            InstrumentSnapshot::Gauge { value } => {
                out.push(Measurement::value(name, *value as f64, period, tags));
            }
            InstrumentSnapshot::GaugeFloat { value } => {
                out.push(Measurement::value(name, *value, period, tags));
            }
            InstrumentSnapshot::Histogram(histogram) => self.translate_histogram(name, tags, histogram, out),
            InstrumentSnapshot::Meter(meter) => {
                out.push(Measurement::value(name, meter.count as f64, period, tags.clone()));
                self.push_rates(name, "", &tags, meter, out);
            }
            InstrumentSnapshot::Timer(timer) => self.translate_timer(name, tags, timer, out),
        }
    }

    fn translate_histogram(&self, name: &str, tags: Tags, histogram: &HistogramSnapshot, out: &mut Vec<Measurement>) {
        if histogram.is_empty() {
            return;
        }

        let hist_name = format!("{}.hist", name);
        let percentiles = histogram.percentiles(&self.percentiles);

        // The count has to be the size of the current sample rather than the lifetime count: the destination shows
        // `sum / count` as the mean, and the sum only covers the sample.
        out.push(Measurement {
            name: hist_name.clone(),
            count: Some(histogram.size() as u64),
            sum: Some(histogram.sum() as f64),
            max: Some(histogram.max() as f64),
            min: Some(histogram.min() as f64),
            stddev: Some(histogram.stddev()),
            period: self.interval_secs,
            tags: tags.clone(),
            ..Default::default()
        });

        for (p, value) in self.percentiles.iter().zip(percentiles) {
            out.push(Measurement::value(
                format!("{}.{:.2}", hist_name, p),
                value,
                self.interval_secs,
                tags.clone(),
            ));
        }
    }

    fn translate_timer(&self, name: &str, tags: Tags, timer: &TimerSnapshot, out: &mut Vec<Measurement>) {
        let count = timer.meter.count;
        out.push(Measurement::value(name, count as f64, self.interval_secs, tags.clone()));
        if count <= 0 {
            return;
        }

        let histogram = &timer.histogram;
        out.push(Measurement {
            name: format!("{}.timer.mean", name),
            count: Some(count as u64),
            sum: Some(histogram.mean() * count as f64),
            max: Some(histogram.max() as f64),
            min: Some(histogram.min() as f64),
            stddev: Some(histogram.stddev()),
            period: self.interval_secs,
            tags: tags.clone(),
            attributes: self.timer_attributes.clone(),
            ..Default::default()
        });

        for (p, value) in self.percentiles.iter().zip(histogram.percentiles(&self.percentiles)) {
            out.push(
                Measurement::value(
                    format!("{}.timer.{:.0}", name, p * 100.0),
                    value,
                    self.interval_secs,
                    tags.clone(),
                )
                .with_attributes(self.timer_attributes.clone()),
            );
        }

        self.push_rates(name, ".rate", &tags, &timer.meter, out);
    }

    fn push_rates(&self, name: &str, infix: &str, tags: &Tags, meter: &MeterSnapshot, out: &mut Vec<Measurement>) {
        let rates = [("1min", meter.rate1), ("5min", meter.rate5), ("15min", meter.rate15)];
        for (window, rate) in rates {
            out.push(
                Measurement::value(
                    format!("{}{}.{}", name, infix, window),
                    rate,
                    self.interval_secs,
                    tags.clone(),
                )
                .with_attributes(Attributes::operations()),
            );
        }
    }
}

/// Rounds `timestamp` down to the nearest multiple of `interval_secs`.
pub fn align_to_interval(timestamp: u64, interval_secs: u64) -> i64 {
    let interval_secs = interval_secs.max(1);
    let aligned = (timestamp / interval_secs) * interval_secs;
    i64::try_from(aligned).unwrap_or(i64::MAX)
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::{
        payload::DisplayUnit,
        registry::SamplingStrategy,
        MetricBuilder,
    };

    fn at(secs: u64) -> SystemTime {
        SystemTime::UNIX_EPOCH + Duration::from_secs(secs)
    }

    fn config() -> ReporterConfiguration {
        ReporterConfiguration::new("token")
    }

    fn names(batch: &Batch) -> Vec<&str> {
        batch.measurements.iter().map(|m| m.name.as_str()).collect()
    }

    fn tags(pairs: &[(&str, &str)]) -> Tags {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[test]
    fn batch_time_is_aligned() {
        let translator = Translator::new(&config());
        let batch = translator.translate(at(125), &[]).unwrap();
        assert_eq!(batch.time, 120);
        assert!(batch.is_empty());

        assert_eq!(align_to_interval(120, 60), 120);
        assert_eq!(align_to_interval(59, 60), 0);
        assert_eq!(align_to_interval(17, 0), 17);
    }

    #[test]
    fn clock_before_epoch_is_an_error() {
        let translator = Translator::new(&config());
        let before_epoch = SystemTime::UNIX_EPOCH - Duration::from_secs(1);
        assert!(matches!(
            translator.translate(before_epoch, &[]),
            Err(TranslateError::ClockBeforeEpoch { .. })
        ));
    }

    #[test]
    fn zero_counter_is_skipped() {
        let translator = Translator::new(&config());
        let snapshots = vec![
            ("idle".to_string(), InstrumentSnapshot::Counter { count: 0 }),
            ("busy".to_string(), InstrumentSnapshot::Counter { count: 7 }),
        ];

        let batch = translator.translate(at(60), &snapshots).unwrap();
        assert_eq!(names(&batch), vec!["busy.count"]);

        let measurement = &batch.measurements[0];
        assert_eq!(measurement.value, Some(7.0));
        assert_eq!(measurement.period, 60);
        assert_eq!(measurement.attributes, Attributes::operations());
    }

    #[test]
    fn gauges_are_always_reported() {
        let translator = Translator::new(&config());
        let snapshots = vec![
            ("a".to_string(), InstrumentSnapshot::Gauge { value: 0 }),
            ("b".to_string(), InstrumentSnapshot::GaugeFloat { value: 2.5 }),
        ];

        let batch = translator.translate(at(60), &snapshots).unwrap();
        assert_eq!(names(&batch), vec!["a", "b"]);
        assert_eq!(batch.measurements[0].value, Some(0.0));
        assert_eq!(batch.measurements[1].value, Some(2.5));
        assert!(batch.measurements[0].attributes.is_empty());
    }

    #[test]
    fn histogram_measurements() {
        let mut config = config();
        config.percentiles = vec![0.5, 0.99];
        let translator = Translator::new(&config);

        let registry = Registry::new();
        let histogram = registry
            .get_or_register_histogram("empty", SamplingStrategy::default())
            .unwrap();
        assert_eq!(histogram.count(), 0);

        let histogram = registry
            .get_or_register_histogram("latency", SamplingStrategy::default())
            .unwrap();
        for v in [10, 20, 30] {
            histogram.update(v);
        }

        let batch = translator.translate_registry(at(60), &registry).unwrap();
        assert_eq!(
            names(&batch),
            vec!["latency.hist", "latency.hist.0.50", "latency.hist.0.99"]
        );

        let summary = &batch.measurements[0];
        assert_eq!(summary.value, None);
        assert_eq!(summary.count, Some(3));
        assert_eq!(summary.sum, Some(60.0));
        assert_eq!(summary.min, Some(10.0));
        assert_eq!(summary.max, Some(30.0));
        assert!(summary.stddev.is_some());
        assert_eq!(batch.measurements[1].value, Some(20.0));
        assert_eq!(batch.measurements[2].value, Some(30.0));
    }

    #[test]
    fn histogram_count_is_sample_size() {
        let translator = Translator::new(&config());
        let snapshots = vec![(
            "latency".to_string(),
            InstrumentSnapshot::Histogram(HistogramSnapshot::new(5000, vec![1, 2, 3])),
        )];

        let batch = translator.translate(at(60), &snapshots).unwrap();
        assert_eq!(batch.measurements[0].count, Some(3));
    }

    #[test]
    fn meter_measurements() {
        let translator = Translator::new(&config());
        let snapshots = vec![(
            "events".to_string(),
            InstrumentSnapshot::Meter(MeterSnapshot {
                count: 42,
                rate1: 1.0,
                rate5: 5.0,
                rate15: 15.0,
                rate_mean: 0.5,
            }),
        )];

        let batch = translator.translate(at(60), &snapshots).unwrap();
        assert_eq!(
            names(&batch),
            vec!["events", "events.1min", "events.5min", "events.15min"]
        );
        assert_eq!(batch.measurements[0].value, Some(42.0));
        assert!(batch.measurements[0].attributes.is_empty());
        for (measurement, rate) in batch.measurements[1..].iter().zip([1.0, 5.0, 15.0]) {
            assert_eq!(measurement.value, Some(rate));
            assert_eq!(measurement.attributes, Attributes::operations());
        }
    }

    #[test]
    fn timer_measurements() {
        let mut config = config();
        config.percentiles = vec![0.5, 0.95];
        config.timer_display_unit = DisplayUnit::Milliseconds;
        let translator = Translator::new(&config);

        let registry = Registry::new();
        let timer = registry.get_or_register_timer("request").unwrap();
        timer.update(Duration::from_millis(10));
        timer.update(Duration::from_millis(30));

        let batch = translator.translate_registry(at(60), &registry).unwrap();
        assert_eq!(
            names(&batch),
            vec![
                "request",
                "request.timer.mean",
                "request.timer.50",
                "request.timer.95",
                "request.rate.1min",
                "request.rate.5min",
                "request.rate.15min",
            ]
        );

        assert_eq!(batch.measurements[0].value, Some(2.0));

        let mean = &batch.measurements[1];
        assert_eq!(mean.count, Some(2));
        assert_eq!(mean.sum, Some(40_000_000.0));
        assert_eq!(mean.min, Some(10_000_000.0));
        assert_eq!(mean.max, Some(30_000_000.0));
        assert_eq!(mean.attributes.display_transform.as_deref(), Some("x/1000000"));
        assert_eq!(mean.attributes.display_units_short.as_deref(), Some("ms"));
        assert_eq!(batch.measurements[2].attributes, mean.attributes);
        assert_eq!(batch.measurements[4].attributes, Attributes::operations());
    }

    #[test]
    fn idle_timer_only_reports_count() {
        let translator = Translator::new(&config());
        let registry = Registry::new();
        registry.get_or_register_timer("request").unwrap();

        let batch = translator.translate_registry(at(60), &registry).unwrap();
        assert_eq!(names(&batch), vec!["request"]);
        assert_eq!(batch.measurements[0].value, Some(0.0));
    }

    #[test]
    fn prefix_and_tag_merging() {
        let mut config = config();
        config.metric_prefix = "svc.".to_string();
        config.tags = tags(&[("env", "prod"), ("region", "us-east")]);
        let translator = Translator::new(&config);

        let registry = Registry::new();
        MetricBuilder::new(&registry, "jobs")
            .tag("region", "eu-west")
            .tag("queue", "default")
            .gauge()
            .unwrap()
            .update(3);

        let batch = translator.translate_registry(at(60), &registry).unwrap();
        assert_eq!(batch.tags, config.tags);

        let measurement = &batch.measurements[0];
        assert_eq!(measurement.name, "svc.jobs");
        assert_eq!(
            measurement.tags,
            tags(&[("env", "prod"), ("queue", "default"), ("region", "eu-west")])
        );
    }

    #[test]
    fn runtime_allowlist() {
        let snapshots = vec![
            ("runtime.gc.count".to_string(), InstrumentSnapshot::Gauge { value: 1 }),
            ("runtime.mem.alloc".to_string(), InstrumentSnapshot::Gauge { value: 2 }),
            ("app.requests".to_string(), InstrumentSnapshot::Gauge { value: 3 }),
        ];

        // Unset: everything goes through.
        let batch = Translator::new(&config()).translate(at(60), &snapshots).unwrap();
        assert_eq!(names(&batch), vec!["runtime.gc.count", "runtime.mem.alloc", "app.requests"]);

        // Set: only listed runtime metrics go through, non-runtime metrics are unaffected.
        let mut allowlisted = config();
        allowlisted.runtime_metrics_allowlist = Some(vec!["mem.alloc".to_string()]);
        let batch = Translator::new(&allowlisted).translate(at(60), &snapshots).unwrap();
        assert_eq!(names(&batch), vec!["runtime.mem.alloc", "app.requests"]);

        // Full names work too.
        allowlisted.runtime_metrics_allowlist = Some(vec!["runtime.gc.count".to_string()]);
        let batch = Translator::new(&allowlisted).translate(at(60), &snapshots).unwrap();
        assert_eq!(names(&batch), vec!["runtime.gc.count", "app.requests"]);

        // Empty: no runtime metrics at all.
        allowlisted.runtime_metrics_allowlist = Some(vec![]);
        let batch = Translator::new(&allowlisted).translate(at(60), &snapshots).unwrap();
        assert_eq!(names(&batch), vec!["app.requests"]);
    }

    #[test]
    fn allowlist_matches_untagged_name() {
        let mut config = config();
        config.runtime_metrics_allowlist = Some(vec!["mem.alloc".to_string()]);
        let translator = Translator::new(&config);

        let snapshots = vec![(
            "runtime.mem.alloc#pool=heap".to_string(),
            InstrumentSnapshot::Gauge { value: 2 },
        )];

        let batch = translator.translate(at(60), &snapshots).unwrap();
        assert_eq!(names(&batch), vec!["runtime.mem.alloc"]);
        assert_eq!(batch.measurements[0].tags, tags(&[("pool", "heap")]));
    }
}
