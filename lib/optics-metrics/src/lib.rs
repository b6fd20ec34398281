//! Tagged metrics with periodic reporting to a measurements endpoint.
//!
//! Instruments live in a [`Registry`], keyed by a string which encodes both the metric name and its tags. Use
//! [`MetricBuilder`] to create instruments with sanitized names and tags, and a [`Reporter`] to upload everything in
//! the registry on a fixed interval.
#![deny(warnings)]
#![deny(missing_docs)]

mod builder;
pub use self::builder::MetricBuilder;

pub mod client;
pub use self::client::{ClientError, MeasurementsClient, Transport};

pub mod config;
pub use self::config::{ReporterConfigError, ReporterConfiguration};

pub mod payload;

pub mod registry;
pub use self::registry::{Registry, RegistryError};

mod reporter;
pub use self::reporter::{ReportError, Reporter};

mod runtime;
pub use self::runtime::RuntimeMetrics;

pub mod tags;
pub use self::tags::{MetricIdentity, Tags};

pub mod translate;
