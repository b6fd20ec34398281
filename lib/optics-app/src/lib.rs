//! High-level application primitives.
//!
//! This crate provides the primitives needed to bootstrap an application before running it, such as initializing
//! logging.
#![deny(warnings)]
#![deny(missing_docs)]

pub mod logging;

/// Common imports.
pub mod prelude {
    pub use super::logging::{initialize_logging, LoggingConfiguration};
}
