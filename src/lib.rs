//! Proxy Scout - Descriptor Aggregator and Health Checker
//!
//! Aggregates protocol-tagged proxy descriptors from curated subscription
//! sources and GitHub repositories, deduplicates them, and optionally
//! verifies each endpoint with a latency-scored TCP probe. Each run is a
//! bounded batch job that honors a cooperative stop signal throughout.

pub mod cache;
pub mod error;
pub mod fetch;
pub mod finder;
pub mod proxy;
pub mod signal;
pub mod sources;

pub use error::{Error, ErrorKind, Result};
pub use signal::StopSignal;
