//! Proxy descriptor domain: models, decoding, extraction, health probing
//!
//! This module provides functionality for:
//! - Modeling protocol-tagged descriptors and health verdicts
//! - Decoding per-protocol connection targets
//! - Extracting descriptors from fetched payload text
//! - Probing endpoint reachability over raw TCP with quality scoring

pub mod decoder;
pub mod extract;
pub mod models;
pub mod prober;

pub use decoder::DescriptorDecoder;
pub use extract::DescriptorExtractor;
pub use models::{quality_score, Descriptor, Endpoint, HealthStatus, HealthVerdict, Protocol};
pub use prober::{filter_by_quality, sort_by_quality, HealthProber, ProberConfig};
