//! TCP health prober for validating descriptors
//!
//! This module provides functionality for:
//! - Decoding descriptors and probing their endpoints over raw TCP
//! - Measuring connect latency and deriving a quality score
//! - Batch-wise processing with a concurrency cap and stop checkpoints

use crate::error::Error;
use crate::proxy::decoder::DescriptorDecoder;
use crate::proxy::models::{Descriptor, HealthStatus, HealthVerdict};
use crate::signal::StopSignal;
use futures::stream::{self, StreamExt};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::TcpStream;
use tokio::sync::Semaphore;
use tracing::debug;

/// Default timeout for TCP connects in seconds
const DEFAULT_TIMEOUT_SECS: u64 = 5;

/// Default number of concurrent probes within a batch
const DEFAULT_CONCURRENT_LIMIT: usize = 50;

/// Default descriptors per batch
const DEFAULT_BATCH_SIZE: usize = 50;

/// Configuration for the health prober
#[derive(Debug, Clone)]
pub struct ProberConfig {
    /// Timeout for each TCP connect
    pub timeout: Duration,
    /// Maximum concurrent probes within a batch
    pub concurrent_limit: usize,
    /// Descriptors per batch; the stop signal is checked between batches
    pub batch_size: usize,
}

impl Default for ProberConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            concurrent_limit: DEFAULT_CONCURRENT_LIMIT,
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }
}

impl ProberConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_concurrent_limit(mut self, concurrent_limit: usize) -> Self {
        self.concurrent_limit = concurrent_limit;
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }
}

/// Health prober for descriptor endpoints
pub struct HealthProber {
    config: ProberConfig,
    stop: StopSignal,
}

impl HealthProber {
    /// Create a prober with the given configuration and stop signal
    pub fn new(config: ProberConfig, stop: StopSignal) -> crate::Result<Self> {
        if config.concurrent_limit == 0 {
            return Err(Error::invalid_argument(
                "concurrent_limit must be at least 1",
            ));
        }
        if config.batch_size == 0 {
            return Err(Error::invalid_argument("batch_size must be at least 1"));
        }
        Ok(Self { config, stop })
    }

    /// Check descriptors in batches, one verdict per descriptor
    ///
    /// The stop signal is consulted between batches only; a batch in
    /// flight always runs to completion, so an interrupted run returns
    /// complete verdicts for every batch that started.
    pub async fn check_many(&self, descriptors: &[Descriptor]) -> Vec<HealthVerdict> {
        let mut verdicts = Vec::with_capacity(descriptors.len());

        for (index, batch) in descriptors.chunks(self.config.batch_size).enumerate() {
            if self.stop.is_stopped() {
                debug!(
                    batch = index + 1,
                    checked = verdicts.len(),
                    "health check stopped between batches"
                );
                break;
            }
            verdicts.extend(self.check_batch(batch).await);
        }

        verdicts
    }

    async fn check_batch(&self, batch: &[Descriptor]) -> Vec<HealthVerdict> {
        let semaphore = Arc::new(Semaphore::new(self.config.concurrent_limit));

        stream::iter(batch.iter().cloned())
            .map(|descriptor| {
                let sem = Arc::clone(&semaphore);
                async move {
                    // Semaphore acquire only fails if the semaphore is closed,
                    // which won't happen here since we own the Arc for the
                    // duration of the batch.
                    let _permit = sem
                        .acquire()
                        .await
                        .expect("Semaphore closed unexpectedly");
                    self.check_one(descriptor).await
                }
            })
            .buffer_unordered(self.config.concurrent_limit)
            .collect()
            .await
    }

    /// Check a single descriptor
    ///
    /// A descriptor that fails to decode is reported invalid without any
    /// network call. Otherwise one TCP connect is attempted; the socket is
    /// closed before the verdict is returned on every path.
    pub async fn check_one(&self, descriptor: Descriptor) -> HealthVerdict {
        let endpoint = match DescriptorDecoder::decode(&descriptor) {
            Ok(endpoint) => endpoint,
            Err(e) => return HealthVerdict::invalid(descriptor, e.to_string()),
        };

        let started = Instant::now();
        let connect = TcpStream::connect((endpoint.host.as_str(), endpoint.port));

        match tokio::time::timeout(self.config.timeout, connect).await {
            Ok(Ok(stream)) => {
                let latency = started.elapsed().as_millis() as u64;
                drop(stream);
                HealthVerdict::healthy(descriptor, latency)
            }
            Ok(Err(e)) => HealthVerdict::unreachable(descriptor, e.to_string()),
            Err(_) => HealthVerdict::timeout(descriptor),
        }
    }
}

/// Filter verdicts by minimum quality
///
/// Invalid descriptors are always dropped; `exclude_unhealthy` also drops
/// everything that did not connect.
pub fn filter_by_quality(
    verdicts: Vec<HealthVerdict>,
    min_quality: u8,
    exclude_unhealthy: bool,
) -> Vec<HealthVerdict> {
    verdicts
        .into_iter()
        .filter(|v| {
            if v.status == HealthStatus::Invalid {
                return false;
            }
            if exclude_unhealthy && !v.is_healthy() {
                return false;
            }
            v.quality_score >= min_quality
        })
        .collect()
}

/// Sort by quality score descending; faster endpoints first within a score
pub fn sort_by_quality(verdicts: &mut [HealthVerdict]) {
    verdicts.sort_by(|a, b| {
        b.quality_score.cmp(&a.quality_score).then_with(|| {
            a.latency_ms
                .unwrap_or(u64::MAX)
                .cmp(&b.latency_ms.unwrap_or(u64::MAX))
        })
    });
}
