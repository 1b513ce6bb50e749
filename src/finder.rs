//! Orchestration: aggregate descriptors, deduplicate, probe, export
//!
//! `ProxyFinder` drives the fetch engine, cache layer and health prober
//! against the configured sources. All stages observe the shared stop
//! signal, so an interrupted run still hands back everything collected
//! up to the last checkpoint.

use crate::cache::{make_key, CacheManager, CacheStats};
use crate::error::Result;
use crate::fetch::{FetchEngine, FetchRequest, FetchStats, FetcherConfig};
use crate::proxy::extract::DescriptorExtractor;
use crate::proxy::models::{Descriptor, HealthVerdict, Protocol};
use crate::proxy::prober::{filter_by_quality, sort_by_quality, HealthProber, ProberConfig};
use crate::signal::StopSignal;
use crate::sources::{curated_urls, GithubClient, RateLimitStatus};
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::{info, warn};

/// Default GitHub search keywords
const DEFAULT_KEYWORDS: &[&str] = &["free-v2ray", "v2ray-config"];

/// Default number of repositories harvested per keyword
const DEFAULT_MAX_REPOS: usize = 10;

/// How source-level failures propagate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ErrorMode {
    /// Log per-source failures, skip them, and report partial results
    #[default]
    Lenient,
    /// Surface the first failure to the caller
    Strict,
}

/// Configuration for the orchestrator
#[derive(Debug, Clone)]
pub struct FinderConfig {
    /// Direct subscription URLs to harvest
    pub sources: Vec<String>,
    /// Keywords for the GitHub repository search
    pub github_keywords: Vec<String>,
    /// Repositories to harvest per keyword
    pub max_repos: usize,
    /// TTL for cached search and listing results
    pub cache_ttl: Duration,
    /// Failure propagation mode
    pub error_mode: ErrorMode,
    /// Fetch engine settings
    pub fetcher: FetcherConfig,
    /// Health prober settings
    pub prober: ProberConfig,
}

impl Default for FinderConfig {
    fn default() -> Self {
        Self {
            sources: curated_urls(),
            github_keywords: DEFAULT_KEYWORDS.iter().map(|s| s.to_string()).collect(),
            max_repos: DEFAULT_MAX_REPOS,
            cache_ttl: Duration::from_secs(3600),
            error_mode: ErrorMode::default(),
            fetcher: FetcherConfig::default(),
            prober: ProberConfig::default(),
        }
    }
}

impl FinderConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_sources(mut self, sources: Vec<String>) -> Self {
        self.sources = sources;
        self
    }

    pub fn with_github_keywords(mut self, keywords: Vec<String>) -> Self {
        self.github_keywords = keywords;
        self
    }

    pub fn with_max_repos(mut self, max_repos: usize) -> Self {
        self.max_repos = max_repos;
        self
    }

    pub fn with_cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache_ttl = ttl;
        self
    }

    pub fn with_error_mode(mut self, mode: ErrorMode) -> Self {
        self.error_mode = mode;
        self
    }

    pub fn with_fetcher(mut self, fetcher: FetcherConfig) -> Self {
        self.fetcher = fetcher;
        self
    }

    pub fn with_prober(mut self, prober: ProberConfig) -> Self {
        self.prober = prober;
        self
    }
}

/// Options for the probing stage
#[derive(Debug, Clone, Copy, Default)]
pub struct HealthOptions {
    /// Minimum quality score to keep
    pub min_quality: u8,
    /// Drop everything that did not connect
    pub exclude_unhealthy: bool,
}

/// Aggregation outcome: deduplicated descriptors plus failure counts by kind
#[derive(Debug, Default)]
pub struct GatherReport {
    pub descriptors: Vec<Descriptor>,
    pub failures: BTreeMap<&'static str, usize>,
}

impl GatherReport {
    /// Count descriptors per protocol
    pub fn protocol_counts(&self) -> BTreeMap<Protocol, usize> {
        DescriptorExtractor::protocol_counts(&self.descriptors)
    }

    fn absorb_failures(&mut self, failures: BTreeMap<&'static str, usize>) {
        for (kind, count) in failures {
            *self.failures.entry(kind).or_insert(0) += count;
        }
    }
}

/// Probing outcome: quality-sorted verdicts plus aggregation failures
#[derive(Debug, Default)]
pub struct HealthReport {
    pub verdicts: Vec<HealthVerdict>,
    pub failures: BTreeMap<&'static str, usize>,
}

/// Descriptor aggregator and health-check orchestrator
pub struct ProxyFinder {
    config: FinderConfig,
    fetcher: FetchEngine,
    github: GithubClient,
    cache: CacheManager,
    prober: HealthProber,
    stop: StopSignal,
}

impl ProxyFinder {
    /// Create a finder; the GitHub client picks up `GITHUB_TOKEN` if set
    pub fn new(config: FinderConfig, cache: CacheManager, stop: StopSignal) -> Result<Self> {
        let fetcher = FetchEngine::new(config.fetcher.clone(), stop.clone())?;
        let prober = HealthProber::new(config.prober.clone(), stop.clone())?;
        let github = GithubClient::from_env()?;

        Ok(Self {
            config,
            fetcher,
            github,
            cache,
            prober,
            stop,
        })
    }

    /// Replace the GitHub client (mock servers in tests)
    pub fn with_github_client(mut self, github: GithubClient) -> Self {
        self.github = github;
        self
    }

    /// Clone of the stop signal observed by every stage
    pub fn stop_signal(&self) -> StopSignal {
        self.stop.clone()
    }

    /// Fetch descriptor lists from direct URLs
    ///
    /// In lenient mode failed URLs are counted and skipped; in strict mode
    /// the first failure aborts the call.
    pub async fn descriptors_from_urls(&self, urls: &[String]) -> Result<GatherReport> {
        let requests = urls
            .iter()
            .map(|url| FetchRequest::new(url.clone()))
            .collect();
        let results = self.fetcher.fetch_many(requests).await;

        let mut report = GatherReport::default();
        let mut raw = Vec::new();

        for result in results {
            let elapsed_ms = result.elapsed_ms;
            match result.outcome {
                Ok(bytes) => {
                    let text = String::from_utf8_lossy(&bytes);
                    let found = DescriptorExtractor::extract(&text);
                    info!(
                        url = %result.url,
                        count = found.len(),
                        elapsed_ms,
                        "source fetched"
                    );
                    raw.extend(found);
                }
                Err(err) => {
                    if self.config.error_mode == ErrorMode::Strict {
                        return Err(err);
                    }
                    warn!(url = %result.url, error = %err, "source fetch failed, skipping");
                    *report.failures.entry(err.kind().as_str()).or_insert(0) += 1;
                }
            }
        }

        report.descriptors = DescriptorExtractor::dedup(raw);
        Ok(report)
    }

    /// Fetch descriptor lists from the configured curated sources
    pub async fn descriptors_from_curated(&self) -> Result<GatherReport> {
        self.descriptors_from_urls(&self.config.sources).await
    }

    /// Search GitHub and harvest descriptor files from matching repositories
    ///
    /// Repository search and file listings go through the cache-aside
    /// layer, so repeated runs within the TTL spare the API quota.
    pub async fn descriptors_from_github(&self) -> Result<GatherReport> {
        let ttl = Some(self.config.cache_ttl);
        let mut report = GatherReport::default();
        let mut raw = Vec::new();

        for keyword in &self.config.github_keywords {
            if self.stop.is_stopped() {
                info!(collected = raw.len(), "GitHub search stopped by request");
                break;
            }

            let search_key = make_key(
                "github_search",
                &[keyword.as_str(), &self.config.max_repos.to_string()],
            );
            let repos = match self
                .cache
                .get_or_compute(&search_key, ttl, || async move {
                    self.github
                        .search_repos(&[keyword.as_str()], self.config.max_repos as u32)
                        .await
                })
                .await
            {
                Ok(repos) => repos,
                Err(err) => {
                    if self.config.error_mode == ErrorMode::Strict {
                        return Err(err);
                    }
                    warn!(keyword = %keyword, error = %err, "repository search failed, skipping");
                    *report.failures.entry(err.kind().as_str()).or_insert(0) += 1;
                    continue;
                }
            };

            let mut download_urls = Vec::new();
            for repo in &repos {
                if self.stop.is_stopped() {
                    break;
                }

                let files_key = make_key("repo_files", &[repo.full_name.as_str()]);
                let files = match self
                    .cache
                    .get_or_compute(&files_key, ttl, || async move {
                        self.github.list_config_files(&repo.full_name, "").await
                    })
                    .await
                {
                    Ok(files) => files,
                    Err(err) => {
                        if self.config.error_mode == ErrorMode::Strict {
                            return Err(err);
                        }
                        warn!(repo = %repo.full_name, error = %err, "file listing failed, skipping");
                        *report.failures.entry(err.kind().as_str()).or_insert(0) += 1;
                        continue;
                    }
                };

                download_urls.extend(files.into_iter().filter_map(|file| file.download_url));
            }

            let harvested = self.descriptors_from_urls(&download_urls).await?;
            raw.extend(harvested.descriptors);
            report.absorb_failures(harvested.failures);
        }

        report.descriptors = DescriptorExtractor::dedup(raw);
        Ok(report)
    }

    /// Aggregate from curated sources and optionally GitHub
    pub async fn gather(&self, use_github: bool) -> Result<GatherReport> {
        let mut report = self.descriptors_from_curated().await?;

        if use_github && !self.stop.is_stopped() {
            let github = self.descriptors_from_github().await?;
            report.descriptors = DescriptorExtractor::dedup(
                report.descriptors.into_iter().chain(github.descriptors),
            );
            report.absorb_failures(github.failures);
        }

        info!(
            total = report.descriptors.len(),
            failed_sources = report.failures.values().sum::<usize>(),
            "aggregation complete"
        );
        Ok(report)
    }

    /// Aggregate, then probe every descriptor and rank by quality
    pub async fn gather_with_health(
        &self,
        use_github: bool,
        options: HealthOptions,
    ) -> Result<HealthReport> {
        let report = self.gather(use_github).await?;

        info!(
            count = report.descriptors.len(),
            "starting health checks"
        );
        let verdicts = self.prober.check_many(&report.descriptors).await;

        let mut kept = filter_by_quality(verdicts, options.min_quality, options.exclude_unhealthy);
        sort_by_quality(&mut kept);

        Ok(HealthReport {
            verdicts: kept,
            failures: report.failures,
        })
    }

    /// Hit/miss counters of the cache layer
    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    /// Counters of the fetch engine
    pub fn fetch_stats(&self) -> FetchStats {
        self.fetcher.stats()
    }

    /// Last observed GitHub rate-limit window
    pub fn rate_limit_status(&self) -> Option<RateLimitStatus> {
        self.github.rate_limit_status()
    }
}
