use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use proxy_scout::cache::CacheManager;
use proxy_scout::finder::{ErrorMode, FinderConfig, HealthOptions, ProxyFinder};
use proxy_scout::proxy::{
    sort_by_quality, DescriptorExtractor, HealthProber, HealthStatus, HealthVerdict, ProberConfig,
};
use proxy_scout::fetch::FetcherConfig;
use proxy_scout::signal::StopSignal;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

/// Exit status for a user-requested interruption, distinct from both
/// success (0) and fatal errors (1)
const EXIT_INTERRUPTED: u8 = 130;

/// Aggregate proxy descriptors and check endpoint health
#[derive(Parser)]
#[command(name = "proxy-scout")]
#[command(about = "Aggregate proxy descriptors from remote sources and check endpoint health")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Cache backend (memory, disk)
    #[arg(long, global = true, default_value = "memory")]
    cache: String,

    /// Path of the disk cache database
    #[arg(long, global = true, default_value = "proxy-scout-cache.db")]
    cache_path: PathBuf,

    /// Cache TTL in seconds
    #[arg(long, global = true, default_value = "3600")]
    cache_ttl: u64,
}

#[derive(Subcommand)]
enum Commands {
    /// Aggregate descriptors from sources, optionally checking health
    Fetch {
        /// Output file for descriptors
        #[arg(short, long)]
        output: Option<PathBuf>,
        /// Include GitHub repository search
        #[arg(short, long)]
        search: bool,
        /// Limit number of descriptors
        #[arg(short, long)]
        limit: Option<usize>,
        /// Probe each descriptor before output
        #[arg(long)]
        check_health: bool,
        /// Minimum quality score to keep (with --check-health)
        #[arg(long, default_value = "0")]
        min_score: u8,
        /// Drop descriptors that did not connect (with --check-health)
        #[arg(long)]
        healthy_only: bool,
        /// Timeout in seconds for fetches and probes
        #[arg(long, default_value = "10")]
        timeout: u64,
        /// Number of concurrent requests
        #[arg(short = 'n', long, default_value = "50")]
        concurrency: usize,
        /// Retry budget per request
        #[arg(long, default_value = "3")]
        retries: u32,
        /// Fail on the first source error instead of skipping it
        #[arg(long)]
        strict: bool,
    },
    /// Check descriptors from a file and report health
    Check {
        /// Input file containing descriptors, one per line
        input: PathBuf,
        /// Output file for descriptors that passed
        #[arg(short, long)]
        output: Option<PathBuf>,
        /// Timeout in seconds per probe
        #[arg(long, default_value = "5")]
        timeout: u64,
        /// Number of concurrent probes
        #[arg(short = 'n', long, default_value = "50")]
        concurrency: usize,
        /// Descriptors per batch
        #[arg(long, default_value = "50")]
        batch_size: usize,
        /// Minimum quality score for the output file
        #[arg(long, default_value = "0")]
        min_score: u8,
    },
    /// Fetch and print per-protocol statistics only
    Stats {
        /// Include GitHub repository search
        #[arg(short, long)]
        search: bool,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let stop = StopSignal::new();
    {
        let stop = stop.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                eprintln!("\nStop requested, finishing in-flight work...");
                stop.request_stop();
            }
        });
    }

    match run(cli, stop.clone()).await {
        Ok(()) => {
            if stop.is_stopped() {
                eprintln!("Interrupted; partial results were preserved.");
                ExitCode::from(EXIT_INTERRUPTED)
            } else {
                ExitCode::SUCCESS
            }
        }
        Err(e) => {
            eprintln!("Error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

fn init_tracing(verbose: bool) {
    let default_filter = if verbose { "proxy_scout=debug,info" } else { "warn" };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_filter));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

async fn run(cli: Cli, stop: StopSignal) -> Result<()> {
    let cache_ttl = Duration::from_secs(cli.cache_ttl);
    let cache = match cli.cache.as_str() {
        "memory" => CacheManager::in_memory(),
        "disk" => CacheManager::on_disk(&cli.cache_path, cache_ttl).await,
        other => bail!("unknown cache backend: {other}. Use: memory, disk"),
    };

    match cli.command {
        Commands::Fetch {
            output,
            search,
            limit,
            check_health,
            min_score,
            healthy_only,
            timeout,
            concurrency,
            retries,
            strict,
        } => {
            let timeout = Duration::from_secs(timeout);
            let config = FinderConfig::new()
                .with_cache_ttl(cache_ttl)
                .with_error_mode(if strict {
                    ErrorMode::Strict
                } else {
                    ErrorMode::Lenient
                })
                .with_fetcher(
                    FetcherConfig::new()
                        .with_timeout(timeout)
                        .with_max_concurrent(concurrency)
                        .with_max_retries(retries),
                )
                .with_prober(
                    ProberConfig::new()
                        .with_timeout(timeout)
                        .with_concurrent_limit(concurrency),
                );

            let finder = ProxyFinder::new(config, cache, stop)?;

            if check_health {
                let report = finder
                    .gather_with_health(
                        search,
                        HealthOptions {
                            min_quality: min_score,
                            exclude_unhealthy: healthy_only,
                        },
                    )
                    .await?;

                print_failures(&report.failures);
                print_verdict_summary(&report.verdicts);

                let mut descriptors: Vec<_> = report
                    .verdicts
                    .iter()
                    .map(|v| v.descriptor.clone())
                    .collect();
                if let Some(limit) = limit {
                    descriptors.truncate(limit);
                }

                if let Some(path) = output {
                    let saved = DescriptorExtractor::save_to_file(&descriptors, &path)?;
                    println!("Saved {} descriptors to {:?}", saved, path);
                } else {
                    for verdict in report.verdicts.iter().take(descriptors.len()) {
                        match verdict.latency_ms {
                            Some(latency) => println!(
                                "{:>3}  {:>6}ms  {}",
                                verdict.quality_score, latency, verdict.descriptor
                            ),
                            None => println!(
                                "{:>3}  {:>8}  {}",
                                verdict.quality_score, verdict.status, verdict.descriptor
                            ),
                        }
                    }
                }
            } else {
                let report = finder.gather(search).await?;
                print_failures(&report.failures);

                let mut descriptors = report.descriptors;
                if let Some(limit) = limit {
                    descriptors.truncate(limit);
                }
                println!("Total unique descriptors: {}", descriptors.len());

                if let Some(path) = output {
                    let saved = DescriptorExtractor::save_to_file(&descriptors, &path)?;
                    println!("Saved {} descriptors to {:?}", saved, path);
                } else {
                    for descriptor in &descriptors {
                        println!("{}", descriptor);
                    }
                }
            }

            let cache_stats = finder.cache_stats();
            if cache_stats.hits + cache_stats.misses > 0 {
                println!(
                    "Cache: {} hits, {} misses ({:.0}% hit rate)",
                    cache_stats.hits,
                    cache_stats.misses,
                    cache_stats.hit_rate() * 100.0
                );
            }
        }

        Commands::Check {
            input,
            output,
            timeout,
            concurrency,
            batch_size,
            min_score,
        } => {
            let descriptors = DescriptorExtractor::load_from_file(&input)?;
            println!("Loaded {} descriptors from {:?}", descriptors.len(), input);
            println!(
                "Checking with {} concurrent probes, timeout: {}s",
                concurrency, timeout
            );

            let config = ProberConfig::new()
                .with_timeout(Duration::from_secs(timeout))
                .with_concurrent_limit(concurrency)
                .with_batch_size(batch_size);
            let prober = HealthProber::new(config, stop)?;

            let mut verdicts = prober.check_many(&descriptors).await;
            sort_by_quality(&mut verdicts);
            print_verdict_summary(&verdicts);

            for verdict in verdicts.iter().filter(|v| v.is_healthy()) {
                if let Some(latency) = verdict.latency_ms {
                    println!(
                        "{:>3}  {:>6}ms  {}",
                        verdict.quality_score, latency, verdict.descriptor
                    );
                }
            }

            if let Some(path) = output {
                let passed: Vec<_> = verdicts
                    .iter()
                    .filter(|v| v.is_healthy() && v.quality_score >= min_score)
                    .map(|v| v.descriptor.clone())
                    .collect();
                let saved = DescriptorExtractor::save_to_file(&passed, &path)?;
                println!("Saved {} passing descriptors to {:?}", saved, path);
            }
        }

        Commands::Stats { search } => {
            let finder = ProxyFinder::new(
                FinderConfig::new().with_cache_ttl(cache_ttl),
                cache,
                stop,
            )?;
            let report = finder.gather(search).await?;

            print_failures(&report.failures);
            println!("Total servers: {}", report.descriptors.len());
            println!("\nBy protocol:");
            let mut counts: Vec<_> = report.protocol_counts().into_iter().collect();
            counts.sort_by(|a, b| b.1.cmp(&a.1));
            for (protocol, count) in counts {
                println!("  {}: {}", protocol, count);
            }

            if search {
                if let Some(rate) = finder.rate_limit_status() {
                    if let (Some(remaining), Some(limit)) = (rate.remaining, rate.limit) {
                        println!("\nAPI calls remaining: {}/{}", remaining, limit);
                    }
                }
            }
        }
    }

    Ok(())
}

fn print_failures(failures: &BTreeMap<&'static str, usize>) {
    if failures.is_empty() {
        return;
    }
    let total: usize = failures.values().sum();
    let breakdown: Vec<String> = failures
        .iter()
        .map(|(kind, count)| format!("{kind}: {count}"))
        .collect();
    eprintln!("{} source(s) failed ({})", total, breakdown.join(", "));
}

fn print_verdict_summary(verdicts: &[HealthVerdict]) {
    let count = |status: HealthStatus| verdicts.iter().filter(|v| v.status == status).count();
    println!(
        "Results: {} healthy, {} unreachable, {} timeout, {} invalid",
        count(HealthStatus::Healthy),
        count(HealthStatus::Unreachable),
        count(HealthStatus::Timeout),
        count(HealthStatus::Invalid),
    );
}
