//! Command-line interface for claimcheck.
//!
//! Provides commands for verifying claims, inspecting past jobs,
//! maintaining the search cache, and showing the resolved configuration.

use std::io::{self, IsTerminal, Read};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use uuid::Uuid;

use crate::adapters::{ChatReasoner, HttpFetcher, HttpSearchProvider, WebhookNotifier};
use crate::analysis::{AnalysisMetrics, HybridAnalysis, RemoteAnalysis};
use crate::config::{self, ResolvedConfig};
use crate::core::{EventStore, ProviderHealthMonitor, ResearchController, SearchCache};
use crate::domain::{EventType, JobResult};

/// claimcheck - Evidence-grounded claim verification
#[derive(Parser, Debug)]
#[command(name = "claimcheck")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Verify a claim, question, article text, or article URL
    Verify {
        /// Text or URL to verify (reads --file or stdin if omitted)
        input: Option<String>,

        /// Read input from a file
        #[arg(short, long)]
        file: Option<PathBuf>,

        /// Print the full result as JSON
        #[arg(long)]
        json: bool,

        /// Bypass the search result cache
        #[arg(long)]
        no_cache: bool,

        /// Print per-analysis-point call metrics after the job
        #[arg(long)]
        metrics: bool,
    },

    /// Show the result and audit trail of a job
    Status {
        /// Job ID (UUID)
        job_id: String,

        /// Print every recorded event
        #[arg(long)]
        events: bool,
    },

    /// List recent jobs
    Jobs {
        /// Maximum number of jobs to show
        #[arg(short, long, default_value = "10")]
        limit: usize,
    },

    /// Search cache maintenance
    Cache {
        #[command(subcommand)]
        command: CacheCommands,
    },

    /// Show resolved configuration
    Config,
}

#[derive(Subcommand, Debug)]
pub enum CacheCommands {
    /// Delete expired entries
    Purge,
    /// Show entry counts
    Stats,
}

impl Cli {
    /// Execute the CLI command
    pub async fn execute(self) -> Result<()> {
        match self.command {
            Commands::Verify {
                input,
                file,
                json,
                no_cache,
                metrics,
            } => verify(input, file, json, no_cache, metrics).await,
            Commands::Status { job_id, events } => show_status(&job_id, events).await,
            Commands::Jobs { limit } => list_jobs(limit).await,
            Commands::Cache { command } => match command {
                CacheCommands::Purge => purge_cache(),
                CacheCommands::Stats => cache_stats(),
            },
            Commands::Config => show_config(),
        }
    }
}

fn read_input(input: Option<String>, file: Option<PathBuf>) -> Result<String> {
    if let Some(text) = input {
        return Ok(text);
    }
    if let Some(path) = file {
        return std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read input file: {}", path.display()));
    }
    if io::stdin().is_terminal() {
        anyhow::bail!("No input provided. Pass text or a URL, use --file <path>, or pipe to stdin");
    }

    let mut buffer = String::new();
    io::stdin()
        .read_to_string(&mut buffer)
        .context("Failed to read from stdin")?;
    Ok(buffer)
}

/// Wire collaborators from configuration into a controller
fn build_controller(
    cfg: &ResolvedConfig,
    use_cache: bool,
) -> Result<(ResearchController, Arc<AnalysisMetrics>)> {
    let settings = &cfg.settings;

    let search_config = cfg.search_config().context(
        "No search provider configured. Set providers.search.endpoint in .claimcheck/config.yaml",
    )?;

    let mut health = ProviderHealthMonitor::new(settings.breaker.clone());
    if let Some(url) = cfg.webhook_url() {
        let timeout = Duration::from_secs(settings.breaker.notify_timeout_seconds);
        health = health.with_notifier(Arc::new(WebhookNotifier::new(url, timeout)));
    }
    let health = Arc::new(health);

    let metrics = Arc::new(AnalysisMetrics::new(settings.analysis.metrics_capacity));
    let remote = match cfg.chat_config() {
        Some(chat) => Some(RemoteAnalysis::new(Arc::new(ChatReasoner::new(chat)), &settings.analysis)),
        None => {
            eprintln!("[No reasoning provider key set; using heuristic analysis only]");
            None
        }
    };
    let analysis = Arc::new(HybridAnalysis::new(
        remote,
        &settings.analysis,
        Arc::clone(&health),
        Arc::clone(&metrics),
    ));

    let mut controller = ResearchController::new(
        Arc::new(HttpSearchProvider::new(search_config)),
        Arc::new(HttpFetcher::new()),
        analysis,
        health,
        cfg.controller_config(),
    );

    if use_cache && settings.cache.enabled {
        let cache = SearchCache::open(&cfg.cache_path, settings.cache.ttl())
            .with_context(|| format!("Failed to open search cache: {}", cfg.cache_path.display()))?;
        controller = controller.with_cache(Arc::new(cache));
    }

    Ok((controller, metrics))
}

async fn verify(
    input: Option<String>,
    file: Option<PathBuf>,
    json: bool,
    no_cache: bool,
    show_metrics: bool,
) -> Result<()> {
    let input = read_input(input, file)?;
    let cfg = config::config()?;
    let (controller, metrics) = build_controller(cfg, !no_cache)?;

    let mut job = controller.new_job(&input);
    let store = EventStore::open(job.id).await?;
    eprintln!("[Job {}]", job.id);

    let outcome = controller.run_job(&mut job).await;
    store.append_all(&job.events).await?;

    if show_metrics {
        print_metrics(&metrics);
    }

    match outcome {
        Ok(result) => {
            store.store_result(&result).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&result)?);
            } else {
                print_result(&result);
            }
            eprintln!("\n[Job {} completed]", job.id);
            Ok(())
        }
        Err(e) => {
            eprintln!("\n[Job {} failed: {}]", job.id, e);
            std::process::exit(1);
        }
    }
}

fn print_result(result: &JobResult) {
    let verdict = &result.verdict;
    println!(
        "Verdict: {} ({}% true, {}% confidence)",
        verdict.label, verdict.truth_percentage, verdict.confidence
    );
    println!("{}", result.summary);

    if !result.claim_verdicts.is_empty() {
        println!("\nClaims:");
        for cv in &result.claim_verdicts {
            let text = result
                .claims
                .iter()
                .find(|c| c.id == cv.claim_id)
                .map(|c| c.text.as_str())
                .unwrap_or("");
            let primary = if verdict.primary_claim_id.as_deref() == Some(cv.claim_id.as_str()) {
                "*"
            } else {
                " "
            };
            println!(
                " {}{:<4} {:>3}% / {:>3}%  {}",
                primary, cv.claim_id, cv.truth_percentage, cv.confidence, text
            );
        }
    }

    if result.context_verdicts.len() > 1 {
        println!("\nContexts:");
        for cv in &result.context_verdicts {
            println!(
                "  {:<20} {} ({}%)",
                cv.context_name, cv.verdict.label, cv.verdict.truth_percentage
            );
        }
    }

    if !result.evidence.is_empty() {
        println!("\nSources:");
        for source in result.sources.iter().filter(|s| s.fetch_success) {
            let used = result.evidence.iter().filter(|e| e.source_id == source.id).count();
            if used > 0 {
                println!("  {:<4} {} ({} item(s))", source.id, source.url, used);
            }
        }
    }

    if !result.warnings.is_empty() {
        println!("\nWarnings:");
        for warning in &result.warnings {
            println!("  - {}", warning);
        }
    }

    let stats = &result.budget_stats;
    println!(
        "\nBudget: {} iteration(s), {} search(es), {} fetch(es), {} tokens{}",
        stats.iterations,
        stats.searches,
        stats.fetches,
        stats.tokens_used,
        if stats.budget_exceeded { " (ceiling reached)" } else { "" }
    );
}

fn print_metrics(metrics: &AnalysisMetrics) {
    let summary = metrics.summary();
    if summary.is_empty() {
        return;
    }
    eprintln!(
        "\n{:<22} {:>6} {:>8} {:>9} {:>8} {:>8} {:>8}",
        "POINT", "CALLS", "SUCCESS", "FALLBACK", "P50 MS", "P95 MS", "RETRIES"
    );
    for s in summary {
        eprintln!(
            "{:<22} {:>6} {:>7.0}% {:>8.0}% {:>8} {:>8} {:>8.2}",
            s.point.as_str(),
            s.calls,
            s.success_rate * 100.0,
            s.fallback_rate * 100.0,
            s.p50_latency_ms,
            s.p95_latency_ms,
            s.avg_retries
        );
    }
}

/// Show the outcome and audit trail of a job
async fn show_status(job_id_str: &str, show_events: bool) -> Result<()> {
    let job_id = Uuid::parse_str(job_id_str).with_context(|| format!("Invalid job ID: {}", job_id_str))?;

    let store = EventStore::open(job_id).await?;
    let events = store.replay().await?;
    if events.is_empty() {
        anyhow::bail!("No job found with ID {}", job_id);
    }

    println!("Job ID: {}", job_id);
    match store.load_result().await? {
        Some(result) => {
            println!("State: {}", if result.degraded { "completed (degraded)" } else { "completed" });
            println!("Started: {}", result.started_at);
            println!("Completed: {}", result.completed_at);
            println!(
                "Verdict: {} ({}% true, {}% confidence)",
                result.verdict.label, result.verdict.truth_percentage, result.verdict.confidence
            );
            println!("Summary: {}", result.summary);
        }
        None => {
            let state = match events.iter().rev().find(|e| e.event_type == EventType::JobFailed) {
                Some(failed) => format!("failed: {}", failed.error.as_deref().unwrap_or(&failed.summary)),
                None => "incomplete".to_string(),
            };
            println!("State: {}", state);
            println!("Started: {}", events[0].timestamp);
        }
    }
    println!("Events: {}", events.len());

    if show_events {
        println!();
        for event in &events {
            let duration = event.duration_ms.map(|ms| format!(" ({}ms)", ms)).unwrap_or_default();
            println!(
                "  {} [{}#{}] {:?}: {}{}",
                event.timestamp.format("%H:%M:%S%.3f"),
                event.phase,
                event.iteration,
                event.event_type,
                event.summary,
                duration
            );
            if let Some(error) = &event.error {
                println!("      error: {}", error);
            }
        }
    }

    Ok(())
}

/// List recent jobs
async fn list_jobs(limit: usize) -> Result<()> {
    let jobs = EventStore::list_jobs().await?;

    if jobs.is_empty() {
        println!("No jobs found");
        return Ok(());
    }

    println!("{:<38} {:<14} {:<12} {}", "JOB ID", "VERDICT", "STATE", "INPUT");
    println!("{}", "-".repeat(100));

    for job_id in jobs.into_iter().take(limit) {
        let store = EventStore::open(job_id).await?;
        match store.load_result().await? {
            Some(result) => {
                let state = if result.degraded { "degraded" } else { "completed" };
                println!(
                    "{:<38} {:<14} {:<12} {}",
                    job_id,
                    result.verdict.label.as_str(),
                    state,
                    preview(&result.input, 40)
                );
            }
            None => {
                let failed = store.last_event_of_type(EventType::JobFailed).await?.is_some();
                let state = if failed { "failed" } else { "incomplete" };
                println!("{:<38} {:<14} {:<12}", job_id, "-", state);
            }
        }
    }

    Ok(())
}

fn preview(text: &str, max_chars: usize) -> String {
    let line = text.lines().next().unwrap_or("").trim();
    if line.chars().count() > max_chars {
        let cut: String = line.chars().take(max_chars).collect();
        format!("{}...", cut)
    } else {
        line.to_string()
    }
}

fn open_cache(cfg: &ResolvedConfig) -> Result<SearchCache> {
    SearchCache::open(&cfg.cache_path, cfg.settings.cache.ttl())
        .with_context(|| format!("Failed to open search cache: {}", cfg.cache_path.display()))
}

fn purge_cache() -> Result<()> {
    let cfg = config::config()?;
    let removed = open_cache(cfg)?.purge_expired()?;
    println!("Removed {} expired cache entr{}", removed, if removed == 1 { "y" } else { "ies" });
    Ok(())
}

fn cache_stats() -> Result<()> {
    let cfg = config::config()?;
    let stats = open_cache(cfg)?.stats()?;
    println!("Cache: {}", cfg.cache_path.display());
    println!("  Entries: {}", stats.entries);
    println!("  Live:    {}", stats.live);
    println!("  Expired: {}", stats.entries.saturating_sub(stats.live));
    println!("  TTL:     {} day(s)", cfg.settings.cache.ttl_days);
    Ok(())
}

/// Show the resolved configuration (for debugging)
fn show_config() -> Result<()> {
    let cfg = config::config()?;

    println!(
        "Config file: {}",
        cfg.config_file
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "(none - using defaults)".to_string())
    );
    println!();
    println!("Paths:");
    println!("  Home:  {}", cfg.home.display());
    println!("  Jobs:  {}", cfg.jobs_dir().display());
    println!("  Cache: {}", cfg.cache_path.display());
    println!();
    println!("Providers:");
    println!(
        "  Reasoning: {}",
        match (&cfg.settings.providers.reasoning, cfg.chat_config()) {
            (Some(r), Some(_)) => format!("{} ({})", r.model, r.base_url),
            (Some(r), None) => format!("{} (key ${} not set; heuristic only)", r.model, r.api_key_env),
            (None, _) => "(none; heuristic only)".to_string(),
        }
    );
    println!(
        "  Search:    {}",
        cfg.settings
            .providers
            .search
            .as_ref()
            .map(|s| s.endpoint.clone())
            .unwrap_or_else(|| "(not configured)".to_string())
    );
    println!("  Webhook:   {}", cfg.webhook_url().unwrap_or("(none)"));
    println!();
    println!("Settings:");
    let yaml = serde_yaml::to_string(&cfg.settings).context("Failed to render settings")?;
    for line in yaml.lines() {
        println!("  {}", line);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_verify_args() {
        let cli = Cli::try_parse_from(["claimcheck", "verify", "The bridge opened in 1937", "--no-cache"]).unwrap();
        match cli.command {
            Commands::Verify { input, no_cache, json, .. } => {
                assert_eq!(input.as_deref(), Some("The bridge opened in 1937"));
                assert!(no_cache);
                assert!(!json);
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_cache_subcommands() {
        let cli = Cli::try_parse_from(["claimcheck", "cache", "purge"]).unwrap();
        assert!(matches!(
            cli.command,
            Commands::Cache {
                command: CacheCommands::Purge
            }
        ));
    }

    #[test]
    fn test_preview_truncates_first_line() {
        assert_eq!(preview("short", 10), "short");
        assert_eq!(preview("abcdefghijkl\nsecond", 5), "abcde...");
    }
}
