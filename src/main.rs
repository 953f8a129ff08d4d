use clap::Parser;
use colored::*;
use eyre::{Context, Result};
use log::info;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::time::Instant;

mod cli;

use cli::Cli;
use cli::commands::Commands;
use quota_governor::Config;
use quota_governor::governor::{
    CallError, LimitConfig, LimitOverrides, LimiterRegistry, PRIORITY_CHAT, Provider, classify,
    parse_retry_hint,
};

/// Name of the limiter the simulate command drives.
const SIMULATION_LIMITER: &str = "simulate";

fn setup_logging(cli: &Cli, config: &Config) {
    let level = if cli.is_verbose() {
        "debug"
    } else {
        config.log_level.as_deref().unwrap_or("info")
    };

    // RUST_LOG still wins over the config file
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();
}

async fn run_application(cli: &Cli, config: &Config) -> Result<()> {
    info!("Starting application");

    if cli.is_verbose() {
        println!("{}", "Verbose mode enabled".yellow());
    }

    match &cli.command {
        Commands::Defaults { provider, json } => handle_defaults_command(*provider, *json, config),
        Commands::Classify { text } => handle_classify_command(text),
        Commands::Simulate {
            provider,
            chat,
            batch,
            capacity,
            refill,
            throttle_every,
            latency_ms,
        } => {
            let overrides = LimitOverrides {
                max_tokens: *capacity,
                refill_rate: *refill,
                ..Default::default()
            };
            let plan = SimulationPlan {
                provider: *provider,
                chat: *chat,
                batch: *batch,
                throttle_every: *throttle_every,
                latency: Duration::from_millis(*latency_ms),
            };
            handle_simulate_command(plan, overrides, config).await
        }
    }
}

fn handle_defaults_command(provider: Option<Provider>, json: bool, config: &Config) -> Result<()> {
    info!("Showing limits for {:?}", provider);
    let registry = LimiterRegistry::from_config(config);
    let providers: Vec<Provider> = match provider {
        Some(p) => vec![p],
        None => Provider::ALL.to_vec(),
    };
    let rows: Vec<(Provider, LimitConfig)> = providers
        .into_iter()
        .map(|p| (p, registry.config_for(p, None)))
        .collect();

    if json {
        let value: Vec<serde_json::Value> = rows
            .iter()
            .map(|(p, c)| {
                serde_json::json!({
                    "provider": p,
                    "max_tokens": c.max_tokens,
                    "refill_rate": c.refill_rate,
                    "requests_per_minute": c.requests_per_minute(),
                    "cooldown_after_429_secs": c.cooldown_after_429.as_secs_f64(),
                    "max_retries": c.max_retries,
                    "initial_backoff_secs": c.initial_backoff.as_secs_f64(),
                    "max_backoff_secs": c.max_backoff.as_secs_f64(),
                })
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&value).context("Failed to encode limits")?);
        return Ok(());
    }

    println!(
        "{:<12} {:>6} {:>7} {:>9} {:>8} {:>8} {:>8}",
        "provider".bold(),
        "burst".bold(),
        "rpm".bold(),
        "cooldown".bold(),
        "retries".bold(),
        "backoff".bold(),
        "max".bold()
    );
    for (p, c) in &rows {
        let marker = if config.providers.contains_key(p) { "*" } else { "" };
        println!(
            "{:<12} {:>6} {:>7.1} {:>8.0}s {:>8} {:>7.1}s {:>7.0}s",
            format!("{}{}", p, marker).cyan(),
            c.max_tokens,
            c.requests_per_minute(),
            c.cooldown_after_429.as_secs_f64(),
            c.max_retries,
            c.initial_backoff.as_secs_f64(),
            c.max_backoff.as_secs_f64()
        );
    }
    if rows.iter().any(|(p, _)| config.providers.contains_key(p)) {
        println!("{}", "* adjusted by config file".dimmed());
    }
    Ok(())
}

fn handle_classify_command(text: &str) -> Result<()> {
    info!("Classifying error text: {}", text);
    let class = classify(text);
    let label = match class {
        c if c.is_retryable() => c.to_string().yellow(),
        c => c.to_string().red(),
    };
    println!("{} {}", "Class:".green(), label);
    println!("{} {}", "Trips breaker:".green(), class.is_throttled());
    match parse_retry_hint(text) {
        Some(hint) => println!(
            "{} {:.0}s (margin included)",
            "Retry hint:".green(),
            hint.as_secs_f64()
        ),
        None => println!("{} none, exponential backoff applies", "Retry hint:".green()),
    }
    Ok(())
}

struct SimulationPlan {
    provider: Provider,
    chat: usize,
    batch: usize,
    throttle_every: usize,
    latency: Duration,
}

async fn handle_simulate_command(
    plan: SimulationPlan,
    overrides: LimitOverrides,
    config: &Config,
) -> Result<()> {
    overrides.validate().context("Invalid simulation limits")?;

    let registry = LimiterRegistry::from_config(config);
    let limiter = registry.get_with(SIMULATION_LIMITER, plan.provider, Some(&overrides));
    let limits = limiter.config();
    println!(
        "{} {} (burst {}, {:.1} rpm, {} chat + {} batch calls)",
        "Simulating:".green(),
        plan.provider,
        limits.max_tokens,
        limits.requests_per_minute(),
        plan.chat,
        plan.batch
    );

    let counter = Arc::new(AtomicUsize::new(0));
    let start = Instant::now();
    let mut tasks = Vec::new();

    // Batch work is submitted first so the chat calls have something to overtake.
    let waves = [
        ("batch", config.default_priority, plan.batch),
        ("chat", PRIORITY_CHAT, plan.chat),
    ];
    for (kind, priority, count) in waves {
        for i in 1..=count {
            let limiter = Arc::clone(&limiter);
            let counter = Arc::clone(&counter);
            let (latency, throttle_every) = (plan.latency, plan.throttle_every);
            tasks.push(tokio::spawn(async move {
                let result = limiter
                    .execute_with_retry(priority, || {
                        let counter = Arc::clone(&counter);
                        async move {
                            let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
                            tokio::time::sleep(latency).await;
                            if throttle_every > 0 && n % throttle_every == 0 {
                                Err(CallError::http(429, "Too Many Requests: retry after 2s"))
                            } else {
                                Ok(n)
                            }
                        }
                    })
                    .await;
                (format!("{}-{}", kind, i), start.elapsed(), result)
            }));
        }
    }

    let mut outcomes = Vec::with_capacity(tasks.len());
    for joined in futures::future::join_all(tasks).await {
        outcomes.push(joined.context("Simulation task panicked")?);
    }
    outcomes.sort_by_key(|(_, elapsed, _)| *elapsed);

    for (label, elapsed, result) in &outcomes {
        let outcome = match result {
            Ok(n) => format!("ok (call #{})", n).green(),
            Err(e) => e.to_string().red(),
        };
        println!("  {:>7.2}s  {:<10} {}", elapsed.as_secs_f64(), label, outcome);
    }

    let status = limiter.status();
    println!(
        "{} {:.2}/{} tokens, breaker {}, {} queued, {} calls made",
        "Final:".green(),
        status.tokens_available,
        status.capacity,
        if status.breaker_open { "open".red() } else { "closed".green() },
        status.queued,
        counter.load(Ordering::SeqCst)
    );
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    // Parse CLI arguments
    let cli = Cli::parse();

    // Load configuration
    let config = Config::load(cli.config.as_ref()).context("Failed to load configuration")?;

    setup_logging(&cli, &config);
    info!("Starting with config from: {:?}", cli.config);

    // Run the main application logic
    run_application(&cli, &config).await.context("Application failed")?;

    Ok(())
}
