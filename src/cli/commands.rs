//! CLI command definitions using clap.
//!
//! Defines the main CLI structure and subcommands:
//! - defaults: print the per-provider limit table
//! - classify: show how an error text is treated by the retry loop
//! - simulate: drive a burst of chat and batch calls through one limiter

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use quota_governor::Provider;

/// quota-governor - Priority-aware rate limiting for LLM provider calls
#[derive(Parser, Debug)]
#[command(name = "quota-governor")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Optional config file path
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,
}

impl Cli {
    /// Check if verbose mode is enabled
    pub fn is_verbose(&self) -> bool {
        self.verbose
    }
}

/// Main subcommands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Print the effective limits for each provider
    Defaults {
        /// Only show this provider (gemini_free, groq, huggingface)
        #[arg(short, long)]
        provider: Option<Provider>,

        /// Emit JSON instead of a table
        #[arg(long)]
        json: bool,
    },

    /// Classify an error message the way the retry loop would
    Classify {
        /// Error text returned by a provider call
        text: String,
    },

    /// Simulate a burst of chat and batch calls against one limiter
    Simulate {
        /// Provider whose limits to use
        #[arg(short, long, default_value = "groq")]
        provider: Provider,

        /// Number of interactive (priority 0) calls
        #[arg(long, default_value_t = 3)]
        chat: usize,

        /// Number of batch (priority 10) calls
        #[arg(long, default_value_t = 6)]
        batch: usize,

        /// Override bucket capacity
        #[arg(long)]
        capacity: Option<u32>,

        /// Override refill rate (tokens per second)
        #[arg(long)]
        refill: Option<f64>,

        /// Every Nth call fails with a 429 carrying a retry hint (0 = never)
        #[arg(long, default_value_t = 0)]
        throttle_every: usize,

        /// Simulated call latency in milliseconds
        #[arg(long, default_value_t = 50)]
        latency_ms: u64,
    },
}
