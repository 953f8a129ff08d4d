//! quota-governor - Priority-aware admission control for LLM provider calls
//!
//! Protects rate-limited providers from quota violations while letting
//! interactive requests overtake batch work: a token bucket and cooldown
//! breaker per provider usage-site, an async priority queue in front of them,
//! and a retry loop that classifies provider failures.

pub mod config;
pub mod error;
pub mod governor;

pub use config::Config;
pub use error::{ExecuteError, GovernorError, Result};
pub use governor::{LimiterRegistry, Provider, RateLimiter};
