//! Adaptive request governor for rate-limited LLM providers.
//!
//! This module provides:
//! - **TokenBucket**: burst capacity plus a fixed refill rate.
//! - **CircuitBreaker**: provider-wide cooldown after throttling signals.
//! - **PriorityScheduler**: async admission queue; chat (priority 0) is admitted
//!   before document parsing (priority 10) whenever both are waiting.
//! - **RateLimiter**: wraps a provider call with admission, failure
//!   classification and bounded retries.
//! - **LimiterRegistry**: one limiter per logical name.
//!
//! # Example
//!
//! ```ignore
//! use quota_governor::governor::{LimiterRegistry, Provider, PRIORITY_CHAT, registry};
//!
//! let limiters = LimiterRegistry::new();
//! let limiter = limiters.get(registry::RAG_GROQ, Provider::Groq);
//! let answer = limiter
//!     .execute_with_retry(PRIORITY_CHAT, || client.chat(messages.clone()))
//!     .await?;
//! ```

mod breaker;
mod bucket;
mod classify;
mod limiter;
mod provider;
pub mod registry;
mod scheduler;

pub use breaker::CircuitBreaker;
pub use bucket::TokenBucket;
pub use classify::{
    CallError, FailureClass, HINT_MARGIN, MAX_RETRY_HINT, ProviderError, classify, parse_retry_hint,
    retry_hint,
};
pub use limiter::{DEFAULT_PRIORITY, LimiterStatus, PRIORITY_CHAT, PRIORITY_PARSING, RateLimiter};
pub use provider::{LimitConfig, LimitOverrides, Provider};
pub use registry::LimiterRegistry;
pub use scheduler::{PriorityScheduler, SchedulerSnapshot};
