//! Rate limiter facade: admission control plus retry and backoff.

use std::future::Future;

use serde::Serialize;
use tokio::time::Duration;
use tracing::{debug, warn};

use crate::error::ExecuteError;
use crate::governor::breaker::CircuitBreaker;
use crate::governor::bucket::TokenBucket;
use crate::governor::classify::{FailureClass, ProviderError, classify, retry_hint};
use crate::governor::provider::{LimitConfig, Provider};
use crate::governor::scheduler::PriorityScheduler;

/// Interactive requests (chat) jump ahead of batch work.
pub const PRIORITY_CHAT: i32 = 0;
/// Batch document parsing.
pub const PRIORITY_PARSING: i32 = 10;
pub const DEFAULT_PRIORITY: i32 = PRIORITY_PARSING;

/// Snapshot of a limiter, for status output.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LimiterStatus {
    pub name: String,
    pub provider: Provider,
    pub tokens_available: f64,
    pub capacity: u32,
    pub breaker_open: bool,
    pub cooldown_remaining_secs: f64,
    pub queued: usize,
}

/// One provider usage-site: a bucket, a breaker, a queue and a retry policy,
/// shared by every caller holding the same registry name.
#[derive(Debug)]
pub struct RateLimiter {
    name: String,
    provider: Provider,
    config: LimitConfig,
    scheduler: PriorityScheduler,
}

impl RateLimiter {
    pub fn new(name: impl Into<String>, provider: Provider, config: LimitConfig) -> Self {
        let bucket = TokenBucket::new(config.max_tokens, config.refill_rate);
        let breaker = CircuitBreaker::new(config.cooldown_after_429);
        Self {
            name: name.into(),
            provider,
            config,
            scheduler: PriorityScheduler::new(bucket, breaker),
        }
    }

    /// Limiter with the provider's default table entry.
    pub fn for_provider(name: impl Into<String>, provider: Provider) -> Self {
        Self::new(name, provider, LimitConfig::default_for(provider))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn provider(&self) -> Provider {
        self.provider
    }

    pub fn config(&self) -> &LimitConfig {
        &self.config
    }

    /// Wait for admission without retry handling.
    ///
    /// For streaming responses whose body is consumed outside the limiter.
    /// Nothing resets or trips the breaker on this path.
    pub async fn acquire(&self, priority: i32) {
        self.scheduler.wait_for_slot(priority).await;
    }

    /// [`execute_with_retry`](Self::execute_with_retry) at [`DEFAULT_PRIORITY`].
    pub async fn execute<F, Fut, T, E>(&self, call: F) -> Result<T, ExecuteError<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: ProviderError,
    {
        self.execute_with_retry(DEFAULT_PRIORITY, call).await
    }

    /// Run `call` under admission control, retrying transient failures.
    ///
    /// Each attempt waits for a slot first. On success the breaker is reset.
    /// On failure the error is classified:
    /// - quota/balance failures surface at once as [`ExecuteError::QuotaExhausted`];
    /// - once `max_retries` retries have failed, [`ExecuteError::RetriesExhausted`]
    ///   carrying the last error, whatever its class;
    /// - non-retryable failures surface at once as [`ExecuteError::Call`];
    /// - transient failures sleep for the error's retry hint (or the current
    ///   exponential backoff) and try again, tripping the breaker for 429s.
    ///
    /// Breaker and bucket are shared, so one caller's throttling slows every
    /// caller of this limiter.
    pub async fn execute_with_retry<F, Fut, T, E>(
        &self,
        priority: i32,
        mut call: F,
    ) -> Result<T, ExecuteError<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: ProviderError,
    {
        let mut attempt: u32 = 0;
        let mut backoff = self.config.initial_backoff;

        loop {
            self.scheduler.wait_for_slot(priority).await;

            let err = match call().await {
                Ok(value) => {
                    self.scheduler.reset_breaker();
                    if attempt > 0 {
                        debug!(
                            limiter = %self.name,
                            attempts = attempt + 1,
                            "call succeeded after retry"
                        );
                    }
                    return Ok(value);
                }
                Err(err) => err,
            };
            attempt += 1;

            let class = classify(&err);
            if class == FailureClass::QuotaFatal {
                warn!(
                    limiter = %self.name,
                    provider = %self.provider,
                    error = %err,
                    "insufficient quota, not retrying"
                );
                return Err(ExecuteError::QuotaExhausted {
                    provider: self.provider,
                    error: err,
                });
            }

            if attempt > self.config.max_retries {
                warn!(
                    limiter = %self.name,
                    provider = %self.provider,
                    attempts = attempt,
                    error = %err,
                    "retries exhausted"
                );
                return Err(ExecuteError::RetriesExhausted {
                    provider: self.provider,
                    attempts: attempt,
                    last_error: err,
                });
            }

            let throttled = match class {
                FailureClass::Transient { throttled } => throttled,
                _ => return Err(ExecuteError::Call(err)),
            };

            let wait = retry_hint(&err).unwrap_or(backoff);
            warn!(
                limiter = %self.name,
                provider = %self.provider,
                attempt,
                wait_secs = wait.as_secs_f64(),
                error = %err,
                "call failed, retrying"
            );

            if throttled {
                self.scheduler.trip_breaker(Some(wait));
            }

            tokio::time::sleep(wait).await;
            backoff = backoff.saturating_mul(2).min(self.config.max_backoff);
        }
    }

    pub fn status(&self) -> LimiterStatus {
        let snapshot = self.scheduler.snapshot();
        LimiterStatus {
            name: self.name.clone(),
            provider: self.provider,
            tokens_available: snapshot.tokens_available,
            capacity: self.config.max_tokens,
            breaker_open: snapshot.breaker_open,
            cooldown_remaining_secs: snapshot.cooldown_remaining.as_secs_f64(),
            queued: snapshot.queued,
        }
    }

    /// Remaining breaker cooldown.
    pub fn cooldown_remaining(&self) -> Duration {
        self.scheduler.snapshot().cooldown_remaining
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::governor::classify::{CallError, MAX_RETRY_HINT};
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tokio::time::Instant;

    fn limiter(max_retries: u32) -> RateLimiter {
        let config = LimitConfig {
            max_tokens: 10,
            refill_rate: 10.0,
            cooldown_after_429: Duration::from_secs(30),
            max_retries,
            initial_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(3),
        };
        RateLimiter::new("test", Provider::Groq, config)
    }

    #[tokio::test(start_paused = true)]
    async fn test_happy_path_single_call() {
        let limiter = limiter(3);
        let calls = &AtomicU32::new(0);
        let start = Instant::now();

        let result: Result<&str, ExecuteError<String>> = limiter
            .execute_with_retry(PRIORITY_CHAT, || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok("parsed")
            })
            .await;

        assert_eq!(result.unwrap(), "parsed");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(start.elapsed(), Duration::ZERO);
        assert!(!limiter.status().breaker_open);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_hint_sleep_and_breaker_trip() {
        let limiter = limiter(3);
        let calls = &AtomicU32::new(0);
        let start = Instant::now();

        let result = limiter
            .execute_with_retry(PRIORITY_CHAT, || async move {
                match calls.fetch_add(1, Ordering::SeqCst) {
                    0 => Err("429 Too Many Requests: retry after 5s".to_string()),
                    _ => Ok(42),
                }
            })
            .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        // 5s hint plus the 1s margin; the breaker (tripped for the same span)
        // has expired by the time the retry is admitted.
        assert_eq!(start.elapsed(), Duration::from_secs(6));
        assert!(!limiter.status().breaker_open);
    }

    #[tokio::test(start_paused = true)]
    async fn test_breaker_open_during_retry_sleep() {
        let limiter = Arc::new(limiter(3));
        let calls = Arc::new(AtomicU32::new(0));

        let task = {
            let limiter = Arc::clone(&limiter);
            let calls = Arc::clone(&calls);
            tokio::spawn(async move {
                limiter
                    .execute_with_retry(PRIORITY_PARSING, || {
                        let calls = Arc::clone(&calls);
                        async move {
                            match calls.fetch_add(1, Ordering::SeqCst) {
                                0 => Err(CallError::http(429, "slow down")
                                    .with_retry_after(Duration::from_secs(5))),
                                _ => Ok(()),
                            }
                        }
                    })
                    .await
            })
        };

        tokio::time::sleep(Duration::from_secs(2)).await;
        let status = limiter.status();
        assert!(status.breaker_open);
        assert!(status.cooldown_remaining_secs > 3.0 && status.cooldown_remaining_secs <= 4.0);

        task.await.unwrap().unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert!(!limiter.status().breaker_open);
    }

    #[tokio::test(start_paused = true)]
    async fn test_quota_fatal_short_circuits() {
        let limiter = limiter(5);
        let calls = &AtomicU32::new(0);
        let start = Instant::now();

        let result: Result<(), _> = limiter
            .execute_with_retry(PRIORITY_PARSING, || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err("402 insufficient balance".to_string())
            })
            .await;

        assert!(matches!(
            result,
            Err(ExecuteError::QuotaExhausted { provider: Provider::Groq, .. })
        ));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_permanent_error_not_retried() {
        let limiter = limiter(5);
        let calls = &AtomicU32::new(0);

        let result: Result<(), _> = limiter
            .execute_with_retry(PRIORITY_PARSING, || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(CallError::http(400, "invalid prompt"))
            })
            .await;

        match result {
            Err(ExecuteError::Call(err)) => assert_eq!(err.status, Some(400)),
            other => panic!("expected pass-through error, got {:?}", other),
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhaustion_after_max_retries() {
        let limiter = limiter(2);
        let calls = &AtomicU32::new(0);
        let start = Instant::now();

        let result: Result<(), _> = limiter
            .execute_with_retry(PRIORITY_PARSING, || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err("503".to_string())
            })
            .await;

        match result {
            Err(ExecuteError::RetriesExhausted { provider, attempts, last_error }) => {
                assert_eq!(provider, Provider::Groq);
                assert_eq!(attempts, 3);
                assert_eq!(last_error, "503");
            }
            other => panic!("expected retries exhausted, got {:?}", other),
        }
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        // backoff 1s then 2s
        assert_eq!(start.elapsed(), Duration::from_secs(3));
        // 503 is not a throttling signal
        assert!(!limiter.status().breaker_open);
    }

    #[tokio::test(start_paused = true)]
    async fn test_permanent_error_after_budget_is_exhaustion() {
        let limiter = limiter(2);
        let calls = &AtomicU32::new(0);

        let result: Result<(), _> = limiter
            .execute_with_retry(PRIORITY_PARSING, || async move {
                match calls.fetch_add(1, Ordering::SeqCst) {
                    0 | 1 => Err("503 service unavailable".to_string()),
                    _ => Err("400 bad request".to_string()),
                }
            })
            .await;

        match result {
            Err(ExecuteError::RetriesExhausted { provider, attempts, last_error }) => {
                assert_eq!(provider, Provider::Groq);
                assert_eq!(attempts, 3);
                assert_eq!(last_error, "400 bad request");
            }
            other => panic!("expected retries exhausted, got {:?}", other),
        }
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_huge_retry_hint_is_capped() {
        let limiter = limiter(3);
        let calls = &AtomicU32::new(0);
        let start = Instant::now();

        let result = limiter
            .execute_with_retry(PRIORITY_CHAT, || async move {
                match calls.fetch_add(1, Ordering::SeqCst) {
                    0 => Err("429 retry after 9999999999999999999s".to_string()),
                    _ => Ok("done"),
                }
            })
            .await;

        assert_eq!(result.unwrap(), "done");
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(start.elapsed(), MAX_RETRY_HINT);
        assert!(!limiter.status().breaker_open);
    }

    #[tokio::test(start_paused = true)]
    async fn test_backoff_capped_at_max() {
        let limiter = limiter(4);
        let start = Instant::now();

        let result: Result<(), _> = limiter
            .execute_with_retry(PRIORITY_PARSING, || async move {
                Err("rate limit".to_string())
            })
            .await;

        assert!(matches!(result, Err(ExecuteError::RetriesExhausted { attempts: 5, .. })));
        // 1 + 2 + 3 + 3, with max_backoff = 3s
        assert_eq!(start.elapsed(), Duration::from_secs(9));
    }

    #[tokio::test(start_paused = true)]
    async fn test_acquire_consumes_slot() {
        let limiter = limiter(0);
        limiter.acquire(PRIORITY_CHAT).await;
        assert_eq!(limiter.status().tokens_available, 9.0);
    }

    #[test]
    fn test_for_provider_uses_defaults() {
        let limiter = RateLimiter::for_provider("gemini_processing", Provider::GeminiFree);
        assert_eq!(limiter.name(), "gemini_processing");
        assert_eq!(limiter.provider(), Provider::GeminiFree);
        assert_eq!(limiter.config(), &LimitConfig::default_for(Provider::GeminiFree));
    }
}
