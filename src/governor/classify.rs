//! Failure taxonomy for wrapped provider calls.
//!
//! Errors are classified from structured fields when the error type exposes
//! them (see [`ProviderError`]) and from their display text otherwise. The text
//! heuristics are the compatibility surface: a new provider integration must
//! keep its messages matching these patterns or its failures degrade to
//! non-retryable / backoff-without-hint.

use std::fmt;
use std::sync::LazyLock;
use std::time::Duration;

use regex::Regex;

/// Substrings marking a quota or balance failure that retrying cannot fix.
const FATAL_PATTERNS: [&str; 2] = ["402", "insufficient balance"];

/// Substrings marking a transient failure worth retrying.
const RETRYABLE_PATTERNS: [&str; 7] =
    ["429", "rate limit", "quota", "timeout", "500", "503", "exhausted"];

/// Status codes treated as transient when an error exposes one.
const RETRYABLE_STATUS: [u16; 3] = [429, 500, 503];

/// Added to every retry-after hint.
pub const HINT_MARGIN: Duration = Duration::from_secs(1);

/// Longest retry delay taken from an error, margin included.
pub const MAX_RETRY_HINT: Duration = Duration::from_secs(60 * 60);

// Only the first <number><unit> token counts: "1m30s" reads as one minute.
static HINT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\d+)(\s?s|m)").expect("hint pattern is valid"));

/// Structured view of a failed provider call.
///
/// Every method has a default, so any displayable error can opt in with an
/// empty impl and rely on text heuristics alone.
pub trait ProviderError: fmt::Display {
    /// HTTP status reported by the provider, if known.
    fn status_code(&self) -> Option<u16> {
        None
    }

    /// Server-suggested delay before retrying, if known.
    fn retry_after(&self) -> Option<Duration> {
        None
    }

    /// Whether the failure was a client-side timeout.
    fn is_timeout(&self) -> bool {
        false
    }
}

impl ProviderError for String {}

impl ProviderError for str {}

impl ProviderError for &str {}

impl ProviderError for eyre::Report {}

impl ProviderError for std::io::Error {
    fn is_timeout(&self) -> bool {
        self.kind() == std::io::ErrorKind::TimedOut
    }
}

impl ProviderError for tokio::time::error::Elapsed {
    fn is_timeout(&self) -> bool {
        true
    }
}

impl ProviderError for reqwest::Error {
    fn status_code(&self) -> Option<u16> {
        self.status().map(|s| s.as_u16())
    }

    fn is_timeout(&self) -> bool {
        reqwest::Error::is_timeout(self)
    }
}

/// Error type for callers that build provider failures by hand.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct CallError {
    pub status: Option<u16>,
    pub retry_after: Option<Duration>,
    pub message: String,
}

impl CallError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            status: None,
            retry_after: None,
            message: message.into(),
        }
    }

    pub fn http(status: u16, message: impl Into<String>) -> Self {
        Self {
            status: Some(status),
            retry_after: None,
            message: message.into(),
        }
    }

    pub fn with_retry_after(mut self, retry_after: Duration) -> Self {
        self.retry_after = Some(retry_after);
        self
    }
}

impl ProviderError for CallError {
    fn status_code(&self) -> Option<u16> {
        self.status
    }

    fn retry_after(&self) -> Option<Duration> {
        self.retry_after
    }
}

/// How the retry loop treats a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    /// Out of quota or balance. Surfaced immediately.
    QuotaFatal,
    /// Worth retrying. `throttled` failures also trip the breaker.
    Transient { throttled: bool },
    /// Anything else. Surfaced immediately.
    Permanent,
}

impl FailureClass {
    pub fn is_retryable(&self) -> bool {
        matches!(self, FailureClass::Transient { .. })
    }

    pub fn is_throttled(&self) -> bool {
        matches!(self, FailureClass::Transient { throttled: true })
    }
}

impl fmt::Display for FailureClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureClass::QuotaFatal => f.write_str("quota-fatal"),
            FailureClass::Transient { throttled: true } => f.write_str("transient (throttled)"),
            FailureClass::Transient { throttled: false } => f.write_str("transient"),
            FailureClass::Permanent => f.write_str("permanent"),
        }
    }
}

/// Classify a failed call. Quota failures take precedence over everything.
pub fn classify<E: ProviderError + ?Sized>(err: &E) -> FailureClass {
    let text = err.to_string().to_lowercase();
    let status = err.status_code();

    if status == Some(402) || FATAL_PATTERNS.iter().any(|p| text.contains(p)) {
        return FailureClass::QuotaFatal;
    }

    let retryable = err.is_timeout()
        || status.is_some_and(|s| RETRYABLE_STATUS.contains(&s))
        || RETRYABLE_PATTERNS.iter().any(|p| text.contains(p));

    if retryable {
        FailureClass::Transient {
            throttled: status == Some(429) || text.contains("429"),
        }
    } else {
        FailureClass::Permanent
    }
}

/// Retry delay suggested by the error, margin included.
///
/// A structured `retry_after` wins over anything found in the text.
pub fn retry_hint<E: ProviderError + ?Sized>(err: &E) -> Option<Duration> {
    match err.retry_after() {
        Some(hint) => Some(with_margin(hint)),
        None => parse_retry_hint(&err.to_string()),
    }
}

/// Parse the first `<number>s` / `<number>m` token in an error text.
pub fn parse_retry_hint(text: &str) -> Option<Duration> {
    let text = text.to_lowercase();
    let caps = HINT_RE.captures(&text)?;
    let value: u64 = caps.get(1)?.as_str().parse().ok()?;
    let unit = caps.get(2)?.as_str();
    let secs = if unit.contains('m') { value.saturating_mul(60) } else { value };
    Some(with_margin(Duration::from_secs(secs)))
}

// Error text is provider-controlled; keep absurd hints from overflowing
// later instant arithmetic.
fn with_margin(hint: Duration) -> Duration {
    hint.saturating_add(HINT_MARGIN).min(MAX_RETRY_HINT)
}
