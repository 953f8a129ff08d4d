//! Provider identifiers and their rate limit parameters.
//!
//! Other components construct limiters by name and provider only, so the
//! default table below is effectively part of the public contract.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::GovernorError;

/// Supported API providers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Provider {
    GeminiFree,
    Groq,
    #[serde(rename = "huggingface")]
    HuggingFace,
}

impl Provider {
    pub const ALL: [Provider; 3] = [Provider::GeminiFree, Provider::Groq, Provider::HuggingFace];

    pub fn as_str(&self) -> &'static str {
        match self {
            Provider::GeminiFree => "gemini_free",
            Provider::Groq => "groq",
            Provider::HuggingFace => "huggingface",
        }
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Provider {
    type Err = GovernorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "gemini_free" | "gemini" | "google" => Ok(Provider::GeminiFree),
            "groq" => Ok(Provider::Groq),
            "huggingface" | "hf" => Ok(Provider::HuggingFace),
            other => Err(GovernorError::UnknownProvider(other.to_string())),
        }
    }
}

/// Rate limit parameters for one provider. Never mutated after construction.
#[derive(Debug, Clone, PartialEq)]
pub struct LimitConfig {
    /// Bucket capacity (burst size).
    pub max_tokens: u32,
    /// Tokens added per second.
    pub refill_rate: f64,
    /// Breaker trip duration when a 429 carries no usable hint.
    pub cooldown_after_429: Duration,
    /// Retries after the first attempt.
    pub max_retries: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl LimitConfig {
    /// Default parameters for a provider.
    pub fn default_for(provider: Provider) -> Self {
        match provider {
            // 10 RPM
            Provider::GeminiFree => Self {
                max_tokens: 10,
                refill_rate: 10.0 / 60.0,
                cooldown_after_429: Duration::from_secs(60),
                max_retries: 5,
                initial_backoff: Duration::from_secs(5),
                max_backoff: Duration::from_secs(120),
            },
            // 25 RPM
            Provider::Groq => Self {
                max_tokens: 25,
                refill_rate: 25.0 / 60.0,
                cooldown_after_429: Duration::from_secs(15),
                max_retries: 3,
                initial_backoff: Duration::from_secs(2),
                max_backoff: Duration::from_secs(30),
            },
            // 10 RPM
            Provider::HuggingFace => Self {
                max_tokens: 10,
                refill_rate: 10.0 / 60.0,
                cooldown_after_429: Duration::from_secs(20),
                max_retries: 3,
                initial_backoff: Duration::from_secs(5),
                max_backoff: Duration::from_secs(60),
            },
        }
    }

    /// Requests per minute the bucket sustains once the burst is spent.
    pub fn requests_per_minute(&self) -> f64 {
        self.refill_rate * 60.0
    }
}

/// Partial [`LimitConfig`], as read from the config file or passed at a call site.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LimitOverrides {
    pub max_tokens: Option<u32>,
    pub refill_rate: Option<f64>,
    pub cooldown_after_429_secs: Option<f64>,
    pub max_retries: Option<u32>,
    pub initial_backoff_secs: Option<f64>,
    pub max_backoff_secs: Option<f64>,
}

/// Upper bound for any configured duration.
const MAX_CONFIG_SECS: f64 = 86_400.0;

impl LimitOverrides {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// Reject values the bucket or backoff math cannot work with.
    pub fn validate(&self) -> crate::error::Result<()> {
        if self.max_tokens == Some(0) {
            return Err(GovernorError::Config("max_tokens must be at least 1".to_string()));
        }
        if let Some(rate) = self.refill_rate.filter(|r| !(r.is_finite() && *r > 0.0)) {
            return Err(GovernorError::Config(format!(
                "refill_rate must be positive, got {}",
                rate
            )));
        }
        for (field, value) in [
            ("cooldown_after_429_secs", self.cooldown_after_429_secs),
            ("initial_backoff_secs", self.initial_backoff_secs),
            ("max_backoff_secs", self.max_backoff_secs),
        ] {
            if let Some(secs) = value.filter(|s| !(s.is_finite() && *s >= 0.0)) {
                return Err(GovernorError::Config(format!(
                    "{} must be non-negative, got {}",
                    field, secs
                )));
            }
            if let Some(secs) = value.filter(|s| *s > MAX_CONFIG_SECS) {
                return Err(GovernorError::Config(format!(
                    "{} must be at most {}, got {}",
                    field, MAX_CONFIG_SECS, secs
                )));
            }
        }
        Ok(())
    }

    /// Layer `other` on top of `self`; fields set in `other` win.
    pub fn merged(&self, other: &LimitOverrides) -> LimitOverrides {
        LimitOverrides {
            max_tokens: other.max_tokens.or(self.max_tokens),
            refill_rate: other.refill_rate.or(self.refill_rate),
            cooldown_after_429_secs: other.cooldown_after_429_secs.or(self.cooldown_after_429_secs),
            max_retries: other.max_retries.or(self.max_retries),
            initial_backoff_secs: other.initial_backoff_secs.or(self.initial_backoff_secs),
            max_backoff_secs: other.max_backoff_secs.or(self.max_backoff_secs),
        }
    }

    /// Produce a new config with the set fields replaced.
    pub fn apply(&self, base: &LimitConfig) -> LimitConfig {
        LimitConfig {
            max_tokens: self.max_tokens.unwrap_or(base.max_tokens),
            refill_rate: self.refill_rate.unwrap_or(base.refill_rate),
            cooldown_after_429: secs_or(self.cooldown_after_429_secs, base.cooldown_after_429),
            max_retries: self.max_retries.unwrap_or(base.max_retries),
            initial_backoff: secs_or(self.initial_backoff_secs, base.initial_backoff),
            max_backoff: secs_or(self.max_backoff_secs, base.max_backoff),
        }
    }
}

// Unvalidated values that do not fit a Duration keep the base value.
fn secs_or(secs: Option<f64>, base: Duration) -> Duration {
    secs.and_then(|s| Duration::try_from_secs_f64(s).ok()).unwrap_or(base)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provider_from_str() {
        assert_eq!("groq".parse::<Provider>().unwrap(), Provider::Groq);
        assert_eq!("GEMINI".parse::<Provider>().unwrap(), Provider::GeminiFree);
        assert_eq!("google".parse::<Provider>().unwrap(), Provider::GeminiFree);
        assert_eq!(" huggingface ".parse::<Provider>().unwrap(), Provider::HuggingFace);
        assert!(matches!(
            "openai".parse::<Provider>(),
            Err(GovernorError::UnknownProvider(name)) if name == "openai"
        ));
    }

    #[test]
    fn test_provider_display_matches_serde() {
        for provider in Provider::ALL {
            let yaml = serde_yaml::to_string(&provider).unwrap();
            assert_eq!(yaml.trim(), provider.to_string());
        }
    }

    #[test]
    fn test_default_table() {
        let gemini = LimitConfig::default_for(Provider::GeminiFree);
        assert_eq!(gemini.max_tokens, 10);
        assert_eq!(gemini.max_retries, 5);
        assert_eq!(gemini.cooldown_after_429, Duration::from_secs(60));
        assert_eq!(gemini.max_backoff, Duration::from_secs(120));
        assert!((gemini.requests_per_minute() - 10.0).abs() < 1e-9);

        let groq = LimitConfig::default_for(Provider::Groq);
        assert_eq!(groq.max_tokens, 25);
        assert_eq!(groq.max_retries, 3);
        assert_eq!(groq.initial_backoff, Duration::from_secs(2));
        assert!((groq.requests_per_minute() - 25.0).abs() < 1e-9);

        let hf = LimitConfig::default_for(Provider::HuggingFace);
        assert_eq!(hf.cooldown_after_429, Duration::from_secs(20));
        assert_eq!(hf.max_backoff, Duration::from_secs(60));
    }

    #[test]
    fn test_overrides_apply_only_set_fields() {
        let base = LimitConfig::default_for(Provider::Groq);
        let overrides = LimitOverrides {
            max_retries: Some(2),
            initial_backoff_secs: Some(0.5),
            ..Default::default()
        };

        let config = overrides.apply(&base);
        assert_eq!(config.max_retries, 2);
        assert_eq!(config.initial_backoff, Duration::from_millis(500));
        assert_eq!(config.max_tokens, base.max_tokens);
        assert_eq!(config.max_backoff, base.max_backoff);
    }

    #[test]
    fn test_overrides_merged_prefers_other() {
        let file = LimitOverrides {
            max_tokens: Some(5),
            max_retries: Some(1),
            ..Default::default()
        };
        let site = LimitOverrides {
            max_retries: Some(7),
            ..Default::default()
        };

        let merged = file.merged(&site);
        assert_eq!(merged.max_tokens, Some(5));
        assert_eq!(merged.max_retries, Some(7));
    }

    #[test]
    fn test_overrides_validate() {
        assert!(LimitOverrides::default().validate().is_ok());
        assert!(LimitOverrides::default().is_empty());

        let zero_capacity = LimitOverrides {
            max_tokens: Some(0),
            ..Default::default()
        };
        assert!(zero_capacity.validate().is_err());

        let bad_rate = LimitOverrides {
            refill_rate: Some(-1.0),
            ..Default::default()
        };
        assert!(bad_rate.validate().is_err());

        let bad_backoff = LimitOverrides {
            max_backoff_secs: Some(f64::NAN),
            ..Default::default()
        };
        assert!(bad_backoff.validate().is_err());
    }

    #[test]
    fn test_huge_durations_rejected_and_not_applied() {
        let huge = LimitOverrides {
            max_backoff_secs: Some(1e30),
            ..Default::default()
        };
        let err = huge.validate().unwrap_err();
        assert!(err.to_string().contains("max_backoff_secs"));

        let base = LimitConfig::default_for(Provider::Groq);
        assert_eq!(huge.apply(&base).max_backoff, base.max_backoff);
    }
}
