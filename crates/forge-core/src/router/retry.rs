use std::time::Duration;

use forge_harness::{HarnessError, ProviderError, RunFailure};
use serde::{Deserialize, Serialize};

/// Exponential retry policy around backend invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Additional attempts after the first invocation.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Backoff before the first retry.
    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,
    /// Exponential multiplier per retry step.
    #[serde(default = "default_backoff_factor")]
    pub backoff_factor: f64,
    /// Upper bound for computed backoff.
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
}

const fn default_max_retries() -> u32 {
    3
}

const fn default_initial_backoff_ms() -> u64 {
    2_000
}

const fn default_backoff_factor() -> f64 {
    2.0
}

const fn default_max_backoff_ms() -> u64 {
    30_000
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            initial_backoff_ms: default_initial_backoff_ms(),
            backoff_factor: default_backoff_factor(),
            max_backoff_ms: default_max_backoff_ms(),
        }
    }
}

impl RetryPolicy {
    pub const fn none() -> Self {
        Self {
            max_retries: 0,
            initial_backoff_ms: default_initial_backoff_ms(),
            backoff_factor: default_backoff_factor(),
            max_backoff_ms: default_max_backoff_ms(),
        }
    }

    pub fn exponential(max_retries: u32, initial_backoff_ms: u64, backoff_factor: f64) -> Self {
        let initial = if initial_backoff_ms == 0 {
            default_initial_backoff_ms()
        } else {
            initial_backoff_ms
        };
        let factor = if backoff_factor <= 0.0 {
            default_backoff_factor()
        } else {
            backoff_factor
        };
        Self {
            max_retries,
            initial_backoff_ms: initial,
            backoff_factor: factor,
            max_backoff_ms: default_max_backoff_ms(),
        }
    }

    pub fn with_max_backoff_ms(mut self, max_backoff_ms: u64) -> Self {
        self.max_backoff_ms = max_backoff_ms.max(1);
        self
    }

    pub fn can_retry(&self, retries_done: u32) -> bool {
        retries_done < self.max_retries
    }

    /// True when the retry numbered `retry` (1-based) is the last one allowed.
    pub fn is_final_retry(&self, retry: u32) -> bool {
        self.max_retries > 0 && retry == self.max_retries
    }

    pub fn backoff_duration(&self, retries_done: u32) -> Duration {
        if self.max_retries == 0 {
            return Duration::ZERO;
        }
        let exp = self.backoff_factor.powi(retries_done as i32);
        let base = (self.initial_backoff_ms as f64 * exp).round() as u64;
        let clamped = base.min(self.max_backoff_ms.max(1));
        Duration::from_millis(clamped)
    }
}

/// How a backend failure is treated by the router.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureClass {
    RateLimited,
    Timeout,
    ServiceUnavailable,
    Fatal,
}

impl FailureClass {
    pub fn is_transient(self) -> bool {
        self != FailureClass::Fatal
    }

    pub fn of_provider_error(err: &ProviderError) -> Self {
        match err {
            ProviderError::Provider {
                message,
                status_code,
                ..
            } => classify(*status_code, message),
            ProviderError::Timeout { .. } => FailureClass::Timeout,
            ProviderError::Transport { message, .. } => match classify(None, message) {
                // Dropped connections are worth another attempt.
                FailureClass::Fatal => FailureClass::ServiceUnavailable,
                class => class,
            },
            ProviderError::Protocol { .. } => FailureClass::Fatal,
        }
    }

    pub fn of_harness_error(err: &HarnessError) -> Self {
        match err {
            HarnessError::Provider(err) => Self::of_provider_error(err),
            HarnessError::RunFailed(failure) => Self::of_run_failure(failure),
            _ => FailureClass::Fatal,
        }
    }

    /// Classifies a failure reported after the stream was established.
    pub fn of_run_failure(failure: &RunFailure) -> Self {
        match failure {
            RunFailure::Provider {
                message,
                status_code,
                ..
            } => classify(*status_code, message),
            RunFailure::Timeout { .. } => FailureClass::Timeout,
            RunFailure::Transport { message, .. } => match classify(None, message) {
                FailureClass::Fatal => FailureClass::ServiceUnavailable,
                class => class,
            },
            RunFailure::Protocol { .. } | RunFailure::Cancelled => FailureClass::Fatal,
        }
    }
}

fn classify(status_code: Option<u16>, message: &str) -> FailureClass {
    match status_code {
        Some(429) => return FailureClass::RateLimited,
        Some(408 | 504) => return FailureClass::Timeout,
        Some(502 | 503 | 529) => return FailureClass::ServiceUnavailable,
        _ => {}
    }
    let lower = message.to_ascii_lowercase();
    if lower.contains("rate limit") {
        FailureClass::RateLimited
    } else if lower.contains("service unavailable") || lower.contains("overloaded") {
        FailureClass::ServiceUnavailable
    } else if lower.contains("timed out") || lower.contains("timeout") {
        FailureClass::Timeout
    } else {
        FailureClass::Fatal
    }
}
