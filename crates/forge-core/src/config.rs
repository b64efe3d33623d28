//! Pipeline tuning knobs.
//!
//! Every field has a default, so a partial JSON file or an empty environment
//! yields a working configuration. `FORGE_*` variables override whatever the
//! file (named by `FORGE_CONFIG_PATH`) or the defaults provide.

use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::router::RetryPolicy;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub scanner: ScannerConfig,
    pub judge: JudgeConfig,
    pub continuation: ContinuationConfig,
    pub auto_fix: AutoFixConfig,
    pub retry: RetryPolicy,
    pub timeouts: TimeoutConfig,
    pub generation: GenerationConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScannerConfig {
    /// Longest marker literal, in bytes, that can be recognized across deltas.
    pub lookback_window: usize,
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            lookback_window: 256,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct JudgeConfig {
    pub bracket_tolerance: usize,
    pub tag_tolerance: usize,
    pub min_plausible_size: usize,
}

impl Default for JudgeConfig {
    fn default() -> Self {
        Self {
            bracket_tolerance: 2,
            tag_tolerance: 1,
            min_plausible_size: 20,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContinuationConfig {
    /// Total backend rounds per generation, the first included.
    pub max_rounds: u32,
}

impl Default for ContinuationConfig {
    fn default() -> Self {
        Self { max_rounds: 5 }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AutoFixConfig {
    pub enabled: bool,
    /// Upper bound on Repair steps.
    pub max_iterations: u32,
}

impl Default for AutoFixConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_iterations: 2,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutConfig {
    pub run_budget_ms: u64,
    pub per_call_ms: u64,
    pub heartbeat_ms: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            run_budget_ms: 300_000,
            per_call_ms: 120_000,
            heartbeat_ms: 15_000,
        }
    }
}

impl TimeoutConfig {
    pub fn run_budget(&self) -> Duration {
        Duration::from_millis(self.run_budget_ms)
    }

    pub fn per_call(&self) -> Duration {
        Duration::from_millis(self.per_call_ms)
    }

    pub fn heartbeat(&self) -> Duration {
        Duration::from_millis(self.heartbeat_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationConfig {
    pub max_output_tokens: u32,
    pub temperature: f32,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            max_output_tokens: 8_000,
            temperature: 0.7,
        }
    }
}

pub(crate) fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" | "enabled" => Some(true),
        "0" | "false" | "no" | "off" | "disabled" => Some(false),
        _ => None,
    }
}

fn override_with<T, F>(lookup: &F, key: &'static str, field: &mut T) -> Result<(), ConfigError>
where
    T: FromStr,
    F: Fn(&str) -> Option<String>,
{
    let Some(raw) = lookup(key) else {
        return Ok(());
    };
    *field = raw.trim().parse().map_err(|_| ConfigError::InvalidValue {
        key,
        value: raw.clone(),
    })?;
    Ok(())
}

impl PipelineConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_env_with(|key| std::env::var(key).ok())
    }

    /// Builds a config from `lookup` (an environment accessor).
    pub fn from_env_with<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = match lookup("FORGE_CONFIG_PATH") {
            Some(path) if !path.trim().is_empty() => Self::load(path.trim())?,
            _ => Self::default(),
        };

        override_with(&lookup, "FORGE_LOOKBACK_WINDOW", &mut config.scanner.lookback_window)?;
        override_with(&lookup, "FORGE_BRACKET_TOLERANCE", &mut config.judge.bracket_tolerance)?;
        override_with(&lookup, "FORGE_TAG_TOLERANCE", &mut config.judge.tag_tolerance)?;
        override_with(&lookup, "FORGE_MIN_PLAUSIBLE_SIZE", &mut config.judge.min_plausible_size)?;
        override_with(&lookup, "FORGE_MAX_ROUNDS", &mut config.continuation.max_rounds)?;
        if let Some(raw) = lookup("FORGE_AUTO_FIX") {
            config.auto_fix.enabled = parse_bool(&raw).ok_or(ConfigError::InvalidValue {
                key: "FORGE_AUTO_FIX",
                value: raw,
            })?;
        }
        override_with(&lookup, "FORGE_AUTO_FIX_MAX_ITERATIONS", &mut config.auto_fix.max_iterations)?;
        override_with(&lookup, "FORGE_MAX_RETRIES", &mut config.retry.max_retries)?;
        override_with(&lookup, "FORGE_INITIAL_BACKOFF_MS", &mut config.retry.initial_backoff_ms)?;
        override_with(&lookup, "FORGE_MAX_BACKOFF_MS", &mut config.retry.max_backoff_ms)?;
        override_with(&lookup, "FORGE_RUN_BUDGET_MS", &mut config.timeouts.run_budget_ms)?;
        override_with(&lookup, "FORGE_CALL_TIMEOUT_MS", &mut config.timeouts.per_call_ms)?;
        override_with(&lookup, "FORGE_HEARTBEAT_MS", &mut config.timeouts.heartbeat_ms)?;
        override_with(&lookup, "FORGE_MAX_OUTPUT_TOKENS", &mut config.generation.max_output_tokens)?;
        override_with(&lookup, "FORGE_TEMPERATURE", &mut config.generation.temperature)?;

        config.validate()?;
        Ok(config)
    }

    /// Reads a JSON config file. Missing fields take their defaults.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        let config: Self = serde_json::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        // `<file path="x">` is the shortest marker that carries a path.
        if self.scanner.lookback_window < 16 {
            return Err(ConfigError::Invalid(
                "scanner.lookback_window must be at least 16".into(),
            ));
        }
        if self.continuation.max_rounds == 0 {
            return Err(ConfigError::Invalid(
                "continuation.max_rounds must be at least 1".into(),
            ));
        }
        if self.timeouts.run_budget_ms == 0 || self.timeouts.per_call_ms == 0 {
            return Err(ConfigError::Invalid(
                "timeouts must be greater than 0".into(),
            ));
        }
        if self.timeouts.heartbeat_ms == 0 {
            return Err(ConfigError::Invalid(
                "timeouts.heartbeat_ms must be greater than 0".into(),
            ));
        }
        if !(0.0..=2.0).contains(&self.generation.temperature) {
            return Err(ConfigError::Invalid(
                "generation.temperature must be within 0.0..=2.0".into(),
            ));
        }
        Ok(())
    }
}
