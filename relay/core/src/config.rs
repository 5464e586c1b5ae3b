//! TOML Configuration File Support
//!
//! Centralized configuration loading for the relay, supporting a TOML file at
//! `~/.config/model-relay/relay.toml`.
//!
//! # Configuration Priority
//!
//! Configuration values are loaded with the following priority (highest first):
//! 1. Explicit overrides ([`ConfigOverrides`])
//! 2. Environment variables (`RELAY_*`)
//! 3. TOML configuration file
//! 4. Default values
//!
//! Every section is optional; missing sections and fields take their defaults.
//!
//! # Example Configuration
//!
//! ```toml
//! privacy_level = "hybrid"
//!
//! [retry]
//! max_retries = 3
//! base_delay_ms = 1000
//! backoff_multiplier = 2.0
//!
//! [timeouts]
//! default_ms = 30000
//! min_ms = 5000
//! max_ms = 120000
//!
//! [circuit_breaker]
//! failure_threshold = 5
//! recovery_timeout_ms = 60000
//!
//! [circuit_breaker_overrides.ollama]
//! failure_threshold = 2
//!
//! [fallback]
//! primary = "ollama"
//! strategy = "privacy_first"
//!
//! [[fallback.entries]]
//! adapter_id = "cloud"
//! priority = 1
//!
//! [cache.memory]
//! enabled = true
//! max_size = 500
//! default_ttl_ms = 3600000
//!
//! [isolation_groups.cloud]
//! adapters = ["cloud"]
//! max_concurrent = 2
//! ```

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::adapter::PrivacyLevel;
use crate::orchestrator::ConsensusConfig;
use crate::resilience::{
    CacheConfig, CacheLevel, CircuitBreakerConfig, FallbackConfig, IsolationGroupConfig,
    RetryConfig, TimeoutConfig,
};
use crate::scheduler::BatchConfig;

// =============================================================================
// Error Types
// =============================================================================

/// Errors that can occur when loading configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read config file
    #[error("Failed to read config file at {path}: {source}")]
    ReadError {
        /// The path that was attempted
        path: PathBuf,
        /// The underlying IO error
        source: std::io::Error,
    },

    /// Failed to parse TOML
    #[error("Failed to parse TOML config: {0}")]
    ParseError(#[from] toml::de::Error),

    /// Invalid configuration value
    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

/// Tracks where configuration values came from
///
/// Records the highest-priority layer that set any value.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConfigSource {
    /// Explicit override
    Cli,
    /// Environment variable
    Env,
    /// TOML configuration file
    File,
    /// Default value
    #[default]
    Default,
}

impl std::fmt::Display for ConfigSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Cli => write!(f, "CLI"),
            Self::Env => write!(f, "environment"),
            Self::File => write!(f, "config file"),
            Self::Default => write!(f, "default"),
        }
    }
}

// =============================================================================
// Relay Configuration
// =============================================================================

/// Complete relay configuration
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    /// Relay-wide privacy level; `local` restricts every request to local adapters
    pub privacy_level: PrivacyLevel,

    /// Retry with backoff
    pub retry: RetryConfig,

    /// Request timeout bounds
    pub timeouts: TimeoutConfig,

    /// Consensus voting for sentiment
    pub consensus: ConsensusConfig,

    /// Default breaker thresholds
    pub circuit_breaker: CircuitBreakerConfig,

    /// Breaker thresholds by adapter id
    pub circuit_breaker_overrides: HashMap<String, CircuitBreakerConfig>,

    /// Result caching per level
    pub cache: CacheConfig,

    /// Fallback chain configuration
    pub fallback: FallbackConfig,

    /// Batch scheduler bounds
    pub batch: BatchConfig,

    /// Isolation groups by name
    pub isolation_groups: HashMap<String, IsolationGroupConfig>,

    /// Path to the config file that was loaded (if any)
    #[serde(skip)]
    pub config_file_path: Option<PathBuf>,

    #[serde(skip)]
    pub(crate) source: ConfigSource,
}

impl RelayConfig {
    /// Create a new config with default values
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the config source (where values came from)
    #[must_use]
    pub fn source(&self) -> ConfigSource {
        self.source
    }

    /// Set the config source
    pub fn set_source(&mut self, source: ConfigSource) {
        self.source = source;
    }

    /// Check every value the relay depends on
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::ValidationError` naming the first invalid value.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: String| Err(ConfigError::ValidationError(msg));

        if self.retry.backoff_multiplier < 1.0 || !self.retry.backoff_multiplier.is_finite() {
            return invalid(format!(
                "retry.backoff_multiplier must be >= 1.0, got {}",
                self.retry.backoff_multiplier
            ));
        }
        if self.timeouts.default_ms == 0 {
            return invalid("timeouts.default_ms must be greater than 0".into());
        }
        if self.timeouts.min_ms > self.timeouts.max_ms {
            return invalid(format!(
                "timeouts.min_ms ({}) exceeds timeouts.max_ms ({})",
                self.timeouts.min_ms, self.timeouts.max_ms
            ));
        }
        if !(0.0..=1.0).contains(&self.consensus.consensus_threshold) {
            return invalid(format!(
                "consensus.consensus_threshold must be within [0, 1], got {}",
                self.consensus.consensus_threshold
            ));
        }

        let breakers = std::iter::once(("circuit_breaker".to_string(), &self.circuit_breaker)).chain(
            self.circuit_breaker_overrides
                .iter()
                .map(|(id, c)| (format!("circuit_breaker_overrides.{id}"), c)),
        );
        for (name, breaker) in breakers {
            if breaker.failure_threshold == 0 {
                return invalid(format!("{name}.failure_threshold must be greater than 0"));
            }
            if breaker.half_open_max_calls == 0 {
                return invalid(format!("{name}.half_open_max_calls must be greater than 0"));
            }
        }

        for level in CacheLevel::ALL {
            let level_config = self.cache.level(level);
            if level_config.enabled && level_config.max_size == 0 {
                return invalid(format!("cache.{level}.max_size must be greater than 0"));
            }
        }

        if self.batch.chunk_size == 0 || self.batch.batch_size == 0 {
            return invalid("batch.chunk_size and batch.batch_size must be greater than 0".into());
        }
        if self.batch.max_concurrent_ai_calls == 0 {
            return invalid("batch.max_concurrent_ai_calls must be greater than 0".into());
        }

        if let Some(primary) = &self.fallback.primary {
            if self.fallback.entries.iter().any(|e| &e.adapter_id == primary) {
                return invalid(format!(
                    "fallback.entries must not repeat the primary adapter '{primary}'"
                ));
            }
        }
        let mut seen = HashSet::new();
        for entry in &self.fallback.entries {
            if !seen.insert(entry.adapter_id.as_str()) {
                return invalid(format!(
                    "fallback.entries lists '{}' more than once",
                    entry.adapter_id
                ));
            }
        }

        let mut grouped = HashMap::new();
        for (name, group) in &self.isolation_groups {
            if group.max_concurrent == 0 {
                return invalid(format!(
                    "isolation_groups.{name}.max_concurrent must be greater than 0"
                ));
            }
            for adapter in &group.adapters {
                if let Some(other) = grouped.insert(adapter.as_str(), name.as_str()) {
                    return invalid(format!(
                        "adapter '{adapter}' is in isolation groups '{other}' and '{name}'"
                    ));
                }
            }
        }

        Ok(())
    }
}

// =============================================================================
// Configuration Loading
// =============================================================================

/// Get the default configuration file path
///
/// Returns `$XDG_CONFIG_HOME/model-relay/relay.toml` or
/// `~/.config/model-relay/relay.toml` if `XDG_CONFIG_HOME` is not set.
#[must_use]
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|p| p.join("model-relay").join("relay.toml"))
}

/// Load configuration from all sources with proper priority
///
/// # Errors
///
/// Returns an error if the config file exists but cannot be parsed, or if the
/// resulting configuration is invalid. A missing config file is not an error.
pub fn load_config() -> Result<RelayConfig, ConfigError> {
    load_config_from_path(default_config_path())
}

/// Load configuration from a specific path
///
/// # Arguments
///
/// * `path` - Optional path to the configuration file. If `None`, only defaults
///   and environment variables are used.
///
/// # Errors
///
/// Returns an error if the specified config file cannot be read or parsed, or
/// fails validation.
pub fn load_config_from_path(path: Option<PathBuf>) -> Result<RelayConfig, ConfigError> {
    let mut config = read_config_file(path)?;
    apply_env_config(&mut config, |key| std::env::var(key).ok());
    config.validate()?;
    Ok(config)
}

fn read_config_file(path: Option<PathBuf>) -> Result<RelayConfig, ConfigError> {
    let Some(config_path) = path else {
        return Ok(RelayConfig::default());
    };

    if !config_path.exists() {
        tracing::debug!(
            path = %config_path.display(),
            "Config file not found, using defaults"
        );
        return Ok(RelayConfig::default());
    }

    let toml_content =
        std::fs::read_to_string(&config_path).map_err(|e| ConfigError::ReadError {
            path: config_path.clone(),
            source: e,
        })?;

    let mut config: RelayConfig = toml::from_str(&toml_content)?;
    config.source = ConfigSource::File;
    tracing::info!(
        path = %config_path.display(),
        "Loaded configuration from file"
    );
    config.config_file_path = Some(config_path);
    Ok(config)
}

/// Parse a boolean flag the way `RELAY_*` variables are written
fn parse_flag(value: &str) -> bool {
    value != "0" && !value.eq_ignore_ascii_case("false")
}

/// Apply environment variable overrides; unparsable values are ignored
fn apply_env_config<F>(config: &mut RelayConfig, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(retries) = lookup("RELAY_MAX_RETRIES").and_then(|v| v.parse().ok()) {
        config.retry.max_retries = retries;
        config.source = ConfigSource::Env;
    }
    if let Some(ms) = lookup("RELAY_RETRY_BASE_DELAY_MS").and_then(|v| v.parse().ok()) {
        config.retry.base_delay_ms = ms;
        config.source = ConfigSource::Env;
    }
    if let Some(ms) = lookup("RELAY_REQUEST_TIMEOUT_MS").and_then(|v| v.parse().ok()) {
        config.timeouts.default_ms = ms;
        config.source = ConfigSource::Env;
    }
    if let Some(level) = lookup("RELAY_PRIVACY_LEVEL").and_then(|v| match v.to_lowercase().as_str() {
        "local" => Some(PrivacyLevel::Local),
        "cloud" => Some(PrivacyLevel::Cloud),
        "hybrid" => Some(PrivacyLevel::Hybrid),
        _ => None,
    }) {
        config.privacy_level = level;
        config.source = ConfigSource::Env;
    }
    if let Some(flag) = lookup("RELAY_REQUIRE_CONSENSUS") {
        config.consensus.require_consensus = parse_flag(&flag);
        config.source = ConfigSource::Env;
    }
    if let Some(threshold) = lookup("RELAY_CONSENSUS_THRESHOLD").and_then(|v| v.parse().ok()) {
        config.consensus.consensus_threshold = threshold;
        config.source = ConfigSource::Env;
    }
    if let Some(max) = lookup("RELAY_MAX_CONCURRENT_AI_CALLS").and_then(|v| v.parse().ok()) {
        config.batch.max_concurrent_ai_calls = max;
        config.source = ConfigSource::Env;
    }
    if let Some(flag) = lookup("RELAY_CACHE_ENABLED") {
        config.cache.enabled = parse_flag(&flag);
        config.source = ConfigSource::Env;
    }
    if let Some(primary) = lookup("RELAY_PRIMARY_ADAPTER").filter(|v| !v.is_empty()) {
        config.fallback.primary = Some(primary);
        config.source = ConfigSource::Env;
    }
}

// =============================================================================
// Explicit Overrides
// =============================================================================

/// Explicit overrides, applied last
///
/// Only set fields are applied.
#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    /// Override max retries
    pub max_retries: Option<u32>,
    /// Override request timeout
    pub request_timeout_ms: Option<u64>,
    /// Override privacy level
    pub privacy_level: Option<PrivacyLevel>,
    /// Override consensus requirement
    pub require_consensus: Option<bool>,
    /// Override global concurrency cap
    pub max_concurrent_ai_calls: Option<usize>,
    /// Override primary adapter
    pub primary_adapter: Option<String>,
}

impl ConfigOverrides {
    /// Create empty overrides
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_max_retries(mut self, retries: u32) -> Self {
        self.max_retries = Some(retries);
        self
    }

    #[must_use]
    pub fn with_request_timeout_ms(mut self, ms: u64) -> Self {
        self.request_timeout_ms = Some(ms);
        self
    }

    #[must_use]
    pub fn with_privacy_level(mut self, level: PrivacyLevel) -> Self {
        self.privacy_level = Some(level);
        self
    }

    #[must_use]
    pub fn with_require_consensus(mut self, required: bool) -> Self {
        self.require_consensus = Some(required);
        self
    }

    #[must_use]
    pub fn with_max_concurrent_ai_calls(mut self, max: usize) -> Self {
        self.max_concurrent_ai_calls = Some(max);
        self
    }

    #[must_use]
    pub fn with_primary_adapter(mut self, adapter_id: impl Into<String>) -> Self {
        self.primary_adapter = Some(adapter_id.into());
        self
    }

    /// Apply overrides to a config
    pub fn apply(&self, config: &mut RelayConfig) {
        let mut applied = false;

        if let Some(retries) = self.max_retries {
            config.retry.max_retries = retries;
            applied = true;
        }
        if let Some(ms) = self.request_timeout_ms {
            config.timeouts.default_ms = ms;
            applied = true;
        }
        if let Some(level) = self.privacy_level {
            config.privacy_level = level;
            applied = true;
        }
        if let Some(required) = self.require_consensus {
            config.consensus.require_consensus = required;
            applied = true;
        }
        if let Some(max) = self.max_concurrent_ai_calls {
            config.batch.max_concurrent_ai_calls = max;
            applied = true;
        }
        if let Some(primary) = &self.primary_adapter {
            config.fallback.primary = Some(primary.clone());
            applied = true;
        }

        if applied {
            config.source = ConfigSource::Cli;
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
