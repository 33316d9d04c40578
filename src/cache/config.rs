//! Configuration for the shared cache

use crate::error::{CacheError, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

/// Prefix of the environment variables read by [`SharedCacheConfig::from_env`]
pub const ENV_PREFIX: &str = "DOC_CACHE_";

/// Configuration for the process-wide shared cache
///
/// `default_ttl` bounds how long a read may be served from the shared tier;
/// `cleanup_interval` is both the sweep period and the grace an expired
/// entry is kept before the sweep removes it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SharedCacheConfig {
    /// Default time-to-live for cache entries
    pub default_ttl: Duration,

    /// Interval between cleanup sweeps
    pub cleanup_interval: Duration,

    /// Maximum number of entries in the cache
    pub max_entries: usize,

    /// TTL jitter factor (0.0 - 1.0)
    /// Spreads expiry of entries written together
    pub ttl_jitter: f64,

    /// Run the cleanup sweep in a background task
    pub enable_auto_cleanup: bool,

    /// Enable hit/miss counters
    pub enable_metrics: bool,
}

impl Default for SharedCacheConfig {
    fn default() -> Self {
        Self {
            default_ttl: Duration::from_secs(300),
            cleanup_interval: Duration::from_secs(600),
            max_entries: 100_000,
            ttl_jitter: 0.0,
            enable_auto_cleanup: true,
            enable_metrics: true,
        }
    }
}

impl SharedCacheConfig {
    /// Config with the two caller-supplied expirations and defaults elsewhere
    pub fn new(default_ttl: Duration, cleanup_interval: Duration) -> Self {
        Self {
            default_ttl,
            cleanup_interval,
            ..Default::default()
        }
    }

    /// Create a new builder for cache configuration
    pub fn builder() -> SharedCacheConfigBuilder {
        SharedCacheConfigBuilder::default()
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.default_ttl.is_zero() {
            return Err(CacheError::Config("default_ttl must be greater than 0".to_string()));
        }

        if self.cleanup_interval.is_zero() {
            return Err(CacheError::Config(
                "cleanup_interval must be greater than 0".to_string(),
            ));
        }

        if self.max_entries == 0 {
            return Err(CacheError::Config("max_entries must be greater than 0".to_string()));
        }

        if !(0.0..=1.0).contains(&self.ttl_jitter) {
            return Err(CacheError::Config(
                "ttl_jitter must be between 0.0 and 1.0".to_string(),
            ));
        }

        Ok(())
    }

    /// Calculate actual TTL with jitter applied
    pub fn ttl_with_jitter(&self) -> Duration {
        jittered(self.default_ttl, self.ttl_jitter)
    }

    /// Load configuration from `DOC_CACHE_*` environment variables
    ///
    /// A `.env` file is honoured when present. Recognised variables:
    /// `DOC_CACHE_DEFAULT_TTL_SECS`, `DOC_CACHE_CLEANUP_INTERVAL_SECS`,
    /// `DOC_CACHE_MAX_ENTRIES`, `DOC_CACHE_TTL_JITTER`,
    /// `DOC_CACHE_AUTO_CLEANUP`, `DOC_CACHE_METRICS`.
    pub fn from_env() -> Result<Self> {
        if let Ok(path) = dotenv::dotenv() {
            debug!("Loaded environment from {}", path.display());
        }
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build a configuration from any variable source, starting from defaults
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |suffix: &str| lookup(&format!("{}{}", ENV_PREFIX, suffix));
        let mut builder = Self::builder();

        if let Some(secs) = var("DEFAULT_TTL_SECS") {
            builder = builder.default_ttl(Duration::from_secs(parse("DEFAULT_TTL_SECS", &secs)?));
        }
        if let Some(secs) = var("CLEANUP_INTERVAL_SECS") {
            builder =
                builder.cleanup_interval(Duration::from_secs(parse("CLEANUP_INTERVAL_SECS", &secs)?));
        }
        if let Some(max) = var("MAX_ENTRIES") {
            builder = builder.max_entries(parse("MAX_ENTRIES", &max)?);
        }
        if let Some(jitter) = var("TTL_JITTER") {
            builder = builder.ttl_jitter(parse("TTL_JITTER", &jitter)?);
        }
        if let Some(enable) = var("AUTO_CLEANUP") {
            builder = builder.enable_auto_cleanup(parse("AUTO_CLEANUP", &enable)?);
        }
        if let Some(enable) = var("METRICS") {
            builder = builder.enable_metrics(parse("METRICS", &enable)?);
        }

        let config = builder.build();
        config.validate()?;
        Ok(config)
    }
}

pub(crate) fn jittered(ttl: Duration, jitter: f64) -> Duration {
    if jitter == 0.0 {
        return ttl;
    }

    let base_secs = ttl.as_secs_f64();
    let jitter_range = base_secs * jitter;
    let offset = (rand::random::<f64>() * 2.0 - 1.0) * jitter_range;
    let final_secs = (base_secs + offset).max(0.001);

    // Out of range near Duration::MAX; keep the configured TTL
    Duration::try_from_secs_f64(final_secs).unwrap_or(ttl)
}

fn parse<T: std::str::FromStr>(name: &str, raw: &str) -> Result<T> {
    raw.trim().parse().map_err(|_| {
        CacheError::Config(format!("{}{} has an invalid value: '{}'", ENV_PREFIX, name, raw))
    })
}

/// Builder for shared cache configuration
#[derive(Debug, Default)]
pub struct SharedCacheConfigBuilder {
    default_ttl: Option<Duration>,
    cleanup_interval: Option<Duration>,
    max_entries: Option<usize>,
    ttl_jitter: Option<f64>,
    enable_auto_cleanup: Option<bool>,
    enable_metrics: Option<bool>,
}

impl SharedCacheConfigBuilder {
    /// Set default TTL for cache entries
    pub fn default_ttl(mut self, ttl: Duration) -> Self {
        self.default_ttl = Some(ttl);
        self
    }

    /// Set cleanup interval
    pub fn cleanup_interval(mut self, interval: Duration) -> Self {
        self.cleanup_interval = Some(interval);
        self
    }

    /// Set maximum number of cache entries
    pub fn max_entries(mut self, max: usize) -> Self {
        self.max_entries = Some(max);
        self
    }

    /// Set TTL jitter factor (0.0 - 1.0)
    pub fn ttl_jitter(mut self, jitter: f64) -> Self {
        self.ttl_jitter = Some(jitter);
        self
    }

    /// Enable or disable the background sweep
    pub fn enable_auto_cleanup(mut self, enable: bool) -> Self {
        self.enable_auto_cleanup = Some(enable);
        self
    }

    /// Enable or disable metrics collection
    pub fn enable_metrics(mut self, enable: bool) -> Self {
        self.enable_metrics = Some(enable);
        self
    }

    /// Build the cache configuration
    pub fn build(self) -> SharedCacheConfig {
        let defaults = SharedCacheConfig::default();

        SharedCacheConfig {
            default_ttl: self.default_ttl.unwrap_or(defaults.default_ttl),
            cleanup_interval: self.cleanup_interval.unwrap_or(defaults.cleanup_interval),
            max_entries: self.max_entries.unwrap_or(defaults.max_entries),
            ttl_jitter: self.ttl_jitter.unwrap_or(defaults.ttl_jitter),
            enable_auto_cleanup: self
                .enable_auto_cleanup
                .unwrap_or(defaults.enable_auto_cleanup),
            enable_metrics: self.enable_metrics.unwrap_or(defaults.enable_metrics),
        }
    }
}

/// Preset configurations
impl SharedCacheConfig {
    /// Short TTL for collections that change often
    pub fn short_lived() -> Self {
        Self {
            default_ttl: Duration::from_secs(30),
            cleanup_interval: Duration::from_secs(60),
            ttl_jitter: 0.1,
            ..Default::default()
        }
    }

    /// Long TTL for reference data that rarely changes
    pub fn long_lived() -> Self {
        Self {
            default_ttl: Duration::from_secs(3600),
            cleanup_interval: Duration::from_secs(900),
            max_entries: 1_000_000,
            ttl_jitter: 0.1,
            ..Default::default()
        }
    }
}
