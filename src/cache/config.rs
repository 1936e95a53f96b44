//! Configuration for the cache system

use crate::error::{CacheError, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default number of lock waits before giving up with `LockWaitTimeout`
pub const DEFAULT_LOCK_WAIT_LIMIT: u32 = 2;

/// Configuration for the cache engine
///
/// The namespace is supplied by the collaborator (typically derived from a
/// schema fingerprint) and prefixed to every cache key as an opaque string.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Versioned key prefix; changing it implicitly invalidates every entry
    pub namespace: String,

    /// Identifies this client on fill locks; random when unset
    pub client_id: Option<String>,

    /// How long to sleep between reads while another client holds a fill lock.
    /// `None` disables fill locking for single-key fetches.
    pub fill_lock_duration: Option<Duration>,

    /// How many lock waits a fetch may perform before failing
    pub lock_wait_limit: u32,

    /// TTL of the DELETED marker written on invalidation
    pub deleted_ttl: Duration,

    /// TTL of filled values, `None` for no expiry
    pub value_ttl: Option<Duration>,

    /// TTL jitter factor (0.0 - 1.0) applied to `value_ttl`
    /// Spreads expiry of entries filled together
    pub ttl_jitter: f64,

    /// Expiry of fill locks taken when no fill lock duration applies
    pub lock_ttl: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            namespace: "IDC:1".to_string(),
            client_id: None,
            fill_lock_duration: None,
            lock_wait_limit: DEFAULT_LOCK_WAIT_LIMIT,
            deleted_ttl: Duration::from_secs(60),
            value_ttl: None,
            ttl_jitter: 0.0,
            lock_ttl: Duration::from_secs(5),
        }
    }
}

impl CacheConfig {
    /// Create a new builder for cache configuration
    pub fn builder() -> CacheConfigBuilder {
        CacheConfigBuilder::default()
    }

    /// Configuration for hot keys under heavy concurrent load
    pub fn contended() -> Self {
        Self {
            fill_lock_duration: Some(Duration::from_millis(100)),
            lock_wait_limit: 5,
            ..Default::default()
        }
    }

    /// Load configuration from the environment (and a `.env` file if present)
    ///
    /// Recognized variables: `IDC_NAMESPACE`, `IDC_FILL_LOCK_MS`,
    /// `IDC_LOCK_WAIT_LIMIT`, `IDC_DELETED_TTL_SECS`, `IDC_VALUE_TTL_SECS`.
    pub fn from_env() -> Result<Self> {
        dotenv::dotenv().ok();
        let mut config = Self::default();

        if let Ok(namespace) = std::env::var("IDC_NAMESPACE") {
            config.namespace = namespace;
        }
        if let Some(ms) = env_number("IDC_FILL_LOCK_MS")? {
            config.fill_lock_duration = Some(Duration::from_millis(ms));
        }
        if let Some(limit) = env_number("IDC_LOCK_WAIT_LIMIT")? {
            config.lock_wait_limit = u32::try_from(limit)
                .map_err(|_| CacheError::Config("IDC_LOCK_WAIT_LIMIT out of range".to_string()))?;
        }
        if let Some(secs) = env_number("IDC_DELETED_TTL_SECS")? {
            config.deleted_ttl = Duration::from_secs(secs);
        }
        if let Some(secs) = env_number("IDC_VALUE_TTL_SECS")? {
            config.value_ttl = Some(Duration::from_secs(secs));
        }

        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.namespace.is_empty() {
            return Err(CacheError::Config("namespace must not be empty".to_string()));
        }

        if let Some(duration) = self.fill_lock_duration {
            if duration.is_zero() {
                return Err(CacheError::Config(
                    "fill_lock_duration must be greater than 0".to_string(),
                ));
            }
        }

        if self.lock_wait_limit == 0 {
            return Err(CacheError::Config(
                "lock_wait_limit must be greater than 0".to_string(),
            ));
        }

        if self.deleted_ttl.is_zero() {
            return Err(CacheError::Config("deleted_ttl must be greater than 0".to_string()));
        }

        if self.ttl_jitter < 0.0 || self.ttl_jitter > 1.0 {
            return Err(CacheError::Config(
                "ttl_jitter must be between 0.0 and 1.0".to_string(),
            ));
        }

        Ok(())
    }

    /// Calculate the value TTL with jitter applied
    pub fn ttl_with_jitter(&self) -> Option<Duration> {
        let ttl = self.value_ttl?;
        if self.ttl_jitter == 0.0 {
            return Some(ttl);
        }

        let base_secs = ttl.as_secs_f64();
        let jitter_range = base_secs * self.ttl_jitter;
        let jitter = (rand::random::<f64>() * 2.0 - 1.0) * jitter_range;
        let final_secs = (base_secs + jitter).max(1.0);

        Some(Duration::try_from_secs_f64(final_secs).unwrap_or(ttl))
    }

    /// Default per-call fetch options
    pub fn fetch_options(&self) -> FetchOptions {
        FetchOptions {
            fill_lock_duration: self.fill_lock_duration,
            lock_wait_limit: self.lock_wait_limit,
        }
    }
}

/// Per-call parameters of a single-key fetch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchOptions {
    /// Sleep between lock re-reads; `None` fetches without a fill lock
    pub fill_lock_duration: Option<Duration>,

    /// Maximum number of lock waits
    pub lock_wait_limit: u32,
}

impl Default for FetchOptions {
    fn default() -> Self {
        Self {
            fill_lock_duration: None,
            lock_wait_limit: DEFAULT_LOCK_WAIT_LIMIT,
        }
    }
}

impl FetchOptions {
    /// Fetch with a fill lock
    pub fn with_fill_lock(duration: Duration, lock_wait_limit: u32) -> Self {
        Self {
            fill_lock_duration: Some(duration),
            lock_wait_limit,
        }
    }

    /// Expiry for a lock taken under these options
    ///
    /// Outlives every wait a contending client may perform, so an abandoned
    /// lock disappears on its own.
    pub fn lock_ttl(&self, fallback: Duration) -> Duration {
        match self.fill_lock_duration {
            Some(duration) => duration
                .checked_mul(self.lock_wait_limit.saturating_add(1))
                .unwrap_or(Duration::MAX),
            None => fallback,
        }
    }
}

/// Builder for cache configuration with validation
#[derive(Debug, Default)]
pub struct CacheConfigBuilder {
    namespace: Option<String>,
    client_id: Option<String>,
    fill_lock_duration: Option<Duration>,
    lock_wait_limit: Option<u32>,
    deleted_ttl: Option<Duration>,
    value_ttl: Option<Duration>,
    ttl_jitter: Option<f64>,
    lock_ttl: Option<Duration>,
}

impl CacheConfigBuilder {
    /// Set the versioned key namespace
    pub fn namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }

    /// Set the client id recorded on fill locks
    pub fn client_id(mut self, client_id: impl Into<String>) -> Self {
        self.client_id = Some(client_id.into());
        self
    }

    /// Enable fill locking with the given wait duration
    pub fn fill_lock_duration(mut self, duration: Duration) -> Self {
        self.fill_lock_duration = Some(duration);
        self
    }

    /// Set the maximum number of lock waits
    pub fn lock_wait_limit(mut self, limit: u32) -> Self {
        self.lock_wait_limit = Some(limit);
        self
    }

    /// Set the TTL of DELETED markers
    pub fn deleted_ttl(mut self, ttl: Duration) -> Self {
        self.deleted_ttl = Some(ttl);
        self
    }

    /// Set the TTL of filled values
    pub fn value_ttl(mut self, ttl: Duration) -> Self {
        self.value_ttl = Some(ttl);
        self
    }

    /// Set TTL jitter factor (0.0 - 1.0)
    pub fn ttl_jitter(mut self, jitter: f64) -> Self {
        self.ttl_jitter = Some(jitter);
        self
    }

    /// Set the expiry of fill locks taken without a fill lock duration
    pub fn lock_ttl(mut self, ttl: Duration) -> Self {
        self.lock_ttl = Some(ttl);
        self
    }

    /// Build the cache configuration
    pub fn build(self) -> CacheConfig {
        let defaults = CacheConfig::default();

        CacheConfig {
            namespace: self.namespace.unwrap_or(defaults.namespace),
            client_id: self.client_id.or(defaults.client_id),
            fill_lock_duration: self.fill_lock_duration.or(defaults.fill_lock_duration),
            lock_wait_limit: self.lock_wait_limit.unwrap_or(defaults.lock_wait_limit),
            deleted_ttl: self.deleted_ttl.unwrap_or(defaults.deleted_ttl),
            value_ttl: self.value_ttl.or(defaults.value_ttl),
            ttl_jitter: self.ttl_jitter.unwrap_or(defaults.ttl_jitter),
            lock_ttl: self.lock_ttl.unwrap_or(defaults.lock_ttl),
        }
    }
}

fn env_number(name: &str) -> Result<Option<u64>> {
    match std::env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse::<u64>()
            .map(Some)
            .map_err(|e| CacheError::Config(format!("{} must be a number: {}", name, e))),
        Err(_) => Ok(None),
    }
}
