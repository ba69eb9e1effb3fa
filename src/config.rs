//! Configuration loading.
//!
//! Configuration is loaded from TOML files with the following resolution order:
//! 1. explicit path (e.g. `gatectl --config <path>`)
//! 2. `~/.portcullis/config.toml` (user)
//! 3. `/etc/portcullis/config.toml` (system)
//!
//! Every field has a default, so an empty file (or no file at all, via
//! [`GatewayConfig::discover`]) is a valid configuration. Environment
//! variables override the file:
//! - `PORTCULLIS_CACHE_URL`, then `REDIS_URL` → `cache.url`
//! - `PORTCULLIS_FAILURE_POLICY` → `limits.failure_policy`

use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::cache::CacheConfig;
use crate::limiter::{FailurePolicy, LimiterConfig};
use crate::moderation::RiskLevel;
use crate::{PortcullisError, Result};

/// Environment variables consulted for the cache URL, in priority order.
const CACHE_URL_ENV_VARS: &[&str] = &["PORTCULLIS_CACHE_URL", "REDIS_URL"];

const FAILURE_POLICY_ENV_VAR: &str = "PORTCULLIS_FAILURE_POLICY";

/// Complete gateway configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct GatewayConfig {
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub limits: LimiterConfig,
    #[serde(default)]
    pub moderation: ModerationConfig,
}

/// Moderation stage settings.
#[derive(Debug, Clone, Deserialize)]
pub struct ModerationConfig {
    /// Lowest risk level that rejects admission (default: medium).
    #[serde(default = "default_block_at")]
    pub block_at: RiskLevel,
    /// How long moderation results are memoized in the cache, in seconds.
    /// `0` disables memoization (default: 300).
    #[serde(default = "default_memo_ttl_secs")]
    pub memo_ttl_secs: u64,
}

impl Default for ModerationConfig {
    fn default() -> Self {
        Self {
            block_at: default_block_at(),
            memo_ttl_secs: default_memo_ttl_secs(),
        }
    }
}

fn default_block_at() -> RiskLevel {
    RiskLevel::Medium
}

fn default_memo_ttl_secs() -> u64 {
    300
}

impl ModerationConfig {
    /// Memo TTL, or `None` when memoization is disabled.
    pub fn memo_ttl(&self) -> Option<Duration> {
        (self.memo_ttl_secs > 0).then(|| Duration::from_secs(self.memo_ttl_secs))
    }
}

impl GatewayConfig {
    /// Load configuration from the standard locations.
    ///
    /// Resolution order:
    /// 1. Explicit path (if provided)
    /// 2. `~/.portcullis/config.toml`
    /// 3. `/etc/portcullis/config.toml`
    ///
    /// Environment overrides are not applied; see [`apply_env`](Self::apply_env).
    pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
        let path = Self::resolve_config_path(explicit_path)?;
        Self::from_file(&path)
    }

    /// Like [`load`](Self::load), but a missing file (with no explicit path)
    /// yields the defaults, and environment overrides are applied.
    pub fn discover(explicit_path: Option<&Path>) -> Result<Self> {
        let config = match explicit_path {
            Some(path) => Self::load(Some(path))?,
            None => match Self::find_standard_path() {
                Some(path) => Self::from_file(&path)?,
                None => Self::default(),
            },
        };
        config.apply_env()
    }

    /// Parse a specific TOML file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| {
            PortcullisError::Configuration(format!("Failed to read config file {path:?}: {e}"))
        })?;
        let config: Self = toml::from_str(&content).map_err(|e| {
            PortcullisError::Configuration(format!("Failed to parse config file {path:?}: {e}"))
        })?;
        config.limits.validate()?;
        Ok(config)
    }

    /// Apply environment variable overrides.
    pub fn apply_env(self) -> Result<Self> {
        self.apply_overrides(|name| std::env::var(name).ok())
    }

    pub(crate) fn apply_overrides(
        mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self> {
        if let Some(url) = CACHE_URL_ENV_VARS
            .iter()
            .find_map(|name| lookup(name).filter(|v| !v.trim().is_empty()))
        {
            self.cache.url = Some(url);
        }

        if let Some(policy) = lookup(FAILURE_POLICY_ENV_VAR) {
            self.limits.failure_policy = policy.parse::<FailurePolicy>()?;
        }

        Ok(self)
    }

    /// Resolve the config file path.
    fn resolve_config_path(explicit: Option<&Path>) -> Result<PathBuf> {
        if let Some(path) = explicit {
            if path.exists() {
                return Ok(path.to_path_buf());
            }
            return Err(PortcullisError::Configuration(format!(
                "Config file not found: {path:?}"
            )));
        }

        Self::find_standard_path().ok_or_else(|| {
            PortcullisError::Configuration(
                "No config file found. Create ~/.portcullis/config.toml or /etc/portcullis/config.toml"
                    .to_string(),
            )
        })
    }

    fn find_standard_path() -> Option<PathBuf> {
        // User config
        if let Some(home) = dirs::home_dir() {
            let user_config = home.join(".portcullis").join("config.toml");
            if user_config.exists() {
                return Some(user_config);
            }
        }

        // System config
        let system_config = PathBuf::from("/etc/portcullis/config.toml");
        system_config.exists().then_some(system_config)
    }
}
