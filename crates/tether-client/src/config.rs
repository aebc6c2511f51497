use std::{fs, path::Path, path::PathBuf, sync::LazyLock, time::Duration};

use anyhow::{Context as _, Result};
use serde::{Deserialize, Serialize};

use crate::session::{ReconnectPolicy, SessionManager, SessionManagerBuilder};

/// Environment variable consulted when the config file carries no token
pub const TOKEN_ENV: &str = "TETHER_TOKEN";

/// `.env` file loaded on first use
pub static ENV_GUARD: LazyLock<Result<PathBuf, dotenvy::Error>> = LazyLock::new(dotenvy::dotenv);

/// Session configuration as read from a TOML file
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct SessionConfig {
    pub base_url: String,
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default = "default_auto_connect")]
    pub auto_connect: bool,
    #[serde(default)]
    pub policy: PolicyConfig,
}

fn default_auto_connect() -> bool {
    true
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct PolicyConfig {
    pub should_reconnect: bool,
    pub reconnect_interval_ms: u64,
    pub max_reconnect_attempts: u32,
    pub namespace: String,
    pub connect_timeout_ms: u64,
    pub client_type: String,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        let policy = ReconnectPolicy::default();
        Self {
            should_reconnect: policy.should_reconnect,
            reconnect_interval_ms: millis(policy.reconnect_interval),
            max_reconnect_attempts: policy.max_reconnect_attempts,
            namespace: policy.namespace,
            connect_timeout_ms: millis(policy.connect_timeout),
            client_type: policy.client_type,
        }
    }
}

/// Whole milliseconds, saturating at `u64::MAX`
fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

impl From<&PolicyConfig> for ReconnectPolicy {
    fn from(config: &PolicyConfig) -> Self {
        Self::new()
            .should_reconnect(config.should_reconnect)
            .reconnect_interval(Duration::from_millis(config.reconnect_interval_ms))
            .max_reconnect_attempts(config.max_reconnect_attempts)
            .namespace(config.namespace.clone())
            .connect_timeout(Duration::from_millis(config.connect_timeout_ms))
            .client_type(config.client_type.clone())
    }
}

impl SessionConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            token: None,
            auto_connect: default_auto_connect(),
            policy: PolicyConfig::default(),
        }
    }

    pub fn load<P: AsRef<Path>>(config_path: P) -> Result<Self> {
        let config_path_str = config_path.as_ref().display().to_string();
        let content = fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read config file: {config_path_str}"))?;

        let config = Self::from_toml_str(&content)
            .with_context(|| format!("Invalid config file: {config_path_str}"))?;
        log::debug!("Loaded session config from: {config_path_str}");

        Ok(config)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content).context("Failed to parse TOML config")?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.base_url.trim().is_empty() {
            return Err(anyhow::anyhow!("`base_url` must not be empty"));
        }
        if self.policy.reconnect_interval_ms == 0 {
            return Err(anyhow::anyhow!("`policy.reconnect_interval_ms` must be > 0"));
        }
        if self.policy.connect_timeout_ms == 0 {
            return Err(anyhow::anyhow!("`policy.connect_timeout_ms` must be > 0"));
        }
        Ok(())
    }

    /// Token from the file, else from `TETHER_TOKEN`. Empty values count as absent.
    pub fn credential(&self) -> Option<String> {
        if let Some(token) = self.token.as_ref().filter(|t| !t.is_empty()) {
            return Some(token.clone());
        }

        if let Err(e) = ENV_GUARD.as_ref() {
            log::debug!("No .env file loaded: {e}");
        }
        std::env::var(TOKEN_ENV).ok().filter(|t| !t.is_empty())
    }

    pub fn policy(&self) -> ReconnectPolicy {
        ReconnectPolicy::from(&self.policy)
    }

    /// Builder preloaded with everything this config specifies
    pub fn builder(&self) -> SessionManagerBuilder {
        let builder = SessionManager::builder(self.base_url.clone())
            .policy(self.policy())
            .auto_connect(self.auto_connect);

        match self.credential() {
            Some(token) => builder.credential(token),
            None => builder,
        }
    }
}
