//! Daemon configuration

use anyhow::{bail, Context, Result};
use librarian_shared_config::{CommonConfig, ControlConfig, Environment};
use librarian_worker::WorkerConfig;

/// Daemon configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    /// Configuration shared with the CLI
    pub common: CommonConfig,

    /// Pool, queue, template and scheduler settings
    pub worker: WorkerConfig,
}

impl Config {
    /// Load configuration from environment variables
    ///
    /// Binding a non-loopback address without any token is refused here so
    /// the daemon fails before it builds anything. The server checks the same
    /// rule again right before it binds.
    pub fn from_env() -> Result<Self> {
        let common = CommonConfig::from_env().context("Failed to load control configuration")?;
        let worker = WorkerConfig::from_env()?;

        let config = Self { common, worker };
        config.validate()?;
        Ok(config)
    }

    /// Check cross-field rules
    pub fn validate(&self) -> Result<()> {
        let control = self.control();
        if !control.is_loopback() && !control.has_tokens() {
            bail!(
                "Authentication required: refusing to bind {} without LIBRARIAN_API_TOKENS",
                control.bind_address
            );
        }
        if self.is_production() && !control.has_tokens() {
            tracing::warn!(
                "No control tokens configured in production; the control server only listens on loopback"
            );
        }
        Ok(())
    }

    pub fn control(&self) -> &ControlConfig {
        &self.common.control
    }

    pub fn environment(&self) -> Environment {
        self.common.environment
    }

    pub fn is_production(&self) -> bool {
        self.common.environment.is_production()
    }
}
