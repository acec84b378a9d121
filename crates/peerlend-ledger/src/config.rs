//! Ledger configuration

use anyhow::{ensure, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use peerlend_common::{DEFAULT_MAX_DURATION_MONTHS, MAX_INTEREST_RATE_PERCENT};

/// Environment variable prefix, e.g. `PEERLEND_GATE_TIMEOUT_MS`
pub const ENV_PREFIX: &str = "PEERLEND";

/// Optional configuration file name (any format the `config` crate knows)
pub const CONFIG_FILE: &str = "peerlend";

/// Loan ledger limits and concurrency settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LedgerConfig {
    /// Longest accepted loan term
    pub max_duration_months: u32,
    /// Highest accepted annual rate, never above 100
    pub max_interest_rate_percent: u32,
    /// Largest accepted principal in base units
    pub max_principal: u64,
    /// How long a writer waits for a busy loan before giving up
    pub gate_timeout_ms: u64,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            max_duration_months: DEFAULT_MAX_DURATION_MONTHS,
            max_interest_rate_percent: MAX_INTEREST_RATE_PERCENT,
            max_principal: u64::MAX,
            gate_timeout_ms: 5000,
        }
    }
}

impl LedgerConfig {
    /// Load configuration from `.env`, `peerlend.*` and `PEERLEND_*` variables
    pub fn load() -> Result<Self> {
        // Try to load .env file
        let _ = dotenvy::dotenv();

        let settings = config::Config::builder()
            .add_source(config::File::with_name(CONFIG_FILE).required(false))
            .add_source(config::Environment::with_prefix(ENV_PREFIX).try_parsing(true))
            .build()
            .context("failed to read ledger configuration")?;

        Self::from_settings(settings)
    }

    /// Load configuration from an explicit file, still honouring the environment
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let settings = config::Config::builder()
            .add_source(config::File::from(path))
            .add_source(config::Environment::with_prefix(ENV_PREFIX).try_parsing(true))
            .build()
            .with_context(|| format!("failed to read {}", path.display()))?;

        Self::from_settings(settings)
    }

    fn from_settings(settings: config::Config) -> Result<Self> {
        let cfg: Self = settings
            .try_deserialize()
            .context("invalid ledger configuration")?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Check the limits are usable
    pub fn validate(&self) -> Result<()> {
        ensure!(
            self.max_duration_months >= 1,
            "max_duration_months must be at least 1"
        );
        ensure!(
            self.max_interest_rate_percent <= MAX_INTEREST_RATE_PERCENT,
            "max_interest_rate_percent must not exceed {}",
            MAX_INTEREST_RATE_PERCENT
        );
        ensure!(self.max_principal >= 1, "max_principal must be positive");
        Ok(())
    }

    pub fn gate_timeout(&self) -> Duration {
        Duration::from_millis(self.gate_timeout_ms)
    }
}
