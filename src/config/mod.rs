//! Configuration management for the backtesting toolkit.
//!
//! Loads settings from an optional `ksif.toml`, then `KSIF__*` environment
//! variables (a `.env` file is read first).

use crate::backtest::BacktestConfig;
use crate::data::DEFAULT_BASE_URL;
use anyhow::{Context, Result};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Main application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Capital, commissions and run-loop settings
    #[serde(default)]
    pub backtest: BacktestConfig,
    /// Data retrieval defaults
    #[serde(default)]
    pub data: DataConfig,
    /// Random benchmark settings
    #[serde(default)]
    pub benchmark: BenchmarkConfig,
    /// Where results and logs are written
    #[serde(default)]
    pub output: OutputConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataConfig {
    /// Web source name; picks the default field and Korean index aliases
    #[serde(default = "default_source")]
    pub source: String,
    /// Drop dates on which any ticker is missing
    #[serde(default = "default_true")]
    pub common_dates: bool,
    /// Fill gaps with the last observation
    #[serde(default)]
    pub forward_fill: bool,
    /// Normalise tickers into column labels
    #[serde(default = "default_true")]
    pub clean_tickers: bool,
    /// Separator between a ticker and its field, e.g. `AAPL;Close`
    #[serde(default = "default_ticker_field_sep")]
    pub ticker_field_sep: String,
    /// Chart endpoint of the web provider
    #[serde(default = "default_web_base_url")]
    pub web_base_url: String,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BenchmarkConfig {
    /// Number of random runs
    #[serde(default = "default_nsim")]
    pub nsim: usize,
    /// Statistic compared against the random distribution
    #[serde(default = "default_statistic")]
    pub statistic: String,
    /// Histogram bins in the distribution summary
    #[serde(default = "default_bins")]
    pub bins: usize,
    /// Base seed; run `i` is seeded with `seed + i`
    #[serde(default)]
    pub seed: Option<u64>,
    /// Run the random backtests on the rayon pool
    #[serde(default = "default_true")]
    pub parallel: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputConfig {
    #[serde(default = "default_save_dir")]
    pub save_dir: String,
    #[serde(default = "default_log_dir")]
    pub log_dir: String,
}

// Default value functions
fn default_true() -> bool {
    true
}

fn default_source() -> String {
    "yahoo".to_string()
}

fn default_ticker_field_sep() -> String {
    ";".to_string()
}

fn default_web_base_url() -> String {
    DEFAULT_BASE_URL.to_string()
}

fn default_request_timeout() -> u64 {
    30
}

fn default_nsim() -> usize {
    100
}

fn default_statistic() -> String {
    "monthly_sharpe".to_string()
}

fn default_bins() -> usize {
    20
}

fn default_save_dir() -> String {
    ".".to_string()
}

fn default_log_dir() -> String {
    "logs".to_string()
}

impl Config {
    /// Load configuration from environment variables and config files.
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();

        let config = config::Config::builder()
            .add_source(config::File::with_name("ksif").required(false))
            .add_source(config::Environment::default().separator("__").prefix("KSIF"))
            .build()
            .context("Failed to build configuration")?;

        config
            .try_deserialize()
            .context("Failed to deserialize configuration")
    }

    /// Validate configuration values.
    pub fn validate(&self) -> Result<()> {
        anyhow::ensure!(
            self.backtest.initial_capital > Decimal::ZERO,
            "initial_capital must be positive"
        );

        anyhow::ensure!(self.benchmark.nsim > 0, "nsim must be at least 1");

        anyhow::ensure!(self.benchmark.bins > 0, "bins must be at least 1");

        anyhow::ensure!(
            !self.data.ticker_field_sep.is_empty(),
            "ticker_field_sep must not be empty"
        );

        Ok(())
    }
}

impl Default for DataConfig {
    fn default() -> Self {
        Self {
            source: default_source(),
            common_dates: true,
            forward_fill: false,
            clean_tickers: true,
            ticker_field_sep: default_ticker_field_sep(),
            web_base_url: default_web_base_url(),
            request_timeout_secs: default_request_timeout(),
        }
    }
}

impl Default for BenchmarkConfig {
    fn default() -> Self {
        Self {
            nsim: default_nsim(),
            statistic: default_statistic(),
            bins: default_bins(),
            seed: None,
            parallel: true,
        }
    }
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            save_dir: default_save_dir(),
            log_dir: default_log_dir(),
        }
    }
}
