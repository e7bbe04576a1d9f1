//! Backtesting: running strategies over historical data and comparing runs.
//!
//! This module provides:
//! - `Backtest`: one strategy driven date by date over a data frame
//! - Portfolio analytics (weights, concentration, turnover) over a finished run
//! - `ResultTable`: several finished runs aggregated into one statistics table
//! - `benchmark_random`: a run compared against randomised versions of itself
//!
//! # Example
//!
//! ```rust,ignore
//! use ksif_backtest::backtest::{run_all, Backtest, BacktestConfig};
//! use ksif_backtest::strategy::WeightedPortfolio;
//!
//! let strategy = WeightedPortfolio::equal("equal").with_rebalance_every(20);
//! let backtest = Backtest::new(&strategy, data, BacktestConfig::default())?;
//! let result = run_all(vec![backtest])?;
//! println!("{}", result.stats().table());
//! ```

mod analytics;
mod commission;
mod random;
mod result;
mod runner;
mod stats;

pub use analytics::{DateSelector, Holding, PositionEntry};
pub use commission::{commission_high, commission_low, CommissionPreset};
pub use random::{
    benchmark_random, BenchmarkOptions, HistogramBin, RandomBenchmarkResult, StatisticDistribution,
    BASELINE_NAME,
};
pub use result::{log_name, BacktestKey, ResultSnapshot, ResultTable, RunSnapshot};
pub use runner::{Backtest, RunState};
pub use stats::{
    GroupStats, MonthlyReturns, PerformanceStats, StatsTable, YearReturns, STATISTICS,
    TRADING_DAYS,
};

use crate::error::Result;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Configuration for a backtest run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BacktestConfig {
    /// Capital the strategy is seeded with
    pub initial_capital: Decimal,

    /// Commission schedule applied to every trade
    pub commissions: CommissionPreset,

    /// Round positions down to whole shares
    pub integer_positions: bool,

    /// Log progress every this many dates (0 = never)
    pub progress_every: usize,
}

impl Default for BacktestConfig {
    fn default() -> Self {
        Self {
            initial_capital: Decimal::new(1_000_000, 0),
            commissions: CommissionPreset::High,
            integer_positions: true,
            progress_every: 100,
        }
    }
}

/// Run every backtest that has not run yet and aggregate them.
pub fn run_all(backtests: Vec<Backtest>) -> Result<ResultTable> {
    let mut backtests = backtests;
    for backtest in backtests.iter_mut() {
        if !backtest.has_run() {
            backtest.run()?;
        }
    }
    ResultTable::new(backtests)
}
