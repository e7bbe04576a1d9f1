//! Drives one strategy over a data frame, one date at a time.

use super::stats::PerformanceStats;
use super::BacktestConfig;
use crate::data::{Frame, Series};
use crate::error::{Error, Result};
use crate::strategy::{CommissionFn, Strategy};
use crate::utils::decimal::to_f64;
use std::sync::{Arc, OnceLock};
use tracing::{debug, info, warn};

/// Lifecycle of a [`Backtest`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Constructed,
    Running,
    Completed,
    /// The strategy went bankrupt; dates after that were not visited.
    BankruptStopped,
    /// The strategy returned an error; the run cannot be resumed.
    Failed,
}

/// A strategy bound to its data and configuration.
///
/// The strategy is cloned on construction, so one strategy value can serve
/// as a template for any number of backtests.
pub struct Backtest {
    pub(super) name: Option<String>,
    pub(super) strategy: Box<dyn Strategy>,
    pub(super) data: Arc<Frame>,
    pub(super) config: BacktestConfig,
    pub(super) commission: CommissionFn,
    pub(super) state: RunState,
    pub(super) stats: Option<PerformanceStats>,
    pub(super) weights: OnceLock<Frame>,
    pub(super) security_weights: OnceLock<Frame>,
}

impl Backtest {
    /// Bind a clone of `strategy` to `data`.
    ///
    /// Fails with every duplicated column name if the data has any.
    pub fn new(
        strategy: &dyn Strategy,
        data: impl Into<Arc<Frame>>,
        config: BacktestConfig,
    ) -> Result<Self> {
        let data = data.into();
        let duplicates = data.duplicate_columns();
        if !duplicates.is_empty() {
            return Err(Error::DuplicateColumns(duplicates));
        }

        let commission = config.commissions.to_fn();
        let mut strategy = strategy.clone_box();
        strategy.use_integer_positions(config.integer_positions);
        strategy.set_commissions(commission.clone());

        Ok(Self {
            name: None,
            strategy,
            data,
            config,
            commission,
            state: RunState::Constructed,
            stats: None,
            weights: OnceLock::new(),
            security_weights: OnceLock::new(),
        })
    }

    /// Name the run (and its strategy).
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.set_name(name);
        self
    }

    pub fn set_name(&mut self, name: impl Into<String>) {
        let name = name.into();
        self.strategy.set_name(&name);
        self.name = Some(name);
    }

    /// Replace the configured commission schedule with a custom one.
    pub fn with_commission_fn(mut self, commission: CommissionFn) -> Self {
        self.strategy.set_commissions(commission.clone());
        self.commission = commission;
        self
    }

    /// Explicit name, else the strategy's name.
    pub fn name(&self) -> &str {
        self.name.as_deref().unwrap_or_else(|| self.strategy.name())
    }

    pub fn is_named(&self) -> bool {
        self.name.is_some()
    }

    pub fn strategy(&self) -> &dyn Strategy {
        self.strategy.as_ref()
    }

    pub fn data(&self) -> &Arc<Frame> {
        &self.data
    }

    pub fn config(&self) -> &BacktestConfig {
        &self.config
    }

    pub fn commission(&self) -> &CommissionFn {
        &self.commission
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    pub fn has_run(&self) -> bool {
        matches!(self.state, RunState::Completed | RunState::BankruptStopped)
    }

    /// Run the strategy over every date of the data.
    ///
    /// Each date is marked, decided on, then marked again so the recorded
    /// state reflects that date's trades. A bankrupt strategy stops the
    /// loop at the date it is found bankrupt. A strategy error leaves the
    /// backtest in [`RunState::Failed`].
    pub fn run(&mut self) -> Result<()> {
        if self.state != RunState::Constructed {
            return Err(Error::AlreadyRun(self.name().to_string()));
        }
        self.state = RunState::Running;

        let name = self.name().to_string();
        let dates = self.data.index();
        info!(
            "Running backtest '{}' over {} dates ({} securities)",
            name,
            dates.len(),
            self.data.n_cols()
        );

        let bankrupt = match self.drive(&name) {
            Ok(bankrupt) => bankrupt,
            Err(e) => {
                warn!("Backtest '{}' failed: {}", name, e);
                self.state = RunState::Failed;
                return Err(e);
            }
        };

        let stats = PerformanceStats::calculate(name.clone(), self.strategy.prices());
        info!(
            "Backtest '{}' finished: total return {:.2}%",
            name,
            stats.total_return * 100.0
        );
        self.stats = Some(stats);
        self.state = if bankrupt {
            RunState::BankruptStopped
        } else {
            RunState::Completed
        };
        Ok(())
    }

    /// Date loop; returns whether the strategy went bankrupt.
    fn drive(&mut self, name: &str) -> Result<bool> {
        let dates = self.data.index();
        self.strategy.setup(self.data.clone())?;
        self.strategy.adjust(to_f64(self.config.initial_capital));

        for (i, date) in dates.iter().enumerate() {
            self.strategy.update(*date)?;

            if self.strategy.bankrupt() {
                warn!("Backtest '{}' went bankrupt on {}", name, date.date_naive());
                return Ok(true);
            }

            self.strategy.run()?;
            self.strategy.update(*date)?;

            let done = i + 1;
            if self.config.progress_every > 0 && done % self.config.progress_every == 0 {
                debug!("{}: {}/{} dates", name, done, dates.len());
            }
        }
        Ok(false)
    }

    pub(super) fn ensure_run(&self) -> Result<()> {
        if self.has_run() {
            Ok(())
        } else {
            Err(Error::NotRun(self.name().to_string()))
        }
    }

    /// Statistics of the strategy's price series.
    pub fn stats(&self) -> Result<&PerformanceStats> {
        self.stats
            .as_ref()
            .ok_or_else(|| Error::NotRun(self.name().to_string()))
    }

    /// Price index recorded by the run.
    pub fn prices(&self) -> Result<&Series> {
        self.ensure_run()?;
        Ok(self.strategy.prices())
    }
}
