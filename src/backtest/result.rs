//! Aggregation of finished backtests and result persistence.

use super::runner::{Backtest, RunState};
use super::stats::{GroupStats, PerformanceStats, StatsTable};
use crate::data::{Frame, Series};
use crate::error::{Error, Result};
use crate::strategy::StrategySnapshot;
use crate::utils::decimal::to_f64;
use chrono::{Local, NaiveDate};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Refers to a backtest of a [`ResultTable`] by position or by name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BacktestKey {
    Index(usize),
    Name(String),
}

impl From<usize> for BacktestKey {
    fn from(i: usize) -> Self {
        BacktestKey::Index(i)
    }
}

impl From<&str> for BacktestKey {
    fn from(name: &str) -> Self {
        BacktestKey::Name(name.to_string())
    }
}

impl From<String> for BacktestKey {
    fn from(name: String) -> Self {
        BacktestKey::Name(name)
    }
}

/// Persisted state of one backtest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSnapshot {
    pub name: String,
    pub initial_capital: f64,
    pub bankrupt_stopped: bool,
    pub strategy: StrategySnapshot,
    pub stats: PerformanceStats,
}

/// Persisted state of a [`ResultTable`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultSnapshot {
    pub names: Vec<String>,
    pub prices: Frame,
    pub stats: StatsTable,
    pub runs: Vec<RunSnapshot>,
}

/// Several finished backtests and the statistics of their price series.
pub struct ResultTable {
    backtests: Vec<Backtest>,
    stats: GroupStats,
}

impl ResultTable {
    /// Aggregate finished backtests, keeping their order.
    ///
    /// Every backtest must have run and names must be unique.
    pub fn new(backtests: Vec<Backtest>) -> Result<Self> {
        {
            let mut seen = HashSet::new();
            for backtest in &backtests {
                backtest.ensure_run()?;
                if !seen.insert(backtest.name()) {
                    return Err(Error::DuplicateRunName(backtest.name().to_string()));
                }
            }
        }

        let prices = Frame::from_series(
            backtests
                .iter()
                .map(|b| (b.name().to_string(), b.strategy().prices().clone())),
        );
        let stats = GroupStats::new(prices);

        Ok(Self { backtests, stats })
    }

    pub fn backtests(&self) -> &[Backtest] {
        &self.backtests
    }

    pub fn names(&self) -> Vec<&str> {
        self.backtests.iter().map(|b| b.name()).collect()
    }

    pub fn len(&self) -> usize {
        self.backtests.len()
    }

    pub fn is_empty(&self) -> bool {
        self.backtests.is_empty()
    }

    /// Price series of every run, one column per run, on the union of dates.
    pub fn prices(&self) -> &Frame {
        self.stats.prices()
    }

    pub fn stats(&self) -> &GroupStats {
        &self.stats
    }

    pub fn get(&self, key: impl Into<BacktestKey>) -> Result<&Backtest> {
        match key.into() {
            BacktestKey::Index(i) => self
                .backtests
                .get(i)
                .ok_or_else(|| Error::UnknownBacktest(i.to_string())),
            BacktestKey::Name(name) => self
                .backtests
                .iter()
                .find(|b| b.name() == name)
                .ok_or(Error::UnknownBacktest(name)),
        }
    }

    pub fn weights(&self, key: impl Into<BacktestKey>) -> Result<&Frame> {
        self.get(key)?.weights()
    }

    pub fn security_weights(&self, key: impl Into<BacktestKey>) -> Result<&Frame> {
        self.get(key)?.security_weights()
    }

    pub fn herfindahl_index(&self, key: impl Into<BacktestKey>) -> Result<Series> {
        self.get(key)?.herfindahl_index()
    }

    pub fn turnover(&self, key: impl Into<BacktestKey>) -> Result<Series> {
        self.get(key)?.turnover()
    }

    /// Statistics table of every run.
    pub fn display(&self) -> String {
        self.stats.table().to_string()
    }

    /// Monthly returns table of one run.
    pub fn display_monthly_returns(&self, key: impl Into<BacktestKey>) -> Result<String> {
        let name = self.get(key)?.name();
        self.stats
            .get(name)
            .map(|s| s.monthly_returns.to_string())
            .ok_or_else(|| Error::UnknownBacktest(name.to_string()))
    }

    pub fn snapshot(&self) -> ResultSnapshot {
        ResultSnapshot {
            names: self.names().iter().map(|n| n.to_string()).collect(),
            prices: self.prices().clone(),
            stats: self.stats.table().clone(),
            runs: self
                .backtests
                .iter()
                .zip(self.stats.iter())
                .map(|(b, stats)| RunSnapshot {
                    name: b.name().to_string(),
                    initial_capital: to_f64(b.config().initial_capital),
                    bankrupt_stopped: b.state() == RunState::BankruptStopped,
                    strategy: b.strategy().snapshot(),
                    stats: stats.clone(),
                })
                .collect(),
        }
    }

    /// Write a snapshot to `dir` under a name that does not clash with an
    /// earlier save, and return its path.
    pub fn save<P: AsRef<Path>>(&self, dir: P) -> Result<PathBuf> {
        let path = log_name(dir.as_ref(), &self.names().join(";"), Local::now().date_naive())?;

        write_snapshot(&path, &self.snapshot())?;

        info!("Saved {} backtests to {}", self.len(), path.display());
        Ok(path)
    }

    /// Read back a snapshot written by [`ResultTable::save`].
    pub fn load<P: AsRef<Path>>(path: P) -> Result<ResultSnapshot> {
        let reader = BufReader::new(File::open(path)?);
        Ok(bincode::deserialize_from(reader)?)
    }
}

/// Serialize `value` to `path`, removing the file again if writing fails.
fn write_snapshot<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let written = File::create(path).map_err(Error::from).and_then(|file| {
        let mut writer = BufWriter::new(file);
        bincode::serialize_into(&mut writer, value)?;
        writer.flush()?;
        Ok(())
    });
    if written.is_err() && path.exists() {
        if let Err(e) = std::fs::remove_file(path) {
            warn!("Failed to remove partial snapshot {}: {}", path.display(), e);
        }
    }
    written
}

/// `{dir}/{date}_{name}_{seq:05}.log`, with `seq` one past the highest
/// sequence already used for that date and name (0 if none).
pub fn log_name(dir: &Path, name: &str, date: NaiveDate) -> Result<PathBuf> {
    let prefix = format!("{}_{}_", date.format("%Y-%m-%d"), name);

    let mut next = 0u64;
    for entry in std::fs::read_dir(dir)? {
        let file_name = entry?.file_name();
        let Some(file_name) = file_name.to_str() else {
            continue;
        };
        let sequence = file_name
            .strip_prefix(&prefix)
            .and_then(|rest| rest.strip_suffix(".log"))
            .and_then(|seq| seq.parse::<u64>().ok());
        if let Some(seq) = sequence {
            let after = seq.checked_add(1).ok_or_else(|| {
                Error::InvalidIndex(format!("save sequence exhausted for '{}'", prefix))
            })?;
            next = next.max(after);
        }
    }

    Ok(dir.join(format!("{}{:05}.log", prefix, next)))
}
