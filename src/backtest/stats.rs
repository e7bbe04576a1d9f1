//! Performance statistics calculation for backtests.
//!
//! Provides total return, CAGR, drawdown, Sharpe/Sortino at daily, monthly
//! and yearly frequency, and the monthly returns table.

use crate::data::{Frame, Series, Timestamp};
use crate::error::{Error, Result};
use chrono::Datelike;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Periods per year used to annualise daily figures.
pub const TRADING_DAYS: f64 = 252.0;
const MONTHS: f64 = 12.0;
const DAYS_PER_YEAR: f64 = 365.25;

/// Names accepted by [`PerformanceStats::get`] and [`StatsTable`] lookups.
pub const STATISTICS: [&str; 20] = [
    "total_return",
    "cagr",
    "max_drawdown",
    "calmar",
    "daily_mean",
    "daily_vol",
    "daily_sharpe",
    "daily_sortino",
    "best_day",
    "worst_day",
    "monthly_mean",
    "monthly_vol",
    "monthly_sharpe",
    "best_month",
    "worst_month",
    "yearly_mean",
    "yearly_vol",
    "yearly_sharpe",
    "best_year",
    "worst_year",
];

const MONTH_LABELS: [&str; 12] = [
    "Jan", "Feb", "Mar", "Apr", "May", "Jun", "Jul", "Aug", "Sep", "Oct", "Nov", "Dec",
];

/// One row of the monthly returns table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct YearReturns {
    pub year: i32,
    /// NaN for months without observations
    pub months: [f64; 12],
    pub ytd: f64,
}

/// Year x month returns with a year-to-date column.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MonthlyReturns {
    pub years: Vec<YearReturns>,
}

impl fmt::Display for MonthlyReturns {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:<6}", "Year")?;
        for label in MONTH_LABELS {
            write!(f, "{:>8}", label)?;
        }
        writeln!(f, "{:>9}", "YTD")?;

        for row in &self.years {
            write!(f, "{:<6}", row.year)?;
            for value in row.months {
                write!(f, "{:>8}", pct(value))?;
            }
            writeln!(f, "{:>9}", pct(row.ytd))?;
        }
        Ok(())
    }
}

fn pct(value: f64) -> String {
    if value.is_nan() {
        "-".to_string()
    } else {
        format!("{:.2}", value * 100.0)
    }
}

/// Statistics of a single price series.
///
/// Undefined figures (too few observations, zero volatility) are NaN.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerformanceStats {
    pub name: String,
    pub start: Option<Timestamp>,
    pub end: Option<Timestamp>,

    // Returns
    pub total_return: f64,
    pub cagr: f64,

    // Risk
    /// Largest peak-to-trough decline, as a non-positive fraction
    pub max_drawdown: f64,
    pub calmar: f64,

    // Daily
    pub daily_mean: f64,
    pub daily_vol: f64,
    pub daily_sharpe: f64,
    pub daily_sortino: f64,
    pub best_day: f64,
    pub worst_day: f64,

    // Monthly
    pub monthly_mean: f64,
    pub monthly_vol: f64,
    pub monthly_sharpe: f64,
    pub best_month: f64,
    pub worst_month: f64,

    // Yearly
    pub yearly_mean: f64,
    pub yearly_vol: f64,
    pub yearly_sharpe: f64,
    pub best_year: f64,
    pub worst_year: f64,

    pub monthly_returns: MonthlyReturns,
}

impl PerformanceStats {
    /// Calculate statistics from a price series. Missing values are skipped.
    pub fn calculate(name: impl Into<String>, prices: &Series) -> Self {
        let prices = prices.dropna();
        let mut stats = Self::empty(name);
        stats.start = prices.first().map(|(d, _)| d);
        stats.end = prices.last().map(|(d, _)| d);

        let (Some((start, first)), Some((end, last))) = (prices.first(), prices.last()) else {
            return stats;
        };
        if prices.len() < 2 || first == 0.0 {
            return stats;
        }

        // Returns
        stats.total_return = last / first - 1.0;
        let years = (end - start).num_seconds() as f64 / 86400.0 / DAYS_PER_YEAR;
        if years > 0.0 && last / first >= 0.0 {
            stats.cagr = (last / first).powf(1.0 / years) - 1.0;
        }

        // Drawdown
        stats.max_drawdown = max_drawdown(prices.values());
        if stats.max_drawdown < 0.0 {
            stats.calmar = stats.cagr / stats.max_drawdown.abs();
        }

        // Daily
        let daily = returns(prices.values());
        stats.daily_mean = mean(&daily) * TRADING_DAYS;
        stats.daily_vol = std(&daily) * TRADING_DAYS.sqrt();
        stats.daily_sharpe = sharpe(&daily, TRADING_DAYS);
        stats.daily_sortino = sortino(&daily, TRADING_DAYS);
        stats.best_day = max(&daily);
        stats.worst_day = min(&daily);

        // Monthly
        let monthly: Vec<((i32, u32), f64)> =
            period_returns(&prices, first, |d| (d.year(), d.month()));
        let monthly_values: Vec<f64> = monthly.iter().map(|(_, r)| *r).collect();
        stats.monthly_mean = mean(&monthly_values) * MONTHS;
        stats.monthly_vol = std(&monthly_values) * MONTHS.sqrt();
        stats.monthly_sharpe = sharpe(&monthly_values, MONTHS);
        stats.best_month = max(&monthly_values);
        stats.worst_month = min(&monthly_values);

        // Yearly
        let yearly: Vec<(i32, f64)> = period_returns(&prices, first, |d| d.year());
        let yearly_values: Vec<f64> = yearly.iter().map(|(_, r)| *r).collect();
        stats.yearly_mean = mean(&yearly_values);
        stats.yearly_vol = std(&yearly_values);
        stats.yearly_sharpe = sharpe(&yearly_values, 1.0);
        stats.best_year = max(&yearly_values);
        stats.worst_year = min(&yearly_values);

        stats.monthly_returns = MonthlyReturns {
            years: yearly
                .iter()
                .map(|&(year, ytd)| {
                    let mut months = [f64::NAN; 12];
                    for &((y, m), r) in &monthly {
                        if y == year {
                            months[(m - 1) as usize] = r;
                        }
                    }
                    YearReturns { year, months, ytd }
                })
                .collect(),
        };

        stats
    }

    fn empty(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            start: None,
            end: None,
            total_return: f64::NAN,
            cagr: f64::NAN,
            max_drawdown: f64::NAN,
            calmar: f64::NAN,
            daily_mean: f64::NAN,
            daily_vol: f64::NAN,
            daily_sharpe: f64::NAN,
            daily_sortino: f64::NAN,
            best_day: f64::NAN,
            worst_day: f64::NAN,
            monthly_mean: f64::NAN,
            monthly_vol: f64::NAN,
            monthly_sharpe: f64::NAN,
            best_month: f64::NAN,
            worst_month: f64::NAN,
            yearly_mean: f64::NAN,
            yearly_vol: f64::NAN,
            yearly_sharpe: f64::NAN,
            best_year: f64::NAN,
            worst_year: f64::NAN,
            monthly_returns: MonthlyReturns::default(),
        }
    }

    /// Look up a statistic by name.
    pub fn get(&self, statistic: &str) -> Option<f64> {
        let value = match statistic {
            "total_return" => self.total_return,
            "cagr" => self.cagr,
            "max_drawdown" => self.max_drawdown,
            "calmar" => self.calmar,
            "daily_mean" => self.daily_mean,
            "daily_vol" => self.daily_vol,
            "daily_sharpe" => self.daily_sharpe,
            "daily_sortino" => self.daily_sortino,
            "best_day" => self.best_day,
            "worst_day" => self.worst_day,
            "monthly_mean" => self.monthly_mean,
            "monthly_vol" => self.monthly_vol,
            "monthly_sharpe" => self.monthly_sharpe,
            "best_month" => self.best_month,
            "worst_month" => self.worst_month,
            "yearly_mean" => self.yearly_mean,
            "yearly_vol" => self.yearly_vol,
            "yearly_sharpe" => self.yearly_sharpe,
            "best_year" => self.best_year,
            "worst_year" => self.worst_year,
            _ => return None,
        };
        Some(value)
    }

    /// Format statistics as a summary string.
    pub fn summary(&self) -> String {
        let date = |d: Option<Timestamp>| {
            d.map(|d| d.format("%Y-%m-%d").to_string())
                .unwrap_or_else(|| "-".to_string())
        };
        format!(
            r#"═══════════════════════════════════════════════
{} ({} - {})
═══════════════════════════════════════════════
RETURNS
  Total Return:      {}%
  CAGR:              {}%

RISK
  Max Drawdown:      {}%
  Calmar Ratio:      {:.3}

DAILY
  Sharpe:            {:.3}
  Sortino:           {:.3}
  Mean (ann.):       {}%
  Vol (ann.):        {}%

MONTHLY
  Sharpe:            {:.3}
  Best / Worst:      {}% / {}%
═══════════════════════════════════════════════"#,
            self.name,
            date(self.start),
            date(self.end),
            pct(self.total_return),
            pct(self.cagr),
            pct(self.max_drawdown),
            self.calmar,
            self.daily_sharpe,
            self.daily_sortino,
            pct(self.daily_mean),
            pct(self.daily_vol),
            self.monthly_sharpe,
            pct(self.best_month),
            pct(self.worst_month),
        )
    }
}

fn returns(values: &[f64]) -> Vec<f64> {
    values.windows(2).map(|w| w[1] / w[0] - 1.0).collect()
}

/// Returns between the last prices of consecutive periods; the first period
/// is measured from `first`.
fn period_returns<K, F>(prices: &Series, first: f64, key: F) -> Vec<(K, f64)>
where
    K: PartialEq + Copy,
    F: Fn(&Timestamp) -> K,
{
    let mut period_last: Vec<(K, f64)> = Vec::new();
    for (date, value) in prices.iter() {
        let k = key(&date);
        match period_last.last_mut() {
            Some((last_key, last_value)) if *last_key == k => *last_value = value,
            _ => period_last.push((k, value)),
        }
    }

    let mut previous = first;
    period_last
        .into_iter()
        .map(|(k, value)| {
            let r = value / previous - 1.0;
            previous = value;
            (k, r)
        })
        .collect()
}

fn max_drawdown(values: &[f64]) -> f64 {
    let mut peak = f64::NEG_INFINITY;
    let mut max_dd: f64 = 0.0;
    for &v in values {
        peak = peak.max(v);
        if peak > 0.0 {
            max_dd = max_dd.min(v / peak - 1.0);
        }
    }
    max_dd
}

fn mean(xs: &[f64]) -> f64 {
    if xs.is_empty() {
        return f64::NAN;
    }
    xs.iter().sum::<f64>() / xs.len() as f64
}

/// Sample standard deviation.
fn std(xs: &[f64]) -> f64 {
    if xs.len() < 2 {
        return f64::NAN;
    }
    let m = mean(xs);
    let variance = xs.iter().map(|x| (x - m).powi(2)).sum::<f64>() / (xs.len() - 1) as f64;
    variance.sqrt()
}

fn sharpe(xs: &[f64], periods: f64) -> f64 {
    let sd = std(xs);
    if sd.is_nan() || sd < 1e-12 {
        return f64::NAN;
    }
    mean(xs) / sd * periods.sqrt()
}

/// Sortino with the downside deviation taken over returns clipped at zero.
fn sortino(xs: &[f64], periods: f64) -> f64 {
    let downside: Vec<f64> = xs.iter().map(|r| r.min(0.0)).collect();
    let sd = std(&downside);
    if sd.is_nan() || sd < 1e-12 {
        return f64::NAN;
    }
    mean(xs) / sd * periods.sqrt()
}

fn max(xs: &[f64]) -> f64 {
    xs.iter().copied().fold(f64::NAN, f64::max)
}

fn min(xs: &[f64]) -> f64 {
    xs.iter().copied().fold(f64::NAN, f64::min)
}

/// Statistics x columns table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatsTable {
    columns: Vec<String>,
    /// One row per entry of [`STATISTICS`], one value per column
    rows: Vec<Vec<f64>>,
}

impl StatsTable {
    pub fn from_stats(stats: &[PerformanceStats]) -> Self {
        Self {
            columns: stats.iter().map(|s| s.name.clone()).collect(),
            rows: STATISTICS
                .iter()
                .map(|name| {
                    stats
                        .iter()
                        .map(|s| s.get(name).unwrap_or(f64::NAN))
                        .collect()
                })
                .collect(),
        }
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn statistics(&self) -> &'static [&'static str] {
        &STATISTICS
    }

    /// Values of `statistic` across all columns.
    pub fn row(&self, statistic: &str) -> Result<&[f64]> {
        STATISTICS
            .iter()
            .position(|s| *s == statistic)
            .map(|i| self.rows[i].as_slice())
            .ok_or_else(|| Error::UnknownStatistic(statistic.to_string()))
    }

    /// Every statistic of one column, in [`STATISTICS`] order.
    pub fn column(&self, name: &str) -> Option<Vec<f64>> {
        let c = self.columns.iter().position(|col| col == name)?;
        Some(self.rows.iter().map(|row| row[c]).collect())
    }

    pub fn get(&self, statistic: &str, column: &str) -> Result<Option<f64>> {
        let row = self.row(statistic)?;
        Ok(self
            .columns
            .iter()
            .position(|col| col == column)
            .map(|c| row[c]))
    }

    /// Table restricted to the columns for which `keep` returns true.
    pub fn filter_columns<F>(&self, keep: F) -> StatsTable
    where
        F: Fn(&str) -> bool,
    {
        let kept: Vec<usize> = (0..self.columns.len())
            .filter(|&c| keep(&self.columns[c]))
            .collect();
        StatsTable {
            columns: kept.iter().map(|&c| self.columns[c].clone()).collect(),
            rows: self
                .rows
                .iter()
                .map(|row| kept.iter().map(|&c| row[c]).collect())
                .collect(),
        }
    }

    pub fn drop_column(&self, name: &str) -> StatsTable {
        self.filter_columns(|c| c != name)
    }
}

impl fmt::Display for StatsTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:<16}", "Stat")?;
        for column in &self.columns {
            write!(f, "{:>14}", column)?;
        }
        writeln!(f)?;

        for (name, row) in STATISTICS.iter().zip(&self.rows) {
            write!(f, "{:<16}", name)?;
            for value in row {
                write!(f, "{:>14.4}", value)?;
            }
            writeln!(f)?;
        }
        Ok(())
    }
}

/// Statistics for every column of a wide price table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupStats {
    prices: Frame,
    stats: Vec<PerformanceStats>,
    table: StatsTable,
}

impl GroupStats {
    pub fn new(prices: Frame) -> Self {
        let stats: Vec<PerformanceStats> = prices
            .iter_columns()
            .map(|(name, series)| PerformanceStats::calculate(name, &series))
            .collect();
        let table = StatsTable::from_stats(&stats);
        Self {
            prices,
            stats,
            table,
        }
    }

    pub fn prices(&self) -> &Frame {
        &self.prices
    }

    pub fn table(&self) -> &StatsTable {
        &self.table
    }

    pub fn get(&self, column: &str) -> Option<&PerformanceStats> {
        self.stats.iter().find(|s| s.name == column)
    }

    pub fn get_at(&self, index: usize) -> Option<&PerformanceStats> {
        self.stats.get(index)
    }

    pub fn iter(&self) -> impl Iterator<Item = &PerformanceStats> {
        self.stats.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn series(points: &[((i32, u32, u32), f64)]) -> Series {
        Series::from_pairs(points.iter().map(|&((y, m, d), v)| {
            (Utc.with_ymd_and_hms(y, m, d, 0, 0, 0).unwrap(), v)
        }))
        .unwrap()
    }

    #[test]
    fn test_total_return_and_drawdown() {
        let prices = series(&[
            ((2024, 1, 1), 100.0),
            ((2024, 1, 2), 110.0),
            ((2024, 1, 3), 88.0),
            ((2024, 1, 4), 121.0),
        ]);
        let stats = PerformanceStats::calculate("s", &prices);

        assert!((stats.total_return - 0.21).abs() < 1e-12);
        assert!((stats.max_drawdown + 0.2).abs() < 1e-12);
        assert!((stats.best_day - 0.375).abs() < 1e-12);
        assert!((stats.worst_day + 0.2).abs() < 1e-12);
        assert_eq!(stats.get("max_drawdown"), Some(stats.max_drawdown));
        assert_eq!(stats.get("nope"), None);
    }

    #[test]
    fn test_monthly_table_starts_from_first_price() {
        let prices = series(&[
            ((2023, 12, 15), 100.0),
            ((2023, 12, 29), 110.0),
            ((2024, 1, 31), 99.0),
            ((2024, 3, 1), 118.8),
        ]);
        let stats = PerformanceStats::calculate("s", &prices);
        let table = &stats.monthly_returns;

        assert_eq!(table.years.len(), 2);
        assert!((table.years[0].months[11] - 0.10).abs() < 1e-12);
        assert!((table.years[0].ytd - 0.10).abs() < 1e-12);
        assert!((table.years[1].months[0] + 0.10).abs() < 1e-12);
        assert!(table.years[1].months[1].is_nan());
        assert!((table.years[1].months[2] - 0.20).abs() < 1e-12);
        assert!((table.years[1].ytd - 0.08).abs() < 1e-12);

        let text = table.to_string();
        assert!(text.contains("YTD"));
        assert!(text.contains("2024"));
    }

    #[test]
    fn test_flat_series_has_undefined_ratios() {
        let prices = series(&[((2024, 1, 1), 100.0), ((2024, 1, 2), 100.0), ((2024, 1, 3), 100.0)]);
        let stats = PerformanceStats::calculate("flat", &prices);

        assert_eq!(stats.total_return, 0.0);
        assert_eq!(stats.max_drawdown, 0.0);
        assert!(stats.daily_sharpe.is_nan());
        assert!(stats.calmar.is_nan());
    }

    #[test]
    fn test_single_point_is_empty() {
        let stats = PerformanceStats::calculate("one", &series(&[((2024, 1, 1), 100.0)]));
        assert!(stats.total_return.is_nan());
        assert!(stats.start.is_some());
        assert!(stats.summary().contains("one"));
    }

    #[test]
    fn test_stats_table_lookup() {
        let a = series(&[((2024, 1, 1), 100.0), ((2024, 1, 2), 120.0)]);
        let b = series(&[((2024, 1, 2), 100.0), ((2024, 1, 3), 90.0)]);
        let group = GroupStats::new(Frame::from_series(vec![("a", a), ("b", b)]));
        let table = group.table();

        assert_eq!(table.columns(), &["a", "b"]);
        let total = table.row("total_return").unwrap();
        assert!((total[0] - 0.2).abs() < 1e-12);
        assert!((total[1] + 0.1).abs() < 1e-12);
        assert!((table.get("total_return", "b").unwrap().unwrap() + 0.1).abs() < 1e-12);
        assert!(matches!(table.row("alpha"), Err(Error::UnknownStatistic(_))));

        let only_b = table.drop_column("a");
        assert_eq!(only_b.columns(), &["b"]);
        assert_eq!(only_b.column("b").unwrap().len(), STATISTICS.len());
        assert!(group.get("b").is_some());
        assert!(table.to_string().contains("total_return"));
    }
}
