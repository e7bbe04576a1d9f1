//! Benchmarking a backtest against randomised versions of a strategy.
//!
//! Does the strategy beat picking weights or securities at random? The
//! baseline run is aggregated with `nsim` runs of a strategy whose decisions
//! are partly random, and any statistic of the baseline can then be placed
//! within the distribution of the random runs.

use super::result::ResultTable;
use super::runner::Backtest;
use super::stats::StatsTable;
use crate::config::BenchmarkConfig;
use crate::error::Result;
use crate::strategy::Strategy;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::info;

/// Name given to an unnamed baseline.
pub const BASELINE_NAME: &str = "original";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BenchmarkOptions {
    /// Number of random runs
    pub nsim: usize,
    /// Base seed; random run `i` is reseeded with `seed + i`
    pub seed: Option<u64>,
    /// Run the random backtests on the rayon pool
    pub parallel: bool,
}

impl Default for BenchmarkOptions {
    fn default() -> Self {
        Self {
            nsim: 100,
            seed: None,
            parallel: true,
        }
    }
}

impl From<&BenchmarkConfig> for BenchmarkOptions {
    fn from(config: &BenchmarkConfig) -> Self {
        Self {
            nsim: config.nsim,
            seed: config.seed,
            parallel: config.parallel,
        }
    }
}

/// Run `baseline` (if needed) and `nsim` random backtests on the same data.
///
/// Random runs are named `random_0 .. random_{nsim-1}` and share the
/// baseline's configuration and commission function.
pub fn benchmark_random(
    baseline: Backtest,
    template: &dyn Strategy,
    options: &BenchmarkOptions,
) -> Result<RandomBenchmarkResult> {
    let mut baseline = baseline;
    if !baseline.is_named() {
        baseline.set_name(BASELINE_NAME);
    }
    if !baseline.has_run() {
        baseline.run()?;
    }

    info!(
        "Running {} random backtests against '{}'",
        options.nsim,
        baseline.name()
    );

    let build = |i: usize| -> Result<Backtest> {
        let mut backtest = Backtest::new(template, baseline.data().clone(), baseline.config().clone())?
            .with_commission_fn(baseline.commission().clone())
            .with_name(format!("random_{}", i));
        let seed = match options.seed {
            Some(seed) => seed.wrapping_add(i as u64),
            None => rand::random(),
        };
        backtest.strategy.reseed(seed);
        backtest.run()?;
        Ok(backtest)
    };

    let randoms: Vec<Backtest> = if options.parallel {
        (0..options.nsim).into_par_iter().map(build).collect::<Result<_>>()?
    } else {
        (0..options.nsim).map(build).collect::<Result<_>>()?
    };

    let base_name = baseline.name().to_string();
    let mut backtests = Vec::with_capacity(randoms.len() + 1);
    backtests.push(baseline);
    backtests.extend(randoms);

    RandomBenchmarkResult::new(ResultTable::new(backtests)?, base_name)
}

/// Baseline plus random runs, with their statistics split apart.
pub struct RandomBenchmarkResult {
    result: ResultTable,
    base_name: String,
    base_stats: StatsTable,
    random_stats: StatsTable,
}

impl RandomBenchmarkResult {
    fn new(result: ResultTable, base_name: String) -> Result<Self> {
        let table = result.stats().table();
        let base_stats = table.filter_columns(|c| c == base_name);
        let random_stats = table.drop_column(&base_name);
        Ok(Self {
            result,
            base_name,
            base_stats,
            random_stats,
        })
    }

    pub fn result(&self) -> &ResultTable {
        &self.result
    }

    pub fn base_name(&self) -> &str {
        &self.base_name
    }

    /// Statistics of the baseline (one column).
    pub fn base_stats(&self) -> &StatsTable {
        &self.base_stats
    }

    /// Statistics of the random runs (one column per run).
    pub fn random_stats(&self) -> &StatsTable {
        &self.random_stats
    }

    /// Where the baseline's `statistic` falls among the random runs.
    pub fn distribution(&self, statistic: &str, bins: usize) -> Result<StatisticDistribution> {
        let baseline = self
            .base_stats
            .row(statistic)?
            .first()
            .copied()
            .unwrap_or(f64::NAN);
        let values = self.random_stats.row(statistic)?.to_vec();
        Ok(StatisticDistribution::new(statistic, baseline, values, bins))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistogramBin {
    pub lower: f64,
    pub upper: f64,
    pub count: usize,
}

/// Empirical distribution of one statistic over the random runs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatisticDistribution {
    pub statistic: String,
    pub baseline: f64,
    /// One value per random run, NaN included
    pub values: Vec<f64>,
    pub mean: f64,
    pub std: f64,
    /// Share of random values below the baseline, in percent
    pub percentile_rank: f64,
    pub z_score: f64,
    pub histogram: Vec<HistogramBin>,
}

impl StatisticDistribution {
    pub fn new(statistic: &str, baseline: f64, values: Vec<f64>, bins: usize) -> Self {
        let finite: Vec<f64> = values.iter().copied().filter(|v| v.is_finite()).collect();
        let n = finite.len() as f64;

        let mean = if finite.is_empty() {
            f64::NAN
        } else {
            finite.iter().sum::<f64>() / n
        };
        let std = if finite.len() < 2 {
            f64::NAN
        } else {
            (finite.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (n - 1.0)).sqrt()
        };
        let percentile_rank = if finite.is_empty() || baseline.is_nan() {
            f64::NAN
        } else {
            finite.iter().filter(|v| **v < baseline).count() as f64 / n * 100.0
        };
        let z_score = if std > 0.0 {
            (baseline - mean) / std
        } else {
            f64::NAN
        };

        Self {
            statistic: statistic.to_string(),
            baseline,
            values,
            mean,
            std,
            percentile_rank,
            z_score,
            histogram: histogram(&finite, bins.max(1)),
        }
    }
}

fn histogram(values: &[f64], bins: usize) -> Vec<HistogramBin> {
    if values.is_empty() {
        return Vec::new();
    }
    let lo = values.iter().copied().fold(f64::INFINITY, f64::min);
    let hi = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    if hi <= lo {
        return vec![HistogramBin {
            lower: lo,
            upper: hi,
            count: values.len(),
        }];
    }

    let width = (hi - lo) / bins as f64;
    let mut counts = vec![0usize; bins];
    for v in values {
        let b = (((v - lo) / width) as usize).min(bins - 1);
        counts[b] += 1;
    }
    counts
        .into_iter()
        .enumerate()
        .map(|(i, count)| HistogramBin {
            lower: lo + width * i as f64,
            upper: lo + width * (i + 1) as f64,
            count,
        })
        .collect()
}

impl fmt::Display for StatisticDistribution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{} over {} random runs", self.statistic, self.values.len())?;
        writeln!(f, "  baseline:        {:.4}", self.baseline)?;
        writeln!(f, "  random mean/std: {:.4} / {:.4}", self.mean, self.std)?;
        writeln!(f, "  percentile rank: {:.1}%", self.percentile_rank)?;
        writeln!(f, "  z-score:         {:.3}", self.z_score)?;

        let peak = self.histogram.iter().map(|b| b.count).max().unwrap_or(0).max(1);
        for bin in &self.histogram {
            let marker = if self.baseline >= bin.lower && self.baseline <= bin.upper {
                " <- baseline"
            } else {
                ""
            };
            writeln!(
                f,
                "  [{:>9.4}, {:>9.4}) {:<40}{}",
                bin.lower,
                bin.upper,
                "#".repeat(bin.count * 40 / peak),
                marker
            )?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backtest::{BacktestConfig, CommissionPreset, STATISTICS};
    use crate::error::Error;
    use crate::strategy::testing::{growth, price_frame};
    use crate::strategy::WeightedPortfolio;
    use std::sync::Arc;

    fn baseline() -> Backtest {
        let data = price_frame(vec![
            ("a", growth(10.0, 0.003, 120)),
            ("b", growth(10.0, -0.001, 120)),
            ("c", growth(10.0, 0.001, 120)),
        ]);
        let config = BacktestConfig {
            commissions: CommissionPreset::None,
            integer_positions: false,
            ..BacktestConfig::default()
        };
        Backtest::new(&WeightedPortfolio::equal("equal").with_rebalance_every(20), data, config)
            .unwrap()
    }

    fn random_template() -> WeightedPortfolio {
        WeightedPortfolio::random("random", None).with_rebalance_every(20)
    }

    fn options(nsim: usize, parallel: bool) -> BenchmarkOptions {
        BenchmarkOptions {
            nsim,
            seed: Some(42),
            parallel,
        }
    }

    fn same(a: &[f64], b: &[f64]) -> bool {
        a.len() == b.len()
            && a.iter().zip(b).all(|(x, y)| (x.is_nan() && y.is_nan()) || x == y)
    }

    #[test]
    fn test_split_into_baseline_and_random_columns() {
        let result = benchmark_random(baseline(), &random_template(), &options(5, true)).unwrap();

        assert_eq!(result.base_name(), "original");
        assert_eq!(result.base_stats().columns(), &["original"]);
        assert_eq!(result.random_stats().columns().len(), 5);
        assert_eq!(result.random_stats().columns()[4], "random_4");
        assert_eq!(result.result().len(), 6);

        // Baseline statistics match a standalone run of the same backtest.
        let mut alone = baseline();
        alone.run().unwrap();
        let alone_stats = StatsTable::from_stats(&[alone.stats().unwrap().clone()]);
        for stat in STATISTICS {
            assert!(same(
                result.base_stats().row(stat).unwrap(),
                alone_stats.row(stat).unwrap()
            ));
        }
    }

    #[test]
    fn test_named_and_already_run_baseline_is_kept() {
        let mut named = baseline().with_name("mine");
        named.run().unwrap();

        let result = benchmark_random(named, &random_template(), &options(2, false)).unwrap();
        assert_eq!(result.base_name(), "mine");
        assert_eq!(result.result().names(), vec!["mine", "random_0", "random_1"]);
    }

    #[test]
    fn test_parallel_matches_sequential() {
        let parallel = benchmark_random(baseline(), &random_template(), &options(4, true)).unwrap();
        let sequential = benchmark_random(baseline(), &random_template(), &options(4, false)).unwrap();

        for stat in STATISTICS {
            assert!(same(
                parallel.random_stats().row(stat).unwrap(),
                sequential.random_stats().row(stat).unwrap()
            ));
        }
        // Distinct seeds give distinct runs.
        let totals = parallel.random_stats().row("total_return").unwrap();
        assert_ne!(totals[0], totals[1]);
    }

    #[test]
    fn test_distribution() {
        let result = benchmark_random(baseline(), &random_template(), &options(8, true)).unwrap();
        let dist = result.distribution("total_return", 4).unwrap();

        assert_eq!(dist.values.len(), 8);
        assert_eq!(dist.histogram.iter().map(|b| b.count).sum::<usize>(), 8);
        assert!((0.0..=100.0).contains(&dist.percentile_rank));
        assert!(dist.to_string().contains("total_return over 8 random runs"));

        assert!(matches!(
            result.distribution("alpha", 4),
            Err(Error::UnknownStatistic(name)) if name == "alpha"
        ));
    }

    #[test]
    fn test_distribution_summary_numbers() {
        let dist = StatisticDistribution::new("s", 3.0, vec![1.0, 2.0, 3.0, 4.0, f64::NAN], 3);
        assert_eq!(dist.mean, 2.5);
        assert_eq!(dist.percentile_rank, 50.0);
        assert_eq!(
            dist.histogram.iter().map(|b| b.count).collect::<Vec<_>>(),
            vec![1, 1, 2]
        );
    }

    #[test]
    fn test_random_runs_share_commission() {
        let free = baseline().with_commission_fn(Arc::new(|_, _| 0.0));
        let result = benchmark_random(free, &random_template(), &options(1, false)).unwrap();
        let run = result.result().get("random_0").unwrap();
        assert_eq!((run.commission())(-100.0, 1000.0), 0.0);
    }
}
