//! Read-only portfolio views over a finished backtest.

use super::runner::Backtest;
use crate::data::{Frame, Series, Timestamp};
use crate::error::{Error, Result};
use crate::strategy::{Member, Strategy};
use serde::{Deserialize, Serialize};

/// Picks one date of a run, by row number or by timestamp.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DateSelector {
    Ordinal(usize),
    Date(Timestamp),
}

impl From<usize> for DateSelector {
    fn from(i: usize) -> Self {
        DateSelector::Ordinal(i)
    }
}

impl From<Timestamp> for DateSelector {
    fn from(date: Timestamp) -> Self {
        DateSelector::Date(date)
    }
}

/// One `(date, security) -> quantity` record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PositionEntry {
    pub date: Timestamp,
    pub security: String,
    pub quantity: f64,
}

/// A security held on a given date.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Holding {
    pub security: String,
    pub quantity: f64,
    pub weight: f64,
}

/// Divide each column by the root value on the same date.
fn relative_to_root(root: &Series, columns: Vec<(String, Vec<f64>)>) -> Result<Frame> {
    let root_values = root.values();
    let (names, data): (Vec<String>, Vec<Vec<f64>>) = columns
        .into_iter()
        .map(|(name, values)| {
            let weights = values
                .iter()
                .zip(root_values)
                .map(|(v, total)| v / total)
                .collect();
            (name, weights)
        })
        .unzip();
    Frame::new(root.index().to_vec(), names, data)
}

fn aligned_values(root: &Series, member: &dyn Member) -> Vec<f64> {
    root.index()
        .iter()
        .map(|d| member.values().get(d).unwrap_or(f64::NAN))
        .collect()
}

fn member_weights(strategy: &dyn Strategy) -> Result<Frame> {
    let root = strategy.values();
    let columns = strategy
        .members()
        .into_iter()
        .map(|m| (m.full_name().to_string(), aligned_values(root, m)))
        .collect();
    relative_to_root(root, columns)
}

fn security_weights(strategy: &dyn Strategy) -> Result<Frame> {
    let root = strategy.values();
    let mut columns: Vec<(String, Vec<f64>)> = Vec::new();

    for member in strategy.members() {
        let Some(ticker) = member.kind().ticker() else {
            continue;
        };
        let values = aligned_values(root, member);
        match columns.iter_mut().find(|(name, _)| name == ticker) {
            Some((_, total)) => {
                for (t, v) in total.iter_mut().zip(values) {
                    *t += v;
                }
            }
            None => columns.push((ticker.to_string(), values)),
        }
    }

    relative_to_root(root, columns)
}

fn sum_by_row<F>(frame: &Frame, f: F) -> Vec<f64>
where
    F: Fn(f64) -> f64,
{
    (0..frame.n_rows())
        .map(|r| {
            frame
                .row(r)
                .unwrap_or_default()
                .into_iter()
                .filter(|v| !v.is_nan())
                .map(&f)
                .sum()
        })
        .collect()
}

impl Backtest {
    /// Every member's value over the root's value, one column per member
    /// labelled with its full name. Computed once.
    pub fn weights(&self) -> Result<&Frame> {
        self.ensure_run()?;
        if let Some(weights) = self.weights.get() {
            return Ok(weights);
        }
        let weights = member_weights(self.strategy.as_ref())?;
        Ok(self.weights.get_or_init(|| weights))
    }

    /// Security leaves' values over the root's value, summed per ticker.
    /// Computed once.
    pub fn security_weights(&self) -> Result<&Frame> {
        self.ensure_run()?;
        if let Some(weights) = self.security_weights.get() {
            return Ok(weights);
        }
        let weights = security_weights(self.strategy.as_ref())?;
        Ok(self.security_weights.get_or_init(|| weights))
    }

    /// Sum of squared security weights per date.
    pub fn herfindahl_index(&self) -> Result<Series> {
        let weights = self.security_weights()?;
        Series::from_parts(weights.index().to_vec(), sum_by_row(weights, |w| w * w))
    }

    /// Lesser of the day's buys and sells over the portfolio value.
    pub fn turnover(&self) -> Result<Series> {
        self.ensure_run()?;
        let outlays = self.strategy.outlays();
        let values = self.strategy.values();

        let buys = sum_by_row(&outlays, |o| o.max(0.0));
        let sells = sum_by_row(&outlays, |o| (-o).max(0.0));
        let turnover = outlays
            .index()
            .iter()
            .zip(buys.into_iter().zip(sells))
            .map(|(date, (b, s))| match values.get(date) {
                Some(nav) if nav > 0.0 => b.min(s) / nav,
                _ => f64::NAN,
            })
            .collect();
        Series::from_parts(outlays.index().to_vec(), turnover)
    }

    /// Quantity held per security and date.
    pub fn positions(&self) -> Result<Frame> {
        self.ensure_run()?;
        Ok(self.strategy.positions())
    }

    /// Every recorded `(date, security, quantity)`, date-major.
    pub fn portfolios(&self) -> Result<Vec<PositionEntry>> {
        let positions = self.positions()?;
        let mut entries = Vec::new();
        for (r, date) in positions.index().iter().enumerate() {
            for (security, col) in positions.columns().iter().zip(0..) {
                let quantity = positions.column_at(col).map_or(f64::NAN, |c| c[r]);
                if !quantity.is_nan() {
                    entries.push(PositionEntry {
                        date: *date,
                        security: security.clone(),
                        quantity,
                    });
                }
            }
        }
        Ok(entries)
    }

    /// Securities with a nonzero weight on one date.
    pub fn portfolio(&self, date: impl Into<DateSelector>) -> Result<Vec<Holding>> {
        let positions = self.positions()?;
        let weights = self.security_weights()?;

        let row = match date.into() {
            DateSelector::Ordinal(i) if i < positions.n_rows() => i,
            DateSelector::Ordinal(i) => {
                return Err(Error::InvalidIndex(format!(
                    "date ordinal {} out of range ({} dates)",
                    i,
                    positions.n_rows()
                )))
            }
            DateSelector::Date(d) => positions
                .position_of(&d)
                .ok_or_else(|| Error::InvalidIndex(format!("date {} not in backtest", d)))?,
        };
        let date = positions.index()[row];
        let weight_row = weights.position_of(&date);

        let holdings = positions
            .columns()
            .iter()
            .enumerate()
            .filter_map(|(c, security)| {
                let weight = weights
                    .column(security)
                    .zip(weight_row)
                    .map_or(0.0, |(w, r)| w[r]);
                let quantity = positions.column_at(c).map_or(f64::NAN, |q| q[row]);
                (weight != 0.0 && !weight.is_nan()).then(|| Holding {
                    security: security.clone(),
                    quantity,
                    weight,
                })
            })
            .collect();
        Ok(holdings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backtest::{BacktestConfig, CommissionPreset};
    use crate::strategy::testing::{day, growth, price_frame, FixedTree};
    use crate::strategy::{NodeKind, WeightedPortfolio};

    fn run(strategy: &WeightedPortfolio, data: Frame) -> Backtest {
        let config = BacktestConfig {
            commissions: CommissionPreset::None,
            integer_positions: false,
            ..BacktestConfig::default()
        };
        let mut bt = Backtest::new(strategy, data, config).unwrap();
        bt.run().unwrap();
        bt
    }

    fn four_assets() -> Frame {
        price_frame(vec![
            ("a", growth(10.0, 0.02, 40)),
            ("b", growth(20.0, -0.01, 40)),
            ("c", growth(5.0, 0.005, 40)),
            ("d", growth(50.0, 0.0, 40)),
        ])
    }

    #[test]
    fn test_analytics_require_a_run() {
        let bt = Backtest::new(
            &WeightedPortfolio::equal("eq"),
            four_assets(),
            BacktestConfig::default(),
        )
        .unwrap();
        assert!(matches!(bt.weights(), Err(Error::NotRun(_))));
        assert!(matches!(bt.turnover(), Err(Error::NotRun(_))));
    }

    #[test]
    fn test_weights_sum_to_one_and_are_cached() {
        let bt = run(&WeightedPortfolio::random("rnd", Some(3)).with_rebalance_every(5), four_assets());
        let weights = bt.weights().unwrap();

        assert_eq!(weights.columns()[0], "rnd>a");
        for r in 0..weights.n_rows() {
            let total: f64 = weights.row(r).unwrap().iter().sum();
            assert!((total - 1.0).abs() < 1e-9, "row {} sums to {}", r, total);
        }
        assert!(std::ptr::eq(weights, bt.weights().unwrap()));
    }

    #[test]
    fn test_herfindahl_bounds() {
        let equal = run(&WeightedPortfolio::equal("eq"), four_assets());
        let hhi = equal.herfindahl_index().unwrap();
        for v in hhi.values() {
            assert!((v - 0.25).abs() < 1e-9);
        }

        let single = run(&WeightedPortfolio::equal("one"), price_frame(vec![("a", growth(10.0, 0.01, 5))]));
        assert!(single.herfindahl_index().unwrap().values().iter().all(|v| (v - 1.0).abs() < 1e-9));

        let random = run(&WeightedPortfolio::random("rnd", Some(11)).with_rebalance_every(3), four_assets());
        for v in random.herfindahl_index().unwrap().values() {
            assert!(*v >= 0.25 - 1e-9 && *v <= 1.0 + 1e-9);
        }
    }

    #[test]
    fn test_turnover_is_matched_volume() {
        // Day 1 buys only; day 2 rebalances after a moved back to 50/50.
        let data = price_frame(vec![("a", vec![10.0, 20.0]), ("b", vec![10.0, 10.0])]);
        let bt = run(&WeightedPortfolio::equal("eq"), data);
        let turnover = bt.turnover().unwrap();

        assert_eq!(turnover.values()[0], 0.0);
        // nav 1500: sell 250 of a, buy 250 of b
        assert!((turnover.values()[1] - 250.0 / 1500.0).abs() < 1e-12);

        let random = run(&WeightedPortfolio::random("rnd", Some(5)), four_assets());
        for v in random.turnover().unwrap().values() {
            assert!((0.0..=1.0).contains(v));
        }
    }

    #[test]
    fn test_security_weights_sum_shared_tickers() {
        let tree = FixedTree::new(
            "tree",
            vec![
                ("left", NodeKind::Composite, 0.6),
                ("left>a", NodeKind::security("a"), 0.25),
                ("left>b", NodeKind::security("b"), 0.35),
                ("right", NodeKind::Composite, 0.4),
                ("right>a", NodeKind::security("a"), 0.4),
            ],
        );
        let data = price_frame(vec![("a", vec![1.0, 1.0, 1.0]), ("b", vec![1.0, 1.0, 1.0])]);
        let mut bt = Backtest::new(&tree, data, BacktestConfig::default()).unwrap();
        bt.run().unwrap();

        let members = bt.weights().unwrap();
        assert_eq!(
            members.columns(),
            &["tree>left", "tree>left>a", "tree>left>b", "tree>right", "tree>right>a"]
        );

        let weights = bt.security_weights().unwrap();
        assert_eq!(weights.columns(), &["a", "b"]);
        assert_eq!(weights.n_rows(), 3);
        for r in 0..weights.n_rows() {
            assert!((weights.column("a").unwrap()[r] - 0.65).abs() < 1e-12);
            assert!((weights.column("b").unwrap()[r] - 0.35).abs() < 1e-12);
        }

        let hhi = bt.herfindahl_index().unwrap();
        assert!((hhi.values()[0] - (0.65 * 0.65 + 0.35 * 0.35)).abs() < 1e-12);
    }

    #[test]
    fn test_security_weights_one_column_per_ticker() {
        let bt = run(&WeightedPortfolio::equal("eq"), four_assets());
        let weights = bt.security_weights().unwrap();
        assert_eq!(weights.columns(), &["a", "b", "c", "d"]);
        assert!((weights.column("a").unwrap()[0] - 0.25).abs() < 1e-9);
    }

    #[test]
    fn test_portfolio_by_ordinal_and_date() {
        let data = price_frame(vec![("a", vec![10.0, 10.0]), ("b", vec![f64::NAN, 10.0])]);
        let bt = run(&WeightedPortfolio::equal("eq").with_rebalance_every(10), data);

        let first = bt.portfolio(0usize).unwrap();
        assert_eq!(first.len(), 1);
        assert_eq!(first[0].security, "a");
        assert_eq!(first[0].quantity, 100_000.0);

        assert_eq!(bt.portfolio(day(2)).unwrap(), bt.portfolio(1usize).unwrap());
        assert!(matches!(bt.portfolio(7usize), Err(Error::InvalidIndex(_))));
        assert!(matches!(bt.portfolio(day(30)), Err(Error::InvalidIndex(_))));

        let stacked = bt.portfolios().unwrap();
        assert_eq!(stacked.len(), 4);
        assert_eq!(stacked[1].security, "b");
        assert_eq!(stacked[1].quantity, 0.0);
    }
}
