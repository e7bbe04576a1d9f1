//! Test fixtures: price frames and stub strategies.

use crate::data::{Frame, Series, Timestamp};
use crate::error::{Error, Result};
use crate::strategy::{CommissionFn, Member, MemberSnapshot, NodeKind, Strategy, WeightedPortfolio};
use chrono::{Duration, TimeZone, Utc};
use parking_lot::Mutex;
use std::sync::Arc;

/// The `n`-th calendar day starting at 2024-01-01 (`day(1)`).
pub fn day(n: i64) -> Timestamp {
    Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap() + Duration::days(n - 1)
}

/// Frame indexed `day(1)..` with the given columns.
pub fn price_frame(columns: Vec<(&str, Vec<f64>)>) -> Frame {
    let rows = columns.first().map_or(0, |(_, v)| v.len());
    let index = (1..=rows as i64).map(day).collect();
    let (names, data) = columns
        .into_iter()
        .map(|(name, values)| (name.to_string(), values))
        .unzip();
    Frame::new(index, names, data).unwrap()
}

/// Geometric price path growing by `rate` per row.
pub fn growth(start: f64, rate: f64, rows: usize) -> Vec<f64> {
    (0..rows).map(|i| start * (1.0 + rate).powi(i as i32)).collect()
}

/// Equal-weight portfolio that turns bankrupt when it is marked to `at`,
/// and records every date it is marked to.
#[derive(Clone)]
pub struct BankruptAt {
    inner: WeightedPortfolio,
    at: Timestamp,
    bankrupt: bool,
    pub visited: Arc<Mutex<Vec<Timestamp>>>,
}

impl BankruptAt {
    pub fn new(at: Timestamp) -> Self {
        Self {
            inner: WeightedPortfolio::equal("stub"),
            at,
            bankrupt: false,
            visited: Arc::new(Mutex::new(Vec::new())),
        }
    }
}

impl Strategy for BankruptAt {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn set_name(&mut self, name: &str) {
        self.inner.set_name(name);
    }

    fn setup(&mut self, data: Arc<Frame>) -> Result<()> {
        self.inner.setup(data)
    }

    fn adjust(&mut self, amount: f64) {
        self.inner.adjust(amount);
    }

    fn update(&mut self, date: Timestamp) -> Result<()> {
        self.visited.lock().push(date);
        if date >= self.at {
            self.bankrupt = true;
        }
        self.inner.update(date)
    }

    fn run(&mut self) -> Result<()> {
        self.inner.run()
    }

    fn prices(&self) -> &Series {
        self.inner.prices()
    }

    fn values(&self) -> &Series {
        self.inner.values()
    }

    fn positions(&self) -> Frame {
        self.inner.positions()
    }

    fn outlays(&self) -> Frame {
        self.inner.outlays()
    }

    fn members(&self) -> Vec<&dyn Member> {
        self.inner.members()
    }

    fn bankrupt(&self) -> bool {
        self.bankrupt || self.inner.bankrupt()
    }

    fn use_integer_positions(&mut self, integer: bool) {
        self.inner.use_integer_positions(integer);
    }

    fn set_commissions(&mut self, commission: CommissionFn) {
        self.inner.set_commissions(commission);
    }

    fn clone_box(&self) -> Box<dyn Strategy> {
        Box::new(self.clone())
    }
}

/// Tree whose nodes hold fixed shares of the root value on every date.
///
/// Node paths are relative to the root, e.g. `left>a`. Nothing is traded.
#[derive(Clone)]
pub struct FixedTree {
    name: String,
    capital: f64,
    nodes: Vec<(String, NodeKind, f64)>,
    members: Vec<MemberSnapshot>,
    prices: Series,
    values: Series,
    fail_at: Option<Timestamp>,
}

impl FixedTree {
    pub fn new(name: &str, nodes: Vec<(&str, NodeKind, f64)>) -> Self {
        Self {
            name: name.to_string(),
            capital: 0.0,
            nodes: nodes
                .into_iter()
                .map(|(path, kind, share)| (path.to_string(), kind, share))
                .collect(),
            members: Vec::new(),
            prices: Series::new(),
            values: Series::new(),
            fail_at: None,
        }
    }

    /// Make `update` fail once it reaches `date`.
    pub fn failing_at(mut self, date: Timestamp) -> Self {
        self.fail_at = Some(date);
        self
    }
}

impl Strategy for FixedTree {
    fn name(&self) -> &str {
        &self.name
    }

    fn set_name(&mut self, name: &str) {
        self.name = name.to_string();
    }

    fn setup(&mut self, _data: Arc<Frame>) -> Result<()> {
        self.members = self
            .nodes
            .iter()
            .map(|(path, kind, _)| MemberSnapshot {
                full_name: format!("{}>{}", self.name, path),
                kind: kind.clone(),
                values: Series::new(),
            })
            .collect();
        Ok(())
    }

    fn adjust(&mut self, amount: f64) {
        self.capital += amount;
    }

    fn update(&mut self, date: Timestamp) -> Result<()> {
        if self.fail_at.is_some_and(|at| date >= at) {
            return Err(Error::Strategy(format!("{}: no quote on {}", self.name, date)));
        }
        self.values.set(date, self.capital);
        self.prices.set(date, 100.0);
        for (member, (_, _, share)) in self.members.iter_mut().zip(&self.nodes) {
            member.values.set(date, self.capital * share);
        }
        Ok(())
    }

    fn run(&mut self) -> Result<()> {
        Ok(())
    }

    fn prices(&self) -> &Series {
        &self.prices
    }

    fn values(&self) -> &Series {
        &self.values
    }

    fn positions(&self) -> Frame {
        Frame::default()
    }

    fn outlays(&self) -> Frame {
        Frame::default()
    }

    fn members(&self) -> Vec<&dyn Member> {
        self.members.iter().map(|m| m as &dyn Member).collect()
    }

    fn bankrupt(&self) -> bool {
        false
    }

    fn use_integer_positions(&mut self, _integer: bool) {}

    fn set_commissions(&mut self, _commission: CommissionFn) {}

    fn clone_box(&self) -> Box<dyn Strategy> {
        Box::new(self.clone())
    }
}
