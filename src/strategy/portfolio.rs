//! A one-level strategy tree: a root holding one security leaf per data
//! column, rebalanced to target weights on a fixed schedule.

use crate::data::{Frame, Series, Timestamp};
use crate::error::{Error, Result};
use crate::strategy::{no_commission, CommissionFn, Member, NodeKind, Strategy};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::Arc;
use tracing::{debug, warn};

/// Separator between a node and its parent in member names.
pub const PATH_SEP: char = '>';

/// Starting level of every price index.
pub const PRICE_BASE: f64 = 100.0;

/// Produces target weights for the tradable securities on a rebalance.
#[derive(Debug, Clone)]
pub enum Weigher {
    /// 1/N across tradable securities
    Equal,
    /// Uniformly drawn weights, normalised to sum to one
    Random(StdRng),
}

impl Weigher {
    pub fn random(seed: Option<u64>) -> Self {
        match seed {
            Some(seed) => Weigher::Random(StdRng::seed_from_u64(seed)),
            None => Weigher::Random(StdRng::from_entropy()),
        }
    }

    fn weights(&mut self, n: usize) -> Vec<f64> {
        match self {
            Weigher::Equal => vec![1.0 / n as f64; n],
            Weigher::Random(rng) => {
                let draws: Vec<f64> = (0..n).map(|_| rng.gen_range(f64::EPSILON..1.0)).collect();
                let total: f64 = draws.iter().sum();
                draws.into_iter().map(|d| d / total).collect()
            }
        }
    }
}

#[derive(Debug, Clone)]
struct Leaf {
    full_name: String,
    kind: NodeKind,
    values: Series,
}

impl Member for Leaf {
    fn full_name(&self) -> &str {
        &self.full_name
    }

    fn values(&self) -> &Series {
        &self.values
    }

    fn kind(&self) -> &NodeKind {
        &self.kind
    }
}

/// Weighted portfolio over every column of the data it is set up with.
#[derive(Clone)]
pub struct WeightedPortfolio {
    name: String,
    weigher: Weigher,
    rebalance_every: usize,
    integer_positions: bool,
    commission: CommissionFn,

    data: Option<Arc<Frame>>,
    leaves: Vec<Leaf>,
    quantities: Vec<f64>,
    last_prices: Vec<f64>,
    positions: Vec<Series>,
    outlays: Vec<Series>,

    cash: f64,
    row: Option<usize>,
    steps: usize,
    /// Value and price level at the close of the previous date
    base_value: f64,
    base_price: f64,
    value: f64,
    price: f64,
    prices: Series,
    values: Series,
    bankrupt: bool,
}

impl WeightedPortfolio {
    pub fn new(name: impl Into<String>, weigher: Weigher) -> Self {
        Self {
            name: name.into(),
            weigher,
            rebalance_every: 1,
            integer_positions: false,
            commission: no_commission(),
            data: None,
            leaves: Vec::new(),
            quantities: Vec::new(),
            last_prices: Vec::new(),
            positions: Vec::new(),
            outlays: Vec::new(),
            cash: 0.0,
            row: None,
            steps: 0,
            base_value: 0.0,
            base_price: PRICE_BASE,
            value: 0.0,
            price: PRICE_BASE,
            prices: Series::new(),
            values: Series::new(),
            bankrupt: false,
        }
    }

    pub fn equal(name: impl Into<String>) -> Self {
        Self::new(name, Weigher::Equal)
    }

    pub fn random(name: impl Into<String>, seed: Option<u64>) -> Self {
        Self::new(name, Weigher::random(seed))
    }

    /// Rebalance on every `n`-th decision step; 0 rebalances only on the
    /// first step.
    pub fn with_rebalance_every(mut self, n: usize) -> Self {
        self.rebalance_every = n;
        self
    }

    fn rebalance_due(&self) -> bool {
        match self.rebalance_every {
            0 => self.steps == 0,
            n => self.steps % n == 0,
        }
    }

    pub fn cash(&self) -> f64 {
        self.cash
    }

    fn leaf_name(&self, ticker: &str) -> String {
        format!("{}{}{}", self.name, PATH_SEP, ticker)
    }

    fn current_row(&self) -> Result<usize> {
        self.row
            .ok_or_else(|| Error::Strategy(format!("{}: run() before update()", self.name)))
    }

    fn tickers(&self) -> impl Iterator<Item = &str> {
        self.leaves.iter().filter_map(|l| l.kind.ticker())
    }

    fn rebalance(&mut self, date: Timestamp) {
        let tradable: Vec<usize> = (0..self.leaves.len())
            .filter(|&i| self.last_prices[i].is_finite() && self.last_prices[i] > 0.0)
            .collect();
        if tradable.is_empty() {
            return;
        }

        let weights = self.weigher.weights(tradable.len());
        let total = self.value;
        let mut targets = vec![0.0; self.leaves.len()];
        for (&i, w) in tradable.iter().zip(weights) {
            let q = w * total / self.last_prices[i];
            targets[i] = if self.integer_positions { q.trunc() } else { q };
        }

        for (i, target) in targets.into_iter().enumerate() {
            let delta = target - self.quantities[i];
            if delta == 0.0 {
                continue;
            }
            let price = self.last_prices[i];
            let fee = (self.commission)(delta, price);
            let outlay = delta * price + fee;

            self.cash -= outlay;
            self.quantities[i] = target;
            let spent = self.outlays[i].get(&date).unwrap_or(0.0);
            self.outlays[i].set(date, spent + outlay);
        }
        debug!("{} rebalanced on {}", self.name, date.date_naive());
    }
}

impl Strategy for WeightedPortfolio {
    fn name(&self) -> &str {
        &self.name
    }

    fn set_name(&mut self, name: &str) {
        self.name = name.to_string();
        for i in 0..self.leaves.len() {
            if let Some(ticker) = self.leaves[i].kind.ticker() {
                let full_name = self.leaf_name(ticker);
                self.leaves[i].full_name = full_name;
            }
        }
    }

    fn setup(&mut self, data: Arc<Frame>) -> Result<()> {
        let n = data.n_cols();
        if n == 0 {
            return Err(Error::Strategy(format!("{}: data has no columns", self.name)));
        }

        self.leaves = data
            .columns()
            .iter()
            .map(|ticker| Leaf {
                full_name: self.leaf_name(ticker),
                kind: NodeKind::security(ticker.clone()),
                values: Series::new(),
            })
            .collect();
        self.quantities = vec![0.0; n];
        self.last_prices = vec![f64::NAN; n];
        self.positions = vec![Series::new(); n];
        self.outlays = vec![Series::new(); n];
        self.data = Some(data);
        Ok(())
    }

    fn adjust(&mut self, amount: f64) {
        self.cash += amount;
        self.value += amount;
        self.base_value += amount;
    }

    fn update(&mut self, date: Timestamp) -> Result<()> {
        let data = self
            .data
            .clone()
            .ok_or_else(|| Error::Strategy(format!("{}: update() before setup()", self.name)))?;
        let row = data.position_of(&date).ok_or_else(|| {
            Error::Strategy(format!("{}: date {} not in data", self.name, date))
        })?;

        let new_date = self.row != Some(row);
        if new_date {
            if self.row.is_some() {
                self.base_value = self.value;
                self.base_price = self.price;
            }
            self.row = Some(row);
        }

        let mut holdings = 0.0;
        for i in 0..self.leaves.len() {
            let price = data.column_at(i).map_or(f64::NAN, |col| col[row]);
            if price.is_finite() {
                self.last_prices[i] = price;
            }
            let q = self.quantities[i];
            let leaf_value = if q == 0.0 { 0.0 } else { q * self.last_prices[i] };

            holdings += leaf_value;
            self.leaves[i].values.set(date, leaf_value);
            self.positions[i].set(date, q);
            if new_date {
                self.outlays[i].set(date, 0.0);
            }
        }

        self.value = self.cash + holdings;
        self.price = if self.base_value > 0.0 {
            self.base_price * self.value / self.base_value
        } else {
            self.base_price
        };
        self.values.set(date, self.value);
        self.prices.set(date, self.price);

        if self.value <= 0.0 && !self.bankrupt {
            warn!("{} is bankrupt on {}", self.name, date.date_naive());
            self.bankrupt = true;
        }
        Ok(())
    }

    fn run(&mut self) -> Result<()> {
        let row = self.current_row()?;
        if self.rebalance_due() {
            let date = self
                .data
                .as_ref()
                .and_then(|d| d.index().get(row).copied())
                .ok_or_else(|| Error::Strategy(format!("{}: row {} out of range", self.name, row)))?;
            self.rebalance(date);
        }
        self.steps += 1;
        Ok(())
    }

    fn prices(&self) -> &Series {
        &self.prices
    }

    fn values(&self) -> &Series {
        &self.values
    }

    fn positions(&self) -> Frame {
        Frame::from_series(self.tickers().zip(self.positions.iter().cloned()))
    }

    fn outlays(&self) -> Frame {
        Frame::from_series(self.tickers().zip(self.outlays.iter().cloned()))
    }

    fn members(&self) -> Vec<&dyn Member> {
        self.leaves.iter().map(|l| l as &dyn Member).collect()
    }

    fn bankrupt(&self) -> bool {
        self.bankrupt
    }

    fn use_integer_positions(&mut self, integer: bool) {
        self.integer_positions = integer;
    }

    fn set_commissions(&mut self, commission: CommissionFn) {
        self.commission = commission;
    }

    fn reseed(&mut self, seed: u64) {
        if let Weigher::Random(rng) = &mut self.weigher {
            *rng = StdRng::seed_from_u64(seed);
        }
    }

    fn clone_box(&self) -> Box<dyn Strategy> {
        Box::new(self.clone())
    }
}
