//! Strategy contract consumed by the backtest runner and analytics.
//!
//! A strategy is a tree: a root composite holding child nodes that are
//! either further composites or security leaves. The runner only talks to
//! the root through [`Strategy`]; analytics walk the non-root nodes through
//! [`Member`] and ask each one what it is via [`NodeKind`].

pub mod portfolio;

#[cfg(test)]
pub mod testing;

pub use portfolio::{Weigher, WeightedPortfolio};

use crate::data::{Frame, Series, Timestamp};
use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// `(signed_quantity, price) -> non-negative cost`.
pub type CommissionFn = Arc<dyn Fn(f64, f64) -> f64 + Send + Sync>;

/// Commission function that never charges anything.
pub fn no_commission() -> CommissionFn {
    Arc::new(|_, _| 0.0)
}

/// What a tree node is, as far as analytics care.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum NodeKind {
    /// Sub-strategy grouping other nodes
    Composite,
    /// Tradable instrument identified by its ticker
    Security { ticker: String },
}

impl NodeKind {
    pub fn security(ticker: impl Into<String>) -> Self {
        NodeKind::Security {
            ticker: ticker.into(),
        }
    }

    /// Ticker of a security leaf, `None` for composites.
    pub fn ticker(&self) -> Option<&str> {
        match self {
            NodeKind::Security { ticker } => Some(ticker),
            NodeKind::Composite => None,
        }
    }
}

/// A non-root node of a strategy tree.
pub trait Member {
    /// Path from the root, e.g. `equal>005930`.
    fn full_name(&self) -> &str;
    /// Market value of the node per date.
    fn values(&self) -> &Series;
    fn kind(&self) -> &NodeKind;
}

/// The root of a strategy tree, driven date by date by a backtest.
pub trait Strategy: Send + Sync {
    fn name(&self) -> &str;
    fn set_name(&mut self, name: &str);

    /// Bind the strategy to its data. Called once before anything else.
    fn setup(&mut self, data: Arc<Frame>) -> Result<()>;
    /// Add (or withdraw) capital.
    fn adjust(&mut self, amount: f64);
    /// Mark the tree to `date`. May be called more than once per date.
    fn update(&mut self, date: Timestamp) -> Result<()>;
    /// Take the decisions for the current date.
    fn run(&mut self) -> Result<()>;

    /// Price index of the root (starts at 100).
    fn prices(&self) -> &Series;
    /// Total value of the root.
    fn values(&self) -> &Series;
    /// Quantity held per security and date.
    fn positions(&self) -> Frame;
    /// Signed cash spent per security and date (positive = buy).
    fn outlays(&self) -> Frame;
    /// Every node except the root.
    fn members(&self) -> Vec<&dyn Member>;
    fn bankrupt(&self) -> bool;

    fn use_integer_positions(&mut self, integer: bool);
    fn set_commissions(&mut self, commission: CommissionFn);

    /// Reseed the random component, if there is one.
    fn reseed(&mut self, _seed: u64) {}

    fn clone_box(&self) -> Box<dyn Strategy>;

    /// Owned copy of the recorded state.
    fn snapshot(&self) -> StrategySnapshot {
        StrategySnapshot {
            name: self.name().to_string(),
            prices: self.prices().clone(),
            values: self.values().clone(),
            positions: self.positions(),
            outlays: self.outlays(),
            members: self
                .members()
                .into_iter()
                .map(|m| MemberSnapshot {
                    full_name: m.full_name().to_string(),
                    kind: m.kind().clone(),
                    values: m.values().clone(),
                })
                .collect(),
            bankrupt: self.bankrupt(),
        }
    }
}

impl Clone for Box<dyn Strategy> {
    fn clone(&self) -> Self {
        self.clone_box()
    }
}

/// Serializable state of a strategy after a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrategySnapshot {
    pub name: String,
    pub prices: Series,
    pub values: Series,
    pub positions: Frame,
    pub outlays: Frame,
    pub members: Vec<MemberSnapshot>,
    pub bankrupt: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemberSnapshot {
    pub full_name: String,
    pub kind: NodeKind,
    pub values: Series,
}

impl Member for MemberSnapshot {
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
