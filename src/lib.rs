//! # KSIF Backtest
//!
//! Multi-asset strategy backtesting with portfolio analytics, result
//! aggregation and random benchmarking.
//!
//! ## Architecture
//!
//! - `config`: Configuration management and validation
//! - `cache`: Argument-keyed memoization of expensive calls
//! - `data`: Price frames, CSV and web providers, memoized multi-ticker retrieval
//! - `strategy`: Strategy trait and the weighted portfolio strategy
//! - `backtest`: Run loop, analytics, statistics, aggregation and random benchmarks
//! - `utils`: Ticker parsing and decimal helpers
//! - `error`: Library error type

pub mod backtest;
pub mod cache;
pub mod config;
pub mod data;
pub mod error;
pub mod strategy;
pub mod utils;

pub use config::Config;
pub use error::{Error, Result};
