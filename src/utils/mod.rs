//! Shared helpers: decimal rounding and ticker parsing.

pub mod decimal;
pub mod tickers;

pub use tickers::{clean_ticker, clean_tickers, parse_arg};
