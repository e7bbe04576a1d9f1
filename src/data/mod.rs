//! Market data containers and retrieval.
//!
//! This module provides:
//! - `Series` / `Frame`: date-indexed containers (missing = NaN)
//! - `DataProvider`: the seam between the fetcher and a concrete source
//! - `CsvProvider` / `WebProvider`: memoized file and web providers
//! - `DataFetcher`: memoized multi-ticker retrieval into one aligned frame
//!
//! # Example
//!
//! ```rust,ignore
//! use ksif_backtest::data::{CsvProvider, DataFetcher, GetRequest};
//!
//! let fetcher = DataFetcher::new(Arc::new(CsvProvider::new("data/prices.csv")));
//! let data = fetcher.get(&GetRequest::new("005930,000660"))?;
//! ```

mod csv;
mod fetch;
pub mod frame;
mod web;

pub use self::csv::{load_table, parse_date, to_numeric, CsvProvider};
pub use fetch::{split_field, DataFetcher, GetRequest};
pub use frame::{Frame, Series, Timestamp};
pub use web::{default_field, korean_ticker, parse_chart, WebProvider, DEFAULT_BASE_URL};

use crate::error::Result;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// One provider call: a ticker, an optional field and the source to ask.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FetchRequest {
    pub ticker: String,
    pub field: Option<String>,
    pub source: String,
    pub start: Option<NaiveDate>,
    pub end: Option<NaiveDate>,
    /// Bypass the provider's cache and overwrite its entry.
    pub refresh: bool,
}

impl FetchRequest {
    pub fn new(ticker: impl Into<String>) -> Self {
        Self {
            ticker: ticker.into(),
            field: None,
            source: "yahoo".to_string(),
            start: None,
            end: None,
            refresh: false,
        }
    }

    pub fn with_field(mut self, field: impl Into<String>) -> Self {
        self.field = Some(field.into());
        self
    }
}

/// A source of single-instrument price series.
#[cfg_attr(test, mockall::automock)]
pub trait DataProvider: Send + Sync {
    /// Stable identifier, part of the fetcher's cache key.
    fn id(&self) -> String;

    /// Fetch one series. Failures must name the ticker and field.
    fn fetch(&self, request: &FetchRequest) -> Result<Series>;
}
