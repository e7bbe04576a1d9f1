//! Memoized multi-ticker retrieval into one aligned frame.

use crate::cache::MemoCache;
use crate::config::DataConfig;
use crate::data::{load_table, DataProvider, FetchRequest, Frame};
use crate::error::Result;
use crate::utils::{clean_tickers, parse_arg};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;

/// Split `ticker;field` into its ticker and optional field.
pub fn split_field<'a>(ticker: &'a str, sep: &str) -> (&'a str, Option<&'a str>) {
    match ticker.split_once(sep) {
        Some((t, f)) if !sep.is_empty() => (t, Some(f)),
        _ => (ticker, None),
    }
}

/// Arguments of a `DataFetcher::get` call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GetRequest {
    /// Tickers in requested order. A single entry naming a `.csv` file loads
    /// that file as-is.
    pub tickers: Vec<String>,
    pub source: String,
    pub start: Option<NaiveDate>,
    pub end: Option<NaiveDate>,
    /// Keep only dates on which every ticker has a value.
    pub common_dates: bool,
    /// Carry the last value forward over gaps.
    pub forward_fill: bool,
    pub clean_tickers: bool,
    /// Explicit column labels, one per resulting column.
    pub column_names: Option<Vec<String>>,
    pub ticker_field_sep: String,
    /// Existing frame the downloaded columns are appended to.
    pub merge_to: Option<Frame>,
    /// Bypass every cache on the way down and overwrite the entries.
    pub refresh: bool,
}

impl GetRequest {
    /// Request for a single ticker, a comma-separated list or a CSV path.
    pub fn new(tickers: &str) -> Self {
        Self::from_config(tickers, &DataConfig::default())
    }

    pub fn from_config(tickers: &str, config: &DataConfig) -> Self {
        Self {
            tickers: parse_arg(tickers),
            source: config.source.clone(),
            start: None,
            end: None,
            common_dates: config.common_dates,
            forward_fill: config.forward_fill,
            clean_tickers: config.clean_tickers,
            column_names: None,
            ticker_field_sep: config.ticker_field_sep.clone(),
            merge_to: None,
            refresh: false,
        }
    }

    pub fn with_tickers<S: Into<String>>(mut self, tickers: Vec<S>) -> Self {
        self.tickers = tickers.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_column_names(mut self, names: Vec<String>) -> Self {
        self.column_names = Some(names);
        self
    }

    pub fn with_range(mut self, start: Option<NaiveDate>, end: Option<NaiveDate>) -> Self {
        self.start = start;
        self.end = end;
        self
    }

    pub fn with_refresh(mut self, refresh: bool) -> Self {
        self.refresh = refresh;
        self
    }

    fn csv_path(&self) -> Option<&str> {
        match self.tickers.as_slice() {
            [single] if single.contains(".csv") => Some(single.as_str()),
            _ => None,
        }
    }
}

#[derive(Serialize)]
struct GetKey<'a> {
    provider: String,
    #[serde(flatten)]
    request: &'a GetRequest,
}

/// Retrieves aligned multi-ticker frames through a provider, memoized.
pub struct DataFetcher {
    provider: Arc<dyn DataProvider>,
    cache: MemoCache<Frame>,
}

impl DataFetcher {
    pub fn new(provider: Arc<dyn DataProvider>) -> Self {
        Self {
            provider,
            cache: MemoCache::new("get"),
        }
    }

    pub fn provider(&self) -> &dyn DataProvider {
        self.provider.as_ref()
    }

    pub fn cache(&self) -> &MemoCache<Frame> {
        &self.cache
    }

    /// Fetch every requested ticker and align them into one frame.
    pub fn get(&self, request: &GetRequest) -> Result<Frame> {
        let key = GetKey {
            provider: self.provider.id(),
            request,
        };
        self.cache.get_or_compute(&key, || self.fetch_uncached(request))
    }

    fn fetch_uncached(&self, request: &GetRequest) -> Result<Frame> {
        if let Some(path) = request.csv_path() {
            return load_table(path);
        }

        let mut columns = Vec::with_capacity(request.tickers.len());
        for ticker in &request.tickers {
            let (t, field) = split_field(ticker, &request.ticker_field_sep);
            let fetch = FetchRequest {
                ticker: t.to_string(),
                field: field.map(str::to_string),
                source: request.source.clone(),
                start: request.start,
                end: request.end,
                refresh: request.refresh,
            };
            columns.push((ticker.clone(), self.provider.fetch(&fetch)?));
        }

        let mut frame = Frame::from_series(columns);

        if let Some(base) = &request.merge_to {
            frame = base.merge(&frame);
        }
        if request.common_dates {
            frame = frame.drop_incomplete_rows();
        }
        if request.forward_fill {
            frame = frame.forward_fill();
        }

        frame = match &request.column_names {
            Some(names) => frame.with_columns(names.clone())?,
            None if request.clean_tickers => {
                let cleaned = clean_tickers(frame.columns());
                frame.with_columns(cleaned)?
            }
            None => frame,
        };

        info!(
            "Fetched {} tickers from {}: {} rows",
            request.tickers.len(),
            self.provider.id(),
            frame.n_rows()
        );
        Ok(frame)
    }
}
