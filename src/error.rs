//! Error types for the backtesting library.

use thiserror::Error;

/// Fatal conditions raised by the backtesting core.
///
/// Bankruptcy is not an error: a bankrupt run terminates normally with a
/// truncated snapshot.
#[derive(Error, Debug)]
pub enum Error {
    #[error("data provided has some duplicate column names: {0:?}. Please remove duplicates!")]
    DuplicateColumns(Vec<String>),

    #[error("invalid statistic '{0}'; valid statistics are the statistics in the stats table")]
    UnknownStatistic(String),

    #[error("column_names must be of same length as tickers (expected {expected}, got {actual})")]
    ColumnNamesMismatch { expected: usize, actual: usize },

    #[error("ticker(field) '{ticker}:{field}' not present in {source_name}")]
    MissingField {
        ticker: String,
        field: String,
        source_name: String,
    },

    #[error("failed to retrieve data for {ticker}:{field}: {reason}")]
    Provider {
        ticker: String,
        field: String,
        reason: String,
    },

    #[error("cannot build a memoization key: {0}")]
    KeySerialization(String),

    #[error("backtest '{0}' has already been run")]
    AlreadyRun(String),

    #[error("backtest '{0}' has not been run yet")]
    NotRun(String),

    #[error("duplicate backtest name '{0}' in result set")]
    DuplicateRunName(String),

    #[error("no backtest named or indexed '{0}'")]
    UnknownBacktest(String),

    #[error("invalid index: {0}")]
    InvalidIndex(String),

    #[error("strategy error: {0}")]
    Strategy(String),

    #[error("parse error: {0}")]
    Parse(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("snapshot encoding error: {0}")]
    Snapshot(#[from] bincode::Error),

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
