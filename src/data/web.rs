//! Web data provider backed by a Yahoo-Finance-style chart endpoint.

use crate::cache::MemoCache;
use crate::data::{DataProvider, FetchRequest, Series};
use crate::error::{Error, Result};
use chrono::{DateTime, NaiveTime};
use reqwest::blocking::Client;
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, instrument};

pub const DEFAULT_BASE_URL: &str = "https://query1.finance.yahoo.com/v8/finance/chart";

/// Map a Korean index name to the ticker and source that serve it.
///
/// Size and membership indices are only listed under their `KRX:` codes, so
/// asking `yahoo` for one of them switches the source to `google`.
pub fn korean_ticker(name: &str, source: &str) -> (String, String) {
    let normalized: String = name
        .to_lowercase()
        .chars()
        .filter(|c| *c != ' ' && *c != '_')
        .collect();

    let mapped = match (source, normalized.as_str()) {
        ("yahoo", "kospi") => Some(("^KS11", "yahoo")),
        ("yahoo", "kosdaq") => Some(("^KQ11", "yahoo")),
        ("yahoo", "kospi200") => Some(("KRX:KOSPI200", "google")),
        ("yahoo", "kospi100") => Some(("KRX:KOSPI100", "google")),
        ("yahoo", "kospi50") => Some(("KRX:KOSPI50", "google")),
        ("yahoo", "kospilarge") => Some(("KRX:KOSPI-2", "google")),
        ("yahoo", "kospimiddle") => Some(("KRX:KOSPI-3", "google")),
        ("yahoo", "kospismall") => Some(("KRX:KOSPI-4", "google")),
        ("google", "kospi") => Some(("KRX:KOSPI", "google")),
        _ => None,
    };

    match mapped {
        Some((ticker, source)) => (ticker.to_string(), source.to_string()),
        None => (name.to_string(), source.to_string()),
    }
}

/// Field to extract: the requested one, else `Adj Close` for `yahoo` and
/// `Close` for any other source.
pub fn default_field(field: Option<&str>, source: &str) -> String {
    match field.filter(|f| !f.is_empty()) {
        Some(f) => f.to_string(),
        None if source == "yahoo" => "Adj Close".to_string(),
        None => "Close".to_string(),
    }
}

#[derive(Debug, Deserialize)]
struct ChartResponse {
    chart: Chart,
}

#[derive(Debug, Deserialize)]
struct Chart {
    result: Option<Vec<ChartResult>>,
    error: Option<ChartError>,
}

#[derive(Debug, Deserialize)]
struct ChartError {
    description: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChartResult {
    #[serde(default)]
    timestamp: Vec<i64>,
    indicators: Indicators,
}

#[derive(Debug, Deserialize)]
struct Indicators {
    #[serde(default)]
    quote: Vec<Quote>,
    #[serde(default)]
    adjclose: Vec<AdjClose>,
}

#[derive(Debug, Default, Deserialize)]
struct Quote {
    #[serde(default)]
    open: Vec<Option<f64>>,
    #[serde(default)]
    high: Vec<Option<f64>>,
    #[serde(default)]
    low: Vec<Option<f64>>,
    #[serde(default)]
    close: Vec<Option<f64>>,
    #[serde(default)]
    volume: Vec<Option<f64>>,
}

#[derive(Debug, Deserialize)]
struct AdjClose {
    #[serde(default)]
    adjclose: Vec<Option<f64>>,
}

/// Parse a chart response body into the series for `field`.
///
/// Timestamps are normalised to midnight UTC so that instruments from
/// different exchanges align on calendar dates.
pub fn parse_chart(body: &str, ticker: &str, field: &str) -> Result<Series> {
    let provider_error = |reason: String| Error::Provider {
        ticker: ticker.to_string(),
        field: field.to_string(),
        reason,
    };

    let response: ChartResponse =
        serde_json::from_str(body).map_err(|e| provider_error(e.to_string()))?;

    if let Some(err) = response.chart.error {
        return Err(provider_error(
            err.description.unwrap_or_else(|| "unknown error".to_string()),
        ));
    }

    let result = response
        .chart
        .result
        .and_then(|r| r.into_iter().next())
        .ok_or_else(|| provider_error("empty result".to_string()))?;

    let quote = result.indicators.quote.into_iter().next().unwrap_or_default();
    let values = match field {
        "Adj Close" => result
            .indicators
            .adjclose
            .into_iter()
            .next()
            .map(|a| a.adjclose)
            .unwrap_or_default(),
        "Close" => quote.close,
        "Open" => quote.open,
        "High" => quote.high,
        "Low" => quote.low,
        "Volume" => quote.volume,
        other => return Err(provider_error(format!("unsupported field '{}'", other))),
    };

    if values.is_empty() || values.len() != result.timestamp.len() {
        return Err(provider_error(format!(
            "{} timestamps but {} values",
            result.timestamp.len(),
            values.len()
        )));
    }

    let mut series = Series::new();
    for (ts, value) in result.timestamp.iter().zip(values) {
        let date = DateTime::from_timestamp(*ts, 0)
            .ok_or_else(|| provider_error(format!("invalid timestamp {}", ts)))?
            .date_naive()
            .and_time(NaiveTime::MIN)
            .and_utc();
        series.set(date, value.unwrap_or(f64::NAN));
    }

    Ok(series)
}

/// Memoized web provider.
pub struct WebProvider {
    http: Client,
    base_url: String,
    cache: MemoCache<Series>,
}

impl WebProvider {
    pub fn new(base_url: impl Into<String>, timeout_secs: u64) -> Result<Self> {
        let http = Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()?;

        Ok(Self {
            http,
            base_url: base_url.into(),
            cache: MemoCache::new("web"),
        })
    }

    #[instrument(skip(self))]
    fn download(&self, ticker: &str, field: &str, request: &FetchRequest) -> Result<Series> {
        let mut url = format!("{}/{}?interval=1d", self.base_url, ticker);
        match (request.start, request.end) {
            (None, None) => url.push_str("&range=max"),
            (start, end) => {
                let to_epoch = |d: chrono::NaiveDate| d.and_time(NaiveTime::MIN).and_utc().timestamp();
                let p1 = start.map(to_epoch).unwrap_or(0);
                let p2 = end
                    .map(to_epoch)
                    .unwrap_or_else(|| chrono::Utc::now().timestamp());
                url.push_str(&format!("&period1={}&period2={}", p1, p2));
            }
        }

        debug!("GET {}", url);
        let body = self
            .http
            .get(&url)
            .send()
            .and_then(|r| r.error_for_status())
            .and_then(|r| r.text())
            .map_err(|e| Error::Provider {
                ticker: ticker.to_string(),
                field: field.to_string(),
                reason: e.to_string(),
            })?;

        parse_chart(&body, ticker, field)
    }
}

impl DataProvider for WebProvider {
    fn id(&self) -> String {
        format!("web:{}", self.base_url)
    }

    fn fetch(&self, request: &FetchRequest) -> Result<Series> {
        self.cache.get_or_compute(request, || {
            let (ticker, source) = korean_ticker(&request.ticker, &request.source);
            let field = default_field(request.field.as_deref(), &source);
            debug!(ticker = %request.ticker, %source, %field, "web fetch");
            self.download(&ticker, &field, request)
        })
    }
}
