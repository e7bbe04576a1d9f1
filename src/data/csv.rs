//! CSV file loading and the file-based data provider.
//!
//! Expected layout: a header row, a date column (`DATE`/`date`, otherwise
//! the first column) and one numeric column per instrument:
//! ```csv
//! DATE,005930,000660:Close
//! 2016-01-04,"1,205,000",30150
//! ```

use crate::cache::MemoCache;
use crate::data::{DataProvider, FetchRequest, Frame, Series, Timestamp};
use crate::error::{Error, Result};
use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Parse a date cell (`YYYYMMDD`, `YYYY-MM-DD`, `YYYY/MM/DD`, `YYYY.MM.DD`
/// or RFC 3339) into a midnight-UTC timestamp.
pub fn parse_date(cell: &str) -> Result<Timestamp> {
    let cell = cell.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(cell) {
        return Ok(dt.with_timezone(&Utc));
    }

    let format = if cell.len() == 8 && cell.chars().all(|c| c.is_ascii_digit()) {
        "%Y%m%d"
    } else if cell.contains('-') {
        "%Y-%m-%d"
    } else if cell.contains('/') {
        "%Y/%m/%d"
    } else if cell.contains('.') {
        "%Y.%m.%d"
    } else {
        return Err(Error::Parse(format!("unrecognised date format: '{}'", cell)));
    };

    NaiveDate::parse_from_str(cell, format)
        .map(|d| d.and_time(NaiveTime::MIN).and_utc())
        .map_err(|e| Error::Parse(format!("invalid date '{}': {}", cell, e)))
}

/// Parse a numeric cell, ignoring thousands separators. Anything that is not
/// a number becomes NaN.
pub fn to_numeric(cell: &str) -> f64 {
    let cleaned: String = cell.trim().chars().filter(|&c| c != ',').collect();
    if cleaned.is_empty() {
        return f64::NAN;
    }
    cleaned.parse().unwrap_or(f64::NAN)
}

/// Parse CSV content into a date-indexed frame.
pub fn parse_table(content: &str) -> Result<Frame> {
    let parse_error = |e: csv::Error| Error::Parse(format!("invalid CSV: {}", e));
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(content.as_bytes());

    let header: Vec<String> = reader
        .headers()
        .map_err(parse_error)?
        .iter()
        .map(|h| h.trim_start_matches('\u{feff}').to_string())
        .collect();
    if header.iter().all(|h| h.is_empty()) {
        return Err(Error::Parse("CSV content has no header row".to_string()));
    }

    let date_col = header
        .iter()
        .position(|h| h == "DATE" || h == "date")
        .unwrap_or(0);
    let columns: Vec<String> = header
        .iter()
        .enumerate()
        .filter(|(i, _)| *i != date_col)
        .map(|(_, h)| h.clone())
        .collect();

    let mut rows: Vec<(Timestamp, Vec<f64>)> = Vec::new();
    for record in reader.records() {
        let record = record.map_err(parse_error)?;
        if record.iter().all(str::is_empty) {
            continue;
        }
        let line = record.position().map_or(0, |p| p.line());
        let date_cell = record
            .get(date_col)
            .ok_or_else(|| Error::Parse(format!("line {}: missing date cell", line)))?;
        let date = parse_date(date_cell)?;
        let values = (0..header.len())
            .filter(|i| *i != date_col)
            .map(|i| record.get(i).map_or(f64::NAN, to_numeric))
            .collect();
        rows.push((date, values));
    }

    rows.sort_by_key(|(date, _)| *date);

    let index = rows.iter().map(|(date, _)| *date).collect();
    let data = (0..columns.len())
        .map(|c| rows.iter().map(|(_, values)| values[c]).collect())
        .collect();

    Frame::new(index, columns, data)
}

/// Load a whole CSV file into a frame.
pub fn load_table<P: AsRef<Path>>(path: P) -> Result<Frame> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path)?;
    let frame = parse_table(&content)?;
    info!(
        "Loaded {} rows x {} columns from {}",
        frame.n_rows(),
        frame.n_cols(),
        path.display()
    );
    Ok(frame)
}

#[derive(Serialize)]
struct ColumnKey<'a> {
    path: &'a Path,
    ticker: &'a str,
    field: Option<&'a str>,
    refresh: bool,
}

/// File-backed provider: each ticker is a column of one CSV file.
///
/// A column is looked up as `ticker` or, when a field is requested,
/// `ticker:field`.
pub struct CsvProvider {
    path: PathBuf,
    tables: MemoCache<Frame>,
    columns: MemoCache<Series>,
}

impl CsvProvider {
    pub fn new<P: Into<PathBuf>>(path: P) -> Self {
        Self {
            path: path.into(),
            tables: MemoCache::new("csv_table"),
            columns: MemoCache::new("csv_column"),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn table(&self, refresh: bool) -> Result<Frame> {
        #[derive(Serialize)]
        struct TableKey<'a> {
            path: &'a Path,
            refresh: bool,
        }
        self.tables.get_or_compute(
            &TableKey {
                path: &self.path,
                refresh,
            },
            || load_table(&self.path),
        )
    }
}

impl DataProvider for CsvProvider {
    fn id(&self) -> String {
        format!("csv:{}", self.path.display())
    }

    fn fetch(&self, request: &FetchRequest) -> Result<Series> {
        let field = request.field.as_deref().filter(|f| !f.is_empty());
        let key = ColumnKey {
            path: &self.path,
            ticker: &request.ticker,
            field,
            refresh: request.refresh,
        };

        self.columns.get_or_compute(&key, || {
            let column = match field {
                Some(f) => format!("{}:{}", request.ticker, f),
                None => request.ticker.clone(),
            };
            debug!("Reading column '{}' from {}", column, self.path.display());

            let table = self.table(request.refresh)?;
            table
                .column_series(&column)
                .ok_or_else(|| Error::MissingField {
                    ticker: request.ticker.clone(),
                    field: field.unwrap_or_default().to_string(),
                    source_name: self.path.display().to_string(),
                })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Datelike, TimeZone};
    use std::io::Write;

    const CSV: &str = "DATE,005930,000660:Close,name\n\
2016-01-05,\"1,208,000\",30300,abc\n\
2016-01-04,\"1,205,000\",30150,abc\n";

    #[test]
    fn test_parse_date_formats() {
        let expected = Utc.with_ymd_and_hms(2016, 1, 4, 0, 0, 0).unwrap();
        assert_eq!(parse_date("20160104").unwrap(), expected);
        assert_eq!(parse_date("2016-01-04").unwrap(), expected);
        assert_eq!(parse_date("2016/01/04").unwrap(), expected);
        assert_eq!(parse_date("2016.01.04").unwrap(), expected);
        assert!(parse_date("Jan 4").is_err());
    }

    #[test]
    fn test_to_numeric() {
        assert_eq!(to_numeric("1,205,000"), 1_205_000.0);
        assert_eq!(to_numeric(" 3.5 "), 3.5);
        assert!(to_numeric("abc").is_nan());
        assert!(to_numeric("").is_nan());
    }

    #[test]
    fn test_parse_table_sorts_and_strips_separators() {
        let frame = parse_table(CSV).unwrap();

        assert_eq!(frame.columns(), &["005930", "000660:Close", "name"]);
        assert_eq!(frame.index()[0].day(), 4);
        assert_eq!(frame.column("005930").unwrap(), &[1_205_000.0, 1_208_000.0]);
        assert!(frame.column("name").unwrap()[0].is_nan());
    }

    #[test]
    fn test_parse_table_quoted_newlines_and_ragged_rows() {
        let content = "\u{feff}date,\"multi\nline\",b\n\
20160104,\"1,000\",2\n\
\n\
20160105,3\n";
        let frame = parse_table(content).unwrap();

        assert_eq!(frame.columns(), &["multi\nline", "b"]);
        assert_eq!(frame.column("multi\nline").unwrap(), &[1000.0, 3.0]);
        assert!(frame.column("b").unwrap()[1].is_nan());

        assert!(matches!(parse_table(""), Err(Error::Parse(_))));
    }

    #[test]
    fn test_csv_provider_fields_and_missing_columns() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(CSV.as_bytes()).unwrap();

        let provider = CsvProvider::new(file.path());

        let plain = provider.fetch(&FetchRequest::new("005930")).unwrap();
        assert_eq!(plain.len(), 2);

        let with_field = provider
            .fetch(&FetchRequest::new("000660").with_field("Close"))
            .unwrap();
        assert_eq!(with_field.values(), &[30150.0, 30300.0]);

        let err = provider.fetch(&FetchRequest::new("035420")).unwrap_err();
        match err {
            Error::MissingField { ticker, .. } => assert_eq!(ticker, "035420"),
            other => panic!("unexpected error: {other}"),
        }
    }
}
