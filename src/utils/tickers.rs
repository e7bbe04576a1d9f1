//! Ticker argument parsing and normalisation.

/// Split a ticker argument into a list.
///
/// A comma-separated string yields its trimmed pieces; any other string is
/// a single ticker.
pub fn parse_arg(arg: &str) -> Vec<String> {
    let arg = arg.trim();
    if arg.contains(',') {
        arg.split(',').map(|t| t.trim().to_string()).collect()
    } else {
        vec![arg.to_string()]
    }
}

/// Normalise a ticker for use as a column label.
///
/// Keeps the first space-separated word, drops every character that is not
/// a letter or digit and lower-cases the rest.
pub fn clean_ticker(ticker: &str) -> String {
    ticker
        .split(' ')
        .next()
        .unwrap_or_default()
        .chars()
        .filter(|c| c.is_alphanumeric())
        .flat_map(char::to_lowercase)
        .collect()
}

pub fn clean_tickers<S: AsRef<str>>(tickers: &[S]) -> Vec<String> {
    tickers.iter().map(|t| clean_ticker(t.as_ref())).collect()
}
