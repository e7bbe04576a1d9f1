//! Memoization of expensive data-fetch calls.
//!
//! A [`MemoCache`] maps a deterministic encoding of a call's arguments to
//! the result of that call. The cache is an explicit value owned by whoever
//! wraps the function (a provider, the data fetcher, ...), never global
//! state. Entries live as long as the owner; there is no eviction.
//!
//! A designated boolean argument (the refresh keyword, `refresh` by
//! default) bypasses the lookup and overwrites the stored entry with the
//! fresh result. The refresh argument is stripped before the key is built,
//! so a refreshed call replaces the entry ordinary calls hit.

use crate::error::{Error, Result};
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use tracing::debug;

/// Name of the argument that forces a cache refresh.
pub const DEFAULT_REFRESH_KEYWORD: &str = "refresh";

/// Turns call arguments into a cache key.
///
/// Implementations must be deterministic and order-sensitive.
pub trait KeyEncoder: Send + Sync {
    fn encode(&self, args: &Value) -> Result<String>;
}

/// Compact JSON encoding of the argument value.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonKeyEncoder;

impl KeyEncoder for JsonKeyEncoder {
    fn encode(&self, args: &Value) -> Result<String> {
        serde_json::to_string(args).map_err(|e| Error::KeySerialization(e.to_string()))
    }
}

/// Result cache keyed by encoded call arguments.
pub struct MemoCache<R> {
    name: String,
    refresh_keyword: String,
    /// Positional parameter names, used to find the refresh flag when the
    /// arguments serialize as a sequence (tuples).
    signature: Vec<String>,
    encoder: Box<dyn KeyEncoder>,
    entries: Mutex<HashMap<String, R>>,
}

impl<R: Clone> MemoCache<R> {
    /// Create an empty cache with the default refresh keyword and JSON keys.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            refresh_keyword: DEFAULT_REFRESH_KEYWORD.to_string(),
            signature: Vec::new(),
            encoder: Box::new(JsonKeyEncoder),
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_refresh_keyword(mut self, keyword: impl Into<String>) -> Self {
        self.refresh_keyword = keyword.into();
        self
    }

    pub fn with_signature<S: AsRef<str>>(mut self, params: &[S]) -> Self {
        self.signature = params.iter().map(|p| p.as_ref().to_string()).collect();
        self
    }

    pub fn with_encoder(mut self, encoder: impl KeyEncoder + 'static) -> Self {
        self.encoder = Box::new(encoder);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Return the cached result for `args`, or compute it with `compute`.
    ///
    /// Errors from `compute` are propagated and nothing is stored.
    pub fn get_or_compute<A, F>(&self, args: &A, compute: F) -> Result<R>
    where
        A: Serialize + ?Sized,
        F: FnOnce() -> Result<R>,
    {
        let mut value =
            serde_json::to_value(args).map_err(|e| Error::KeySerialization(e.to_string()))?;
        let refresh = self.take_refresh_flag(&mut value);
        let key = self.encoder.encode(&value)?;

        if !refresh {
            if let Some(hit) = self.entries.lock().get(&key) {
                debug!(cache = %self.name, "cache hit");
                return Ok(hit.clone());
            }
            debug!(cache = %self.name, "cache miss");
        } else {
            debug!(cache = %self.name, "cache refresh requested");
        }

        let result = compute()?;
        self.entries.lock().insert(key, result.clone());
        Ok(result)
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    pub fn clear(&self) {
        self.entries.lock().clear();
    }

    fn take_refresh_flag(&self, args: &mut Value) -> bool {
        match args {
            Value::Object(map) => map
                .remove(&self.refresh_keyword)
                .and_then(|v| v.as_bool())
                .unwrap_or(false),
            Value::Array(items) => {
                let Some(pos) = self.signature.iter().position(|p| *p == self.refresh_keyword)
                else {
                    return false;
                };
                if pos < items.len() {
                    items.remove(pos).as_bool().unwrap_or(false)
                } else {
                    false
                }
            }
            _ => false,
        }
    }
}

/// A function bundled with the cache that memoizes it.
pub struct Memoized<A, R> {
    func: Box<dyn Fn(&A) -> Result<R> + Send + Sync>,
    cache: MemoCache<R>,
}

impl<A: Serialize, R: Clone> Memoized<A, R> {
    pub fn new<F>(name: impl Into<String>, func: F) -> Self
    where
        F: Fn(&A) -> Result<R> + Send + Sync + 'static,
    {
        Self::with_cache(MemoCache::new(name), func)
    }

    pub fn with_cache<F>(cache: MemoCache<R>, func: F) -> Self
    where
        F: Fn(&A) -> Result<R> + Send + Sync + 'static,
    {
        Self {
            func: Box::new(func),
            cache,
        }
    }

    /// Call the wrapped function through the cache.
    pub fn call(&self, args: &A) -> Result<R> {
        self.cache.get_or_compute(args, || (self.func)(args))
    }

    pub fn cache(&self) -> &MemoCache<R> {
        &self.cache
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[derive(Serialize)]
    struct FetchArgs {
        ticker: String,
        field: Option<String>,
        refresh: bool,
    }

    fn args(ticker: &str, refresh: bool) -> FetchArgs {
        FetchArgs {
            ticker: ticker.to_string(),
            field: None,
            refresh,
        }
    }

    fn counting(calls: Arc<AtomicUsize>) -> Memoized<FetchArgs, usize> {
        Memoized::new("test", move |_: &FetchArgs| {
            Ok(calls.fetch_add(1, Ordering::SeqCst) + 1)
        })
    }

    #[test]
    fn test_identical_args_hit_cache() {
        let calls = Arc::new(AtomicUsize::new(0));
        let memo = counting(calls.clone());

        assert_eq!(memo.call(&args("aapl", false)).unwrap(), 1);
        assert_eq!(memo.call(&args("aapl", false)).unwrap(), 1);
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        assert_eq!(memo.call(&args("msft", false)).unwrap(), 2);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(memo.cache().len(), 2);
    }

    #[test]
    fn test_refresh_reinvokes_and_overwrites() {
        let calls = Arc::new(AtomicUsize::new(0));
        let memo = counting(calls.clone());

        assert_eq!(memo.call(&args("aapl", false)).unwrap(), 1);
        assert_eq!(memo.call(&args("aapl", true)).unwrap(), 2);
        assert_eq!(calls.load(Ordering::SeqCst), 2);

        // Ordinary calls now see the refreshed value.
        assert_eq!(memo.call(&args("aapl", false)).unwrap(), 2);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(memo.cache().len(), 1);
    }

    #[test]
    fn test_positional_refresh_flag() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let cache = MemoCache::new("positional").with_signature(&["ticker", "refresh"]);
        let memo = Memoized::with_cache(cache, move |_: &(String, bool)| {
            Ok(counter.fetch_add(1, Ordering::SeqCst))
        });

        memo.call(&("kospi".to_string(), false)).unwrap();
        memo.call(&("kospi".to_string(), false)).unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        memo.call(&("kospi".to_string(), true)).unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_key_is_order_sensitive() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let memo = Memoized::new("order", move |_: &(String, String)| {
            Ok(counter.fetch_add(1, Ordering::SeqCst))
        });

        memo.call(&("a".to_string(), "b".to_string())).unwrap();
        memo.call(&("b".to_string(), "a".to_string())).unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_unserializable_args_are_fatal() {
        let memo: Memoized<HashMap<(u8, u8), u8>, u8> = Memoized::new("bad", |_| Ok(0));
        let mut bad = HashMap::new();
        bad.insert((1, 2), 3);

        let err = memo.call(&bad);
        assert!(matches!(err, Err(Error::KeySerialization(_))));
        assert!(memo.cache().is_empty());
    }

    #[test]
    fn test_errors_are_not_cached() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let memo: Memoized<FetchArgs, u8> = Memoized::new("failing", move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            Err(Error::Strategy("boom".into()))
        });

        assert!(memo.call(&args("aapl", false)).is_err());
        assert!(memo.call(&args("aapl", false)).is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}
