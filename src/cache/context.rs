//! Per-call cache context
//!
//! Flags that decide whether the cache is consulted or filled travel with
//! each call instead of living in global state.

use crate::cache::types::{CacheKey, CacheValue};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

/// Explicit context threaded through every engine entry point
#[derive(Debug, Clone)]
pub struct CacheContext {
    /// Consult the cache at all; when false every fetch goes to the source
    pub use_cache: bool,

    /// Write computed values back; when false the cache is read-only
    pub fill_cache: bool,

    /// Request-scoped memo of values already fetched in this unit of work
    pub memo: Option<Arc<Memo>>,
}

impl Default for CacheContext {
    fn default() -> Self {
        Self {
            use_cache: true,
            fill_cache: true,
            memo: None,
        }
    }
}

impl CacheContext {
    /// Context that bypasses the cache entirely
    pub fn uncached() -> Self {
        Self {
            use_cache: false,
            fill_cache: false,
            memo: None,
        }
    }

    /// Context that reads the cache but never writes to it
    pub fn read_only() -> Self {
        Self {
            fill_cache: false,
            ..Default::default()
        }
    }

    /// Attach a fresh memo; repeated fetches of a key in this context hit it
    pub fn memoized(mut self) -> Self {
        self.memo = Some(Arc::new(Memo::default()));
        self
    }

    pub(crate) fn memo_get(&self, key: &str) -> Option<CacheValue> {
        self.memo.as_ref().and_then(|memo| memo.get(key))
    }

    pub(crate) fn memo_put(&self, key: &str, value: &CacheValue) {
        if let Some(memo) = &self.memo {
            memo.put(key, value);
        }
    }

    pub(crate) fn memo_forget(&self, key: &str) {
        if let Some(memo) = &self.memo {
            memo.forget(key);
        }
    }
}

/// Memoized cache values for one unit of work
#[derive(Debug, Default)]
pub struct Memo {
    values: Mutex<HashMap<CacheKey, CacheValue>>,
}

impl Memo {
    pub fn get(&self, key: &str) -> Option<CacheValue> {
        self.values.lock().get(key).cloned()
    }

    pub fn put(&self, key: &str, value: &CacheValue) {
        self.values.lock().insert(key.to_string(), value.clone());
    }

    pub fn forget(&self, key: &str) {
        self.values.lock().remove(key);
    }

    pub fn len(&self) -> usize {
        self.values.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_context_uses_and_fills_cache() {
        let ctx = CacheContext::default();
        assert!(ctx.use_cache);
        assert!(ctx.fill_cache);
        assert!(ctx.memo.is_none());

        let ctx = CacheContext::uncached();
        assert!(!ctx.use_cache && !ctx.fill_cache);

        assert!(!CacheContext::read_only().fill_cache);
    }

    #[test]
    fn test_memo_is_shared_between_clones() {
        let ctx = CacheContext::default().memoized();
        let clone = ctx.clone();

        ctx.memo_put("k", &"v".to_string());
        assert_eq!(clone.memo_get("k"), Some("v".to_string()));

        clone.memo_forget("k");
        assert!(ctx.memo_get("k").is_none());
    }

    #[test]
    fn test_unmemoized_context_ignores_memo_calls() {
        let ctx = CacheContext::default();
        ctx.memo_put("k", &"v".to_string());
        assert!(ctx.memo_get("k").is_none());
    }
}
