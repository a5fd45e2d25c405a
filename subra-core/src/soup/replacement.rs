use serde_json::{json, Value};
use subra_common::prelude::*;
use subra_common::BoundedCache;

use crate::config::Properties;

/// Marker key of a substituted value inside a snapshot.
const REF_MARKER: &str = "$soup-ref";

/// Substitutes large shared immutable values (compiled process definitions
/// and the like) with small references while a soup is being written out, and
/// rehydrates them on the way back in, so checkpoints stay small.
pub trait ReplacementMap: Send + Sync {
    /// Returns the replacement for `value`, or None when the value passes
    /// through unchanged.
    fn replace(&self, value: &Value) -> Option<Value>;

    /// Inverse of `replace`. None when `value` is not a replacement marker.
    fn restore(&self, value: &Value) -> Option<Value>;
}

/// Source of shared values that are not registered in memory, e.g. a
/// definition store. Consulted on restore when a marker's key is unknown.
pub trait SharedValueResolver: Send + Sync {
    fn resolve(&self, key: &str) -> Option<Value>;
}

/// Replacement map over values registered under explicit keys. Values pulled
/// through the resolver on restore are held in a bounded per-instance cache,
/// not a process-wide one.
pub struct KeyedReplacementMap {
    by_key: HashMap<InlineStr, Value>,
    resolver: Option<Arc<dyn SharedValueResolver>>,
    rehydrated: Mutex<BoundedCache<InlineStr, Value>>,
}

impl KeyedReplacementMap {
    pub fn new() -> Self {
        Self::with_capacity(Properties::get_replacement_cache_capacity())
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            by_key: HashMap::new(),
            resolver: None,
            rehydrated: Mutex::new(BoundedCache::new(capacity)),
        }
    }

    pub fn with_resolver(mut self, resolver: Arc<dyn SharedValueResolver>) -> Self {
        self.resolver = Some(resolver);
        self
    }

    /// Registers a shared value; any persisted payload equal to it is written
    /// out as a reference to `key`.
    pub fn register(&mut self, key: impl Into<InlineStr>, value: Value) {
        self.by_key.insert(key.into(), value);
    }
}

impl Default for KeyedReplacementMap {
    fn default() -> Self {
        Self::new()
    }
}

impl ReplacementMap for KeyedReplacementMap {
    fn replace(&self, value: &Value) -> Option<Value> {
        // the registry holds one entry per shared definition; a linear scan
        // beats maintaining a value-keyed index
        self.by_key
            .iter()
            .find(|(_, registered)| *registered == value)
            .map(|(key, _)| {
                let mut marker = serde_json::Map::new();
                marker.insert(REF_MARKER.to_string(), json!(key.as_str()));
                Value::Object(marker)
            })
    }

    fn restore(&self, value: &Value) -> Option<Value> {
        let key = InlineStr::from(value.get(REF_MARKER)?.as_str()?);
        if let Some(registered) = self.by_key.get(&key) {
            return Some(registered.clone());
        }
        let mut cache = self.rehydrated.lock();
        if let Some(cached) = cache.get(&key) {
            return Some(cached.clone());
        }
        match self.resolver.as_ref().and_then(|r| r.resolve(&key)) {
            Some(resolved) => {
                cache.put(key, resolved.clone());
                Some(resolved)
            }
            None => {
                warn!("no shared value for reference '{}', marker left in place", key);
                None
            }
        }
    }
}
