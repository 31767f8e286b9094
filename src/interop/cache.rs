//! Call-site cache
//!
//! Memoises expensive-to-build values per key. Concurrent first use of a key
//! converges on a single published value: one caller runs the builder while
//! the others wait for its result. A failed build publishes nothing.

use super::interface::CallInterface;
use crate::error::Result;
use dashmap::DashMap;
use once_cell::sync::{Lazy, OnceCell};
use std::hash::Hash;
use std::sync::Arc;

/// Identity of a call site
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CallSiteKey {
    /// A native entry point address
    Entry(usize),
    /// A runtime method record address
    Method(usize),
}

pub struct CallSiteCache<K, V> {
    entries: DashMap<K, Arc<OnceCell<V>>>,
}

impl<K, V> CallSiteCache<K, V>
where
    K: Eq + Hash,
    V: Clone,
{
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
        }
    }

    /// Return the value published for `key`, building it on first use
    pub fn lookup_or_build<F>(&self, key: K, build: F) -> Result<V>
    where
        F: FnOnce() -> Result<V>,
    {
        if let Some(cell) = self.entries.get(&key) {
            if let Some(value) = cell.get() {
                return Ok(value.clone());
            }
        }

        // Release the shard lock before building; builders may re-enter the cache
        let cell = self
            .entries
            .entry(key)
            .or_insert_with(|| Arc::new(OnceCell::new()))
            .clone();

        cell.get_or_try_init(build).map(V::clone)
    }

    pub fn get(&self, key: &K) -> Option<V> {
        self.entries.get(key).and_then(|cell| cell.get().cloned())
    }

    /// Number of published values
    pub fn len(&self) -> usize {
        self.entries.iter().filter(|e| e.value().get().is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<K, V> Default for CallSiteCache<K, V>
where
    K: Eq + Hash,
    V: Clone,
{
    fn default() -> Self {
        Self::new()
    }
}

/// Interfaces by signature encoding, shared process-wide
static INTERFACES: Lazy<CallSiteCache<String, Arc<CallInterface>>> = Lazy::new(CallSiteCache::new);

/// The shared call interface for a signature encoding
pub fn interface_for(encoding: &str) -> Result<Arc<CallInterface>> {
    INTERFACES.lookup_or_build(encoding.to_string(), || {
        CallInterface::parse(encoding).map(Arc::new)
    })
}

pub(crate) fn init() {
    Lazy::force(&INTERFACES);
}
