//! Process-wide call accounting
//!
//! Two monotonically increasing counters record every crossing of the
//! boundary in each direction. They are never reset. When method call tracking
//! is enabled, outbound method calls are additionally tallied by selector and
//! signature.

use dashmap::DashMap;
use once_cell::sync::Lazy;
use std::sync::atomic::{AtomicU64, Ordering};

static SCRIPT_TO_NATIVE: AtomicU64 = AtomicU64::new(0);
static NATIVE_TO_SCRIPT: AtomicU64 = AtomicU64::new(0);
static MARSHALING_ERRORS: AtomicU64 = AtomicU64::new(0);
static CALLBACK_FAILURES: AtomicU64 = AtomicU64::new(0);

/// (selector, signature) → calls
static METHOD_CALLS: Lazy<DashMap<(String, String), u64>> = Lazy::new(DashMap::new);

/// Snapshot of the process-wide counters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct InteropStats {
    pub script_to_native: u64,
    pub native_to_script: u64,
    pub marshaling_errors: u64,
    pub callback_failures: u64,
}

pub fn snapshot() -> InteropStats {
    InteropStats {
        script_to_native: SCRIPT_TO_NATIVE.load(Ordering::Relaxed),
        native_to_script: NATIVE_TO_SCRIPT.load(Ordering::Relaxed),
        marshaling_errors: MARSHALING_ERRORS.load(Ordering::Relaxed),
        callback_failures: CALLBACK_FAILURES.load(Ordering::Relaxed),
    }
}

#[inline]
pub fn script_to_native_calls() -> u64 {
    SCRIPT_TO_NATIVE.load(Ordering::Relaxed)
}

#[inline]
pub fn native_to_script_calls() -> u64 {
    NATIVE_TO_SCRIPT.load(Ordering::Relaxed)
}

#[inline]
pub(crate) fn record_outbound() {
    SCRIPT_TO_NATIVE.fetch_add(1, Ordering::Relaxed);
}

#[inline]
pub(crate) fn record_inbound() {
    NATIVE_TO_SCRIPT.fetch_add(1, Ordering::Relaxed);
}

#[inline]
pub(crate) fn record_marshaling_error() {
    MARSHALING_ERRORS.fetch_add(1, Ordering::Relaxed);
}

#[inline]
pub(crate) fn record_callback_failure() {
    CALLBACK_FAILURES.fetch_add(1, Ordering::Relaxed);
}

pub(crate) fn record_method_call(selector: &str, signature: &str) {
    *METHOD_CALLS
        .entry((selector.to_string(), signature.to_string()))
        .or_insert(0) += 1;
}

/// Most frequently called methods as (calls, selector, signature)
pub fn top_methods(limit: usize) -> Vec<(u64, String, String)> {
    let mut rows: Vec<_> = METHOD_CALLS
        .iter()
        .map(|entry| {
            let (selector, signature) = entry.key();
            (*entry.value(), selector.clone(), signature.clone())
        })
        .collect();
    rows.sort_by(|a, b| b.0.cmp(&a.0).then_with(|| a.1.cmp(&b.1)));
    rows.truncate(limit);
    rows
}

/// Most frequently called signatures as (calls, signature)
pub fn top_signatures(limit: usize) -> Vec<(u64, String)> {
    let mut totals: std::collections::HashMap<String, u64> = std::collections::HashMap::new();
    for entry in METHOD_CALLS.iter() {
        *totals.entry(entry.key().1.clone()).or_insert(0) += *entry.value();
    }
    let mut rows: Vec<_> = totals.into_iter().map(|(sig, n)| (n, sig)).collect();
    rows.sort_by(|a, b| b.0.cmp(&a.0).then_with(|| a.1.cmp(&b.1)));
    rows.truncate(limit);
    rows
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_monotonic() {
        let before = snapshot();
        record_outbound();
        record_inbound();
        record_inbound();
        let after = snapshot();
        assert!(after.script_to_native >= before.script_to_native + 1);
        assert!(after.native_to_script >= before.native_to_script + 2);
    }

    #[test]
    fn test_top_methods_ordering() {
        // Unique selectors so concurrent tests do not interfere
        for _ in 0..3 {
            record_method_call("statsTestBusy:", "v@:@");
        }
        record_method_call("statsTestIdle", "@@:");

        let top = top_methods(usize::MAX);
        let busy = top.iter().position(|r| r.1 == "statsTestBusy:").unwrap();
        let idle = top.iter().position(|r| r.1 == "statsTestIdle").unwrap();
        assert!(busy < idle);
        assert!(top[busy].0 >= 3);

        let sigs = top_signatures(usize::MAX);
        assert!(sigs.iter().any(|(n, s)| s == "v@:@" && *n >= 3));
    }
}
