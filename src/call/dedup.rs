use crate::config::DedupConfig;
use std::collections::HashMap;
use std::sync::Mutex;
use tracing::debug;

/// Caller/callee pair, kept structured so no separator can collide with an
/// address.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DedupKey {
    pub from: String,
    pub to: String,
}

impl DedupKey {
    pub fn new(from: &str, to: &str) -> Self {
        Self {
            from: from.to_string(),
            to: to.to_string(),
        }
    }
}

/// Debounce window over call attempts: one accepted attempt per pair within
/// `debounce_ms`.
pub struct DedupWindow {
    debounce_ms: u64,
    retention_ms: u64,
    entries: Mutex<HashMap<DedupKey, u64>>,
}

impl DedupWindow {
    pub fn new(debounce_ms: u64, retention_ms: u64) -> Self {
        Self {
            debounce_ms,
            retention_ms: retention_ms.max(debounce_ms),
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub fn from_config(config: &DedupConfig) -> Self {
        Self::new(config.debounce_ms, config.retention_ms)
    }

    /// Accepts the attempt and records `now_ms`, or rejects it without
    /// touching state when the pair was accepted less than `debounce_ms` ago.
    pub fn try_accept_call(&self, from: &str, to: &str, now_ms: u64) -> bool {
        let key = DedupKey::new(from, to);
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(last) = entries.get(&key) {
            if now_ms.saturating_sub(*last) < self.debounce_ms {
                debug!(from, to, last, now_ms, "call attempt inside debounce window");
                return false;
            }
        }
        entries.insert(key, now_ms);
        true
    }

    /// Drops entries older than the retention window, returns how many.
    pub fn sweep(&self, now_ms: u64) -> usize {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        let before = entries.len();
        let retention_ms = self.retention_ms;
        entries.retain(|_, last| now_ms.saturating_sub(*last) < retention_ms);
        before - entries.len()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for DedupWindow {
    fn default() -> Self {
        Self::from_config(&DedupConfig::default())
    }
}
