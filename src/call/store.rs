use super::{CallRecord, CallRecordPatch, CallStatus};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::debug;

pub type Clock = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

/// Table of in-flight and recently finished calls keyed by provider call id.
///
/// The in-memory implementation is per process; running more than one
/// instance needs an implementation backed by a shared store.
pub trait CallStore: Send + Sync {
    /// Creates the record with defaults merged with `patch`, or merges
    /// `patch` into the existing record.
    fn track_call(&self, call_id: &str, patch: CallRecordPatch) -> CallRecord;
    /// `None` when the call is unknown. Illegal transitions leave the record
    /// unchanged.
    fn update_status(&self, call_id: &str, status: CallStatus) -> Option<CallRecord> {
        self.apply_status(call_id, status).map(|(record, _)| record)
    }
    /// Same as [`CallStore::update_status`], also reporting whether the
    /// transition was applied. Entering a terminal state sets `dialed`.
    fn apply_status(&self, call_id: &str, status: CallStatus) -> Option<(CallRecord, bool)>;
    fn get_call(&self, call_id: &str) -> Option<CallRecord>;
    fn calculate_duration(&self, call_id: &str) -> u64;
    fn remove_call(&self, call_id: &str) -> Option<CallRecord>;
    /// Sets the dialed flag, creating the record from `seed` when missing.
    /// Returns false when the call was already dialed.
    fn try_mark_dialed(&self, call_id: &str, seed: CallRecordPatch) -> bool;
    /// Non-terminal calls involving `identity`, newest first.
    fn active_calls_for(&self, identity: &str) -> Vec<CallRecord>;
    /// Drops terminal records that ended more than `grace` ago, and records
    /// still unfinished `max_active` after they started.
    fn purge_finished(&self, grace: Duration, max_active: Duration) -> usize;
    fn count(&self) -> usize;
}

pub struct MemoryCallStore {
    clock: Clock,
    calls: Mutex<HashMap<String, CallRecord>>,
}

fn elapsed_secs(since: DateTime<Utc>, now: DateTime<Utc>) -> u64 {
    (now - since).num_milliseconds().max(0) as u64 / 1000
}

impl MemoryCallStore {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(Utc::now))
    }

    pub fn with_clock(clock: Clock) -> Self {
        Self {
            clock,
            calls: Mutex::new(HashMap::new()),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, CallRecord>> {
        self.calls.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Default for MemoryCallStore {
    fn default() -> Self {
        Self::new()
    }
}

impl CallStore for MemoryCallStore {
    fn track_call(&self, call_id: &str, patch: CallRecordPatch) -> CallRecord {
        let now = (self.clock)();
        let mut calls = self.lock();
        let record = calls
            .entry(call_id.to_string())
            .or_insert_with(|| CallRecord::new(call_id, now));
        patch.apply(record);
        record.clone()
    }

    fn apply_status(&self, call_id: &str, status: CallStatus) -> Option<(CallRecord, bool)> {
        let now = (self.clock)();
        let mut calls = self.lock();
        let record = calls.get_mut(call_id)?;
        if !record.status.can_transition_to(status) {
            debug!(
                call_id,
                current = %record.status,
                requested = %status,
                "ignoring call status transition"
            );
            return Some((record.clone(), false));
        }
        record.status = status;
        match status {
            CallStatus::InProgress => {
                if record.answered_at.is_none() {
                    record.answered_at = Some(now);
                }
            }
            CallStatus::Completed => {
                record.duration = elapsed_secs(record.start_time, now);
            }
            _ => {}
        }
        if status.is_terminal() {
            record.ended_at = Some(now);
            record.dialed = true;
        }
        Some((record.clone(), true))
    }

    fn get_call(&self, call_id: &str) -> Option<CallRecord> {
        self.lock().get(call_id).cloned()
    }

    fn calculate_duration(&self, call_id: &str) -> u64 {
        let now = (self.clock)();
        let calls = self.lock();
        let Some(record) = calls.get(call_id) else {
            return 0;
        };
        if record.status == CallStatus::Completed {
            return record.duration;
        }
        match record.answered_at {
            Some(answered_at) if !record.status.is_terminal() => elapsed_secs(answered_at, now),
            Some(answered_at) => record
                .ended_at
                .map(|ended_at| elapsed_secs(answered_at, ended_at))
                .unwrap_or_default(),
            None => 0,
        }
    }

    fn remove_call(&self, call_id: &str) -> Option<CallRecord> {
        self.lock().remove(call_id)
    }

    fn try_mark_dialed(&self, call_id: &str, seed: CallRecordPatch) -> bool {
        let now = (self.clock)();
        let mut calls = self.lock();
        match calls.get_mut(call_id) {
            Some(record) if record.dialed => false,
            Some(record) => {
                record.dialed = true;
                true
            }
            None => {
                let mut record = CallRecord::new(call_id, now);
                seed.apply(&mut record);
                record.dialed = true;
                calls.insert(call_id.to_string(), record);
                true
            }
        }
    }

    fn active_calls_for(&self, identity: &str) -> Vec<CallRecord> {
        let mut records: Vec<_> = self
            .lock()
            .values()
            .filter(|r| !r.status.is_terminal() && r.involves(identity))
            .cloned()
            .collect();
        records.sort_by(|a, b| b.start_time.cmp(&a.start_time));
        records
    }

    fn purge_finished(&self, grace: Duration, max_active: Duration) -> usize {
        let now = (self.clock)();
        let grace = chrono::Duration::from_std(grace).unwrap_or(chrono::Duration::MAX);
        let max_active = chrono::Duration::from_std(max_active).unwrap_or(chrono::Duration::MAX);
        let mut calls = self.lock();
        let before = calls.len();
        calls.retain(|call_id, record| match record.ended_at {
            Some(ended_at) if record.status.is_terminal() => now - ended_at < grace,
            _ if now - record.start_time < max_active => true,
            _ => {
                debug!(call_id, status = %record.status, "dropping stale unfinished call");
                false
            }
        });
        before - calls.len()
    }

    fn count(&self) -> usize {
        self.lock().len()
    }
}
