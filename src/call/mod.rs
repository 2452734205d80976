use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

pub mod connect;
pub mod dedup;
pub mod routing;
pub mod store;
pub mod twiml;

pub use connect::{CallConnector, CallbackOutcome, DialOptions, StatusCallback};
pub use dedup::{DedupKey, DedupWindow};
pub use routing::{
    IdentityScheme, ResolutionSource, RoutingDecision, RoutingRequest, RoutingResolver, TargetKind,
};
pub use store::{CallStore, MemoryCallStore};

/// Address prefix the provider uses for application clients.
pub const CLIENT_PREFIX: &str = "client:";

/// Returns the identity of a `client:` address, `None` for phone numbers.
pub fn client_identity(address: &str) -> Option<&str> {
    address
        .strip_prefix(CLIENT_PREFIX)
        .map(str::trim)
        .filter(|identity| !identity.is_empty())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CallStatus {
    Initiated,
    Ringing,
    InProgress,
    Completed,
    Failed,
    Busy,
    NoAnswer,
    Canceled,
    Rejected,
}

impl CallStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CallStatus::Initiated => "initiated",
            CallStatus::Ringing => "ringing",
            CallStatus::InProgress => "in-progress",
            CallStatus::Completed => "completed",
            CallStatus::Failed => "failed",
            CallStatus::Busy => "busy",
            CallStatus::NoAnswer => "no-answer",
            CallStatus::Canceled => "canceled",
            CallStatus::Rejected => "rejected",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(
            self,
            CallStatus::Initiated | CallStatus::Ringing | CallStatus::InProgress
        )
    }

    /// Transition table. Terminal states are absorbing; an answered call can
    /// only finish as completed or failed.
    pub fn can_transition_to(&self, next: CallStatus) -> bool {
        use CallStatus::*;
        match (self, next) {
            (current, next) if *current == next => false,
            (Initiated, _) => true,
            (Ringing, Initiated) => false,
            (Ringing, _) => true,
            (InProgress, Completed | Failed) => true,
            _ => false,
        }
    }
}

impl fmt::Display for CallStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CallStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "initiated" | "queued" => Ok(CallStatus::Initiated),
            "ringing" => Ok(CallStatus::Ringing),
            "in-progress" | "answered" => Ok(CallStatus::InProgress),
            "completed" => Ok(CallStatus::Completed),
            "failed" => Ok(CallStatus::Failed),
            "busy" => Ok(CallStatus::Busy),
            "no-answer" => Ok(CallStatus::NoAnswer),
            "canceled" | "cancelled" => Ok(CallStatus::Canceled),
            "rejected" => Ok(CallStatus::Rejected),
            other => Err(anyhow::anyhow!("unknown call status: {}", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CallDirection {
    Inbound,
    Outbound,
}

impl CallDirection {
    /// Provider directions are `inbound`, `outbound-api` or `outbound-dial`.
    pub fn from_provider(direction: &str) -> Option<Self> {
        let direction = direction.trim().to_ascii_lowercase();
        if direction.starts_with("outbound") {
            Some(CallDirection::Outbound)
        } else if direction.starts_with("inbound") {
            Some(CallDirection::Inbound)
        } else {
            None
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CallType {
    DirectClient,
    DirectNumber,
    Greeting,
    Default,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallRecord {
    pub call_id: String,
    pub from: String,
    pub to: String,
    pub from_identity: Option<String>,
    pub to_identity: Option<String>,
    pub direction: CallDirection,
    pub status: CallStatus,
    pub start_time: DateTime<Utc>,
    pub answered_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    pub duration: u64,
    pub call_type: CallType,
    pub dialed: bool,
    pub unique_id: Option<String>,
    pub parent_call_id: Option<String>,
}

impl CallRecord {
    pub fn new(call_id: &str, now: DateTime<Utc>) -> Self {
        Self {
            call_id: call_id.to_string(),
            from: String::new(),
            to: String::new(),
            from_identity: None,
            to_identity: None,
            direction: CallDirection::Outbound,
            status: CallStatus::Initiated,
            start_time: now,
            answered_at: None,
            ended_at: None,
            duration: 0,
            call_type: CallType::Default,
            dialed: false,
            unique_id: None,
            parent_call_id: None,
        }
    }

    /// True when `identity` is either party of this call.
    pub fn involves(&self, identity: &str) -> bool {
        self.from_identity.as_deref() == Some(identity)
            || self.to_identity.as_deref() == Some(identity)
            || client_identity(&self.from) == Some(identity)
            || client_identity(&self.to) == Some(identity)
    }
}

/// Partial update for a [`CallRecord`]; `None` leaves the field untouched.
#[derive(Debug, Clone, Default)]
pub struct CallRecordPatch {
    pub from: Option<String>,
    pub to: Option<String>,
    pub from_identity: Option<String>,
    pub to_identity: Option<String>,
    pub direction: Option<CallDirection>,
    pub call_type: Option<CallType>,
    pub dialed: Option<bool>,
    pub unique_id: Option<String>,
    pub parent_call_id: Option<String>,
}

impl CallRecordPatch {
    pub fn apply(self, record: &mut CallRecord) {
        if let Some(from) = self.from {
            record.from = from;
        }
        if let Some(to) = self.to {
            record.to = to;
        }
        if let Some(identity) = self.from_identity {
            record.from_identity = Some(identity);
        }
        if let Some(identity) = self.to_identity {
            record.to_identity = Some(identity);
        }
        if let Some(direction) = self.direction {
            record.direction = direction;
        }
        if let Some(call_type) = self.call_type {
            record.call_type = call_type;
        }
        if let Some(dialed) = self.dialed {
            record.dialed = dialed;
        }
        if let Some(unique_id) = self.unique_id {
            record.unique_id = Some(unique_id);
        }
        if let Some(parent) = self.parent_call_id {
            record.parent_call_id = Some(parent);
        }
    }
}
