use super::routing::RoutingDecision;
use super::twiml::{Dial, VoiceResponse};
use super::{CallDirection, CallRecord, CallRecordPatch, CallStatus, CallStore};
use crate::config::CallsConfig;
use crate::notify::{NotificationDispatcher, PushPayload};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Options of one dial document.
#[derive(Debug, Clone, Default)]
pub struct DialOptions {
    pub caller_id: Option<String>,
    /// Merged into the record when this request is the first sight of the
    /// call id.
    pub seed: CallRecordPatch,
}

/// Provider status callback, as posted to `/call-status`.
#[derive(Debug, Clone, Default)]
pub struct StatusCallback {
    pub call_id: String,
    pub status: String,
    pub parent_call_id: Option<String>,
    pub direction: Option<String>,
    pub from: Option<String>,
    pub to: Option<String>,
}

impl StatusCallback {
    /// Builds the callback from provider form fields; missing fields stay empty.
    pub fn from_params(params: &HashMap<String, String>) -> Self {
        let field = |name: &str| params.get(name).filter(|v| !v.is_empty()).cloned();
        Self {
            call_id: field("CallSid").unwrap_or_default(),
            status: field("CallStatus").unwrap_or_default(),
            parent_call_id: field("ParentCallSid"),
            direction: field("Direction"),
            from: field("From"),
            to: field("To"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum CallbackOutcome {
    Applied {
        record: CallRecord,
        missed_call: bool,
    },
    /// Known call, transition not allowed from the current state.
    Ignored(CallRecord),
    UnknownCall,
    UnknownStatus,
}

pub struct CallConnector {
    store: Arc<dyn CallStore>,
    notifier: Option<Arc<NotificationDispatcher>>,
    action_url: String,
    ring_timeout_secs: u32,
    greeting: String,
}

impl CallConnector {
    pub fn new(
        store: Arc<dyn CallStore>,
        notifier: Option<Arc<NotificationDispatcher>>,
        public_url: &str,
        calls: &CallsConfig,
    ) -> Self {
        Self {
            store,
            notifier,
            action_url: format!("{}/call-action-result", public_url.trim_end_matches('/')),
            ring_timeout_secs: calls.ring_timeout_secs,
            greeting: calls.greeting.clone(),
        }
    }

    /// True when `call_id` already received its dial document. Child legs of
    /// a dialed parent must not dial again.
    pub fn is_dialed(&self, call_id: &str) -> bool {
        self.store
            .get_call(call_id)
            .map(|record| record.dialed)
            .unwrap_or(false)
    }

    /// Emits the dial document for `call_id` at most once. Every later
    /// request for the same call id gets the neutral document.
    pub fn build_connection_instructions(
        &self,
        call_id: &str,
        decision: &RoutingDecision,
        options: DialOptions,
    ) -> VoiceResponse {
        if call_id.is_empty() {
            warn!(destination = %decision.target, "dial requested without call id, not guarded");
        } else if !self.store.try_mark_dialed(call_id, options.seed) {
            info!(call_id, "call already dialed, returning neutral instructions");
            return VoiceResponse::already_connected();
        }

        let dial = if decision.is_client() {
            Dial::client(&decision.target)
        } else {
            Dial::number(&decision.target)
        }
        .caller_id(options.caller_id.as_deref())
        .timeout(self.ring_timeout_secs)
        .action(&self.action_url)
        .do_not_record();

        let mut response = VoiceResponse::new();
        if decision.play_greeting {
            response = response.say(&self.greeting);
        }
        info!(
            call_id,
            destination = %decision.address(),
            source = ?decision.source,
            "emitting dial instructions"
        );
        response.dial(dial)
    }

    /// Applies a provider status callback. Never fails; unknown calls and
    /// statuses are reported back so the caller can log and acknowledge.
    pub async fn handle_status_callback(&self, callback: &StatusCallback) -> CallbackOutcome {
        if callback.call_id.is_empty() {
            return CallbackOutcome::UnknownCall;
        }
        let status = match callback.status.parse::<CallStatus>() {
            Ok(status) => status,
            Err(_) => {
                debug!(
                    call_id = %callback.call_id,
                    status = %callback.status,
                    "discarding callback with unknown status"
                );
                return CallbackOutcome::UnknownStatus;
            }
        };
        self.apply_status(&callback.call_id, status)
    }

    /// Records the `<Dial>` outcome and returns the closing document. The
    /// action fires once the dialed leg is over, so an answered dial
    /// finishes the call.
    pub async fn handle_action_result(
        &self,
        call_id: &str,
        dial_status: Option<&str>,
    ) -> VoiceResponse {
        let status = dial_status
            .and_then(|s| s.parse::<CallStatus>().ok())
            .map(|status| match status {
                CallStatus::InProgress => CallStatus::Completed,
                other => other,
            });
        if let Some(status) = status.filter(|s| s.is_terminal()) {
            if !call_id.is_empty() {
                if status == CallStatus::Completed {
                    // answered_at is set on the way through in-progress
                    self.store.apply_status(call_id, CallStatus::InProgress);
                }
                let outcome = self.apply_status(call_id, status);
                debug!(call_id, %status, ?outcome, "dial action result");
            }
        }

        let message = match status {
            Some(CallStatus::NoAnswer) => {
                Some("The person you are calling is not available. Please try again later.")
            }
            Some(CallStatus::Failed) => {
                Some("We could not connect your call. Please try again later.")
            }
            Some(CallStatus::Busy) => {
                Some("The person you are calling is busy. Please try again later.")
            }
            Some(CallStatus::Canceled) => Some("The call was canceled."),
            _ => None,
        };
        match message {
            Some(message) => VoiceResponse::message(message),
            None => VoiceResponse::new().hangup(),
        }
    }

    fn apply_status(&self, call_id: &str, status: CallStatus) -> CallbackOutcome {
        match self.store.apply_status(call_id, status) {
            None => {
                debug!(call_id, %status, "discarding callback for unknown call");
                CallbackOutcome::UnknownCall
            }
            Some((record, false)) => CallbackOutcome::Ignored(record),
            Some((record, true)) => {
                info!(call_id, %status, duration = record.duration, "call status updated");
                let missed_call = self.notify_missed_call(&record);
                CallbackOutcome::Applied {
                    record,
                    missed_call,
                }
            }
        }
    }

    /// Spawns the missed-call push for inbound calls that were never picked up.
    fn notify_missed_call(&self, record: &CallRecord) -> bool {
        let missed = matches!(
            record.status,
            CallStatus::NoAnswer | CallStatus::Canceled | CallStatus::Busy
        );
        if !missed || record.direction != CallDirection::Inbound {
            return false;
        }
        let (Some(notifier), Some(callee)) = (self.notifier.clone(), record.to_identity.clone())
        else {
            return false;
        };
        let payload = PushPayload::missed_call(&record.call_id, &record.from);
        let call_id = record.call_id.clone();
        tokio::spawn(async move {
            let delivered = notifier.notify(&callee, &payload).await;
            debug!(call_id, callee, delivered, "missed call notification");
        });
        true
    }
}
