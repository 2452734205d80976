use super::{non_empty, ApiBody, ApiError};
use crate::app::AppState;
use crate::call::{
    client_identity, CallDirection, CallRecord, CallRecordPatch, CallStatus, CallType,
    CallbackOutcome, StatusCallback, CLIENT_PREFIX,
};
use crate::provider::OutboundCallRequest;
use axum::{
    extract::{Path, State},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{info, warn};

const DUPLICATE_CALL: &str =
    "A call to this number was just initiated. Please wait a moment before trying again.";

pub fn urls() -> Router<AppState> {
    Router::new()
        .route("/call/make", post(make_call))
        .route("/call/make-direct", post(make_direct_call))
        .route("/call/end", post(end_call))
        .route("/call/info/{call_id}", get(call_info))
        .route("/call/active/{identity}", get(active_calls))
        .route("/call/event", post(call_event))
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MakeCallRequest {
    pub to: Option<String>,
    pub from: Option<String>,
    pub from_identity: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EndCallRequest {
    pub call_sid: Option<String>,
    pub call_id: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallEventRequest {
    pub identity: Option<String>,
    pub event: Option<String>,
    pub call_id: Option<String>,
}

/// Call record as returned to the app, with the duration evaluated now.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CallView {
    #[serde(flatten)]
    pub record: CallRecord,
    pub current_duration: u64,
}

impl CallView {
    fn new(state: &AppState, record: CallRecord) -> Self {
        let current_duration = state.store.calculate_duration(&record.call_id);
        Self {
            record,
            current_duration,
        }
    }
}

fn required<'a>(value: &'a Option<String>, message: &str) -> Result<&'a str, ApiError> {
    non_empty(value).ok_or_else(|| ApiError::Validation(message.to_string()))
}

/// Claims the dedup slot for the pair and returns the attempt id.
fn accept_attempt(state: &AppState, from: &str, to: &str) -> Result<String, ApiError> {
    let now = crate::get_timestamp();
    if !state.dedup.try_accept_call(from, to, now) {
        info!(from, to, "rejecting duplicate call attempt");
        return Err(ApiError::Duplicate(DUPLICATE_CALL.to_string()));
    }
    Ok(format!("{}-{}-{}", from, to, now))
}

/// The answered leg is bridged back to the requesting client, so a client
/// identity is required. A pending record keyed by the attempt id exists
/// while the provider request is in flight; the instruction request of the
/// answered leg may arrive before the provider returns the call id.
async fn make_call(
    State(state): State<AppState>,
    ApiBody(req): ApiBody<MakeCallRequest>,
) -> Result<Response, ApiError> {
    let to = required(&req.to, "Missing 'to' parameter.")?;
    let from_identity = non_empty(&req.from_identity);
    let caller = non_empty(&req.from)
        .map(str::to_string)
        .or_else(|| from_identity.map(|id| format!("{}{}", CLIENT_PREFIX, id)))
        .ok_or_else(|| ApiError::Validation("Missing 'from' parameter.".to_string()))?;
    let requester = from_identity
        .or_else(|| client_identity(&caller))
        .ok_or_else(|| ApiError::Validation("Missing 'fromIdentity' parameter.".to_string()))?
        .to_string();
    let provider_from = non_empty(&state.config.provider.caller_id)
        .unwrap_or(caller.as_str())
        .to_string();

    let unique_id = accept_attempt(&state, &caller, to)?;
    let patch = CallRecordPatch {
        from: Some(caller.clone()),
        to: Some(to.to_string()),
        from_identity: Some(requester),
        to_identity: client_identity(to).map(str::to_string),
        direction: Some(CallDirection::Outbound),
        call_type: Some(CallType::Default),
        unique_id: Some(unique_id.clone()),
        ..Default::default()
    };
    state.store.track_call(&unique_id, patch.clone());

    let result = state
        .provider
        .create_call(&OutboundCallRequest {
            to: to.to_string(),
            from: provider_from,
            url: state.callback_url(&format!(
                "/twiml?callUniqueId={}",
                urlencoding::encode(&unique_id)
            )),
            status_callback: state.callback_url("/call-status"),
        })
        .await;
    let call = match result {
        Ok(call) => call,
        Err(e) => {
            state.store.remove_call(&unique_id);
            warn!(to, caller = %caller, "failed to create call: {}", e);
            return Err(ApiError::Provider(e.user_message()));
        }
    };

    state.store.track_call(&call.sid, patch);
    state.store.remove_call(&unique_id);
    info!(call_id = %call.sid, from = %caller, to, "call initiated");
    Ok(Json(json!({
        "success": true,
        "sid": call.sid,
        "callId": call.sid,
        "message": "Call initiated successfully",
    }))
    .into_response())
}

/// Client destinations are dialed straight away; for numbers the caller's
/// phone rings first and the number is dialed once it answers.
async fn make_direct_call(
    State(state): State<AppState>,
    ApiBody(req): ApiBody<MakeCallRequest>,
) -> Result<Response, ApiError> {
    let to = required(&req.to, "Missing 'to' parameter.")?;
    let caller_id = non_empty(&state.config.provider.caller_id);
    let from = non_empty(&req.from)
        .or(caller_id)
        .ok_or_else(|| ApiError::Validation("Missing 'from' parameter.".to_string()))?
        .to_string();
    let from_identity = non_empty(&req.from_identity)
        .or_else(|| client_identity(&from))
        .map(str::to_string);

    let unique_id = accept_attempt(&state, &from, to)?;
    let encoded_id = urlencoding::encode(&unique_id).into_owned();
    let (request, patch, message) = match client_identity(to) {
        Some(client_id) => (
            OutboundCallRequest {
                to: to.to_string(),
                from: from.clone(),
                url: state.callback_url(&format!(
                    "/twiml-direct-client?callUniqueId={}&clientId={}",
                    encoded_id,
                    urlencoding::encode(client_id)
                )),
                status_callback: state.callback_url("/call-status"),
            },
            CallRecordPatch {
                to_identity: Some(client_id.to_string()),
                call_type: Some(CallType::DirectClient),
                ..Default::default()
            },
            "Direct client call initiated successfully",
        ),
        None => (
            OutboundCallRequest {
                to: from.clone(),
                from: caller_id.unwrap_or(from.as_str()).to_string(),
                url: state.callback_url(&format!(
                    "/twiml-direct-number?callUniqueId={}&to={}",
                    encoded_id,
                    urlencoding::encode(to)
                )),
                status_callback: state.callback_url("/call-status"),
            },
            CallRecordPatch {
                call_type: Some(CallType::DirectNumber),
                ..Default::default()
            },
            "Direct number call initiated successfully",
        ),
    };

    let call = state.provider.create_call(&request).await.map_err(|e| {
        warn!(to, from = %from, "failed to create direct call: {}", e);
        ApiError::Provider(e.user_message())
    })?;
    state.store.track_call(
        &call.sid,
        CallRecordPatch {
            from: Some(from.clone()),
            to: Some(to.to_string()),
            from_identity,
            direction: Some(CallDirection::Outbound),
            unique_id: Some(unique_id),
            ..patch
        },
    );
    info!(call_id = %call.sid, from = %from, to, "direct call initiated");
    Ok(Json(json!({
        "success": true,
        "sid": call.sid,
        "callId": call.sid,
        "message": message,
    }))
    .into_response())
}

async fn end_call(
    State(state): State<AppState>,
    ApiBody(req): ApiBody<EndCallRequest>,
) -> Result<Response, ApiError> {
    let call_id = non_empty(&req.call_sid)
        .or(non_empty(&req.call_id))
        .ok_or_else(|| ApiError::Validation("Missing callSid parameter".to_string()))?;

    match state.provider.end_call(call_id).await {
        Ok(_) => {}
        Err(e) if e.is_not_found() => {
            info!(call_id, "provider no longer knows the call, treating as ended");
        }
        Err(e) => {
            warn!(call_id, "failed to end call: {}", e);
            return Err(ApiError::Provider(format!(
                "Failed to end call: {}",
                e.user_message()
            )));
        }
    }
    state.store.remove_call(call_id);
    info!(call_id, "call ended");
    Ok(Json(json!({
        "success": true,
        "message": "Call ended successfully",
    }))
    .into_response())
}

async fn call_info(
    State(state): State<AppState>,
    Path(call_id): Path<String>,
) -> Result<Response, ApiError> {
    let local = state.store.get_call(&call_id);
    let remote = match state.provider.fetch_call(&call_id).await {
        Ok(call) => Some(call),
        Err(e) if local.is_some() => {
            warn!(call_id, "provider lookup failed, serving local record: {}", e);
            None
        }
        Err(e) if e.is_not_found() => {
            return Err(ApiError::NotFound("Call not found".to_string()));
        }
        Err(e) => return Err(ApiError::Provider(e.user_message())),
    };
    let local = local.map(|record| CallView::new(&state, record));
    Ok(Json(json!({
        "success": true,
        "callId": call_id,
        "local": local,
        "provider": remote,
    }))
    .into_response())
}

async fn active_calls(
    State(state): State<AppState>,
    Path(identity): Path<String>,
) -> Result<Response, ApiError> {
    let calls: Vec<CallView> = state
        .store
        .active_calls_for(&identity)
        .into_iter()
        .map(|record| CallView::new(&state, record))
        .collect();
    Ok(Json(json!({
        "success": true,
        "identity": identity,
        "calls": calls,
    }))
    .into_response())
}

fn event_status(event: &str, record: &CallRecord) -> Option<CallStatus> {
    match event.trim().to_ascii_lowercase().as_str() {
        "ringing" => Some(CallStatus::Ringing),
        "answered" | "accepted" => Some(CallStatus::InProgress),
        "rejected" | "declined" => Some(CallStatus::Rejected),
        "ended" | "hangup" if record.answered_at.is_some() => Some(CallStatus::Completed),
        "ended" | "hangup" => Some(CallStatus::Canceled),
        _ => None,
    }
}

fn is_callee(record: &CallRecord, identity: &str) -> bool {
    record.to_identity.as_deref() == Some(identity) || client_identity(&record.to) == Some(identity)
}

/// Client-side call events. Without an explicit call id the newest active
/// call ringing at `identity` is used.
async fn call_event(
    State(state): State<AppState>,
    ApiBody(req): ApiBody<CallEventRequest>,
) -> Result<Response, ApiError> {
    let identity = required(&req.identity, "Missing 'identity' parameter.")?;
    let event = required(&req.event, "Missing 'event' parameter.")?;

    let record = match non_empty(&req.call_id) {
        Some(call_id) => state
            .store
            .get_call(call_id)
            .filter(|record| record.involves(identity)),
        None => {
            let calls = state.store.active_calls_for(identity);
            calls
                .iter()
                .find(|r| is_callee(r, identity))
                .or(calls.first())
                .cloned()
        }
    }
    .ok_or_else(|| ApiError::NotFound(format!("No active call for {}", identity)))?;

    let status = event_status(event, &record)
        .ok_or_else(|| ApiError::Validation(format!("Unknown event '{}'.", event)))?;
    let outcome = state
        .connector
        .handle_status_callback(&StatusCallback {
            call_id: record.call_id.clone(),
            status: status.as_str().to_string(),
            ..Default::default()
        })
        .await;
    let (record, applied) = match outcome {
        CallbackOutcome::Applied { record, .. } => (record, true),
        CallbackOutcome::Ignored(record) => (record, false),
        CallbackOutcome::UnknownCall | CallbackOutcome::UnknownStatus => {
            return Err(ApiError::NotFound("Call not found".to_string()));
        }
    };
    info!(call_id = %record.call_id, identity, event, applied, "client call event");
    Ok(Json(json!({
        "success": true,
        "callId": record.call_id,
        "status": record.status,
        "applied": applied,
    }))
    .into_response())
}
