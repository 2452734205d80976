use crate::app::AppState;
use crate::call::twiml::VoiceResponse;
use crate::call::{
    client_identity, CallDirection, CallRecord, CallRecordPatch, CallType, CallbackOutcome,
    DialOptions, RoutingDecision, RoutingRequest, StatusCallback, CLIENT_PREFIX,
};
use crate::handler::middleware::signature::provider_signature_middleware;
use crate::notify::PushPayload;
use axum::{
    body::to_bytes,
    extract::{FromRequest, Request, State},
    http::{header::CONTENT_TYPE, Method, StatusCode, Uri},
    middleware,
    response::{IntoResponse, Response},
    routing::{any, post},
    Json, Router,
};
use serde_json::json;
use std::collections::HashMap;
use std::convert::Infallible;
use tracing::{debug, info, warn};

const MAX_WEBHOOK_BODY: usize = 1024 * 1024;

pub fn urls(state: AppState) -> Router<AppState> {
    Router::new()
        .route("/twiml", post(twiml))
        .route("/twiml-direct-client", any(twiml_direct_client))
        .route("/twiml-direct-number", any(twiml_direct_number))
        .route("/call/incoming", post(incoming_call))
        .route("/call-status", post(call_status))
        .route("/call-action-result", post(call_action_result))
        .route_layer(middleware::from_fn_with_state(
            state,
            provider_signature_middleware,
        ))
}

/// Provider webhook parameters: query string merged with the urlencoded
/// body, body fields winning. Never rejects, a malformed body yields fewer
/// parameters.
#[derive(Debug, Default, Clone)]
pub struct ProviderParams(pub HashMap<String, String>);

impl ProviderParams {
    pub fn get(&self, name: &str) -> Option<&str> {
        self.0
            .get(name)
            .map(|v| v.trim())
            .filter(|v| !v.is_empty())
    }

    fn call_id(&self) -> &str {
        self.get("CallSid").unwrap_or_default()
    }
}

impl<S> FromRequest<S> for ProviderParams
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request(req: Request, _state: &S) -> Result<Self, Self::Rejection> {
        let mut params: HashMap<String, String> = req
            .uri()
            .query()
            .map(|q| url::form_urlencoded::parse(q.as_bytes()).into_owned().collect())
            .unwrap_or_default();
        let is_form = req
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|ct| ct.starts_with("application/x-www-form-urlencoded"))
            .unwrap_or(false);
        if is_form {
            match to_bytes(req.into_body(), MAX_WEBHOOK_BODY).await {
                Ok(bytes) => params.extend(url::form_urlencoded::parse(&bytes).into_owned()),
                Err(e) => warn!("failed to read webhook body: {}", e),
            }
        }
        Ok(ProviderParams(params))
    }
}

fn xml(response: VoiceResponse) -> Response {
    ([(CONTENT_TYPE, "text/xml")], response.to_xml()).into_response()
}

/// Caller id shown on the dialed leg.
fn dial_caller_id(state: &AppState, decision: &RoutingDecision, from: &str) -> Option<String> {
    let configured = state
        .config
        .provider
        .caller_id
        .clone()
        .filter(|c| !c.is_empty());
    let from = Some(from.to_string()).filter(|f| !f.is_empty());
    if decision.is_client() {
        from.or(configured)
    } else {
        configured.or(from.filter(|f| client_identity(f).is_none()))
    }
}

/// The answered leg of an API-created call is bridged back to the client
/// that requested it.
fn requester_of(record: &CallRecord) -> Option<String> {
    record
        .from_identity
        .clone()
        .or_else(|| client_identity(&record.from).map(str::to_string))
}

/// Resolves and emits the dial document of a call leg. Returns the decision
/// when a dial was emitted.
async fn connect_leg(
    state: &AppState,
    params: &ProviderParams,
    default_direction: CallDirection,
) -> (VoiceResponse, Option<RoutingDecision>) {
    let call_id = params.call_id();
    let from = params.get("From").unwrap_or_default();
    let Some(to) = params.get("To") else {
        warn!(call_id, "instruction request without destination");
        return (
            VoiceResponse::message("Sorry, we couldn't determine who to call. Please try again."),
            None,
        );
    };

    if let Some(parent) = params.get("ParentCallSid") {
        if state.connector.is_dialed(parent) {
            info!(call_id, parent, "parent call already dialed");
            return (VoiceResponse::already_connected(), None);
        }
    }

    let provider_direction = params.get("Direction").unwrap_or_default();
    let is_api_leg = |record: &CallRecord| {
        record.call_type == CallType::Default
            && provider_direction.starts_with("outbound-api")
            && !record.dialed
    };
    // the attempt is still pending when this arrives before the provider
    // answered the create request
    let api_leg = state.store.get_call(call_id).filter(|r| is_api_leg(r)).or_else(|| {
        params
            .get("callUniqueId")
            .and_then(|unique_id| state.store.get_call(unique_id))
            .filter(|r| is_api_leg(r))
    });
    let request = match &api_leg {
        Some(record) => match requester_of(record) {
            Some(identity) => RoutingRequest::new(
                &format!("{}{}", CLIENT_PREFIX, identity),
                CallDirection::Outbound,
            ),
            None => {
                warn!(call_id, "no requester to connect the answered call to");
                return (
                    VoiceResponse::message(
                        "We could not connect your call. Please try again later.",
                    ),
                    None,
                );
            }
        },
        None => {
            let direction = if client_identity(from).is_some() {
                CallDirection::Outbound
            } else {
                CallDirection::from_provider(provider_direction).unwrap_or(default_direction)
            };
            RoutingRequest::new(to, direction)
                .with_hint(params.get("identity"))
                .with_dialed_number(params.get("Called").or(Some(to)))
        }
    };

    let decision = state.resolver.resolve_destination(&request).await;
    let direction = request.direction.unwrap_or(default_direction);
    let seed = CallRecordPatch {
        from: Some(from.to_string()),
        to: Some(to.to_string()),
        from_identity: client_identity(from).map(str::to_string),
        to_identity: decision.is_client().then(|| decision.target.clone()),
        direction: Some(direction),
        call_type: Some(if decision.play_greeting {
            CallType::Greeting
        } else {
            CallType::Default
        }),
        unique_id: params.get("callUniqueId").map(str::to_string),
        parent_call_id: params.get("ParentCallSid").map(str::to_string),
        ..Default::default()
    };
    let response = state.connector.build_connection_instructions(
        call_id,
        &decision,
        DialOptions {
            caller_id: dial_caller_id(state, &decision, from),
            seed,
        },
    );
    let dialed = response.dial_target().is_some();
    (response, dialed.then_some(decision))
}

async fn twiml(State(state): State<AppState>, params: ProviderParams) -> Response {
    debug!(call_id = params.call_id(), params = ?params.0, "instruction request");
    let (response, _) = connect_leg(&state, &params, CallDirection::Outbound).await;
    xml(response)
}

/// Inbound call webhook; also alerts the callee's devices.
async fn incoming_call(State(state): State<AppState>, params: ProviderParams) -> Response {
    let call_id = params.call_id().to_string();
    let from = params.get("From").unwrap_or_default().to_string();
    info!(call_id = %call_id, from = %from, to = params.get("To"), "incoming call");

    let (response, decision) = connect_leg(&state, &params, CallDirection::Inbound).await;
    if let (Some(decision), Some(notifier)) = (decision, state.notifier.clone()) {
        if decision.is_client() {
            let payload = PushPayload::incoming_call(&call_id, &from);
            tokio::spawn(async move {
                let delivered = notifier.notify(&decision.target, &payload).await;
                debug!(call_id = %call_id, callee = %decision.target, delivered, "incoming call notification");
            });
        }
    }
    xml(response)
}

async fn twiml_direct_client(State(state): State<AppState>, params: ProviderParams) -> Response {
    let call_id = params.call_id();
    let Some(client_id) = params.get("clientId") else {
        warn!(call_id, "direct client leg without client id");
        return xml(VoiceResponse::message(
            "Missing client ID parameter. Cannot complete call.",
        ));
    };
    let request = RoutingRequest::new(
        &format!("{}{}", CLIENT_PREFIX, client_id),
        CallDirection::Outbound,
    );
    let decision = state.resolver.resolve_destination(&request).await;
    let from = params.get("From").unwrap_or_default();
    xml(state.connector.build_connection_instructions(
        call_id,
        &decision,
        DialOptions {
            caller_id: dial_caller_id(&state, &decision, from),
            seed: CallRecordPatch {
                from: Some(from.to_string()),
                to: Some(request.destination.clone()),
                to_identity: Some(client_id.to_string()),
                direction: Some(CallDirection::Outbound),
                call_type: Some(CallType::DirectClient),
                unique_id: params.get("callUniqueId").map(str::to_string),
                ..Default::default()
            },
        },
    ))
}

async fn twiml_direct_number(State(state): State<AppState>, params: ProviderParams) -> Response {
    let call_id = params.call_id();
    let Some(to) = params.get("to") else {
        warn!(call_id, "direct number leg without destination");
        return xml(VoiceResponse::message(
            "Missing destination number. Cannot complete call.",
        ));
    };
    let decision = state
        .resolver
        .resolve_destination(&RoutingRequest::new(to, CallDirection::Outbound))
        .await;
    let from = params.get("From").unwrap_or_default();
    xml(state.connector.build_connection_instructions(
        call_id,
        &decision,
        DialOptions {
            caller_id: dial_caller_id(&state, &decision, from),
            seed: CallRecordPatch {
                from: Some(from.to_string()),
                to: Some(to.to_string()),
                direction: Some(CallDirection::Outbound),
                call_type: Some(CallType::DirectNumber),
                unique_id: params.get("callUniqueId").map(str::to_string),
                ..Default::default()
            },
        },
    ))
}

/// Always acknowledged so the provider never retries.
async fn call_status(State(state): State<AppState>, params: ProviderParams) -> Response {
    let callback = StatusCallback::from_params(&params.0);
    match state.connector.handle_status_callback(&callback).await {
        CallbackOutcome::Applied {
            record,
            missed_call,
        } => {
            info!(
                call_id = %record.call_id,
                status = %record.status,
                duration = record.duration,
                missed_call,
                "status callback applied"
            );
        }
        CallbackOutcome::Ignored(record) => {
            debug!(
                call_id = %record.call_id,
                current = %record.status,
                requested = %callback.status,
                "status callback ignored"
            );
        }
        outcome => {
            debug!(
                call_id = %callback.call_id,
                status = %callback.status,
                ?outcome,
                "status callback discarded"
            );
        }
    }
    (StatusCode::OK, "OK").into_response()
}

async fn call_action_result(State(state): State<AppState>, params: ProviderParams) -> Response {
    let call_id = params.call_id();
    let dial_status = params.get("DialCallStatus");
    info!(call_id, dial_status, "dial action result");
    xml(state
        .connector
        .handle_action_result(call_id, dial_status)
        .await)
}

/// Acknowledges provider callbacks sent to paths this service does not
/// handle; anything else is a plain 404.
pub async fn unhandled_callback(method: Method, uri: Uri, params: ProviderParams) -> Response {
    if params.get("CallSid").is_some() || params.get("AccountSid").is_some() {
        info!(%method, path = uri.path(), params = ?params.0, "unhandled provider callback");
        return (StatusCode::OK, "OK").into_response();
    }
    (
        StatusCode::NOT_FOUND,
        Json(json!({ "success": false, "error": "Not found" })),
    )
        .into_response()
}
