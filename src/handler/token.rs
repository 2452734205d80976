use super::{non_empty, ApiBody, ApiError};
use crate::app::AppState;
use crate::directory::DeviceToken;
use crate::handler::middleware::clientaddr::ClientAddr;
use axum::{
    extract::{Query, State},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::json;
use tracing::{info, warn};

pub fn urls() -> Router<AppState> {
    Router::new()
        .route("/", get(index))
        .route("/token", get(issue_token))
        .route("/register-push-notification", post(register_push))
}

#[derive(Debug, Default, Deserialize)]
pub struct TokenQuery {
    pub identity: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterPushRequest {
    pub identity: Option<String>,
    pub platform: Option<String>,
    pub device_token: Option<String>,
}

async fn index(State(state): State<AppState>) -> Response {
    Json(json!({
        "success": true,
        "service": crate::version::get_useragent(),
        "activeCalls": state.store.count(),
    }))
    .into_response()
}

async fn issue_token(
    State(state): State<AppState>,
    Query(query): Query<TokenQuery>,
) -> Result<Response, ApiError> {
    let identity = non_empty(&query.identity)
        .ok_or_else(|| ApiError::Validation("Identity is required".to_string()))?;
    let issuer = state.tokens.as_ref().ok_or_else(|| {
        ApiError::Internal("Access tokens are not configured on this server".to_string())
    })?;
    let now = crate::get_timestamp() / 1000;
    let token = issuer.issue(identity, now).map_err(|e| {
        warn!(identity, "failed to issue access token: {}", e);
        ApiError::Internal(e.to_string())
    })?;
    info!(identity, "issued access token");
    Ok(Json(json!({
        "success": true,
        "identity": identity,
        "token": token,
    }))
    .into_response())
}

async fn register_push(
    State(state): State<AppState>,
    client_ip: ClientAddr,
    ApiBody(req): ApiBody<RegisterPushRequest>,
) -> Result<Response, ApiError> {
    let (Some(identity), Some(platform), Some(token)) = (
        non_empty(&req.identity),
        non_empty(&req.platform),
        non_empty(&req.device_token),
    ) else {
        return Err(ApiError::Validation(
            "Missing required parameters: identity, platform, deviceToken".to_string(),
        ));
    };

    state
        .directory
        .register_device_token(DeviceToken {
            identity: identity.to_string(),
            platform: platform.to_ascii_lowercase(),
            token: token.to_string(),
        })
        .await
        .map_err(|e| {
            warn!(identity, platform, "failed to register device token: {}", e);
            ApiError::Internal(e.to_string())
        })?;
    info!(
        %client_ip,
        identity,
        platform,
        token_prefix = %token.chars().take(10).collect::<String>(),
        "registered push device"
    );
    Ok(Json(json!({
        "success": true,
        "message": format!("Push notification registered for {}", platform),
    }))
    .into_response())
}
