use crate::{
    app::AppState,
    handler::middleware::clientaddr::ClientAddr,
    provider::signature::{validate_signature, SIGNATURE_HEADER},
};
use axum::{
    body::{to_bytes, Body},
    extract::{Request, State},
    http::{header::CONTENT_TYPE, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use tracing::warn;

const MAX_WEBHOOK_BODY: usize = 1024 * 1024;

/// Rejects provider webhooks whose signature does not match. Disabled unless
/// `provider.validate_signatures` is set.
pub async fn provider_signature_middleware(
    State(state): State<AppState>,
    client_ip: ClientAddr,
    request: Request,
    next: Next,
) -> Response {
    if !state.config.provider.validate_signatures {
        return next.run(request).await;
    }
    let auth_token = state.config.provider.auth_token.clone().unwrap_or_default();

    let (parts, body) = request.into_parts();
    let bytes = match to_bytes(body, MAX_WEBHOOK_BODY).await {
        Ok(bytes) => bytes,
        Err(e) => {
            warn!(%client_ip, "failed to read webhook body: {}", e);
            return StatusCode::BAD_REQUEST.into_response();
        }
    };

    let is_form = parts
        .headers
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|ct| ct.starts_with("application/x-www-form-urlencoded"))
        .unwrap_or(false);
    let params: Vec<(String, String)> = if is_form {
        url::form_urlencoded::parse(&bytes).into_owned().collect()
    } else {
        vec![]
    };
    let url = state.callback_url(
        parts
            .uri
            .path_and_query()
            .map(|pq| pq.as_str())
            .unwrap_or_else(|| parts.uri.path()),
    );
    let signature = parts
        .headers
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();

    if signature.is_empty() || !validate_signature(&auth_token, &url, &params, signature) {
        warn!(%client_ip, url, "webhook signature mismatch");
        return (StatusCode::FORBIDDEN, "Invalid signature").into_response();
    }

    next.run(Request::from_parts(parts, Body::from(bytes))).await
}
