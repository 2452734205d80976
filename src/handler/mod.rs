use crate::app::AppState;
use axum::{
    extract::{FromRequest, Request},
    http::{header::CONTENT_TYPE, StatusCode},
    response::{IntoResponse, Response},
    Form, Json, Router,
};
use serde::de::DeserializeOwned;
use serde_json::json;

pub mod call;
pub mod middleware;
pub mod token;
pub mod webhook;
#[cfg(test)]
mod tests;

/// Errors surfaced to the app as `{ "success": false, "error": ... }`.
#[derive(Debug)]
pub enum ApiError {
    Validation(String),
    Duplicate(String),
    NotFound(String),
    Provider(String),
    Internal(String),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Validation(_) => StatusCode::BAD_REQUEST,
            ApiError::Duplicate(_) => StatusCode::TOO_MANY_REQUESTS,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Provider(_) | ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn message(&self) -> &str {
        match self {
            ApiError::Validation(m)
            | ApiError::Duplicate(m)
            | ApiError::NotFound(m)
            | ApiError::Provider(m)
            | ApiError::Internal(m) => m,
        }
    }
}

impl std::fmt::Display for ApiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}", self.status().as_u16(), self.message())
    }
}

impl std::error::Error for ApiError {}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (
            self.status(),
            Json(json!({ "success": false, "error": self.message() })),
        )
            .into_response()
    }
}

/// App request body, accepted as JSON or as a urlencoded form.
pub struct ApiBody<T>(pub T);

impl<S, T> FromRequest<S> for ApiBody<T>
where
    S: Send + Sync,
    T: DeserializeOwned,
{
    type Rejection = ApiError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let is_form = req
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|ct| ct.starts_with("application/x-www-form-urlencoded"))
            .unwrap_or(false);
        if is_form {
            let Form(value) = Form::<T>::from_request(req, state)
                .await
                .map_err(|e| ApiError::Validation(e.body_text()))?;
            Ok(ApiBody(value))
        } else {
            let Json(value) = Json::<T>::from_request(req, state)
                .await
                .map_err(|e| ApiError::Validation(e.body_text()))?;
            Ok(ApiBody(value))
        }
    }
}

/// Trimmed, non-empty value of an optional request field.
pub(crate) fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .merge(call::urls())
        .merge(token::urls())
        .merge(webhook::urls(state.clone()))
        .fallback(webhook::unhandled_callback)
        .with_state(state)
}
