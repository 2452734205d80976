use crate::config::ProviderConfig;
use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

pub mod signature;
pub mod token;
pub mod twilio;

/// Events the provider reports to the status callback URL.
pub const STATUS_CALLBACK_EVENTS: [&str; 4] = ["initiated", "ringing", "answered", "completed"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundCallRequest {
    pub to: String,
    pub from: String,
    /// Instruction document URL fetched when the leg is answered.
    pub url: String,
    pub status_callback: String,
}

/// Provider view of a call.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all(serialize = "camelCase"))]
pub struct ProviderCall {
    pub sid: String,
    #[serde(default)]
    pub from: String,
    #[serde(default)]
    pub to: String,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub direction: String,
    pub duration: Option<String>,
    pub start_time: Option<String>,
    pub end_time: Option<String>,
    pub parent_call_sid: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderError {
    /// Provider error code, e.g. 21211.
    pub code: Option<i64>,
    /// HTTP status of the provider response, 0 when the request never got one.
    pub status: u16,
    pub message: String,
}

impl ProviderError {
    pub fn new(code: Option<i64>, status: u16, message: impl Into<String>) -> Self {
        Self {
            code,
            status,
            message: message.into(),
        }
    }

    pub fn transport(message: impl Into<String>) -> Self {
        Self::new(None, 0, message)
    }

    pub fn is_not_found(&self) -> bool {
        self.status == 404 || self.code == Some(20404)
    }

    /// Message shown to the app.
    pub fn user_message(&self) -> String {
        match self.code {
            Some(21211) => "Invalid phone number format".to_string(),
            Some(21214) => "Phone number is not valid or verified".to_string(),
            Some(20404) => "Telephony provider configuration issue - check your account".to_string(),
            Some(code) => format!("Telephony provider error (code: {}): {}", code, self.message),
            None => self.message.clone(),
        }
    }
}

impl std::fmt::Display for ProviderError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.code {
            Some(code) => write!(f, "provider error {} ({}): {}", code, self.status, self.message),
            None => write!(f, "provider error ({}): {}", self.status, self.message),
        }
    }
}

impl std::error::Error for ProviderError {}

impl From<anyhow::Error> for ProviderError {
    fn from(e: anyhow::Error) -> Self {
        ProviderError::transport(e.to_string())
    }
}

#[async_trait]
pub trait TelephonyProvider: Send + Sync {
    async fn create_call(&self, request: &OutboundCallRequest)
        -> Result<ProviderCall, ProviderError>;
    /// Moves the call to `completed`.
    async fn end_call(&self, call_id: &str) -> Result<ProviderCall, ProviderError>;
    async fn fetch_call(&self, call_id: &str) -> Result<ProviderCall, ProviderError>;
}

pub fn create_provider(config: &ProviderConfig) -> Result<Arc<dyn TelephonyProvider>> {
    Ok(Arc::new(twilio::TwilioProvider::new(config)?))
}
