use super::{PushError, PushPayload, PushSender};
use crate::directory::DeviceToken;
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Serialize;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::time::Duration;
use tracing::debug;

const DEFAULT_FCM_API: &str = "https://fcm.googleapis.com";

#[derive(Serialize)]
struct FcmNotification<'a> {
    title: &'a str,
    body: &'a str,
}

#[derive(Serialize)]
struct FcmMessage<'a> {
    token: &'a str,
    notification: FcmNotification<'a>,
    data: &'a HashMap<String, String>,
    android: Value,
    apns: Value,
}

#[derive(Serialize)]
struct FcmRequest<'a> {
    message: FcmMessage<'a>,
}

/// Firebase Cloud Messaging HTTP v1 sender.
pub struct FcmPushSender {
    endpoint: String,
    access_token: String,
    client: Client,
}

impl FcmPushSender {
    pub fn new(
        project_id: &str,
        access_token: &str,
        api_base: Option<&str>,
        timeout_ms: Option<u64>,
    ) -> Result<Self> {
        if project_id.trim().is_empty() {
            return Err(anyhow!("fcm project_id is required"));
        }
        let client = Client::builder()
            .timeout(Duration::from_millis(timeout_ms.unwrap_or(5000)))
            .user_agent(crate::version::get_useragent())
            .build()?;
        Ok(Self {
            endpoint: format!(
                "{}/v1/projects/{}/messages:send",
                api_base.unwrap_or(DEFAULT_FCM_API).trim_end_matches('/'),
                project_id
            ),
            access_token: access_token.to_string(),
            client,
        })
    }

    fn build_request<'a>(device: &'a DeviceToken, payload: &'a PushPayload) -> FcmRequest<'a> {
        FcmRequest {
            message: FcmMessage {
                token: &device.token,
                notification: FcmNotification {
                    title: &payload.title,
                    body: &payload.body,
                },
                data: &payload.data,
                android: json!({ "priority": "high" }),
                apns: json!({
                    "headers": { "apns-priority": "10" },
                    "payload": { "aps": { "sound": "default", "content-available": 1 } }
                }),
            },
        }
    }
}

/// FCM reports dead registrations as 404, or as `UNREGISTERED` in the body.
fn is_invalid_token(status: StatusCode, body: &str) -> bool {
    status == StatusCode::NOT_FOUND
        || body.contains("UNREGISTERED")
        || (status == StatusCode::BAD_REQUEST && body.contains("registration token"))
}

#[async_trait]
impl PushSender for FcmPushSender {
    async fn send(&self, device: &DeviceToken, payload: &PushPayload) -> Result<(), PushError> {
        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.access_token)
            .json(&Self::build_request(device, payload))
            .send()
            .await
            .map_err(|e| anyhow!("fcm request error: {}", e))?;

        let status = response.status();
        if status.is_success() {
            debug!(identity = %device.identity, "fcm message accepted");
            return Ok(());
        }
        let body = response.text().await.unwrap_or_default();
        if is_invalid_token(status, &body) {
            return Err(PushError::InvalidToken);
        }
        Err(PushError::Other(anyhow!("fcm returned {}: {}", status, body)))
    }
}
