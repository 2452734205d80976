use crate::config::PushConfig;
use crate::directory::{DeviceToken, Directory};
use anyhow::{Error, Result};
use async_trait::async_trait;
use futures::future::join_all;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

pub mod fcm;

#[cfg(test)]
mod tests;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PushPayload {
    pub title: String,
    pub body: String,
    pub data: HashMap<String, String>,
}

impl PushPayload {
    pub fn new(title: &str, body: &str) -> Self {
        Self {
            title: title.to_string(),
            body: body.to_string(),
            data: HashMap::new(),
        }
    }

    pub fn with_data(mut self, key: &str, value: &str) -> Self {
        self.data.insert(key.to_string(), value.to_string());
        self
    }

    pub fn incoming_call(call_id: &str, from: &str) -> Self {
        Self::new("Incoming call", &format!("Call from {}", from))
            .with_data("type", "incoming-call")
            .with_data("callId", call_id)
            .with_data("from", from)
    }

    pub fn missed_call(call_id: &str, from: &str) -> Self {
        Self::new("Missed call", &format!("You missed a call from {}", from))
            .with_data("type", "missed-call")
            .with_data("callId", call_id)
            .with_data("from", from)
    }
}

#[derive(Debug)]
pub enum PushError {
    /// The push service no longer knows this token.
    InvalidToken,
    Other(Error),
}

impl std::fmt::Display for PushError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PushError::InvalidToken => write!(f, "Invalid or unregistered device token"),
            PushError::Other(e) => write!(f, "{}", e),
        }
    }
}

impl std::error::Error for PushError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            PushError::Other(e) => Some(e.as_ref()),
            _ => None,
        }
    }
}

impl From<Error> for PushError {
    fn from(e: Error) -> Self {
        PushError::Other(e)
    }
}

#[async_trait]
pub trait PushSender: Send + Sync {
    async fn send(&self, device: &DeviceToken, payload: &PushPayload) -> Result<(), PushError>;
}

/// Fans a payload out to every device of an identity. Per-device failures
/// are isolated; tokens the push service rejects are deregistered.
pub struct NotificationDispatcher {
    directory: Arc<dyn Directory>,
    sender: Arc<dyn PushSender>,
}

impl NotificationDispatcher {
    pub fn new(directory: Arc<dyn Directory>, sender: Arc<dyn PushSender>) -> Self {
        Self { directory, sender }
    }

    /// True when at least one device accepted the payload.
    pub async fn notify(&self, identity: &str, payload: &PushPayload) -> bool {
        let devices = match self.directory.device_tokens(identity).await {
            Ok(devices) => devices,
            Err(e) => {
                warn!(identity, "failed to load device tokens: {}", e);
                return false;
            }
        };
        if devices.is_empty() {
            debug!(identity, "no devices registered for push");
            return false;
        }

        let results = join_all(
            devices
                .iter()
                .map(|device| async move { (device, self.sender.send(device, payload).await) }),
        )
        .await;

        let mut delivered = 0;
        for (device, result) in results {
            match result {
                Ok(()) => delivered += 1,
                Err(PushError::InvalidToken) => {
                    info!(
                        identity,
                        platform = %device.platform,
                        "removing invalid device token"
                    );
                    if let Err(e) = self
                        .directory
                        .remove_device_token(&device.identity, &device.token)
                        .await
                    {
                        warn!(identity, "failed to remove device token: {}", e);
                    }
                }
                Err(e) => {
                    warn!(identity, platform = %device.platform, "push delivery failed: {}", e);
                }
            }
        }
        debug!(identity, delivered, total = devices.len(), "push fan-out finished");
        delivered > 0
    }
}

pub fn create_push_sender(config: &PushConfig) -> Result<Option<Arc<dyn PushSender>>> {
    match config {
        PushConfig::None => Ok(None),
        PushConfig::Fcm {
            project_id,
            access_token,
            api_base,
            timeout_ms,
        } => Ok(Some(Arc::new(fcm::FcmPushSender::new(
            project_id,
            access_token,
            api_base.as_deref(),
            *timeout_ms,
        )?))),
    }
}
