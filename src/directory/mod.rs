use crate::config::DirectoryConfig;
use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::info;

pub mod http;

/// An application user as known to the relational store.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectoryUser {
    pub id: i64,
    pub email: Option<String>,
    /// Client identity the app registered with the telephony SDK, if known.
    pub identity: Option<String>,
}

impl DirectoryUser {
    /// Identity used to reach this user's app: the registered identity,
    /// else the e-mail local part, else `user_<id>`.
    pub fn client_identity(&self) -> String {
        if let Some(identity) = self.identity.as_deref().filter(|s| !s.is_empty()) {
            return identity.to_string();
        }
        if let Some(local) = self
            .email
            .as_deref()
            .and_then(|email| email.split('@').next())
            .filter(|s| !s.is_empty())
        {
            return local.to_string();
        }
        format!("user_{}", self.id)
    }
}

/// Binds a provider-owned phone number to its owner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NumberMapping {
    pub number: String,
    pub owner_id: i64,
    #[serde(default = "default_active")]
    pub active: bool,
}

fn default_active() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceToken {
    pub identity: String,
    pub platform: String,
    pub token: String,
}

/// Read side of the relational store as seen by call routing and push.
#[async_trait]
pub trait Directory: Send + Sync {
    async fn number_mapping(&self, number: &str) -> Result<Option<NumberMapping>>;
    async fn user_by_email(&self, email: &str) -> Result<Option<DirectoryUser>>;
    async fn user_by_id(&self, id: i64) -> Result<Option<DirectoryUser>>;
    async fn device_tokens(&self, identity: &str) -> Result<Vec<DeviceToken>>;
    async fn register_device_token(&self, token: DeviceToken) -> Result<()>;
    async fn remove_device_token(&self, identity: &str, token: &str) -> Result<()>;
}

/// Digits only, so `+1 (555) 010-0` and `15550100` compare equal.
pub fn normalize_number(number: &str) -> String {
    number.chars().filter(|c| c.is_ascii_digit()).collect()
}

#[derive(Default)]
struct MemoryDirectoryState {
    users: Vec<DirectoryUser>,
    numbers: Vec<NumberMapping>,
    devices: Vec<DeviceToken>,
}

pub struct MemoryDirectory {
    inner: Mutex<MemoryDirectoryState>,
}

impl MemoryDirectory {
    pub fn new(
        users: Vec<DirectoryUser>,
        numbers: Vec<NumberMapping>,
        devices: Vec<DeviceToken>,
    ) -> Self {
        info!(
            users = users.len(),
            numbers = numbers.len(),
            devices = devices.len(),
            "creating memory directory"
        );
        Self {
            inner: Mutex::new(MemoryDirectoryState {
                users,
                numbers,
                devices,
            }),
        }
    }

    pub async fn add_user(&self, user: DirectoryUser) {
        let mut guard = self.inner.lock().await;
        guard.users.retain(|u| u.id != user.id);
        guard.users.push(user);
    }

    pub async fn add_number(&self, mapping: NumberMapping) {
        let mut guard = self.inner.lock().await;
        let key = normalize_number(&mapping.number);
        guard.numbers.retain(|m| normalize_number(&m.number) != key);
        guard.numbers.push(mapping);
    }
}

impl Default for MemoryDirectory {
    fn default() -> Self {
        Self::new(vec![], vec![], vec![])
    }
}

#[async_trait]
impl Directory for MemoryDirectory {
    async fn number_mapping(&self, number: &str) -> Result<Option<NumberMapping>> {
        let key = normalize_number(number);
        if key.is_empty() {
            return Ok(None);
        }
        let guard = self.inner.lock().await;
        Ok(guard
            .numbers
            .iter()
            .find(|m| normalize_number(&m.number) == key)
            .cloned())
    }

    async fn user_by_email(&self, email: &str) -> Result<Option<DirectoryUser>> {
        let guard = self.inner.lock().await;
        Ok(guard
            .users
            .iter()
            .find(|u| {
                u.email
                    .as_deref()
                    .map(|e| e.eq_ignore_ascii_case(email))
                    .unwrap_or(false)
            })
            .cloned())
    }

    async fn user_by_id(&self, id: i64) -> Result<Option<DirectoryUser>> {
        let guard = self.inner.lock().await;
        Ok(guard.users.iter().find(|u| u.id == id).cloned())
    }

    async fn device_tokens(&self, identity: &str) -> Result<Vec<DeviceToken>> {
        let guard = self.inner.lock().await;
        Ok(guard
            .devices
            .iter()
            .filter(|d| d.identity == identity)
            .cloned()
            .collect())
    }

    async fn register_device_token(&self, token: DeviceToken) -> Result<()> {
        let mut guard = self.inner.lock().await;
        guard
            .devices
            .retain(|d| !(d.identity == token.identity && d.token == token.token));
        guard.devices.push(token);
        Ok(())
    }

    async fn remove_device_token(&self, identity: &str, token: &str) -> Result<()> {
        let mut guard = self.inner.lock().await;
        guard
            .devices
            .retain(|d| !(d.identity == identity && d.token == token));
        Ok(())
    }
}

pub fn create_directory(config: &DirectoryConfig) -> Result<Arc<dyn Directory>> {
    match config {
        DirectoryConfig::Memory {
            users,
            numbers,
            devices,
        } => Ok(Arc::new(MemoryDirectory::new(
            users.clone(),
            numbers.clone(),
            devices.clone(),
        ))),
        DirectoryConfig::Http {
            url,
            headers,
            timeout_ms,
        } => Ok(Arc::new(http::HttpDirectory::new(
            url,
            headers.clone().unwrap_or_default(),
            *timeout_ms,
        )?)),
    }
}
