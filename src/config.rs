use crate::directory::{DeviceToken, DirectoryUser, NumberMapping};
use anyhow::Error;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

const DEFAULT_PROVIDER_API: &str = "https://api.twilio.com";
const DEFAULT_GREETING: &str = "Thanks for calling. Please wait while we connect you.";

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    #[serde(default = "default_http_addr")]
    pub http_addr: String,
    pub log_level: Option<String>,
    pub log_file: Option<String>,
    /// Externally reachable base URL, used for provider webhook URLs.
    #[serde(default = "default_public_url")]
    pub public_url: String,
    #[serde(default)]
    pub access_log_skip_paths: Vec<String>,
    #[serde(default)]
    pub provider: ProviderConfig,
    #[serde(default)]
    pub dedup: DedupConfig,
    #[serde(default)]
    pub calls: CallsConfig,
    #[serde(default)]
    pub directory: DirectoryConfig,
    #[serde(default)]
    pub push: PushConfig,
}

#[derive(Debug, Deserialize, Clone, Serialize)]
pub struct ProviderConfig {
    #[serde(default)]
    pub account_sid: String,
    pub auth_token: Option<String>,
    pub api_key: Option<String>,
    pub api_secret: Option<String>,
    pub app_sid: Option<String>,
    pub caller_id: Option<String>,
    #[serde(default = "default_provider_api")]
    pub api_base: String,
    #[serde(default = "default_token_ttl")]
    pub token_ttl_secs: u64,
    pub timeout_ms: Option<u64>,
    #[serde(default)]
    pub validate_signatures: bool,
}

#[derive(Debug, Deserialize, Clone, Serialize)]
pub struct DedupConfig {
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,
    #[serde(default = "default_retention_ms")]
    pub retention_ms: u64,
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,
}

#[derive(Debug, Deserialize, Clone, Serialize)]
pub struct CallsConfig {
    #[serde(default = "default_ring_timeout")]
    pub ring_timeout_secs: u32,
    /// How long finished records stay resolvable for late callbacks.
    #[serde(default = "default_record_grace")]
    pub record_grace_secs: u64,
    /// Calls still not finished after this long are dropped by the sweeper.
    #[serde(default = "default_max_active")]
    pub max_active_secs: u64,
    #[serde(default = "default_true")]
    pub greet_on_fallback: bool,
    #[serde(default = "default_greeting")]
    pub greeting: String,
}

#[derive(Debug, Deserialize, Clone, Serialize)]
#[serde(tag = "type")]
#[serde(rename_all = "snake_case")]
pub enum DirectoryConfig {
    Memory {
        #[serde(default)]
        users: Vec<DirectoryUser>,
        #[serde(default)]
        numbers: Vec<NumberMapping>,
        #[serde(default)]
        devices: Vec<DeviceToken>,
    },
    Http {
        url: String,
        headers: Option<HashMap<String, String>>,
        timeout_ms: Option<u64>,
    },
}

#[derive(Debug, Deserialize, Clone, Serialize)]
#[serde(tag = "type")]
#[serde(rename_all = "snake_case")]
pub enum PushConfig {
    None,
    Fcm {
        project_id: String,
        access_token: String,
        api_base: Option<String>,
        timeout_ms: Option<u64>,
    },
}

fn default_http_addr() -> String {
    "0.0.0.0:3009".to_string()
}

fn default_public_url() -> String {
    "http://localhost:3009".to_string()
}

fn default_provider_api() -> String {
    DEFAULT_PROVIDER_API.to_string()
}

fn default_token_ttl() -> u64 {
    24 * 3600
}

fn default_debounce_ms() -> u64 {
    3000
}

fn default_retention_ms() -> u64 {
    60_000
}

fn default_sweep_interval() -> u64 {
    60
}

fn default_ring_timeout() -> u32 {
    30
}

fn default_record_grace() -> u64 {
    300
}

fn default_max_active() -> u64 {
    4 * 3600
}

fn default_true() -> bool {
    true
}

fn default_greeting() -> String {
    DEFAULT_GREETING.to_string()
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            account_sid: String::new(),
            auth_token: None,
            api_key: None,
            api_secret: None,
            app_sid: None,
            caller_id: None,
            api_base: default_provider_api(),
            token_ttl_secs: default_token_ttl(),
            timeout_ms: None,
            validate_signatures: false,
        }
    }
}

impl Default for DedupConfig {
    fn default() -> Self {
        Self {
            debounce_ms: default_debounce_ms(),
            retention_ms: default_retention_ms(),
            sweep_interval_secs: default_sweep_interval(),
        }
    }
}

impl Default for CallsConfig {
    fn default() -> Self {
        Self {
            ring_timeout_secs: default_ring_timeout(),
            record_grace_secs: default_record_grace(),
            max_active_secs: default_max_active(),
            greet_on_fallback: true,
            greeting: default_greeting(),
        }
    }
}

impl Default for DirectoryConfig {
    fn default() -> Self {
        Self::Memory {
            users: vec![],
            numbers: vec![],
            devices: vec![],
        }
    }
}

impl Default for PushConfig {
    fn default() -> Self {
        Self::None
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            http_addr: default_http_addr(),
            log_level: Some("info".to_string()),
            log_file: None,
            public_url: default_public_url(),
            access_log_skip_paths: vec![],
            provider: ProviderConfig::default(),
            dedup: DedupConfig::default(),
            calls: CallsConfig::default(),
            directory: DirectoryConfig::default(),
            push: PushConfig::default(),
        }
    }
}

impl Config {
    pub fn load(path: &str) -> Result<Self, Error> {
        let mut config: Config = toml::from_str(
            &std::fs::read_to_string(path).map_err(|e| anyhow::anyhow!("{}: {}", e, path))?,
        )?;
        config.apply_env();
        Ok(config)
    }

    /// Credentials from the environment take precedence over the file.
    pub fn apply_env(&mut self) {
        self.apply_vars(|name| std::env::var(name).ok());
    }

    fn apply_vars<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let lookup = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());
        if let Some(v) = lookup("TWILIO_ACCOUNT_SID") {
            self.provider.account_sid = v;
        }
        if let Some(v) = lookup("TWILIO_AUTH_TOKEN") {
            self.provider.auth_token = Some(v);
        }
        if let Some(v) = lookup("TWILIO_API_KEY") {
            self.provider.api_key = Some(v);
        }
        if let Some(v) = lookup("TWILIO_API_SECRET") {
            self.provider.api_secret = Some(v);
        }
        if let Some(v) = lookup("TWILIO_APP_SID") {
            self.provider.app_sid = Some(v);
        }
        if let Some(v) = lookup("TWILIO_CALLER_ID") {
            self.provider.caller_id = Some(v);
        }
        if let Some(v) = lookup("BACKEND_URL") {
            self.public_url = v;
        }
    }

    pub fn callback_url(&self, path: &str) -> String {
        format!("{}{}", self.public_url.trim_end_matches('/'), path)
    }
}
