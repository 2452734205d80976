use crate::config::{Config, DirectoryConfig, PushConfig};
use serde::Serialize;
use std::net::SocketAddr;
use tokio::net::TcpListener;

#[derive(Debug, Serialize, PartialEq, Eq)]
pub struct PreflightIssue {
    pub field: String,
    pub message: String,
}

impl PreflightIssue {
    fn new(field: &str, message: impl Into<String>) -> Self {
        Self {
            field: field.to_string(),
            message: message.into(),
        }
    }
}

#[derive(Debug)]
pub struct PreflightError {
    pub issues: Vec<PreflightIssue>,
}

impl PreflightError {
    pub fn new(issues: Vec<PreflightIssue>) -> Self {
        Self { issues }
    }
}

impl std::fmt::Display for PreflightError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for (i, issue) in self.issues.iter().enumerate() {
            if i > 0 {
                writeln!(f)?;
            }
            write!(f, "{}: {}", issue.field, issue.message)?;
        }
        Ok(())
    }
}

impl std::error::Error for PreflightError {}

/// Checks a configuration before the server starts: listen address, URLs and
/// provider credentials.
pub async fn validate_start(config: &Config) -> Result<(), PreflightError> {
    let mut issues = validate_static(config);

    if let Ok(addr) = value_as_socket_addr("http_addr", &config.http_addr) {
        if let Err(err) = TcpListener::bind(addr).await.map(drop) {
            issues.push(PreflightIssue::new(
                "http_addr",
                format!("Address {} is unavailable ({})", addr, err),
            ));
        }
    }

    if issues.is_empty() {
        Ok(())
    } else {
        Err(PreflightError::new(issues))
    }
}

/// Checks that need no I/O.
fn validate_static(config: &Config) -> Vec<PreflightIssue> {
    let mut issues = Vec::new();

    if let Err(issue) = value_as_socket_addr("http_addr", &config.http_addr) {
        issues.push(issue);
    }
    if let Err(issue) = value_as_http_url("public_url", &config.public_url) {
        issues.push(issue);
    }
    if let Err(issue) = value_as_http_url("provider.api_base", &config.provider.api_base) {
        issues.push(issue);
    }

    let provider = &config.provider;
    if provider.account_sid.trim().is_empty() {
        issues.push(PreflightIssue::new(
            "provider.account_sid",
            "Missing account sid (set it in the file or TWILIO_ACCOUNT_SID)",
        ));
    }
    if provider.auth_token.as_deref().unwrap_or_default().is_empty() {
        issues.push(PreflightIssue::new(
            "provider.auth_token",
            "Missing auth token (set it in the file or TWILIO_AUTH_TOKEN)",
        ));
    }
    let has_key = provider.api_key.as_deref().is_some_and(|k| !k.is_empty());
    let has_secret = provider.api_secret.as_deref().is_some_and(|s| !s.is_empty());
    if has_key != has_secret {
        issues.push(PreflightIssue::new(
            "provider.api_secret",
            "api_key and api_secret must be configured together",
        ));
    }
    if config.dedup.debounce_ms == 0 {
        issues.push(PreflightIssue::new(
            "dedup.debounce_ms",
            "Debounce window must be greater than zero",
        ));
    }

    if let DirectoryConfig::Http { url, .. } = &config.directory {
        if let Err(issue) = value_as_http_url("directory.url", url) {
            issues.push(issue);
        }
    }
    if let PushConfig::Fcm {
        project_id,
        api_base,
        ..
    } = &config.push
    {
        if project_id.trim().is_empty() {
            issues.push(PreflightIssue::new("push.project_id", "Missing FCM project id"));
        }
        if let Some(api_base) = api_base {
            if let Err(issue) = value_as_http_url("push.api_base", api_base) {
                issues.push(issue);
            }
        }
    }
    issues
}

fn value_as_socket_addr(field: &str, value: &str) -> Result<SocketAddr, PreflightIssue> {
    value
        .parse::<SocketAddr>()
        .map_err(|err| PreflightIssue::new(field, format!("Invalid {} `{}` ({})", field, value, err)))
}

fn value_as_http_url(field: &str, value: &str) -> Result<url::Url, PreflightIssue> {
    let url = url::Url::parse(value)
        .map_err(|err| PreflightIssue::new(field, format!("Invalid {} `{}` ({})", field, value, err)))?;
    match url.scheme() {
        "http" | "https" => Ok(url),
        scheme => Err(PreflightIssue::new(
            field,
            format!("Unsupported scheme `{}` in {}", scheme, field),
        )),
    }
}
