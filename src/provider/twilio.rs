use super::{
    OutboundCallRequest, ProviderCall, ProviderError, TelephonyProvider, STATUS_CALLBACK_EVENTS,
};
use crate::config::ProviderConfig;
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use reqwest::{Client, RequestBuilder};
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, warn};

#[derive(Debug, Deserialize)]
struct TwilioErrorBody {
    code: Option<i64>,
    message: Option<String>,
}

/// REST adapter for the provider's `Calls` resource.
pub struct TwilioProvider {
    calls_url: String,
    account_sid: String,
    auth_token: String,
    client: Client,
}

impl TwilioProvider {
    pub fn new(config: &ProviderConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms.unwrap_or(10_000)))
            .user_agent(crate::version::get_useragent())
            .build()
            .map_err(|e| anyhow!("failed to build provider http client: {}", e))?;
        Ok(Self {
            calls_url: format!(
                "{}/2010-04-01/Accounts/{}/Calls",
                config.api_base.trim_end_matches('/'),
                config.account_sid
            ),
            account_sid: config.account_sid.clone(),
            auth_token: config.auth_token.clone().unwrap_or_default(),
            client,
        })
    }

    fn call_url(&self, call_id: &str) -> String {
        format!("{}/{}.json", self.calls_url, urlencoding::encode(call_id))
    }

    fn create_form(request: &OutboundCallRequest) -> Vec<(&'static str, String)> {
        let mut form = vec![
            ("To", request.to.clone()),
            ("From", request.from.clone()),
            ("Url", request.url.clone()),
            ("StatusCallback", request.status_callback.clone()),
            ("StatusCallbackMethod", "POST".to_string()),
        ];
        form.extend(
            STATUS_CALLBACK_EVENTS
                .iter()
                .map(|event| ("StatusCallbackEvent", event.to_string())),
        );
        form
    }

    async fn execute(&self, request: RequestBuilder) -> Result<ProviderCall, ProviderError> {
        if self.account_sid.is_empty() {
            return Err(ProviderError::new(
                Some(20404),
                0,
                "provider account is not configured",
            ));
        }
        let response = request
            .basic_auth(&self.account_sid, Some(&self.auth_token))
            .send()
            .await
            .map_err(|e| ProviderError::transport(format!("provider request error: {}", e)))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| ProviderError::transport(format!("provider response error: {}", e)))?;
        if !status.is_success() {
            let error = serde_json::from_str::<TwilioErrorBody>(&body).ok();
            let code = error.as_ref().and_then(|e| e.code);
            let message = error
                .and_then(|e| e.message)
                .unwrap_or_else(|| status.to_string());
            warn!(status = status.as_u16(), ?code, "provider rejected request: {}", message);
            return Err(ProviderError::new(code, status.as_u16(), message));
        }
        serde_json::from_str::<ProviderCall>(&body).map_err(|e| {
            ProviderError::new(None, status.as_u16(), format!("invalid provider response: {}", e))
        })
    }
}

#[async_trait]
impl TelephonyProvider for TwilioProvider {
    async fn create_call(
        &self,
        request: &OutboundCallRequest,
    ) -> Result<ProviderCall, ProviderError> {
        debug!(to = %request.to, from = %request.from, url = %request.url, "creating provider call");
        let url = format!("{}.json", self.calls_url);
        self.execute(self.client.post(url).form(&Self::create_form(request)))
            .await
    }

    async fn end_call(&self, call_id: &str) -> Result<ProviderCall, ProviderError> {
        debug!(call_id, "ending provider call");
        self.execute(
            self.client
                .post(self.call_url(call_id))
                .form(&[("Status", "completed")]),
        )
        .await
    }

    async fn fetch_call(&self, call_id: &str) -> Result<ProviderCall, ProviderError> {
        self.execute(self.client.get(self.call_url(call_id))).await
    }
}
