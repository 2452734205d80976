use crate::config::ProviderConfig;
use anyhow::{anyhow, Result};
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use hmac::{Hmac, Mac};
use serde_json::json;
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Issues voice access tokens for the app's client SDK.
#[derive(Debug, Clone)]
pub struct AccessTokenIssuer {
    account_sid: String,
    api_key: String,
    api_secret: String,
    app_sid: Option<String>,
    ttl_secs: u64,
}

impl AccessTokenIssuer {
    pub fn from_config(config: &ProviderConfig) -> Result<Self> {
        let api_key = config
            .api_key
            .clone()
            .filter(|k| !k.is_empty())
            .ok_or_else(|| anyhow!("provider api_key is not configured"))?;
        let api_secret = config
            .api_secret
            .clone()
            .filter(|s| !s.is_empty())
            .ok_or_else(|| anyhow!("provider api_secret is not configured"))?;
        if config.account_sid.is_empty() {
            return Err(anyhow!("provider account_sid is not configured"));
        }
        Ok(Self {
            account_sid: config.account_sid.clone(),
            api_key,
            api_secret,
            app_sid: config.app_sid.clone(),
            ttl_secs: config.token_ttl_secs,
        })
    }

    /// Signed HS256 JWT with a voice grant for `identity`, issued at `now`
    /// (unix seconds).
    pub fn issue(&self, identity: &str, now: u64) -> Result<String> {
        let header = json!({
            "typ": "JWT",
            "alg": "HS256",
            "cty": "twilio-fpa;v=1",
        });
        let mut voice = json!({ "incoming": { "allow": true } });
        if let Some(app_sid) = &self.app_sid {
            voice["outgoing"] = json!({ "application_sid": app_sid });
        }
        let claims = json!({
            "jti": format!("{}-{}", self.api_key, now),
            "iss": self.api_key,
            "sub": self.account_sid,
            "iat": now,
            "exp": now + self.ttl_secs,
            "grants": {
                "identity": identity,
                "voice": voice,
            },
        });

        let signing_input = format!(
            "{}.{}",
            URL_SAFE_NO_PAD.encode(serde_json::to_vec(&header)?),
            URL_SAFE_NO_PAD.encode(serde_json::to_vec(&claims)?)
        );
        let mut mac = HmacSha256::new_from_slice(self.api_secret.as_bytes())
            .map_err(|e| anyhow!("invalid signing key: {}", e))?;
        mac.update(signing_input.as_bytes());
        let signature = URL_SAFE_NO_PAD.encode(mac.finalize().into_bytes());
        Ok(format!("{}.{}", signing_input, signature))
    }
}
