use base64::{engine::general_purpose::STANDARD, Engine as _};
use ring::hmac;

pub const SIGNATURE_HEADER: &str = "X-Twilio-Signature";

fn signing_payload(url: &str, params: &[(String, String)]) -> String {
    let mut sorted: Vec<&(String, String)> = params.iter().collect();
    sorted.sort();
    let mut payload = url.to_string();
    for (key, value) in sorted {
        payload.push_str(key);
        payload.push_str(value);
    }
    payload
}

/// base64(HMAC-SHA1(auth_token, url + sorted key/value pairs)).
pub fn compute_signature(auth_token: &str, url: &str, params: &[(String, String)]) -> String {
    let key = hmac::Key::new(hmac::HMAC_SHA1_FOR_LEGACY_USE_ONLY, auth_token.as_bytes());
    let tag = hmac::sign(&key, signing_payload(url, params).as_bytes());
    STANDARD.encode(tag.as_ref())
}

/// Constant-time check of a webhook signature.
pub fn validate_signature(
    auth_token: &str,
    url: &str,
    params: &[(String, String)],
    signature: &str,
) -> bool {
    let Ok(expected) = STANDARD.decode(signature.trim()) else {
        return false;
    };
    let key = hmac::Key::new(hmac::HMAC_SHA1_FOR_LEGACY_USE_ONLY, auth_token.as_bytes());
    hmac::verify(&key, signing_payload(url, params).as_bytes(), &expected).is_ok()
}
