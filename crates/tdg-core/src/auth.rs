//! Upstream authentication payloads.
//!
//! The upstream streaming API authenticates a session with an `auth`
//! event carrying the API key and an HMAC-SHA384 signature, hex-encoded,
//! over the string `"AUTH" + nonce`.

use ring::hmac;
use serde_json::{json, Value};

/// Sign an auth payload with the API secret. Returns the hex-encoded
/// HMAC-SHA384 tag.
pub fn sign_auth_payload(secret: &str, payload: &str) -> String {
    let key = hmac::Key::new(hmac::HMAC_SHA384, secret.as_bytes());
    let tag = hmac::sign(&key, payload.as_bytes());
    hex::encode(tag.as_ref())
}

/// Build the upstream `auth` request for the given credentials.
///
/// The nonce must increase between requests signed with the same key;
/// callers pass the current time in microseconds.
pub fn build_auth_request(api_key: &str, api_secret: &str, nonce: u64) -> Value {
    let payload = format!("AUTH{nonce}");
    let sig = sign_auth_payload(api_secret, &payload);
    json!({
        "event": "auth",
        "apiKey": api_key,
        "authSig": sig,
        "authNonce": nonce,
        "authPayload": payload,
    })
}

/// Current time in microseconds, suitable as an auth nonce.
pub fn auth_nonce() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_micros() as u64
}
