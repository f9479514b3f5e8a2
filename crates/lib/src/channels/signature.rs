//! Webhook authentication: Twilio request signatures and static Basic/Bearer credentials.

use base64::Engine;
use hmac::{Hmac, Mac};
use sha1::Sha1;
use subtle::ConstantTimeEq;

type HmacSha1 = Hmac<Sha1>;

fn twilio_mac(auth_token: &str, url: &str, params: &[(String, String)]) -> Option<HmacSha1> {
    let mut sorted: Vec<&(String, String)> = params.iter().collect();
    sorted.sort();
    let mut mac = HmacSha1::new_from_slice(auth_token.as_bytes()).ok()?;
    mac.update(url.as_bytes());
    for (k, v) in sorted {
        mac.update(k.as_bytes());
        mac.update(v.as_bytes());
    }
    Some(mac)
}

/// base64(HMAC-SHA1(auth_token, url + each key+value in key order)).
pub fn twilio_signature(auth_token: &str, url: &str, params: &[(String, String)]) -> String {
    match twilio_mac(auth_token, url, params) {
        Some(mac) => {
            base64::engine::general_purpose::STANDARD.encode(mac.finalize().into_bytes())
        }
        None => String::new(),
    }
}

/// Compare `X-Twilio-Signature` against the expected signature in constant time.
pub fn verify_twilio_signature(
    auth_token: &str,
    url: &str,
    params: &[(String, String)],
    provided: &str,
) -> bool {
    let Ok(sig) = base64::engine::general_purpose::STANDARD.decode(provided.trim()) else {
        return false;
    };
    match twilio_mac(auth_token, url, params) {
        Some(mac) => mac.verify_slice(&sig).is_ok(),
        None => false,
    }
}

/// Constant-time equality for configured secrets. Length differences are not hidden.
pub fn secret_eq(provided: &[u8], expected: &[u8]) -> bool {
    provided.ct_eq(expected).into()
}

/// `Authorization: Basic base64(user:pass)` against a configured `"user:pass"`.
pub fn basic_auth_matches(header: Option<&str>, expected: &str) -> bool {
    let Some(encoded) = header.and_then(|h| h.trim().strip_prefix("Basic ")) else {
        return false;
    };
    match base64::engine::general_purpose::STANDARD.decode(encoded.trim()) {
        Ok(raw) => secret_eq(&raw, expected.as_bytes()),
        Err(_) => false,
    }
}

/// `Authorization: Bearer <token>` against a configured token.
pub fn bearer_matches(header: Option<&str>, expected: &str) -> bool {
    header
        .and_then(|h| h.trim().strip_prefix("Bearer "))
        .map_or(false, |t| secret_eq(t.trim().as_bytes(), expected.as_bytes()))
}
