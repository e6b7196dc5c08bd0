// Webhook signature verification.
// The signature header carries hex(HMAC-SHA256(secret, raw_body)); an
// invalid signature rejects the request before dedup runs.

use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Compute the hex signature for a payload. Used by tests and by senders.
pub fn sign_payload(secret: &str, body: &[u8]) -> String {
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC accepts any key length");
    mac.update(body);
    hex::encode(mac.finalize().into_bytes())
}

/// Verify a hex signature against the raw request body. Constant-time on
/// the MAC comparison; malformed hex fails closed.
pub fn verify_signature(secret: &str, body: &[u8], signature_hex: &str) -> bool {
    let provided = match hex::decode(signature_hex.trim()) {
        Ok(bytes) => bytes,
        Err(_) => return false,
    };

    let mut mac = match HmacSha256::new_from_slice(secret.as_bytes()) {
        Ok(mac) => mac,
        Err(_) => return false,
    };
    mac.update(body);
    mac.verify_slice(&provided).is_ok()
}
