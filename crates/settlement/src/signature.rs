//! Webhook signature verification (HMAC-SHA256).
//!
//! The processor signs `"{timestamp}.{body}"` with a shared secret and sends
//! the result as `t=<unix seconds>,v1=<hex mac>`. Verification is
//! constant-time via the mac itself; deliveries outside the replay window
//! are rejected even with a valid mac.

use hmac::{Hmac, Mac};
use sha2::Sha256;

/// Maximum clock skew between signing and delivery, in seconds.
const REPLAY_WINDOW_SECS: i64 = 300;

/// Verify a signature header against the raw request body.
pub fn verify(body: &[u8], sig_header: &str, secret: &str) -> Result<(), &'static str> {
    let mut timestamp = "";
    let mut signature = "";
    for part in sig_header.split(',') {
        if let Some(t) = part.strip_prefix("t=") {
            timestamp = t;
        } else if let Some(v) = part.strip_prefix("v1=") {
            signature = v;
        }
    }
    if timestamp.is_empty() || signature.is_empty() {
        return Err("malformed signature header");
    }

    let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes()).map_err(|_| "bad hmac key")?;
    mac.update(timestamp.as_bytes());
    mac.update(b".");
    mac.update(body);

    let sig_bytes = hex::decode(signature).map_err(|_| "signature not hex")?;
    mac.verify_slice(&sig_bytes).map_err(|_| "signature mismatch")?;

    let ts: i64 = timestamp.parse().map_err(|_| "bad timestamp")?;
    let now = chrono::Utc::now().timestamp();
    if (now - ts).abs() > REPLAY_WINDOW_SECS {
        return Err("timestamp outside replay window");
    }

    Ok(())
}

/// Produce a valid signature header for a body; used by tests and tooling.
pub fn signature_header(body: &[u8], secret: &str, timestamp: i64) -> String {
    let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes())
        .unwrap_or_else(|_| unreachable!("hmac accepts any key length"));
    mac.update(timestamp.to_string().as_bytes());
    mac.update(b".");
    mac.update(body);
    let sig = hex::encode(mac.finalize().into_bytes());
    format!("t={timestamp},v1={sig}")
}
