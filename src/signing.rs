use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};

use crate::types::SignatureContext;

/// Batch authenticator.
///
/// Holds the shared secret configured once at startup; construct it before
/// any event flows and share it by `Arc`. A `Signer` with no secret
/// produces `None` signatures and callers decide policy.
pub struct Signer {
    secret: Option<Vec<u8>>,
}

impl Signer {
    pub fn new(secret: Option<impl Into<Vec<u8>>>) -> Self {
        Self {
            secret: secret.map(Into::into),
        }
    }

    /// Whether a secret is configured and signing is possible.
    pub fn is_initialized(&self) -> bool {
        self.secret.is_some()
    }

    /// Sign a batch payload.
    ///
    /// The scheme binds payload integrity and a replay-limiting timestamp
    /// into one compact signature:
    /// `HMAC_SHA256(secret, ts_millis_string + SHA256_hex(payload))`.
    ///
    /// Pure function of its inputs; identical inputs always yield an
    /// identical signature.
    pub fn sign(&self, timestamp_millis: i64, payload: &[u8]) -> Option<String> {
        let secret = self.secret.as_ref()?;
        Some(hmac_hex(secret, timestamp_millis, payload))
    }

    /// Build the full authentication material for one batch.
    pub fn signature_context(&self, timestamp_millis: i64, payload: &[u8]) -> SignatureContext {
        SignatureContext {
            timestamp_millis,
            payload_hash: sha256_hex(payload),
            signature: self.sign(timestamp_millis, payload),
        }
    }
}

fn hmac_hex(secret: &[u8], timestamp_millis: i64, payload: &[u8]) -> String {
    let message = format!("{}{}", timestamp_millis, sha256_hex(payload));

    // HMAC accepts keys of any length; new_from_slice cannot fail for SHA-256.
    let mut mac = Hmac::<Sha256>::new_from_slice(secret)
        .unwrap_or_else(|_| Hmac::<Sha256>::new_from_slice(b"default").expect("hmac"));
    mac.update(message.as_bytes());
    hex::encode(mac.finalize().into_bytes())
}

/// Lower-hex SHA-256 digest of a payload.
pub fn sha256_hex(payload: &[u8]) -> String {
    hex::encode(Sha256::digest(payload))
}

/// Verify a received batch signature (receiver side).
pub fn verify_signature(
    secret: &[u8],
    timestamp_millis: i64,
    payload: &[u8],
    signature_hex: &str,
) -> bool {
    let message = format!("{}{}", timestamp_millis, sha256_hex(payload));

    let Ok(signature) = hex::decode(signature_hex) else {
        return false;
    };

    let mut mac = Hmac::<Sha256>::new_from_slice(secret)
        .unwrap_or_else(|_| Hmac::<Sha256>::new_from_slice(b"default").expect("hmac"));
    mac.update(message.as_bytes());

    mac.verify_slice(&signature).is_ok()
}

/// Basic timestamp freshness check for receivers.
pub fn is_timestamp_fresh(timestamp_millis: i64, now_millis: i64, max_age_millis: i64) -> bool {
    if now_millis >= timestamp_millis {
        now_millis - timestamp_millis <= max_age_millis
    } else {
        false
    }
}
