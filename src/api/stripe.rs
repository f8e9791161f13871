// src/api/stripe.rs

use std::fmt;

use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Tolerated clock skew between the provider's timestamp and ours.
const TIMESTAMP_TOLERANCE_SECS: i64 = 300;

#[derive(Debug, PartialEq, Eq)]
pub enum SignatureError {
    MalformedHeader,
    TimestampOutOfTolerance,
    Mismatch,
}

impl fmt::Display for SignatureError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SignatureError::MalformedHeader => write!(f, "malformed signature header"),
            SignatureError::TimestampOutOfTolerance => write!(f, "signature timestamp out of tolerance"),
            SignatureError::Mismatch => write!(f, "signature mismatch"),
        }
    }
}

/// Verifies a `Stripe-Signature` header (`t=<unix>,v1=<hex>`) against the
/// raw body: HMAC-SHA256 over `"{t}.{body}"` with the signing secret.
/// Comparison is constant-time via the hmac crate.
pub fn verify_signature(
    secret: &str,
    payload: &[u8],
    signature_header: &str,
    now_unix: i64,
) -> Result<(), SignatureError> {
    let mut timestamp: Option<i64> = None;
    let mut v1: Option<&str> = None;

    for part in signature_header.split(',') {
        match part.trim().split_once('=') {
            Some(("t", value)) => timestamp = value.parse().ok(),
            Some(("v1", value)) => v1 = Some(value),
            _ => {}
        }
    }

    let timestamp = timestamp.ok_or(SignatureError::MalformedHeader)?;
    let v1 = v1.ok_or(SignatureError::MalformedHeader)?;

    if (now_unix - timestamp).abs() > TIMESTAMP_TOLERANCE_SECS {
        return Err(SignatureError::TimestampOutOfTolerance);
    }

    let expected = hex::decode(v1).map_err(|_| SignatureError::MalformedHeader)?;

    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC can take key of any size");
    mac.update(timestamp.to_string().as_bytes());
    mac.update(b".");
    mac.update(payload);

    mac.verify_slice(&expected)
        .map_err(|_| SignatureError::Mismatch)
}

/// HMAC-SHA256 in hex. Kept public so tests and tooling can produce a
/// valid header for a given body.
pub fn sign_hmac_sha256_hex(secret: &str, data: &str) -> String {
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC can take key of any size");
    mac.update(data.as_bytes());
    hex::encode(mac.finalize().into_bytes())
}
