//! Stripe webhook signature verification.

use std::time::Duration;

use chrono::{DateTime, Utc};

use super::client::StripeError;
use crate::crypto::{constant_time_eq, hmac_sha256_hex};

/// Verify a `Stripe-Signature` header against the raw request body.
///
/// The header has the form `t=<unix>,v1=<hex>[,v1=<hex>...]`. The expected
/// signature is `hex(HMAC-SHA256(secret, "<t>.<body>"))`; any `v1` entry may
/// match. Signatures older than `tolerance` are rejected to limit replays.
pub fn verify_signature(
    payload: &str,
    header: &str,
    secret: &str,
    tolerance: Duration,
    now: DateTime<Utc>,
) -> Result<(), StripeError> {
    let mut timestamp: Option<&str> = None;
    let mut signatures: Vec<&str> = Vec::new();

    for part in header.split(',') {
        match part.trim().split_once('=') {
            Some(("t", ts)) => timestamp = Some(ts),
            Some(("v1", sig)) => signatures.push(sig),
            _ => {}
        }
    }

    let timestamp = timestamp.ok_or(StripeError::InvalidSignature)?;
    let signed_at: i64 = timestamp
        .parse()
        .map_err(|_| StripeError::InvalidSignature)?;

    if signatures.is_empty() {
        return Err(StripeError::InvalidSignature);
    }

    let tolerance = i64::try_from(tolerance.as_secs()).unwrap_or(i64::MAX);
    if now.timestamp().saturating_sub(signed_at) > tolerance {
        return Err(StripeError::StaleSignature);
    }

    let expected = hmac_sha256_hex(secret, &format!("{timestamp}.{payload}"))
        .ok_or(StripeError::InvalidSignature)?;

    if signatures.iter().any(|sig| constant_time_eq(&expected, sig)) {
        Ok(())
    } else {
        Err(StripeError::InvalidSignature)
    }
}
