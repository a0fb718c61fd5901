//! HMAC-SHA256 signing of report bodies and individual records.

use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::error::PayloadError;
use crate::types::MetricRecord;

type HmacSha256 = Hmac<Sha256>;

fn mac(key: &[u8], data: &[u8]) -> Result<HmacSha256, PayloadError> {
    let mut mac = HmacSha256::new_from_slice(key).map_err(|e| PayloadError::Key(e.to_string()))?;
    mac.update(data);
    Ok(mac)
}

/// Hex-encoded HMAC-SHA256 of `data`.
pub fn sign(key: &[u8], data: &[u8]) -> Result<String, PayloadError> {
    Ok(hex::encode(mac(key, data)?.finalize().into_bytes()))
}

/// Check a hex signature in constant time.
pub fn verify(key: &[u8], data: &[u8], signature: &str) -> Result<(), PayloadError> {
    let expected = hex::decode(signature.trim()).map_err(|_| PayloadError::Signature)?;
    mac(key, data)?
        .verify_slice(&expected)
        .map_err(|_| PayloadError::Signature)
}

pub fn record_hash(key: &[u8], record: &MetricRecord) -> Result<String, PayloadError> {
    sign(key, record.hash_input().as_bytes())
}
