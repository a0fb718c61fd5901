//! Report batch encoding.
//!
//! The agent serializes a batch to JSON, optionally encrypts it, signs the
//! uncompressed body and finally gzips it. [`PayloadDecoder`] undoes the same
//! steps in reverse on the receiving side.

use std::io::{Read, Write};

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use rsa::{RsaPrivateKey, RsaPublicKey};

use crate::error::PayloadError;
use crate::types::{MetricRecord, MetricWire};
use crate::{crypt, sign};

/// Header carrying the hex HMAC-SHA256 of the uncompressed body.
pub const HASH_HEADER: &str = "HashSHA256";

pub fn gzip(data: &[u8]) -> Result<Vec<u8>, PayloadError> {
    let mut encoder = GzEncoder::new(Vec::with_capacity(data.len() / 2), Compression::default());
    encoder.write_all(data)?;
    Ok(encoder.finish()?)
}

pub fn gunzip(data: &[u8]) -> Result<Vec<u8>, PayloadError> {
    let mut out = Vec::with_capacity(data.len() * 2);
    GzDecoder::new(data).read_to_end(&mut out)?;
    Ok(out)
}

/// A batch ready to send: gzipped body plus the optional `HashSHA256` value.
#[derive(Debug, Clone)]
pub struct EncodedBatch {
    pub body: Vec<u8>,
    pub hash: Option<String>,
    pub records: usize,
}

#[derive(Clone, Default)]
pub struct PayloadEncoder {
    sign_key: Option<Vec<u8>>,
    public_key: Option<RsaPublicKey>,
}

impl PayloadEncoder {
    pub fn new(sign_key: Option<Vec<u8>>, public_key: Option<RsaPublicKey>) -> Self {
        Self {
            sign_key: sign_key.filter(|k| !k.is_empty()),
            public_key,
        }
    }

    pub fn signs(&self) -> bool {
        self.sign_key.is_some()
    }

    /// Build the wire array (sorted by id) without any envelope.
    pub fn to_wire(&self, records: &[MetricRecord]) -> Result<Vec<MetricWire>, PayloadError> {
        let mut sorted: Vec<&MetricRecord> = records.iter().collect();
        sorted.sort_by(|a, b| a.id.cmp(&b.id));

        sorted
            .into_iter()
            .map(|record| {
                let wire = MetricWire::from(record.clone());
                match &self.sign_key {
                    Some(key) => Ok(wire.with_hash(sign::record_hash(key, record)?)),
                    None => Ok(wire),
                }
            })
            .collect()
    }

    pub fn encode(&self, records: &[MetricRecord]) -> Result<EncodedBatch, PayloadError> {
        let wire = self.to_wire(records)?;
        let mut body = serde_json::to_vec(&wire)?;

        if let Some(key) = &self.public_key {
            body = crypt::encrypt(key, &body)?;
        }

        let hash = match &self.sign_key {
            Some(key) => Some(sign::sign(key, &body)?),
            None => None,
        };

        Ok(EncodedBatch {
            body: gzip(&body)?,
            hash,
            records: wire.len(),
        })
    }
}

/// Result of [`PayloadDecoder::decode`]: the plaintext JSON body and, when a
/// signature was checked, the hash computed over the received body.
#[derive(Debug)]
pub struct DecodedPayload {
    pub body: Vec<u8>,
    pub computed_hash: Option<String>,
}

#[derive(Clone, Default)]
pub struct PayloadDecoder {
    sign_key: Option<Vec<u8>>,
    private_key: Option<RsaPrivateKey>,
}

impl PayloadDecoder {
    pub fn new(sign_key: Option<Vec<u8>>, private_key: Option<RsaPrivateKey>) -> Self {
        Self {
            sign_key: sign_key.filter(|k| !k.is_empty()),
            private_key,
        }
    }

    /// True when a signing key or private key is configured.
    pub fn is_active(&self) -> bool {
        self.sign_key.is_some() || self.private_key.is_some()
    }

    /// Gunzip (when `gzipped`), verify `hash` and decrypt.
    ///
    /// A missing `hash` skips verification, as does an empty body.
    pub fn decode(
        &self,
        raw: &[u8],
        gzipped: bool,
        hash: Option<&str>,
    ) -> Result<DecodedPayload, PayloadError> {
        let mut body = if gzipped { gunzip(raw)? } else { raw.to_vec() };

        let mut computed_hash = None;
        if let (Some(key), Some(hash)) = (&self.sign_key, hash) {
            if !body.is_empty() {
                sign::verify(key, &body, hash)?;
                computed_hash = Some(sign::sign(key, &body)?);
            }
        }

        if let Some(key) = &self.private_key {
            if !body.is_empty() {
                body = crypt::decrypt(key, &body)?;
            }
        }

        Ok(DecodedPayload { body, computed_hash })
    }

    /// Check a record's own hash when both a key and a hash are present.
    pub fn check_record(
        &self,
        record: &MetricRecord,
        hash: Option<&str>,
    ) -> Result<(), PayloadError> {
        match (&self.sign_key, hash) {
            (Some(key), Some(hash)) => sign::verify(key, record.hash_input().as_bytes(), hash),
            _ => Ok(()),
        }
    }
}
