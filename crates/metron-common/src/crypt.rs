//! RSA PKCS#1 v1.5 encryption of report bodies.
//!
//! Bodies longer than one RSA block are split into `k - 11` byte chunks and
//! the resulting `k` byte ciphertext blocks are concatenated, where `k` is the
//! modulus size in bytes.

use std::path::Path;

use rsa::pkcs1::{
    DecodeRsaPrivateKey, DecodeRsaPublicKey, EncodeRsaPrivateKey, EncodeRsaPublicKey, LineEnding,
};
use rsa::pkcs8::{DecodePrivateKey, DecodePublicKey};
use rsa::traits::PublicKeyParts;
use rsa::{Pkcs1v15Encrypt, RsaPrivateKey, RsaPublicKey};

use crate::error::PayloadError;

const PKCS1_PADDING: usize = 11;

pub const DEFAULT_KEY_BITS: usize = 2048;

/// Parse a public key in either PKCS#1 (`RSA PUBLIC KEY`) or SPKI
/// (`PUBLIC KEY`) PEM form.
pub fn parse_public_key(pem: &str) -> Result<RsaPublicKey, PayloadError> {
    RsaPublicKey::from_pkcs1_pem(pem)
        .or_else(|_| RsaPublicKey::from_public_key_pem(pem))
        .map_err(|e| PayloadError::Key(format!("invalid public key: {e}")))
}

/// Parse a private key in either PKCS#1 or PKCS#8 PEM form.
pub fn parse_private_key(pem: &str) -> Result<RsaPrivateKey, PayloadError> {
    RsaPrivateKey::from_pkcs1_pem(pem)
        .or_else(|_| RsaPrivateKey::from_pkcs8_pem(pem))
        .map_err(|e| PayloadError::Key(format!("invalid private key: {e}")))
}

pub fn read_public_key(path: impl AsRef<Path>) -> Result<RsaPublicKey, PayloadError> {
    parse_public_key(&std::fs::read_to_string(path)?)
}

pub fn read_private_key(path: impl AsRef<Path>) -> Result<RsaPrivateKey, PayloadError> {
    parse_private_key(&std::fs::read_to_string(path)?)
}

pub fn encrypt(key: &RsaPublicKey, plaintext: &[u8]) -> Result<Vec<u8>, PayloadError> {
    let block = key.size();
    let chunk = block
        .checked_sub(PKCS1_PADDING)
        .filter(|c| *c > 0)
        .ok_or_else(|| PayloadError::Key(format!("key too small: {block} bytes")))?;

    let mut rng = rand::thread_rng();
    let mut out = Vec::with_capacity(plaintext.len().div_ceil(chunk) * block);
    for part in plaintext.chunks(chunk) {
        out.extend(key.encrypt(&mut rng, Pkcs1v15Encrypt, part)?);
    }
    Ok(out)
}

pub fn decrypt(key: &RsaPrivateKey, ciphertext: &[u8]) -> Result<Vec<u8>, PayloadError> {
    let block = key.size();
    if ciphertext.len() % block != 0 {
        return Err(PayloadError::Crypto(format!(
            "ciphertext length {} is not a multiple of the {block} byte block",
            ciphertext.len()
        )));
    }
    let mut out = Vec::with_capacity(ciphertext.len());
    for part in ciphertext.chunks(block) {
        out.extend(key.decrypt(Pkcs1v15Encrypt, part)?);
    }
    Ok(out)
}

/// PEM-encoded key pair, both halves in PKCS#1 form.
pub struct KeyPair {
    pub private_pem: String,
    pub public_pem: String,
}

pub fn generate_keypair(bits: usize) -> Result<KeyPair, PayloadError> {
    let private = RsaPrivateKey::new(&mut rand::thread_rng(), bits)?;
    let public = RsaPublicKey::from(&private);
    let private_pem = private
        .to_pkcs1_pem(LineEnding::LF)
        .map_err(|e| PayloadError::Key(e.to_string()))?
        .to_string();
    let public_pem = public
        .to_pkcs1_pem(LineEnding::LF)
        .map_err(|e| PayloadError::Key(e.to_string()))?;
    Ok(KeyPair { private_pem, public_pem })
}
