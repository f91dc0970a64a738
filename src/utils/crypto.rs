use ring::digest::{Context, SHA256};
use ripemd::{Digest as RipemdDigest, Ripemd160};
use secp256k1::ecdsa::Signature;
use secp256k1::{Message, PublicKey, Secp256k1, SecretKey};

use crate::error::{ChainError, Result};
use std::time::{SystemTime, UNIX_EPOCH};

pub fn current_timestamp() -> Result<i64> {
    let duration = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_err(|e| ChainError::Crypto(format!("System time error: {e}")))?
        .as_secs();

    // Ensure the timestamp fits in i64
    if duration > i64::MAX as u64 {
        return Err(ChainError::Crypto("Timestamp overflow".to_string()));
    }

    Ok(duration as i64)
}

pub fn sha256_digest(data: &[u8]) -> Vec<u8> {
    let mut context = Context::new(&SHA256);
    context.update(data);
    let digest = context.finish();
    digest.as_ref().to_vec()
}

/// Double SHA-256, the hash used for Merkle tree nodes.
pub fn sha256d_digest(data: &[u8]) -> Vec<u8> {
    sha256_digest(sha256_digest(data).as_slice())
}

pub fn ripemd160_digest(data: &[u8]) -> Vec<u8> {
    let mut hasher = Ripemd160::new();
    hasher.update(data);
    hasher.finalize().to_vec()
}

pub fn base58_encode(data: &[u8]) -> String {
    bs58::encode(data).into_string()
}

pub fn base58_decode(data: &str) -> Result<Vec<u8>> {
    bs58::decode(data)
        .into_vec()
        .map_err(|e| ChainError::Format(format!("Invalid base58 encoding: {e}")))
}

/// Generate a fresh secp256k1 keypair.
pub fn new_keypair() -> (SecretKey, PublicKey) {
    let secp = Secp256k1::new();
    secp.generate_keypair(&mut rand::thread_rng())
}

/// Sign a 32-byte digest with ECDSA over secp256k1, DER-encoded.
pub fn ecdsa_sign_digest(secret_key: &SecretKey, digest: &[u8]) -> Result<Vec<u8>> {
    let secp = Secp256k1::new();
    let message = Message::from_digest_slice(digest)
        .map_err(|e| ChainError::Crypto(format!("Invalid signing digest: {e}")))?;
    let signature = secp.sign_ecdsa(&message, secret_key);
    Ok(signature.serialize_der().to_vec())
}

/// Verify a DER-encoded ECDSA signature over a 32-byte digest.
pub fn ecdsa_verify_digest(public_key: &[u8], digest: &[u8], signature: &[u8]) -> bool {
    let secp = Secp256k1::verification_only();
    let public_key = match PublicKey::from_slice(public_key) {
        Ok(pk) => pk,
        Err(_) => return false,
    };
    let message = match Message::from_digest_slice(digest) {
        Ok(m) => m,
        Err(_) => return false,
    };
    let signature = match Signature::from_der(signature) {
        Ok(s) => s,
        Err(_) => return false,
    };
    secp.verify_ecdsa(&message, &signature, &public_key).is_ok()
}
