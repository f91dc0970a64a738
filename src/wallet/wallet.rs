use crate::error::{ChainError, Result};
use crate::utils::{base58_decode, base58_encode, ripemd160_digest, sha256_digest};
use secp256k1::{PublicKey, Secp256k1, SecretKey};

const VERSION: u8 = 0x00;
pub const ADDRESS_CHECK_SUM_LEN: usize = 4;

#[derive(Clone, Debug)]
pub struct Wallet {
    secret_key: Vec<u8>, // 32 bytes
    public_key: Vec<u8>, // SEC1 uncompressed, 65 bytes
}

impl Wallet {
    pub fn new() -> Wallet {
        let (secret_key, public_key) = crate::utils::new_keypair();
        Wallet {
            secret_key: secret_key.secret_bytes().to_vec(),
            public_key: public_key.serialize_uncompressed().to_vec(),
        }
    }

    /// Rebuild a wallet from its stored secret key, re-deriving the
    /// public half.
    pub fn from_secret_bytes(secret: &[u8]) -> Result<Wallet> {
        let secret_key = SecretKey::from_slice(secret)
            .map_err(|e| ChainError::Wallet(format!("Invalid secret key: {e}")))?;
        let public_key = PublicKey::from_secret_key(&Secp256k1::new(), &secret_key);
        Ok(Wallet {
            secret_key: secret.to_vec(),
            public_key: public_key.serialize_uncompressed().to_vec(),
        })
    }

    pub fn get_address(&self) -> String {
        address_from_public_key(&self.public_key)
            .expect("Wallet always holds a well-formed public key")
    }

    pub fn get_public_key(&self) -> &[u8] {
        self.public_key.as_slice()
    }

    pub fn secret_key_bytes(&self) -> &[u8] {
        self.secret_key.as_slice()
    }

    /// Typed keypair for signing.
    pub fn keypair(&self) -> Result<(SecretKey, PublicKey)> {
        let secret = SecretKey::from_slice(&self.secret_key)
            .map_err(|e| ChainError::Wallet(format!("Stored secret key is invalid: {e}")))?;
        let public = PublicKey::from_slice(&self.public_key)
            .map_err(|e| ChainError::Wallet(format!("Stored public key is invalid: {e}")))?;
        Ok((secret, public))
    }
}

impl Default for Wallet {
    fn default() -> Self {
        Self::new()
    }
}

/// ripemd160(sha256(public_key)), the payload of every address.
pub fn hash_public_key(public_key: &[u8]) -> Vec<u8> {
    ripemd160_digest(sha256_digest(public_key).as_slice())
}

/// Base58check address: version byte, public key hash, 4-byte checksum.
pub fn address_from_public_key(public_key: &[u8]) -> Result<String> {
    if public_key.len() != 65 || public_key[0] != 0x04 {
        return Err(ChainError::Format(
            "Public key must be SEC1 uncompressed".to_string(),
        ));
    }
    let mut payload: Vec<u8> = vec![VERSION];
    payload.extend(hash_public_key(public_key));
    let checksum = checksum(payload.as_slice());
    payload.extend(checksum.as_slice());
    Ok(base58_encode(payload.as_slice()))
}

fn checksum(payload: &[u8]) -> Vec<u8> {
    let first_sha = sha256_digest(payload);
    let second_sha = sha256_digest(first_sha.as_slice());
    second_sha[0..ADDRESS_CHECK_SUM_LEN].to_vec()
}

pub fn validate_address(address: &str) -> bool {
    let payload = match base58_decode(address) {
        Ok(payload) => payload,
        Err(_) => return false,
    };

    if payload.len() < ADDRESS_CHECK_SUM_LEN + 1 {
        return false;
    }

    let actual_checksum = payload[payload.len() - ADDRESS_CHECK_SUM_LEN..].to_vec();
    let version = payload[0];
    let public_key_hash = payload[1..payload.len() - ADDRESS_CHECK_SUM_LEN].to_vec();

    let mut target_vec = vec![version];
    target_vec.extend(public_key_hash);
    let target_checksum = checksum(target_vec.as_slice());
    actual_checksum.eq(target_checksum.as_slice())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_wallet_address_validates() {
        let wallet = Wallet::new();
        let address = wallet.get_address();
        assert!(validate_address(&address));
        assert!(address.len() >= 25 && address.len() <= 64);
    }

    #[test]
    fn test_address_is_stable_for_key() {
        let wallet = Wallet::new();
        assert_eq!(wallet.get_address(), wallet.get_address());
        assert_eq!(
            wallet.get_address(),
            address_from_public_key(wallet.get_public_key()).unwrap()
        );
    }

    #[test]
    fn test_tampered_address_fails_checksum() {
        let wallet = Wallet::new();
        let mut address = wallet.get_address();
        // Flip a character in the middle of the payload
        let replacement = if address.chars().nth(10) == Some('2') {
            '3'
        } else {
            '2'
        };
        let mut chars: Vec<char> = address.chars().collect();
        chars[10] = replacement;
        address = chars.into_iter().collect();
        assert!(!validate_address(&address));
    }

    #[test]
    fn test_garbage_address_rejected() {
        assert!(!validate_address("not-base58-0OIl"));
        assert!(!validate_address(""));
        assert!(!validate_address("abc"));
    }

    #[test]
    fn test_compressed_key_rejected() {
        let wallet = Wallet::new();
        let (_, public) = wallet.keypair().unwrap();
        assert!(address_from_public_key(&public.serialize()).is_err());
    }

    #[test]
    fn test_rebuild_from_secret_matches_original() {
        let wallet = Wallet::new();
        let rebuilt = Wallet::from_secret_bytes(wallet.secret_key_bytes()).unwrap();
        assert_eq!(rebuilt.get_address(), wallet.get_address());
        assert_eq!(rebuilt.get_public_key(), wallet.get_public_key());

        assert!(Wallet::from_secret_bytes(&[0u8; 32]).is_err());
        assert!(Wallet::from_secret_bytes(&[1, 2, 3]).is_err());
    }

    #[test]
    fn test_keypair_roundtrip() {
        let wallet = Wallet::new();
        let (secret, public) = wallet.keypair().unwrap();
        let digest = sha256_digest(b"message");
        let sig = crate::utils::ecdsa_sign_digest(&secret, &digest).unwrap();
        assert!(crate::utils::ecdsa_verify_digest(
            &public.serialize_uncompressed(),
            &digest,
            &sig
        ));
    }
}
