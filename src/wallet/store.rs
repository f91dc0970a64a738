use crate::error::{ChainError, Result};
use crate::wallet::Wallet;
use data_encoding::HEXLOWER;
use secp256k1::{PublicKey, SecretKey};
use std::collections::BTreeMap;
use std::env::current_dir;
use std::fs;
use std::path::{Path, PathBuf};

pub const WALLET_FILE: &str = "wallet.json";

/// On-disk wallet collection.
///
/// The file holds one hex-encoded secret key per address; public keys
/// and addresses are derived state and are re-derived on load, so a
/// record whose key no longer hashes to its address is treated as
/// corruption rather than silently skipped. A missing file is just an
/// empty store.
#[derive(Debug)]
pub struct WalletStore {
    path: PathBuf,
    wallets: BTreeMap<String, Wallet>,
}

impl WalletStore {
    pub fn open_default() -> Result<WalletStore> {
        Self::open(&current_dir()?.join(WALLET_FILE))
    }

    pub fn open(path: &Path) -> Result<WalletStore> {
        let mut wallets = BTreeMap::new();

        if path.exists() {
            let bytes = fs::read(path)
                .map_err(|e| ChainError::Wallet(format!("Failed to read wallet file: {e}")))?;
            let records: BTreeMap<String, String> = serde_json::from_slice(&bytes)
                .map_err(|e| ChainError::Wallet(format!("Malformed wallet file: {e}")))?;

            for (address, secret_hex) in records {
                let secret = HEXLOWER.decode(secret_hex.as_bytes()).map_err(|e| {
                    ChainError::Wallet(format!("Wallet entry {address} is not valid hex: {e}"))
                })?;
                let wallet = Wallet::from_secret_bytes(&secret)?;
                if wallet.get_address() != address {
                    return Err(ChainError::Wallet(format!(
                        "Stored key does not derive address {address}"
                    )));
                }
                wallets.insert(address, wallet);
            }
        }

        Ok(WalletStore {
            path: path.to_path_buf(),
            wallets,
        })
    }

    /// Generate a wallet, persist the store, and return its address.
    pub fn create_wallet(&mut self) -> Result<String> {
        let wallet = Wallet::new();
        let address = wallet.get_address();
        self.wallets.insert(address.clone(), wallet);
        self.save()?;
        Ok(address)
    }

    /// All addresses, sorted.
    pub fn addresses(&self) -> Vec<String> {
        self.wallets.keys().cloned().collect()
    }

    pub fn get(&self, address: &str) -> Option<&Wallet> {
        self.wallets.get(address)
    }

    pub fn len(&self) -> usize {
        self.wallets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.wallets.is_empty()
    }

    /// The keypair that signs transfers from `address`.
    pub fn signing_keys(&self, address: &str) -> Result<(SecretKey, PublicKey)> {
        self.wallets
            .get(address)
            .ok_or_else(|| ChainError::Wallet(format!("No local wallet for address {address}")))?
            .keypair()
    }

    fn save(&self) -> Result<()> {
        let records: BTreeMap<&str, String> = self
            .wallets
            .iter()
            .map(|(address, wallet)| {
                (address.as_str(), HEXLOWER.encode(wallet.secret_key_bytes()))
            })
            .collect();
        let bytes = serde_json::to_vec_pretty(&records)
            .map_err(|e| ChainError::Wallet(format!("Failed to encode wallet file: {e}")))?;
        fs::write(&self.path, bytes)
            .map_err(|e| ChainError::Wallet(format!("Failed to write wallet file: {e}")))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::{ecdsa_sign_digest, ecdsa_verify_digest, sha256_digest};
    use tempfile::TempDir;

    fn open_store() -> (WalletStore, TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let store = WalletStore::open(&dir.path().join(WALLET_FILE)).unwrap();
        (store, dir)
    }

    #[test]
    fn test_missing_file_is_empty_store() {
        let (store, _dir) = open_store();
        assert!(store.is_empty());
        assert!(store.addresses().is_empty());
    }

    #[test]
    fn test_wallets_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(WALLET_FILE);

        let (first, second) = {
            let mut store = WalletStore::open(&path).unwrap();
            (store.create_wallet().unwrap(), store.create_wallet().unwrap())
        };

        let store = WalletStore::open(&path).unwrap();
        assert_eq!(store.len(), 2);
        assert!(store.get(&first).is_some());
        assert_eq!(store.get(&second).unwrap().get_address(), second);

        // Addresses come back sorted regardless of creation order
        let mut expected = vec![first, second];
        expected.sort();
        assert_eq!(store.addresses(), expected);
    }

    #[test]
    fn test_signing_keys_sign_for_their_address() {
        let (mut store, _dir) = open_store();
        let address = store.create_wallet().unwrap();

        let (secret, public) = store.signing_keys(&address).unwrap();
        let digest = sha256_digest(b"transfer payload");
        let signature = ecdsa_sign_digest(&secret, &digest).unwrap();
        assert!(ecdsa_verify_digest(
            &public.serialize_uncompressed(),
            &digest,
            &signature
        ));

        assert!(store.signing_keys("unknown-address-000000000000").is_err());
    }

    #[test]
    fn test_malformed_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(WALLET_FILE);
        fs::write(&path, b"not json").unwrap();
        assert!(WalletStore::open(&path).is_err());
    }

    #[test]
    fn test_edited_address_is_detected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(WALLET_FILE);

        let address = {
            let mut store = WalletStore::open(&path).unwrap();
            store.create_wallet().unwrap()
        };

        // Re-key the record to a different address
        let text = fs::read_to_string(&path).unwrap();
        let tampered = text.replace(&address, "1A1zP1eP5QGefi2DMPTfTL5SLmv7DivfNa");
        fs::write(&path, tampered).unwrap();

        let err = WalletStore::open(&path).unwrap_err();
        assert!(matches!(err, ChainError::Wallet(_)));
    }

    #[test]
    fn test_garbage_secret_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(WALLET_FILE);
        fs::write(
            &path,
            br#"{"1A1zP1eP5QGefi2DMPTfTL5SLmv7DivfNa": "zz-not-hex"}"#,
        )
        .unwrap();
        assert!(WalletStore::open(&path).is_err());
    }
}
