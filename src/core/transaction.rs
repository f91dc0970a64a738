// Account-model transactions: a transfer debits the sender's balance by
// amount + fee and credits the recipient. The coinbase transaction has an
// empty sender and is only valid at position 0 of a block.

use crate::core::monetary::format_units;
use crate::error::{ChainError, Result};
use crate::utils::{ecdsa_sign_digest, ecdsa_verify_digest, sha256_digest};
use crate::wallet::address_from_public_key;
use data_encoding::HEXLOWER;
use secp256k1::{PublicKey, SecretKey};
use serde::{Deserialize, Serialize};

/// Address length bounds enforced at every boundary
pub const MIN_ADDRESS_LEN: usize = 25;
pub const MAX_ADDRESS_LEN: usize = 64;

#[derive(Debug, Clone, Default, Serialize, Deserialize, bincode::Encode, bincode::Decode)]
pub struct Transaction {
    from_address: String, // empty for coinbase
    to_address: String,
    amount: u64, // base units, 8 fractional digits
    fee: u64,
    timestamp: i64,
    nonce: u64,
    signature: Vec<u8>,  // DER-encoded ECDSA, empty for coinbase
    public_key: Vec<u8>, // SEC1 uncompressed, empty for coinbase
    txid: String,        // hex SHA-256 of the canonical serialization
}

/// The signable fields in canonical (alphabetical) key order. Field
/// declaration order here fixes the JSON key order, so this struct must
/// never be reordered.
#[derive(Serialize)]
struct SigningPayload<'a> {
    amount: String,
    fee: String,
    from_address: &'a str,
    nonce: u64,
    timestamp: i64,
    to_address: &'a str,
}

/// The full canonical serialization that feeds the txid. Same ordering
/// rule as [`SigningPayload`].
#[derive(Serialize)]
struct TxidPayload<'a> {
    amount: String,
    fee: String,
    from_address: &'a str,
    nonce: u64,
    public_key: String,
    signature: String,
    timestamp: i64,
    to_address: &'a str,
}

impl Transaction {
    /// Create an unsigned transfer. `sign` must be called before the
    /// transaction is submitted anywhere.
    pub fn new_transfer(
        from_address: &str,
        to_address: &str,
        amount: u64,
        fee: u64,
        timestamp: i64,
    ) -> Transaction {
        let mut tx = Transaction {
            from_address: from_address.to_string(),
            to_address: to_address.to_string(),
            amount,
            fee,
            timestamp,
            nonce: rand::random::<u64>(),
            signature: vec![],
            public_key: vec![],
            txid: String::new(),
        };
        tx.txid = tx.compute_txid();
        tx
    }

    /// Create the coinbase transaction paying `reward` to the miner.
    pub fn new_coinbase(to_address: &str, reward: u64, timestamp: i64) -> Transaction {
        let mut tx = Transaction {
            from_address: String::new(),
            to_address: to_address.to_string(),
            amount: reward,
            fee: 0,
            timestamp,
            nonce: rand::random::<u64>(),
            signature: vec![],
            public_key: vec![],
            txid: String::new(),
        };
        tx.txid = tx.compute_txid();
        tx
    }

    /// Sign the transaction. The signature covers the SHA-256 digest of
    /// the canonical payload of the non-signature fields; the txid is
    /// recomputed afterwards over the full serialization.
    pub fn sign(&mut self, secret_key: &SecretKey, public_key: &PublicKey) -> Result<()> {
        if self.is_coinbase() {
            return Err(ChainError::Transaction(
                "Coinbase transactions are not signed".to_string(),
            ));
        }

        let digest = self.signing_digest();
        self.signature = ecdsa_sign_digest(secret_key, &digest)?;
        self.public_key = public_key.serialize_uncompressed().to_vec();
        self.txid = self.compute_txid();
        Ok(())
    }

    /// SHA-256 digest of the canonical signable payload.
    pub fn signing_digest(&self) -> Vec<u8> {
        let payload = SigningPayload {
            amount: format_units(self.amount),
            fee: format_units(self.fee),
            from_address: &self.from_address,
            nonce: self.nonce,
            timestamp: self.timestamp,
            to_address: &self.to_address,
        };
        let bytes = serde_json::to_vec(&payload)
            .expect("Canonical payload serialization should never fail");
        sha256_digest(&bytes)
    }

    /// Recompute the txid from the full canonical serialization.
    pub fn compute_txid(&self) -> String {
        let payload = TxidPayload {
            amount: format_units(self.amount),
            fee: format_units(self.fee),
            from_address: &self.from_address,
            nonce: self.nonce,
            public_key: HEXLOWER.encode(&self.public_key),
            signature: HEXLOWER.encode(&self.signature),
            timestamp: self.timestamp,
            to_address: &self.to_address,
        };
        let bytes = serde_json::to_vec(&payload)
            .expect("Canonical payload serialization should never fail");
        HEXLOWER.encode(&sha256_digest(&bytes))
    }

    pub fn is_coinbase(&self) -> bool {
        self.from_address.is_empty()
    }

    /// Format and signature validation; no balance check.
    ///
    /// Used at mempool admission, where the ledger state at inclusion
    /// time is not yet known.
    pub fn validate_stateless(&self) -> Result<()> {
        if !address_in_bounds(&self.to_address) {
            return Err(ChainError::Format(format!(
                "Invalid recipient address: {}",
                self.to_address
            )));
        }

        if self.txid != self.compute_txid() {
            return Err(ChainError::Transaction(
                "Transaction id does not match contents".to_string(),
            ));
        }

        if self.is_coinbase() {
            if !self.signature.is_empty() || !self.public_key.is_empty() {
                return Err(ChainError::Transaction(
                    "Coinbase must carry no signature".to_string(),
                ));
            }
            if self.fee != 0 {
                return Err(ChainError::Transaction(
                    "Coinbase must carry no fee".to_string(),
                ));
            }
            return Ok(());
        }

        if !address_in_bounds(&self.from_address) {
            return Err(ChainError::Format(format!(
                "Invalid sender address: {}",
                self.from_address
            )));
        }

        if self.signature.is_empty() || self.public_key.is_empty() {
            return Err(ChainError::Transaction(
                "Transaction is not signed".to_string(),
            ));
        }

        // The public key must actually hash to the claimed sender address
        let derived = address_from_public_key(&self.public_key)?;
        if derived != self.from_address {
            return Err(ChainError::Transaction(format!(
                "Public key does not match sender address {}",
                self.from_address
            )));
        }

        if !ecdsa_verify_digest(&self.public_key, &self.signing_digest(), &self.signature) {
            return Err(ChainError::Transaction(
                "Signature verification failed".to_string(),
            ));
        }

        Ok(())
    }

    /// Full validation against a balance lookup, as applied inside a
    /// block: the lookup must reflect all earlier transactions of the
    /// same block.
    pub fn validate<F>(&self, get_balance: F) -> Result<()>
    where
        F: Fn(&str) -> u64,
    {
        self.validate_stateless()?;

        if self.is_coinbase() {
            return Ok(());
        }

        let required = self.amount.checked_add(self.fee).ok_or_else(|| {
            ChainError::Transaction("Amount plus fee overflows".to_string())
        })?;
        let available = get_balance(&self.from_address);
        if available < required {
            return Err(ChainError::InsufficientFunds {
                required,
                available,
            });
        }

        Ok(())
    }

    pub fn get_txid(&self) -> &str {
        self.txid.as_str()
    }

    pub fn get_from_address(&self) -> &str {
        self.from_address.as_str()
    }

    pub fn get_to_address(&self) -> &str {
        self.to_address.as_str()
    }

    pub fn get_amount(&self) -> u64 {
        self.amount
    }

    pub fn get_fee(&self) -> u64 {
        self.fee
    }

    pub fn get_timestamp(&self) -> i64 {
        self.timestamp
    }

    pub fn get_nonce(&self) -> u64 {
        self.nonce
    }

    pub fn get_public_key(&self) -> &[u8] {
        self.public_key.as_slice()
    }

    pub fn serialize(&self) -> Result<Vec<u8>> {
        crate::utils::serialize(self)
    }

    pub fn deserialize(bytes: &[u8]) -> Result<Transaction> {
        crate::utils::deserialize(bytes)
    }
}

fn address_in_bounds(address: &str) -> bool {
    (MIN_ADDRESS_LEN..=MAX_ADDRESS_LEN).contains(&address.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::new_keypair;
    use crate::wallet::address_from_public_key;

    fn signed_transfer(amount: u64, fee: u64) -> (Transaction, String) {
        let (secret, public) = new_keypair();
        let from = address_from_public_key(&public.serialize_uncompressed()).unwrap();
        let to = {
            let (_, other) = new_keypair();
            address_from_public_key(&other.serialize_uncompressed()).unwrap()
        };

        let mut tx = Transaction::new_transfer(&from, &to, amount, fee, 1_700_000_000);
        tx.sign(&secret, &public).unwrap();
        (tx, from)
    }

    #[test]
    fn test_signed_transfer_validates() {
        let (tx, from) = signed_transfer(10, 1);
        tx.validate(|addr| if addr == from { 11 } else { 0 }).unwrap();
    }

    #[test]
    fn test_insufficient_balance_rejected() {
        let (tx, from) = signed_transfer(10, 1);
        let result = tx.validate(|addr| if addr == from { 10 } else { 0 });
        assert!(matches!(
            result,
            Err(ChainError::InsufficientFunds { required: 11, .. })
        ));
    }

    #[test]
    fn test_unsigned_transfer_rejected() {
        let (tx, _) = signed_transfer(10, 1);
        let unsigned =
            Transaction::new_transfer(tx.get_from_address(), tx.get_to_address(), 10, 1, 0);
        assert!(unsigned.validate_stateless().is_err());
    }

    #[test]
    fn test_tampered_amount_breaks_txid() {
        let (mut tx, _) = signed_transfer(10, 1);
        tx.amount = 1_000_000;
        assert!(tx.validate_stateless().is_err());
    }

    #[test]
    fn test_tampered_amount_with_fixed_txid_breaks_signature() {
        let (mut tx, _) = signed_transfer(10, 1);
        tx.amount = 1_000_000;
        tx.txid = tx.compute_txid();
        let err = tx.validate_stateless().unwrap_err();
        assert!(matches!(err, ChainError::Transaction(_)));
    }

    #[test]
    fn test_foreign_key_cannot_sign_for_sender() {
        let (tx, _) = signed_transfer(10, 1);
        let (other_secret, other_public) = new_keypair();
        let mut forged = Transaction::new_transfer(
            tx.get_from_address(),
            tx.get_to_address(),
            10,
            1,
            1_700_000_000,
        );
        forged.sign(&other_secret, &other_public).unwrap();
        // Signature is internally valid but the key does not hash to
        // the claimed sender
        assert!(forged.validate_stateless().is_err());
    }

    #[test]
    fn test_coinbase_shape() {
        let coinbase = Transaction::new_coinbase(
            "1A1zP1eP5QGefi2DMPTfTL5SLmv7DivfNa",
            50,
            1_700_000_000,
        );
        assert!(coinbase.is_coinbase());
        coinbase.validate(|_| 0).unwrap();
    }

    #[test]
    fn test_coinbase_with_signature_rejected() {
        let mut coinbase = Transaction::new_coinbase(
            "1A1zP1eP5QGefi2DMPTfTL5SLmv7DivfNa",
            50,
            1_700_000_000,
        );
        coinbase.signature = vec![1, 2, 3];
        coinbase.txid = coinbase.compute_txid();
        assert!(coinbase.validate_stateless().is_err());
    }

    #[test]
    fn test_txids_are_unique_per_nonce() {
        let a = Transaction::new_coinbase("1A1zP1eP5QGefi2DMPTfTL5SLmv7DivfNa", 50, 0);
        let b = Transaction::new_coinbase("1A1zP1eP5QGefi2DMPTfTL5SLmv7DivfNa", 50, 0);
        assert_ne!(a.get_txid(), b.get_txid());
    }

    #[test]
    fn test_serialization_roundtrip() {
        let (tx, _) = signed_transfer(123_456_789, 1_000);
        let bytes = tx.serialize().unwrap();
        let decoded = Transaction::deserialize(&bytes).unwrap();
        assert_eq!(tx.get_txid(), decoded.get_txid());
        assert_eq!(tx.get_amount(), decoded.get_amount());
        decoded.validate_stateless().unwrap();
    }
}
