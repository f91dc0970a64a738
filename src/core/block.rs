use crate::core::fractal;
use crate::core::{MerkleTree, Transaction};
use crate::error::{ChainError, Result};
use crate::utils::{deserialize, serialize, sha256_digest};
use data_encoding::HEXLOWER;
use serde::{Deserialize, Serialize};

/// Previous hash carried by the genesis block
pub const GENESIS_PREV_HASH: &str =
    "0000000000000000000000000000000000000000000000000000000000000000";

/// Fixed genesis timestamp, part of the network constants
pub const GENESIS_TIMESTAMP: i64 = 1_700_000_000;

/// Fixed seed material for the genesis fractal, part of the network
/// constants
const GENESIS_SEED_TAG: &[u8] = b"fractal-chain-genesis";

/// Upper bound on a block's serialized size (1 MB)
pub const MAX_BLOCK_BYTES: usize = 1_000_000;

/// Blocks may run at most this far ahead of local wall-clock time (2 h)
pub const MAX_TIMESTAMP_DRIFT: i64 = 7_200;

#[derive(Debug, Clone, Serialize, Deserialize, bincode::Encode, bincode::Decode)]
pub struct Block {
    index: u64,
    prev_hash: String, // hex, 64 chars
    timestamp: i64,    // seconds
    transactions: Vec<Transaction>, // position 0 = coinbase (empty in genesis)
    merkle_root: String, // hex, 64 chars
    nonce: u64,
    difficulty: u32, // required leading zero bits of the header hash
    fractal_c_re: f64,
    fractal_c_im: f64,
    fractal_dimension: f64, // rounded to 6 decimals
    fractal_seed: String,   // hex, 64 chars
    hash: String,           // block hash over the full serialization
}

impl Block {
    /// Assemble an unsealed candidate. The fractal fields and the block
    /// hash stay empty until the miner seals it.
    pub fn new_candidate(
        index: u64,
        prev_hash: String,
        timestamp: i64,
        transactions: Vec<Transaction>,
        difficulty: u32,
    ) -> Block {
        let merkle_root = Self::merkle_root_of(&transactions);
        Block {
            index,
            prev_hash,
            timestamp,
            transactions,
            merkle_root,
            nonce: 0,
            difficulty,
            fractal_c_re: 0.0,
            fractal_c_im: 0.0,
            fractal_dimension: 0.0,
            fractal_seed: String::new(),
            hash: String::new(),
        }
    }

    /// The deterministic genesis block: empty transaction list, all-zero
    /// Merkle root, fixed fractal constants. Identical on every node of
    /// a network.
    pub fn generate_genesis_block(difficulty: u32) -> Block {
        let seed = sha256_digest(GENESIS_SEED_TAG);
        let (c_re, c_im, dimension) = fractal::dimension_from_seed(&seed, None)
            .expect("Uncancelled fractal render always completes");

        let mut block = Block {
            index: 0,
            prev_hash: String::from(GENESIS_PREV_HASH),
            timestamp: GENESIS_TIMESTAMP,
            transactions: vec![],
            merkle_root: Self::merkle_root_of(&[]),
            nonce: 0,
            difficulty,
            fractal_c_re: c_re,
            fractal_c_im: c_im,
            fractal_dimension: dimension,
            fractal_seed: HEXLOWER.encode(&seed),
            hash: String::new(),
        };
        block.hash = block.compute_block_hash();
        block
    }

    /// Fill in the winning proof-of-work fields and freeze the hash.
    pub fn seal(&mut self, nonce: u64, seed_hex: String, c_re: f64, c_im: f64, dimension: f64) {
        self.nonce = nonce;
        self.fractal_seed = seed_hex;
        self.fractal_c_re = c_re;
        self.fractal_c_im = c_im;
        self.fractal_dimension = dimension;
        self.hash = self.compute_block_hash();
    }

    /// Pre-filter digest over the header fields, nonce included.
    pub fn header_hash_with_nonce(&self, nonce: u64, fractal_seed_hex: &str) -> Vec<u8> {
        let mut data = Vec::new();
        data.extend(self.index.to_be_bytes());
        data.extend(self.prev_hash.as_bytes());
        data.extend(self.timestamp.to_be_bytes());
        data.extend(self.merkle_root.as_bytes());
        data.extend(nonce.to_be_bytes());
        data.extend(self.difficulty.to_be_bytes());
        data.extend(fractal_seed_hex.as_bytes());
        sha256_digest(&data)
    }

    /// Header hash of a sealed block.
    pub fn header_hash(&self) -> Vec<u8> {
        self.header_hash_with_nonce(self.nonce, &self.fractal_seed)
    }

    /// Full block hash: header bytes plus the fractal parameters and
    /// every txid. IEEE-754 bit patterns keep the float fields
    /// deterministic.
    pub fn compute_block_hash(&self) -> String {
        let mut data = self.header_hash();
        data.extend(self.fractal_c_re.to_bits().to_be_bytes());
        data.extend(self.fractal_c_im.to_bits().to_be_bytes());
        data.extend(self.fractal_dimension.to_bits().to_be_bytes());
        for tx in &self.transactions {
            data.extend(tx.get_txid().as_bytes());
        }
        HEXLOWER.encode(&sha256_digest(&data))
    }

    fn merkle_root_of(transactions: &[Transaction]) -> String {
        let txid_hashes: Vec<Vec<u8>> = transactions
            .iter()
            .map(|tx| {
                HEXLOWER
                    .decode(tx.get_txid().as_bytes())
                    .unwrap_or_else(|_| sha256_digest(tx.get_txid().as_bytes()))
            })
            .collect();
        HEXLOWER.encode(&MerkleTree::compute_root(&txid_hashes))
    }

    /// Recompute the Merkle root from the carried transactions and
    /// compare with the stored one.
    pub fn verify_merkle_root(&self) -> bool {
        Self::merkle_root_of(&self.transactions) == self.merkle_root
    }

    /// Recompute the block hash and compare with the stored one.
    pub fn verify_block_hash(&self) -> bool {
        self.compute_block_hash() == self.hash
    }

    pub fn deserialize(bytes: &[u8]) -> Result<Block> {
        deserialize::<Block>(bytes)
    }

    pub fn serialize(&self) -> Result<Vec<u8>> {
        serialize(self)
    }

    /// Serialized size for the 1 MB block cap.
    pub fn serialized_size(&self) -> Result<usize> {
        Ok(self.serialize()?.len())
    }

    pub fn get_index(&self) -> u64 {
        self.index
    }

    pub fn get_prev_hash(&self) -> &str {
        self.prev_hash.as_str()
    }

    pub fn get_timestamp(&self) -> i64 {
        self.timestamp
    }

    pub fn get_transactions(&self) -> &[Transaction] {
        self.transactions.as_slice()
    }

    pub fn get_merkle_root(&self) -> &str {
        self.merkle_root.as_str()
    }

    pub fn get_nonce(&self) -> u64 {
        self.nonce
    }

    pub fn get_difficulty(&self) -> u32 {
        self.difficulty
    }

    pub fn get_fractal_c(&self) -> (f64, f64) {
        (self.fractal_c_re, self.fractal_c_im)
    }

    pub fn get_fractal_dimension(&self) -> f64 {
        self.fractal_dimension
    }

    pub fn get_fractal_seed(&self) -> &str {
        self.fractal_seed.as_str()
    }

    pub fn get_hash(&self) -> &str {
        self.hash.as_str()
    }

    /// The miner's declared address: the coinbase recipient at
    /// position 0. Seed derivation and reward checks both key off it.
    pub fn miner_address(&self) -> Result<&str> {
        let coinbase = self
            .transactions
            .first()
            .filter(|tx| tx.is_coinbase())
            .ok_or_else(|| {
                ChainError::InvalidBlock("Block has no coinbase at position 0".to_string())
            })?;
        Ok(coinbase.get_to_address())
    }

    /// Compact header summary used by the `headers` sync message.
    pub fn header_summary(&self) -> BlockHeader {
        BlockHeader {
            index: self.index,
            hash: self.hash.clone(),
            prev_hash: self.prev_hash.clone(),
            timestamp: self.timestamp,
            merkle_root: self.merkle_root.clone(),
            difficulty: self.difficulty,
        }
    }
}

/// Header-only view exchanged during synchronization.
#[derive(Debug, Clone, Serialize, Deserialize, bincode::Encode, bincode::Decode)]
pub struct BlockHeader {
    pub index: u64,
    pub hash: String,
    pub prev_hash: String,
    pub timestamp: i64,
    pub merkle_root: String,
    pub difficulty: u32,
}
