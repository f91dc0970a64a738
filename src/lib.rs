//! # Fractal Chain
//!
//! A cryptocurrency node built around FractalPoW, a two-stage proof of
//! work: a conventional leading-zero-bit header-hash test followed by a
//! Julia-set render whose box-counting dimension must land within an
//! epsilon of the chain-wide target.
//!
//! ## Layout
//! - `core/`: blocks, transactions, Merkle trees, the fractal engine,
//!   the two-stage miner/verifier, difficulty retargeting, and the
//!   chain manager with its materialized balance ledger
//! - `storage/`: the bounded mempool and sync backfill queue
//! - `network/`: message schema, framing, rate limiting, peer registry,
//!   and the TCP node with its per-peer sync state machine
//! - `wallet/`: secp256k1 keys, base58check addresses, the wallet file
//! - `staking/`: the isolated staking side-ledger
//! - `config/`: environment-backed node configuration
//! - `cli/`: the thin command-line front-end
//!
//! The chain is append-only by design: a block either extends the
//! current tip or is rejected, and every accepted block commits its
//! rows and balance deltas in a single store transaction.

pub mod cli;
pub mod config;
pub mod core;
pub mod error;
pub mod network;
pub mod staking;
pub mod storage;
pub mod utils;
pub mod wallet;

// Re-export commonly used types for convenience
pub use cli::{Command, Opt};
pub use config::{Config, GLOBAL_CONFIG};
pub use core::{
    block_reward, Block, BlockHeader, Blockchain, DifficultyController, DifficultyState,
    FractalPow, MerkleProof, MerkleTree, Transaction, UNITS_PER_COIN,
};
pub use error::{ChainError, Result};
pub use network::{Frame, Message, PeerRegistry, PeerState, RateLimiter, Server};
pub use staking::{StakePosition, StakingLedger};
pub use storage::{BlockInTransit, MemoryPool};
pub use wallet::{address_from_public_key, validate_address, Wallet, WalletStore};
