pub mod block;
pub mod blockchain;
pub mod difficulty;
pub mod fractal;
pub mod merkle;
pub mod monetary;
pub mod proof_of_work;
pub mod transaction;

pub use block::{Block, BlockHeader, GENESIS_PREV_HASH, MAX_BLOCK_BYTES, MAX_TIMESTAMP_DRIFT};
pub use blockchain::{Blockchain, TxRecord};
pub use difficulty::{DifficultyController, DifficultyState, DifficultyStats};
pub use fractal::FractalBitmap;
pub use merkle::{MerkleProof, MerkleTree, ProofElement};
pub use monetary::{block_reward, format_units, parse_units, UNITS_PER_COIN};
pub use proof_of_work::FractalPow;
pub use transaction::Transaction;
