// Chain manager and balance ledger. All chain mutations funnel through
// add_block under a single writer lock; every block commits its row,
// its transaction rows, and the balance deltas in one sled transaction,
// so a crash can never leave the ledger half-applied. The chain is
// append-only: a block either extends the current tip or is rejected.

use crate::config::GLOBAL_CONFIG;
use crate::core::difficulty::{DifficultyController, DifficultyState, RETARGET_INTERVAL};
use crate::core::monetary::block_reward;
use crate::core::proof_of_work::FractalPow;
use crate::core::{difficulty, Block, BlockHeader, Transaction, MAX_BLOCK_BYTES};
use crate::core::block::MAX_TIMESTAMP_DRIFT;
use crate::error::{ChainError, Result};
use crate::storage::MemoryPool;
use crate::utils::{current_timestamp, deserialize, serialize};
use log::info;
use sled::transaction::TransactionError;
use sled::{Db, Transactional, Tree};
use std::collections::{HashMap, HashSet};
use std::env::current_dir;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, RwLock};

const BLOCKS_TREE: &str = "blocks";
const HEIGHTS_TREE: &str = "heights";
const BALANCES_TREE: &str = "balances";
const TRANSACTIONS_TREE: &str = "transactions";
const META_TREE: &str = "meta";

const TIP_HASH_KEY: &str = "tip_hash";
const HEIGHT_KEY: &str = "height";
const HEADER_BITS_KEY: &str = "header_bits";
const EPSILON_KEY: &str = "epsilon";

/// A transaction row: where in the chain a txid landed.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize, bincode::Encode, bincode::Decode)]
pub struct TxRecord {
    pub block_index: u64,
    pub position: u32,
    pub transaction: Transaction,
}

#[derive(Clone)]
pub struct Blockchain {
    tip_hash: Arc<RwLock<String>>,
    difficulty: Arc<RwLock<DifficultyState>>,
    mempool: Arc<MemoryPool>,
    // Serializes add_block so chain applies are totally ordered
    apply_lock: Arc<Mutex<()>>,
    db: Db,
    db_path: PathBuf,
}

impl Blockchain {
    /// Open the chain at the default data directory, creating the
    /// genesis block on an empty store.
    pub fn open_default() -> Result<Blockchain> {
        Self::open_with_path(&Self::default_db_path()?)
    }

    /// Open the chain for a specific node id (isolated database per
    /// node on one machine).
    pub fn open_with_node_id(node_id: &str) -> Result<Blockchain> {
        let db_path = current_dir()?
            .join(GLOBAL_CONFIG.get_data_dir())
            .join(format!("node_{node_id}"))
            .to_string_lossy()
            .to_string();
        Self::open_with_path(&db_path)
    }

    fn default_db_path() -> Result<String> {
        Ok(current_dir()?
            .join(GLOBAL_CONFIG.get_data_dir())
            .to_string_lossy()
            .to_string())
    }

    /// Open (or initialize) the chain at an explicit path. An empty
    /// store gets the deterministic genesis block; an existing store is
    /// integrity-checked before use.
    pub fn open_with_path(db_path: &str) -> Result<Blockchain> {
        let path = PathBuf::from(db_path);
        let db = sled::open(&path)
            .map_err(|e| ChainError::Database(format!("Failed to open database: {e}")))?;

        let meta_tree = open_tree(&db, META_TREE)?;
        let tip = meta_tree
            .get(TIP_HASH_KEY)
            .map_err(|e| ChainError::Database(format!("Failed to read tip hash: {e}")))?;

        let (tip_hash, state) = match tip {
            Some(bytes) => {
                let tip_hash = String::from_utf8(bytes.to_vec()).map_err(|e| {
                    ChainError::Corruption(format!("Tip hash is not valid UTF-8: {e}"))
                })?;
                let state = Self::load_difficulty(&meta_tree)?;
                (tip_hash, state)
            }
            None => {
                info!("Empty store, writing genesis block");
                let state = DifficultyState::default();
                let genesis = Block::generate_genesis_block(state.header_bits);
                Self::commit_genesis(&db, &genesis, state)?;
                (genesis.get_hash().to_string(), state)
            }
        };

        let blockchain = Blockchain {
            tip_hash: Arc::new(RwLock::new(tip_hash)),
            difficulty: Arc::new(RwLock::new(state)),
            mempool: Arc::new(MemoryPool::new()),
            apply_lock: Arc::new(Mutex::new(())),
            db,
            db_path: path,
        };

        blockchain.verify_chain_integrity()?;
        Ok(blockchain)
    }

    fn commit_genesis(db: &Db, genesis: &Block, state: DifficultyState) -> Result<()> {
        let blocks_tree = open_tree(db, BLOCKS_TREE)?;
        let heights_tree = open_tree(db, HEIGHTS_TREE)?;
        let meta_tree = open_tree(db, META_TREE)?;

        let block_bytes = genesis.serialize()?;
        let hash = genesis.get_hash().to_string();

        (&blocks_tree, &heights_tree, &meta_tree)
            .transaction(|(blocks, heights, meta)| {
                blocks.insert(hash.as_bytes(), block_bytes.as_slice())?;
                heights.insert(0u64.to_be_bytes().to_vec(), hash.as_bytes())?;
                meta.insert(TIP_HASH_KEY, hash.as_bytes())?;
                meta.insert(HEIGHT_KEY, 0u64.to_be_bytes().to_vec())?;
                meta.insert(HEADER_BITS_KEY, state.header_bits.to_be_bytes().to_vec())?;
                meta.insert(EPSILON_KEY, state.epsilon.to_bits().to_be_bytes().to_vec())?;
                Ok(())
            })
            .map_err(|e: TransactionError| {
                ChainError::Database(format!("Failed to commit genesis: {e}"))
            })?;
        Ok(())
    }

    fn load_difficulty(meta_tree: &Tree) -> Result<DifficultyState> {
        let bits = meta_tree
            .get(HEADER_BITS_KEY)?
            .ok_or_else(|| ChainError::Corruption("Missing header bits in meta".to_string()))?;
        let epsilon = meta_tree
            .get(EPSILON_KEY)?
            .ok_or_else(|| ChainError::Corruption("Missing epsilon in meta".to_string()))?;

        let bits = u32::from_be_bytes(
            bits.as_ref()
                .try_into()
                .map_err(|_| ChainError::Corruption("Malformed header bits".to_string()))?,
        );
        let epsilon = f64::from_bits(u64::from_be_bytes(
            epsilon
                .as_ref()
                .try_into()
                .map_err(|_| ChainError::Corruption("Malformed epsilon".to_string()))?,
        ));

        Ok(DifficultyState {
            header_bits: bits,
            epsilon,
        })
    }

    /// Walk the stored chain tip-to-genesis and verify the hash links.
    /// A broken link means corrupted committed state, which is fatal.
    pub fn verify_chain_integrity(&self) -> Result<()> {
        let height = self.height()?;
        let mut expected_hash = self.get_tip_hash();

        for index in (0..=height).rev() {
            let block = self.get_block_by_index(index)?.ok_or_else(|| {
                ChainError::Corruption(format!("Missing block at height {index}"))
            })?;
            if block.get_hash() != expected_hash {
                return Err(ChainError::Corruption(format!(
                    "Hash chain broken at height {index}"
                )));
            }
            if !block.verify_block_hash() {
                return Err(ChainError::Corruption(format!(
                    "Stored block {index} fails its own hash"
                )));
            }
            expected_hash = block.get_prev_hash().to_string();
        }

        Ok(())
    }

    pub fn get_db(&self) -> &Db {
        &self.db
    }

    pub fn get_db_path(&self) -> &PathBuf {
        &self.db_path
    }

    pub fn mempool(&self) -> &MemoryPool {
        &self.mempool
    }

    pub fn get_tip_hash(&self) -> String {
        self.tip_hash
            .read()
            .expect("Failed to acquire read lock on tip_hash - this should never happen")
            .clone()
    }

    fn set_tip_hash(&self, new_tip_hash: &str) {
        let mut tip_hash = self
            .tip_hash
            .write()
            .expect("Failed to acquire write lock on tip_hash - this should never happen");
        *tip_hash = String::from(new_tip_hash)
    }

    pub fn difficulty_state(&self) -> DifficultyState {
        *self
            .difficulty
            .read()
            .expect("Failed to acquire read lock on difficulty - this should never happen")
    }

    fn set_difficulty_state(&self, state: DifficultyState) {
        let mut difficulty = self
            .difficulty
            .write()
            .expect("Failed to acquire write lock on difficulty - this should never happen");
        *difficulty = state;
    }

    /// Override both difficulty actuators for this process. Meant for
    /// devnets and test harnesses where mainnet parameters would make
    /// mining impractical; the next committed block persists the
    /// override.
    pub fn override_difficulty_state(&self, state: DifficultyState) {
        self.set_difficulty_state(state);
    }

    pub fn tip(&self) -> Result<Block> {
        self.get_block_by_hash(&self.get_tip_hash())?
            .ok_or_else(|| ChainError::Corruption("Tip block missing from store".to_string()))
    }

    pub fn height(&self) -> Result<u64> {
        let meta_tree = open_tree(&self.db, META_TREE)?;
        let bytes = meta_tree
            .get(HEIGHT_KEY)?
            .ok_or_else(|| ChainError::Corruption("Missing height in meta".to_string()))?;
        Ok(u64::from_be_bytes(bytes.as_ref().try_into().map_err(
            |_| ChainError::Corruption("Malformed height in meta".to_string()),
        )?))
    }

    pub fn get_block_by_hash(&self, block_hash: &str) -> Result<Option<Block>> {
        let blocks_tree = open_tree(&self.db, BLOCKS_TREE)?;
        match blocks_tree
            .get(block_hash)
            .map_err(|e| ChainError::Database(format!("Failed to get block: {e}")))?
        {
            Some(bytes) => Ok(Some(Block::deserialize(bytes.as_ref())?)),
            None => Ok(None),
        }
    }

    pub fn get_block_by_index(&self, index: u64) -> Result<Option<Block>> {
        let heights_tree = open_tree(&self.db, HEIGHTS_TREE)?;
        let hash = heights_tree
            .get(index.to_be_bytes())
            .map_err(|e| ChainError::Database(format!("Failed to get block hash: {e}")))?;
        match hash {
            Some(hash_bytes) => {
                let hash = String::from_utf8(hash_bytes.to_vec()).map_err(|e| {
                    ChainError::Corruption(format!("Block hash is not valid UTF-8: {e}"))
                })?;
                self.get_block_by_hash(&hash)
            }
            None => Ok(None),
        }
    }

    pub fn block_exists(&self, block_hash: &str) -> Result<bool> {
        let blocks_tree = open_tree(&self.db, BLOCKS_TREE)?;
        Ok(blocks_tree
            .get(block_hash)
            .map_err(|e| ChainError::Database(format!("Failed to check block: {e}")))?
            .is_some())
    }

    /// Materialized balance for an address; unknown addresses are zero.
    pub fn get_balance(&self, address: &str) -> Result<u64> {
        let balances_tree = open_tree(&self.db, BALANCES_TREE)?;
        match balances_tree
            .get(address.as_bytes())
            .map_err(|e| ChainError::Database(format!("Failed to get balance: {e}")))?
        {
            Some(bytes) => Ok(u64::from_be_bytes(bytes.as_ref().try_into().map_err(
                |_| ChainError::Corruption(format!("Malformed balance for {address}")),
            )?)),
            None => Ok(0),
        }
    }

    /// Look up a committed transaction and its position.
    pub fn get_transaction(&self, txid: &str) -> Result<Option<TxRecord>> {
        let txs_tree = open_tree(&self.db, TRANSACTIONS_TREE)?;
        match txs_tree
            .get(txid.as_bytes())
            .map_err(|e| ChainError::Database(format!("Failed to get transaction: {e}")))?
        {
            Some(bytes) => Ok(Some(deserialize::<TxRecord>(bytes.as_ref())?)),
            None => Ok(None),
        }
    }

    /// Admit a transaction to the mempool. Only format and signature
    /// are checked here; balance sufficiency is decided at assembly
    /// time against the ledger of that moment.
    pub fn submit_transaction(&self, tx: Transaction) -> Result<()> {
        if tx.is_coinbase() {
            return Err(ChainError::Transaction(
                "Coinbase transactions cannot be submitted".to_string(),
            ));
        }
        tx.validate_stateless()?;

        if !crate::core::monetary::is_valid_fee(tx.get_fee()) {
            return Err(ChainError::Transaction(format!(
                "Fee {} exceeds the admission cap",
                tx.get_fee()
            )));
        }

        if self.get_transaction(tx.get_txid())?.is_some() {
            return Err(ChainError::Transaction(format!(
                "Transaction {} already committed",
                tx.get_txid()
            )));
        }

        if !self.mempool.add(tx) {
            return Err(ChainError::Transaction(
                "Mempool rejected the transaction (duplicate, or full of better-paying entries)"
                    .to_string(),
            ));
        }
        Ok(())
    }

    /// Difficulty state that the next block must be mined against.
    /// At a retarget boundary this recomputes both actuators from the
    /// last full window.
    pub fn next_difficulty_state(&self) -> Result<DifficultyState> {
        let current = self.difficulty_state();
        let next_index = self.height()? + 1;

        if !DifficultyController::is_retarget_height(next_index) {
            return Ok(current);
        }

        let window = self.blocks_in_range(next_index - RETARGET_INTERVAL, RETARGET_INTERVAL)?;
        DifficultyController::retarget(&window, current)
    }

    fn blocks_in_range(&self, from_index: u64, count: u64) -> Result<Vec<Block>> {
        let mut blocks = Vec::with_capacity(count as usize);
        for index in from_index..from_index + count {
            match self.get_block_by_index(index)? {
                Some(block) => blocks.push(block),
                None => break,
            }
        }
        Ok(blocks)
    }

    /// Header summaries for the sync protocol.
    pub fn get_headers(&self, from_index: u64, count: u64) -> Result<Vec<BlockHeader>> {
        Ok(self
            .blocks_in_range(from_index, count.min(RETARGET_INTERVAL))?
            .iter()
            .map(|b| b.header_summary())
            .collect())
    }

    /// Assemble a candidate block for the miner: coinbase first, then
    /// mempool transactions in fee order, skipping any that would
    /// overdraft the running ledger, up to the serialized size cap.
    pub fn assemble_candidate(&self, miner_address: &str) -> Result<Block> {
        let parent = self.tip()?;
        let next_index = parent.get_index() + 1;
        let state = self.next_difficulty_state()?;
        let timestamp = current_timestamp()?.max(parent.get_timestamp());

        let mut running = LedgerView::new(self);
        let mut included: Vec<Transaction> = Vec::new();
        let mut seen_txids: HashSet<String> = HashSet::new();
        let mut total_fees: u64 = 0;
        // Leave headroom for the coinbase and block framing
        let mut budget = MAX_BLOCK_BYTES.saturating_sub(4_096);

        for tx in self.mempool.fee_ordered() {
            if seen_txids.contains(tx.get_txid()) {
                continue;
            }
            if self.get_transaction(tx.get_txid())?.is_some() {
                continue;
            }
            let size = tx.serialize()?.len();
            if size > budget {
                continue;
            }
            if tx.validate(|addr| running.balance(addr)).is_err() {
                // Overdrafts stay in the pool; the ledger may cover
                // them once earlier transactions confirm
                continue;
            }

            running.debit(tx.get_from_address(), tx.get_amount() + tx.get_fee());
            running.credit(tx.get_to_address(), tx.get_amount());
            total_fees += tx.get_fee();
            budget -= size;
            seen_txids.insert(tx.get_txid().to_string());
            included.push(tx);
        }

        let reward = block_reward(next_index) + total_fees;
        let coinbase = Transaction::new_coinbase(miner_address, reward, timestamp);

        let mut transactions = vec![coinbase];
        transactions.extend(included);

        info!(
            "Assembled candidate {} with {} transactions ({} fees)",
            next_index,
            transactions.len(),
            total_fees
        );

        Ok(Block::new_candidate(
            next_index,
            parent.get_hash().to_string(),
            timestamp,
            transactions,
            state.header_bits,
        ))
    }

    /// Validate and persist a sealed block, atomically updating the
    /// ledger. Every rejection is fatal for the block; nothing is
    /// retried and no state changes on failure.
    pub fn add_block(&self, block: &Block) -> Result<()> {
        let _guard = self
            .apply_lock
            .lock()
            .expect("Failed to acquire chain apply lock - this should never happen");

        let parent = self.tip()?;

        // Parent linkage; competing or stale tips are rejected outright
        if self.block_exists(block.get_hash())? {
            return Err(ChainError::InvalidBlock(format!(
                "Duplicate block {}",
                block.get_hash()
            )));
        }
        if block.get_index() != parent.get_index() + 1
            || block.get_prev_hash() != parent.get_hash()
        {
            return Err(ChainError::InvalidBlock(format!(
                "Block {} does not extend the current tip",
                block.get_index()
            )));
        }

        // Timestamp window
        let now = current_timestamp()?;
        if block.get_timestamp() < parent.get_timestamp() {
            return Err(ChainError::InvalidBlock(
                "Block timestamp precedes parent".to_string(),
            ));
        }
        if block.get_timestamp() > now + MAX_TIMESTAMP_DRIFT {
            return Err(ChainError::InvalidBlock(
                "Block timestamp too far in the future".to_string(),
            ));
        }

        // Structural checks
        if block.serialized_size()? > MAX_BLOCK_BYTES {
            return Err(ChainError::InvalidBlock("Oversize block".to_string()));
        }
        if !block.verify_block_hash() {
            return Err(ChainError::InvalidBlock(
                "Block hash does not match contents".to_string(),
            ));
        }
        if !block.verify_merkle_root() {
            return Err(ChainError::InvalidBlock(
                "Merkle root does not match transactions".to_string(),
            ));
        }

        // Exactly one coinbase, at position 0
        let transactions = block.get_transactions();
        if transactions.is_empty() || !transactions[0].is_coinbase() {
            return Err(ChainError::InvalidBlock(
                "Block must start with a coinbase".to_string(),
            ));
        }
        if transactions.iter().skip(1).any(|tx| tx.is_coinbase()) {
            return Err(ChainError::InvalidBlock(
                "Block carries more than one coinbase".to_string(),
            ));
        }

        // Both proof-of-work stages against the expected difficulty
        let expected = self.next_difficulty_state()?;
        if block.get_difficulty() != expected.header_bits {
            return Err(ChainError::InvalidBlock(format!(
                "Block difficulty {} does not match expected {}",
                block.get_difficulty(),
                expected.header_bits
            )));
        }
        FractalPow::validate(block, difficulty::TARGET_DIMENSION, expected.epsilon)?;

        // Apply transactions in list order against the running ledger
        let mut running = LedgerView::new(self);
        let mut seen_txids: HashSet<&str> = HashSet::new();
        let mut total_fees: u64 = 0;

        for tx in transactions.iter().skip(1) {
            if !seen_txids.insert(tx.get_txid()) {
                return Err(ChainError::InvalidBlock(format!(
                    "Duplicate txid {} within block",
                    tx.get_txid()
                )));
            }
            if self.get_transaction(tx.get_txid())?.is_some() {
                return Err(ChainError::InvalidBlock(format!(
                    "Transaction {} already committed",
                    tx.get_txid()
                )));
            }
            tx.validate(|addr| running.balance(addr))?;
            running.debit(tx.get_from_address(), tx.get_amount() + tx.get_fee());
            running.credit(tx.get_to_address(), tx.get_amount());
            total_fees += tx.get_fee();
        }

        // Coinbase pays exactly subsidy plus fees
        let expected_reward = block_reward(block.get_index()) + total_fees;
        if transactions[0].get_amount() != expected_reward {
            return Err(ChainError::InvalidBlock(format!(
                "Coinbase amount {} does not match reward {}",
                transactions[0].get_amount(),
                expected_reward
            )));
        }
        running.credit(transactions[0].get_to_address(), expected_reward);

        self.commit_block(block, running.into_touched(), expected)?;

        self.set_tip_hash(block.get_hash());
        self.set_difficulty_state(expected);
        self.mempool.remove_included(transactions);

        info!(
            "Applied block {} ({}) with {} transactions",
            block.get_index(),
            block.get_hash(),
            transactions.len()
        );
        Ok(())
    }

    fn commit_block(
        &self,
        block: &Block,
        touched_balances: HashMap<String, u64>,
        state: DifficultyState,
    ) -> Result<()> {
        let blocks_tree = open_tree(&self.db, BLOCKS_TREE)?;
        let heights_tree = open_tree(&self.db, HEIGHTS_TREE)?;
        let balances_tree = open_tree(&self.db, BALANCES_TREE)?;
        let txs_tree = open_tree(&self.db, TRANSACTIONS_TREE)?;
        let meta_tree = open_tree(&self.db, META_TREE)?;

        let block_bytes = block.serialize()?;
        let hash = block.get_hash().to_string();
        let index = block.get_index();

        let mut tx_rows = Vec::with_capacity(block.get_transactions().len());
        for (position, tx) in block.get_transactions().iter().enumerate() {
            let record = TxRecord {
                block_index: index,
                position: position as u32,
                transaction: tx.clone(),
            };
            tx_rows.push((tx.get_txid().to_string(), serialize(&record)?));
        }

        (
            &blocks_tree,
            &heights_tree,
            &balances_tree,
            &txs_tree,
            &meta_tree,
        )
            .transaction(|(blocks, heights, balances, txs, meta)| {
                blocks.insert(hash.as_bytes(), block_bytes.as_slice())?;
                heights.insert(index.to_be_bytes().to_vec(), hash.as_bytes())?;
                for (txid, row) in &tx_rows {
                    txs.insert(txid.as_bytes(), row.as_slice())?;
                }
                for (address, balance) in &touched_balances {
                    balances.insert(address.as_bytes(), balance.to_be_bytes().to_vec())?;
                }
                meta.insert(TIP_HASH_KEY, hash.as_bytes())?;
                meta.insert(HEIGHT_KEY, index.to_be_bytes().to_vec())?;
                meta.insert(HEADER_BITS_KEY, state.header_bits.to_be_bytes().to_vec())?;
                meta.insert(EPSILON_KEY, state.epsilon.to_bits().to_be_bytes().to_vec())?;
                Ok(())
            })
            .map_err(|e: TransactionError| {
                ChainError::Database(format!("Failed to commit block: {e}"))
            })?;
        Ok(())
    }

    /// Recompute every balance from block history. The materialized
    /// ledger must always equal this reconstruction.
    pub fn rebuild_balances(&self) -> Result<HashMap<String, u64>> {
        let height = self.height()?;
        let mut balances: HashMap<String, u64> = HashMap::new();

        for index in 0..=height {
            let block = self.get_block_by_index(index)?.ok_or_else(|| {
                ChainError::Corruption(format!("Missing block at height {index}"))
            })?;
            for tx in block.get_transactions() {
                if !tx.is_coinbase() {
                    let debit = tx.get_amount() + tx.get_fee();
                    let sender = balances.entry(tx.get_from_address().to_string()).or_insert(0);
                    *sender = sender.saturating_sub(debit);
                }
                *balances.entry(tx.get_to_address().to_string()).or_insert(0) +=
                    tx.get_amount();
            }
        }

        Ok(balances)
    }
}

/// Copy-on-read view of the ledger used while applying a block: reads
/// fall through to the store, writes stay local until commit.
struct LedgerView<'a> {
    chain: &'a Blockchain,
    touched: HashMap<String, u64>,
}

impl<'a> LedgerView<'a> {
    fn new(chain: &'a Blockchain) -> LedgerView<'a> {
        LedgerView {
            chain,
            touched: HashMap::new(),
        }
    }

    fn balance(&self, address: &str) -> u64 {
        match self.touched.get(address) {
            Some(balance) => *balance,
            None => self.chain.get_balance(address).unwrap_or(0),
        }
    }

    fn debit(&mut self, address: &str, amount: u64) {
        let balance = self.balance(address);
        self.touched
            .insert(address.to_string(), balance.saturating_sub(amount));
    }

    fn credit(&mut self, address: &str, amount: u64) {
        let balance = self.balance(address);
        self.touched
            .insert(address.to_string(), balance.saturating_add(amount));
    }

    fn into_touched(self) -> HashMap<String, u64> {
        self.touched
    }
}

fn open_tree(db: &Db, name: &str) -> Result<Tree> {
    db.open_tree(name)
        .map_err(|e| ChainError::Database(format!("Failed to open tree {name}: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::proof_of_work::FractalPow;
    use std::sync::atomic::AtomicBool;
    use tempfile::TempDir;

    const MINER: &str = "1A1zP1eP5QGefi2DMPTfTL5SLmv7DivfNa";

    fn open_test_chain() -> (Blockchain, TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let chain =
            Blockchain::open_with_path(dir.path().join("chain").to_str().unwrap()).unwrap();
        // Wide windows keep test mining fast
        chain.set_difficulty_state(DifficultyState {
            header_bits: 1,
            epsilon: 0.5,
        });
        (chain, dir)
    }

    fn mine_next(chain: &Blockchain, miner: &str) -> Block {
        let mut block = chain.assemble_candidate(miner).unwrap();
        let state = chain.next_difficulty_state().unwrap();
        let pow = FractalPow::new(state.header_bits, difficulty::TARGET_DIMENSION, state.epsilon);
        let cancel = AtomicBool::new(false);
        assert!(pow.mine(&mut block, &cancel).unwrap());
        block
    }

    #[test]
    fn test_empty_store_boots_to_genesis() {
        let (chain, _dir) = open_test_chain();
        assert_eq!(chain.height().unwrap(), 0);
        let genesis = chain.get_block_by_index(0).unwrap().unwrap();
        assert_eq!(genesis.get_hash(), chain.get_tip_hash());
        assert!(genesis.get_transactions().is_empty());
    }

    #[test]
    fn test_genesis_is_stable_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("chain");
        let first_tip = {
            let chain = Blockchain::open_with_path(path.to_str().unwrap()).unwrap();
            chain.get_tip_hash()
        };
        let chain = Blockchain::open_with_path(path.to_str().unwrap()).unwrap();
        assert_eq!(chain.get_tip_hash(), first_tip);
        assert_eq!(chain.height().unwrap(), 0);
    }

    #[test]
    fn test_mine_and_apply_coinbase_only() {
        let (chain, _dir) = open_test_chain();
        let block = mine_next(&chain, MINER);
        chain.add_block(&block).unwrap();

        assert_eq!(chain.height().unwrap(), 1);
        assert_eq!(
            chain.get_balance(MINER).unwrap(),
            block_reward(1)
        );
        assert_eq!(chain.tip().unwrap().get_hash(), block.get_hash());
    }

    #[test]
    fn test_duplicate_block_rejected() {
        let (chain, _dir) = open_test_chain();
        let block = mine_next(&chain, MINER);
        chain.add_block(&block).unwrap();
        assert!(chain.add_block(&block).is_err());
    }

    #[test]
    fn test_competing_tip_rejected() {
        let (chain, _dir) = open_test_chain();
        let first = mine_next(&chain, MINER);
        // Mine a second block off the same parent before applying
        let second = mine_next(&chain, "1BoatSLRHtKNngkdXEeobR76b53LETtpyT");
        chain.add_block(&first).unwrap();

        // The competitor extends the old tip, not the new one
        let err = chain.add_block(&second).unwrap_err();
        assert!(matches!(err, ChainError::InvalidBlock(_)));
        assert_eq!(chain.tip().unwrap().get_hash(), first.get_hash());
    }

    #[test]
    fn test_coinbase_amount_must_match_reward() {
        let (chain, _dir) = open_test_chain();
        let parent = chain.tip().unwrap();
        let state = chain.next_difficulty_state().unwrap();

        // Coinbase pays itself double the subsidy
        let coinbase = Transaction::new_coinbase(
            MINER,
            2 * block_reward(1),
            parent.get_timestamp() + 1,
        );
        let mut block = Block::new_candidate(
            1,
            parent.get_hash().to_string(),
            parent.get_timestamp() + 1,
            vec![coinbase],
            state.header_bits,
        );
        let pow = FractalPow::new(state.header_bits, difficulty::TARGET_DIMENSION, state.epsilon);
        let cancel = AtomicBool::new(false);
        assert!(pow.mine(&mut block, &cancel).unwrap());

        let err = chain.add_block(&block).unwrap_err();
        assert!(matches!(err, ChainError::InvalidBlock(_)));
        assert_eq!(chain.height().unwrap(), 0);
    }

    #[test]
    fn test_ledger_matches_reconstruction() {
        let (chain, _dir) = open_test_chain();
        for _ in 0..3 {
            let block = mine_next(&chain, MINER);
            chain.add_block(&block).unwrap();
        }

        let rebuilt = chain.rebuild_balances().unwrap();
        for (address, balance) in rebuilt {
            assert_eq!(chain.get_balance(&address).unwrap(), balance);
        }
        assert_eq!(chain.get_balance(MINER).unwrap(), 3 * block_reward(1));
    }

    #[test]
    fn test_headers_range() {
        let (chain, _dir) = open_test_chain();
        let block = mine_next(&chain, MINER);
        chain.add_block(&block).unwrap();

        let headers = chain.get_headers(0, 10).unwrap();
        assert_eq!(headers.len(), 2);
        assert_eq!(headers[0].index, 0);
        assert_eq!(headers[1].hash, block.get_hash());
        assert_eq!(headers[1].prev_hash, headers[0].hash);
    }

    #[test]
    fn test_submitted_coinbase_rejected() {
        let (chain, _dir) = open_test_chain();
        let coinbase = Transaction::new_coinbase(MINER, 50, 1_700_000_100);
        assert!(chain.submit_transaction(coinbase).is_err());
    }
}
