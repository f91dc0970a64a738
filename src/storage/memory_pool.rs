use crate::core::Transaction;
use std::collections::HashMap;
use std::sync::RwLock;

/// Upper bound on pending transactions
pub const MAX_MEMPOOL_SIZE: usize = 10_000;

/// Pending transactions keyed by txid.
///
/// The pool is bounded; when full, the lowest-fee entry makes way for a
/// better-paying newcomer. Admission only checks format and signatures
/// (the caller's job) - overdrafts are caught at candidate assembly,
/// not here.
pub struct MemoryPool {
    inner: RwLock<HashMap<String, Transaction>>,
}

impl Default for MemoryPool {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryPool {
    pub fn new() -> MemoryPool {
        MemoryPool {
            inner: RwLock::new(HashMap::new()),
        }
    }

    /// Insert a transaction, evicting the cheapest entry when the pool
    /// is full. Returns false when the pool is full of better-paying
    /// transactions or the txid is already present.
    pub fn add(&self, tx: Transaction) -> bool {
        let mut pool = match self.inner.write() {
            Ok(pool) => pool,
            Err(_) => {
                log::error!("Failed to acquire write lock on memory pool");
                return false;
            }
        };

        if pool.contains_key(tx.get_txid()) {
            return false;
        }

        if pool.len() >= MAX_MEMPOOL_SIZE {
            let cheapest = pool
                .values()
                .min_by_key(|t| t.get_fee())
                .map(|t| (t.get_txid().to_string(), t.get_fee()));
            match cheapest {
                Some((_, cheapest_fee)) if tx.get_fee() <= cheapest_fee => return false,
                Some((cheapest_txid, _)) => {
                    pool.remove(&cheapest_txid);
                }
                None => {}
            }
        }

        pool.insert(tx.get_txid().to_string(), tx);
        true
    }

    pub fn get(&self, txid: &str) -> Option<Transaction> {
        match self.inner.read() {
            Ok(pool) => pool.get(txid).cloned(),
            Err(_) => {
                log::error!("Failed to acquire read lock on memory pool");
                None
            }
        }
    }

    pub fn contains(&self, txid: &str) -> bool {
        match self.inner.read() {
            Ok(pool) => pool.contains_key(txid),
            Err(_) => {
                log::error!("Failed to acquire read lock on memory pool");
                false
            }
        }
    }

    pub fn remove(&self, txid: &str) {
        match self.inner.write() {
            Ok(mut pool) => {
                pool.remove(txid);
            }
            Err(_) => {
                log::error!("Failed to acquire write lock on memory pool");
            }
        }
    }

    /// Drop every transaction included in a freshly persisted block.
    pub fn remove_included(&self, transactions: &[Transaction]) {
        match self.inner.write() {
            Ok(mut pool) => {
                for tx in transactions {
                    pool.remove(tx.get_txid());
                }
            }
            Err(_) => {
                log::error!("Failed to acquire write lock on memory pool");
            }
        }
    }

    /// Snapshot ordered fee-descending, the assembly priority order.
    pub fn fee_ordered(&self) -> Vec<Transaction> {
        let mut txs = match self.inner.read() {
            Ok(pool) => pool.values().cloned().collect::<Vec<_>>(),
            Err(_) => {
                log::error!("Failed to acquire read lock on memory pool");
                return Vec::new();
            }
        };
        txs.sort_by(|a, b| b.get_fee().cmp(&a.get_fee()).then(a.get_txid().cmp(b.get_txid())));
        txs
    }

    pub fn len(&self) -> usize {
        match self.inner.read() {
            Ok(pool) => pool.len(),
            Err(_) => {
                log::error!("Failed to acquire read lock on memory pool");
                0
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        match self.inner.write() {
            Ok(mut pool) => {
                pool.clear();
            }
            Err(_) => {
                log::error!("Failed to acquire write lock on memory pool");
            }
        }
    }
}

/// Block hashes announced by peers and not yet fetched during sync.
pub struct BlockInTransit {
    inner: RwLock<Vec<String>>,
}

impl Default for BlockInTransit {
    fn default() -> Self {
        Self::new()
    }
}

impl BlockInTransit {
    pub fn new() -> BlockInTransit {
        BlockInTransit {
            inner: RwLock::new(vec![]),
        }
    }

    pub fn add_blocks(&self, hashes: &[String]) {
        match self.inner.write() {
            Ok(mut inner) => {
                for hash in hashes {
                    if !inner.contains(hash) {
                        inner.push(hash.clone());
                    }
                }
            }
            Err(_) => {
                log::error!("Failed to acquire write lock on blocks in transit");
            }
        }
    }

    pub fn first(&self) -> Option<String> {
        match self.inner.read() {
            Ok(inner) => inner.first().cloned(),
            Err(_) => {
                log::error!("Failed to acquire read lock on blocks in transit");
                None
            }
        }
    }

    pub fn remove(&self, hash: &str) {
        match self.inner.write() {
            Ok(mut inner) => {
                if let Some(idx) = inner.iter().position(|h| h == hash) {
                    inner.remove(idx);
                }
            }
            Err(_) => {
                log::error!("Failed to acquire write lock on blocks in transit");
            }
        }
    }

    pub fn clear(&self) {
        match self.inner.write() {
            Ok(mut inner) => {
                inner.clear();
            }
            Err(_) => {
                log::error!("Failed to acquire write lock on blocks in transit");
            }
        }
    }

    pub fn len(&self) -> usize {
        match self.inner.read() {
            Ok(inner) => inner.len(),
            Err(_) => {
                log::error!("Failed to acquire read lock on blocks in transit");
                0
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tx_with_fee(tag: u64, fee: u64) -> Transaction {
        Transaction::new_transfer(
            &format!("sender-address-{tag:012}"),
            "recipient-address-000000000",
            100,
            fee,
            1_700_000_000 + tag as i64,
        )
    }

    #[test]
    fn test_add_and_lookup() {
        let pool = MemoryPool::new();
        let tx = tx_with_fee(1, 10);
        let txid = tx.get_txid().to_string();

        assert!(pool.add(tx));
        assert!(pool.contains(&txid));
        assert_eq!(pool.len(), 1);
        assert_eq!(pool.get(&txid).unwrap().get_txid(), txid);
    }

    #[test]
    fn test_duplicate_txid_rejected() {
        let pool = MemoryPool::new();
        let tx = tx_with_fee(1, 10);
        assert!(pool.add(tx.clone()));
        assert!(!pool.add(tx));
        assert_eq!(pool.len(), 1);
    }

    #[test]
    fn test_fee_ordering() {
        let pool = MemoryPool::new();
        pool.add(tx_with_fee(1, 5));
        pool.add(tx_with_fee(2, 50));
        pool.add(tx_with_fee(3, 20));

        let ordered = pool.fee_ordered();
        let fees: Vec<u64> = ordered.iter().map(|t| t.get_fee()).collect();
        assert_eq!(fees, vec![50, 20, 5]);
    }

    #[test]
    fn test_remove_included() {
        let pool = MemoryPool::new();
        let a = tx_with_fee(1, 5);
        let b = tx_with_fee(2, 6);
        pool.add(a.clone());
        pool.add(b.clone());

        pool.remove_included(&[a]);
        assert_eq!(pool.len(), 1);
        assert!(pool.contains(b.get_txid()));
    }

    #[test]
    fn test_eviction_prefers_lowest_fee() {
        let pool = MemoryPool::new();
        for i in 0..MAX_MEMPOOL_SIZE as u64 {
            // Fees 2..MAX+2 so the cheapest entry has fee 2
            assert!(pool.add(tx_with_fee(i, i + 2)));
        }
        assert_eq!(pool.len(), MAX_MEMPOOL_SIZE);

        // A fee of 1 cannot displace anything
        assert!(!pool.add(tx_with_fee(u64::MAX, 1)));
        assert_eq!(pool.len(), MAX_MEMPOOL_SIZE);

        // A top fee displaces the cheapest entry
        let rich = tx_with_fee(u64::MAX - 1, u64::MAX);
        let rich_txid = rich.get_txid().to_string();
        assert!(pool.add(rich));
        assert_eq!(pool.len(), MAX_MEMPOOL_SIZE);
        assert!(pool.contains(&rich_txid));
        assert_eq!(pool.fee_ordered().last().unwrap().get_fee(), 3);
    }

    #[test]
    fn test_blocks_in_transit_dedup_and_order() {
        let transit = BlockInTransit::new();
        transit.add_blocks(&["aa".to_string(), "bb".to_string(), "aa".to_string()]);
        assert_eq!(transit.len(), 2);
        assert_eq!(transit.first().unwrap(), "aa");
        transit.remove("aa");
        assert_eq!(transit.first().unwrap(), "bb");
    }
}
