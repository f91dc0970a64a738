//! Isolated staking side-ledger.
//!
//! Staking lives entirely outside consensus: the chain manager never
//! reads or writes this state, and mining rewards are unaffected by
//! stakes. Positions are persisted to their own JSON file.

use crate::core::UNITS_PER_COIN;
use crate::error::{ChainError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

/// Minimum stake (100 coins)
pub const MIN_STAKE_AMOUNT: u64 = 100 * UNITS_PER_COIN;

/// Minimum lock period in blocks
pub const MIN_LOCK_BLOCKS: u64 = 1_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PositionStatus {
    Active,
    Withdrawn,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StakePosition {
    pub position_id: u64,
    pub address: String,
    pub amount: u64,
    pub lock_blocks: u64,
    pub unlock_block: u64,
    pub status: PositionStatus,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SlashRecord {
    pub address: String,
    pub slashed_amount: u64,
    pub fraction: f64,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct StakingState {
    next_position_id: u64,
    positions: HashMap<u64, StakePosition>,
    slash_history: Vec<SlashRecord>,
}

pub struct StakingLedger {
    path: PathBuf,
    inner: RwLock<StakingState>,
}

impl StakingLedger {
    /// Open the ledger file, starting empty when it does not exist.
    pub fn open(path: &Path) -> Result<StakingLedger> {
        let state = if path.exists() {
            let bytes = fs::read(path)
                .map_err(|e| ChainError::Staking(format!("Failed to read ledger: {e}")))?;
            serde_json::from_slice(&bytes)
                .map_err(|e| ChainError::Staking(format!("Malformed staking ledger: {e}")))?
        } else {
            StakingState::default()
        };

        Ok(StakingLedger {
            path: path.to_path_buf(),
            inner: RwLock::new(state),
        })
    }

    /// Lock `amount` for `lock_blocks` starting at the current height.
    pub fn stake(
        &self,
        address: &str,
        amount: u64,
        lock_blocks: u64,
        current_block: u64,
    ) -> Result<u64> {
        if amount < MIN_STAKE_AMOUNT {
            return Err(ChainError::Staking(format!(
                "Minimum stake is {MIN_STAKE_AMOUNT} units"
            )));
        }
        if lock_blocks < MIN_LOCK_BLOCKS {
            return Err(ChainError::Staking(format!(
                "Minimum lock period is {MIN_LOCK_BLOCKS} blocks"
            )));
        }

        let position_id = {
            let mut state = self.write_state()?;
            let position_id = state.next_position_id;
            state.next_position_id += 1;
            state.positions.insert(
                position_id,
                StakePosition {
                    position_id,
                    address: address.to_string(),
                    amount,
                    lock_blocks,
                    unlock_block: current_block + lock_blocks,
                    status: PositionStatus::Active,
                },
            );
            position_id
        };

        self.save()?;
        Ok(position_id)
    }

    /// Release a matured position, returning the amount paid out.
    pub fn unstake(&self, position_id: u64, current_block: u64) -> Result<u64> {
        let amount = {
            let mut state = self.write_state()?;
            let position = state.positions.get_mut(&position_id).ok_or_else(|| {
                ChainError::Staking(format!("Unknown position {position_id}"))
            })?;

            if position.status != PositionStatus::Active {
                return Err(ChainError::Staking(format!(
                    "Position {position_id} already withdrawn"
                )));
            }
            if current_block < position.unlock_block {
                return Err(ChainError::Staking(format!(
                    "Position {position_id} locked until block {}",
                    position.unlock_block
                )));
            }

            position.status = PositionStatus::Withdrawn;
            position.amount
        };

        self.save()?;
        Ok(amount)
    }

    /// Burn a fraction of every active position held by an address.
    /// Returns the total slashed amount.
    pub fn slash(&self, address: &str, fraction: f64) -> Result<u64> {
        if !(0.0..=1.0).contains(&fraction) {
            return Err(ChainError::Staking(format!(
                "Slash fraction {fraction} outside [0, 1]"
            )));
        }

        let slashed = {
            let mut state = self.write_state()?;
            let mut slashed: u64 = 0;
            for position in state.positions.values_mut() {
                if position.address == address && position.status == PositionStatus::Active {
                    let cut = (position.amount as f64 * fraction) as u64;
                    position.amount -= cut;
                    slashed += cut;
                }
            }
            state.slash_history.push(SlashRecord {
                address: address.to_string(),
                slashed_amount: slashed,
                fraction,
            });
            slashed
        };

        self.save()?;
        Ok(slashed)
    }

    /// Every position (active or withdrawn) held by an address.
    pub fn positions(&self, address: &str) -> Vec<StakePosition> {
        let state = match self.inner.read() {
            Ok(state) => state,
            Err(_) => return vec![],
        };
        let mut positions: Vec<StakePosition> = state
            .positions
            .values()
            .filter(|p| p.address == address)
            .cloned()
            .collect();
        positions.sort_by_key(|p| p.position_id);
        positions
    }

    pub fn total_staked(&self) -> u64 {
        self.inner
            .read()
            .map(|state| {
                state
                    .positions
                    .values()
                    .filter(|p| p.status == PositionStatus::Active)
                    .map(|p| p.amount)
                    .sum()
            })
            .unwrap_or(0)
    }

    pub fn slash_history(&self) -> Vec<SlashRecord> {
        self.inner
            .read()
            .map(|state| state.slash_history.clone())
            .unwrap_or_default()
    }

    fn write_state(&self) -> Result<std::sync::RwLockWriteGuard<'_, StakingState>> {
        self.inner
            .write()
            .map_err(|_| ChainError::Staking("Staking ledger lock poisoned".to_string()))
    }

    fn save(&self) -> Result<()> {
        let state = self
            .inner
            .read()
            .map_err(|_| ChainError::Staking("Staking ledger lock poisoned".to_string()))?;
        let bytes = serde_json::to_vec_pretty(&*state)
            .map_err(|e| ChainError::Staking(format!("Failed to encode ledger: {e}")))?;
        fs::write(&self.path, bytes)
            .map_err(|e| ChainError::Staking(format!("Failed to write ledger: {e}")))?;
        Ok(())
    }
}
