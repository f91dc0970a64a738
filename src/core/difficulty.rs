use crate::core::Block;
use crate::error::{ChainError, Result};
use log::info;

/// Blocks between retargets
pub const RETARGET_INTERVAL: u64 = 2016;

/// Target spacing between blocks, in seconds
pub const TARGET_BLOCK_TIME: i64 = 600;

/// Initial leading-zero-bit requirement for the header hash
pub const INITIAL_HEADER_BITS: u32 = 16;

pub const MIN_HEADER_BITS: u32 = 1;
pub const MAX_HEADER_BITS: u32 = 64;

/// Chain-wide fractal dimension target, constant per network
pub const TARGET_DIMENSION: f64 = 1.5;

/// Initial acceptance window around the dimension target
pub const INITIAL_EPSILON: f64 = 0.001;

pub const MIN_EPSILON: f64 = 1e-6;
pub const MAX_EPSILON: f64 = 0.5;

/// Joint difficulty state: the header-hash bit requirement and the
/// fractal acceptance window. Both act in the same direction, so a
/// retarget moves them together.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DifficultyState {
    pub header_bits: u32,
    pub epsilon: f64,
}

impl Default for DifficultyState {
    fn default() -> Self {
        DifficultyState {
            header_bits: INITIAL_HEADER_BITS,
            epsilon: INITIAL_EPSILON,
        }
    }
}

pub struct DifficultyController;

impl DifficultyController {
    /// True when the block at `height` opens a new retarget window.
    pub fn is_retarget_height(height: u64) -> bool {
        height > 0 && height % RETARGET_INTERVAL == 0
    }

    /// Recompute both difficulty actuators from the last full window.
    ///
    /// `window` must hold the most recent RETARGET_INTERVAL blocks in
    /// chronological order. The measured-over-target ratio is clamped to
    /// [0.25, 4.0]; the header bits move by round(log2(1/r)) and the
    /// epsilon scales by r, each clamped to its own range.
    pub fn retarget(window: &[Block], current: DifficultyState) -> Result<DifficultyState> {
        if window.len() != RETARGET_INTERVAL as usize {
            return Err(ChainError::InvalidBlock(format!(
                "Retarget needs {} blocks, got {}",
                RETARGET_INTERVAL,
                window.len()
            )));
        }

        let first = window.first().expect("window is non-empty");
        let last = window.last().expect("window is non-empty");
        let actual_time = (last.get_timestamp() - first.get_timestamp()).max(1);
        let target_time = TARGET_BLOCK_TIME * RETARGET_INTERVAL as i64;

        let ratio = (actual_time as f64 / target_time as f64).clamp(0.25, 4.0);

        let bits_shift = (1.0 / ratio).log2().round() as i64;
        let header_bits = (current.header_bits as i64 + bits_shift)
            .clamp(MIN_HEADER_BITS as i64, MAX_HEADER_BITS as i64)
            as u32;

        let epsilon = (current.epsilon * ratio).clamp(MIN_EPSILON, MAX_EPSILON);

        info!(
            "Retarget: actual {actual_time}s vs target {target_time}s (ratio {ratio:.4}), \
             bits {} -> {header_bits}, epsilon {:.8} -> {epsilon:.8}",
            current.header_bits, current.epsilon
        );

        Ok(DifficultyState {
            header_bits,
            epsilon,
        })
    }

    /// Summary for operators: current actuators plus the average block
    /// time over the supplied recent blocks.
    pub fn stats(recent: &[Block], current: DifficultyState) -> DifficultyStats {
        let average_block_time = if recent.len() >= 2 {
            let span = recent.last().expect("non-empty").get_timestamp()
                - recent.first().expect("non-empty").get_timestamp();
            span as f64 / (recent.len() - 1) as f64
        } else {
            0.0
        };

        let height = recent.last().map(|b| b.get_index()).unwrap_or(0);

        DifficultyStats {
            header_bits: current.header_bits,
            epsilon: current.epsilon,
            target_dimension: TARGET_DIMENSION,
            average_block_time,
            blocks_until_retarget: RETARGET_INTERVAL - (height % RETARGET_INTERVAL),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DifficultyStats {
    pub header_bits: u32,
    pub epsilon: f64,
    pub target_dimension: f64,
    pub average_block_time: f64,
    pub blocks_until_retarget: u64,
}
