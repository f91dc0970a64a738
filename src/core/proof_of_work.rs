// Two-stage proof of work. Stage one is a conventional leading-zero-bit
// test on the header hash; stage two requires the block's fractal seed
// to induce a Julia set whose box-counting dimension falls within
// epsilon of the chain target. The hash pre-filter carries most of the
// difficulty because one fractal render costs on the order of 10^4
// header hashes.

use crate::core::fractal;
use crate::core::Block;
use crate::error::{ChainError, Result};
use data_encoding::HEXLOWER;
use log::{debug, info};
use num_bigint::{BigInt, Sign};
use std::sync::atomic::{AtomicBool, Ordering};

pub struct FractalPow {
    target: BigInt, // header hash must be strictly below this
    header_bits: u32,
    target_dimension: f64,
    epsilon: f64,
}

impl FractalPow {
    pub fn new(header_bits: u32, target_dimension: f64, epsilon: f64) -> FractalPow {
        FractalPow {
            target: header_target(header_bits),
            header_bits,
            target_dimension,
            epsilon,
        }
    }

    /// Drive the nonce search for a candidate block. On success the
    /// block is sealed in place and `true` is returned; a cancellation
    /// (tip advanced, shutdown) returns `false` with the block
    /// untouched beyond scratch state.
    ///
    /// The cancellation flag is polled once per nonce and once per
    /// fractal row, bounding shutdown latency to a single grid render.
    pub fn mine(&self, block: &mut Block, cancel: &AtomicBool) -> Result<bool> {
        let miner_address = block.miner_address()?.to_string();
        let prev_hash = block.get_prev_hash().to_string();

        info!(
            "Mining block {} ({} bits, dimension target {} +/- {})",
            block.get_index(),
            self.header_bits,
            self.target_dimension,
            self.epsilon
        );

        for nonce in 0u64.. {
            if cancel.load(Ordering::Relaxed) {
                info!("Mining cancelled at nonce {nonce}");
                return Ok(false);
            }

            let seed = fractal::fractal_seed(&prev_hash, &miner_address, nonce);
            let seed_hex = HEXLOWER.encode(&seed);

            // Stage one: cheap header pre-filter
            let header_hash = block.header_hash_with_nonce(nonce, &seed_hex);
            if !self.meets_header_target(&header_hash) {
                continue;
            }

            // Stage two: render the Julia set and test the dimension
            let (c_re, c_im, dimension) = match fractal::dimension_from_seed(&seed, Some(cancel)) {
                Some(result) => result,
                None => {
                    info!("Mining cancelled mid-render at nonce {nonce}");
                    return Ok(false);
                }
            };

            if fractal::is_valid_dimension(dimension, self.target_dimension, self.epsilon) {
                block.seal(nonce, seed_hex, c_re, c_im, dimension);
                info!(
                    "Sealed block {} at nonce {nonce}: dimension {dimension}, hash {}",
                    block.get_index(),
                    block.get_hash()
                );
                return Ok(true);
            }

            debug!("Nonce {nonce} passed header filter but dimension {dimension} missed window");
        }

        unreachable!("Nonce space exhausted")
    }

    /// Verify both proof-of-work stages of a sealed block. All four
    /// gates are hard errors.
    pub fn validate(block: &Block, target_dimension: f64, epsilon: f64) -> Result<()> {
        // Gate 1: header hash satisfies the leading-zero-bit target
        let target = header_target(block.get_difficulty());
        let header_hash = block.header_hash();
        let hash_int = BigInt::from_bytes_be(Sign::Plus, &header_hash);
        if hash_int >= target {
            return Err(ChainError::InvalidBlock(format!(
                "Header hash misses the {}-bit target",
                block.get_difficulty()
            )));
        }

        // Gate 2: the fractal seed re-derives from the block contents
        let seed = fractal::fractal_seed(
            block.get_prev_hash(),
            block.miner_address()?,
            block.get_nonce(),
        );
        if HEXLOWER.encode(&seed) != block.get_fractal_seed() {
            return Err(ChainError::InvalidBlock(
                "Fractal seed does not derive from block contents".to_string(),
            ));
        }

        // Gate 3: the Julia constant matches the seed
        let (c_re, c_im) = fractal::derive_c_from_seed(&seed);
        let (stored_re, stored_im) = block.get_fractal_c();
        if c_re.to_bits() != stored_re.to_bits() || c_im.to_bits() != stored_im.to_bits() {
            return Err(ChainError::InvalidBlock(
                "Fractal parameters do not match the seed".to_string(),
            ));
        }

        // Gate 4: the dimension recomputes bit-identically and sits
        // inside the acceptance window
        let (_, _, dimension) = fractal::dimension_from_seed(&seed, None)
            .expect("Uncancelled fractal render always completes");
        if dimension.to_bits() != block.get_fractal_dimension().to_bits() {
            return Err(ChainError::InvalidBlock(format!(
                "Stored dimension {} does not match recomputation {}",
                block.get_fractal_dimension(),
                dimension
            )));
        }
        if !fractal::is_valid_dimension(dimension, target_dimension, epsilon) {
            return Err(ChainError::InvalidBlock(format!(
                "Dimension {dimension} outside target window {target_dimension} +/- {epsilon}"
            )));
        }

        Ok(())
    }

    fn meets_header_target(&self, hash: &[u8]) -> bool {
        BigInt::from_bytes_be(Sign::Plus, hash) < self.target
    }
}

/// Numeric target for a leading-zero-bit count: hashes strictly below
/// `1 << (256 - bits)` have at least `bits` leading zeros.
fn header_target(bits: u32) -> BigInt {
    BigInt::from(1) << (256 - bits.min(256)) as usize
}
