// Deterministic Julia-set rendering and box-counting dimension
// estimation. Miners and verifiers run exactly the same code path, so
// every loop here has a pinned evaluation order: samples are visited
// row-major, box sizes in ascending order, and the regression uses the
// closed-form least-squares solution. Changing any of these orders is a
// consensus break.

use crate::utils::sha256_digest;
use std::sync::atomic::{AtomicBool, Ordering};

/// Samples per grid side
pub const GRID_SIZE: usize = 128;

/// Iteration cap for the escape test
pub const MAX_ITERATIONS: u32 = 256;

/// Orbit escape radius
pub const ESCAPE_RADIUS: f64 = 2.0;

/// The sampled complex square is [REGION_MIN, REGION_MAX]^2, endpoints
/// inclusive
pub const REGION_MIN: f64 = -2.0;
pub const REGION_MAX: f64 = 2.0;

/// Box side lengths in grid units, ascending; all divide GRID_SIZE
pub const BOX_SIZES: [usize; 8] = [1, 2, 4, 8, 16, 32, 64, 128];

const TWO_POW_64: f64 = 18_446_744_073_709_551_616.0;

/// Derive the fractal seed for a candidate block:
/// `sha256(prev_hash ∥ miner_address ∥ nonce_le_bytes)`, where the hex
/// previous hash and the address contribute their UTF-8 bytes and the
/// nonce its 8 little-endian bytes.
pub fn fractal_seed(prev_hash: &str, miner_address: &str, nonce: u64) -> Vec<u8> {
    let mut data = Vec::with_capacity(prev_hash.len() + miner_address.len() + 8);
    data.extend_from_slice(prev_hash.as_bytes());
    data.extend_from_slice(miner_address.as_bytes());
    data.extend_from_slice(&nonce.to_le_bytes());
    sha256_digest(&data)
}

/// Map the first 16 seed bytes to the Julia constant c: bytes 0..8 as a
/// big-endian unsigned integer scaled into [-1, 1] for the real part,
/// bytes 8..16 likewise for the imaginary part.
pub fn derive_c_from_seed(seed: &[u8]) -> (f64, f64) {
    let mut re_bytes = [0u8; 8];
    let mut im_bytes = [0u8; 8];
    re_bytes.copy_from_slice(&seed[0..8]);
    im_bytes.copy_from_slice(&seed[8..16]);

    let re_int = u64::from_be_bytes(re_bytes);
    let im_int = u64::from_be_bytes(im_bytes);

    let c_re = (re_int as f64 / TWO_POW_64) * 2.0 - 1.0;
    let c_im = (im_int as f64 / TWO_POW_64) * 2.0 - 1.0;
    (c_re, c_im)
}

/// Binary mask of bounded samples, GRID_SIZE x GRID_SIZE, row-major.
pub struct FractalBitmap {
    bounded: Vec<bool>,
}

impl FractalBitmap {
    pub fn is_bounded(&self, row: usize, col: usize) -> bool {
        self.bounded[row * GRID_SIZE + col]
    }

    pub fn bounded_count(&self) -> usize {
        self.bounded.iter().filter(|b| **b).count()
    }
}

/// Render the Julia set for `z -> z^2 + c` over the sample grid.
///
/// The cancellation flag is polled once per row; a cancelled render
/// returns `None` and publishes nothing.
pub fn render_julia(c_re: f64, c_im: f64, cancel: Option<&AtomicBool>) -> Option<FractalBitmap> {
    let step = (REGION_MAX - REGION_MIN) / (GRID_SIZE - 1) as f64;
    let escape_sq = ESCAPE_RADIUS * ESCAPE_RADIUS;
    let mut bounded = vec![false; GRID_SIZE * GRID_SIZE];

    for row in 0..GRID_SIZE {
        if let Some(flag) = cancel {
            if flag.load(Ordering::Relaxed) {
                return None;
            }
        }

        let z0_im = REGION_MIN + row as f64 * step;
        for col in 0..GRID_SIZE {
            let z0_re = REGION_MIN + col as f64 * step;

            let mut zr = z0_re;
            let mut zi = z0_im;
            let mut escaped = false;
            for _ in 0..MAX_ITERATIONS {
                if zr * zr + zi * zi > escape_sq {
                    escaped = true;
                    break;
                }
                let next_zr = zr * zr - zi * zi + c_re;
                zi = 2.0 * zr * zi + c_im;
                zr = next_zr;
            }

            bounded[row * GRID_SIZE + col] = !escaped;
        }
    }

    Some(FractalBitmap { bounded })
}

/// Estimate the box-counting dimension of the bounded mask.
///
/// For each box size s, N(s) counts the non-overlapping s x s boxes
/// containing at least one bounded sample; sizes with N(s) = 0 are
/// discarded, and the dimension is the negated slope of the ordinary
/// least-squares fit of ln N(s) against ln s, rounded to 6 decimals.
/// Fewer than two usable sizes yield 0.0.
pub fn box_counting_dimension(bitmap: &FractalBitmap) -> f64 {
    let mut xs = Vec::with_capacity(BOX_SIZES.len());
    let mut ys = Vec::with_capacity(BOX_SIZES.len());

    for &size in BOX_SIZES.iter() {
        let count = count_boxes(bitmap, size);
        if count == 0 {
            continue;
        }
        xs.push((size as f64).ln());
        ys.push((count as f64).ln());
    }

    if xs.len() < 2 {
        return 0.0;
    }

    round6(-ols_slope(&xs, &ys))
}

/// Convenience: seed -> (c_re, c_im, dimension). `None` when cancelled.
pub fn dimension_from_seed(seed: &[u8], cancel: Option<&AtomicBool>) -> Option<(f64, f64, f64)> {
    let (c_re, c_im) = derive_c_from_seed(seed);
    let bitmap = render_julia(c_re, c_im, cancel)?;
    Some((c_re, c_im, box_counting_dimension(&bitmap)))
}

/// A dimension is acceptable when it falls within epsilon of the
/// chain-wide target.
pub fn is_valid_dimension(dimension: f64, target: f64, epsilon: f64) -> bool {
    (dimension - target).abs() <= epsilon
}

/// Round to 6 decimal places, the stored and compared precision.
pub fn round6(value: f64) -> f64 {
    (value * 1_000_000.0).round() / 1_000_000.0
}

fn count_boxes(bitmap: &FractalBitmap, size: usize) -> usize {
    let boxes_per_side = GRID_SIZE / size;
    let mut count = 0;

    for box_row in 0..boxes_per_side {
        for box_col in 0..boxes_per_side {
            'cells: for row in box_row * size..(box_row + 1) * size {
                for col in box_col * size..(box_col + 1) * size {
                    if bitmap.is_bounded(row, col) {
                        count += 1;
                        break 'cells;
                    }
                }
            }
        }
    }

    count
}

/// Closed-form ordinary least-squares slope of y against x.
fn ols_slope(xs: &[f64], ys: &[f64]) -> f64 {
    let n = xs.len() as f64;
    let sum_x: f64 = xs.iter().sum();
    let sum_y: f64 = ys.iter().sum();
    let sum_xy: f64 = xs.iter().zip(ys.iter()).map(|(x, y)| x * y).sum();
    let sum_xx: f64 = xs.iter().map(|x| x * x).sum();

    (n * sum_xy - sum_x * sum_y) / (n * sum_xx - sum_x * sum_x)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicBool;

    #[test]
    fn test_c_derivation_from_crafted_seeds() {
        // All-zero seed maps both parts to exactly -1
        let zero_seed = [0u8; 32];
        assert_eq!(derive_c_from_seed(&zero_seed), (-1.0, -1.0));

        // 0x80 00 .. is 2^63, the midpoint, which maps to exactly 0
        let mut mid_seed = [0u8; 32];
        mid_seed[0] = 0x80;
        mid_seed[8] = 0x80;
        assert_eq!(derive_c_from_seed(&mid_seed), (0.0, 0.0));
    }

    #[test]
    fn test_fractal_seed_depends_on_every_input() {
        let base = fractal_seed("aa", "addr", 7);
        assert_ne!(base, fractal_seed("ab", "addr", 7));
        assert_ne!(base, fractal_seed("aa", "adds", 7));
        assert_ne!(base, fractal_seed("aa", "addr", 8));
        assert_eq!(base, fractal_seed("aa", "addr", 7));
        assert_eq!(base.len(), 32);
    }

    #[test]
    fn test_render_is_deterministic() {
        let seed = sha256_digest(b"test-fixture");
        let first = dimension_from_seed(&seed, None).unwrap();
        let second = dimension_from_seed(&seed, None).unwrap();
        // Bit-identical re-derivation, the property verification relies on
        assert_eq!(first, second);
    }

    #[test]
    fn test_filled_disk_dimension_near_two() {
        // c = 0 degenerates to the unit disk: orbits with |z0| <= 1 stay
        // bounded, everything else escapes
        let bitmap = render_julia(0.0, 0.0, None).unwrap();
        assert!(bitmap.bounded_count() > 0);
        assert!(!bitmap.is_bounded(0, 0)); // corner |z0| = 2*sqrt(2)

        let dimension = box_counting_dimension(&bitmap);
        assert!(
            dimension > 1.3 && dimension <= 2.0,
            "disk dimension out of range: {dimension}"
        );
    }

    #[test]
    fn test_escaping_constant_yields_zero_dimension() {
        // Far outside the Mandelbrot set every orbit escapes and the
        // bounded mask is empty
        let bitmap = render_julia(2.0, 2.0, None).unwrap();
        assert_eq!(bitmap.bounded_count(), 0);
        assert_eq!(box_counting_dimension(&bitmap), 0.0);
    }

    #[test]
    fn test_dimension_rounding_precision() {
        let seed = sha256_digest(b"test-fixture");
        let (_, _, dimension) = dimension_from_seed(&seed, None).unwrap();
        // Stored precision is exactly 6 decimals
        assert_eq!(dimension, round6(dimension));
    }

    #[test]
    fn test_cancellation_aborts_render() {
        let cancel = AtomicBool::new(true);
        assert!(render_julia(0.0, 0.0, Some(&cancel)).is_none());
    }

    #[test]
    fn test_dimension_window() {
        assert!(is_valid_dimension(1.5004, 1.5, 0.001));
        assert!(is_valid_dimension(1.499, 1.5, 0.001));
        assert!(!is_valid_dimension(1.502, 1.5, 0.001));
        assert!(is_valid_dimension(1.0, 1.5, 0.5));
    }
}
