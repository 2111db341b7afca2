//! Fractal terrain synthesis with the diamond-square algorithm.
//!
//! Midpoint displacement over a `2^n + 1` square grid: the square pass sets
//! each tile centre from its four corners, the diamond pass sets each edge
//! midpoint from its four axial neighbours, and both add a uniform random
//! offset whose magnitude shrinks with the tile size.

use rand::distributions::{Distribution, Uniform};
use rand::rngs::StdRng;
use rand::SeedableRng;

use crate::buffer::Buffer;
use crate::error::{RangeError, RangeResult};
use crate::terrain::Terrain;

/// Terrain generator driving a seeded RNG through the diamond-square
/// recursion.
///
/// Output heights are not clamped; they drift outside `[0, MAX_HEIGHT_M]`
/// and consumers rescale for display.
#[derive(Debug)]
pub struct DiamondSquareGenerator {
    rng: StdRng,
}

impl Default for DiamondSquareGenerator {
    fn default() -> Self {
        Self::new()
    }
}

impl DiamondSquareGenerator {
    /// Nominal peak height in metres; the four grid corners start at half
    /// this value.
    pub const MAX_HEIGHT_M: f32 = 100.0;

    /// Generator seeded from OS entropy.
    pub fn new() -> Self {
        Self { rng: StdRng::from_entropy() }
    }

    /// Generator with a fixed seed, for reproducible terrain.
    pub fn with_seed(seed: u64) -> Self {
        Self { rng: StdRng::seed_from_u64(seed) }
    }

    /// Synthesise a `rows x cols` terrain.
    ///
    /// `rows` must equal `cols` and be `2^n + 1` for some `n >= 1`;
    /// `roughness` scales the random offsets and must lie in `(0, 1]`;
    /// `scale` is metres per grid cell.
    pub fn generate(
        &mut self,
        rows: u32,
        cols: u32,
        scale: f32,
        roughness: f32,
    ) -> RangeResult<Terrain> {
        validate_grid(rows, cols)?;
        let buffer = Buffer::new(rows, cols, 1)?;
        self.generate_into(buffer, scale, roughness)
    }

    /// Synthesise into a caller-provided depth-1 buffer (so the pipeline can
    /// back the terrain with device-visible storage). The buffer must
    /// satisfy the same size constraints as [`DiamondSquareGenerator::generate`].
    pub fn generate_into(
        &mut self,
        buffer: Buffer,
        scale: f32,
        roughness: f32,
    ) -> RangeResult<Terrain> {
        let (rows, cols) = buffer.size();
        validate_grid(rows, cols)?;
        if !roughness.is_finite() || roughness <= 0.0 || roughness > 1.0 {
            return Err(RangeError::invalid_argument(format!(
                "roughness must lie in (0, 1], got {roughness}"
            )));
        }

        let terrain = Terrain::with_buffer(buffer, scale)?;
        let rows = rows as usize;
        let cols = cols as usize;

        {
            let mut grid = terrain.data().write();

            let corner = Self::MAX_HEIGHT_M / 2.0;
            grid[0] = corner;
            grid[cols - 1] = corner;
            grid[(rows - 1) * cols] = corner;
            grid[(rows - 1) * cols + cols - 1] = corner;

            let mut step = rows - 1;
            let mut half = step / 2;

            while half >= 1 {
                let feature_scale = step as f32 * roughness;
                let offsets = Uniform::new_inclusive(-feature_scale, feature_scale);

                square_pass(&mut grid, rows, cols, step, half, &mut self.rng, &offsets);
                diamond_pass(&mut grid, rows, cols, step, half, &mut self.rng, &offsets);

                step = half;
                half = step / 2;
            }
        }

        Ok(terrain)
    }
}

/// Set each tile centre `(r, c)` from the mean of its four diagonal corners,
/// skipping corners that fall outside the grid (the divisor counts only the
/// corners actually summed).
fn square_pass(
    grid: &mut [f32],
    rows: usize,
    cols: usize,
    step: usize,
    half: usize,
    rng: &mut StdRng,
    offsets: &Uniform<f32>,
) {
    let mut r = half;
    while r < rows {
        let mut c = half;
        while c < cols {
            let lower_row = r >= half;
            let upper_row = r + half < rows;
            let lower_col = c >= half;
            let upper_col = c + half < cols;

            let mut sum = 0.0f32;
            let mut included = 0u32;

            if lower_row && lower_col {
                sum += grid[(r - half) * cols + (c - half)];
                included += 1;
            }
            if lower_row && upper_col {
                sum += grid[(r - half) * cols + (c + half)];
                included += 1;
            }
            if upper_row && lower_col {
                sum += grid[(r + half) * cols + (c - half)];
                included += 1;
            }
            if upper_row && upper_col {
                sum += grid[(r + half) * cols + (c + half)];
                included += 1;
            }

            grid[r * cols + c] = sum / included as f32 + offsets.sample(rng);
            c += step;
        }
        r += step;
    }
}

/// Set each edge midpoint from the mean of its in-bounds axial neighbours at
/// distance `half`.
fn diamond_pass(
    grid: &mut [f32],
    rows: usize,
    cols: usize,
    step: usize,
    half: usize,
    rng: &mut StdRng,
    offsets: &Uniform<f32>,
) {
    let mut r = 0;
    while r < rows {
        let mut c = (r + half) % step;
        while c < cols {
            let mut sum = 0.0f32;
            let mut included = 0u32;

            if c >= half {
                sum += grid[r * cols + (c - half)];
                included += 1;
            }
            if c + half < cols {
                sum += grid[r * cols + (c + half)];
                included += 1;
            }
            if r >= half {
                sum += grid[(r - half) * cols + c];
                included += 1;
            }
            if r + half < rows {
                sum += grid[(r + half) * cols + c];
                included += 1;
            }

            grid[r * cols + c] = sum / included as f32 + offsets.sample(rng);
            c += step;
        }
        r += half;
    }
}

fn validate_grid(rows: u32, cols: u32) -> RangeResult<()> {
    if rows != cols {
        return Err(RangeError::invalid_argument(format!(
            "diamond-square requires a square grid, got ({rows}, {cols})"
        )));
    }
    if rows < 3 || !(rows - 1).is_power_of_two() {
        return Err(RangeError::invalid_argument(format!(
            "diamond-square requires a side of 2^n + 1 cells (n >= 1), got {rows}"
        )));
    }
    Ok(())
}
