//! Range-image pipeline: pixel rays -> world rays -> ray-marched ranges.
//!
//! [`RangeCalculator`] tags the two interchangeable back-ends; both expose
//! the same four operations with the same shape contracts, and both honour
//! [`RangeOptions`] for the marcher tolerances.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::buffer::Buffer;
use crate::camera::Camera;
use crate::error::{RangeError, RangeResult};
use crate::terrain::Terrain;

pub mod cpu;
pub mod gpu;

pub use cpu::CpuRangeCalculator;
pub use gpu::{GpuDeviceBuffer, GpuRangeCalculator, KernelCollection};

/// Cooperative cancellation for the CPU pipeline. Cloning shares the flag;
/// the pipeline checks it between row tiles and fails with `Cancelled`.
#[derive(Clone, Debug, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Trip the token. Every holder observes the cancellation.
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Relaxed)
    }
}

/// Tuning knobs for the ray marcher.
#[derive(Clone, Debug)]
pub struct RangeOptions {
    /// Step tolerance as a fraction of the terrain cell scale:
    /// `max_error = scale * max_error_ratio`. Smaller ratios cost
    /// proportionally more march iterations.
    pub max_error_ratio: f32,
    /// March cutoff in metres. Defaults to the terrain's diagonal upper
    /// bound `scale * rows * sqrt(3)`, which guarantees termination on any
    /// bounded heightfield.
    pub max_range: Option<f32>,
    /// Optional cooperative cancellation, observed by the CPU back-end.
    pub cancel: Option<CancelToken>,
}

impl Default for RangeOptions {
    fn default() -> Self {
        Self { max_error_ratio: 0.2, max_range: None, cancel: None }
    }
}

impl RangeOptions {
    pub(crate) fn validate(&self) -> RangeResult<()> {
        if !self.max_error_ratio.is_finite() || self.max_error_ratio <= 0.0 {
            return Err(RangeError::invalid_argument(format!(
                "max_error_ratio must be positive and finite, got {}",
                self.max_error_ratio
            )));
        }
        if let Some(max_range) = self.max_range {
            if !max_range.is_finite() || max_range <= 0.0 {
                return Err(RangeError::invalid_argument(format!(
                    "max_range must be positive and finite, got {max_range}"
                )));
            }
        }
        Ok(())
    }

    /// Step tolerance in metres for the given terrain.
    pub(crate) fn max_error(&self, terrain: &Terrain) -> f32 {
        terrain.scale() * self.max_error_ratio
    }

    /// March cutoff in metres for the given terrain.
    pub(crate) fn max_range(&self, terrain: &Terrain) -> f32 {
        self.max_range
            .unwrap_or_else(|| terrain.scale() * terrain.data().rows() as f32 * 3.0f32.sqrt())
    }
}

/// A range calculator with a tagged back-end.
///
/// The four operations are identical in contract across variants; the GPU
/// variant additionally keeps its intermediates device-resident inside
/// [`RangeCalculator::calculate`].
pub enum RangeCalculator {
    Cpu(CpuRangeCalculator),
    Gpu(GpuRangeCalculator),
}

impl RangeCalculator {
    /// CPU back-end with default options.
    pub fn cpu() -> Self {
        RangeCalculator::Cpu(CpuRangeCalculator::new())
    }

    /// CPU back-end with explicit options.
    pub fn cpu_with_options(options: RangeOptions) -> RangeResult<Self> {
        Ok(RangeCalculator::Cpu(CpuRangeCalculator::with_options(options)?))
    }

    /// GPU back-end on the process-wide context, embedded kernels.
    pub fn gpu() -> RangeResult<Self> {
        Ok(RangeCalculator::Gpu(GpuRangeCalculator::new()?))
    }

    /// Fill `out` (shape `(rows, cols, 3|4)`) with unit rays from each pixel
    /// through the pinhole, in the camera frame.
    pub fn convert_pixel_to_camera_coords(
        &mut self,
        cam: &Camera,
        out: &Buffer,
    ) -> RangeResult<()> {
        match self {
            RangeCalculator::Cpu(c) => c.convert_pixel_to_camera_coords(cam, out),
            RangeCalculator::Gpu(c) => c.convert_pixel_to_camera_coords(cam, out),
        }
    }

    /// Rotate camera-frame rays into the world frame using the camera pose.
    pub fn convert_camera_to_world_coords(
        &mut self,
        cam: &Camera,
        cam_coords: &Buffer,
        out: &Buffer,
    ) -> RangeResult<()> {
        match self {
            RangeCalculator::Cpu(c) => c.convert_camera_to_world_coords(cam, cam_coords, out),
            RangeCalculator::Gpu(c) => c.convert_camera_to_world_coords(cam, cam_coords, out),
        }
    }

    /// March each world ray against the terrain and write per-pixel range in
    /// metres into `out` (shape `(rows, cols, 1)`).
    pub fn compute_range(
        &mut self,
        cam: &Camera,
        terrain: &Terrain,
        world_coords: &Buffer,
        out: &Buffer,
    ) -> RangeResult<()> {
        match self {
            RangeCalculator::Cpu(c) => c.compute_range(cam, terrain, world_coords, out),
            RangeCalculator::Gpu(c) => c.compute_range(cam, terrain, world_coords, out),
        }
    }

    /// Run all three stages, reusing internally-owned intermediates.
    pub fn calculate(&mut self, cam: &Camera, terrain: &Terrain, out: &Buffer) -> RangeResult<()> {
        match self {
            RangeCalculator::Cpu(c) => c.calculate(cam, terrain, out),
            RangeCalculator::Gpu(c) => c.calculate(cam, terrain, out),
        }
    }
}

/// Check that `buf` matches the camera's focal plane with one of the
/// accepted depths. The message mirrors what the caller got wrong.
pub(crate) fn expect_shape(
    buf: &Buffer,
    what: &str,
    rows: u16,
    cols: u16,
    depths: &[u8],
) -> RangeResult<()> {
    let same_rows = buf.rows() == rows as u32;
    let same_cols = buf.cols() == cols as u32;
    if !same_rows || !same_cols || !depths.contains(&buf.depth()) {
        return Err(RangeError::invalid_argument(format!(
            "expected {what} buffer with size ({rows}, {cols}, {depths:?}) but got ({}, {}, {})",
            buf.rows(),
            buf.cols(),
            buf.depth()
        )));
    }
    Ok(())
}

/// The pipeline locks input and output storage simultaneously, so the two
/// must not alias.
pub(crate) fn expect_distinct(a: &Buffer, b: &Buffer, what: &str) -> RangeResult<()> {
    if a.shares_storage(b) {
        return Err(RangeError::invalid_argument(format!(
            "{what} must not share storage with the output buffer"
        )));
    }
    Ok(())
}
