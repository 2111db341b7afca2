//! Terrain heightfield: a depth-1 [`Buffer`] of elevations plus the metric
//! scale of one grid cell.

use crate::buffer::Buffer;
use crate::error::{RangeError, RangeResult};

/// A heightfield in world metres.
///
/// Samples are elevation Z at integer grid coordinates; between samples the
/// surface is nearest-neighbour (the ray marcher floors its grid position).
/// Clones share the underlying buffer.
#[derive(Clone, Debug)]
pub struct Terrain {
    buffer: Buffer,
    scale_m_per_cell: f32,
}

impl Terrain {
    /// Allocate a zeroed `rows x cols` heightfield with the given cell scale
    /// in metres.
    pub fn new(rows: u32, cols: u32, scale_m_per_cell: f32) -> RangeResult<Self> {
        let buffer = Buffer::new(rows, cols, 1)?;
        Self::with_buffer(buffer, scale_m_per_cell)
    }

    /// Adopt a caller-provided buffer as the heightfield. This lets a
    /// pipeline back the terrain with storage it also exposes to a device.
    ///
    /// Fails with `InvalidArgument` when the buffer depth is not 1 or the
    /// scale is not a positive finite number.
    pub fn with_buffer(buffer: Buffer, scale_m_per_cell: f32) -> RangeResult<Self> {
        if buffer.depth() != 1 {
            return Err(RangeError::invalid_argument(format!(
                "terrain buffer must have depth 1, got {}",
                buffer.depth()
            )));
        }
        if !scale_m_per_cell.is_finite() || scale_m_per_cell <= 0.0 {
            return Err(RangeError::invalid_argument(format!(
                "terrain scale must be a positive finite number of metres per cell, got {scale_m_per_cell}"
            )));
        }

        Ok(Self { buffer, scale_m_per_cell })
    }

    /// The underlying elevation buffer.
    pub fn data(&self) -> &Buffer {
        &self.buffer
    }

    /// Metres spanned by one grid cell.
    pub fn scale(&self) -> f32 {
        self.scale_m_per_cell
    }

    /// Minimum and maximum elevation in a single sweep. Consumers use this
    /// to rescale heights for display.
    pub fn height_bounds(&self) -> (f32, f32) {
        let guard = self.buffer.read();
        let (mut lo, mut hi) = (f32::INFINITY, f32::NEG_INFINITY);
        for &v in guard.iter() {
            if v < lo {
                lo = v;
            }
            if v > hi {
                hi = v;
            }
        }
        (lo, hi)
    }
}
