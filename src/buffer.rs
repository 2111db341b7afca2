//! Row-major 2-D float grid with cheap shared-storage copies.
//!
//! `Buffer` is the carrier type for every image-shaped quantity in the crate:
//! heightfields (depth 1), per-pixel ray directions (depth 3 or 4), rotation
//! matrices (3x4), and range images (depth 1). Clones share the underlying
//! storage, so handing a `Buffer` around is an `Arc` bump, not a copy.

use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::error::{RangeError, RangeResult};

/// A 2-D grid of `f32` samples with `depth` values per cell, stored
/// contiguously in row-major order.
///
/// Element offset for `(row, col, ch)` is `row * cols * depth + col * depth + ch`.
///
/// Instances are thread-compatible, not thread-safe: concurrent access to the
/// same storage from multiple threads is only performed internally by the
/// pipeline, which partitions writes by row.
#[derive(Clone, Debug)]
pub struct Buffer {
    rows: u32,
    cols: u32,
    depth: u8,
    data: Arc<RwLock<Vec<f32>>>,
}

impl Buffer {
    /// Allocate a zero-initialised buffer.
    ///
    /// Fails with `InvalidArgument` when any dimension is zero and with
    /// `ResourceExhausted` when the element count overflows or the
    /// allocation is refused.
    pub fn new(rows: u32, cols: u32, depth: u8) -> RangeResult<Self> {
        if rows == 0 || cols == 0 || depth == 0 {
            return Err(RangeError::invalid_argument(format!(
                "buffer dimensions must be non-zero, got ({rows}, {cols}, {depth})"
            )));
        }

        let len = (rows as usize)
            .checked_mul(cols as usize)
            .and_then(|n| n.checked_mul(depth as usize))
            .ok_or_else(|| {
                RangeError::resource_exhausted(format!(
                    "buffer of ({rows}, {cols}, {depth}) overflows the address space"
                ))
            })?;

        let mut data = Vec::new();
        data.try_reserve_exact(len).map_err(|_| {
            RangeError::resource_exhausted(format!(
                "failed to allocate {len} floats for a ({rows}, {cols}, {depth}) buffer"
            ))
        })?;
        data.resize(len, 0.0);

        Ok(Self { rows, cols, depth, data: Arc::new(RwLock::new(data)) })
    }

    /// Number of rows.
    pub fn rows(&self) -> u32 {
        self.rows
    }

    /// Number of columns.
    pub fn cols(&self) -> u32 {
        self.cols
    }

    /// Size as `(rows, cols)`.
    pub fn size(&self) -> (u32, u32) {
        (self.rows, self.cols)
    }

    /// Number of values per cell.
    pub fn depth(&self) -> u8 {
        self.depth
    }

    /// Total element count (`rows * cols * depth`).
    pub fn len(&self) -> usize {
        self.rows as usize * self.cols as usize * self.depth as usize
    }

    /// True when this handle and `other` share the same underlying storage.
    pub fn shares_storage(&self, other: &Buffer) -> bool {
        Arc::ptr_eq(&self.data, &other.data)
    }

    /// Read the sample at `(row, col, ch)`.
    pub fn get(&self, row: u32, col: u32, ch: u8) -> RangeResult<f32> {
        let idx = self.offset(row, col, ch)?;
        Ok(self.read()[idx])
    }

    /// Write the sample at `(row, col, ch)`.
    pub fn set(&self, row: u32, col: u32, ch: u8, value: f32) -> RangeResult<()> {
        let idx = self.offset(row, col, ch)?;
        self.write()[idx] = value;
        Ok(())
    }

    /// Set every element to `value`.
    pub fn fill(&self, value: f32) {
        self.write().fill(value);
    }

    /// Lock the storage for bulk reads. Callers index the slice with
    /// [`Buffer::offset`] arithmetic.
    pub fn read(&self) -> RwLockReadGuard<'_, Vec<f32>> {
        self.data.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Lock the storage for bulk writes.
    pub fn write(&self) -> RwLockWriteGuard<'_, Vec<f32>> {
        self.data.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Flat offset of `(row, col, ch)`, bounds-checked.
    pub fn offset(&self, row: u32, col: u32, ch: u8) -> RangeResult<usize> {
        if row >= self.rows || col >= self.cols || ch >= self.depth {
            return Err(RangeError::out_of_range(format!(
                "({row}, {col}, {ch}) out of range for buffer with size ({}, {}, {})",
                self.rows, self.cols, self.depth
            )));
        }
        Ok(row as usize * self.cols as usize * self.depth as usize
            + col as usize * self.depth as usize
            + ch as usize)
    }
}
