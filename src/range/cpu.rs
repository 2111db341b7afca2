//! CPU reference implementation of the range pipeline.
//!
//! All three stages are per-pixel independent and run row-parallel on the
//! rayon pool. The marcher takes fixed steps in grid units; accuracy against
//! iteration count is governed by [`RangeOptions::max_error_ratio`].

use glam::Vec3;
use rayon::prelude::*;

use crate::buffer::Buffer;
use crate::camera::Camera;
use crate::error::{RangeError, RangeResult};
use crate::range::{expect_distinct, expect_shape, CancelToken, RangeOptions};
use crate::terrain::Terrain;

/// CPU range calculator. Owns reusable intermediates for
/// [`CpuRangeCalculator::calculate`]; not thread-safe, one instance per
/// thread.
#[derive(Debug, Default)]
pub struct CpuRangeCalculator {
    options: RangeOptions,
    camera_coords: Option<Buffer>,
    world_coords: Option<Buffer>,
}

impl CpuRangeCalculator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_options(options: RangeOptions) -> RangeResult<Self> {
        options.validate()?;
        Ok(Self { options, camera_coords: None, world_coords: None })
    }

    pub fn options(&self) -> &RangeOptions {
        &self.options
    }

    /// Stage 1: unit ray through each pixel, in the camera frame.
    ///
    /// For pixel `(r, c)` the ray is `normalize(f, c - cols/2, -(r - rows/2))`
    /// with X along boresight, Y to image right, Z to image up; the centre
    /// pixel comes out exactly `(1, 0, 0)`. Channel 3, when present, is
    /// zeroed padding.
    pub fn convert_pixel_to_camera_coords(
        &mut self,
        cam: &Camera,
        out: &Buffer,
    ) -> RangeResult<()> {
        let (rows, cols) = cam.focal_plane_dimensions();
        expect_shape(out, "camera-coordinate", rows, cols, &[3, 4])?;

        let depth = out.depth() as usize;
        let stride = cols as usize * depth;
        let f = cam.focal_length();
        let half_rows = rows as f32 / 2.0;
        let half_cols = cols as f32 / 2.0;
        let cancel = self.options.cancel.clone();

        let mut guard = out.write();
        guard.par_chunks_mut(stride).enumerate().try_for_each(|(r, row)| {
            check_cancel(&cancel)?;
            let dr = r as f32 - half_rows;
            for c in 0..cols as usize {
                let dc = c as f32 - half_cols;
                // Divide by the length rather than multiply by its
                // reciprocal so the centre pixel comes out exactly (1, 0, 0).
                let v = Vec3::new(f, dc, -dr);
                let v = v / v.length();
                let o = c * depth;
                row[o] = v.x;
                row[o + 1] = v.y;
                row[o + 2] = v.z;
                if depth == 4 {
                    row[o + 3] = 0.0;
                }
            }
            Ok(())
        })
    }

    /// Stage 2: rotate camera-frame rays into the world frame with the
    /// camera's yaw/pitch rotation, loaded once per call.
    pub fn convert_camera_to_world_coords(
        &mut self,
        cam: &Camera,
        cam_coords: &Buffer,
        out: &Buffer,
    ) -> RangeResult<()> {
        let (rows, cols) = cam.focal_plane_dimensions();
        expect_shape(cam_coords, "camera-coordinate", rows, cols, &[3, 4])?;
        expect_shape(out, "world-coordinate", rows, cols, &[cam_coords.depth()])?;
        expect_distinct(cam_coords, out, "the camera-coordinate input")?;

        let depth = out.depth() as usize;
        let stride = cols as usize * depth;
        let rot = cam.rotation_rows();
        let r0 = Vec3::new(rot[0][0], rot[0][1], rot[0][2]);
        let r1 = Vec3::new(rot[1][0], rot[1][1], rot[1][2]);
        let r2 = Vec3::new(rot[2][0], rot[2][1], rot[2][2]);
        let cancel = self.options.cancel.clone();

        let input = cam_coords.read();
        let mut output = out.write();
        output
            .par_chunks_mut(stride)
            .zip(input.par_chunks(stride))
            .try_for_each(|(out_row, in_row)| {
                check_cancel(&cancel)?;
                for c in 0..cols as usize {
                    let o = c * depth;
                    let v = Vec3::new(in_row[o], in_row[o + 1], in_row[o + 2]);
                    out_row[o] = r0.dot(v);
                    out_row[o + 1] = r1.dot(v);
                    out_row[o + 2] = r2.dot(v);
                    if depth == 4 {
                        out_row[o + 3] = 0.0;
                    }
                }
                Ok(())
            })
    }

    /// Stage 3: march each world ray from the camera position until it dips
    /// below the heightfield, writing range in metres.
    pub fn compute_range(
        &mut self,
        cam: &Camera,
        terrain: &Terrain,
        world_coords: &Buffer,
        out: &Buffer,
    ) -> RangeResult<()> {
        let (rows, cols) = cam.focal_plane_dimensions();
        expect_shape(world_coords, "world-coordinate", rows, cols, &[3, 4])?;
        expect_shape(out, "range", rows, cols, &[1])?;
        expect_distinct(world_coords, out, "the world-coordinate input")?;
        expect_distinct(terrain.data(), out, "the terrain heightfield")?;

        let scale = terrain.scale();
        let max_error = self.options.max_error(terrain);
        let max_range = self.options.max_range(terrain);
        let step = max_error / scale;
        let iterations = (max_range / max_error).ceil() as u32;
        let (t_rows, t_cols) = terrain.data().size();
        let origin_grid = cam.position() / scale;

        let depth = world_coords.depth() as usize;
        let ray_stride = cols as usize * depth;
        let cancel = self.options.cancel.clone();

        let heights = terrain.data().read();
        let rays = world_coords.read();
        let mut ranges = out.write();
        ranges
            .par_chunks_mut(cols as usize)
            .zip(rays.par_chunks(ray_stride))
            .try_for_each(|(range_row, ray_row)| {
                check_cancel(&cancel)?;
                for c in 0..cols as usize {
                    let o = c * depth;
                    let dir = Vec3::new(ray_row[o], ray_row[o + 1], ray_row[o + 2]);
                    range_row[c] = march_ray(
                        origin_grid,
                        dir,
                        &heights,
                        t_rows,
                        t_cols,
                        step,
                        iterations,
                        scale,
                        max_range,
                    );
                }
                Ok(())
            })
    }

    /// All three stages back to back, reusing cached intermediates whenever
    /// the camera's focal plane still matches their shape.
    pub fn calculate(&mut self, cam: &Camera, terrain: &Terrain, out: &Buffer) -> RangeResult<()> {
        let (rows, cols) = cam.focal_plane_dimensions();
        expect_shape(out, "range", rows, cols, &[1])?;

        let cam_coords = ensure_intermediate(&mut self.camera_coords, rows as u32, cols as u32)?;
        let world_coords = ensure_intermediate(&mut self.world_coords, rows as u32, cols as u32)?;

        self.convert_pixel_to_camera_coords(cam, &cam_coords)?;
        self.convert_camera_to_world_coords(cam, &cam_coords, &world_coords)?;
        self.compute_range(cam, terrain, &world_coords, out)
    }
}

/// March from `origin_grid` along `dir` (both in grid units) until the ray
/// dips to or below the sampled height. Grid samples are clamped to the
/// terrain bounds, which extends the edge heights to an infinite plane.
#[allow(clippy::too_many_arguments)]
fn march_ray(
    origin_grid: Vec3,
    dir: Vec3,
    heights: &[f32],
    t_rows: u32,
    t_cols: u32,
    step: f32,
    iterations: u32,
    scale: f32,
    max_range: f32,
) -> f32 {
    let mut p = origin_grid;
    for _ in 0..iterations {
        p += dir * step;

        let ri = p.x.floor().clamp(0.0, (t_rows - 1) as f32) as usize;
        let ci = p.y.floor().clamp(0.0, (t_cols - 1) as f32) as usize;
        let height = heights[ri * t_cols as usize + ci];

        if p.z <= height {
            break;
        }
    }

    (scale * (p - origin_grid).length()).clamp(0.0, max_range)
}

fn ensure_intermediate(slot: &mut Option<Buffer>, rows: u32, cols: u32) -> RangeResult<Buffer> {
    match slot {
        Some(buf) if buf.size() == (rows, cols) => Ok(buf.clone()),
        _ => {
            let buf = Buffer::new(rows, cols, 4)?;
            *slot = Some(buf.clone());
            Ok(buf)
        }
    }
}

fn check_cancel(cancel: &Option<CancelToken>) -> RangeResult<()> {
    match cancel {
        Some(token) if token.is_cancelled() => Err(RangeError::Cancelled),
        _ => Ok(()),
    }
}
