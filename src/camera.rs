//! Pinhole camera model: intrinsics, pose, and the world-from-camera
//! rotation used by the coordinate-conversion stage.

use glam::Vec3;

use crate::buffer::Buffer;
use crate::error::{RangeError, RangeResult};

/// A pinhole camera looking into the scene.
///
/// Intrinsics are the horizontal field of view and the focal-plane size in
/// pixels; the size is fixed at construction, everything else is mutable.
/// Extrinsics are a world-frame position plus yaw (about world +Z) and pitch
/// (about the yawed X axis). Roll is reserved and currently always zero.
///
/// The camera frame is right-handed with X along boresight, Y to image right,
/// Z to image up.
#[derive(Clone, Debug)]
pub struct Camera {
    fov_rad: f32,
    focal_plane_size: (u16, u16),
    position: Vec3,
    yaw_rad: f32,
    pitch_rad: f32,
}

impl Camera {
    /// Create a camera with the given horizontal field of view (radians) and
    /// focal-plane size in pixels.
    ///
    /// Fails with `InvalidArgument` unless `0 < fov < pi` and both dimensions
    /// are at least one pixel.
    pub fn new(fov_rad: f32, rows: u16, cols: u16) -> RangeResult<Self> {
        validate_fov(fov_rad)?;
        if rows == 0 || cols == 0 {
            return Err(RangeError::invalid_argument(format!(
                "focal plane must be at least 1x1 pixel, got ({rows}, {cols})"
            )));
        }

        Ok(Self {
            fov_rad,
            focal_plane_size: (rows, cols),
            position: Vec3::ZERO,
            yaw_rad: 0.0,
            pitch_rad: 0.0,
        })
    }

    /// Focal length in pixels, derived from the field of view and the
    /// horizontal focal-plane size.
    // Reference: Francesco Callari, https://stackoverflow.com/a/32530762
    pub fn focal_length(&self) -> f32 {
        (self.focal_plane_size.1 as f32 / 2.0) / (self.fov_rad / 2.0).tan()
    }

    /// Horizontal field of view in radians.
    pub fn fov(&self) -> f32 {
        self.fov_rad
    }

    /// Change the field of view. Fails unless `0 < fov < pi`.
    pub fn set_fov(&mut self, fov_rad: f32) -> RangeResult<()> {
        validate_fov(fov_rad)?;
        self.fov_rad = fov_rad;
        Ok(())
    }

    /// Focal-plane size as `(rows, cols)` in pixels. Immutable after
    /// construction.
    pub fn focal_plane_dimensions(&self) -> (u16, u16) {
        self.focal_plane_size
    }

    /// World-frame position in metres.
    pub fn position(&self) -> Vec3 {
        self.position
    }

    pub fn set_position(&mut self, position: Vec3) {
        self.position = position;
    }

    /// Yaw in radians, about world +Z.
    pub fn yaw(&self) -> f32 {
        self.yaw_rad
    }

    pub fn set_yaw(&mut self, yaw_rad: f32) {
        self.yaw_rad = yaw_rad;
    }

    /// Pitch in radians, about the yawed X axis. Positive pitch tips the
    /// boresight below the horizon.
    pub fn pitch(&self) -> f32 {
        self.pitch_rad
    }

    pub fn set_pitch(&mut self, pitch_rad: f32) {
        self.pitch_rad = pitch_rad;
    }

    /// The 3x4 world-from-camera rotation, row-major with a zero fourth
    /// column (device-alignment padding, ignored by consumers).
    ///
    /// With yaw a and pitch g the matrix is
    ///
    /// ```text
    /// | cos g * cos a   -cos g * sin a   sin g |
    /// | sin a            cos a           0     |
    /// | -cos a * sin g   sin a * sin g   cos g |
    /// ```
    ///
    /// so the identity pose maps the camera-frame boresight `(1, 0, 0)` to
    /// world `(1, 0, 0)`, a 90 degree yaw maps it to `(0, 1, 0)`, and a
    /// 90 degree pitch maps it to `(0, 0, -1)`.
    pub fn rotation_rows(&self) -> [[f32; 4]; 3] {
        let (sy, cy) = self.yaw_rad.sin_cos();
        let (sp, cp) = self.pitch_rad.sin_cos();

        [
            [cp * cy, -cp * sy, sp, 0.0],
            [sy, cy, 0.0, 0.0],
            [-cy * sp, sp * sy, cp, 0.0],
        ]
    }

    /// Write [`Camera::rotation_rows`] into `out`, which must have shape
    /// `(3, 4, 1)`.
    pub fn write_rotation_matrix(&self, out: &Buffer) -> RangeResult<()> {
        if out.size() != (3, 4) || out.depth() != 1 {
            return Err(RangeError::invalid_argument(format!(
                "rotation matrix buffer must have size (3, 4, 1), got ({}, {}, {})",
                out.rows(),
                out.cols(),
                out.depth()
            )));
        }

        let rot = self.rotation_rows();
        let mut guard = out.write();
        for (r, row) in rot.iter().enumerate() {
            guard[r * 4..r * 4 + 4].copy_from_slice(row);
        }
        Ok(())
    }
}

fn validate_fov(fov_rad: f32) -> RangeResult<()> {
    if !fov_rad.is_finite() || fov_rad <= 0.0 || fov_rad >= std::f32::consts::PI {
        return Err(RangeError::invalid_argument(format!(
            "field of view must be finite and in (0, pi) radians, got {fov_rad}"
        )));
    }
    Ok(())
}
