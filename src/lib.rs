//! Per-pixel range imaging of terrain heightfields.
//!
//! A pinhole [`Camera`] looks into a scene containing a [`Terrain`]
//! heightfield; the [`RangeCalculator`] produces a range image where every
//! pixel holds the distance from the optical centre to the first terrain
//! intersection along that pixel's viewing ray. Terrain can come from real
//! data via [`Terrain::with_buffer`] or be synthesised with the
//! [`DiamondSquareGenerator`].
//!
//! The pipeline has three per-pixel stages: focal-plane pixel to camera-frame
//! unit ray, camera-frame to world-frame rotation, and a fixed-step ray march
//! against the heightfield. The CPU back-end is the numeric reference and
//! runs row-parallel; the GPU back-end dispatches the same stages as WGSL
//! compute kernels over device-resident buffers.
//!
//! ```no_run
//! use rangecast::{Buffer, Camera, DiamondSquareGenerator, RangeCalculator};
//!
//! # fn main() -> rangecast::RangeResult<()> {
//! let mut generator = DiamondSquareGenerator::with_seed(7);
//! let terrain = generator.generate(513, 513, 30.0, 0.6)?;
//!
//! let mut cam = Camera::new(std::f32::consts::FRAC_PI_2, 256, 256)?;
//! cam.set_position(glam::Vec3::new(256.0 * 30.0, 256.0 * 30.0, 800.0));
//! cam.set_pitch(std::f32::consts::FRAC_PI_2);
//!
//! let ranges = Buffer::new(256, 256, 1)?;
//! let mut calculator = RangeCalculator::cpu();
//! calculator.calculate(&cam, &terrain, &ranges)?;
//! # Ok(())
//! # }
//! ```

pub mod buffer;
pub mod camera;
pub mod diamond_square;
pub mod error;
pub mod gpu;
pub mod range;
pub mod terrain;

pub use buffer::Buffer;
pub use camera::Camera;
pub use diamond_square::DiamondSquareGenerator;
pub use error::{RangeError, RangeResult};
pub use range::{
    CancelToken, CpuRangeCalculator, GpuDeviceBuffer, GpuRangeCalculator, KernelCollection,
    RangeCalculator, RangeOptions,
};
pub use terrain::Terrain;
