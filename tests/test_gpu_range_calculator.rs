// tests/test_gpu_range_calculator.rs
// GPU backend: per-stage and end-to-end parity against the CPU reference,
// kernel loading by path, and the build-failure channel. Every test skips
// cleanly on machines without a usable adapter.

use std::f32::consts::FRAC_PI_2;

use glam::Vec3;
use rangecast::gpu::{self, GpuContext};
use rangecast::{
    Buffer, Camera, CpuRangeCalculator, GpuRangeCalculator, KernelCollection, RangeError,
    RangeOptions, Terrain,
};

fn context() -> Option<&'static GpuContext> {
    let _ = env_logger::builder().is_test(true).try_init();
    match gpu::try_ctx() {
        Ok(ctx) => Some(ctx),
        Err(e) => {
            eprintln!("skipping GPU test: {e}");
            None
        }
    }
}

fn calculator() -> Option<GpuRangeCalculator> {
    let ctx = context()?;
    match GpuRangeCalculator::with_context(ctx, RangeOptions::default()) {
        Ok(calc) => Some(calc),
        Err(e) => {
            eprintln!("skipping GPU test: {e}");
            None
        }
    }
}

fn max_abs_diff(a: &Buffer, b: &Buffer) -> f32 {
    let a = a.read();
    let b = b.read();
    a.iter().zip(b.iter()).map(|(x, y)| (x - y).abs()).fold(0.0, f32::max)
}

#[test]
fn pix2cam_matches_the_cpu_reference() {
    let Some(mut gpu_calc) = calculator() else { return };
    let cam = Camera::new(FRAC_PI_2, 64, 64).unwrap();

    let cpu_out = Buffer::new(64, 64, 4).unwrap();
    let gpu_out = Buffer::new(64, 64, 4).unwrap();

    let mut cpu_calc = CpuRangeCalculator::new();
    cpu_calc.convert_pixel_to_camera_coords(&cam, &cpu_out).unwrap();
    gpu_calc.convert_pixel_to_camera_coords(&cam, &gpu_out).unwrap();

    let diff = max_abs_diff(&cpu_out, &gpu_out);
    assert!(diff < 1e-4, "max deviation from CPU reference: {diff}");
}

#[test]
fn cam2world_matches_the_cpu_reference_under_rotation() {
    let Some(mut gpu_calc) = calculator() else { return };

    let mut cam = Camera::new(FRAC_PI_2, 64, 64).unwrap();
    cam.set_yaw(std::f32::consts::FRAC_PI_4);
    cam.set_pitch(std::f32::consts::FRAC_PI_4);

    let cam_coords = Buffer::new(64, 64, 4).unwrap();
    let mut cpu_calc = CpuRangeCalculator::new();
    cpu_calc.convert_pixel_to_camera_coords(&cam, &cam_coords).unwrap();

    let cpu_out = Buffer::new(64, 64, 4).unwrap();
    let gpu_out = Buffer::new(64, 64, 4).unwrap();
    cpu_calc.convert_camera_to_world_coords(&cam, &cam_coords, &cpu_out).unwrap();
    gpu_calc.convert_camera_to_world_coords(&cam, &cam_coords, &gpu_out).unwrap();

    let diff = max_abs_diff(&cpu_out, &gpu_out);
    assert!(diff < 1e-4, "max deviation from CPU reference: {diff}");
}

#[test]
fn calculate_matches_the_cpu_reference_over_a_flat_earth() {
    let Some(mut gpu_calc) = calculator() else { return };

    let mut cam = Camera::new(FRAC_PI_2, 64, 64).unwrap();
    cam.set_position(Vec3::new(64.0 * 30.0, 64.0 * 30.0, 500.0));
    cam.set_pitch(FRAC_PI_2);
    let terrain = Terrain::new(128, 128, 30.0).unwrap();

    let cpu_out = Buffer::new(64, 64, 1).unwrap();
    let gpu_out = Buffer::new(64, 64, 1).unwrap();

    let mut cpu_calc = CpuRangeCalculator::new();
    cpu_calc.calculate(&cam, &terrain, &cpu_out).unwrap();
    gpu_calc.calculate(&cam, &terrain, &gpu_out).unwrap();

    // A pixel can land one march step apart across backends when a ray
    // grazes the hit threshold, so the bound is the step tolerance.
    let max_error = terrain.scale() * 0.2;
    let diff = max_abs_diff(&cpu_out, &gpu_out);
    assert!(diff <= max_error * 1.5, "max deviation {diff} vs step {max_error}");

    // And the boresight pixel still reads the camera height.
    let centre = gpu_out.get(32, 32, 0).unwrap();
    assert!((centre - 500.0).abs() < 15.0, "centre range = {centre}");
}

#[test]
fn kernels_load_from_a_directory_by_well_known_names() {
    let Some(ctx) = context() else { return };

    let dir = std::env::temp_dir().join("rangecast-kernels-ok");
    std::fs::create_dir_all(&dir).unwrap();
    for (name, source) in [
        ("pix_2_cam_coords.wgsl", include_str!("../src/shaders/pix_2_cam_coords.wgsl")),
        ("cam_2_world_coords.wgsl", include_str!("../src/shaders/cam_2_world_coords.wgsl")),
        ("map_range.wgsl", include_str!("../src/shaders/map_range.wgsl")),
    ] {
        std::fs::write(dir.join(name), source).unwrap();
    }

    assert!(KernelCollection::from_dir(&ctx.device, &dir).is_ok());

    let mut calc =
        GpuRangeCalculator::with_kernel_dir(ctx, RangeOptions::default(), &dir).unwrap();
    let cam = Camera::new(FRAC_PI_2, 16, 16).unwrap();
    let out = Buffer::new(16, 16, 4).unwrap();
    calc.convert_pixel_to_camera_coords(&cam, &out).unwrap();
    assert!((out.get(8, 8, 0).unwrap() - 1.0).abs() < 1e-4);
}

#[test]
fn a_missing_kernel_file_is_an_invalid_argument() {
    let Some(ctx) = context() else { return };

    let dir = std::env::temp_dir().join("rangecast-kernels-missing");
    std::fs::create_dir_all(&dir).unwrap();
    let _ = std::fs::remove_file(dir.join("pix_2_cam_coords.wgsl"));

    let err = KernelCollection::from_dir(&ctx.device, &dir).unwrap_err();
    assert!(matches!(err, RangeError::InvalidArgument(_)), "got {err:?}");
    assert!(err.to_string().contains("pix_2_cam_coords.wgsl"));
}

#[test]
fn a_broken_kernel_reports_its_build_log() {
    let Some(ctx) = context() else { return };

    let dir = std::env::temp_dir().join("rangecast-kernels-broken");
    std::fs::create_dir_all(&dir).unwrap();
    std::fs::write(dir.join("pix_2_cam_coords.wgsl"), "fn pix2cam( { not wgsl").unwrap();
    std::fs::write(
        dir.join("cam_2_world_coords.wgsl"),
        include_str!("../src/shaders/cam_2_world_coords.wgsl"),
    )
    .unwrap();
    std::fs::write(dir.join("map_range.wgsl"), include_str!("../src/shaders/map_range.wgsl"))
        .unwrap();

    let err = KernelCollection::from_dir(&ctx.device, &dir).unwrap_err();
    assert!(matches!(err, RangeError::Backend(_)), "got {err:?}");
    assert!(err.to_string().contains("pix2cam"), "log missing kernel name: {err}");
}
