// tests/test_terrain_generator.rs
// Diamond-square generator: size validation, corner seeding, coverage, and
// seeded reproducibility.

use rangecast::{Buffer, DiamondSquareGenerator, RangeError};

#[test]
fn generates_a_257_grid_with_seeded_corners() {
    let mut generator = DiamondSquareGenerator::new();
    let terrain = generator.generate(257, 257, 25.0, 0.5).unwrap();

    assert_eq!(terrain.data().size(), (257, 257));
    assert_eq!(terrain.scale(), 25.0);

    // The four corners are initialised to half the nominal peak height and
    // never rewritten.
    let corner = DiamondSquareGenerator::MAX_HEIGHT_M / 2.0;
    assert_eq!(terrain.data().get(0, 0, 0).unwrap(), corner);
    assert_eq!(terrain.data().get(0, 256, 0).unwrap(), corner);
    assert_eq!(terrain.data().get(256, 0, 0).unwrap(), corner);
    assert_eq!(terrain.data().get(256, 256, 0).unwrap(), corner);
}

#[test]
fn every_cell_is_finite_and_the_field_is_not_flat() {
    let mut generator = DiamondSquareGenerator::with_seed(99);
    let terrain = generator.generate(257, 257, 25.0, 0.5).unwrap();

    let guard = terrain.data().read();
    let mut sum = 0.0f64;
    for &v in guard.iter() {
        assert!(v.is_finite(), "non-finite height {v}");
        sum += v as f64;
    }
    let mean = sum / guard.len() as f64;
    let variance = guard
        .iter()
        .map(|&v| {
            let d = v as f64 - mean;
            d * d
        })
        .sum::<f64>()
        / guard.len() as f64;
    assert!(variance > 0.0, "generated terrain is flat");
}

#[test]
fn no_cell_is_left_at_the_initial_value() {
    // Seed the buffer with NaN: a surviving NaN marks a cell the recursion
    // never visited, and a NaN-polluted mean marks a read before write.
    let buffer = Buffer::new(129, 129, 1).unwrap();
    buffer.fill(f32::NAN);

    let mut generator = DiamondSquareGenerator::with_seed(5);
    let terrain = generator.generate_into(buffer, 10.0, 0.7).unwrap();

    let guard = terrain.data().read();
    for (i, &v) in guard.iter().enumerate() {
        assert!(v.is_finite(), "cell {i} was never written (or read too early)");
    }
}

#[test]
fn seeded_generation_is_reproducible() {
    let terrain_a = DiamondSquareGenerator::with_seed(1234)
        .generate(65, 65, 10.0, 0.5)
        .unwrap();
    let terrain_b = DiamondSquareGenerator::with_seed(1234)
        .generate(65, 65, 10.0, 0.5)
        .unwrap();

    let a = terrain_a.data().read();
    let b = terrain_b.data().read();
    assert_eq!(&*a, &*b);

    let terrain_c = DiamondSquareGenerator::with_seed(4321)
        .generate(65, 65, 10.0, 0.5)
        .unwrap();
    let c = terrain_c.data().read();
    assert_ne!(&*a, &*c);
}

#[test]
fn non_conformant_sizes_fail_at_entry() {
    let mut generator = DiamondSquareGenerator::new();
    assert!(matches!(
        generator.generate(256, 256, 25.0, 0.5),
        Err(RangeError::InvalidArgument(_))
    ));
    assert!(matches!(
        generator.generate(257, 129, 25.0, 0.5),
        Err(RangeError::InvalidArgument(_))
    ));
    assert!(matches!(
        generator.generate(100, 100, 25.0, 0.5),
        Err(RangeError::InvalidArgument(_))
    ));
    assert!(matches!(
        generator.generate(1, 1, 25.0, 0.5),
        Err(RangeError::InvalidArgument(_))
    ));
}

#[test]
fn roughness_and_scale_are_validated() {
    let mut generator = DiamondSquareGenerator::new();
    assert!(generator.generate(65, 65, 25.0, 0.0).is_err());
    assert!(generator.generate(65, 65, 25.0, 1.5).is_err());
    assert!(generator.generate(65, 65, 25.0, -0.1).is_err());
    assert!(generator.generate(65, 65, 0.0, 0.5).is_err());
    assert!(generator.generate(65, 65, -30.0, 0.5).is_err());
    assert!(generator.generate(65, 65, 25.0, 1.0).is_ok());
}

#[test]
fn generate_into_adopts_the_caller_buffer() {
    let buffer = Buffer::new(129, 129, 1).unwrap();
    let mut generator = DiamondSquareGenerator::with_seed(11);
    let terrain = generator.generate_into(buffer.clone(), 30.0, 0.5).unwrap();

    assert!(terrain.data().shares_storage(&buffer));
    // The caller's handle sees the generated heights.
    assert_eq!(
        buffer.get(0, 0, 0).unwrap(),
        DiamondSquareGenerator::MAX_HEIGHT_M / 2.0
    );
}

#[test]
fn smallest_grid_is_a_single_refinement() {
    let mut generator = DiamondSquareGenerator::with_seed(3);
    let terrain = generator.generate(3, 3, 1.0, 1.0).unwrap();

    let corner = DiamondSquareGenerator::MAX_HEIGHT_M / 2.0;
    let data = terrain.data();
    assert_eq!(data.get(0, 0, 0).unwrap(), corner);

    // The centre is the corner mean plus an offset bounded by the feature
    // scale (step 2, roughness 1).
    let centre = data.get(1, 1, 0).unwrap();
    assert!((centre - corner).abs() <= 2.0, "centre = {centre}");

    // Edge midpoints average three in-bounds neighbours.
    for &(r, c) in &[(0u32, 1u32), (1, 0), (1, 2), (2, 1)] {
        let v = data.get(r, c, 0).unwrap();
        assert!(v.is_finite() && v != 0.0, "({r}, {c}) = {v}");
    }
}
