// tests/test_buffer.rs
// Buffer storage semantics: zero-init, bounds checks, shared shallow copies,
// and the row-major (row, col, channel) offset arithmetic.

use rangecast::{Buffer, RangeError};

#[test]
fn construction_zero_initialises() {
    let b = Buffer::new(4, 5, 3).unwrap();
    assert_eq!(b.size(), (4, 5));
    assert_eq!(b.depth(), 3);
    assert_eq!(b.len(), 60);
    for r in 0..4 {
        for c in 0..5 {
            for ch in 0..3 {
                assert_eq!(b.get(r, c, ch).unwrap(), 0.0);
            }
        }
    }
}

#[test]
fn set_get_round_trips_every_cell() {
    // Write a distinct value everywhere and read it all back; any collision
    // in the offset arithmetic would overwrite an earlier cell.
    let b = Buffer::new(3, 4, 3).unwrap();
    for r in 0..3 {
        for c in 0..4 {
            for ch in 0..3 {
                let v = (r * 100 + c * 10 + ch as u32) as f32;
                b.set(r, c, ch, v).unwrap();
            }
        }
    }
    for r in 0..3 {
        for c in 0..4 {
            for ch in 0..3 {
                let expected = (r * 100 + c * 10 + ch as u32) as f32;
                assert_eq!(b.get(r, c, ch).unwrap(), expected, "({r}, {c}, {ch})");
            }
        }
    }
}

#[test]
fn out_of_range_indexing_fails() {
    let b = Buffer::new(4, 4, 1).unwrap();
    assert!(matches!(b.get(4, 0, 0), Err(RangeError::OutOfRange(_))));
    assert!(matches!(b.get(0, 4, 0), Err(RangeError::OutOfRange(_))));
    assert!(matches!(b.get(0, 0, 1), Err(RangeError::OutOfRange(_))));
    assert!(matches!(b.set(9, 9, 0, 1.0), Err(RangeError::OutOfRange(_))));
}

#[test]
fn clones_share_storage() {
    let a = Buffer::new(2, 2, 1).unwrap();
    let b = a.clone();
    assert!(a.shares_storage(&b));

    a.set(1, 1, 0, 3.5).unwrap();
    assert_eq!(b.get(1, 1, 0).unwrap(), 3.5);

    // A fresh allocation of the same shape is distinct storage.
    let c = Buffer::new(2, 2, 1).unwrap();
    assert!(!a.shares_storage(&c));
    assert_eq!(c.get(1, 1, 0).unwrap(), 0.0);
}

#[test]
fn zero_dimensions_are_rejected() {
    assert!(matches!(Buffer::new(0, 4, 1), Err(RangeError::InvalidArgument(_))));
    assert!(matches!(Buffer::new(4, 0, 1), Err(RangeError::InvalidArgument(_))));
    assert!(matches!(Buffer::new(4, 4, 0), Err(RangeError::InvalidArgument(_))));
}

#[test]
fn absurd_sizes_exhaust_rather_than_overflow() {
    let err = Buffer::new(u32::MAX, u32::MAX, 4).unwrap_err();
    assert!(matches!(err, RangeError::ResourceExhausted(_)), "got {err:?}");
}

#[test]
fn fill_overwrites_every_element() {
    let b = Buffer::new(3, 3, 2).unwrap();
    b.fill(7.25);
    for r in 0..3 {
        for c in 0..3 {
            for ch in 0..2 {
                assert_eq!(b.get(r, c, ch).unwrap(), 7.25);
            }
        }
    }
}
