//! Property-based checks of the pixel/coordinate mapping.

use canopyjoin::GeoTransform;
use proptest::prelude::*;

proptest! {
    /// The centre of any pixel maps back onto that pixel
    #[test]
    fn pixel_centre_round_trips(
        origin_x in -1.0e6f64..1.0e6,
        origin_y in -1.0e6f64..1.0e7,
        res_x in 0.5f64..100.0,
        res_y in 0.5f64..100.0,
        row in 0usize..10_000,
        col in 0usize..10_000,
    ) {
        let gt = GeoTransform::new([origin_x, res_x, 0.0, origin_y, 0.0, -res_y]);
        let (x, y) = gt.pixel_center(row, col);
        prop_assert_eq!(gt.pixel_index(x, y), Some((row as i64, col as i64)));
    }

    /// Inverting twice gives back the original coefficients
    #[test]
    fn inverse_of_inverse_is_identity(
        origin_x in -1.0e5f64..1.0e5,
        origin_y in -1.0e5f64..1.0e5,
        res in 1.0f64..50.0,
    ) {
        let gt = GeoTransform::new([origin_x, res, 0.0, origin_y, 0.0, -res]);
        let back = gt.invert().and_then(|inv| inv.invert()).unwrap();
        for (a, b) in gt.0.iter().zip(back.0.iter()) {
            prop_assert!((a - b).abs() < 1e-6 * a.abs().max(1.0));
        }
    }
}

#[test]
fn degenerate_transform_has_no_inverse() {
    let gt = GeoTransform::new([0.0, 0.0, 0.0, 0.0, 0.0, 0.0]);
    assert!(gt.invert().is_none());
    assert!(gt.pixel_index(1.0, 1.0).is_none());
}
