//! Property tests for unit-aware arithmetic, masking and discovery keys.

use std::collections::HashSet;

use proptest::prelude::*;
use sweepstore::discovery::unique_axes;
use sweepstore::{DataFilter, DataValue, Error, SourceKind};

fn value(values: Vec<f64>, units: &str) -> DataValue {
    DataValue::from_vec("x", SourceKind::Created, values, Some(units))
}

fn close(a: f64, b: f64) -> bool {
    (a - b).abs() <= 1e-9 * a.abs().max(b.abs()).max(1.0)
}

// ============================================================================
// 1. Arithmetic identities
// ============================================================================

proptest! {
    #[test]
    fn test_add_then_sub_is_identity(
        pairs in prop::collection::vec((-1e6f64..1e6, -1e6f64..1e6), 1..20)
    ) {
        let (a, b): (Vec<f64>, Vec<f64>) = pairs.into_iter().unzip();
        let va = value(a.clone(), "USD/m**3");
        let vb = value(b, "USD/m**3");
        let back = va.checked_add(&vb).unwrap().checked_sub(&vb).unwrap();
        for (got, want) in back.to_vec().iter().zip(&a) {
            prop_assert!(close(*got, *want), "{got} != {want}");
        }
        prop_assert_eq!(back.units(), "USD/m**3");
    }

    #[test]
    fn test_scale_then_unscale_is_identity(
        a in prop::collection::vec(-1e6f64..1e6, 1..20),
        k in prop::num::f64::NORMAL.prop_filter("moderate", |k| k.abs() > 1e-3 && k.abs() < 1e3),
    ) {
        let va = value(a.clone(), "kg/s");
        let back = va.checked_mul(k).unwrap().checked_div(k).unwrap();
        for (got, want) in back.to_vec().iter().zip(&a) {
            prop_assert!(close(*got, *want), "{got} != {want}");
        }
    }

    #[test]
    fn test_incompatible_addition_fails(a in prop::collection::vec(-1e3f64..1e3, 1..5)) {
        let length = value(a.clone(), "m");
        let time = value(a, "s");
        prop_assert!(matches!(length.checked_add(&time), Err(Error::IncompatibleUnits { .. })), "expected IncompatibleUnits error");
    }
}

// ============================================================================
// 2. Masking is a pure function of the raw array
// ============================================================================

proptest! {
    #[test]
    fn test_mask_is_idempotent(samples in prop::collection::vec((-1e3f64..1e3, any::<bool>()), 1..30)) {
        let (raw, keep): (Vec<f64>, Vec<bool>) = samples.into_iter().unzip();
        let filter = DataFilter::from_bools(&keep);

        let mut once = value(raw.clone(), "m");
        once.mask(&filter).unwrap();
        let mut twice = value(raw, "m");
        twice.mask(&filter).unwrap();
        twice.mask(&filter).unwrap();

        prop_assert_eq!(once.to_vec(), twice.to_vec());
        prop_assert_eq!(once.to_vec().len(), keep.iter().filter(|k| **k).count());
    }
}

// ============================================================================
// 3. Discovered directory keys are unique
// ============================================================================

proptest! {
    #[test]
    fn test_unique_axes_never_collide(
        cells in prop::collection::btree_set((0u8..4, 0u8..4, 0u8..3), 1..16)
    ) {
        let paths: Vec<Vec<String>> = cells.iter()
            .map(|(x, y, z)| vec![
                "sweep".to_string(),
                "x".to_string(),
                x.to_string(),
                "y".to_string(),
                y.to_string(),
                format!("run_{z}"),
            ])
            .collect();
        let keys = unique_axes(&paths);
        prop_assert_eq!(keys.len(), paths.len());
        let distinct: HashSet<_> = keys.iter().cloned().collect();
        prop_assert_eq!(distinct.len(), keys.len());
    }
}
