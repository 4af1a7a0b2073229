//! End-to-end tests for directory discovery and field resolution.
//!
//! Each test builds a nested sweep document, discovers its run directories
//! and checks the derived directory keys and field index.

use pretty_assertions::assert_eq;
use serde_json::{Value, json};
use sweepstore::discovery::unique_axes;
use sweepstore::source::JsonNode;
use sweepstore::{AxisToken, DataManager, DirectoryKey, Discoverer, ImportConfig};

fn run(lcow: f64) -> Value {
    json!({
        "outputs": {
            "fs.costing.LCOW": {"value": [lcow, lcow + 0.1], "units": "USD/m**3"},
            "fs.water_recovery": {"value": [0.5, 0.6], "units": "dimensionless"},
        },
        "sweep_params": {
            "fs.costing.reverse_osmosis.membrane_cost": {"value": [10.0, 20.0], "units": "USD/m**2"},
        },
        "solve_successful": {"solve_successful": [true, true]},
    })
}

fn ro_analysis() -> Value {
    json!({
        "ro_analysis": {
            "erd_type": {
                "pressure_exchanger": {
                    "membrane_cost": run(0.4),
                    "membrane_group": run(0.5),
                },
                "pump_as_turbine": {
                    "membrane_cost": run(0.6),
                    "membrane_group": run(0.7),
                },
            }
        }
    })
}

// ============================================================================
// 1. Directory keys pair varying values with their fixed parent
// ============================================================================

#[test]
fn test_directory_keys() {
    let doc = ro_analysis();
    let config = ImportConfig::default();
    let index = Discoverer::new(&config).discover(&JsonNode::new(&doc));

    let keys: Vec<String> = index.directories.iter().map(|d| d.key.to_string()).collect();
    assert_eq!(
        keys,
        vec![
            "erd_type=pressure_exchanger/membrane_cost",
            "erd_type=pressure_exchanger/membrane_group",
            "erd_type=pump_as_turbine/membrane_cost",
            "erd_type=pump_as_turbine/membrane_group",
        ]
    );
    assert_eq!(
        index.directories[0].key,
        DirectoryKey::from_tokens([
            AxisToken::paired("erd_type", "pressure_exchanger"),
            AxisToken::from("membrane_cost"),
        ])
    );
}

// ============================================================================
// 2. Field index and group precedence
// ============================================================================

#[test]
fn test_field_index() {
    let doc = ro_analysis();
    let dm = DataManager::from_json(doc, ImportConfig::default());

    let keys: Vec<&str> = dm.unique_data_keys().collect();
    assert_eq!(
        keys,
        vec![
            "fs.costing.LCOW",
            "fs.costing.reverse_osmosis.membrane_cost",
            "fs.water_recovery",
            "solve_successful",
        ]
    );
    assert_eq!(
        dm.data_groups(),
        &[Some("outputs".to_string()), Some("solve_successful".to_string()), Some("sweep_params".to_string())]
    );
    assert!(dm.diagnostics().is_empty());
}

// ============================================================================
// 3. Directories without data are dropped with a warning
// ============================================================================

#[test]
fn test_empty_directory_dropped() {
    let doc = json!({
        "sweep": {
            "a": run(1.0),
            "b": {"outputs": {}},
        }
    });
    let dm = DataManager::from_json(doc, ImportConfig::default());
    assert_eq!(dm.index().len(), 1);
    assert_eq!(dm.index().directories[0].key.to_string(), "sweep/a");
    assert_eq!(dm.diagnostics().len(), 1);
}

// ============================================================================
// 4. Value-group leaves mark their parent as the run directory
// ============================================================================

#[test]
fn test_data_group_parent_is_run_directory() {
    let doc = json!({
        "cases": {
            "low": {"recovery": {"values": [0.4], "units": "dimensionless"}},
            "high": {"recovery": {"values": [0.8], "units": "dimensionless"}},
        }
    });
    let config = ImportConfig::default();
    let index = Discoverer::new(&config).discover(&JsonNode::new(&doc));
    let paths: Vec<String> = index.directories.iter().map(|d| d.path_string()).collect();
    assert_eq!(paths, vec!["cases/high", "cases/low"]);
    assert_eq!(index.group_order, vec![None]);
}

// ============================================================================
// 5. Approximate resolution through the manager
// ============================================================================

#[test]
fn test_resolve_field_through_manager() {
    let dm = DataManager::from_json(ro_analysis(), ImportConfig::default());
    let dir = dm.index().directories[0].key.clone();

    let res = dm.resolve_field(&dir, "reverse_osmosis.membrane_cost", false).unwrap();
    assert_eq!(res.keys, vec!["fs.costing.reverse_osmosis.membrane_cost".to_string()]);
    assert_eq!(res.group.as_deref(), Some("sweep_params"));
    assert!(!res.exact);

    assert!(dm.resolve_field(&dir, "reverse_osmosis.membrane_cost", true).is_err());
    assert!(dm.resolve_field(&dir, "completely_unrelated_name", false).is_err());
}

// ============================================================================
// 6. Unique axes never collide
// ============================================================================

#[test]
fn test_unique_axes_distinct_for_mixed_depths() {
    let paths: Vec<Vec<String>> = [
        "sweep/a/1",
        "sweep/a/2",
        "sweep/b/1",
        "other/x",
        "other/y",
    ]
    .iter()
    .map(|p| p.split('/').map(str::to_owned).collect())
    .collect();
    let keys = unique_axes(&paths);
    let mut seen = std::collections::HashSet::new();
    for key in &keys {
        assert!(seen.insert(key.clone()), "duplicate key {key}");
    }
}
