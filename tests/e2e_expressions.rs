//! End-to-end tests for registered expressions evaluated per directory.

use pretty_assertions::assert_eq;
use serde_json::{Value, json};
use sweepstore::{
    AxisToken, DataManager, DirectoryKey, Error, ExprNode, FieldKey, ImportConfig, SourceKind, Warning,
};

fn field(value: f64, units: &str) -> Value {
    json!({"value": [value], "units": units})
}

/// `case=1` holds a, b and c; `case=2` lacks c.
fn cases() -> Value {
    json!({
        "runs": {
            "case": {
                "1": {"outputs": {
                    "a": field(1.0, "m"),
                    "b": field(2.0, "m"),
                    "c": field(10.0, "m**2"),
                    "t": field(5.0, "s"),
                }},
                "2": {"outputs": {
                    "a": field(3.0, "m"),
                    "b": field(4.0, "m"),
                    "t": field(6.0, "s"),
                }},
            }
        }
    })
}

fn loaded() -> DataManager {
    let mut dm = DataManager::from_json(cases(), ImportConfig::default().exact(true));
    for name in ["a", "b", "c", "t"] {
        dm.register_field(name, name);
    }
    dm.load(true).unwrap();
    dm
}

fn case(n: i64) -> DirectoryKey {
    DirectoryKey::from(AxisToken::paired("case", sweepstore::Segment::Int(n)))
}

// ============================================================================
// 1. The worked example: 100 * (a + b) ** 2 / c
// ============================================================================

#[test]
fn test_expression_evaluates_per_directory() {
    let mut dm = loaded();
    let ek = dm.get_expression_keys();
    let metric = 100 * (ek.field("a").unwrap() + ek.field("b").unwrap()).pow(2) / ek.field("c").unwrap();
    assert_eq!(metric.to_string(), "((100 * ((a + b) ** 2)) / c)");

    dm.register_expression(metric, "metric", None, None);
    dm.evaluate_expressions().unwrap();

    let value = dm.get(&case(1), &FieldKey::from("metric")).unwrap();
    assert!((value.to_vec()[0] - 90.0).abs() < 1e-9);
    assert_eq!(value.kind(), SourceKind::Derived);
    assert_eq!(value.data_label(), "metric");
    assert!(value.unit().is_dimensionless());

    assert!(!dm.contains(&case(2), &FieldKey::from("metric")));
    let diagnostics = dm.diagnostics();
    let skipped: Vec<_> = diagnostics.iter()
        .filter(|w| matches!(w, Warning::ExpressionEvaluation { .. }))
        .collect();
    assert_eq!(skipped.len(), 1);
    match skipped[0] {
        Warning::ExpressionEvaluation { directory, missing, .. } => {
            assert_eq!(directory, "case=2");
            assert_eq!(missing, &vec!["c".to_string()]);
        }
        _ => unreachable!(),
    }
}

// ============================================================================
// 2. Expressions registered before load are evaluated by load
// ============================================================================

#[test]
fn test_expression_registered_before_load() {
    let mut dm = DataManager::from_json(cases(), ImportConfig::default().exact(true));
    dm.register_field("a", "a");
    dm.register_field("t", "t");
    let speed = ExprNode::field("a") / ExprNode::field("t");
    dm.register_expression(speed, "speed", Some("m/h"), None);
    dm.load(true).unwrap();

    let speed = dm.get(&case(1), &FieldKey::from("speed")).unwrap();
    assert!((speed.to_vec()[0] - 720.0).abs() < 1e-9);
    assert_eq!(speed.units(), "m/h");
    assert!(dm.contains(&case(2), &FieldKey::from("speed")));
}

// ============================================================================
// 3. Failures
// ============================================================================

#[test]
fn test_incompatible_units_propagate() {
    let mut dm = loaded();
    dm.register_expression(ExprNode::field("a") + ExprNode::field("t"), "bad", None, None);
    assert!(matches!(dm.evaluate_expressions(), Err(Error::IncompatibleUnits { .. })));
}

#[test]
fn test_expression_unevaluated_anywhere() {
    let mut dm = loaded();
    dm.register_expression(ExprNode::field("a") * ExprNode::field("missing"), "never", None, None);
    dm.evaluate_expressions().unwrap();
    assert!(dm.diagnostics().iter().any(|w| matches!(
        w,
        Warning::ExpressionUnevaluated { expression } if expression == "(a * missing)"
    )));
}

#[test]
fn test_unknown_expression_key() {
    let dm = loaded();
    let ek = dm.get_expression_keys();
    let err = ek.field("d").unwrap_err();
    assert!(err.to_string().contains("Available keys"));
    assert!(ek.get("a").is_some());
}

// ============================================================================
// 4. Assigned units on results
// ============================================================================

#[test]
fn test_assign_units_on_result() {
    let mut dm = loaded();
    let ratio = ExprNode::field("b") / ExprNode::field("a");
    dm.register_expression(ratio, "ratio", Some("%"), Some("dimensionless"));
    dm.evaluate_expressions().unwrap();

    let ratio = dm.get(&case(2), &FieldKey::from("ratio")).unwrap();
    assert!((ratio.to_vec()[0] - 400.0 / 3.0).abs() < 1e-9);
    assert_eq!(ratio.units(), "%");
}
