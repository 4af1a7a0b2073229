//! # Expression Engine
//!
//! Deferred arithmetic over registered fields. Trees are built with the
//! ordinary operators and evaluated per directory once data is loaded.
//!
//! ```text
//! let ek = dm.get_expression_keys();
//! let e  = 100.0 * (ek.field("a")? + ek.field("b")?).pow(2) / ek.field("c")?;
//!          └─ Binary(Div, Binary(Mul, 100, Binary(Pow, Binary(Add, a, b), 2)), c)
//! ```

use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::ops::{Add, Div, Mul, Neg, Sub};

use crate::model::data_value::format_constant;
use crate::model::{BinaryOp, DataValue, FieldKey};
use crate::{Error, Result};

// ============================================================================
// ExprNode
// ============================================================================

/// A node of an arithmetic expression tree.
#[derive(Debug, Clone, PartialEq)]
pub enum ExprNode {
    /// Reference to a field in the directory being evaluated.
    Field(FieldKey),
    Constant(f64),
    Binary {
        op: BinaryOp,
        left: Box<ExprNode>,
        right: Box<ExprNode>,
    },
}

impl ExprNode {
    pub fn field(key: impl Into<FieldKey>) -> Self {
        ExprNode::Field(key.into())
    }

    pub fn constant(value: f64) -> Self {
        ExprNode::Constant(value)
    }

    pub fn binary(op: BinaryOp, left: ExprNode, right: ExprNode) -> Self {
        ExprNode::Binary { op, left: Box::new(left), right: Box::new(right) }
    }

    pub fn pow(self, exponent: impl Into<ExprNode>) -> Self {
        ExprNode::binary(BinaryOp::Pow, self, exponent.into())
    }

    /// Turn an untyped operand into a node; only numbers are accepted.
    pub fn coerce(value: &serde_json::Value) -> Result<ExprNode> {
        match value {
            serde_json::Value::Number(n) => n.as_f64()
                .map(ExprNode::Constant)
                .ok_or_else(|| Error::TypeError(format!("number {n} is not representable as f64"))),
            other => Err(Error::TypeError(format!(
                "cannot combine an expression with {}",
                json_type_name(other)
            ))),
        }
    }

    /// All field references reachable from this node.
    pub fn required_fields(&self) -> BTreeSet<FieldKey> {
        let mut keys = BTreeSet::new();
        self.collect_fields(&mut keys);
        keys
    }

    fn collect_fields(&self, acc: &mut BTreeSet<FieldKey>) {
        match self {
            ExprNode::Field(key) => {
                acc.insert(key.clone());
            }
            ExprNode::Constant(_) => {}
            ExprNode::Binary { left, right, .. } => {
                left.collect_fields(acc);
                right.collect_fields(acc);
            }
        }
    }

    /// Substitute fields from `values` and fold with unit-aware arithmetic.
    pub fn evaluate(&self, values: &HashMap<FieldKey, &DataValue>) -> Result<DataValue> {
        match self {
            ExprNode::Field(key) => values.get(key)
                .map(|v| (*v).clone())
                .ok_or_else(|| Error::KeyNotFound(format!("expression field '{key}'"))),
            ExprNode::Constant(v) => Ok(DataValue::constant(*v)),
            ExprNode::Binary { op, left, right } => {
                let l = left.evaluate(values)?;
                let r = right.evaluate(values)?;
                l.binary(*op, &r)
            }
        }
    }
}

fn json_type_name(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "a boolean",
        serde_json::Value::Number(_) => "a number",
        serde_json::Value::String(_) => "a string",
        serde_json::Value::Array(_) => "an array",
        serde_json::Value::Object(_) => "an object",
    }
}

impl fmt::Display for ExprNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExprNode::Field(key) => write!(f, "{key}"),
            ExprNode::Constant(v) => write!(f, "{}", format_constant(*v)),
            ExprNode::Binary { op, left, right } => write!(f, "({left} {op} {right})"),
        }
    }
}

impl From<f64> for ExprNode {
    fn from(v: f64) -> Self { ExprNode::Constant(v) }
}
impl From<i32> for ExprNode {
    fn from(v: i32) -> Self { ExprNode::Constant(v as f64) }
}
impl From<FieldKey> for ExprNode {
    fn from(v: FieldKey) -> Self { ExprNode::Field(v) }
}

macro_rules! impl_binary_ops {
    ($($trait:ident :: $method:ident => $op:expr),* $(,)?) => {$(
        impl<R: Into<ExprNode>> $trait<R> for ExprNode {
            type Output = ExprNode;
            fn $method(self, rhs: R) -> ExprNode {
                ExprNode::binary($op, self, rhs.into())
            }
        }

        impl $trait<ExprNode> for f64 {
            type Output = ExprNode;
            fn $method(self, rhs: ExprNode) -> ExprNode {
                ExprNode::binary($op, ExprNode::Constant(self), rhs)
            }
        }

        impl $trait<ExprNode> for i32 {
            type Output = ExprNode;
            fn $method(self, rhs: ExprNode) -> ExprNode {
                ExprNode::binary($op, ExprNode::Constant(self as f64), rhs)
            }
        }
    )*};
}

impl_binary_ops! {
    Add::add => BinaryOp::Add,
    Sub::sub => BinaryOp::Sub,
    Mul::mul => BinaryOp::Mul,
    Div::div => BinaryOp::Div,
}

impl Neg for ExprNode {
    type Output = ExprNode;

    fn neg(self) -> ExprNode {
        ExprNode::binary(BinaryOp::Mul, ExprNode::Constant(-1.0), self)
    }
}

// ============================================================================
// Expression
// ============================================================================

/// An expression tree with its required fields cached.
#[derive(Debug, Clone, PartialEq)]
pub struct Expression {
    root: ExprNode,
    required: BTreeSet<FieldKey>,
}

impl Expression {
    pub fn new(root: ExprNode) -> Self {
        let required = root.required_fields();
        Self { root, required }
    }

    pub fn root(&self) -> &ExprNode {
        &self.root
    }

    pub fn required_fields(&self) -> &BTreeSet<FieldKey> {
        &self.required
    }

    pub fn evaluate(&self, values: &HashMap<FieldKey, &DataValue>) -> Result<DataValue> {
        self.root.evaluate(values)
    }
}

impl From<ExprNode> for Expression {
    fn from(root: ExprNode) -> Self { Expression::new(root) }
}

impl fmt::Display for Expression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.root.fmt(f)
    }
}

/// An expression waiting to be evaluated into `return_key`.
#[derive(Debug, Clone, PartialEq)]
pub struct RegisteredExpression {
    pub expression: Expression,
    pub return_key: String,
    pub units: Option<String>,
    pub assign_units: Option<String>,
}

// ============================================================================
// ExpressionKeys
// ============================================================================

/// Identifier-safe names for field keys, for building expressions.
///
/// Names are derived once and only ever appended; the same key always maps
/// to the same name within one instance. Colliding names get `_1`, `_2`, ...
/// suffixes in insertion order.
#[derive(Debug, Clone, Default)]
pub struct ExpressionKeys {
    entries: Vec<(String, FieldKey)>,
    by_name: HashMap<String, usize>,
    by_key: HashMap<FieldKey, usize>,
}

impl ExpressionKeys {
    pub fn new<I, K>(keys: I) -> Self
    where
        I: IntoIterator<Item = K>,
        K: Into<FieldKey>,
    {
        let mut out = Self::default();
        for key in keys {
            out.insert(key.into());
        }
        out
    }

    /// Assign a name to `key` unless it already has one.
    pub(crate) fn insert(&mut self, key: FieldKey) {
        if self.by_key.contains_key(&key) {
            return;
        }
        let base = sanitize_identifier(&key);
        let mut name = base.clone();
        let mut n = 1;
        while self.by_name.contains_key(&name) {
            name = format!("{base}_{n}");
            n += 1;
        }
        self.by_name.insert(name.clone(), self.entries.len());
        self.by_key.insert(key.clone(), self.entries.len());
        self.entries.push((name, key));
    }

    /// Field node for a sanitized name.
    pub fn get(&self, name: &str) -> Option<ExprNode> {
        self.key_for(name).map(|k| ExprNode::Field(k.clone()))
    }

    /// Like [`get`](Self::get), with an error listing the available names.
    pub fn field(&self, name: &str) -> Result<ExprNode> {
        self.get(name).ok_or_else(|| {
            let mut available: Vec<&str> = self.names().collect();
            available.sort_unstable();
            Error::KeyNotFound(format!(
                "'{name}' is not a registered return key. Available keys: {available:?}"
            ))
        })
    }

    pub fn key_for(&self, name: &str) -> Option<&FieldKey> {
        self.by_name.get(name).map(|&i| &self.entries[i].1)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(n, _)| n.as_str())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// `("flow", "0.0,Liq")` → `flow_0_0_Liq`; `2nd stage` → `_2nd_stage`.
pub fn sanitize_identifier(key: &FieldKey) -> String {
    let joined = key.parts().join("_");
    let mut name: String = joined.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' })
        .collect();
    if name.is_empty() || name.starts_with(|c: char| c.is_ascii_digit()) {
        name.insert(0, '_');
    }
    name
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scalar(key: &str, v: f64) -> DataValue {
        DataValue::from_vec(key, crate::model::SourceKind::Imported, vec![v], None)
    }

    #[test]
    fn test_build_and_display() {
        let a = ExprNode::field("a");
        let b = ExprNode::field("b");
        let e = 100 * (a + b).pow(2) / ExprNode::field("c");
        assert_eq!(e.to_string(), "((100 * ((a + b) ** 2)) / c)");
        let fields: Vec<String> = e.required_fields().iter().map(|k| k.to_string()).collect();
        assert_eq!(fields, vec!["a", "b", "c"]);
    }

    #[test]
    fn test_evaluate() {
        let e = Expression::new(100.0 * (ExprNode::field("a") + ExprNode::field("b")).pow(2) / ExprNode::field("c"));
        let (a, b, c) = (scalar("a", 1.0), scalar("b", 2.0), scalar("c", 10.0));
        let values: HashMap<FieldKey, &DataValue> =
            [(FieldKey::from("a"), &a), (FieldKey::from("b"), &b), (FieldKey::from("c"), &c)].into_iter().collect();
        let result = e.evaluate(&values).unwrap();
        assert!((result.to_vec()[0] - 90.0).abs() < 1e-12);
    }

    #[test]
    fn test_negation_is_scaled_by_minus_one() {
        let e = -ExprNode::field("x");
        assert_eq!(e.to_string(), "(-1 * x)");
    }

    #[test]
    fn test_coerce_rejects_non_numbers() {
        assert_eq!(ExprNode::coerce(&serde_json::json!(2.5)).unwrap(), ExprNode::Constant(2.5));
        assert!(matches!(ExprNode::coerce(&serde_json::json!("x")), Err(Error::TypeError(_))));
    }

    #[test]
    fn test_expression_keys_sanitize_and_disambiguate() {
        let ek = ExpressionKeys::new([
            FieldKey::from("fs.costing.LCOW"),
            FieldKey::from("fs_costing_LCOW"),
            FieldKey::from(("flow", "0.0,Liq")),
            FieldKey::from("2nd stage"),
        ]);
        let names: Vec<&str> = ek.names().collect();
        assert_eq!(names, vec!["fs_costing_LCOW", "fs_costing_LCOW_1", "flow_0_0_Liq", "_2nd_stage"]);
        assert_eq!(ek.key_for("fs_costing_LCOW_1"), Some(&FieldKey::from("fs_costing_LCOW")));
        assert!(ek.get("missing").is_none());
        let err = ek.field("missing").unwrap_err().to_string();
        assert!(err.contains("Available keys"));
    }
}
