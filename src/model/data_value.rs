//! Unit-aware values — the atomic unit of the store.

use std::fmt;
use std::ops::Neg;

use ndarray::{ArrayD, Axis, IxDyn, Zip};
use serde::{Deserialize, Serialize};

use super::keys::Segment;
use super::units::{Conversion, Unit};
use crate::{Error, Result};

/// Where a value came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SourceKind {
    Imported,
    Derived,
    Stacked,
    Created,
    IndexMask,
}

/// Binary arithmetic operators shared by values and expression trees.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Pow,
}

impl BinaryOp {
    pub fn symbol(&self) -> &'static str {
        match self {
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::Pow => "**",
        }
    }

    fn apply(&self, a: f64, b: f64) -> f64 {
        match self {
            BinaryOp::Add => a + b,
            BinaryOp::Sub => a - b,
            BinaryOp::Mul => a * b,
            BinaryOp::Div => a / b,
            BinaryOp::Pow => a.powf(b),
        }
    }
}

impl fmt::Display for BinaryOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.symbol())
    }
}

// ============================================================================
// Filters
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FilterKind {
    /// Select rows by position.
    OneD,
    /// Select one row per column; NaN index yields NaN.
    TwoD,
}

/// Index-based filter applied to the raw backing array.
#[derive(Debug, Clone, PartialEq)]
pub struct DataFilter {
    pub indexes: Vec<f64>,
    pub kind: FilterKind,
    /// Shape of the array the indexes were derived from.
    pub shape: Vec<usize>,
}

impl DataFilter {
    pub fn one_d(indexes: Vec<f64>, shape: Vec<usize>) -> Self {
        Self { indexes, kind: FilterKind::OneD, shape }
    }

    pub fn two_d(indexes: Vec<f64>, shape: Vec<usize>) -> Self {
        Self { indexes, kind: FilterKind::TwoD, shape }
    }

    /// Positions of `true` entries as a 1-D filter.
    pub fn from_bools(mask: &[bool]) -> Self {
        let indexes = mask.iter()
            .enumerate()
            .filter(|(_, keep)| **keep)
            .map(|(i, _)| i as f64)
            .collect();
        Self::one_d(indexes, vec![mask.len()])
    }
}

/// Outcome of a mask application.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MaskOutcome {
    /// Columns replaced by NaN because their index did not fit the data.
    pub degraded: usize,
}

// ============================================================================
// DataValue
// ============================================================================

/// A numeric array with a physical unit and provenance.
///
/// `data` is the current view (possibly masked); `raw` is always the full,
/// unmasked array in the same unit. Masks are computed from `raw`, so
/// applying the same filter twice gives the same view.
#[derive(Debug, Clone, PartialEq)]
pub struct DataValue {
    key: String,
    kind: SourceKind,
    data: ArrayD<f64>,
    raw: ArrayD<f64>,
    unit: Unit,
    feasible: Option<Vec<bool>>,
    key_index: Option<Vec<Segment>>,
    data_label: String,
    data_group: Option<String>,
}

impl DataValue {
    /// Build a value from magnitudes and a unit string as found in a source file.
    ///
    /// Unrecognised units fall back to dimensionless.
    pub fn new(key: impl Into<String>, kind: SourceKind, data: ArrayD<f64>, units: Option<&str>) -> Self {
        let unit = Unit::from_source(units).unit;
        Self::with_unit(key, kind, data, unit)
    }

    pub fn with_unit(key: impl Into<String>, kind: SourceKind, data: ArrayD<f64>, unit: Unit) -> Self {
        let key = key.into();
        Self {
            data_label: key.clone(),
            key,
            kind,
            raw: data.clone(),
            data,
            unit,
            feasible: None,
            key_index: None,
            data_group: None,
        }
    }

    pub fn from_vec(key: impl Into<String>, kind: SourceKind, values: Vec<f64>, units: Option<&str>) -> Self {
        let n = values.len();
        let data = ArrayD::from_shape_vec(IxDyn(&[n]), values)
            .unwrap_or_else(|_| ArrayD::zeros(IxDyn(&[0])));
        Self::new(key, kind, data, units)
    }

    pub fn scalar(key: impl Into<String>, kind: SourceKind, value: f64, units: Option<&str>) -> Self {
        Self::new(key, kind, ArrayD::from_elem(IxDyn(&[]), value), units)
    }

    /// Dimensionless 0-d constant keyed by its own value.
    pub fn constant(value: f64) -> Self {
        Self::with_unit(format_constant(value), SourceKind::Created, ArrayD::from_elem(IxDyn(&[]), value), Unit::dimensionless())
    }

    /// ISO-8601 timestamps stored as epoch minutes.
    pub fn from_iso_timestamps(key: impl Into<String>, kind: SourceKind, stamps: &[String]) -> Result<Self> {
        let minutes = stamps.iter()
            .map(|s| iso_to_epoch_minutes(s))
            .collect::<Result<Vec<f64>>>()?;
        Ok(Self::from_vec(key, kind, minutes, Some("min")))
    }

    // --- builder-style setters ---

    /// Attach a feasibility mask; its length must match the raw sample count.
    pub fn with_feasibility(mut self, feasible: Vec<bool>) -> Result<Self> {
        if feasible.len() != self.sample_count() {
            return Err(Error::Shape(format!(
                "feasibility mask of length {} for '{}' with {} samples",
                feasible.len(), self.key, self.sample_count()
            )));
        }
        self.feasible = Some(feasible);
        Ok(self)
    }

    pub fn with_key_index(mut self, key_index: Option<Vec<Segment>>) -> Self {
        self.key_index = key_index;
        self
    }

    pub fn with_data_label(mut self, label: impl Into<String>) -> Self {
        self.data_label = label.into();
        self
    }

    pub fn with_data_group(mut self, group: Option<String>) -> Self {
        self.data_group = group;
        self
    }

    // --- accessors ---

    pub fn key(&self) -> &str { &self.key }
    pub fn kind(&self) -> SourceKind { self.kind }
    pub fn data(&self) -> &ArrayD<f64> { &self.data }
    pub fn raw(&self) -> &ArrayD<f64> { &self.raw }
    pub fn unit(&self) -> &Unit { &self.unit }
    pub fn feasible(&self) -> Option<&[bool]> { self.feasible.as_deref() }
    pub fn key_index(&self) -> Option<&[Segment]> { self.key_index.as_deref() }
    pub fn data_label(&self) -> &str { &self.data_label }
    pub fn data_group(&self) -> Option<&str> { self.data_group.as_deref() }

    /// Normalized unit symbol.
    pub fn units(&self) -> String {
        self.unit.symbol()
    }

    pub fn unit_label(&self) -> String {
        self.unit.label()
    }

    pub fn set_data_label(&mut self, label: impl Into<String>) {
        self.data_label = label.into();
    }

    pub fn shape(&self) -> &[usize] {
        self.data.shape()
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Number of samples along the leading axis of `raw` (1 for 0-d).
    pub fn sample_count(&self) -> usize {
        self.raw.shape().first().copied().unwrap_or(1)
    }

    /// Current view with NaN entries dropped.
    pub fn data_excluding_nan(&self) -> Vec<f64> {
        self.data.iter().copied().filter(|v| !v.is_nan()).collect()
    }

    /// Raw samples whose feasibility flag is set (all samples without a mask).
    pub fn feasible_data(&self) -> Vec<f64> {
        match &self.feasible {
            Some(mask) if self.raw.ndim() == 1 => self.raw.iter()
                .zip(mask)
                .filter(|(_, ok)| **ok)
                .map(|(v, _)| *v)
                .collect(),
            _ => self.raw.iter().copied().collect(),
        }
    }

    /// The view as a flat vector.
    pub fn to_vec(&self) -> Vec<f64> {
        self.data.iter().copied().collect()
    }

    // --- unit handling ---

    /// Rescale `data` and `raw` to a compatible unit.
    pub fn convert_to(&mut self, units: &str) -> Result<()> {
        let target = Unit::from_source(Some(units)).unit;
        self.convert_to_unit(&target)
    }

    pub fn convert_to_unit(&mut self, target: &Unit) -> Result<()> {
        let conversion = self.unit.conversion_to(target)?;
        if !conversion.is_identity() {
            apply_conversion(&mut self.data, conversion);
            apply_conversion(&mut self.raw, conversion);
        }
        tracing::trace!(key = %self.key, from = %self.unit, to = %target, "converted units");
        self.unit = target.clone();
        Ok(())
    }

    /// Reinterpret the magnitudes as `units`, multiplying by `factor` first.
    pub fn assign_units(&mut self, units: &str, factor: f64) {
        self.unit = Unit::from_source(Some(units)).unit;
        if factor != 1.0 {
            self.data.mapv_inplace(|v| v * factor);
            self.raw.mapv_inplace(|v| v * factor);
        }
    }

    // --- masking ---

    /// Replace the view with `filter` applied to the raw array.
    pub fn mask(&mut self, filter: &DataFilter) -> Result<MaskOutcome> {
        match filter.kind {
            FilterKind::OneD => {
                self.data = take_rows(&self.raw, &filter.indexes, &self.key)?;
                Ok(MaskOutcome::default())
            }
            FilterKind::TwoD => {
                let (data, degraded) = take_along_columns(&self.raw, &filter.indexes);
                if degraded > 0 {
                    tracing::debug!(key = %self.key, degraded, "2-D mask degraded columns to NaN");
                }
                self.data = data;
                Ok(MaskOutcome { degraded })
            }
        }
    }

    /// Reduce the view to feasible samples. No-op without a usable mask.
    pub fn mask_feasible(&mut self) -> Result<MaskOutcome> {
        match &self.feasible {
            Some(mask) if mask.len() == self.sample_count() => {
                let filter = DataFilter::from_bools(mask);
                self.mask(&filter)
            }
            _ => Ok(MaskOutcome::default()),
        }
    }

    /// Restore the view to the unmasked raw array.
    pub fn unmask(&mut self) {
        self.data = self.raw.clone();
    }

    /// `{ "units": ..., "values": [...] }`; NaN becomes `null`.
    pub fn to_json(&self, raw: bool) -> serde_json::Value {
        let (units, values) = if raw {
            ("raw data".to_string(), &self.raw)
        } else {
            (self.units(), &self.data)
        };
        serde_json::json!({
            "units": units,
            "values": array_to_json(values),
        })
    }

    // --- arithmetic ---

    /// Apply `op` pointwise with unit propagation; the result key nests the operation.
    pub fn binary<'a>(&self, op: BinaryOp, rhs: impl Into<Operand<'a>>) -> Result<DataValue> {
        let owned;
        let rhs: &DataValue = match rhs.into() {
            Operand::Value(v) => v,
            Operand::Scalar(s) => {
                owned = DataValue::constant(s);
                &owned
            }
        };

        let (values, unit) = match op {
            BinaryOp::Add | BinaryOp::Sub => {
                let conversion = rhs.unit.conversion_to(&self.unit)?;
                let mut right = rhs.data.clone();
                apply_conversion(&mut right, conversion);
                (broadcast_zip(&self.data, &right, |a, b| op.apply(a, b))?, self.unit.clone())
            }
            BinaryOp::Mul => (broadcast_zip(&self.data, &rhs.data, |a, b| a * b)?, self.unit.mul(&rhs.unit)),
            BinaryOp::Div => (broadcast_zip(&self.data, &rhs.data, |a, b| a / b)?, self.unit.div(&rhs.unit)),
            BinaryOp::Pow => self.pow_values(rhs)?,
        };

        let mut result = DataValue::with_unit(
            format!("({} {} {})", self.key, op.symbol(), rhs.key),
            SourceKind::Derived,
            values,
            unit,
        );
        result.feasible = combine_feasibility(self.feasible(), rhs.feasible(), result.sample_count());
        Ok(result)
    }

    fn pow_values(&self, rhs: &DataValue) -> Result<(ArrayD<f64>, Unit)> {
        let exponent_conversion = rhs.unit.conversion_to(&Unit::dimensionless())?;
        let mut exponent = rhs.data.clone();
        apply_conversion(&mut exponent, exponent_conversion);
        let values = broadcast_zip(&self.data, &exponent, f64::powf)?;

        let first = exponent.iter().next().copied();
        let uniform = first.is_some_and(|p| exponent.iter().all(|e| *e == p || (e.is_nan() && p.is_nan())));
        let unit = match first {
            Some(p) if uniform => self.unit.powf(p),
            _ if self.unit.is_dimensionless() => self.unit.clone(),
            _ => {
                return Err(Error::IncompatibleUnits {
                    from: self.unit.symbol(),
                    to: "dimensionless (array exponent)".to_string(),
                });
            }
        };
        Ok((values, unit))
    }

    pub fn checked_add<'a>(&self, rhs: impl Into<Operand<'a>>) -> Result<DataValue> {
        self.binary(BinaryOp::Add, rhs)
    }

    pub fn checked_sub<'a>(&self, rhs: impl Into<Operand<'a>>) -> Result<DataValue> {
        self.binary(BinaryOp::Sub, rhs)
    }

    pub fn checked_mul<'a>(&self, rhs: impl Into<Operand<'a>>) -> Result<DataValue> {
        self.binary(BinaryOp::Mul, rhs)
    }

    pub fn checked_div<'a>(&self, rhs: impl Into<Operand<'a>>) -> Result<DataValue> {
        self.binary(BinaryOp::Div, rhs)
    }

    pub fn checked_pow<'a>(&self, rhs: impl Into<Operand<'a>>) -> Result<DataValue> {
        self.binary(BinaryOp::Pow, rhs)
    }
}

impl Neg for &DataValue {
    type Output = DataValue;

    fn neg(self) -> DataValue {
        let mut result = DataValue::with_unit(
            format!("(-1 * {})", self.key),
            SourceKind::Derived,
            self.data.mapv(|v| -v),
            self.unit.clone(),
        );
        result.feasible = self.feasible.clone();
        result
    }
}

/// Right-hand side of an arithmetic operation.
#[derive(Debug, Clone, Copy)]
pub enum Operand<'a> {
    Value(&'a DataValue),
    Scalar(f64),
}

impl<'a> From<&'a DataValue> for Operand<'a> {
    fn from(v: &'a DataValue) -> Self { Operand::Value(v) }
}
impl From<f64> for Operand<'_> {
    fn from(v: f64) -> Self { Operand::Scalar(v) }
}
impl From<i32> for Operand<'_> {
    fn from(v: i32) -> Self { Operand::Scalar(v as f64) }
}

// ============================================================================
// Array helpers
// ============================================================================

fn apply_conversion(values: &mut ArrayD<f64>, conversion: Conversion) {
    if !conversion.is_identity() {
        values.mapv_inplace(|v| conversion.apply(v));
    }
}

fn broadcast_shape(a: &[usize], b: &[usize]) -> Option<Vec<usize>> {
    let n = a.len().max(b.len());
    let mut shape = vec![0; n];
    for i in 0..n {
        let da = if i + a.len() >= n { a[i + a.len() - n] } else { 1 };
        let db = if i + b.len() >= n { b[i + b.len() - n] } else { 1 };
        shape[i] = match (da, db) {
            (x, y) if x == y => x,
            (1, y) => y,
            (x, 1) => x,
            _ => return None,
        };
    }
    Some(shape)
}

/// Pointwise `f` over two arrays with numpy-style broadcasting.
pub(crate) fn broadcast_zip(a: &ArrayD<f64>, b: &ArrayD<f64>, f: impl Fn(f64, f64) -> f64) -> Result<ArrayD<f64>> {
    let shape = broadcast_shape(a.shape(), b.shape())
        .ok_or_else(|| Error::Shape(format!("cannot broadcast {:?} with {:?}", a.shape(), b.shape())))?;
    let dim = IxDyn(&shape);
    let (Some(va), Some(vb)) = (a.broadcast(dim.clone()), b.broadcast(dim)) else {
        return Err(Error::Shape(format!("cannot broadcast {:?} with {:?}", a.shape(), b.shape())));
    };
    Ok(Zip::from(&va).and(&vb).map_collect(|x, y| f(*x, *y)))
}

fn take_rows(raw: &ArrayD<f64>, indexes: &[f64], key: &str) -> Result<ArrayD<f64>> {
    if raw.ndim() == 0 {
        return Err(Error::Shape(format!("cannot row-mask scalar value '{key}'")));
    }
    let rows = raw.shape()[0];
    let positions = indexes.iter()
        .map(|idx| {
            let i = *idx as usize;
            if idx.is_finite() && *idx >= 0.0 && i < rows {
                Ok(i)
            } else {
                Err(Error::Shape(format!("mask index {idx} out of range for '{key}' with {rows} rows")))
            }
        })
        .collect::<Result<Vec<usize>>>()?;
    Ok(raw.select(Axis(0), &positions))
}

/// One value per column at that column's row index; NaN index gives NaN.
fn take_along_columns(raw: &ArrayD<f64>, indexes: &[f64]) -> (ArrayD<f64>, usize) {
    let mut degraded = 0;
    let mut out = Vec::with_capacity(indexes.len());
    for (col, idx) in indexes.iter().enumerate() {
        if idx.is_nan() {
            out.push(f64::NAN);
            continue;
        }
        let row = *idx as usize;
        let value = match raw.ndim() {
            0 if row == 0 && col == 0 => raw.iter().next().copied(),
            1 if col == 0 => raw.get(IxDyn(&[row])).copied(),
            2 => raw.get(IxDyn(&[row, col])).copied(),
            _ => None,
        };
        match value {
            Some(v) if *idx >= 0.0 => out.push(v),
            _ => {
                degraded += 1;
                out.push(f64::NAN);
            }
        }
    }
    let n = out.len();
    let data = ArrayD::from_shape_vec(IxDyn(&[n]), out)
        .unwrap_or_else(|_| ArrayD::zeros(IxDyn(&[0])));
    (data, degraded)
}

fn combine_feasibility(a: Option<&[bool]>, b: Option<&[bool]>, samples: usize) -> Option<Vec<bool>> {
    let fits = |m: &&[bool]| m.len() == samples;
    match (a.filter(fits), b.filter(fits)) {
        (Some(a), Some(b)) => Some(a.iter().zip(b).map(|(x, y)| *x && *y).collect()),
        (Some(m), None) | (None, Some(m)) => Some(m.to_vec()),
        (None, None) => None,
    }
}

pub(crate) fn array_to_json(values: &ArrayD<f64>) -> serde_json::Value {
    fn number(v: f64) -> serde_json::Value {
        serde_json::Number::from_f64(v).map_or(serde_json::Value::Null, serde_json::Value::Number)
    }
    if values.ndim() == 0 {
        return values.iter().next().map_or(serde_json::Value::Null, |v| number(*v));
    }
    if values.ndim() == 1 {
        return serde_json::Value::Array(values.iter().map(|v| number(*v)).collect());
    }
    serde_json::Value::Array(
        values.outer_iter().map(|row| array_to_json(&row.to_owned())).collect(),
    )
}

pub(crate) fn format_constant(v: f64) -> String {
    if v.fract() == 0.0 && v.abs() < 1e15 {
        format!("{}", v as i64)
    } else {
        format!("{v}")
    }
}

fn iso_to_epoch_minutes(stamp: &str) -> Result<f64> {
    let trimmed = stamp.trim();
    if let Ok(dt) = chrono::DateTime::parse_from_rfc3339(trimmed) {
        return Ok(dt.timestamp() as f64 / 60.0);
    }
    for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M"] {
        if let Ok(dt) = chrono::NaiveDateTime::parse_from_str(trimmed, format) {
            return Ok(dt.and_utc().timestamp() as f64 / 60.0);
        }
    }
    if let Ok(date) = chrono::NaiveDate::parse_from_str(trimmed, "%Y-%m-%d") {
        if let Some(dt) = date.and_hms_opt(0, 0, 0) {
            return Ok(dt.and_utc().timestamp() as f64 / 60.0);
        }
    }
    Err(Error::Format(format!("invalid ISO timestamp '{stamp}'")))
}
