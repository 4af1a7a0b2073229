//! # Stacking & Reduction
//!
//! Stacks one field across directories that differ only in the requested
//! axes, writes an index map recording which axis value each row came
//! from, and optionally reduces the stack to a per-column index mask.
//!
//! ```text
//! erd=px/stages=1  LCOW [5, 5, 5]            erd=px  LCOW      [[5,5,5],[1,2,3],[4,4,4]]
//! erd=px/stages=2  LCOW [1, 2, 3]     ──►    erd=px  stages    [[1,1,1],[2,2,2],[3,3,3]]
//! erd=px/stages=3  LCOW [4, 4, 4]            erd=px/reduced  reduction_mask  [1, 1, 1]
//! ```
//!
//! Once a mask exists, [`DataManager::get_masked`] reads every field of the
//! context through it.

use ndarray::{Array2, ArrayD, Axis, IxDyn};
use serde::{Deserialize, Serialize};

use crate::model::{DataValue, DirectoryKey, FieldKey, Segment, SourceKind, StoreKey, Unit};
use crate::{Result, Warning};

use super::{DataManager, ReductionRecord, is_reduced_directory, reduction_mask_key, REDUCTION_MASK_KEY};

// ============================================================================
// Request / report
// ============================================================================

/// Which row wins a column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Reduction {
    Min,
    Max,
}

impl Reduction {
    fn prefers(self, candidate: f64, best: f64) -> bool {
        match self {
            Reduction::Min => candidate < best,
            Reduction::Max => candidate > best,
        }
    }
}

/// Parameters of one stacking pass.
#[derive(Debug, Clone, PartialEq)]
pub struct StackRequest {
    /// Terms naming the axes to stack over.
    pub axis_keys: Vec<String>,
    pub field: FieldKey,
    pub reduction: Option<Reduction>,
    /// Fill value for axis values missing from a bucket.
    pub pad_missing: Option<f64>,
}

impl StackRequest {
    pub fn new<I, S>(axis_keys: I, field: impl Into<FieldKey>) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            axis_keys: axis_keys.into_iter().map(Into::into).collect(),
            field: field.into(),
            reduction: None,
            pad_missing: None,
        }
    }

    pub fn reduce(mut self, reduction: Reduction) -> Self {
        self.reduction = Some(reduction);
        self
    }

    pub fn pad_missing(mut self, value: f64) -> Self {
        self.pad_missing = Some(value);
        self
    }

    fn index_field(&self) -> FieldKey {
        FieldKey::from(self.axis_keys.join(" "))
    }
}

/// One context's stacked output.
#[derive(Debug, Clone, PartialEq)]
pub struct StackedBucket {
    pub context: DirectoryKey,
    /// Axis values of each row, in stack order.
    pub axis_values: Vec<Vec<Segment>>,
    pub stack_key: StoreKey,
    pub index_key: StoreKey,
    pub mask_key: Option<StoreKey>,
    /// Rows synthesized from the pad value.
    pub padded: usize,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct StackReport {
    pub buckets: Vec<StackedBucket>,
}

impl StackReport {
    pub fn len(&self) -> usize {
        self.buckets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }

    pub fn bucket(&self, context: &DirectoryKey) -> Option<&StackedBucket> {
        self.buckets.iter().find(|b| &b.context == context)
    }
}

// ============================================================================
// Planning
// ============================================================================

#[derive(Debug)]
struct Row {
    axis: Vec<Segment>,
    /// `None` for padded rows.
    value: Option<DataValue>,
}

#[derive(Debug)]
struct Bucket {
    context: DirectoryKey,
    rows: Vec<Row>,
    padded: usize,
}

/// Token positions holding each axis term. A token whose parent equals the
/// term wins over a substring match; each token serves one axis only.
fn axis_positions(directory: &DirectoryKey, axis_keys: &[String]) -> Option<Vec<usize>> {
    let tokens = directory.tokens();
    let mut positions: Vec<usize> = Vec::with_capacity(axis_keys.len());
    for axis in axis_keys {
        let mut by_parent = None;
        let mut by_term = None;
        for (i, token) in tokens.iter().enumerate() {
            if positions.contains(&i) {
                continue;
            }
            if by_parent.is_none() && token.parent() == Some(axis.as_str()) {
                by_parent = Some(i);
            }
            if by_term.is_none() && token.contains_term(axis) {
                by_term = Some(i);
            }
        }
        positions.push(by_parent.or(by_term)?);
    }
    Some(positions)
}

/// Position of the first axis whose values mix numbers and text.
fn unsortable_axis(rows: &[Row], axes: usize) -> Option<usize> {
    (0..axes).find(|&p| {
        let numeric = rows.iter().filter(|r| r.axis[p].is_numeric()).count();
        numeric != 0 && numeric != rows.len()
    })
}

fn sort_axis_values(values: &mut [Vec<Segment>], axes: usize) {
    let mixed = (0..axes).any(|p| {
        let numeric = values.iter().filter(|v| v[p].is_numeric()).count();
        numeric != 0 && numeric != values.len()
    });
    if !mixed {
        values.sort();
    }
}

impl DataManager {
    fn collect_buckets(&self, request: &StackRequest) -> Result<Vec<Bucket>> {
        let mut buckets: Vec<Bucket> = Vec::new();
        for key in &self.order {
            if key.field != request.field || is_reduced_directory(&key.directory) {
                continue;
            }
            let Some(positions) = axis_positions(&key.directory, &request.axis_keys) else {
                continue;
            };
            let context = key.directory.without(&positions);
            let axis: Vec<Segment> = positions.iter()
                .map(|&p| key.directory.tokens()[p].value().clone())
                .collect();
            let value = self.get_masked(&key.directory, &key.field)?;
            let row = Row { axis, value: Some(value) };
            match buckets.iter_mut().find(|b| b.context == context) {
                Some(bucket) => bucket.rows.push(row),
                None => buckets.push(Bucket { context, rows: vec![row], padded: 0 }),
            }
        }
        Ok(buckets)
    }

    /// Axis values every bucket should cover when padding.
    fn pad_coverage(&self, request: &StackRequest, buckets: &[Bucket]) -> Vec<Vec<Segment>> {
        if let Some(record) = self.reductions.iter().rev().find(|r| r.axis_keys == request.axis_keys) {
            return record.axis_values.clone();
        }
        let mut union: Vec<Vec<Segment>> = Vec::new();
        for row in buckets.iter().flat_map(|b| &b.rows) {
            if !union.contains(&row.axis) {
                union.push(row.axis.clone());
            }
        }
        sort_axis_values(&mut union, request.axis_keys.len());
        union
    }

    /// Stack `request.field` over `request.axis_keys`.
    ///
    /// Per context bucket this stores the stack under the field key, the
    /// index map under the joined axis keys and, with a reduction, the
    /// winning row per column as the context's reduction mask.
    pub fn stack(&mut self, request: &StackRequest) -> Result<StackReport> {
        let mut buckets = self.collect_buckets(request)?;
        if buckets.is_empty() {
            tracing::warn!(field = %request.field, axes = ?request.axis_keys, "nothing to stack");
            return Ok(StackReport::default());
        }
        let axes = request.axis_keys.len();
        let axis_label = request.axis_keys.join(" ");

        if request.pad_missing.is_some() {
            let coverage = self.pad_coverage(request, &buckets);
            for bucket in &mut buckets {
                for axis in &coverage {
                    if !bucket.rows.iter().any(|r| &r.axis == axis) {
                        bucket.rows.push(Row { axis: axis.clone(), value: None });
                        bucket.padded += 1;
                    }
                }
            }
        }

        let mut warnings = Vec::new();
        let mut outputs = Vec::new();
        let mut coverage: Vec<Vec<Segment>> = Vec::new();

        for mut bucket in buckets {
            match unsortable_axis(&bucket.rows, axes) {
                Some(p) => warnings.push(Warning::UnsortableAxis {
                    context: bucket.context.to_string(),
                    axis: request.axis_keys[p].clone(),
                }),
                None => bucket.rows.sort_by(|a, b| a.axis.cmp(&b.axis)),
            }

            let (rows, unit, mixed_units) = convert_rows(&bucket.rows);
            if let Some(units) = mixed_units {
                warnings.push(Warning::InconsistentStackUnits {
                    context: bucket.context.to_string(),
                    field: request.field.to_string(),
                    units,
                });
            }
            let values = stack_values(&rows, request.pad_missing.unwrap_or(f64::NAN));
            let index = index_map(&bucket.rows, values.shape());

            let label = rows.iter().flatten().next()
                .map(|v| v.data_label().to_owned())
                .unwrap_or_else(|| request.field.to_string());
            let stacked = DataValue::with_unit(request.field.to_string(), SourceKind::Stacked, values, unit)
                .with_data_label(label);
            let labels: Vec<Segment> = bucket.rows.iter().map(|r| axis_label_of(&r.axis)).collect();
            let index_value = DataValue::with_unit(axis_label.clone(), SourceKind::Created, index, Unit::dimensionless())
                .with_key_index(Some(labels))
                .with_data_label(axis_label.clone());

            let mask = request.reduction.map(|r| {
                let winners = reduce(stacked.raw(), r);
                DataValue::from_vec(REDUCTION_MASK_KEY, SourceKind::IndexMask, winners, None)
            });

            let axis_values: Vec<Vec<Segment>> = bucket.rows.iter().map(|r| r.axis.clone()).collect();
            for axis in &axis_values {
                if !coverage.contains(axis) {
                    coverage.push(axis.clone());
                }
            }
            outputs.push((bucket.context, axis_values, bucket.padded, stacked, index_value, mask));
        }

        for warning in warnings {
            self.warn(warning);
        }

        let mut report = StackReport::default();
        for (context, axis_values, padded, stacked, index_value, mask) in outputs {
            let stack_key = StoreKey::new(context.clone(), request.field.clone());
            let index_key = StoreKey::new(context.clone(), request.index_field());
            tracing::info!(
                context = %context,
                field = %request.field,
                rows = axis_values.len(),
                padded,
                "stacked"
            );
            self.add(stack_key.directory.clone(), stack_key.field.clone(), stacked);
            self.add(index_key.directory.clone(), index_key.field.clone(), index_value);
            let mask_key = mask.map(|mask| {
                let key = reduction_mask_key(&context);
                self.add(key.directory.clone(), key.field.clone(), mask);
                key
            });
            report.buckets.push(StackedBucket { context, axis_values, stack_key, index_key, mask_key, padded });
        }

        if request.reduction.is_some() {
            sort_axis_values(&mut coverage, axes);
            self.reductions.push(ReductionRecord { axis_keys: request.axis_keys.clone(), axis_values: coverage });
        }
        Ok(report)
    }
}

// ============================================================================
// Array assembly
// ============================================================================

/// Convert every member to the first member's unit. On any failure the
/// stack is dimensionless and the distinct unit symbols are returned.
fn convert_rows(rows: &[Row]) -> (Vec<Option<DataValue>>, Unit, Option<Vec<String>>) {
    let target = rows.iter()
        .find_map(|r| r.value.as_ref())
        .map(|v| v.unit().clone())
        .unwrap_or_else(Unit::dimensionless);

    let mut consistent = true;
    let mut converted = Vec::with_capacity(rows.len());
    for row in rows {
        let value = row.value.as_ref().map(|v| {
            let mut v = v.clone();
            if v.convert_to_unit(&target).is_err() {
                consistent = false;
            }
            v
        });
        converted.push(value);
    }
    if consistent {
        return (converted, target, None);
    }

    let mut symbols: Vec<String> = Vec::new();
    for v in rows.iter().filter_map(|r| r.value.as_ref()) {
        let symbol = v.units();
        if !symbols.contains(&symbol) {
            symbols.push(symbol);
        }
    }
    let originals = rows.iter().map(|r| r.value.clone()).collect();
    (originals, Unit::dimensionless(), Some(symbols))
}

/// Member samples with infeasible ones replaced by NaN.
fn row_samples(value: &DataValue) -> Vec<f64> {
    let mut samples = value.to_vec();
    if let Some(feasible) = value.feasible() {
        if value.data().shape() == value.raw().shape() && feasible.len() == samples.len() {
            for (s, ok) in samples.iter_mut().zip(feasible) {
                if !ok {
                    *s = f64::NAN;
                }
            }
        }
    }
    samples
}

/// 1-D when every member is a scalar, else rows of samples padded with NaN.
fn stack_values(rows: &[Option<DataValue>], pad: f64) -> ArrayD<f64> {
    let all_scalar = rows.iter().flatten().all(|v| v.data().ndim() == 0);
    if all_scalar {
        let values: Vec<f64> = rows.iter()
            .map(|r| r.as_ref().map_or(pad, |v| row_samples(v).first().copied().unwrap_or(f64::NAN)))
            .collect();
        let n = values.len();
        return ArrayD::from_shape_vec(IxDyn(&[n]), values)
            .unwrap_or_else(|_| ArrayD::zeros(IxDyn(&[0])));
    }

    let samples: Vec<Option<Vec<f64>>> = rows.iter().map(|r| r.as_ref().map(row_samples)).collect();
    let width = samples.iter().flatten().map(Vec::len).max().unwrap_or(0);
    let mut out = Array2::from_elem((rows.len(), width), f64::NAN);
    for (i, row) in samples.iter().enumerate() {
        match row {
            Some(values) => {
                for (j, v) in values.iter().enumerate() {
                    out[[i, j]] = *v;
                }
            }
            None => out.row_mut(i).fill(pad),
        }
    }
    out.into_dyn()
}

/// Same shape as the stack; each row holds its numeric axis value when
/// there is a single numeric axis, else its row position.
fn index_map(rows: &[Row], shape: &[usize]) -> ArrayD<f64> {
    let numeric = rows.iter().all(|r| r.axis.len() == 1 && r.axis[0].is_numeric());
    let row_value = |i: usize| -> f64 {
        if numeric {
            rows[i].axis[0].as_f64().unwrap_or(i as f64)
        } else {
            i as f64
        }
    };
    match shape {
        [n, width] => Array2::from_shape_fn((*n, *width), |(i, _)| row_value(i)).into_dyn(),
        _ => {
            let values: Vec<f64> = (0..rows.len()).map(row_value).collect();
            ArrayD::from_shape_vec(IxDyn(&[rows.len()]), values)
                .unwrap_or_else(|_| ArrayD::zeros(IxDyn(&[0])))
        }
    }
}

fn axis_label_of(axis: &[Segment]) -> Segment {
    match axis {
        [single] => single.clone(),
        many => Segment::Text(many.iter().map(Segment::to_string).collect::<Vec<_>>().join(", ")),
    }
}

/// Winning row per column (one entry for a 1-D stack); NaN where a column
/// has no finite value.
fn reduce(values: &ArrayD<f64>, reduction: Reduction) -> Vec<f64> {
    if values.ndim() < 2 {
        return vec![best_row(values.iter().copied(), reduction)];
    }
    values.axis_iter(Axis(1))
        .map(|column| best_row(column.iter().copied(), reduction))
        .collect()
}

fn best_row(values: impl Iterator<Item = f64>, reduction: Reduction) -> f64 {
    let mut best: Option<(usize, f64)> = None;
    for (i, v) in values.enumerate() {
        if v.is_nan() {
            continue;
        }
        if best.is_none_or(|(_, b)| reduction.prefers(v, b)) {
            best = Some((i, v));
        }
    }
    best.map_or(f64::NAN, |(i, _)| i as f64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ImportConfig;
    use crate::model::AxisToken;

    fn run(erd: &str, stages: i64) -> DirectoryKey {
        DirectoryKey::from_tokens([
            AxisToken::paired("erd", erd),
            AxisToken::paired("stages", Segment::Int(stages)),
        ])
    }

    fn context(erd: &str) -> DirectoryKey {
        DirectoryKey::from(AxisToken::paired("erd", erd))
    }

    fn samples(values: &[f64]) -> DataValue {
        DataValue::from_vec("LCOW", SourceKind::Imported, values.to_vec(), Some("USD/m**3"))
    }

    #[test]
    fn test_index_map_follows_sorted_axis() {
        let mut dm = DataManager::new(ImportConfig::default());
        for (stages, cost) in [(3, 30.0), (1, 10.0), (2, 20.0)] {
            dm.add(run("px", stages), "LCOW", DataValue::scalar("LCOW", SourceKind::Imported, cost, Some("USD/m**3")));
        }
        let report = dm.stack(&StackRequest::new(["stages"], "LCOW")).unwrap();
        assert_eq!(report.len(), 1);

        let ctx = context("px");
        let index = dm.get(&ctx, &FieldKey::from("stages")).unwrap();
        assert_eq!(index.to_vec(), vec![1.0, 2.0, 3.0]);
        let stacked = dm.get(&ctx, &FieldKey::from("LCOW")).unwrap();
        assert_eq!(stacked.to_vec(), vec![10.0, 20.0, 30.0]);
        assert_eq!(stacked.kind(), SourceKind::Stacked);
        assert_eq!(stacked.units(), "USD/m**3");
    }

    #[test]
    fn test_min_reduction_selects_row_per_column() {
        let mut dm = DataManager::new(ImportConfig::default());
        dm.add(run("px", 1), "LCOW", samples(&[5.0, 5.0, 5.0]));
        dm.add(run("px", 2), "LCOW", samples(&[1.0, 2.0, 3.0]));
        dm.add(run("px", 3), "LCOW", samples(&[4.0, 4.0, 4.0]));

        let report = dm.stack(&StackRequest::new(["stages"], "LCOW").reduce(Reduction::Min)).unwrap();
        let bucket = &report.buckets[0];
        let mask = dm.get_key(bucket.mask_key.as_ref().unwrap()).unwrap();
        assert_eq!(mask.to_vec(), vec![1.0, 1.0, 1.0]);
        assert_eq!(mask.kind(), SourceKind::IndexMask);

        let ctx = context("px");
        assert_eq!(dm.get_masked(&ctx, &FieldKey::from("LCOW")).unwrap().to_vec(), vec![1.0, 2.0, 3.0]);
        assert_eq!(dm.get_masked(&ctx, &FieldKey::from("stages")).unwrap().to_vec(), vec![2.0, 2.0, 2.0]);
    }

    #[test]
    fn test_all_nan_column_gives_nan_index() {
        let mut dm = DataManager::new(ImportConfig::default());
        dm.add(run("px", 1), "LCOW", samples(&[f64::NAN, 2.0]));
        dm.add(run("px", 2), "LCOW", samples(&[f64::NAN, 1.0]));
        dm.stack(&StackRequest::new(["stages"], "LCOW").reduce(Reduction::Max)).unwrap();

        let masked = dm.get_masked(&context("px"), &FieldKey::from("LCOW")).unwrap().to_vec();
        assert!(masked[0].is_nan());
        assert_eq!(masked[1], 2.0);
    }

    #[test]
    fn test_infeasible_samples_are_excluded() {
        let mut dm = DataManager::new(ImportConfig::default());
        dm.add(run("px", 1), "LCOW", samples(&[1.0, 5.0]).with_feasibility(vec![false, true]).unwrap());
        dm.add(run("px", 2), "LCOW", samples(&[2.0, 6.0]));
        dm.stack(&StackRequest::new(["stages"], "LCOW").reduce(Reduction::Min)).unwrap();

        let mask = dm.reduction_mask(&context("px")).unwrap();
        assert_eq!(mask.to_vec(), vec![1.0, 0.0]);
    }

    #[test]
    fn test_padding_uses_previous_reduction_coverage() {
        let mut dm = DataManager::new(ImportConfig::default());
        for stages in [1, 2, 3] {
            dm.add(run("px", stages), "LCOW", samples(&[stages as f64]));
        }
        for stages in [1, 3] {
            dm.add(run("pat", stages), "LCOW", samples(&[stages as f64]));
        }
        dm.stack(&StackRequest::new(["stages"], "LCOW").reduce(Reduction::Min)).unwrap();

        dm.add(run("px", 1), "recovery", samples(&[0.5]));
        dm.add(run("pat", 1), "recovery", samples(&[0.4]));
        let report = dm.stack(&StackRequest::new(["stages"], "recovery").pad_missing(-1.0)).unwrap();
        let pat = report.bucket(&context("pat")).unwrap();
        assert_eq!(pat.padded, 2);
        assert_eq!(pat.axis_values.len(), 3);

        dm.set_masking(false);
        let stacked = dm.get(&context("pat"), &FieldKey::from("recovery")).unwrap();
        assert_eq!(stacked.to_vec(), vec![0.4, -1.0, -1.0]);
    }

    #[test]
    fn test_mixed_axis_values_keep_insertion_order() {
        let mut dm = DataManager::new(ImportConfig::default());
        let dirs = [
            DirectoryKey::from(AxisToken::paired("case", "beta")),
            DirectoryKey::from(AxisToken::paired("case", Segment::Int(2))),
        ];
        for (i, dir) in dirs.iter().enumerate() {
            dm.add(dir.clone(), "LCOW", DataValue::scalar("LCOW", SourceKind::Imported, i as f64, None));
        }
        let report = dm.stack(&StackRequest::new(["case"], "LCOW")).unwrap();
        assert_eq!(
            report.buckets[0].axis_values,
            vec![vec![Segment::Text("beta".into())], vec![Segment::Int(2)]]
        );
        assert!(dm.diagnostics().iter().any(|w| matches!(w, Warning::UnsortableAxis { .. })));
        let index = dm.get(&DirectoryKey::new(), &FieldKey::from("case")).unwrap();
        assert_eq!(index.to_vec(), vec![0.0, 1.0]);
    }

    #[test]
    fn test_inconsistent_units_fall_back_to_dimensionless() {
        let mut dm = DataManager::new(ImportConfig::default());
        dm.add(run("px", 1), "LCOW", DataValue::scalar("LCOW", SourceKind::Imported, 1.0, Some("m")));
        dm.add(run("px", 2), "LCOW", DataValue::scalar("LCOW", SourceKind::Imported, 2.0, Some("s")));
        dm.stack(&StackRequest::new(["stages"], "LCOW")).unwrap();

        let stacked = dm.get(&context("px"), &FieldKey::from("LCOW")).unwrap();
        assert!(stacked.unit().is_dimensionless());
        assert!(dm.diagnostics().iter().any(|w| matches!(w, Warning::InconsistentStackUnits { .. })));
    }
}
