//! # Keyed Store
//!
//! [`DataManager`] maps `(directory, field)` keys to [`DataValue`]s. It owns
//! the opened sweep file and its discovery index, tracks which registered
//! fields were imported, evaluates registered expressions, and applies
//! reduction masks on read.
//!
//! ## Read paths
//!
//! | Method | Masking |
//! |--------|---------|
//! | [`DataManager::get`] | never (raw stored value) |
//! | [`DataManager::get_masked`] | reduction mask of the directory, if masking is on |

mod import;
pub mod stack;

use std::fmt;
use std::path::Path;

use hashbrown::HashMap;
use parking_lot::RwLock;

use crate::config::{FieldSpec, ImportConfig};
use crate::discovery::resolver::nearest_matches;
use crate::discovery::{DirectoryIndex, Discoverer, FieldResolver, Resolution};
use crate::expr::{Expression, ExpressionKeys, RegisteredExpression};
use crate::model::{AxisToken, DataFilter, DataValue, DirectoryKey, FieldKey, Segment, StoreKey};
use crate::source::{JsonNode, Source, with_root};
use crate::{Error, Result, Warning};

/// Token appended to a context directory to hold its reduction mask.
pub const REDUCED_DIRECTORY: &str = "reduced";
/// Field name of a stored reduction mask.
pub const REDUCTION_MASK_KEY: &str = "reduction_mask";

// ============================================================================
// Import status
// ============================================================================

/// Whether a registered field was found anywhere.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportStatus {
    pub source_key: String,
    pub imported: bool,
}

/// A registered field that was not imported, with suggestions.
#[derive(Debug, Clone, PartialEq)]
pub struct MissingField {
    pub return_key: String,
    pub source_key: String,
    /// Nearest available field names.
    pub suggestions: Vec<String>,
}

impl fmt::Display for MissingField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "registered key '{}' (return_key='{}') was NOT imported; ",
            self.source_key, self.return_key
        )?;
        if self.suggestions.is_empty() {
            write!(f, "No similar keys found")
        } else {
            write!(f, "Nearest available keys: {}", self.suggestions.join(", "))
        }
    }
}

pub(crate) fn format_missing(missing: &[MissingField]) -> String {
    missing.iter()
        .map(|m| format!("'{}'", m.return_key))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Axis coverage of the most recent reduction over a set of axis keys.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct ReductionRecord {
    pub axis_keys: Vec<String>,
    pub axis_values: Vec<Vec<Segment>>,
}

// ============================================================================
// DataManager
// ============================================================================

/// In-memory store of sweep results.
#[derive(Debug)]
pub struct DataManager {
    config: ImportConfig,
    source: Option<Source>,
    index: DirectoryIndex,
    entries: HashMap<StoreKey, DataValue>,
    order: Vec<StoreKey>,
    fields: Vec<FieldSpec>,
    import_status: HashMap<String, ImportStatus>,
    expressions: Vec<RegisteredExpression>,
    masking: bool,
    reductions: Vec<ReductionRecord>,
    /// Sanitized expression names, append-only for the manager's lifetime.
    expression_keys: ExpressionKeys,
    diagnostics: RwLock<Vec<Warning>>,
}

impl DataManager {
    /// An empty store with no backing file.
    pub fn new(config: ImportConfig) -> Self {
        Self {
            config,
            source: None,
            index: DirectoryIndex::default(),
            entries: HashMap::new(),
            order: Vec::new(),
            fields: Vec::new(),
            import_status: HashMap::new(),
            expressions: Vec::new(),
            masking: true,
            reductions: Vec::new(),
            expression_keys: ExpressionKeys::default(),
            diagnostics: RwLock::new(Vec::new()),
        }
    }

    /// Open a sweep file and discover its run directories.
    pub fn open(path: impl AsRef<Path>, config: ImportConfig) -> Result<Self> {
        let source = Source::open(path)?;
        Self::from_source(source, config)
    }

    pub fn from_json(value: serde_json::Value, config: ImportConfig) -> Self {
        let mut dm = Self::new(config);
        dm.index = Discoverer::new(&dm.config).discover(&JsonNode::new(&value));
        dm.source = Some(Source::Json(value));
        dm.absorb_discovery_warnings();
        dm
    }

    pub fn from_source(source: Source, config: ImportConfig) -> Result<Self> {
        let mut dm = Self::new(config);
        let index = with_root!(&source, |root| Discoverer::new(&dm.config).discover(&root));
        dm.index = index;
        dm.source = Some(source);
        dm.absorb_discovery_warnings();
        Ok(dm)
    }

    fn absorb_discovery_warnings(&mut self) {
        let warnings = std::mem::take(&mut self.index.warnings);
        self.diagnostics.get_mut().extend(warnings);
    }

    pub(crate) fn warn(&self, warning: Warning) {
        tracing::warn!("{warning}");
        self.diagnostics.write().push(warning);
    }

    // --- introspection ---

    pub fn config(&self) -> &ImportConfig {
        &self.config
    }

    pub fn index(&self) -> &DirectoryIndex {
        &self.index
    }

    /// Every field name present in the sweep file.
    pub fn unique_data_keys(&self) -> impl Iterator<Item = &str> {
        self.index.unique_data_keys.iter().map(String::as_str)
    }

    /// Data groups in precedence order.
    pub fn data_groups(&self) -> &[Option<String>] {
        &self.index.group_order
    }

    pub fn display_loaded_contents(&self) {
        self.index.display();
    }

    /// Snapshot of the warnings collected so far, oldest first.
    pub fn diagnostics(&self) -> Vec<Warning> {
        self.diagnostics.read().clone()
    }

    pub fn clear_diagnostics(&mut self) {
        self.diagnostics.get_mut().clear();
    }

    // --- registration ---

    /// Expect `source_key` in the file and store it as `return_key`.
    pub fn register_field(&mut self, source_key: impl Into<String>, return_key: impl Into<String>) {
        self.register(FieldSpec::new(source_key, return_key));
    }

    pub fn register(&mut self, spec: FieldSpec) {
        tracing::debug!(source = %spec.source_key, return_key = %spec.return_key, "registered field");
        self.import_status.insert(
            spec.return_key.clone(),
            ImportStatus { source_key: spec.source_key.clone(), imported: false },
        );
        self.expression_keys.insert(FieldKey::from(&spec.return_key));
        self.fields.retain(|f| f.return_key != spec.return_key);
        self.fields.push(spec);
    }

    pub fn registered_fields(&self) -> &[FieldSpec] {
        &self.fields
    }

    pub fn import_status(&self, return_key: &str) -> Option<&ImportStatus> {
        self.import_status.get(return_key)
    }

    /// Evaluate `expression` into `return_key` in every directory that holds its fields.
    pub fn register_expression(
        &mut self,
        expression: impl Into<Expression>,
        return_key: impl Into<String>,
        units: Option<&str>,
        assign_units: Option<&str>,
    ) {
        let registered = RegisteredExpression {
            expression: expression.into(),
            return_key: return_key.into(),
            units: units.map(str::to_owned),
            assign_units: assign_units.map(str::to_owned),
        };
        tracing::debug!(expression = %registered.expression, return_key = %registered.return_key, "registered expression");
        self.expression_keys.insert(FieldKey::from(&registered.return_key));
        self.expressions.push(registered);
    }

    /// Names for building expressions over registered return keys,
    /// expression return keys and stored fields.
    ///
    /// Names are assigned in first-seen order and never reassigned, so a key
    /// keeps its name across calls.
    pub fn get_expression_keys(&self) -> ExpressionKeys {
        self.expression_keys.clone()
    }

    // --- loading ---

    /// Import registered fields (or everything when none are registered),
    /// check import status and evaluate registered expressions.
    ///
    /// With `strict`, any registered field that was not found is an error.
    pub fn load(&mut self, strict: bool) -> Result<()> {
        self.import()?;
        self.check_import_status(strict)?;
        self.evaluate_expressions()?;
        Ok(())
    }

    /// Report registered fields that were never imported.
    ///
    /// Each one is logged with its nearest available source names. With
    /// `raise_error`, a non-empty result becomes
    /// [`Error::MissingRegisteredFields`].
    pub fn check_import_status(&mut self, raise_error: bool) -> Result<Vec<MissingField>> {
        let available: Vec<&str> = self.index.unique_data_keys.iter().map(String::as_str).collect();
        let mut missing = Vec::new();
        for spec in &self.fields {
            let imported = self.import_status.get(&spec.return_key).is_some_and(|s| s.imported);
            if imported {
                continue;
            }
            let suggestions = nearest_matches(&spec.source_key, &available, 3, self.config.search_cutoff);
            missing.push(MissingField {
                return_key: spec.return_key.clone(),
                source_key: spec.source_key.clone(),
                suggestions,
            });
        }
        for m in &missing {
            self.warn(Warning::FieldNotImported(m.clone()));
        }
        if raise_error && !missing.is_empty() {
            return Err(Error::MissingRegisteredFields(missing));
        }
        Ok(missing)
    }

    /// Resolve an approximate field name in one run directory.
    pub fn resolve_field(&self, directory: &DirectoryKey, name: &str, exact: bool) -> Result<Resolution> {
        let not_found = || Error::FieldNotFound { field: name.to_owned(), directory: directory.to_string() };
        let run = self.index.find(directory).ok_or_else(not_found)?;
        FieldResolver::new(&self.config, &self.index.group_order)
            .resolve(run, name, exact)
            .ok_or_else(not_found)
    }

    // --- store operations ---

    /// Insert `value`, marking any registered field named in `field` as imported.
    pub fn add(&mut self, directory: impl Into<DirectoryKey>, field: impl Into<FieldKey>, value: DataValue) {
        let key = StoreKey::new(directory, field);
        self.mark_imported(&key.field);
        self.expression_keys.insert(key.field.clone());
        if !self.entries.contains_key(&key) {
            self.order.push(key.clone());
        }
        self.entries.insert(key, value);
    }

    fn mark_imported(&mut self, field: &FieldKey) {
        for part in field.parts() {
            if let Some(status) = self.import_status.get_mut(part) {
                status.imported = true;
            }
        }
    }

    /// Stored value, unmasked.
    pub fn get(&self, directory: &DirectoryKey, field: &FieldKey) -> Result<&DataValue> {
        self.get_key(&StoreKey { directory: directory.clone(), field: field.clone() })
    }

    pub fn get_key(&self, key: &StoreKey) -> Result<&DataValue> {
        self.entries.get(key).ok_or_else(|| Error::KeyNotFound(key.to_string()))
    }

    /// Stored value with the directory's reduction mask applied, when masking
    /// is enabled and a mask exists.
    pub fn get_masked(&self, directory: &DirectoryKey, field: &FieldKey) -> Result<DataValue> {
        let mut value = self.get(directory, field)?.clone();
        if !self.masking {
            return Ok(value);
        }
        if let Some(mask) = self.reduction_mask(directory) {
            let filter = DataFilter::two_d(mask.raw().iter().copied().collect(), mask.raw().shape().to_vec());
            let outcome = value.mask(&filter)?;
            if outcome.degraded > 0 {
                self.warn(Warning::MaskShape {
                    key: StoreKey::new(directory.clone(), field.clone()).to_string(),
                    degraded: outcome.degraded,
                });
            }
        }
        Ok(value)
    }

    /// Reduction mask registered for `directory`, if any.
    pub fn reduction_mask(&self, directory: &DirectoryKey) -> Option<&DataValue> {
        self.entries.get(&reduction_mask_key(directory))
    }

    pub fn set_masking(&mut self, enabled: bool) {
        self.masking = enabled;
    }

    pub fn masking(&self) -> bool {
        self.masking
    }

    pub fn contains(&self, directory: &DirectoryKey, field: &FieldKey) -> bool {
        self.entries.contains_key(&StoreKey { directory: directory.clone(), field: field.clone() })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Store keys in insertion order.
    pub fn keys(&self) -> impl Iterator<Item = &StoreKey> {
        self.order.iter()
    }

    /// `(key, raw value)` pairs in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&StoreKey, &DataValue)> {
        self.order.iter().filter_map(|k| self.entries.get(k).map(|v| (k, v)))
    }

    /// Distinct directory keys in insertion order.
    pub fn directory_keys(&self) -> Vec<DirectoryKey> {
        let mut out: Vec<DirectoryKey> = Vec::new();
        for key in &self.order {
            if !out.contains(&key.directory) {
                out.push(key.directory.clone());
            }
        }
        out
    }

    /// Distinct field keys in insertion order.
    pub fn field_keys(&self) -> Vec<FieldKey> {
        let mut out: Vec<FieldKey> = Vec::new();
        for key in &self.order {
            if !out.contains(&key.field) {
                out.push(key.field.clone());
            }
        }
        out
    }

    /// Keys whose directory matches `terms`.
    ///
    /// With `exact`, a term must equal a directory component; otherwise it
    /// must appear in the directory key's string form. `require_all` needs
    /// every term to match, else one is enough. No terms selects everything.
    pub fn select<S: AsRef<str>>(&self, terms: &[S], require_all: bool, exact: bool) -> Selection<'_> {
        let matches = |dir: &DirectoryKey, term: &str| {
            if exact { dir.has_component(term) } else { dir.contains_term(term) }
        };
        let keys = self.order.iter()
            .filter(|k| {
                if terms.is_empty() {
                    return true;
                }
                let mut hits = terms.iter().map(|t| matches(&k.directory, t.as_ref()));
                if require_all { hits.all(|h| h) } else { hits.any(|h| h) }
            })
            .cloned()
            .collect();
        Selection { manager: self, keys }
    }

    // --- expressions ---

    /// Evaluate every registered expression in every directory holding all of
    /// its fields. Unit and type errors propagate; missing fields only warn.
    pub fn evaluate_expressions(&mut self) -> Result<()> {
        let expressions = self.expressions.clone();
        for registered in &expressions {
            self.evaluate_expression(registered)?;
        }
        Ok(())
    }

    fn evaluate_expression(&mut self, registered: &RegisteredExpression) -> Result<()> {
        let required = registered.expression.required_fields();
        let mut results = Vec::new();
        let mut skipped = Vec::new();

        for directory in self.directory_keys() {
            if is_reduced_directory(&directory) {
                continue;
            }
            let mut values = std::collections::HashMap::new();
            let mut missing = Vec::new();
            for field in required {
                match self.entries.get(&StoreKey { directory: directory.clone(), field: field.clone() }) {
                    Some(v) => {
                        values.insert(field.clone(), v);
                    }
                    None => missing.push(field.to_string()),
                }
            }
            if !missing.is_empty() {
                skipped.push(Warning::ExpressionEvaluation {
                    expression: registered.expression.to_string(),
                    directory: directory.to_string(),
                    missing,
                });
                continue;
            }

            let mut result = registered.expression.evaluate(&values)?
                .with_data_label(registered.return_key.as_str());
            if let Some(units) = &registered.assign_units {
                result.assign_units(units, 1.0);
            }
            if let Some(units) = &registered.units {
                result.convert_to(units)?;
            }
            results.push((directory, result));
        }

        for warning in skipped {
            self.warn(warning);
        }
        if results.is_empty() {
            self.warn(Warning::ExpressionUnevaluated { expression: registered.expression.to_string() });
            return Ok(());
        }
        tracing::info!(
            expression = %registered.expression,
            return_key = %registered.return_key,
            directories = results.len(),
            "evaluated expression"
        );
        for (directory, value) in results {
            self.add(directory, registered.return_key.as_str(), value);
        }
        Ok(())
    }
}

pub(crate) fn reduction_mask_key(context: &DirectoryKey) -> StoreKey {
    StoreKey {
        directory: context.child(AxisToken::Bare(Segment::Text(REDUCED_DIRECTORY.to_owned()))),
        field: FieldKey::from(REDUCTION_MASK_KEY),
    }
}

pub(crate) fn is_reduced_directory(directory: &DirectoryKey) -> bool {
    matches!(directory.last(), Some(AxisToken::Bare(Segment::Text(t))) if t == REDUCED_DIRECTORY)
}

// ============================================================================
// Selection
// ============================================================================

/// A subset of store keys, read through its manager.
#[derive(Debug, Clone)]
pub struct Selection<'a> {
    manager: &'a DataManager,
    keys: Vec<StoreKey>,
}

impl<'a> Selection<'a> {
    pub fn keys(&self) -> &[StoreKey] {
        &self.keys
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Narrow to one field.
    pub fn field(self, field: &FieldKey) -> Selection<'a> {
        let keys = self.keys.into_iter().filter(|k| &k.field == field).collect();
        Selection { manager: self.manager, keys }
    }

    pub fn directory_keys(&self) -> Vec<DirectoryKey> {
        let mut out: Vec<DirectoryKey> = Vec::new();
        for key in &self.keys {
            if !out.contains(&key.directory) {
                out.push(key.directory.clone());
            }
        }
        out
    }

    /// Raw values.
    pub fn iter(&self) -> impl Iterator<Item = (&StoreKey, &'a DataValue)> + '_ {
        let manager = self.manager;
        self.keys.iter().filter_map(move |k| manager.entries.get(k).map(|v| (k, v)))
    }

    /// Values read through [`DataManager::get_masked`].
    pub fn masked(&self) -> Result<Vec<(StoreKey, DataValue)>> {
        self.keys.iter()
            .map(|k| Ok((k.clone(), self.manager.get_masked(&k.directory, &k.field)?)))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::ExprNode;
    use crate::model::SourceKind;

    fn value(key: &str, values: &[f64]) -> DataValue {
        DataValue::from_vec(key, SourceKind::Created, values.to_vec(), Some("m"))
    }

    fn dir(tokens: &[&str]) -> DirectoryKey {
        DirectoryKey::from_tokens(tokens.iter().map(|t| AxisToken::from(*t)))
    }

    #[test]
    fn test_add_marks_registered_fields() {
        let mut dm = DataManager::new(ImportConfig::default());
        dm.register_field("LCOW", "LCOW");
        dm.add(dir(&["test_dir"]), ("cost_breakdown", "LCOW"), value("LCOW", &[1.0]));
        assert!(dm.import_status("LCOW").unwrap().imported);

        dm.register_field("fs.other", "other");
        dm.add(dir(&["test_dir"]), "unrelated", value("x", &[1.0]));
        assert!(!dm.import_status("other").unwrap().imported);
    }

    #[test]
    fn test_get_is_exact() {
        let mut dm = DataManager::new(ImportConfig::default());
        dm.add(dir(&["a"]), "LCOW", value("LCOW", &[1.0]));
        assert!(dm.get(&dir(&["a"]), &FieldKey::from("LCOW")).is_ok());
        assert!(matches!(dm.get(&dir(&["a"]), &FieldKey::from("LCO")), Err(Error::KeyNotFound(_))));
    }

    #[test]
    fn test_select_modes() {
        let mut dm = DataManager::new(ImportConfig::default());
        dm.add(dir(&["erd_type=pressure_exchanger", "membrane_cost"]), "LCOW", value("a", &[1.0]));
        dm.add(dir(&["erd_type=pump_as_turbine", "membrane_cost"]), "LCOW", value("b", &[1.0]));
        dm.add(dir(&["erd_type=pump_as_turbine", "membrane_group"]), "LCOW", value("c", &[1.0]));

        assert_eq!(dm.select(&["pump"], true, false).len(), 2);
        assert_eq!(dm.select(&["pump"], true, true).len(), 0);
        assert_eq!(dm.select(&["membrane_cost"], true, true).len(), 2);
        assert_eq!(dm.select(&["pump", "membrane_cost"], true, false).len(), 1);
        assert_eq!(dm.select(&["pump", "membrane_cost"], false, false).len(), 3);
        assert_eq!(dm.select::<&str>(&[], true, false).len(), 3);
    }

    #[test]
    fn test_masked_read_uses_reduction_mask() {
        let mut dm = DataManager::new(ImportConfig::default());
        let context = dir(&["ctx"]);
        let stacked = DataValue::with_unit(
            "LCOW",
            SourceKind::Stacked,
            ndarray::arr2(&[[1.0, 5.0], [2.0, 3.0]]).into_dyn(),
            crate::Unit::dimensionless(),
        );
        dm.add(context.clone(), "LCOW", stacked);
        let mask = DataValue::from_vec(REDUCTION_MASK_KEY, SourceKind::IndexMask, vec![0.0, 1.0], None);
        let mask_key = reduction_mask_key(&context);
        dm.add(mask_key.directory, mask_key.field, mask);

        let field = FieldKey::from("LCOW");
        assert_eq!(dm.get_masked(&context, &field).unwrap().to_vec(), vec![1.0, 3.0]);
        assert_eq!(dm.get(&context, &field).unwrap().len(), 4);
        dm.set_masking(false);
        assert_eq!(dm.get_masked(&context, &field).unwrap().len(), 4);
    }

    #[test]
    fn test_masked_read_records_degraded_columns() {
        let mut dm = DataManager::new(ImportConfig::default());
        let context = dir(&["ctx"]);
        dm.add(context.clone(), "recovery", value("recovery", &[0.4, 0.5]));
        let mask = DataValue::from_vec(REDUCTION_MASK_KEY, SourceKind::IndexMask, vec![0.0, 1.0], None);
        let mask_key = reduction_mask_key(&context);
        dm.add(mask_key.directory, mask_key.field, mask);

        let masked = dm.get_masked(&context, &FieldKey::from("recovery")).unwrap().to_vec();
        assert_eq!(masked[0], 0.4);
        assert!(masked[1].is_nan());
        let diagnostics = dm.diagnostics();
        assert!(matches!(
            diagnostics.as_slice(),
            [Warning::MaskShape { key, degraded: 1 }] if key == "[ctx] recovery"
        ));
    }

    #[test]
    fn test_expression_names_are_stable() {
        let mut dm = DataManager::new(ImportConfig::default());
        dm.add(dir(&["a"]), "fs.costing.LCOW", value("LCOW", &[1.0]));
        dm.add(dir(&["a"]), "fs_costing_LCOW", value("LCOW", &[2.0]));

        let first = dm.get_expression_keys();
        assert_eq!(first.key_for("fs_costing_LCOW"), Some(&FieldKey::from("fs.costing.LCOW")));
        assert_eq!(first.key_for("fs_costing_LCOW_1"), Some(&FieldKey::from("fs_costing_LCOW")));

        dm.register_field("fs_costing_LCOW", "fs_costing_LCOW");
        dm.register_expression(ExprNode::field("fs.costing.LCOW") * 2, "doubled", None, None);
        let second = dm.get_expression_keys();
        assert_eq!(second.key_for("fs_costing_LCOW"), Some(&FieldKey::from("fs.costing.LCOW")));
        assert_eq!(second.key_for("fs_costing_LCOW_1"), Some(&FieldKey::from("fs_costing_LCOW")));
        assert_eq!(second.key_for("doubled"), Some(&FieldKey::from("doubled")));
    }

    #[test]
    fn test_missing_field_message() {
        let m = MissingField {
            return_key: "Missing Key".into(),
            source_key: "fs.nonexistent.key".into(),
            suggestions: vec![],
        };
        let text = m.to_string();
        assert!(text.contains("NOT imported"));
        assert!(text.contains("No similar keys found"));
        let err = Error::MissingRegisteredFields(vec![m]);
        assert!(err.to_string().contains("Missing Key"));
    }
}
