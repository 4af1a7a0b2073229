//! # sweepstore — Unit-Aware Store for Parametric Sweep Results
//!
//! Ingests nested sweep files (JSON or HDF5), discovers the run directories
//! inside them and exposes every field as a unit-aware [`DataValue`] under a
//! composite `(directory, field)` key.
//!
//! ## Design Principles
//!
//! 1. **Trait-first sources**: [`source::TreeNode`] is the contract between a file format and discovery
//! 2. **Clean DTOs**: [`DataValue`], [`DirectoryKey`], [`FieldKey`] cross all boundaries
//! 3. **Explicit masking**: [`DataManager::get`] is raw, [`DataManager::get_masked`] applies reductions
//! 4. **Deferred expressions**: registered before import, evaluated per directory after it
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use sweepstore::{DataManager, ImportConfig, StackRequest, Reduction};
//!
//! # fn example() -> sweepstore::Result<()> {
//! let mut dm = DataManager::open("results.json", ImportConfig::default())?;
//! dm.register_field("fs.costing.LCOW", "LCOW");
//! dm.register_field("fs.water_recovery", "recovery");
//! dm.load(true)?;
//!
//! let ek = dm.get_expression_keys();
//! let metric = ek.field("LCOW")? / (ek.field("recovery")? * 100.0);
//! dm.register_expression(metric, "metric", None, None);
//! dm.evaluate_expressions()?;
//!
//! dm.stack(&StackRequest::new(["number_of_stages"], "LCOW").reduce(Reduction::Min))?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Source Formats
//!
//! | Format | Feature | Description |
//! |--------|---------|-------------|
//! | JSON | (default) | Nested objects, `value`/`values` + `units` leaves |
//! | HDF5 | `hdf5` | Groups and datasets via `hdf5-metno` |

// ============================================================================
// Modules
// ============================================================================

pub mod model;
pub mod config;
pub mod source;
pub mod discovery;
pub mod store;
pub mod expr;
pub mod export;

// ============================================================================
// Re-exports: Model (the DTOs)
// ============================================================================

pub use model::{
    AxisToken, DirectoryKey, FieldKey, Segment, StoreKey,
    DataValue, DataFilter, FilterKind, SourceKind, Unit, register_unit,
};

// ============================================================================
// Re-exports: Configuration
// ============================================================================

pub use config::{FieldSpec, ImportConfig};

// ============================================================================
// Re-exports: Store, stacking, expressions
// ============================================================================

pub use discovery::{DirectoryIndex, Discoverer, FieldResolver, Resolution, RunDirectory};
pub use store::{DataManager, ImportStatus, MissingField, Selection};
pub use store::stack::{Reduction, StackReport, StackRequest, StackedBucket};
pub use expr::{ExprNode, Expression, ExpressionKeys};
pub use export::export_json;

// ============================================================================
// Warnings (non-fatal, logged and collected)
// ============================================================================

/// Recoverable per-directory or per-bucket problems.
///
/// Each one is logged with `tracing::warn!` and kept in
/// [`DataManager::diagnostics`].
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum Warning {
    #[error("directory '{directory}' contains no data groups, dropped")]
    SchemaDiscovery { directory: String },

    #[error("{0}")]
    FieldNotImported(MissingField),

    #[error("expression '{expression}' skipped in directory '{directory}': missing {}", .missing.join(", "))]
    ExpressionEvaluation { expression: String, directory: String, missing: Vec<String> },

    #[error("expression '{expression}' was not evaluated in any directory")]
    ExpressionUnevaluated { expression: String },

    #[error("axis values for '{axis}' in '{context}' cannot be sorted, using insertion order")]
    UnsortableAxis { context: String, axis: String },

    #[error("mask for '{key}' degraded {degraded} column(s) to NaN")]
    MaskShape { key: String, degraded: usize },

    #[error("inconsistent units [{}] stacking '{field}' in '{context}', using dimensionless", .units.join(", "))]
    InconsistentStackUnits { context: String, field: String, units: Vec<String> },

    #[error("field '{field}' in '{directory}' skipped: {reason}")]
    EmptyField { field: String, directory: String, reason: String },
}

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Field '{field}' not found in directory '{directory}'")]
    FieldNotFound { field: String, directory: String },

    #[error("Incompatible units: cannot convert '{from}' to '{to}'")]
    IncompatibleUnits { from: String, to: String },

    #[error("Registered fields not imported: {}", store::format_missing(.0))]
    MissingRegisteredFields(Vec<MissingField>),

    #[error("Type error: {0}")]
    TypeError(String),

    #[error("Key not found: {0}")]
    KeyNotFound(String),

    #[error("Shape error: {0}")]
    Shape(String),

    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),

    #[error("Malformed source: {0}")]
    Format(String),

    #[error("Cannot parse units '{units}' at position {position}: {message}")]
    UnitParse { units: String, position: usize, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
