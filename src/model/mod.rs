//! # Data Model
//!
//! Types that cross every boundary: discovery ↔ store ↔ stacking ↔ expressions.
//!
//! This module is pure data and unit algebra, no I/O and no source formats.

pub mod keys;
pub mod units;
pub mod data_value;

pub use keys::{AxisToken, DirectoryKey, FieldKey, Segment, StoreKey, parse_key_index};
pub use units::{Conversion, Dimension, Unit, normalize_unit_str, register_unit};
pub use data_value::{
    BinaryOp, DataFilter, DataValue, FilterKind, MaskOutcome, Operand, SourceKind,
};
