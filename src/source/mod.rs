//! # Source Adapters
//!
//! The contract between the discovery/import pipeline and a sweep file.
//! Discovery and import are written against [`TreeNode`] only, so every
//! backing format walks the same way.
//!
//! ## Implementations
//!
//! | Adapter | Module | Feature |
//! |---------|--------|---------|
//! | `JsonNode` | `json` | (default) |
//! | `Hdf5Node` | `hdf5` | `hdf5` |

pub mod json;
#[cfg(feature = "hdf5")]
pub mod hdf5;

use std::path::Path;

use ndarray::ArrayD;

use crate::{Error, Result};

pub use json::JsonNode;
#[cfg(feature = "hdf5")]
pub use self::hdf5::Hdf5Node;

// ============================================================================
// Leaf payloads
// ============================================================================

/// Contents of a leaf dataset.
#[derive(Debug, Clone, PartialEq)]
pub enum LeafData {
    Numbers(ArrayD<f64>),
    Text(Vec<String>),
}

impl LeafData {
    pub fn len(&self) -> usize {
        match self {
            LeafData::Numbers(a) => a.len(),
            LeafData::Text(t) => t.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Interpret as a boolean mask (non-zero is `true`).
    pub fn to_bools(&self) -> Option<Vec<bool>> {
        match self {
            LeafData::Numbers(a) => Some(a.iter().map(|v| *v != 0.0 && !v.is_nan()).collect()),
            LeafData::Text(t) => t.iter()
                .map(|s| match s.trim().to_ascii_lowercase().as_str() {
                    "true" | "1" => Some(true),
                    "false" | "0" => Some(false),
                    _ => None,
                })
                .collect(),
        }
    }
}

// ============================================================================
// TreeNode
// ============================================================================

/// A node of a hierarchical sweep file: either a group with named children
/// or a leaf dataset.
pub trait TreeNode: Sized {
    /// Whether this node is a group.
    fn has_keys(&self) -> bool;

    /// Child names of a group, in file order. Empty for leaves.
    fn keys(&self) -> Vec<String>;

    /// Named child of a group.
    fn get(&self, key: &str) -> Option<Self>;

    /// Numeric or text payload of a leaf.
    fn leaf_value(&self) -> Result<Option<LeafData>>;

    /// A leaf holding a single unit string.
    fn leaf_units(&self) -> Option<String>;

    fn contains(&self, key: &str) -> bool {
        self.keys().iter().any(|k| k == key)
    }

    /// Walk down `path` from this node.
    fn descend<S: AsRef<str>>(&self, path: &[S]) -> Option<Self>
    where
        Self: Clone,
    {
        let mut node = self.clone();
        for segment in path {
            node = node.get(segment.as_ref())?;
        }
        Some(node)
    }
}

/// Value and unit string read for one field.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldPayload {
    pub data: LeafData,
    pub units: Option<String>,
}

/// Read a field node: either a group carrying `value`/`values` plus
/// `units`, or a bare leaf without units.
pub fn read_field<N: TreeNode>(node: &N, value_keys: &[String]) -> Result<Option<FieldPayload>> {
    if !node.has_keys() {
        return Ok(node.leaf_value()?.map(|data| FieldPayload { data, units: None }));
    }
    let Some(value_node) = value_keys.iter().find_map(|k| node.get(k)) else {
        return Ok(None);
    };
    let Some(data) = value_node.leaf_value()? else {
        return Ok(None);
    };
    let units = node.get("units").and_then(|u| u.leaf_units());
    Ok(Some(FieldPayload { data, units }))
}

// ============================================================================
// Source
// ============================================================================

/// An opened sweep file.
#[derive(Debug)]
pub enum Source {
    Json(serde_json::Value),

    #[cfg(feature = "hdf5")]
    Hdf5(::hdf5::File),
}

impl Source {
    /// Open by extension: `.json`, or `.h5`/`.hdf5` with the `hdf5` feature.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let ext = path.extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase)
            .unwrap_or_default();
        tracing::info!(path = %path.display(), "opening sweep file");
        match ext.as_str() {
            "json" => {
                let text = std::fs::read_to_string(path)?;
                Ok(Source::Json(serde_json::from_str(&text)?))
            }
            "h5" | "hdf5" => Self::open_hdf5(path),
            other => Err(Error::UnsupportedFormat(format!(
                "'{}' (extension '{other}'); expected .json or .h5",
                path.display()
            ))),
        }
    }

    #[cfg(feature = "hdf5")]
    fn open_hdf5(path: &Path) -> Result<Self> {
        let file = ::hdf5::File::open(path)
            .map_err(|e| Error::Format(format!("{}: {e}", path.display())))?;
        Ok(Source::Hdf5(file))
    }

    #[cfg(not(feature = "hdf5"))]
    fn open_hdf5(path: &Path) -> Result<Self> {
        Err(Error::UnsupportedFormat(format!(
            "'{}' is an HDF5 file; rebuild with the `hdf5` feature",
            path.display()
        )))
    }

    pub fn format_name(&self) -> &'static str {
        match self {
            Source::Json(_) => "json",
            #[cfg(feature = "hdf5")]
            Source::Hdf5(_) => "hdf5",
        }
    }
}

/// Run `$body` with `$node` bound to the root node of `$source`, whatever
/// its format.
macro_rules! with_root {
    ($source:expr, |$node:ident| $body:expr) => {
        match $source {
            $crate::source::Source::Json(value) => {
                let $node = $crate::source::JsonNode::new(value);
                $body
            }
            #[cfg(feature = "hdf5")]
            $crate::source::Source::Hdf5(file) => {
                let $node = $crate::source::Hdf5Node::root(file)?;
                $body
            }
        }
    };
}
pub(crate) use with_root;
