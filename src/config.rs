//! Import configuration and per-field registration records.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::Result;

/// How run directories are recognised and fields are matched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ImportConfig {
    /// Group names that mark a run directory.
    pub terminus_groups: Vec<String>,
    /// Group names holding values directly; their parent is the run directory.
    pub data_groups: Vec<String>,
    /// Group holding per-sample solve status, used as the feasibility mask.
    pub feasibility_group: Option<String>,
    /// Similarity cutoff for approximate field matching (0..=1).
    pub search_cutoff: f64,
    /// Maximum number of approximate matches per field.
    pub max_matches: usize,
    /// Only accept verbatim field names.
    pub exact_keys: bool,
    /// Token prepended to every imported directory key.
    pub default_return_directory: Option<String>,
}

impl Default for ImportConfig {
    fn default() -> Self {
        Self {
            terminus_groups: vec!["outputs".into()],
            data_groups: vec!["values".into(), "value".into()],
            feasibility_group: Some("solve_successful".into()),
            search_cutoff: 0.6,
            max_matches: 1,
            exact_keys: false,
            default_return_directory: None,
        }
    }
}

impl ImportConfig {
    pub fn from_json_str(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }

    pub fn with_cutoff(mut self, cutoff: f64) -> Self {
        self.search_cutoff = cutoff;
        self
    }

    pub fn with_max_matches(mut self, n: usize) -> Self {
        self.max_matches = n.max(1);
        self
    }

    pub fn exact(mut self, exact: bool) -> Self {
        self.exact_keys = exact;
        self
    }

    pub fn is_terminus(&self, name: &str) -> bool {
        self.terminus_groups.iter().any(|g| g == name)
    }

    pub fn is_data_group(&self, name: &str) -> bool {
        self.data_groups.iter().any(|g| g == name)
    }
}

/// A field expected in the sweep file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldSpec {
    /// Name (possibly approximate) as stored in the source file.
    pub source_key: String,
    /// Name used in the store.
    pub return_key: String,
    /// Convert to these units after import.
    #[serde(default)]
    pub units: Option<String>,
    /// Reinterpret the imported magnitude as these units.
    #[serde(default)]
    pub assign_units: Option<String>,
    #[serde(default = "default_factor")]
    pub conversion_factor: f64,
    /// Only import from directories whose key contains one of these terms.
    #[serde(default)]
    pub directories: Vec<String>,
}

fn default_factor() -> f64 {
    1.0
}

impl FieldSpec {
    pub fn new(source_key: impl Into<String>, return_key: impl Into<String>) -> Self {
        Self {
            source_key: source_key.into(),
            return_key: return_key.into(),
            units: None,
            assign_units: None,
            conversion_factor: 1.0,
            directories: Vec::new(),
        }
    }

    pub fn units(mut self, units: impl Into<String>) -> Self {
        self.units = Some(units.into());
        self
    }

    pub fn assign_units(mut self, units: impl Into<String>, factor: f64) -> Self {
        self.assign_units = Some(units.into());
        self.conversion_factor = factor;
        self
    }

    pub fn in_directories<I, S>(mut self, terms: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.directories = terms.into_iter().map(Into::into).collect();
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cfg = ImportConfig::default();
        assert!(cfg.is_terminus("outputs"));
        assert!(cfg.is_data_group("value"));
        assert_eq!(cfg.search_cutoff, 0.6);
        assert_eq!(cfg.max_matches, 1);
    }

    #[test]
    fn test_partial_json_keeps_defaults() {
        let cfg = ImportConfig::from_json_str(r#"{"max_matches": 3, "exact_keys": true}"#).unwrap();
        assert_eq!(cfg.max_matches, 3);
        assert!(cfg.exact_keys);
        assert_eq!(cfg.terminus_groups, vec!["outputs".to_string()]);
    }

    #[test]
    fn test_field_spec_json() {
        let spec: FieldSpec = serde_json::from_str(
            r#"{"source_key": "fs.costing.LCOW", "return_key": "LCOW", "units": "USD/m**3"}"#,
        ).unwrap();
        assert_eq!(spec.conversion_factor, 1.0);
        assert_eq!(spec.units.as_deref(), Some("USD/m**3"));
        assert!(spec.directories.is_empty());
    }
}
