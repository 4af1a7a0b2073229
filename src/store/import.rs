//! Bulk import of registered fields from a source tree.
//!
//! Import is read-only against the tree and the index: every directory is
//! processed through an explicit [`RunDirectory`] handle and the results are
//! collected into an [`ImportBatch`] before they touch the store.

use crate::config::{FieldSpec, ImportConfig};
use crate::discovery::{DirectoryIndex, FieldResolver, RunDirectory};
use crate::model::units::normalize_unit_str;
use crate::model::{AxisToken, DataValue, DirectoryKey, FieldKey, Segment, SourceKind, parse_key_index};
use crate::source::{LeafData, TreeNode, read_field};
use crate::{Result, Warning};

use super::DataManager;

/// Values and warnings produced by one import pass.
#[derive(Debug, Default)]
pub(crate) struct ImportBatch {
    pub values: Vec<(DirectoryKey, FieldKey, DataValue)>,
    pub warnings: Vec<Warning>,
}

/// A field to import and whether its name must match verbatim.
#[derive(Debug, Clone)]
pub(crate) struct ImportPlan {
    pub spec: FieldSpec,
    pub exact: bool,
}

pub(crate) fn collect_imports<N: TreeNode + Clone>(
    root: &N,
    index: &DirectoryIndex,
    config: &ImportConfig,
    plans: &[ImportPlan],
) -> Result<ImportBatch> {
    let resolver = FieldResolver::new(config, &index.group_order);
    let mut batch = ImportBatch::default();

    for run in &index.directories {
        let Some(node) = root.descend(&run.path) else {
            tracing::debug!(path = %run.path_string(), "run directory vanished from source");
            continue;
        };
        let feasible = read_feasibility(&node, config)?;

        for plan in plans {
            let spec = &plan.spec;
            if !spec.directories.is_empty() && !run.matches_any(&spec.directories) {
                continue;
            }
            let Some(resolution) = resolver.resolve(run, &spec.source_key, plan.exact) else {
                tracing::trace!(field = %spec.source_key, directory = %run.key, "no match");
                continue;
            };
            let multiple = resolution.keys.len() > 1;

            for (ordinal, source_name) in resolution.keys.iter().enumerate() {
                let mut path: Vec<&str> = Vec::new();
                if let Some(group) = &resolution.group {
                    path.push(group);
                }
                path.push(source_name);
                let Some(field_node) = node.descend(&path) else { continue };

                let value = match read_value(&field_node, source_name, spec, config, run) {
                    Ok(Some(value)) => value,
                    Ok(None) => continue,
                    Err(Skip(reason)) => {
                        batch.warnings.push(Warning::EmptyField {
                            field: source_name.clone(),
                            directory: run.key.to_string(),
                            reason,
                        });
                        continue;
                    }
                };

                let key_index = parse_key_index(source_name);
                let field_key = if multiple {
                    let suffix = key_index.as_ref()
                        .map(|labels| labels.iter().map(Segment::to_string).collect::<Vec<_>>().join(","))
                        .unwrap_or_else(|| ordinal.to_string());
                    FieldKey::Tuple(vec![spec.return_key.clone(), suffix])
                } else {
                    FieldKey::from(spec.return_key.as_str())
                };

                let mut value = value
                    .with_key_index(key_index)
                    .with_data_group(resolution.group.clone())
                    .with_data_label(field_key.to_string());
                if let Some(mask) = feasible.as_ref().filter(|m| m.len() == value.sample_count()) {
                    value = value.with_feasibility(mask.clone())?;
                }
                if let Some(units) = &spec.assign_units {
                    value.assign_units(units, spec.conversion_factor);
                }
                if let Some(units) = &spec.units {
                    value.convert_to(units)?;
                }

                let directory = match &config.default_return_directory {
                    Some(prefix) => run.key.prefixed(AxisToken::Bare(Segment::Text(prefix.clone()))),
                    None => run.key.clone(),
                };
                batch.values.push((directory, field_key, value));
            }
        }
    }
    Ok(batch)
}

/// Reason a matched field was not imported.
struct Skip(String);

fn read_value<N: TreeNode>(
    node: &N,
    source_name: &str,
    spec: &FieldSpec,
    config: &ImportConfig,
    run: &RunDirectory,
) -> std::result::Result<Option<DataValue>, Skip> {
    let payload = match read_field(node, &config.data_groups) {
        Ok(Some(payload)) => payload,
        Ok(None) => return Ok(None),
        Err(e) => return Err(Skip(e.to_string())),
    };
    if payload.data.is_empty() {
        return Err(Skip("empty array".into()));
    }
    let units = payload.units.as_deref();
    match payload.data {
        LeafData::Numbers(array) => Ok(Some(DataValue::new(source_name, SourceKind::Imported, array, units))),
        LeafData::Text(text) => {
            if normalize_unit_str(units).iso_time {
                return DataValue::from_iso_timestamps(source_name, SourceKind::Imported, &text)
                    .map(Some)
                    .map_err(|e| Skip(e.to_string()));
            }
            let numbers: Option<Vec<f64>> = text.iter().map(|t| t.trim().parse::<f64>().ok()).collect();
            match numbers {
                Some(values) => Ok(Some(DataValue::from_vec(source_name, SourceKind::Imported, values, units))),
                None => {
                    tracing::debug!(field = %spec.return_key, directory = %run.key, "non-numeric leaf");
                    Err(Skip("non-numeric values".into()))
                }
            }
        }
    }
}

fn read_feasibility<N: TreeNode + Clone>(node: &N, config: &ImportConfig) -> Result<Option<Vec<bool>>> {
    let Some(group) = &config.feasibility_group else { return Ok(None) };
    let Some(leaf) = node.descend(&[group.as_str(), group.as_str()]) else { return Ok(None) };
    Ok(read_field(&leaf, &config.data_groups)?.and_then(|p| p.data.to_bools()))
}

impl DataManager {
    /// Import registered fields from the opened source, or every field
    /// verbatim when nothing is registered.
    pub fn import(&mut self) -> Result<()> {
        let Some(source) = &self.source else {
            tracing::debug!("no source opened, nothing to import");
            return Ok(());
        };
        let plans: Vec<ImportPlan> = if self.fields.is_empty() {
            self.index.unique_data_keys.iter()
                .map(|k| ImportPlan { spec: FieldSpec::new(k.as_str(), k.as_str()), exact: true })
                .collect()
        } else {
            self.fields.iter()
                .map(|spec| ImportPlan { spec: spec.clone(), exact: self.config.exact_keys })
                .collect()
        };

        let batch = crate::source::with_root!(source, |root| {
            collect_imports(&root, &self.index, &self.config, &plans)?
        });

        for warning in batch.warnings {
            self.warn(warning);
        }
        let count = batch.values.len();
        for (directory, field, value) in batch.values {
            self.add(directory, field, value);
        }
        tracing::info!(values = count, directories = self.index.len(), "import complete");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::discovery::Discoverer;
    use crate::source::JsonNode;
    use serde_json::json;

    fn doc() -> serde_json::Value {
        json!({
            "sweep": {
                "run_1": {
                    "outputs": {
                        "fs.costing.LCOW": {"value": [0.5, 0.6], "units": "USD/m**3"},
                        "fs.flow[0.0,Liq]": {"value": [1.0, 2.0], "units": "kg/s"},
                        "fs.flow[0.0,Vap]": {"value": [3.0, 4.0], "units": "kg/s"},
                        "fs.label": {"value": ["a", "b"], "units": "dimensionless"},
                        "fs.empty": {"value": [], "units": "m"},
                    },
                    "solve_successful": {"solve_successful": [true, false]},
                },
                "run_2": {
                    "outputs": {
                        "fs.costing.LCOW": {"value": [0.7, 0.8], "units": "USD/m**3"},
                    },
                    "solve_successful": {"solve_successful": [true, true]},
                },
            }
        })
    }

    fn import(doc: &serde_json::Value, config: &ImportConfig, specs: &[FieldSpec]) -> ImportBatch {
        let root = JsonNode::new(doc);
        let index = Discoverer::new(config).discover(&root);
        let plans: Vec<ImportPlan> = specs.iter()
            .map(|s| ImportPlan { spec: s.clone(), exact: false })
            .collect();
        collect_imports(&root, &index, config, &plans).unwrap()
    }

    #[test]
    fn test_import_attaches_feasibility_and_units() {
        let doc = doc();
        let config = ImportConfig::default();
        let batch = import(&doc, &config, &[FieldSpec::new("fs.costing.LCOW", "LCOW").units("USD/L")]);
        assert_eq!(batch.values.len(), 2);
        let (dir, field, value) = &batch.values[0];
        assert_eq!(dir.to_string(), "sweep=run_1");
        assert_eq!(field, &FieldKey::from("LCOW"));
        assert_eq!(value.feasible(), Some(&[true, false][..]));
        assert!((value.to_vec()[0] - 0.0005).abs() < 1e-12);
        assert_eq!(value.data_group(), Some("outputs"));
    }

    #[test]
    fn test_multiple_matches_become_tuple_keys() {
        let doc = doc();
        let config = ImportConfig::default().with_max_matches(2).with_cutoff(0.8);
        let batch = import(&doc, &config, &[FieldSpec::new("fs.flow[0.0,Li]", "flow")]);
        let fields: Vec<String> = batch.values.iter().map(|(_, f, _)| f.to_string()).collect();
        assert_eq!(fields, vec!["(flow, 0.0,Liq)".to_string(), "(flow, 0.0,Vap)".to_string()]);
        assert_eq!(
            batch.values[0].2.key_index(),
            Some(&[Segment::Float(0.0), Segment::Text("Liq".into())][..])
        );
    }

    #[test]
    fn test_empty_and_text_leaves_warn() {
        let doc = doc();
        let config = ImportConfig::default();
        let batch = import(
            &doc,
            &config,
            &[FieldSpec::new("fs.empty", "empty"), FieldSpec::new("fs.label", "label")],
        );
        assert!(batch.values.is_empty());
        assert_eq!(batch.warnings.len(), 2);
        assert!(matches!(&batch.warnings[0], Warning::EmptyField { reason, .. } if reason == "empty array"));
    }

    #[test]
    fn test_directory_filter_and_prefix() {
        let doc = doc();
        let mut config = ImportConfig::default();
        config.default_return_directory = Some("base".into());
        let batch = import(
            &doc,
            &config,
            &[FieldSpec::new("fs.costing.LCOW", "LCOW").in_directories(["run_2"])],
        );
        assert_eq!(batch.values.len(), 1);
        assert_eq!(batch.values[0].0.to_string(), "base/sweep=run_2");
    }
}
