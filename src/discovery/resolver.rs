//! Field name resolution against a run directory's data groups.
//!
//! Field names drift between sweep runs (renamed variables, schema
//! changes). A name that is not present verbatim is matched approximately
//! with the difflib ratio, group by group in precedence order.

use crate::config::ImportConfig;

use super::RunDirectory;

/// Fields matched for one requested name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    pub keys: Vec<String>,
    /// Group the keys were found in (`None` for fields stored in the directory).
    pub group: Option<String>,
    pub exact: bool,
}

#[derive(Debug, Clone)]
pub struct FieldResolver<'a> {
    cutoff: f64,
    max_matches: usize,
    exact_only: bool,
    group_order: &'a [Option<String>],
}

impl<'a> FieldResolver<'a> {
    pub fn new(config: &ImportConfig, group_order: &'a [Option<String>]) -> Self {
        Self {
            cutoff: config.search_cutoff,
            max_matches: config.max_matches.max(1),
            exact_only: config.exact_keys,
            group_order,
        }
    }

    pub fn with_cutoff(mut self, cutoff: f64) -> Self {
        self.cutoff = cutoff;
        self
    }

    pub fn with_max_matches(mut self, n: usize) -> Self {
        self.max_matches = n.max(1);
        self
    }

    /// Resolve `name` in `directory`.
    ///
    /// A verbatim hit in any group wins. Otherwise, unless `exact`, the
    /// first group (by precedence) with an approximate match above the
    /// cutoff wins. `None` means the directory has nothing for this name.
    pub fn resolve(&self, directory: &RunDirectory, name: &str, exact: bool) -> Option<Resolution> {
        let ordered = self.ordered_groups(directory);

        for group in &ordered {
            if group.contains(name) {
                tracing::trace!(field = name, directory = %directory.key, "exact match");
                return Some(Resolution {
                    keys: vec![name.to_owned()],
                    group: group.name.clone(),
                    exact: true,
                });
            }
        }
        if exact || self.exact_only {
            return None;
        }

        for group in &ordered {
            let candidates: Vec<&str> = group.fields.iter().map(String::as_str).collect();
            let near = nearest_matches(name, &candidates, self.max_matches, self.cutoff);
            if !near.is_empty() {
                tracing::debug!(field = name, matched = ?near, directory = %directory.key, "approximate match");
                return Some(Resolution { keys: near, group: group.name.clone(), exact: false });
            }
        }
        None
    }

    fn ordered_groups<'d>(&self, directory: &'d RunDirectory) -> Vec<&'d super::DataGroupIndex> {
        let mut ordered: Vec<_> = self.group_order.iter()
            .filter_map(|name| directory.group(name.as_deref()))
            .collect();
        for group in &directory.groups {
            if !ordered.iter().any(|g| g.name == group.name) {
                ordered.push(group);
            }
        }
        ordered
    }
}

/// Up to `n` candidates with a similarity ratio of at least `cutoff`, best first.
pub fn nearest_matches(name: &str, candidates: &[&str], n: usize, cutoff: f64) -> Vec<String> {
    similar::get_close_matches(name, candidates, n, cutoff as f32)
        .into_iter()
        .map(str::to_owned)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::discovery::DataGroupIndex;
    use crate::model::DirectoryKey;

    fn directory() -> RunDirectory {
        RunDirectory {
            path: vec!["run".into()],
            key: DirectoryKey::from("run"),
            groups: vec![
                DataGroupIndex {
                    name: Some("outputs".into()),
                    fields: vec!["fs.costing.LCOW".into(), "fs.water_recovery".into()],
                },
                DataGroupIndex {
                    name: Some("sweep_params".into()),
                    fields: vec![
                        "fs.costing.reverse_osmosis.membrane_cost".into(),
                        "fs.costing.reverse_osmosis.factor_membrane_replacement".into(),
                    ],
                },
            ],
        }
    }

    fn order() -> Vec<Option<String>> {
        vec![Some("outputs".into()), Some("sweep_params".into())]
    }

    #[test]
    fn test_exact_match_ignores_cutoff() {
        let config = ImportConfig::default().with_cutoff(1.0);
        let order = order();
        let resolver = FieldResolver::new(&config, &order);
        let res = resolver.resolve(&directory(), "fs.costing.reverse_osmosis.membrane_cost", false).unwrap();
        assert!(res.exact);
        assert_eq!(res.group.as_deref(), Some("sweep_params"));
    }

    #[test]
    fn test_approximate_match() {
        let config = ImportConfig::default();
        let order = order();
        let resolver = FieldResolver::new(&config, &order);
        let res = resolver.resolve(&directory(), "reverse_osmosis.factor_membrane_replacement", false).unwrap();
        assert!(!res.exact);
        assert_eq!(res.keys, vec!["fs.costing.reverse_osmosis.factor_membrane_replacement".to_string()]);
    }

    #[test]
    fn test_exact_mode_rejects_near_names() {
        let config = ImportConfig::default();
        let order = order();
        let resolver = FieldResolver::new(&config, &order);
        assert!(resolver.resolve(&directory(), "fs.costing.LCOV", true).is_none());
        assert!(resolver.resolve(&directory(), "fs.costing.LCOV", false).is_some());
    }

    #[test]
    fn test_no_match_below_cutoff() {
        let config = ImportConfig::default();
        let order = order();
        let resolver = FieldResolver::new(&config, &order);
        assert!(resolver.resolve(&directory(), "zzz", false).is_none());
    }
}
