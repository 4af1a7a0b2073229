//! # Directory Discovery
//!
//! Walks a sweep file to find run directories, indexes the fields each one
//! holds, and derives the unique axis tokens that become the directory
//! component of every store key.
//!
//! ```text
//! root ─┬─ ro_analysis/erd_type/pressure_exchanger/membrane_cost/outputs/...
//!       └─ ro_analysis/erd_type/pump_as_turbine/membrane_cost/outputs/...
//!                                   ↓
//!   [erd_type=pressure_exchanger, membrane_cost]
//!   [erd_type=pump_as_turbine,    membrane_cost]
//! ```

pub mod resolver;

use std::collections::{BTreeMap, BTreeSet};

use hashbrown::HashMap;

use crate::config::ImportConfig;
use crate::model::{AxisToken, DirectoryKey, Segment};
use crate::source::TreeNode;
use crate::Warning;

pub use resolver::{FieldResolver, Resolution};

// ============================================================================
// Index types
// ============================================================================

/// Fields of one data group inside a run directory.
///
/// `name` is `None` for fields stored directly in the directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataGroupIndex {
    pub name: Option<String>,
    pub fields: Vec<String>,
}

impl DataGroupIndex {
    pub fn contains(&self, field: &str) -> bool {
        self.fields.iter().any(|f| f == field)
    }
}

/// One discovered run directory.
#[derive(Debug, Clone, PartialEq)]
pub struct RunDirectory {
    /// Segments from the file root.
    pub path: Vec<String>,
    /// Unique axis tokens distinguishing this directory from its siblings.
    pub key: DirectoryKey,
    pub groups: Vec<DataGroupIndex>,
}

impl RunDirectory {
    pub fn path_string(&self) -> String {
        self.path.join("/")
    }

    pub fn group(&self, name: Option<&str>) -> Option<&DataGroupIndex> {
        self.groups.iter().find(|g| g.name.as_deref() == name)
    }

    pub fn field_count(&self) -> usize {
        self.groups.iter().map(|g| g.fields.len()).sum()
    }

    /// Whether any of `terms` appears in the path or the axis key.
    pub fn matches_any(&self, terms: &[String]) -> bool {
        let path = self.path_string();
        terms.iter().any(|t| path.contains(t.as_str()) || self.key.contains_term(t))
    }
}

/// Everything discovery learned about a sweep file.
#[derive(Debug, Clone, Default)]
pub struct DirectoryIndex {
    pub directories: Vec<RunDirectory>,
    /// Data-group precedence: order of first appearance across the file.
    pub group_order: Vec<Option<String>>,
    /// Every field name seen in any directory.
    pub unique_data_keys: BTreeSet<String>,
    pub warnings: Vec<Warning>,
}

impl DirectoryIndex {
    pub fn len(&self) -> usize {
        self.directories.len()
    }

    pub fn is_empty(&self) -> bool {
        self.directories.is_empty()
    }

    pub fn find(&self, key: &DirectoryKey) -> Option<&RunDirectory> {
        self.directories.iter().find(|d| &d.key == key)
    }

    /// Log the discovered directories and field names.
    pub fn display(&self) {
        tracing::info!("--- loaded directories ---");
        for dir in &self.directories {
            tracing::info!(path = %dir.path_string(), key = %dir.key, fields = dir.field_count(), "directory");
        }
        tracing::info!("--- available fields across all directories ---");
        for key in &self.unique_data_keys {
            tracing::info!(field = %key, "data key");
        }
    }
}

// ============================================================================
// Discoverer
// ============================================================================

/// Finds run directories in a tree according to an [`ImportConfig`].
pub struct Discoverer<'c> {
    config: &'c ImportConfig,
}

impl<'c> Discoverer<'c> {
    pub fn new(config: &'c ImportConfig) -> Self {
        Self { config }
    }

    pub fn discover<N: TreeNode + Clone>(&self, root: &N) -> DirectoryIndex {
        let mut found = Vec::new();
        self.walk(root, &mut Vec::new(), &mut found);
        tracing::debug!(count = found.len(), "candidate run directories");

        let mut index = DirectoryIndex::default();
        for path in found {
            let Some(node) = root.descend(&path) else { continue };
            let groups = self.directory_contents(&node, &mut index);
            if groups.iter().all(|g| g.fields.is_empty()) {
                let warning = Warning::SchemaDiscovery { directory: path.join("/") };
                tracing::warn!("{warning}");
                index.warnings.push(warning);
                continue;
            }
            index.directories.push(RunDirectory { path, key: DirectoryKey::new(), groups });
        }

        let keys = unique_axes(&index.directories.iter().map(|d| d.path.clone()).collect::<Vec<_>>());
        for (dir, key) in index.directories.iter_mut().zip(keys) {
            dir.key = key;
        }

        tracing::info!(
            directories = index.directories.len(),
            groups = ?index.group_order,
            unique_keys = index.unique_data_keys.len(),
            "discovery complete"
        );
        index
    }

    fn has_any(&self, node: &impl TreeNode, names: &[String]) -> bool {
        node.has_keys() && names.iter().any(|n| node.contains(n))
    }

    fn walk<N: TreeNode>(&self, node: &N, path: &mut Vec<String>, found: &mut Vec<Vec<String>>) {
        if !node.has_keys() {
            return;
        }
        if self.has_any(node, &self.config.terminus_groups) {
            push_unique(found, path.clone());
            return;
        }
        if self.has_any(node, &self.config.data_groups) {
            let parent = path[..path.len().saturating_sub(1)].to_vec();
            push_unique(found, parent);
            return;
        }
        for key in node.keys() {
            if let Some(child) = node.get(&key) {
                path.push(key);
                self.walk(&child, path, found);
                path.pop();
            }
        }
    }

    fn directory_contents<N: TreeNode>(&self, node: &N, index: &mut DirectoryIndex) -> Vec<DataGroupIndex> {
        let terminus = self.has_any(node, &self.config.terminus_groups);
        let mut groups: Vec<DataGroupIndex> = Vec::new();
        let mut direct: Vec<String> = Vec::new();

        for key in node.keys() {
            let Some(child) = node.get(&key) else { continue };
            if child.has_keys() {
                if terminus {
                    let fields = child.keys();
                    index.unique_data_keys.extend(fields.iter().cloned());
                    push_unique(&mut index.group_order, Some(key.clone()));
                    groups.push(DataGroupIndex { name: Some(key), fields });
                } else if self.has_any(&child, &self.config.data_groups) {
                    index.unique_data_keys.insert(key.clone());
                    direct.push(key);
                }
            } else {
                index.unique_data_keys.insert(key.clone());
                direct.push(key);
            }
        }

        if !direct.is_empty() {
            push_unique(&mut index.group_order, None);
            groups.push(DataGroupIndex { name: None, fields: direct });
        }
        groups
    }
}

fn push_unique<T: PartialEq>(items: &mut Vec<T>, item: T) {
    if !items.contains(&item) {
        items.push(item);
    }
}

// ============================================================================
// Unique axes
// ============================================================================

/// Derive one directory key per path.
///
/// Paths are grouped by depth; within a depth group every column whose
/// segment differs between paths is an axis. A varying value is paired with
/// its parent segment when that parent column is fixed, or when the value is
/// numeric and the same value recurs under more than one parent (a bare
/// `1` under both `pressure` and `flow` says nothing about its axis). Paths
/// without any axis, or whose axes collide with another path's, fall back
/// to their full path.
pub fn unique_axes(paths: &[Vec<String>]) -> Vec<DirectoryKey> {
    let mut by_depth: BTreeMap<usize, Vec<usize>> = BTreeMap::new();
    for (i, p) in paths.iter().enumerate() {
        by_depth.entry(p.len()).or_default().push(i);
    }

    let mut keys: Vec<DirectoryKey> = vec![DirectoryKey::new(); paths.len()];
    for (depth, members) in &by_depth {
        let varying: Vec<bool> = (0..*depth)
            .map(|col| {
                let distinct: BTreeSet<&str> = members.iter().map(|&i| paths[i][col].as_str()).collect();
                distinct.len() > 1
            })
            .collect();
        let recurring: Vec<bool> = (0..*depth)
            .map(|col| col > 0 && varying[col] && recurs_under_parents(paths, members, col))
            .collect();

        for &i in members {
            let path = &paths[i];
            let mut key = DirectoryKey::new();
            for col in (0..*depth).filter(|c| varying[*c]) {
                let value = Segment::parse(&path[col]);
                let ambiguous = recurring[col] && value.is_numeric();
                if col > 0 && (!varying[col - 1] || ambiguous) {
                    key.push(AxisToken::Paired { parent: path[col - 1].clone(), value });
                } else {
                    key.push(AxisToken::Bare(value));
                }
            }
            keys[i] = if key.is_empty() { bare_path(path) } else { key };
        }
    }

    let mut seen: HashMap<DirectoryKey, Vec<usize>> = HashMap::new();
    for (i, key) in keys.iter().enumerate() {
        seen.entry(key.clone()).or_default().push(i);
    }
    for members in seen.values().filter(|m| m.len() > 1) {
        for &i in members {
            tracing::debug!(path = %paths[i].join("/"), "axis tokens collide, using full path");
            keys[i] = bare_path(&paths[i]);
        }
    }
    keys
}

/// Whether some value in `col` appears under two different parent segments.
fn recurs_under_parents(paths: &[Vec<String>], members: &[usize], col: usize) -> bool {
    let mut parents: HashMap<&str, &str> = HashMap::new();
    for &i in members {
        let (parent, value) = (paths[i][col - 1].as_str(), paths[i][col].as_str());
        match parents.get(value) {
            Some(seen) if *seen != parent => return true,
            Some(_) => {}
            None => {
                parents.insert(value, parent);
            }
        }
    }
    false
}

fn bare_path(path: &[String]) -> DirectoryKey {
    DirectoryKey::from_tokens(path.iter().map(|s| AxisToken::Bare(Segment::parse(s))))
}
