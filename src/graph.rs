//! The resolved dependency graph.
//!
//! Nodes are stored in an id-keyed arena; each node records the ids of its
//! direct dependencies and the graph materializes the edge map on demand.

use std::collections::{BTreeMap, BTreeSet};

use crate::types::{DependencyFlags, Package, PackagePath, Version};

/// Node id assigned by the remote resolver.
pub type ProjectVersionId = u64;

/// One resolved node: identity, flags, archive digest, and the ids of its
/// direct dependencies.
#[derive(Debug, Clone)]
pub struct ResolvedDependency {
    pub path: PackagePath,
    pub version: Version,
    pub flags: DependencyFlags,
    pub md5: String,
    dependency_ids: BTreeSet<ProjectVersionId>,
}

impl ResolvedDependency {
    pub fn new(
        path: PackagePath,
        version: Version,
        flags: DependencyFlags,
        md5: String,
        dependency_ids: impl IntoIterator<Item = ProjectVersionId>,
    ) -> Self {
        Self {
            path,
            version,
            flags,
            md5,
            dependency_ids: dependency_ids.into_iter().collect(),
        }
    }

    pub fn package(&self) -> Package {
        Package::new(self.path.clone(), self.version.clone())
    }

    pub fn target_name(&self) -> String {
        self.package().target_name()
    }

    pub fn dependency_ids(&self) -> impl Iterator<Item = ProjectVersionId> + '_ {
        self.dependency_ids.iter().copied()
    }

    pub fn is_direct(&self) -> bool {
        self.flags.contains(DependencyFlags::DIRECT_DEPENDENCY)
    }
}

/// The id-keyed arena of resolved nodes.
#[derive(Debug, Clone, Default)]
pub struct DependencyGraph {
    nodes: BTreeMap<ProjectVersionId, ResolvedDependency>,
}

impl DependencyGraph {
    pub fn insert(&mut self, id: ProjectVersionId, node: ResolvedDependency) {
        self.nodes.insert(id, node);
    }

    pub fn get(&self, id: ProjectVersionId) -> Option<&ResolvedDependency> {
        self.nodes.get(&id)
    }

    pub fn iter(&self) -> impl Iterator<Item = (ProjectVersionId, &ResolvedDependency)> {
        self.nodes.iter().map(|(id, node)| (*id, node))
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Materialize the direct-edge map of one node. Ids that resolve to no
    /// node are skipped; the server controls both sides of the table.
    pub fn direct_dependencies_of(
        &self,
        id: ProjectVersionId,
    ) -> BTreeMap<ProjectVersionId, &ResolvedDependency> {
        let Some(node) = self.nodes.get(&id) else {
            return BTreeMap::new();
        };
        node.dependency_ids()
            .filter_map(|dep_id| self.nodes.get(&dep_id).map(|dep| (dep_id, dep)))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(path: &str, version: &str, deps: &[ProjectVersionId]) -> ResolvedDependency {
        ResolvedDependency::new(
            PackagePath::parse(path),
            Version::new(version),
            DependencyFlags::empty(),
            "d41d8cd98f00b204e9800998ecf8427e".to_string(),
            deps.iter().copied(),
        )
    }

    #[test]
    fn direct_dependencies_materialize_only_direct_edges() {
        let mut graph = DependencyGraph::default();
        graph.insert(1, node("org.foo", "1", &[2]));
        graph.insert(2, node("org.bar", "2", &[3]));
        graph.insert(3, node("org.baz", "3", &[]));

        let direct = graph.direct_dependencies_of(1);
        assert_eq!(direct.len(), 1);
        assert_eq!(direct[&2].path, PackagePath::parse("org.bar"));
    }

    #[test]
    fn unknown_node_has_no_edges() {
        let graph = DependencyGraph::default();
        assert!(graph.direct_dependencies_of(42).is_empty());
    }
}
