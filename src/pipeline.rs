//! The response pipeline.
//!
//! [`DownloadPipeline`] drives one logical run: query the remote resolver,
//! build the dependency graph, fetch every stale node concurrently,
//! propagate flags between declared and resolved edges, reconcile the
//! user's request against the resolved set, and write the package index.

use std::collections::BTreeMap;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use reqwest::Client;
use thiserror::Error;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::fetch::{FetchError, FetchOutcome, Fetcher};
use crate::graph::{DependencyGraph, ProjectVersionId, ResolvedDependency};
use crate::index::{self, IndexError};
use crate::layout::StorageLayout;
use crate::manifest::{ManifestError, ProjectConfig};
use crate::remote::{self, RemoteError, ResolvedSet};
use crate::types::{Dependency, DependencyFlags, Package, PackagePath, Packages};

#[derive(Error, Debug)]
pub enum ResponseError {
    #[error("failed to query dependency resolver: {0}")]
    Remote(#[from] RemoteError),

    #[error("failed to fetch package: {0}")]
    Fetch(#[from] FetchError),

    #[error("failed to load package config: {0}")]
    Manifest(#[from] ManifestError),

    #[error("failed to update package index: {0}")]
    Index(#[from] IndexError),

    #[error("cannot match dependency")]
    Resolution,

    #[error("dependency '{0}' is not found")]
    MissingDependency(String),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("{0}")]
    Other(String),
}

/// Handle into the pipeline's config arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConfigId(usize);

#[derive(Debug, Default)]
struct ConfigStore {
    configs: Vec<ProjectConfig>,
}

impl ConfigStore {
    fn insert(&mut self, config: ProjectConfig) -> ConfigId {
        self.configs.push(config);
        ConfigId(self.configs.len() - 1)
    }

    fn get(&self, id: ConfigId) -> Option<&ProjectConfig> {
        self.configs.get(id.0)
    }

    fn get_mut(&mut self, id: ConfigId) -> Option<&mut ProjectConfig> {
        self.configs.get_mut(id.0)
    }
}

/// Per-package result: the config handle plus the package's resolved
/// direct edges.
#[derive(Debug, Clone)]
pub struct PackageConfig {
    pub config: ConfigId,
    pub dependencies: Packages,
}

/// The response pipeline state. One instance per logical run.
#[derive(Debug, Default)]
pub struct DownloadPipeline {
    host: String,
    data_prefix: String,
    layout: Option<StorageLayout>,
    graph: DependencyGraph,
    dep_ids: BTreeMap<Package, ProjectVersionId>,
    packages: BTreeMap<Package, PackageConfig>,
    configs: ConfigStore,
    downloads: usize,
    initialized: bool,
    executed: bool,
    deps_changed: bool,
}

impl DownloadPipeline {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install the root project config and the storage location.
    ///
    /// Idempotent: repeated calls (or calls after a completed run) are
    /// silently ignored.
    pub fn init(
        &mut self,
        config: ProjectConfig,
        host: impl Into<String>,
        root_dir: impl Into<PathBuf>,
    ) {
        if self.executed || self.initialized {
            return;
        }

        self.host = host.into();
        self.layout = Some(StorageLayout::new(root_dir));
        self.data_prefix = remote::DEFAULT_DATA_PREFIX.to_string();

        let id = self.configs.insert(config);
        self.packages.insert(
            Package::root(),
            PackageConfig {
                config: id,
                dependencies: Packages::new(),
            },
        );

        self.initialized = true;
    }

    /// Run the pipeline for the given declared dependency set.
    ///
    /// No-op when the pipeline is uninitialized, has already completed, or
    /// the set is empty. On failure the run is not latched and a retry
    /// re-executes every step; finished downloads stay on disk and are
    /// skipped by the stamp check.
    pub async fn download_dependencies(&mut self, requested: &Packages) -> Result<(), ResponseError> {
        if self.executed || !self.initialized || requested.is_empty() {
            return Ok(());
        }
        let Some(layout) = self.layout.clone() else {
            return Ok(());
        };

        let client = Client::builder()
            .tcp_nodelay(true)
            .pool_max_idle_per_host(8)
            .build()
            .map_err(RemoteError::from)?;

        info!(host = %self.host, "requesting dependency list");
        let resolved = remote::find_dependencies(&client, &self.host, requested).await?;
        self.data_prefix = resolved.data_prefix.clone();
        debug!(count = resolved.packages.len(), "received package specs");

        self.extract_dependencies(&layout, resolved)?;
        self.download_and_unpack(&client, &layout).await?;
        self.post_download()?;
        self.reconcile_root(requested)?;
        self.write_index(&layout)?;

        self.executed = true;
        Ok(())
    }

    /// Result for one package; `None` for identities outside this run.
    pub fn get(&self, pkg: &Package) -> Option<&PackageConfig> {
        self.packages.get(pkg)
    }

    /// The root project's entry (its reconciled direct dependencies).
    pub fn root(&self) -> Option<&PackageConfig> {
        self.packages.get(&Package::root())
    }

    pub fn config(&self, id: ConfigId) -> Option<&ProjectConfig> {
        self.configs.get(id)
    }

    /// All resolved packages, excluding the sentinel root.
    pub fn iter(&self) -> impl Iterator<Item = (&Package, &PackageConfig)> {
        self.packages.iter().filter(|(pkg, _)| !pkg.is_root())
    }

    /// Archives fetched during this run.
    pub fn downloads(&self) -> usize {
        self.downloads
    }

    pub fn has_downloads(&self) -> bool {
        self.downloads > 0
    }

    /// Whether downstream build configs must be regenerated: something was
    /// fetched, or reconciliation changed the root dependency set.
    pub fn rebuild_configs(&self) -> bool {
        self.has_downloads() || self.deps_changed
    }

    pub fn executed(&self) -> bool {
        self.executed
    }

    /// Build the dependency graph from the resolver response and eagerly
    /// load configs for packages already present on disk. A config that
    /// fails to load takes its directory with it, so the fetch phase
    /// re-downloads the package.
    fn extract_dependencies(
        &mut self,
        layout: &StorageLayout,
        resolved: ResolvedSet,
    ) -> Result<(), ResponseError> {
        self.graph = DependencyGraph::default();
        self.dep_ids.clear();

        for (path_str, remote_pkg) in resolved.packages {
            let path = PackagePath::parse(&path_str);
            let node = ResolvedDependency::new(
                path,
                remote_pkg.version(),
                DependencyFlags::from_bits_retain(remote_pkg.flags),
                remote_pkg.md5.clone(),
                remote_pkg.dependencies.iter().copied(),
            );
            let pkg = node.package();
            self.dep_ids.insert(pkg.clone(), remote_pkg.id);

            let dir_src = layout.dir_src(&pkg);
            if dir_src.exists() {
                match ProjectConfig::load_dir(&dir_src) {
                    Ok(config) => self.set_config(pkg, config),
                    Err(err) => {
                        warn!(
                            target_name = %node.target_name(),
                            error = %err,
                            "existing package config failed to load; scheduling re-download"
                        );
                        std::fs::remove_dir_all(&dir_src)?;
                    }
                }
            }

            self.graph.insert(remote_pkg.id, node);
        }

        Ok(())
    }

    /// Fetch every node of the graph concurrently. Workers only touch the
    /// filesystem; their outcomes are folded into the pipeline state here.
    async fn download_and_unpack(
        &mut self,
        client: &Client,
        layout: &StorageLayout,
    ) -> Result<(), ResponseError> {
        if self.graph.is_empty() {
            return Ok(());
        }

        let fetcher = Arc::new(Fetcher::new(
            client.clone(),
            self.host.clone(),
            self.data_prefix.clone(),
            layout.clone(),
        ));

        let mut set: JoinSet<Result<(ProjectVersionId, FetchOutcome), FetchError>> = JoinSet::new();
        for (id, node) in self.graph.iter() {
            let fetcher = fetcher.clone();
            let node = node.clone();
            set.spawn(async move { fetcher.fetch(&node).await.map(|outcome| (id, outcome)) });
        }

        while let Some(joined) = set.join_next().await {
            let (id, outcome) = joined.map_err(|err| ResponseError::Other(err.to_string()))??;
            let Some(pkg) = self.graph.get(id).map(ResolvedDependency::package) else {
                continue;
            };
            match outcome {
                FetchOutcome::UpToDate => {}
                FetchOutcome::Downloaded(config) => {
                    self.set_config(pkg, config);
                    self.downloads += 1;
                }
                FetchOutcome::FetchedByPeer(config) => {
                    self.set_config(pkg, config);
                }
            }
        }

        Ok(())
    }

    fn post_download(&mut self) -> Result<(), ResponseError> {
        let packages: Vec<Package> = self.packages.keys().cloned().collect();
        for pkg in packages {
            self.prepare_config(&pkg)?;
        }
        Ok(())
    }

    /// Mark a config as belonging to this run and propagate flags between
    /// the declared and resolved forms of its direct edges: the user's
    /// include-directories intent flows into the resolved edge, the
    /// resolver's version and flags flow back into the declared one.
    fn prepare_config(&mut self, pkg: &Package) -> Result<(), ResponseError> {
        let Some(config_id) = self.packages.get(pkg).map(|pc| pc.config) else {
            return Ok(());
        };

        if let Some(config) = self.configs.get_mut(config_id) {
            config.is_dependency = true;
            config.package = Some(pkg.clone());
        }

        // The sentinel root has no resolved node; its edges are settled by
        // reconciliation instead.
        let Some(&id) = self.dep_ids.get(pkg) else {
            return Ok(());
        };

        let direct: Vec<ResolvedDependency> = self
            .graph
            .direct_dependencies_of(id)
            .into_values()
            .cloned()
            .collect();

        let mut edges = Packages::new();
        if let Some(config) = self.configs.get_mut(config_id) {
            for child in direct {
                let key = child.path.to_string();
                let declared = config
                    .manifest
                    .dependencies
                    .get_mut(&key)
                    .ok_or_else(|| ResponseError::MissingDependency(key.clone()))?;

                let mut flags = child.flags;
                flags.set(
                    DependencyFlags::INCLUDE_DIRECTORIES,
                    declared.flags.contains(DependencyFlags::INCLUDE_DIRECTORIES),
                );
                declared.version = child.version.clone();
                declared.flags = flags;

                edges.insert(
                    key,
                    Dependency {
                        path: child.path.clone(),
                        version: child.version.clone(),
                        flags,
                    },
                );
            }
        }

        if let Some(pc) = self.packages.get_mut(pkg) {
            pc.dependencies.extend(edges);
        }
        Ok(())
    }

    /// Settle the root project's direct dependencies.
    ///
    /// Starts from the user's request. A resolved direct node that matches
    /// a requested path updates it in place; one that matches nothing must
    /// be a subproject of a requested root, in which case the coarse
    /// request is replaced by the finer set of children spanning it.
    fn reconcile_root(&mut self, requested: &Packages) -> Result<(), ResponseError> {
        let direct_nodes: Vec<ResolvedDependency> = self
            .graph
            .iter()
            .filter(|(_, node)| node.is_direct())
            .map(|(_, node)| node.clone())
            .collect();

        let Some(root) = self.packages.get_mut(&Package::root()) else {
            return Ok(());
        };
        root.dependencies = requested.clone();

        for dd in &direct_nodes {
            let key = dd.path.to_string();
            if let Some(entry) = root.dependencies.get_mut(&key) {
                entry.version = dd.version.clone();
                entry.flags |= dd.flags;
                continue;
            }

            let mut to_add = Packages::new();
            let mut to_remove = Vec::new();
            for declared in root.dependencies.values() {
                for child in &direct_nodes {
                    if declared.path.is_root_of(&child.path) {
                        to_add.insert(
                            child.path.to_string(),
                            Dependency {
                                path: child.path.clone(),
                                version: child.version.clone(),
                                flags: child.flags,
                            },
                        );
                        to_remove.push(declared.path.to_string());
                    }
                }
            }

            if to_add.is_empty() {
                return Err(ResponseError::Resolution);
            }
            for removed in &to_remove {
                root.dependencies.remove(removed);
            }
            root.dependencies.extend(to_add);
            self.deps_changed = true;
        }

        Ok(())
    }

    /// Merge this run's packages into the index of both storage roots.
    fn write_index(&self, layout: &StorageLayout) -> Result<(), ResponseError> {
        let mut src = index::read(layout.storage_dir_src())?;
        let mut obj = index::read(layout.storage_dir_obj())?;
        for (pkg, _) in self.iter() {
            src.insert(pkg.target_name(), layout.dir_src(pkg));
            obj.insert(pkg.target_name(), layout.dir_obj(pkg));
        }
        index::write(layout.storage_dir_src(), &src)?;
        index::write(layout.storage_dir_obj(), &obj)?;
        Ok(())
    }

    /// Attach a config to a package, creating the entry as needed. Stale
    /// configs stay in the arena until the pipeline drops.
    fn set_config(&mut self, pkg: Package, config: ProjectConfig) {
        let id = self.configs.insert(config);
        self.packages
            .entry(pkg)
            .and_modify(|pc| pc.config = id)
            .or_insert(PackageConfig {
                config: id,
                dependencies: Packages::new(),
            });
    }
}
