//! On-disk storage layout.
//!
//! Maps package identities to their source directory, object directory,
//! stamp file and archive location. The mapping is a pure function of the
//! identity, so the same package lands in the same place across runs and
//! across processes.

use std::path::{Path, PathBuf};

use crate::index::INDEX_FILENAME;
use crate::types::Package;

/// The two storage roots a pipeline works against.
///
/// ```text
/// <root>/src/<path-as-subdir>/<version>/        unpacked source tree
/// <root>/src/<path-as-subdir>/<version>.md5     stamp (and lock target)
/// <root>/src/<path-as-subdir>/<version>.tar.gz  archive, transient
/// <root>/obj/<path-as-subdir>/<version>/        build output
/// <root>/{src,obj}/packages.idx                 package index
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageLayout {
    storage_dir_src: PathBuf,
    storage_dir_obj: PathBuf,
}

impl StorageLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        Self {
            storage_dir_src: root.join("src"),
            storage_dir_obj: root.join("obj"),
        }
    }

    pub fn storage_dir_src(&self) -> &Path {
        &self.storage_dir_src
    }

    pub fn storage_dir_obj(&self) -> &Path {
        &self.storage_dir_obj
    }

    /// Unpacked source tree of a package.
    pub fn dir_src(&self, pkg: &Package) -> PathBuf {
        self.storage_dir_src
            .join(pkg.path.to_fs_subpath())
            .join(pkg.version.as_str())
    }

    /// Build output directory of a package.
    pub fn dir_obj(&self, pkg: &Package) -> PathBuf {
        self.storage_dir_obj
            .join(pkg.path.to_fs_subpath())
            .join(pkg.version.as_str())
    }

    /// Stamp file holding the md5 of the installed archive; sibling of the
    /// source directory and the advisory-lock target during fetches.
    pub fn stamp_path(&self, pkg: &Package) -> PathBuf {
        self.storage_dir_src
            .join(pkg.path.to_fs_subpath())
            .join(format!("{}.md5", pkg.version))
    }

    /// Transient download location of a package archive.
    pub fn archive_path(&self, pkg: &Package) -> PathBuf {
        self.storage_dir_src
            .join(pkg.path.to_fs_subpath())
            .join(format!("{}.tar.gz", pkg.version))
    }

    pub fn index_path_src(&self) -> PathBuf {
        self.storage_dir_src.join(INDEX_FILENAME)
    }

    pub fn index_path_obj(&self) -> PathBuf {
        self.storage_dir_obj.join(INDEX_FILENAME)
    }
}
