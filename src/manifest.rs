//! Project manifest (`cpak.toml`) loading.
//!
//! Every package source tree may carry a manifest declaring its direct
//! dependencies and unpack options. The pipeline loads one per package and
//! one for the user's own project.

use std::collections::BTreeMap;
use std::io;
use std::path::Path;

use serde::Deserialize;
use thiserror::Error;

use crate::types::{Dependency, DependencyFlags, Package, PackagePath, Packages, Version};
use crate::MANIFEST_FILENAME;

#[derive(Error, Debug)]
pub enum ManifestError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("manifest parse error: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Parsed contents of a package's `cpak.toml`.
#[derive(Debug, Clone, Default)]
pub struct ProjectManifest {
    pub name: Option<String>,
    pub version: Option<Version>,
    /// If set, every unpacked file is moved below this subdirectory.
    pub unpack_directory: Option<String>,
    /// Direct dependencies as declared by the project author.
    pub dependencies: Packages,
}

impl ProjectManifest {
    pub fn parse(input: &str) -> Result<Self, ManifestError> {
        let raw: RawManifest = toml::from_str(input)?;
        let mut dependencies = Packages::new();
        for (key, dep) in raw.dependencies {
            let (version, include_directories) = match dep {
                RawDependency::Version(v) => (v, false),
                RawDependency::Detailed {
                    version,
                    include_directories,
                } => (version, include_directories),
            };
            let mut flags = DependencyFlags::empty();
            flags.set(DependencyFlags::INCLUDE_DIRECTORIES, include_directories);
            dependencies.insert(
                key.clone(),
                Dependency {
                    path: PackagePath::parse(&key),
                    version: Version::from(version),
                    flags,
                },
            );
        }
        Ok(Self {
            name: raw.project.name,
            version: raw.project.version.map(Version::from),
            unpack_directory: raw.project.unpack_directory,
            dependencies,
        })
    }

    /// Load the manifest from a package source directory.
    ///
    /// A tree without a manifest file is a valid leaf package and loads as
    /// the empty manifest; a malformed file is an error.
    pub fn load_dir(dir: &Path) -> Result<Self, ManifestError> {
        let path = dir.join(MANIFEST_FILENAME);
        match std::fs::read_to_string(&path) {
            Ok(content) => Self::parse(&content),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(Self::default()),
            Err(err) => Err(err.into()),
        }
    }
}

/// A project configuration: the manifest plus the state the pipeline
/// attaches to it while preparing the dependency graph.
#[derive(Debug, Clone, Default)]
pub struct ProjectConfig {
    pub manifest: ProjectManifest,
    /// Identity recorded once the pipeline knows which package this config
    /// belongs to.
    pub package: Option<Package>,
    pub is_dependency: bool,
    /// Set when this config was (re)created by an archive fetch during the
    /// current run.
    pub downloaded: bool,
}

impl ProjectConfig {
    pub fn new(manifest: ProjectManifest) -> Self {
        Self {
            manifest,
            ..Self::default()
        }
    }

    pub fn load_dir(dir: &Path) -> Result<Self, ManifestError> {
        Ok(Self::new(ProjectManifest::load_dir(dir)?))
    }
}

#[derive(Debug, Default, Deserialize)]
struct RawManifest {
    #[serde(default)]
    project: RawProject,
    #[serde(default)]
    dependencies: BTreeMap<String, RawDependency>,
}

#[derive(Debug, Default, Deserialize)]
struct RawProject {
    name: Option<String>,
    version: Option<String>,
    unpack_directory: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawDependency {
    Version(String),
    Detailed {
        #[serde(default)]
        version: String,
        #[serde(default)]
        include_directories: bool,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn parse_full_manifest() {
        let content = r#"
[project]
name = "org.foo"
version = "1.0.0"
unpack_directory = "src"

[dependencies]
"org.bar" = "2"
"org.baz" = { version = "3", include_directories = true }
"#;

        let manifest = ProjectManifest::parse(content).expect("manifest should parse");
        assert_eq!(manifest.name.as_deref(), Some("org.foo"));
        assert_eq!(manifest.unpack_directory.as_deref(), Some("src"));
        assert_eq!(manifest.dependencies.len(), 2);

        let bar = &manifest.dependencies["org.bar"];
        assert_eq!(bar.version, "2");
        assert!(!bar.flags.contains(DependencyFlags::INCLUDE_DIRECTORIES));

        let baz = &manifest.dependencies["org.baz"];
        assert_eq!(baz.path, PackagePath::parse("org.baz"));
        assert!(baz.flags.contains(DependencyFlags::INCLUDE_DIRECTORIES));
    }

    #[test]
    fn missing_file_loads_as_empty_manifest() {
        let dir = tempdir().unwrap();
        let manifest = ProjectManifest::load_dir(dir.path()).unwrap();
        assert!(manifest.dependencies.is_empty());
        assert!(manifest.unpack_directory.is_none());
    }

    #[test]
    fn malformed_file_is_an_error() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join(MANIFEST_FILENAME), "[project\nname=").unwrap();
        assert!(matches!(
            ProjectManifest::load_dir(dir.path()),
            Err(ManifestError::Parse(_))
        ));
    }
}
