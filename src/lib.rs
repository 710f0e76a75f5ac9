//! cpak - dependency resolution and acquisition core
//!
//! Given a set of requested packages, this crate queries a remote resolver
//! for the transitive dependency closure, downloads and verifies the
//! package archives concurrently (with inter-process locking so parallel
//! invocations never fetch the same archive twice), unpacks them into a
//! stable on-disk storage layout, and reconciles the resolved set against
//! the requested one.
//!
//! The main entry point is [`DownloadPipeline`]: call
//! [`init`](DownloadPipeline::init) with the root project config, then
//! [`download_dependencies`](DownloadPipeline::download_dependencies) with
//! the declared dependency set.

pub mod extract;
pub mod fetch;
pub mod graph;
pub mod index;
pub mod layout;
pub mod manifest;
pub mod pipeline;
pub mod remote;
pub mod types;

pub use fetch::{FetchError, FetchOutcome, Fetcher};
pub use graph::{DependencyGraph, ProjectVersionId, ResolvedDependency};
pub use layout::StorageLayout;
pub use manifest::{ManifestError, ProjectConfig, ProjectManifest};
pub use pipeline::{ConfigId, DownloadPipeline, PackageConfig, ResponseError};
pub use remote::RemoteError;
pub use types::{Dependency, DependencyFlags, Package, PackagePath, Packages, Version};

/// Canonical project manifest file name inside every package source tree.
pub const MANIFEST_FILENAME: &str = "cpak.toml";

/// User agent sent with every remote request.
pub const USER_AGENT: &str = concat!("cpak/", env!("CARGO_PKG_VERSION"));
