pub mod flags;
pub mod package;
pub mod path;

pub use flags::DependencyFlags;
pub use package::{Dependency, Package, Packages, Version};
pub use path::PackagePath;
