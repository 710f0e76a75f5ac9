use std::fmt;
use std::path::PathBuf;

/// A hierarchical, dot-separated package identifier.
///
/// Paths address packages inside a namespace tree (e.g. `org.foo.bar`).
/// Each component becomes one directory level on disk and one URL segment
/// when composing archive locations. Comparisons are case-sensitive.
///
/// # Example
///
/// ```
/// use cpak::types::PackagePath;
///
/// let path = PackagePath::parse("org.foo.bar");
/// assert_eq!(path.to_string(), "org.foo.bar");
/// assert_eq!(path.to_url_path(), "org/foo/bar");
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PackagePath {
    components: Vec<String>,
}

impl PackagePath {
    /// Parse a dotted path. The empty string parses to the empty path.
    pub fn parse(input: &str) -> Self {
        if input.is_empty() {
            return Self::default();
        }
        Self {
            components: input.split('.').map(str::to_string).collect(),
        }
    }

    /// The empty path, used by the sentinel root package.
    pub fn is_empty(&self) -> bool {
        self.components.is_empty()
    }

    pub fn components(&self) -> &[String] {
        &self.components
    }

    /// Relative filesystem form: one directory level per component.
    pub fn to_fs_subpath(&self) -> PathBuf {
        self.components.iter().collect()
    }

    /// URL form: components joined with `/` regardless of host OS.
    pub fn to_url_path(&self) -> String {
        self.components.join("/")
    }

    /// The prefix-with-boundary relation on hierarchical paths.
    ///
    /// `a.is_root_of(b)` holds when `b` equals `a` or `b` starts with `a`
    /// at a component boundary, so `org.foo` is a root of `org.foo.bar`
    /// but not of `org.foobar`.
    pub fn is_root_of(&self, other: &PackagePath) -> bool {
        other.components.len() >= self.components.len()
            && other.components[..self.components.len()] == self.components[..]
    }
}

impl fmt::Display for PackagePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.components.join("."))
    }
}

impl From<&str> for PackagePath {
    fn from(s: &str) -> Self {
        Self::parse(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_and_display() {
        let path = PackagePath::parse("org.foo.bar");
        assert_eq!(path.components().len(), 3);
        assert_eq!(path.to_string(), "org.foo.bar");
    }

    #[test]
    fn empty_path() {
        let path = PackagePath::parse("");
        assert!(path.is_empty());
        assert_eq!(path.to_string(), "");
    }

    #[test]
    fn filesystem_and_url_forms() {
        let path = PackagePath::parse("org.foo.bar");
        assert_eq!(path.to_fs_subpath(), PathBuf::from("org/foo/bar"));
        assert_eq!(path.to_url_path(), "org/foo/bar");
    }

    #[test]
    fn is_root_of_equal_paths() {
        let a = PackagePath::parse("org.foo");
        assert!(a.is_root_of(&a));
    }

    #[test]
    fn is_root_of_child() {
        let a = PackagePath::parse("org.foo");
        let b = PackagePath::parse("org.foo.bar");
        assert!(a.is_root_of(&b));
        assert!(!b.is_root_of(&a));
    }

    #[test]
    fn is_root_of_disjoint() {
        let a = PackagePath::parse("org.foo");
        let b = PackagePath::parse("org.baz");
        assert!(!a.is_root_of(&b));
    }

    #[test]
    fn is_root_of_requires_component_boundary() {
        let a = PackagePath::parse("foo");
        let b = PackagePath::parse("foobar");
        assert!(!a.is_root_of(&b));
    }

    #[test]
    fn comparisons_are_case_sensitive() {
        assert_ne!(PackagePath::parse("Org.Foo"), PackagePath::parse("org.foo"));
    }
}
