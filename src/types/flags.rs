use bitflags::bitflags;

bitflags! {
    /// Per-edge dependency flags carried through the resolver protocol.
    ///
    /// Only the named bits are interpreted by this crate; any other bits
    /// the server sets are preserved verbatim and handed back unchanged.
    #[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
    pub struct DependencyFlags: u64 {
        /// The node is requested directly by its parent project rather
        /// than implied transitively.
        const DIRECT_DEPENDENCY = 1 << 0;
        /// Export the dependency's include directories to the dependent.
        const INCLUDE_DIRECTORIES = 1 << 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn named_bits() {
        assert_eq!(DependencyFlags::DIRECT_DEPENDENCY.bits(), 1);
        assert_eq!(DependencyFlags::INCLUDE_DIRECTORIES.bits(), 2);
    }

    #[test]
    fn unknown_bits_pass_through() {
        let flags = DependencyFlags::from_bits_retain(1 << 40 | 1);
        assert!(flags.contains(DependencyFlags::DIRECT_DEPENDENCY));
        assert_eq!(flags.bits(), 1 << 40 | 1);

        let merged = flags | DependencyFlags::INCLUDE_DIRECTORIES;
        assert_eq!(merged.bits(), 1 << 40 | 3);
    }
}
