//! Archive extraction.
//!
//! Package archives are gzip-compressed tarballs.

use std::fs::File;
use std::io::{self, BufReader};
use std::path::Path;

use flate2::read::GzDecoder;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ExtractError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

/// Unpack a `.tar.gz` archive into a destination directory, creating it
/// as needed.
pub fn unpack_tar_gz(archive_path: &Path, dest_dir: &Path) -> Result<(), ExtractError> {
    let file = File::open(archive_path)?;
    let decoder = GzDecoder::new(BufReader::new(file));
    let mut archive = tar::Archive::new(decoder);
    std::fs::create_dir_all(dest_dir)?;
    archive.unpack(dest_dir)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use tempfile::tempdir;

    fn build_archive(entries: &[(&str, &str)]) -> Vec<u8> {
        let encoder = GzEncoder::new(Vec::new(), Compression::default());
        let mut builder = tar::Builder::new(encoder);
        for (name, content) in entries {
            let mut header = tar::Header::new_gnu();
            header.set_size(content.len() as u64);
            header.set_mode(0o644);
            header.set_cksum();
            builder.append_data(&mut header, name, content.as_bytes()).unwrap();
        }
        builder.into_inner().unwrap().finish().unwrap()
    }

    #[test]
    fn unpack_roundtrip() {
        let dir = tempdir().unwrap();
        let archive = dir.path().join("pkg.tar.gz");
        std::fs::write(
            &archive,
            build_archive(&[("include/foo.h", "#pragma once\n"), ("README", "hi")]),
        )
        .unwrap();

        let dest = dir.path().join("out");
        unpack_tar_gz(&archive, &dest).unwrap();

        assert_eq!(
            std::fs::read_to_string(dest.join("include/foo.h")).unwrap(),
            "#pragma once\n"
        );
        assert_eq!(std::fs::read_to_string(dest.join("README")).unwrap(), "hi");
    }

    #[test]
    fn corrupt_archive_fails() {
        let dir = tempdir().unwrap();
        let archive = dir.path().join("pkg.tar.gz");
        std::fs::write(&archive, b"definitely not gzip").unwrap();

        let dest = dir.path().join("out");
        assert!(unpack_tar_gz(&archive, &dest).is_err());
    }
}
