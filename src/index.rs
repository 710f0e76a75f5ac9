//! Package index files.
//!
//! Each storage root carries a `packages.idx` registry mapping target
//! names to absolute package directories, consumed by downstream build
//! generation. Writes go through a temp file and rename, and the map is
//! ordered, so the same contents always produce identical bytes.

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;

pub const INDEX_FILENAME: &str = "packages.idx";

#[derive(Error, Debug)]
pub enum IndexError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("malformed package index: {0}")]
    Parse(#[from] serde_json::Error),
}

pub type PackageIndex = BTreeMap<String, PathBuf>;

/// Load the index of a storage root; a missing file is an empty index.
pub fn read(storage_dir: &Path) -> Result<PackageIndex, IndexError> {
    let path = storage_dir.join(INDEX_FILENAME);
    match fs::read_to_string(&path) {
        Ok(content) => Ok(serde_json::from_str(&content)?),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(PackageIndex::new()),
        Err(err) => Err(err.into()),
    }
}

/// Persist the index of a storage root atomically (write-temp + rename).
pub fn write(storage_dir: &Path, index: &PackageIndex) -> Result<(), IndexError> {
    fs::create_dir_all(storage_dir)?;
    let path = storage_dir.join(INDEX_FILENAME);
    let tmp = storage_dir.join(format!("{INDEX_FILENAME}.tmp"));
    let mut content = serde_json::to_string_pretty(index)?;
    content.push('\n');
    fs::write(&tmp, content)?;
    fs::rename(&tmp, &path)?;
    Ok(())
}

/// Drop one target from a storage root's index, if present.
pub fn remove_entry(storage_dir: &Path, target_name: &str) -> Result<(), IndexError> {
    let mut index = read(storage_dir)?;
    if index.remove(target_name).is_some() {
        write(storage_dir, &index)?;
    }
    Ok(())
}
