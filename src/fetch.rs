//! Per-node archive fetching.
//!
//! Downloads one resolved package archive, verifies its md5 while the
//! bytes stream in, and unpacks it into the storage layout. The stamp file
//! next to the source directory holds the digest of the installed archive
//! and doubles as the advisory-lock target, so concurrent processes
//! fetching the same node agree on a single writer.

use std::fs::{self, File, OpenOptions};
use std::io::{self, ErrorKind};
use std::path::{Path, PathBuf};

use fs4::FileExt;
use futures::StreamExt;
use reqwest::{header, Client};
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

use crate::extract::{unpack_tar_gz, ExtractError};
use crate::graph::ResolvedDependency;
use crate::index::{self, IndexError};
use crate::layout::StorageLayout;
use crate::manifest::{ManifestError, ProjectConfig};
use crate::types::Package;
use crate::{MANIFEST_FILENAME, USER_AGENT};

#[derive(Error, Debug)]
pub enum FetchError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("md5 does not match for package '{package}': expected {expected}, got {actual}")]
    Integrity {
        package: String,
        expected: String,
        actual: String,
    },

    #[error("failed to unpack archive: {0}")]
    Unpack(#[source] ExtractError),

    #[error("cannot create unpack directory '{0}': an entry with that name already exists")]
    UnpackDirectoryExists(PathBuf),

    #[error("config error: {0}")]
    Manifest(#[from] ManifestError),

    #[error("package index error: {0}")]
    Index(#[from] IndexError),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

/// How one node was brought up to date.
#[derive(Debug)]
pub enum FetchOutcome {
    /// The source directory and stamp already match; nothing was touched.
    UpToDate,
    /// This fetcher downloaded and unpacked the archive.
    Downloaded(ProjectConfig),
    /// A concurrent fetcher (possibly in another process) did the work;
    /// its result was reused.
    FetchedByPeer(ProjectConfig),
}

/// Fetches resolved nodes into a storage layout.
pub struct Fetcher {
    client: Client,
    host: String,
    data_prefix: String,
    layout: StorageLayout,
}

impl Fetcher {
    pub fn new(
        client: Client,
        host: impl Into<String>,
        data_prefix: impl Into<String>,
        layout: StorageLayout,
    ) -> Self {
        Self {
            client,
            host: host.into(),
            data_prefix: data_prefix.into(),
            layout,
        }
    }

    /// Archive location for a node: `<host>/<data_prefix>/<path>/<version>.tar.gz`.
    pub fn archive_url(&self, dep: &ResolvedDependency) -> String {
        format!(
            "{}/{}/{}/{}.tar.gz",
            self.host,
            self.data_prefix,
            dep.path.to_url_path(),
            dep.version
        )
    }

    /// Bring one resolved node up to date on disk.
    ///
    /// Holds the stamp lock for the whole download-verify-unpack sequence;
    /// a loser of the lock race waits for the winner and reuses its work.
    pub async fn fetch(&self, dep: &ResolvedDependency) -> Result<FetchOutcome, FetchError> {
        let pkg = dep.package();
        let srcdir = self.layout.dir_src(&pkg);
        let stamp = self.layout.stamp_path(&pkg);

        if srcdir.exists() && !must_download(&stamp, &dep.md5) {
            debug!(target_name = %dep.target_name(), "package is up to date");
            return Ok(FetchOutcome::UpToDate);
        }

        let lock = {
            let stamp = stamp.clone();
            tokio::task::spawn_blocking(move || try_lock_stamp(&stamp))
                .await
                .map_err(io::Error::other)??
        };
        let Some(_lock) = lock else {
            // Another fetcher owns this node; wait for it to finish, then
            // pick up the config it produced.
            debug!(target_name = %dep.target_name(), "waiting for concurrent fetch");
            let stamp = stamp.clone();
            let srcdir = srcdir.clone();
            let config = tokio::task::spawn_blocking(move || -> Result<ProjectConfig, FetchError> {
                let _lock = lock_stamp_blocking(&stamp)?;
                Ok(ProjectConfig::load_dir(&srcdir)?)
            })
            .await
            .map_err(io::Error::other)??;
            return Ok(FetchOutcome::FetchedByPeer(config));
        };

        // A peer may have completed the fetch between the unlocked check
        // and the lock acquisition; re-check before scrubbing its work.
        if srcdir.exists() && !must_download(&stamp, &dep.md5) {
            let config = ProjectConfig::load_dir(&srcdir)?;
            return Ok(FetchOutcome::FetchedByPeer(config));
        }

        self.scrub(&pkg)?;

        let url = self.archive_url(dep);
        let archive = self.layout.archive_path(&pkg);
        if let Some(parent) = archive.parent() {
            fs::create_dir_all(parent)?;
        }

        info!(target_name = %dep.target_name(), %url, "downloading package");
        let digest = self.download(&url, &archive).await?;
        if digest != dep.md5 {
            let _ = fs::remove_file(&archive);
            return Err(FetchError::Integrity {
                package: dep.path.to_string(),
                expected: dep.md5.clone(),
                actual: digest,
            });
        }

        fs::write(&stamp, &dep.md5)?;

        // a failed unpack must not leave a partial source tree behind
        let unpack_result = {
            let archive = archive.clone();
            let srcdir = srcdir.clone();
            tokio::task::spawn_blocking(move || unpack_tar_gz(&archive, &srcdir))
                .await
                .map_err(io::Error::other)?
        };
        if let Err(err) = unpack_result {
            let _ = fs::remove_dir_all(&srcdir);
            return Err(FetchError::Unpack(err));
        }
        fs::remove_file(&archive)?;

        let mut config = ProjectConfig::load_dir(&srcdir)?;
        config.downloaded = true;

        if let Some(unpack_directory) = config.manifest.unpack_directory.clone() {
            move_into_unpack_directory(&srcdir, &unpack_directory)?;
        }

        info!(target_name = %dep.target_name(), "unpacked package");
        Ok(FetchOutcome::Downloaded(config))
    }

    /// Remove every artifact of a target from both storage roots and the
    /// index files, ahead of a fresh download.
    fn scrub(&self, pkg: &Package) -> Result<(), FetchError> {
        let srcdir = self.layout.dir_src(pkg);
        let objdir = self.layout.dir_obj(pkg);
        let archive = self.layout.archive_path(pkg);
        if srcdir.exists() {
            fs::remove_dir_all(&srcdir)?;
        }
        if objdir.exists() {
            fs::remove_dir_all(&objdir)?;
        }
        if archive.exists() {
            fs::remove_file(&archive)?;
        }
        let target_name = pkg.target_name();
        index::remove_entry(self.layout.storage_dir_src(), &target_name)?;
        index::remove_entry(self.layout.storage_dir_obj(), &target_name)?;
        Ok(())
    }

    /// Stream the archive to disk, hashing the bytes as they arrive.
    async fn download(&self, url: &str, dest: &Path) -> Result<String, FetchError> {
        let response = self
            .client
            .get(url)
            .header(header::USER_AGENT, USER_AGENT)
            .send()
            .await?
            .error_for_status()?;

        let mut stream = response.bytes_stream();
        let mut file = tokio::fs::File::create(dest).await?;
        let mut context = md5::Context::new();

        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            file.write_all(&chunk).await?;
            context.consume(&chunk);
        }
        file.flush().await?;

        Ok(format!("{:x}", context.compute()))
    }
}

/// The stamp holds the md5 of the installed archive; any disagreement (or
/// absence on either side) forces a download.
fn must_download(stamp: &Path, expected_md5: &str) -> bool {
    let have = read_stamp(stamp);
    have != expected_md5 || have.is_empty() || expected_md5.is_empty()
}

fn read_stamp(stamp: &Path) -> String {
    fs::read_to_string(stamp)
        .map(|content| content.trim().to_string())
        .unwrap_or_default()
}

/// Try to take the exclusive advisory lock on the stamp file without
/// blocking. `None` means another fetcher holds it.
fn try_lock_stamp(stamp: &Path) -> Result<Option<File>, FetchError> {
    let file = open_stamp(stamp)?;
    match file.try_lock_exclusive() {
        Ok(()) => Ok(Some(file)),
        Err(err) if err.kind() == ErrorKind::WouldBlock => Ok(None),
        Err(err) => Err(err.into()),
    }
}

/// Take the exclusive advisory lock, blocking until the current holder
/// releases it. The lock lives as long as the returned handle.
fn lock_stamp_blocking(stamp: &Path) -> Result<File, FetchError> {
    let file = open_stamp(stamp)?;
    file.lock_exclusive()?;
    Ok(file)
}

fn open_stamp(stamp: &Path) -> Result<File, FetchError> {
    if let Some(parent) = stamp.parent() {
        fs::create_dir_all(parent)?;
    }
    // No truncation: the stamp content belongs to whoever holds the lock.
    Ok(OpenOptions::new()
        .create(true)
        .read(true)
        .write(true)
        .open(stamp)?)
}

/// Move every direct child of the source dir below `<srcdir>/<name>`,
/// except the directory itself and the project manifest.
fn move_into_unpack_directory(srcdir: &Path, name: &str) -> Result<(), FetchError> {
    let target = srcdir.join(name);
    if target.exists() {
        return Err(FetchError::UnpackDirectoryExists(target));
    }
    fs::create_dir_all(&target)?;

    for entry in fs::read_dir(srcdir)? {
        let entry = entry?;
        let file_name = entry.file_name();
        if file_name == *name || file_name == *MANIFEST_FILENAME {
            continue;
        }
        fs::rename(entry.path(), target.join(&file_name))?;
    }
    Ok(())
}
