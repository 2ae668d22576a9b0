//! Archive building and loading.
//!
//! [`build`] walks a source tree and writes a deflate-compressed zip into an
//! anonymous temporary file; [`load`] opens a pre-built zip and validates its
//! central directory. Both hand back an [`ArchivePackage`] positioned at the
//! start of the data. The backing file is removed when the package is dropped.

mod walk;
mod writer;

pub use walk::{collect_entries, EntrySource, SourceEntry};

use std::fs::File;
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use sha2::{Digest, Sha256};
use tracing::{debug, info};
use zip::ZipArchive;

use crate::error::{PackageError, PackageResult};
use crate::exclude::ExcludeSet;

/// How symbolic links inside the source tree are packaged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SymlinkPolicy {
    /// Follow the link and store the target's content under the link's name.
    /// Links to directories or to missing targets are skipped.
    #[default]
    Resolve,
    /// Store the link itself, with the target path as its content.
    Preserve,
}

impl SymlinkPolicy {
    /// Policy for a `--symlink` style boolean flag.
    #[must_use]
    pub const fn from_keep(keep: bool) -> Self {
        if keep {
            Self::Preserve
        } else {
            Self::Resolve
        }
    }

    /// Short name used in log fields.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Resolve => "resolve",
            Self::Preserve => "preserve",
        }
    }
}

/// A finished zip package.
#[derive(Debug)]
pub struct ArchivePackage {
    file: File,
    size: u64,
    entries: Vec<String>,
}

impl ArchivePackage {
    pub(crate) fn new(file: File, size: u64, entries: Vec<String>) -> Self {
        Self {
            file,
            size,
            entries,
        }
    }

    /// Total size of the package in bytes.
    #[must_use]
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Entry names in archive order.
    #[must_use]
    pub fn entries(&self) -> &[String] {
        &self.entries
    }

    /// Seek back to the start of the package.
    pub fn rewind(&mut self) -> std::io::Result<()> {
        self.file.seek(SeekFrom::Start(0)).map(|_| ())
    }

    /// Base64-encoded SHA-256 digest of the package bytes.
    ///
    /// This is the form in which the function service reports code hashes.
    /// The package is left positioned at its start.
    pub fn code_sha256(&mut self) -> std::io::Result<String> {
        self.rewind()?;
        let mut hasher = Sha256::new();
        std::io::copy(&mut self.file, &mut hasher)?;
        self.rewind()?;
        Ok(STANDARD.encode(hasher.finalize()))
    }

    /// Copy the whole package into `writer`.
    pub fn write_to<W: Write + ?Sized>(&mut self, writer: &mut W) -> std::io::Result<u64> {
        self.rewind()?;
        let written = std::io::copy(&mut self.file, writer)?;
        self.rewind()?;
        Ok(written)
    }

    /// Read the whole package into memory, consuming it.
    pub fn into_bytes(mut self) -> std::io::Result<Vec<u8>> {
        self.rewind()?;
        let capacity = usize::try_from(self.size).unwrap_or_default();
        let mut bytes = Vec::with_capacity(capacity);
        self.file.read_to_end(&mut bytes)?;
        Ok(bytes)
    }
}

impl Read for ArchivePackage {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        self.file.read(buf)
    }
}

impl Seek for ArchivePackage {
    fn seek(&mut self, pos: SeekFrom) -> std::io::Result<u64> {
        self.file.seek(pos)
    }
}

/// Build a zip package from the files under `root`.
///
/// Excluded paths and unresolvable symlinks are skipped with a log line. An
/// unreadable source file aborts the build.
pub fn build(
    root: &Path,
    excludes: &ExcludeSet,
    policy: SymlinkPolicy,
) -> PackageResult<ArchivePackage> {
    info!(
        src = %root.display(),
        symlinks = policy.as_str(),
        "creating zip archive"
    );
    let entries = collect_entries(root, excludes, policy)?;
    writer::write_package(&entries)
}

/// Open an existing zip package and validate its central directory.
pub fn load(path: &Path) -> PackageResult<ArchivePackage> {
    info!(path = %path.display(), "reading zip archive");

    let mut file = File::open(path).map_err(|source| PackageError::Read {
        path: path.to_owned(),
        source,
    })?;

    let entries = {
        let mut archive =
            ZipArchive::new(&mut file).map_err(|source| PackageError::InvalidArchive {
                path: path.to_owned(),
                source,
            })?;

        let mut names = Vec::with_capacity(archive.len());
        for index in 0..archive.len() {
            let entry =
                archive
                    .by_index_raw(index)
                    .map_err(|source| PackageError::InvalidArchive {
                        path: path.to_owned(),
                        source,
                    })?;
            debug!(
                mode = format!("{:o}", entry.unix_mode().unwrap_or_default()),
                size = entry.size(),
                name = entry.name(),
                "archive entry"
            );
            names.push(entry.name().to_owned());
        }
        names
    };

    file.seek(SeekFrom::Start(0))?;
    let size = file.metadata()?.len();
    info!(bytes = size, entries = entries.len(), "zip archive loaded");

    Ok(ArchivePackage::new(file, size, entries))
}
