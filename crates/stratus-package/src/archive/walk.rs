//! Source tree discovery.

use std::collections::BTreeMap;
use std::fs::Metadata;
use std::path::{Component, Path, PathBuf};
use std::time::SystemTime;

use tracing::{debug, trace, warn};
use walkdir::WalkDir;

use crate::error::{PackageError, PackageResult};
use crate::exclude::ExcludeSet;

use super::SymlinkPolicy;

/// Where the bytes of an entry come from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntrySource {
    /// Regular file content, read from this path at write time.
    File(PathBuf),
    /// Symbolic link stored as its target text.
    Link(String),
}

/// One file discovered under the archive root.
#[derive(Debug, Clone)]
pub struct SourceEntry {
    /// Root-relative, `/`-separated path.
    pub relative_path: String,
    /// Content source.
    pub source: EntrySource,
    /// Unix permission bits.
    pub mode: u32,
    /// Modification time of the file (or of the link target when resolved).
    pub modified: SystemTime,
}

impl SourceEntry {
    /// Whether this entry is stored as a symbolic link.
    #[must_use]
    pub fn is_symlink(&self) -> bool {
        matches!(self.source, EntrySource::Link(_))
    }
}

/// Walk `root` and collect every file that should be packaged, keyed by its
/// relative path.
///
/// A later occurrence of the same relative path replaces the earlier one.
pub fn collect_entries(
    root: &Path,
    excludes: &ExcludeSet,
    policy: SymlinkPolicy,
) -> PackageResult<BTreeMap<String, SourceEntry>> {
    if !root.is_dir() {
        return Err(PackageError::SourceNotFound(root.to_owned()));
    }

    let mut entries = BTreeMap::new();

    for item in WalkDir::new(root).follow_links(false).sort_by_file_name() {
        let item = item.map_err(|e| PackageError::Walk {
            path: e.path().map_or_else(|| root.to_owned(), Path::to_path_buf),
            source: e,
        })?;
        trace!(path = %item.path().display(), "walking");

        if item.file_type().is_dir() {
            continue;
        }

        let relative_path = relative_name(root, item.path())?;
        if excludes.is_excluded(&relative_path) {
            debug!(path = %relative_path, "skipping excluded path");
            continue;
        }

        let entry = if item.path_is_symlink() {
            match symlink_entry(item.path(), &relative_path, policy)? {
                Some(entry) => entry,
                None => continue,
            }
        } else {
            let metadata = item.metadata().map_err(|e| PackageError::Walk {
                path: item.path().to_owned(),
                source: e,
            })?;
            SourceEntry {
                relative_path: relative_path.clone(),
                source: EntrySource::File(item.path().to_owned()),
                mode: file_mode(&metadata),
                modified: modified(&metadata),
            }
        };

        trace!(path = %relative_path, symlink = entry.is_symlink(), "adding");
        entries.insert(relative_path, entry);
    }

    Ok(entries)
}

fn symlink_entry(
    path: &Path,
    relative_path: &str,
    policy: SymlinkPolicy,
) -> PackageResult<Option<SourceEntry>> {
    let link = std::fs::read_link(path).map_err(|source| PackageError::Read {
        path: path.to_owned(),
        source,
    })?;

    match policy {
        SymlinkPolicy::Preserve => {
            let metadata =
                std::fs::symlink_metadata(path).map_err(|source| PackageError::Read {
                    path: path.to_owned(),
                    source,
                })?;
            Ok(Some(SourceEntry {
                relative_path: relative_path.to_owned(),
                source: EntrySource::Link(link.to_string_lossy().into_owned()),
                mode: 0o777,
                modified: modified(&metadata),
            }))
        }
        SymlinkPolicy::Resolve => {
            let target = path.parent().unwrap_or(path).join(&link);
            debug!(link = %path.display(), target = %target.display(), "resolving symlink");

            let metadata = match std::fs::metadata(&target) {
                Ok(metadata) => metadata,
                Err(e) => {
                    warn!(
                        path = %relative_path,
                        target = %target.display(),
                        error = %e,
                        "cannot stat symlink target, skipping"
                    );
                    return Ok(None);
                }
            };
            if metadata.is_dir() {
                warn!(
                    path = %relative_path,
                    target = %target.display(),
                    "symlink target is a directory, skipping"
                );
                return Ok(None);
            }

            Ok(Some(SourceEntry {
                relative_path: relative_path.to_owned(),
                source: EntrySource::File(target),
                mode: file_mode(&metadata),
                modified: modified(&metadata),
            }))
        }
    }
}

/// Root-relative `/`-separated name for `path`.
fn relative_name(root: &Path, path: &Path) -> PackageResult<String> {
    let relative = path
        .strip_prefix(root)
        .map_err(|_| PackageError::PathEscape(path.to_owned()))?;

    let mut parts = Vec::new();
    for component in relative.components() {
        match component {
            Component::Normal(part) => parts.push(part.to_string_lossy().into_owned()),
            Component::CurDir => {}
            _ => return Err(PackageError::PathEscape(path.to_owned())),
        }
    }

    if parts.is_empty() {
        return Err(PackageError::PathEscape(path.to_owned()));
    }
    Ok(parts.join("/"))
}

fn modified(metadata: &Metadata) -> SystemTime {
    metadata.modified().unwrap_or(SystemTime::UNIX_EPOCH)
}

#[cfg(unix)]
fn file_mode(metadata: &Metadata) -> u32 {
    use std::os::unix::fs::PermissionsExt;
    metadata.permissions().mode() & 0o777
}

#[cfg(not(unix))]
fn file_mode(metadata: &Metadata) -> u32 {
    if metadata.permissions().readonly() {
        0o444
    } else {
        0o644
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn relative_names_use_forward_slashes() {
        let root = Path::new("/src");
        let name = relative_name(root, Path::new("/src/dir/sub.txt")).unwrap();
        assert_eq!(name, "dir/sub.txt");
    }

    #[test]
    fn paths_outside_root_are_rejected() {
        let root = Path::new("/src");
        assert!(matches!(
            relative_name(root, Path::new("/other/file")),
            Err(PackageError::PathEscape(_))
        ));
        assert!(matches!(
            relative_name(root, Path::new("/src/../etc/passwd")),
            Err(PackageError::PathEscape(_))
        ));
    }

    #[test]
    fn missing_root_is_an_error() {
        let dir = tempfile::TempDir::new().unwrap();
        let result = collect_entries(
            &dir.path().join("absent"),
            &ExcludeSet::default(),
            SymlinkPolicy::Resolve,
        );
        assert!(matches!(result, Err(PackageError::SourceNotFound(_))));
    }

    #[test]
    fn directories_are_not_entries() {
        let dir = tempfile::TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join("a/b")).unwrap();
        std::fs::write(dir.path().join("a/b/c.txt"), "c").unwrap();

        let entries =
            collect_entries(dir.path(), &ExcludeSet::default(), SymlinkPolicy::Resolve).unwrap();
        assert_eq!(entries.keys().collect::<Vec<_>>(), vec!["a/b/c.txt"]);
    }
}
