//! Resolution of a code source into a package.

use std::path::{Path, PathBuf};

use crate::archive::{self, ArchivePackage, SymlinkPolicy};
use crate::error::PackageResult;
use crate::exclude::ExcludeSet;

/// Where the function code comes from.
#[derive(Debug, Clone)]
pub enum CodeSource {
    /// A source directory to be packaged.
    Directory {
        /// Root of the source tree.
        root: PathBuf,
        /// Exclusion patterns.
        excludes: ExcludeSet,
        /// Symlink handling.
        symlinks: SymlinkPolicy,
    },
    /// A pre-built zip archive.
    Archive(PathBuf),
}

impl CodeSource {
    /// Pick the source kind for `src`: an existing `.zip` file is used as is,
    /// anything else is treated as a directory to package.
    #[must_use]
    pub fn detect(src: &Path, excludes: ExcludeSet, symlinks: SymlinkPolicy) -> Self {
        let is_zip = src
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("zip"));
        if src.is_file() && is_zip {
            Self::Archive(src.to_owned())
        } else {
            Self::Directory {
                root: src.to_owned(),
                excludes,
                symlinks,
            }
        }
    }

    /// Display path of the source, for diff headers and logs.
    #[must_use]
    pub fn path(&self) -> &Path {
        match self {
            Self::Directory { root, .. } => root,
            Self::Archive(path) => path,
        }
    }

    /// Build or load the package.
    pub fn prepare(&self) -> PackageResult<ArchivePackage> {
        match self {
            Self::Directory {
                root,
                excludes,
                symlinks,
            } => archive::build(root, excludes, *symlinks),
            Self::Archive(path) => archive::load(path),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn zip_files_are_loaded_directories_are_built() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("index.js"), "1").unwrap();

        let source = CodeSource::detect(dir.path(), ExcludeSet::default(), SymlinkPolicy::Resolve);
        assert!(matches!(source, CodeSource::Directory { .. }));

        let mut package = source.prepare().unwrap();
        let zip_path = dir.path().join("function.zip");
        let mut out = std::fs::File::create(&zip_path).unwrap();
        package.write_to(&mut out).unwrap();
        drop(out);

        let source = CodeSource::detect(&zip_path, ExcludeSet::default(), SymlinkPolicy::Resolve);
        assert!(matches!(source, CodeSource::Archive(_)));
        let loaded = source.prepare().unwrap();
        assert_eq!(loaded.entries(), ["index.js"]);
    }
}
