//! Error types for packaging.

use std::path::PathBuf;

use thiserror::Error;

/// Errors that can occur while building or loading a package.
#[derive(Debug, Error)]
pub enum PackageError {
    /// The source root does not exist or is not a directory.
    #[error("source directory not found: {0}")]
    SourceNotFound(PathBuf),

    /// Walking the source tree failed.
    #[error("failed to walk {path}: {source}")]
    Walk {
        /// Path being visited when the walk failed.
        path: PathBuf,
        /// Underlying walk error.
        #[source]
        source: walkdir::Error,
    },

    /// A source file could not be read. Aborts the whole build.
    #[error("failed to read {path}: {source}")]
    Read {
        /// Path of the unreadable file.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// A relative path would escape the archive root.
    #[error("path escapes archive root: {0}")]
    PathEscape(PathBuf),

    /// The temporary backing file could not be created or written.
    #[error("failed to write package: {0}")]
    Write(#[from] std::io::Error),

    /// The zip writer rejected an entry.
    #[error("failed to add {name} to package: {source}")]
    Entry {
        /// Entry name inside the archive.
        name: String,
        /// Underlying zip error.
        #[source]
        source: zip::result::ZipError,
    },

    /// A pre-built package is not a readable zip archive.
    #[error("invalid archive {path}: {source}")]
    InvalidArchive {
        /// Path to the archive.
        path: PathBuf,
        /// Underlying zip error.
        #[source]
        source: zip::result::ZipError,
    },
}

/// Result type alias for packaging operations.
pub type PackageResult<T> = Result<T, PackageError>;
