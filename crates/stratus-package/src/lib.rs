//! Deterministic packaging of function source trees.
//!
//! This crate provides:
//! - Shell-style exclusion patterns ([`exclude`])
//! - Zip package building with a configurable symlink policy ([`archive::build`])
//! - Validation of pre-built packages ([`archive::load`])
//! - Code digests in the form the function service reports them
//!
//! ```text
//! source dir ──▶ walk (sorted) ──▶ exclude ──▶ symlink policy ──▶ zip (deflate)
//!                                                                    │
//!                                   ArchivePackage (temp file) ◀─────┘
//! ```

#![forbid(unsafe_code)]

pub mod archive;
pub mod error;
pub mod exclude;
pub mod source;

pub use archive::{build, load, ArchivePackage, EntrySource, SourceEntry, SymlinkPolicy};
pub use error::{PackageError, PackageResult};
pub use exclude::{
    is_excluded, matches, read_exclude_file, ExcludeSet, DEFAULT_EXCLUDES, DEFAULT_EXCLUDE_FILE,
};
pub use source::CodeSource;
