//! Shared fixtures for packaging integration tests.

use std::io::Read;
use std::os::unix::fs::symlink;
use std::path::{Path, PathBuf};

use stratus_package::ArchivePackage;
use tempfile::TempDir;
use zip::ZipArchive;

/// Unix file-type bits for a symbolic link.
pub const S_IFLNK: u32 = 0o120_000;
const S_IFMT: u32 = 0o170_000;

/// A source tree laid out like a small Node.js function.
///
/// ```text
/// src/
///   dir/sub.txt
///   dir.symlink -> dir
///   ext-hello.txt -> ../ext/hello.txt
///   hello.symlink -> hello.txt
///   hello.txt
///   index.js
///   world
///   skip/ignored.txt
///   data.bin
/// ext/hello.txt
/// ```
pub struct SourceTree {
    _dir: TempDir,
    pub root: PathBuf,
}

impl SourceTree {
    pub fn new() -> Self {
        let dir = TempDir::new().unwrap();
        let root = dir.path().join("src");
        let ext = dir.path().join("ext");

        std::fs::create_dir_all(root.join("dir")).unwrap();
        std::fs::create_dir_all(root.join("skip")).unwrap();
        std::fs::create_dir_all(&ext).unwrap();

        std::fs::write(ext.join("hello.txt"), "hello from outside\n").unwrap();
        std::fs::write(root.join("dir/sub.txt"), "sub\n").unwrap();
        std::fs::write(root.join("hello.txt"), "hello\n").unwrap();
        std::fs::write(root.join("index.js"), "exports.handler = async () => 'ok';\n").unwrap();
        std::fs::write(root.join("world"), "world\n").unwrap();
        std::fs::write(root.join("skip/ignored.txt"), "ignored\n").unwrap();
        std::fs::write(root.join("data.bin"), [0u8; 128]).unwrap();

        symlink("dir", root.join("dir.symlink")).unwrap();
        symlink("hello.txt", root.join("hello.symlink")).unwrap();
        symlink("../ext/hello.txt", root.join("ext-hello.txt")).unwrap();

        Self { _dir: dir, root }
    }

    pub fn path(&self) -> &Path {
        &self.root
    }
}

/// Exclusions used by the scenario tests.
pub fn scenario_excludes() -> Vec<String> {
    vec!["*.bin".to_owned(), "skip/*".to_owned()]
}

/// Read every entry of a package as `(name, unix mode, content)`.
pub fn read_entries(package: &mut ArchivePackage) -> Vec<(String, u32, String)> {
    package.rewind().unwrap();
    let mut archive = ZipArchive::new(package).unwrap();
    let mut entries = Vec::new();
    for index in 0..archive.len() {
        let mut file = archive.by_index(index).unwrap();
        let mode = file.unix_mode().unwrap_or_default();
        let mut content = String::new();
        file.read_to_string(&mut content).unwrap();
        entries.push((file.name().to_owned(), mode, content));
    }
    entries
}

pub fn is_symlink_mode(mode: u32) -> bool {
    mode & S_IFMT == S_IFLNK
}
