//! End-to-end packaging scenarios over a tree containing symlinks.

#![cfg(unix)]
#![allow(clippy::unwrap_used)]

mod common;

use std::collections::BTreeSet;
use std::fs::File;

use proptest::prelude::*;
use rstest::rstest;
use stratus_package::{archive, build, load, ExcludeSet, SymlinkPolicy};

use common::{is_symlink_mode, read_entries, scenario_excludes, SourceTree};

#[rstest]
#[case::resolve(
    SymlinkPolicy::Resolve,
    &["dir/sub.txt", "ext-hello.txt", "hello.symlink", "hello.txt", "index.js", "world"]
)]
#[case::preserve(
    SymlinkPolicy::Preserve,
    &["dir.symlink", "dir/sub.txt", "ext-hello.txt", "hello.symlink", "hello.txt", "index.js", "world"]
)]
fn package_contains_expected_entries(#[case] policy: SymlinkPolicy, #[case] expected: &[&str]) {
    let tree = SourceTree::new();
    let package = build(tree.path(), &ExcludeSet::new(scenario_excludes()), policy).unwrap();

    let names: BTreeSet<&str> = package.entries().iter().map(String::as_str).collect();
    let expected: BTreeSet<&str> = expected.iter().copied().collect();
    assert_eq!(names, expected);
    assert_eq!(package.entries().len(), expected.len());
    assert!(package.size() > 100);
}

#[test]
fn resolved_symlink_carries_target_content() {
    let tree = SourceTree::new();
    let mut package = build(
        tree.path(),
        &ExcludeSet::new(scenario_excludes()),
        SymlinkPolicy::Resolve,
    )
    .unwrap();

    let entries = read_entries(&mut package);
    let (_, mode, content) = entries
        .iter()
        .find(|(name, _, _)| name == "hello.symlink")
        .unwrap();
    assert!(!is_symlink_mode(*mode));
    assert_eq!(content, "hello\n");

    let (_, _, outside) = entries
        .iter()
        .find(|(name, _, _)| name == "ext-hello.txt")
        .unwrap();
    assert_eq!(outside, "hello from outside\n");
}

#[test]
fn preserved_symlinks_store_link_text() {
    let tree = SourceTree::new();
    let mut package = build(
        tree.path(),
        &ExcludeSet::new(scenario_excludes()),
        SymlinkPolicy::Preserve,
    )
    .unwrap();

    let entries = read_entries(&mut package);
    let link = |wanted: &str| {
        entries
            .iter()
            .find(|(name, _, _)| name == wanted)
            .cloned()
            .unwrap()
    };

    let (_, mode, content) = link("hello.symlink");
    assert!(is_symlink_mode(mode));
    assert_eq!(content, "hello.txt");

    let (_, mode, content) = link("dir.symlink");
    assert!(is_symlink_mode(mode));
    assert_eq!(content, "dir");
}

#[test]
fn dangling_symlink_is_skipped_when_resolving() {
    let tree = SourceTree::new();
    std::os::unix::fs::symlink("missing.txt", tree.path().join("dangling")).unwrap();

    let package = build(
        tree.path(),
        &ExcludeSet::new(scenario_excludes()),
        SymlinkPolicy::Resolve,
    )
    .unwrap();
    assert!(!package.entries().iter().any(|name| name == "dangling"));
}

#[test]
fn unreadable_file_aborts_build() {
    use std::os::unix::fs::PermissionsExt;

    let tree = SourceTree::new();
    let locked = tree.path().join("locked.txt");
    std::fs::write(&locked, "secret").unwrap();
    std::fs::set_permissions(&locked, std::fs::Permissions::from_mode(0o000)).unwrap();

    // Root can read anything, so only assert when the file is actually unreadable.
    if File::open(&locked).is_err() {
        let result = build(tree.path(), &ExcludeSet::default(), SymlinkPolicy::Resolve);
        assert!(matches!(
            result,
            Err(stratus_package::PackageError::Read { .. })
        ));
    }
}

#[test]
fn build_then_load_matches_direct_walk() {
    let tree = SourceTree::new();
    let excludes = ExcludeSet::new(scenario_excludes());

    let walked: Vec<String> = archive::collect_entries(tree.path(), &excludes, SymlinkPolicy::Resolve)
        .unwrap()
        .into_keys()
        .collect();

    let out = tempfile::TempDir::new().unwrap();
    let dest = out.path().join("function.zip");
    let mut package = build(tree.path(), &excludes, SymlinkPolicy::Resolve).unwrap();
    let mut file = File::create(&dest).unwrap();
    package.write_to(&mut file).unwrap();
    drop(file);

    let loaded = load(&dest).unwrap();
    assert_eq!(loaded.entries(), walked.as_slice());
}

#[test]
fn repeated_builds_are_identical() {
    let tree = SourceTree::new();
    let excludes = ExcludeSet::new(scenario_excludes());

    let mut first = build(tree.path(), &excludes, SymlinkPolicy::Resolve).unwrap();
    let mut second = build(tree.path(), &excludes, SymlinkPolicy::Resolve).unwrap();
    assert_eq!(first.code_sha256().unwrap(), second.code_sha256().unwrap());
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    #[test]
    fn excluded_paths_never_packaged(
        files in proptest::collection::btree_set("[a-c]{1,2}(/[a-c]{1,2})?\\.(txt|bin|js)", 1..12),
        patterns in proptest::collection::vec(
            prop_oneof![
                Just("*.bin".to_owned()),
                Just("a/*".to_owned()),
                Just("?.txt".to_owned()),
                Just("[bc]*".to_owned()),
                Just("*.js".to_owned()),
            ],
            0..3,
        ),
    ) {
        let dir = tempfile::TempDir::new().unwrap();
        for file in &files {
            let path = dir.path().join(file);
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent).unwrap();
            }
            // A name may already exist as a directory created for a deeper file.
            if !path.is_dir() {
                std::fs::write(&path, file.as_bytes()).unwrap();
            }
        }

        let package = build(dir.path(), &ExcludeSet::new(patterns.clone()), SymlinkPolicy::Resolve).unwrap();
        for name in package.entries() {
            prop_assert!(!stratus_package::is_excluded(name, &patterns), "{name} matched {patterns:?}");
        }
    }
}
