#![allow(dead_code)]

use std::path::PathBuf;

use mpq_store::{Archive, CreateOptions};
use tempfile::TempDir;

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// A scratch directory and an archive path inside it. The directory is
/// removed when the returned `TempDir` is dropped.
pub fn scratch_path(name: &str) -> (TempDir, PathBuf) {
    init_logging();

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join(name);

    (dir, path)
}

pub fn create_archive(max_file_count: usize) -> (TempDir, PathBuf, Archive) {
    let (dir, path) = scratch_path("test.mpq");
    let archive = Archive::create(
        &path,
        CreateOptions {
            max_file_count,
            ..CreateOptions::default()
        },
    )
    .unwrap();

    (dir, path, archive)
}

/// Repetitive text that compresses well.
pub fn text(len: usize) -> Vec<u8> {
    b"All work and no play makes Jack a dull boy.\r\n"
        .iter()
        .cycle()
        .take(len)
        .cloned()
        .collect()
}

/// Deterministic bytes that do not compress.
pub fn noise(len: usize, seed: u32) -> Vec<u8> {
    let mut state = seed | 1;
    (0..len)
        .map(|_| {
            state ^= state << 13;
            state ^= state >> 17;
            state ^= state << 5;
            (state >> 24) as u8
        })
        .collect()
}

pub fn sorted(mut names: Vec<String>) -> Vec<String> {
    names.sort();
    names
}
