//! Handle-based entry points for embedding the engine in a host runtime.
//!
//! Archives live in a process-wide registry and are referred to by opaque
//! [`HandleRef`] values, so the host never sees a memory address. Functions
//! that report plain success or failure log the underlying error.

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use lazy_static::lazy_static;
use log::warn;
use parking_lot::Mutex;

use super::archive::*;
use super::error::{Error, Result};

/// Opaque identifier of an archive opened through this module.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HandleRef(u64);

impl HandleRef {
    pub fn as_raw(self) -> u64 {
        self.0
    }

    pub fn from_raw(raw: u64) -> HandleRef {
        HandleRef(raw)
    }
}

lazy_static! {
    static ref HANDLES: Mutex<HashMap<u64, Arc<Archive>>> = Mutex::new(HashMap::new());
}

static NEXT_HANDLE: AtomicU64 = AtomicU64::new(1);

fn register(archive: Archive) -> HandleRef {
    let raw = NEXT_HANDLE.fetch_add(1, Ordering::Relaxed);
    HANDLES.lock().insert(raw, Arc::new(archive));

    HandleRef(raw)
}

/// Looks up an archive. The registry lock is released before the archive
/// is used, so slow operations on one archive do not block the others.
fn archive(handle: HandleRef) -> Result<Arc<Archive>> {
    HANDLES
        .lock()
        .get(&handle.0)
        .cloned()
        .ok_or(Error::InvalidHandle)
}

fn report(operation: &str, result: Result<()>) -> bool {
    match result {
        Ok(()) => true,
        Err(e) => {
            warn!("{} failed: {}", operation, e);
            false
        }
    }
}

/// Creates an archive. `flags` takes `MPQ_CREATE_*` values.
pub fn create_archive<P: AsRef<Path>>(
    path: P,
    flags: u32,
    max_file_count: usize,
) -> Result<HandleRef> {
    let options = CreateOptions::from_flags(flags, max_file_count);
    let archive = Archive::create(path, options)?;

    Ok(register(archive))
}

/// Opens an archive. `flags` takes `MPQ_OPEN_*` values. `priority` only
/// matters for archive chains, which are not supported, and is ignored.
pub fn open_archive<P: AsRef<Path>>(path: P, _priority: u32, flags: u32) -> Result<HandleRef> {
    let archive = Archive::open(path, OpenMode::from_flags(flags))?;

    Ok(register(archive))
}

/// Flushes and closes the archive and invalidates the handle, even if the
/// flush fails.
pub fn close_archive(handle: HandleRef) -> bool {
    let archive = HANDLES.lock().remove(&handle.0);

    match archive {
        Some(archive) => report("close_archive", archive.close()),
        None => report("close_archive", Err(Error::InvalidHandle)),
    }
}

/// Adds the file at `source_path` under `archived_name`. `flags` takes
/// `MPQ_ADD_*` values.
pub fn add_file<P: AsRef<Path>>(
    handle: HandleRef,
    source_path: P,
    archived_name: &str,
    flags: u32,
) -> bool {
    let result = archive(handle).and_then(|archive| {
        archive.add_file_from_path(source_path, archived_name, FileOptions::from_flags(flags))
    });

    report("add_file", result)
}

pub fn extract_file<P: AsRef<Path>>(handle: HandleRef, archived_name: &str, dest_path: P) -> bool {
    let result = archive(handle).and_then(|archive| archive.extract_to_path(archived_name, dest_path));

    report("extract_file", result)
}

/// Names of all files in the archive. Empty for an unknown handle.
pub fn list_files(handle: HandleRef) -> Vec<String> {
    match archive(handle).and_then(|archive| archive.list_files()) {
        Ok(names) => names,
        Err(e) => {
            warn!("list_files failed: {}", e);
            Vec::new()
        }
    }
}
