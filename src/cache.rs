/*
 * SPDX-FileCopyrightText: 2020 Stalwart Labs Ltd <hello@stalw.art>
 *
 * SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-SEL
 */

//! Bytecode cache: memory-maps compiled scripts and deduplicates them by
//! inode, so an `include` graph never maps the same file twice and
//! include cycles terminate.

use std::{fs::File, os::unix::fs::MetadataExt, path::Path};

use memmap2::Mmap;

use crate::ErrorKind;

/// One memory-mapped compiled script.
pub struct Bytecode {
    inode: u64,
    map: Mmap,
    // Keeps the descriptor open for the mapping's lifetime.
    _file: File,
}

impl Bytecode {
    pub fn data(&self) -> &[u8] {
        &self.map
    }

    pub fn inode(&self) -> u64 {
        self.inode
    }
}

/// Result of [`load`]: whether the blob was newly mapped or found in the
/// handle from an earlier load. `Reloaded` lets `include` processing
/// short-circuit both re-mapping and re-evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Loaded {
    New,
    Reloaded,
}

/// Holder for every blob loaded under one include graph. Newly loaded
/// blobs are prepended; the cursor always points at the blob currently
/// being executed.
pub struct ExecuteHandle {
    blobs: Vec<Bytecode>,
    cur: usize,
}

impl ExecuteHandle {
    pub(crate) fn current(&self) -> &Bytecode {
        &self.blobs[self.cur]
    }

    /// Index of the blob holding `inode`, if loaded.
    pub(crate) fn position(&self, inode: u64) -> Option<usize> {
        self.blobs.iter().position(|bc| bc.inode == inode)
    }

    pub(crate) fn set_cursor(&mut self, cur: usize) {
        debug_assert!(cur < self.blobs.len());
        self.cur = cur;
    }

    pub fn len(&self) -> usize {
        self.blobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blobs.is_empty()
    }

    pub(crate) fn load_into(&mut self, path: &Path) -> Result<Loaded, ErrorKind> {
        let meta = std::fs::metadata(path).map_err(|err| {
            if err.kind() == std::io::ErrorKind::NotFound {
                tracing::debug!(
                    context = "sieve_script_load",
                    event = "not_found",
                    path = %path.display(),
                    "Compiled script does not exist",
                );
            } else {
                tracing::debug!(
                    context = "sieve_script_load",
                    event = "error",
                    path = %path.display(),
                    reason = %err,
                    "Failed to stat compiled script",
                );
            }
            ErrorKind::Generic
        })?;

        if let Some(pos) = self.blobs.iter().position(|bc| bc.inode == meta.ino()) {
            self.cur = pos;
            return Ok(Loaded::Reloaded);
        }

        let file = File::open(path).map_err(|err| {
            tracing::debug!(
                context = "sieve_script_load",
                event = "error",
                path = %path.display(),
                reason = %err,
                "Failed to open compiled script",
            );
            ErrorKind::Generic
        })?;
        // fstat the opened descriptor: the path may have been replaced
        // between stat and open.
        let inode = file
            .metadata()
            .map_err(|_| ErrorKind::Generic)?
            .ino();
        // The mapping is read-only and the descriptor stays open for its
        // whole lifetime.
        let map = unsafe { Mmap::map(&file) }.map_err(|err| {
            tracing::debug!(
                context = "sieve_script_load",
                event = "error",
                path = %path.display(),
                reason = %err,
                "Failed to map compiled script",
            );
            ErrorKind::Generic
        })?;

        self.blobs.insert(
            0,
            Bytecode {
                inode,
                map,
                _file: file,
            },
        );
        self.cur = 0;
        Ok(Loaded::New)
    }
}

/// Loads a compiled script, reusing `handle` when it already holds one:
/// a second load of the same inode returns [`Loaded::Reloaded`] without
/// creating a second mapping.
pub fn load(path: impl AsRef<Path>, handle: &mut Option<ExecuteHandle>) -> Result<Loaded, ErrorKind> {
    let mut owned = match handle.take() {
        Some(existing) => existing,
        None => ExecuteHandle {
            blobs: Vec::new(),
            cur: 0,
        },
    };

    match owned.load_into(path.as_ref()) {
        Ok(loaded) => {
            *handle = Some(owned);
            Ok(loaded)
        }
        Err(err) => {
            // A failed load leaves an existing handle untouched; a
            // handle that never mapped anything is not kept around.
            if !owned.blobs.is_empty() {
                *handle = Some(owned);
            }
            Err(err)
        }
    }
}

/// Releases every mapping held by the handle. Returns an error only for
/// an already-empty handle, a contract some callers rely on to detect
/// double unloads.
pub fn unload(handle: &mut Option<ExecuteHandle>) -> Result<(), ErrorKind> {
    match handle.take() {
        Some(_) => Ok(()),
        None => Err(ErrorKind::Generic),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn temp_path(name: &str) -> std::path::PathBuf {
        std::env::temp_dir().join(format!("sieve-core-cache-{}-{name}", std::process::id()))
    }

    fn write_blob(name: &str, content: &[u8]) -> std::path::PathBuf {
        let path = temp_path(name);
        let mut file = File::create(&path).unwrap();
        file.write_all(content).unwrap();
        path
    }

    #[test]
    fn missing_file_fails_without_creating_a_handle() {
        let mut handle = None;
        assert_eq!(
            load(temp_path("missing"), &mut handle),
            Err(ErrorKind::Generic)
        );
        assert!(handle.is_none());
    }

    #[test]
    fn same_inode_is_reloaded_not_remapped() {
        let path = write_blob("dedup", b"blob one");
        let mut handle = None;
        assert_eq!(load(&path, &mut handle), Ok(Loaded::New));
        assert_eq!(load(&path, &mut handle), Ok(Loaded::Reloaded));
        let handle = handle.unwrap();
        assert_eq!(handle.len(), 1);
        assert_eq!(handle.current().data(), b"blob one");
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn second_file_is_prepended_and_becomes_current() {
        let first = write_blob("first", b"first");
        let second = write_blob("second", b"second");
        let mut handle = None;
        load(&first, &mut handle).unwrap();
        assert_eq!(load(&second, &mut handle), Ok(Loaded::New));
        let inner = handle.as_ref().unwrap();
        assert_eq!(inner.len(), 2);
        assert_eq!(inner.current().data(), b"second");

        // Reloading the first file only moves the cursor.
        assert_eq!(load(&first, &mut handle), Ok(Loaded::Reloaded));
        let inner = handle.as_ref().unwrap();
        assert_eq!(inner.len(), 2);
        assert_eq!(inner.current().data(), b"first");

        std::fs::remove_file(&first).ok();
        std::fs::remove_file(&second).ok();
    }

    #[test]
    fn unload_fails_only_on_empty_handle() {
        let path = write_blob("unload", b"blob");
        let mut handle = None;
        assert_eq!(unload(&mut handle), Err(ErrorKind::Generic));
        load(&path, &mut handle).unwrap();
        assert_eq!(unload(&mut handle), Ok(()));
        assert_eq!(unload(&mut handle), Err(ErrorKind::Generic));
        std::fs::remove_file(&path).ok();
    }
}
