//! Path traversal: splits a path into its parent directory and final
//! component, walking every intermediate component through directory
//! lookups.
//!
//! The caller decides what to do with the final component (`lookup`, `add`
//! or `remove`); this module never touches it. A path ending in `/` (and
//! the root path itself) yields a final component of `"."`.

use std::sync::Arc;

use crate::directory::Directory;
use crate::inode::InodeStore;
use crate::{FsError, Result, NAME_MAX};

/// Resolves `path` to `(parent directory, final component)`.
///
/// Absolute paths start from the root; relative paths start from `cwd`, or
/// from the root when the caller has no working directory. Handles opened
/// while descending are closed as soon as the walk moves past them.
pub fn resolve<'p>(
    store: &Arc<InodeStore>,
    path: &'p str,
    cwd: Option<&Directory>,
) -> Result<(Directory, &'p str)> {
    if path.is_empty() {
        return Err(FsError::InvalidPath);
    }

    let mut dir = if path.starts_with('/') {
        Directory::open_root(store)?
    } else {
        match cwd {
            Some(cwd) => cwd.reopen(),
            None => Directory::open_root(store)?,
        }
    };

    let (dir_path, mut last) = match path.rsplit_once('/') {
        Some(split) => split,
        None => ("", path),
    };
    if last.is_empty() {
        // "/", or a trailing slash: operate on the directory itself.
        last = ".";
    }
    if last.len() > NAME_MAX {
        return Err(FsError::InvalidName);
    }

    for component in dir_path.split('/').filter(|c| !c.is_empty()) {
        let inum = dir.lookup(component)?;
        let inode = store.open(inum)?;
        // Descending through a file is the caller's mistake, not ours.
        dir = Directory::open(inode)?;
    }

    Ok((dir, last))
}
