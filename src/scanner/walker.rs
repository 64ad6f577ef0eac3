//! Recursive directory walker: oldest-first file listing plus a
//! deepest-first directory list for the empty-directory sweep.

#![allow(missing_docs)]

use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use crate::core::errors::{EfmsError, Result};

/// One regular file found during a walk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileEntry {
    pub path: PathBuf,
    pub modified: SystemTime,
}

/// Result of walking one policy root.
#[derive(Debug, Clone, Default)]
pub struct TreeListing {
    /// Regular files, sorted by mtime ascending (oldest first).
    pub files: Vec<FileEntry>,
    /// Subdirectories, deepest first, so removing empties collapses nested
    /// chains in a single pass. The root itself is not included.
    pub dirs: Vec<PathBuf>,
    /// Subtrees that could not be read and were left out of the listing.
    pub skipped: Vec<PathBuf>,
}

/// Walk `root` recursively. Failure to read the root directory itself is an
/// error; unreadable subtrees below it are recorded in `skipped` so callers
/// can surface them.
pub fn list_tree(root: &Path) -> Result<TreeListing> {
    let mut listing = TreeListing::default();
    walk(root, true, &mut listing)?;
    listing.files.sort_by_key(|entry| entry.modified);
    listing
        .dirs
        .sort_by_key(|dir| std::cmp::Reverse(dir.components().count()));
    Ok(listing)
}

fn walk(dir: &Path, is_root: bool, listing: &mut TreeListing) -> Result<()> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if is_root => return Err(EfmsError::io(dir, e)),
        Err(_) => {
            listing.skipped.push(dir.to_path_buf());
            return Ok(());
        }
    };
    for entry in entries.flatten() {
        let path = entry.path();
        let Ok(file_type) = entry.file_type() else {
            continue;
        };
        if file_type.is_dir() {
            listing.dirs.push(path.clone());
            walk(&path, false, listing)?;
        } else if file_type.is_file() {
            // A file deleted between readdir and stat is simply gone.
            if let Ok(metadata) = entry.metadata()
                && let Ok(modified) = metadata.modified()
            {
                listing.files.push(FileEntry { path, modified });
            }
        }
    }
    Ok(())
}

/// Remove every directory in `dirs` that is empty, deepest first. Non-empty
/// directories (and any removal failure) are left alone. Returns the number
/// removed.
#[must_use]
pub fn sweep_empty_dirs(dirs: &[PathBuf]) -> usize {
    let mut removed = 0;
    for dir in dirs {
        if fs::remove_dir(dir).is_ok() {
            removed += 1;
        }
    }
    removed
}
