//! Content hashing and sizing of artifact directory trees
//!
//! The digest covers every directory and file below the root, visited in
//! file-name order at each level, so it is independent of the order in
//! which the filesystem returns entries. Each file contributes its relative
//! path, its length and its contents; each directory contributes its
//! relative path. Renaming, moving, adding, removing or editing anything
//! below the root changes the digest.

use crate::error::Result;
use sha2::{Digest, Sha256};
use std::fs::File;
use std::io;
use std::path::Path;
use walkdir::WalkDir;

/// Hex-encoded SHA-256 digest over the tree at `root`
///
/// An unreadable entry anywhere in the tree fails the whole operation; a
/// partial digest is never returned. `root` must be a directory.
pub fn hash_tree(root: &Path) -> Result<String> {
    ensure_dir(root)?;
    let mut hasher = Sha256::new();

    for entry in WalkDir::new(root)
        .min_depth(1)
        .follow_links(true)
        .sort_by_file_name()
    {
        let entry = entry.map_err(io::Error::from)?;
        let relative = relative_key(root, entry.path());

        if entry.file_type().is_dir() {
            hasher.update(b"D\0");
            hasher.update(relative.as_bytes());
            hasher.update(b"\0");
        } else {
            let mut file = File::open(entry.path())?;
            let len = file.metadata()?.len();
            hasher.update(b"F\0");
            hasher.update(relative.as_bytes());
            hasher.update(b"\0");
            hasher.update(len.to_le_bytes());
            io::copy(&mut file, &mut hasher)?;
        }
    }

    Ok(hex::encode(hasher.finalize()))
}

/// Total size in bytes of all files below `root`
pub fn size_of_tree(root: &Path) -> Result<u64> {
    ensure_dir(root)?;
    let mut size = 0;

    for entry in WalkDir::new(root).min_depth(1).follow_links(true) {
        let entry = entry.map_err(io::Error::from)?;
        if entry.file_type().is_file() {
            size += entry.metadata().map_err(io::Error::from)?.len();
        }
    }

    Ok(size)
}

fn ensure_dir(root: &Path) -> Result<()> {
    if !std::fs::metadata(root)?.is_dir() {
        return Err(io::Error::new(
            io::ErrorKind::NotADirectory,
            format!("{} is not a directory", root.display()),
        )
        .into());
    }
    Ok(())
}

/// Relative path with `/` separators regardless of platform
fn relative_key(root: &Path, path: &Path) -> String {
    let relative = path.strip_prefix(root).unwrap_or(path);
    relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}
