//! Local artifact cache
//!
//! Cache structure:
//! ```text
//! <cache_root>/
//! ├── alice/
//! │   └── search-v2/
//! │       ├── model-artifact/        installed tree
//! │       ├── model-archive.zip      transient, only while downloading
//! │       └── metadata.json          written last, after verification
//! └── bob/
//!     └── ...
//! ```
//!
//! An identifier is cached only when both `model-artifact/` and
//! `metadata.json` are present. Metadata is written after the installed
//! tree was verified and removed before the tree is, so an interrupted
//! install or removal is always observed as "not cached".

use super::hashing::{hash_tree, size_of_tree};
use super::metadata::{CatalogEntry, ModelIdentifier};
use crate::error::{BazaarError, Result};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

pub const ARTIFACT_DIR: &str = "model-artifact";
pub const ARCHIVE_FILE: &str = "model-archive.zip";
pub const METADATA_FILE: &str = "metadata.json";

/// Paths derived from an identifier; nothing here is stored
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheLocation {
    checkpoint_dir: PathBuf,
}

impl CacheLocation {
    /// `<cache_root>/<author>/<model>`
    pub fn checkpoint_dir(&self) -> &Path {
        &self.checkpoint_dir
    }

    pub fn artifact_dir(&self) -> PathBuf {
        self.checkpoint_dir.join(ARTIFACT_DIR)
    }

    pub fn archive_path(&self) -> PathBuf {
        self.checkpoint_dir.join(ARCHIVE_FILE)
    }

    pub fn metadata_path(&self) -> PathBuf {
        self.checkpoint_dir.join(METADATA_FILE)
    }

    /// Sibling the installer unpacks into before renaming into place
    pub fn staging_dir(&self) -> PathBuf {
        self.checkpoint_dir.join(format!("{}.partial", ARTIFACT_DIR))
    }

    /// Both halves of a complete install are present
    pub fn is_complete(&self) -> bool {
        self.artifact_dir().is_dir() && self.metadata_path().is_file()
    }
}

/// Two-level `<author>/<model>` store of installed artifacts
#[derive(Debug, Clone)]
pub struct LocalCache {
    root: PathBuf,
}

impl LocalCache {
    /// Open the cache at `root`, creating the directory if needed
    pub fn new(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn location(&self, identifier: &ModelIdentifier) -> CacheLocation {
        CacheLocation {
            checkpoint_dir: self.root.join(identifier.author()).join(identifier.model()),
        }
    }

    /// Whether `identifier` can be served from the cache
    ///
    /// Loose mode only requires a complete install. Strict mode also
    /// recomputes the tree's hash and size and compares them with the
    /// expected values; any error while doing so counts as invalid.
    pub fn is_valid(
        &self,
        identifier: &ModelIdentifier,
        expected_hash: &str,
        expected_size: u64,
        strict: bool,
    ) -> bool {
        let location = self.location(identifier);
        if !location.is_complete() {
            return false;
        }
        if !strict {
            return true;
        }

        match verify_tree(&location.artifact_dir(), expected_hash, expected_size) {
            Ok(()) => true,
            Err(e) => {
                tracing::debug!(identifier = %identifier, error = %e, "Cached artifact failed verification");
                false
            }
        }
    }

    /// Path of the installed artifact, if the install is complete
    pub fn resolve_path(&self, identifier: &ModelIdentifier) -> Option<PathBuf> {
        let location = self.location(identifier);
        location.is_complete().then(|| location.artifact_dir())
    }

    /// Recorded metadata for an installed artifact
    pub fn read_metadata(&self, identifier: &ModelIdentifier) -> Result<Option<CatalogEntry>> {
        let path = self.location(identifier).metadata_path();
        if !path.is_file() {
            return Ok(None);
        }
        let content = fs::read_to_string(&path)?;
        let value: serde_json::Value = serde_json::from_str(&content)?;
        CatalogEntry::from_value(value).map(Some)
    }

    /// Record metadata for a verified install (temp file, then rename)
    pub fn write_metadata(&self, identifier: &ModelIdentifier, entry: &CatalogEntry) -> Result<()> {
        let path = self.location(identifier).metadata_path();
        let temp_file = path.with_extension("tmp");

        let mut file = fs::File::create(&temp_file)?;
        file.write_all(serde_json::to_string_pretty(entry)?.as_bytes())?;
        file.sync_all()?;
        drop(file);

        fs::rename(&temp_file, &path)?;
        Ok(())
    }

    /// Clear any previous state for `identifier` and create its checkpoint dir
    pub fn prepare(&self, identifier: &ModelIdentifier) -> Result<CacheLocation> {
        let location = self.location(identifier);
        if location.checkpoint_dir().exists() {
            self.remove(identifier)?;
        }
        fs::create_dir_all(location.checkpoint_dir())?;
        Ok(location)
    }

    /// Remove an artifact and its metadata
    ///
    /// Metadata goes first: if removing the tree fails partway, the entry
    /// is already invalid. Returns whether anything was there.
    pub fn remove(&self, identifier: &ModelIdentifier) -> Result<bool> {
        let location = self.location(identifier);
        if !location.checkpoint_dir().exists() {
            return Ok(false);
        }

        let metadata = location.metadata_path();
        if metadata.exists() {
            fs::remove_file(&metadata)?;
        }
        fs::remove_dir_all(location.checkpoint_dir())?;

        // Drop the author directory once its last model is gone
        if let Some(author_dir) = location.checkpoint_dir().parent()
            && author_dir != self.root
            && fs::read_dir(author_dir).map(|mut d| d.next().is_none()).unwrap_or(false)
        {
            let _ = fs::remove_dir(author_dir);
        }

        tracing::info!(identifier = %identifier, "Removed cached model");
        Ok(true)
    }

    /// Best-effort cleanup after a failed or cancelled fetch
    pub fn discard(&self, identifier: &ModelIdentifier) {
        if let Err(e) = self.remove(identifier) {
            tracing::warn!(identifier = %identifier, error = %e, "Failed to discard partial cache entry");
        }
    }

    /// Remove every cached artifact
    pub fn clear(&self) -> Result<()> {
        for entry in fs::read_dir(&self.root)? {
            let path = entry?.path();
            if path.is_dir() {
                fs::remove_dir_all(&path)?;
            } else {
                fs::remove_file(&path)?;
            }
        }
        Ok(())
    }
}

/// Compare a tree's fresh hash and size with expected values
pub fn verify_tree(path: &Path, expected_hash: &str, expected_size: u64) -> Result<()> {
    let actual_size = size_of_tree(path)?;
    if actual_size != expected_size {
        return Err(BazaarError::SizeMismatch {
            expected: expected_size,
            actual: actual_size,
        });
    }

    let actual_hash = hash_tree(path)?;
    if actual_hash != expected_hash {
        return Err(BazaarError::HashMismatch {
            expected: expected_hash.to_string(),
            actual: actual_hash,
        });
    }

    Ok(())
}
