//! Offline catalog view built from the cache directory alone

use super::cache::{LocalCache, verify_tree};
use super::metadata::{CatalogEntry, CatalogFilter, ModelIdentifier};
use std::path::Path;
use walkdir::WalkDir;

/// Entries installed under the cache root that match `filter`
///
/// Walks exactly `<author>/<model>` and reads each `metadata.json`; no
/// network I/O. Directories at other depths, without metadata, with
/// unreadable metadata or whose metadata names a different identifier are
/// skipped. With `verify` each tree is re-hashed against its own recorded
/// hash and size, and entries that no longer match are skipped too.
///
/// Results are sorted by identifier.
pub fn scan_local_cache(cache: &LocalCache, filter: &CatalogFilter, verify: bool) -> Vec<CatalogEntry> {
    let mut entries: Vec<CatalogEntry> = WalkDir::new(cache.root())
        .min_depth(2)
        .max_depth(2)
        .into_iter()
        .filter_map(|e| match e {
            Ok(entry) => Some(entry),
            Err(e) => {
                tracing::warn!(error = %e, "Skipping unreadable cache path");
                None
            }
        })
        .filter(|e| e.file_type().is_dir())
        .filter_map(|e| read_checkpoint(cache, e.path(), verify))
        .filter(|entry| filter.matches(entry))
        .collect();

    entries.sort_by(|a, b| a.identifier.cmp(&b.identifier));
    tracing::debug!(found = entries.len(), root = %cache.root().display(), "Scanned local cache");
    entries
}

fn read_checkpoint(cache: &LocalCache, dir: &Path, verify: bool) -> Option<CatalogEntry> {
    let identifier = identifier_for(cache.root(), dir)?;
    let location = cache.location(&identifier);
    if !location.is_complete() {
        tracing::debug!(path = %dir.display(), "Skipping incomplete cache entry");
        return None;
    }

    let entry = match cache.read_metadata(&identifier) {
        Ok(Some(entry)) => entry,
        Ok(None) => return None,
        Err(e) => {
            tracing::warn!(path = %dir.display(), error = %e, "Skipping unreadable metadata");
            return None;
        }
    };

    if entry.identifier != identifier.to_string() {
        tracing::warn!(
            path = %dir.display(),
            recorded = %entry.identifier,
            "Skipping metadata recorded for another identifier"
        );
        return None;
    }

    if verify
        && let Err(e) = verify_tree(&location.artifact_dir(), &entry.content_hash, entry.size_on_disk)
    {
        tracing::warn!(identifier = %identifier, error = %e, "Cached artifact no longer matches its metadata");
        return None;
    }

    Some(entry)
}

fn identifier_for(root: &Path, dir: &Path) -> Option<ModelIdentifier> {
    let relative = dir.strip_prefix(root).ok()?;
    let mut parts = relative.iter().map(|p| p.to_str());
    let (Some(Some(author)), Some(Some(model)), None) = (parts.next(), parts.next(), parts.next())
    else {
        return None;
    };
    ModelIdentifier::new(author, model).ok()
}
