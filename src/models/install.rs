//! Archive unpacking and packing
//!
//! Installs unpack into a `.partial` sibling of the target directory and
//! rename it into place once every entry was written, so the target is
//! either absent or complete. The archive is removed after the rename.

use crate::error::{BazaarError, Result};
use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;
use zip::ZipArchive;
use zip::write::{FileOptions, ZipWriter};

/// Unpack `archive` into `target_dir`, then delete `archive`
///
/// Only call after the download was reported complete. On failure the
/// staging directory is removed and `target_dir` is left untouched; the
/// caller decides whether to discard the cache entry before retrying.
pub fn install(archive: &Path, target_dir: &Path) -> Result<PathBuf> {
    let staging = staging_path(target_dir);
    if staging.exists() {
        fs::remove_dir_all(&staging)?;
    }
    fs::create_dir_all(&staging)?;

    if let Err(e) = extract_zip(archive, &staging) {
        if let Err(cleanup) = fs::remove_dir_all(&staging) {
            tracing::warn!(path = %staging.display(), error = %cleanup, "Failed to remove staging directory");
        }
        return Err(BazaarError::Unpack(format!("{}: {}", archive.display(), e)));
    }

    if target_dir.exists() {
        fs::remove_dir_all(target_dir)?;
    }
    fs::rename(&staging, target_dir)?;
    fs::remove_file(archive)?;

    tracing::info!(target = %target_dir.display(), "Installed artifact");
    Ok(target_dir.to_path_buf())
}

fn staging_path(target_dir: &Path) -> PathBuf {
    let mut name = target_dir
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".partial");
    target_dir.with_file_name(name)
}

fn extract_zip(archive: &Path, destination: &Path) -> Result<()> {
    let file = File::open(archive)?;
    let mut zip = ZipArchive::new(file)?;

    for i in 0..zip.len() {
        let mut entry = zip.by_index(i)?;
        let relative = entry
            .enclosed_name()
            .map(Path::to_path_buf)
            .ok_or_else(|| BazaarError::Unpack(format!("unsafe entry path '{}'", entry.name())))?;
        let dest = destination.join(relative);

        if entry.is_dir() {
            fs::create_dir_all(&dest)?;
        } else {
            if let Some(parent) = dest.parent() {
                fs::create_dir_all(parent)?;
            }
            let mut outfile = File::create(&dest)?;
            io::copy(&mut entry, &mut outfile)?;
        }
    }

    Ok(())
}

/// Pack the tree at `source_dir` into a zip at `archive`, returning its size
///
/// Entry names are relative to `source_dir`, so unpacking reproduces the
/// tree (and its hash) exactly.
pub fn create_archive(source_dir: &Path, archive: &Path) -> Result<u64> {
    let file = File::create(archive)?;
    let mut zip = ZipWriter::new(file);
    let options = FileOptions::default().compression_method(zip::CompressionMethod::Deflated);

    for entry in WalkDir::new(source_dir)
        .min_depth(1)
        .follow_links(true)
        .sort_by_file_name()
    {
        let entry = entry.map_err(io::Error::from)?;
        let name = entry
            .path()
            .strip_prefix(source_dir)
            .unwrap_or(entry.path())
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");

        if entry.file_type().is_dir() {
            zip.add_directory(format!("{}/", name), options)?;
        } else {
            let mut source = File::open(entry.path())?;
            let large = source.metadata()?.len() >= u64::from(u32::MAX);
            zip.start_file(name, options.large_file(large))?;
            io::copy(&mut source, &mut zip)?;
        }
    }

    zip.finish()?;
    Ok(fs::metadata(archive)?.len())
}
