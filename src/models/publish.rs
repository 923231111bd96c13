//! Push path: hash, dedup check, upload, register
//!
//! Each step is a hard precondition for the next. A failure while
//! registering metadata after a successful upload leaves an orphaned blob
//! on the server; that is logged but not cleaned up from here.

use super::hashing::{hash_tree, size_of_tree};
use super::install::create_archive;
use super::metadata::AccessLevel;
use super::registry::{PublishRecord, RegistryClient};
use super::run_blocking;
use crate::auth::Session;
use crate::error::{BazaarError, Result};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use walkdir::WalkDir;

/// Runtime characteristics derived from an artifact tree
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ArtifactProfile {
    pub num_params: u64,
    pub size_in_memory: u64,
}

/// Derives parameter count and memory footprint from an artifact
///
/// The artifact format is opaque to the registry client, so the estimate
/// is pluggable.
pub trait ArtifactInspector: Send + Sync {
    fn inspect(&self, artifact: &Path) -> Result<ArtifactProfile>;
}

/// Estimate from file sizes alone
///
/// Files named in `weight_files` are f32 weights: one parameter per four
/// bytes, and `weight_multiplier` copies resident once loaded (optimizer
/// state). Every other file counts once.
#[derive(Debug, Clone)]
pub struct WeightsInspector {
    pub weight_files: Vec<String>,
    pub weight_multiplier: u64,
}

impl Default for WeightsInspector {
    fn default() -> Self {
        Self {
            weight_files: vec!["model.pkl".to_string()],
            weight_multiplier: 4,
        }
    }
}

impl ArtifactInspector for WeightsInspector {
    fn inspect(&self, artifact: &Path) -> Result<ArtifactProfile> {
        let mut weights = 0u64;
        let mut other = 0u64;

        for entry in WalkDir::new(artifact).follow_links(true) {
            let entry = entry.map_err(std::io::Error::from)?;
            if !entry.file_type().is_file() {
                continue;
            }
            let len = entry.metadata().map_err(std::io::Error::from)?.len();
            let is_weights = entry
                .file_name()
                .to_str()
                .is_some_and(|name| self.weight_files.iter().any(|w| w == name));
            if is_weights {
                weights += len;
            } else {
                other += len;
            }
        }

        Ok(ArtifactProfile {
            num_params: weights / 4,
            size_in_memory: weights.saturating_mul(self.weight_multiplier) + other,
        })
    }
}

/// What to publish and under which name
#[derive(Debug, Clone)]
pub struct PushRequest {
    pub local_path: PathBuf,
    pub name: String,
    pub trained_on: String,
    pub access_level: AccessLevel,
    pub description: Option<String>,
    pub is_indexed: bool,
}

impl PushRequest {
    pub fn new(local_path: impl Into<PathBuf>, name: impl Into<String>, trained_on: impl Into<String>) -> Self {
        Self {
            local_path: local_path.into(),
            name: name.into(),
            trained_on: trained_on.into(),
            access_level: AccessLevel::default(),
            description: None,
            is_indexed: false,
        }
    }
}

/// Publish a local artifact, returning the registered record
///
/// Fails with [`BazaarError::Duplicate`] before anything is uploaded if
/// the caller already published an artifact with the same hash. The
/// transient archive is removed whatever the outcome.
pub async fn push(
    client: &RegistryClient,
    session: &Session,
    request: &PushRequest,
    inspector: Arc<dyn ArtifactInspector>,
    schema_version: &str,
) -> Result<PublishRecord> {
    let result = push_inner(client, session, request, inspector, schema_version).await;
    match &result {
        Ok(_) => crate::metrics::record_push("published"),
        Err(BazaarError::Duplicate { .. }) => crate::metrics::record_push("duplicate"),
        Err(_) => crate::metrics::record_push("failed"),
    }
    result
}

async fn push_inner(
    client: &RegistryClient,
    session: &Session,
    request: &PushRequest,
    inspector: Arc<dyn ArtifactInspector>,
    schema_version: &str,
) -> Result<PublishRecord> {
    let local_path = request.local_path.clone();
    if !fs::metadata(&local_path).map(|m| m.is_dir()).unwrap_or(false) {
        return Err(BazaarError::NotFound(local_path.display().to_string()));
    }

    // (a) hash the tree as it will be unpacked by consumers
    let tree = local_path.clone();
    let (hash, size) = run_blocking(move || Ok((hash_tree(&tree)?, size_of_tree(&tree)?))).await?;
    tracing::info!(path = %local_path.display(), hash = %hash, size, "Hashed artifact");

    // (b) dedup within the caller's namespace
    if client.hash_exists(session, &hash).await? {
        tracing::warn!(hash = %hash, "Artifact already published");
        return Err(BazaarError::Duplicate { hash });
    }

    let tree = local_path.clone();
    let profile = run_blocking(move || inspector.inspect(&tree)).await?;

    let staging = tempfile::tempdir()?;
    let archive = staging.path().join(format!("{}.zip", request.name));
    let (source, target) = (local_path.clone(), archive.clone());
    let archive_size = run_blocking(move || create_archive(&source, &target)).await?;

    // (c) signed upload slot
    let upload_url = client.upload_url(session, &request.name, archive_size).await?;

    // (d) upload
    tracing::info!(name = %request.name, bytes = archive_size, "Uploading archive");
    client.upload_archive(&upload_url, &archive).await?;

    // (e) register
    let record = PublishRecord {
        name: request.name.clone(),
        trained_on: request.trained_on.clone(),
        num_params: profile.num_params,
        is_indexed: request.is_indexed,
        size,
        size_in_memory: profile.size_in_memory,
        hash,
        access_level: request.access_level,
        description: request.description.clone(),
        schema_version: schema_version.to_string(),
    };
    if let Err(e) = client.register(session, &record).await {
        tracing::warn!(
            name = %request.name,
            hash = %record.hash,
            error = %e,
            "Upload succeeded but registration failed; the uploaded blob is orphaned"
        );
        return Err(e);
    }

    tracing::info!(name = %record.name, hash = %record.hash, "Published artifact");
    Ok(record)
}
