//! Model artifact management
//!
//! Provides functionality for:
//! - Hashing and sizing artifact directory trees
//! - Querying the registry catalog and resolving signed download URLs
//! - Downloading archives block by block with cancellation
//! - Unpacking archives into the local cache atomically
//! - Rebuilding the catalog offline from cached metadata
//! - Publishing local artifacts to the registry

pub mod cache;
pub mod download;
pub mod hashing;
pub mod install;
pub mod locks;
pub mod metadata;
pub mod publish;
pub mod registry;
pub mod scanner;

pub use cache::{CacheLocation, LocalCache, verify_tree};
pub use download::{CancelToken, DownloadOutcome, download};
pub use hashing::{hash_tree, size_of_tree};
pub use install::{create_archive, install};
pub use locks::IdentifierLocks;
pub use metadata::{AccessLevel, CatalogEntry, CatalogFilter, ModelIdentifier};
pub use publish::{ArtifactInspector, ArtifactProfile, PushRequest, WeightsInspector, push};
pub use registry::{DownloadDescriptor, PublishRecord, RegistryClient};
pub use scanner::scan_local_cache;

use crate::error::{BazaarError, Result};

/// Run filesystem-heavy work (hashing, zip) off the async workers
pub(crate) async fn run_blocking<T, F>(f: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| BazaarError::Io(std::io::Error::other(e)))?
}
