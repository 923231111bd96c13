//! Registry client facade
//!
//! Ties the catalog client, local cache, download manager and installer
//! together: "give me artifact X" either returns the cached tree or
//! downloads, unpacks and verifies it first.

use crate::auth::{self, Credentials, Session};
use crate::config::ClientConfig;
use crate::error::Result;
use crate::models::registry::DownloadDescriptor;
use crate::models::{
    ArtifactInspector, CancelToken, CatalogEntry, CatalogFilter, DownloadOutcome, IdentifierLocks,
    LocalCache, ModelIdentifier, PublishRecord, PushRequest, RegistryClient, WeightsInspector,
    download, install, publish, run_blocking, scan_local_cache, verify_tree,
};
use std::path::PathBuf;
use std::sync::Arc;

/// Result of a fetch that did not fail
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchOutcome {
    /// Installed, verified tree
    Ready(PathBuf),
    /// The caller cancelled; nothing was left in the cache
    Cancelled,
}

/// Registry client with a local artifact cache
#[derive(Clone)]
pub struct Bazaar {
    client: RegistryClient,
    cache: LocalCache,
    locks: IdentifierLocks,
    inspector: Arc<dyn ArtifactInspector>,
    block_size: usize,
    schema_version: String,
}

impl Bazaar {
    pub fn new(config: &ClientConfig) -> Result<Self> {
        Ok(Self {
            client: RegistryClient::new(config)?,
            cache: LocalCache::new(config.cache_dir.clone())?,
            locks: IdentifierLocks::new(),
            inspector: Arc::new(WeightsInspector::default()),
            block_size: config.block_size_bytes,
            schema_version: config.schema_version.clone(),
        })
    }

    /// Replace the estimator used for `num_params`/`size_in_memory` on push
    pub fn with_inspector(mut self, inspector: Arc<dyn ArtifactInspector>) -> Self {
        self.inspector = inspector;
        self
    }

    pub fn client(&self) -> &RegistryClient {
        &self.client
    }

    pub fn cache(&self) -> &LocalCache {
        &self.cache
    }

    pub async fn login(&self, credentials: &Credentials) -> Result<Session> {
        auth::login(&self.client, credentials).await
    }

    pub async fn signup(&self, credentials: &Credentials, username: &str) -> Result<()> {
        auth::signup(&self.client, credentials, username).await
    }

    /// Remote catalog entries matching `filter`
    pub async fn fetch(&self, filter: &CatalogFilter, session: Option<&Session>) -> Result<Vec<CatalogEntry>> {
        self.client.list(filter, session).await
    }

    /// Cached entries matching `filter`, without any network call
    pub async fn fetch_from_cache(&self, filter: &CatalogFilter, verify: bool) -> Result<Vec<CatalogEntry>> {
        let cache = self.cache.clone();
        let filter = filter.clone();
        run_blocking(move || Ok(scan_local_cache(&cache, &filter, verify))).await
    }

    /// Path of the installed artifact, downloading it first if needed
    ///
    /// A cached tree is only served after its hash and size were recomputed
    /// and matched against the registry's entry. Anything else (missing,
    /// tampered, partially written) is replaced by a fresh download. On
    /// cancellation or any failure the identifier's cache entry is removed,
    /// so it is never left looking valid.
    pub async fn get_model_dir<F>(
        &self,
        identifier: &ModelIdentifier,
        session: Option<&Session>,
        on_progress: F,
        cancel: &CancelToken,
    ) -> Result<FetchOutcome>
    where
        F: FnMut(f64) + Send,
    {
        let entry = self.client.lookup(identifier, session).await?;
        if let Some(path) = self.cached_dir(identifier, &entry).await? {
            return Ok(FetchOutcome::Ready(path));
        }

        let _guard = self.locks.acquire(identifier).await;

        // Another task may have installed it while we waited
        if let Some(path) = self.cached_dir(identifier, &entry).await? {
            return Ok(FetchOutcome::Ready(path));
        }

        let (entry, descriptor) = self.client.resolve(identifier, session).await?;
        tracing::info!(
            identifier = %identifier,
            hash = %entry.content_hash,
            size = entry.size_on_disk,
            "Fetching model"
        );

        match self
            .download_and_install(identifier, &entry, &descriptor, on_progress, cancel)
            .await
        {
            Ok(FetchOutcome::Ready(path)) => {
                crate::metrics::record_download(&identifier.to_string(), "completed");
                Ok(FetchOutcome::Ready(path))
            }
            Ok(FetchOutcome::Cancelled) => {
                self.discard(identifier).await;
                crate::metrics::record_download(&identifier.to_string(), "cancelled");
                Ok(FetchOutcome::Cancelled)
            }
            Err(e) => {
                tracing::warn!(identifier = %identifier, error = %e, "Fetch failed, discarding cache entry");
                self.discard(identifier).await;
                crate::metrics::record_download(&identifier.to_string(), "failed");
                Err(e)
            }
        }
    }

    async fn cached_dir(&self, identifier: &ModelIdentifier, entry: &CatalogEntry) -> Result<Option<PathBuf>> {
        let cache = self.cache.clone();
        let id = identifier.clone();
        let (hash, size) = (entry.content_hash.clone(), entry.size_on_disk);
        let valid = run_blocking(move || Ok(cache.is_valid(&id, &hash, size, true))).await?;

        if valid {
            tracing::info!(identifier = %identifier, "Serving model from cache");
            crate::metrics::record_cache_hit(&identifier.to_string());
            return Ok(Some(self.cache.location(identifier).artifact_dir()));
        }
        Ok(None)
    }

    async fn download_and_install<F>(
        &self,
        identifier: &ModelIdentifier,
        entry: &CatalogEntry,
        descriptor: &DownloadDescriptor,
        on_progress: F,
        cancel: &CancelToken,
    ) -> Result<FetchOutcome>
    where
        F: FnMut(f64) + Send,
    {
        let (cache, id) = (self.cache.clone(), identifier.clone());
        let location = run_blocking(move || cache.prepare(&id)).await?;
        let archive = location.archive_path();

        let outcome = download(
            self.client.http(),
            &descriptor.url,
            &archive,
            descriptor.archive_size,
            self.block_size,
            on_progress,
            cancel,
        )
        .await?;
        if let DownloadOutcome::Cancelled { bytes } = outcome {
            tracing::info!(identifier = %identifier, bytes, "Fetch cancelled");
            return Ok(FetchOutcome::Cancelled);
        }

        let artifact_dir = location.artifact_dir();
        let target = artifact_dir.clone();
        let (cache, id, recorded) = (self.cache.clone(), identifier.clone(), entry.clone());
        run_blocking(move || {
            install(&archive, &target)?;
            verify_tree(&target, &recorded.content_hash, recorded.size_on_disk)?;
            cache.write_metadata(&id, &recorded)
        })
        .await?;

        tracing::info!(identifier = %identifier, path = %artifact_dir.display(), "Model ready");
        Ok(FetchOutcome::Ready(artifact_dir))
    }

    /// Best-effort removal of a failed or cancelled fetch
    async fn discard(&self, identifier: &ModelIdentifier) {
        let (cache, id) = (self.cache.clone(), identifier.clone());
        let result = run_blocking(move || {
            cache.discard(&id);
            Ok(())
        })
        .await;
        if let Err(e) = result {
            tracing::warn!(identifier = %identifier, error = %e, "Failed to discard partial cache entry");
        }
    }

    /// Whether `identifier` is installed
    ///
    /// Strict mode re-hashes the tree against its own recorded metadata;
    /// loose mode only checks that a complete install is present.
    pub async fn is_cached(&self, identifier: &ModelIdentifier, strict: bool) -> Result<bool> {
        let (cache, id) = (self.cache.clone(), identifier.clone());
        run_blocking(move || {
            if !strict {
                return Ok(cache.is_valid(&id, "", 0, false));
            }
            let Some(recorded) = cache.read_metadata(&id)? else {
                return Ok(false);
            };
            Ok(cache.is_valid(&id, &recorded.content_hash, recorded.size_on_disk, true))
        })
        .await
    }

    pub fn resolve_path(&self, identifier: &ModelIdentifier) -> Option<PathBuf> {
        self.cache.resolve_path(identifier)
    }

    /// Uninstall a cached artifact; waits for any fetch of it to finish
    pub async fn remove(&self, identifier: &ModelIdentifier) -> Result<bool> {
        let _guard = self.locks.acquire(identifier).await;
        let (cache, id) = (self.cache.clone(), identifier.clone());
        run_blocking(move || cache.remove(&id)).await
    }

    /// Drop every cached artifact
    ///
    /// Waits for fetches that already hold an identifier lock. A fetch that
    /// takes its lock after the cache was emptied downloads again.
    pub async fn clear(&self) -> Result<()> {
        let guards = self.locks.acquire_all().await;
        let cache = self.cache.clone();
        run_blocking(move || cache.clear()).await?;
        drop(guards);
        self.locks.prune();
        tracing::info!(root = %self.cache.root().display(), "Cleared cache");
        Ok(())
    }

    /// Publish a local artifact under the session's namespace
    pub async fn push(&self, session: &Session, request: &PushRequest) -> Result<PublishRecord> {
        publish::push(
            &self.client,
            session,
            request,
            self.inspector.clone(),
            &self.schema_version,
        )
        .await
    }

    /// Delete a published artifact from the registry; the local copy stays
    pub async fn delete(&self, session: &Session, identifier: &ModelIdentifier) -> Result<()> {
        self.client.delete(session, identifier).await
    }
}

impl std::fmt::Debug for Bazaar {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Bazaar")
            .field("base_url", &self.client.base_url().as_str())
            .field("cache_root", &self.cache.root())
            .field("block_size", &self.block_size)
            .finish()
    }
}
