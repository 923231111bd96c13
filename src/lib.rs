//! Model Bazaar - registry client and content-addressable artifact cache
//!
//! Locates, verifies, caches and installs versioned model artifacts
//! (directory trees) published to a remote registry, and publishes local
//! artifacts back to it.

pub mod auth;
pub mod bazaar;
pub mod config;
pub mod error;
pub mod metrics;
pub mod models;

pub use auth::{Credentials, Session};
pub use bazaar::{Bazaar, FetchOutcome};
pub use config::ClientConfig;
pub use error::{BazaarError, Result};
pub use models::{
    AccessLevel, CancelToken, CatalogEntry, CatalogFilter, LocalCache, ModelIdentifier,
    PushRequest, RegistryClient,
};
