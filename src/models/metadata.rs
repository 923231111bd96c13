//! Catalog entry metadata
//!
//! Describes published artifacts as returned by the registry and as recorded
//! next to each installed artifact in the local cache (`metadata.json`).
//! The same wire shape is used for both, so an entry can be rebuilt offline
//! from disk exactly as it was resolved online.

use crate::error::{BazaarError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Visibility of a published artifact
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum AccessLevel {
    /// Available for everyone
    #[default]
    Public,
    /// Available only within the author's organization
    Protected,
    /// Available only for the author
    Private,
}

impl fmt::Display for AccessLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Public => write!(f, "public"),
            Self::Protected => write!(f, "protected"),
            Self::Private => write!(f, "private"),
        }
    }
}

impl FromStr for AccessLevel {
    type Err = BazaarError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "public" => Ok(Self::Public),
            "protected" => Ok(Self::Protected),
            "private" => Ok(Self::Private),
            other => Err(BazaarError::MalformedResponse(format!(
                "unknown access level '{}'",
                other
            ))),
        }
    }
}

/// An `author/model` identifier, validated so it can be used as a cache path
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ModelIdentifier {
    author: String,
    model: String,
}

impl ModelIdentifier {
    pub fn new(author: &str, model: &str) -> Result<Self> {
        let joined = format!("{}/{}", author, model);
        if !is_valid_segment(author) || !is_valid_segment(model) {
            return Err(BazaarError::InvalidIdentifier(joined));
        }
        Ok(Self {
            author: author.to_string(),
            model: model.to_string(),
        })
    }

    pub fn author(&self) -> &str {
        &self.author
    }

    pub fn model(&self) -> &str {
        &self.model
    }
}

impl FromStr for ModelIdentifier {
    type Err = BazaarError;

    fn from_str(s: &str) -> Result<Self> {
        match s.split_once('/') {
            Some((author, model)) => {
                Self::new(author, model).map_err(|_| BazaarError::InvalidIdentifier(s.to_string()))
            }
            None => Err(BazaarError::InvalidIdentifier(s.to_string())),
        }
    }
}

impl fmt::Display for ModelIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.author, self.model)
    }
}

/// A segment becomes a directory name under the cache root
fn is_valid_segment(segment: &str) -> bool {
    !segment.is_empty()
        && segment != "."
        && segment != ".."
        && segment
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'))
}

/// Description of a published artifact
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogEntry {
    pub model_name: String,
    /// `author/model`; the registry calls this the saved path
    #[serde(rename = "saved_path")]
    pub identifier: String,
    /// Digest of the artifact's directory tree (see [`super::hashing::hash_tree`])
    #[serde(rename = "hash")]
    pub content_hash: String,
    /// Total bytes of the unpacked tree
    #[serde(rename = "size")]
    pub size_on_disk: u64,
    /// Estimated runtime footprint
    pub size_in_memory: u64,
    #[serde(default)]
    pub num_params: u64,
    pub domain: String,
    pub trained_on: String,
    #[serde(default)]
    pub access_level: AccessLevel,
    pub publish_date: String,
    pub author_email: String,
    pub author_username: String,
    #[serde(alias = "thirdai_version")]
    pub schema_version: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub is_indexed: bool,
}

impl CatalogEntry {
    /// Build an entry from a raw registry record
    ///
    /// Fails on missing fields, wrong types, an unknown access level or an
    /// identifier that cannot address a cache directory.
    pub fn from_value(value: serde_json::Value) -> Result<Self> {
        let entry: CatalogEntry = serde_json::from_value(value)
            .map_err(|e| BazaarError::MalformedResponse(e.to_string()))?;
        entry.model_identifier()?;
        if entry.content_hash.is_empty() {
            return Err(BazaarError::MalformedResponse(format!(
                "entry '{}' has an empty hash",
                entry.identifier
            )));
        }
        Ok(entry)
    }

    /// Parse records one by one, dropping those that fail validation
    ///
    /// One bad record must not hide the rest of the catalog.
    pub fn parse_list(values: Vec<serde_json::Value>) -> Vec<CatalogEntry> {
        values
            .into_iter()
            .filter(|v| !v.is_null())
            .filter_map(|v| match CatalogEntry::from_value(v) {
                Ok(entry) => Some(entry),
                Err(e) => {
                    tracing::warn!(error = %e, "Dropping malformed catalog entry");
                    crate::metrics::record_entry_dropped();
                    None
                }
            })
            .collect()
    }

    pub fn model_identifier(&self) -> Result<ModelIdentifier> {
        self.identifier.parse()
    }
}

/// Filters shared by remote listing and offline cache scans
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CatalogFilter {
    /// Case-insensitive substring of the model name; empty matches all
    pub name: String,
    pub domain: Option<String>,
    pub username: Option<String>,
    /// Only honoured for authenticated listings and local scans
    pub access_levels: Option<Vec<AccessLevel>>,
}

impl CatalogFilter {
    pub fn with_name(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn matches(&self, entry: &CatalogEntry) -> bool {
        let name_ok = entry
            .model_name
            .to_lowercase()
            .contains(&self.name.to_lowercase());
        let username_ok = self
            .username
            .as_deref()
            .is_none_or(|u| u == entry.author_username);
        let domain_ok = self.domain.as_deref().is_none_or(|d| d == entry.domain);
        let access_ok = match &self.access_levels {
            Some(levels) if !levels.is_empty() => levels.contains(&entry.access_level),
            _ => true,
        };

        name_ok && username_ok && domain_ok && access_ok
    }
}
