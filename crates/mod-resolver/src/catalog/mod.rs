//! Mod catalog access
//!
//! The catalog is the remote service holding mod metadata and configuration
//! scripts. Both bulk lookups silently omit identifiers they do not know and
//! fail as a unit on transport errors.

pub mod http;

pub use http::HttpModCatalog;

use crate::core::{ModConfigScript, ModId, ModMetadata, Result};
use async_trait::async_trait;
use std::sync::Arc;

/// Remote collaborator supplying mod records and scripts
#[async_trait]
pub trait ModCatalog: Send + Sync {
    /// Metadata for each known id
    async fn fetch_metadata(&self, ids: &[ModId]) -> Result<Vec<ModMetadata>>;

    /// Configuration script for each known id
    async fn fetch_config_scripts(&self, ids: &[ModId]) -> Result<Vec<ModConfigScript>>;

    /// Free-text search over the catalog
    async fn search(&self, text: &str) -> Result<Vec<ModMetadata>>;
}

#[async_trait]
impl<T: ModCatalog + ?Sized> ModCatalog for Arc<T> {
    async fn fetch_metadata(&self, ids: &[ModId]) -> Result<Vec<ModMetadata>> {
        (**self).fetch_metadata(ids).await
    }

    async fn fetch_config_scripts(&self, ids: &[ModId]) -> Result<Vec<ModConfigScript>> {
        (**self).fetch_config_scripts(ids).await
    }

    async fn search(&self, text: &str) -> Result<Vec<ModMetadata>> {
        (**self).search(text).await
    }
}
