//! Catalog manifest
//!
//! `catalog.json` pins the settings every shard of a catalog was written
//! with. Appending with a different indexer, depth, store, or schema would
//! silently scatter rows into cells that no reader looks at, so any
//! difference is fatal.

use crate::error::ConfigError;
use crate::record::CatalogSchema;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::{self, Write};
use std::path::Path;
use tracing::info;

/// Bumped when the on-disk catalog layout changes
pub const MANIFEST_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogManifest {
    pub format_version: u32,
    pub indexer: String,
    pub depth: u8,
    pub store: String,
    pub schema: CatalogSchema,
    pub created_at: DateTime<Utc>,
    pub tool_version: String,
}

impl CatalogManifest {
    pub fn new(indexer: &str, depth: u8, store: &str, schema: CatalogSchema) -> Self {
        Self {
            format_version: MANIFEST_VERSION,
            indexer: indexer.to_string(),
            depth,
            store: store.to_string(),
            schema,
            created_at: Utc::now(),
            tool_version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }

    /// Read a manifest; `Ok(None)` when the catalog has none yet
    pub fn load(path: &Path) -> Result<Option<Self>, ConfigError> {
        let text = match fs::read_to_string(path) {
            Ok(text) => text,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(incompatible(path, format!("unreadable manifest: {}", e))),
        };

        serde_json::from_str(&text)
            .map(Some)
            .map_err(|e| incompatible(path, format!("corrupt manifest: {}", e)))
    }

    /// Describe the first setting that differs, if any
    pub fn difference(&self, other: &CatalogManifest) -> Option<String> {
        if self.format_version != other.format_version {
            return Some(format!(
                "catalog format version {} (this build writes {})",
                self.format_version, other.format_version
            ));
        }
        if self.indexer != other.indexer {
            return Some(format!(
                "catalog uses indexer '{}', run requested '{}'",
                self.indexer, other.indexer
            ));
        }
        if self.depth != other.depth {
            return Some(format!(
                "catalog uses depth {}, run requested {}",
                self.depth, other.depth
            ));
        }
        if self.store != other.store {
            return Some(format!(
                "catalog uses store '{}', run requested '{}'",
                self.store, other.store
            ));
        }
        if self.schema != other.schema {
            return Some(format!(
                "schema differs: catalog [{}], run [{}]",
                self.schema.describe(),
                other.schema.describe()
            ));
        }
        None
    }

    /// Create the manifest on first use, otherwise verify it matches
    pub fn load_or_create(path: &Path, expected: CatalogManifest) -> Result<Self, ConfigError> {
        if let Some(existing) = Self::load(path)? {
            return existing.verified(path, &expected);
        }

        match expected.create(path) {
            Ok(()) => {
                info!(path = %path.display(), "Created catalog manifest");
                Ok(expected)
            }
            // Another process created it first
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => match Self::load(path)? {
                Some(existing) => existing.verified(path, &expected),
                None => Err(incompatible(path, "manifest vanished during creation")),
            },
            Err(e) => Err(ConfigError::InvalidOutputRoot {
                path: path.to_path_buf(),
                reason: format!("cannot write manifest: {}", e),
            }),
        }
    }

    fn verified(self, path: &Path, expected: &CatalogManifest) -> Result<Self, ConfigError> {
        match self.difference(expected) {
            Some(reason) => Err(incompatible(path, reason)),
            None => Ok(self),
        }
    }

    /// Write atomically without replacing an existing manifest
    fn create(&self, path: &Path) -> io::Result<()> {
        let dir = path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));

        let json = serde_json::to_string_pretty(self).map_err(io::Error::other)?;
        let mut temp = tempfile::NamedTempFile::new_in(dir)?;
        temp.write_all(json.as_bytes())?;
        temp.write_all(b"\n")?;
        temp.as_file().sync_all()?;
        temp.persist_noclobber(path).map_err(|e| e.error)?;
        Ok(())
    }
}

fn incompatible(path: &Path, reason: impl Into<String>) -> ConfigError {
    ConfigError::IncompatibleCatalog {
        path: path.to_path_buf(),
        reason: reason.into(),
    }
}
