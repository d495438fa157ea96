//! Strategy registry
//!
//! Maps configuration names to spatial indexers, row sources, and shard
//! stores. A registry is built once at startup and handed to the
//! coordinator; nothing is looked up through global state.

use crate::error::ConfigError;
use crate::index::{GridIndexer, HtmIndexer, SpatialIndexer, MAX_INDEX_DEPTH};
use crate::shard::{ParquetStore, ShardStore};
use crate::source::{CsvSource, ParquetSource, RowSource};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

/// Builds an indexer for a depth
pub type IndexerFactory = fn(u8) -> Result<Arc<dyn SpatialIndexer>, crate::error::IndexError>;

fn htm(depth: u8) -> Result<Arc<dyn SpatialIndexer>, crate::error::IndexError> {
    Ok(Arc::new(HtmIndexer::new(depth)?))
}

fn grid(depth: u8) -> Result<Arc<dyn SpatialIndexer>, crate::error::IndexError> {
    Ok(Arc::new(GridIndexer::new(depth)?))
}

#[derive(Clone)]
pub struct Registry {
    indexers: BTreeMap<&'static str, IndexerFactory>,
    sources: Vec<Arc<dyn RowSource>>,
    stores: BTreeMap<&'static str, Arc<dyn ShardStore>>,
}

impl Default for Registry {
    fn default() -> Self {
        let mut registry = Self::empty();
        registry.register_indexer(HtmIndexer::NAME, htm);
        registry.register_indexer(GridIndexer::NAME, grid);
        registry.register_source(Arc::new(CsvSource::default()));
        registry.register_source(Arc::new(CsvSource::tsv()));
        registry.register_source(Arc::new(ParquetSource::default()));
        registry.register_store(Arc::new(ParquetStore::default()));
        registry
    }
}

impl Registry {
    /// Registry with nothing registered
    pub fn empty() -> Self {
        Self {
            indexers: BTreeMap::new(),
            sources: Vec::new(),
            stores: BTreeMap::new(),
        }
    }

    pub fn register_indexer(&mut self, name: &'static str, factory: IndexerFactory) {
        self.indexers.insert(name, factory);
    }

    /// Add a row source, replacing any source with the same name
    pub fn register_source(&mut self, source: Arc<dyn RowSource>) {
        self.sources.retain(|s| s.name() != source.name());
        self.sources.push(source);
    }

    pub fn register_store(&mut self, store: Arc<dyn ShardStore>) {
        self.stores.insert(store.name(), store);
    }

    /// Build the named indexer at `depth`
    pub fn indexer(&self, name: &str, depth: u8) -> Result<Arc<dyn SpatialIndexer>, ConfigError> {
        let factory = self
            .indexers
            .get(name)
            .ok_or_else(|| ConfigError::UnknownIndexer {
                name: name.to_string(),
                available: self.indexer_names().join(", "),
            })?;

        factory(depth).map_err(|_| ConfigError::InvalidDepth {
            depth,
            max: MAX_INDEX_DEPTH,
        })
    }

    /// Row source by name
    pub fn source(&self, name: &str) -> Result<Arc<dyn RowSource>, ConfigError> {
        self.sources
            .iter()
            .find(|s| s.name() == name)
            .cloned()
            .ok_or_else(|| ConfigError::UnknownFormat {
                name: name.to_string(),
                available: self.source_names().join(", "),
            })
    }

    /// First row source claiming the file's extension
    pub fn source_for(&self, path: &Path) -> Option<Arc<dyn RowSource>> {
        self.sources.iter().find(|s| s.handles(path)).cloned()
    }

    pub fn sources(&self) -> &[Arc<dyn RowSource>] {
        &self.sources
    }

    /// Shard store by name
    pub fn store(&self, name: &str) -> Result<Arc<dyn ShardStore>, ConfigError> {
        self.stores
            .get(name)
            .cloned()
            .ok_or_else(|| ConfigError::UnknownFormat {
                name: name.to_string(),
                available: self.stores.keys().copied().collect::<Vec<_>>().join(", "),
            })
    }

    pub fn indexer_names(&self) -> Vec<&'static str> {
        self.indexers.keys().copied().collect()
    }

    pub fn source_names(&self) -> Vec<&'static str> {
        self.sources.iter().map(|s| s.name()).collect()
    }

    /// Every extension handled by a registered source
    pub fn extensions(&self) -> Vec<&'static str> {
        self.sources
            .iter()
            .flat_map(|s| s.extensions().iter().copied())
            .collect()
    }
}
