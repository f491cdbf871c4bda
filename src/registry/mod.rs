//! Model registry: the in-memory catalog of model variants.
//!
//! The registry maps a stable external id to its [`ModelMetadata`]. Entries
//! come from two sources:
//! 1. **Embedded seed**: compiled-in JSON, always available
//! 2. **Caller catalogs**: JSON files or strings loaded at startup
//!
//! Later registrations override earlier ones (last write wins). Iteration
//! order is registration order, with an overwritten entry keeping its
//! original position, so listings are stable for the lifetime of the process.

use std::collections::HashMap;
use std::path::Path;

use tracing::{debug, warn};

use crate::error::Result;
use crate::types::{ModelMetadata, ModelType, Provider};

/// Catalog of model variants, keyed by external id.
///
/// Populated once at startup and then shared read-only (e.g. behind an
/// `Arc`); it carries no interior mutability.
#[derive(Debug, Clone, Default)]
pub struct ModelRegistry {
    entries: Vec<ModelMetadata>,
    index: HashMap<String, usize>,
}

impl ModelRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or overwrite an entry by `external_id`.
    ///
    /// Metadata violating the catalog invariants (see
    /// [`ModelMetadata::validate`]) is rejected and the registry is unchanged.
    pub fn register(&mut self, metadata: ModelMetadata) -> Result<()> {
        metadata.validate()?;
        match self.index.get(&metadata.external_id) {
            Some(&pos) => {
                debug!(model = %metadata.external_id, "overwriting registry entry");
                self.entries[pos] = metadata;
            }
            None => {
                self.index
                    .insert(metadata.external_id.clone(), self.entries.len());
                self.entries.push(metadata);
            }
        }
        Ok(())
    }

    /// Get metadata for a model by external id.
    pub fn get(&self, external_id: &str) -> Option<&ModelMetadata> {
        self.index.get(external_id).map(|&pos| &self.entries[pos])
    }

    /// List entries matching both filters; `None` means no filter on that axis.
    pub fn list(
        &self,
        provider: Option<Provider>,
        model_type: Option<ModelType>,
    ) -> Vec<&ModelMetadata> {
        self.entries
            .iter()
            .filter(|m| provider.is_none_or(|p| m.provider == p))
            .filter(|m| model_type.is_none_or(|t| m.model_type == t))
            .collect()
    }

    /// Number of entries in the registry.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Register every entry of a JSON array of [`ModelMetadata`].
    ///
    /// Invalid entries are skipped with a warning; a malformed document is
    /// an error. Returns the number of entries registered.
    pub fn load_json(&mut self, json: &str) -> Result<usize> {
        let batch: Vec<ModelMetadata> = serde_json::from_str(json)?;
        let mut registered = 0;
        for entry in batch {
            let id = entry.external_id.clone();
            match self.register(entry) {
                Ok(()) => registered += 1,
                Err(e) => warn!(model = %id, error = %e, "skipping catalog entry"),
            }
        }
        Ok(registered)
    }

    /// Register every entry of a JSON catalog file.
    pub fn load_file(&mut self, path: &Path) -> Result<usize> {
        let content = std::fs::read_to_string(path)?;
        self.load_json(&content)
    }

    /// Create a registry pre-populated with the embedded seed catalog.
    ///
    /// The seed covers a handful of well-known variants per model type so a
    /// fresh install can plan loads before any catalog is configured.
    pub fn with_embedded_seed() -> Self {
        let mut registry = Self::new();
        if let Err(e) = registry.load_json(EMBEDDED_SEED) {
            // Seed is compiled in and tested; an empty registry is still usable.
            warn!(error = %e, "failed to parse embedded model seed");
        }
        registry
    }
}

/// Raw JSON seed data compiled into the binary.
const EMBEDDED_SEED: &str = include_str!("seed.json");
