//! Datastore and model registry.
//!
//! One [`Registry`] holds every registered datastore (config, client handle,
//! in-memory sequences) and the metadata of every registered model. It is an
//! ordinary value owned by the adapter, so separate adapters never share state.
//!
//! Model metadata lives in a single namespace keyed by model identity: two
//! datastores registering a model with the same identity overwrite each other.

use std::collections::BTreeMap;
use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::RwLock;
use tracing::{info, warn};

use gcd_common::{DatastoreConfig, Error, Result};

use crate::client::DatastoreClient;
use crate::core::Value;
use crate::model::ModelMetadata;

/// A registered datastore
pub struct DatastoreEntry {
    pub identity: String,
    pub config: DatastoreConfig,
    pub client: Arc<dyn DatastoreClient>,
    sequences: RwLock<BTreeMap<String, Value>>,
}

impl DatastoreEntry {
    pub fn new(identity: String, config: DatastoreConfig, client: Arc<dyn DatastoreClient>) -> Self {
        Self {
            identity,
            config,
            client,
            sequences: RwLock::new(BTreeMap::new()),
        }
    }

    /// Namespace all keys and queries of this datastore live in
    #[must_use]
    pub fn namespace(&self) -> Option<&str> {
        self.config.namespace.as_deref()
    }

    pub fn set_sequence(&self, name: impl Into<String>, value: Value) {
        self.sequences.write().insert(name.into(), value);
    }

    pub fn sequence(&self, name: &str) -> Option<Value> {
        self.sequences.read().get(name).cloned()
    }
}

/// Registered datastores and cached model metadata
#[derive(Default)]
pub struct Registry {
    datastores: DashMap<String, Arc<DatastoreEntry>>,
    models: DashMap<String, Arc<ModelMetadata>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a datastore entry.
    ///
    /// The first registration of an identity wins; later ones fail and leave
    /// the existing entry untouched.
    pub fn insert_datastore(&self, entry: DatastoreEntry) -> Result<Arc<DatastoreEntry>> {
        match self.datastores.entry(entry.identity.clone()) {
            Entry::Occupied(occupied) => {
                warn!(identity = %occupied.key(), "duplicate datastore registration rejected");
                Err(Error::ConsistencyViolation(format!(
                    "Cannot register datastore: `{}`, because it is already registered with this adapter!",
                    occupied.key()
                )))
            }
            Entry::Vacant(vacant) => {
                let entry = Arc::new(entry);
                vacant.insert(Arc::clone(&entry));
                info!(identity = %entry.identity, project = %entry.client.project_id(), "registered datastore");
                Ok(entry)
            }
        }
    }

    /// Whether an identity is registered
    pub fn contains_datastore(&self, identity: &str) -> bool {
        self.datastores.contains_key(identity)
    }

    /// Remove a datastore; absent identities are ignored
    pub fn remove_datastore(&self, identity: &str) -> Option<Arc<DatastoreEntry>> {
        self.datastores.remove(identity).map(|(_, entry)| entry)
    }

    /// Look up a registered datastore
    pub fn datastore(&self, identity: &str) -> Result<Arc<DatastoreEntry>> {
        self.datastores
            .get(identity)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| {
                Error::ConsistencyViolation(format!(
                    "Datastore `{}` is not registered with this adapter",
                    identity
                ))
            })
    }

    /// Number of registered datastores
    pub fn datastore_count(&self) -> usize {
        self.datastores.len()
    }

    /// Cache a model's metadata, replacing any model with the same identity
    pub fn insert_model(&self, model: ModelMetadata) {
        self.models.insert(model.identity.clone(), Arc::new(model));
    }

    /// Model by identity
    pub fn model(&self, identity: &str) -> Option<Arc<ModelMetadata>> {
        self.models.get(identity).map(|m| Arc::clone(m.value()))
    }

    /// Model whose collection name is `collection`
    pub fn model_for_collection(&self, collection: &str) -> Result<Arc<ModelMetadata>> {
        self.models
            .iter()
            .find(|m| m.value().collection == collection)
            .map(|m| Arc::clone(m.value()))
            .ok_or_else(|| {
                Error::ConsistencyViolation(format!(
                    "No model is registered for collection `{}`",
                    collection
                ))
            })
    }
}
