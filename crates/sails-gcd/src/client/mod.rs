//! Datastore client interface.
//!
//! The adapter never talks to the network itself. Every store interaction goes
//! through a [`DatastoreClient`], built per registered datastore by a
//! [`ClientFactory`].
//!
//! # Implementations
//!
//! - [`RestDatastoreClient`]: Cloud Datastore v1 REST API (or the emulator)
//! - [`MemoryDatastore`]: in-process store for tests and embedded use

pub mod memory;
pub mod rest;
pub mod wire;

use std::sync::Arc;

use async_trait::async_trait;

use gcd_common::{DatastoreConfig, Result};

use crate::core::{Entity, Mutation, TransactionId};
use crate::query::Query;

pub use memory::{MemoryClientFactory, MemoryDatastore, MemoryStats};
pub use rest::{RestClientFactory, RestDatastoreClient};

/// Handle to one Datastore project.
///
/// Implementations must be `Send + Sync`; the adapter shares one handle per
/// registered datastore across all concurrent calls.
#[async_trait]
pub trait DatastoreClient: Send + Sync {
    /// Project the client is scoped to
    fn project_id(&self) -> &str;

    /// Run a query and return one batch of results.
    ///
    /// A result slot may be `None` when the backend returned a hole in the
    /// page; callers drop those.
    async fn run_query(
        &self,
        query: &Query,
        transaction: Option<&TransactionId>,
    ) -> Result<Vec<Option<Entity>>>;

    /// Start a read-write transaction
    async fn begin_transaction(&self) -> Result<TransactionId>;

    /// Apply mutations atomically.
    ///
    /// With a transaction the commit also ends it. All mutations are applied
    /// or none are.
    async fn commit(
        &self,
        transaction: Option<&TransactionId>,
        mutations: Vec<Mutation>,
    ) -> Result<()>;

    /// Abandon a transaction
    async fn rollback(&self, transaction: &TransactionId) -> Result<()>;
}

/// Builds a client for a validated datastore configuration.
pub trait ClientFactory: Send + Sync {
    fn create_client(&self, config: &DatastoreConfig) -> Result<Arc<dyn DatastoreClient>>;
}
