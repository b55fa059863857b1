//! Waterline adapter for Google Cloud Datastore
//!
//! Translates the ORM's stage-three queries into Datastore entities, keys,
//! queries and mutations, and translates results back into plain records.
//!
//! ```no_run
//! use sails_google_cloud_datastore::{
//!     DatastoreAdapter, DatastoreConfig, StageThreeQuery, WaterlineAdapter,
//! };
//!
//! # async fn run() -> sails_google_cloud_datastore::Result<()> {
//! let adapter = DatastoreAdapter::rest();
//! adapter
//!     .register_datastore(DatastoreConfig::new("default", "my-project"), Vec::new())
//!     .await?;
//! let users = adapter.find("default", &StageThreeQuery::new("users")).await?;
//! # let _ = users;
//! # Ok(())
//! # }
//! ```

#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]

pub mod adapter;
pub mod client;
pub mod core;
pub mod model;
pub mod query;
pub mod registry;
pub mod s3q;
pub mod translator;

pub use adapter::{AdapterInfo, DatastoreAdapter, WaterlineAdapter, ADAPTER_API_VERSION, ADAPTER_IDENTITY};
pub use client::{
    ClientFactory, DatastoreClient, MemoryClientFactory, MemoryDatastore, MemoryStats, RestClientFactory,
    RestDatastoreClient,
};
pub use crate::core::{Entity, Key, KeyId, Mutation, Record, TransactionId, Value, KEY_PROPERTY};
pub use model::{AttributeDefinition, ModelDescriptor, ModelMetadata};
pub use query::{Direction, Projection, Query};
pub use registry::{DatastoreEntry, Registry};
pub use s3q::{Criteria, QueryMeta, SortDirection, StageThreeQuery};

pub use gcd_common::{BackendError, DatastoreConfig, Error, Result};
pub use gcd_common::telemetry::init_tracing;
