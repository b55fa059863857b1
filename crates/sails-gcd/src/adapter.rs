//! Waterline adapter methods.
//!
//! [`WaterlineAdapter`] is the method contract the ORM drives: lifecycle
//! (`register_datastore`, `teardown`), DML (`create`, `create_each`, `update`,
//! `destroy`), DQL (`find`, `count`) and DDL (`define`, `drop`, `set_sequence`).
//! [`DatastoreAdapter`] implements it on top of a [`Registry`] and a
//! [`ClientFactory`].
//!
//! Each method resolves the datastore and model, translates the query with the
//! pure helpers in [`crate::translator`], makes one short sequence of client
//! calls and translates the result back. Failures are never retried.

use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use tracing::{debug, info, instrument, warn};

use gcd_common::metrics;
use gcd_common::{DatastoreConfig, Error, Result};

use crate::client::{ClientFactory, DatastoreClient, RestClientFactory};
use crate::core::{Entity, Mutation, Record, Value};
use crate::model::{ModelDescriptor, ModelMetadata};
use crate::query::Query;
use crate::registry::{DatastoreEntry, Registry};
use crate::s3q::{Criteria, StageThreeQuery};
use crate::translator::{
    build_query, entity_to_record, into_entity, prepare_input_data, prepare_update_values,
};

/// Adapter identity reported to the ORM
pub const ADAPTER_IDENTITY: &str = "sails-google-cloud-datastore";

/// Adapter API version implemented
pub const ADAPTER_API_VERSION: u32 = 1;

/// Static adapter description
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdapterInfo {
    pub identity: &'static str,
    pub adapter_api_version: u32,
    /// Default for the ORM's `schema` model setting
    pub schema: bool,
}

/// The ORM-facing adapter method contract.
#[async_trait]
pub trait WaterlineAdapter: Send + Sync {
    /// Register a datastore and cache its models
    async fn register_datastore(
        &self,
        config: DatastoreConfig,
        models: Vec<ModelDescriptor>,
    ) -> Result<()>;

    /// Forget a datastore; unknown identities are ignored
    async fn teardown(&self, identity: &str) -> Result<()>;

    /// Create one record, returning it when `meta.fetch` is set
    async fn create(&self, identity: &str, s3q: &StageThreeQuery) -> Result<Option<Record>>;

    /// Create a batch of records atomically, returning them when `meta.fetch` is set
    async fn create_each(&self, identity: &str, s3q: &StageThreeQuery) -> Result<Option<Vec<Record>>>;

    /// Apply `values_to_set` to every record matching the criteria
    async fn update(
        &self,
        identity: &str,
        s3q: &StageThreeQuery,
        values_to_set: &Record,
    ) -> Result<Option<Vec<Record>>>;

    /// Delete every record matching the criteria
    async fn destroy(&self, identity: &str, s3q: &StageThreeQuery) -> Result<Option<Vec<Record>>>;

    /// Records matching the criteria
    async fn find(&self, identity: &str, s3q: &StageThreeQuery) -> Result<Vec<Record>>;

    /// Number of records matching the criteria
    async fn count(&self, identity: &str, s3q: &StageThreeQuery) -> Result<u64>;

    /// Create a collection (no-op: the store is schemaless)
    async fn define(&self, identity: &str, table_name: &str, definition: &Record) -> Result<()>;

    /// Destroy a collection (no-op)
    async fn drop(&self, identity: &str, table_name: &str) -> Result<()>;

    /// Remember a sequence value in memory
    async fn set_sequence(&self, identity: &str, sequence_name: &str, value: Value) -> Result<()>;
}

/// Cloud Datastore implementation of [`WaterlineAdapter`]
pub struct DatastoreAdapter {
    registry: Arc<Registry>,
    factory: Arc<dyn ClientFactory>,
}

impl DatastoreAdapter {
    /// Adapter with its own empty registry
    pub fn new(factory: Arc<dyn ClientFactory>) -> Self {
        Self::with_registry(Arc::new(Registry::new()), factory)
    }

    /// Adapter over an existing registry
    pub fn with_registry(registry: Arc<Registry>, factory: Arc<dyn ClientFactory>) -> Self {
        Self { registry, factory }
    }

    /// Adapter talking to Cloud Datastore over REST
    pub fn rest() -> Self {
        Self::new(Arc::new(RestClientFactory))
    }

    /// Static adapter description
    #[must_use]
    pub fn info() -> AdapterInfo {
        AdapterInfo {
            identity: ADAPTER_IDENTITY,
            adapter_api_version: ADAPTER_API_VERSION,
            schema: false,
        }
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    fn context(&self, identity: &str, collection: &str) -> Result<(Arc<DatastoreEntry>, Arc<ModelMetadata>)> {
        let entry = self.registry.datastore(identity)?;
        let model = self.registry.model_for_collection(collection)?;
        Ok((entry, model))
    }

    async fn do_register(&self, config: DatastoreConfig, models: Vec<ModelDescriptor>) -> Result<()> {
        let identity = config.require_identity()?.to_string();

        if self.registry.contains_datastore(&identity) {
            return Err(Error::ConsistencyViolation(format!(
                "Cannot register datastore: `{identity}`, because it is already registered with this adapter!"
            )));
        }

        config.require_project_id()?;
        let client = self.factory.create_client(&config)?;

        self.registry
            .insert_datastore(DatastoreEntry::new(identity, config, client))?;

        for model in models {
            debug!(model = %model.identity, collection = %model.table_name, "caching model metadata");
            self.registry.insert_model(ModelMetadata::from(model));
        }

        metrics::set_registered_datastores(self.registry.datastore_count());
        Ok(())
    }

    async fn do_create(&self, identity: &str, s3q: &StageThreeQuery) -> Result<Option<Record>> {
        let record = s3q
            .new_record
            .clone()
            .ok_or_else(|| Error::Validation("create requires `newRecord`".to_string()))?;

        let mut batch = s3q.clone();
        batch.new_record = None;
        batch.new_records = Some(vec![record]);

        let created = self.do_create_each(identity, &batch).await?;
        Ok(created.and_then(|records| records.into_iter().next()))
    }

    async fn do_create_each(&self, identity: &str, s3q: &StageThreeQuery) -> Result<Option<Vec<Record>>> {
        let (entry, model) = self.context(identity, &s3q.using)?;
        let records = s3q.new_records.as_deref().unwrap_or_default();

        // Validate every record before touching the store
        let entities = records
            .iter()
            .map(|values| {
                let item = prepare_input_data(&model.attributes, &model.primary_key, values)?;
                into_entity(&model, entry.namespace(), item)
            })
            .collect::<Result<Vec<Entity>>>()?;

        if !entities.is_empty() {
            let client = &entry.client;
            let transaction = client.begin_transaction().await?;
            let mutations = entities.iter().cloned().map(Mutation::Upsert).collect();
            client.commit(Some(&transaction), mutations).await?;
            metrics::record_entities_written(&model.collection, entities.len() as u64);
        }

        if !s3q.wants_fetch() {
            return Ok(None);
        }

        let all = Criteria::all();
        Ok(Some(
            entities
                .into_iter()
                .map(|entity| entity_to_record(&model, &all, entity))
                .collect(),
        ))
    }

    async fn do_update(
        &self,
        identity: &str,
        s3q: &StageThreeQuery,
        values_to_set: &Record,
    ) -> Result<Option<Vec<Record>>> {
        let (entry, model) = self.context(identity, &s3q.using)?;
        let values = prepare_update_values(&model, values_to_set)?;
        let query = build_query(&model, entry.namespace(), &s3q.criteria_or_default())?;

        let client = &entry.client;
        let transaction = client.begin_transaction().await?;

        let matched = match resolve_entities(client.as_ref(), &query, Some(&transaction)).await {
            Ok(matched) => matched,
            Err(e) => {
                if let Err(rollback_err) = client.rollback(&transaction).await {
                    warn!(error = %rollback_err, "rollback after failed lookup also failed");
                }
                return Err(e);
            }
        };

        let updated: Vec<Entity> = matched
            .into_iter()
            .map(|mut entity| {
                for (attribute, value) in &values {
                    if value.is_null() {
                        entity.properties.remove(attribute);
                    } else {
                        entity.properties.insert(attribute.clone(), value.clone());
                    }
                }
                entity
            })
            .collect();

        if updated.is_empty() {
            client.rollback(&transaction).await?;
        } else {
            let mutations = updated.iter().cloned().map(Mutation::Update).collect();
            client.commit(Some(&transaction), mutations).await?;
            metrics::record_entities_written(&model.collection, updated.len() as u64);
        }

        if !s3q.wants_fetch() {
            return Ok(None);
        }

        let all = Criteria::all();
        Ok(Some(
            updated
                .into_iter()
                .map(|entity| entity_to_record(&model, &all, entity))
                .collect(),
        ))
    }

    async fn do_destroy(&self, identity: &str, s3q: &StageThreeQuery) -> Result<Option<Vec<Record>>> {
        let (entry, model) = self.context(identity, &s3q.using)?;
        let fetch = s3q.wants_fetch();

        let mut query = build_query(&model, entry.namespace(), &s3q.criteria_or_default())?;
        if !fetch {
            query = query.keys_only();
        }

        let matched = resolve_entities(entry.client.as_ref(), &query, None).await?;

        if matched.is_empty() {
            debug!(collection = %model.collection, "destroy matched nothing");
        } else {
            let mutations = matched
                .iter()
                .map(|entity| Mutation::Delete(entity.key.clone()))
                .collect();
            entry.client.commit(None, mutations).await?;
            metrics::record_entities_written(&model.collection, matched.len() as u64);
        }

        if !fetch {
            return Ok(None);
        }

        let all = Criteria::all();
        Ok(Some(
            matched
                .into_iter()
                .map(|entity| entity_to_record(&model, &all, entity))
                .collect(),
        ))
    }

    async fn do_find(&self, identity: &str, s3q: &StageThreeQuery) -> Result<Vec<Record>> {
        let (entry, model) = self.context(identity, &s3q.using)?;
        let criteria = s3q.criteria_or_default();
        let query = build_query(&model, entry.namespace(), &criteria)?;

        let entities = resolve_entities(entry.client.as_ref(), &query, None).await?;
        metrics::record_entities_read(&model.collection, entities.len() as u64);

        Ok(entities
            .into_iter()
            .map(|entity| entity_to_record(&model, &criteria, entity))
            .collect())
    }

    async fn do_count(&self, identity: &str, s3q: &StageThreeQuery) -> Result<u64> {
        let (entry, model) = self.context(identity, &s3q.using)?;
        let query = build_query(&model, entry.namespace(), &s3q.criteria_or_default())?.keys_only();

        let entities = resolve_entities(entry.client.as_ref(), &query, None).await?;
        Ok(entities.len() as u64)
    }
}

/// Run a query and drop empty result slots
async fn resolve_entities(
    client: &dyn DatastoreClient,
    query: &Query,
    transaction: Option<&crate::core::TransactionId>,
) -> Result<Vec<Entity>> {
    let page = client.run_query(query, transaction).await?;
    Ok(page.into_iter().flatten().collect())
}

/// Record latency and outcome of one adapter call
async fn observed<T, F>(method: &'static str, call: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    let start = Instant::now();
    let result = call.await;
    metrics::record_adapter_latency(method, start.elapsed().as_secs_f64() * 1000.0);

    match &result {
        Ok(_) => metrics::record_adapter_call(method, "ok"),
        Err(e) => {
            warn!(method, kind = e.kind(), error = %e, "adapter call failed");
            metrics::record_adapter_call(method, e.kind());
        }
    }
    result
}

#[async_trait]
impl WaterlineAdapter for DatastoreAdapter {
    #[instrument(skip(self, config, models), fields(identity = ?config.identity))]
    async fn register_datastore(
        &self,
        config: DatastoreConfig,
        models: Vec<ModelDescriptor>,
    ) -> Result<()> {
        observed("registerDatastore", self.do_register(config, models)).await
    }

    #[instrument(skip(self))]
    async fn teardown(&self, identity: &str) -> Result<()> {
        if self.registry.remove_datastore(identity).is_some() {
            info!("datastore torn down");
        }
        metrics::set_registered_datastores(self.registry.datastore_count());
        Ok(())
    }

    #[instrument(skip(self, s3q), fields(using = %s3q.using))]
    async fn create(&self, identity: &str, s3q: &StageThreeQuery) -> Result<Option<Record>> {
        observed("create", self.do_create(identity, s3q)).await
    }

    #[instrument(skip(self, s3q), fields(using = %s3q.using))]
    async fn create_each(&self, identity: &str, s3q: &StageThreeQuery) -> Result<Option<Vec<Record>>> {
        observed("createEach", self.do_create_each(identity, s3q)).await
    }

    #[instrument(skip(self, s3q, values_to_set), fields(using = %s3q.using))]
    async fn update(
        &self,
        identity: &str,
        s3q: &StageThreeQuery,
        values_to_set: &Record,
    ) -> Result<Option<Vec<Record>>> {
        observed("update", self.do_update(identity, s3q, values_to_set)).await
    }

    #[instrument(skip(self, s3q), fields(using = %s3q.using))]
    async fn destroy(&self, identity: &str, s3q: &StageThreeQuery) -> Result<Option<Vec<Record>>> {
        observed("destroy", self.do_destroy(identity, s3q)).await
    }

    #[instrument(skip(self, s3q), fields(using = %s3q.using))]
    async fn find(&self, identity: &str, s3q: &StageThreeQuery) -> Result<Vec<Record>> {
        observed("find", self.do_find(identity, s3q)).await
    }

    #[instrument(skip(self, s3q), fields(using = %s3q.using))]
    async fn count(&self, identity: &str, s3q: &StageThreeQuery) -> Result<u64> {
        observed("count", self.do_count(identity, s3q)).await
    }

    async fn define(&self, identity: &str, table_name: &str, _definition: &Record) -> Result<()> {
        debug!(identity, table_name, "define is a no-op");
        Ok(())
    }

    async fn drop(&self, identity: &str, table_name: &str) -> Result<()> {
        debug!(identity, table_name, "drop is a no-op");
        Ok(())
    }

    async fn set_sequence(&self, identity: &str, sequence_name: &str, value: Value) -> Result<()> {
        match self.registry.datastore(identity) {
            Ok(entry) => entry.set_sequence(sequence_name, value),
            Err(_) => warn!(identity, sequence_name, "setSequence on unregistered datastore ignored"),
        }
        Ok(())
    }
}
