//! In-memory Datastore
//!
//! Implements [`DatastoreClient`] over an in-process map with the same commit
//! semantics as the real service: mutations are validated first and applied
//! all at once. It also counts calls and can fail the next query or commit, so
//! tests can assert exactly what the adapter sent.

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering as AtomicOrdering};
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::{DashMap, DashSet};
use parking_lot::{Mutex, RwLock};
use tracing::{debug, instrument};

use gcd_common::{BackendError, DatastoreConfig, Error, Result};

use crate::core::{Entity, Key, Mutation, Record, TransactionId, Value};
use crate::query::{Direction, Projection, PropertyFilter, PropertyOrder, Query};

use super::{ClientFactory, DatastoreClient};

/// Call counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MemoryStats {
    pub queries: u64,
    pub begins: u64,
    pub commits: u64,
    pub rollbacks: u64,
    pub mutations: u64,
}

impl MemoryStats {
    /// Total number of calls that reached the store
    #[must_use]
    pub fn total_calls(&self) -> u64 {
        self.queries + self.begins + self.commits + self.rollbacks
    }
}

#[derive(Default)]
struct Counters {
    queries: AtomicU64,
    begins: AtomicU64,
    commits: AtomicU64,
    rollbacks: AtomicU64,
    mutations: AtomicU64,
}

/// In-process Datastore for one project
pub struct MemoryDatastore {
    project_id: String,
    entities: RwLock<BTreeMap<Key, Record>>,
    transactions: DashSet<String>,
    counters: Counters,
    last_query: Mutex<Option<Query>>,
    fail_next_query: Mutex<Option<BackendError>>,
    fail_next_commit: Mutex<Option<BackendError>>,
    sparse_results: AtomicBool,
}

impl MemoryDatastore {
    /// Create an empty store
    pub fn new(project_id: impl Into<String>) -> Self {
        Self {
            project_id: project_id.into(),
            entities: RwLock::new(BTreeMap::new()),
            transactions: DashSet::new(),
            counters: Counters::default(),
            last_query: Mutex::new(None),
            fail_next_query: Mutex::new(None),
            fail_next_commit: Mutex::new(None),
            sparse_results: AtomicBool::new(false),
        }
    }

    /// Snapshot of the call counters
    pub fn stats(&self) -> MemoryStats {
        MemoryStats {
            queries: self.counters.queries.load(AtomicOrdering::SeqCst),
            begins: self.counters.begins.load(AtomicOrdering::SeqCst),
            commits: self.counters.commits.load(AtomicOrdering::SeqCst),
            rollbacks: self.counters.rollbacks.load(AtomicOrdering::SeqCst),
            mutations: self.counters.mutations.load(AtomicOrdering::SeqCst),
        }
    }

    /// The most recent query received
    pub fn last_query(&self) -> Option<Query> {
        self.last_query.lock().clone()
    }

    /// Make the next `run_query` fail with `error`
    pub fn fail_next_query(&self, error: BackendError) {
        *self.fail_next_query.lock() = Some(error);
    }

    /// Make the next `commit` fail with `error`
    pub fn fail_next_commit(&self, error: BackendError) {
        *self.fail_next_commit.lock() = Some(error);
    }

    /// Interleave empty slots into query results, as a paging backend may
    pub fn set_sparse_results(&self, sparse: bool) {
        self.sparse_results.store(sparse, AtomicOrdering::SeqCst);
    }

    /// Fetch one entity by key without counting a call
    pub fn get(&self, key: &Key) -> Option<Entity> {
        self.entities
            .read()
            .get(key)
            .map(|properties| Entity::new(key.clone(), properties.clone()))
    }

    /// Number of stored entities of `kind`
    pub fn count(&self, kind: &str) -> usize {
        self.entities
            .read()
            .keys()
            .filter(|key| key.kind() == Some(kind))
            .count()
    }

    /// Number of open transactions
    pub fn open_transactions(&self) -> usize {
        self.transactions.len()
    }

    fn matches_filter(entity_key: &Key, properties: &Record, filter: &PropertyFilter) -> bool {
        if filter.is_key_filter() {
            return matches!(&filter.value, Value::Key(k) if k == entity_key);
        }

        match properties.get(&filter.property) {
            Some(Value::Array(items)) if !matches!(filter.value, Value::Array(_)) => {
                items.contains(&filter.value)
            }
            Some(value) => value == &filter.value,
            None => false,
        }
    }

    fn compare_by(a: &Entity, b: &Entity, order: &[PropertyOrder]) -> Ordering {
        for o in order {
            let ordering = if o.property == crate::core::KEY_PROPERTY {
                a.key.cmp(&b.key)
            } else {
                compare_values(a.properties.get(&o.property), b.properties.get(&o.property))
            };
            let ordering = match o.direction {
                Direction::Ascending => ordering,
                Direction::Descending => ordering.reverse(),
            };
            if ordering != Ordering::Equal {
                return ordering;
            }
        }
        a.key.cmp(&b.key)
    }

    fn check_transaction(&self, transaction: Option<&TransactionId>) -> Result<()> {
        match transaction {
            Some(tx) if !self.transactions.contains(&tx.0) => Err(Error::Backend(
                BackendError::new(format!("Transaction {} is not open", tx.0))
                    .with_status(400)
                    .with_code("INVALID_ARGUMENT"),
            )),
            _ => Ok(()),
        }
    }
}

fn type_rank(value: &Value) -> u8 {
    match value {
        Value::Null => 0,
        Value::Integer(_) | Value::Timestamp(_) => 1,
        Value::Bool(_) => 2,
        Value::String(_) | Value::Bytes(_) => 3,
        Value::Float(_) => 4,
        Value::GeoPoint { .. } => 5,
        Value::Array(_) => 6,
        Value::Object(_) => 7,
        Value::Key(_) => 8,
    }
}

fn compare_values(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    match (a, b) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Less,
        (Some(_), None) => Ordering::Greater,
        (Some(a), Some(b)) => match (a, b) {
            (Value::Integer(a), Value::Integer(b)) => a.cmp(b),
            (Value::Float(a), Value::Float(b)) => a.partial_cmp(b).unwrap_or(Ordering::Equal),
            (Value::String(a), Value::String(b)) => a.cmp(b),
            (Value::Bool(a), Value::Bool(b)) => a.cmp(b),
            (Value::Timestamp(a), Value::Timestamp(b)) => a.cmp(b),
            (Value::Bytes(a), Value::Bytes(b)) => a.cmp(b),
            (Value::Key(a), Value::Key(b)) => a.cmp(b),
            _ => type_rank(a).cmp(&type_rank(b)),
        },
    }
}

#[async_trait]
impl DatastoreClient for MemoryDatastore {
    fn project_id(&self) -> &str {
        &self.project_id
    }

    #[instrument(skip(self, query), fields(kind = %query.kind))]
    async fn run_query(
        &self,
        query: &Query,
        transaction: Option<&TransactionId>,
    ) -> Result<Vec<Option<Entity>>> {
        self.counters.queries.fetch_add(1, AtomicOrdering::SeqCst);
        *self.last_query.lock() = Some(query.clone());

        if let Some(error) = self.fail_next_query.lock().take() {
            return Err(Error::Backend(error));
        }
        self.check_transaction(transaction)?;

        let mut results: Vec<Entity> = self
            .entities
            .read()
            .iter()
            .filter(|(key, _)| key.kind() == Some(query.kind.as_str()) && key.namespace == query.namespace)
            .filter(|(key, properties)| {
                query
                    .filters
                    .iter()
                    .all(|f| Self::matches_filter(key, properties, f))
            })
            .map(|(key, properties)| Entity::new(key.clone(), properties.clone()))
            .collect();

        results.sort_by(|a, b| Self::compare_by(a, b, &query.order));

        if let Some(limit) = query.limit {
            results.truncate(usize::try_from(limit).unwrap_or(0));
        }

        if query.projection == Projection::KeysOnly {
            for entity in &mut results {
                entity.properties.clear();
            }
        }

        debug!("memory query matched {} entities", results.len());

        let sparse = self.sparse_results.load(AtomicOrdering::SeqCst);
        let mut page = Vec::with_capacity(results.len() * if sparse { 2 } else { 1 });
        for entity in results {
            page.push(Some(entity));
            if sparse {
                page.push(None);
            }
        }
        Ok(page)
    }

    async fn begin_transaction(&self) -> Result<TransactionId> {
        self.counters.begins.fetch_add(1, AtomicOrdering::SeqCst);
        let id = uuid::Uuid::new_v4().to_string();
        self.transactions.insert(id.clone());
        Ok(TransactionId(id))
    }

    #[instrument(skip(self, mutations), fields(count = mutations.len()))]
    async fn commit(
        &self,
        transaction: Option<&TransactionId>,
        mutations: Vec<Mutation>,
    ) -> Result<()> {
        self.counters.commits.fetch_add(1, AtomicOrdering::SeqCst);

        if let Some(tx) = transaction {
            self.check_transaction(Some(tx))?;
            self.transactions.remove(&tx.0);
        }

        if let Some(error) = self.fail_next_commit.lock().take() {
            return Err(Error::Backend(error));
        }

        let mut entities = self.entities.write();

        for mutation in &mutations {
            match mutation {
                Mutation::Insert(e) if entities.contains_key(&e.key) => {
                    return Err(Error::Backend(
                        BackendError::new(format!("entity already exists: {}", e.key))
                            .with_status(409)
                            .with_code("ALREADY_EXISTS"),
                    ));
                }
                Mutation::Update(e) if !entities.contains_key(&e.key) => {
                    return Err(Error::Backend(
                        BackendError::new(format!("no entity to update: {}", e.key))
                            .with_status(404)
                            .with_code("NOT_FOUND"),
                    ));
                }
                _ => {}
            }
        }

        let count = mutations.len() as u64;
        for mutation in mutations {
            match mutation {
                Mutation::Insert(e) | Mutation::Upsert(e) | Mutation::Update(e) => {
                    entities.insert(e.key, e.properties);
                }
                Mutation::Delete(key) => {
                    entities.remove(&key);
                }
            }
        }
        self.counters.mutations.fetch_add(count, AtomicOrdering::SeqCst);

        Ok(())
    }

    async fn rollback(&self, transaction: &TransactionId) -> Result<()> {
        self.counters.rollbacks.fetch_add(1, AtomicOrdering::SeqCst);
        self.transactions.remove(&transaction.0);
        Ok(())
    }
}

/// Hands out one shared [`MemoryDatastore`] per project id
#[derive(Default)]
pub struct MemoryClientFactory {
    stores: DashMap<String, Arc<MemoryDatastore>>,
}

impl MemoryClientFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// The store for `project_id`, created on first use
    pub fn store(&self, project_id: &str) -> Arc<MemoryDatastore> {
        self.stores
            .entry(project_id.to_string())
            .or_insert_with(|| Arc::new(MemoryDatastore::new(project_id)))
            .clone()
    }
}

impl ClientFactory for MemoryClientFactory {
    fn create_client(&self, config: &DatastoreConfig) -> Result<Arc<dyn DatastoreClient>> {
        let project_id = config.require_project_id()?;
        Ok(self.store(project_id))
    }
}
