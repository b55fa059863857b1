//! Cloud Datastore REST client
//!
//! Speaks the v1 REST API (`projects/{projectId}:<method>`) over `reqwest`.
//! Points at the Datastore emulator when `apiEndpoint` is configured.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value as JsonValue};
use tracing::{debug, instrument};

use gcd_common::{BackendError, DatastoreConfig, Error, Result};

use crate::core::{Entity, Mutation, TransactionId};
use crate::query::Query;

use super::wire::{commit_request, parse_run_query_response, run_query_request, QueryBatch};
use super::{ClientFactory, DatastoreClient};

/// REST client scoped to one project
pub struct RestDatastoreClient {
    project_id: String,
    base_url: String,
    access_token: Option<String>,
    http: reqwest::Client,
}

impl RestDatastoreClient {
    /// Create a client from a datastore configuration
    pub fn new(config: &DatastoreConfig) -> Result<Self> {
        let project_id = config.require_project_id()?.to_string();

        let http = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .map_err(|e| Error::Configuration(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            base_url: format!("{}/v1/projects/{}", config.endpoint(), project_id),
            project_id,
            access_token: config.access_token.clone(),
            http,
        })
    }

    /// URL of a project-level API method
    pub fn method_url(&self, method: &str) -> String {
        format!("{}:{}", self.base_url, method)
    }

    async fn call(&self, method: &str, body: &JsonValue) -> Result<JsonValue> {
        let mut request = self.http.post(self.method_url(method)).json(body);
        if let Some(token) = &self.access_token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await?;
        let status = response.status();

        if !status.is_success() {
            let error: JsonValue = response.json().await.unwrap_or(JsonValue::Null);
            return Err(Error::Backend(backend_error(status.as_u16(), &error)));
        }

        Ok(response.json().await?)
    }
}

/// Cursor for the next page, if the service has more results.
///
/// A page of empty slots still advances; a cursor that did not move ends paging.
pub(crate) fn next_page_cursor(batch: &QueryBatch, previous: Option<&str>) -> Option<String> {
    if !batch.more_results {
        return None;
    }
    batch
        .end_cursor
        .as_deref()
        .filter(|end| Some(*end) != previous)
        .map(String::from)
}

/// Turn an API error body into a pass-through backend error
pub fn backend_error(status: u16, body: &JsonValue) -> BackendError {
    let message = body
        .pointer("/error/message")
        .and_then(JsonValue::as_str)
        .unwrap_or("Unknown error");

    let mut error = BackendError::new(message).with_status(status);
    if let Some(code) = body.pointer("/error/status").and_then(JsonValue::as_str) {
        error = error.with_code(code);
    }
    error
}

#[async_trait]
impl DatastoreClient for RestDatastoreClient {
    fn project_id(&self) -> &str {
        &self.project_id
    }

    #[instrument(skip(self, query), fields(kind = %query.kind))]
    async fn run_query(
        &self,
        query: &Query,
        transaction: Option<&TransactionId>,
    ) -> Result<Vec<Option<Entity>>> {
        let mut entities = Vec::new();
        let mut cursor: Option<String> = None;
        let mut remaining = query.limit;

        // The service returns one batch per call; follow cursors until done
        loop {
            let mut page_query = query.clone();
            page_query.limit = remaining;

            let body = run_query_request(&page_query, &self.project_id, transaction, cursor.as_deref());
            let response = self.call("runQuery", &body).await?;
            let batch = parse_run_query_response(&response)?;

            let fetched = batch.entities.iter().filter(|e| e.is_some()).count();
            let next = next_page_cursor(&batch, cursor.as_deref());
            entities.extend(batch.entities);

            if let Some(limit) = remaining.as_mut() {
                *limit = limit.saturating_sub(i32::try_from(fetched).unwrap_or(i32::MAX));
                if *limit <= 0 {
                    break;
                }
            }

            match next {
                Some(end) => cursor = Some(end),
                None => break,
            }
        }

        debug!("runQuery returned {} results", entities.len());
        Ok(entities)
    }

    async fn begin_transaction(&self) -> Result<TransactionId> {
        let response = self.call("beginTransaction", &json!({})).await?;
        response
            .get("transaction")
            .and_then(JsonValue::as_str)
            .map(|tx| TransactionId(tx.to_string()))
            .ok_or_else(|| Error::Serialization("beginTransaction response has no transaction".into()))
    }

    #[instrument(skip(self, mutations), fields(count = mutations.len()))]
    async fn commit(
        &self,
        transaction: Option<&TransactionId>,
        mutations: Vec<Mutation>,
    ) -> Result<()> {
        let body = commit_request(&mutations, &self.project_id, transaction);
        self.call("commit", &body).await?;
        Ok(())
    }

    async fn rollback(&self, transaction: &TransactionId) -> Result<()> {
        self.call("rollback", &json!({ "transaction": transaction.0 }))
            .await?;
        Ok(())
    }
}

/// Builds a [`RestDatastoreClient`] per registered datastore
#[derive(Debug, Default, Clone, Copy)]
pub struct RestClientFactory;

impl ClientFactory for RestClientFactory {
    fn create_client(&self, config: &DatastoreConfig) -> Result<Arc<dyn DatastoreClient>> {
        Ok(Arc::new(RestDatastoreClient::new(config)?))
    }
}
