//! Datastore configuration
//!
//! The ORM hands every datastore a loosely-typed configuration object. Only
//! `identity` and `projectId` are required; the remaining keys tune the client.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Default Cloud Datastore REST endpoint
pub const DEFAULT_API_ENDPOINT: &str = "https://datastore.googleapis.com";

/// Default client request timeout in milliseconds
pub const DEFAULT_TIMEOUT_MS: u64 = 30_000;

/// Configuration for one registered datastore
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DatastoreConfig {
    /// Identifier of the datastore within the app, supplied by the ORM
    #[serde(default)]
    pub identity: Option<String>,

    /// Google Cloud project the client is scoped to
    #[serde(default)]
    pub project_id: Option<String>,

    /// Datastore namespace for all keys and queries
    #[serde(default)]
    pub namespace: Option<String>,

    /// REST base URL (an emulator address, for instance)
    #[serde(default)]
    pub api_endpoint: Option<String>,

    /// Bearer token sent with every REST request
    #[serde(default)]
    pub access_token: Option<String>,

    /// Request timeout in milliseconds
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    /// Any other keys the host supplied, kept as-is
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

fn default_timeout_ms() -> u64 {
    DEFAULT_TIMEOUT_MS
}

impl Default for DatastoreConfig {
    fn default() -> Self {
        Self {
            identity: None,
            project_id: None,
            namespace: None,
            api_endpoint: None,
            access_token: None,
            timeout_ms: DEFAULT_TIMEOUT_MS,
            extra: serde_json::Map::new(),
        }
    }
}

impl DatastoreConfig {
    /// Create a configuration with the two required fields set
    pub fn new(identity: impl Into<String>, project_id: impl Into<String>) -> Self {
        Self {
            identity: Some(identity.into()),
            project_id: Some(project_id.into()),
            ..Default::default()
        }
    }

    #[must_use]
    pub fn with_api_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.api_endpoint = Some(endpoint.into());
        self
    }

    #[must_use]
    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }

    /// Build from the object the ORM passes at registration
    pub fn from_json(value: serde_json::Value) -> Result<Self> {
        serde_json::from_value(value)
            .map_err(|e| Error::Configuration(format!("Invalid datastore config: {}", e)))
    }

    /// Load configuration from a JSON or TOML file
    pub async fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = tokio::fs::read_to_string(path.as_ref())
            .await
            .map_err(|e| Error::Configuration(format!("Failed to read config file: {}", e)))?;

        let config: DatastoreConfig = if path.as_ref().extension().map_or(false, |ext| ext == "toml") {
            toml::from_str(&content)
                .map_err(|e| Error::Configuration(format!("Failed to parse TOML config: {}", e)))?
        } else {
            serde_json::from_str(&content)
                .map_err(|e| Error::Configuration(format!("Failed to parse JSON config: {}", e)))?
        };

        Ok(config)
    }

    /// The datastore identity, or a consistency violation when the ORM did not supply one
    pub fn require_identity(&self) -> Result<&str> {
        match self.identity.as_deref() {
            Some(identity) if !identity.is_empty() => Ok(identity),
            _ => Err(Error::ConsistencyViolation(
                "A datastore should contain an \"identity\" property: a special identifier \
                 that uniquely identifies it across this app. This should have been provided \
                 by Waterline core."
                    .to_string(),
            )),
        }
    }

    /// The project id, or a configuration error when it is missing
    pub fn require_project_id(&self) -> Result<&str> {
        match self.project_id.as_deref() {
            Some(project_id) if !project_id.is_empty() => Ok(project_id),
            _ => Err(Error::Configuration(
                "Missing required configuration `projectId`".to_string(),
            )),
        }
    }

    /// REST endpoint with any trailing slash removed
    #[must_use]
    pub fn endpoint(&self) -> &str {
        self.api_endpoint
            .as_deref()
            .unwrap_or(DEFAULT_API_ENDPOINT)
            .trim_end_matches('/')
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_from_orm_object() {
        let config = DatastoreConfig::from_json(json!({
            "identity": "default",
            "projectId": "my-project",
            "adapter": "sails-google-cloud-datastore"
        }))
        .unwrap();

        assert_eq!(config.require_identity().unwrap(), "default");
        assert_eq!(config.require_project_id().unwrap(), "my-project");
        assert_eq!(config.timeout_ms, DEFAULT_TIMEOUT_MS);
        assert_eq!(config.extra.get("adapter"), Some(&json!("sails-google-cloud-datastore")));
    }

    #[test]
    fn test_default_matches_deserialized_defaults() {
        let config = DatastoreConfig {
            identity: Some("d".into()),
            project_id: Some("p".into()),
            ..Default::default()
        };
        assert_eq!(DatastoreConfig::default().timeout_ms, DEFAULT_TIMEOUT_MS);

        let parsed = DatastoreConfig::from_json(json!({ "identity": "d", "projectId": "p" })).unwrap();
        assert_eq!(config, parsed);
    }

    #[test]
    fn test_missing_identity() {
        let config = DatastoreConfig::from_json(json!({ "projectId": "p" })).unwrap();
        assert!(matches!(
            config.require_identity(),
            Err(Error::ConsistencyViolation(_))
        ));
    }

    #[test]
    fn test_missing_project_id() {
        let config = DatastoreConfig::from_json(json!({ "identity": "default" })).unwrap();
        assert!(matches!(
            config.require_project_id(),
            Err(Error::Configuration(_))
        ));

        let empty = DatastoreConfig::new("default", "");
        assert!(empty.require_project_id().is_err());
    }

    #[test]
    fn test_endpoint_default_and_trim() {
        let config = DatastoreConfig::new("default", "p");
        assert_eq!(config.endpoint(), DEFAULT_API_ENDPOINT);

        let config = config.with_api_endpoint("http://localhost:8081/");
        assert_eq!(config.endpoint(), "http://localhost:8081");
    }
}
