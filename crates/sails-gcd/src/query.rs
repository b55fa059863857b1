//! Native Datastore query model.
//!
//! A [`Query`] is what the adapter hands to a [`DatastoreClient`](crate::client::DatastoreClient):
//! one kind, equality filters, orders, a projection and an optional limit.

use crate::core::{Value, KEY_PROPERTY};

/// Largest limit the Datastore API accepts (2^31 - 1).
pub const MAX_QUERY_LIMIT: i32 = i32::MAX;

/// Equality filter on one property.
#[derive(Debug, Clone, PartialEq)]
pub struct PropertyFilter {
    pub property: String,
    pub value: Value,
}

impl PropertyFilter {
    /// Whether the filter targets the entity key rather than a property
    #[must_use]
    pub fn is_key_filter(&self) -> bool {
        self.property == KEY_PROPERTY
    }
}

/// Sort direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Ascending,
    Descending,
}

/// Ordering on one property.
#[derive(Debug, Clone, PartialEq)]
pub struct PropertyOrder {
    pub property: String,
    pub direction: Direction,
}

/// Which parts of each entity the query returns.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Projection {
    /// Key and all properties
    #[default]
    Full,
    /// Key only
    KeysOnly,
}

/// Query against a single kind.
#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    pub kind: String,
    pub namespace: Option<String>,
    pub filters: Vec<PropertyFilter>,
    pub order: Vec<PropertyOrder>,
    pub projection: Projection,
    pub limit: Option<i32>,
}

impl Query {
    /// Create an unfiltered query over `kind`
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            namespace: None,
            filters: Vec::new(),
            order: Vec::new(),
            projection: Projection::Full,
            limit: None,
        }
    }

    #[must_use]
    pub fn namespace(mut self, namespace: Option<String>) -> Self {
        self.namespace = namespace;
        self
    }

    /// Add an equality filter
    #[must_use]
    pub fn filter(mut self, property: impl Into<String>, value: Value) -> Self {
        self.filters.push(PropertyFilter {
            property: property.into(),
            value,
        });
        self
    }

    /// Add an ordering
    #[must_use]
    pub fn order(mut self, property: impl Into<String>, direction: Direction) -> Self {
        self.order.push(PropertyOrder {
            property: property.into(),
            direction,
        });
        self
    }

    /// Cap the number of results, clamped to [`MAX_QUERY_LIMIT`]
    #[must_use]
    pub fn limit(mut self, limit: u64) -> Self {
        self.limit = Some(i32::try_from(limit).unwrap_or(MAX_QUERY_LIMIT));
        self
    }

    /// Return keys only
    #[must_use]
    pub fn keys_only(mut self) -> Self {
        self.projection = Projection::KeysOnly;
        self
    }
}
