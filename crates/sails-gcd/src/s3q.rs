//! Stage-three query descriptors.
//!
//! Waterline core validates and normalises every query before it reaches an
//! adapter. The resulting descriptor is deserialised into [`StageThreeQuery`];
//! only the fields this adapter reads are modelled, everything else is ignored.
//!
//! ```text
//! {
//!   "method": "update",
//!   "using": "invites",
//!   "criteria": { "where": { "email": "test@test.com" }, "limit": 9007199254740991, "skip": 0, "sort": [] },
//!   "valuesToSet": { "isAdmin": true },
//!   "meta": { "fetch": true }
//! }
//! ```

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::core::Record;

/// Normalised query descriptor passed from the ORM to the adapter.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StageThreeQuery {
    /// Model method that produced the query (`find`, `update`, ...)
    #[serde(default)]
    pub method: Option<String>,
    /// Collection (table name) the query targets
    pub using: String,
    /// Record for `create`
    #[serde(default)]
    pub new_record: Option<Record>,
    /// Records for `createEach`
    #[serde(default)]
    pub new_records: Option<Vec<Record>>,
    /// Which records the query targets
    #[serde(default)]
    pub criteria: Option<Criteria>,
    /// Attribute values for `update`
    #[serde(default)]
    pub values_to_set: Option<Record>,
    #[serde(default)]
    pub meta: Option<QueryMeta>,
    /// Attribute for `sum`/`avg`
    #[serde(default)]
    pub numeric_attr_name: Option<String>,
}

impl StageThreeQuery {
    /// Query over `using` with no criteria
    pub fn new(using: impl Into<String>) -> Self {
        Self {
            using: using.into(),
            ..Default::default()
        }
    }

    #[must_use]
    pub fn with_criteria(mut self, criteria: Criteria) -> Self {
        self.criteria = Some(criteria);
        self
    }

    #[must_use]
    pub fn with_new_record(mut self, record: Record) -> Self {
        self.new_record = Some(record);
        self
    }

    #[must_use]
    pub fn with_new_records(mut self, records: Vec<Record>) -> Self {
        self.new_records = Some(records);
        self
    }

    #[must_use]
    pub fn with_values_to_set(mut self, values: Record) -> Self {
        self.values_to_set = Some(values);
        self
    }

    #[must_use]
    pub fn fetch(mut self, fetch: bool) -> Self {
        self.meta = Some(QueryMeta { fetch });
        self
    }

    /// Whether the caller asked for the affected records back
    #[must_use]
    pub fn wants_fetch(&self) -> bool {
        self.meta.as_ref().map_or(false, |m| m.fetch)
    }

    /// Criteria, or an empty criteria when the ORM omitted it
    #[must_use]
    pub fn criteria_or_default(&self) -> Criteria {
        self.criteria.clone().unwrap_or_default()
    }
}

/// `where`/`limit`/`skip`/`sort`/`select` clauses.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Criteria {
    #[serde(rename = "where", default)]
    pub where_clause: Option<Record>,
    #[serde(default)]
    pub limit: Option<u64>,
    #[serde(default)]
    pub skip: Option<u64>,
    #[serde(default)]
    pub sort: Vec<BTreeMap<String, SortDirection>>,
    #[serde(default)]
    pub select: Option<Vec<String>>,
}

impl Criteria {
    /// Criteria matching every record
    #[must_use]
    pub fn all() -> Self {
        Self::default()
    }

    /// Add an equality clause
    #[must_use]
    pub fn where_eq(mut self, attribute: impl Into<String>, value: impl Into<crate::core::Value>) -> Self {
        self.where_clause
            .get_or_insert_with(Record::new)
            .insert(attribute.into(), value.into());
        self
    }

    #[must_use]
    pub fn limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }

    #[must_use]
    pub fn skip(mut self, skip: u64) -> Self {
        self.skip = Some(skip);
        self
    }

    #[must_use]
    pub fn sort(mut self, attribute: impl Into<String>, direction: SortDirection) -> Self {
        self.sort.push(BTreeMap::from([(attribute.into(), direction)]));
        self
    }

    #[must_use]
    pub fn select<I, S>(mut self, attributes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.select = Some(attributes.into_iter().map(Into::into).collect());
        self
    }

    /// Explicit attribute selection, `None` for the `['*']` wildcard or no selection
    #[must_use]
    pub fn explicit_select(&self) -> Option<&[String]> {
        match self.select.as_deref() {
            Some(select) if select.join(",") != "*" => Some(select),
            _ => None,
        }
    }
}

/// Waterline sort direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SortDirection {
    Asc,
    Desc,
}

/// Query metadata flags.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryMeta {
    #[serde(default)]
    pub fetch: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Value;
    use serde_json::json;

    #[test]
    fn test_deserialize_find() {
        let s3q: StageThreeQuery = serde_json::from_value(json!({
            "method": "find",
            "using": "users",
            "criteria": {
                "where": { "email": "dwilkerson@example.com" },
                "limit": 2,
                "skip": 0,
                "sort": [{ "createdAt": "DESC" }],
                "select": ["*"]
            },
            "joins": []
        }))
        .unwrap();

        let criteria = s3q.criteria.unwrap();
        assert_eq!(s3q.using, "users");
        assert_eq!(
            criteria.where_clause.unwrap().get("email"),
            Some(&Value::from("dwilkerson@example.com"))
        );
        assert_eq!(criteria.limit, Some(2));
        assert_eq!(criteria.sort[0].get("createdAt"), Some(&SortDirection::Desc));
        assert!(criteria.select.is_some());
    }

    #[test]
    fn test_deserialize_update() {
        let s3q: StageThreeQuery = serde_json::from_value(json!({
            "method": "update",
            "using": "googletokens",
            "criteria": { "where": {}, "limit": 9_007_199_254_740_991_u64, "skip": 0, "sort": [] },
            "valuesToSet": { "updatedAt": "2018-02-15T16:56:37.158Z" },
            "meta": { "fetch": true }
        }))
        .unwrap();

        assert!(s3q.wants_fetch());
        assert_eq!(s3q.criteria.unwrap().limit, Some(9_007_199_254_740_991));
        assert!(s3q.values_to_set.unwrap().contains_key("updatedAt"));
    }

    #[test]
    fn test_missing_meta_means_no_fetch() {
        let s3q: StageThreeQuery =
            serde_json::from_value(json!({ "method": "destroy", "using": "invites", "meta": null }))
                .unwrap();
        assert!(!s3q.wants_fetch());
        assert_eq!(s3q.criteria_or_default(), Criteria::all());
    }

    #[test]
    fn test_explicit_select() {
        assert!(Criteria::all().explicit_select().is_none());
        assert!(Criteria::all().select(["*"]).explicit_select().is_none());
        assert_eq!(
            Criteria::all().select(["a", "b"]).explicit_select(),
            Some(&["a".to_string(), "b".to_string()][..])
        );
    }
}
