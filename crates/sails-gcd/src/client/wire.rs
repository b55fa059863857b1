//! Cloud Datastore v1 REST JSON format
//!
//! Handles conversion between the API's tagged value format and the adapter's
//! [`Value`], [`Key`] and [`Entity`] types.

use base64::Engine;
use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::{json, Map, Value as JsonValue};

use gcd_common::{Error, Result};

use crate::core::{Entity, Key, KeyId, Mutation, PathElement, Record, TransactionId, Value};
use crate::query::{Direction, Projection, Query};

/// Convert internal Value to the API's value format
pub fn value_to_wire(value: &Value, project_id: &str) -> JsonValue {
    match value {
        Value::Null => json!({ "nullValue": null }),
        Value::Bool(b) => json!({ "booleanValue": b }),
        Value::Integer(i) => json!({ "integerValue": i.to_string() }),
        Value::Float(f) => json!({ "doubleValue": f }),
        Value::String(s) => json!({ "stringValue": s }),
        Value::Timestamp(t) => {
            json!({ "timestampValue": t.to_rfc3339_opts(SecondsFormat::AutoSi, true) })
        }
        Value::Bytes(b) => {
            json!({ "blobValue": base64::engine::general_purpose::STANDARD.encode(b) })
        }
        Value::Key(k) => json!({ "keyValue": key_to_wire(k, project_id) }),
        Value::GeoPoint { latitude, longitude } => json!({
            "geoPointValue": { "latitude": latitude, "longitude": longitude }
        }),
        Value::Array(items) => {
            let values: Vec<JsonValue> = items.iter().map(|v| value_to_wire(v, project_id)).collect();
            json!({ "arrayValue": { "values": values } })
        }
        Value::Object(map) => json!({
            "entityValue": { "properties": properties_to_wire(map, project_id) }
        }),
    }
}

/// Parse the API's value format to internal Value
pub fn parse_wire_value(attr: &JsonValue) -> Result<Value> {
    let obj = attr
        .as_object()
        .ok_or_else(|| invalid("Value must be an object"))?;

    // Values carry one `<type>Value` member next to optional `meaning`/`excludeFromIndexes`
    let (type_key, type_val) = obj
        .iter()
        .find(|(k, _)| k.ends_with("Value"))
        .ok_or_else(|| invalid("Value has no type member"))?;

    match type_key.as_str() {
        "nullValue" => Ok(Value::Null),
        "booleanValue" => type_val
            .as_bool()
            .map(Value::Bool)
            .ok_or_else(|| invalid("booleanValue must be a boolean")),
        "integerValue" => {
            let parsed = match type_val {
                JsonValue::String(s) => s.parse::<i64>().ok(),
                JsonValue::Number(n) => n.as_i64(),
                _ => None,
            };
            parsed
                .map(Value::Integer)
                .ok_or_else(|| invalid(format!("Invalid integerValue: {}", type_val)))
        }
        "doubleValue" => match type_val {
            JsonValue::Number(n) => Ok(Value::Float(n.as_f64().unwrap_or(0.0))),
            // NaN and infinities are sent as strings
            JsonValue::String(s) => s
                .parse::<f64>()
                .map(Value::Float)
                .map_err(|_| invalid(format!("Invalid doubleValue: {}", s))),
            _ => Err(invalid("doubleValue must be a number")),
        },
        "stringValue" => type_val
            .as_str()
            .map(|s| Value::String(s.to_string()))
            .ok_or_else(|| invalid("stringValue must be a string")),
        "timestampValue" => {
            let s = type_val
                .as_str()
                .ok_or_else(|| invalid("timestampValue must be a string"))?;
            DateTime::parse_from_rfc3339(s)
                .map(|t| Value::Timestamp(t.with_timezone(&Utc)))
                .map_err(|e| invalid(format!("Invalid timestampValue: {}", e)))
        }
        "blobValue" => {
            let b64 = type_val
                .as_str()
                .ok_or_else(|| invalid("blobValue must be a base64 string"))?;
            base64::engine::general_purpose::STANDARD
                .decode(b64)
                .map(Value::Bytes)
                .map_err(|e| invalid(format!("Invalid base64: {}", e)))
        }
        "keyValue" => parse_wire_key(type_val).map(Value::Key),
        "geoPointValue" => {
            let latitude = type_val.get("latitude").and_then(JsonValue::as_f64).unwrap_or(0.0);
            let longitude = type_val.get("longitude").and_then(JsonValue::as_f64).unwrap_or(0.0);
            Ok(Value::GeoPoint { latitude, longitude })
        }
        "arrayValue" => {
            let values = match type_val.get("values") {
                Some(JsonValue::Array(arr)) => arr.iter().map(parse_wire_value).collect::<Result<Vec<_>>>()?,
                // an empty array is sent without `values`
                _ => Vec::new(),
            };
            Ok(Value::Array(values))
        }
        "entityValue" => {
            let properties = match type_val.get("properties") {
                Some(props) => parse_wire_properties(props)?,
                None => Record::new(),
            };
            Ok(Value::Object(properties))
        }
        other => Err(invalid(format!("Unknown value type: {}", other))),
    }
}

fn properties_to_wire(properties: &Record, project_id: &str) -> JsonValue {
    let map: Map<String, JsonValue> = properties
        .iter()
        .map(|(k, v)| (k.clone(), value_to_wire(v, project_id)))
        .collect();
    JsonValue::Object(map)
}

fn parse_wire_properties(props: &JsonValue) -> Result<Record> {
    let obj = props
        .as_object()
        .ok_or_else(|| invalid("properties must be an object"))?;
    let mut record = Record::new();
    for (name, value) in obj {
        record.insert(name.clone(), parse_wire_value(value)?);
    }
    Ok(record)
}

/// Partition id object for a namespace
pub fn partition_to_wire(project_id: &str, namespace: Option<&str>) -> JsonValue {
    let mut partition = json!({ "projectId": project_id });
    if let Some(ns) = namespace {
        partition["namespaceId"] = json!(ns);
    }
    partition
}

/// Convert a key to the API format
pub fn key_to_wire(key: &Key, project_id: &str) -> JsonValue {
    let path: Vec<JsonValue> = key
        .path
        .iter()
        .map(|element| match &element.id {
            KeyId::Id(id) => json!({ "kind": element.kind, "id": id.to_string() }),
            KeyId::Name(name) => json!({ "kind": element.kind, "name": name }),
        })
        .collect();

    json!({
        "partitionId": partition_to_wire(project_id, key.namespace.as_deref()),
        "path": path,
    })
}

/// Parse a key from the API format
pub fn parse_wire_key(key: &JsonValue) -> Result<Key> {
    let namespace = key
        .pointer("/partitionId/namespaceId")
        .and_then(JsonValue::as_str)
        .filter(|ns| !ns.is_empty())
        .map(String::from);

    let elements = key
        .get("path")
        .and_then(JsonValue::as_array)
        .ok_or_else(|| invalid("Key has no path"))?;

    let mut path = Vec::with_capacity(elements.len());
    for element in elements {
        let kind = element
            .get("kind")
            .and_then(JsonValue::as_str)
            .ok_or_else(|| invalid("Path element has no kind"))?
            .to_string();

        let id = if let Some(name) = element.get("name").and_then(JsonValue::as_str) {
            KeyId::Name(name.to_string())
        } else {
            let id = match element.get("id") {
                Some(JsonValue::String(s)) => s.parse::<i64>().ok(),
                Some(JsonValue::Number(n)) => n.as_i64(),
                _ => None,
            };
            KeyId::Id(id.ok_or_else(|| invalid("Path element is incomplete"))?)
        };

        path.push(PathElement { kind, id });
    }

    Ok(Key { namespace, path })
}

/// Convert an entity to the API format
pub fn entity_to_wire(entity: &Entity, project_id: &str) -> JsonValue {
    json!({
        "key": key_to_wire(&entity.key, project_id),
        "properties": properties_to_wire(&entity.properties, project_id),
    })
}

/// Parse an entity from the API format
pub fn parse_wire_entity(entity: &JsonValue) -> Result<Entity> {
    let key = entity
        .get("key")
        .ok_or_else(|| invalid("Entity has no key"))
        .and_then(parse_wire_key)?;
    let properties = match entity.get("properties") {
        Some(props) => parse_wire_properties(props)?,
        None => Record::new(),
    };
    Ok(Entity::new(key, properties))
}

/// Convert a mutation to the API format
pub fn mutation_to_wire(mutation: &Mutation, project_id: &str) -> JsonValue {
    match mutation {
        Mutation::Insert(e) => json!({ "insert": entity_to_wire(e, project_id) }),
        Mutation::Upsert(e) => json!({ "upsert": entity_to_wire(e, project_id) }),
        Mutation::Update(e) => json!({ "update": entity_to_wire(e, project_id) }),
        Mutation::Delete(k) => json!({ "delete": key_to_wire(k, project_id) }),
    }
}

/// Build a `runQuery` request body
pub fn run_query_request(
    query: &Query,
    project_id: &str,
    transaction: Option<&TransactionId>,
    start_cursor: Option<&str>,
) -> JsonValue {
    let mut body = json!({ "kind": [{ "name": query.kind }] });

    let filters: Vec<JsonValue> = query
        .filters
        .iter()
        .map(|f| {
            json!({
                "propertyFilter": {
                    "property": { "name": f.property },
                    "op": "EQUAL",
                    "value": value_to_wire(&f.value, project_id),
                }
            })
        })
        .collect();

    match filters.len() {
        0 => {}
        1 => body["filter"] = filters.into_iter().next().unwrap_or_default(),
        _ => body["filter"] = json!({ "compositeFilter": { "op": "AND", "filters": filters } }),
    }

    if !query.order.is_empty() {
        let order: Vec<JsonValue> = query
            .order
            .iter()
            .map(|o| {
                let direction = match o.direction {
                    Direction::Ascending => "ASCENDING",
                    Direction::Descending => "DESCENDING",
                };
                json!({ "property": { "name": o.property }, "direction": direction })
            })
            .collect();
        body["order"] = JsonValue::Array(order);
    }

    if query.projection == Projection::KeysOnly {
        body["projection"] = json!([{ "property": { "name": crate::core::KEY_PROPERTY } }]);
    }

    if let Some(limit) = query.limit {
        body["limit"] = json!(limit);
    }

    if let Some(cursor) = start_cursor {
        body["startCursor"] = json!(cursor);
    }

    let mut request = json!({
        "partitionId": partition_to_wire(project_id, query.namespace.as_deref()),
        "query": body,
    });
    if let Some(tx) = transaction {
        request["readOptions"] = json!({ "transaction": tx.0 });
    }
    request
}

/// One page of a `runQuery` response
#[derive(Debug, Default)]
pub struct QueryBatch {
    pub entities: Vec<Option<Entity>>,
    pub end_cursor: Option<String>,
    pub more_results: bool,
}

/// Parse a `runQuery` response
pub fn parse_run_query_response(response: &JsonValue) -> Result<QueryBatch> {
    let batch = response
        .get("batch")
        .ok_or_else(|| invalid("runQuery response has no batch"))?;

    let mut entities = Vec::new();
    if let Some(results) = batch.get("entityResults").and_then(JsonValue::as_array) {
        for result in results {
            match result.get("entity") {
                Some(entity) => entities.push(Some(parse_wire_entity(entity)?)),
                None => entities.push(None),
            }
        }
    }

    let more_results = batch.get("moreResults").and_then(JsonValue::as_str) == Some("NOT_FINISHED");
    let end_cursor = batch
        .get("endCursor")
        .and_then(JsonValue::as_str)
        .map(String::from);

    Ok(QueryBatch {
        entities,
        end_cursor,
        more_results,
    })
}

/// Build a `commit` request body
pub fn commit_request(
    mutations: &[Mutation],
    project_id: &str,
    transaction: Option<&TransactionId>,
) -> JsonValue {
    let mutations: Vec<JsonValue> = mutations
        .iter()
        .map(|m| mutation_to_wire(m, project_id))
        .collect();

    match transaction {
        Some(tx) => json!({
            "mode": "TRANSACTIONAL",
            "transaction": tx.0,
            "mutations": mutations,
        }),
        None => json!({
            "mode": "NON_TRANSACTIONAL",
            "mutations": mutations,
        }),
    }
}

fn invalid(message: impl Into<String>) -> Error {
    Error::Serialization(message.into())
}
