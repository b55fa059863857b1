//! Translation between ORM records/criteria and native Datastore entities/queries.
//!
//! Everything here is pure: no client is touched, so every validation failure is
//! raised before the adapter makes a network call.

use std::collections::BTreeMap;

use tracing::debug;

use gcd_common::{Error, Result};

use crate::core::{Entity, Key, KeyId, Record, Value, KEY_PROPERTY};
use crate::model::{AttributeDefinition, ModelMetadata};
use crate::query::{Direction, Query};
use crate::s3q::{Criteria, SortDirection};

/// Reshape a raw input record into a storable item.
///
/// For each attribute definition the raw value is read under the attribute's
/// column name. An absent value takes the attribute's default. If the attribute
/// is the primary key, required or unique and is still absent, the record is
/// rejected. Null values are dropped from the output; everything else is kept
/// under the attribute name.
pub fn prepare_input_data(
    definitions: &BTreeMap<String, AttributeDefinition>,
    primary_key: &str,
    values: &Record,
) -> Result<Record> {
    let mut item = Record::new();

    for (attribute, definition) in definitions {
        let mut value = values.get(definition.column(attribute)).cloned();

        if value.is_none() {
            value = definition
                .defaults_to
                .as_ref()
                .filter(|default| !default.is_null())
                .cloned();
        }

        if (attribute == primary_key || definition.is_mandatory()) && value.is_none() {
            return Err(Error::Validation(format!(
                "Missing value for property `{}`.",
                attribute
            )));
        }

        match value {
            Some(v) if !v.is_null() => {
                item.insert(attribute.clone(), v);
            }
            _ => {}
        }
    }

    Ok(item)
}

/// Split a prepared item into a keyed entity.
///
/// The primary key moves into the key path and is removed from the properties.
pub fn into_entity(model: &ModelMetadata, namespace: Option<&str>, mut item: Record) -> Result<Entity> {
    let pk_value = item.remove(&model.primary_key).unwrap_or(Value::Null);
    let key = entity_key(model, namespace, &pk_value)?;
    Ok(Entity::new(key, item))
}

/// Native key `[collection, pk]` for a primary-key value
pub fn entity_key(model: &ModelMetadata, namespace: Option<&str>, pk_value: &Value) -> Result<Key> {
    let id = KeyId::from_value(&model.primary_key, pk_value)?;
    Ok(Key::new(model.collection.clone(), id).with_namespace(namespace.map(String::from)))
}

/// Build the native query for a criteria.
///
/// Only equality is translated. `skip` is rejected outright, `limit` is clamped
/// to the API maximum and a limit of zero means no limit.
pub fn build_query(
    model: &ModelMetadata,
    namespace: Option<&str>,
    criteria: &Criteria,
) -> Result<Query> {
    if let Some(skip) = criteria.skip.filter(|s| *s != 0) {
        return Err(Error::NotImplemented(format!(
            "Skip not implemented (skip = {})",
            skip
        )));
    }

    let mut query = Query::new(model.collection.clone()).namespace(namespace.map(String::from));

    if let Some(clause) = &criteria.where_clause {
        let mut filters = Vec::new();
        collect_equality_filters(model, namespace, clause, &mut filters)?;
        for (property, value) in filters {
            query = query.filter(property, value);
        }
    }

    for sort in &criteria.sort {
        for (attribute, direction) in sort {
            let direction = match direction {
                SortDirection::Asc => Direction::Ascending,
                SortDirection::Desc => Direction::Descending,
            };
            query = query.order(property_name(model, attribute), direction);
        }
    }

    if let Some(limit) = criteria.limit.filter(|l| *l != 0) {
        query = query.limit(limit);
    }

    debug!(kind = %query.kind, filters = query.filters.len(), limit = ?query.limit, "built query");
    Ok(query)
}

fn collect_equality_filters(
    model: &ModelMetadata,
    namespace: Option<&str>,
    clause: &Record,
    out: &mut Vec<(String, Value)>,
) -> Result<()> {
    for (attribute, value) in clause {
        match attribute.as_str() {
            "and" => {
                let branches = match value {
                    Value::Array(branches) => branches,
                    other => {
                        return Err(Error::Validation(format!(
                            "`and` must be an array of clauses, got {}",
                            other.type_name()
                        )))
                    }
                };
                for branch in branches {
                    let branch = branch.as_object().ok_or_else(|| {
                        Error::Validation("`and` clauses must be objects".to_string())
                    })?;
                    collect_equality_filters(model, namespace, branch, out)?;
                }
            }
            "or" => {
                return Err(Error::NotImplemented(
                    "`or` predicates are not supported".to_string(),
                ))
            }
            _ => {
                if let Value::Object(modifier) = value {
                    let name = modifier.keys().next().map_or("{}", String::as_str);
                    return Err(Error::NotImplemented(format!(
                        "Modifier `{}` on `{}` is not supported, only equality",
                        name, attribute
                    )));
                }

                let property = property_name(model, attribute);
                if property == KEY_PROPERTY {
                    let key = entity_key(model, namespace, value)?;
                    out.push((property, Value::Key(key)));
                } else {
                    out.push((property, value.clone()));
                }
            }
        }
    }
    Ok(())
}

/// Attribute name for a criteria name, which may be a column name
fn attribute_name<'a>(model: &'a ModelMetadata, name: &'a str) -> &'a str {
    model
        .attributes
        .iter()
        .find(|(attribute, def)| attribute.as_str() == name || def.column(attribute) == name)
        .map_or(name, |(attribute, _)| attribute.as_str())
}

/// Stored property name for a criteria attribute.
///
/// Column names are mapped back to attribute names; the primary key maps to
/// the reserved key property.
fn property_name(model: &ModelMetadata, attribute: &str) -> String {
    let name = attribute_name(model, attribute);

    if name == model.primary_key {
        KEY_PROPERTY.to_string()
    } else {
        name.to_string()
    }
}

/// Turn a fetched entity into a plain record.
///
/// With an explicit selection only the selected attributes present on the
/// entity are copied, under their attribute names; otherwise every property is. The primary key is always
/// attached from the entity's key.
pub fn entity_to_record(model: &ModelMetadata, criteria: &Criteria, entity: Entity) -> Record {
    let Entity { key, mut properties } = entity;

    let mut item = match criteria.explicit_select() {
        Some(select) => select
            .iter()
            .filter_map(|selected| {
                let attribute = attribute_name(model, selected);
                properties
                    .remove(attribute)
                    .map(|value| (attribute.to_string(), value))
            })
            .collect(),
        None => properties,
    };

    item.insert(model.primary_key.clone(), key.id_value());
    item
}

/// Validate and filter the values of an update.
///
/// The primary key must be present and non-null. Attributes outside the model
/// definition are dropped, and so is the primary key itself, which lives in the
/// entity key rather than in its properties.
pub fn prepare_update_values(model: &ModelMetadata, values: &Record) -> Result<Record> {
    match values.get(&model.primary_key) {
        Some(v) if !v.is_null() => {}
        _ => {
            return Err(Error::Validation(format!(
                "Missing or null value for property `{}`.",
                model.primary_key
            )))
        }
    }

    Ok(values
        .iter()
        .filter(|(attribute, _)| {
            model.has_attribute(attribute) && attribute.as_str() != model.primary_key
        })
        .map(|(attribute, value)| (attribute.clone(), value.clone()))
        .collect())
}
