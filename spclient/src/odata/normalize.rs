//! OData envelope normalization
//!
//! The service answers in three envelope shapes depending on the request's
//! accept header: verbose (`d` wrapper), minimal metadata (`value` array and
//! `@odata.*` fields) and nometadata (flat payload). Normalization is a pure
//! transform producing one canonical shape: a bare entity object carrying a
//! `__metadata` block, or a bare array of such objects for collections.
//!
//! Feeding already-normalized bytes back through any normalizer returns them
//! unchanged; collaborators normalize defensively without tracking prior
//! normalization.

use serde_json::{Map, Value};

use crate::error::{Error, Result};

/// Normalize a single-entity payload of any envelope shape.
///
/// Strips the verbose `d` wrapper and guarantees a `__metadata` object,
/// synthesized from `@odata.*` fields when the envelope carried no verbose
/// metadata of its own.
pub fn normalize_odata_item(data: &[u8]) -> Result<Vec<u8>> {
    let value: Value = serde_json::from_slice(data)?;
    let normalized = normalize_item_value(value)?;
    Ok(serde_json::to_vec(&normalized)?)
}

/// Split a collection payload into one normalized byte block per element,
/// order preserved, along with the page cursor when the envelope carries one.
pub fn parse_odata_collection(data: &[u8]) -> Result<(Vec<Vec<u8>>, Option<String>)> {
    let value: Value = serde_json::from_slice(data)?;
    let (elements, next) = collection_elements(value)?;
    let mut blocks = Vec::with_capacity(elements.len());
    for element in elements {
        let normalized = normalize_item_value(element)?;
        blocks.push(serde_json::to_vec(&normalized)?);
    }
    Ok((blocks, next))
}

/// Normalize a collection payload into a bare JSON array of normalized
/// entities.
pub fn normalize_odata_collection(data: &[u8]) -> Result<Vec<u8>> {
    let value: Value = serde_json::from_slice(data)?;
    let (elements, _) = collection_elements(value)?;
    let mut normalized = Vec::with_capacity(elements.len());
    for element in elements {
        normalized.push(normalize_item_value(element)?);
    }
    Ok(serde_json::to_vec(&Value::Array(normalized))?)
}

/// Page cursor of a collection envelope; `None` when there is no further
/// page or the payload is not a collection.
pub fn collection_next_page_url(data: &[u8]) -> Option<String> {
    let value: Value = serde_json::from_slice(data).ok()?;
    let map = value.as_object()?;
    if let Some(d) = map.get("d").and_then(Value::as_object) {
        return d.get("__next").and_then(Value::as_str).map(String::from);
    }
    map.get("@odata.nextLink")
        .or_else(|| map.get("odata.nextLink"))
        .and_then(Value::as_str)
        .map(String::from)
}

/// True when the payload carries a collection envelope of any shape
pub fn is_collection(data: &[u8]) -> bool {
    let Ok(value) = serde_json::from_slice::<Value>(data) else {
        return false;
    };
    match &value {
        Value::Array(_) => true,
        Value::Object(map) => {
            if let Some(d) = map.get("d").and_then(Value::as_object) {
                d.get("results").is_some_and(Value::is_array)
            } else {
                map.get("value").is_some_and(Value::is_array)
            }
        }
        _ => false,
    }
}

/// Inject `__metadata.type` into an entity payload when absent.
///
/// Used before POSTing new entities whose caller omitted the type. Payloads
/// that already carry `__metadata` or are not JSON objects pass through
/// untouched.
pub fn patch_metadata_type(body: &[u8], odata_type: &str) -> Vec<u8> {
    let Ok(Value::Object(mut map)) = serde_json::from_slice::<Value>(body) else {
        return body.to_vec();
    };
    if map.contains_key("__metadata") {
        return body.to_vec();
    }
    let mut meta = Map::new();
    meta.insert("type".to_string(), Value::String(odata_type.to_string()));
    map.insert("__metadata".to_string(), Value::Object(meta));
    serde_json::to_vec(&Value::Object(map)).unwrap_or_else(|_| body.to_vec())
}

fn normalize_item_value(value: Value) -> Result<Value> {
    let mut obj = match value {
        Value::Object(mut map) => match map.remove("d") {
            Some(Value::Object(d)) => d,
            Some(other) => {
                map.insert("d".to_string(), other);
                map
            }
            None => map,
        },
        other => {
            return Err(Error::Normalization(format!(
                "expected a JSON object, got {other}"
            )));
        }
    };

    if !obj.contains_key("__metadata") {
        let mut meta = Map::new();
        if let Some(entity_type) = odata_field(&obj, "type") {
            meta.insert(
                "type".to_string(),
                Value::String(entity_type.trim_start_matches('#').to_string()),
            );
        }
        if let Some(uri) = odata_field(&obj, "id") {
            meta.insert("uri".to_string(), Value::String(uri.to_string()));
        }
        obj.insert("__metadata".to_string(), Value::Object(meta));
    }

    Ok(Value::Object(obj))
}

fn collection_elements(value: Value) -> Result<(Vec<Value>, Option<String>)> {
    match value {
        Value::Array(items) => Ok((items, None)),
        Value::Object(map) => {
            if let Some(Value::Object(d)) = map.get("d") {
                let Some(Value::Array(results)) = d.get("results") else {
                    return Err(Error::Normalization(
                        "verbose envelope carries no results array".into(),
                    ));
                };
                let next = d.get("__next").and_then(Value::as_str).map(String::from);
                return Ok((results.clone(), next));
            }
            if let Some(Value::Array(items)) = map.get("value") {
                let next = map
                    .get("@odata.nextLink")
                    .or_else(|| map.get("odata.nextLink"))
                    .and_then(Value::as_str)
                    .map(String::from);
                return Ok((items.clone(), next));
            }
            Err(Error::Normalization("payload is not a collection envelope".into()))
        }
        other => Err(Error::Normalization(format!(
            "expected a collection payload, got {other}"
        ))),
    }
}

fn odata_field<'a>(obj: &'a Map<String, Value>, field: &str) -> Option<&'a str> {
    obj.get(format!("@odata.{field}").as_str())
        .or_else(|| obj.get(format!("odata.{field}").as_str()))
        .and_then(Value::as_str)
}
