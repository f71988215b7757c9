//! Decoder for list responses. The API answers list and search endpoints in one
//! of several shapes; each accepted shape is a variant here and anything else is
//! an explicit error instead of an empty result.

use serde::{de::DeserializeOwned, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EnvelopeError {
    #[error("unrecognized list response shape: {0}")]
    UnrecognizedShape(String),
    #[error("invalid list item at index {index}: {source}")]
    Item {
        index: usize,
        #[source]
        source: serde_json::Error,
    },
}

#[derive(Clone, Debug, PartialEq)]
pub enum ListEnvelope<T> {
    /// `{"items": [...], "total": n}`
    Items { items: Vec<T>, total: Option<u64> },
    /// `{"results": [...], "count": n}`
    Results { results: Vec<T>, count: Option<u64> },
    /// `{"data": [...], "total": n}`
    Data { data: Vec<T>, total: Option<u64> },
    /// `[...]`
    Bare(Vec<T>),
}

/// Normalized page of results.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub total: u64,
}

impl<T: DeserializeOwned> ListEnvelope<T> {
    /// # Errors
    /// Returns `UnrecognizedShape` when the value matches none of the known
    /// shapes, or `Item` when an element fails to decode.
    pub fn decode(value: Value) -> Result<Self, EnvelopeError> {
        match value {
            Value::Array(items) => Ok(Self::Bare(decode_items(items)?)),
            Value::Object(mut map) => {
                if let Some(items) = take_array(&mut map, "items") {
                    return Ok(Self::Items {
                        items: decode_items(items)?,
                        total: count_of(&map, &["total", "count"]),
                    });
                }
                if let Some(results) = take_array(&mut map, "results") {
                    return Ok(Self::Results {
                        results: decode_items(results)?,
                        count: count_of(&map, &["count", "total"]),
                    });
                }
                if let Some(data) = take_array(&mut map, "data") {
                    return Ok(Self::Data {
                        data: decode_items(data)?,
                        total: count_of(&map, &["total", "count"]),
                    });
                }

                let mut keys: Vec<&str> = map.keys().map(String::as_str).collect();
                keys.sort_unstable();
                Err(EnvelopeError::UnrecognizedShape(format!(
                    "object with keys [{}]",
                    keys.join(", ")
                )))
            }
            Value::Null => Err(EnvelopeError::UnrecognizedShape("null".to_string())),
            Value::Bool(_) => Err(EnvelopeError::UnrecognizedShape("boolean".to_string())),
            Value::Number(_) => Err(EnvelopeError::UnrecognizedShape("number".to_string())),
            Value::String(_) => Err(EnvelopeError::UnrecognizedShape("string".to_string())),
        }
    }
}

impl<T> ListEnvelope<T> {
    /// Drops the shape; `total` defaults to the number of items received.
    #[must_use]
    pub fn into_page(self) -> Page<T> {
        let (items, total) = match self {
            Self::Items { items, total } | Self::Data { data: items, total } => (items, total),
            Self::Results { results, count } => (results, count),
            Self::Bare(items) => (items, None),
        };
        let total = total.unwrap_or(items.len() as u64);
        Page { items, total }
    }
}

fn take_array(map: &mut Map<String, Value>, key: &str) -> Option<Vec<Value>> {
    if !matches!(map.get(key), Some(Value::Array(_))) {
        return None;
    }
    match map.remove(key) {
        Some(Value::Array(items)) => Some(items),
        _ => None,
    }
}

fn count_of(map: &Map<String, Value>, keys: &[&str]) -> Option<u64> {
    keys.iter().find_map(|key| map.get(*key).and_then(Value::as_u64))
}

fn decode_items<T: DeserializeOwned>(items: Vec<Value>) -> Result<Vec<T>, EnvelopeError> {
    items
        .into_iter()
        .enumerate()
        .map(|(index, item)| {
            serde_json::from_value(item).map_err(|source| EnvelopeError::Item { index, source })
        })
        .collect()
}
