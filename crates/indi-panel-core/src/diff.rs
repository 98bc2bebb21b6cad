//! The replication diff and its client-side inverse.
//!
//! A [`Diff`] is produced by the store's snapshot engine and consumed by
//! replication clients. Its JSON form is fixed by the wire contract, so
//! serialization goes through [`Diff::to_json`] / [`Diff::from_json`] rather
//! than a derived representation.

use std::collections::BTreeMap;

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};

use crate::error::{CoreError, Result};

const NEW_OBJECT: &str = "newObject";
const NEW_ARRAY: &str = "newArray";
const UPDATE: &str = "update";
const DELETE: &str = "delete";

/// Delta between what a consumer has seen and the current store content.
#[derive(Debug, Clone, PartialEq)]
pub enum Diff {
    /// A scalar replacing whatever was there.
    Value(Value),
    /// An object replaced wholesale; every property is fully materialized.
    NewObject(BTreeMap<String, Diff>),
    /// An array replaced wholesale.
    NewArray(Vec<Diff>),
    /// In-place change of an existing object or array.
    Update {
        update: BTreeMap<String, Diff>,
        delete: Vec<String>,
    },
}

impl Diff {
    /// Full materialization of a plain value.
    pub fn materialize(value: &Value) -> Diff {
        match value {
            Value::Object(map) => Diff::NewObject(
                map.iter()
                    .map(|(k, v)| (k.clone(), Diff::materialize(v)))
                    .collect(),
            ),
            Value::Array(items) => Diff::NewArray(items.iter().map(Diff::materialize).collect()),
            scalar => Diff::Value(scalar.clone()),
        }
    }

    /// Whether this is an `update` with nothing in it.
    pub fn is_empty_update(&self) -> bool {
        matches!(self, Diff::Update { update, delete } if update.is_empty() && delete.is_empty())
    }

    /// Encode to the wire JSON shape.
    pub fn to_json(&self) -> Value {
        match self {
            Diff::Value(v @ (Value::Object(_) | Value::Array(_))) => {
                Diff::materialize(v).to_json()
            }
            Diff::Value(v) => v.clone(),
            Diff::NewObject(props) => {
                let mut inner = Map::new();
                for (k, d) in props {
                    inner.insert(k.clone(), d.to_json());
                }
                single(NEW_OBJECT, Value::Object(inner))
            }
            Diff::NewArray(items) => {
                let mut inner = Map::new();
                for (i, d) in items.iter().enumerate() {
                    inner.insert(i.to_string(), d.to_json());
                }
                single(NEW_ARRAY, Value::Object(inner))
            }
            Diff::Update { update, delete } => {
                let mut inner = Map::new();
                for (k, d) in update {
                    inner.insert(k.clone(), d.to_json());
                }
                let mut outer = Map::new();
                outer.insert(UPDATE.to_string(), Value::Object(inner));
                if !delete.is_empty() {
                    outer.insert(
                        DELETE.to_string(),
                        Value::Array(delete.iter().cloned().map(Value::String).collect()),
                    );
                }
                Value::Object(outer)
            }
        }
    }

    /// Decode from the wire JSON shape.
    pub fn from_json(value: &Value) -> Result<Diff> {
        match value {
            Value::Object(map) => {
                if let Some(inner) = map.get(NEW_OBJECT) {
                    let props = expect_object(inner, NEW_OBJECT)?;
                    let mut out = BTreeMap::new();
                    for (k, d) in props {
                        out.insert(k.clone(), Diff::from_json(d)?);
                    }
                    return Ok(Diff::NewObject(out));
                }
                if let Some(inner) = map.get(NEW_ARRAY) {
                    let props = expect_object(inner, NEW_ARRAY)?;
                    let mut indexed = Vec::with_capacity(props.len());
                    for (k, d) in props {
                        let index: usize = k
                            .parse()
                            .map_err(|_| CoreError::InvalidIndex(k.clone()))?;
                        indexed.push((index, Diff::from_json(d)?));
                    }
                    indexed.sort_by_key(|(i, _)| *i);
                    if indexed.iter().enumerate().any(|(pos, (i, _))| pos != *i) {
                        return Err(CoreError::MalformedDiff("newArray indices are not dense".into()));
                    }
                    return Ok(Diff::NewArray(indexed.into_iter().map(|(_, d)| d).collect()));
                }
                if let Some(inner) = map.get(UPDATE) {
                    let props = expect_object(inner, UPDATE)?;
                    let mut update = BTreeMap::new();
                    for (k, d) in props {
                        update.insert(k.clone(), Diff::from_json(d)?);
                    }
                    let delete = match map.get(DELETE) {
                        None => Vec::new(),
                        Some(Value::Array(keys)) => keys
                            .iter()
                            .map(|k| {
                                k.as_str().map(String::from).ok_or_else(|| {
                                    CoreError::MalformedDiff("delete entries must be strings".into())
                                })
                            })
                            .collect::<Result<Vec<_>>>()?,
                        Some(_) => {
                            return Err(CoreError::MalformedDiff("delete must be an array".into()))
                        }
                    };
                    return Ok(Diff::Update { update, delete });
                }
                Err(CoreError::MalformedDiff(
                    "object diff without newObject/newArray/update".into(),
                ))
            }
            Value::Array(_) => Err(CoreError::MalformedDiff("bare array is not a diff".into())),
            scalar => Ok(Diff::Value(scalar.clone())),
        }
    }
}

fn single(key: &str, value: Value) -> Value {
    let mut map = Map::new();
    map.insert(key.to_string(), value);
    Value::Object(map)
}

fn expect_object<'a>(value: &'a Value, what: &str) -> Result<&'a Map<String, Value>> {
    value
        .as_object()
        .ok_or_else(|| CoreError::MalformedDiff(format!("{what} must be an object")))
}

impl Serialize for Diff {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        self.to_json().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Diff {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        Diff::from_json(&value).map_err(D::Error::custom)
    }
}

/// Apply `diff` on top of `prior`, returning the new value.
///
/// This is the pure inverse of the store's diff: `newObject`/`newArray` and
/// scalars replace outright; `update` clones the prior container, applies the
/// deletions, then recursively applies each property diff. On arrays,
/// deletions truncate at the smallest deleted index and an update at index
/// `len` appends.
pub fn apply_diff(prior: Option<&Value>, diff: &Diff) -> Result<Value> {
    match diff {
        Diff::Value(v) => Ok(v.clone()),
        Diff::NewObject(props) => {
            let mut map = Map::new();
            for (k, d) in props {
                map.insert(k.clone(), apply_diff(None, d)?);
            }
            Ok(Value::Object(map))
        }
        Diff::NewArray(items) => Ok(Value::Array(
            items
                .iter()
                .map(|d| apply_diff(None, d))
                .collect::<Result<Vec<_>>>()?,
        )),
        Diff::Update { update, delete } => match prior {
            Some(Value::Object(map)) => {
                let mut map = map.clone();
                for key in delete {
                    map.remove(key);
                }
                for (k, d) in update {
                    let next = apply_diff(map.get(k), d)?;
                    map.insert(k.clone(), next);
                }
                Ok(Value::Object(map))
            }
            Some(Value::Array(items)) => {
                let mut items = items.clone();
                if let Some(cut) = delete
                    .iter()
                    .map(|k| parse_index(k))
                    .collect::<Result<Vec<_>>>()?
                    .into_iter()
                    .min()
                {
                    items.truncate(cut);
                }

                let mut ordered = update
                    .iter()
                    .map(|(k, d)| parse_index(k).map(|i| (i, d)))
                    .collect::<Result<Vec<_>>>()?;
                ordered.sort_by_key(|(i, _)| *i);

                for (index, d) in ordered {
                    if index < items.len() {
                        let next = apply_diff(Some(&items[index]), d)?;
                        items[index] = next;
                    } else {
                        items.resize(index, Value::Null);
                        items.push(apply_diff(None, d)?);
                    }
                }
                Ok(Value::Array(items))
            }
            Some(Value::Null) | None => Err(CoreError::InvalidDiffTarget("missing")),
            Some(Value::Bool(_)) => Err(CoreError::InvalidDiffTarget("boolean")),
            Some(Value::Number(_)) => Err(CoreError::InvalidDiffTarget("number")),
            Some(Value::String(_)) => Err(CoreError::InvalidDiffTarget("string")),
        },
    }
}

fn parse_index(key: &str) -> Result<usize> {
    key.parse().map_err(|_| CoreError::InvalidIndex(key.to_string()))
}
