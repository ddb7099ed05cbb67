//! Mutations applied by non-transactional commits and by transactions
//! (spec §4.6, §4.7).

use docbase_error::{DocbaseError, ErrorKind};
use docbase_key::Key;
use docbase_value::{Entity, KeyWire, WireEntity, encode_entity};

/// One insert/update/upsert/delete applied to a single entity.
#[derive(Debug, Clone)]
pub enum Mutation {
    /// Create a new entity; fails server-side if the key already exists.
    Insert(Key, WireEntity),
    /// Replace an existing entity; fails server-side if it doesn't exist.
    Update(Key, WireEntity),
    /// Create or replace, unconditionally.
    Upsert(Key, WireEntity),
    /// Delete by key.
    Delete(Key),
}

impl Mutation {
    /// Build an [`Mutation::Insert`] by encoding `src` against `key`.
    pub fn insert<T: Entity>(key: Key, src: &T) -> docbase_error::Result<Mutation> {
        Ok(Mutation::Insert(key.clone(), encode_entity(Some(&key), src)?))
    }

    /// Build an [`Mutation::Update`] by encoding `src` against `key`.
    pub fn update<T: Entity>(key: Key, src: &T) -> docbase_error::Result<Mutation> {
        Ok(Mutation::Update(key.clone(), encode_entity(Some(&key), src)?))
    }

    /// Build an [`Mutation::Upsert`] by encoding `src` against `key`.
    pub fn upsert<T: Entity>(key: Key, src: &T) -> docbase_error::Result<Mutation> {
        Ok(Mutation::Upsert(key.clone(), encode_entity(Some(&key), src)?))
    }

    /// Build a [`Mutation::Delete`] for `key`.
    pub fn delete(key: Key) -> Mutation {
        Mutation::Delete(key)
    }

    /// This mutation's key, regardless of variant.
    pub fn key(&self) -> &Key {
        match self {
            Mutation::Insert(k, _) | Mutation::Update(k, _) | Mutation::Upsert(k, _) | Mutation::Delete(k) => k,
        }
    }

    pub(crate) fn to_wire(&self, index: usize) -> docbase_error::Result<serde_json::Value> {
        match self {
            Mutation::Insert(key, entity) => entity_wire("insert", key, entity, index),
            Mutation::Update(key, entity) => entity_wire("update", key, entity, index),
            Mutation::Upsert(key, entity) => entity_wire("upsert", key, entity, index),
            Mutation::Delete(key) => {
                if key.kind().is_empty() {
                    return Err(mutation_error(index, "delete mutation has an empty key"));
                }
                wrap("delete", serde_json::to_value(KeyWire::from_key(key)))
            }
        }
    }
}

fn entity_wire(
    variant: &'static str,
    key: &Key,
    entity: &WireEntity,
    index: usize,
) -> docbase_error::Result<serde_json::Value> {
    if key.kind().is_empty() {
        return Err(mutation_error(index, "mutation has an empty key"));
    }
    wrap(variant, serde_json::to_value(entity))
}

fn wrap(
    variant: &'static str,
    value: Result<serde_json::Value, serde_json::Error>,
) -> docbase_error::Result<serde_json::Value> {
    let value = value.map_err(|e| DocbaseError::new(ErrorKind::Validation, "failed to serialize mutation").with_source(e))?;
    let mut map = serde_json::Map::new();
    map.insert(variant.to_string(), value);
    Ok(serde_json::Value::Object(map))
}

fn mutation_error(index: usize, message: &str) -> DocbaseError {
    DocbaseError::new(ErrorKind::Validation, message).with_context("index", index)
}
