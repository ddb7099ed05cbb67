//! Entity codec (spec §4.3 / C3).
//!
//! Rust has no runtime reflection, so where the original design walks a
//! struct's fields by name, this codec takes an explicit field
//! descriptor instead: a type implements [`Entity`] by listing its
//! fields' wire names and typed accessors once, and [`encode_entity`] /
//! [`decode_entity`] walk that list rather than the struct itself.

use std::collections::BTreeMap;

use docbase_error::{DocbaseError, ErrorKind};
use docbase_key::Key;
use serde::{Deserialize, Serialize};

use crate::value::{Value, decode_value, encode_value};

/// Describes one field of an [`Entity`] implementor: its wire name,
/// indexing, and typed get/set accessors.
///
/// A field tagged `skip` is excluded from both encode and decode, the
/// equivalent of a `"-"` struct tag. A field tagged `noindex` round-trips
/// normally but is marked `exclude_from_indexes` on the wire.
pub struct FieldSpec<T> {
    /// The field's name, used as the wire property name unless
    /// `wire_name` overrides it.
    pub name: &'static str,
    /// Overrides `name` as the wire property key.
    pub wire_name: Option<&'static str>,
    /// Excludes this field from encoding and decoding entirely.
    pub skip: bool,
    /// Marks the wire property `excludeFromIndexes: true`.
    pub noindex: bool,
    /// Reads the field's current value out of `T`.
    pub get: fn(&T) -> Value,
    /// Writes a decoded [`Value`] into `T`, or fails on type mismatch.
    pub set: fn(&mut T, Value) -> docbase_error::Result<()>,
}

impl<T> FieldSpec<T> {
    fn wire_key(&self) -> &'static str {
        self.wire_name.unwrap_or(self.name)
    }
}

/// A type whose fields can be reflected into the wire entity format.
///
/// Implementors list every field once via [`Entity::fields`]; the codec
/// functions in this module do the rest.
pub trait Entity: Sized {
    /// The field descriptors for this type, in declaration order.
    fn fields() -> Vec<FieldSpec<Self>>;
}

/// One property on the wire: a value plus its indexing flag.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Property {
    /// The property's value, in wire form.
    pub value: serde_json::Value,
    /// Whether the server should omit this property from indexes.
    #[serde(default, rename = "excludeFromIndexes", skip_serializing_if = "is_false")]
    pub exclude_from_indexes: bool,
}

fn is_false(b: &bool) -> bool {
    !*b
}

/// The wire representation of an entity: an optional key plus a map of
/// named properties.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WireEntity {
    /// The entity's key, absent for entities embedded without identity.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<KeyWire>,
    /// The entity's properties, keyed by wire property name.
    #[serde(default)]
    pub properties: BTreeMap<String, Property>,
}

/// The key's wire shape as it appears inline in an entity, mirroring
/// [`docbase_key::Key`]'s `path` structure rather than its opaque
/// base64-url encoding (spec §4.1, §4.3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeyWire {
    path: Vec<KeyElementWire>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct KeyElementWire {
    kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    id: Option<String>,
}

impl KeyWire {
    /// Build the inline key wire shape from a [`Key`]'s root-to-leaf chain.
    pub fn from_key(key: &Key) -> Self {
        let mut chain = vec![key];
        while let Some(parent) = chain.last().unwrap().parent() {
            chain.push(parent);
        }
        chain.reverse();
        KeyWire {
            path: chain
                .into_iter()
                .map(|k| KeyElementWire {
                    kind: k.kind().to_string(),
                    name: (!k.name().is_empty()).then(|| k.name().to_string()),
                    id: (k.name().is_empty() && k.id() != 0).then(|| k.id().to_string()),
                })
                .collect(),
        }
    }

    /// Rebuild a [`Key`] from the inline wire shape.
    pub fn to_key(&self) -> docbase_error::Result<Key> {
        if self.path.is_empty() {
            return Err(DocbaseError::new(ErrorKind::Decode, "entity key path is empty"));
        }
        let mut built: Option<Key> = None;
        for elem in &self.path {
            built = Some(match (&elem.name, &elem.id) {
                (Some(name), _) => Key::make_name(elem.kind.clone(), name.clone(), built),
                (None, Some(id)) => {
                    let id: i64 = id.parse().map_err(|_| {
                        DocbaseError::new(ErrorKind::Decode, "entity key id is not a valid integer")
                            .with_context("value", id.clone())
                    })?;
                    Key::make_id(elem.kind.clone(), id, built)
                }
                (None, None) => Key::make_incomplete(elem.kind.clone(), built),
            });
        }
        Ok(built.expect("path checked non-empty above"))
    }
}

/// Encode an [`Entity`] implementor into its wire form, attaching `key`
/// if given.
///
/// Fields marked `skip` are omitted. Fields marked `noindex` are marked
/// `exclude_from_indexes` on the resulting property.
pub fn encode_entity<T: Entity>(key: Option<&Key>, src: &T) -> docbase_error::Result<WireEntity> {
    let mut properties = BTreeMap::new();
    for field in T::fields() {
        if field.skip {
            continue;
        }
        let value = (field.get)(src);
        properties.insert(
            field.wire_key().to_string(),
            Property {
                value: encode_value(&value)?,
                exclude_from_indexes: field.noindex,
            },
        );
    }
    Ok(WireEntity {
        key: key.map(KeyWire::from_key),
        properties,
    })
}

/// Decode a [`WireEntity`] into an [`Entity`] implementor that already
/// exists, e.g. a `Default::default()` instance.
///
/// Unknown or unlisted wire properties are ignored. A wire property
/// missing for a listed, non-skipped field leaves that field at
/// whatever value `dst` already held — the codec never zeroes fields
/// the server omitted.
pub fn decode_entity<T: Entity>(wire: &WireEntity, dst: &mut T) -> docbase_error::Result<()> {
    for field in T::fields() {
        if field.skip {
            continue;
        }
        let Some(prop) = wire.properties.get(field.wire_key()) else {
            continue;
        };
        let value = decode_value(&prop.value).map_err(|e| {
            e.with_context("field", field.name)
        })?;
        (field.set)(dst, value).map_err(|e| e.with_context("field", field.name))?;
    }
    Ok(())
}

/// Decode a [`WireEntity`]'s key, if present.
pub fn decode_entity_key(wire: &WireEntity) -> docbase_error::Result<Option<Key>> {
    wire.key.as_ref().map(KeyWire::to_key).transpose()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Default, PartialEq)]
    struct Task {
        description: String,
        done: bool,
        priority: i64,
        secret: String,
    }

    impl Entity for Task {
        fn fields() -> Vec<FieldSpec<Self>> {
            vec![
                FieldSpec {
                    name: "description",
                    wire_name: None,
                    skip: false,
                    noindex: true,
                    get: |t| Value::String(t.description.clone()),
                    set: |t, v| {
                        t.description = v.as_str()?.to_string();
                        Ok(())
                    },
                },
                FieldSpec {
                    name: "done",
                    wire_name: None,
                    skip: false,
                    noindex: false,
                    get: |t| Value::Boolean(t.done),
                    set: |t, v| {
                        t.done = v.as_bool()?;
                        Ok(())
                    },
                },
                FieldSpec {
                    name: "priority",
                    wire_name: Some("pri"),
                    skip: false,
                    noindex: false,
                    get: |t| Value::Integer(t.priority),
                    set: |t, v| {
                        t.priority = v.as_i64()?;
                        Ok(())
                    },
                },
                FieldSpec {
                    name: "secret",
                    wire_name: None,
                    skip: true,
                    noindex: false,
                    get: |t| Value::String(t.secret.clone()),
                    set: |t, v| {
                        t.secret = v.as_str()?.to_string();
                        Ok(())
                    },
                },
            ]
        }
    }

    #[test]
    fn encode_uses_wire_rename_and_skips_tagged_field() {
        let task = Task {
            description: "write tests".into(),
            done: false,
            priority: 2,
            secret: "shh".into(),
        };
        let wire = encode_entity(None, &task).unwrap();
        assert!(wire.properties.contains_key("pri"));
        assert!(!wire.properties.contains_key("priority"));
        assert!(!wire.properties.contains_key("secret"));
    }

    #[test]
    fn encode_marks_noindex_field() {
        let task = Task::default();
        let wire = encode_entity(None, &task).unwrap();
        assert!(wire.properties["description"].exclude_from_indexes);
        assert!(!wire.properties["done"].exclude_from_indexes);
    }

    #[test]
    fn round_trip_through_wire_entity() {
        let task = Task {
            description: "ship it".into(),
            done: true,
            priority: 5,
            secret: "shh".into(),
        };
        let wire = encode_entity(None, &task).unwrap();
        let mut back = Task::default();
        decode_entity(&wire, &mut back).unwrap();
        assert_eq!(back.description, task.description);
        assert_eq!(back.done, task.done);
        assert_eq!(back.priority, task.priority);
        assert_eq!(back.secret, "");
    }

    #[test]
    fn decode_ignores_unknown_wire_properties() {
        let mut wire = WireEntity::default();
        wire.properties.insert(
            "not_a_field".to_string(),
            Property {
                value: encode_value(&Value::Integer(1)).unwrap(),
                exclude_from_indexes: false,
            },
        );
        let mut task = Task::default();
        decode_entity(&wire, &mut task).unwrap();
        assert_eq!(task, Task::default());
    }

    #[test]
    fn decode_leaves_missing_field_untouched() {
        let wire = WireEntity::default();
        let mut task = Task {
            description: "preexisting".into(),
            ..Task::default()
        };
        decode_entity(&wire, &mut task).unwrap();
        assert_eq!(task.description, "preexisting");
    }

    #[test]
    fn decode_propagates_type_mismatch_with_field_context() {
        let mut wire = WireEntity::default();
        wire.properties.insert(
            "done".to_string(),
            Property {
                value: encode_value(&Value::String("nope".into())).unwrap(),
                exclude_from_indexes: false,
            },
        );
        let mut task = Task::default();
        let err = decode_entity(&wire, &mut task).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Decode);
        assert!(err.to_string().contains("done"));
    }

    #[test]
    fn key_wire_round_trips_hierarchy() {
        let parent = Key::make_name("Parent", "p1", None);
        let key = Key::make_name("Child", "c1", Some(parent));
        let wire = encode_entity(Some(&key), &Task::default()).unwrap();
        let decoded = decode_entity_key(&wire).unwrap().unwrap();
        assert_eq!(decoded, key);
    }

    #[test]
    fn entity_without_key_decodes_to_none() {
        let wire = encode_entity(None, &Task::default()).unwrap();
        assert!(decode_entity_key(&wire).unwrap().is_none());
    }
}
