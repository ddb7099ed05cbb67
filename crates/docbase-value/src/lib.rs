//! Value and entity codec (spec §4.2, §4.3).

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod entity;
mod value;

pub use entity::{
    Entity, FieldSpec, KeyWire, Property, WireEntity, decode_entity, decode_entity_key, encode_entity,
};
pub use value::{Value, decode_value, encode_value};
