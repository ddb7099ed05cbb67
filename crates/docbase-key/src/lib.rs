//! Hierarchical key model (spec §3, §4.1).
//!
//! A [`Key`] is an ordered path of `(kind, identifier)` elements from root
//! to leaf, where an identifier is exactly one of a non-empty string name,
//! a non-zero `i64` id, or absent (an *incomplete* key). Keys chain to a
//! parent by `Box`, so equality and the opaque encoding walk the whole
//! chain, not just the leaf element.

#![deny(unsafe_code)]
#![warn(missing_docs)]

use std::fmt;

use base64::Engine as _;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use docbase_error::{DocbaseError, ErrorKind};
use serde::{Deserialize, Serialize};

/// One element of a [`Key`]'s path, plus its ancestor chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Key {
    kind: String,
    name: String,
    id: i64,
    parent: Option<Box<Key>>,
}

impl Key {
    /// Build a key whose leaf identifier is the given non-empty `name`.
    pub fn make_name(kind: impl Into<String>, name: impl Into<String>, parent: Option<Key>) -> Self {
        Self {
            kind: kind.into(),
            name: name.into(),
            id: 0,
            parent: parent.map(Box::new),
        }
    }

    /// Build a key whose leaf identifier is the given non-zero `id`.
    pub fn make_id(kind: impl Into<String>, id: i64, parent: Option<Key>) -> Self {
        Self {
            kind: kind.into(),
            name: String::new(),
            id,
            parent: parent.map(Box::new),
        }
    }

    /// Build a key with no leaf identifier; the server assigns one on
    /// commit.
    pub fn make_incomplete(kind: impl Into<String>, parent: Option<Key>) -> Self {
        Self {
            kind: kind.into(),
            name: String::new(),
            id: 0,
            parent: parent.map(Box::new),
        }
    }

    /// This key's kind.
    pub fn kind(&self) -> &str {
        &self.kind
    }

    /// This key's leaf name, or `""` if unset.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// This key's leaf id, or `0` if unset.
    pub fn id(&self) -> i64 {
        self.id
    }

    /// This key's parent, if any.
    pub fn parent(&self) -> Option<&Key> {
        self.parent.as_deref()
    }

    /// True iff both `name` and `id` are unset at the leaf.
    pub fn incomplete(&self) -> bool {
        self.name.is_empty() && self.id == 0
    }

    /// The root-to-leaf chain of elements, including this key's leaf.
    fn path_elements(&self) -> Vec<&Key> {
        let mut elements = Vec::new();
        let mut cur = Some(self);
        while let Some(k) = cur {
            elements.push(k);
            cur = k.parent.as_deref();
        }
        elements.reverse();
        elements
    }

    /// Base64-url encode this key's canonical wire representation.
    ///
    /// The canonical JSON mirrors the wire format: a `path` array of
    /// `{kind, name|id}` objects from root to leaf, with ids always
    /// serialized as decimal strings.
    pub fn encode(&self) -> String {
        let wire = WireKey {
            path: self
                .path_elements()
                .into_iter()
                .map(WireElement::from_key)
                .collect(),
        };
        let json = serde_json::to_vec(&wire).expect("Key wire encoding is always representable");
        URL_SAFE_NO_PAD.encode(json)
    }

    /// Decode an opaque key produced by [`Key::encode`].
    pub fn decode(s: &str) -> docbase_error::Result<Key> {
        let json = URL_SAFE_NO_PAD.decode(s).map_err(|e| {
            DocbaseError::new(ErrorKind::Decode, "invalid base64-url key encoding")
                .with_source(e)
        })?;
        let wire: WireKey = serde_json::from_slice(&json).map_err(|e| {
            DocbaseError::new(ErrorKind::Decode, "invalid key wire JSON").with_source(e)
        })?;
        if wire.path.is_empty() {
            return Err(DocbaseError::new(ErrorKind::Decode, "key path is empty"));
        }

        let mut built: Option<Key> = None;
        for elem in wire.path {
            built = Some(match (elem.name, elem.id) {
                (Some(name), None) => Key::make_name(elem.kind, name, built),
                (None, Some(id_str)) => {
                    let id: i64 = id_str.parse().map_err(|e| {
                        DocbaseError::new(ErrorKind::Decode, "key id is not a valid integer")
                            .with_context("value", &id_str)
                            .with_source(std::io::Error::new(std::io::ErrorKind::InvalidData, format!("{e}")))
                    })?;
                    Key::make_id(elem.kind, id, built)
                }
                (None, None) => Key::make_incomplete(elem.kind, built),
                (Some(_), Some(_)) => {
                    return Err(DocbaseError::new(
                        ErrorKind::Decode,
                        "key element has both name and id set",
                    ));
                }
            });
        }
        Ok(built.expect("path was checked non-empty above"))
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for elem in self.path_elements() {
            write!(f, "/{}", elem.kind)?;
            if !elem.name.is_empty() {
                write!(f, ",\"{}\"", elem.name)?;
            } else if elem.id != 0 {
                write!(f, ",{}", elem.id)?;
            } else {
                write!(f, ",incomplete")?;
            }
        }
        Ok(())
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct WireKey {
    path: Vec<WireElement>,
}

#[derive(Debug, Serialize, Deserialize)]
struct WireElement {
    kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    id: Option<String>,
}

impl WireElement {
    fn from_key(k: &Key) -> Self {
        if !k.name.is_empty() {
            WireElement {
                kind: k.kind.clone(),
                name: Some(k.name.clone()),
                id: None,
            }
        } else if k.id != 0 {
            WireElement {
                kind: k.kind.clone(),
                name: None,
                id: Some(k.id.to_string()),
            }
        } else {
            WireElement {
                kind: k.kind.clone(),
                name: None,
                id: None,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn incomplete_key_has_no_identifier() {
        let k = Key::make_incomplete("Task", None);
        assert!(k.incomplete());
    }

    #[test]
    fn name_key_is_complete() {
        let k = Key::make_name("Task", "t1", None);
        assert!(!k.incomplete());
        assert_eq!(k.name(), "t1");
    }

    #[test]
    fn id_key_is_complete() {
        let k = Key::make_id("Task", 42, None);
        assert!(!k.incomplete());
        assert_eq!(k.id(), 42);
    }

    #[test]
    fn equality_is_structural_over_whole_chain() {
        let parent_a = Key::make_name("Parent", "p1", None);
        let parent_b = Key::make_name("Parent", "p1", None);
        let a = Key::make_name("Child", "c1", Some(parent_a));
        let b = Key::make_name("Child", "c1", Some(parent_b));
        assert_eq!(a, b);

        let different_parent = Key::make_name("Parent", "p2", None);
        let c = Key::make_name("Child", "c1", Some(different_parent));
        assert_ne!(a, c);
    }

    #[test]
    fn hierarchical_key_round_trip() {
        let parent = Key::make_name("Parent", "p1", None);
        let k = Key::make_name("Child", "c1", Some(parent));
        let encoded = k.encode();
        let decoded = Key::decode(&encoded).expect("decode should succeed");
        assert_eq!(decoded, k);
    }

    #[test]
    fn display_matches_spec_example() {
        let parent = Key::make_name("Parent", "p1", None);
        let k = Key::make_name("Child", "c1", Some(parent));
        assert_eq!(k.to_string(), "/Parent,\"p1\"/Child,\"c1\"");
    }

    #[test]
    fn display_of_incomplete_key() {
        let k = Key::make_incomplete("Task", None);
        assert_eq!(k.to_string(), "/Task,incomplete");
    }

    #[test]
    fn decode_rejects_empty_path() {
        let wire = WireKey { path: vec![] };
        let json = serde_json::to_vec(&wire).unwrap();
        let encoded = URL_SAFE_NO_PAD.encode(json);
        let err = Key::decode(&encoded).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Decode);
    }

    #[test]
    fn decode_rejects_malformed_base64() {
        let err = Key::decode("not base64 url!!").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Decode);
    }

    #[test]
    fn decode_accepts_id_keys() {
        let k = Key::make_id("Task", 7, None);
        let decoded = Key::decode(&k.encode()).unwrap();
        assert_eq!(decoded, k);
        assert_eq!(decoded.id(), 7);
    }

    #[test]
    fn decode_accepts_incomplete_keys() {
        let k = Key::make_incomplete("Task", None);
        let decoded = Key::decode(&k.encode()).unwrap();
        assert!(decoded.incomplete());
    }

    proptest::proptest! {
        #[test]
        fn round_trip_holds_for_arbitrary_name_chains(
            kind_a in "[A-Za-z]{1,8}",
            name_a in "[A-Za-z0-9]{1,8}",
            kind_b in "[A-Za-z]{1,8}",
            name_b in "[A-Za-z0-9]{1,8}",
        ) {
            let parent = Key::make_name(kind_a, name_a, None);
            let k = Key::make_name(kind_b, name_b, Some(parent));
            let decoded = Key::decode(&k.encode()).unwrap();
            prop_assert_eq!(decoded, k);
        }
    }
}
