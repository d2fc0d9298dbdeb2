//! Tagged change payloads.
//!
//! The original system carried mutations as untyped field maps. Here the
//! payload is a tagged variant so the fold function can dispatch without
//! reflection: `Create` and `Update` carry field diffs, `Delete` is a
//! structural tombstone. On the wire the payload travels as an opaque JSON
//! string inside a change set; interpretation is deferred to the fold.

use crate::error::ProtocolResult;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// An ordered field map.
///
/// `BTreeMap` keeps serialization order stable, which the snapshot layer
/// relies on for bit-identical fold output.
pub type FieldMap = BTreeMap<String, Value>;

/// The payload of a single change record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum ChangePayload {
    /// The entity was created with the given fields.
    Create {
        /// Initial field values.
        fields: FieldMap,
    },
    /// A subset of the entity's fields changed.
    Update {
        /// Changed field values; unmentioned fields are untouched.
        fields: FieldMap,
    },
    /// The entity was deleted.
    Delete,
}

impl ChangePayload {
    /// Creates a `Create` payload from field pairs.
    pub fn create<I, K>(fields: I) -> Self
    where
        I: IntoIterator<Item = (K, Value)>,
        K: Into<String>,
    {
        ChangePayload::Create {
            fields: fields.into_iter().map(|(k, v)| (k.into(), v)).collect(),
        }
    }

    /// Creates an `Update` payload from field pairs.
    pub fn update<I, K>(fields: I) -> Self
    where
        I: IntoIterator<Item = (K, Value)>,
        K: Into<String>,
    {
        ChangePayload::Update {
            fields: fields.into_iter().map(|(k, v)| (k.into(), v)).collect(),
        }
    }

    /// Returns the field map for `Create`/`Update`, `None` for `Delete`.
    pub fn fields(&self) -> Option<&FieldMap> {
        match self {
            ChangePayload::Create { fields } | ChangePayload::Update { fields } => Some(fields),
            ChangePayload::Delete => None,
        }
    }

    /// Returns true if this payload is a structural delete.
    pub fn is_delete(&self) -> bool {
        matches!(self, ChangePayload::Delete)
    }

    /// Encodes to the opaque wire string.
    pub fn encode(&self) -> ProtocolResult<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Decodes from the opaque wire string.
    pub fn decode(raw: &str) -> ProtocolResult<Self> {
        Ok(serde_json::from_str(raw)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn create_roundtrip() {
        let payload = ChangePayload::create([("name", json!("alpha"))]);
        let raw = payload.encode().unwrap();
        assert_eq!(ChangePayload::decode(&raw).unwrap(), payload);
    }

    #[test]
    fn delete_has_no_fields() {
        let payload = ChangePayload::Delete;
        assert!(payload.is_delete());
        assert!(payload.fields().is_none());

        let raw = payload.encode().unwrap();
        assert_eq!(raw, "{\"op\":\"delete\"}");
    }

    #[test]
    fn field_order_is_stable() {
        let a = ChangePayload::create([("b", json!(2)), ("a", json!(1))]);
        let b = ChangePayload::create([("a", json!(1)), ("b", json!(2))]);
        assert_eq!(a.encode().unwrap(), b.encode().unwrap());
    }

    #[test]
    fn update_preserves_values() {
        let payload = ChangePayload::update([("name", json!("beta")), ("rank", json!(7))]);
        let fields = payload.fields().unwrap();
        assert_eq!(fields.get("name"), Some(&json!("beta")));
        assert_eq!(fields.get("rank"), Some(&json!(7)));
    }
}
