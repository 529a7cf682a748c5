//! Record types for the entity graph.
//!
//! A record is an immutable-identity, mutable-attribute node. Identity is the
//! record type plus the values of the schema-declared identifier fields;
//! everything else about the record may change between loads.

use crate::{error::Result, AttrMap, Error, ModelName, ModelSchema, UniqueId};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Behavior modifiers for a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordFlags {
    /// Omit from the diff when present only in the source snapshot
    pub skip_unmatched_source: bool,
    /// Omit from the diff when present only in the destination snapshot
    pub skip_unmatched_dest: bool,
    /// Do not visit children when this record is deleted
    pub skip_children_on_delete: bool,
}

/// A typed, identity-keyed node in the reconciliation graph.
///
/// Records are owned by the snapshot that created them. Relations to other
/// records, including the child containment map, are expressed as unique-id
/// references rather than object links, so the graph stays acyclic in memory
/// even when the modeled hierarchy is not.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Record {
    /// Record type name
    model: ModelName,
    /// Identifier field values; never mutated after creation
    identifiers: AttrMap,
    /// Diffable attribute values
    pub attributes: AttrMap,
    /// Unique ids of child records, by child record type
    pub children: BTreeMap<ModelName, Vec<UniqueId>>,
    /// Behavior modifiers
    pub flags: RecordFlags,
    /// Derived from the identifiers in schema field order
    uid: UniqueId,
}

impl Record {
    /// Create a new record, deriving its unique id from the schema's
    /// identifier field order.
    ///
    /// Fails with [`Error::Validation`] if an identifier field declared by
    /// the schema is missing, or an undeclared one is supplied.
    pub fn new(schema: &ModelSchema, identifiers: AttrMap, attributes: AttrMap) -> Result<Self> {
        let uid = uid_for(schema, &identifiers)?;

        for field in identifiers.keys() {
            if !schema.identifier_fields.iter().any(|f| f == field) {
                return Err(Error::Validation {
                    model: schema.name.clone(),
                    uid,
                    reason: format!("undeclared identifier field '{field}'"),
                });
            }
        }

        Ok(Self {
            model: schema.name.clone(),
            identifiers,
            attributes,
            children: BTreeMap::new(),
            flags: RecordFlags::default(),
            uid,
        })
    }

    /// Builder-style method to set flags.
    pub fn with_flags(mut self, flags: RecordFlags) -> Self {
        self.flags = flags;
        self
    }

    /// Record type name.
    pub fn model(&self) -> &ModelName {
        &self.model
    }

    /// Stable unique id, equal for equal identifiers in any snapshot.
    pub fn uid(&self) -> &UniqueId {
        &self.uid
    }

    /// Identifier field values.
    pub fn identifiers(&self) -> &AttrMap {
        &self.identifiers
    }

    /// Update attributes in place for the keys provided; unspecified keys are
    /// left untouched.
    pub fn update_attrs(&mut self, attrs: &AttrMap) {
        for (key, value) in attrs {
            self.attributes.insert(key.clone(), value.clone());
        }
    }

    /// Drop the attributes named by `keys`; absent keys are ignored.
    pub fn remove_attrs(&mut self, keys: &[String]) {
        for key in keys {
            self.attributes.remove(key);
        }
    }

    /// Register a child record reference.
    pub fn add_child(&mut self, child_model: impl Into<ModelName>, uid: impl Into<UniqueId>) -> Result<()> {
        let child_model = child_model.into();
        let uid = uid.into();
        let refs = self.children.entry(child_model.clone()).or_default();
        if refs.contains(&uid) {
            return Err(Error::AlreadyExists {
                model: child_model,
                uid,
            });
        }
        refs.push(uid);
        Ok(())
    }

    /// Remove a child record reference.
    pub fn remove_child(&mut self, child_model: &str, uid: &str) -> Result<()> {
        let refs = self
            .children
            .get_mut(child_model)
            .ok_or_else(|| Error::NotFound {
                model: child_model.to_string(),
                uid: uid.to_string(),
            })?;
        let pos = refs.iter().position(|r| r == uid).ok_or_else(|| Error::NotFound {
            model: child_model.to_string(),
            uid: uid.to_string(),
        })?;
        refs.remove(pos);
        Ok(())
    }

    /// Child references of the given type, in registration order.
    pub fn children_of(&self, child_model: &str) -> &[UniqueId] {
        self.children
            .get(child_model)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }
}

/// Derive the unique id for a set of identifier values.
///
/// A single-field key uses its value verbatim. A multi-field key joins the
/// values with `"__"` in the schema's declared field order, escaping
/// underscores inside each component so distinct tuples never share a uid.
pub fn uid_for(schema: &ModelSchema, identifiers: &AttrMap) -> Result<UniqueId> {
    let mut parts = Vec::with_capacity(schema.identifier_fields.len());
    for field in &schema.identifier_fields {
        match identifiers.get(field) {
            Some(value) => parts.push(value_key(value)),
            None => {
                return Err(Error::Validation {
                    model: schema.name.clone(),
                    uid: parts.join("__"),
                    reason: format!("missing identifier field '{field}'"),
                })
            }
        }
    }
    if parts.len() == 1 {
        return Ok(parts.remove(0));
    }
    let escaped: Vec<String> = parts.iter().map(|p| escape_component(p)).collect();
    Ok(escaped.join("__"))
}

/// Make a component safe to join with `"__"`: `~` doubles itself and `_`
/// becomes `~u`, so no escaped component contains an underscore.
fn escape_component(part: &str) -> String {
    part.replace('~', "~~").replace('_', "~u")
}

/// Render an identifier value as a unique-id component.
///
/// Strings are used verbatim so that uids stay human-readable; anything else
/// uses its compact JSON form.
fn value_key(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
