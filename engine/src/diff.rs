//! Diff computation between two snapshots.
//!
//! The diff engine walks two independently loaded snapshots record-type by
//! record-type and produces a tree of per-record, per-attribute differences.
//! It performs no normalization of its own: two values are equal only if the
//! adapters loaded them equal.

use crate::{
    error::Result, AttrMap, Error, ModelName, ModelSchema, Record, RecordFlags, Schema, Snapshot,
    UniqueId,
};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, BTreeSet, HashMap};

/// Classification of a single diff node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DiffAction {
    /// Present in the source only
    Create,
    /// Present in both with differing attributes
    Update,
    /// Present in the destination only
    Delete,
    /// Present in both with identical attributes
    Skip,
}

impl std::fmt::Display for DiffAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DiffAction::Create => write!(f, "create"),
            DiffAction::Update => write!(f, "update"),
            DiffAction::Delete => write!(f, "delete"),
            DiffAction::Skip => write!(f, "skip"),
        }
    }
}

/// Which way a computed diff converges the two snapshots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum DiffDirection {
    /// The destination is transformed to match the source (default)
    #[default]
    Forward,
    /// Roles swapped: the source is treated as the state to converge on
    Reverse,
}

/// A single record's differences, plus nested diffs for its children.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiffElement {
    /// Record type name
    pub model: ModelName,
    /// Unique id of the record on either side
    pub key: UniqueId,
    /// Action classification
    pub action: DiffAction,
    /// Identifier values, taken from whichever side holds the record
    pub identifiers: AttrMap,
    /// Source-side values for the differing attribute keys (the state to
    /// converge on; full attributes for a create)
    pub source_attrs: AttrMap,
    /// Destination-side values for the differing attribute keys (full
    /// attributes for a delete)
    pub dest_attrs: AttrMap,
    /// Flags of the record, honored at apply time
    pub flags: RecordFlags,
    /// Nested diffs for child record types
    pub children: Diff,
}

impl DiffElement {
    /// Whether this node or any nested child node carries a change.
    pub fn has_diffs(&self) -> bool {
        self.action != DiffAction::Skip || self.children.has_diffs()
    }

    /// Attribute keys the destination carries but the source does not. For
    /// an update these are the keys the apply step must drop from the
    /// destination record.
    pub fn removed_attr_keys(&self) -> Vec<String> {
        self.dest_attrs
            .keys()
            .filter(|k| !self.source_attrs.contains_key(*k))
            .cloned()
            .collect()
    }

    fn to_value(&self) -> Option<Value> {
        let mut entry = Map::new();
        if !self.dest_attrs.is_empty() {
            entry.insert("+".into(), attrs_to_value(&self.dest_attrs));
        }
        if !self.source_attrs.is_empty() {
            entry.insert("-".into(), attrs_to_value(&self.source_attrs));
        }
        let children = self.children.to_value();
        if let Value::Object(groups) = children {
            for (model, group) in groups {
                entry.insert(model, group);
            }
        }
        if entry.is_empty() && self.action == DiffAction::Skip {
            return None;
        }
        Some(Value::Object(entry))
    }

    fn count_into(&self, summary: &mut DiffSummary) {
        match self.action {
            DiffAction::Create => summary.create += 1,
            DiffAction::Update => summary.update += 1,
            DiffAction::Delete => summary.delete += 1,
            DiffAction::Skip => summary.skip += 1,
        }
        for group in self.children.groups.values() {
            for child in group.values() {
                child.count_into(summary);
            }
        }
    }
}

/// Per-action node counts across a whole diff tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiffSummary {
    pub create: usize,
    pub update: usize,
    pub delete: usize,
    pub skip: usize,
}

/// The computed tree of differences between two snapshots.
///
/// Keyed first by record type, then by unique id. Nested diffs for child
/// record types hang off each element.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Diff {
    /// Elements by record type, then by unique id
    pub groups: BTreeMap<ModelName, BTreeMap<UniqueId, DiffElement>>,
}

impl Diff {
    /// Whether any node in the tree carries a change.
    pub fn has_diffs(&self) -> bool {
        self.groups
            .values()
            .flat_map(|g| g.values())
            .any(DiffElement::has_diffs)
    }

    /// Count nodes per action across the whole tree.
    pub fn summary(&self) -> DiffSummary {
        let mut summary = DiffSummary::default();
        for group in self.groups.values() {
            for element in group.values() {
                element.count_into(&mut summary);
            }
        }
        summary
    }

    /// Render the display/audit form: a nested mapping of
    /// `{record_type: {key: {"+": {...}, "-": {...}, child_type: {...}}}}`
    /// where `"+"` holds destination-side values and `"-"` source-side
    /// values. No-change nodes without nested changes are omitted.
    pub fn to_value(&self) -> Value {
        let mut root = Map::new();
        for (model, group) in &self.groups {
            let mut entries = Map::new();
            for (key, element) in group {
                if let Some(value) = element.to_value() {
                    entries.insert(key.clone(), value);
                }
            }
            if !entries.is_empty() {
                root.insert(model.clone(), Value::Object(entries));
            }
        }
        Value::Object(root)
    }

    /// Pretty-printed JSON of [`Diff::to_value`].
    pub fn to_json_pretty(&self) -> Result<String> {
        serde_json::to_string_pretty(&self.to_value())
            .map_err(|e| Error::Structural(format!("diff serialization failed: {e}")))
    }
}

fn attrs_to_value(attrs: &AttrMap) -> Value {
    Value::Object(attrs.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
}

/// Computes a [`Diff`] between a source and a destination snapshot.
pub struct DiffEngine<'a> {
    schema: &'a Schema,
    direction: DiffDirection,
}

impl<'a> DiffEngine<'a> {
    /// Create a diff engine over the shared schema.
    pub fn new(schema: &'a Schema) -> Self {
        Self {
            schema,
            direction: DiffDirection::default(),
        }
    }

    /// Builder-style method to set the diff direction.
    pub fn with_direction(mut self, direction: DiffDirection) -> Self {
        self.direction = direction;
        self
    }

    /// Compare the two snapshots, producing a diff whose application to the
    /// destination converges it on the source (or vice versa under
    /// [`DiffDirection::Reverse`]).
    pub fn diff(&self, source: &Snapshot, dest: &Snapshot) -> Result<Diff> {
        let (src, dst) = match self.direction {
            DiffDirection::Forward => (source, dest),
            DiffDirection::Reverse => (dest, source),
        };

        let mut diff = Diff::default();
        for model in &self.schema.top_level {
            let model_schema = self.schema.model(model)?;
            let src_records: Vec<&Record> = src.get_all(model).collect();
            let dst_records: Vec<&Record> = dst.get_all(model).collect();
            let group = self.diff_records(src, dst, model_schema, src_records, dst_records)?;
            if !group.is_empty() {
                diff.groups.insert(model.clone(), group);
            }
        }
        Ok(diff)
    }

    fn diff_records(
        &self,
        src: &Snapshot,
        dst: &Snapshot,
        model_schema: &ModelSchema,
        src_records: Vec<&Record>,
        dst_records: Vec<&Record>,
    ) -> Result<BTreeMap<UniqueId, DiffElement>> {
        let src_by_uid: HashMap<&str, &Record> =
            src_records.iter().map(|r| (r.uid().as_str(), *r)).collect();
        let dst_by_uid: HashMap<&str, &Record> =
            dst_records.iter().map(|r| (r.uid().as_str(), *r)).collect();

        let keys: BTreeSet<&str> = src_by_uid.keys().chain(dst_by_uid.keys()).copied().collect();

        let mut group = BTreeMap::new();
        for key in keys {
            let src_record = src_by_uid.get(key).copied();
            let dst_record = dst_by_uid.get(key).copied();

            let element = match (src_record, dst_record) {
                (Some(s), None) => {
                    if s.flags.skip_unmatched_source {
                        continue;
                    }
                    DiffElement {
                        model: model_schema.name.clone(),
                        key: key.to_string(),
                        action: DiffAction::Create,
                        identifiers: s.identifiers().clone(),
                        source_attrs: declared_attrs(s, model_schema),
                        dest_attrs: AttrMap::new(),
                        flags: s.flags,
                        children: self.diff_children(src, dst, model_schema, Some(s), None)?,
                    }
                }
                (None, Some(d)) => {
                    if d.flags.skip_unmatched_dest {
                        continue;
                    }
                    DiffElement {
                        model: model_schema.name.clone(),
                        key: key.to_string(),
                        action: DiffAction::Delete,
                        identifiers: d.identifiers().clone(),
                        source_attrs: AttrMap::new(),
                        dest_attrs: declared_attrs(d, model_schema),
                        flags: d.flags,
                        children: self.diff_children(src, dst, model_schema, None, Some(d))?,
                    }
                }
                (Some(s), Some(d)) => {
                    let mut source_attrs = AttrMap::new();
                    let mut dest_attrs = AttrMap::new();
                    for field in &model_schema.attribute_fields {
                        let sv = s.attributes.get(field);
                        let dv = d.attributes.get(field);
                        if sv != dv {
                            if let Some(v) = sv {
                                source_attrs.insert(field.clone(), v.clone());
                            }
                            if let Some(v) = dv {
                                dest_attrs.insert(field.clone(), v.clone());
                            }
                        }
                    }
                    let action = if source_attrs.is_empty() && dest_attrs.is_empty() {
                        DiffAction::Skip
                    } else {
                        DiffAction::Update
                    };
                    DiffElement {
                        model: model_schema.name.clone(),
                        key: key.to_string(),
                        action,
                        identifiers: s.identifiers().clone(),
                        source_attrs,
                        dest_attrs,
                        flags: d.flags,
                        children: self.diff_children(src, dst, model_schema, Some(s), Some(d))?,
                    }
                }
                (None, None) => continue,
            };

            group.insert(key.to_string(), element);
        }

        Ok(group)
    }

    /// Recurse into the declared child types of a record present on at least
    /// one side.
    fn diff_children(
        &self,
        src: &Snapshot,
        dst: &Snapshot,
        model_schema: &ModelSchema,
        src_record: Option<&Record>,
        dst_record: Option<&Record>,
    ) -> Result<Diff> {
        for record in [src_record, dst_record].into_iter().flatten() {
            for child_model in record.children.keys() {
                if !model_schema.has_child(child_model) {
                    return Err(Error::Structural(format!(
                        "child type '{child_model}' not declared for '{}'",
                        model_schema.name
                    )));
                }
            }
        }

        let mut diff = Diff::default();
        for child_model in &model_schema.children {
            let child_schema = self.schema.model(child_model)?;
            let src_children =
                resolve_children(src, src_record, child_model)?;
            let dst_children =
                resolve_children(dst, dst_record, child_model)?;
            if src_children.is_empty() && dst_children.is_empty() {
                continue;
            }
            let group =
                self.diff_records(src, dst, child_schema, src_children, dst_children)?;
            if !group.is_empty() {
                diff.groups.insert(child_model.clone(), group);
            }
        }
        Ok(diff)
    }
}

/// Look up a parent's child references in its own snapshot.
fn resolve_children<'s>(
    snapshot: &'s Snapshot,
    parent: Option<&Record>,
    child_model: &str,
) -> Result<Vec<&'s Record>> {
    let Some(parent) = parent else {
        return Ok(Vec::new());
    };
    let mut records = Vec::new();
    for uid in parent.children_of(child_model) {
        let record = snapshot.get(child_model, uid).map_err(|_| {
            Error::Structural(format!(
                "{child_model} '{uid}' referenced by {} '{}' is missing from snapshot '{}'",
                parent.model(),
                parent.uid(),
                snapshot.name()
            ))
        })?;
        records.push(record);
    }
    Ok(records)
}

/// Attribute values restricted to the schema-declared attribute fields.
fn declared_attrs(record: &Record, schema: &ModelSchema) -> AttrMap {
    schema
        .attribute_fields
        .iter()
        .filter_map(|field| {
            record
                .attributes
                .get(field)
                .map(|v| (field.clone(), v.clone()))
        })
        .collect()
}

/// Compute a diff between two snapshots sharing a schema.
///
/// Convenience wrapper over [`DiffEngine`] with the default direction.
pub fn compute_diff(source: &Snapshot, dest: &Snapshot) -> Result<Diff> {
    if source.schema() != dest.schema() {
        return Err(Error::Structural(
            "source and destination snapshots use different schemas".into(),
        ));
    }
    DiffEngine::new(source.schema()).diff(source, dest)
}
