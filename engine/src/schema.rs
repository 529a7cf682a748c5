//! Model schema definitions.
//!
//! A schema declares the record types a snapshot may hold: which fields make
//! up a record's identity, which fields are diffable attributes, and which
//! types are nested as children of which. Both snapshots in a sync run must
//! share the same schema, otherwise their diffs are meaningless.

use crate::{error::Result, Error, ModelName};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};

/// Schema for a single record type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelSchema {
    /// Record type name (e.g. "device")
    pub name: ModelName,
    /// Ordered fields that make up a record's identity
    pub identifier_fields: Vec<String>,
    /// Fields compared by the diff engine
    pub attribute_fields: Vec<String>,
    /// Record types nested under this one
    pub children: Vec<ModelName>,
}

impl ModelSchema {
    /// Create a new model schema.
    pub fn new<I, A>(name: impl Into<ModelName>, identifier_fields: I, attribute_fields: A) -> Self
    where
        I: IntoIterator,
        I::Item: Into<String>,
        A: IntoIterator,
        A::Item: Into<String>,
    {
        Self {
            name: name.into(),
            identifier_fields: identifier_fields.into_iter().map(Into::into).collect(),
            attribute_fields: attribute_fields.into_iter().map(Into::into).collect(),
            children: Vec::new(),
        }
    }

    /// Builder-style method to declare a child record type.
    pub fn with_child(mut self, child: impl Into<ModelName>) -> Self {
        self.children.push(child.into());
        self
    }

    /// Whether the given record type is a declared child of this one.
    pub fn has_child(&self, child: &str) -> bool {
        self.children.iter().any(|c| c == child)
    }
}

/// Schema for an entire snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Schema {
    /// Model schemas by record type name
    pub models: HashMap<ModelName, ModelSchema>,
    /// Record types that are roots for diffing, in diff/apply order
    pub top_level: Vec<ModelName>,
}

impl Schema {
    /// Create an empty schema.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a model to the schema.
    pub fn add_model(&mut self, model: ModelSchema) -> &mut Self {
        self.models.insert(model.name.clone(), model);
        self
    }

    /// Builder-style method to add a model.
    pub fn with_model(mut self, model: ModelSchema) -> Self {
        self.add_model(model);
        self
    }

    /// Builder-style method to declare a top-level record type.
    pub fn with_top_level(mut self, name: impl Into<ModelName>) -> Self {
        self.top_level.push(name.into());
        self
    }

    /// Get a model schema by name.
    pub fn get_model(&self, name: &str) -> Option<&ModelSchema> {
        self.models.get(name)
    }

    /// Get a model schema by name, failing structurally if undeclared.
    pub fn model(&self, name: &str) -> Result<&ModelSchema> {
        self.models
            .get(name)
            .ok_or_else(|| Error::Structural(format!("record type '{name}' not declared")))
    }

    /// Check internal consistency: every child and top-level type must be a
    /// declared model, and every model needs at least one identifier field.
    pub fn validate(&self) -> Result<()> {
        for model in self.models.values() {
            if model.identifier_fields.is_empty() {
                return Err(Error::Structural(format!(
                    "record type '{}' declares no identifier fields",
                    model.name
                )));
            }
            for child in &model.children {
                if !self.models.contains_key(child) {
                    return Err(Error::Structural(format!(
                        "child type '{child}' of '{}' not declared",
                        model.name
                    )));
                }
            }
        }
        for name in &self.top_level {
            if !self.models.contains_key(name) {
                return Err(Error::Structural(format!(
                    "top-level type '{name}' not declared"
                )));
            }
        }
        Ok(())
    }

    /// Canonical order for deferred deletions: leaf-to-root on the
    /// child-containment graph, so dependent records go before the records
    /// they reference.
    ///
    /// A model is emitted once all of its children have been emitted.
    /// Self-containment (e.g. locations inside locations) is ignored, and any
    /// remaining containment cycle is broken alphabetically so the order is
    /// always total and deterministic.
    pub fn delete_order(&self) -> Vec<ModelName> {
        let mut remaining: BTreeSet<&str> = self.models.keys().map(String::as_str).collect();
        let mut order = Vec::with_capacity(self.models.len());

        while !remaining.is_empty() {
            let mut ready = None;
            for name in &remaining {
                let all_children_emitted = match self.models.get(*name) {
                    Some(model) => model
                        .children
                        .iter()
                        .all(|c| c == *name || !remaining.contains(c.as_str())),
                    None => true,
                };
                if all_children_emitted {
                    ready = Some(*name);
                    break;
                }
            }
            let next: ModelName = match ready {
                Some(name) => name.to_string(),
                // cycle: fall back to alphabetical
                None => match remaining.iter().next() {
                    Some(name) => name.to_string(),
                    None => break,
                },
            };
            remaining.remove(next.as_str());
            order.push(next);
        }

        order
    }
}
