//! Snapshot - an adapter-populated view of one system's inventory.
//!
//! A snapshot holds records of multiple types, each type in an
//! insertion-ordered registry keyed by unique id. Iteration order is the
//! order records were added during `load()`, which keeps diff computation
//! deterministic for a given pair of loads.

use crate::{error::Result, AttrMap, Error, ModelName, Record, Schema, UniqueId};
use std::collections::HashMap;
use std::sync::Arc;

/// Insertion-ordered registry for a single record type.
#[derive(Debug, Clone, Default)]
struct TypeStore {
    order: Vec<UniqueId>,
    records: HashMap<UniqueId, Record>,
}

impl TypeStore {
    fn insert(&mut self, record: Record) {
        self.order.push(record.uid().clone());
        self.records.insert(record.uid().clone(), record);
    }

    fn remove(&mut self, uid: &str) -> Option<Record> {
        let record = self.records.remove(uid)?;
        self.order.retain(|u| u != uid);
        Some(record)
    }

    fn iter(&self) -> impl Iterator<Item = &Record> {
        self.order.iter().filter_map(|uid| self.records.get(uid))
    }
}

/// An in-memory collection of records representing one system's view of the
/// inventory at a point in time.
#[derive(Debug, Clone)]
pub struct Snapshot {
    /// Human-readable name of the system this snapshot was loaded from
    name: String,
    /// Shared schema; both sides of a diff must use the same one
    schema: Arc<Schema>,
    /// Registries by record type
    stores: HashMap<ModelName, TypeStore>,
}

impl Snapshot {
    /// Create an empty snapshot with registries for every schema model.
    pub fn new(name: impl Into<String>, schema: Arc<Schema>) -> Self {
        let mut stores = HashMap::new();
        for model in schema.models.keys() {
            stores.insert(model.clone(), TypeStore::default());
        }
        Self {
            name: name.into(),
            schema,
            stores,
        }
    }

    /// Snapshot name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The schema this snapshot was built against.
    pub fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    /// Register a record under its (type, unique id) key.
    ///
    /// Fails with [`Error::AlreadyExists`] on a duplicate key, and with
    /// [`Error::Structural`] if the record's type or one of its child types
    /// is not declared in the schema.
    pub fn add(&mut self, record: Record) -> Result<()> {
        let model_schema = self.schema.model(record.model())?;
        for child in record.children.keys() {
            if !model_schema.has_child(child) {
                return Err(Error::Structural(format!(
                    "child type '{child}' not declared for '{}'",
                    record.model()
                )));
            }
        }

        let store = self
            .stores
            .get_mut(record.model())
            .ok_or_else(|| Error::Structural(format!("record type '{}' not declared", record.model())))?;

        if store.records.contains_key(record.uid()) {
            return Err(Error::AlreadyExists {
                model: record.model().clone(),
                uid: record.uid().clone(),
            });
        }

        store.insert(record);
        Ok(())
    }

    /// Get a record by type and unique id.
    pub fn get(&self, model: &str, uid: &str) -> Result<&Record> {
        self.stores
            .get(model)
            .and_then(|s| s.records.get(uid))
            .ok_or_else(|| Error::NotFound {
                model: model.to_string(),
                uid: uid.to_string(),
            })
    }

    /// Get a record by type and identifier values.
    pub fn get_by_ids(&self, model: &str, identifiers: &AttrMap) -> Result<&Record> {
        let uid = crate::record::uid_for(self.schema.model(model)?, identifiers)?;
        self.get(model, &uid)
    }

    /// All records of a type, in insertion order. Empty for unknown types.
    pub fn get_all(&self, model: &str) -> impl Iterator<Item = &Record> {
        self.stores.get(model).into_iter().flat_map(TypeStore::iter)
    }

    /// Whether a record with this key is present.
    pub fn contains(&self, model: &str, uid: &str) -> bool {
        self.stores
            .get(model)
            .is_some_and(|s| s.records.contains_key(uid))
    }

    /// Count of records of a type.
    pub fn count(&self, model: &str) -> usize {
        self.stores.get(model).map_or(0, |s| s.records.len())
    }

    /// Count of records across all types.
    pub fn record_count(&self) -> usize {
        self.stores.values().map(|s| s.records.len()).sum()
    }

    /// Update a record's attributes: merge the keys in `attrs` and drop the
    /// keys in `removed`.
    pub fn update_attrs(
        &mut self,
        model: &str,
        uid: &str,
        attrs: &AttrMap,
        removed: &[String],
    ) -> Result<()> {
        let record = self
            .stores
            .get_mut(model)
            .and_then(|s| s.records.get_mut(uid))
            .ok_or_else(|| Error::NotFound {
                model: model.to_string(),
                uid: uid.to_string(),
            })?;
        record.update_attrs(attrs);
        record.remove_attrs(removed);
        Ok(())
    }

    /// Replace an existing record wholesale, keeping its registry position.
    pub fn replace(&mut self, record: Record) -> Result<()> {
        let store = self.stores.get_mut(record.model()).ok_or_else(|| {
            Error::Structural(format!("record type '{}' not declared", record.model()))
        })?;
        match store.records.get_mut(record.uid()) {
            Some(slot) => {
                *slot = record;
                Ok(())
            }
            None => Err(Error::NotFound {
                model: record.model().clone(),
                uid: record.uid().clone(),
            }),
        }
    }

    /// Remove a record, returning it.
    pub fn remove(&mut self, model: &str, uid: &str) -> Result<Record> {
        self.stores
            .get_mut(model)
            .and_then(|s| s.remove(uid))
            .ok_or_else(|| Error::NotFound {
                model: model.to_string(),
                uid: uid.to_string(),
            })
    }

    /// Register a child reference on an existing parent record.
    pub fn add_child_ref(
        &mut self,
        parent_model: &str,
        parent_uid: &str,
        child_model: &str,
        child_uid: &str,
    ) -> Result<()> {
        let parent = self
            .stores
            .get_mut(parent_model)
            .and_then(|s| s.records.get_mut(parent_uid))
            .ok_or_else(|| Error::NotFound {
                model: parent_model.to_string(),
                uid: parent_uid.to_string(),
            })?;
        parent.add_child(child_model, child_uid)
    }

    /// Drop a child reference from an existing parent record.
    pub fn remove_child_ref(
        &mut self,
        parent_model: &str,
        parent_uid: &str,
        child_model: &str,
        child_uid: &str,
    ) -> Result<()> {
        let parent = self
            .stores
            .get_mut(parent_model)
            .and_then(|s| s.records.get_mut(parent_uid))
            .ok_or_else(|| Error::NotFound {
                model: parent_model.to_string(),
                uid: parent_uid.to_string(),
            })?;
        parent.remove_child(child_model, child_uid)
    }
}
