//! Adapter boundary between the engine and a backing store.
//!
//! An adapter owns one snapshot and knows how to populate it from its system
//! (`load`) and how to apply a single create/update/delete when the sync
//! executor instructs it to. The engine never talks to a backing store
//! directly; it only sees this trait.

use crate::{error::Result, AttrMap, Record, Schema, Snapshot, UniqueId};
use std::sync::Arc;

/// Outcome of a destination-side delete.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteOutcome {
    /// The record was removed
    Deleted,
    /// The record could not be removed yet; the executor retries it after
    /// the walk, in cross-type dependency order
    Deferred,
}

/// One system's view of the inventory, with the operations the sync executor
/// needs to converge it.
///
/// The provided method bodies implement pure in-memory behavior against the
/// owned snapshot. Real adapters override them to also notify their backing
/// store, and must keep the snapshot and the store in step: either both are
/// updated or the operation returns an error. Backing-store refusals surface
/// as [`Error::Validation`](crate::Error::Validation) for creates/updates
/// and [`Error::ReferentialDelete`](crate::Error::ReferentialDelete) for
/// deletes; the executor records them without aborting the run.
pub trait Adapter {
    /// Name of the system this adapter fronts, for logs and results.
    fn name(&self) -> &str;

    /// The snapshot this adapter populates and maintains.
    fn snapshot(&self) -> &Snapshot;

    /// Mutable access to the snapshot, used when applying a diff.
    fn snapshot_mut(&mut self) -> &mut Snapshot;

    /// The shared schema, via the snapshot.
    fn schema(&self) -> &Arc<Schema> {
        self.snapshot().schema()
    }

    /// Populate the snapshot from the backing system.
    ///
    /// Any load-scoped cache must be invalidated before this starts; see
    /// [`LoadCache`](crate::LoadCache).
    fn load(&mut self) -> Result<()>;

    /// Create a record, registering it in the snapshot.
    fn create(
        &mut self,
        model: &str,
        identifiers: &AttrMap,
        attributes: &AttrMap,
    ) -> Result<UniqueId> {
        let schema = self.snapshot().schema().clone();
        let record = Record::new(schema.model(model)?, identifiers.clone(), attributes.clone())?;
        let uid = record.uid().clone();
        self.snapshot_mut().add(record)?;
        Ok(uid)
    }

    /// Update a record: merge the keys in `attributes` and drop the keys in
    /// `removed` (attributes the source no longer carries).
    fn update(
        &mut self,
        model: &str,
        uid: &str,
        attributes: &AttrMap,
        removed: &[String],
    ) -> Result<()> {
        self.snapshot_mut().update_attrs(model, uid, attributes, removed)
    }

    /// Delete a record, or signal that the delete must wait for the
    /// dependency-ordered pass at the end of the run.
    fn delete(&mut self, model: &str, uid: &str) -> Result<DeleteOutcome> {
        self.snapshot_mut().remove(model, uid)?;
        Ok(DeleteOutcome::Deleted)
    }

    /// Finalization hook, called once after the walk and the deferred-delete
    /// pass have finished.
    fn sync_complete(&mut self) -> Result<()> {
        Ok(())
    }
}

/// A plain in-memory adapter.
///
/// Useful as the destination in tests and for callers that only need the
/// reconciled snapshot, without a backing store of their own.
#[derive(Debug, Clone)]
pub struct MemoryAdapter {
    snapshot: Snapshot,
}

impl MemoryAdapter {
    /// Create an adapter around an empty snapshot.
    pub fn new(name: impl Into<String>, schema: Arc<Schema>) -> Self {
        Self {
            snapshot: Snapshot::new(name, schema),
        }
    }

    /// Wrap an already-populated snapshot.
    pub fn from_snapshot(snapshot: Snapshot) -> Self {
        Self { snapshot }
    }

    /// Consume the adapter, returning its snapshot.
    pub fn into_snapshot(self) -> Snapshot {
        self.snapshot
    }
}

impl Adapter for MemoryAdapter {
    fn name(&self) -> &str {
        self.snapshot.name()
    }

    fn snapshot(&self) -> &Snapshot {
        &self.snapshot
    }

    fn snapshot_mut(&mut self) -> &mut Snapshot {
        &mut self.snapshot
    }

    fn load(&mut self) -> Result<()> {
        // nothing to fetch; records are added directly via the snapshot
        Ok(())
    }
}
