//! Sync executor - applies a diff to a destination adapter.
//!
//! The executor walks the diff tree depth-first, record type by record type,
//! applying the configured ordering policy among siblings at each level.
//! Failures reported by the destination adapter are isolated per record: the
//! walk continues and the failures are attached to the run's result. Only
//! structural failures abort a run.

use crate::diff::{Diff, DiffAction, DiffElement};
use crate::order::{AlphabeticalOrdering, OrderingPolicy};
use crate::{error::Result, Adapter, DeleteOutcome, Error, ModelName, UniqueId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Instant;

/// State machine of a sync run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SyncStatus {
    /// Run constructed but not started
    Pending,
    /// Walk in progress
    Running,
    /// Every applied operation succeeded
    Completed,
    /// At least one per-record failure was recorded
    CompletedWithErrors,
    /// A structural failure aborted the walk
    Failed,
}

/// Per-record-type operation counts for a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionCounts {
    pub created: usize,
    pub updated: usize,
    pub deleted: usize,
    pub skipped: usize,
    pub failed: usize,
}

impl ActionCounts {
    fn add(&mut self, other: &ActionCounts) {
        self.created += other.created;
        self.updated += other.updated;
        self.deleted += other.deleted;
        self.skipped += other.skipped;
        self.failed += other.failed;
    }
}

/// A failure recorded against a single record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncError {
    /// Record type
    pub model: ModelName,
    /// Unique id of the record the failure is attached to
    pub key: UniqueId,
    /// The action that was being applied
    pub action: DiffAction,
    /// Human-readable failure description
    pub message: String,
}

/// Outcome of a sync run.
///
/// Counts are always fully populated, whatever the final status.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncResult {
    /// Final status of the run
    pub status: SyncStatus,
    /// Operation counts per record type
    pub counts: BTreeMap<ModelName, ActionCounts>,
    /// Per-record failures, in the order they occurred
    pub errors: Vec<SyncError>,
    /// Wall-clock duration of the run in milliseconds
    pub duration_ms: u64,
}

impl SyncResult {
    /// Counts summed across all record types.
    pub fn totals(&self) -> ActionCounts {
        let mut totals = ActionCounts::default();
        for counts in self.counts.values() {
            totals.add(counts);
        }
        totals
    }
}

/// A delete postponed until the dependency-ordered pass.
#[derive(Debug, Clone)]
struct DeferredDelete {
    model: ModelName,
    uid: UniqueId,
    parent: Option<(ModelName, UniqueId)>,
}

/// Mutable per-run state, owned by the executor and discarded with it.
#[derive(Default)]
struct RunState {
    counts: BTreeMap<ModelName, ActionCounts>,
    errors: Vec<SyncError>,
    deferred: Vec<DeferredDelete>,
}

impl RunState {
    fn counts_for(&mut self, model: &str) -> &mut ActionCounts {
        self.counts.entry(model.to_string()).or_default()
    }

    /// Record a non-fatal failure against a record, or propagate a fatal one
    /// after recording it.
    fn record_failure(
        &mut self,
        model: &str,
        key: &str,
        action: DiffAction,
        err: Error,
    ) -> Result<()> {
        tracing::warn!(model, key, %action, error = %err, "sync operation failed");
        self.counts_for(model).failed += 1;
        self.errors.push(SyncError {
            model: model.to_string(),
            key: key.to_string(),
            action,
            message: err.to_string(),
        });
        if err.is_fatal() {
            return Err(err);
        }
        Ok(())
    }
}

/// Parent record context carried while recursing into child diffs.
struct ParentCtx {
    model: ModelName,
    uid: UniqueId,
    /// Whether the parent record exists in the destination snapshot, so
    /// child references can be maintained on it
    present: bool,
}

/// Walks a [`Diff`] and applies it to a destination adapter.
pub struct SyncExecutor {
    status: SyncStatus,
    default_policy: Box<dyn OrderingPolicy>,
    model_policies: BTreeMap<ModelName, Box<dyn OrderingPolicy>>,
}

impl Default for SyncExecutor {
    fn default() -> Self {
        Self::new()
    }
}

impl SyncExecutor {
    /// Create an executor with the default alphabetical ordering.
    pub fn new() -> Self {
        Self {
            status: SyncStatus::Pending,
            default_policy: Box::new(AlphabeticalOrdering),
            model_policies: BTreeMap::new(),
        }
    }

    /// Status of the executor's run: `Pending` before [`execute`](Self::execute)
    /// starts, the terminal status of the last run afterwards.
    pub fn status(&self) -> SyncStatus {
        self.status
    }

    /// Builder-style method to replace the default ordering policy.
    pub fn with_policy(mut self, policy: Box<dyn OrderingPolicy>) -> Self {
        self.default_policy = policy;
        self
    }

    /// Builder-style method to set an ordering policy for one record type.
    pub fn with_model_policy(
        mut self,
        model: impl Into<ModelName>,
        policy: Box<dyn OrderingPolicy>,
    ) -> Self {
        self.model_policies.insert(model.into(), policy);
        self
    }

    /// Apply the diff to the destination adapter.
    ///
    /// Per-record failures do not stop the walk; a structural failure does.
    /// Deferred deletes are retried after the walk in the schema's canonical
    /// leaf-to-root order, then the adapter's `sync_complete` hook runs.
    pub fn execute(&mut self, diff: &Diff, dest: &mut dyn Adapter) -> SyncResult {
        let started = Instant::now();
        let mut run = RunState::default();

        self.status = SyncStatus::Running;
        tracing::info!(destination = dest.name(), "sync run started");

        let outcome = self
            .walk(diff, dest, &mut run)
            .and_then(|()| self.purge_deferred(dest, &mut run))
            .and_then(|()| dest.sync_complete());

        let status = match outcome {
            Err(err) => {
                if !err.is_fatal() || !matches!(run.errors.last(), Some(last) if last.message == err.to_string())
                {
                    run.errors.push(SyncError {
                        model: "-".into(),
                        key: "-".into(),
                        action: DiffAction::Skip,
                        message: err.to_string(),
                    });
                }
                SyncStatus::Failed
            }
            Ok(()) if run.errors.is_empty() => SyncStatus::Completed,
            Ok(()) => SyncStatus::CompletedWithErrors,
        };
        self.status = status;

        let result = SyncResult {
            status,
            counts: run.counts,
            errors: run.errors,
            duration_ms: started.elapsed().as_millis() as u64,
        };

        let totals = result.totals();
        tracing::info!(
            destination = dest.name(),
            status = ?result.status,
            created = totals.created,
            updated = totals.updated,
            deleted = totals.deleted,
            skipped = totals.skipped,
            failed = totals.failed,
            duration_ms = result.duration_ms,
            "sync run finished"
        );

        result
    }

    fn walk(&self, diff: &Diff, dest: &mut dyn Adapter, run: &mut RunState) -> Result<()> {
        // top-level groups go in the schema's declared order; anything else
        // (e.g. a hand-built diff) falls back to alphabetical
        let top_level = dest.schema().top_level.clone();
        for model in &top_level {
            if let Some(group) = diff.groups.get(model) {
                self.apply_group(model, group, None, dest, run)?;
            }
        }
        for (model, group) in &diff.groups {
            if !top_level.contains(model) {
                self.apply_group(model, group, None, dest, run)?;
            }
        }
        Ok(())
    }

    fn apply_group(
        &self,
        model: &str,
        group: &BTreeMap<UniqueId, DiffElement>,
        parent: Option<&ParentCtx>,
        dest: &mut dyn Adapter,
        run: &mut RunState,
    ) -> Result<()> {
        let policy = self
            .model_policies
            .get(model)
            .unwrap_or(&self.default_policy);
        for element in policy.order(group) {
            self.apply_element(element, parent, dest, run)?;
        }
        Ok(())
    }

    fn apply_element(
        &self,
        element: &DiffElement,
        parent: Option<&ParentCtx>,
        dest: &mut dyn Adapter,
        run: &mut RunState,
    ) -> Result<()> {
        let model = element.model.as_str();
        let key = element.key.as_str();

        // whether the record ends up present in the destination snapshot,
        // for child-reference maintenance while recursing
        let mut present = true;

        match element.action {
            DiffAction::Skip => {
                run.counts_for(model).skipped += 1;
            }
            DiffAction::Create => {
                match dest.create(model, &element.identifiers, &element.source_attrs) {
                    Ok(uid) => {
                        run.counts_for(model).created += 1;
                        tracing::debug!(model, key, "record created");
                        if let Some(parent) = parent.filter(|p| p.present) {
                            if let Err(err) = dest.snapshot_mut().add_child_ref(
                                &parent.model,
                                &parent.uid,
                                model,
                                &uid,
                            ) {
                                run.record_failure(model, key, DiffAction::Create, err)?;
                            }
                        }
                    }
                    Err(err) => {
                        present = false;
                        run.record_failure(model, key, DiffAction::Create, err)?;
                    }
                }
            }
            DiffAction::Update => {
                let removed = element.removed_attr_keys();
                match dest.update(model, key, &element.source_attrs, &removed) {
                    Ok(()) => {
                        run.counts_for(model).updated += 1;
                        tracing::debug!(model, key, "record updated");
                    }
                    Err(err) => run.record_failure(model, key, DiffAction::Update, err)?,
                }
            }
            DiffAction::Delete => match dest.delete(model, key) {
                Ok(DeleteOutcome::Deleted) => {
                    present = false;
                    run.counts_for(model).deleted += 1;
                    tracing::debug!(model, key, "record deleted");
                    unlink_parent(parent, model, key, dest);
                }
                Ok(DeleteOutcome::Deferred) => {
                    tracing::debug!(model, key, "delete deferred");
                    run.deferred.push(DeferredDelete {
                        model: model.to_string(),
                        uid: key.to_string(),
                        parent: parent
                            .filter(|p| p.present)
                            .map(|p| (p.model.clone(), p.uid.clone())),
                    });
                }
                Err(err) => run.record_failure(model, key, DiffAction::Delete, err)?,
            },
        }

        if element.action == DiffAction::Delete && element.flags.skip_children_on_delete {
            return Ok(());
        }

        let ctx = ParentCtx {
            model: element.model.clone(),
            uid: element.key.clone(),
            present,
        };
        for (child_model, group) in &element.children.groups {
            self.apply_group(child_model, group, Some(&ctx), dest, run)?;
        }
        Ok(())
    }

    /// Second, explicit ordering pass: deletes the walk could not perform,
    /// in leaf-to-root order over the child-containment graph so dependent
    /// types go before the types they reference.
    fn purge_deferred(&self, dest: &mut dyn Adapter, run: &mut RunState) -> Result<()> {
        if run.deferred.is_empty() {
            return Ok(());
        }

        let order = dest.schema().delete_order();
        let rank = |model: &str| {
            order
                .iter()
                .position(|m| m == model)
                .unwrap_or(order.len())
        };
        let mut deferred = std::mem::take(&mut run.deferred);
        deferred.sort_by_key(|d| rank(&d.model));

        for d in deferred {
            match dest.delete(&d.model, &d.uid) {
                Ok(DeleteOutcome::Deleted) => {
                    run.counts_for(&d.model).deleted += 1;
                    tracing::debug!(model = %d.model, key = %d.uid, "deferred delete applied");
                    let parent = d
                        .parent
                        .as_ref()
                        .map(|(model, uid)| ParentCtx {
                            model: model.clone(),
                            uid: uid.clone(),
                            present: true,
                        });
                    unlink_parent(parent.as_ref(), &d.model, &d.uid, dest);
                }
                Ok(DeleteOutcome::Deferred) => {
                    let err = Error::ReferentialDelete {
                        model: d.model.clone(),
                        uid: d.uid.clone(),
                        reason: "still deferred after dependency-ordered pass".into(),
                    };
                    run.record_failure(&d.model, &d.uid, DiffAction::Delete, err)?;
                }
                Err(err) => run.record_failure(&d.model, &d.uid, DiffAction::Delete, err)?,
            }
        }
        Ok(())
    }
}

/// Drop the child reference from a still-present parent after a delete.
/// The reference may already be gone if the parent was rebuilt mid-run.
fn unlink_parent(parent: Option<&ParentCtx>, child_model: &str, child_uid: &str, dest: &mut dyn Adapter) {
    if let Some(parent) = parent.filter(|p| p.present) {
        if dest.snapshot().contains(&parent.model, &parent.uid) {
            let _ = dest
                .snapshot_mut()
                .remove_child_ref(&parent.model, &parent.uid, child_model, child_uid);
        }
    }
}

/// Apply a diff to a destination adapter with the given ordering policy.
///
/// Convenience wrapper over [`SyncExecutor`].
pub fn execute_sync(
    diff: &Diff,
    dest: &mut dyn Adapter,
    policy: Box<dyn OrderingPolicy>,
) -> SyncResult {
    let mut executor = SyncExecutor::new().with_policy(policy);
    executor.execute(diff, dest)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diff::compute_diff;
    use crate::{attrs, AttrMap, MemoryAdapter, ModelSchema, Record, Schema, Snapshot};
    use std::collections::BTreeSet;
    use std::sync::Arc;

    fn inventory_schema() -> Arc<Schema> {
        Arc::new(
            Schema::new()
                .with_model(
                    ModelSchema::new("device", ["name"], ["serial"]).with_child("interface"),
                )
                .with_model(ModelSchema::new(
                    "interface",
                    ["device", "name"],
                    ["description"],
                ))
                .with_top_level("device"),
        )
    }

    fn add_device(snap: &mut Snapshot, name: &str, serial: &str) {
        let record = Record::new(
            snap.schema().model("device").unwrap(),
            attrs! {"name" => name},
            attrs! {"serial" => serial},
        )
        .unwrap();
        snap.add(record).unwrap();
    }

    fn add_interface(snap: &mut Snapshot, device: &str, name: &str, description: &str) {
        let record = Record::new(
            snap.schema().model("interface").unwrap(),
            attrs! {"device" => device, "name" => name},
            attrs! {"description" => description},
        )
        .unwrap();
        let uid = record.uid().clone();
        snap.add(record).unwrap();
        snap.add_child_ref("device", device, "interface", &uid)
            .unwrap();
    }

    /// Wrapper adapter that fails or defers configured operations, standing
    /// in for a backing store with constraints.
    struct ConstrainedAdapter {
        inner: MemoryAdapter,
        reject_creates: BTreeSet<String>,
        refuse_deletes: BTreeSet<String>,
        defer_deletes: BTreeSet<String>,
        /// uids deleted, in call order, as "model:uid"
        delete_log: Vec<String>,
    }

    impl ConstrainedAdapter {
        fn new(inner: MemoryAdapter) -> Self {
            Self {
                inner,
                reject_creates: BTreeSet::new(),
                refuse_deletes: BTreeSet::new(),
                defer_deletes: BTreeSet::new(),
                delete_log: Vec::new(),
            }
        }
    }

    impl Adapter for ConstrainedAdapter {
        fn name(&self) -> &str {
            self.inner.name()
        }
        fn snapshot(&self) -> &Snapshot {
            self.inner.snapshot()
        }
        fn snapshot_mut(&mut self) -> &mut Snapshot {
            self.inner.snapshot_mut()
        }
        fn load(&mut self) -> Result<()> {
            self.inner.load()
        }

        fn create(
            &mut self,
            model: &str,
            identifiers: &AttrMap,
            attributes: &AttrMap,
        ) -> Result<UniqueId> {
            let schema = self.snapshot().schema().clone();
            let uid = crate::record::uid_for(schema.model(model)?, identifiers)?;
            if self.reject_creates.contains(&uid) {
                return Err(Error::Validation {
                    model: model.to_string(),
                    uid,
                    reason: "constraint violation".into(),
                });
            }
            self.inner.create(model, identifiers, attributes)
        }

        fn delete(&mut self, model: &str, uid: &str) -> Result<DeleteOutcome> {
            if self.refuse_deletes.contains(uid) {
                return Err(Error::ReferentialDelete {
                    model: model.to_string(),
                    uid: uid.to_string(),
                    reason: "dependent records remain".into(),
                });
            }
            if self.defer_deletes.remove(uid) {
                return Ok(DeleteOutcome::Deferred);
            }
            self.delete_log.push(format!("{model}:{uid}"));
            self.inner.delete(model, uid)
        }
    }

    #[test]
    fn applying_a_diff_converges_the_destination() {
        let schema = inventory_schema();
        let mut src = Snapshot::new("sot", schema.clone());
        add_device(&mut src, "r1", "A");
        add_interface(&mut src, "r1", "eth0", "uplink");
        let mut dest = MemoryAdapter::new("controller", schema);

        let diff = compute_diff(&src, dest.snapshot()).unwrap();
        let result = SyncExecutor::new().execute(&diff, &mut dest);

        assert_eq!(result.status, SyncStatus::Completed);
        assert_eq!(result.counts["device"].created, 1);
        assert_eq!(result.counts["interface"].created, 1);
        assert_eq!(
            dest.snapshot().get("device", "r1").unwrap().children_of("interface"),
            ["r1__eth0"]
        );

        // fixed point: a second diff is all skip
        let rediff = compute_diff(&src, dest.snapshot()).unwrap();
        assert!(!rediff.has_diffs());
        assert_eq!(rediff.summary().skip, 2);
    }

    #[test]
    fn update_is_applied_in_place() {
        let schema = inventory_schema();
        let mut src = Snapshot::new("sot", schema.clone());
        add_device(&mut src, "r1", "A");
        let mut dest = MemoryAdapter::new("controller", schema);
        add_device(dest.snapshot_mut(), "r1", "B");

        let diff = compute_diff(&src, dest.snapshot()).unwrap();
        let result = SyncExecutor::new().execute(&diff, &mut dest);

        assert_eq!(result.status, SyncStatus::Completed);
        assert_eq!(result.counts["device"].updated, 1);
        assert_eq!(
            dest.snapshot().get("device", "r1").unwrap().attributes,
            attrs! {"serial" => "A"}
        );
    }

    #[test]
    fn update_drops_attributes_absent_from_source() {
        let schema = inventory_schema();
        let mut src = Snapshot::new("sot", schema.clone());
        let bare = Record::new(
            schema.model("device").unwrap(),
            attrs! {"name" => "r1"},
            AttrMap::new(),
        )
        .unwrap();
        src.add(bare).unwrap();
        let mut dest = MemoryAdapter::new("controller", schema);
        add_device(dest.snapshot_mut(), "r1", "B");

        let diff = compute_diff(&src, dest.snapshot()).unwrap();
        assert_eq!(diff.groups["device"]["r1"].action, DiffAction::Update);

        let result = SyncExecutor::new().execute(&diff, &mut dest);

        assert_eq!(result.status, SyncStatus::Completed);
        assert_eq!(result.counts["device"].updated, 1);
        assert!(dest
            .snapshot()
            .get("device", "r1")
            .unwrap()
            .attributes
            .is_empty());

        // fixed point: the stale attribute is gone, not just overwritten
        let rediff = compute_diff(&src, dest.snapshot()).unwrap();
        assert!(!rediff.has_diffs());
    }

    #[test]
    fn status_moves_from_pending_to_terminal() {
        let schema = inventory_schema();
        let mut src = Snapshot::new("sot", schema.clone());
        add_device(&mut src, "r1", "A");
        let mut dest = MemoryAdapter::new("controller", schema);

        let mut executor = SyncExecutor::new();
        assert_eq!(executor.status(), SyncStatus::Pending);

        let diff = compute_diff(&src, dest.snapshot()).unwrap();
        let result = executor.execute(&diff, &mut dest);

        assert_eq!(result.status, SyncStatus::Completed);
        assert_eq!(executor.status(), SyncStatus::Completed);
    }

    #[test]
    fn delete_removes_record_and_parent_reference() {
        let schema = inventory_schema();
        let mut src = Snapshot::new("sot", schema.clone());
        add_device(&mut src, "r1", "A");
        let mut dest = MemoryAdapter::new("controller", schema);
        add_device(dest.snapshot_mut(), "r1", "A");
        add_interface(dest.snapshot_mut(), "r1", "eth9", "stale");

        let diff = compute_diff(&src, dest.snapshot()).unwrap();
        let result = SyncExecutor::new().execute(&diff, &mut dest);

        assert_eq!(result.status, SyncStatus::Completed);
        assert_eq!(result.counts["interface"].deleted, 1);
        assert!(!dest.snapshot().contains("interface", "r1__eth9"));
        assert!(dest
            .snapshot()
            .get("device", "r1")
            .unwrap()
            .children_of("interface")
            .is_empty());
    }

    #[test]
    fn skip_nodes_are_counted_not_applied() {
        let schema = inventory_schema();
        let mut src = Snapshot::new("sot", schema.clone());
        add_device(&mut src, "r1", "A");
        let mut dest = MemoryAdapter::new("controller", schema);
        add_device(dest.snapshot_mut(), "r1", "A");

        let diff = compute_diff(&src, dest.snapshot()).unwrap();
        let result = SyncExecutor::new().execute(&diff, &mut dest);

        assert_eq!(result.status, SyncStatus::Completed);
        assert_eq!(result.counts["device"].skipped, 1);
        assert_eq!(result.totals().created, 0);
    }

    #[test]
    fn per_record_failures_do_not_stop_the_walk() {
        let schema = inventory_schema();
        let mut src = Snapshot::new("sot", schema.clone());
        add_device(&mut src, "r1", "A");
        add_device(&mut src, "r2", "B");
        add_device(&mut src, "r3", "C");

        let mut dest = ConstrainedAdapter::new(MemoryAdapter::new("controller", schema));
        dest.reject_creates.insert("r2".into());

        let diff = compute_diff(&src, dest.snapshot()).unwrap();
        let result = SyncExecutor::new().execute(&diff, &mut dest);

        assert_eq!(result.status, SyncStatus::CompletedWithErrors);
        assert_eq!(result.counts["device"].created, 2);
        assert_eq!(result.counts["device"].failed, 1);
        assert_eq!(result.errors.len(), 1);
        assert_eq!(result.errors[0].key, "r2");
        assert_eq!(result.errors[0].action, DiffAction::Create);
        assert!(dest.snapshot().contains("device", "r1"));
        assert!(dest.snapshot().contains("device", "r3"));
    }

    #[test]
    fn referential_delete_failure_is_isolated() {
        let schema = inventory_schema();
        let mut src = Snapshot::new("sot", schema.clone());
        add_device(&mut src, "r2", "B");
        let mut dest = ConstrainedAdapter::new(MemoryAdapter::new("controller", schema));
        add_device(dest.snapshot_mut(), "r1", "A");
        dest.refuse_deletes.insert("r1".into());

        let diff = compute_diff(&src, dest.snapshot()).unwrap();
        let result = SyncExecutor::new().execute(&diff, &mut dest);

        assert_eq!(result.status, SyncStatus::CompletedWithErrors);
        assert_eq!(result.errors.len(), 1);
        assert!(result.errors[0].message.contains("delete refused"));
        // the record that failed to delete is left in place
        assert!(dest.snapshot().contains("device", "r1"));
        // the rest of the walk still ran
        assert!(dest.snapshot().contains("device", "r2"));
    }

    #[test]
    fn deferred_deletes_run_leaf_to_root_after_the_walk() {
        let schema = inventory_schema();
        let src = Snapshot::new("sot", schema.clone());
        let mut dest = ConstrainedAdapter::new(MemoryAdapter::new("controller", schema));
        add_device(dest.snapshot_mut(), "r1", "A");
        add_interface(dest.snapshot_mut(), "r1", "eth0", "uplink");
        // the device delete cannot run while its interface exists
        dest.defer_deletes.insert("r1".into());
        dest.defer_deletes.insert("r1__eth0".into());

        let diff = compute_diff(&src, dest.snapshot()).unwrap();
        let result = SyncExecutor::new().execute(&diff, &mut dest);

        assert_eq!(result.status, SyncStatus::Completed);
        assert_eq!(result.totals().deleted, 2);
        assert_eq!(dest.delete_log, ["interface:r1__eth0", "device:r1"]);
        assert_eq!(dest.snapshot().record_count(), 0);
    }

    #[test]
    fn structural_failure_aborts_the_run() {
        struct Broken(MemoryAdapter);
        impl Adapter for Broken {
            fn name(&self) -> &str {
                self.0.name()
            }
            fn snapshot(&self) -> &Snapshot {
                self.0.snapshot()
            }
            fn snapshot_mut(&mut self) -> &mut Snapshot {
                self.0.snapshot_mut()
            }
            fn load(&mut self) -> Result<()> {
                Ok(())
            }
            fn create(&mut self, _: &str, _: &AttrMap, _: &AttrMap) -> Result<UniqueId> {
                Err(Error::Structural("registry corrupted".into()))
            }
        }

        let schema = inventory_schema();
        let mut src = Snapshot::new("sot", schema.clone());
        add_device(&mut src, "r1", "A");
        add_device(&mut src, "r2", "B");
        let mut dest = Broken(MemoryAdapter::new("controller", schema));

        let diff = compute_diff(&src, dest.snapshot()).unwrap();
        let result = SyncExecutor::new().execute(&diff, &mut dest);

        assert_eq!(result.status, SyncStatus::Failed);
        // aborted on the first record, the second was never attempted
        assert_eq!(result.errors.len(), 1);
        assert_eq!(result.totals().created, 0);
    }

    #[test]
    fn skip_children_on_delete_suppresses_recursion() {
        let schema = inventory_schema();
        let src = Snapshot::new("sot", schema.clone());
        let mut dest = ConstrainedAdapter::new(MemoryAdapter::new("controller", schema.clone()));

        let device = Record::new(
            schema.model("device").unwrap(),
            attrs! {"name" => "r1"},
            attrs! {"serial" => "A"},
        )
        .unwrap()
        .with_flags(crate::RecordFlags {
            skip_children_on_delete: true,
            ..crate::RecordFlags::default()
        });
        dest.snapshot_mut().add(device).unwrap();
        add_interface(dest.snapshot_mut(), "r1", "eth0", "uplink");

        let diff = compute_diff(&src, dest.snapshot()).unwrap();
        let result = SyncExecutor::new().execute(&diff, &mut dest);

        // only the device was deleted; its interface was never visited
        assert_eq!(result.counts["device"].deleted, 1);
        assert!(result.counts.get("interface").is_none());
        assert_eq!(dest.delete_log, ["device:r1"]);
    }

    #[test]
    fn custom_model_policy_is_used_for_that_group() {
        use crate::order::DependencyOrdering;

        let area_schema = Arc::new(
            Schema::new()
                .with_model(ModelSchema::new("area", ["name", "parent"], ["kind"]))
                .with_top_level("area"),
        );
        let mut src = Snapshot::new("sot", area_schema.clone());
        for (name, parent) in [
            ("backbone", serde_json::Value::Null),
            ("area1", serde_json::json!("backbone")),
        ] {
            let record = Record::new(
                area_schema.model("area").unwrap(),
                attrs! {"name" => name, "parent" => parent},
                attrs! {"kind" => "ospf"},
            )
            .unwrap();
            src.add(record).unwrap();
        }

        /// Fails any create whose parent is not yet present.
        struct ParentChecking(MemoryAdapter);
        impl Adapter for ParentChecking {
            fn name(&self) -> &str {
                self.0.name()
            }
            fn snapshot(&self) -> &Snapshot {
                self.0.snapshot()
            }
            fn snapshot_mut(&mut self) -> &mut Snapshot {
                self.0.snapshot_mut()
            }
            fn load(&mut self) -> Result<()> {
                Ok(())
            }
            fn create(
                &mut self,
                model: &str,
                identifiers: &AttrMap,
                attributes: &AttrMap,
            ) -> Result<UniqueId> {
                if let Some(parent) = identifiers.get("parent").and_then(|v| v.as_str()) {
                    let exists = self
                        .snapshot()
                        .get_all(model)
                        .any(|r| r.identifiers().get("name").and_then(|v| v.as_str()) == Some(parent));
                    if !exists {
                        return Err(Error::Validation {
                            model: model.to_string(),
                            uid: parent.to_string(),
                            reason: "parent not created yet".into(),
                        });
                    }
                }
                self.0.create(model, identifiers, attributes)
            }
        }

        let mut dest = ParentChecking(MemoryAdapter::new("controller", area_schema));
        let diff = compute_diff(&src, dest.snapshot()).unwrap();

        // alphabetical order would try "area1" before "backbone" and fail;
        // the dependency policy creates the parentless area first
        let result = SyncExecutor::new()
            .with_model_policy("area", Box::new(DependencyOrdering::new("parent")))
            .execute(&diff, &mut dest);

        assert_eq!(result.status, SyncStatus::Completed);
        assert_eq!(result.counts["area"].created, 2);
    }

    mod property_tests {
        use super::*;
        use proptest::prelude::*;

        fn arb_devices() -> impl Strategy<Value = Vec<(String, String)>> {
            proptest::collection::btree_map("[a-z]{1,6}", "[A-Z]{1,4}", 0..16)
                .prop_map(|m| m.into_iter().collect())
        }

        proptest! {
            #[test]
            fn sync_reaches_a_fixed_point(
                src_devices in arb_devices(),
                dst_devices in arb_devices(),
            ) {
                let schema = inventory_schema();
                let mut src = Snapshot::new("sot", schema.clone());
                for (name, serial) in &src_devices {
                    add_device(&mut src, name, serial);
                }
                let mut dest = MemoryAdapter::new("controller", schema);
                for (name, serial) in &dst_devices {
                    add_device(dest.snapshot_mut(), name, serial);
                }

                let diff = compute_diff(&src, dest.snapshot()).unwrap();
                let result = SyncExecutor::new().execute(&diff, &mut dest);
                prop_assert_eq!(result.status, SyncStatus::Completed);

                let rediff = compute_diff(&src, dest.snapshot()).unwrap();
                prop_assert!(!rediff.has_diffs());
            }
        }
    }
}
