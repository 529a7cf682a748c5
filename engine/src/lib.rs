//! # Trellis Engine
//!
//! A deterministic diff-and-sync engine for infrastructure inventory data.
//!
//! This crate compares two views of the same inventory - a source of truth
//! and a destination system - and converges the destination onto the source.
//! The same pair of snapshots always produces the same diff and the same
//! apply sequence.
//!
//! ## Design Principles
//!
//! - **No IO**: the engine never talks to a backing store; adapters do
//! - **Deterministic**: same snapshots, same diff, same apply order
//! - **Isolated failures**: one refused record never aborts a sync run
//! - **Testable**: pure logic over in-memory snapshots, no mocks needed
//!
//! ## Core Concepts
//!
//! ### Records and Snapshots
//!
//! Inventory data is held as typed [`Record`]s inside a [`Snapshot`]. A
//! record's identity is its type plus the schema-declared identifier fields;
//! the remaining attributes are what the diff engine compares. Records
//! reference child records by unique id, forming a containment tree
//! (devices contain interfaces, interfaces contain addresses).
//!
//! ### Schema
//!
//! A shared [`Schema`] declares every record type: identifier fields,
//! diffable attributes, child types, and which types are diff roots. Both
//! snapshots in a run must use the same schema.
//!
//! ### Diff
//!
//! [`compute_diff`] (or [`DiffEngine`] for the reverse direction) walks both
//! snapshots and produces a [`Diff`] tree of create/update/delete/skip nodes
//! mirroring the containment hierarchy.
//!
//! ### Sync
//!
//! [`SyncExecutor`] applies a diff to a destination [`Adapter`], ordering
//! siblings with an [`OrderingPolicy`](order::OrderingPolicy) and retrying
//! deferred deletes in dependency order. The [`SyncResult`] carries per-type
//! action counts and every per-record failure.
//!
//! ## Quick Start
//!
//! ```rust
//! use std::sync::Arc;
//! use trellis_engine::{
//!     attrs, compute_diff, Adapter, MemoryAdapter, ModelSchema, Record, Schema,
//!     Snapshot, SyncExecutor, SyncStatus,
//! };
//!
//! // 1. Declare the shared schema
//! let schema = Arc::new(
//!     Schema::new()
//!         .with_model(ModelSchema::new("device", ["name"], ["serial"]).with_child("interface"))
//!         .with_model(ModelSchema::new("interface", ["device", "name"], ["description"]))
//!         .with_top_level("device"),
//! );
//!
//! // 2. Populate the source of truth
//! let mut source = Snapshot::new("netbox", schema.clone());
//! let device = Record::new(
//!     schema.model("device").unwrap(),
//!     attrs! {"name" => "r1"},
//!     attrs! {"serial" => "A"},
//! )
//! .unwrap();
//! source.add(device).unwrap();
//!
//! // 3. Diff against an empty destination and apply
//! let mut dest = MemoryAdapter::new("controller", schema);
//! let diff = compute_diff(&source, dest.snapshot()).unwrap();
//! assert!(diff.has_diffs());
//!
//! let result = SyncExecutor::new().execute(&diff, &mut dest);
//! assert_eq!(result.status, SyncStatus::Completed);
//! assert!(dest.snapshot().contains("device", "r1"));
//! ```
//!
//! ## Adapters
//!
//! The [`Adapter`] trait is the boundary to real systems: `load()` populates
//! the snapshot, and the create/update/delete methods apply one diff node
//! each. The provided [`MemoryAdapter`] is pure in-memory; adapters backed by
//! an API keep a [`LoadCache`] to avoid resolving the same object twice in
//! one load.

pub mod adapter;
pub mod cache;
pub mod diff;
pub mod error;
pub mod executor;
pub mod order;
pub mod record;
pub mod schema;
pub mod snapshot;

// Re-export main types at crate root
pub use adapter::{Adapter, DeleteOutcome, MemoryAdapter};
pub use cache::{CacheStats, LoadCache};
pub use diff::{compute_diff, Diff, DiffAction, DiffDirection, DiffElement, DiffEngine, DiffSummary};
pub use error::{Error, Result};
pub use executor::{
    execute_sync, ActionCounts, SyncError, SyncExecutor, SyncResult, SyncStatus,
};
pub use order::{AlphabeticalOrdering, DependencyOrdering, OrderingPolicy};
pub use record::{uid_for, Record, RecordFlags};
pub use schema::{ModelSchema, Schema};
pub use snapshot::Snapshot;

// Used by the `attrs!` macro expansion
#[doc(hidden)]
pub use serde_json;

/// Type aliases for clarity
pub type ModelName = String;
pub type UniqueId = String;
/// Ordered field-value map used for identifiers and attributes.
pub type AttrMap = std::collections::BTreeMap<String, serde_json::Value>;

/// Build an [`AttrMap`] from `key => value` pairs.
///
/// Values go through [`serde_json::json!`], so literals, variables, and
/// nested JSON all work:
///
/// ```rust
/// use trellis_engine::attrs;
///
/// let map = attrs! {"name" => "r1", "vid" => 100, "tags" => ["core", "edge"]};
/// assert_eq!(map["vid"], 100);
/// ```
#[macro_export]
macro_rules! attrs {
    () => { $crate::AttrMap::new() };
    ($($key:expr => $value:expr),+ $(,)?) => {{
        let mut map = $crate::AttrMap::new();
        $(map.insert(($key).into(), $crate::serde_json::json!($value));)+
        map
    }};
}
