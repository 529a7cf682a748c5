//! Ordering policies for applying sibling diff nodes.
//!
//! The diff tree stores siblings keyed alphabetically; a policy decides the
//! sequence they are applied in. Policies must be deterministic and yield
//! every sibling exactly once.

use crate::diff::{DiffAction, DiffElement};
use crate::UniqueId;
use std::collections::BTreeMap;

/// Decides the apply sequence among sibling diff nodes.
pub trait OrderingPolicy {
    /// Order the siblings of one parent. The result must be a permutation of
    /// the input values.
    fn order<'a>(&self, siblings: &'a BTreeMap<UniqueId, DiffElement>) -> Vec<&'a DiffElement>;
}

/// Default policy: alphabetical by node key.
#[derive(Debug, Clone, Copy, Default)]
pub struct AlphabeticalOrdering;

impl OrderingPolicy for AlphabeticalOrdering {
    fn order<'a>(&self, siblings: &'a BTreeMap<UniqueId, DiffElement>) -> Vec<&'a DiffElement> {
        siblings.values().collect()
    }
}

/// Policy for record types with intra-type dependencies.
///
/// Deletes are applied first so naming and uniqueness constraints are freed
/// before anything is created. Among creates, records whose `parent_field`
/// identifier is null (roots of the hierarchy) go before the rest, so a
/// child is never created ahead of its parent. Each partition keeps the
/// alphabetical key order as a stable secondary key.
#[derive(Debug, Clone)]
pub struct DependencyOrdering {
    /// Identifier field referencing the parent record, null at the root
    pub parent_field: String,
}

impl DependencyOrdering {
    /// Create a policy keyed on the given parent-reference identifier field.
    pub fn new(parent_field: impl Into<String>) -> Self {
        Self {
            parent_field: parent_field.into(),
        }
    }

    fn is_root(&self, element: &DiffElement) -> bool {
        element
            .identifiers
            .get(&self.parent_field)
            .is_some_and(serde_json::Value::is_null)
    }
}

impl OrderingPolicy for DependencyOrdering {
    fn order<'a>(&self, siblings: &'a BTreeMap<UniqueId, DiffElement>) -> Vec<&'a DiffElement> {
        let mut deletes = Vec::new();
        let mut root_creates = Vec::new();
        let mut rest = Vec::new();

        for element in siblings.values() {
            match element.action {
                DiffAction::Delete => deletes.push(element),
                DiffAction::Create if self.is_root(element) => root_creates.push(element),
                _ => rest.push(element),
            }
        }

        deletes
            .into_iter()
            .chain(root_creates)
            .chain(rest)
            .collect()
    }
}
