//! Reconciliation planning.
//!
//! A plan turns the previously applied entry list and a new one into the
//! ordered operations that converge the first onto the second. Entries are
//! matched by id only. An entry without an id gets a fresh placeholder for
//! the pass, so it is always created and, on the next pass, always removed.

use std::collections::{HashMap, HashSet};
use std::fmt;

use sprig_config::EntryConfig;
use tracing::warn;
use uuid::Uuid;

/// One step of a reconciliation pass.
///
/// Every carried [`EntryConfig`] has its id filled in.
#[derive(Debug, Clone, PartialEq)]
pub enum ReconcileOp {
    /// Build a new entry.
    Create(EntryConfig),
    /// Re-apply a known entry.
    Update {
        /// Descriptor from the previous pass.
        previous: EntryConfig,
        /// Descriptor to apply now.
        next: EntryConfig,
    },
    /// Stop and forget a known entry.
    Remove(EntryConfig),
}

impl ReconcileOp {
    /// Entry id this operation targets.
    #[must_use]
    pub fn id(&self) -> &str {
        let config = match self {
            Self::Create(config) | Self::Remove(config) => config,
            Self::Update { next, .. } => next,
        };
        config.id.as_deref().unwrap_or_default()
    }

    /// Whether the entry's descriptor differs from the previous pass.
    ///
    /// Creates and removals always count as changes.
    #[must_use]
    pub fn is_change(&self) -> bool {
        match self {
            Self::Update { previous, next } => previous != next,
            Self::Create(_) | Self::Remove(_) => true,
        }
    }
}

impl fmt::Display for ReconcileOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Create(config) => write!(f, "+ {} ({})", self.id(), config.name),
            Self::Update { next, .. } if self.is_change() => {
                write!(f, "~ {} ({})", self.id(), next.name)
            },
            Self::Update { next, .. } => write!(f, "  {} ({})", self.id(), next.name),
            Self::Remove(config) => write!(f, "- {} ({})", self.id(), config.name),
        }
    }
}

/// Ordered operations for one pass plus the list they converge to.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReconcilePlan {
    /// Operations in application order.
    pub ops: Vec<ReconcileOp>,
    /// The new list with every id filled in, to diff against next time.
    pub applied: Vec<EntryConfig>,
}

impl ReconcilePlan {
    /// Operations that actually change something.
    pub fn changes(&self) -> impl Iterator<Item = &ReconcileOp> {
        self.ops.iter().filter(|op| op.is_change())
    }

    /// Whether applying the plan would leave everything as it is.
    #[must_use]
    pub fn is_noop(&self) -> bool {
        self.changes().next().is_none()
    }
}

/// Plan the pass that turns `prev` into `next`.
///
/// Previously known ids are visited first, in their old order, then new ids
/// in their new order. When `next` repeats an id, the first occurrence wins.
#[must_use]
pub fn plan(prev: &[EntryConfig], next: &[EntryConfig]) -> ReconcilePlan {
    let prev = with_ids(prev);
    let mut applied = Vec::with_capacity(next.len());
    let mut seen = HashSet::new();
    for config in with_ids(next) {
        let id = config.id.clone().unwrap_or_default();
        if seen.insert(id.clone()) {
            applied.push(config);
        } else {
            warn!(entry = %id, "Duplicate entry id, keeping the first");
        }
    }

    let next_by_id: HashMap<&str, &EntryConfig> = applied
        .iter()
        .map(|config| (config.id.as_deref().unwrap_or_default(), config))
        .collect();
    let prev_ids: HashSet<&str> = prev
        .iter()
        .map(|config| config.id.as_deref().unwrap_or_default())
        .collect();

    let mut ops = Vec::with_capacity(prev.len().max(applied.len()));
    for previous in &prev {
        let id = previous.id.as_deref().unwrap_or_default();
        match next_by_id.get(id) {
            Some(next) => ops.push(ReconcileOp::Update {
                previous: previous.clone(),
                next: (*next).clone(),
            }),
            None => ops.push(ReconcileOp::Remove(previous.clone())),
        }
    }
    for config in &applied {
        if !prev_ids.contains(config.id.as_deref().unwrap_or_default()) {
            ops.push(ReconcileOp::Create(config.clone()));
        }
    }

    ReconcilePlan { ops, applied }
}

fn with_ids(list: &[EntryConfig]) -> Vec<EntryConfig> {
    list.iter()
        .cloned()
        .map(|mut config| {
            if config.id.is_none() {
                config.id = Some(placeholder_id());
            }
            config
        })
        .collect()
}

fn placeholder_id() -> String {
    format!("~{}", Uuid::new_v4().simple())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(id: &str, name: &str) -> EntryConfig {
        EntryConfig::new(name).with_id(id)
    }

    #[test]
    fn test_known_ids_first() {
        let prev = vec![entry("1", "a"), entry("2", "b")];
        let next = vec![entry("2", "b"), entry("3", "c")];

        let plan = plan(&prev, &next);
        let ids: Vec<&str> = plan.ops.iter().map(ReconcileOp::id).collect();
        assert_eq!(ids, vec!["1", "2", "3"]);
        assert!(matches!(plan.ops[0], ReconcileOp::Remove(_)));
        assert!(matches!(plan.ops[1], ReconcileOp::Update { .. }));
        assert!(matches!(plan.ops[2], ReconcileOp::Create(_)));
        assert_eq!(plan.applied, next);
    }

    #[test]
    fn test_anonymous_entries_never_match() {
        let list = vec![EntryConfig::new("a")];
        let first = plan(&[], &list);
        let second = plan(&first.applied, &list);

        assert_eq!(second.ops.len(), 2);
        assert!(matches!(second.ops[0], ReconcileOp::Remove(_)));
        assert!(matches!(second.ops[1], ReconcileOp::Create(_)));
        assert_ne!(second.ops[0].id(), second.ops[1].id());
    }

    #[test]
    fn test_unchanged_is_noop() {
        let list = vec![entry("1", "a")];
        let plan = plan(&list, &list);
        assert_eq!(plan.ops.len(), 1);
        assert!(plan.is_noop());
    }

    #[test]
    fn test_duplicate_ids_first_wins() {
        let next = vec![entry("1", "a"), entry("1", "b")];
        let plan = plan(&[], &next);
        assert_eq!(plan.applied, vec![entry("1", "a")]);
        assert_eq!(plan.ops.len(), 1);
    }

    #[test]
    fn test_display() {
        let plan = plan(&[entry("1", "a")], &[entry("2", "b")]);
        let lines: Vec<String> = plan.ops.iter().map(ToString::to_string).collect();
        assert_eq!(lines, vec!["- 1 (a)", "+ 2 (b)"]);
    }
}
