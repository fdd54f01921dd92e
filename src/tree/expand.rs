use std::collections::{HashMap, HashSet};

use super::entry::{Entry, entry_depth};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExpandMode {
    Toggle,
    Expand,
    Collapse,
    /// Also mutates the expand flag of every descendant.
    ExpandSubtree,
    /// Also mutates the expand flag of every descendant.
    CollapseSubtree,
}

/// Which entries currently show their children.
///
/// Collapsing an entry hides its descendants without touching their own
/// flags; only the subtree modes rewrite descendant membership.
#[derive(Debug, Default)]
pub struct ExpandState {
    expanded: HashSet<String>,
}

impl ExpandState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_expanded(&self, id: &str) -> bool {
        self.expanded.contains(id)
    }

    /// Apply `mode` to `ids`. Returns whether anything changed.
    pub fn update(
        &mut self,
        entries: &[Entry],
        id_to_index: &HashMap<String, usize>,
        ids: &[String],
        mode: ExpandMode,
    ) -> bool {
        let mut changed = false;
        for id in ids {
            match mode {
                ExpandMode::Toggle => {
                    if !self.expanded.remove(id) {
                        self.expanded.insert(id.clone());
                    }
                    changed = true;
                }
                ExpandMode::Expand => changed |= self.expanded.insert(id.clone()),
                ExpandMode::Collapse => changed |= self.expanded.remove(id),
                ExpandMode::ExpandSubtree | ExpandMode::CollapseSubtree => {
                    changed |= self.update_subtree(
                        entries,
                        id_to_index,
                        id,
                        mode == ExpandMode::ExpandSubtree,
                    );
                }
            }
        }
        changed
    }

    fn update_subtree(
        &mut self,
        entries: &[Entry],
        id_to_index: &HashMap<String, usize>,
        id: &str,
        expand: bool,
    ) -> bool {
        let Some(&start) = id_to_index.get(id) else {
            return false;
        };
        let initial_depth = entry_depth(id);
        let mut changed = self.apply(id, expand);

        // Entries are pre-ordered, so the subtree is the contiguous range of
        // deeper entries that follows.
        for entry in &entries[start + 1..] {
            if entry_depth(&entry.id) <= initial_depth {
                break;
            }
            changed |= self.apply(&entry.id, expand);
        }
        changed
    }

    fn apply(&mut self, id: &str, expand: bool) -> bool {
        if expand {
            self.expanded.insert(id.to_string())
        } else {
            self.expanded.remove(id)
        }
    }
}
