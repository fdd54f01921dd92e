use std::collections::HashSet;

use super::entry::{Entry, StatusLevel, entry_depth, is_hidden_id, parent_id};

/// Status-level mask applied to the tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TreeFilter {
    pub show_in_tree: StatusLevel,
}

impl Default for TreeFilter {
    fn default() -> Self {
        Self {
            show_in_tree: StatusLevel::ALL,
        }
    }
}

/// Whether the entry itself passes the level mask. Entries without a status
/// are always visible; success is folded into info.
pub fn matches_tree_filter(entry: &Entry, filter: TreeFilter) -> bool {
    let mut level = entry.status_level();
    if level.is_unset() {
        return true;
    }
    if level.intersects(StatusLevel::SUCCESS) {
        level |= StatusLevel::INFO;
    }
    level.intersects(filter.show_in_tree)
}

struct AncestorSlot {
    index: usize,
    depth: usize,
    added: bool,
}

/// Level-mask pass over the pre-order entry arena, returning the surviving
/// arena indices in order.
///
/// When the mask covers every level this is skipped entirely. Otherwise a
/// single left-to-right pass keeps a stack holding exactly the open ancestor
/// chain of the current entry; a matching entry emits every not-yet-added
/// ancestor plus itself, so a kept entry always has its ancestors kept too.
pub fn apply_level_filter(entries: &[Entry], filter: TreeFilter) -> Vec<usize> {
    if filter.show_in_tree.contains_all(StatusLevel::ALL) {
        return (0..entries.len()).collect();
    }

    let mut filtered = Vec::new();
    let mut stack: Vec<AncestorSlot> = Vec::new();

    for (index, entry) in entries.iter().enumerate() {
        let depth = entry_depth(&entry.id);
        while let Some(last) = stack.last() {
            if last.depth >= depth {
                stack.pop();
            } else {
                break;
            }
        }
        stack.push(AncestorSlot {
            index,
            depth,
            added: false,
        });

        if matches_tree_filter(entry, filter) {
            for slot in stack.iter_mut() {
                if !slot.added {
                    slot.added = true;
                    filtered.push(slot.index);
                }
            }
        }
    }

    filtered
}

/// Result of the visibility passes.
#[derive(Debug, Default)]
pub struct FilteredTree {
    /// Arena indices of the rows the viewer shows, in order.
    pub visible: Vec<usize>,
    /// Ids referenced as a parent prefix by at least one (level-surviving)
    /// entry; drives the expand/collapse affordance.
    pub entries_with_children: HashSet<String>,
}

/// Expand-state pass: hides the descendants of collapsed entries, deriving
/// the subtree extent purely from order + depth. Hidden-marker entries never
/// enter the tree.
pub fn leave_only_expanded(
    entries: &[Entry],
    input: &[usize],
    is_expanded: impl Fn(&str) -> bool,
) -> FilteredTree {
    let mut result = FilteredTree::default();
    let mut hide_deeper_than: Option<usize> = None;

    for &index in input {
        let entry = &entries[index];
        if is_hidden_id(&entry.id) {
            continue;
        }
        if let Some(parent) = parent_id(&entry.id) {
            result.entries_with_children.insert(parent.to_string());
        }
        let depth = entry_depth(&entry.id);
        if let Some(limit) = hide_deeper_than {
            if depth > limit {
                continue;
            }
            hide_deeper_than = None;
        }
        result.visible.push(index);
        if !is_expanded(&entry.id) {
            hide_deeper_than = Some(depth);
        }
    }

    result
}

/// Full visibility computation: level mask, then expand state.
pub fn visible_entries(
    entries: &[Entry],
    filter: TreeFilter,
    is_expanded: impl Fn(&str) -> bool,
) -> FilteredTree {
    let level_filtered = apply_level_filter(entries, filter);
    leave_only_expanded(entries, &level_filtered, is_expanded)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tree::builder::{SessionManager, TreeBuilder};
    use crate::tree::expand::{ExpandMode, ExpandState};

    /// run > task > method > (warn log, method > error log), plus an info
    /// log and suppressed console noise at task level.
    const SAMPLE_LOG: &str = "
M a:\"Robot1\"
SR a|0.0
M c:\"Simple Task\"
M d:\"Robot1\"
M e:\"/t.py\"
M f:\"\"
P b:c|d|e|f|0
ST b|0.01
M h:\"outer\"
M i:\"lib\"
M j:\"/m.py\"
P g:h|i|j|f|10
M k:\"METHOD\"
SE g|k|0.02
M w:\"something looks off\"
L W|w|g|0.03
M h2:\"inner\"
P g2:h2|i|j|f|20
SE g2|k|0.04
M er:\"boom\"
L E|er|g2|0.05
M r:\"PASS\"
EE k|r|0.06
EE k|r|0.07
M inf:\"all good\"
L I|inf|b|0.08
M ck:\"regular\"
M cm:\"noise\"
C ck|cm|0.09
M g3:\"PASS\"
M h3:\"Ok\"
ET g3|h3|0.1
ER g3|0.1
";

    fn build_entries() -> TreeBuilder {
        let mut builder = TreeBuilder::new(None, SessionManager::new().issue());
        builder.add_initial_contents(SAMPLE_LOG);
        builder
    }

    fn ids(builder: &TreeBuilder, indices: &[usize]) -> Vec<String> {
        indices
            .iter()
            .map(|&i| builder.flattened.entries[i].id.clone())
            .collect()
    }

    #[test]
    fn test_fast_path_keeps_everything() {
        let builder = build_entries();
        let filtered = apply_level_filter(&builder.flattened.entries, TreeFilter::default());
        assert_eq!(filtered.len(), builder.flattened.entries.len());
    }

    #[test]
    fn test_level_filter_keeps_ancestors() {
        let builder = build_entries();
        let filter = TreeFilter {
            show_in_tree: StatusLevel::ERROR,
        };
        let filtered = apply_level_filter(&builder.flattened.entries, filter);

        // The error log plus its full ancestor chain, nothing else with a
        // non-matching status except unset-status containers.
        let kept = ids(&builder, &filtered);
        assert!(kept.contains(&"root0-0-1-0".to_string()), "error log kept");
        assert!(kept.contains(&"root0-0-1".to_string()), "inner method kept");
        assert!(kept.contains(&"root0-0".to_string()), "outer method kept");
        assert!(kept.contains(&"root0".to_string()), "task kept");
        assert!(!kept.contains(&"root0-0-0".to_string()), "warn log dropped");

        // Visibility invariant: every ancestor of a kept entry is kept.
        for id in &kept {
            for parent in crate::tree::entry::parent_ids(id) {
                assert!(kept.contains(&parent), "orphaned entry {}", id);
            }
        }

        // Order is preserved.
        let mut sorted = filtered.clone();
        sorted.sort_unstable();
        assert_eq!(filtered, sorted);
    }

    #[test]
    fn test_warn_mask_keeps_ancestors_once() {
        let builder = build_entries();
        let filter = TreeFilter {
            show_in_tree: StatusLevel::WARN | StatusLevel::ERROR,
        };
        let filtered = apply_level_filter(&builder.flattened.entries, filter);
        let kept = ids(&builder, &filtered);

        // Shared ancestors are emitted exactly once.
        let unique: std::collections::HashSet<_> = kept.iter().collect();
        assert_eq!(unique.len(), kept.len());
        assert!(kept.contains(&"root0-0-0".to_string()), "warn log kept");
    }

    #[test]
    fn test_collapsed_root_hides_all_descendants() {
        let builder = build_entries();
        let expand = ExpandState::new();
        let tree = visible_entries(&builder.flattened.entries, TreeFilter::default(), |id| {
            expand.is_expanded(id)
        });
        assert_eq!(ids(&builder, &tree.visible), ["root0"]);
        assert!(tree.entries_with_children.contains("root0"));
    }

    #[test]
    fn test_expand_restores_direct_children_only() {
        let builder = build_entries();
        let mut expand = ExpandState::new();
        expand.update(
            &builder.flattened.entries,
            &builder.flattened.id_to_index,
            &["root0".to_string()],
            ExpandMode::Expand,
        );

        let tree = visible_entries(&builder.flattened.entries, TreeFilter::default(), |id| {
            expand.is_expanded(id)
        });
        // Children appear; grandchildren stay hidden because the methods
        // themselves are still collapsed. Suppressed console noise never
        // shows up.
        assert_eq!(
            ids(&builder, &tree.visible),
            ["root0", "root0-0", "root0-1"]
        );

        // Expanding the outer method reveals its direct subtree, governed by
        // the children's own (still collapsed) expand flags.
        expand.update(
            &builder.flattened.entries,
            &builder.flattened.id_to_index,
            &["root0-0".to_string()],
            ExpandMode::Expand,
        );
        let tree = visible_entries(&builder.flattened.entries, TreeFilter::default(), |id| {
            expand.is_expanded(id)
        });
        assert_eq!(
            ids(&builder, &tree.visible),
            ["root0", "root0-0", "root0-0-0", "root0-0-1", "root0-1"]
        );
    }

    #[test]
    fn test_collapse_remembers_descendant_expansion() {
        let builder = build_entries();
        let mut expand = ExpandState::new();
        let all = [
            "root0".to_string(),
            "root0-0".to_string(),
            "root0-0-1".to_string(),
        ];
        expand.update(
            &builder.flattened.entries,
            &builder.flattened.id_to_index,
            &all,
            ExpandMode::Expand,
        );

        // Collapse the root: nothing but it is visible.
        expand.update(
            &builder.flattened.entries,
            &builder.flattened.id_to_index,
            &["root0".to_string()],
            ExpandMode::Collapse,
        );
        let tree = visible_entries(&builder.flattened.entries, TreeFilter::default(), |id| {
            expand.is_expanded(id)
        });
        assert_eq!(ids(&builder, &tree.visible), ["root0"]);

        // Re-expanding the root restores the deep subtree: the descendants'
        // own expand flags were not forgotten.
        expand.update(
            &builder.flattened.entries,
            &builder.flattened.id_to_index,
            &["root0".to_string()],
            ExpandMode::Expand,
        );
        let tree = visible_entries(&builder.flattened.entries, TreeFilter::default(), |id| {
            expand.is_expanded(id)
        });
        assert_eq!(
            ids(&builder, &tree.visible),
            [
                "root0",
                "root0-0",
                "root0-0-0",
                "root0-0-1",
                "root0-0-1-0",
                "root0-1"
            ]
        );
    }

    #[test]
    fn test_level_filter_composes_with_expand() {
        let builder = build_entries();
        let mut expand = ExpandState::new();
        expand.update(
            &builder.flattened.entries,
            &builder.flattened.id_to_index,
            &["root0".to_string()],
            ExpandMode::ExpandSubtree,
        );

        let filter = TreeFilter {
            show_in_tree: StatusLevel::ERROR,
        };
        let tree = visible_entries(&builder.flattened.entries, filter, |id| {
            expand.is_expanded(id)
        });
        assert_eq!(
            ids(&builder, &tree.visible),
            ["root0", "root0-0", "root0-0-1", "root0-0-1-0"]
        );
    }
}
