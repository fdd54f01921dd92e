mod builder;
mod entry;
mod expand;
mod filtering;
mod pretty;
mod search;

pub use builder::{FlattenedTree, Lease, RunInfo, RunStatus, SessionManager, TreeBuilder};
pub use entry::{
    Argument, ConsoleKind, Entry, EntryData, ScopeDetails, StatusLevel, entry_depth,
    format_arguments, is_hidden_id, parent_id, parent_ids,
};
pub use expand::{ExpandMode, ExpandState};
pub use filtering::{
    FilteredTree, TreeFilter, apply_level_filter, leave_only_expanded, matches_tree_filter,
    visible_entries,
};
pub use pretty::pretty_format;
pub use search::{
    SearchAnchor, SearchDirection, SearchRequest, SearchResult, entry_matches, search,
};
