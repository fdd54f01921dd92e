use super::entry::{Entry, is_hidden_id, parent_ids};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchDirection {
    Forward,
    Backward,
}

/// A search invocation over the filtered entry list.
#[derive(Debug, Clone)]
pub struct SearchRequest {
    pub query: String,
    pub direction: SearchDirection,
    /// In incremental mode the anchored entry may match again, so typing
    /// narrows the query without jumping away.
    pub incremental: bool,
}

/// Either the current selection or the focused row, stamped with a logical
/// mtime so the most recently updated one wins as the search origin.
#[derive(Debug, Clone, Copy)]
pub struct SearchAnchor {
    /// Arena index of the anchored entry.
    pub entry_index: usize,
    pub mtime: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SearchResult {
    /// Arena index of the matched entry.
    pub entry_index: usize,
    /// Ancestor ids to force-expand so the match becomes visible, nearest
    /// parent first.
    pub expand_parent_ids: Vec<String>,
}

/// Case-insensitive match against the rendered title, then the rendered
/// value; the title short-circuits.
pub fn entry_matches(entry: &Entry, query: &str) -> bool {
    let needle = query.to_lowercase();
    let title = entry.title();
    if !title.is_empty() && title.to_lowercase().contains(&needle) {
        return true;
    }
    let value = entry.value_text();
    !value.is_empty() && value.to_lowercase().contains(&needle)
}

/// Positions of a single full cycle through a list of `len` elements,
/// starting next to `start` and ending on it. Every element is visited
/// exactly once.
fn circular_positions(
    len: usize,
    start: usize,
    direction: SearchDirection,
) -> impl Iterator<Item = usize> {
    (1..=len).map(move |step| match direction {
        SearchDirection::Forward => (start + step) % len,
        SearchDirection::Backward => (start + len - step) % len,
    })
}

/// Find the next match in `visible` (arena indices into `entries`), starting
/// from the anchor and wrapping around at most once.
pub fn search(
    entries: &[Entry],
    visible: &[usize],
    request: &SearchRequest,
    selection: Option<SearchAnchor>,
    focus: Option<SearchAnchor>,
) -> Option<SearchResult> {
    if request.query.is_empty() || visible.is_empty() {
        return None;
    }

    let anchor = match (selection, focus) {
        (Some(s), Some(f)) => Some(if f.mtime > s.mtime { f } else { s }),
        (selection, focus) => selection.or(focus),
    };

    let mut start_at = 0;
    if let Some(anchor) = anchor {
        if let Some(entry) = entries.get(anchor.entry_index) {
            if request.incremental && entry_matches(entry, &request.query) {
                return Some(SearchResult {
                    entry_index: entry.entry_index,
                    expand_parent_ids: parent_ids(&entry.id),
                });
            }
            if let Some(position) = visible.iter().position(|&i| i == anchor.entry_index) {
                start_at = position;
            }
        }
    }

    for position in circular_positions(visible.len(), start_at, request.direction) {
        let entry = &entries[visible[position]];
        if is_hidden_id(&entry.id) {
            continue;
        }
        if entry_matches(entry, &request.query) {
            return Some(SearchResult {
                entry_index: entry.entry_index,
                expand_parent_ids: parent_ids(&entry.id),
            });
        }
    }
    None
}
