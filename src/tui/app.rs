use crossterm::event::{KeyCode, KeyEvent, KeyModifiers};

use crate::tree::{
    Entry, ExpandMode, ExpandState, FilteredTree, SearchAnchor, SearchDirection, SearchRequest,
    StatusLevel, TreeBuilder, TreeFilter, apply_level_filter, leave_only_expanded, parent_id,
    search,
};

pub struct SearchState {
    pub active: bool,
    pub query: String,
    pub original_position: usize, // Position before search (for Esc)
    pub original_scroll: usize,   // Scroll offset before search
}

impl SearchState {
    fn new() -> Self {
        Self {
            active: false,
            query: String::new(),
            original_position: 0,
            original_scroll: 0,
        }
    }
}

pub struct App {
    // Data
    pub builder: TreeBuilder,
    pub file_path: Option<String>,

    // Derived tree state
    pub filter: TreeFilter,
    pub expand: ExpandState,
    /// Level-filtered arena indices; search scans these so collapsed
    /// matches can still be found and revealed.
    pub level_filtered: Vec<usize>,
    pub tree: FilteredTree,

    // UI state
    pub selected_line: usize,
    pub scroll_offset: usize,
    pub last_visible_height: usize,
    pub search_state: SearchState,

    // Search anchors; the engine uses whichever was updated last.
    selection_anchor: Option<SearchAnchor>,
    focus_anchor: Option<SearchAnchor>,
    mtime: u64,

    // Flags
    pub should_quit: bool,
    pub show_help: bool,
    pub show_details: bool,
}

impl App {
    pub fn new(mut builder: TreeBuilder, file_path: Option<String>) -> Self {
        let mut expand = ExpandState::new();
        let errored = builder.take_new_expanded();
        if !errored.is_empty() {
            expand.update(
                &builder.flattened.entries,
                &builder.flattened.id_to_index,
                &errored,
                ExpandMode::Expand,
            );
        }

        let mut app = Self {
            builder,
            file_path,
            filter: TreeFilter::default(),
            expand,
            level_filtered: Vec::new(),
            tree: FilteredTree::default(),
            selected_line: 0,
            scroll_offset: 0,
            last_visible_height: 20, // Default, will be updated on first draw
            search_state: SearchState::new(),
            selection_anchor: None,
            focus_anchor: None,
            mtime: 0,
            should_quit: false,
            show_help: false,
            show_details: false,
        };
        app.rebuild_visible();
        app
    }

    pub fn update_visible_height(&mut self, height: usize) {
        self.last_visible_height = height;
    }

    pub fn selected_entry(&self) -> Option<&Entry> {
        let arena_index = *self.tree.visible.get(self.selected_line)?;
        self.builder.flattened.entry(arena_index)
    }

    fn next_mtime(&mut self) -> u64 {
        self.mtime += 1;
        self.mtime
    }

    /// Recompute the visible rows, keeping the cursor on the same entry when
    /// it is still shown.
    pub fn rebuild_visible(&mut self) {
        let selected_arena = self.tree.visible.get(self.selected_line).copied();
        let level_filtered = apply_level_filter(&self.builder.flattened.entries, self.filter);
        let tree = leave_only_expanded(&self.builder.flattened.entries, &level_filtered, |id| {
            self.expand.is_expanded(id)
        });
        self.level_filtered = level_filtered;
        self.tree = tree;

        if let Some(arena_index) = selected_arena {
            if let Some(position) = self.tree.visible.iter().position(|&i| i == arena_index) {
                self.selected_line = position;
            }
        }
        if self.selected_line >= self.tree.visible.len() && !self.tree.visible.is_empty() {
            self.selected_line = self.tree.visible.len() - 1;
        }
    }

    /// Called after new contents were appended: auto-expand freshly errored
    /// scopes and recompute the rows.
    pub fn refresh_after_append(&mut self) {
        let errored = self.builder.take_new_expanded();
        if !errored.is_empty() {
            self.expand.update(
                &self.builder.flattened.entries,
                &self.builder.flattened.id_to_index,
                &errored,
                ExpandMode::Expand,
            );
        }
        self.rebuild_visible();
    }

    pub fn handle_event(&mut self, event: KeyEvent) {
        // Priority 1: Search mode
        if self.search_state.active {
            self.handle_search_event(event);
            return;
        }

        // Priority 2: Help screen
        if self.show_help {
            if matches!(event.code, KeyCode::Char('?') | KeyCode::Esc) {
                self.show_help = false;
            }
            return;
        }

        // Priority 3: Details popup
        if self.show_details {
            if matches!(event.code, KeyCode::Char('v') | KeyCode::Esc) {
                self.show_details = false;
            }
            return;
        }

        match event.code {
            // Quit
            KeyCode::Char('q') | KeyCode::Char('Q') => {
                self.should_quit = true;
            }
            KeyCode::Char('c') if event.modifiers.contains(KeyModifiers::CONTROL) => {
                self.should_quit = true;
            }

            // Help
            KeyCode::Char('?') => {
                self.show_help = true;
            }

            // Navigation
            KeyCode::Up | KeyCode::Char('k') => self.move_selection(-1),
            KeyCode::Down | KeyCode::Char('j') => self.move_selection(1),
            KeyCode::PageUp => self.scroll_page(true, false),
            KeyCode::PageDown => self.scroll_page(false, false),
            KeyCode::Char('u') if event.modifiers.contains(KeyModifiers::CONTROL) => {
                self.scroll_page(true, true);
            }
            KeyCode::Char('d') if event.modifiers.contains(KeyModifiers::CONTROL) => {
                self.scroll_page(false, true);
            }
            KeyCode::Home | KeyCode::Char('g') => {
                self.selected_line = 0;
                self.touch_selection();
            }
            KeyCode::End | KeyCode::Char('G') => {
                if !self.tree.visible.is_empty() {
                    self.selected_line = self.tree.visible.len() - 1;
                    self.touch_selection();
                }
            }

            // Details
            KeyCode::Char('v') => {
                if self.selected_entry().is_some() {
                    self.show_details = true;
                }
            }

            // Expand/Collapse
            KeyCode::Enter | KeyCode::Char(' ') => self.toggle_selected(),
            KeyCode::Right => self.expand_selected(ExpandMode::Expand),
            KeyCode::Left => self.collapse_or_go_to_parent(),
            KeyCode::Char('e') => self.expand_selected(ExpandMode::ExpandSubtree),
            KeyCode::Char('c') if !event.modifiers.contains(KeyModifiers::CONTROL) => {
                self.expand_selected(ExpandMode::CollapseSubtree);
            }

            // Status-level filter toggles
            KeyCode::Char('1') => self.toggle_filter_level(StatusLevel::DEBUG),
            KeyCode::Char('2') => self.toggle_filter_level(StatusLevel::INFO),
            KeyCode::Char('3') => self.toggle_filter_level(StatusLevel::WARN),
            KeyCode::Char('4') => self.toggle_filter_level(StatusLevel::ERROR),
            KeyCode::Char('a') => {
                self.filter.show_in_tree = StatusLevel::ALL;
                self.rebuild_visible();
            }

            // Search controls
            KeyCode::Char('/') => self.start_search(),
            KeyCode::Char('n') if !self.search_state.query.is_empty() => {
                self.run_search(SearchDirection::Forward, false);
            }
            KeyCode::Char('N') if !self.search_state.query.is_empty() => {
                self.run_search(SearchDirection::Backward, false);
            }

            _ => {}
        }
    }

    fn move_selection(&mut self, delta: i64) {
        if self.tree.visible.is_empty() {
            return;
        }
        let max = self.tree.visible.len() as i64 - 1;
        let new = (self.selected_line as i64 + delta).clamp(0, max);
        self.selected_line = new as usize;
        self.touch_selection();
    }

    fn touch_selection(&mut self) {
        if let Some(&arena_index) = self.tree.visible.get(self.selected_line) {
            let mtime = self.next_mtime();
            self.selection_anchor = Some(SearchAnchor {
                entry_index: arena_index,
                mtime,
            });
        }
    }

    fn scroll_page(&mut self, up: bool, half: bool) {
        if self.tree.visible.is_empty() {
            return;
        }

        let page_size = if half {
            self.last_visible_height / 2
        } else {
            self.last_visible_height
        };

        if up {
            let scroll_amount = page_size.min(self.scroll_offset);
            self.scroll_offset = self.scroll_offset.saturating_sub(scroll_amount);
            self.selected_line = self.selected_line.saturating_sub(page_size);
        } else {
            let max_scroll = self
                .tree
                .visible
                .len()
                .saturating_sub(self.last_visible_height);
            self.scroll_offset = (self.scroll_offset + page_size).min(max_scroll);
            self.selected_line =
                (self.selected_line + page_size).min(self.tree.visible.len().saturating_sub(1));
        }
        self.touch_selection();
    }

    fn toggle_selected(&mut self) {
        let Some(entry) = self.selected_entry() else {
            return;
        };
        if !self.tree.entries_with_children.contains(&entry.id) {
            return;
        }
        let id = entry.id.clone();
        self.expand.update(
            &self.builder.flattened.entries,
            &self.builder.flattened.id_to_index,
            &[id],
            ExpandMode::Toggle,
        );
        self.rebuild_visible();
    }

    fn expand_selected(&mut self, mode: ExpandMode) {
        let Some(entry) = self.selected_entry() else {
            return;
        };
        if !self.tree.entries_with_children.contains(&entry.id) {
            return;
        }
        let id = entry.id.clone();
        self.expand.update(
            &self.builder.flattened.entries,
            &self.builder.flattened.id_to_index,
            &[id],
            mode,
        );
        self.rebuild_visible();
    }

    /// Left arrow: collapse the selected entry, or jump to its parent when
    /// it has nothing expanded to collapse.
    fn collapse_or_go_to_parent(&mut self) {
        let Some(entry) = self.selected_entry() else {
            return;
        };
        let id = entry.id.clone();
        if self.expand.is_expanded(&id) && self.tree.entries_with_children.contains(&id) {
            self.expand.update(
                &self.builder.flattened.entries,
                &self.builder.flattened.id_to_index,
                &[id],
                ExpandMode::Collapse,
            );
            self.rebuild_visible();
            return;
        }
        if let Some(parent) = parent_id(&id).map(str::to_string) {
            let parent_arena = self.builder.flattened.id_to_index.get(&parent).copied();
            if let Some(parent_arena) = parent_arena {
                if let Some(position) =
                    self.tree.visible.iter().position(|&i| i == parent_arena)
                {
                    self.selected_line = position;
                    self.touch_selection();
                    self.ensure_visible();
                }
            }
        }
    }

    fn toggle_filter_level(&mut self, level: StatusLevel) {
        if self.filter.show_in_tree.intersects(level) {
            self.filter.show_in_tree = StatusLevel(self.filter.show_in_tree.0 & !level.0);
        } else {
            self.filter.show_in_tree = self.filter.show_in_tree | level;
        }
        self.rebuild_visible();
    }

    // Search methods
    pub fn start_search(&mut self) {
        self.search_state.active = true;
        self.search_state.original_position = self.selected_line;
        self.search_state.original_scroll = self.scroll_offset;
        self.search_state.query.clear();
    }

    pub fn handle_search_event(&mut self, event: KeyEvent) {
        match event.code {
            KeyCode::Char(c) if !event.modifiers.contains(KeyModifiers::CONTROL) => {
                self.search_state.query.push(c);
                self.run_search(SearchDirection::Forward, true);
            }
            KeyCode::Backspace => {
                self.search_state.query.pop();
                self.run_search(SearchDirection::Forward, true);
            }
            KeyCode::Enter => {
                // Accept search, stay at current position
                self.search_state.active = false;
            }
            KeyCode::Esc => {
                // Cancel search, return to original position
                self.selected_line = self.search_state.original_position;
                self.scroll_offset = self.search_state.original_scroll;
                self.search_state.active = false;
                self.search_state.query.clear();
            }
            KeyCode::Char('n') if event.modifiers.contains(KeyModifiers::CONTROL) => {
                self.run_search(SearchDirection::Forward, false);
            }
            KeyCode::Char('p') if event.modifiers.contains(KeyModifiers::CONTROL) => {
                self.run_search(SearchDirection::Backward, false);
            }
            _ => {}
        }
    }

    fn run_search(&mut self, direction: SearchDirection, incremental: bool) {
        if self.search_state.query.is_empty() {
            return;
        }
        let request = SearchRequest {
            query: self.search_state.query.clone(),
            direction,
            incremental,
        };
        let result = search(
            &self.builder.flattened.entries,
            &self.level_filtered,
            &request,
            self.selection_anchor,
            self.focus_anchor,
        );
        let Some(result) = result else {
            return;
        };

        if !result.expand_parent_ids.is_empty() {
            self.expand.update(
                &self.builder.flattened.entries,
                &self.builder.flattened.id_to_index,
                &result.expand_parent_ids,
                ExpandMode::Expand,
            );
        }
        let mtime = self.next_mtime();
        self.focus_anchor = Some(SearchAnchor {
            entry_index: result.entry_index,
            mtime,
        });
        self.rebuild_visible();
        if let Some(position) = self
            .tree
            .visible
            .iter()
            .position(|&i| i == result.entry_index)
        {
            self.selected_line = position;
        }
        self.ensure_visible();
    }

    pub fn ensure_visible(&mut self) {
        if self.selected_line < self.scroll_offset {
            self.scroll_offset = self.selected_line;
        } else if self.selected_line >= self.scroll_offset + self.last_visible_height {
            self.scroll_offset = self.selected_line.saturating_sub(self.last_visible_height) + 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tree::SessionManager;
    use crossterm::event::KeyEventKind;

    const LOG: &str = "
M a:\"Robot1\"
SR a|0.0
M c:\"Simple Task\"
M d:\"Robot1\"
M e:\"/t.py\"
M f:\"\"
P b:c|d|e|f|0
ST b|0.01
M h:\"do_work\"
M i:\"lib\"
M j:\"/m.py\"
P g:h|i|j|f|10
M k:\"METHOD\"
SE g|k|0.02
M w:\"inner detail\"
L I|w|g|0.03
M r:\"PASS\"
EE k|r|0.04
M g3:\"PASS\"
M h3:\"Ok\"
ET g3|h3|0.05
ER g3|0.05
";

    fn key(code: KeyCode) -> KeyEvent {
        KeyEvent {
            code,
            modifiers: KeyModifiers::NONE,
            kind: KeyEventKind::Press,
            state: crossterm::event::KeyEventState::NONE,
        }
    }

    fn app() -> App {
        let mut builder = TreeBuilder::new(None, SessionManager::new().issue());
        builder.add_initial_contents(LOG);
        App::new(builder, None)
    }

    #[test]
    fn test_initially_collapsed_to_roots() {
        let app = app();
        assert_eq!(app.tree.visible.len(), 1);
        assert_eq!(app.selected_entry().unwrap().id, "root0");
    }

    #[test]
    fn test_toggle_expands_and_collapses() {
        let mut app = app();
        app.handle_event(key(KeyCode::Enter));
        assert_eq!(app.tree.visible.len(), 2);
        app.handle_event(key(KeyCode::Enter));
        assert_eq!(app.tree.visible.len(), 1);
    }

    #[test]
    fn test_search_expands_ancestors_and_selects() {
        let mut app = app();
        app.handle_event(key(KeyCode::Char('/')));
        for c in "inner".chars() {
            app.handle_event(key(KeyCode::Char(c)));
        }
        let selected = app.selected_entry().unwrap();
        assert_eq!(selected.id, "root0-0-0");
        // The ancestor chain was force-expanded to reveal the match.
        assert!(app.expand.is_expanded("root0"));
        assert!(app.expand.is_expanded("root0-0"));
    }

    #[test]
    fn test_search_esc_restores_position() {
        let mut app = app();
        app.handle_event(key(KeyCode::Char('/')));
        for c in "inner".chars() {
            app.handle_event(key(KeyCode::Char(c)));
        }
        app.handle_event(key(KeyCode::Esc));
        assert_eq!(app.selected_line, 0);
        assert!(!app.search_state.active);
    }

    #[test]
    fn test_filter_toggle_rebuilds() {
        let mut app = app();
        app.handle_event(key(KeyCode::Char('e'))); // expand subtree
        let all = app.tree.visible.len();
        assert_eq!(all, 3);

        // Hide info: the info log and the passing scopes disappear, leaving
        // nothing (roots included) because everything folds into info.
        app.handle_event(key(KeyCode::Char('2')));
        assert!(app.tree.visible.len() < all);

        app.handle_event(key(KeyCode::Char('a')));
        assert_eq!(app.tree.visible.len(), all);
    }

    #[test]
    fn test_left_jumps_to_parent() {
        let mut app = app();
        app.handle_event(key(KeyCode::Char('e')));
        app.handle_event(key(KeyCode::Char('G'))); // last row (the log)
        assert_eq!(app.selected_entry().unwrap().id, "root0-0-0");
        app.handle_event(key(KeyCode::Left));
        assert_eq!(app.selected_entry().unwrap().id, "root0-0");
        app.handle_event(key(KeyCode::Left)); // collapses the method
        assert_eq!(app.tree.visible.len(), 2);
    }
}
