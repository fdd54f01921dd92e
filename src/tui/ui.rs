use ratatui::{
    Frame,
    layout::{Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Clear, List, ListItem, Paragraph},
};

use super::app::App;
use super::status_colors::{entry_kind_color, status_level_color};
use crate::tree::{RunStatus, StatusLevel, entry_depth, pretty_format};

pub fn draw(f: &mut Frame, app: &mut App) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(1), // Header line
            Constraint::Length(1), // Divider
            Constraint::Min(0),    // Main content
            Constraint::Length(1), // Search bar / divider
            Constraint::Length(1), // Footer line
        ])
        .split(f.area());

    draw_header(f, app, chunks[0]);
    draw_divider(f, chunks[1]);
    draw_list(f, app, chunks[2]);

    if app.search_state.active {
        draw_search_bar(f, app, chunks[3]);
    } else {
        draw_divider(f, chunks[3]);
    }
    draw_footer(f, app, chunks[4]);

    if app.show_details {
        draw_details(f, app);
    }
    if app.show_help {
        draw_help(f);
    }
}

fn draw_details(f: &mut Frame, app: &App) {
    let Some(entry) = app.selected_entry() else {
        return;
    };
    let area = centered_rect(70, 60, f.area());

    let mut lines = Vec::new();
    let title = entry.title();
    if !title.is_empty() {
        lines.push(Line::from(Span::styled(
            title,
            Style::default().add_modifier(Modifier::BOLD),
        )));
    }
    if !entry.source.is_empty() {
        lines.push(Line::from(Span::styled(
            format!("{}:{}", entry.source, entry.lineno),
            Style::default().fg(Color::DarkGray),
        )));
    }
    let value = entry.value_text();
    if !value.is_empty() {
        lines.push(Line::from(""));
        for value_line in pretty_format(&value).lines() {
            lines.push(Line::from(value_line.to_string()));
        }
    }

    let details = Paragraph::new(lines).block(
        Block::default()
            .borders(Borders::ALL)
            .title(format!(" {} ", entry.data.kind_label().to_lowercase()))
            .border_style(Style::default().fg(entry_kind_color(&entry.data))),
    );
    f.render_widget(Clear, area);
    f.render_widget(details, area);
}

fn draw_header(f: &mut Frame, app: &App, area: Rect) {
    let file_name = app
        .file_path
        .as_ref()
        .and_then(|p| std::path::Path::new(p).file_name())
        .and_then(|n| n.to_str())
        .unwrap_or("runlog");

    let run_info = &app.builder.run_info;
    let status = match run_info.status {
        RunStatus::Pass => "PASS",
        RunStatus::Error => "ERROR",
        RunStatus::Unset => "RUNNING",
    };
    let mut header_text = format!(
        "runlog-tui: {} | {} | {} | Entries: {} | Decode errors: {}",
        file_name,
        run_info.description,
        status,
        app.builder.flattened.entries.len(),
        app.builder.errors().len(),
    );
    if run_info.version_too_new {
        header_text.push_str(" | log format newer than supported!");
    }

    let color = match run_info.status {
        RunStatus::Error => Color::Red,
        _ => Color::Cyan,
    };
    let header =
        Paragraph::new(header_text).style(Style::default().fg(color).add_modifier(Modifier::BOLD));

    f.render_widget(header, area);
}

fn draw_divider(f: &mut Frame, area: Rect) {
    let divider = Block::default()
        .borders(Borders::TOP)
        .border_style(Style::default().fg(Color::DarkGray));

    f.render_widget(divider, area);
}

fn draw_list(f: &mut Frame, app: &mut App, area: Rect) {
    let visible_height = area.height as usize;
    app.update_visible_height(visible_height);

    // Keep the selected row on screen.
    if app.selected_line >= app.scroll_offset + visible_height {
        app.scroll_offset = app.selected_line.saturating_sub(visible_height - 1);
    } else if app.selected_line < app.scroll_offset {
        app.scroll_offset = app.selected_line;
    }

    let start = app.scroll_offset;
    let end = (app.scroll_offset + visible_height).min(app.tree.visible.len());

    let mut items = Vec::new();
    for row in start..end {
        let arena_index = app.tree.visible[row];
        let Some(entry) = app.builder.flattened.entry(arena_index) else {
            continue;
        };

        let depth = entry_depth(&entry.id);
        let indent = "  ".repeat(depth);
        let arrow = if app.tree.entries_with_children.contains(&entry.id) {
            if app.expand.is_expanded(&entry.id) {
                "▼ "
            } else {
                "▶ "
            }
        } else {
            "  "
        };

        let level = entry.status_level();
        let mut spans = vec![
            Span::raw(indent),
            Span::styled(arrow.to_string(), Style::default().fg(Color::DarkGray)),
            Span::styled(
                format!("{:<9} ", entry.data.kind_label()),
                Style::default().fg(entry_kind_color(&entry.data)),
            ),
        ];
        let title = entry.title();
        if !title.is_empty() {
            spans.push(Span::styled(
                format!("{} ", title),
                Style::default().add_modifier(Modifier::BOLD),
            ));
        }
        let value = entry.value_text();
        if !value.is_empty() {
            spans.push(Span::styled(value, Style::default().fg(Color::Gray)));
        }
        if !level.is_unset() {
            spans.push(Span::styled(
                format!(" [{}]", level.label()),
                Style::default().fg(status_level_color(level)),
            ));
        }

        let mut line = Line::from(spans);
        if row == app.selected_line {
            line = line.style(Style::default().add_modifier(Modifier::REVERSED));
        }
        items.push(ListItem::new(line));
    }

    let list = List::new(items);
    f.render_widget(list, area);
}

fn draw_search_bar(f: &mut Frame, app: &App, area: Rect) {
    let search_text = format!("/{}", app.search_state.query);
    let bar = Paragraph::new(search_text).style(Style::default().fg(Color::Yellow));
    f.render_widget(bar, area);
}

fn draw_footer(f: &mut Frame, app: &App, area: Rect) {
    let mask = app.filter.show_in_tree;
    let level_flag = |level: StatusLevel, label: &str| -> String {
        if mask.intersects(level) {
            label.to_uppercase()
        } else {
            label.to_lowercase()
        }
    };
    let footer_text = format!(
        "q:quit  ?:help  enter:toggle  e/c:subtree  /:search  n/N:next/prev  1-4:levels [{} {} {} {}]",
        level_flag(StatusLevel::DEBUG, "debug"),
        level_flag(StatusLevel::INFO, "info"),
        level_flag(StatusLevel::WARN, "warn"),
        level_flag(StatusLevel::ERROR, "error"),
    );
    let footer = Paragraph::new(footer_text).style(Style::default().fg(Color::DarkGray));
    f.render_widget(footer, area);
}

fn draw_help(f: &mut Frame) {
    let area = centered_rect(60, 70, f.area());

    let lines = vec![
        Line::from(Span::styled(
            "Keyboard shortcuts",
            Style::default().add_modifier(Modifier::BOLD),
        )),
        Line::from(""),
        Line::from("  up/down, j/k      move selection"),
        Line::from("  pgup/pgdn, ^u/^d  scroll by page / half page"),
        Line::from("  g/G               jump to first / last row"),
        Line::from("  enter, space      expand or collapse the selected scope"),
        Line::from("  v                 show details for the selected entry"),
        Line::from("  right / left      expand / collapse (or go to parent)"),
        Line::from("  e / c             expand / collapse the whole subtree"),
        Line::from("  1 2 3 4           toggle debug/info/warn/error levels"),
        Line::from("  a                 show all levels"),
        Line::from("  /                 incremental search (enter accepts, esc cancels)"),
        Line::from("  n / N             next / previous match"),
        Line::from("  q                 quit"),
        Line::from(""),
        Line::from(Span::styled(
            "press ? or esc to close",
            Style::default().fg(Color::DarkGray),
        )),
    ];

    let help = Paragraph::new(lines).block(
        Block::default()
            .borders(Borders::ALL)
            .title(" help ")
            .border_style(Style::default().fg(Color::Cyan)),
    );
    f.render_widget(Clear, area);
    f.render_widget(help, area);
}

fn centered_rect(percent_x: u16, percent_y: u16, area: Rect) -> Rect {
    let vertical = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Percentage((100 - percent_y) / 2),
            Constraint::Percentage(percent_y),
            Constraint::Percentage((100 - percent_y) / 2),
        ])
        .split(area);

    Layout::default()
        .direction(Direction::Horizontal)
        .constraints([
            Constraint::Percentage((100 - percent_x) / 2),
            Constraint::Percentage(percent_x),
            Constraint::Percentage((100 - percent_x) / 2),
        ])
        .split(vertical[1])[1]
}
