use ratatui::style::Color;

use crate::tree::{EntryData, StatusLevel};

/// Returns the color for a status level
pub fn status_level_color(level: StatusLevel) -> Color {
    if level.intersects(StatusLevel::ERROR) {
        Color::Red
    } else if level.intersects(StatusLevel::WARN) {
        Color::Yellow
    } else if level.intersects(StatusLevel::SUCCESS) {
        Color::Green
    } else if level.intersects(StatusLevel::INFO) {
        Color::Blue
    } else if level.intersects(StatusLevel::DEBUG) {
        Color::DarkGray
    } else {
        Color::White
    }
}

/// Returns the color for an entry based on its kind
pub fn entry_kind_color(data: &EntryData) -> Color {
    match data {
        // Run structure - Magenta
        EntryData::Task { .. } => Color::Magenta,

        // Calls - Blue
        EntryData::Method(_) => Color::Blue,

        // Generator lifecycle - Cyan
        EntryData::Generator(_)
        | EntryData::UntrackedGenerator(_)
        | EntryData::ResumeYield(_)
        | EntryData::ResumeYieldFrom(_)
        | EntryData::SuspendYield { .. }
        | EntryData::SuspendYieldFrom(_) => Color::Cyan,

        // Control flow - DarkGray
        EntryData::If(_) | EntryData::Else(_) | EntryData::Continue(_) | EntryData::Break(_) => {
            Color::DarkGray
        }

        // Values - Green
        EntryData::Variable { .. } | EntryData::Return { .. } => Color::Green,

        // Failures - Red
        EntryData::AssertFailed(_) | EntryData::Exception { .. } => Color::Red,

        // Output - White/Gray
        EntryData::Log { .. } => Color::White,
        EntryData::Console { .. } => Color::Gray,

        // Diagnostics - Yellow
        EntryData::ThreadDump { .. } | EntryData::ProcessSnapshot { .. } => Color::Yellow,
    }
}
