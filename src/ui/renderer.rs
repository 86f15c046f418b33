// Cell formatting utilities shared by the layout

use {
    crate::grid::Recency,
    crate::sink::ViewCell,
    ratatui::style::{Color, Modifier, Style},
};

/// Widest a grid column is drawn
pub const MAX_COLUMN_WIDTH: usize = 16;

/// Colour by result text: pass green, fail red, anything else yellow
pub fn status_color(value: &str) -> Color {
    match value {
        "pass" => Color::Green,
        "fail" => Color::Red,
        _ => Color::Yellow,
    }
}

/// Current results are bold, previous ones dimmed, gone ones dark gray
pub fn cell_style(cell: &ViewCell) -> Style {
    let Some(value) = cell.value.as_deref() else {
        return Style::default().fg(Color::DarkGray);
    };
    match cell.recency {
        Recency::Current => Style::default()
            .fg(status_color(value))
            .add_modifier(Modifier::BOLD),
        Recency::Previous => Style::default()
            .fg(status_color(value))
            .add_modifier(Modifier::DIM),
        Recency::Gone => Style::default().fg(Color::DarkGray),
    }
}

pub fn row_label_style(timed_out: bool) -> Style {
    if timed_out {
        Style::default().fg(Color::Magenta).add_modifier(Modifier::ITALIC)
    } else {
        Style::default().fg(Color::Cyan)
    }
}

/// Cell text clipped to `width` characters, `·` when blank
pub fn cell_text(cell: &ViewCell, width: usize) -> String {
    match cell.value.as_deref() {
        Some(value) if !value.is_empty() => truncate(value, width),
        _ => "·".to_string(),
    }
}

pub fn truncate(text: &str, width: usize) -> String {
    if text.chars().count() <= width {
        return text.to_string();
    }
    let mut clipped: String = text.chars().take(width.saturating_sub(1)).collect();
    clipped.push('…');
    clipped
}
