use {
    crate::sink::{GridView, ViewCell},
    crate::ui::renderer::{cell_style, cell_text, row_label_style, truncate, MAX_COLUMN_WIDTH},
    ratatui::{
        layout::{Constraint, Layout as RatLayout, Rect},
        style::{Color, Modifier, Style},
        text::{Line, Span},
        widgets::{Block, Borders, Cell, Paragraph, Row, Table},
        Frame,
    },
};

/// Render the main UI layout
pub fn render_layout(
    f: &mut Frame,
    area: Rect,
    view: &GridView,
    scroll: usize,
) -> Result<(), Box<dyn std::error::Error>> {
    let chunks = RatLayout::default()
        .direction(ratatui::layout::Direction::Vertical)
        .constraints([
            Constraint::Length(3), // Header
            Constraint::Min(0),    // Grid
            Constraint::Length(4), // Footer/Status
        ])
        .split(area);

    render_header(f, chunks[0]);

    if view.rows.is_empty() && !view.origins.is_empty() {
        render_origins(f, chunks[1], view);
    } else {
        render_grid(f, chunks[1], view, scroll)?;
    }

    render_footer(f, chunks[2], view);

    Ok(())
}

fn render_header(f: &mut Frame, area: Rect) {
    let header = Block::default()
        .borders(Borders::ALL)
        .title("testgrid - Live Result Grid");

    let text = vec![
        Line::from(vec![
            Span::styled("testgrid", Style::default().fg(Color::Cyan).add_modifier(Modifier::BOLD)),
            Span::raw(" | 'q'/Esc quit, ↑/↓ scroll"),
        ]),
    ];

    f.render_widget(Paragraph::new(text).block(header), area);
}

fn render_grid(
    f: &mut Frame,
    area: Rect,
    view: &GridView,
    scroll: usize,
) -> Result<(), Box<dyn std::error::Error>> {
    let label_width = view
        .rows
        .iter()
        .map(|row| row.content.chars().count())
        .max()
        .unwrap_or(4)
        .clamp(4, MAX_COLUMN_WIDTH);

    let mut header_cells = vec![Cell::from("Row"), Cell::from("Timer")];
    header_cells.extend(
        view.columns
            .iter()
            .map(|column| Cell::from(truncate(&column.content, MAX_COLUMN_WIDTH))),
    );
    let header = Row::new(header_cells)
        .style(Style::default().fg(Color::Yellow).add_modifier(Modifier::BOLD));

    let blank = ViewCell::default();
    let rows: Vec<Row> = view
        .rows
        .iter()
        .skip(scroll)
        .map(|row| {
            let mut cells = vec![
                Cell::from(Span::styled(
                    truncate(&row.content, label_width),
                    row_label_style(row.timed_out),
                )),
                Cell::from(Span::styled(row.timer.clone(), row_label_style(row.timed_out))),
            ];
            cells.extend(view.columns.iter().map(|column| {
                let cell = row.cells.get(&column.label).unwrap_or(&blank);
                Cell::from(Span::styled(cell_text(cell, MAX_COLUMN_WIDTH), cell_style(cell)))
            }));
            Row::new(cells)
        })
        .collect();

    let mut widths = vec![
        Constraint::Length(label_width as u16),
        Constraint::Length(12),
    ];
    widths.extend(view.columns.iter().map(|column| {
        let width = column.content.chars().count().clamp(4, MAX_COLUMN_WIDTH);
        Constraint::Length(width as u16)
    }));

    let table = Table::new(rows, widths)
        .header(header)
        .block(Block::default().borders(Borders::ALL).title("Results"));

    f.render_widget(table, area);
    Ok(())
}

fn render_origins(f: &mut Frame, area: Rect, view: &GridView) {
    let mut lines = vec![Line::from(Span::styled(
        "Select an origin with origin=<id>:",
        Style::default().fg(Color::Yellow),
    ))];
    lines.extend(
        view.origins
            .iter()
            .map(|origin| Line::from(Span::styled(origin.clone(), Style::default().fg(Color::Cyan)))),
    );

    f.render_widget(
        Paragraph::new(lines).block(Block::default().borders(Borders::ALL).title("Origins")),
        area,
    );
}

fn render_footer(f: &mut Frame, area: Rect, view: &GridView) {
    let last_update = if view.last_update.is_empty() {
        "No updates yet"
    } else {
        view.last_update.as_str()
    };
    let heartbeat = if view.heartbeat.is_empty() {
        "-"
    } else {
        view.heartbeat.as_str()
    };

    let text = vec![
        Line::from(vec![
            Span::styled("Status: ", Style::default().fg(Color::Green)),
            Span::raw(view.status.clone()),
        ]),
        Line::from(vec![
            Span::styled("Rows: ", Style::default().fg(Color::Cyan)),
            Span::raw(view.rows.len().to_string()),
            Span::raw(" | "),
            Span::styled("Columns: ", Style::default().fg(Color::Cyan)),
            Span::raw(view.columns.len().to_string()),
            Span::raw(" | "),
            Span::raw(last_update.to_string()),
            Span::raw(" | "),
            Span::styled("Runner: ", Style::default().fg(Color::Cyan)),
            Span::raw(heartbeat.to_string()),
        ]),
    ];

    let footer = Block::default()
        .borders(Borders::ALL)
        .title("Status");

    f.render_widget(Paragraph::new(text).block(footer), area);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grid::Recency;
    use crate::sink::GridSink;
    use ratatui::{backend::TestBackend, Terminal};

    fn buffer_text(terminal: &Terminal<TestBackend>) -> String {
        terminal
            .backend()
            .buffer()
            .content()
            .iter()
            .map(|cell| cell.symbol())
            .collect()
    }

    #[test]
    fn test_grid_renders_rows_and_status() {
        let mut view = GridView::new();
        view.ensure_row("port3", "port3");
        view.ensure_column("ping", "ping");
        view.set_cell_value("port3", "ping", Some("fail"), Recency::Current)
            .unwrap();
        view.set_status("updating port3 ping = 100 with fail");

        let mut terminal = Terminal::new(TestBackend::new(100, 16)).unwrap();
        terminal
            .draw(|f| render_layout(f, f.size(), &view, 0).unwrap())
            .unwrap();

        let text = buffer_text(&terminal);
        assert!(text.contains("port3"));
        assert!(text.contains("fail"));
        assert!(text.contains("updating port3 ping"));
    }

    #[test]
    fn test_origins_listed_without_rows() {
        let mut view = GridView::new();
        view.set_origins(&["lab-1".to_string(), "lab-2".to_string()]);

        let mut terminal = Terminal::new(TestBackend::new(60, 12)).unwrap();
        terminal
            .draw(|f| render_layout(f, f.size(), &view, 0).unwrap())
            .unwrap();

        let text = buffer_text(&terminal);
        assert!(text.contains("lab-1"));
        assert!(text.contains("lab-2"));
    }
}
