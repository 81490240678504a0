//! Terminal UI rendering for the `--tui` status view.
//!
//! All drawing logic lives here, separated from application state ([`App`])
//! and input handling ([`crate::input`]).
//!
//! ## For contributors
//!
//! * The layout is a scrollable list on top, a one-line detail row showing
//!   the selected feed's link or item's description, and a status bar.
//! * Each feed gets a header row (title, item count, last refresh time)
//!   followed by its items, indented, with the item link dimmed.
//! * [`ratatui`] is the TUI framework; see its docs for widget details.

use ratatui::{
    layout::{Constraint, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, List, ListItem, Paragraph},
    Frame,
};

use crate::app::{rows, App, Row};

/// Draw the complete UI for one frame.
pub fn draw(app: &mut App, frame: &mut Frame) {
    let [main_area, detail_area, status_area] = Layout::vertical([
        Constraint::Min(1),
        Constraint::Length(1),
        Constraint::Length(1),
    ])
    .areas(frame.area());

    draw_feed_list(app, frame, main_area);
    draw_detail(app, frame, detail_area);
    draw_status_bar(app, frame, status_area);
}

fn row_line(row: Row<'_>) -> Line<'_> {
    match row {
        Row::Feed(feed) => Line::from(vec![
            Span::styled(
                if feed.title.is_empty() { feed.source_id.as_str() } else { feed.title.as_str() },
                Style::default().fg(Color::Cyan).add_modifier(Modifier::BOLD),
            ),
            Span::raw("  "),
            Span::styled(
                format!(
                    "{} items, updated {}",
                    feed.items.len(),
                    feed.last_update.format("%Y-%m-%d %H:%M:%S")
                ),
                Style::default().fg(Color::DarkGray),
            ),
        ]),
        Row::Item(item) => Line::from(vec![
            Span::raw("  "),
            Span::styled(item.title.as_str(), Style::default().fg(Color::White)),
            Span::raw("  "),
            Span::styled(item.link.as_str(), Style::default().fg(Color::DarkGray)),
        ]),
    }
}

/// Render the scrollable feed list.
fn draw_feed_list(app: &mut App, frame: &mut Frame, area: Rect) {
    let App { feeds, list_state, .. } = app;
    let list_items: Vec<ListItem> = rows(feeds).map(|row| ListItem::new(row_line(row))).collect();

    let list = List::new(list_items)
        .block(
            Block::default()
                .title(" Feeds ")
                .borders(Borders::ALL),
        )
        .highlight_style(
            Style::default()
                .add_modifier(Modifier::BOLD)
                .bg(Color::DarkGray),
        )
        .highlight_symbol("▸ ");

    frame.render_stateful_widget(list, area, list_state);
}

fn draw_detail(app: &App, frame: &mut Frame, area: Rect) {
    let text = match app.selected_row() {
        Some(Row::Feed(feed)) => feed.link.as_str(),
        Some(Row::Item(item)) => item.description.as_deref().unwrap_or(""),
        None => "",
    };
    // Descriptions are often multi-line HTML; keep the first line.
    let first_line = text.lines().next().unwrap_or("");
    frame.render_widget(
        Paragraph::new(format!(" {first_line}")).style(Style::default().fg(Color::Gray)),
        area,
    );
}

/// Render the bottom status bar.
fn draw_status_bar(app: &App, frame: &mut Frame, area: Rect) {
    let status = Paragraph::new(Line::from(vec![
        Span::styled(" ", Style::default()),
        Span::styled(&app.status, Style::default().fg(Color::Yellow)),
        Span::raw("  "),
        Span::styled(
            format!("{} feeds, {} items", app.feeds.len(), app.item_count()),
            Style::default().fg(Color::Green),
        ),
        Span::raw("  q: quit  ↑/↓: scroll  PgUp/PgDn: feed  Home/End: jump"),
    ]));
    frame.render_widget(status, area);
}
