//! Keyboard input for the `--tui` status view.
//!
//! The view is read-only, so every binding is navigation or quit.  Feed-level
//! jumps move between header rows; see [`App::select_next_feed`].

use crossterm::event::{KeyCode, KeyEvent, KeyEventKind};

use crate::app::App;

/// Apply one key event to `app`.  Release and repeat events are ignored.
pub fn handle_key_event(app: &mut App, key: KeyEvent) {
    if key.kind != KeyEventKind::Press {
        return;
    }

    match key.code {
        KeyCode::Char('q') | KeyCode::Esc => app.quit = true,
        KeyCode::Down | KeyCode::Char('j') => app.select_next(),
        KeyCode::Up | KeyCode::Char('k') => app.select_previous(),
        KeyCode::PageDown | KeyCode::Tab | KeyCode::Char(']') => app.select_next_feed(),
        KeyCode::PageUp | KeyCode::BackTab | KeyCode::Char('[') => app.select_previous_feed(),
        KeyCode::Home | KeyCode::Char('g') => app.select_first(),
        KeyCode::End | KeyCode::Char('G') => app.select_last(),
        _ => {}
    }
}
