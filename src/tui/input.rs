//! Key bindings
//!
//! Every shortcut is Ctrl-based so plain characters can always go to the
//! filter or an open text field.

use crate::tui::app::{Action, Nav};
use crossterm::event::{KeyCode, KeyEvent, KeyModifiers};

/// Translate a key press into an operator action
pub fn map_key(key: KeyEvent) -> Option<Action> {
    if key.modifiers.contains(KeyModifiers::CONTROL) {
        return match key.code {
            KeyCode::Char('c') => Some(Action::Quit),
            KeyCode::Char('g') => Some(Action::Help),
            KeyCode::Char('e') => Some(Action::ErrorDetails),
            KeyCode::Char('f') => Some(Action::ToggleSearch),
            KeyCode::Char('r') => Some(Action::Refresh),
            KeyCode::Char('n') => Some(Action::CreateGroup),
            KeyCode::Char('d') => Some(Action::DeleteGroup),
            KeyCode::Char('a') => Some(Action::Add),
            KeyCode::Char('x') => Some(Action::Remove),
            _ => None,
        };
    }

    match key.code {
        KeyCode::Up => Some(Action::Move(Nav::Up)),
        KeyCode::Down => Some(Action::Move(Nav::Down)),
        KeyCode::PageUp => Some(Action::Move(Nav::PageUp)),
        KeyCode::PageDown => Some(Action::Move(Nav::PageDown)),
        KeyCode::Home => Some(Action::Move(Nav::Home)),
        KeyCode::End => Some(Action::Move(Nav::End)),
        KeyCode::Enter => Some(Action::Confirm),
        KeyCode::Esc => Some(Action::Back),
        KeyCode::Tab => Some(Action::NextTab),
        KeyCode::BackTab => Some(Action::PrevTab),
        KeyCode::Backspace => Some(Action::Backspace),
        KeyCode::Char(c) if !key.modifiers.contains(KeyModifiers::ALT) => Some(Action::Char(c)),
        _ => None,
    }
}
