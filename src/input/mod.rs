use winit::event::{ElementState, KeyEvent};
use winit::keyboard::{Key, ModifiersState, NamedKey};

/// What a key press means to the command surface.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InputAction {
    /// Append text to the command line.
    Type(String),
    Backspace,
    Submit,
    PageUp,
    PageDown,
    None,
}

pub fn handle_key_event(event: &KeyEvent, modifiers: ModifiersState) -> InputAction {
    if event.state != ElementState::Pressed {
        return InputAction::None;
    }

    match &event.logical_key {
        Key::Named(named) => match named {
            NamedKey::Enter => InputAction::Submit,
            NamedKey::Backspace => InputAction::Backspace,
            NamedKey::PageUp => InputAction::PageUp,
            NamedKey::PageDown => InputAction::PageDown,
            NamedKey::Space => InputAction::Type(" ".to_string()),
            _ => InputAction::None,
        },
        Key::Character(text) => {
            // Modifier chords are not command-line text.
            if modifiers.control_key() || modifiers.super_key() || modifiers.alt_key() {
                return InputAction::None;
            }
            InputAction::Type(text.to_string())
        }
        _ => InputAction::None,
    }
}
