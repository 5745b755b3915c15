use std::net::Ipv4Addr;

use crossterm::event::KeyCode;

use crate::nav::{wrap_index, ListCursor};
use crate::settings::{self, ValidationError};

/// Result of feeding one key to a modal widget.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome<T> {
    Pending,
    Submitted(T),
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextInput {
    pub prompt: String,
    pub value: String,
    pub max_len: Option<usize>,
    pub error: Option<String>,
}

impl TextInput {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            value: String::new(),
            max_len: None,
            error: None,
        }
    }

    pub fn with_max_len(mut self, max_len: Option<usize>) -> Self {
        self.max_len = max_len;
        self
    }

    pub fn handle_key(&mut self, key: KeyCode) -> Outcome<String> {
        match key {
            KeyCode::Esc | KeyCode::Left => Outcome::Cancelled,
            KeyCode::Enter => Outcome::Submitted(self.value.clone()),
            KeyCode::Backspace => {
                self.value.pop();
                Outcome::Pending
            }
            KeyCode::Char(ch) => {
                let full = self
                    .max_len
                    .is_some_and(|max| self.value.chars().count() >= max);
                if !full {
                    self.value.push(ch);
                    self.error = None;
                }
                Outcome::Pending
            }
            _ => Outcome::Pending,
        }
    }

    /// Keeps the editor open with the error shown and the input cleared.
    pub fn reject(&mut self, err: &ValidationError) {
        self.error = Some(err.to_string());
        self.value.clear();
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListChooser {
    pub prompt: String,
    pub options: Vec<String>,
    pub cursor: ListCursor,
    pub visible_height: usize,
}

impl ListChooser {
    pub fn new(prompt: impl Into<String>, options: Vec<String>, current: Option<&str>) -> Self {
        let selected = current
            .and_then(|cur| options.iter().position(|o| o == cur))
            .unwrap_or(0);
        let mut chooser = Self {
            prompt: prompt.into(),
            options,
            cursor: ListCursor::default(),
            visible_height: 10,
        };
        let count = chooser.options.len();
        chooser.cursor.select(selected, count, chooser.visible_height);
        chooser
    }

    pub fn confirm(prompt: impl Into<String>) -> Self {
        Self::new(prompt, vec!["Yes".to_string(), "No".to_string()], None)
    }

    pub fn set_visible_height(&mut self, height: usize) {
        self.visible_height = height.max(1);
        self.cursor.clamp(self.options.len(), self.visible_height);
    }

    pub fn selected(&self) -> Option<&str> {
        self.options.get(self.cursor.selected).map(String::as_str)
    }

    /// Up and down wrap past either end.
    pub fn handle_key(&mut self, key: KeyCode) -> Outcome<usize> {
        let count = self.options.len();
        match key {
            KeyCode::Esc | KeyCode::Left => Outcome::Cancelled,
            KeyCode::Enter | KeyCode::Right if count > 0 => Outcome::Submitted(self.cursor.selected),
            KeyCode::Up => {
                let target = wrap_index(self.cursor.selected, -1, count);
                self.cursor.select(target, count, self.visible_height);
                Outcome::Pending
            }
            KeyCode::Down => {
                let target = wrap_index(self.cursor.selected, 1, count);
                self.cursor.select(target, count, self.visible_height);
                Outcome::Pending
            }
            _ => Outcome::Pending,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fixed32Input {
    pub current: String,
    pub value: String,
    pub error: Option<String>,
}

impl Fixed32Input {
    pub fn new(current: impl Into<String>) -> Self {
        Self {
            current: current.into(),
            value: String::new(),
            error: None,
        }
    }

    pub fn handle_key(&mut self, key: KeyCode) -> Outcome<Ipv4Addr> {
        match key {
            KeyCode::Esc | KeyCode::Left => Outcome::Cancelled,
            KeyCode::Enter => match settings::parse_ipv4(&self.value) {
                Ok(addr) => Outcome::Submitted(addr),
                Err(err) => {
                    self.error = Some(err.to_string());
                    self.value.clear();
                    Outcome::Pending
                }
            },
            KeyCode::Backspace => {
                self.value.pop();
                Outcome::Pending
            }
            KeyCode::Char(ch) if ch.is_ascii_digit() || ch == '.' => {
                self.value.push(ch);
                self.error = None;
                Outcome::Pending
            }
            _ => Outcome::Pending,
        }
    }
}

/// Editor over a fixed number of string slots, shared by the admin-key and
/// repeated-value fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MultiInput {
    pub title: String,
    pub slot_label: String,
    pub values: Vec<String>,
    pub cursor: usize,
    pub error: Option<String>,
    validate_keys: bool,
}

pub const MULTI_SLOTS: usize = 3;

impl MultiInput {
    pub fn admin_keys(current: &[String]) -> Self {
        Self::build("Edit up to 3 Admin Keys:", "Admin Key", current, true)
    }

    pub fn repeated(current: &[String]) -> Self {
        Self::build("Edit up to 3 Values:", "Value", current, false)
    }

    fn build(title: &str, slot_label: &str, current: &[String], validate_keys: bool) -> Self {
        let mut values: Vec<String> = current.iter().take(MULTI_SLOTS).cloned().collect();
        values.resize(MULTI_SLOTS, String::new());
        Self {
            title: title.to_string(),
            slot_label: slot_label.to_string(),
            values,
            cursor: 0,
            error: None,
            validate_keys,
        }
    }

    pub fn handle_key(&mut self, key: KeyCode) -> Outcome<Vec<String>> {
        match key {
            KeyCode::Esc | KeyCode::Left => Outcome::Cancelled,
            KeyCode::Enter => {
                if self.validate_keys {
                    if let Err(err) = settings::validate_admin_keys(&self.values) {
                        self.error = Some(err.to_string());
                        return Outcome::Pending;
                    }
                }
                Outcome::Submitted(
                    self.values
                        .iter()
                        .filter(|v| !v.trim().is_empty())
                        .cloned()
                        .collect(),
                )
            }
            KeyCode::Up => {
                self.cursor = wrap_index(self.cursor, -1, self.values.len());
                Outcome::Pending
            }
            KeyCode::Down | KeyCode::Tab => {
                self.cursor = wrap_index(self.cursor, 1, self.values.len());
                Outcome::Pending
            }
            KeyCode::Backspace => {
                if let Some(slot) = self.values.get_mut(self.cursor) {
                    slot.pop();
                }
                Outcome::Pending
            }
            KeyCode::Char(ch) => {
                if let Some(slot) = self.values.get_mut(self.cursor) {
                    slot.push(ch);
                    self.error = None;
                }
                Outcome::Pending
            }
            _ => Outcome::Pending,
        }
    }
}

/// A message box dismissed by Enter, Space or Escape.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dialog {
    pub title: String,
    pub message: String,
}

impl Dialog {
    pub fn new(title: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            message: message.into(),
        }
    }

    pub fn handle_key(&mut self, key: KeyCode) -> Outcome<()> {
        match key {
            KeyCode::Enter | KeyCode::Char(' ') | KeyCode::Esc => Outcome::Submitted(()),
            _ => Outcome::Pending,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn type_str(input: &mut TextInput, text: &str) {
        for ch in text.chars() {
            input.handle_key(KeyCode::Char(ch));
        }
    }

    #[test]
    fn text_input_respects_max_len_and_cancel() {
        let mut input = TextInput::new("Short Name").with_max_len(Some(4));
        type_str(&mut input, "ABCDE");
        assert_eq!(input.value, "ABCD");
        input.handle_key(KeyCode::Backspace);
        assert_eq!(input.handle_key(KeyCode::Enter), Outcome::Submitted("ABC".into()));
        assert_eq!(input.handle_key(KeyCode::Esc), Outcome::Cancelled);
    }

    #[test]
    fn chooser_wraps_and_starts_at_current() {
        let mut chooser = ListChooser::new(
            "Role",
            vec!["A".into(), "B".into(), "C".into()],
            Some("C"),
        );
        assert_eq!(chooser.selected(), Some("C"));
        chooser.handle_key(KeyCode::Down);
        assert_eq!(chooser.selected(), Some("A"));
        chooser.handle_key(KeyCode::Up);
        assert_eq!(chooser.handle_key(KeyCode::Enter), Outcome::Submitted(2));
    }

    #[test]
    fn fixed32_filters_and_reprompts() {
        let mut input = Fixed32Input::new("0.0.0.0");
        for ch in "10.a0.x1".chars() {
            input.handle_key(KeyCode::Char(ch));
        }
        assert_eq!(input.value, "10.0.1");
        assert_eq!(input.handle_key(KeyCode::Enter), Outcome::Pending);
        assert_eq!(input.error.as_deref(), Some("Invalid IP address. Try again."));
        assert!(input.value.is_empty());
        for ch in "10.0.0.1".chars() {
            input.handle_key(KeyCode::Char(ch));
        }
        assert_eq!(
            input.handle_key(KeyCode::Enter),
            Outcome::Submitted(Ipv4Addr::new(10, 0, 0, 1))
        );
    }

    #[test]
    fn admin_keys_reject_bad_lengths() {
        let mut input = MultiInput::admin_keys(&[]);
        input.handle_key(KeyCode::Char('A'));
        assert_eq!(input.handle_key(KeyCode::Enter), Outcome::Pending);
        assert!(input.error.is_some());
        input.handle_key(KeyCode::Backspace);
        assert_eq!(input.handle_key(KeyCode::Enter), Outcome::Submitted(vec![]));
    }

    #[test]
    fn repeated_values_cycle_slots() {
        let mut input = MultiInput::repeated(&["one".into()]);
        input.handle_key(KeyCode::Down);
        input.handle_key(KeyCode::Char('x'));
        input.handle_key(KeyCode::Up);
        input.handle_key(KeyCode::Up);
        assert_eq!(input.cursor, 2);
        assert_eq!(
            input.handle_key(KeyCode::Enter),
            Outcome::Submitted(vec!["one".into(), "x".into()])
        );
    }

    #[test]
    fn dialog_dismisses() {
        let mut dialog = Dialog::new("Slow down", "Please wait");
        assert_eq!(dialog.handle_key(KeyCode::Char('x')), Outcome::Pending);
        assert_eq!(dialog.handle_key(KeyCode::Char(' ')), Outcome::Submitted(()));
    }
}
