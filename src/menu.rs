use std::path::{Path, PathBuf};

use crossterm::event::KeyCode;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::help;
use crate::input::{Dialog, Fixed32Input, ListChooser, MultiInput, Outcome, TextInput};
use crate::nav::{wrap_index, ListCursor};
use crate::settings::{
    self, coupled_keys, Action, Changes, DeviceSnapshot, Field, FieldKind, FieldValue, Menu,
    MenuNode, ROOT_LABEL, SAVE_LABEL,
};
use crate::transport::AdminAction;

pub const APP_ROOT_LABEL: &str = "App Settings";
const NO_CONFIG_FILES: &str = " No config files found. Export a config first.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MenuKind {
    Device,
    App,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Level {
    label: String,
    cursor: ListCursor,
}

impl Level {
    fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            cursor: ListCursor::default(),
        }
    }
}

/// An open field editor, tagged by the widget its kind dispatches to.
#[derive(Debug, Clone, PartialEq)]
pub enum Editor {
    Choice {
        key: String,
        kind: FieldKind,
        chooser: ListChooser,
    },
    Text {
        key: String,
        kind: FieldKind,
        name: String,
        input: TextInput,
    },
    Fixed32 {
        key: String,
        input: Fixed32Input,
    },
    Multi {
        key: String,
        kind: FieldKind,
        input: MultiInput,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub enum Confirm {
    Admin(AdminAction),
    Overwrite(PathBuf),
    Load(PathBuf),
    ConfigUrl(String),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Modal {
    Edit(Editor),
    ExportName(TextInput),
    ChooseFile {
        chooser: ListChooser,
        files: Vec<PathBuf>,
    },
    UrlInput(TextInput),
    Confirm {
        action: Confirm,
        chooser: ListChooser,
    },
    Notice(Dialog),
}

/// What the caller must do after a key has been handled.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionStep {
    Continue,
    Exit,
    Save(Changes),
    Admin(AdminAction),
    Export(PathBuf),
    Import(PathBuf),
    SetConfigUrl(String),
    OpenAppSettings,
}

/// One settings-menu session. The path, per-level selection and per-level
/// scroll offset live together in `levels`, so they grow and shrink in
/// lockstep.
#[derive(Debug, Clone)]
pub struct MenuSession {
    kind: MenuKind,
    tree: Menu,
    levels: Vec<Level>,
    modified: Changes,
    modal: Option<Modal>,
    visible_height: usize,
    config_dir: PathBuf,
    config_url: String,
}

impl MenuSession {
    pub fn device(snapshot: &DeviceSnapshot, config_dir: PathBuf, config_url: String) -> Self {
        Self::with_tree(
            MenuKind::Device,
            settings::build_device_menu(snapshot),
            ROOT_LABEL,
            config_dir,
            config_url,
        )
    }

    pub fn app(cfg: &Config) -> Self {
        Self::with_tree(
            MenuKind::App,
            settings::build_app_menu(cfg),
            APP_ROOT_LABEL,
            PathBuf::new(),
            String::new(),
        )
    }

    fn with_tree(
        kind: MenuKind,
        tree: Menu,
        root: &str,
        config_dir: PathBuf,
        config_url: String,
    ) -> Self {
        Self {
            kind,
            tree,
            levels: vec![Level::new(root)],
            modified: Changes::new(),
            modal: None,
            visible_height: 10,
            config_dir,
            config_url,
        }
    }

    pub fn kind(&self) -> MenuKind {
        self.kind
    }

    pub fn depth(&self) -> usize {
        self.levels.len()
    }

    pub fn path(&self) -> Vec<String> {
        self.levels.iter().map(|l| l.label.clone()).collect()
    }

    pub fn selected_stack(&self) -> Vec<usize> {
        self.levels.iter().map(|l| l.cursor.selected).collect()
    }

    pub fn scroll_stack(&self) -> Vec<usize> {
        self.levels.iter().map(|l| l.cursor.scroll_start).collect()
    }

    pub fn modified(&self) -> &Changes {
        &self.modified
    }

    pub fn modal(&self) -> Option<&Modal> {
        self.modal.as_ref()
    }

    pub fn modal_mut(&mut self) -> Option<&mut Modal> {
        self.modal.as_mut()
    }

    pub fn cursor(&self) -> ListCursor {
        self.current_level().cursor
    }

    pub fn set_config_url(&mut self, url: String) {
        self.config_url = url;
    }

    fn current_level(&self) -> &Level {
        // levels always holds at least the root
        &self.levels[self.levels.len() - 1]
    }

    fn current_level_mut(&mut self) -> &mut Level {
        let last = self.levels.len() - 1;
        &mut self.levels[last]
    }

    fn sub_path(&self) -> Vec<String> {
        self.levels.iter().skip(1).map(|l| l.label.clone()).collect()
    }

    pub fn current_menu(&self) -> Option<&Menu> {
        self.tree.descend(&self.sub_path())
    }

    pub fn options(&self) -> Vec<String> {
        self.current_menu()
            .map(|menu| menu.labels().map(str::to_string).collect())
            .unwrap_or_default()
    }

    /// Rows as drawn: label plus the current value for field rows.
    pub fn rows(&self) -> Vec<(String, Option<String>, bool)> {
        let Some(menu) = self.current_menu() else {
            return Vec::new();
        };
        menu.entries
            .iter()
            .map(|(label, node)| match node {
                MenuNode::Field(field) => (label.clone(), Some(field.value.to_string()), false),
                MenuNode::Action(action) => (label.clone(), None, action.is_sensitive()),
                MenuNode::Submenu(_) => (label.clone(), None, false),
            })
            .collect()
    }

    /// Whether a synthetic save row is appended at this level.
    pub fn show_save(&self) -> bool {
        let path = self.path();
        let depth = path.len();
        let has = |label: &str| path.iter().any(|p| p == label);
        match self.kind {
            MenuKind::Device => {
                (depth > 2 && (has("Radio Settings") || has("Module Settings")))
                    || (depth == 2 && has("User Settings"))
                    || (depth == 3 && has("Channels"))
            }
            MenuKind::App => depth >= 2,
        }
    }

    pub fn item_count(&self) -> usize {
        self.options().len() + usize::from(self.show_save())
    }

    pub fn on_save_row(&self) -> bool {
        self.show_save() && self.cursor().selected == self.options().len()
    }

    /// Label under the cursor, used for help lookups.
    pub fn selected_label(&self) -> Option<String> {
        if self.on_save_row() {
            return Some(SAVE_LABEL.to_string());
        }
        self.options().get(self.cursor().selected).cloned()
    }

    pub fn set_visible_height(&mut self, height: usize) {
        self.visible_height = height.max(1);
        let count = self.item_count();
        let height = self.visible_height;
        self.current_level_mut().cursor.clamp(count, height);
    }

    fn select(&mut self, index: usize) {
        let count = self.item_count();
        let height = self.visible_height;
        self.current_level_mut().cursor.select(index, count, height);
    }

    /// Swaps in a freshly built tree, keeping as much of the path as still
    /// resolves.
    pub fn reload(&mut self, tree: Menu) {
        self.tree = tree;
        let mut keep = 1;
        for idx in 1..self.levels.len() {
            let prefix: Vec<String> = self.levels[1..=idx].iter().map(|l| l.label.clone()).collect();
            if self.tree.descend(&prefix).is_none() {
                break;
            }
            keep = idx + 1;
        }
        self.levels.truncate(keep);
        self.set_visible_height(self.visible_height);
    }

    pub fn notify(&mut self, title: impl Into<String>, message: impl Into<String>) {
        self.modal = Some(Modal::Notice(Dialog::new(title, message)));
    }

    pub fn handle_key(&mut self, key: KeyCode) -> SessionStep {
        if let Some(modal) = self.modal.take() {
            return self.handle_modal(modal, key);
        }

        let count = self.item_count();
        match key {
            KeyCode::Up => {
                let target = wrap_index(self.cursor().selected, -1, count);
                self.select(target);
                SessionStep::Continue
            }
            KeyCode::Down => {
                let target = wrap_index(self.cursor().selected, 1, count);
                self.select(target);
                SessionStep::Continue
            }
            KeyCode::Tab if self.show_save() => {
                self.select(count.saturating_sub(1));
                SessionStep::Continue
            }
            KeyCode::Right | KeyCode::Enter => self.activate(),
            KeyCode::Left => self.back(),
            KeyCode::Esc => SessionStep::Exit,
            _ => SessionStep::Continue,
        }
    }

    fn back(&mut self) -> SessionStep {
        if self.levels.len() < 2 {
            self.modified.clear();
            return SessionStep::Exit;
        }
        self.levels.pop();
        SessionStep::Continue
    }

    fn activate(&mut self) -> SessionStep {
        if self.on_save_row() {
            let changes = std::mem::take(&mut self.modified);
            info!(count = changes.len(), "saving staged settings");
            if self.levels.len() > 1 {
                self.levels.pop();
            }
            return SessionStep::Save(changes);
        }

        let Some(label) = self.selected_label() else {
            return SessionStep::Continue;
        };
        let node = self
            .current_menu()
            .and_then(|menu| menu.get(&label))
            .cloned();
        match node {
            Some(MenuNode::Submenu(_)) => {
                self.levels.push(Level::new(label));
                SessionStep::Continue
            }
            Some(MenuNode::Field(field)) => {
                self.modal = Some(Modal::Edit(self.open_editor(&field)));
                SessionStep::Continue
            }
            Some(MenuNode::Action(action)) => self.start_action(action),
            None => SessionStep::Continue,
        }
    }

    fn human_name(&self, option: &str) -> String {
        let key = help::help_key(&self.path(), option);
        help::catalog()
            .label(&key)
            .map(str::to_string)
            .unwrap_or_else(|| option.to_string())
    }

    fn open_editor(&self, field: &Field) -> Editor {
        let human = self.human_name(&field.name);
        let current = field.value.to_string();
        match field.kind {
            FieldKind::Bool => Editor::Choice {
                key: field.key.clone(),
                kind: field.kind,
                chooser: ListChooser::new(
                    human,
                    vec!["True".to_string(), "False".to_string()],
                    Some(&current),
                ),
            },
            FieldKind::Enum(options) => Editor::Choice {
                key: field.key.clone(),
                kind: field.kind,
                chooser: ListChooser::new(
                    human,
                    options.iter().map(|o| o.to_string()).collect(),
                    Some(&current),
                ),
            },
            FieldKind::Fixed32 => Editor::Fixed32 {
                key: field.key.clone(),
                input: Fixed32Input::new(current),
            },
            FieldKind::AdminKeys | FieldKind::Repeated => {
                let values = match &field.value {
                    FieldValue::Keys(items) | FieldValue::List(items) => items.clone(),
                    _ => Vec::new(),
                };
                let input = if field.kind == FieldKind::AdminKeys {
                    MultiInput::admin_keys(&values)
                } else {
                    MultiInput::repeated(&values)
                };
                Editor::Multi {
                    key: field.key.clone(),
                    kind: field.kind,
                    input,
                }
            }
            FieldKind::UInt | FieldKind::Int | FieldKind::Float | FieldKind::Text => Editor::Text {
                key: field.key.clone(),
                kind: field.kind,
                name: field.name.clone(),
                input: TextInput::new(format!("{human} is currently: {current}"))
                    .with_max_len(settings::rule_for(&field.name).max_len),
            },
        }
    }

    /// Writes an accepted value into the tree and stages it, along with any
    /// fields that must travel with it.
    fn commit(&mut self, key: &str, value: FieldValue) {
        if let Some(field) = self.tree.find_field_mut(key) {
            field.value = value;
        }
        for staged in coupled_keys(key) {
            let Some(field) = self.tree.find_field_mut(&staged) else {
                continue;
            };
            if staged != key && field.value == FieldValue::NotSet {
                continue;
            }
            self.modified.insert(staged, field.value.clone());
        }
        debug!(key, staged = self.modified.len(), "setting staged");
    }

    fn start_action(&mut self, action: Action) -> SessionStep {
        if let Some(admin) = action.admin() {
            self.modal = Some(Modal::Confirm {
                action: Confirm::Admin(admin),
                chooser: ListChooser::confirm(format!("Are you sure you want to {}?", action.label())),
            });
            return SessionStep::Continue;
        }
        match action {
            Action::Exit => SessionStep::Exit,
            Action::AppSettings => SessionStep::OpenAppSettings,
            Action::ExportConfig => {
                self.modal = Some(Modal::ExportName(TextInput::new(
                    "Enter a filename for the config file",
                )));
                SessionStep::Continue
            }
            Action::LoadConfig => {
                let files = config_files(&self.config_dir);
                if files.is_empty() {
                    self.notify("", NO_CONFIG_FILES);
                } else {
                    let names = files
                        .iter()
                        .filter_map(|p| p.file_name())
                        .map(|n| n.to_string_lossy().into_owned())
                        .collect();
                    self.modal = Some(Modal::ChooseFile {
                        chooser: ListChooser::new("Choose a config file", names, None),
                        files,
                    });
                }
                SessionStep::Continue
            }
            Action::ConfigUrl => {
                self.modal = Some(Modal::UrlInput(TextInput::new(format!(
                    "Config URL is currently: {}",
                    self.config_url
                ))));
                SessionStep::Continue
            }
            Action::Reboot | Action::ResetNodeDb | Action::Shutdown | Action::FactoryReset => {
                SessionStep::Continue
            }
        }
    }

    fn confirm(&mut self, action: Confirm, prompt: String) {
        self.modal = Some(Modal::Confirm {
            action,
            chooser: ListChooser::confirm(prompt),
        });
    }

    fn handle_modal(&mut self, modal: Modal, key: KeyCode) -> SessionStep {
        match modal {
            Modal::Edit(editor) => self.handle_editor(editor, key),
            Modal::ExportName(mut input) => match input.handle_key(key) {
                Outcome::Pending => {
                    self.modal = Some(Modal::ExportName(input));
                    SessionStep::Continue
                }
                Outcome::Cancelled => SessionStep::Continue,
                Outcome::Submitted(name) => {
                    let name = name.trim().to_string();
                    if name.is_empty() {
                        info!("export aborted: no filename provided");
                        return SessionStep::Continue;
                    }
                    let file_name = if name.to_lowercase().ends_with(".yaml") {
                        name
                    } else {
                        format!("{name}.yaml")
                    };
                    let path = self.config_dir.join(&file_name);
                    if path.exists() {
                        self.confirm(
                            Confirm::Overwrite(path),
                            format!("{file_name} already exists. Overwrite?"),
                        );
                        return SessionStep::Continue;
                    }
                    SessionStep::Export(path)
                }
            },
            Modal::ChooseFile { mut chooser, files } => match chooser.handle_key(key) {
                Outcome::Pending => {
                    self.modal = Some(Modal::ChooseFile { chooser, files });
                    SessionStep::Continue
                }
                Outcome::Cancelled => SessionStep::Continue,
                Outcome::Submitted(idx) => {
                    if let Some(path) = files.get(idx).cloned() {
                        let name = chooser.selected().unwrap_or_default().to_string();
                        self.confirm(
                            Confirm::Load(path),
                            format!("Are you sure you want to load {name}?"),
                        );
                    }
                    SessionStep::Continue
                }
            },
            Modal::UrlInput(mut input) => match input.handle_key(key) {
                Outcome::Pending => {
                    self.modal = Some(Modal::UrlInput(input));
                    SessionStep::Continue
                }
                Outcome::Cancelled => SessionStep::Continue,
                Outcome::Submitted(url) => {
                    self.confirm(
                        Confirm::ConfigUrl(url),
                        "Are you sure you want to load this config?".to_string(),
                    );
                    SessionStep::Continue
                }
            },
            Modal::Confirm {
                action,
                mut chooser,
            } => match chooser.handle_key(key) {
                Outcome::Pending => {
                    self.modal = Some(Modal::Confirm { action, chooser });
                    SessionStep::Continue
                }
                Outcome::Cancelled => SessionStep::Continue,
                Outcome::Submitted(idx) => {
                    if chooser.options.get(idx).map(String::as_str) != Some("Yes") {
                        return SessionStep::Continue;
                    }
                    match action {
                        Confirm::Admin(admin) => SessionStep::Admin(admin),
                        Confirm::Overwrite(path) => SessionStep::Export(path),
                        Confirm::Load(path) => SessionStep::Import(path),
                        Confirm::ConfigUrl(url) => SessionStep::SetConfigUrl(url),
                    }
                }
            },
            Modal::Notice(mut dialog) => {
                if dialog.handle_key(key) == Outcome::Pending {
                    self.modal = Some(Modal::Notice(dialog));
                }
                SessionStep::Continue
            }
        }
    }

    fn handle_editor(&mut self, editor: Editor, key: KeyCode) -> SessionStep {
        match editor {
            Editor::Choice {
                key: field_key,
                kind,
                mut chooser,
            } => match chooser.handle_key(key) {
                Outcome::Pending => {
                    self.modal = Some(Modal::Edit(Editor::Choice {
                        key: field_key,
                        kind,
                        chooser,
                    }));
                }
                Outcome::Cancelled => {}
                Outcome::Submitted(idx) => {
                    let value = match kind {
                        FieldKind::Bool => FieldValue::Bool(idx == 0),
                        _ => chooser
                            .options
                            .get(idx)
                            .cloned()
                            .map(FieldValue::Enum)
                            .unwrap_or(FieldValue::NotSet),
                    };
                    self.commit(&field_key, value);
                }
            },
            Editor::Text {
                key: field_key,
                kind,
                name,
                mut input,
            } => match input.handle_key(key) {
                Outcome::Pending => {
                    self.modal = Some(Modal::Edit(Editor::Text {
                        key: field_key,
                        kind,
                        name,
                        input,
                    }));
                }
                Outcome::Cancelled => {}
                Outcome::Submitted(raw) => match settings::parse_input(kind, &name, &raw) {
                    Ok(value) => self.commit(&field_key, value),
                    Err(err) => {
                        warn!(key = %field_key, error = %err, "rejected setting input");
                        input.reject(&err);
                        self.modal = Some(Modal::Edit(Editor::Text {
                            key: field_key,
                            kind,
                            name,
                            input,
                        }));
                    }
                },
            },
            Editor::Fixed32 {
                key: field_key,
                mut input,
            } => match input.handle_key(key) {
                Outcome::Pending => {
                    self.modal = Some(Modal::Edit(Editor::Fixed32 {
                        key: field_key,
                        input,
                    }));
                }
                Outcome::Cancelled => {}
                Outcome::Submitted(addr) => self.commit(&field_key, FieldValue::Fixed32(addr)),
            },
            Editor::Multi {
                key: field_key,
                kind,
                mut input,
            } => match input.handle_key(key) {
                Outcome::Pending => {
                    self.modal = Some(Modal::Edit(Editor::Multi {
                        key: field_key,
                        kind,
                        input,
                    }));
                }
                Outcome::Cancelled => {}
                Outcome::Submitted(values) => {
                    let value = if kind == FieldKind::AdminKeys {
                        FieldValue::Keys(values)
                    } else {
                        FieldValue::List(values)
                    };
                    self.commit(&field_key, value);
                }
            },
        }
        SessionStep::Continue
    }
}

/// Regular files in the node-config folder, sorted by name.
pub fn config_files(dir: &Path) -> Vec<PathBuf> {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return Vec::new();
    };
    let mut files: Vec<PathBuf> = entries
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| path.is_file())
        .collect();
    files.sort();
    files
}
