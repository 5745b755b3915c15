use std::fs;
use std::io::{self, Stdout, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use anyhow::{Context, Result};
use crossterm::event::{self, Event, KeyEventKind};
use crossterm::terminal::{
    disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen,
};
use crossterm::ExecutableCommand;
use ratatui::backend::CrosstermBackend;
use ratatui::buffer::Buffer;
use ratatui::Terminal;
use tracing::{debug, info, warn};

use crate::config::{self, Config};
use crate::controller::{ChatController, Flow, Overlay};
use crate::menu::{MenuKind, MenuSession, SessionStep};
use crate::reducer::Reducer;
use crate::render::{self, RenderCoordinator};
use crate::settings::{self, Changes};
use crate::state::{Dirty, Shared};
use crate::transport::{AdminAction, DeviceControl, Transport};

pub type Term = Terminal<CrosstermBackend<Stdout>>;

const TICK: Duration = Duration::from_millis(100);
/// Wait between redraws while a settings screen is open, so it stays
/// current across resizes and background updates.
const MODAL_POLL: Duration = Duration::from_millis(200);

/// Runs `f` on the alternate screen in raw mode and restores the terminal
/// afterwards, whatever `f` returned.
pub fn with_terminal<T>(f: impl FnOnce(&mut Term) -> Result<T>) -> Result<T> {
    let mut stdout = io::stdout();
    enable_raw_mode()?;
    stdout.execute(EnterAlternateScreen)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;
    terminal.clear()?;

    let result = f(&mut terminal);

    disable_raw_mode()?;
    terminal.backend_mut().execute(LeaveAlternateScreen)?;
    terminal.show_cursor()?;

    result
}

/// Feeds inbound packets to the reducer on a dedicated thread. Each packet
/// is applied with the state lock held for the whole mutation.
pub fn spawn_event_pump(
    transport: &dyn Transport,
    shared: Shared,
    reducer: Arc<Reducer>,
) -> Result<Option<JoinHandle<()>>> {
    let Some(events) = transport.take_events() else {
        warn!("inbound event stream already taken");
        return Ok(None);
    };
    let handle = thread::Builder::new()
        .name("mesh-events".into())
        .spawn(move || {
            for packet in events.iter() {
                shared.with(|state| reducer.handle_inbound(state, packet));
            }
            debug!("inbound event stream closed");
        })
        .context("spawn event thread")?;
    Ok(Some(handle))
}

/// The chat screen: pane rendering plus key dispatch.
pub struct ChatView {
    shared: Shared,
    controller: ChatController,
    render: RenderCoordinator,
    settings: SettingsRunner,
    back: Buffer,
}

impl ChatView {
    pub fn new(shared: Shared, controller: ChatController, settings: SettingsRunner) -> Self {
        let cfg = settings.config();
        let render = RenderCoordinator::new(cfg.ui.clone(), cfg.messages.clone());
        Self {
            shared,
            controller,
            render,
            settings,
            back: Buffer::default(),
        }
    }

    pub fn run(&mut self, terminal: &mut Term) -> Result<()> {
        let mut failed_draw = false;
        loop {
            match self.redraw(terminal) {
                Ok(()) => failed_draw = false,
                // A resize landing mid-draw can fail once; the next resize
                // event repaints everything.
                Err(err) if !failed_draw => {
                    warn!(error = %err, "redraw failed");
                    failed_draw = true;
                    self.render.invalidate();
                }
                Err(err) => return Err(err),
            }

            if !event::poll(TICK)? {
                continue;
            }
            match event::read()? {
                Event::Key(key) if key.kind == KeyEventKind::Press => {
                    match self.controller.handle_key(key) {
                        Flow::Quit => break,
                        Flow::OpenSettings => self.open_settings(terminal)?,
                        Flow::Continue => {}
                    }
                }
                Event::Resize(..) => self.render.invalidate(),
                _ => {}
            }
        }
        info!("chat session closed");
        Ok(())
    }

    fn redraw(&mut self, terminal: &mut Term) -> Result<()> {
        let size = terminal.size()?;
        if self.back.area != size {
            self.back = Buffer::empty(size);
            self.render.invalidate();
        }

        let footer = self.controller.footer();
        let input = self.controller.input();
        let coordinator = &mut self.render;
        let back = &mut self.back;
        let bell = self.shared.with(|state| {
            coordinator.draw(back, state, input, footer.as_deref());
            std::mem::take(&mut state.bell)
        });

        match self.controller.overlay_mut() {
            Some(Overlay::Notice(dialog)) => render::draw_dialog(&mut self.back, dialog),
            Some(Overlay::Confirm { chooser, .. }) => render::draw_chooser(&mut self.back, chooser),
            None => {}
        }
        let cursor = match self.controller.overlay() {
            None => self.render.input_cursor(),
            Some(_) => None,
        };

        let back = &self.back;
        terminal.draw(|frame| {
            frame.buffer_mut().merge(back);
            if let Some((x, y)) = cursor {
                frame.set_cursor(x, y);
            }
        })?;

        if bell {
            let out = terminal.backend_mut();
            out.write_all(b"\x07")?;
            out.flush()?;
        }
        Ok(())
    }

    fn open_settings(&mut self, terminal: &mut Term) -> Result<()> {
        if let Err(err) = self.settings.run(terminal) {
            warn!(error = %err, "settings menu failed");
        }
        let cfg = self.settings.config();
        self.render = RenderCoordinator::new(cfg.ui.clone(), cfg.messages.clone());
        self.controller.reconfigure(cfg);
        let single_pane = cfg.ui.single_pane_mode;
        self.shared.with(|state| {
            state.single_pane_mode = single_pane;
            state.dirty = Dirty::all();
        });
        terminal.clear()?;
        Ok(())
    }
}

/// What the settings loop does after a step has been executed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum After {
    Stay,
    Close,
    OpenApp,
}

/// Carries out the effects a settings session asks for against the device
/// and the client config file.
pub struct SettingsRunner {
    device: Arc<dyn DeviceControl>,
    config: Config,
    config_path: Option<PathBuf>,
}

impl SettingsRunner {
    pub fn new(device: Arc<dyn DeviceControl>, config: Config, config_path: Option<PathBuf>) -> Self {
        Self {
            device,
            config,
            config_path,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn open_device_session(&self) -> Result<MenuSession> {
        let snapshot = self
            .device
            .device_settings()
            .context("read device settings")?;
        let url = self.device.config_url().unwrap_or_else(|err| {
            warn!(error = %err, "could not read config url");
            String::new()
        });
        Ok(MenuSession::device(
            &snapshot,
            self.config.storage.node_configs_dir(),
            url,
        ))
    }

    pub fn run(&mut self, terminal: &mut Term) -> Result<()> {
        let mut session = self.open_device_session()?;
        self.drive(terminal, &mut session)
    }

    fn drive(&mut self, terminal: &mut Term, session: &mut MenuSession) -> Result<()> {
        loop {
            terminal.draw(|frame| render::draw_menu(frame.buffer_mut(), session))?;
            if !event::poll(MODAL_POLL)? {
                continue;
            }
            let Event::Key(key) = event::read()? else {
                continue;
            };
            if key.kind != KeyEventKind::Press {
                continue;
            }
            let step = session.handle_key(key.code);
            match self.execute(session, step) {
                After::Stay => {}
                After::Close => return Ok(()),
                After::OpenApp => {
                    let mut app = MenuSession::app(&self.config);
                    self.drive(terminal, &mut app)?;
                }
            }
        }
    }

    /// Failures are shown in the session as a notice and logged; they
    /// never close the menu.
    pub fn execute(&mut self, session: &mut MenuSession, step: SessionStep) -> After {
        match step {
            SessionStep::Continue => return After::Stay,
            SessionStep::Exit => return After::Close,
            SessionStep::OpenAppSettings => return After::OpenApp,
            SessionStep::Save(changes) => match session.kind() {
                MenuKind::Device => self.save_device(session, &changes),
                MenuKind::App => self.save_app(session, &changes),
            },
            SessionStep::Admin(action) => self.admin(session, action),
            SessionStep::Export(path) => match self.export(&path) {
                Ok(()) => session.notify(
                    "Config Export",
                    format!("Config File Saved: {}", path.display()),
                ),
                Err(err) => self.fail(session, "export config", &err),
            },
            SessionStep::Import(path) => match self.import(session, &path) {
                Ok(()) => {
                    self.reload(session);
                    session.notify(
                        "Config Import",
                        format!("Loaded {}", path.display()),
                    );
                }
                Err(err) => self.fail(session, "import config", &err),
            },
            SessionStep::SetConfigUrl(url) => match self.device.set_config_url(&url) {
                Ok(()) => {
                    info!("config url applied");
                    session.set_config_url(url);
                    self.reload(session);
                }
                Err(err) => self.fail(session, "set config url", &anyhow::Error::new(err)),
            },
        }
        After::Stay
    }

    fn fail(&self, session: &mut MenuSession, what: &str, err: &anyhow::Error) {
        warn!(error = %err, "{what} failed");
        session.notify("Error", format!("{err:#}"));
    }

    fn save_device(&self, session: &mut MenuSession, changes: &Changes) {
        match self.device.apply_settings(changes) {
            Ok(()) => {
                info!(count = changes.len(), "device settings saved");
                self.reload(session);
            }
            Err(err) => self.fail(session, "save settings", &anyhow::Error::new(err)),
        }
    }

    fn save_app(&mut self, session: &mut MenuSession, changes: &Changes) {
        let rejected = settings::apply_app_changes(&mut self.config, changes);
        match config::save(self.config_path.clone(), &self.config) {
            Ok(path) => info!(path = %path.display(), "app settings saved"),
            Err(err) => self.fail(session, "save app settings", &err),
        }
        session.reload(settings::build_app_menu(&self.config));
        if !rejected.is_empty() {
            session.notify(
                "Invalid Value",
                format!("Not applied: {}", rejected.join(", ")),
            );
        }
    }

    fn admin(&self, session: &mut MenuSession, action: AdminAction) {
        match self.device.admin(action) {
            Ok(()) => {
                info!(action = action.method(), "admin command sent");
                if matches!(action, AdminAction::FactoryReset | AdminAction::ResetNodeDb) {
                    self.reload(session);
                }
            }
            Err(err) => self.fail(session, "admin command", &anyhow::Error::new(err)),
        }
    }

    fn reload(&self, session: &mut MenuSession) {
        match self.device.device_settings() {
            Ok(snapshot) => session.reload(settings::build_device_menu(&snapshot)),
            Err(err) => warn!(error = %err, "could not refresh device settings"),
        }
    }

    fn export(&self, path: &Path) -> Result<()> {
        let snapshot = self.device.device_settings()?;
        let url = self.device.config_url().ok();
        let yaml = settings::export_yaml(&snapshot, url.as_deref())?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("create {}", parent.display()))?;
        }
        fs::write(path, yaml).with_context(|| format!("write {}", path.display()))?;
        info!(path = %path.display(), "config exported");
        Ok(())
    }

    fn import(&self, session: &mut MenuSession, path: &Path) -> Result<()> {
        let text =
            fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
        let import = settings::import_yaml(&text)?;
        self.device.apply_settings(&import.changes)?;
        if let Some(url) = import.config_url {
            self.device.set_config_url(&url)?;
            session.set_config_url(url);
        }
        info!(path = %path.display(), count = import.changes.len(), "config imported");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::menu::Modal;
    use crate::settings::FieldValue;
    use crate::transport::{SimOptions, SimulatedTransport};
    use serde_json::json;

    fn runner(dir: &Path) -> (Arc<SimulatedTransport>, SettingsRunner) {
        let sim = Arc::new(SimulatedTransport::new(SimOptions {
            chatter: false,
            ..SimOptions::default()
        }));
        let mut cfg = Config::default();
        cfg.storage.node_configs_dir = Some(dir.join("node-configs"));
        let runner = SettingsRunner::new(sim.clone(), cfg, Some(dir.join("config.yaml")));
        (sim, runner)
    }

    fn notice_text(session: &MenuSession) -> Option<String> {
        match session.modal() {
            Some(Modal::Notice(dialog)) => Some(dialog.message.clone()),
            _ => None,
        }
    }

    #[test]
    fn device_save_reaches_the_radio() {
        let dir = tempfile::tempdir().unwrap();
        let (sim, mut runner) = runner(dir.path());
        let mut session = runner.open_device_session().unwrap();
        let mut changes = Changes::new();
        changes.insert("config.lora.hop_limit".into(), FieldValue::UInt(5));
        assert_eq!(runner.execute(&mut session, SessionStep::Save(changes)), After::Stay);
        assert_eq!(
            sim.device_settings().unwrap().get("config.lora.hop_limit"),
            Some(&json!(5))
        );
    }

    #[test]
    fn export_then_import_round_trips_through_the_device() {
        let dir = tempfile::tempdir().unwrap();
        let (sim, mut runner) = runner(dir.path());
        let mut session = runner.open_device_session().unwrap();
        let path = dir.path().join("node-configs").join("backup.yaml");

        runner.execute(&mut session, SessionStep::Export(path.clone()));
        assert!(path.exists());
        assert!(notice_text(&session).unwrap().starts_with("Config File Saved:"));

        let mut changes = Changes::new();
        changes.insert("config.lora.hop_limit".into(), FieldValue::UInt(6));
        sim.apply_settings(&changes).unwrap();

        runner.execute(&mut session, SessionStep::Import(path));
        let restored = sim.device_settings().unwrap();
        assert_ne!(restored.get("config.lora.hop_limit"), Some(&json!(6)));
    }

    #[test]
    fn import_failure_is_reported_in_place() {
        let dir = tempfile::tempdir().unwrap();
        let (_, mut runner) = runner(dir.path());
        let mut session = runner.open_device_session().unwrap();
        let step = SessionStep::Import(dir.path().join("missing.yaml"));
        assert_eq!(runner.execute(&mut session, step), After::Stay);
        assert!(notice_text(&session).unwrap().contains("missing.yaml"));
    }

    #[test]
    fn app_settings_are_written_to_the_config_file() {
        let dir = tempfile::tempdir().unwrap();
        let (_, mut runner) = runner(dir.path());
        let mut session = MenuSession::app(runner.config());
        let mut changes = Changes::new();
        changes.insert("ui.node_sort".into(), FieldValue::Enum("hops".into()));
        runner.execute(&mut session, SessionStep::Save(changes));

        assert_eq!(runner.config().ui.node_sort, config::NodeSort::Hops);
        let written = fs::read_to_string(dir.path().join("config.yaml")).unwrap();
        assert!(written.contains("hops"));
    }

    #[test]
    fn reset_node_db_and_url_steps() {
        let dir = tempfile::tempdir().unwrap();
        let (sim, mut runner) = runner(dir.path());
        let mut session = runner.open_device_session().unwrap();
        runner.execute(&mut session, SessionStep::Admin(AdminAction::ResetNodeDb));
        assert_eq!(sim.nodes().len(), 1);

        runner.execute(
            &mut session,
            SessionStep::SetConfigUrl("https://example.org/e/#abc".into()),
        );
        assert_eq!(sim.config_url().unwrap(), "https://example.org/e/#abc");
        assert_eq!(runner.execute(&mut session, SessionStep::Exit), After::Close);
        assert_eq!(
            runner.execute(&mut session, SessionStep::OpenAppSettings),
            After::OpenApp
        );
    }
}
