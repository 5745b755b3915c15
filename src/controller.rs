use std::sync::Arc;

use crossterm::event::{KeyCode, KeyEvent, KeyModifiers};
use tracing::{info, warn};

use crate::config::Config;
use crate::input::{Dialog, ListChooser, Outcome};
use crate::mesh::NodeNum;
use crate::nav::NavCommand;
use crate::outbound::{Outbound, SendError};
use crate::reducer::Reducer;
use crate::state::{ChannelId, ChatState, Dirty, Pane, Shared};
use crate::transport::DeviceControl;

/// What the event loop should do after a key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Quit,
    OpenSettings,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeAction {
    Archive(NodeNum),
    Remove(NodeNum),
    Favorite(NodeNum, bool),
    Ignore(NodeNum, bool),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Overlay {
    Notice(Dialog),
    Confirm {
        chooser: ListChooser,
        action: NodeAction,
    },
}

/// Key handling for the chat screen. Each mutation takes the shared lock
/// only for as long as it runs.
pub struct ChatController {
    shared: Shared,
    device: Arc<dyn DeviceControl>,
    reducer: Arc<Reducer>,
    outbound: Outbound,
    input: String,
    overlay: Option<Overlay>,
    search: Option<String>,
}

impl ChatController {
    pub fn new(
        shared: Shared,
        device: Arc<dyn DeviceControl>,
        reducer: Arc<Reducer>,
        outbound: Outbound,
    ) -> Self {
        Self {
            shared,
            device,
            reducer,
            outbound,
            input: String::new(),
            overlay: None,
            search: None,
        }
    }

    pub fn input(&self) -> &str {
        &self.input
    }

    pub fn overlay(&self) -> Option<&Overlay> {
        self.overlay.as_ref()
    }

    pub fn overlay_mut(&mut self) -> Option<&mut Overlay> {
        self.overlay.as_mut()
    }

    /// Applies saved App Settings to sending and to inbound handling, then
    /// re-sorts the roster.
    pub fn reconfigure(&mut self, cfg: &Config) {
        self.outbound.reconfigure(cfg);
        self.reducer.reconfigure(cfg);
        let reducer = &self.reducer;
        self.shared.with(|s| {
            reducer.refresh_roster(s);
        });
    }

    /// Function-bar override while a search is active.
    pub fn footer(&self) -> Option<String> {
        self.search.as_ref().map(|query| format!("Search: {query}"))
    }

    pub fn handle_key(&mut self, key: KeyEvent) -> Flow {
        if let Some(overlay) = self.overlay.take() {
            self.handle_overlay(overlay, key.code);
            return Flow::Continue;
        }
        if self.search.is_some() {
            self.handle_search(key.code);
            return Flow::Continue;
        }

        let ctrl = key.modifiers.contains(KeyModifiers::CONTROL);
        match key.code {
            KeyCode::Esc => return Flow::Quit,
            KeyCode::Char(ch) if ctrl => self.handle_command(ch),
            KeyCode::Char('`') => return Flow::OpenSettings,
            KeyCode::Char(ch) => self.input.push(ch),
            KeyCode::Backspace => {
                self.input.pop();
            }
            KeyCode::Enter => self.enter(),
            KeyCode::Up => self.navigate(NavCommand::LineUp),
            KeyCode::Down => self.navigate(NavCommand::LineDown),
            KeyCode::PageUp => self.navigate(NavCommand::PageUp),
            KeyCode::PageDown => self.navigate(NavCommand::PageDown),
            KeyCode::Home => self.navigate(NavCommand::Home),
            KeyCode::End => self.navigate(NavCommand::End),
            KeyCode::Left | KeyCode::BackTab => {
                self.shared.with(|s| s.set_focus(s.focus.previous()));
            }
            KeyCode::Right | KeyCode::Tab => {
                self.shared.with(|s| s.set_focus(s.focus.next()));
            }
            _ => {}
        }
        Flow::Continue
    }

    fn navigate(&self, command: NavCommand) {
        self.shared.with(|s| s.navigate(command));
    }

    fn handle_command(&mut self, ch: char) {
        match ch.to_ascii_lowercase() {
            'd' => self.ask_archive_or_remove(),
            'f' => self.ask_toggle(true),
            'g' => self.ask_toggle(false),
            't' => self.traceroute(),
            'p' => self.shared.with(|s| {
                s.display_log = !s.display_log;
                s.dirty = Dirty::all();
            }),
            // Ctrl+/ arrives as one of these depending on the terminal.
            '/' | '7' | '_' => {
                self.search = Some(String::new());
            }
            _ => {}
        }
    }

    fn enter(&mut self) {
        let focus = self.shared.with(|s| s.focus);
        if focus == Pane::Nodes {
            self.open_direct_message();
            return;
        }
        if self.input.trim().is_empty() {
            if focus == Pane::Channels {
                self.shared.with(|s| s.set_focus(Pane::Messages));
            }
            return;
        }

        let body = self.input.clone();
        let outbound = &self.outbound;
        let result = self.shared.with(|s| {
            let channel = s.selected_channel_id().cloned()?;
            Some(outbound.send_text(s, &channel, &body))
        });
        match result {
            Some(Ok(_)) => self.input.clear(),
            Some(Err(SendError::Empty)) | None => {}
            Some(Err(err @ SendError::Cooldown { .. })) => {
                self.notice("Message Not Sent", err.to_string());
            }
            Some(Err(err)) => {
                warn!(error = %err, "send failed");
                self.notice("Send Failed", err.to_string());
            }
        }
    }

    fn open_direct_message(&self) {
        let store = self.reducer.store();
        self.shared.with(|s| {
            let Some(node) = s.selected_node() else {
                return;
            };
            if node == s.my_node_num {
                return;
            }
            let (index, added) = s.ensure_channel(&ChannelId::Direct(node));
            if added {
                if let Err(err) = store.set_archived(node, false) {
                    warn!(node, error = %err, "failed to unarchive chat");
                }
            }
            s.select_channel(index);
            s.set_focus(Pane::Messages);
        });
    }

    fn traceroute(&mut self) {
        let outbound = &self.outbound;
        let result = self.shared.with(|s| {
            let target = match s.focus {
                Pane::Nodes => s.selected_node(),
                _ => s.selected_channel_id().and_then(ChannelId::direct_peer),
            }?;
            Some(outbound.send_traceroute(s, target))
        });
        if let Some(Err(err)) = result {
            self.notice("Traceroute Not Sent", err.to_string());
        }
    }

    /// Removing a node asks first. Archiving a chat does not, since the
    /// next message from the peer brings it back.
    fn ask_archive_or_remove(&mut self) {
        let request = self.shared.with(|s| match s.focus {
            Pane::Nodes => {
                let node = s.selected_node().filter(|n| *n != s.my_node_num)?;
                Some((
                    Some(format!("Remove {} from NodeDB?", s.long_name(node))),
                    NodeAction::Remove(node),
                ))
            }
            _ => {
                let peer = s.selected_channel_id()?.direct_peer()?;
                Some((None, NodeAction::Archive(peer)))
            }
        });
        match request {
            Some((Some(prompt), action)) => self.confirm(prompt, action),
            Some((None, action)) => self.perform(action),
            None => {}
        }
    }

    fn ask_toggle(&mut self, favorite: bool) {
        let request = self.shared.with(|s| {
            if s.focus != Pane::Nodes {
                return None;
            }
            let node = s.selected_node().filter(|n| *n != s.my_node_num)?;
            let info = s.node_db.get(&node);
            let name = s.long_name(node);
            Some(if favorite {
                let on = !info.is_some_and(|i| i.is_favorite);
                let prompt = if on {
                    format!("Set {name} as Favorite?")
                } else {
                    format!("Remove {name} from Favorites?")
                };
                (prompt, NodeAction::Favorite(node, on))
            } else {
                let on = !info.is_some_and(|i| i.is_ignored);
                let prompt = if on {
                    format!("Set {name} as Ignored?")
                } else {
                    format!("Remove {name} from Ignored?")
                };
                (prompt, NodeAction::Ignore(node, on))
            })
        });
        if let Some((prompt, action)) = request {
            self.confirm(prompt, action);
        }
    }

    fn confirm(&mut self, prompt: String, action: NodeAction) {
        self.overlay = Some(Overlay::Confirm {
            chooser: ListChooser::confirm(prompt),
            action,
        });
    }

    fn notice(&mut self, title: &str, message: String) {
        self.overlay = Some(Overlay::Notice(Dialog::new(title, message)));
    }

    fn handle_overlay(&mut self, overlay: Overlay, key: KeyCode) {
        let closed = match overlay {
            Overlay::Notice(mut dialog) => match dialog.handle_key(key) {
                Outcome::Pending => {
                    self.overlay = Some(Overlay::Notice(dialog));
                    false
                }
                _ => true,
            },
            Overlay::Confirm {
                mut chooser,
                action,
            } => match chooser.handle_key(key) {
                Outcome::Pending => {
                    self.overlay = Some(Overlay::Confirm { chooser, action });
                    false
                }
                Outcome::Submitted(0) => {
                    self.perform(action);
                    true
                }
                _ => true,
            },
        };
        if closed && self.overlay.is_none() {
            self.shared.with(|s| s.dirty = Dirty::all());
        }
    }

    fn perform(&mut self, action: NodeAction) {
        let result = match action {
            NodeAction::Archive(peer) => {
                self.shared.with(|s| {
                    if let Some(index) = s.channel_index(&ChannelId::Direct(peer)) {
                        s.archive_channel(index);
                    }
                });
                if let Err(err) = self.reducer.store().set_archived(peer, true) {
                    warn!(node = peer, error = %err, "failed to persist archive flag");
                }
                Ok(())
            }
            NodeAction::Remove(node) => self.device.remove_node(node).map(|_| {
                if let Err(err) = self.reducer.store().delete_node(node) {
                    warn!(node, error = %err, "failed to delete stored node");
                }
            }),
            NodeAction::Favorite(node, on) => self.device.set_favorite(node, on),
            NodeAction::Ignore(node, on) => self.device.set_ignored(node, on),
        };
        match result {
            Ok(()) => {
                info!(?action, "node action applied");
                let reducer = &self.reducer;
                self.shared.with(|s| {
                    reducer.refresh_roster(s);
                });
            }
            Err(err) => {
                warn!(?action, error = %err, "node action failed");
                self.notice("Command Failed", err.to_string());
            }
        }
    }

    fn handle_search(&mut self, key: KeyCode) {
        let Some(query) = self.search.as_mut() else {
            return;
        };
        match key {
            KeyCode::Esc | KeyCode::Enter => {
                self.search = None;
                return;
            }
            KeyCode::Backspace => {
                query.pop();
                return;
            }
            KeyCode::Char(ch) => query.push(ch),
            KeyCode::Tab => {
                let query = query.clone();
                self.shared.with(|s| search_select(s, &query, true));
                return;
            }
            _ => return,
        }
        let query = query.clone();
        self.shared.with(|s| search_select(s, &query, false));
    }
}

/// Moves the focused list's selection to the next label containing `query`,
/// case-insensitively. `skip_current` starts from the row after the cursor.
fn search_select(state: &mut ChatState, query: &str, skip_current: bool) {
    if query.is_empty() {
        return;
    }
    let needle = query.to_lowercase();
    let (labels, selected): (Vec<String>, usize) = match state.focus {
        Pane::Nodes => (
            state.node_list.iter().map(|n| state.long_name(*n)).collect(),
            state.node_cursor.selected,
        ),
        _ => (
            state
                .channel_list
                .iter()
                .map(|c| state.channel_label(c))
                .collect(),
            state.channel_cursor.selected,
        ),
    };
    let count = labels.len();
    let offset = usize::from(skip_current);
    let found = (0..count)
        .map(|step| (selected + offset + step) % count)
        .find(|&idx| labels[idx].to_lowercase().contains(&needle));
    if let Some(index) = found {
        match state.focus {
            Pane::Nodes => state.select_node(index),
            _ => state.select_channel(index),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{LimitsConfig, MessagesConfig, NodeSort};
    use crate::storage::Store;
    use crate::transport::{SimOptions, SimulatedTransport, Transport};
    use std::time::Duration;

    const ME: NodeNum = 0x10;

    fn key(code: KeyCode) -> KeyEvent {
        KeyEvent::new(code, KeyModifiers::NONE)
    }

    fn ctrl(ch: char) -> KeyEvent {
        KeyEvent::new(KeyCode::Char(ch), KeyModifiers::CONTROL)
    }

    fn fixture() -> (Arc<SimulatedTransport>, ChatController) {
        let sim = Arc::new(SimulatedTransport::new(SimOptions {
            my_node_num: ME,
            channels: vec!["general".into()],
            chatter: false,
            ack_delay: Duration::from_secs(3600),
            ..SimOptions::default()
        }));
        let store = Store::open_in_memory().unwrap();
        let reducer = Arc::new(Reducer::new(
            store.clone(),
            sim.clone(),
            MessagesConfig::default(),
            NodeSort::Name,
            false,
        ));
        let outbound = Outbound::new(
            sim.clone(),
            store,
            MessagesConfig::default(),
            LimitsConfig::default(),
        );
        let mut state = ChatState::new(ME, &sim.channels());
        reducer.refresh_roster(&mut state);
        let shared = Shared::new(state);
        let controller = ChatController::new(shared, sim.clone(), reducer, outbound);
        (sim, controller)
    }

    fn type_str(controller: &mut ChatController, text: &str) {
        for ch in text.chars() {
            controller.handle_key(key(KeyCode::Char(ch)));
        }
    }

    fn node_named(controller: &ChatController, name: &str) -> NodeNum {
        let s = controller.shared.lock();
        s.node_list
            .iter()
            .copied()
            .find(|n| s.long_name(*n) == name)
            .unwrap()
    }

    #[test]
    fn enter_sends_and_clears_input() {
        let (sim, mut controller) = fixture();
        type_str(&mut controller, "hello mesh");
        assert_eq!(controller.input(), "hello mesh");
        controller.handle_key(key(KeyCode::Enter));
        assert_eq!(controller.input(), "");
        assert_eq!(sim.sent()[0].text, "hello mesh");
        let s = controller.shared.lock();
        let log = s.log(&ChannelId::Named("general".into()));
        assert_eq!(log.last().unwrap().body, "hello mesh");
    }

    #[test]
    fn cooldown_shows_warning_and_keeps_text() {
        let (sim, mut controller) = fixture();
        type_str(&mut controller, "one");
        controller.handle_key(key(KeyCode::Enter));
        type_str(&mut controller, "two");
        controller.handle_key(key(KeyCode::Enter));
        assert_eq!(sim.sent().len(), 1);
        assert_eq!(controller.input(), "two");
        assert!(matches!(controller.overlay(), Some(Overlay::Notice(_))));

        controller.handle_key(key(KeyCode::Enter));
        assert!(controller.overlay().is_none());
        assert!(controller.shared.lock().dirty.full);
    }

    #[test]
    fn escape_quits_and_backtick_opens_settings() {
        let (_, mut controller) = fixture();
        assert_eq!(controller.handle_key(key(KeyCode::Char('`'))), Flow::OpenSettings);
        assert_eq!(controller.handle_key(key(KeyCode::Esc)), Flow::Quit);
    }

    #[test]
    fn reconfigure_resorts_roster_and_changes_sent_prefix() {
        let (sim, mut controller) = fixture();
        let by_name = controller.shared.lock().node_list.clone();
        assert_eq!(by_name, crate::state::sort_roster(&sim.nodes(), ME, NodeSort::Name));

        let mut cfg = Config::default();
        cfg.ui.node_sort = NodeSort::Hops;
        cfg.messages.sent_message_prefix = ">>".into();
        cfg.limits.send_cooldown = Duration::ZERO;
        controller.reconfigure(&cfg);
        assert_eq!(
            controller.shared.lock().node_list,
            crate::state::sort_roster(&sim.nodes(), ME, NodeSort::Hops)
        );

        type_str(&mut controller, "one");
        controller.handle_key(key(KeyCode::Enter));
        type_str(&mut controller, "two");
        controller.handle_key(key(KeyCode::Enter));
        assert_eq!(sim.sent().len(), 2);
        let s = controller.shared.lock();
        let last = s.log(&ChannelId::Named("general".into())).last().unwrap().clone();
        assert!(last.prefix.starts_with(">> "));
        assert_eq!(last.body, "two");
    }

    #[test]
    fn packet_log_toggle() {
        let (_, mut controller) = fixture();
        controller.handle_key(ctrl('p'));
        assert!(controller.shared.lock().display_log);
        controller.handle_key(ctrl('p'));
        assert!(!controller.shared.lock().display_log);
    }

    #[test]
    fn search_selects_matching_node_and_tab_finds_next() {
        let (_, mut controller) = fixture();
        controller.handle_key(key(KeyCode::Right));
        controller.handle_key(key(KeyCode::Right));
        assert_eq!(controller.shared.lock().focus, Pane::Nodes);

        controller.handle_key(ctrl('/'));
        type_str(&mut controller, "re");
        assert_eq!(controller.footer().as_deref(), Some("Search: re"));
        let first = controller.shared.lock().selected_node().unwrap();
        assert_eq!(first, node_named(&controller, "Creek Camp"));

        controller.handle_key(key(KeyCode::Tab));
        let next = controller.shared.lock().selected_node().unwrap();
        assert_eq!(next, node_named(&controller, "Forest Post"));

        controller.handle_key(key(KeyCode::Esc));
        assert!(controller.footer().is_none());
    }

    #[test]
    fn enter_on_node_opens_direct_chat() {
        let (_, mut controller) = fixture();
        controller.handle_key(key(KeyCode::Left));
        controller.handle_key(key(KeyCode::Down));
        let peer = controller.shared.lock().selected_node().unwrap();
        controller.handle_key(key(KeyCode::Enter));

        let s = controller.shared.lock();
        assert_eq!(s.focus, Pane::Messages);
        assert_eq!(s.selected_channel_id(), Some(&ChannelId::Direct(peer)));
    }

    #[test]
    fn ctrl_d_archives_direct_chat_at_once() {
        let (_, mut controller) = fixture();
        controller.handle_key(key(KeyCode::Left));
        controller.handle_key(key(KeyCode::Down));
        let peer = controller.shared.lock().selected_node().unwrap();
        controller.handle_key(key(KeyCode::Enter));
        controller.handle_key(key(KeyCode::Left));
        assert_eq!(controller.shared.lock().channel_list.len(), 2);

        controller.handle_key(ctrl('d'));
        assert!(controller.overlay().is_none());
        assert_eq!(controller.shared.lock().channel_list.len(), 1);
        assert!(controller.reducer.store().is_archived(peer).unwrap());

        // Named channels stay put.
        controller.handle_key(ctrl('d'));
        assert_eq!(controller.shared.lock().channel_list.len(), 1);
    }

    #[test]
    fn node_removal_requires_confirmation() {
        let (sim, mut controller) = fixture();
        controller.handle_key(key(KeyCode::Left));
        controller.handle_key(key(KeyCode::Down));
        let node = controller.shared.lock().selected_node().unwrap();
        let before = sim.nodes().len();

        controller.handle_key(ctrl('d'));
        assert!(matches!(controller.overlay(), Some(Overlay::Confirm { .. })));
        controller.handle_key(key(KeyCode::Down));
        controller.handle_key(key(KeyCode::Enter));
        assert_eq!(sim.nodes().len(), before);

        controller.handle_key(ctrl('d'));
        controller.handle_key(key(KeyCode::Enter));
        assert!(sim.nodes().iter().all(|n| n.num != node));
    }

    #[test]
    fn favorite_toggle_updates_roster() {
        let (sim, mut controller) = fixture();
        controller.handle_key(key(KeyCode::Left));
        controller.handle_key(key(KeyCode::End));
        let node = controller.shared.lock().selected_node().unwrap();
        controller.handle_key(ctrl('f'));
        match controller.overlay() {
            Some(Overlay::Confirm { action, .. }) => {
                assert_eq!(*action, NodeAction::Favorite(node, true))
            }
            other => panic!("unexpected overlay {other:?}"),
        }
        controller.handle_key(key(KeyCode::Enter));
        assert!(sim.nodes().iter().any(|n| n.num == node && n.is_favorite));
        let s = controller.shared.lock();
        assert_eq!(s.node_list[1], node);
    }

    #[test]
    fn traceroute_from_nodes_pane() {
        let (_, mut controller) = fixture();
        controller.handle_key(key(KeyCode::Left));
        controller.handle_key(key(KeyCode::Down));
        let target = controller.shared.lock().selected_node().unwrap();
        controller.handle_key(ctrl('t'));
        let s = controller.shared.lock();
        assert_eq!(s.pending_traceroutes.len(), 1);
        assert!(s
            .log(&ChannelId::Direct(target))
            .iter()
            .any(|e| e.prefix.ends_with("Sent Traceroute")));
    }
}
