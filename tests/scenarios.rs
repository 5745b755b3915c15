use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crossterm::event::{KeyCode, KeyEvent, KeyModifiers};
use mesh_tui::config::{Config, LimitsConfig, MessagesConfig, NodeSort};
use mesh_tui::controller::{ChatController, Flow, Overlay};
use mesh_tui::mesh::{NodeNum, Packet};
use mesh_tui::menu::{MenuSession, SessionStep};
use mesh_tui::outbound::Outbound;
use mesh_tui::reducer::Reducer;
use mesh_tui::settings::ROOT_LABEL;
use mesh_tui::state::{ChannelId, ChatState, Shared};
use mesh_tui::storage::Store;
use mesh_tui::transport::{SimOptions, SimulatedTransport, Transport};
use mesh_tui::ui::{spawn_event_pump, SettingsRunner};

const ME: NodeNum = 0x0000_0042;

struct Harness {
    sim: Arc<SimulatedTransport>,
    shared: Shared,
    reducer: Arc<Reducer>,
    controller: ChatController,
}

fn harness() -> Harness {
    let sim = Arc::new(SimulatedTransport::new(SimOptions {
        my_node_num: ME,
        channels: vec!["general".into()],
        chatter: false,
        ack_delay: Duration::from_secs(3600),
        seed: Some(7),
        ..SimOptions::default()
    }));
    let store = Store::open_in_memory().unwrap();
    let reducer = Arc::new(Reducer::new(
        store.clone(),
        sim.clone(),
        MessagesConfig::default(),
        NodeSort::LastHeard,
        false,
    ));
    let mut state = ChatState::new(ME, &sim.channels());
    reducer.refresh_roster(&mut state);
    let shared = Shared::new(state);
    let outbound = Outbound::new(
        sim.clone(),
        store,
        MessagesConfig::default(),
        LimitsConfig::default(),
    );
    let controller = ChatController::new(shared.clone(), sim.clone(), reducer.clone(), outbound);
    Harness {
        sim,
        shared,
        reducer,
        controller,
    }
}

fn press(controller: &mut ChatController, code: KeyCode) -> Flow {
    controller.handle_key(KeyEvent::new(code, KeyModifiers::NONE))
}

fn type_str(controller: &mut ChatController, text: &str) {
    for ch in text.chars() {
        press(controller, KeyCode::Char(ch));
    }
}

fn wait_for(shared: &Shared, done: impl Fn(&ChatState) -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        if shared.with(|s| done(s)) {
            return true;
        }
        thread::sleep(Duration::from_millis(10));
    }
    false
}

#[test]
fn direct_message_from_unknown_node_opens_a_notified_channel() {
    let h = harness();
    spawn_event_pump(h.sim.as_ref(), h.shared.clone(), h.reducer.clone())
        .unwrap()
        .expect("event stream available");

    let peer = ChannelId::Direct(0xAABB_CCDD);
    h.sim.deliver(Packet::text(501, 0xAABB_CCDD, ME, 0, "anyone there?"));
    assert!(wait_for(&h.shared, |s| !s.log(&peer).is_empty()));

    h.shared.with(|s| {
        assert_eq!(
            s.channel_list,
            vec![ChannelId::Named("general".into()), peer.clone()]
        );
        assert_eq!(s.notifications.iter().copied().collect::<Vec<_>>(), vec![1]);
        let log = s.log(&peer);
        let texts: Vec<_> = log.iter().filter(|e| !e.is_divider()).collect();
        assert_eq!(texts.len(), 1);
        assert_eq!(texts[0].body, "anyone there?");
        assert!(log.len() <= 2);
        assert_eq!(s.packet_buffer.len(), 1);
    });
}

#[test]
fn quick_second_send_is_refused_with_a_notice() {
    let mut h = harness();
    type_str(&mut h.controller, "first");
    press(&mut h.controller, KeyCode::Enter);
    assert_eq!(h.controller.input(), "");

    type_str(&mut h.controller, "second");
    press(&mut h.controller, KeyCode::Enter);
    match h.controller.overlay() {
        Some(Overlay::Notice(dialog)) => assert_eq!(dialog.title, "Message Not Sent"),
        other => panic!("expected a notice, got {other:?}"),
    }
    assert_eq!(h.controller.input(), "second");
    assert_eq!(h.sim.sent().len(), 1);
    let general = ChannelId::Named("general".into());
    let bodies: Vec<String> = h.shared.with(|s| {
        s.log(&general)
            .iter()
            .filter(|e| !e.is_divider())
            .map(|e| e.body.clone())
            .collect()
    });
    assert_eq!(bodies, vec!["first".to_string()]);

    // Esc closes the notice instead of quitting.
    assert_eq!(press(&mut h.controller, KeyCode::Esc), Flow::Continue);
    assert!(h.controller.overlay().is_none());
}

#[test]
fn escape_quits_and_backtick_opens_settings() {
    let mut h = harness();
    assert_eq!(press(&mut h.controller, KeyCode::Char('`')), Flow::OpenSettings);
    assert_eq!(press(&mut h.controller, KeyCode::Esc), Flow::Quit);
}

fn enter_menu(session: &mut MenuSession, label: &str) {
    let options = session.options();
    let target = options
        .iter()
        .position(|o| o == label)
        .unwrap_or_else(|| panic!("{label} not in {options:?}"));
    let start = session.cursor().selected;
    let steps = (target + options.len() - start) % options.len();
    for _ in 0..steps {
        session.handle_key(KeyCode::Down);
    }
    assert_eq!(session.selected_label().as_deref(), Some(label));
    session.handle_key(KeyCode::Enter);
}

#[test]
fn escaping_a_field_editor_leaves_the_menu_untouched() {
    let h = harness();
    let dir = tempfile::tempdir().unwrap();
    let mut cfg = Config::default();
    cfg.storage.node_configs_dir = Some(dir.path().join("node-configs"));
    let runner = SettingsRunner::new(h.sim.clone(), cfg, Some(dir.path().join("config.yaml")));
    let mut menu = runner.open_device_session().unwrap();
    assert_eq!(menu.path(), vec![ROOT_LABEL.to_string()]);

    enter_menu(&mut menu, "Radio Settings");
    enter_menu(&mut menu, "lora");
    let before = (menu.path(), menu.selected_stack(), menu.scroll_stack());

    let options = menu.options();
    let field = options.iter().position(|o| o == "tx_enabled").unwrap();
    let start = menu.cursor().selected;
    for _ in 0..(field + options.len() - start) % options.len() {
        menu.handle_key(KeyCode::Down);
    }
    menu.handle_key(KeyCode::Enter);
    assert!(menu.modal().is_some());
    assert_eq!(menu.handle_key(KeyCode::Esc), SessionStep::Continue);

    assert!(menu.modal().is_none());
    assert!(menu.modified().is_empty());
    assert_eq!(menu.path(), before.0);
    assert_eq!(menu.selected_stack().len(), before.1.len());
    assert_eq!(menu.scroll_stack(), before.2);
}
