use std::time::Duration;

use ratatui::layout::Rect;
use textwrap::{wrap, Options as WrapOptions};

use crate::config::{MessagesConfig, UIConfig};
use crate::help::{self, HelpStyle};
use crate::input::{Dialog, Fixed32Input, ListChooser, MultiInput, TextInput};
use crate::menu::{Editor, MenuSession, Modal};
use crate::mesh::{node_id, NodeInfo, BROADCAST_NUM};
use crate::nav::{arrows, scroll_window, ListCursor};
use crate::settings::SAVE_LABEL;
use crate::state::{AckState, ChatState, Dirty, Entry, EntryKind, Pane, PaneHeights};
use crate::surface::{text_width, Pad, Role, StyledLine, Surface};

const INPUT_HEIGHT: u16 = 3;
const FUNCTION_HEIGHT: u16 = 1;
const MIN_WIDTH: u16 = 20;
const MIN_HEIGHT: u16 = 8;
const HELP_HEIGHT: u16 = 8;
const MAX_CHOOSER_ROWS: usize = 10;

pub const KEY_HELP: &str = "↑→↓← = Select   Enter = Send   ` = Settings   ^P = Packet Log   \
^T = Traceroute   ^D = Archive/Remove   ^F = Favorite   ^G = Ignore   ^/ = Search   Esc = Quit";

/// Screen regions of the chat view. Panes hidden in single-pane mode have
/// zero width.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChatLayout {
    pub channels: Rect,
    pub messages: Rect,
    pub packet_log: Option<Rect>,
    pub nodes: Rect,
    pub input: Rect,
    pub function: Rect,
}

pub fn chat_layout(area: Rect, ui: &UIConfig, state: &ChatState) -> ChatLayout {
    let panes_height = area.height.saturating_sub(INPUT_HEIGHT + FUNCTION_HEIGHT);
    let total = area.width;

    let (channels_width, nodes_width) = if state.single_pane_mode {
        match state.focus {
            Pane::Channels => (total, 0),
            Pane::Nodes => (0, total),
            Pane::Messages => (0, 0),
        }
    } else {
        let share = |sixteenths: u16| (u32::from(total) * u32::from(sixteenths.min(16)) / 16) as u16;
        let channels = share(ui.channel_list_16ths);
        let nodes = share(ui.node_list_16ths).min(total - channels);
        (channels, nodes)
    };
    let messages_width = total - channels_width - nodes_width;

    let channels = Rect::new(area.x, area.y, channels_width, panes_height);
    let mut messages = Rect::new(area.x + channels_width, area.y, messages_width, panes_height);
    let nodes = Rect::new(
        area.x + channels_width + messages_width,
        area.y,
        nodes_width,
        panes_height,
    );

    let mut packet_log = None;
    if state.display_log && messages_width > 0 {
        let log_height = (panes_height / 3).max(6).min(panes_height.saturating_sub(3));
        if log_height >= 3 {
            messages.height = panes_height - log_height;
            packet_log = Some(Rect::new(
                messages.x,
                messages.y + messages.height,
                messages.width,
                log_height,
            ));
        }
    }

    ChatLayout {
        channels,
        messages,
        packet_log,
        nodes,
        input: Rect::new(area.x, area.y + panes_height, total, INPUT_HEIGHT),
        function: Rect::new(
            area.x,
            area.y + panes_height + INPUT_HEIGHT,
            total,
            FUNCTION_HEIGHT,
        ),
    }
}

fn inner(rect: Rect) -> Rect {
    if rect.width < 2 || rect.height < 2 {
        return Rect::new(rect.x, rect.y, 0, 0);
    }
    Rect::new(rect.x + 1, rect.y + 1, rect.width - 2, rect.height - 2)
}

/// Pads or cuts `text` to exactly `width` columns.
fn fit(text: &str, width: usize) -> String {
    let mut out = String::new();
    let mut used = 0;
    for ch in text.chars() {
        let w = unicode_width::UnicodeWidthChar::width(ch).unwrap_or(0);
        if used + w > width {
            break;
        }
        out.push(ch);
        used += w;
    }
    out.extend(std::iter::repeat(' ').take(width - used));
    out
}

fn entry_role(entry: &Entry) -> Role {
    match entry.kind {
        EntryKind::Divider { .. } => Role::Divider,
        EntryKind::Received => Role::Received,
        EntryKind::Sent(AckState::Nak) => Role::Warning,
        EntryKind::Sent(_) => Role::Sent,
        EntryKind::Notice => Role::Note,
    }
}

/// Wraps a channel log to `width` columns. Embedded newlines start new rows
/// and words longer than the width are split.
pub fn message_pad(entries: &[Entry], width: usize) -> Pad {
    let width = width.max(1);
    let mut pad = Pad::default();
    for entry in entries {
        let role = entry_role(entry);
        for line in entry.text().split('\n') {
            for row in wrap(line, WrapOptions::new(width).break_words(true)) {
                pad.push(vec![(row.into_owned(), role)]);
            }
        }
    }
    pad
}

/// One-line summary of a node for the function bar.
pub fn node_details(node: &NodeInfo, is_self: bool, now: i64) -> String {
    let mut parts = Vec::new();
    let name = node
        .long_name()
        .map(str::to_string)
        .unwrap_or_else(|| node_id(node.num));
    match node.short_name() {
        Some(short) => parts.push(format!("{name} ({short})")),
        None => parts.push(name),
    }
    parts.push(node_id(node.num));
    if let Some(user) = &node.user {
        if !user.hw_model.is_empty() {
            parts.push(user.hw_model.clone());
        }
        if !user.role.is_empty() {
            parts.push(user.role.clone());
        }
    }
    if let Some(heard) = node.last_heard {
        let minutes = (now - heard).max(0) / 60;
        parts.push(format!("Last heard {minutes} min ago"));
    }
    match node.hops_away {
        Some(0) => match node.snr {
            Some(snr) => parts.push(format!("Direct, SNR {snr:.1} dB")),
            None => parts.push("Direct".to_string()),
        },
        Some(hops) => parts.push(format!("Hops {hops}")),
        None => {}
    }
    if is_self {
        if let Some(metrics) = &node.device_metrics {
            if let Some(level) = metrics.battery_level {
                parts.push(format!("Battery {level}%"));
            }
            if let Some(volts) = metrics.voltage {
                parts.push(format!("{volts:.2}V"));
            }
            if let Some(uptime) = metrics.uptime_seconds {
                parts.push(format!(
                    "Up {}",
                    humantime::format_duration(Duration::from_secs(uptime))
                ));
            }
            if let Some(util) = metrics.channel_utilization {
                parts.push(format!("ChUtil {util:.1}%"));
            }
            if let Some(util) = metrics.air_util_tx {
                parts.push(format!("AirUtilTX {util:.1}%"));
            }
        }
    }
    parts.join(" | ")
}

fn draw_arrows<S: Surface + ?Sized>(surface: &mut S, rect: Rect, start: usize, height: usize, count: usize) {
    if rect.width < 4 || rect.height < 2 {
        return;
    }
    let marks = arrows(start, height, count);
    let x = rect.x + rect.width - 2;
    if marks.up {
        surface.write(x, rect.y, "▲", 1, Role::Arrow);
    }
    if marks.down {
        surface.write(x, rect.y + rect.height - 1, "▼", 1, Role::Arrow);
    }
}

/// Draws the visible window of a cursor-driven list inside `area`.
fn draw_rows<S: Surface + ?Sized>(
    surface: &mut S,
    area: Rect,
    rows: &[(String, Role)],
    cursor: ListCursor,
    focused: bool,
) {
    let width = area.width as usize;
    if width == 0 {
        return;
    }
    for (offset, (idx, (label, role))) in rows
        .iter()
        .enumerate()
        .skip(cursor.scroll_start)
        .take(area.height as usize)
        .enumerate()
    {
        let y = area.y + offset as u16;
        let role = match (idx == cursor.selected, focused) {
            (true, true) => Role::Selected,
            (true, false) => Role::SelectedInactive,
            _ => *role,
        };
        surface.write(area.x, y, &fit(label, width), area.width, role);
    }
}

/// Redraws the chat panes that changed since the last call. The
/// coordinator keeps no chat data of its own; it remembers only the last
/// screen size and the last input line.
#[derive(Debug, Clone)]
pub struct RenderCoordinator {
    ui: UIConfig,
    messages: MessagesConfig,
    last_area: Option<Rect>,
    last_input: Option<String>,
    last_footer: Option<String>,
    layout: ChatLayout,
    now: Option<i64>,
}

impl RenderCoordinator {
    pub fn new(ui: UIConfig, messages: MessagesConfig) -> Self {
        Self {
            ui,
            messages,
            last_area: None,
            last_input: None,
            last_footer: None,
            layout: ChatLayout::default(),
            now: None,
        }
    }

    pub fn layout(&self) -> ChatLayout {
        self.layout
    }

    /// Forces the next draw to repaint everything.
    pub fn invalidate(&mut self) {
        self.last_area = None;
    }

    /// Pins the clock used for "last heard" ages.
    pub fn set_now(&mut self, now: Option<i64>) {
        self.now = now;
    }

    /// Terminal cursor position at the end of the typed input.
    pub fn input_cursor(&self) -> Option<(u16, u16)> {
        let area = inner(self.layout.input);
        if area.width == 0 {
            return None;
        }
        let typed = self.last_input.as_deref().map(text_width).unwrap_or(0) as u16;
        Some((area.x + typed.min(area.width - 1), area.y))
    }

    /// Redraws dirty panes and returns what was redrawn.
    pub fn draw<S: Surface + ?Sized>(
        &mut self,
        surface: &mut S,
        state: &mut ChatState,
        input: &str,
        footer: Option<&str>,
    ) -> Dirty {
        let area = surface.area();
        let mut dirty = state.dirty.take();
        if self.last_area != Some(area) {
            self.last_area = Some(area);
            dirty = Dirty::all();
        }
        if dirty.full {
            dirty = Dirty::all();
        }
        let input_changed = self.last_input.as_deref() != Some(input);
        let footer_changed = self.last_footer.as_deref() != footer;
        if !dirty.any() && !input_changed && !footer_changed {
            return dirty;
        }
        self.last_input = Some(input.to_string());
        self.last_footer = footer.map(str::to_string);

        if dirty.full {
            surface.clear(area);
            if area.width < MIN_WIDTH || area.height < MIN_HEIGHT {
                surface.write(area.x, area.y, "Terminal too small", area.width, Role::Warning);
                return dirty;
            }
        }

        self.layout = chat_layout(area, &self.ui, state);
        let heights = PaneHeights {
            channels: inner(self.layout.channels).height as usize,
            messages: inner(self.layout.messages).height as usize,
            nodes: inner(self.layout.nodes).height as usize,
        };
        if heights != state.heights {
            state.heights = heights;
            let channel_count = state.channel_list.len();
            let node_count = state.node_list.len();
            state.channel_cursor.clamp(channel_count, heights.channels.max(1));
            state.node_cursor.clamp(node_count, heights.nodes.max(1));
        }

        if dirty.channels {
            self.draw_channels(surface, state);
        }
        if dirty.messages {
            self.draw_messages(surface, state);
        }
        if dirty.nodes {
            self.draw_nodes(surface, state);
        }
        if dirty.log || (dirty.full && self.layout.packet_log.is_some()) {
            self.draw_packet_log(surface, state);
        }
        if dirty.function || footer_changed {
            self.draw_function(surface, state, footer);
        }
        if dirty.full || input_changed {
            self.draw_input(surface, input, state.focus == Pane::Messages);
        }
        dirty
    }

    fn draw_channels<S: Surface + ?Sized>(&self, surface: &mut S, state: &ChatState) {
        let rect = self.layout.channels;
        if rect.width < 3 || rect.height < 3 {
            return;
        }
        let focused = state.focus == Pane::Channels;
        surface.clear(rect);
        surface.draw_box(rect, Pane::Channels.title(), focused);
        let rows: Vec<(String, Role)> = state
            .channel_list
            .iter()
            .enumerate()
            .map(|(idx, id)| {
                let label = state.channel_label(id);
                if state.notifications.contains(&idx) {
                    (
                        format!("{label} {}", self.messages.notification_symbol),
                        Role::Notification,
                    )
                } else {
                    (label, Role::Normal)
                }
            })
            .collect();
        let area = inner(rect);
        draw_rows(surface, area, &rows, state.channel_cursor, focused);
        draw_arrows(
            surface,
            rect,
            state.channel_cursor.scroll_start,
            area.height as usize,
            rows.len(),
        );
    }

    fn draw_messages<S: Surface + ?Sized>(&self, surface: &mut S, state: &mut ChatState) {
        let rect = self.layout.messages;
        if rect.width < 3 || rect.height < 3 {
            return;
        }
        let focused = state.focus == Pane::Messages;
        surface.clear(rect);
        let title = state
            .selected_channel_id()
            .map(|id| state.channel_label(id))
            .unwrap_or_else(|| Pane::Messages.title().to_string());
        surface.draw_box(rect, &title, focused);

        let area = inner(rect);
        let pad = match state.selected_channel_id() {
            Some(id) => message_pad(state.log(id), area.width as usize),
            None => Pad::default(),
        };
        let visible = area.height as usize;
        let start = if state.follow_messages {
            pad.len().saturating_sub(visible)
        } else {
            scroll_window(state.message_scroll, 0, pad.len(), visible)
        };
        state.message_scroll = start;
        surface.blit(&pad, start, area);
        draw_arrows(surface, rect, start, visible, pad.len());
    }

    fn draw_nodes<S: Surface + ?Sized>(&self, surface: &mut S, state: &ChatState) {
        let rect = self.layout.nodes;
        if rect.width < 3 || rect.height < 3 {
            return;
        }
        let focused = state.focus == Pane::Nodes;
        surface.clear(rect);
        let title = format!("{} ({})", Pane::Nodes.title(), state.node_list.len());
        surface.draw_box(rect, &title, focused);
        let rows: Vec<(String, Role)> = state
            .node_list
            .iter()
            .map(|num| {
                let node = state.node_db.get(num);
                let label = state.long_name(*num);
                match node {
                    Some(n) if n.is_favorite => (format!("★ {label}"), Role::Normal),
                    Some(n) if n.is_ignored => (label, Role::Dim),
                    _ => (label, Role::Normal),
                }
            })
            .collect();
        let area = inner(rect);
        draw_rows(surface, area, &rows, state.node_cursor, focused);
        draw_arrows(
            surface,
            rect,
            state.node_cursor.scroll_start,
            area.height as usize,
            rows.len(),
        );
    }

    fn draw_packet_log<S: Surface + ?Sized>(&self, surface: &mut S, state: &ChatState) {
        let Some(rect) = self.layout.packet_log else {
            return;
        };
        surface.clear(rect);
        surface.draw_box(rect, "Packet Log", false);
        let area = inner(rect);
        if area.width == 0 || area.height == 0 {
            return;
        }
        let header = format!(
            "{}{}{}{}",
            fit("From", 10),
            fit("To", 10),
            fit("Port", 18),
            "Payload"
        );
        surface.write(area.x, area.y, &header, area.width, Role::Header);

        let rows = state
            .packet_buffer
            .iter()
            .rev()
            .take(area.height.saturating_sub(1) as usize);
        for (offset, packet) in rows.enumerate() {
            let to = if packet.to == BROADCAST_NUM {
                "All".to_string()
            } else {
                state.short_name(packet.to)
            };
            let payload = packet
                .decoded
                .as_ref()
                .map(|p| p.summary())
                .unwrap_or_default();
            let line = format!(
                "{}{}{}{}",
                fit(&state.short_name(packet.from), 10),
                fit(&to, 10),
                fit(packet.port_name(), 18),
                payload
            );
            surface.write(area.x, area.y + 1 + offset as u16, &line, area.width, Role::Normal);
        }
    }

    fn draw_function<S: Surface + ?Sized>(&self, surface: &mut S, state: &ChatState, footer: Option<&str>) {
        let rect = self.layout.function;
        if rect.width == 0 || rect.height == 0 {
            return;
        }
        surface.clear(rect);
        let now = self.now.unwrap_or_else(|| chrono::Local::now().timestamp());
        let text = match footer {
            Some(text) => text.to_string(),
            None => match (state.focus, state.selected_node()) {
                (Pane::Nodes, Some(num)) => match state.node_db.get(&num) {
                    Some(node) => node_details(node, num == state.my_node_num, now),
                    None => node_id(num),
                },
                _ => KEY_HELP.to_string(),
            },
        };
        surface.write(rect.x + 1, rect.y, &text, rect.width.saturating_sub(1), Role::Dim);
    }

    fn draw_input<S: Surface + ?Sized>(&self, surface: &mut S, input: &str, focused: bool) {
        let rect = self.layout.input;
        if rect.width < 3 || rect.height < 3 {
            return;
        }
        surface.clear(rect);
        surface.draw_box(rect, "Input", focused);
        let area = inner(rect);
        let width = area.width as usize;
        let mut shown: Vec<char> = Vec::new();
        let mut used = 0;
        for ch in input.chars().rev() {
            let w = unicode_width::UnicodeWidthChar::width(ch).unwrap_or(0);
            if used + w >= width {
                break;
            }
            shown.push(ch);
            used += w;
        }
        let shown: String = shown.into_iter().rev().collect();
        surface.write(area.x, area.y, &shown, area.width, Role::Normal);
    }
}

fn help_role(style: HelpStyle) -> Role {
    match style {
        HelpStyle::Plain => Role::Normal,
        HelpStyle::Warning => Role::Warning,
        HelpStyle::Note => Role::Note,
        HelpStyle::Underline => Role::Underline,
    }
}

/// Draws the full settings screen: the current level, its help text, and
/// any open modal on top.
pub fn draw_menu<S: Surface + ?Sized>(surface: &mut S, session: &mut MenuSession) {
    let area = surface.area();
    surface.clear(area);
    if area.width < MIN_WIDTH || area.height < MIN_HEIGHT {
        surface.write(area.x, area.y, "Terminal too small", area.width, Role::Warning);
        return;
    }
    let help_height = HELP_HEIGHT.min(area.height / 3).max(3);
    let menu_rect = Rect::new(area.x, area.y, area.width, area.height - help_height);
    let help_rect = Rect::new(area.x, menu_rect.bottom(), area.width, help_height);

    let path = session.path();
    surface.draw_box(menu_rect, &path.join(" > "), true);
    let list = inner(menu_rect);
    session.set_visible_height(list.height as usize);

    let mut rows: Vec<(String, Option<String>, Role)> = session
        .rows()
        .into_iter()
        .map(|(label, value, sensitive)| {
            let role = if sensitive { Role::Warning } else { Role::Normal };
            (label, value, role)
        })
        .collect();
    if session.show_save() {
        rows.push((SAVE_LABEL.to_string(), None, Role::Title));
    }

    let cursor = session.cursor();
    let width = list.width as usize;
    for (offset, (idx, (label, value, role))) in rows
        .iter()
        .enumerate()
        .skip(cursor.scroll_start)
        .take(list.height as usize)
        .enumerate()
    {
        let y = list.y + offset as u16;
        let role = if idx == cursor.selected { Role::Selected } else { *role };
        let mut line = fit(&format!(" {label}"), width);
        if let Some(value) = value {
            let value = fit(value, (width / 2).saturating_sub(1).min(text_width(value)));
            let label_part = fit(&format!(" {label}"), width.saturating_sub(text_width(&value) + 1));
            line = format!("{label_part}{value} ");
        }
        surface.write(list.x, y, &line, list.width, role);
    }
    draw_arrows(surface, menu_rect, cursor.scroll_start, list.height as usize, rows.len());

    surface.draw_box(help_rect, "Help", false);
    let help_area = inner(help_rect);
    let selected = session.selected_label();
    let lines = help::wrapped_help(
        help::catalog(),
        &path,
        selected.as_deref(),
        help_area.width as usize,
        help_area.height as usize,
    );
    let mut pad = Pad::default();
    for line in lines {
        let styled: StyledLine = line
            .into_iter()
            .map(|seg| (seg.text, help_role(seg.style)))
            .collect();
        pad.push(styled);
    }
    surface.blit(&pad, 0, help_area);

    if let Some(modal) = session.modal_mut() {
        draw_modal(surface, modal);
    }
}

pub fn draw_modal<S: Surface + ?Sized>(surface: &mut S, modal: &mut Modal) {
    match modal {
        Modal::Edit(Editor::Choice { chooser, .. })
        | Modal::ChooseFile { chooser, .. }
        | Modal::Confirm { chooser, .. } => draw_chooser(surface, chooser),
        Modal::Edit(Editor::Text { input, .. }) | Modal::ExportName(input) | Modal::UrlInput(input) => {
            draw_text_input(surface, input)
        }
        Modal::Edit(Editor::Fixed32 { input, .. }) => draw_fixed32(surface, input),
        Modal::Edit(Editor::Multi { input, .. }) => draw_multi(surface, input),
        Modal::Notice(dialog) => draw_dialog(surface, dialog),
    }
}

fn centered(area: Rect, width: u16, height: u16) -> Rect {
    let width = width.min(area.width);
    let height = height.min(area.height);
    Rect::new(
        area.x + (area.width - width) / 2,
        area.y + (area.height - height) / 2,
        width,
        height,
    )
}

fn modal_width(area: Rect, lines: &[&str]) -> u16 {
    let widest = lines.iter().map(|l| text_width(l)).max().unwrap_or(0) as u16;
    (widest + 4).max(30).min(area.width.saturating_sub(2).max(1))
}

/// Draws a chooser and resizes its scroll window to the rows that fit, so
/// later key presses keep the selection on screen.
pub fn draw_chooser<S: Surface + ?Sized>(surface: &mut S, chooser: &mut ListChooser) {
    let area = surface.area();
    let mut labels: Vec<&str> = chooser.options.iter().map(String::as_str).collect();
    labels.push(&chooser.prompt);
    let visible = chooser.options.len().clamp(1, MAX_CHOOSER_ROWS);
    let rect = centered(area, modal_width(area, &labels), visible as u16 + 4);
    surface.clear(rect);
    surface.draw_box(rect, "", true);
    let body = inner(rect);
    surface.write(body.x + 1, body.y, &chooser.prompt, body.width.saturating_sub(1), Role::Title);
    let list = Rect::new(body.x, body.y + 2, body.width, body.height.saturating_sub(2));
    chooser.set_visible_height(list.height as usize);
    let rows: Vec<(String, Role)> = chooser
        .options
        .iter()
        .map(|o| (format!(" {o}"), Role::Normal))
        .collect();
    draw_rows(surface, list, &rows, chooser.cursor, true);
    draw_arrows(surface, rect, chooser.cursor.scroll_start, list.height as usize, rows.len());
}

pub fn draw_dialog<S: Surface + ?Sized>(surface: &mut S, dialog: &Dialog) {
    let area = surface.area();
    let width = modal_width(area, &[&dialog.title, &dialog.message]).min(60.max(area.width / 2));
    let text_width = width.saturating_sub(4).max(1) as usize;
    let lines: Vec<String> = dialog
        .message
        .split('\n')
        .flat_map(|line| wrap(line, text_width).into_iter().map(|l| l.into_owned()).collect::<Vec<_>>())
        .collect();
    let rect = centered(area, width, lines.len() as u16 + 4);
    surface.clear(rect);
    surface.draw_box(rect, &dialog.title, true);
    let body = inner(rect);
    for (offset, line) in lines.iter().take(body.height.saturating_sub(1) as usize).enumerate() {
        surface.write(body.x + 1, body.y + 1 + offset as u16, line, body.width.saturating_sub(1), Role::Normal);
    }
}

fn draw_prompt_box<S: Surface + ?Sized>(
    surface: &mut S,
    prompt: &str,
    value: &str,
    error: Option<&str>,
) {
    let area = surface.area();
    let rect = centered(area, modal_width(area, &[prompt, value]), 6);
    surface.clear(rect);
    surface.draw_box(rect, "", true);
    let body = inner(rect);
    let width = body.width.saturating_sub(1);
    surface.write(body.x + 1, body.y, prompt, width, Role::Title);
    surface.write(body.x + 1, body.y + 1, &format!("> {value}"), width, Role::Normal);
    if let Some(error) = error {
        surface.write(body.x + 1, body.y + 3, error, width, Role::Warning);
    }
}

fn draw_text_input<S: Surface + ?Sized>(surface: &mut S, input: &TextInput) {
    draw_prompt_box(surface, &input.prompt, &input.value, input.error.as_deref());
}

fn draw_fixed32<S: Surface + ?Sized>(surface: &mut S, input: &Fixed32Input) {
    let prompt = format!("IP address is currently: {}", input.current);
    draw_prompt_box(surface, &prompt, &input.value, input.error.as_deref());
}

fn draw_multi<S: Surface + ?Sized>(surface: &mut S, input: &MultiInput) {
    let area = surface.area();
    let slots: Vec<String> = input
        .values
        .iter()
        .enumerate()
        .map(|(idx, value)| format!("{} {}: {value}", input.slot_label, idx + 1))
        .collect();
    let mut widths: Vec<&str> = slots.iter().map(String::as_str).collect();
    widths.push(&input.title);
    let rect = centered(area, modal_width(area, &widths), slots.len() as u16 + 6);
    surface.clear(rect);
    surface.draw_box(rect, "", true);
    let body = inner(rect);
    let width = body.width.saturating_sub(1);
    surface.write(body.x + 1, body.y, &input.title, width, Role::Title);
    for (idx, slot) in slots.iter().enumerate() {
        let role = if idx == input.cursor { Role::Selected } else { Role::Normal };
        surface.write(body.x + 1, body.y + 2 + idx as u16, slot, width, role);
    }
    if let Some(error) = &input.error {
        surface.write(body.x + 1, body.y + 3 + slots.len() as u16, error, width, Role::Warning);
    }
}
