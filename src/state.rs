use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};
use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Local, TimeZone, Timelike};
use parking_lot::{Mutex, MutexGuard};

use crate::config::NodeSort;
use crate::mesh::{node_id, NodeInfo, NodeNum, Packet};
use crate::nav::{ListCursor, NavCommand};

pub const PACKET_BUFFER_CAPACITY: usize = 20;

/// A conversation: a direct-message peer or a named broadcast channel.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ChannelId {
    Direct(NodeNum),
    Named(String),
}

impl ChannelId {
    pub fn direct_peer(&self) -> Option<NodeNum> {
        match self {
            ChannelId::Direct(num) => Some(*num),
            ChannelId::Named(_) => None,
        }
    }

    pub fn storage_key(&self) -> String {
        match self {
            ChannelId::Direct(num) => num.to_string(),
            ChannelId::Named(name) => format!("#{name}"),
        }
    }

    pub fn from_storage_key(raw: &str) -> Self {
        if let Some(name) = raw.strip_prefix('#') {
            return ChannelId::Named(name.to_string());
        }
        match raw.parse::<NodeNum>() {
            Ok(num) => ChannelId::Direct(num),
            Err(_) => ChannelId::Named(raw.to_string()),
        }
    }
}

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChannelId::Direct(num) => write!(f, "{}", node_id(*num)),
            ChannelId::Named(name) => write!(f, "{name}"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckState {
    Pending,
    Implicit,
    Acked,
    Nak,
}

impl AckState {
    pub fn as_str(self) -> &'static str {
        match self {
            AckState::Pending => "Pending",
            AckState::Implicit => "Implicit",
            AckState::Acked => "Ack",
            AckState::Nak => "Nak",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "Pending" => Some(AckState::Pending),
            "Implicit" => Some(AckState::Implicit),
            "Ack" => Some(AckState::Acked),
            "Nak" => Some(AckState::Nak),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    /// Hour boundary; holds the unix timestamp of the start of the hour.
    Divider { hour: i64 },
    Received,
    Sent(AckState),
    Notice,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    pub kind: EntryKind,
    pub prefix: String,
    pub body: String,
}

impl Entry {
    pub fn is_divider(&self) -> bool {
        matches!(self.kind, EntryKind::Divider { .. })
    }

    pub fn text(&self) -> String {
        format!("{}{}", self.prefix, self.body)
    }
}

pub fn divider_label(hour_start: &DateTime<Local>) -> String {
    hour_start.format("-- %Y-%m-%d %H:00 --").to_string()
}

fn hour_start(at: &DateTime<Local>) -> DateTime<Local> {
    let truncated = at
        .with_minute(0)
        .and_then(|t| t.with_second(0))
        .and_then(|t| t.with_nanosecond(0));
    truncated.unwrap_or(*at)
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Pane {
    #[default]
    Channels,
    Messages,
    Nodes,
}

impl Pane {
    pub fn title(&self) -> &'static str {
        match self {
            Pane::Channels => "Channels",
            Pane::Messages => "Messages",
            Pane::Nodes => "Nodes",
        }
    }

    pub fn next(self) -> Self {
        match self {
            Pane::Channels => Pane::Messages,
            Pane::Messages => Pane::Nodes,
            Pane::Nodes => Pane::Channels,
        }
    }

    pub fn previous(self) -> Self {
        match self {
            Pane::Channels => Pane::Nodes,
            Pane::Messages => Pane::Channels,
            Pane::Nodes => Pane::Messages,
        }
    }
}

/// Panes whose content changed since the last draw.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Dirty {
    pub channels: bool,
    pub messages: bool,
    pub nodes: bool,
    pub log: bool,
    pub function: bool,
    pub full: bool,
}

impl Dirty {
    pub fn any(&self) -> bool {
        self.channels || self.messages || self.nodes || self.log || self.function || self.full
    }

    pub fn all() -> Self {
        Self {
            channels: true,
            messages: true,
            nodes: true,
            log: true,
            function: true,
            full: true,
        }
    }

    pub fn take(&mut self) -> Self {
        std::mem::take(self)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingAck {
    pub channel: ChannelId,
    pub index: usize,
    pub timestamp: i64,
}

/// Visible row counts last laid out by the renderer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PaneHeights {
    pub channels: usize,
    pub messages: usize,
    pub nodes: usize,
}

impl Default for PaneHeights {
    fn default() -> Self {
        Self {
            channels: 10,
            messages: 10,
            nodes: 10,
        }
    }
}

#[derive(Debug)]
pub struct ChatState {
    pub my_node_num: NodeNum,
    pub channel_list: Vec<ChannelId>,
    pub messages: HashMap<ChannelId, Vec<Entry>>,
    pub node_list: Vec<NodeNum>,
    pub node_db: HashMap<NodeNum, NodeInfo>,
    pub notifications: BTreeSet<usize>,
    pub packet_buffer: VecDeque<Packet>,
    pub pending_acks: HashMap<u32, PendingAck>,
    pub pending_traceroutes: HashSet<u32>,
    pub channel_cursor: ListCursor,
    pub node_cursor: ListCursor,
    pub message_scroll: usize,
    pub follow_messages: bool,
    pub focus: Pane,
    pub display_log: bool,
    pub single_pane_mode: bool,
    pub last_sent: Option<Instant>,
    pub last_traceroute: Option<Instant>,
    pub heights: PaneHeights,
    pub dirty: Dirty,
    pub bell: bool,
}

impl ChatState {
    pub fn new(my_node_num: NodeNum, channel_names: &[String]) -> Self {
        let channel_list: Vec<ChannelId> = channel_names
            .iter()
            .map(|name| ChannelId::Named(name.clone()))
            .collect();
        let messages = channel_list
            .iter()
            .map(|id| (id.clone(), Vec::new()))
            .collect();
        Self {
            my_node_num,
            channel_list,
            messages,
            node_list: Vec::new(),
            node_db: HashMap::new(),
            notifications: BTreeSet::new(),
            packet_buffer: VecDeque::with_capacity(PACKET_BUFFER_CAPACITY),
            pending_acks: HashMap::new(),
            pending_traceroutes: HashSet::new(),
            channel_cursor: ListCursor::default(),
            node_cursor: ListCursor::default(),
            message_scroll: 0,
            follow_messages: true,
            focus: Pane::Channels,
            display_log: false,
            single_pane_mode: false,
            last_sent: None,
            last_traceroute: None,
            heights: PaneHeights::default(),
            dirty: Dirty::all(),
            bell: false,
        }
    }

    pub fn selected_channel(&self) -> usize {
        self.channel_cursor.selected
    }

    pub fn selected_channel_id(&self) -> Option<&ChannelId> {
        self.channel_list.get(self.channel_cursor.selected)
    }

    pub fn selected_node(&self) -> Option<NodeNum> {
        self.node_list.get(self.node_cursor.selected).copied()
    }

    pub fn channel_index(&self, id: &ChannelId) -> Option<usize> {
        self.channel_list.iter().position(|c| c == id)
    }

    pub fn log(&self, id: &ChannelId) -> &[Entry] {
        self.messages.get(id).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Returns the channel's index, appending it first if it is new.
    pub fn ensure_channel(&mut self, id: &ChannelId) -> (usize, bool) {
        if let Some(idx) = self.channel_index(id) {
            return (idx, false);
        }
        self.channel_list.push(id.clone());
        self.messages.entry(id.clone()).or_default();
        self.dirty.channels = true;
        (self.channel_list.len() - 1, true)
    }

    /// Appends a message, preceded by an hour divider when `at` falls in a
    /// different hour than the channel's last divider. Returns the index of
    /// the message itself.
    pub fn add_message(
        &mut self,
        channel: &ChannelId,
        kind: EntryKind,
        prefix: String,
        body: String,
        at: DateTime<Local>,
    ) -> usize {
        let log = self.messages.entry(channel.clone()).or_default();
        let hour = hour_start(&at);
        let last_divider = log.iter().rev().find_map(|entry| match entry.kind {
            EntryKind::Divider { hour } => Some(hour),
            _ => None,
        });
        if last_divider.map_or(true, |last| hour.timestamp() > last) {
            log.push(Entry {
                kind: EntryKind::Divider {
                    hour: hour.timestamp(),
                },
                prefix: divider_label(&hour),
                body: String::new(),
            });
        }
        log.push(Entry { kind, prefix, body });
        let index = log.len() - 1;
        if self.selected_channel_id() == Some(channel) {
            self.follow_messages = true;
            self.dirty.messages = true;
        }
        index
    }

    pub fn add_notification(&mut self, index: usize) {
        if self.notifications.insert(index) {
            self.dirty.channels = true;
        }
    }

    pub fn remove_notification(&mut self, index: usize) {
        if self.notifications.remove(&index) {
            self.dirty.channels = true;
        }
    }

    pub fn push_packet(&mut self, packet: Packet) {
        if self.packet_buffer.len() == PACKET_BUFFER_CAPACITY {
            self.packet_buffer.pop_front();
        }
        self.packet_buffer.push_back(packet);
        if self.display_log {
            self.dirty.log = true;
        }
    }

    pub fn select_channel(&mut self, index: usize) {
        let count = self.channel_list.len();
        if count == 0 {
            return;
        }
        let before = self.channel_cursor.selected;
        self.channel_cursor
            .select(index, count, self.heights.channels);
        self.remove_notification(self.channel_cursor.selected);
        if before != self.channel_cursor.selected {
            self.follow_messages = true;
            self.dirty.messages = true;
        }
        self.dirty.channels = true;
        self.dirty.function = true;
    }

    pub fn select_node(&mut self, index: usize) {
        let count = self.node_list.len();
        if count == 0 {
            return;
        }
        self.node_cursor.select(index, count, self.heights.nodes);
        self.dirty.nodes = true;
        self.dirty.function = true;
    }

    pub fn navigate(&mut self, command: NavCommand) {
        match self.focus {
            Pane::Channels => {
                let target = command.target(
                    self.channel_cursor.selected,
                    self.channel_list.len(),
                    self.heights.channels,
                    true,
                );
                self.select_channel(target);
            }
            Pane::Nodes => {
                let target = command.target(
                    self.node_cursor.selected,
                    self.node_list.len(),
                    self.heights.nodes,
                    true,
                );
                self.select_node(target);
            }
            Pane::Messages => {
                let page = self.heights.messages.max(1) as isize;
                let delta = match command {
                    NavCommand::LineUp => -1,
                    NavCommand::LineDown => 1,
                    NavCommand::PageUp => -page,
                    NavCommand::PageDown => page,
                    NavCommand::Home => isize::MIN / 2,
                    NavCommand::End => isize::MAX / 2,
                };
                self.message_scroll = (self.message_scroll as isize)
                    .saturating_add(delta)
                    .max(0) as usize;
                self.follow_messages = matches!(command, NavCommand::End);
                self.dirty.messages = true;
            }
        }
    }

    pub fn set_focus(&mut self, pane: Pane) {
        if self.focus == pane {
            return;
        }
        self.focus = pane;
        if pane == Pane::Channels {
            self.remove_notification(self.channel_cursor.selected);
        }
        if self.single_pane_mode {
            self.dirty = Dirty::all();
        } else {
            self.dirty.channels = true;
            self.dirty.messages = true;
            self.dirty.nodes = true;
            self.dirty.function = true;
        }
    }

    /// Removes a direct-message channel from the list. Notification indices
    /// above it shift down by one. Named channels cannot be archived.
    ///
    /// The selection stays on the same channel when another one is removed.
    /// Removing the selected channel selects its successor, which then counts
    /// as read.
    pub fn archive_channel(&mut self, index: usize) -> Option<ChannelId> {
        let id = self.channel_list.get(index)?.clone();
        id.direct_peer()?;
        self.channel_list.remove(index);
        self.notifications = std::mem::take(&mut self.notifications)
            .into_iter()
            .filter(|&n| n != index)
            .map(|n| if n > index { n - 1 } else { n })
            .collect();
        let selected = self.channel_cursor.selected;
        if selected > index {
            self.channel_cursor.selected = selected - 1;
        }
        let count = self.channel_list.len();
        self.channel_cursor.clamp(count, self.heights.channels);
        if selected == index && self.focus == Pane::Channels {
            self.remove_notification(self.channel_cursor.selected);
        }
        self.follow_messages = true;
        self.dirty.channels = true;
        self.dirty.messages = true;
        Some(id)
    }

    /// Re-derives the roster from a node-database snapshot. Returns whether
    /// the ordered sequence changed.
    pub fn refresh_node_list(&mut self, nodes: Vec<NodeInfo>, sort: NodeSort) -> bool {
        let roster = sort_roster(&nodes, self.my_node_num, sort);
        self.node_db = nodes.into_iter().map(|n| (n.num, n)).collect();
        if roster == self.node_list {
            return false;
        }
        self.node_list = roster;
        let count = self.node_list.len();
        self.node_cursor.clamp(count, self.heights.nodes);
        self.dirty.nodes = true;
        true
    }

    pub fn short_name(&self, num: NodeNum) -> String {
        self.node_db
            .get(&num)
            .and_then(NodeInfo::short_name)
            .map(str::to_string)
            .unwrap_or_else(|| format!("{num:08x}"))
    }

    pub fn long_name(&self, num: NodeNum) -> String {
        self.node_db
            .get(&num)
            .and_then(NodeInfo::long_name)
            .map(str::to_string)
            .unwrap_or_else(|| node_id(num))
    }

    pub fn channel_label(&self, id: &ChannelId) -> String {
        match id {
            ChannelId::Direct(num) => self.long_name(*num),
            ChannelId::Named(name) => name.clone(),
        }
    }
}

/// Orders the roster: own node first, then favorites, then the rest, with
/// ignored nodes last. Within each group the configured key applies.
pub fn sort_roster(nodes: &[NodeInfo], my_node_num: NodeNum, sort: NodeSort) -> Vec<NodeNum> {
    let mut others: Vec<&NodeInfo> = nodes.iter().filter(|n| n.num != my_node_num).collect();
    match sort {
        NodeSort::LastHeard => {
            others.sort_by(|a, b| b.last_heard.unwrap_or(0).cmp(&a.last_heard.unwrap_or(0)))
        }
        NodeSort::Name => others.sort_by_key(|n| {
            n.long_name()
                .map(str::to_lowercase)
                .unwrap_or_else(|| node_id(n.num))
        }),
        NodeSort::Hops => others.sort_by_key(|n| n.hops_away.unwrap_or(100)),
    }
    others.sort_by_key(|n| {
        if n.is_favorite {
            0
        } else if n.is_ignored {
            2
        } else {
            1
        }
    });

    let mut roster = Vec::with_capacity(nodes.len());
    if nodes.iter().any(|n| n.num == my_node_num) {
        roster.push(my_node_num);
    }
    roster.extend(others.into_iter().map(|n| n.num));
    roster
}

pub fn local_time(timestamp: i64) -> DateTime<Local> {
    Local
        .timestamp_opt(timestamp, 0)
        .single()
        .unwrap_or_else(Local::now)
}

/// The one lock shared by the network listener and the UI loop.
#[derive(Debug, Clone)]
pub struct Shared {
    inner: Arc<Mutex<ChatState>>,
}

impl Shared {
    pub fn new(state: ChatState) -> Self {
        Self {
            inner: Arc::new(Mutex::new(state)),
        }
    }

    pub fn lock(&self) -> MutexGuard<'_, ChatState> {
        self.inner.lock()
    }

    /// Runs one mutation with the lock held.
    pub fn with<R>(&self, f: impl FnOnce(&mut ChatState) -> R) -> R {
        let mut guard = self.inner.lock();
        f(&mut guard)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mesh::User;
    use chrono::Duration;

    fn state() -> ChatState {
        ChatState::new(1, &["general".to_string(), "ops".to_string()])
    }

    fn at(hour: u32, minute: u32) -> DateTime<Local> {
        Local
            .with_ymd_and_hms(2024, 5, 1, hour, minute, 0)
            .single()
            .unwrap()
    }

    fn node(num: NodeNum, name: &str, last_heard: i64) -> NodeInfo {
        NodeInfo {
            num,
            user: Some(User {
                long_name: name.into(),
                short_name: name[..2].into(),
                ..User::default()
            }),
            last_heard: Some(last_heard),
            ..NodeInfo::default()
        }
    }

    #[test]
    fn dividers_inserted_once_per_hour() {
        let mut s = state();
        let general = ChannelId::Named("general".into());
        for (h, m) in [(9, 1), (9, 30), (10, 2), (10, 59), (12, 0)] {
            s.add_message(&general, EntryKind::Received, ">> a: ".into(), "x".into(), at(h, m));
        }
        let log = s.log(&general);
        let dividers = log.iter().filter(|e| e.is_divider()).count();
        assert_eq!(dividers, 3);
        assert_eq!(log.len(), 5 + 3);
        assert!(log.windows(2).all(|w| !(w[0].is_divider() && w[1].is_divider())));
        assert_eq!(log[0].prefix, "-- 2024-05-01 09:00 --");
    }

    #[test]
    fn dividers_never_go_backwards() {
        let mut s = state();
        let ops = ChannelId::Named("ops".into());
        s.add_message(&ops, EntryKind::Received, "".into(), "late".into(), at(11, 0));
        s.add_message(&ops, EntryKind::Received, "".into(), "skewed".into(), at(10, 0));
        let hours: Vec<i64> = s
            .log(&ops)
            .iter()
            .filter_map(|e| match e.kind {
                EntryKind::Divider { hour } => Some(hour),
                _ => None,
            })
            .collect();
        assert_eq!(hours.len(), 1);
    }

    #[test]
    fn packet_buffer_is_bounded() {
        let mut s = state();
        for id in 0..25 {
            s.push_packet(Packet::text(id, 2, 1, 0, "hi"));
        }
        assert_eq!(s.packet_buffer.len(), PACKET_BUFFER_CAPACITY);
        assert_eq!(s.packet_buffer.front().map(|p| p.id), Some(5));
    }

    #[test]
    fn roster_refresh_is_idempotent() {
        let mut s = state();
        let nodes = vec![node(1, "self", 0), node(2, "bravo", 10), node(3, "alpha", 20)];
        assert!(s.refresh_node_list(nodes.clone(), NodeSort::LastHeard));
        assert_eq!(s.node_list, vec![1, 3, 2]);
        assert!(!s.refresh_node_list(nodes, NodeSort::LastHeard));
        assert_eq!(s.node_list, vec![1, 3, 2]);
    }

    #[test]
    fn roster_groups_favorites_and_ignored() {
        let mut fav = node(4, "zulu", 1);
        fav.is_favorite = true;
        let mut ignored = node(5, "alpha", 99);
        ignored.is_ignored = true;
        let nodes = vec![node(2, "mike", 50), ignored, fav, node(1, "self", 0)];
        assert_eq!(sort_roster(&nodes, 1, NodeSort::Name), vec![1, 4, 2, 5]);
        assert_eq!(sort_roster(&nodes, 9, NodeSort::LastHeard), vec![4, 2, 1, 5]);
    }

    #[test]
    fn archive_renumbers_notifications() {
        let mut s = state();
        for peer in [10, 11, 12] {
            s.ensure_channel(&ChannelId::Direct(peer));
        }
        s.notifications = [0, 2, 3, 4].into_iter().collect();
        let before = s.channel_list.len();
        let removed = s.archive_channel(2);
        assert_eq!(removed, Some(ChannelId::Direct(10)));
        assert_eq!(s.channel_list.len(), before - 1);
        assert_eq!(s.notifications, [0, 2, 3].into_iter().collect());
    }

    #[test]
    fn archiving_selected_channel_marks_successor_read() {
        let mut s = state();
        for peer in [0x10, 0x11] {
            s.ensure_channel(&ChannelId::Direct(peer));
        }
        s.select_channel(2);
        s.add_notification(3);
        assert_eq!(s.archive_channel(2), Some(ChannelId::Direct(0x10)));
        assert_eq!(s.selected_channel_id(), Some(&ChannelId::Direct(0x11)));
        assert!(s.notifications.is_empty());
    }

    #[test]
    fn archiving_above_selection_keeps_selected_channel() {
        let mut s = state();
        for peer in [0x10, 0x11, 0x12] {
            s.ensure_channel(&ChannelId::Direct(peer));
        }
        s.select_channel(4);
        s.add_notification(3);
        s.archive_channel(2);
        assert_eq!(s.selected_channel_id(), Some(&ChannelId::Direct(0x12)));
        assert_eq!(s.notifications, [2].into_iter().collect());
    }

    #[test]
    fn named_channels_are_not_archived() {
        let mut s = state();
        assert_eq!(s.archive_channel(0), None);
        assert_eq!(s.channel_list.len(), 2);
    }

    #[test]
    fn selecting_clears_notification() {
        let mut s = state();
        s.add_notification(1);
        s.select_channel(1);
        assert!(s.notifications.is_empty());
        assert_eq!(s.selected_channel(), 1);
        s.select_channel(99);
        assert_eq!(s.selected_channel(), 1);
    }

    #[test]
    fn storage_keys_are_unambiguous() {
        for id in [
            ChannelId::Direct(42),
            ChannelId::Named("42".into()),
            ChannelId::Named("#x".into()),
        ] {
            assert_eq!(ChannelId::from_storage_key(&id.storage_key()), id);
        }
    }

    #[test]
    fn divider_for_next_day() {
        let mut s = state();
        let general = ChannelId::Named("general".into());
        let first = at(23, 10);
        s.add_message(&general, EntryKind::Received, "".into(), "a".into(), first);
        s.add_message(
            &general,
            EntryKind::Received,
            "".into(),
            "b".into(),
            first + Duration::hours(1),
        );
        assert_eq!(s.log(&general).iter().filter(|e| e.is_divider()).count(), 2);
    }
}
