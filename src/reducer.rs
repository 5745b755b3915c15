use std::sync::Arc;

use anyhow::Result;
use chrono::{DateTime, Local};
use parking_lot::RwLock;
use tracing::{debug, info, warn};

use crate::config::{Config, MessagesConfig, NodeSort};
use crate::mesh::{NodeInfo, NodeNum, Packet, Payload, RouteDiscovery, Routing, User, UNKNOWN_SNR};
use crate::state::{local_time, AckState, ChannelId, ChatState, EntryKind};
use crate::storage::{NameKind, Store};
use crate::transport::Transport;

/// Client settings the reducer reads on every event. Replaced wholesale
/// when App Settings are saved.
#[derive(Debug, Clone)]
struct Prefs {
    messages: MessagesConfig,
    node_sort: NodeSort,
    notification_sound: bool,
}

/// Applies inbound mesh events to the chat state.
pub struct Reducer {
    store: Store,
    transport: Arc<dyn Transport>,
    prefs: RwLock<Prefs>,
    channel_names: Vec<String>,
}

impl Reducer {
    pub fn new(
        store: Store,
        transport: Arc<dyn Transport>,
        messages: MessagesConfig,
        node_sort: NodeSort,
        notification_sound: bool,
    ) -> Self {
        let channel_names = transport.channels();
        Self {
            store,
            transport,
            prefs: RwLock::new(Prefs {
                messages,
                node_sort,
                notification_sound,
            }),
            channel_names,
        }
    }

    pub fn messages_config(&self) -> MessagesConfig {
        self.prefs.read().messages.clone()
    }

    pub fn node_sort(&self) -> NodeSort {
        self.prefs.read().node_sort
    }

    /// Picks up edited client settings. Later events use the new prefixes;
    /// the roster is re-sorted on the next refresh.
    pub fn reconfigure(&self, cfg: &Config) {
        *self.prefs.write() = Prefs {
            messages: cfg.messages.clone(),
            node_sort: cfg.ui.node_sort,
            notification_sound: cfg.ui.notification_sound,
        };
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn handle_inbound(&self, state: &mut ChatState, packet: Packet) {
        self.handle_inbound_at(state, packet, Local::now());
    }

    pub fn handle_inbound_at(&self, state: &mut ChatState, packet: Packet, now: DateTime<Local>) {
        state.push_packet(packet.clone());
        let Some(payload) = packet.decoded.clone() else {
            return;
        };

        self.refresh_roster(state);

        match payload {
            Payload::NodeInfo(user) => self.on_node_info(packet.from, user),
            Payload::Text(text) => {
                if let Err(err) = self.on_text(state, &packet, text, now) {
                    warn!(from = packet.from, error = %err, "failed to record text message");
                }
            }
            Payload::Routing {
                request_id,
                routing,
            } => self.on_ack(state, packet.from, request_id, &routing),
            Payload::Traceroute { request_id, route } => {
                let expected = request_id
                    .map(|id| state.pending_traceroutes.remove(&id))
                    .unwrap_or(false);
                if !expected {
                    debug!(from = packet.from, "ignoring unsolicited traceroute");
                    return;
                }
                if let Err(err) = self.on_traceroute(state, &packet, &route, now) {
                    warn!(from = packet.from, error = %err, "failed to record traceroute");
                }
            }
            Payload::Malformed { port, reason } => {
                warn!(from = packet.from, %port, %reason, "dropping malformed packet");
            }
            Payload::Position(_) | Payload::Telemetry(_) | Payload::Other { .. } => {}
        }
    }

    pub fn refresh_roster(&self, state: &mut ChatState) -> bool {
        state.refresh_node_list(self.transport.nodes(), self.node_sort())
    }

    fn on_node_info(&self, from: NodeNum, user: User) {
        if user.long_name.is_empty() {
            return;
        }
        let node = NodeInfo {
            num: from,
            user: Some(user),
            ..NodeInfo::default()
        };
        if let Err(err) = self.store.upsert_node(&node) {
            warn!(node = from, error = %err, "failed to store node info");
        }
    }

    fn on_text(
        &self,
        state: &mut ChatState,
        packet: &Packet,
        text: String,
        now: DateTime<Local>,
    ) -> Result<()> {
        let channel = if packet.to == state.my_node_num {
            ChannelId::Direct(packet.from)
        } else {
            self.named_channel(packet.channel)
        };

        let index = self.open_conversation(state, &channel)?;
        if index == state.selected_channel() {
            state.dirty.messages = true;
        } else {
            state.add_notification(index);
        }

        let short = self.short_name(state, packet.from);
        let prefix = format!("{} {}: ", self.messages_config().message_prefix, short);
        state.add_message(&channel, EntryKind::Received, prefix, text.clone(), now);
        self.store.save_message(&channel, packet.from, &text, None)?;

        if self.prefs.read().notification_sound {
            state.bell = true;
        }
        info!(channel = %channel, from = packet.from, "message received");
        Ok(())
    }

    fn on_ack(&self, state: &mut ChatState, from: NodeNum, request_id: u32, routing: &Routing) {
        let Some(pending) = state.pending_acks.remove(&request_id) else {
            return;
        };

        let messages = self.messages_config();
        let (outcome, glyph) = if !routing.is_success() {
            (AckState::Nak, &messages.nak_str)
        } else if from == state.my_node_num {
            (AckState::Implicit, &messages.ack_implicit_str)
        } else {
            (AckState::Acked, &messages.ack_str)
        };

        let Some(entry) = state
            .messages
            .get_mut(&pending.channel)
            .and_then(|log| log.get_mut(pending.index))
        else {
            warn!(request_id, channel = %pending.channel, "pending ack points past the log");
            return;
        };
        entry.kind = EntryKind::Sent(outcome);
        entry.prefix = format!("{} {}: ", messages.sent_message_prefix, glyph);
        let body = entry.body.clone();

        if let Err(err) =
            self.store
                .update_ack_state(&pending.channel, pending.timestamp, &body, outcome)
        {
            warn!(request_id, error = %err, "failed to persist ack state");
        }

        if state.selected_channel_id() == Some(&pending.channel) {
            state.dirty.messages = true;
        }
        debug!(request_id, outcome = outcome.as_str(), "ack resolved");
    }

    fn on_traceroute(
        &self,
        state: &mut ChatState,
        packet: &Packet,
        route: &RouteDiscovery,
        now: DateTime<Local>,
    ) -> Result<()> {
        let text = format_traceroute(packet, route, |num| self.short_name(state, num));
        let channel = ChannelId::Direct(packet.from);
        let index = self.open_conversation(state, &channel)?;
        if index == state.selected_channel() {
            state.dirty.messages = true;
        } else {
            state.add_notification(index);
        }

        let prefix = format!(
            "{} {}:\n",
            self.messages_config().message_prefix,
            self.short_name(state, packet.from)
        );
        state.add_message(&channel, EntryKind::Received, prefix, text.clone(), now);
        self.store.save_message(&channel, packet.from, &text, None)?;
        Ok(())
    }

    /// Makes sure the channel is listed, un-archiving a returning peer.
    fn open_conversation(&self, state: &mut ChatState, channel: &ChannelId) -> Result<usize> {
        let (index, created) = state.ensure_channel(channel);
        if let (true, Some(peer)) = (created, channel.direct_peer()) {
            if self.store.is_archived(peer)? {
                self.store.set_archived(peer, false)?;
            }
        }
        Ok(index)
    }

    fn named_channel(&self, index: u32) -> ChannelId {
        let name = self
            .channel_names
            .get(index as usize)
            .cloned()
            .unwrap_or_else(|| format!("Channel {index}"));
        ChannelId::Named(name)
    }

    pub fn short_name(&self, state: &ChatState, num: NodeNum) -> String {
        match self.store.display_name(num, NameKind::Short) {
            Ok(Some(name)) => name,
            _ => state.short_name(num),
        }
    }

    /// Rebuilds channel logs from the message store. Direct-message peers
    /// with history join the channel list unless their chat is archived.
    pub fn restore_history(&self, state: &mut ChatState) -> Result<usize> {
        let stored = self.store.load_messages()?;
        let messages = self.messages_config();
        let count = stored.len();
        for message in stored {
            if let Some(peer) = message.channel.direct_peer() {
                if state.channel_index(&message.channel).is_none()
                    && !self.store.is_archived(peer)?
                {
                    state.ensure_channel(&message.channel);
                }
            }

            let (kind, prefix) = if message.user_id == state.my_node_num {
                let ack = message.ack.unwrap_or(AckState::Pending);
                let glyph = match ack {
                    AckState::Pending => &messages.ack_unknown_str,
                    AckState::Implicit => &messages.ack_implicit_str,
                    AckState::Acked => &messages.ack_str,
                    AckState::Nak => &messages.nak_str,
                };
                (
                    EntryKind::Sent(ack),
                    format!("{} {}: ", messages.sent_message_prefix, glyph),
                )
            } else {
                let separator = if message.text.starts_with("Traceroute to:") {
                    ":\n"
                } else {
                    ": "
                };
                (
                    EntryKind::Received,
                    format!(
                        "{} {}{}",
                        messages.message_prefix,
                        self.short_name(state, message.user_id),
                        separator
                    ),
                )
            };
            state.add_message(
                &message.channel,
                kind,
                prefix,
                message.text,
                local_time(message.timestamp),
            );
        }
        state.dirty.channels = true;
        state.dirty.messages = true;
        info!(count, "restored message history");
        Ok(count)
    }
}

fn snr_label(snr: Option<&i32>) -> String {
    match snr {
        Some(&value) if value != UNKNOWN_SNR => format!("{:.1}", value as f32 / 4.0),
        _ => "?".to_string(),
    }
}

/// Renders a traceroute response. The forward route runs from us through
/// each hop to the responder; the back route is included only when the
/// packet carries a hop start and the SNR list has one entry per hop plus
/// one for the final link.
pub fn format_traceroute(
    packet: &Packet,
    route: &RouteDiscovery,
    name: impl Fn(NodeNum) -> String,
) -> String {
    let mut out = String::from("Traceroute to:\n");

    let towards_valid = route.snr_towards.len() == route.route.len() + 1;
    let mut line = name(packet.to);
    for (idx, hop) in route.route.iter().enumerate() {
        let snr = towards_valid.then(|| route.snr_towards.get(idx)).flatten();
        line.push_str(&format!(" --> {} ({}dB)", name(*hop), snr_label(snr)));
    }
    let last = towards_valid.then(|| route.snr_towards.last()).flatten();
    line.push_str(&format!(" --> {} ({}dB)", name(packet.from), snr_label(last)));
    out.push_str(&line);
    out.push('\n');

    let back_valid =
        packet.hop_start.is_some() && route.snr_back.len() == route.route_back.len() + 1;
    if back_valid {
        out.push_str("Back:\n");
        let mut line = name(packet.from);
        for (idx, hop) in route.route_back.iter().enumerate() {
            line.push_str(&format!(
                " --> {} ({}dB)",
                name(*hop),
                snr_label(route.snr_back.get(idx))
            ));
        }
        line.push_str(&format!(
            " --> {} ({}dB)",
            name(packet.to),
            snr_label(route.snr_back.last())
        ));
        out.push_str(&line);
        out.push('\n');
    }
    out
}
