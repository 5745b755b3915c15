use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Local};
use tracing::{info, warn};

use crate::config::{Config, LimitsConfig, MessagesConfig};
use crate::mesh::{NodeNum, BROADCAST_NUM};
use crate::state::{AckState, ChannelId, ChatState, EntryKind, PendingAck};
use crate::storage::Store;
use crate::transport::{Transport, TransportError};

#[derive(Debug, thiserror::Error)]
pub enum SendError {
    #[error("please wait {} before sending again", humantime::format_duration(*remaining))]
    Cooldown { remaining: Duration },
    #[error("no channel named {0}")]
    UnknownChannel(String),
    #[error("nothing to send")]
    Empty,
    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// Issues sends on behalf of the UI and records their optimistic log
/// entries.
pub struct Outbound {
    transport: Arc<dyn Transport>,
    store: Store,
    messages: MessagesConfig,
    limits: LimitsConfig,
    channel_names: Vec<String>,
}

impl Outbound {
    pub fn new(
        transport: Arc<dyn Transport>,
        store: Store,
        messages: MessagesConfig,
        limits: LimitsConfig,
    ) -> Self {
        let channel_names = transport.channels();
        Self {
            transport,
            store,
            messages,
            limits,
            channel_names,
        }
    }

    /// Takes edited prefixes and cooldowns into use for later sends.
    pub fn reconfigure(&mut self, cfg: &Config) {
        self.messages = cfg.messages.clone();
        self.limits = cfg.limits.clone();
    }

    /// Direct channels go to their peer on channel 0; named channels are
    /// broadcast on their device channel index.
    fn route(&self, channel: &ChannelId) -> Result<(NodeNum, u32), SendError> {
        match channel {
            ChannelId::Direct(peer) => Ok((*peer, 0)),
            ChannelId::Named(name) => self
                .channel_names
                .iter()
                .position(|n| n == name)
                .map(|idx| (BROADCAST_NUM, idx as u32))
                .ok_or_else(|| SendError::UnknownChannel(name.clone())),
        }
    }

    pub fn send_text(
        &self,
        state: &mut ChatState,
        channel: &ChannelId,
        body: &str,
    ) -> Result<u32, SendError> {
        self.send_text_at(state, channel, body, Instant::now(), Local::now())
    }

    pub fn send_text_at(
        &self,
        state: &mut ChatState,
        channel: &ChannelId,
        body: &str,
        now: Instant,
        at: DateTime<Local>,
    ) -> Result<u32, SendError> {
        if body.trim().is_empty() {
            return Err(SendError::Empty);
        }
        check_cooldown(state.last_sent, self.limits.send_cooldown, now)?;
        let (destination, channel_index) = self.route(channel)?;

        let id = self
            .transport
            .send_text(body, destination, channel_index, true)?;
        state.last_sent = Some(now);

        let prefix = format!(
            "{} {}: ",
            self.messages.sent_message_prefix, self.messages.ack_unknown_str
        );
        let index = state.add_message(
            channel,
            EntryKind::Sent(AckState::Pending),
            prefix,
            body.to_string(),
            at,
        );
        let timestamp = match self.store.save_message_at(
            channel,
            state.my_node_num,
            body,
            Some(AckState::Pending),
            at.timestamp(),
        ) {
            Ok(ts) => ts,
            Err(err) => {
                warn!(channel = %channel, error = %err, "failed to persist sent message");
                at.timestamp()
            }
        };
        state.pending_acks.insert(
            id,
            PendingAck {
                channel: channel.clone(),
                index,
                timestamp,
            },
        );
        info!(channel = %channel, request_id = id, "message sent");
        Ok(id)
    }

    pub fn send_traceroute(&self, state: &mut ChatState, target: NodeNum) -> Result<u32, SendError> {
        self.send_traceroute_at(state, target, Instant::now(), Local::now())
    }

    /// The response arrives later through the reducer, which only accepts
    /// ids recorded here.
    pub fn send_traceroute_at(
        &self,
        state: &mut ChatState,
        target: NodeNum,
        now: Instant,
        at: DateTime<Local>,
    ) -> Result<u32, SendError> {
        check_cooldown(state.last_traceroute, self.limits.traceroute_cooldown, now)?;
        let id = self
            .transport
            .send_traceroute(target, self.limits.traceroute_hop_limit, 0)?;
        state.last_traceroute = Some(now);
        state.pending_traceroutes.insert(id);

        state.add_message(
            &ChannelId::Direct(target),
            EntryKind::Notice,
            format!("{} Sent Traceroute", self.messages.message_prefix),
            String::new(),
            at,
        );
        info!(target, request_id = id, "traceroute sent");
        Ok(id)
    }
}

fn check_cooldown(last: Option<Instant>, cooldown: Duration, now: Instant) -> Result<(), SendError> {
    let Some(last) = last else {
        return Ok(());
    };
    let elapsed = now.saturating_duration_since(last);
    if elapsed < cooldown {
        return Err(SendError::Cooldown {
            remaining: cooldown - elapsed,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mesh::{Packet, Payload, Routing};
    use crate::reducer::Reducer;
    use crate::config::NodeSort;
    use crate::transport::{SimOptions, SimulatedTransport};
    use chrono::TimeZone;

    const ME: NodeNum = 0x0000_0001;

    fn at(minute: u32) -> DateTime<Local> {
        Local
            .with_ymd_and_hms(2024, 6, 1, 12, minute, 0)
            .single()
            .unwrap()
    }

    fn fixture() -> (Arc<SimulatedTransport>, Outbound, Reducer, ChatState) {
        let sim = Arc::new(SimulatedTransport::new(SimOptions {
            my_node_num: ME,
            channels: vec!["general".into(), "ops".into()],
            chatter: false,
            ack_delay: Duration::from_secs(3600),
            ..SimOptions::default()
        }));
        let store = Store::open_in_memory().unwrap();
        let outbound = Outbound::new(
            sim.clone(),
            store.clone(),
            MessagesConfig::default(),
            LimitsConfig::default(),
        );
        let reducer = Reducer::new(
            store,
            sim.clone(),
            MessagesConfig::default(),
            NodeSort::LastHeard,
            false,
        );
        let state = ChatState::new(ME, &["general".to_string(), "ops".to_string()]);
        (sim, outbound, reducer, state)
    }

    fn ack(id: u32, from: NodeNum, reason: &str) -> Packet {
        let mut packet = Packet::text(900, from, ME, 0, "");
        packet.decoded = Some(Payload::Routing {
            request_id: id,
            routing: Routing {
                error_reason: reason.into(),
            },
        });
        packet
    }

    #[test]
    fn named_channel_broadcasts_on_its_index() {
        let (sim, outbound, _, mut state) = fixture();
        let channel = ChannelId::Named("ops".into());
        outbound
            .send_text_at(&mut state, &channel, "status?", Instant::now(), at(1))
            .unwrap();
        let sent = sim.sent();
        assert_eq!(sent[0].destination, BROADCAST_NUM);
        assert_eq!(sent[0].channel_index, 1);
        assert!(sent[0].want_ack);
        let log = state.log(&channel);
        assert_eq!(log.last().unwrap().prefix, ">> Sent […]: ");
    }

    #[test]
    fn second_send_within_cooldown_is_rejected() {
        let (sim, outbound, _, mut state) = fixture();
        let channel = ChannelId::Named("general".into());
        let start = Instant::now();
        outbound
            .send_text_at(&mut state, &channel, "one", start, at(1))
            .unwrap();
        let err = outbound
            .send_text_at(&mut state, &channel, "two", start + Duration::from_secs(1), at(1))
            .unwrap_err();
        assert!(matches!(err, SendError::Cooldown { .. }));
        assert_eq!(sim.sent().len(), 1);
        assert_eq!(state.log(&channel).len(), 2);

        outbound
            .send_text_at(&mut state, &channel, "three", start + Duration::from_secs(3), at(1))
            .unwrap();
        assert_eq!(sim.sent().len(), 2);
    }

    #[test]
    fn ack_rewrites_pending_entry_in_place() {
        let (_, outbound, reducer, mut state) = fixture();
        let channel = ChannelId::Direct(0x77);
        let id = outbound
            .send_text_at(&mut state, &channel, "ping", Instant::now(), at(2))
            .unwrap();
        let before = state.log(&channel).len();
        let index = state.pending_acks[&id].index;
        assert_eq!(state.pending_acks[&id].timestamp, at(2).timestamp());

        reducer.handle_inbound_at(&mut state, ack(id, 0x77, "NONE"), at(3));
        let log = state.log(&channel);
        assert_eq!(log.len(), before);
        assert_eq!(log[index].kind, EntryKind::Sent(AckState::Acked));
        assert_eq!(log[index].prefix, ">> Sent [✓]: ");
        assert_eq!(log[index].body, "ping");
        assert!(state.pending_acks.is_empty());

        let stored = reducer.store().load_messages().unwrap();
        assert_eq!(stored[0].ack, Some(AckState::Acked));
    }

    #[test]
    fn implicit_ack_and_nak_outcomes() {
        let (_, outbound, reducer, mut state) = fixture();
        let channel = ChannelId::Named("general".into());
        let start = Instant::now();
        let first = outbound
            .send_text_at(&mut state, &channel, "a", start, at(4))
            .unwrap();
        let second = outbound
            .send_text_at(&mut state, &channel, "b", start + Duration::from_secs(5), at(4))
            .unwrap();
        reducer.handle_inbound_at(&mut state, ack(first, ME, "NONE"), at(4));
        reducer.handle_inbound_at(&mut state, ack(second, 0x99, "MAX_RETRANSMIT"), at(4));
        let log = state.log(&channel);
        assert_eq!(log[1].kind, EntryKind::Sent(AckState::Implicit));
        assert_eq!(log[2].kind, EntryKind::Sent(AckState::Nak));
        assert_eq!(log[2].prefix, ">> Sent [x]: ");
    }

    #[test]
    fn traceroute_has_its_own_cooldown() {
        let (_, outbound, _, mut state) = fixture();
        let start = Instant::now();
        let id = outbound
            .send_traceroute_at(&mut state, 0x77, start, at(5))
            .unwrap();
        assert!(state.pending_traceroutes.contains(&id));
        let log = state.log(&ChannelId::Direct(0x77));
        assert_eq!(log.last().unwrap().prefix, ">> Sent Traceroute");

        let err = outbound
            .send_traceroute_at(&mut state, 0x77, start + Duration::from_secs(10), at(5))
            .unwrap_err();
        assert!(matches!(err, SendError::Cooldown { .. }));
        assert!(outbound
            .send_text_at(&mut state, &ChannelId::Direct(0x77), "hi", start, at(5))
            .is_ok());
    }

    #[test]
    fn empty_and_unknown_channels_are_rejected() {
        let (_, outbound, _, mut state) = fixture();
        assert!(matches!(
            outbound.send_text(&mut state, &ChannelId::Named("general".into()), "  "),
            Err(SendError::Empty)
        ));
        assert!(matches!(
            outbound.send_text(&mut state, &ChannelId::Named("nope".into()), "x"),
            Err(SendError::UnknownChannel(_))
        ));
    }
}
