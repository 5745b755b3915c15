use std::collections::{BTreeMap, HashMap};
use std::io::{BufRead, BufReader, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crossbeam_channel::{bounded, unbounded, Receiver, Sender};
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use crate::mesh::{
    DeviceMetrics, NodeInfo, NodeNum, Packet, Payload, Position, RouteDiscovery, Routing, User,
    BROADCAST_NUM,
};
use crate::settings::{Changes, DeviceSnapshot};

pub const DEFAULT_PORT: u16 = 4403;
const RPC_TIMEOUT: Duration = Duration::from_secs(10);
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("could not connect to {addr}: {source}")]
    Connect {
        addr: String,
        #[source]
        source: std::io::Error,
    },
    #[error("radio link error: {0}")]
    Io(#[from] std::io::Error),
    #[error("bridge rejected {method}: {message}")]
    Rpc { method: String, message: String },
    #[error("bridge did not answer {0} in time")]
    Timeout(String),
    #[error("bridge handshake failed: {0}")]
    Handshake(String),
    #[error("connection closed")]
    Closed,
    #[error("invalid bridge message: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdminAction {
    Reboot,
    ResetNodeDb,
    Shutdown,
    FactoryReset,
}

impl AdminAction {
    pub fn method(&self) -> &'static str {
        match self {
            AdminAction::Reboot => "reboot",
            AdminAction::ResetNodeDb => "resetNodeDb",
            AdminAction::Shutdown => "shutdown",
            AdminAction::FactoryReset => "factoryReset",
        }
    }
}

/// The radio link as seen by the chat client.
pub trait Transport: Send + Sync {
    fn my_node_num(&self) -> NodeNum;
    fn nodes(&self) -> Vec<NodeInfo>;
    fn channels(&self) -> Vec<String>;
    /// Queues a text message and returns the packet id acks will refer to.
    fn send_text(
        &self,
        text: &str,
        destination: NodeNum,
        channel_index: u32,
        want_ack: bool,
    ) -> Result<u32, TransportError>;
    fn send_traceroute(
        &self,
        destination: NodeNum,
        hop_limit: u32,
        channel_index: u32,
    ) -> Result<u32, TransportError>;
    /// Hands out the inbound packet stream. Only the first caller gets it.
    fn take_events(&self) -> Option<Receiver<Packet>>;
}

/// Device configuration and node-database commands used by the settings
/// menu and the node pane.
pub trait DeviceControl: Transport {
    fn device_settings(&self) -> Result<DeviceSnapshot, TransportError>;
    fn apply_settings(&self, changes: &Changes) -> Result<(), TransportError>;
    fn admin(&self, action: AdminAction) -> Result<(), TransportError>;
    fn config_url(&self) -> Result<String, TransportError>;
    fn set_config_url(&self, url: &str) -> Result<(), TransportError>;
    fn set_favorite(&self, node: NodeNum, favorite: bool) -> Result<(), TransportError>;
    fn set_ignored(&self, node: NodeNum, ignored: bool) -> Result<(), TransportError>;
    fn remove_node(&self, node: NodeNum) -> Result<(), TransportError>;
}

pub fn changes_to_json(changes: &Changes) -> Value {
    Value::Object(
        changes
            .iter()
            .map(|(key, value)| (key.clone(), value.to_json()))
            .collect(),
    )
}

/// Splits `host[:port]`, falling back to the default bridge port.
pub fn parse_host(raw: &str) -> (String, u16) {
    match raw.rsplit_once(':') {
        Some((host, port)) if !host.is_empty() => match port.parse() {
            Ok(port) => (host.to_string(), port),
            Err(_) => (raw.to_string(), DEFAULT_PORT),
        },
        _ => (raw.to_string(), DEFAULT_PORT),
    }
}

#[derive(Debug, Default)]
struct Roster {
    my_node_num: NodeNum,
    channels: Vec<String>,
    nodes: BTreeMap<NodeNum, NodeInfo>,
}

type ReplySender = Sender<Result<Value, String>>;

/// Newline-delimited JSON link to a radio bridge process.
pub struct BridgeTransport {
    writer: Mutex<TcpStream>,
    next_id: AtomicU64,
    pending: Arc<Mutex<HashMap<u64, ReplySender>>>,
    roster: Arc<Mutex<Roster>>,
    events: Mutex<Option<Receiver<Packet>>>,
    closed: Arc<AtomicBool>,
}

impl BridgeTransport {
    pub fn connect(host: &str) -> Result<Self, TransportError> {
        let (host, port) = parse_host(host);
        let addr = format!("{host}:{port}");
        let resolved = addr
            .to_socket_addrs()
            .map_err(|source| TransportError::Connect {
                addr: addr.clone(),
                source,
            })?
            .next()
            .ok_or_else(|| TransportError::Connect {
                addr: addr.clone(),
                source: std::io::Error::new(std::io::ErrorKind::NotFound, "no address"),
            })?;
        let stream = TcpStream::connect_timeout(&resolved, CONNECT_TIMEOUT).map_err(|source| {
            TransportError::Connect {
                addr: addr.clone(),
                source,
            }
        })?;
        stream.set_nodelay(true)?;

        let mut reader = BufReader::new(stream.try_clone()?);
        stream.set_read_timeout(Some(RPC_TIMEOUT))?;
        let mut line = String::new();
        if reader.read_line(&mut line)? == 0 {
            return Err(TransportError::Closed);
        }
        stream.set_read_timeout(None)?;
        let roster = parse_hello(&line)?;
        info!(
            %addr,
            my_node = roster.my_node_num,
            nodes = roster.nodes.len(),
            "connected to radio bridge"
        );

        let (tx, rx) = unbounded();
        let transport = Self {
            writer: Mutex::new(stream),
            next_id: AtomicU64::new(1),
            pending: Arc::new(Mutex::new(HashMap::new())),
            roster: Arc::new(Mutex::new(roster)),
            events: Mutex::new(Some(rx)),
            closed: Arc::new(AtomicBool::new(false)),
        };

        let pending = Arc::clone(&transport.pending);
        let roster = Arc::clone(&transport.roster);
        let closed = Arc::clone(&transport.closed);
        thread::Builder::new()
            .name("bridge-reader".into())
            .spawn(move || {
                read_loop(reader, tx, pending, roster);
                closed.store(true, Ordering::SeqCst);
            })?;
        Ok(transport)
    }

    fn call(&self, method: &str, params: Value) -> Result<Value, TransportError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(TransportError::Closed);
        }
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = bounded(1);
        self.pending.lock().insert(id, tx);

        let mut line = serde_json::to_string(&json!({
            "id": id,
            "method": method,
            "params": params,
        }))?;
        line.push('\n');
        if let Err(err) = self.writer.lock().write_all(line.as_bytes()) {
            self.pending.lock().remove(&id);
            return Err(err.into());
        }
        debug!(id, method, "bridge request sent");

        match rx.recv_timeout(RPC_TIMEOUT) {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(message)) => Err(TransportError::Rpc {
                method: method.to_string(),
                message,
            }),
            Err(_) => {
                self.pending.lock().remove(&id);
                Err(TransportError::Timeout(method.to_string()))
            }
        }
    }

    fn call_for_id(&self, method: &str, params: Value) -> Result<u32, TransportError> {
        let reply = self.call(method, params)?;
        reply
            .get("id")
            .and_then(Value::as_u64)
            .and_then(|id| u32::try_from(id).ok())
            .ok_or_else(|| TransportError::Rpc {
                method: method.to_string(),
                message: "reply is missing a packet id".into(),
            })
    }

    fn update_node(&self, node: NodeNum, apply: impl FnOnce(&mut NodeInfo)) {
        if let Some(info) = self.roster.lock().nodes.get_mut(&node) {
            apply(info);
        }
    }
}

fn parse_hello(line: &str) -> Result<Roster, TransportError> {
    let value: Value = serde_json::from_str(line)?;
    if value.get("event").and_then(Value::as_str) != Some("hello") {
        return Err(TransportError::Handshake(
            "expected a hello event first".into(),
        ));
    }
    let my_node_num = value
        .get("myNodeNum")
        .and_then(Value::as_u64)
        .and_then(|n| u32::try_from(n).ok())
        .ok_or_else(|| TransportError::Handshake("hello is missing myNodeNum".into()))?;
    let channels = value
        .get("channels")
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default();
    let nodes: Vec<NodeInfo> = match value.get("nodes") {
        Some(raw) => serde_json::from_value(raw.clone())?,
        None => Vec::new(),
    };
    Ok(Roster {
        my_node_num,
        channels,
        nodes: nodes.into_iter().map(|n| (n.num, n)).collect(),
    })
}

fn read_loop(
    reader: BufReader<TcpStream>,
    events: Sender<Packet>,
    pending: Arc<Mutex<HashMap<u64, ReplySender>>>,
    roster: Arc<Mutex<Roster>>,
) {
    for line in reader.lines() {
        let line = match line {
            Ok(line) => line,
            Err(err) => {
                warn!(error = %err, "bridge read failed");
                break;
            }
        };
        if line.trim().is_empty() {
            continue;
        }
        let value: Value = match serde_json::from_str(&line) {
            Ok(value) => value,
            Err(err) => {
                warn!(error = %err, "dropping unparseable bridge line");
                continue;
            }
        };

        if let Some(id) = value.get("id").and_then(Value::as_u64) {
            let reply = match value.get("error") {
                Some(err) => Err(err.as_str().map(str::to_string).unwrap_or_else(|| err.to_string())),
                None => Ok(value.get("result").cloned().unwrap_or(Value::Null)),
            };
            if let Some(tx) = pending.lock().remove(&id) {
                let _ = tx.send(reply);
            }
            continue;
        }

        match value.get("event").and_then(Value::as_str) {
            Some("packet") => {
                let Some(raw) = value.get("packet") else {
                    warn!("packet event without a packet");
                    continue;
                };
                match Packet::from_json(raw) {
                    Ok(packet) => {
                        if events.send(packet).is_err() {
                            break;
                        }
                    }
                    Err(err) => warn!(error = %err, "dropping malformed packet"),
                }
            }
            Some("node") => match value
                .get("node")
                .cloned()
                .map(serde_json::from_value::<NodeInfo>)
            {
                Some(Ok(node)) => {
                    roster.lock().nodes.insert(node.num, node);
                }
                Some(Err(err)) => warn!(error = %err, "dropping malformed node update"),
                None => {}
            },
            other => debug!(event = ?other, "ignoring bridge event"),
        }
    }
    info!("radio bridge reader stopped");
}

impl Transport for BridgeTransport {
    fn my_node_num(&self) -> NodeNum {
        self.roster.lock().my_node_num
    }

    fn nodes(&self) -> Vec<NodeInfo> {
        self.roster.lock().nodes.values().cloned().collect()
    }

    fn channels(&self) -> Vec<String> {
        self.roster.lock().channels.clone()
    }

    fn send_text(
        &self,
        text: &str,
        destination: NodeNum,
        channel_index: u32,
        want_ack: bool,
    ) -> Result<u32, TransportError> {
        self.call_for_id(
            "sendText",
            json!({
                "text": text,
                "destination": destination,
                "channelIndex": channel_index,
                "wantAck": want_ack,
            }),
        )
    }

    fn send_traceroute(
        &self,
        destination: NodeNum,
        hop_limit: u32,
        channel_index: u32,
    ) -> Result<u32, TransportError> {
        self.call_for_id(
            "sendTraceroute",
            json!({
                "destination": destination,
                "hopLimit": hop_limit,
                "channelIndex": channel_index,
            }),
        )
    }

    fn take_events(&self) -> Option<Receiver<Packet>> {
        self.events.lock().take()
    }
}

impl DeviceControl for BridgeTransport {
    fn device_settings(&self) -> Result<DeviceSnapshot, TransportError> {
        let reply = self.call("getSettings", Value::Null)?;
        match reply {
            Value::Object(map) => Ok(map.into_iter().collect()),
            _ => Err(TransportError::Rpc {
                method: "getSettings".into(),
                message: "expected an object".into(),
            }),
        }
    }

    fn apply_settings(&self, changes: &Changes) -> Result<(), TransportError> {
        self.call("setSettings", json!({ "changes": changes_to_json(changes) }))?;
        Ok(())
    }

    fn admin(&self, action: AdminAction) -> Result<(), TransportError> {
        self.call("admin", json!({ "action": action.method() }))?;
        if action == AdminAction::ResetNodeDb {
            let mut roster = self.roster.lock();
            let me = roster.my_node_num;
            roster.nodes.retain(|num, _| *num == me);
        }
        Ok(())
    }

    fn config_url(&self) -> Result<String, TransportError> {
        let reply = self.call("getConfigUrl", Value::Null)?;
        Ok(reply.as_str().unwrap_or_default().to_string())
    }

    fn set_config_url(&self, url: &str) -> Result<(), TransportError> {
        self.call("setConfigUrl", json!({ "url": url }))?;
        Ok(())
    }

    fn set_favorite(&self, node: NodeNum, favorite: bool) -> Result<(), TransportError> {
        self.call("setFavorite", json!({ "node": node, "favorite": favorite }))?;
        self.update_node(node, |info| info.is_favorite = favorite);
        Ok(())
    }

    fn set_ignored(&self, node: NodeNum, ignored: bool) -> Result<(), TransportError> {
        self.call("setIgnored", json!({ "node": node, "ignored": ignored }))?;
        self.update_node(node, |info| info.is_ignored = ignored);
        Ok(())
    }

    fn remove_node(&self, node: NodeNum) -> Result<(), TransportError> {
        self.call("removeNode", json!({ "node": node }))?;
        self.roster.lock().nodes.remove(&node);
        Ok(())
    }
}

impl Drop for BridgeTransport {
    fn drop(&mut self) {
        let _ = self.writer.lock().shutdown(std::net::Shutdown::Both);
    }
}

const SIM_NODE_BASE: NodeNum = 0x5EED_0000;

const SIM_NAMES: &[(&str, &str)] = &[
    ("Ridge Relay", "RDGE"),
    ("Harbor Base", "HRBR"),
    ("Valley Rover", "VLLY"),
    ("Summit Node", "SMMT"),
    ("Creek Camp", "CRK"),
    ("Forest Post", "FRST"),
    ("Mesa Point", "MESA"),
    ("Dune Hut", "DUNE"),
];

const SIM_CHATTER: &[&str] = &[
    "anyone copy?",
    "signal is solid up here",
    "battery holding at 60%",
    "heading back to base",
    "weather turning, packing up",
    "relay is up on the ridge",
    "testing 1 2 3",
    "see you at the trailhead",
];

#[derive(Debug, Clone)]
pub struct SimOptions {
    pub my_node_num: NodeNum,
    pub channels: Vec<String>,
    pub node_count: usize,
    pub chatter: bool,
    pub chatter_interval: Duration,
    pub ack_delay: Duration,
    pub nak_rate: f64,
    pub seed: Option<u64>,
}

impl Default for SimOptions {
    fn default() -> Self {
        Self {
            my_node_num: 0x5EED_FFFF,
            channels: vec!["LongFast".to_string()],
            node_count: 6,
            chatter: true,
            chatter_interval: Duration::from_secs(8),
            ack_delay: Duration::from_millis(1500),
            nak_rate: 0.1,
            seed: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentText {
    pub id: u32,
    pub text: String,
    pub destination: NodeNum,
    pub channel_index: u32,
    pub want_ack: bool,
}

struct SimShared {
    options: SimOptions,
    nodes: Mutex<BTreeMap<NodeNum, NodeInfo>>,
    rng: Mutex<StdRng>,
    next_id: AtomicU32,
    stop: AtomicBool,
}

/// In-process mesh used by `--demo` and the test suite.
pub struct SimulatedTransport {
    shared: Arc<SimShared>,
    tx: Sender<Packet>,
    rx: Mutex<Option<Receiver<Packet>>>,
    sent: Mutex<Vec<SentText>>,
    settings: Mutex<DeviceSnapshot>,
    config_url: Mutex<String>,
}

impl SimulatedTransport {
    pub fn new(options: SimOptions) -> Self {
        let rng = match options.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        let now = chrono::Utc::now().timestamp();
        let mut nodes = BTreeMap::new();
        nodes.insert(
            options.my_node_num,
            NodeInfo {
                num: options.my_node_num,
                user: Some(User {
                    id: crate::mesh::node_id(options.my_node_num),
                    long_name: "Demo Station".into(),
                    short_name: "DEMO".into(),
                    hw_model: "TBEAM".into(),
                    role: "CLIENT".into(),
                    public_key: String::new(),
                }),
                last_heard: Some(now),
                hops_away: Some(0),
                device_metrics: Some(DeviceMetrics {
                    battery_level: Some(87),
                    voltage: Some(4.05),
                    channel_utilization: Some(3.2),
                    air_util_tx: Some(0.8),
                    uptime_seconds: Some(5400),
                }),
                ..NodeInfo::default()
            },
        );
        for (idx, (long, short)) in SIM_NAMES.iter().take(options.node_count).enumerate() {
            let num = SIM_NODE_BASE + idx as NodeNum;
            nodes.insert(
                num,
                NodeInfo {
                    num,
                    user: Some(User {
                        id: crate::mesh::node_id(num),
                        long_name: long.to_string(),
                        short_name: short.to_string(),
                        hw_model: "HELTEC_V3".into(),
                        role: "CLIENT".into(),
                        public_key: String::new(),
                    }),
                    last_heard: Some(now - 90 * (idx as i64 + 1)),
                    hops_away: Some(idx as u32 % 3),
                    snr: Some(10.0 - 2.5 * idx as f32),
                    ..NodeInfo::default()
                },
            );
        }

        let settings = default_snapshot(&options);
        let (tx, rx) = unbounded();
        let shared = Arc::new(SimShared {
            options,
            nodes: Mutex::new(nodes),
            rng: Mutex::new(rng),
            next_id: AtomicU32::new(1),
            stop: AtomicBool::new(false),
        });

        if shared.options.chatter {
            let shared = Arc::clone(&shared);
            let tx = tx.clone();
            let spawned = thread::Builder::new()
                .name("sim-chatter".into())
                .spawn(move || chatter_loop(shared, tx));
            if let Err(err) = spawned {
                warn!(error = %err, "could not start simulated chatter");
            }
        }

        Self {
            shared,
            tx,
            rx: Mutex::new(Some(rx)),
            sent: Mutex::new(Vec::new()),
            settings: Mutex::new(settings),
            config_url: Mutex::new("https://meshtastic.org/e/#CgMSAQESCAgBOAFAA0gB".into()),
        }
    }

    pub fn sent(&self) -> Vec<SentText> {
        self.sent.lock().clone()
    }

    /// Injects a packet as if it had arrived from the radio.
    pub fn deliver(&self, packet: Packet) {
        let _ = self.tx.send(packet);
    }

    fn next_packet_id(&self) -> u32 {
        self.shared.next_id.fetch_add(1, Ordering::SeqCst)
    }

    fn after_delay(&self, packet: Packet) {
        let delay = self.shared.options.ack_delay;
        let tx = self.tx.clone();
        let spawned = thread::Builder::new()
            .name("sim-reply".into())
            .spawn(move || {
                thread::sleep(delay);
                let _ = tx.send(packet);
            });
        if let Err(err) = spawned {
            warn!(error = %err, "could not schedule simulated reply");
        }
    }

    fn relay_nodes(&self, count: usize) -> Vec<NodeNum> {
        let me = self.shared.options.my_node_num;
        let candidates: Vec<NodeNum> = self
            .shared
            .nodes
            .lock()
            .keys()
            .copied()
            .filter(|num| *num != me)
            .collect();
        let mut rng = self.shared.rng.lock();
        candidates
            .choose_multiple(&mut *rng, count)
            .copied()
            .collect()
    }
}

impl Drop for SimulatedTransport {
    fn drop(&mut self) {
        self.shared.stop.store(true, Ordering::SeqCst);
    }
}

fn default_snapshot(options: &SimOptions) -> DeviceSnapshot {
    let mut snapshot = DeviceSnapshot::new();
    let mut put = |key: &str, value: Value| {
        snapshot.insert(key.to_string(), value);
    };
    put("user.longName", json!("Demo Station"));
    put("user.shortName", json!("DEMO"));
    put("user.isLicensed", json!(false));
    for (idx, name) in options.channels.iter().enumerate() {
        put(&format!("channels.{idx}.name"), json!(name));
        put(&format!("channels.{idx}.psk"), json!("AQ=="));
        put(&format!("channels.{idx}.uplink_enabled"), json!(false));
        put(&format!("channels.{idx}.downlink_enabled"), json!(false));
    }
    put("config.device.role", json!("CLIENT"));
    put("config.lora.region", json!("US"));
    put("config.lora.modem_preset", json!("LONG_FAST"));
    put("config.lora.hop_limit", json!(3));
    put("config.lora.tx_enabled", json!(true));
    put("config.position.fixed_position", json!(false));
    put("config.network.wifi_enabled", json!(false));
    put("config.network.ipv4_config.ip", json!(0));
    put("config.display.screen_on_secs", json!(60));
    put("config.bluetooth.enabled", json!(true));
    put("config.security.admin_key", json!([]));
    put("module.mqtt.enabled", json!(false));
    put("module.canned_message.messages", json!(["ok", "on my way"]));
    snapshot
}

fn chatter_loop(shared: Arc<SimShared>, tx: Sender<Packet>) {
    let interval = shared.options.chatter_interval;
    while !shared.stop.load(Ordering::SeqCst) {
        thread::sleep(interval);
        if shared.stop.load(Ordering::SeqCst) {
            break;
        }
        let me = shared.options.my_node_num;
        let peers: Vec<NodeNum> = shared
            .nodes
            .lock()
            .keys()
            .copied()
            .filter(|num| *num != me)
            .collect();
        let packet = {
            let mut rng = shared.rng.lock();
            let Some(&from) = peers.choose(&mut *rng) else {
                continue;
            };
            let id = shared.next_id.fetch_add(1, Ordering::SeqCst);
            let roll: f64 = rng.gen();
            let mut packet = if roll < 0.55 {
                let text = SIM_CHATTER.choose(&mut *rng).copied().unwrap_or("ping");
                Packet::text(id, from, BROADCAST_NUM, 0, text)
            } else if roll < 0.75 {
                let text = SIM_CHATTER.choose(&mut *rng).copied().unwrap_or("ping");
                Packet::text(id, from, me, 0, text)
            } else if roll < 0.9 {
                let mut packet = Packet::text(id, from, BROADCAST_NUM, 0, "");
                packet.decoded = Some(Payload::Position(Position {
                    latitude: Some(45.5 + rng.gen_range(-0.05..0.05)),
                    longitude: Some(-122.6 + rng.gen_range(-0.05..0.05)),
                    altitude: Some(rng.gen_range(20..400)),
                }));
                packet
            } else {
                let mut packet = Packet::text(id, from, BROADCAST_NUM, 0, "");
                packet.decoded = Some(Payload::Telemetry(DeviceMetrics {
                    battery_level: Some(rng.gen_range(20..100)),
                    ..DeviceMetrics::default()
                }));
                packet
            };
            packet.rx_snr = Some(rng.gen_range(-10.0..12.0));
            packet
        };

        if let Some(node) = shared.nodes.lock().get_mut(&packet.from) {
            node.last_heard = Some(chrono::Utc::now().timestamp());
            node.snr = packet.rx_snr;
        }
        if tx.send(packet).is_err() {
            break;
        }
    }
    debug!("simulated chatter stopped");
}

impl Transport for SimulatedTransport {
    fn my_node_num(&self) -> NodeNum {
        self.shared.options.my_node_num
    }

    fn nodes(&self) -> Vec<NodeInfo> {
        self.shared.nodes.lock().values().cloned().collect()
    }

    fn channels(&self) -> Vec<String> {
        self.shared.options.channels.clone()
    }

    fn send_text(
        &self,
        text: &str,
        destination: NodeNum,
        channel_index: u32,
        want_ack: bool,
    ) -> Result<u32, TransportError> {
        let id = self.next_packet_id();
        self.sent.lock().push(SentText {
            id,
            text: text.to_string(),
            destination,
            channel_index,
            want_ack,
        });
        debug!(id, destination, channel_index, "simulated send");

        if want_ack {
            let me = self.shared.options.my_node_num;
            let nak = self.shared.rng.lock().gen_bool(self.shared.options.nak_rate.clamp(0.0, 1.0));
            let from = if destination == BROADCAST_NUM { me } else { destination };
            let mut reply = Packet::text(self.next_packet_id(), from, me, channel_index, "");
            reply.decoded = Some(Payload::Routing {
                request_id: id,
                routing: Routing {
                    error_reason: if nak { "MAX_RETRANSMIT".into() } else { "NONE".into() },
                },
            });
            self.after_delay(reply);
        }
        Ok(id)
    }

    fn send_traceroute(
        &self,
        destination: NodeNum,
        hop_limit: u32,
        channel_index: u32,
    ) -> Result<u32, TransportError> {
        let id = self.next_packet_id();
        let me = self.shared.options.my_node_num;
        let hops = (hop_limit as usize).min(2);
        let route: Vec<NodeNum> = self
            .relay_nodes(hops + 1)
            .into_iter()
            .filter(|num| *num != destination)
            .take(hops)
            .collect();
        let (snr_towards, snr_back) = {
            let mut rng = self.shared.rng.lock();
            let towards = (0..=route.len()).map(|_| rng.gen_range(-40..48)).collect();
            let back = (0..=route.len()).map(|_| rng.gen_range(-40..48)).collect();
            (towards, back)
        };
        let mut route_back = route.clone();
        route_back.reverse();

        let mut reply = Packet::text(self.next_packet_id(), destination, me, channel_index, "");
        reply.hop_start = Some(hop_limit);
        reply.decoded = Some(Payload::Traceroute {
            request_id: Some(id),
            route: RouteDiscovery {
                route,
                snr_towards,
                route_back,
                snr_back,
            },
        });
        self.after_delay(reply);
        Ok(id)
    }

    fn take_events(&self) -> Option<Receiver<Packet>> {
        self.rx.lock().take()
    }
}

impl DeviceControl for SimulatedTransport {
    fn device_settings(&self) -> Result<DeviceSnapshot, TransportError> {
        Ok(self.settings.lock().clone())
    }

    fn apply_settings(&self, changes: &Changes) -> Result<(), TransportError> {
        let mut settings = self.settings.lock();
        for (key, value) in changes {
            settings.insert(key.clone(), value.to_json());
        }
        let me = self.shared.options.my_node_num;
        if let Some(user) = self
            .shared
            .nodes
            .lock()
            .get_mut(&me)
            .and_then(|node| node.user.as_mut())
        {
            if let Some(Value::String(name)) = settings.get("user.longName") {
                user.long_name = name.clone();
            }
            if let Some(Value::String(name)) = settings.get("user.shortName") {
                user.short_name = name.clone();
            }
        }
        info!(count = changes.len(), "applied simulated settings");
        Ok(())
    }

    fn admin(&self, action: AdminAction) -> Result<(), TransportError> {
        info!(action = action.method(), "simulated admin command");
        match action {
            AdminAction::ResetNodeDb => {
                let me = self.shared.options.my_node_num;
                self.shared.nodes.lock().retain(|num, _| *num == me);
            }
            AdminAction::FactoryReset => {
                *self.settings.lock() = default_snapshot(&self.shared.options);
            }
            AdminAction::Reboot | AdminAction::Shutdown => {}
        }
        Ok(())
    }

    fn config_url(&self) -> Result<String, TransportError> {
        Ok(self.config_url.lock().clone())
    }

    fn set_config_url(&self, url: &str) -> Result<(), TransportError> {
        *self.config_url.lock() = url.to_string();
        Ok(())
    }

    fn set_favorite(&self, node: NodeNum, favorite: bool) -> Result<(), TransportError> {
        if let Some(info) = self.shared.nodes.lock().get_mut(&node) {
            info.is_favorite = favorite;
        }
        Ok(())
    }

    fn set_ignored(&self, node: NodeNum, ignored: bool) -> Result<(), TransportError> {
        if let Some(info) = self.shared.nodes.lock().get_mut(&node) {
            info.is_ignored = ignored;
        }
        Ok(())
    }

    fn remove_node(&self, node: NodeNum) -> Result<(), TransportError> {
        self.shared.nodes.lock().remove(&node);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::FieldValue;
    use std::io::{BufRead, BufReader, Write};
    use std::net::TcpListener;

    fn quiet() -> SimulatedTransport {
        SimulatedTransport::new(SimOptions {
            my_node_num: 0x10,
            chatter: false,
            ack_delay: Duration::from_millis(10),
            nak_rate: 0.0,
            seed: Some(7),
            ..SimOptions::default()
        })
    }

    #[test]
    fn host_parsing_defaults_port() {
        assert_eq!(parse_host("radio.local"), ("radio.local".into(), DEFAULT_PORT));
        assert_eq!(parse_host("10.0.0.2:9000"), ("10.0.0.2".into(), 9000));
    }

    #[test]
    fn sim_roster_includes_own_node() {
        let sim = quiet();
        let nodes = sim.nodes();
        assert_eq!(nodes.len(), 7);
        assert!(nodes.iter().any(|n| n.num == 0x10));
    }

    #[test]
    fn sim_acks_direct_messages() {
        let sim = quiet();
        let events = sim.take_events().unwrap();
        assert!(sim.take_events().is_none());
        let dest = SIM_NODE_BASE + 1;
        let id = sim.send_text("hi", dest, 0, true).unwrap();
        let reply = events.recv_timeout(Duration::from_secs(2)).unwrap();
        assert_eq!(reply.from, dest);
        match reply.decoded {
            Some(Payload::Routing { request_id, routing }) => {
                assert_eq!(request_id, id);
                assert!(routing.is_success());
            }
            other => panic!("unexpected payload {other:?}"),
        }
        assert_eq!(sim.sent()[0].text, "hi");
    }

    #[test]
    fn sim_answers_traceroutes() {
        let sim = quiet();
        let events = sim.take_events().unwrap();
        let dest = SIM_NODE_BASE + 2;
        let id = sim.send_traceroute(dest, 3, 0).unwrap();
        let reply = events.recv_timeout(Duration::from_secs(2)).unwrap();
        match reply.decoded {
            Some(Payload::Traceroute { request_id, route }) => {
                assert_eq!(request_id, Some(id));
                assert_eq!(route.snr_towards.len(), route.route.len() + 1);
            }
            other => panic!("unexpected payload {other:?}"),
        }
    }

    #[test]
    fn sim_applies_settings_and_node_flags() {
        let sim = quiet();
        let mut changes = Changes::new();
        changes.insert("user.longName".into(), FieldValue::Text("Base Camp".into()));
        sim.apply_settings(&changes).unwrap();
        assert_eq!(
            sim.device_settings().unwrap().get("user.longName"),
            Some(&json!("Base Camp"))
        );
        let me = sim.nodes().into_iter().find(|n| n.num == 0x10).unwrap();
        assert_eq!(me.long_name(), Some("Base Camp"));

        sim.set_favorite(SIM_NODE_BASE, true).unwrap();
        assert!(sim.nodes().iter().any(|n| n.num == SIM_NODE_BASE && n.is_favorite));
        sim.admin(AdminAction::ResetNodeDb).unwrap();
        assert_eq!(sim.nodes().len(), 1);
    }

    #[test]
    fn bridge_handshake_and_rpc() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let server = thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            writeln!(
                stream,
                r#"{{"event":"hello","myNodeNum":16,"channels":["LongFast"],"nodes":[{{"num":16}}]}}"#
            )
            .unwrap();
            writeln!(
                stream,
                r#"{{"event":"packet","packet":{{"id":9,"from":32,"to":16,"decoded":{{"portnum":"TEXT_MESSAGE_APP","text":"yo"}}}}}}"#
            )
            .unwrap();
            writeln!(stream, r#"{{"event":"packet","packet":{{"id":10}}}}"#).unwrap();
            let mut reader = BufReader::new(stream.try_clone().unwrap());
            let mut line = String::new();
            reader.read_line(&mut line).unwrap();
            let request: Value = serde_json::from_str(&line).unwrap();
            assert_eq!(request["method"], "sendText");
            writeln!(
                stream,
                r#"{{"id":{},"result":{{"id":1234}}}}"#,
                request["id"]
            )
            .unwrap();
            line.clear();
            let _ = reader.read_line(&mut line);
        });

        let bridge = BridgeTransport::connect(&format!("127.0.0.1:{port}")).unwrap();
        assert_eq!(bridge.my_node_num(), 16);
        assert_eq!(bridge.channels(), vec!["LongFast".to_string()]);
        let events = bridge.take_events().unwrap();
        let packet = events.recv_timeout(Duration::from_secs(2)).unwrap();
        assert_eq!(packet.decoded, Some(Payload::Text("yo".into())));
        assert_eq!(bridge.send_text("hello", 32, 0, true).unwrap(), 1234);
        assert!(events.try_recv().is_err());
        drop(bridge);
        server.join().unwrap();
    }
}
