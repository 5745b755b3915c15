use serde::{Deserialize, Serialize};
use serde_json::Value;

pub type NodeNum = u32;

pub const BROADCAST_NUM: NodeNum = 0xFFFF_FFFF;
pub const UNKNOWN_SNR: i32 = -128;

pub fn node_id(num: NodeNum) -> String {
    format!("!{num:08x}")
}

#[derive(Debug, thiserror::Error)]
pub enum PacketError {
    #[error("packet is missing required field `{0}`")]
    MissingField(&'static str),
    #[error("packet is not a JSON object")]
    NotAnObject,
    #[error("invalid packet json: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct User {
    pub id: String,
    pub long_name: String,
    pub short_name: String,
    pub hw_model: String,
    pub role: String,
    pub public_key: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Position {
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub altitude: Option<i32>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DeviceMetrics {
    pub battery_level: Option<u32>,
    pub voltage: Option<f32>,
    pub channel_utilization: Option<f32>,
    pub air_util_tx: Option<f32>,
    pub uptime_seconds: Option<u64>,
}

/// A roster entry as reported by the device's node database.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct NodeInfo {
    pub num: NodeNum,
    pub user: Option<User>,
    pub last_heard: Option<i64>,
    pub hops_away: Option<u32>,
    pub snr: Option<f32>,
    pub is_favorite: bool,
    pub is_ignored: bool,
    pub position: Option<Position>,
    pub device_metrics: Option<DeviceMetrics>,
}

impl NodeInfo {
    pub fn long_name(&self) -> Option<&str> {
        self.user
            .as_ref()
            .map(|u| u.long_name.as_str())
            .filter(|name| !name.is_empty())
    }

    pub fn short_name(&self) -> Option<&str> {
        self.user
            .as_ref()
            .map(|u| u.short_name.as_str())
            .filter(|name| !name.is_empty())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RouteDiscovery {
    pub route: Vec<NodeNum>,
    pub snr_towards: Vec<i32>,
    pub route_back: Vec<NodeNum>,
    pub snr_back: Vec<i32>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Routing {
    pub error_reason: String,
}

impl Routing {
    pub fn is_success(&self) -> bool {
        self.error_reason.is_empty() || self.error_reason == "NONE"
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    Text(String),
    NodeInfo(User),
    Routing {
        request_id: u32,
        routing: Routing,
    },
    Traceroute {
        request_id: Option<u32>,
        route: RouteDiscovery,
    },
    Position(Position),
    Telemetry(DeviceMetrics),
    Other {
        port: String,
    },
    Malformed {
        port: String,
        reason: String,
    },
}

impl Payload {
    pub fn port_name(&self) -> &str {
        match self {
            Payload::Text(_) => "TEXT_MESSAGE_APP",
            Payload::NodeInfo(_) => "NODEINFO_APP",
            Payload::Routing { .. } => "ROUTING_APP",
            Payload::Traceroute { .. } => "TRACEROUTE_APP",
            Payload::Position(_) => "POSITION_APP",
            Payload::Telemetry(_) => "TELEMETRY_APP",
            Payload::Other { port } | Payload::Malformed { port, .. } => port,
        }
    }

    /// One-line description for the packet log.
    pub fn summary(&self) -> String {
        match self {
            Payload::Text(text) => text.replace('\n', " "),
            Payload::NodeInfo(user) => format!("{} ({})", user.long_name, user.short_name),
            Payload::Routing { request_id, routing } => {
                format!("req {request_id} {}", routing.error_reason)
            }
            Payload::Traceroute { route, .. } => format!("{} hops", route.route.len()),
            Payload::Position(pos) => format!(
                "{:.5},{:.5}",
                pos.latitude.unwrap_or_default(),
                pos.longitude.unwrap_or_default()
            ),
            Payload::Telemetry(metrics) => match metrics.battery_level {
                Some(level) => format!("battery {level}%"),
                None => "telemetry".to_string(),
            },
            Payload::Other { .. } => String::new(),
            Payload::Malformed { reason, .. } => format!("malformed: {reason}"),
        }
    }
}

/// An inbound event after the transport adapter has normalized it.
#[derive(Debug, Clone, PartialEq)]
pub struct Packet {
    pub id: u32,
    pub from: NodeNum,
    pub to: NodeNum,
    pub channel: u32,
    pub hop_start: Option<u32>,
    pub rx_snr: Option<f32>,
    pub decoded: Option<Payload>,
}

impl Packet {
    pub fn text(id: u32, from: NodeNum, to: NodeNum, channel: u32, body: &str) -> Self {
        Self {
            id,
            from,
            to,
            channel,
            hop_start: None,
            rx_snr: None,
            decoded: Some(Payload::Text(body.to_string())),
        }
    }

    pub fn port_name(&self) -> &str {
        self.decoded
            .as_ref()
            .map(Payload::port_name)
            .unwrap_or("ENCRYPTED")
    }

    /// Adapts a dictionary-shaped packet into the typed representation.
    /// Header fields are required; a payload that fails to decode is kept
    /// as `Payload::Malformed` so it still shows up in the packet log.
    pub fn from_json(value: &Value) -> Result<Self, PacketError> {
        let obj = value.as_object().ok_or(PacketError::NotAnObject)?;
        let from = read_u32(obj.get("from")).ok_or(PacketError::MissingField("from"))?;
        let to = read_u32(obj.get("to")).ok_or(PacketError::MissingField("to"))?;
        let id = read_u32(obj.get("id")).unwrap_or_default();
        let channel = read_u32(obj.get("channel")).unwrap_or_default();
        let hop_start = read_u32(obj.get("hopStart"));
        let rx_snr = obj.get("rxSnr").and_then(Value::as_f64).map(|v| v as f32);
        let decoded = obj.get("decoded").map(decode_payload);

        Ok(Self {
            id,
            from,
            to,
            channel,
            hop_start,
            rx_snr,
            decoded,
        })
    }

    pub fn from_json_str(raw: &str) -> Result<Self, PacketError> {
        let value: Value = serde_json::from_str(raw)?;
        Self::from_json(&value)
    }

    pub fn to_json(&self) -> Value {
        let mut obj = serde_json::Map::new();
        obj.insert("id".into(), self.id.into());
        obj.insert("from".into(), self.from.into());
        obj.insert("to".into(), self.to.into());
        obj.insert("channel".into(), self.channel.into());
        if let Some(hop_start) = self.hop_start {
            obj.insert("hopStart".into(), hop_start.into());
        }
        if let Some(payload) = &self.decoded {
            obj.insert("decoded".into(), encode_payload(payload));
        }
        Value::Object(obj)
    }
}

fn read_u32(value: Option<&Value>) -> Option<u32> {
    value
        .and_then(Value::as_u64)
        .and_then(|n| u32::try_from(n).ok())
}

fn decode_payload(decoded: &Value) -> Payload {
    let port = decoded
        .get("portnum")
        .and_then(Value::as_str)
        .unwrap_or("UNKNOWN_APP")
        .to_string();

    let result: Result<Payload, String> = match port.as_str() {
        "TEXT_MESSAGE_APP" => decoded
            .get("text")
            .and_then(Value::as_str)
            .map(|text| Payload::Text(text.to_string()))
            .ok_or_else(|| "missing text".to_string()),
        "NODEINFO_APP" => field::<User>(decoded, "user").map(Payload::NodeInfo),
        "ROUTING_APP" => match read_u32(decoded.get("requestId")) {
            Some(request_id) => field::<Routing>(decoded, "routing")
                .map(|routing| Payload::Routing { request_id, routing }),
            None => Err("missing requestId".to_string()),
        },
        "TRACEROUTE_APP" => {
            field::<RouteDiscovery>(decoded, "traceroute").map(|route| Payload::Traceroute {
                request_id: read_u32(decoded.get("requestId")),
                route,
            })
        }
        "POSITION_APP" => field::<Position>(decoded, "position").map(Payload::Position),
        "TELEMETRY_APP" => decoded
            .get("telemetry")
            .and_then(|t| t.get("deviceMetrics"))
            .map(|m| serde_json::from_value::<DeviceMetrics>(m.clone()))
            .unwrap_or_else(|| Ok(DeviceMetrics::default()))
            .map(Payload::Telemetry)
            .map_err(|err| err.to_string()),
        _ => Ok(Payload::Other { port: port.clone() }),
    };

    result.unwrap_or_else(|reason| Payload::Malformed { port, reason })
}

fn field<T: serde::de::DeserializeOwned>(decoded: &Value, key: &str) -> Result<T, String> {
    let value = decoded
        .get(key)
        .ok_or_else(|| format!("missing {key}"))?;
    serde_json::from_value(value.clone()).map_err(|err| err.to_string())
}

fn encode_payload(payload: &Payload) -> Value {
    let port = payload.port_name().to_string();
    let mut obj = serde_json::Map::new();
    obj.insert("portnum".into(), Value::String(port));
    let extra = match payload {
        Payload::Text(text) => Some(("text", Value::String(text.clone()))),
        Payload::NodeInfo(user) => serde_json::to_value(user).ok().map(|v| ("user", v)),
        Payload::Routing { request_id, routing } => {
            obj.insert("requestId".into(), (*request_id).into());
            serde_json::to_value(routing).ok().map(|v| ("routing", v))
        }
        Payload::Traceroute { request_id, route } => {
            if let Some(request_id) = request_id {
                obj.insert("requestId".into(), (*request_id).into());
            }
            serde_json::to_value(route).ok().map(|v| ("traceroute", v))
        }
        Payload::Position(pos) => serde_json::to_value(pos).ok().map(|v| ("position", v)),
        Payload::Telemetry(metrics) => serde_json::to_value(metrics)
            .ok()
            .map(|v| ("telemetry", serde_json::json!({ "deviceMetrics": v }))),
        Payload::Other { .. } | Payload::Malformed { .. } => None,
    };
    if let Some((key, value)) = extra {
        obj.insert(key.into(), value);
    }
    Value::Object(obj)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn adapts_text_packet() {
        let packet = Packet::from_json(&json!({
            "id": 7,
            "from": 0xAABBCCDDu32,
            "to": 1,
            "decoded": {"portnum": "TEXT_MESSAGE_APP", "text": "hello"}
        }))
        .unwrap();
        assert_eq!(packet.from, 0xAABBCCDD);
        assert_eq!(packet.channel, 0);
        assert_eq!(packet.decoded, Some(Payload::Text("hello".into())));
    }

    #[test]
    fn missing_header_is_an_error() {
        let err = Packet::from_json(&json!({"to": 1})).unwrap_err();
        assert!(matches!(err, PacketError::MissingField("from")));
    }

    #[test]
    fn undecodable_payload_is_marked_malformed() {
        let packet = Packet::from_json(&json!({
            "from": 2,
            "to": 1,
            "decoded": {"portnum": "ROUTING_APP", "routing": {}}
        }))
        .unwrap();
        match packet.decoded {
            Some(Payload::Malformed { port, reason }) => {
                assert_eq!(port, "ROUTING_APP");
                assert!(reason.contains("requestId"));
            }
            other => panic!("unexpected payload {other:?}"),
        }
    }

    #[test]
    fn encrypted_packet_has_no_payload() {
        let packet = Packet::from_json(&json!({"from": 2, "to": 1, "encrypted": "abc"})).unwrap();
        assert!(packet.decoded.is_none());
        assert_eq!(packet.port_name(), "ENCRYPTED");
    }

    #[test]
    fn traceroute_survives_json_boundary() {
        let packet = Packet {
            id: 3,
            from: 5,
            to: 1,
            channel: 0,
            hop_start: Some(3),
            rx_snr: None,
            decoded: Some(Payload::Traceroute {
                request_id: Some(99),
                route: RouteDiscovery {
                    route: vec![7],
                    snr_towards: vec![20, 24],
                    route_back: vec![],
                    snr_back: vec![12],
                },
            }),
        };
        let back = Packet::from_json(&packet.to_json()).unwrap();
        assert_eq!(back, packet);
    }

    #[test]
    fn node_id_is_hex() {
        assert_eq!(node_id(0xAABBCCDD), "!aabbccdd");
    }
}
