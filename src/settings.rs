use std::collections::BTreeMap;
use std::fmt;
use std::net::Ipv4Addr;

use anyhow::{Context, Result};
use base64::Engine as _;
use serde_json::Value;
use tracing::warn;

use crate::config::{self, Config};
use crate::transport::AdminAction;

pub const ROOT_LABEL: &str = "Main Menu";
pub const SAVE_LABEL: &str = "Save Changes";
pub const NOT_SET: &str = "Not Set";
pub const MAX_CHANNELS: usize = 8;

/// Flat device configuration keyed by dotted path, as reported by the radio.
pub type DeviceSnapshot = BTreeMap<String, Value>;

/// Accepted edits keyed by dotted path, waiting to be flushed.
pub type Changes = BTreeMap<String, FieldValue>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    Bool,
    Enum(&'static [&'static str]),
    Fixed32,
    UInt,
    Int,
    Float,
    Text,
    AdminKeys,
    Repeated,
}

#[derive(Debug, Clone, Copy)]
pub struct FieldSpec {
    pub name: &'static str,
    pub kind: FieldKind,
}

const fn f(name: &'static str, kind: FieldKind) -> FieldSpec {
    FieldSpec { name, kind }
}

#[derive(Debug, Clone, Copy)]
pub struct SectionSpec {
    pub name: &'static str,
    pub fields: &'static [FieldSpec],
}

use FieldKind::{AdminKeys, Bool, Fixed32, Float, Int, Repeated, Text, UInt};

const ROLES: &[&str] = &[
    "CLIENT",
    "CLIENT_MUTE",
    "ROUTER",
    "ROUTER_CLIENT",
    "REPEATER",
    "TRACKER",
    "SENSOR",
    "TAK",
    "CLIENT_HIDDEN",
    "LOST_AND_FOUND",
    "TAK_TRACKER",
];
const REBROADCAST_MODES: &[&str] = &[
    "ALL",
    "ALL_SKIP_DECODING",
    "LOCAL_ONLY",
    "KNOWN_ONLY",
    "NONE",
    "CORE_PORTNUMS_ONLY",
];
const GPS_MODES: &[&str] = &["DISABLED", "ENABLED", "NOT_PRESENT"];
const ADDRESS_MODES: &[&str] = &["DHCP", "STATIC"];
const GPS_FORMATS: &[&str] = &["DEC", "DMS", "UTM", "MGRS", "OLC", "OSGR"];
const UNITS: &[&str] = &["METRIC", "IMPERIAL"];
const OLED_TYPES: &[&str] = &["OLED_AUTO", "OLED_SSD1306", "OLED_SH1106", "OLED_SH1107"];
const DISPLAY_MODES: &[&str] = &["DEFAULT", "TWOCOLOR", "INVERTED", "COLOR"];
pub const MODEM_PRESETS: &[&str] = &[
    "LONG_FAST",
    "LONG_SLOW",
    "VERY_LONG_SLOW",
    "MEDIUM_SLOW",
    "MEDIUM_FAST",
    "SHORT_SLOW",
    "SHORT_FAST",
    "LONG_MODERATE",
    "SHORT_TURBO",
];
pub const REGIONS: &[&str] = &[
    "UNSET", "US", "EU_433", "EU_868", "CN", "JP", "ANZ", "KR", "TW", "RU", "IN", "NZ_865", "TH",
    "LORA_24", "UA_433", "UA_868", "MY_433", "MY_919", "SG_923",
];
const BT_MODES: &[&str] = &["RANDOM_PIN", "FIXED_PIN", "NO_PIN"];
const SERIAL_BAUDS: &[&str] = &[
    "BAUD_DEFAULT",
    "BAUD_1200",
    "BAUD_2400",
    "BAUD_4800",
    "BAUD_9600",
    "BAUD_19200",
    "BAUD_38400",
    "BAUD_57600",
    "BAUD_115200",
    "BAUD_230400",
    "BAUD_460800",
    "BAUD_576000",
    "BAUD_921600",
];
const SERIAL_MODES: &[&str] = &["DEFAULT", "SIMPLE", "PROTO", "TEXTMSG", "NMEA", "CALTOPO"];
const TRIGGER_TYPES: &[&str] = &[
    "LOGIC_LOW",
    "LOGIC_HIGH",
    "FALLING_EDGE",
    "RISING_EDGE",
    "EITHER_EDGE_ACTIVE_LOW",
    "EITHER_EDGE_ACTIVE_HIGH",
];

pub const USER_FIELDS: &[FieldSpec] = &[
    f("longName", Text),
    f("shortName", Text),
    f("isLicensed", Bool),
];

pub const POSITION_FIELDS: &[FieldSpec] =
    &[f("latitude", Float), f("longitude", Float), f("altitude", Int)];

pub const CHANNEL_FIELDS: &[FieldSpec] = &[
    f("name", Text),
    f("psk", Text),
    f("uplink_enabled", Bool),
    f("downlink_enabled", Bool),
    f("module_settings.position_precision", UInt),
    f("module_settings.is_client_muted", Bool),
];

pub const RADIO_SECTIONS: &[SectionSpec] = &[
    SectionSpec {
        name: "device",
        fields: &[
            f("role", FieldKind::Enum(ROLES)),
            f("serial_enabled", Bool),
            f("button_gpio", UInt),
            f("buzzer_gpio", UInt),
            f("rebroadcast_mode", FieldKind::Enum(REBROADCAST_MODES)),
            f("node_info_broadcast_secs", UInt),
            f("double_tap_as_button_press", Bool),
            f("disable_triple_click", Bool),
            f("tzdef", Text),
            f("led_heartbeat_disabled", Bool),
        ],
    },
    SectionSpec {
        name: "position",
        fields: &[
            f("position_broadcast_secs", UInt),
            f("position_broadcast_smart_enabled", Bool),
            f("fixed_position", Bool),
            f("gps_update_interval", UInt),
            f("position_flags", UInt),
            f("rx_gpio", UInt),
            f("tx_gpio", UInt),
            f("broadcast_smart_minimum_distance", UInt),
            f("broadcast_smart_minimum_interval_secs", UInt),
            f("gps_en_gpio", UInt),
            f("gps_mode", FieldKind::Enum(GPS_MODES)),
        ],
    },
    SectionSpec {
        name: "power",
        fields: &[
            f("is_power_saving", Bool),
            f("on_battery_shutdown_after_secs", UInt),
            f("adc_multiplier_override", Float),
            f("wait_bluetooth_secs", UInt),
            f("sds_secs", UInt),
            f("ls_secs", UInt),
            f("min_wake_secs", UInt),
            f("device_battery_ina_address", UInt),
        ],
    },
    SectionSpec {
        name: "network",
        fields: &[
            f("wifi_enabled", Bool),
            f("wifi_ssid", Text),
            f("wifi_psk", Text),
            f("ntp_server", Text),
            f("eth_enabled", Bool),
            f("address_mode", FieldKind::Enum(ADDRESS_MODES)),
            f("ipv4_config.ip", Fixed32),
            f("ipv4_config.gateway", Fixed32),
            f("ipv4_config.subnet", Fixed32),
            f("ipv4_config.dns", Fixed32),
            f("rsyslog_server", Text),
            f("enabled_protocols", UInt),
        ],
    },
    SectionSpec {
        name: "display",
        fields: &[
            f("screen_on_secs", UInt),
            f("gps_format", FieldKind::Enum(GPS_FORMATS)),
            f("auto_screen_carousel_secs", UInt),
            f("compass_north_top", Bool),
            f("flip_screen", Bool),
            f("units", FieldKind::Enum(UNITS)),
            f("oled", FieldKind::Enum(OLED_TYPES)),
            f("displaymode", FieldKind::Enum(DISPLAY_MODES)),
            f("heading_bold", Bool),
            f("wake_on_tap_or_motion", Bool),
        ],
    },
    SectionSpec {
        name: "lora",
        fields: &[
            f("use_preset", Bool),
            f("modem_preset", FieldKind::Enum(MODEM_PRESETS)),
            f("bandwidth", UInt),
            f("spread_factor", UInt),
            f("coding_rate", UInt),
            f("frequency_offset", Float),
            f("region", FieldKind::Enum(REGIONS)),
            f("hop_limit", UInt),
            f("tx_enabled", Bool),
            f("tx_power", Int),
            f("channel_num", UInt),
            f("override_duty_cycle", Bool),
            f("sx126x_rx_boosted_gain", Bool),
            f("override_frequency", Float),
            f("pa_fan_disabled", Bool),
            f("ignore_mqtt", Bool),
            f("config_ok_to_mqtt", Bool),
        ],
    },
    SectionSpec {
        name: "bluetooth",
        fields: &[
            f("enabled", Bool),
            f("mode", FieldKind::Enum(BT_MODES)),
            f("fixed_pin", UInt),
        ],
    },
    SectionSpec {
        name: "security",
        fields: &[
            f("public_key", Text),
            f("private_key", Text),
            f("admin_key", AdminKeys),
            f("is_managed", Bool),
            f("serial_enabled", Bool),
            f("debug_log_api_enabled", Bool),
            f("admin_channel_enabled", Bool),
        ],
    },
];

pub const MODULE_SECTIONS: &[SectionSpec] = &[
    SectionSpec {
        name: "mqtt",
        fields: &[
            f("enabled", Bool),
            f("address", Text),
            f("username", Text),
            f("password", Text),
            f("encryption_enabled", Bool),
            f("json_enabled", Bool),
            f("tls_enabled", Bool),
            f("root", Text),
            f("proxy_to_client_enabled", Bool),
            f("map_reporting_enabled", Bool),
        ],
    },
    SectionSpec {
        name: "serial",
        fields: &[
            f("enabled", Bool),
            f("echo", Bool),
            f("rxd", UInt),
            f("txd", UInt),
            f("baud", FieldKind::Enum(SERIAL_BAUDS)),
            f("timeout", UInt),
            f("mode", FieldKind::Enum(SERIAL_MODES)),
        ],
    },
    SectionSpec {
        name: "external_notification",
        fields: &[
            f("enabled", Bool),
            f("output_ms", UInt),
            f("output", UInt),
            f("active", Bool),
            f("alert_message", Bool),
            f("alert_bell", Bool),
            f("use_pwm", Bool),
            f("nag_timeout", UInt),
        ],
    },
    SectionSpec {
        name: "store_forward",
        fields: &[
            f("enabled", Bool),
            f("heartbeat", Bool),
            f("records", UInt),
            f("history_return_max", UInt),
            f("history_return_window", UInt),
        ],
    },
    SectionSpec {
        name: "range_test",
        fields: &[f("enabled", Bool), f("sender", UInt), f("save", Bool)],
    },
    SectionSpec {
        name: "telemetry",
        fields: &[
            f("device_update_interval", UInt),
            f("environment_update_interval", UInt),
            f("environment_measurement_enabled", Bool),
            f("environment_screen_enabled", Bool),
            f("air_quality_enabled", Bool),
            f("power_measurement_enabled", Bool),
        ],
    },
    SectionSpec {
        name: "canned_message",
        fields: &[
            f("enabled", Bool),
            f("rotary1_enabled", Bool),
            f("allow_input_source", Text),
            f("send_bell", Bool),
            f("messages", Repeated),
        ],
    },
    SectionSpec {
        name: "neighbor_info",
        fields: &[f("enabled", Bool), f("update_interval", UInt)],
    },
    SectionSpec {
        name: "ambient_lighting",
        fields: &[
            f("led_state", Bool),
            f("current", UInt),
            f("red", UInt),
            f("green", UInt),
            f("blue", UInt),
        ],
    },
    SectionSpec {
        name: "detection_sensor",
        fields: &[
            f("enabled", Bool),
            f("minimum_broadcast_secs", UInt),
            f("state_broadcast_secs", UInt),
            f("send_bell", Bool),
            f("name", Text),
            f("monitor_pin", UInt),
            f("detection_trigger_type", FieldKind::Enum(TRIGGER_TYPES)),
            f("use_pullup", Bool),
        ],
    },
];

#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    NotSet,
    Bool(bool),
    Enum(String),
    Fixed32(Ipv4Addr),
    UInt(u64),
    Int(i64),
    Float(f64),
    Text(String),
    Keys(Vec<String>),
    List(Vec<String>),
}

impl FieldValue {
    /// Interprets a loosely typed value according to the field's kind.
    /// Anything that does not fit becomes `NotSet`.
    pub fn from_json(kind: FieldKind, value: &Value) -> Self {
        let parsed = match (kind, value) {
            (_, Value::Null) => None,
            (FieldKind::Bool, Value::Bool(b)) => Some(FieldValue::Bool(*b)),
            (FieldKind::Bool, Value::String(s)) => match s.as_str() {
                "True" | "true" => Some(FieldValue::Bool(true)),
                "False" | "false" => Some(FieldValue::Bool(false)),
                _ => None,
            },
            (FieldKind::Enum(options), Value::String(s)) => {
                Some(FieldValue::Enum(s.clone())).filter(|_| options.contains(&s.as_str()))
            }
            (FieldKind::Enum(options), Value::Number(n)) => n
                .as_u64()
                .and_then(|idx| options.get(idx as usize))
                .map(|name| FieldValue::Enum(name.to_string())),
            (FieldKind::Fixed32, Value::Number(n)) => n
                .as_u64()
                .and_then(|raw| u32::try_from(raw).ok())
                .map(|raw| FieldValue::Fixed32(Ipv4Addr::from(raw))),
            (FieldKind::Fixed32, Value::String(s)) => s.parse().ok().map(FieldValue::Fixed32),
            (FieldKind::UInt, Value::Number(n)) => n.as_u64().map(FieldValue::UInt),
            (FieldKind::Int, Value::Number(n)) => n.as_i64().map(FieldValue::Int),
            (FieldKind::Float, Value::Number(n)) => n.as_f64().map(FieldValue::Float),
            (FieldKind::Text, Value::String(s)) => Some(FieldValue::Text(s.clone())),
            (FieldKind::Text, Value::Number(n)) => Some(FieldValue::Text(n.to_string())),
            (FieldKind::AdminKeys, Value::Array(items)) => Some(FieldValue::Keys(strings(items))),
            (FieldKind::Repeated, Value::Array(items)) => Some(FieldValue::List(strings(items))),
            _ => None,
        };
        parsed.unwrap_or(FieldValue::NotSet)
    }

    pub fn to_json(&self) -> Value {
        match self {
            FieldValue::NotSet => Value::Null,
            FieldValue::Bool(b) => Value::Bool(*b),
            FieldValue::Enum(s) | FieldValue::Text(s) => Value::String(s.clone()),
            FieldValue::Fixed32(ip) => Value::String(ip.to_string()),
            FieldValue::UInt(n) => Value::from(*n),
            FieldValue::Int(n) => Value::from(*n),
            FieldValue::Float(n) => Value::from(*n),
            FieldValue::Keys(items) | FieldValue::List(items) => {
                Value::Array(items.iter().cloned().map(Value::String).collect())
            }
        }
    }
}

fn strings(items: &[Value]) -> Vec<String> {
    items
        .iter()
        .map(|item| match item {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        })
        .collect()
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldValue::NotSet => write!(f, "{NOT_SET}"),
            FieldValue::Bool(true) => write!(f, "True"),
            FieldValue::Bool(false) => write!(f, "False"),
            FieldValue::Enum(s) | FieldValue::Text(s) => write!(f, "{s}"),
            FieldValue::Fixed32(ip) => write!(f, "{ip}"),
            FieldValue::UInt(n) => write!(f, "{n}"),
            FieldValue::Int(n) => write!(f, "{n}"),
            FieldValue::Float(n) => write!(f, "{n}"),
            FieldValue::Keys(items) | FieldValue::List(items) => write!(f, "{}", items.join(", ")),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Field {
    pub key: String,
    pub name: String,
    pub kind: FieldKind,
    pub value: FieldValue,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    AppSettings,
    ExportConfig,
    LoadConfig,
    ConfigUrl,
    Reboot,
    ResetNodeDb,
    Shutdown,
    FactoryReset,
    Exit,
}

impl Action {
    pub const ALL: [Action; 9] = [
        Action::AppSettings,
        Action::ExportConfig,
        Action::LoadConfig,
        Action::ConfigUrl,
        Action::Reboot,
        Action::ResetNodeDb,
        Action::Shutdown,
        Action::FactoryReset,
        Action::Exit,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            Action::AppSettings => "App Settings",
            Action::ExportConfig => "Export Config File",
            Action::LoadConfig => "Load Config File",
            Action::ConfigUrl => "Config URL",
            Action::Reboot => "Reboot",
            Action::ResetNodeDb => "Reset Node DB",
            Action::Shutdown => "Shutdown",
            Action::FactoryReset => "Factory Reset",
            Action::Exit => "Exit",
        }
    }

    /// Destructive device commands, drawn in the warning colour and gated
    /// behind a yes/no confirmation.
    pub fn admin(&self) -> Option<AdminAction> {
        match self {
            Action::Reboot => Some(AdminAction::Reboot),
            Action::ResetNodeDb => Some(AdminAction::ResetNodeDb),
            Action::Shutdown => Some(AdminAction::Shutdown),
            Action::FactoryReset => Some(AdminAction::FactoryReset),
            _ => None,
        }
    }

    pub fn is_sensitive(&self) -> bool {
        self.admin().is_some()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum MenuNode {
    Submenu(Menu),
    Field(Field),
    Action(Action),
}

/// Ordered label to node mapping.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Menu {
    pub entries: Vec<(String, MenuNode)>,
}

impl Menu {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn labels(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(label, _)| label.as_str())
    }

    pub fn get(&self, label: &str) -> Option<&MenuNode> {
        self.entries
            .iter()
            .find(|(l, _)| l == label)
            .map(|(_, node)| node)
    }

    pub fn get_mut(&mut self, label: &str) -> Option<&mut MenuNode> {
        self.entries
            .iter_mut()
            .find(|(l, _)| l == label)
            .map(|(_, node)| node)
    }

    /// Follows a path of labels (excluding the root).
    pub fn descend(&self, path: &[String]) -> Option<&Menu> {
        let mut menu = self;
        for label in path {
            match menu.get(label)? {
                MenuNode::Submenu(child) => menu = child,
                _ => return None,
            }
        }
        Some(menu)
    }

    pub fn descend_mut(&mut self, path: &[String]) -> Option<&mut Menu> {
        let mut menu = self;
        for label in path {
            match menu.get_mut(label)? {
                MenuNode::Submenu(child) => menu = child,
                _ => return None,
            }
        }
        Some(menu)
    }

    /// Finds a field anywhere below this menu by its dotted key.
    pub fn find_field_mut(&mut self, key: &str) -> Option<&mut Field> {
        for (_, node) in self.entries.iter_mut() {
            match node {
                MenuNode::Field(field) if field.key == key => return Some(field),
                MenuNode::Submenu(child) => {
                    if let Some(found) = child.find_field_mut(key) {
                        return Some(found);
                    }
                }
                _ => {}
            }
        }
        None
    }

    fn push(&mut self, label: impl Into<String>, node: MenuNode) {
        self.entries.push((label.into(), node));
    }

    /// Inserts a field whose name may contain dots; each leading segment
    /// becomes a nested submenu.
    fn insert_field(&mut self, field: Field) {
        let segments: Vec<&str> = field.name.split('.').collect();
        let mut menu = self;
        for segment in &segments[..segments.len() - 1] {
            let exists = matches!(menu.get(segment), Some(MenuNode::Submenu(_)));
            if !exists {
                menu.push(*segment, MenuNode::Submenu(Menu::default()));
            }
            menu = match menu.get_mut(segment) {
                Some(MenuNode::Submenu(child)) => child,
                _ => return,
            };
        }
        let leaf = segments[segments.len() - 1].to_string();
        menu.push(
            leaf.clone(),
            MenuNode::Field(Field {
                name: leaf,
                ..field
            }),
        );
    }
}

fn field_from(snapshot: &DeviceSnapshot, key: String, spec: &FieldSpec) -> Field {
    let value = snapshot
        .get(&key)
        .map(|raw| FieldValue::from_json(spec.kind, raw))
        .unwrap_or(FieldValue::NotSet);
    Field {
        key,
        name: spec.name.to_string(),
        kind: spec.kind,
        value,
    }
}

/// Materializes the device settings tree from a snapshot.
pub fn build_device_menu(snapshot: &DeviceSnapshot) -> Menu {
    let mut root = Menu::default();

    let mut user = Menu::default();
    for spec in USER_FIELDS {
        user.insert_field(field_from(snapshot, format!("user.{}", spec.name), spec));
    }
    root.push("User Settings", MenuNode::Submenu(user));

    let mut channels = Menu::default();
    for idx in 0..MAX_CHANNELS {
        let prefix = format!("channels.{idx}.");
        if !snapshot.keys().any(|key| key.starts_with(&prefix)) {
            continue;
        }
        let mut channel = Menu::default();
        for spec in CHANNEL_FIELDS {
            channel.insert_field(field_from(snapshot, format!("{prefix}{}", spec.name), spec));
        }
        channels.push(format!("Channel {}", idx + 1), MenuNode::Submenu(channel));
    }
    root.push("Channels", MenuNode::Submenu(channels));

    let mut radio = Menu::default();
    for section in RADIO_SECTIONS {
        let mut menu = Menu::default();
        for spec in section.fields {
            let key = format!("config.{}.{}", section.name, spec.name);
            menu.insert_field(field_from(snapshot, key, spec));
            if section.name == "position" && spec.name == "fixed_position" {
                for pos in POSITION_FIELDS {
                    menu.insert_field(field_from(snapshot, format!("position.{}", pos.name), pos));
                }
            }
        }
        radio.push(section.name, MenuNode::Submenu(menu));
    }
    root.push("Radio Settings", MenuNode::Submenu(radio));

    let mut module = Menu::default();
    for section in MODULE_SECTIONS {
        let mut menu = Menu::default();
        for spec in section.fields {
            let key = format!("module.{}.{}", section.name, spec.name);
            menu.insert_field(field_from(snapshot, key, spec));
        }
        module.push(section.name, MenuNode::Submenu(menu));
    }
    root.push("Module Settings", MenuNode::Submenu(module));

    for action in Action::ALL {
        root.push(action.label(), MenuNode::Action(action));
    }
    root
}

/// Looks up the declared kind of a dotted device key.
pub fn kind_for_key(key: &str) -> Option<FieldKind> {
    let find = |fields: &[FieldSpec], name: &str| {
        fields.iter().find(|spec| spec.name == name).map(|spec| spec.kind)
    };
    let (head, rest) = key.split_once('.')?;
    match head {
        "user" => find(USER_FIELDS, rest),
        "position" => find(POSITION_FIELDS, rest),
        "channels" => {
            let (idx, name) = rest.split_once('.')?;
            idx.parse::<usize>().ok().filter(|i| *i < MAX_CHANNELS)?;
            find(CHANNEL_FIELDS, name)
        }
        "config" | "module" => {
            let sections = if head == "config" {
                RADIO_SECTIONS
            } else {
                MODULE_SECTIONS
            };
            let (section, name) = rest.split_once('.')?;
            let section = sections.iter().find(|s| s.name == section)?;
            find(section.fields, name)
        }
        _ => None,
    }
}

/// Fields that are written back together whenever one of them changes.
pub fn coupled_keys(key: &str) -> Vec<String> {
    let group: Option<(&str, &[FieldSpec])> = if key.starts_with("user.") {
        Some(("user", USER_FIELDS))
    } else if key.starts_with("position.") {
        Some(("position", POSITION_FIELDS))
    } else {
        None
    };
    match group {
        Some((head, fields)) => fields
            .iter()
            .map(|spec| format!("{head}.{}", spec.name))
            .collect(),
        None => vec![key.to_string()],
    }
}

/// Builds the editor tree over the client's own YAML config.
pub fn build_app_menu(cfg: &Config) -> Menu {
    let mut root = Menu::default();
    for (key, value) in config::entries(cfg) {
        let Some((section, name)) = key.split_once('.') else {
            continue;
        };
        let kind = app_field_kind(name, &value);
        let value = match kind {
            FieldKind::Bool => FieldValue::Bool(value == "true"),
            FieldKind::UInt => value
                .parse()
                .map(FieldValue::UInt)
                .unwrap_or(FieldValue::NotSet),
            FieldKind::Enum(_) => FieldValue::Enum(value),
            _ => FieldValue::Text(value),
        };
        if !matches!(root.get(section), Some(MenuNode::Submenu(_))) {
            root.push(section, MenuNode::Submenu(Menu::default()));
        }
        if let Some(MenuNode::Submenu(menu)) = root.get_mut(section) {
            menu.insert_field(Field {
                key: key.clone(),
                name: name.to_string(),
                kind,
                value,
            });
        }
    }
    root
}

const NODE_SORT_NAMES: &[&str] = &["lastHeard", "name", "hops"];

fn app_field_kind(name: &str, value: &str) -> FieldKind {
    if name == "node_sort" {
        return FieldKind::Enum(NODE_SORT_NAMES);
    }
    if value == "true" || value == "false" {
        return FieldKind::Bool;
    }
    if name.ends_with("16ths") || name.ends_with("hop_limit") {
        return FieldKind::UInt;
    }
    FieldKind::Text
}

/// Applies staged App Settings edits to a config copy. Returns keys that
/// were rejected.
pub fn apply_app_changes(cfg: &mut Config, changes: &Changes) -> Vec<String> {
    let mut rejected = Vec::new();
    for (key, value) in changes {
        let raw = match value {
            FieldValue::Bool(b) => b.to_string(),
            FieldValue::NotSet => String::new(),
            other => other.to_string(),
        };
        if !config::apply_value(cfg, key, raw) {
            rejected.push(key.clone());
        }
    }
    rejected
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ValidationError {
    #[error("Value must be at most {0} characters.")]
    TooLong(usize),
    #[error("Value must be at least {0} characters.")]
    TooShort(usize),
    #[error("Value must be a number.")]
    NotANumber,
    #[error("Value must be at least {0}.")]
    BelowMinimum(f64),
    #[error("Value must be at most {0}.")]
    AboveMaximum(f64),
    #[error("Invalid IP address. Try again.")]
    InvalidIp,
    #[error("Error: Each key must be valid Base64 and 32 bytes long!")]
    InvalidAdminKey,
}

/// Per-field input constraints, looked up by field name.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct RuleBounds {
    pub min_len: Option<usize>,
    pub max_len: Option<usize>,
    pub min_value: Option<f64>,
    pub max_value: Option<f64>,
}

pub fn rule_for(name: &str) -> RuleBounds {
    let leaf = name.rsplit('.').next().unwrap_or(name);
    let r = RuleBounds::default();
    match leaf {
        "shortName" => RuleBounds {
            max_len: Some(4),
            ..r
        },
        "longName" => RuleBounds {
            max_len: Some(32),
            ..r
        },
        "fixed_pin" => RuleBounds {
            min_len: Some(6),
            max_len: Some(6),
            ..r
        },
        "position_flags" => RuleBounds {
            max_len: Some(3),
            ..r
        },
        "enabled_protocols" => RuleBounds {
            max_value: Some(2.0),
            ..r
        },
        "hop_limit" => RuleBounds {
            max_value: Some(7.0),
            ..r
        },
        "latitude" => RuleBounds {
            min_value: Some(-90.0),
            max_value: Some(90.0),
            ..r
        },
        "longitude" => RuleBounds {
            min_value: Some(-180.0),
            max_value: Some(180.0),
            ..r
        },
        "altitude" => RuleBounds {
            min_value: Some(-4_294_967_295.0),
            max_value: Some(4_294_967_295.0),
            ..r
        },
        "red" | "green" | "blue" | "current" => RuleBounds {
            max_value: Some(255.0),
            ..r
        },
        "position_precision" => RuleBounds {
            max_value: Some(32.0),
            ..r
        },
        _ => r,
    }
}

impl RuleBounds {
    pub fn check_len(&self, input: &str) -> Result<(), ValidationError> {
        let len = input.chars().count();
        if let Some(max) = self.max_len {
            if len > max {
                return Err(ValidationError::TooLong(max));
            }
        }
        if let Some(min) = self.min_len {
            if len < min {
                return Err(ValidationError::TooShort(min));
            }
        }
        Ok(())
    }

    pub fn check_value(&self, value: f64) -> Result<(), ValidationError> {
        if let Some(min) = self.min_value {
            if value < min {
                return Err(ValidationError::BelowMinimum(min));
            }
        }
        if let Some(max) = self.max_value {
            if value > max {
                return Err(ValidationError::AboveMaximum(max));
            }
        }
        Ok(())
    }
}

/// Parses free-text input for a text or numeric field.
pub fn parse_input(kind: FieldKind, name: &str, input: &str) -> Result<FieldValue, ValidationError> {
    let rule = rule_for(name);
    rule.check_len(input)?;
    let trimmed = input.trim();
    match kind {
        FieldKind::UInt => {
            let n: u64 = trimmed.parse().map_err(|_| ValidationError::NotANumber)?;
            rule.check_value(n as f64)?;
            Ok(FieldValue::UInt(n))
        }
        FieldKind::Int => {
            let n: i64 = trimmed.parse().map_err(|_| ValidationError::NotANumber)?;
            rule.check_value(n as f64)?;
            Ok(FieldValue::Int(n))
        }
        FieldKind::Float => {
            let n: f64 = trimmed.parse().map_err(|_| ValidationError::NotANumber)?;
            if !n.is_finite() {
                return Err(ValidationError::NotANumber);
            }
            rule.check_value(n)?;
            Ok(FieldValue::Float(n))
        }
        _ => Ok(FieldValue::Text(input.to_string())),
    }
}

pub fn parse_ipv4(input: &str) -> Result<Ipv4Addr, ValidationError> {
    let octets: Vec<&str> = input.split('.').collect();
    let well_formed = octets.len() == 4
        && octets
            .iter()
            .all(|o| !o.is_empty() && o.chars().all(|c| c.is_ascii_digit()) && o.parse::<u8>().is_ok());
    if !well_formed {
        return Err(ValidationError::InvalidIp);
    }
    input.parse().map_err(|_| ValidationError::InvalidIp)
}

/// Each admin key must be blank or decode to exactly 32 bytes.
pub fn validate_admin_keys(keys: &[String]) -> Result<(), ValidationError> {
    let engine = base64::engine::general_purpose::STANDARD;
    for key in keys {
        if key.is_empty() {
            continue;
        }
        match engine.decode(key) {
            Ok(bytes) if bytes.len() == 32 => {}
            _ => return Err(ValidationError::InvalidAdminKey),
        }
    }
    Ok(())
}

/// Serializes a snapshot as nested YAML sections.
pub fn export_yaml(snapshot: &DeviceSnapshot, config_url: Option<&str>) -> Result<String> {
    let mut root = serde_json::Map::new();
    if let Some(url) = config_url {
        root.insert("channel_url".into(), Value::String(url.to_string()));
    }
    for (key, value) in snapshot {
        insert_nested(&mut root, key, value.clone());
    }
    serde_yaml::to_string(&Value::Object(root)).context("settings: serialize config export")
}

fn insert_nested(root: &mut serde_json::Map<String, Value>, key: &str, value: Value) {
    let mut parts = key.split('.').peekable();
    let mut node = root;
    while let Some(part) = parts.next() {
        if parts.peek().is_none() {
            node.insert(part.to_string(), value);
            return;
        }
        let entry = node
            .entry(part.to_string())
            .or_insert_with(|| Value::Object(serde_json::Map::new()));
        if !entry.is_object() {
            *entry = Value::Object(serde_json::Map::new());
        }
        node = match entry {
            Value::Object(map) => map,
            _ => return,
        };
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Import {
    pub changes: Changes,
    pub config_url: Option<String>,
}

/// Reads an exported YAML file back into typed changes. Unknown keys are
/// skipped.
pub fn import_yaml(text: &str) -> Result<Import> {
    let value: Value = serde_yaml::from_str(text).context("settings: parse config file")?;
    let Value::Object(root) = value else {
        anyhow::bail!("settings: config file must be a mapping");
    };
    let mut import = Import::default();
    let mut flat = Vec::new();
    for (key, value) in root {
        if key == "channel_url" {
            import.config_url = value.as_str().map(str::to_string);
            continue;
        }
        flatten(&key, value, &mut flat);
    }
    for (key, value) in flat {
        match kind_for_key(&key) {
            Some(kind) => {
                let typed = FieldValue::from_json(kind, &value);
                if typed != FieldValue::NotSet {
                    import.changes.insert(key, typed);
                }
            }
            None => warn!(%key, "skipping unknown config key"),
        }
    }
    Ok(import)
}

fn flatten(prefix: &str, value: Value, out: &mut Vec<(String, Value)>) {
    match value {
        Value::Object(map) => {
            for (key, child) in map {
                flatten(&format!("{prefix}.{key}"), child, out);
            }
        }
        other => out.push((prefix.to_string(), other)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::NodeSort;
    use serde_json::json;

    fn snapshot() -> DeviceSnapshot {
        let mut snap = DeviceSnapshot::new();
        snap.insert("user.longName".into(), json!("Base Camp"));
        snap.insert("user.shortName".into(), json!("BASE"));
        snap.insert("channels.0.name".into(), json!("general"));
        snap.insert("config.lora.region".into(), json!("US"));
        snap.insert("config.lora.hop_limit".into(), json!(3));
        snap.insert("config.network.ipv4_config.ip".into(), json!("10.0.0.2"));
        snap.insert("position.latitude".into(), json!(47.5));
        snap
    }

    #[test]
    fn device_menu_has_expected_shape() {
        let menu = build_device_menu(&snapshot());
        let labels: Vec<&str> = menu.labels().collect();
        assert_eq!(&labels[..4], &["User Settings", "Channels", "Radio Settings", "Module Settings"]);
        assert_eq!(labels.last(), Some(&"Exit"));

        let channels = menu.descend(&["Channels".to_string()]).unwrap();
        assert_eq!(channels.labels().collect::<Vec<_>>(), vec!["Channel 1"]);

        let lora = menu
            .descend(&["Radio Settings".to_string(), "lora".to_string()])
            .unwrap();
        match lora.get("region") {
            Some(MenuNode::Field(field)) => {
                assert_eq!(field.value, FieldValue::Enum("US".into()));
                assert_eq!(field.key, "config.lora.region");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn position_fields_follow_fixed_position() {
        let menu = build_device_menu(&snapshot());
        let position = menu
            .descend(&["Radio Settings".to_string(), "position".to_string()])
            .unwrap();
        let labels: Vec<&str> = position.labels().collect();
        let fixed = labels.iter().position(|l| *l == "fixed_position").unwrap();
        assert_eq!(&labels[fixed + 1..fixed + 4], &["latitude", "longitude", "altitude"]);
    }

    #[test]
    fn dotted_field_names_nest() {
        let menu = build_device_menu(&snapshot());
        let ipv4 = menu
            .descend(&[
                "Radio Settings".to_string(),
                "network".to_string(),
                "ipv4_config".to_string(),
            ])
            .unwrap();
        match ipv4.get("ip") {
            Some(MenuNode::Field(field)) => {
                assert_eq!(field.value, FieldValue::Fixed32(Ipv4Addr::new(10, 0, 0, 2)))
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn validation_rules_apply_by_name() {
        assert_eq!(
            parse_input(FieldKind::Text, "user.shortName", "TOOLONG"),
            Err(ValidationError::TooLong(4))
        );
        assert_eq!(
            parse_input(FieldKind::UInt, "config.lora.hop_limit", "9"),
            Err(ValidationError::AboveMaximum(7.0))
        );
        assert_eq!(
            parse_input(FieldKind::Float, "position.latitude", "-91"),
            Err(ValidationError::BelowMinimum(-90.0))
        );
        assert_eq!(
            parse_input(FieldKind::UInt, "config.bluetooth.fixed_pin", "12345"),
            Err(ValidationError::TooShort(6))
        );
        assert_eq!(
            parse_input(FieldKind::UInt, "config.lora.hop_limit", "x"),
            Err(ValidationError::NotANumber)
        );
        assert_eq!(
            parse_input(FieldKind::UInt, "module.ambient_lighting.red", "200"),
            Ok(FieldValue::UInt(200))
        );
    }

    #[test]
    fn ipv4_parsing_is_strict() {
        assert_eq!(parse_ipv4("192.168.1.20"), Ok(Ipv4Addr::new(192, 168, 1, 20)));
        assert_eq!(parse_ipv4("192.168.1"), Err(ValidationError::InvalidIp));
        assert_eq!(parse_ipv4("192.168.1.256"), Err(ValidationError::InvalidIp));
        assert_eq!(parse_ipv4("1..2.3"), Err(ValidationError::InvalidIp));
    }

    #[test]
    fn admin_keys_blank_or_32_bytes() {
        let good = base64::engine::general_purpose::STANDARD.encode([7u8; 32]);
        assert!(validate_admin_keys(&[good.clone(), String::new(), String::new()]).is_ok());
        let short = base64::engine::general_purpose::STANDARD.encode([7u8; 16]);
        assert_eq!(
            validate_admin_keys(&[good, short]),
            Err(ValidationError::InvalidAdminKey)
        );
        assert_eq!(
            validate_admin_keys(&["not base64!".into()]),
            Err(ValidationError::InvalidAdminKey)
        );
    }

    #[test]
    fn export_then_import_restores_known_keys() {
        let snap = snapshot();
        let yaml = export_yaml(&snap, Some("https://example.invalid/#abc")).unwrap();
        let import = import_yaml(&format!("{yaml}bogus:\n  key: 1\n")).unwrap();
        assert_eq!(import.config_url.as_deref(), Some("https://example.invalid/#abc"));
        assert_eq!(
            import.changes.get("config.lora.region"),
            Some(&FieldValue::Enum("US".into()))
        );
        assert_eq!(
            import.changes.get("config.network.ipv4_config.ip"),
            Some(&FieldValue::Fixed32(Ipv4Addr::new(10, 0, 0, 2)))
        );
        assert!(!import.changes.contains_key("bogus.key"));
    }

    #[test]
    fn coupled_groups() {
        assert_eq!(
            coupled_keys("user.shortName"),
            vec!["user.longName", "user.shortName", "user.isLicensed"]
        );
        assert_eq!(coupled_keys("position.altitude").len(), 3);
        assert_eq!(coupled_keys("config.lora.region"), vec!["config.lora.region"]);
    }

    #[test]
    fn app_menu_round_trips_config() {
        let cfg = Config::default();
        let menu = build_app_menu(&cfg);
        let ui = menu.descend(&["ui".to_string()]).unwrap();
        match ui.get("node_sort") {
            Some(MenuNode::Field(field)) => {
                assert!(matches!(field.kind, FieldKind::Enum(_)));
                assert_eq!(field.value, FieldValue::Enum("lastHeard".into()));
            }
            other => panic!("unexpected {other:?}"),
        }

        let mut changes = Changes::new();
        changes.insert("ui.node_sort".into(), FieldValue::Enum("hops".into()));
        changes.insert("ui.single_pane_mode".into(), FieldValue::Bool(true));
        changes.insert("ui.node_list_16ths".into(), FieldValue::Text("many".into()));
        let mut updated = cfg.clone();
        let rejected = apply_app_changes(&mut updated, &changes);
        assert_eq!(rejected, vec!["ui.node_list_16ths".to_string()]);
        assert_eq!(updated.ui.node_sort, NodeSort::Hops);
        assert!(updated.ui.single_pane_mode);
    }

    #[test]
    fn kinds_resolve_from_keys() {
        assert_eq!(kind_for_key("config.lora.hop_limit"), Some(FieldKind::UInt));
        assert_eq!(kind_for_key("channels.2.name"), Some(FieldKind::Text));
        assert_eq!(kind_for_key("channels.9.name"), None);
        assert_eq!(kind_for_key("module.nope.enabled"), None);
    }
}
