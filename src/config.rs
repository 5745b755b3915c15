use std::collections::HashMap;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

const DEFAULT_ENV_PREFIX: &str = "MESH_TUI";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct Config {
    #[serde(default)]
    pub ui: UIConfig,
    #[serde(default)]
    pub messages: MessagesConfig,
    #[serde(default)]
    pub limits: LimitsConfig,
    #[serde(default)]
    pub storage: StorageConfig,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub enum NodeSort {
    #[default]
    LastHeard,
    Name,
    Hops,
}

impl NodeSort {
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeSort::LastHeard => "lastHeard",
            NodeSort::Name => "name",
            NodeSort::Hops => "hops",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim() {
            "lastHeard" | "last_heard" => Some(NodeSort::LastHeard),
            "name" => Some(NodeSort::Name),
            "hops" => Some(NodeSort::Hops),
            _ => None,
        }
    }

    pub const ALL: [NodeSort; 3] = [NodeSort::LastHeard, NodeSort::Name, NodeSort::Hops];
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UIConfig {
    #[serde(default = "default_channel_list_16ths")]
    pub channel_list_16ths: u16,
    #[serde(default = "default_node_list_16ths")]
    pub node_list_16ths: u16,
    #[serde(default)]
    pub single_pane_mode: bool,
    #[serde(default)]
    pub node_sort: NodeSort,
    #[serde(default)]
    pub notification_sound: bool,
    #[serde(default)]
    pub log_file: Option<PathBuf>,
}

impl Default for UIConfig {
    fn default() -> Self {
        Self {
            channel_list_16ths: default_channel_list_16ths(),
            node_list_16ths: default_node_list_16ths(),
            single_pane_mode: false,
            node_sort: NodeSort::default(),
            notification_sound: false,
            log_file: None,
        }
    }
}

fn default_channel_list_16ths() -> u16 {
    3
}

fn default_node_list_16ths() -> u16 {
    5
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MessagesConfig {
    #[serde(default = "default_message_prefix")]
    pub message_prefix: String,
    #[serde(default = "default_sent_message_prefix")]
    pub sent_message_prefix: String,
    #[serde(default = "default_notification_symbol")]
    pub notification_symbol: String,
    #[serde(default = "default_ack_implicit_str")]
    pub ack_implicit_str: String,
    #[serde(default = "default_ack_str")]
    pub ack_str: String,
    #[serde(default = "default_nak_str")]
    pub nak_str: String,
    #[serde(default = "default_ack_unknown_str")]
    pub ack_unknown_str: String,
}

impl Default for MessagesConfig {
    fn default() -> Self {
        Self {
            message_prefix: default_message_prefix(),
            sent_message_prefix: default_sent_message_prefix(),
            notification_symbol: default_notification_symbol(),
            ack_implicit_str: default_ack_implicit_str(),
            ack_str: default_ack_str(),
            nak_str: default_nak_str(),
            ack_unknown_str: default_ack_unknown_str(),
        }
    }
}

fn default_message_prefix() -> String {
    ">>".into()
}

fn default_sent_message_prefix() -> String {
    ">> Sent".into()
}

fn default_notification_symbol() -> String {
    "*".into()
}

fn default_ack_implicit_str() -> String {
    "[◌]".into()
}

fn default_ack_str() -> String {
    "[✓]".into()
}

fn default_nak_str() -> String {
    "[x]".into()
}

fn default_ack_unknown_str() -> String {
    "[…]".into()
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LimitsConfig {
    #[serde(default = "default_send_cooldown", with = "humantime_serde")]
    pub send_cooldown: Duration,
    #[serde(default = "default_traceroute_cooldown", with = "humantime_serde")]
    pub traceroute_cooldown: Duration,
    #[serde(default = "default_traceroute_hop_limit")]
    pub traceroute_hop_limit: u32,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            send_cooldown: default_send_cooldown(),
            traceroute_cooldown: default_traceroute_cooldown(),
            traceroute_hop_limit: default_traceroute_hop_limit(),
        }
    }
}

fn default_send_cooldown() -> Duration {
    Duration::from_millis(2500)
}

fn default_traceroute_cooldown() -> Duration {
    Duration::from_secs(30)
}

fn default_traceroute_hop_limit() -> u32 {
    3
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct StorageConfig {
    #[serde(default)]
    pub db_path: Option<PathBuf>,
    #[serde(default)]
    pub node_configs_dir: Option<PathBuf>,
}

impl StorageConfig {
    pub fn node_configs_dir(&self) -> PathBuf {
        self.node_configs_dir
            .clone()
            .or_else(|| dirs::data_dir().map(|dir| dir.join("mesh-tui").join("node-configs")))
            .unwrap_or_else(|| PathBuf::from("node-configs"))
    }
}

#[derive(Debug, Clone, Default)]
pub struct LoadOptions {
    pub config_file: Option<PathBuf>,
    pub env_prefix: Option<String>,
}

pub fn load(options: LoadOptions) -> Result<Config> {
    let mut cfg = Config::default();

    if let Some(path) = options.config_file.as_ref() {
        if path.exists() {
            cfg = read_config_file(path)?;
        }
    } else if let Some(default_path) = default_config_path() {
        if default_path.exists() {
            cfg = read_config_file(&default_path)?;
        }
    }

    let prefix = options.env_prefix.as_deref().unwrap_or(DEFAULT_ENV_PREFIX);
    apply_env(&mut cfg, prefix);

    Ok(cfg)
}

fn read_config_file(path: &Path) -> Result<Config> {
    let data = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file at {}", path.display()))?;
    let config: Config = serde_yaml::from_str(&data)
        .with_context(|| format!("Failed to parse config file at {}", path.display()))?;
    Ok(config)
}

fn apply_env(cfg: &mut Config, prefix: &str) {
    let mut map: HashMap<String, String> = HashMap::new();
    let upper_prefix = format!("{}_", prefix.to_uppercase());

    for (key, value) in env::vars() {
        if let Some(stripped) = key.strip_prefix(&upper_prefix) {
            let normalized = stripped.to_ascii_lowercase().replace("__", ".");
            map.insert(normalized, value);
        }
    }

    for (key, value) in map {
        apply_value(cfg, &key, value);
    }
}

/// Applies a single dotted `section.key` override. Returns false when the key
/// is unknown or the value does not parse.
pub fn apply_value(cfg: &mut Config, key: &str, value: String) -> bool {
    match key {
        "ui.channel_list_16ths" => parse_into(&value, &mut cfg.ui.channel_list_16ths),
        "ui.node_list_16ths" => parse_into(&value, &mut cfg.ui.node_list_16ths),
        "ui.single_pane_mode" => {
            cfg.ui.single_pane_mode = truthy(&value);
            true
        }
        "ui.node_sort" => match NodeSort::parse(&value) {
            Some(sort) => {
                cfg.ui.node_sort = sort;
                true
            }
            None => false,
        },
        "ui.notification_sound" => {
            cfg.ui.notification_sound = truthy(&value);
            true
        }
        "ui.log_file" => {
            cfg.ui.log_file = non_empty_path(value);
            true
        }
        "messages.message_prefix" => {
            cfg.messages.message_prefix = value;
            true
        }
        "messages.sent_message_prefix" => {
            cfg.messages.sent_message_prefix = value;
            true
        }
        "messages.notification_symbol" => {
            cfg.messages.notification_symbol = value;
            true
        }
        "messages.ack_implicit_str" => {
            cfg.messages.ack_implicit_str = value;
            true
        }
        "messages.ack_str" => {
            cfg.messages.ack_str = value;
            true
        }
        "messages.nak_str" => {
            cfg.messages.nak_str = value;
            true
        }
        "messages.ack_unknown_str" => {
            cfg.messages.ack_unknown_str = value;
            true
        }
        "limits.send_cooldown" => match humantime::parse_duration(&value) {
            Ok(duration) => {
                cfg.limits.send_cooldown = duration;
                true
            }
            Err(_) => false,
        },
        "limits.traceroute_cooldown" => match humantime::parse_duration(&value) {
            Ok(duration) => {
                cfg.limits.traceroute_cooldown = duration;
                true
            }
            Err(_) => false,
        },
        "limits.traceroute_hop_limit" => parse_into(&value, &mut cfg.limits.traceroute_hop_limit),
        "storage.db_path" => {
            cfg.storage.db_path = non_empty_path(value);
            true
        }
        "storage.node_configs_dir" => {
            cfg.storage.node_configs_dir = non_empty_path(value);
            true
        }
        _ => false,
    }
}

fn parse_into<T: std::str::FromStr>(value: &str, slot: &mut T) -> bool {
    match value.trim().parse::<T>() {
        Ok(parsed) => {
            *slot = parsed;
            true
        }
        Err(_) => false,
    }
}

fn truthy(value: &str) -> bool {
    matches!(value.trim(), "1" | "true" | "TRUE" | "True" | "yes")
}

fn non_empty_path(value: String) -> Option<PathBuf> {
    if value.trim().is_empty() {
        None
    } else {
        Some(PathBuf::from(value))
    }
}

/// Flattens the config into dotted keys and display values, in file order.
/// Used by the App Settings editor.
pub fn entries(cfg: &Config) -> Vec<(String, String)> {
    let path_display = |path: &Option<PathBuf>| {
        path.as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_default()
    };
    vec![
        (
            "ui.channel_list_16ths".into(),
            cfg.ui.channel_list_16ths.to_string(),
        ),
        (
            "ui.node_list_16ths".into(),
            cfg.ui.node_list_16ths.to_string(),
        ),
        (
            "ui.single_pane_mode".into(),
            cfg.ui.single_pane_mode.to_string(),
        ),
        ("ui.node_sort".into(), cfg.ui.node_sort.as_str().to_string()),
        (
            "ui.notification_sound".into(),
            cfg.ui.notification_sound.to_string(),
        ),
        ("ui.log_file".into(), path_display(&cfg.ui.log_file)),
        (
            "messages.message_prefix".into(),
            cfg.messages.message_prefix.clone(),
        ),
        (
            "messages.sent_message_prefix".into(),
            cfg.messages.sent_message_prefix.clone(),
        ),
        (
            "messages.notification_symbol".into(),
            cfg.messages.notification_symbol.clone(),
        ),
        (
            "messages.ack_implicit_str".into(),
            cfg.messages.ack_implicit_str.clone(),
        ),
        ("messages.ack_str".into(), cfg.messages.ack_str.clone()),
        ("messages.nak_str".into(), cfg.messages.nak_str.clone()),
        (
            "messages.ack_unknown_str".into(),
            cfg.messages.ack_unknown_str.clone(),
        ),
        (
            "limits.send_cooldown".into(),
            humantime::format_duration(cfg.limits.send_cooldown).to_string(),
        ),
        (
            "limits.traceroute_cooldown".into(),
            humantime::format_duration(cfg.limits.traceroute_cooldown).to_string(),
        ),
        (
            "limits.traceroute_hop_limit".into(),
            cfg.limits.traceroute_hop_limit.to_string(),
        ),
        ("storage.db_path".into(), path_display(&cfg.storage.db_path)),
        (
            "storage.node_configs_dir".into(),
            path_display(&cfg.storage.node_configs_dir),
        ),
    ]
}

pub fn default_path() -> Option<PathBuf> {
    default_config_path()
}

fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("mesh-tui").join("config.yaml"))
}

pub fn save(path: Option<PathBuf>, cfg: &Config) -> Result<PathBuf> {
    let path = if let Some(path) = path {
        path
    } else {
        default_config_path().context("config: unable to determine default config path")?
    };

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("config: failed to create directory {}", parent.display()))?;
    }

    let contents = serde_yaml::to_string(cfg).context("config: failed to serialize config")?;
    fs::write(&path, contents)
        .with_context(|| format!("config: failed to write file {}", path.display()))?;

    Ok(path)
}
