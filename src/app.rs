use std::fs::{self, OpenOptions};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use anyhow::{bail, Context, Result};
use tracing::{error, info, warn};
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter};

use crate::config::{self, Config};
use crate::controller::ChatController;
use crate::outbound::Outbound;
use crate::reducer::Reducer;
use crate::state::{ChatState, Shared};
use crate::storage::{self, Store};
use crate::transport::{
    BridgeTransport, DeviceControl, SimOptions, SimulatedTransport, Transport, DEFAULT_PORT,
};
use crate::ui::{self, ChatView, SettingsRunner};

/// Startup flags other than `--version` and `--help`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunOptions {
    pub demo: bool,
    pub host: Option<String>,
    pub settings_only: bool,
}

impl RunOptions {
    pub fn parse<I>(args: I) -> Result<Self>
    where
        I: IntoIterator<Item = String>,
    {
        let mut options = Self::default();
        let mut args = args.into_iter();
        while let Some(arg) = args.next() {
            match arg.as_str() {
                "--demo" => options.demo = true,
                "--settings" => options.settings_only = true,
                "--host" => match args.next() {
                    Some(host) => options.host = Some(host),
                    None => bail!("--host needs a value such as 192.168.1.20:4403"),
                },
                other => match other.strip_prefix("--host=") {
                    Some(host) => options.host = Some(host.to_string()),
                    None => bail!("unknown argument {other:?}; see --help"),
                },
            }
        }
        if options.demo && options.host.is_some() {
            bail!("--demo and --host cannot be combined");
        }
        Ok(options)
    }
}

pub fn run(options: RunOptions) -> Result<()> {
    let cfg = config::load(config::LoadOptions::default()).context("load config")?;
    let config_path = config::default_path();
    init_tracing(&cfg);

    let (transport, device) = connect(&options)?;
    info!(
        node = transport.my_node_num(),
        channels = transport.channels().len(),
        "connected"
    );

    if options.settings_only {
        let mut runner = SettingsRunner::new(device, cfg, config_path);
        return ui::with_terminal(|terminal| runner.run(terminal));
    }

    let store = Store::open(storage::Options {
        path: cfg.storage.db_path.clone(),
    })
    .context("open storage")?;

    let mut state = ChatState::new(transport.my_node_num(), &transport.channels());
    state.single_pane_mode = cfg.ui.single_pane_mode;

    let reducer = Arc::new(Reducer::new(
        store.clone(),
        transport.clone(),
        cfg.messages.clone(),
        cfg.ui.node_sort,
        cfg.ui.notification_sound,
    ));
    for node in transport.nodes() {
        if let Err(err) = store.upsert_node(&node) {
            warn!(node = node.num, error = %err, "failed to store node");
        }
    }
    reducer.refresh_roster(&mut state);
    if let Err(err) = reducer.restore_history(&mut state) {
        warn!(error = %err, "could not restore message history");
    }

    let shared = Shared::new(state);
    ui::spawn_event_pump(transport.as_ref(), shared.clone(), reducer.clone())?;

    let outbound = Outbound::new(
        transport,
        store,
        cfg.messages.clone(),
        cfg.limits.clone(),
    );
    let controller =
        ChatController::new(shared.clone(), device.clone(), reducer.clone(), outbound);
    let settings = SettingsRunner::new(device, cfg, config_path);
    let mut view = ChatView::new(shared, controller, settings);

    let result = ui::with_terminal(|terminal| view.run(terminal));
    if let Err(err) = &result {
        error!(error = ?err, "interactive session failed");
    }
    result
}

type Link = (Arc<dyn Transport>, Arc<dyn DeviceControl>);

fn split<T: DeviceControl + 'static>(link: Arc<T>) -> Link {
    (link.clone(), link)
}

/// Opens the simulated mesh for `--demo`, otherwise the bridge at `--host`
/// or on localhost.
fn connect(options: &RunOptions) -> Result<Link> {
    if options.demo {
        info!("starting simulated mesh");
        return Ok(split(Arc::new(SimulatedTransport::new(
            SimOptions::default(),
        ))));
    }
    let host = options
        .host
        .clone()
        .unwrap_or_else(|| format!("localhost:{DEFAULT_PORT}"));
    match BridgeTransport::connect(&host) {
        Ok(bridge) => Ok(split(Arc::new(bridge))),
        Err(err) => Err(anyhow::Error::new(err).context(format!(
            "no radio bridge reachable at {host}; pass --host or try --demo"
        ))),
    }
}

fn log_path(cfg: &Config) -> Option<PathBuf> {
    cfg.ui.log_file.clone().or_else(|| {
        dirs::data_dir().map(|dir| dir.join("mesh-tui").join("client.log"))
    })
}

fn init_tracing(cfg: &Config) {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("info"))
        .unwrap_or_else(|_| EnvFilter::new("warn"));

    let file = log_path(cfg).and_then(|path| {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).ok()?;
        }
        let file = OpenOptions::new().create(true).append(true).open(&path).ok()?;
        Some((path, file))
    });

    let Some((path, file)) = file else {
        // The terminal belongs to the UI; without a log file, log nothing.
        let _ = tracing_subscriber::registry().with(env_filter).try_init();
        return;
    };
    let initialized = tracing_subscriber::registry()
        .with(fmt::layer().with_ansi(false).with_writer(Mutex::new(file)))
        .with(env_filter)
        .try_init();
    if initialized.is_ok() {
        info!(path = %path.display(), version = crate::VERSION, "logging initialized");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn parses_transport_flags() {
        let options =
            RunOptions::parse(args(&["--host", "10.0.0.5:4403", "--settings"])).unwrap();
        assert_eq!(options.host.as_deref(), Some("10.0.0.5:4403"));
        assert!(options.settings_only);
        assert!(!options.demo);

        let options = RunOptions::parse(args(&["--host=radio.local"])).unwrap();
        assert_eq!(options.host.as_deref(), Some("radio.local"));

        assert!(RunOptions::parse(args(&["--demo"])).unwrap().demo);
    }

    #[test]
    fn rejects_bad_flag_combinations() {
        assert!(RunOptions::parse(args(&["--host"])).is_err());
        assert!(RunOptions::parse(args(&["--demo", "--host", "x"])).is_err());
    }

    #[test]
    fn rejects_unknown_arguments() {
        let err = RunOptions::parse(args(&["--demo", "--hots", "x"])).unwrap_err();
        assert!(err.to_string().contains("--hots"));
        assert!(RunOptions::parse(args(&["radio.local"])).is_err());
    }

    #[test]
    fn demo_connects_without_a_radio() {
        let (transport, device) = connect(&RunOptions {
            demo: true,
            ..RunOptions::default()
        })
        .unwrap();
        assert_eq!(transport.my_node_num(), SimOptions::default().my_node_num);
        assert!(device.device_settings().unwrap().contains_key("user.longName"));
    }

    #[test]
    fn unreachable_bridge_suggests_demo() {
        let err = connect(&RunOptions {
            host: Some("127.0.0.1:1".into()),
            ..RunOptions::default()
        })
        .err()
        .unwrap();
        assert!(format!("{err:#}").contains("--demo"));
    }
}
