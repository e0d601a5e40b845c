use clap::{Parser, Subcommand, ValueEnum};
use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::process::ExitCode;
use tokio::sync::mpsc;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use url::Url;

use foc_core::{DeviceId, DeviceSnapshot, DeviceView};
use foc_engine::{
    ConfirmGate, Intent, QueueCache, Reconciler, Renderer, Session, TransportManager, WsTransport,
};

#[derive(Parser, Debug)]
#[command(name = "foc-console", about = "Fleet ops console for the device hub")]
struct Args {
    /// Hub websocket URL. Falls back to FOC_HUB_URL.
    #[arg(long, default_value = "")]
    hub_url: String,
    /// Directory for local console state. Falls back to FOC_STATE_DIR.
    #[arg(long, default_value = "")]
    state_dir: String,
    #[arg(long, default_value_t = false)]
    debug: bool,
    /// Answer yes to every confirmation prompt.
    #[arg(short = 'y', long, default_value_t = false)]
    yes: bool,
    #[command(subcommand)]
    command: Cmd,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum PowerArg {
    On,
    Off,
}

#[derive(Subcommand, Debug)]
enum Cmd {
    /// Follow fleet broadcasts and print device state until interrupted.
    Watch,
    /// Rename a device.
    Rename { id: String, name: String },
    /// Switch power save mode on or off.
    Power { id: String, mode: PowerArg },
    /// Move a device to the queue.
    Deactivate { id: String },
    /// Bring a queued device back into the active fleet.
    Activate { id: String },
    /// Permanently remove a device.
    Release { id: String },
    /// Restore a previously removed device.
    Restore { id: String },
    /// Assign a device role.
    Role { id: String, role: String },
    /// Set the reporting interval in milliseconds.
    Reporting { id: String, interval: u64 },
    /// Set the deep sleep duration in seconds.
    Sleep { id: String, seconds: u64 },
    /// Drive a GPIO pin.
    Gpio { id: String, pin: u8, state: u8 },
    /// Request an analog read on a pin.
    Analog { id: String, pin: u8 },
    /// Set radio transmit power.
    TxPower { id: String, power: i32 },
    /// Ping a device.
    Ping { id: String },
    /// Toggle device debug output.
    Debug { id: String, enable: bool },
    /// Reboot a device.
    Reset { id: String },
    /// Factory reset a device.
    FactoryReset { id: String },
    /// Ask for an immediate sensor report.
    Report { id: String },
}

impl Cmd {
    fn into_intent(self) -> Option<Intent> {
        let intent = match self {
            Cmd::Watch => return None,
            Cmd::Rename { id, name } => Intent::Rename {
                id: DeviceId::from(id),
                name,
            },
            Cmd::Power { id, mode } => Intent::Power {
                id: DeviceId::from(id),
                save: matches!(mode, PowerArg::On),
            },
            Cmd::Deactivate { id } => Intent::Deactivate {
                id: DeviceId::from(id),
            },
            Cmd::Activate { id } => Intent::Activate {
                id: DeviceId::from(id),
            },
            Cmd::Release { id } => Intent::Release {
                id: DeviceId::from(id),
            },
            Cmd::Restore { id } => Intent::RestoreRemoved {
                id: DeviceId::from(id),
            },
            Cmd::Role { id, role } => Intent::Role {
                id: DeviceId::from(id),
                role,
            },
            Cmd::Reporting { id, interval } => Intent::Reporting {
                id: DeviceId::from(id),
                interval,
            },
            Cmd::Sleep { id, seconds } => Intent::SleepDuration {
                id: DeviceId::from(id),
                seconds,
            },
            Cmd::Gpio { id, pin, state } => Intent::Gpio {
                id: DeviceId::from(id),
                pin,
                state,
            },
            Cmd::Analog { id, pin } => Intent::Analog {
                id: DeviceId::from(id),
                pin,
            },
            Cmd::TxPower { id, power } => Intent::TxPower {
                id: DeviceId::from(id),
                power,
            },
            Cmd::Ping { id } => Intent::Ping {
                id: DeviceId::from(id),
            },
            Cmd::Debug { id, enable } => Intent::Debug {
                id: DeviceId::from(id),
                enable,
            },
            Cmd::Reset { id } => Intent::Reset {
                id: DeviceId::from(id),
            },
            Cmd::FactoryReset { id } => Intent::FactoryReset {
                id: DeviceId::from(id),
            },
            Cmd::Report { id } => Intent::TriggerReport {
                id: DeviceId::from(id),
            },
        };
        Some(intent)
    }
}

#[derive(Debug)]
struct Config {
    hub_url: Url,
    state_dir: PathBuf,
    debug: bool,
}

fn resolve_hub_url(flag: &str) -> String {
    if !flag.trim().is_empty() {
        return flag.to_string();
    }
    if let Ok(value) = std::env::var("FOC_HUB_URL") {
        if !value.trim().is_empty() {
            return value;
        }
    }
    "ws://127.0.0.1:8787/ws".to_string()
}

fn resolve_state_dir(flag: &str) -> PathBuf {
    if !flag.trim().is_empty() {
        return PathBuf::from(flag);
    }
    if let Ok(value) = std::env::var("FOC_STATE_DIR") {
        if !value.trim().is_empty() {
            return PathBuf::from(value);
        }
    }
    PathBuf::from(".foc")
}

fn load_config(args: &Args) -> Result<Config, url::ParseError> {
    let hub_url = Url::parse(&resolve_hub_url(&args.hub_url))?;
    Ok(Config {
        hub_url,
        state_dir: resolve_state_dir(&args.state_dir),
        debug: args.debug,
    })
}

fn init_logging(debug: bool) {
    let level = if debug {
        "debug".to_string()
    } else if let Ok(level) = std::env::var("FOC_LOG_LEVEL") {
        level
    } else {
        "info".to_string()
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();
}

/// y/N prompt on the terminal. Anything but an explicit yes declines.
struct TermGate {
    assume_yes: bool,
}

impl ConfirmGate for TermGate {
    fn confirm(&mut self, prompt: &str) -> bool {
        if self.assume_yes {
            return true;
        }
        eprint!("{prompt} [y/N] ");
        let _ = io::stderr().flush();
        let mut answer = String::new();
        if io::stdin().lock().read_line(&mut answer).is_err() {
            return false;
        }
        matches!(answer.trim().to_lowercase().as_str(), "y" | "yes")
    }
}

/// Line-oriented renderer: one line per device card change.
#[derive(Default)]
struct TextRenderer;

fn card_line(snapshot: &DeviceSnapshot, view: &DeviceView) -> String {
    let mut line = format!(
        "#{} {} [{}] {} (count {})",
        snapshot.id,
        snapshot.name,
        view.status_label,
        view.phase.label(),
        snapshot.counter
    );
    if let Some(role) = snapshot.device_role.as_deref() {
        line.push_str(&format!(" role={role}"));
    }
    if let Some(interval) = snapshot.reporting_interval {
        line.push_str(&format!(" interval={interval}ms"));
    }
    for reading in &view.analog {
        line.push_str(&format!(" A{}={}", reading.channel, reading.value));
    }
    if view.debug_mode {
        line.push_str(" [debug]");
    }
    if snapshot.ping_response == Some(true) {
        line.push_str(" [pong]");
    }
    line
}

impl Renderer for TextRenderer {
    type Handle = DeviceId;

    fn create(&mut self, snapshot: &DeviceSnapshot, view: &DeviceView) -> DeviceId {
        println!("+ {}", card_line(snapshot, view));
        snapshot.id.clone()
    }

    fn update(&mut self, handle: &mut DeviceId, snapshot: &DeviceSnapshot, view: &DeviceView) {
        println!("~ {}", card_line(snapshot, view));
        *handle = snapshot.id.clone();
    }

    fn destroy(&mut self, handle: DeviceId) {
        println!("- device #{handle} left the active fleet");
    }

    fn set_queue(&mut self, queued: &[DeviceSnapshot]) {
        if queued.is_empty() {
            return;
        }
        let names: Vec<String> = queued
            .iter()
            .map(|snapshot| format!("#{} {}", snapshot.id, snapshot.name))
            .collect();
        println!("queue: {}", names.join(", "));
    }
}

fn build_session(config: &Config, assume_yes: bool) -> Session<WsTransport, TextRenderer, TermGate> {
    let manager = TransportManager::new(WsTransport, config.hub_url.clone());
    let reconciler = Reconciler::new(TextRenderer);
    let cache = QueueCache::load(config.state_dir.join("removed.json"));
    Session::new(manager, reconciler, cache, TermGate { assume_yes })
}

fn removed_line(entry: &foc_engine::QueueCacheEntry) -> String {
    format!(
        "removed: #{} {} (count {}, at {})",
        entry.id,
        entry.name,
        entry.counter,
        entry.removed_at.format("%Y-%m-%d %H:%M:%S UTC")
    )
}

async fn watch(mut session: Session<WsTransport, TextRenderer, TermGate>) {
    // locally recorded removals bridge the gap until the first broadcast
    for entry in session.cache().entries() {
        println!("{}", removed_line(entry));
    }
    // the intent channel stays open but idle; watch is read-only
    let (_tx, rx) = mpsc::channel::<Intent>(8);
    tokio::select! {
        _ = session.run(rx) => {}
        _ = tokio::signal::ctrl_c() => {
            info!("interrupted, shutting down");
        }
    }
}

/// Gives a one-shot command a few reconnect rounds to leave the outbox.
async fn flush_outbox(session: &mut Session<WsTransport, TextRenderer, TermGate>) -> bool {
    let manager = session.manager_mut();
    for _ in 0..5 {
        if manager.queued() == 0 {
            return true;
        }
        if manager.reconnect_pending() {
            tokio::time::sleep(manager.reconnect_delay()).await;
            manager.reconnect_now().await;
        } else {
            manager.ensure_connected().await;
            manager.drain_if_open().await;
        }
    }
    manager.queued() == 0
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    init_logging(args.debug);
    let config = match load_config(&args) {
        Ok(value) => value,
        Err(err) => {
            error!("invalid hub url: {err}");
            return ExitCode::FAILURE;
        }
    };

    let mut session = build_session(&config, args.yes);
    if config.debug {
        info!(hub = %config.hub_url, state_dir = %config.state_dir.display(), "console starting");
    }

    match args.command {
        Cmd::Watch => {
            watch(session).await;
            ExitCode::SUCCESS
        }
        command => {
            let intent = command.into_intent().expect("one-shot commands map to intents");
            match session.dispatch(intent).await {
                Ok(foc_engine::Dispatch::Sent) => {
                    if flush_outbox(&mut session).await {
                        ExitCode::SUCCESS
                    } else {
                        warn!("command queued but undelivered, hub unreachable");
                        ExitCode::FAILURE
                    }
                }
                Ok(foc_engine::Dispatch::Declined) => {
                    info!("cancelled");
                    ExitCode::SUCCESS
                }
                Err(err) => {
                    error!("{err}");
                    ExitCode::FAILURE
                }
            }
        }
    }
}
