//! pwdevmirror - list or follow PipeWire audio sinks and sources

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use pwdevmirror::pipewire::{BoxedListener, DeviceKind, DeviceRecord, DeviceTable, LogListener};
use pwdevmirror::{Config, connect};

#[derive(Parser, Debug)]
#[command(name = "pwdevmirror", version, about)]
struct Cli {
    /// Print the current sinks and sources, then exit
    #[arg(long)]
    list: bool,

    /// With --list, print JSON instead of a table
    #[arg(long, requires = "list")]
    json: bool,

    /// PipeWire remote to connect to
    #[arg(long)]
    remote: Option<String>,

    /// Connect timeout in milliseconds
    #[arg(long, value_name = "MS")]
    timeout_ms: Option<u64>,

    /// Don't follow device volumes
    #[arg(long)]
    no_volume: bool,

    /// Config file (default: $XDG_CONFIG_HOME/pwdevmirror/config.json)
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,
}

fn main() -> ExitCode {
    // Initialize logging
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            log::error!("{}", e);
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> pwdevmirror::Result<()> {
    let mut config = match &cli.config {
        Some(path) => Config::load_from(path)?,
        None => Config::load().unwrap_or_else(|e| {
            log::warn!("{}; using defaults", e);
            Config::default()
        }),
    };
    if let Some(remote) = cli.remote {
        config.remote = Some(remote);
    }
    if let Some(timeout_ms) = cli.timeout_ms {
        config.connect_timeout_ms = timeout_ms;
    }
    if cli.no_volume {
        config.track_volume = false;
    }

    if cli.list {
        let table = DeviceTable::new();
        // One-shot: no point reconnecting
        config.reconnect.enabled = false;
        let listeners: Vec<BoxedListener> = vec![Box::new(table.listener())];
        let handle = connect(config, listeners)?;
        let devices = table.snapshot();
        let defaults = [
            table.default_device(DeviceKind::Sink),
            table.default_device(DeviceKind::Source),
        ];
        handle.disconnect();

        if cli.json {
            println!("{}", serde_json::to_string_pretty(&devices)?);
        } else if devices.is_empty() {
            println!("no audio devices");
        } else {
            for device in &devices {
                println!("{}", format_row(device, defaults.contains(&Some(device.id))));
            }
        }
        return Ok(());
    }

    log::info!("Starting pwdevmirror");
    let listeners: Vec<BoxedListener> = vec![Box::new(LogListener)];
    let handle = connect(config, listeners)?;
    handle.wait();
    Ok(())
}

fn format_row(device: &DeviceRecord, is_default: bool) -> String {
    let volume = if device.muted {
        "mute".to_string()
    } else {
        format!("{:.0}%", device.volume * 100.0)
    };
    format!(
        "{} {:<6} {:>5}  {:>4}  {}",
        if is_default { '*' } else { ' ' },
        device.kind.label(),
        device.id,
        volume,
        device.display_name()
    )
}
