mod canvas;
mod config;
mod ctl;
mod elevated;
mod ipc;
mod notify;
mod renderer;
mod scheduler;
mod status;
mod wayland;
mod widget;

use anyhow::{Context, Result};
use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::Shell;
use serde_json::json;
use std::path::PathBuf;

use crate::status::{StatusSource, TlpStatusSource};

#[derive(Parser, Debug)]
#[command(name = "tlpcare", version, about = "Wayland panel widget for TLP battery charge thresholds")]
pub struct Cli {
    /// Path to config file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override the battery passed to tlp setcharge (e.g. BAT1)
    #[arg(long)]
    battery: Option<String>,

    /// Override the status polling interval in milliseconds
    #[arg(long)]
    interval_ms: Option<u64>,

    /// Override initial start threshold slider (percent)
    #[arg(long, value_parser = clap::value_parser!(u8).range(0..=100))]
    start: Option<u8>,

    /// Override initial stop threshold slider (percent)
    #[arg(long, value_parser = clap::value_parser!(u8).range(0..=100))]
    end: Option<u8>,

    /// Override IPC socket path
    #[arg(long)]
    socket: Option<PathBuf>,

    /// Generate shell completions and exit
    #[arg(long, value_name = "SHELL")]
    completions: Option<Shell>,

    #[command(subcommand)]
    command: Option<CliCommand>,
}

#[derive(Subcommand, Debug)]
enum CliCommand {
    /// Control a running tlpcare instance
    Ctl(ctl::CtlArgs),
    /// Sample TLP status once, print it, and exit
    Status {
        /// Print as JSON
        #[arg(long)]
        json: bool,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Some(CliCommand::Ctl(args)) => ctl::run(args),
        Some(CliCommand::Status { json }) => {
            init_logging("warn");
            let (config, _) = load_with_overrides(&cli.config, &cli.battery, cli.interval_ms, cli.start, cli.end)?;
            print_status(&config, json)
        }
        None => run_daemon(cli),
    }
}

fn init_logging(default_filter: &str) {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter)).init();
}

fn load_with_overrides(
    path: &Option<PathBuf>,
    battery: &Option<String>,
    interval_ms: Option<u64>,
    start: Option<u8>,
    end: Option<u8>,
) -> Result<(config::TlpCareConfig, PathBuf)> {
    let config_path = path.clone().unwrap_or_else(config::default_config_path);
    let mut config = config::read_config(&config_path)?;

    if let Some(battery) = battery {
        config.tlp.battery = battery.clone();
    }
    if let Some(ms) = interval_ms {
        config.tlp.poll_interval_ms = ms;
    }
    if let Some(start) = start {
        config.thresholds.start = start;
    }
    if let Some(end) = end {
        config.thresholds.end = end;
    }
    config
        .validate()
        .with_context(|| format!("Invalid config: {}", config_path.display()))?;

    Ok((config, config_path))
}

fn print_status(config: &config::TlpCareConfig, as_json: bool) -> Result<()> {
    let mut source = TlpStatusSource::from_config(&config.tlp);
    let snapshot = source.sample();
    let icon = widget::derive_icon(&snapshot);
    let label = widget::derive_label(&snapshot);

    if as_json {
        let fields: serde_json::Map<String, serde_json::Value> = snapshot
            .iter()
            .map(|(k, v)| (k.to_string(), json!(v)))
            .collect();
        let out = json!({
            "icon": icon.icon_name(),
            "label": label,
            "mode": widget::derive_mode_text(&snapshot),
            "fields": fields,
        });
        println!("{}", serde_json::to_string_pretty(&out)?);
    } else {
        println!("{}  {}", icon.icon_name(), label);
        println!("{}", widget::derive_mode_text(&snapshot));
        if snapshot.is_empty() {
            println!("  (no TLP status fields)");
        }
        for (key, value) in snapshot.iter() {
            println!("  {:<24} {}", key, value);
        }
    }
    Ok(())
}

fn run_daemon(args: Cli) -> Result<()> {
    init_logging("info");

    if let Some(shell) = args.completions {
        let mut cmd = Cli::command();
        clap_complete::generate(shell, &mut cmd, "tlpcare", &mut std::io::stdout());
        return Ok(());
    }

    let (config, config_path) = load_with_overrides(&args.config, &args.battery, args.interval_ms, args.start, args.end)?;

    log::info!(
        "Starting tlpcare for {} (thresholds {}% -> {}%)",
        config.tlp.battery, config.thresholds.start, config.thresholds.end
    );

    wayland::run(config, config_path, args.socket)?;

    Ok(())
}
