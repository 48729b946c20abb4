use anyhow::{Context, Result};
use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::Shell;
use serde_json::json;
use std::io::{BufRead, BufReader, Write};
use std::os::unix::net::UnixStream;
use std::path::{Path, PathBuf};

use crate::ipc;

#[derive(Parser, Debug)]
#[command(name = "ctl", about = "Control a running tlpcare instance")]
pub struct CtlArgs {
    /// Override socket path
    #[arg(long)]
    socket: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Print current state as JSON
    State,
    /// Move a threshold slider without applying it
    Slider {
        /// start or end
        slider: String,
        /// Position in percent
        #[arg(value_parser = clap::value_parser!(u8).range(0..=100))]
        percent: u8,
    },
    /// Set both thresholds and apply them (tlp setcharge)
    Threshold {
        #[arg(value_parser = clap::value_parser!(u8).range(0..=100))]
        start: u8,
        #[arg(value_parser = clap::value_parser!(u8).range(0..=100))]
        end: u8,
    },
    /// Apply the thresholds currently shown on the sliders
    Apply,
    /// Charge the battery to 100% once (tlp fullcharge)
    FullCharge,
    /// Resample status immediately
    Refresh,
    /// Open, close, or toggle the popup menu
    Menu {
        /// open, close, or toggle
        mode: String,
    },
    /// Reload configuration file
    Reload,
    /// Shut down tlpcare
    Quit,
    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        shell: Shell,
    },
}

fn build_command(command: &Commands) -> Result<serde_json::Value> {
    let cmd = match command {
        Commands::State => json!({"cmd": "get-state"}),
        Commands::Slider { slider, percent } => match slider.as_str() {
            "start" | "end" => json!({"cmd": "set-slider", "slider": slider, "value": *percent as f64 / 100.0}),
            other => anyhow::bail!("Unknown slider: {}. Use start or end", other),
        },
        Commands::Threshold { start, end } => json!({"cmd": "set-threshold", "start": start, "end": end}),
        Commands::Apply => json!({"cmd": "activate-threshold"}),
        Commands::FullCharge => json!({"cmd": "full-charge"}),
        Commands::Refresh => json!({"cmd": "refresh"}),
        Commands::Menu { mode } => match mode.as_str() {
            "open" => json!({"cmd": "set-menu", "open": true}),
            "close" => json!({"cmd": "set-menu", "open": false}),
            "toggle" => json!({"cmd": "toggle-menu"}),
            other => anyhow::bail!("Unknown menu mode: {}. Use open, close, or toggle", other),
        },
        Commands::Reload => json!({"cmd": "reload-config"}),
        Commands::Quit => json!({"cmd": "quit"}),
        Commands::Completions { .. } => anyhow::bail!("completions are generated locally"),
    };
    Ok(cmd)
}

fn send_command(socket: &Path, cmd: serde_json::Value) -> Result<serde_json::Value> {
    let mut stream = UnixStream::connect(socket)
        .with_context(|| format!("Failed to connect to tlpcare at {}", socket.display()))?;

    let msg = serde_json::to_string(&cmd)? + "\n";
    stream.write_all(msg.as_bytes())?;
    stream.flush()?;

    let mut reader = BufReader::new(&stream);
    let mut response = String::new();
    reader.read_line(&mut response)?;

    let resp: serde_json::Value = serde_json::from_str(&response)
        .context("Failed to parse response from tlpcare")?;
    Ok(resp)
}

pub fn run(args: CtlArgs) -> Result<()> {
    if let Commands::Completions { shell } = &args.command {
        let mut cmd = crate::Cli::command();
        clap_complete::generate(*shell, &mut cmd, "tlpcare", &mut std::io::stdout());
        return Ok(());
    }

    let sock = ipc::socket_path(args.socket.as_ref());
    let cmd = build_command(&args.command)?;
    let resp = send_command(&sock, cmd)?;

    if let Some(true) = resp.get("ok").and_then(|v| v.as_bool()) {
        match &args.command {
            Commands::State => println!("{}", serde_json::to_string_pretty(&resp)?),
            Commands::Threshold { .. } | Commands::Apply => {
                if resp.get("launched").and_then(|v| v.as_bool()) == Some(false) {
                    eprintln!("Threshold rejected: start must be below end");
                    std::process::exit(2);
                }
            }
            _ => {}
        }
    } else {
        let err = resp.get("error").and_then(|v| v.as_str()).unwrap_or("Unknown error");
        eprintln!("Error: {}", err);
        std::process::exit(1);
    }

    Ok(())
}
