use anyhow::{Context, Result};
use serde::{Deserialize, Deserializer, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TlpCareConfig {
    #[serde(default)]
    pub window: WindowConfig,
    #[serde(default)]
    pub theme: ThemeConfig,
    #[serde(default)]
    pub tlp: TlpConfig,
    #[serde(default)]
    pub thresholds: ThresholdConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WindowConfig {
    #[serde(default = "default_layer")]
    pub layer: String,
    #[serde(default = "default_anchor")]
    pub anchor: String,
    #[serde(default = "default_margin")]
    pub margin_top: i32,
    #[serde(default)]
    pub margin_bottom: i32,
    #[serde(default)]
    pub margin_left: i32,
    #[serde(default = "default_margin")]
    pub margin_right: i32,
    #[serde(default = "default_opacity")]
    pub opacity: f32,
    #[serde(default)]
    pub output: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThemeConfig {
    #[serde(default = "default_font")]
    pub font: String,
    #[serde(default = "default_font_size")]
    pub font_size: f32,
    #[serde(default = "default_fg_color", deserialize_with = "deserialize_color")]
    pub fg_color: [u8; 4],
    #[serde(default = "default_bg_color", deserialize_with = "deserialize_color")]
    pub bg_color: [u8; 4],
    #[serde(default = "default_accent_color", deserialize_with = "deserialize_color")]
    pub accent_color: [u8; 4],
    #[serde(default = "default_charging_color", deserialize_with = "deserialize_color")]
    pub charging_color: [u8; 4],
}

/// Where status comes from and how the elevated actions are spelled.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TlpConfig {
    #[serde(default = "default_status_command")]
    pub status_command: Vec<String>,
    #[serde(default = "default_status_marker")]
    pub status_marker: String,
    #[serde(default = "default_battery")]
    pub battery: String,
    #[serde(default = "default_power_supply_dir")]
    pub power_supply_dir: PathBuf,
    #[serde(default = "default_elevate")]
    pub elevate: String,
    #[serde(default = "default_tlp")]
    pub tlp: String,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

/// Initial slider positions in percent. These are not written back.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThresholdConfig {
    #[serde(default = "default_start")]
    pub start: u8,
    #[serde(default = "default_end")]
    pub end: u8,
}

// Defaults

fn default_layer() -> String { "top".into() }
fn default_anchor() -> String { "top right".into() }
fn default_margin() -> i32 { 12 }
fn default_opacity() -> f32 { 1.0 }
fn default_font() -> String { "sans".into() }
fn default_font_size() -> f32 { 16.0 }
fn default_status_command() -> Vec<String> { vec!["tlp-stat".into(), "-s".into()] }
fn default_status_marker() -> String { "+++ TLP Status".into() }
fn default_battery() -> String { "BAT0".into() }
fn default_power_supply_dir() -> PathBuf { PathBuf::from("/sys/class/power_supply") }
fn default_elevate() -> String { "pkexec".into() }
fn default_tlp() -> String { "tlp".into() }
fn default_poll_interval_ms() -> u64 { 1000 }
fn default_start() -> u8 { 60 }
fn default_end() -> u8 { 80 }

fn default_fg_color() -> [u8; 4] { [0xFF, 0xFF, 0xFF, 0xFF] }
fn default_bg_color() -> [u8; 4] { [0x1A, 0x1A, 0x2E, 0xE6] }
fn default_accent_color() -> [u8; 4] { [0x60, 0xA5, 0xFA, 0xFF] }
fn default_charging_color() -> [u8; 4] { [0x4A, 0xDE, 0x80, 0xFF] }

fn deserialize_color<'de, D: Deserializer<'de>>(d: D) -> Result<[u8; 4], D::Error> {
    let s = String::deserialize(d)?;
    parse_color(&s).map_err(serde::de::Error::custom)
}

pub fn parse_color(s: &str) -> Result<[u8; 4]> {
    let s = s.trim_start_matches('#');
    anyhow::ensure!(s.is_ascii(), "Invalid color: {}", s);
    anyhow::ensure!(s.len() == 6 || s.len() == 8, "Color must be RRGGBB or RRGGBBAA");
    let channel = |i: usize| u8::from_str_radix(&s[i..i + 2], 16).with_context(|| format!("Invalid color: {}", s));
    let a = if s.len() == 8 { channel(6)? } else { 0xFF };
    Ok([channel(0)?, channel(2)?, channel(4)?, a])
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            layer: default_layer(),
            anchor: default_anchor(),
            margin_top: default_margin(),
            margin_bottom: 0,
            margin_left: 0,
            margin_right: default_margin(),
            opacity: default_opacity(),
            output: None,
        }
    }
}

impl Default for ThemeConfig {
    fn default() -> Self {
        Self {
            font: default_font(),
            font_size: default_font_size(),
            fg_color: default_fg_color(),
            bg_color: default_bg_color(),
            accent_color: default_accent_color(),
            charging_color: default_charging_color(),
        }
    }
}

impl Default for TlpConfig {
    fn default() -> Self {
        Self {
            status_command: default_status_command(),
            status_marker: default_status_marker(),
            battery: default_battery(),
            power_supply_dir: default_power_supply_dir(),
            elevate: default_elevate(),
            tlp: default_tlp(),
            poll_interval_ms: default_poll_interval_ms(),
        }
    }
}

impl Default for ThresholdConfig {
    fn default() -> Self {
        Self { start: default_start(), end: default_end() }
    }
}

impl TlpConfig {
    pub fn battery_status_path(&self) -> PathBuf {
        self.power_supply_dir.join(&self.battery).join("status")
    }

    pub fn poll_interval(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.poll_interval_ms)
    }
}

impl ThresholdConfig {
    /// Slider positions in [0, 1].
    pub fn positions(&self) -> (f64, f64) {
        (self.start as f64 / 100.0, self.end as f64 / 100.0)
    }
}

impl TlpCareConfig {
    pub fn validate(&self) -> Result<()> {
        anyhow::ensure!(!self.tlp.status_command.is_empty(), "tlp.status_command must not be empty");
        anyhow::ensure!(!self.tlp.battery.is_empty(), "tlp.battery must not be empty");
        anyhow::ensure!(self.tlp.poll_interval_ms >= 100, "tlp.poll_interval_ms must be at least 100");
        anyhow::ensure!(
            self.thresholds.start <= 100 && self.thresholds.end <= 100,
            "thresholds must be within 0..=100"
        );
        anyhow::ensure!(
            (0.0..=1.0).contains(&self.window.opacity),
            "window.opacity must be within 0.0..=1.0"
        );
        anyhow::ensure!(self.theme.font_size >= 6.0, "theme.font_size must be at least 6");
        if self.thresholds.start >= self.thresholds.end {
            log::warn!(
                "Initial thresholds {}% -> {}% are inverted; setting them will be refused until adjusted",
                self.thresholds.start,
                self.thresholds.end
            );
        }
        Ok(())
    }
}

pub fn default_config_path() -> PathBuf {
    config_dir().join("config.toml")
}

fn config_dir() -> PathBuf {
    let base = std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".into());
            PathBuf::from(home).join(".config")
        });
    base.join("tlpcare")
}

/// Read and validate the config file.
pub fn load_config(path: &Path) -> Result<TlpCareConfig> {
    let config = read_config(path)?;
    config
        .validate()
        .with_context(|| format!("Invalid config: {}", path.display()))?;
    Ok(config)
}

/// Read the config file without validating it, writing the default file on
/// first run. Callers that apply overrides validate afterwards.
pub fn read_config(path: &Path) -> Result<TlpCareConfig> {
    if !path.exists() {
        log::info!("Config file not found at {}, generating default", path.display());
        if let Some(parent) = path.parent() {
            let _ = std::fs::create_dir_all(parent);
        }
        match std::fs::write(path, DEFAULT_CONFIG) {
            Ok(()) => log::info!("Created default config at {}", path.display()),
            Err(e) => log::warn!("Failed to write default config: {}", e),
        }
        return Ok(TlpCareConfig::default());
    }
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config: {}", path.display()))?;
    toml::from_str(&content).with_context(|| format!("Failed to parse config: {}", path.display()))
}

const DEFAULT_CONFIG: &str = r#"# tlpcare: TLP battery care widget
# Generated automatically on first run. Defaults are shown.

[window]
# Layer: background | bottom | top | overlay
layer  = "top"
# Anchor edges: top | bottom | left | right (space-separated)
anchor = "top right"
margin_top    = 12
margin_right  = 12
margin_bottom = 0
margin_left   = 0
# Window opacity 0.0-1.0
opacity = 1.0
# Output to display on (empty = compositor default)
# output = "eDP-1"

[theme]
# System font name or path to a .ttf/.otf
font      = "sans"
font_size = 16.0
# Colours in RRGGBB or RRGGBBAA hex (# prefix optional)
fg_color       = "FFFFFFFF"
bg_color       = "1A1A2EE6"
accent_color   = "60A5FAFF"
charging_color = "4ADE80FF"

[tlp]
# Command whose output carries the "+++ TLP Status" block
status_command = ["tlp-stat", "-s"]
status_marker  = "+++ TLP Status"
# Battery name under power_supply_dir
battery          = "BAT0"
power_supply_dir = "/sys/class/power_supply"
# Privilege elevation helper and TLP binary used for setcharge/fullcharge
elevate = "pkexec"
tlp     = "tlp"
# Status refresh interval
poll_interval_ms = 1000

[thresholds]
# Initial slider positions in percent (reset on every start)
start = 60
end   = 80
"#;
