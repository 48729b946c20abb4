use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

use crate::config::TlpConfig;

pub const MODE_KEY: &str = "Mode";
pub const POWER_SOURCE_KEY: &str = "Power source";
/// Synthetic key holding the title-cased sysfs battery status.
pub const BATTERY_STATUS_KEY: &str = "Battery Status";

/// Status fields parsed from one sample, in the order they were read.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StatusSnapshot {
    entries: Vec<(String, String)>,
}

impl StatusSnapshot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or overwrite a field. An existing key keeps its position.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        let value = value.into();
        match self.entries.iter_mut().find(|(k, _)| *k == key) {
            Some(entry) => entry.1 = value,
            None => self.entries.push((key, value)),
        }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn mode(&self) -> Option<&str> {
        self.get(MODE_KEY)
    }

    pub fn power_source(&self) -> Option<&str> {
        self.get(POWER_SOURCE_KEY)
    }

    pub fn battery_status(&self) -> Option<&str> {
        self.get(BATTERY_STATUS_KEY)
    }
}

/// Anything that can produce a fresh snapshot on demand.
pub trait StatusSource {
    fn sample(&mut self) -> StatusSnapshot;
}

/// Samples `tlp-stat` output and the sysfs battery status file.
pub struct TlpStatusSource {
    command: Vec<String>,
    marker: String,
    battery_status_path: PathBuf,
}

impl TlpStatusSource {
    pub fn new(command: Vec<String>, marker: impl Into<String>, battery_status_path: PathBuf) -> Self {
        Self {
            command,
            marker: marker.into(),
            battery_status_path,
        }
    }

    pub fn from_config(tlp: &TlpConfig) -> Self {
        Self::new(tlp.status_command.clone(), tlp.status_marker.clone(), tlp.battery_status_path())
    }

    fn run_status_command(&self) -> Option<String> {
        let (program, args) = match self.command.split_first() {
            Some(parts) => parts,
            None => {
                log::warn!("Status command is empty");
                return None;
            }
        };

        match Command::new(program).args(args).output() {
            Ok(output) => {
                if !output.status.success() {
                    log::debug!("{} exited with {}", program, output.status);
                }
                Some(String::from_utf8_lossy(&output.stdout).into_owned())
            }
            Err(e) => {
                log::warn!("Failed to run {}: {}", program, e);
                None
            }
        }
    }
}

impl StatusSource for TlpStatusSource {
    fn sample(&mut self) -> StatusSnapshot {
        let mut snapshot = StatusSnapshot::new();

        if let Some(stdout) = self.run_status_command() {
            match parse_status_block(&stdout, &self.marker) {
                Some(fields) => snapshot = fields,
                None => log::warn!("Marker {:?} not found in status output", self.marker),
            }
        }

        if let Some(status) = read_battery_status(&self.battery_status_path) {
            snapshot.insert(BATTERY_STATUS_KEY, status);
        }

        snapshot
    }
}

/// Parse the `key = value` lines that follow `marker`.
///
/// Returns `None` when the marker is absent. Lines without `=` are skipped and
/// each remaining line is split on its first `=`.
pub fn parse_status_block(text: &str, marker: &str) -> Option<StatusSnapshot> {
    let (_, block) = text.split_once(marker)?;
    let mut snapshot = StatusSnapshot::new();
    for line in block.lines() {
        if let Some((key, value)) = line.split_once('=') {
            snapshot.insert(key.trim(), value.trim());
        }
    }
    Some(snapshot)
}

/// Read a sysfs `status` file and normalise it, e.g. "Not charging" -> "Not Charging".
pub fn read_battery_status(path: &Path) -> Option<String> {
    match fs::read_to_string(path) {
        Ok(raw) => Some(title_case(&raw)),
        Err(e) => {
            log::warn!("Failed to read {}: {}", path.display(), e);
            None
        }
    }
}

/// Trim, lowercase, then capitalise the first letter of every space-separated word.
pub fn title_case(raw: &str) -> String {
    raw.trim()
        .to_lowercase()
        .split(' ')
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect(),
                None => String::new(),
            }
        })
        .collect::<Vec<String>>()
        .join(" ")
}
