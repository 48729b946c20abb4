use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::io::{BufRead, BufReader, Write};
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::{Path, PathBuf};

use crate::widget::{PanelModel, Slider, StatusWidget, WidgetView};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "cmd", rename_all = "kebab-case")]
pub enum IpcCommand {
    GetState,
    SetSlider { slider: Slider, value: f64 },
    /// Move both sliders to whole percentages, then activate the threshold item.
    SetThreshold { start: u8, end: u8 },
    ActivateThreshold,
    FullCharge,
    Refresh,
    SetMenu { open: bool },
    ToggleMenu,
    ReloadConfig,
    Quit,
}

/// Snapshot of the running widget for `get-state`.
#[derive(Debug, Clone, Default, Serialize)]
pub struct StateReport {
    pub icon: String,
    pub label: String,
    pub mode: Option<String>,
    pub power_source: Option<String>,
    pub battery_status: Option<String>,
    pub threshold_start: u8,
    pub threshold_end: u8,
    pub start_position: f64,
    pub end_position: f64,
    pub menu_open: bool,
    pub sampled_at: String,
    pub config_path: String,
    pub fields: serde_json::Map<String, serde_json::Value>,
}

impl StateReport {
    pub fn from_widget(widget: &StatusWidget<PanelModel>, menu_open: bool, config_path: &Path) -> Self {
        let snapshot = widget.snapshot();
        let selection = widget.selection();
        let view = widget.view();
        Self {
            icon: view.icon.icon_name().into(),
            label: view.label.clone(),
            mode: snapshot.mode().map(String::from),
            power_source: snapshot.power_source().map(String::from),
            battery_status: snapshot.battery_status().map(String::from),
            threshold_start: selection.start,
            threshold_end: selection.end,
            start_position: widget.slider(Slider::Start),
            end_position: widget.slider(Slider::End),
            menu_open,
            sampled_at: widget.sampled_at().to_rfc3339(),
            config_path: config_path.display().to_string(),
            fields: snapshot
                .iter()
                .map(|(k, v)| (k.to_string(), serde_json::Value::String(v.to_string())))
                .collect(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct IpcResponse {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Whether an elevated command was launched.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub launched: Option<bool>,
    #[serde(flatten)]
    pub state: Option<StateReport>,
}

impl IpcResponse {
    pub fn ok() -> Self {
        Self { ok: true, ..Self::default() }
    }

    pub fn err(msg: impl Into<String>) -> Self {
        Self { ok: false, error: Some(msg.into()), ..Self::default() }
    }

    pub fn launched(launched: bool) -> Self {
        Self { ok: true, launched: Some(launched), ..Self::default() }
    }

    pub fn state(report: StateReport) -> Self {
        Self { ok: true, state: Some(report), ..Self::default() }
    }
}

/// Apply a command that only touches the widget. Returns `None` for commands
/// that need the surface or the process (menu, reload, quit, state).
pub fn dispatch_widget_command<V: WidgetView>(widget: &mut StatusWidget<V>, cmd: &IpcCommand) -> Option<IpcResponse> {
    let response = match *cmd {
        IpcCommand::SetSlider { slider, value } => {
            if !value.is_finite() {
                return Some(IpcResponse::err("Slider value must be a finite number"));
            }
            widget.set_slider(slider, value);
            IpcResponse::ok()
        }
        IpcCommand::SetThreshold { start, end } => {
            if start > 100 || end > 100 {
                return Some(IpcResponse::err("Thresholds must be within 0..=100"));
            }
            widget.set_slider(Slider::Start, start as f64 / 100.0);
            widget.set_slider(Slider::End, end as f64 / 100.0);
            IpcResponse::launched(widget.on_set_threshold_activated())
        }
        IpcCommand::ActivateThreshold => IpcResponse::launched(widget.on_set_threshold_activated()),
        IpcCommand::FullCharge => {
            widget.on_full_charge_activated();
            IpcResponse::launched(true)
        }
        IpcCommand::Refresh => {
            widget.tick();
            IpcResponse::ok()
        }
        IpcCommand::GetState
        | IpcCommand::SetMenu { .. }
        | IpcCommand::ToggleMenu
        | IpcCommand::ReloadConfig
        | IpcCommand::Quit => return None,
    };
    Some(response)
}

pub fn socket_path(override_path: Option<&PathBuf>) -> PathBuf {
    if let Some(p) = override_path {
        return p.clone();
    }
    if let Ok(dir) = std::env::var("XDG_RUNTIME_DIR") {
        PathBuf::from(dir).join("tlpcare.sock")
    } else {
        let uid = unsafe { libc::getuid() };
        PathBuf::from(format!("/tmp/tlpcare-{}.sock", uid))
    }
}

pub fn create_listener(path: &Path) -> Result<UnixListener> {
    if path.exists() {
        if UnixStream::connect(path).is_ok() {
            anyhow::bail!("Another tlpcare instance is already running (socket {} is active)", path.display());
        }
        std::fs::remove_file(path)?;
    }

    let listener = UnixListener::bind(path)?;
    listener.set_nonblocking(true)?;
    log::info!("IPC listening on {}", path.display());
    Ok(listener)
}

pub fn cleanup_socket(path: &Path) {
    if path.exists() {
        let _ = std::fs::remove_file(path);
        log::info!("Removed socket {}", path.display());
    }
}

pub fn read_command(stream: &UnixStream) -> Result<IpcCommand> {
    let mut reader = BufReader::new(stream);
    let mut line = String::new();
    reader.read_line(&mut line)?;
    let cmd: IpcCommand = serde_json::from_str(line.trim())?;
    Ok(cmd)
}

pub fn write_response(stream: &mut UnixStream, response: &IpcResponse) -> Result<()> {
    let json = serde_json::to_string(response)?;
    stream.write_all(json.as_bytes())?;
    stream.write_all(b"\n")?;
    stream.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::elevated::{Completion, ElevatedRunner};
    use crate::notify::Notifier;
    use crate::status::{StatusSnapshot, StatusSource};
    use crate::widget::ElevatedActions;
    use serde_json::json;
    use std::cell::RefCell;
    use std::rc::Rc;

    struct EmptySource;

    impl StatusSource for EmptySource {
        fn sample(&mut self) -> StatusSnapshot {
            StatusSnapshot::new()
        }
    }

    struct SilentNotifier;

    impl Notifier for SilentNotifier {
        fn notify(&self, _title: &str, _message: &str) {}
    }

    #[derive(Clone, Default)]
    struct RecordingRunner(Rc<RefCell<Vec<Vec<String>>>>);

    impl ElevatedRunner for RecordingRunner {
        fn run(&mut self, argv: &[String]) -> Result<()> {
            self.0.borrow_mut().push(argv.to_vec());
            Ok(())
        }

        fn reap(&mut self) -> Vec<Completion> {
            Vec::new()
        }
    }

    fn widget() -> (StatusWidget<PanelModel>, RecordingRunner) {
        let runner = RecordingRunner::default();
        let widget = StatusWidget::new(
            Box::new(EmptySource),
            PanelModel::default(),
            Box::new(SilentNotifier),
            Box::new(runner.clone()),
            ElevatedActions::default(),
            (0.6, 0.8),
        );
        (widget, runner)
    }

    #[test]
    fn parses_commands() {
        let cmd: IpcCommand = serde_json::from_value(json!({"cmd": "set-slider", "slider": "end", "value": 0.75})).unwrap();
        assert_eq!(cmd, IpcCommand::SetSlider { slider: Slider::End, value: 0.75 });

        let cmd: IpcCommand = serde_json::from_value(json!({"cmd": "set-threshold", "start": 40, "end": 80})).unwrap();
        assert_eq!(cmd, IpcCommand::SetThreshold { start: 40, end: 80 });

        let cmd: IpcCommand = serde_json::from_value(json!({"cmd": "full-charge"})).unwrap();
        assert_eq!(cmd, IpcCommand::FullCharge);

        assert!(serde_json::from_value::<IpcCommand>(json!({"cmd": "set-threshold", "start": 400, "end": 80})).is_err());
        assert!(serde_json::from_value::<IpcCommand>(json!({"cmd": "explode"})).is_err());
    }

    #[test]
    fn plain_responses_omit_state() {
        let value = serde_json::to_value(IpcResponse::ok()).unwrap();
        assert_eq!(value, json!({"ok": true}));
        let value = serde_json::to_value(IpcResponse::err("nope")).unwrap();
        assert_eq!(value, json!({"ok": false, "error": "nope"}));
        let value = serde_json::to_value(IpcResponse::launched(false)).unwrap();
        assert_eq!(value, json!({"ok": true, "launched": false}));
    }

    #[test]
    fn state_is_flattened() {
        let report = StateReport { label: "AC | Full".into(), threshold_end: 80, ..StateReport::default() };
        let value = serde_json::to_value(IpcResponse::state(report)).unwrap();
        assert_eq!(value["ok"], json!(true));
        assert_eq!(value["label"], json!("AC | Full"));
        assert_eq!(value["threshold_end"], json!(80));
    }

    #[test]
    fn command_round_trip_over_socket() {
        let (client, server) = UnixStream::pair().unwrap();
        let mut client = client;
        client.write_all(b"{\"cmd\":\"toggle-menu\"}\n").unwrap();
        assert_eq!(read_command(&server).unwrap(), IpcCommand::ToggleMenu);

        let mut server = server;
        write_response(&mut server, &IpcResponse::ok()).unwrap();
        let mut line = String::new();
        BufReader::new(&client).read_line(&mut line).unwrap();
        assert_eq!(line, "{\"ok\":true}\n");
    }

    #[test]
    fn listener_replaces_stale_socket() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tlpcare.sock");
        let first = create_listener(&path).unwrap();
        assert!(create_listener(&path).is_err());
        drop(first);
        let _second = create_listener(&path).unwrap();
        cleanup_socket(&path);
        assert!(!path.exists());
    }

    #[test]
    fn set_threshold_rejects_out_of_range() {
        let (mut widget, runner) = widget();
        let resp = dispatch_widget_command(&mut widget, &IpcCommand::SetThreshold { start: 40, end: 101 }).unwrap();
        assert!(!resp.ok);
        assert!(runner.0.borrow().is_empty());
        assert_eq!(widget.slider(Slider::End), 0.8);
    }

    #[test]
    fn set_slider_rejects_non_finite() {
        let (mut widget, _) = widget();
        for value in [f64::NAN, f64::INFINITY] {
            let resp = dispatch_widget_command(&mut widget, &IpcCommand::SetSlider { slider: Slider::Start, value }).unwrap();
            assert!(!resp.ok);
        }
        assert_eq!(widget.slider(Slider::Start), 0.6);

        let resp = dispatch_widget_command(&mut widget, &IpcCommand::SetSlider { slider: Slider::Start, value: 1.5 }).unwrap();
        assert!(resp.ok);
        assert_eq!(widget.slider(Slider::Start), 1.0);
    }

    #[test]
    fn inverted_threshold_is_not_launched() {
        let (mut widget, runner) = widget();
        let resp = dispatch_widget_command(&mut widget, &IpcCommand::SetThreshold { start: 80, end: 60 }).unwrap();
        assert!(resp.ok);
        assert_eq!(resp.launched, Some(false));
        assert!(runner.0.borrow().is_empty());
        assert_eq!(widget.selection().start, 59);
    }

    #[test]
    fn valid_threshold_launches_setcharge() {
        let (mut widget, runner) = widget();
        let resp = dispatch_widget_command(&mut widget, &IpcCommand::SetThreshold { start: 40, end: 90 }).unwrap();
        assert_eq!(resp.launched, Some(true));
        assert_eq!(runner.0.borrow()[0], ["pkexec", "tlp", "setcharge", "40", "90", "BAT0"]);
    }

    #[test]
    fn surface_commands_are_left_to_the_caller() {
        let (mut widget, _) = widget();
        assert!(dispatch_widget_command(&mut widget, &IpcCommand::ToggleMenu).is_none());
        assert!(dispatch_widget_command(&mut widget, &IpcCommand::GetState).is_none());
        assert!(dispatch_widget_command(&mut widget, &IpcCommand::Quit).is_none());
    }
}
