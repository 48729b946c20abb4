use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};

use crate::config::TlpConfig;
use crate::elevated::ElevatedRunner;
use crate::notify::{Notifier, APP_TITLE, ERROR_TITLE};
use crate::status::{StatusSnapshot, StatusSource};

/// Icon shown next to the label.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IconId {
    Charging,
    PluggedIn,
    Battery,
}

impl IconId {
    /// Freedesktop icon name.
    pub fn icon_name(&self) -> &'static str {
        match self {
            IconId::Charging => "battery-good-charging-symbolic",
            IconId::PluggedIn => "ac-adapter-symbolic",
            IconId::Battery => "battery-symbolic",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Slider {
    Start,
    End,
}

/// Charge window in whole percent, as read off the two sliders.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ThresholdSelection {
    pub start: u8,
    pub end: u8,
}

impl ThresholdSelection {
    pub fn from_positions(start: f64, end: f64) -> Self {
        Self {
            start: position_to_percent(start),
            end: position_to_percent(end),
        }
    }

    pub fn is_valid(&self) -> bool {
        self.start < self.end
    }

    /// Start slider position that sits one percent below `end`.
    pub fn corrected_start(&self) -> f64 {
        (self.end as f64 - 1.0) / 100.0
    }

    pub fn menu_text(&self) -> String {
        format!("Set Charge Threshold: {}% -> {}%", self.start, self.end)
    }
}

/// Truncate a slider position to a percentage. Unlike plain truncation toward
/// zero, the epsilon keeps values like 0.58 (stored as 0.57999...) on 58
/// rather than 57.
pub fn position_to_percent(position: f64) -> u8 {
    (position.clamp(0.0, 1.0) * 100.0 + 1e-9).trunc() as u8
}

pub fn derive_icon(snapshot: &StatusSnapshot) -> IconId {
    match snapshot.battery_status() {
        Some("Charging") => IconId::Charging,
        Some("Not Charging") => IconId::PluggedIn,
        _ => IconId::Battery,
    }
}

/// `"<POWER SOURCE> | <Battery Status>"`, with placeholders for missing fields.
pub fn derive_label(snapshot: &StatusSnapshot) -> String {
    let source = snapshot.power_source().unwrap_or("unknown").to_uppercase();
    let status = snapshot.battery_status().unwrap_or("Unknown");
    format!("{} | {}", source, status)
}

pub fn derive_mode_text(snapshot: &StatusSnapshot) -> String {
    format!("TLP Mode: {}", snapshot.mode().unwrap_or("unknown"))
}

/// Handles the widget renders into.
pub trait WidgetView {
    fn set_icon(&mut self, icon: IconId);
    fn set_label(&mut self, text: &str);
    fn set_mode(&mut self, text: &str);
    fn set_threshold_item(&mut self, text: &str);
    fn set_slider(&mut self, slider: Slider, position: f64);
}

/// Render-side copy of everything the widget has pushed to its view.
#[derive(Debug, Clone, PartialEq)]
pub struct PanelModel {
    pub icon: IconId,
    pub label: String,
    pub mode: String,
    pub threshold_item: String,
    pub start: f64,
    pub end: f64,
    pub dirty: bool,
}

impl Default for PanelModel {
    fn default() -> Self {
        Self {
            icon: IconId::Battery,
            label: String::new(),
            mode: String::new(),
            threshold_item: String::new(),
            start: 0.0,
            end: 0.0,
            dirty: true,
        }
    }
}

impl PanelModel {
    /// Return and clear the dirty flag.
    pub fn take_dirty(&mut self) -> bool {
        std::mem::replace(&mut self.dirty, false)
    }
}

impl WidgetView for PanelModel {
    fn set_icon(&mut self, icon: IconId) {
        if self.icon != icon {
            self.icon = icon;
            self.dirty = true;
        }
    }

    fn set_label(&mut self, text: &str) {
        if self.label != text {
            self.label = text.to_string();
            self.dirty = true;
        }
    }

    fn set_mode(&mut self, text: &str) {
        if self.mode != text {
            self.mode = text.to_string();
            self.dirty = true;
        }
    }

    fn set_threshold_item(&mut self, text: &str) {
        if self.threshold_item != text {
            self.threshold_item = text.to_string();
            self.dirty = true;
        }
    }

    fn set_slider(&mut self, slider: Slider, position: f64) {
        let slot = match slider {
            Slider::Start => &mut self.start,
            Slider::End => &mut self.end,
        };
        if *slot != position {
            *slot = position;
            self.dirty = true;
        }
    }
}

/// Argument vectors for the two privileged actions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ElevatedActions {
    pub elevate: String,
    pub tlp: String,
    pub battery: String,
}

impl ElevatedActions {
    pub fn from_config(tlp: &TlpConfig) -> Self {
        Self {
            elevate: tlp.elevate.clone(),
            tlp: tlp.tlp.clone(),
            battery: tlp.battery.clone(),
        }
    }

    pub fn setcharge(&self, selection: ThresholdSelection) -> Vec<String> {
        vec![
            self.elevate.clone(),
            self.tlp.clone(),
            "setcharge".into(),
            selection.start.to_string(),
            selection.end.to_string(),
            self.battery.clone(),
        ]
    }

    pub fn fullcharge(&self) -> Vec<String> {
        vec![self.elevate.clone(), self.tlp.clone(), "fullcharge".into()]
    }
}

impl Default for ElevatedActions {
    fn default() -> Self {
        Self::from_config(&TlpConfig::default())
    }
}

/// Polls TLP state into a view and runs the charge actions.
pub struct StatusWidget<V: WidgetView> {
    source: Box<dyn StatusSource>,
    view: V,
    notifier: Box<dyn Notifier>,
    runner: Box<dyn ElevatedRunner>,
    actions: ElevatedActions,
    snapshot: StatusSnapshot,
    sampled_at: DateTime<Local>,
    start: f64,
    end: f64,
}

impl<V: WidgetView> StatusWidget<V> {
    pub fn new(
        source: Box<dyn StatusSource>,
        view: V,
        notifier: Box<dyn Notifier>,
        runner: Box<dyn ElevatedRunner>,
        actions: ElevatedActions,
        positions: (f64, f64),
    ) -> Self {
        let mut widget = Self {
            source,
            view,
            notifier,
            runner,
            actions,
            snapshot: StatusSnapshot::new(),
            sampled_at: Local::now(),
            start: positions.0.clamp(0.0, 1.0),
            end: positions.1.clamp(0.0, 1.0),
        };
        widget.refresh();
        widget.view.set_slider(Slider::Start, widget.start);
        widget.view.set_slider(Slider::End, widget.end);
        widget.on_threshold_slider_changed();
        widget
    }

    pub fn sample_status(&mut self) -> StatusSnapshot {
        self.source.sample()
    }

    /// One polling step: resample, re-render, and collect finished actions.
    pub fn tick(&mut self) {
        self.refresh();
        self.reap_completed();
    }

    fn refresh(&mut self) {
        self.snapshot = self.sample_status();
        self.sampled_at = Local::now();
        log::debug!("Sampled {} status fields", self.snapshot.len());

        self.view.set_icon(derive_icon(&self.snapshot));
        self.view.set_label(&derive_label(&self.snapshot));
        self.view.set_mode(&derive_mode_text(&self.snapshot));
    }

    pub fn selection(&self) -> ThresholdSelection {
        ThresholdSelection::from_positions(self.start, self.end)
    }

    pub fn slider(&self, slider: Slider) -> f64 {
        match slider {
            Slider::Start => self.start,
            Slider::End => self.end,
        }
    }

    /// Move a slider, clamped to [0, 1].
    pub fn set_slider(&mut self, slider: Slider, position: f64) {
        let position = position.clamp(0.0, 1.0);
        match slider {
            Slider::Start => self.start = position,
            Slider::End => self.end = position,
        }
        self.view.set_slider(slider, position);
        self.on_threshold_slider_changed();
    }

    pub fn on_threshold_slider_changed(&mut self) {
        let text = self.selection().menu_text();
        self.view.set_threshold_item(&text);
    }

    /// Returns whether `tlp setcharge` was launched.
    pub fn on_set_threshold_activated(&mut self) -> bool {
        let selection = self.selection();
        if !selection.is_valid() {
            self.notifier.notify(
                ERROR_TITLE,
                "Unable to set charge threshold: starting threshold is greater than stopping threshold.",
            );
            self.set_slider(Slider::Start, selection.corrected_start());
            return false;
        }

        let argv = self.actions.setcharge(selection);
        self.run_elevated(&argv);
        self.notifier.notify(APP_TITLE, "Charge threshold set.");
        true
    }

    pub fn on_full_charge_activated(&mut self) {
        let argv = self.actions.fullcharge();
        self.run_elevated(&argv);
        self.notifier.notify(APP_TITLE, "Battery is set to fully charge.");
    }

    /// Spawn without waiting. A spawn failure is only logged.
    pub fn run_elevated(&mut self, argv: &[String]) {
        if let Err(e) = self.runner.run(argv) {
            log::error!("{:#}", e);
        }
    }

    /// Report elevated commands that exited unsuccessfully.
    pub fn reap_completed(&mut self) {
        for completion in self.runner.reap() {
            let command = completion.argv.join(" ");
            if completion.success {
                log::info!("`{}` finished", command);
                continue;
            }
            log::warn!("`{}` failed with {}: {}", command, completion.describe_status(), completion.stderr);
            self.notifier.notify(
                ERROR_TITLE,
                &format!("`{}` failed ({}).", command, completion.describe_status()),
            );
        }
    }

    pub fn snapshot(&self) -> &StatusSnapshot {
        &self.snapshot
    }

    pub fn sampled_at(&self) -> DateTime<Local> {
        self.sampled_at
    }

    pub fn view(&self) -> &V {
        &self.view
    }

    pub fn view_mut(&mut self) -> &mut V {
        &mut self.view
    }

    /// Swap the status source and action spelling after a config reload.
    pub fn reconfigure(&mut self, source: Box<dyn StatusSource>, actions: ElevatedActions) {
        self.source = source;
        self.actions = actions;
        self.refresh();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::elevated::Completion;
    use std::cell::RefCell;
    use std::rc::Rc;

    struct FixedSource(StatusSnapshot);

    impl StatusSource for FixedSource {
        fn sample(&mut self) -> StatusSnapshot {
            self.0.clone()
        }
    }

    #[derive(Clone, Default)]
    struct RecordingNotifier(Rc<RefCell<Vec<(String, String)>>>);

    impl Notifier for RecordingNotifier {
        fn notify(&self, title: &str, message: &str) {
            self.0.borrow_mut().push((title.into(), message.into()));
        }
    }

    #[derive(Clone, Default)]
    struct FakeRunner {
        spawned: Rc<RefCell<Vec<Vec<String>>>>,
        finished: Rc<RefCell<Vec<Completion>>>,
        fail_spawn: bool,
    }

    impl ElevatedRunner for FakeRunner {
        fn run(&mut self, argv: &[String]) -> anyhow::Result<()> {
            if self.fail_spawn {
                anyhow::bail!("Failed to spawn {}", argv.join(" "));
            }
            self.spawned.borrow_mut().push(argv.to_vec());
            Ok(())
        }

        fn reap(&mut self) -> Vec<Completion> {
            std::mem::take(&mut *self.finished.borrow_mut())
        }
    }

    fn snapshot(source: Option<&str>, battery: Option<&str>) -> StatusSnapshot {
        let mut snap = StatusSnapshot::new();
        snap.insert("Mode", "battery");
        if let Some(source) = source {
            snap.insert("Power source", source);
        }
        if let Some(battery) = battery {
            snap.insert("Battery Status", battery);
        }
        snap
    }

    struct Harness {
        widget: StatusWidget<PanelModel>,
        notes: RecordingNotifier,
        runner: FakeRunner,
    }

    fn harness_with(snap: StatusSnapshot, runner: FakeRunner, positions: (f64, f64)) -> Harness {
        let notes = RecordingNotifier::default();
        let widget = StatusWidget::new(
            Box::new(FixedSource(snap)),
            PanelModel::default(),
            Box::new(notes.clone()),
            Box::new(runner.clone()),
            ElevatedActions::default(),
            positions,
        );
        Harness { widget, notes, runner }
    }

    fn harness(positions: (f64, f64)) -> Harness {
        harness_with(snapshot(Some("AC"), Some("Charging")), FakeRunner::default(), positions)
    }

    #[test]
    fn icon_matches_exact_status() {
        assert_eq!(derive_icon(&snapshot(None, Some("Charging"))), IconId::Charging);
        assert_eq!(derive_icon(&snapshot(None, Some("Not Charging"))), IconId::PluggedIn);
        assert_eq!(derive_icon(&snapshot(None, Some("charging"))), IconId::Battery);
        assert_eq!(derive_icon(&snapshot(None, Some("Full"))), IconId::Battery);
        assert_eq!(derive_icon(&snapshot(None, Some("Discharging"))), IconId::Battery);
        assert_eq!(derive_icon(&snapshot(None, None)), IconId::Battery);
        assert_eq!(IconId::Charging.icon_name(), "battery-good-charging-symbolic");
    }

    #[test]
    fn label_uppercases_power_source() {
        assert_eq!(derive_label(&snapshot(Some("ac"), Some("Full"))), "AC | Full");
        assert_eq!(derive_label(&snapshot(Some("battery"), Some("Discharging"))), "BATTERY | Discharging");
    }

    #[test]
    fn label_falls_back_on_missing_fields() {
        assert_eq!(derive_label(&StatusSnapshot::new()), "UNKNOWN | Unknown");
        assert_eq!(derive_mode_text(&StatusSnapshot::new()), "TLP Mode: unknown");
    }

    #[test]
    fn construction_renders_initial_state() {
        let h = harness((0.6, 0.8));
        let view = h.widget.view();
        assert_eq!(view.icon, IconId::Charging);
        assert_eq!(view.label, "AC | Charging");
        assert_eq!(view.mode, "TLP Mode: battery");
        assert_eq!(view.threshold_item, "Set Charge Threshold: 60% -> 80%");
        assert_eq!((view.start, view.end), (0.6, 0.8));
    }

    #[test]
    fn repeated_ticks_render_identically() {
        let mut h = harness((0.6, 0.8));
        h.widget.view_mut().take_dirty();
        let before = h.widget.view().clone();
        for _ in 0..5 {
            h.widget.tick();
            assert_eq!(h.widget.view().label, before.label);
            assert_eq!(h.widget.view().icon, before.icon);
        }
        assert!(!h.widget.view_mut().take_dirty());
    }

    #[test]
    fn slider_change_only_updates_item_text() {
        let mut h = harness((0.6, 0.8));
        h.widget.set_slider(Slider::Start, 0.455);
        h.widget.set_slider(Slider::End, 1.7);
        assert_eq!(h.widget.view().threshold_item, "Set Charge Threshold: 45% -> 100%");
        assert_eq!(h.widget.slider(Slider::End), 1.0);
        assert!(h.runner.spawned.borrow().is_empty());
        assert!(h.notes.0.borrow().is_empty());
    }

    #[test]
    fn valid_selection_runs_setcharge_once() {
        let mut h = harness((0.60, 0.80));
        assert!(h.widget.on_set_threshold_activated());
        assert_eq!(
            *h.runner.spawned.borrow(),
            vec![vec!["pkexec", "tlp", "setcharge", "60", "80", "BAT0"]
                .into_iter()
                .map(String::from)
                .collect::<Vec<_>>()]
        );
        assert_eq!(
            *h.notes.0.borrow(),
            vec![("TLP Battery Care".to_string(), "Charge threshold set.".to_string())]
        );
        assert_eq!(h.widget.slider(Slider::Start), 0.60);
    }

    #[test]
    fn inverted_selection_is_rejected_and_start_corrected() {
        let mut h = harness((0.80, 0.60));
        assert!(!h.widget.on_set_threshold_activated());
        assert!(h.runner.spawned.borrow().is_empty());
        let notes = h.notes.0.borrow();
        assert_eq!(notes.len(), 1);
        assert_eq!(notes[0].0, "ERROR");
        assert_eq!(h.widget.slider(Slider::Start), 0.59);
        assert_eq!(h.widget.view().start, 0.59);
        assert_eq!(h.widget.view().threshold_item, "Set Charge Threshold: 59% -> 60%");
    }

    #[test]
    fn validation_holds_for_every_pair() {
        for start in 0..=100u8 {
            for end in 0..=100u8 {
                let mut h = harness((start as f64 / 100.0, end as f64 / 100.0));
                assert_eq!(h.widget.selection(), ThresholdSelection { start, end });
                let launched = h.widget.on_set_threshold_activated();
                assert_eq!(launched, start < end, "{} -> {}", start, end);
                assert_eq!(h.runner.spawned.borrow().len(), usize::from(start < end));
                if start >= end {
                    let expected = ((end as f64 - 1.0) / 100.0).clamp(0.0, 1.0);
                    assert_eq!(h.widget.slider(Slider::Start), expected);
                    assert_eq!(h.notes.0.borrow()[0].0, "ERROR");
                }
            }
        }
    }

    #[test]
    fn full_charge_is_unconditional() {
        let mut h = harness((0.9, 0.1));
        h.widget.on_full_charge_activated();
        assert_eq!(*h.runner.spawned.borrow(), vec![vec!["pkexec".to_string(), "tlp".into(), "fullcharge".into()]]);
        assert_eq!(h.notes.0.borrow()[0].1, "Battery is set to fully charge.");
    }

    #[test]
    fn spawn_failure_is_not_surfaced() {
        let runner = FakeRunner { fail_spawn: true, ..FakeRunner::default() };
        let mut h = harness_with(snapshot(Some("AC"), Some("Full")), runner, (0.6, 0.8));
        assert!(h.widget.on_set_threshold_activated());
        let notes = h.notes.0.borrow();
        assert_eq!(notes.len(), 1);
        assert_eq!(notes[0].0, "TLP Battery Care");
    }

    #[test]
    fn failed_completion_notifies_on_next_tick() {
        let mut h = harness((0.6, 0.8));
        h.widget.on_full_charge_activated();
        h.runner.finished.borrow_mut().push(Completion {
            argv: vec!["pkexec".into(), "tlp".into(), "fullcharge".into()],
            success: false,
            code: Some(126),
            stderr: "Not authorized".into(),
        });
        h.runner.finished.borrow_mut().push(Completion {
            argv: vec!["pkexec".into(), "tlp".into(), "fullcharge".into()],
            success: true,
            code: Some(0),
            stderr: String::new(),
        });
        h.widget.tick();
        let notes = h.notes.0.borrow();
        assert_eq!(notes.len(), 2);
        assert_eq!(notes[1], ("ERROR".to_string(), "`pkexec tlp fullcharge` failed (exit status 126).".to_string()));
    }

    #[test]
    fn actions_follow_config() {
        let tlp = TlpConfig { elevate: "doas".into(), battery: "BAT1".into(), ..TlpConfig::default() };
        let actions = ElevatedActions::from_config(&tlp);
        assert_eq!(
            actions.setcharge(ThresholdSelection { start: 40, end: 75 }),
            vec!["doas", "tlp", "setcharge", "40", "75", "BAT1"]
        );
    }

    #[test]
    fn percent_truncates_toward_zero() {
        assert_eq!(position_to_percent(0.0), 0);
        assert_eq!(position_to_percent(0.589), 58);
        assert_eq!(position_to_percent(0.58), 58);
        assert_eq!(position_to_percent(0.999), 99);
        assert_eq!(position_to_percent(1.0), 100);
        assert_eq!(position_to_percent(-0.01), 0);
    }
}
