use notify_rust::{Notification, Timeout};

pub const ERROR_TITLE: &str = "ERROR";
pub const APP_TITLE: &str = "TLP Battery Care";

/// Fire-and-forget user notifications.
pub trait Notifier {
    fn notify(&self, title: &str, message: &str);
}

/// Sends notifications through the freedesktop notification service.
pub struct DesktopNotifier {
    timeout_ms: u32,
}

impl DesktopNotifier {
    pub fn new(timeout_ms: u32) -> Self {
        Self { timeout_ms }
    }
}

impl Default for DesktopNotifier {
    fn default() -> Self {
        Self::new(5000)
    }
}

impl Notifier for DesktopNotifier {
    fn notify(&self, title: &str, message: &str) {
        log::info!("{}: {}", title, message);
        let result = Notification::new()
            .summary(title)
            .body(message)
            .appname("tlpcare")
            .icon("battery-symbolic")
            .timeout(Timeout::Milliseconds(self.timeout_ms))
            .show();
        if let Err(e) = result {
            log::warn!("Failed to send notification: {}", e);
        }
    }
}
