use std::fmt;

use tokio::sync::mpsc;
use tracing::info;

/// Zero-payload refresh signals for the UI layer. On receipt the UI re-queries
/// whatever state it shows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UiEvent {
    UpdateFiles,
    UpdateAll,
    AppRunning,
    AppNotRunning,
    ExitNodeConnect,
    AdvertiseExitNodeDone,
}

impl UiEvent {
    pub fn name(self) -> &'static str {
        match self {
            UiEvent::UpdateFiles => "update_files",
            UiEvent::UpdateAll => "update_all",
            UiEvent::AppRunning => "app_running",
            UiEvent::AppNotRunning => "app_not_running",
            UiEvent::ExitNodeConnect => "exit_node_connect",
            UiEvent::AdvertiseExitNodeDone => "advertise_exit_node_done",
        }
    }
}

impl fmt::Display for UiEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Fire-and-forget delivery of UI events.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: UiEvent);
}

impl EventSink for mpsc::UnboundedSender<UiEvent> {
    fn emit(&self, event: UiEvent) {
        let _ = self.send(event);
    }
}

/// User-facing notification delivery.
pub trait Notifier: Send + Sync {
    fn notify(&self, message: &str);
}

#[derive(Debug, Clone, Copy, Default)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify(&self, message: &str) {
        info!(target: "meshtray::notify", "{}", message);
    }
}
