use std::sync::Arc;

use meshtray_core::{Namespace, PeerRecord, build_directory};
use meshtray_daemon::{DaemonClient, DaemonError};
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

mod accounts;
mod bus;
mod clipboard;
mod config;
mod events;
mod exit_node;
mod files;

pub use accounts::SwitchOutcome;
pub use bus::{dispatch_notification, run_bus_loop};
pub use clipboard::{ClipboardBackend, ClipboardGate};
pub use config::{
    CompanionConfig, DEFAULT_FILE_POLL_INTERVAL, DEFAULT_RESUBSCRIBE_BACKOFF,
    DEFAULT_WAITING_FILES_WAIT,
};
pub use events::{EventSink, LogNotifier, Notifier, UiEvent};
pub use exit_node::ExitNodeOutcome;
pub use files::{FileSignal, FileWatcher, PollOutcome};

/// Failures of user-triggered commands.
#[derive(Debug, Error)]
pub enum CommandError {
    #[error("daemon unavailable: {0}")]
    DaemonUnavailable(#[source] DaemonError),
    #[error("peer {0} not found")]
    PeerNotFound(String),
    #[error("profile {0} not found")]
    ProfileNotFound(String),
    #[error("no usable exit node identifier for {0}; it needs manual connection setup")]
    NoResolvableCandidate(String),
    #[error("daemon rejected preference edit: {0}")]
    PreferenceApplyFailed(#[source] DaemonError),
    #[error("file transfer failed: {0}")]
    TransferFailed(#[source] DaemonError),
    #[error("{0} is not this node")]
    NotSelf(String),
    #[error("invalid file name {0:?}")]
    InvalidFileName(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("clipboard unavailable: {0}")]
    Clipboard(String),
}

/// Handle for the long-lived background loops.
#[derive(Debug)]
pub struct BackgroundTasks {
    pub bus: JoinHandle<()>,
    pub files: JoinHandle<()>,
}

impl BackgroundTasks {
    /// Waits for both loops to finish; they only exit once cancelled.
    pub async fn join(self) {
        let (bus, files) = tokio::join!(self.bus, self.files);
        for (task, result) in [("bus loop", bus), ("file watcher", files)] {
            if let Err(err) = result {
                warn!(task, "background task ended abnormally: {}", err);
            }
        }
    }
}

/// Mirrors daemon state for a UI and runs the commands the UI triggers.
///
/// Every query reads fresh daemon state; nothing about peers, prefs or
/// profiles is cached here.
pub struct Companion<D> {
    daemon: Arc<D>,
    events: Arc<dyn EventSink>,
    notifier: Arc<dyn Notifier>,
    file_signal: FileSignal,
    config: CompanionConfig,
}

impl<D: DaemonClient> Companion<D> {
    /// Builds the companion together with the file watcher it signals.
    pub fn new(
        daemon: Arc<D>,
        events: Arc<dyn EventSink>,
        notifier: Arc<dyn Notifier>,
        config: CompanionConfig,
    ) -> (Self, FileWatcher<D>) {
        let (file_signal, watcher) = FileWatcher::new(
            daemon.clone(),
            events.clone(),
            notifier.clone(),
            &config,
        );
        let companion = Self {
            daemon,
            events,
            notifier,
            file_signal,
            config,
        };
        (companion, watcher)
    }

    pub fn config(&self) -> &CompanionConfig {
        &self.config
    }

    pub fn file_signal(&self) -> FileSignal {
        self.file_signal.clone()
    }

    /// Spawns the bus reconciliation loop and the file watcher.
    pub fn start(&self, watcher: FileWatcher<D>, cancel: CancellationToken) -> BackgroundTasks {
        info!("companion starting");
        self.notifier.notify("Tailscale started");

        let bus = tokio::spawn(run_bus_loop(
            self.daemon.clone(),
            self.events.clone(),
            self.file_signal.clone(),
            self.config.resubscribe_backoff,
            cancel.clone(),
        ));
        let files = tokio::spawn(watcher.run(cancel));
        BackgroundTasks { bus, files }
    }

    /// Peers grouped by namespace, from a fresh status read.
    pub async fn namespaces(&self) -> Result<Vec<Namespace>, CommandError> {
        let status = self
            .daemon
            .status()
            .await
            .map_err(CommandError::DaemonUnavailable)?;
        Ok(build_directory(&status))
    }

    /// This node, flagged exit-node capable when it advertises default routes.
    pub async fn self_peer(&self) -> Result<PeerRecord, CommandError> {
        let status = self
            .daemon
            .status()
            .await
            .map_err(CommandError::DaemonUnavailable)?;
        let mut peer = PeerRecord::from(&status.self_status);

        let prefs = self
            .daemon
            .get_prefs()
            .await
            .map_err(CommandError::DaemonUnavailable)?;
        peer.exit_node_capable = prefs.advertises_exit_node();
        Ok(peer)
    }
}
