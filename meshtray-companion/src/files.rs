use std::{
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};

use meshtray_core::WaitingFile;
use meshtray_daemon::{DaemonClient, DaemonError, Download};
use tokio::{
    fs::File,
    io::AsyncWriteExt,
    sync::mpsc::{self, error::TrySendError},
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::{CommandError, Companion, CompanionConfig, EventSink, Notifier, UiEvent};

/// Single-slot mailbox asking the file watcher to poll now.
///
/// Pushing while a signal is already pending is a no-op, so a burst of
/// signals costs at most one extra poll.
#[derive(Debug, Clone)]
pub struct FileSignal {
    tx: mpsc::Sender<()>,
}

impl FileSignal {
    fn channel() -> (Self, mpsc::Receiver<()>) {
        let (tx, rx) = mpsc::channel(1);
        (Self { tx }, rx)
    }

    pub fn notify(&self) {
        match self.tx.try_send(()) {
            Ok(()) => {}
            Err(TrySendError::Full(())) => debug!("file poll already pending"),
            Err(TrySendError::Closed(())) => debug!("file watcher gone; signal dropped"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollOutcome {
    pub changed: bool,
    pub files: Vec<WaitingFile>,
}

/// Reconciles the known number of waiting files against the daemon.
///
/// `pending_count` is owned here and only touched from `poll`.
pub struct FileWatcher<D> {
    daemon: Arc<D>,
    events: Arc<dyn EventSink>,
    notifier: Arc<dyn Notifier>,
    signals: mpsc::Receiver<()>,
    pending_count: usize,
    interval: Duration,
    wait: Duration,
}

impl<D: DaemonClient> FileWatcher<D> {
    pub(crate) fn new(
        daemon: Arc<D>,
        events: Arc<dyn EventSink>,
        notifier: Arc<dyn Notifier>,
        config: &CompanionConfig,
    ) -> (FileSignal, Self) {
        let (signal, signals) = FileSignal::channel();
        let watcher = Self {
            daemon,
            events,
            notifier,
            signals,
            pending_count: 0,
            interval: config.file_poll_interval,
            wait: config.waiting_files_wait,
        };
        (signal, watcher)
    }

    pub fn pending_count(&self) -> usize {
        self.pending_count
    }

    /// Queries the daemon once. A failed query leaves `pending_count` as is.
    pub async fn poll(&mut self) -> Result<PollOutcome, DaemonError> {
        let files = self.daemon.await_waiting_files(self.wait).await?;
        if files.len() == self.pending_count {
            return Ok(PollOutcome {
                changed: false,
                files,
            });
        }

        info!(
            previous = self.pending_count,
            current = files.len(),
            "waiting files changed"
        );
        self.pending_count = files.len();
        for file in &files {
            self.notifier
                .notify(&format!("File {} available", file.name));
        }
        self.events.emit(UiEvent::UpdateFiles);

        Ok(PollOutcome {
            changed: true,
            files,
        })
    }

    /// Polls on every timer tick or signal until cancelled.
    pub async fn run(mut self, cancel: CancellationToken) {
        let mut signals_open = true;
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(self.interval) => {}
                signal = self.signals.recv(), if signals_open => {
                    if signal.is_none() {
                        debug!("file signal channel closed; timer only");
                        signals_open = false;
                        continue;
                    }
                }
            }

            tokio::select! {
                _ = cancel.cancelled() => break,
                result = self.poll() => {
                    if let Err(err) = result {
                        warn!("polling waiting files: {}", err);
                    }
                }
            }
        }
        debug!("file watcher stopped");
    }
}

impl<D: DaemonClient> Companion<D> {
    pub async fn files(&self) -> Result<Vec<WaitingFile>, CommandError> {
        self.daemon
            .await_waiting_files(self.config.waiting_files_wait)
            .await
            .map_err(CommandError::DaemonUnavailable)
    }

    /// Deletes a waiting file, then asks the watcher to re-poll whether or
    /// not the delete succeeded.
    pub async fn remove_file(&self, name: &str) {
        info!(file = %name, "removing waiting file");
        if let Err(err) = self.daemon.delete_waiting_file(name).await {
            warn!(file = %name, "removing waiting file: {}", err);
        }
        self.file_signal.notify();
    }

    /// Saves a waiting file into `dir` and removes it from the daemon.
    ///
    /// The download lands in a partial file next to the destination and is
    /// renamed over it only once complete, so a failed transfer leaves any
    /// existing file at the destination untouched.
    pub async fn accept_file(&self, name: &str, dir: &Path) -> Result<PathBuf, CommandError> {
        let file_name = plain_file_name(name)?;
        let destination = dir.join(file_name);
        let partial = dir.join(format!(".{file_name}{PARTIAL_SUFFIX}"));
        let mut reader = self
            .daemon
            .get_waiting_file(name)
            .await
            .map_err(CommandError::TransferFailed)?;

        if let Err(err) = download_to(&mut reader, &partial).await {
            warn!(file = %name, "downloading waiting file: {}", err);
            if let Err(cleanup) = tokio::fs::remove_file(&partial).await {
                debug!(path = %partial.display(), "removing partial download: {}", cleanup);
            }
            return Err(err.into());
        }
        tokio::fs::rename(&partial, &destination).await?;

        self.notifier.notify(&format!(
            "Downloaded {} to {}",
            name,
            destination.display()
        ));
        self.remove_file(name).await;
        Ok(destination)
    }

    /// Streams a local file to the peer with the given DNS name.
    pub async fn upload_file(&self, dns_name: &str, path: &Path) -> Result<(), CommandError> {
        let status = self
            .daemon
            .status()
            .await
            .map_err(CommandError::DaemonUnavailable)?;
        let peer = status
            .peer_by_dns_name(dns_name)
            .ok_or_else(|| CommandError::PeerNotFound(dns_name.to_owned()))?;

        let name = path
            .file_name()
            .and_then(|name| name.to_str())
            .ok_or_else(|| CommandError::InvalidFileName(path.display().to_string()))?
            .to_owned();
        let file = File::open(path).await?;
        let size = file.metadata().await?.len();

        info!(peer = %dns_name, file = %name, size, "sending file");
        if let Err(err) = self.daemon.push_file(&peer.id, size, &name, file).await {
            warn!(peer = %dns_name, file = %name, "uploading file: {}", err);
            return Err(CommandError::TransferFailed(err));
        }

        self.notifier
            .notify(&format!("File {} sent to {}", name, dns_name));
        Ok(())
    }
}

const PARTIAL_SUFFIX: &str = ".meshtray-part";

async fn download_to(reader: &mut Download, path: &Path) -> std::io::Result<()> {
    let mut file = File::create(path).await?;
    tokio::io::copy(reader, &mut file).await?;
    file.flush().await?;
    file.sync_all().await
}

/// Rejects names that would escape the destination directory.
fn plain_file_name(name: &str) -> Result<&str, CommandError> {
    let invalid = || CommandError::InvalidFileName(name.to_owned());
    let file_name = Path::new(name)
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(invalid)?;
    if file_name != name {
        return Err(invalid());
    }
    Ok(file_name)
}
