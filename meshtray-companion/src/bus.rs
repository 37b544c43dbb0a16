use std::{sync::Arc, time::Duration};

use meshtray_core::{BackendState, Notify};
use meshtray_daemon::{BusSubscription, DaemonClient};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::{EventSink, FileSignal, UiEvent};

/// Keeps a bus subscription open until `cancel` fires.
///
/// A failed subscribe is retried after `backoff`. A read error drops the
/// subscription and reopens it at the bus's current position; anything
/// published in between is not replayed.
pub async fn run_bus_loop<D: DaemonClient>(
    daemon: Arc<D>,
    events: Arc<dyn EventSink>,
    file_signal: FileSignal,
    backoff: Duration,
    cancel: CancellationToken,
) {
    'watch: loop {
        let opened = tokio::select! {
            _ = cancel.cancelled() => break,
            opened = daemon.watch_bus() => opened,
        };

        let mut subscription = match opened {
            Ok(subscription) => subscription,
            Err(err) => {
                warn!("loading bus watcher: {}", err);
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(backoff) => continue,
                }
            }
        };
        info!("watching daemon bus");

        loop {
            let next = tokio::select! {
                _ = cancel.cancelled() => break 'watch,
                next = subscription.next() => next,
            };

            match next {
                Ok(notify) => dispatch_notification(&notify, events.as_ref(), &file_signal),
                Err(err) => {
                    warn!("watching bus: {}", err);
                    break;
                }
            }
        }
    }
    debug!("bus loop stopped");
}

/// Turns one bus notification into watcher signals and UI events.
pub fn dispatch_notification(notify: &Notify, events: &dyn EventSink, file_signal: &FileSignal) {
    if notify.files_waiting.is_some() {
        file_signal.notify();
    }

    if let Some(state) = notify.state {
        events.emit(if state == BackendState::Running {
            UiEvent::AppRunning
        } else {
            UiEvent::AppNotRunning
        });
    }

    events.emit(UiEvent::UpdateAll);
    debug!(?notify, "bus update");
}
