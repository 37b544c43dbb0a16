use std::{future::Future, path::PathBuf, pin::Pin, time::Duration};

use meshtray_core::{
    AccountProfile, MaskedPrefs, Notify, Prefs, ProfileId, StableNodeId, Status, WaitingFile,
};
use thiserror::Error;
use tokio::io::AsyncRead;

#[cfg(unix)]
mod local;

#[cfg(unix)]
pub use local::{DEFAULT_MAX_BUS_LINE, DEFAULT_SOCKET_PATH, LocalBusWatcher, LocalClient};

/// Body of a waiting file being downloaded from the daemon.
pub type Download = Pin<Box<dyn AsyncRead + Send>>;

#[derive(Debug, Error)]
pub enum DaemonError {
    #[error("cannot reach daemon at {}: {source}", path.display())]
    Connect {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    /// The daemon could not serve the call. For `DaemonClient`
    /// implementations without a socket of their own, such as in-process
    /// doubles and embedded daemons.
    #[error("daemon unavailable: {0}")]
    Unavailable(String),
    #[error("transport error: {0}")]
    Transport(#[from] hyper::Error),
    #[error("daemon returned {status}: {message}")]
    Http { status: u16, message: String },
    #[error("invalid daemon payload: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("invalid request: {0}")]
    Request(String),
    #[error("event bus closed")]
    BusClosed,
    #[error("event bus line exceeds {limit} bytes")]
    BusLineTooLong { limit: usize },
}

/// A live subscription to the daemon's event bus.
pub trait BusSubscription: Send {
    /// Waits for the next notification. Any error ends the subscription.
    fn next(&mut self) -> impl Future<Output = Result<Notify, DaemonError>> + Send;
}

/// The daemon's local control API.
///
/// Each call is a complete request/response exchange, so implementations
/// must be usable from several tasks at once without outside locking.
pub trait DaemonClient: Send + Sync + 'static {
    type Subscription: BusSubscription;

    fn status(&self) -> impl Future<Output = Result<Status, DaemonError>> + Send;

    /// Subscribes from the bus's current position; nothing is replayed.
    fn watch_bus(&self) -> impl Future<Output = Result<Self::Subscription, DaemonError>> + Send;

    fn get_prefs(&self) -> impl Future<Output = Result<Prefs, DaemonError>> + Send;

    fn edit_prefs(
        &self,
        edit: &MaskedPrefs,
    ) -> impl Future<Output = Result<Prefs, DaemonError>> + Send;

    fn await_waiting_files(
        &self,
        wait: Duration,
    ) -> impl Future<Output = Result<Vec<WaitingFile>, DaemonError>> + Send;

    fn get_waiting_file(
        &self,
        name: &str,
    ) -> impl Future<Output = Result<Download, DaemonError>> + Send;

    fn delete_waiting_file(&self, name: &str)
    -> impl Future<Output = Result<(), DaemonError>> + Send;

    fn push_file<R>(
        &self,
        target: &StableNodeId,
        size: u64,
        name: &str,
        reader: R,
    ) -> impl Future<Output = Result<(), DaemonError>> + Send
    where
        R: AsyncRead + Send + Unpin + 'static;

    /// Returns the current profile together with every known profile.
    fn profile_status(
        &self,
    ) -> impl Future<Output = Result<(AccountProfile, Vec<AccountProfile>), DaemonError>> + Send;

    fn switch_profile(&self, id: &ProfileId)
    -> impl Future<Output = Result<(), DaemonError>> + Send;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn errors_render_for_logs() {
        let unavailable = DaemonError::Unavailable("embedded daemon stopped".to_owned());
        assert_eq!(
            unavailable.to_string(),
            "daemon unavailable: embedded daemon stopped"
        );
        let too_long = DaemonError::BusLineTooLong { limit: 64 };
        assert_eq!(too_long.to_string(), "event bus line exceeds 64 bytes");
    }
}
