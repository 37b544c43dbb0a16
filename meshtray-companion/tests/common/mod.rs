#![allow(dead_code)]

use std::{
    collections::{HashMap, VecDeque},
    future::Future,
    io::{self, Cursor},
    net::IpAddr,
    pin::Pin,
    sync::{
        Arc, Mutex,
        atomic::{AtomicUsize, Ordering},
    },
    task::{Context, Poll},
    time::Duration,
};

use meshtray_companion::{Companion, CompanionConfig, FileWatcher, Notifier, UiEvent};
use meshtray_core::{
    AccountProfile, MaskedPrefs, Notify, PeerStatus, Prefs, ProfileId, StableNodeId, Status,
    WaitingFile,
};
use meshtray_daemon::{BusSubscription, DaemonClient, DaemonError, Download};
use tokio::{
    io::{AsyncRead, AsyncReadExt, ReadBuf},
    sync::{Semaphore, mpsc},
    time::{Instant, sleep},
};

pub type BusFeed = mpsc::UnboundedSender<Result<Notify, DaemonError>>;

#[derive(Debug, Clone)]
pub struct PushedFile {
    pub target: StableNodeId,
    pub size: u64,
    pub name: String,
    pub bytes: Vec<u8>,
}

#[derive(Default)]
pub struct FakeState {
    pub status: Status,
    pub prefs: Prefs,
    pub files: Vec<WaitingFile>,
    pub contents: HashMap<String, Vec<u8>>,
    /// Downloads of these files fail after the given number of bytes.
    pub cut_downloads: HashMap<String, usize>,
    pub current: Option<AccountProfile>,
    pub profiles: Vec<AccountProfile>,
    pub status_fails: bool,
    pub edit_fails: bool,
    pub delete_fails: bool,
    pub files_fail: bool,
}

/// In-memory daemon recording every mutating call.
#[derive(Default)]
pub struct FakeDaemon {
    pub state: Mutex<FakeState>,
    pub edits: Mutex<Vec<MaskedPrefs>>,
    pub switches: Mutex<Vec<ProfileId>>,
    pub deletes: Mutex<Vec<String>>,
    pub pushes: Mutex<Vec<PushedFile>>,
    pub subscriptions: Mutex<VecDeque<FakeSubscription>>,
    pub watch_calls: AtomicUsize,
    pub poll_calls: AtomicUsize,
    /// When set, each waiting-files query waits for one permit.
    pub poll_gate: Option<Arc<Semaphore>>,
}

impl FakeDaemon {
    pub fn with_status(status: Status) -> Self {
        let daemon = Self::default();
        daemon.state.lock().unwrap().status = status;
        daemon
    }

    /// Queues a subscription for the next `watch_bus` call.
    pub fn script_subscription(&self) -> BusFeed {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscriptions
            .lock()
            .unwrap()
            .push_back(FakeSubscription { rx });
        tx
    }

    pub fn edits(&self) -> Vec<MaskedPrefs> {
        self.edits.lock().unwrap().clone()
    }

    pub fn polls(&self) -> usize {
        self.poll_calls.load(Ordering::SeqCst)
    }

    pub fn watches(&self) -> usize {
        self.watch_calls.load(Ordering::SeqCst)
    }
}

fn rejected(what: &str) -> DaemonError {
    DaemonError::Http {
        status: 500,
        message: format!("{what} rejected"),
    }
}

pub struct FakeSubscription {
    rx: mpsc::UnboundedReceiver<Result<Notify, DaemonError>>,
}

impl BusSubscription for FakeSubscription {
    async fn next(&mut self) -> Result<Notify, DaemonError> {
        self.rx.recv().await.unwrap_or(Err(DaemonError::BusClosed))
    }
}

impl DaemonClient for FakeDaemon {
    type Subscription = FakeSubscription;

    async fn status(&self) -> Result<Status, DaemonError> {
        let state = self.state.lock().unwrap();
        if state.status_fails {
            return Err(DaemonError::Unavailable("status offline".to_owned()));
        }
        Ok(state.status.clone())
    }

    async fn watch_bus(&self) -> Result<FakeSubscription, DaemonError> {
        self.watch_calls.fetch_add(1, Ordering::SeqCst);
        self.subscriptions
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| DaemonError::Unavailable("bus offline".to_owned()))
    }

    async fn get_prefs(&self) -> Result<Prefs, DaemonError> {
        Ok(self.state.lock().unwrap().prefs.clone())
    }

    async fn edit_prefs(&self, edit: &MaskedPrefs) -> Result<Prefs, DaemonError> {
        self.edits.lock().unwrap().push(edit.clone());
        let mut state = self.state.lock().unwrap();
        if state.edit_fails {
            return Err(rejected("edit"));
        }
        if edit.exit_node_ip_set {
            state.prefs.exit_node_ip = edit.prefs.exit_node_ip;
        }
        if edit.exit_node_id_set {
            state.prefs.exit_node_id = edit.prefs.exit_node_id.clone();
        }
        if edit.advertise_routes_set {
            state.prefs.advertise_routes = edit.prefs.advertise_routes.clone();
        }
        Ok(state.prefs.clone())
    }

    async fn await_waiting_files(&self, _wait: Duration) -> Result<Vec<WaitingFile>, DaemonError> {
        self.poll_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(gate) = &self.poll_gate {
            gate.acquire().await.expect("gate open").forget();
        }
        let state = self.state.lock().unwrap();
        if state.files_fail {
            return Err(DaemonError::Unavailable("files offline".to_owned()));
        }
        Ok(state.files.clone())
    }

    async fn get_waiting_file(&self, name: &str) -> Result<Download, DaemonError> {
        let state = self.state.lock().unwrap();
        let mut bytes = state
            .contents
            .get(name)
            .cloned()
            .ok_or_else(|| DaemonError::Http {
                status: 404,
                message: format!("{name} not found"),
            })?;
        match state.cut_downloads.get(name) {
            Some(&cut) => {
                bytes.truncate(cut);
                Ok(Box::pin(Cursor::new(bytes).chain(ConnectionReset)))
            }
            None => Ok(Box::pin(Cursor::new(bytes))),
        }
    }

    async fn delete_waiting_file(&self, name: &str) -> Result<(), DaemonError> {
        self.deletes.lock().unwrap().push(name.to_owned());
        let mut state = self.state.lock().unwrap();
        if state.delete_fails {
            return Err(rejected("delete"));
        }
        state.files.retain(|file| file.name != name);
        Ok(())
    }

    async fn push_file<R>(
        &self,
        target: &StableNodeId,
        size: u64,
        name: &str,
        mut reader: R,
    ) -> Result<(), DaemonError>
    where
        R: AsyncRead + Send + Unpin + 'static,
    {
        let mut bytes = Vec::new();
        reader
            .read_to_end(&mut bytes)
            .await
            .map_err(|err| DaemonError::Unavailable(err.to_string()))?;
        self.pushes.lock().unwrap().push(PushedFile {
            target: target.clone(),
            size,
            name: name.to_owned(),
            bytes,
        });
        Ok(())
    }

    async fn profile_status(&self) -> Result<(AccountProfile, Vec<AccountProfile>), DaemonError> {
        let state = self.state.lock().unwrap();
        let current = state
            .current
            .clone()
            .ok_or_else(|| DaemonError::Unavailable("no profile".to_owned()))?;
        Ok((current, state.profiles.clone()))
    }

    async fn switch_profile(&self, id: &ProfileId) -> Result<(), DaemonError> {
        self.switches.lock().unwrap().push(id.clone());
        let mut state = self.state.lock().unwrap();
        let target = state.profiles.iter().find(|p| &p.id == id).cloned();
        state.current = target;
        Ok(())
    }
}

/// A reader whose connection drops on the first read.
struct ConnectionReset;

impl AsyncRead for ConnectionReset {
    fn poll_read(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        _buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Poll::Ready(Err(io::Error::new(
            io::ErrorKind::ConnectionReset,
            "connection reset mid-download",
        )))
    }
}

#[derive(Default)]
pub struct RecordingNotifier {
    pub messages: Mutex<Vec<String>>,
}

impl RecordingNotifier {
    pub fn messages(&self) -> Vec<String> {
        self.messages.lock().unwrap().clone()
    }
}

impl Notifier for RecordingNotifier {
    fn notify(&self, message: &str) {
        self.messages.lock().unwrap().push(message.to_owned());
    }
}

pub struct Harness {
    pub daemon: Arc<FakeDaemon>,
    pub notifier: Arc<RecordingNotifier>,
    pub events: mpsc::UnboundedReceiver<UiEvent>,
    pub companion: Companion<FakeDaemon>,
    pub watcher: Option<FileWatcher<FakeDaemon>>,
}

impl Harness {
    pub fn new(daemon: FakeDaemon) -> Self {
        Self::with_config(daemon, fast_config())
    }

    pub fn with_config(daemon: FakeDaemon, config: CompanionConfig) -> Self {
        let daemon = Arc::new(daemon);
        let notifier = Arc::new(RecordingNotifier::default());
        let (events_tx, events) = mpsc::unbounded_channel();
        let (companion, watcher) =
            Companion::new(daemon.clone(), Arc::new(events_tx), notifier.clone(), config);
        Self {
            daemon,
            notifier,
            events,
            companion,
            watcher: Some(watcher),
        }
    }

    pub fn take_watcher(&mut self) -> FileWatcher<FakeDaemon> {
        self.watcher.take().expect("watcher already taken")
    }

    pub fn drain_events(&mut self) -> Vec<UiEvent> {
        let mut drained = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            drained.push(event);
        }
        drained
    }
}

/// Long timer so only explicit signals trigger polls; short bus backoff.
pub fn fast_config() -> CompanionConfig {
    CompanionConfig {
        file_poll_interval: Duration::from_secs(3600),
        resubscribe_backoff: Duration::from_millis(20),
        waiting_files_wait: Duration::from_millis(10),
    }
}

pub fn ip(s: &str) -> IpAddr {
    s.parse().expect("valid ip")
}

pub fn peer(dns_name: &str, host_name: &str, ips: &[&str]) -> PeerStatus {
    PeerStatus {
        id: format!("stable-{host_name}"),
        public_key: format!("nodekey:{host_name}"),
        host_name: host_name.to_owned(),
        dns_name: dns_name.to_owned(),
        mesh_ips: ips.iter().map(|s| ip(s)).collect(),
        online: true,
        ..PeerStatus::default()
    }
}

/// A running status whose peers enumerate in the given order.
pub fn running_status(peers: Vec<PeerStatus>) -> Status {
    Status {
        backend_state: "Running".to_owned(),
        self_status: peer("me.t1.net.", "me", &["100.64.0.1"]),
        peers: peers
            .into_iter()
            .enumerate()
            .map(|(i, p)| (format!("nodekey:{i:04}"), p))
            .collect(),
        magic_dns_suffix: "t1.net".to_owned(),
    }
}

pub fn waiting(name: &str, size: i64) -> WaitingFile {
    WaitingFile {
        name: name.to_owned(),
        size,
    }
}

pub fn profile(id: &str, name: &str) -> AccountProfile {
    AccountProfile {
        id: id.to_owned(),
        name: name.to_owned(),
    }
}

/// Polls `condition` until it holds or `limit` elapses.
pub async fn eventually<F>(limit: Duration, mut condition: F) -> bool
where
    F: FnMut() -> bool,
{
    let deadline = Instant::now() + limit;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        sleep(Duration::from_millis(5)).await;
    }
    condition()
}

pub async fn within<T>(limit: Duration, future: impl Future<Output = T>) -> T {
    tokio::time::timeout(limit, future)
        .await
        .expect("finished in time")
}
