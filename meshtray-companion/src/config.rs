use std::time::Duration;

pub const DEFAULT_FILE_POLL_INTERVAL: Duration = Duration::from_secs(10);
pub const DEFAULT_RESUBSCRIBE_BACKOFF: Duration = Duration::from_secs(1);
pub const DEFAULT_WAITING_FILES_WAIT: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompanionConfig {
    /// Timer half of the file watcher's dual trigger.
    pub file_poll_interval: Duration,
    /// Pause before reopening the bus after a failed subscribe.
    pub resubscribe_backoff: Duration,
    /// How long the daemon may hold a waiting-files query open.
    pub waiting_files_wait: Duration,
}

impl Default for CompanionConfig {
    fn default() -> Self {
        Self {
            file_poll_interval: DEFAULT_FILE_POLL_INTERVAL,
            resubscribe_backoff: DEFAULT_RESUBSCRIBE_BACKOFF,
            waiting_files_wait: DEFAULT_WAITING_FILES_WAIT,
        }
    }
}
