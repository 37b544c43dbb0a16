#[cfg(not(unix))]
fn main() {
    eprintln!("meshtray currently supports unix-socket daemons only");
}

#[cfg(unix)]
#[tokio::main]
async fn main() -> std::process::ExitCode {
    cli::run().await
}

#[cfg(unix)]
mod cli {
    use std::{path::PathBuf, process::ExitCode, sync::Arc, time::Duration};

    use clap::{Parser, Subcommand};
    use meshtray_companion::{
        ClipboardGate, CommandError, Companion, CompanionConfig, ExitNodeOutcome, LogNotifier,
        SwitchOutcome, UiEvent,
    };
    use meshtray_daemon::{DEFAULT_SOCKET_PATH, LocalClient};
    use serde::Serialize;
    use tokio::sync::mpsc;
    use tokio_util::sync::CancellationToken;
    use tracing::{error, info};
    use tracing_subscriber::EnvFilter;

    #[derive(Parser, Debug)]
    #[command(name = "meshtray", about = "Desktop companion for the tailscale daemon")]
    struct Args {
        /// Path of the daemon's LocalAPI socket.
        #[arg(long, env = "MESHTRAY_SOCKET", default_value = DEFAULT_SOCKET_PATH)]
        socket: PathBuf,
        #[arg(long, default_value_t = 10)]
        poll_interval_secs: u64,
        /// Filter used when RUST_LOG is unset.
        #[arg(long, default_value = "info")]
        log_level: String,
        #[command(subcommand)]
        command: Command,
    }

    #[derive(Subcommand, Debug)]
    enum Command {
        /// Follow the daemon and print UI events, one per line.
        Watch,
        /// Print peers grouped by namespace as JSON.
        Peers,
        /// Print this node as JSON.
        #[command(name = "self")]
        SelfPeer,
        /// List files waiting to be accepted.
        Files,
        /// Toggle a peer as exit node.
        ExitNode { dns_name: String },
        /// Toggle advertising this node as an exit node.
        Advertise { dns_name: String },
        /// Switch to another account profile.
        Switch { account: String },
        /// Print the current account profile name.
        Account,
        /// List the other account profiles, one per line.
        Accounts,
        /// Send a file to a peer.
        Send { dns_name: String, path: PathBuf },
        /// Save a waiting file into a directory.
        Accept {
            name: String,
            #[arg(long, default_value = ".")]
            dir: PathBuf,
        },
        /// Reject a waiting file.
        Remove { name: String },
        /// Copy text to the system clipboard. On X11 and Wayland this waits
        /// until another application takes over the clipboard.
        Copy { text: String },
    }

    pub async fn run() -> ExitCode {
        let args = Args::parse();
        init_logging(&args.log_level);

        let config = CompanionConfig {
            file_poll_interval: Duration::from_secs(args.poll_interval_secs.max(1)),
            ..CompanionConfig::default()
        };
        let (events_tx, events_rx) = mpsc::unbounded_channel::<UiEvent>();
        let (companion, watcher) = Companion::new(
            Arc::new(LocalClient::new(&args.socket)),
            Arc::new(events_tx),
            Arc::new(LogNotifier),
            config,
        );

        let result = match args.command {
            Command::Watch => {
                watch(&companion, watcher, events_rx).await;
                Ok(())
            }
            Command::Peers => companion
                .namespaces()
                .await
                .and_then(|namespaces| print_json(&namespaces)),
            Command::SelfPeer => companion
                .self_peer()
                .await
                .and_then(|peer| print_json(&peer)),
            Command::Files => companion.files().await.map(|files| {
                for file in files {
                    println!("{}\t{}", file.name, file.size);
                }
            }),
            Command::ExitNode { dns_name } => {
                companion
                    .select_exit_node(&dns_name)
                    .await
                    .map(|outcome| match outcome {
                        ExitNodeOutcome::Applied { candidate, ip } => {
                            println!("using {dns_name} as exit node ({candidate} -> {ip})");
                        }
                        ExitNodeOutcome::Cleared => println!("exit node {dns_name} removed"),
                    })
            }
            Command::Advertise { dns_name } => companion
                .advertise_exit_node(&dns_name)
                .await
                .map(|advertising| println!("advertising exit node: {advertising}")),
            Command::Switch { account } => {
                companion
                    .switch_to(&account)
                    .await
                    .map(|outcome| match outcome {
                        SwitchOutcome::AlreadyCurrent => println!("already using {account}"),
                        SwitchOutcome::Switched(profile) => {
                            println!("switched to {} ({})", profile.name, profile.id);
                        }
                    })
            }
            Command::Account => companion
                .current_account()
                .await
                .map(|name| println!("{name}")),
            Command::Accounts => companion.accounts().await.map(|names| {
                for name in names {
                    println!("{name}");
                }
            }),
            Command::Send { dns_name, path } => companion.upload_file(&dns_name, &path).await,
            Command::Accept { name, dir } => companion
                .accept_file(&name, &dir)
                .await
                .map(|saved| println!("{}", saved.display())),
            Command::Remove { name } => {
                companion.remove_file(&name).await;
                Ok(())
            }
            Command::Copy { text } => {
                tokio::task::spawn_blocking(move || {
                    ClipboardGate::<arboard::Clipboard>::new().copy_and_hold(&text)
                })
                .await
                .unwrap_or_else(|err| Err(CommandError::Clipboard(err.to_string())))
            }
        };

        match result {
            Ok(()) => ExitCode::SUCCESS,
            Err(err) => {
                error!("{}", err);
                ExitCode::FAILURE
            }
        }
    }

    async fn watch(
        companion: &Companion<LocalClient>,
        watcher: meshtray_companion::FileWatcher<LocalClient>,
        mut events_rx: mpsc::UnboundedReceiver<UiEvent>,
    ) {
        let cancel = CancellationToken::new();
        let tasks = companion.start(watcher, cancel.clone());

        loop {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {
                    info!("interrupted; shutting down");
                    break;
                }
                event = events_rx.recv() => match event {
                    Some(event) => println!("{event}"),
                    None => break,
                },
            }
        }

        cancel.cancel();
        tasks.join().await;
    }

    fn print_json<T: Serialize>(value: &T) -> Result<(), CommandError> {
        let rendered = serde_json::to_string_pretty(value)
            .map_err(|err| CommandError::Io(std::io::Error::other(err)))?;
        println!("{rendered}");
        Ok(())
    }

    fn init_logging(fallback: &str) {
        let env_filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback));
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_writer(std::io::stderr)
            .init();
    }
}
