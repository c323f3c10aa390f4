//! Couchpad host: console entry point.
//!
//! Starts the controller listener, then runs a fixed-rate host loop that
//! drains the event queue on one thread, the way a game's update tick would.
//! Admin commands are read from stdin.
//!
//! # Usage
//!
//! ```text
//! couchpad-host [OPTIONS]
//!
//! Options:
//!   --config      <PATH>   Config file [default: platform config dir]
//!   --port        <PORT>   Listener port
//!   --bind        <IP>     IPv4 address to bind (skips interface discovery)
//!   --max-clients <N>      Maximum simultaneous controllers
//!   --tick-rate   <HZ>     Host loop rate
//! ```
//!
//! Flags override the config file.  Each flag can also be set through the
//! environment: `COUCHPAD_CONFIG`, `COUCHPAD_PORT`, `COUCHPAD_BIND`,
//! `COUCHPAD_MAX_CLIENTS`, `COUCHPAD_TICK_RATE`.
//!
//! # Console commands
//!
//! | Command              | Effect                                   |
//! |----------------------|------------------------------------------|
//! | `start`              | Standby → Runtime (stop admitting)       |
//! | `stop`               | Runtime → Standby (admit again)          |
//! | `status`             | Log state, room code and clients         |
//! | `kick <fingerprint>` | Close one client with a close frame      |
//! | `quit`               | Shut down                                |

use std::collections::HashMap;
use std::net::IpAddr;
use std::path::PathBuf;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use anyhow::Context;
use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

use couchpad_core::{ControllerInputRecord, RoomCode};
use couchpad_host::infrastructure::storage::config::{config_file_path, load_config, HostConfig};
use couchpad_host::{
    ClientHandle, Fingerprint, HostEventQueue, HostHandler, Server, ServerHandle, SinkError,
};

// ── CLI argument definitions ──────────────────────────────────────────────────

/// LAN controller host for couch multiplayer games.
#[derive(Debug, Parser)]
#[command(
    name = "couchpad-host",
    about = "WebSocket controller host for phone-as-gamepad games",
    version
)]
struct Cli {
    /// Path to the TOML config file.
    #[arg(long, env = "COUCHPAD_CONFIG")]
    config: Option<PathBuf>,

    /// TCP port to listen on.  0 lets the OS pick one.
    #[arg(long, env = "COUCHPAD_PORT")]
    port: Option<u16>,

    /// IPv4 address to bind instead of the discovered LAN address.
    #[arg(long, env = "COUCHPAD_BIND")]
    bind: Option<String>,

    /// Maximum simultaneous controllers.  0 falls back to 2.
    #[arg(long, env = "COUCHPAD_MAX_CLIENTS")]
    max_clients: Option<usize>,

    /// Host loop ticks per second.
    #[arg(long, env = "COUCHPAD_TICK_RATE")]
    tick_rate: Option<u32>,
}

impl Cli {
    /// Path of the config file to read.
    fn config_path(&self) -> anyhow::Result<PathBuf> {
        match &self.config {
            Some(path) => Ok(path.clone()),
            None => config_file_path().context("no --config given and no platform config dir"),
        }
    }

    /// Applies command-line overrides on top of the file configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if `--bind` is not a valid IP address.
    fn into_host_config(self, mut config: HostConfig) -> anyhow::Result<HostConfig> {
        if let Some(port) = self.port {
            config.server.port = port;
        }
        if let Some(bind) = &self.bind {
            let ip: IpAddr = bind
                .parse()
                .with_context(|| format!("invalid bind address: '{bind}'"))?;
            config.server.bind_address = Some(ip);
        }
        if let Some(max_clients) = self.max_clients {
            config.server.max_clients = max_clients;
        }
        if let Some(tick_rate) = self.tick_rate {
            config.host.tick_rate_hz = tick_rate;
        }
        Ok(config)
    }
}

// ── Console host ──────────────────────────────────────────────────────────────

/// A connected player as the console host sees it.
#[derive(Debug)]
struct Player {
    fingerprint: Fingerprint,
    last_input: Option<ControllerInputRecord>,
}

/// Minimal host that logs every event.  Stands in for a game's player
/// manager.
#[derive(Debug, Default)]
struct ConsoleHost {
    players: HashMap<ClientHandle, Player>,
    in_game: bool,
}

impl HostHandler for ConsoleHost {
    fn server_ready(&mut self, address: IpAddr, room_code: &RoomCode) {
        info!("players can join at {address} with room code {room_code}");
    }

    fn client_connected(&mut self, fingerprint: &Fingerprint) -> Result<ClientHandle, SinkError> {
        let handle = ClientHandle::new();
        if self.in_game {
            // Admitted just before the game started; its event was still queued.
            warn!("{fingerprint} joined after the game started");
        }
        info!("player {} joined from {fingerprint}", self.players.len() + 1);
        self.players.insert(
            handle,
            Player {
                fingerprint: fingerprint.clone(),
                last_input: None,
            },
        );
        Ok(handle)
    }

    fn client_disconnected(&mut self, handle: ClientHandle) {
        match self.players.remove(&handle) {
            Some(player) => info!("player from {} left", player.fingerprint),
            None => warn!("disconnect for unknown handle {handle}"),
        }
    }

    fn runtime_started(&mut self) {
        self.in_game = true;
        info!(
            "game started with {} player(s); no new connections will be accepted",
            self.players.len()
        );
    }

    fn runtime_stopped(&mut self) {
        self.in_game = false;
        info!("back in the lobby; new players can join");
    }

    fn invalid_connection(&mut self) {
        warn!("a connection was turned away");
    }

    fn input(&mut self, handle: ClientHandle, record: ControllerInputRecord) {
        if let Some(player) = self.players.get_mut(&handle) {
            let changed = player.last_input.map_or(true, |prev| {
                prev.letter_buttons != record.letter_buttons
                    || prev.direction_buttons != record.direction_buttons
            });
            if changed {
                debug!(
                    "{}: letters {:?} directions {:?}",
                    player.fingerprint,
                    record.letters(),
                    record.directions()
                );
            }
            player.last_input = Some(record);
        }
    }
}

// ── Admin commands ────────────────────────────────────────────────────────────

#[derive(Debug, PartialEq, Eq)]
enum AdminCommand {
    Start,
    Stop,
    Status,
    Kick(Fingerprint),
    Quit,
}

fn parse_command(line: &str) -> Option<AdminCommand> {
    let mut words = line.split_whitespace();
    let command = match (words.next()?, words.next()) {
        ("start", None) => AdminCommand::Start,
        ("stop", None) => AdminCommand::Stop,
        ("status", None) => AdminCommand::Status,
        ("kick", Some(fingerprint)) => AdminCommand::Kick(Fingerprint::from(fingerprint)),
        ("quit" | "exit", None) => AdminCommand::Quit,
        _ => return None,
    };
    if words.next().is_some() {
        return None;
    }
    Some(command)
}

/// Runs one command.  Returns `false` when the host should exit.
async fn run_command(server: &ServerHandle, command: AdminCommand) -> bool {
    match command {
        AdminCommand::Start => {
            if !server.start_runtime().await {
                info!("already in runtime");
            }
        }
        AdminCommand::Stop => {
            if !server.stop_runtime().await {
                info!("already on standby");
            }
        }
        AdminCommand::Status => {
            let clients = server.connected_clients().await;
            info!(
                "state {:?}, room code {}, listening on {}, {} client(s)",
                server.current_state(),
                server.room_code(),
                server.local_addr(),
                clients.len()
            );
            for client in clients {
                info!(
                    "  {} inputs={} handle={}",
                    client.fingerprint,
                    client.inputs_received,
                    client
                        .handle
                        .map(|h| h.to_string())
                        .unwrap_or_else(|| "-".to_string())
                );
            }
        }
        AdminCommand::Kick(fingerprint) => {
            if !server.disconnect_client(&fingerprint).await {
                warn!("no client with fingerprint {fingerprint}");
            }
        }
        AdminCommand::Quit => return false,
    }
    true
}

/// Forwards stdin lines to the host loop until stdin closes.
fn spawn_stdin_reader() -> mpsc::UnboundedReceiver<String> {
    let (tx, rx) = mpsc::unbounded_channel();
    tokio::spawn(async move {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => {
                    if tx.send(line).is_err() {
                        break;
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    error!("stdin read failed: {e}");
                    break;
                }
            }
        }
    });
    rx
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config_path = cli.config_path()?;
    let file_config = load_config(&config_path)
        .with_context(|| format!("failed to load config from {}", config_path.display()))?;
    let config = cli.into_host_config(file_config)?;

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&config.host.log_level)),
        )
        .init();

    info!("couchpad host starting (config {})", config_path.display());

    let (queue, mut events) = HostEventQueue::channel();
    let server = Server::start(config.server.to_server_config(), Arc::new(queue))
        .await
        .context("failed to start controller listener")?;

    // ── Shutdown flag ─────────────────────────────────────────────────────────
    let running = Arc::new(AtomicBool::new(true));
    let running_clone = Arc::clone(&running);
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("received Ctrl+C; shutting down");
                running_clone.store(false, Ordering::Relaxed);
            }
            Err(e) => error!("failed to listen for Ctrl+C signal: {e}"),
        }
    });

    // ── Host loop ─────────────────────────────────────────────────────────────
    let mut host = ConsoleHost::default();
    let mut commands = spawn_stdin_reader();
    let mut ticker = tokio::time::interval(config.host.tick_interval());

    while running.load(Ordering::Relaxed) {
        tokio::select! {
            _ = ticker.tick() => {
                events.drain(&mut host);
            }
            Some(line) = commands.recv() => match parse_command(&line) {
                Some(command) => {
                    if !run_command(&server, command).await {
                        break;
                    }
                }
                None if line.trim().is_empty() => {}
                None => warn!("unknown command: {}", line.trim()),
            },
        }
    }

    server.shutdown();
    events.drain(&mut host);
    info!("couchpad host stopped");
    Ok(())
}

// ── Tests ─────────────────────────────────────────────────────────────────────
