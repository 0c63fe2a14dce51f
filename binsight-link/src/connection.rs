//! Driver task and handle for one hub connection
//!
//! `HubLink::connect` spawns a single driver task that owns the socket.
//! The handle talks to it over an unbounded command channel; state comes
//! back through a watch channel and inbound events through a broadcast
//! channel, so any number of consumers can observe one link.

use binsight_common::events::{HubCommand, HubEvent};
use binsight_common::{Error, Result};
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::time::Instant;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

use crate::backoff::{ReconnectSchedule, DEFAULT_MAX_ATTEMPTS, DEFAULT_SCHEDULE_SECS};
use crate::state::LinkState;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<WsStream, Message>;

/// Events buffered per subscriber before laggards start losing the oldest
const EVENT_BUFFER: usize = 256;

/// How the link talks to one hub
#[derive(Debug, Clone)]
pub struct LinkConfig {
    /// WebSocket endpoint, e.g. `ws://127.0.0.1:8420/hub`
    pub url: String,
    /// Groups re-joined after every (re)connect
    pub groups: Vec<String>,
    /// Consecutive failed attempts before the link parks in Disconnected
    pub max_attempts: u32,
    /// Delay ladder between attempts in seconds, capped at the last rung
    pub schedule_secs: Vec<u64>,
    /// Reads idle beyond this mark the connection dead
    pub idle_timeout: Duration,
    /// Ask for a SystemStatus snapshot on every (re)connect
    pub request_status_on_connect: bool,
}

impl LinkConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            groups: Vec::new(),
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            schedule_secs: DEFAULT_SCHEDULE_SECS.to_vec(),
            idle_timeout: Duration::from_secs(30),
            request_status_on_connect: true,
        }
    }

    /// Add a group to join on every connect
    pub fn with_group(mut self, group: impl Into<String>) -> Self {
        self.groups.push(group.into());
        self
    }
}

enum DriverCommand {
    Send(HubCommand),
    Reconnect,
    Shutdown,
}

/// Handle to a running link driver
///
/// Cloneable and cheap to share. When the last handle drops, the command
/// channel closes and the driver shuts itself down.
#[derive(Clone)]
pub struct HubLink {
    commands: mpsc::UnboundedSender<DriverCommand>,
    state_rx: watch::Receiver<LinkState>,
    events: broadcast::Sender<HubEvent>,
}

impl HubLink {
    /// Spawn the driver for `config` and return its handle
    ///
    /// Returns immediately; watch [`HubLink::state`] to learn when the
    /// connection is up.
    pub fn connect(config: LinkConfig) -> Self {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(LinkState::Connecting);
        let (event_tx, _) = broadcast::channel(EVENT_BUFFER);

        tokio::spawn(run_driver(config, command_rx, state_tx, event_tx.clone()));

        Self {
            commands: command_tx,
            state_rx,
            events: event_tx,
        }
    }

    /// Subscribe to inbound hub events
    ///
    /// Slow subscribers lose the oldest buffered events rather than
    /// blocking the driver.
    pub fn events(&self) -> broadcast::Receiver<HubEvent> {
        self.events.subscribe()
    }

    /// Watch connection state transitions
    pub fn state(&self) -> watch::Receiver<LinkState> {
        self.state_rx.clone()
    }

    /// Current state snapshot
    pub fn current_state(&self) -> LinkState {
        self.state_rx.borrow().clone()
    }

    /// Queue a command for the hub
    ///
    /// Fails once the driver is gone. Commands arriving while the link is
    /// between connections are dropped, never queued for later delivery.
    pub fn send(&self, command: HubCommand) -> Result<()> {
        self.commands
            .send(DriverCommand::Send(command))
            .map_err(|_| Error::Connection("link driver is gone".to_string()))
    }

    pub fn join_group(&self, group: impl Into<String>) -> Result<()> {
        self.send(HubCommand::JoinGroup {
            group: group.into(),
        })
    }

    pub fn leave_group(&self, group: impl Into<String>) -> Result<()> {
        self.send(HubCommand::LeaveGroup {
            group: group.into(),
        })
    }

    /// Ask a parked driver to start connecting again
    ///
    /// Only honored from Disconnected; returns false while the driver is
    /// connected, retrying on its own, or gone. The driver re-checks, so
    /// racing callers cannot start a second connect.
    pub fn reconnect(&self) -> bool {
        if !self.current_state().is_disconnected() {
            return false;
        }
        self.commands.send(DriverCommand::Reconnect).is_ok()
    }

    /// Stop the driver for good
    pub fn shutdown(&self) {
        let _ = self.commands.send(DriverCommand::Shutdown);
    }
}

enum SessionEnd {
    Shutdown,
    Lost(String),
}

async fn run_driver(
    config: LinkConfig,
    mut commands: mpsc::UnboundedReceiver<DriverCommand>,
    state_tx: watch::Sender<LinkState>,
    events: broadcast::Sender<HubEvent>,
) {
    let mut schedule = ReconnectSchedule::new(&config.schedule_secs, config.max_attempts);

    loop {
        match connect_async(&config.url).await {
            Ok((ws, _)) => {
                schedule.reset();
                state_tx.send_replace(LinkState::Connected);
                info!(url = %config.url, "Connected to hub");

                match run_session(ws, &config, &mut commands, &events).await {
                    SessionEnd::Shutdown => {
                        state_tx.send_replace(LinkState::Disconnected {
                            reason: "shutdown".to_string(),
                        });
                        return;
                    }
                    SessionEnd::Lost(reason) => {
                        warn!(url = %config.url, reason = %reason, "Hub connection lost");
                    }
                }
            }
            Err(e) => {
                debug!(url = %config.url, "Connect attempt failed: {e}");
            }
        }

        match schedule.next_delay() {
            Some(delay) => {
                state_tx.send_replace(LinkState::Reconnecting {
                    attempt: schedule.attempt(),
                });
                if wait_out(delay, &mut commands).await {
                    state_tx.send_replace(LinkState::Disconnected {
                        reason: "shutdown".to_string(),
                    });
                    return;
                }
            }
            None => {
                warn!(
                    url = %config.url,
                    attempts = config.max_attempts,
                    "Reconnect budget spent, link parked"
                );
                state_tx.send_replace(LinkState::Disconnected {
                    reason: format!("gave up after {} attempts", config.max_attempts),
                });

                // Parked until a manual reconnect or shutdown.
                loop {
                    match commands.recv().await {
                        Some(DriverCommand::Reconnect) => {
                            schedule.reset();
                            state_tx.send_replace(LinkState::Connecting);
                            break;
                        }
                        Some(DriverCommand::Send(command)) => {
                            warn!(command = command.name(), "Dropping command, link is disconnected");
                        }
                        Some(DriverCommand::Shutdown) | None => return,
                    }
                }
            }
        }
    }
}

/// Sleep through a backoff delay while still draining commands
///
/// Returns true when a shutdown arrived mid-wait. Sends are dropped and
/// reconnect requests ignored, the retry is already scheduled.
async fn wait_out(delay: Duration, commands: &mut mpsc::UnboundedReceiver<DriverCommand>) -> bool {
    let deadline = Instant::now() + delay;

    loop {
        tokio::select! {
            _ = tokio::time::sleep_until(deadline) => return false,
            cmd = commands.recv() => match cmd {
                Some(DriverCommand::Shutdown) | None => return true,
                Some(DriverCommand::Reconnect) => {}
                Some(DriverCommand::Send(command)) => {
                    warn!(command = command.name(), "Dropping command, link is reconnecting");
                }
            },
        }
    }
}

async fn run_session(
    ws: WsStream,
    config: &LinkConfig,
    commands: &mut mpsc::UnboundedReceiver<DriverCommand>,
    events: &broadcast::Sender<HubEvent>,
) -> SessionEnd {
    let (mut ws_tx, mut ws_rx) = ws.split();

    // The hub forgets membership on disconnect; re-establish it every time.
    for group in &config.groups {
        if let Err(reason) = send_command(
            &mut ws_tx,
            &HubCommand::JoinGroup {
                group: group.clone(),
            },
        )
        .await
        {
            return SessionEnd::Lost(reason);
        }
    }
    if config.request_status_on_connect {
        if let Err(reason) = send_command(&mut ws_tx, &HubCommand::RequestSystemStatus).await {
            return SessionEnd::Lost(reason);
        }
    }

    let mut last_inbound = Instant::now();
    let ping_interval = (config.idle_timeout / 2).max(Duration::from_secs(1));
    let mut ping_tick = tokio::time::interval_at(Instant::now() + ping_interval, ping_interval);

    loop {
        tokio::select! {
            frame = ws_rx.next() => {
                last_inbound = Instant::now();
                match frame {
                    Some(Ok(Message::Text(text))) => match serde_json::from_str::<HubEvent>(&text) {
                        Ok(event) => {
                            // No subscribers is fine, events are lossy
                            let _ = events.send(event);
                        }
                        Err(e) => debug!("Ignoring unparseable hub frame: {e}"),
                    },
                    Some(Ok(Message::Ping(data))) => {
                        if ws_tx.send(Message::Pong(data)).await.is_err() {
                            return SessionEnd::Lost("pong send failed".to_string());
                        }
                    }
                    Some(Ok(Message::Close(_))) => return SessionEnd::Lost("closed by hub".to_string()),
                    Some(Ok(_)) => {}
                    Some(Err(e)) => return SessionEnd::Lost(e.to_string()),
                    None => return SessionEnd::Lost("stream ended".to_string()),
                }
            }
            cmd = commands.recv() => match cmd {
                Some(DriverCommand::Send(command)) => {
                    if let Err(reason) = send_command(&mut ws_tx, &command).await {
                        return SessionEnd::Lost(reason);
                    }
                }
                Some(DriverCommand::Reconnect) => {
                    debug!("Ignoring reconnect request, link is connected");
                }
                Some(DriverCommand::Shutdown) | None => {
                    let _ = ws_tx.send(Message::Close(None)).await;
                    return SessionEnd::Shutdown;
                }
            },
            _ = ping_tick.tick() => {
                if last_inbound.elapsed() > config.idle_timeout {
                    return SessionEnd::Lost("idle timeout".to_string());
                }
                if ws_tx.send(Message::Ping(Vec::new())).await.is_err() {
                    return SessionEnd::Lost("ping send failed".to_string());
                }
            }
        }
    }
}

async fn send_command(ws_tx: &mut WsSink, command: &HubCommand) -> std::result::Result<(), String> {
    let json = serde_json::to_string(command).map_err(|e| e.to_string())?;
    ws_tx
        .send(Message::Text(json))
        .await
        .map_err(|e| format!("send failed: {e}"))
}
