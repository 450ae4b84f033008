//! Per-server state tracking and console lifecycle.
//!
//! A server manager tracks one game server's descriptor and
//! heartbeat-driven liveness, and owns at most one console connection.
//! Abnormal console closes schedule a reconnect; a clean close (1000) is
//! terminal for that attempt.

use crate::config::ClientConfig;
use crate::console::{ConsoleConnection, ConsoleEvent};
use crate::error::{ClientError, Result};
use crate::events::ClientEvent;
use crate::logging::Logger;
use crate::rest::{RestGateway, ServerPlayerInfo, ServerStatus};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, Mutex, RwLock};
use tokio::task::JoinHandle;

/// Connection state of a server's console.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerConnectionStatus {
    /// No console connection and none being opened
    Disconnected,
    /// Connection details obtained, socket handshaking
    Connecting,
    /// Console authenticated and carrying traffic
    Connected,
}

/// Mutable descriptor fields refreshed from status updates.
#[derive(Debug, Clone, Default)]
pub struct ServerDescriptor {
    pub name: Option<String>,
    pub fleet: Option<String>,
    pub playability: Option<f64>,
    pub online_players: Vec<ServerPlayerInfo>,
}

/// Tracks one game server and owns its console connection.
///
/// Invariants: a connection is present iff the status is not
/// `Disconnected`; `missed_heartbeats` resets to zero on every received
/// heartbeat; the heartbeat timer only runs while heartbeats are expected.
pub struct ServerManager {
    weak_self: Weak<Self>,
    id: i64,
    config: Arc<ClientConfig>,
    log: Logger,
    rest: Arc<RestGateway>,
    events: broadcast::Sender<ClientEvent>,
    descriptor: RwLock<ServerDescriptor>,
    status: RwLock<ServerConnectionStatus>,
    missed_heartbeats: AtomicU32,
    heartbeat_timer: Mutex<Option<JoinHandle<()>>>,
    connection: RwLock<Option<Arc<ConsoleConnection>>>,
    disposed: AtomicBool,
}

impl ServerManager {
    /// Creates a manager in the `Disconnected` state.
    pub fn new(
        id: i64,
        name: Option<String>,
        config: Arc<ClientConfig>,
        log: &Logger,
        rest: Arc<RestGateway>,
        events: broadcast::Sender<ClientEvent>,
    ) -> Arc<Self> {
        Arc::new_cyclic(|weak| Self {
            weak_self: weak.clone(),
            id,
            log: log.with_context(&format!("server-{id}")),
            config,
            rest,
            events,
            descriptor: RwLock::new(ServerDescriptor {
                name,
                ..ServerDescriptor::default()
            }),
            status: RwLock::new(ServerConnectionStatus::Disconnected),
            missed_heartbeats: AtomicU32::new(0),
            heartbeat_timer: Mutex::new(None),
            connection: RwLock::new(None),
            disposed: AtomicBool::new(false),
        })
    }

    /// The server's id.
    pub fn id(&self) -> i64 {
        self.id
    }

    /// The current connection status.
    pub async fn status(&self) -> ServerConnectionStatus {
        *self.status.read().await
    }

    /// The current console connection, if any.
    pub async fn connection(&self) -> Option<Arc<ConsoleConnection>> {
        self.connection.read().await.clone()
    }

    /// The fleet tag from the last descriptor refresh.
    pub async fn fleet(&self) -> Option<String> {
        self.descriptor.read().await.fleet.clone()
    }

    /// Players reported by the last status update.
    pub async fn online_players(&self) -> Vec<ServerPlayerInfo> {
        self.descriptor.read().await.online_players.clone()
    }

    /// Opens the console connection for this server.
    ///
    /// Obtains one-shot connection details through the REST gateway;
    /// `allowed = false` or missing details surface as `ConsoleRefused`.
    /// When a connection already exists it is returned as-is.
    pub async fn connect(&self) -> Result<Arc<ConsoleConnection>> {
        if self.disposed.load(Ordering::SeqCst) {
            return Err(ClientError::Closed(format!("Server {} disposed", self.id)));
        }

        // Claim the Connecting state up front so concurrent status events
        // cannot open a second console while details are being fetched.
        let claimed = {
            let mut status = self.status.write().await;
            if *status == ServerConnectionStatus::Disconnected {
                *status = ServerConnectionStatus::Connecting;
                true
            } else {
                false
            }
        };
        if !claimed {
            if let Some(connection) = self.connection.read().await.clone() {
                return Ok(connection);
            }
            return Err(ClientError::ConsoleRefused(format!(
                "Console connection for server {} already in progress",
                self.id
            )));
        }

        let details = match self.rest.get_server_connection_details(self.id).await {
            Ok(details) => details,
            Err(e) => {
                *self.status.write().await = ServerConnectionStatus::Disconnected;
                return Err(e);
            }
        };
        let (access, token) = match (details.allowed, details.connection, details.token) {
            (true, Some(access), Some(token)) => (access, token),
            (allowed, _, _) => {
                *self.status.write().await = ServerConnectionStatus::Disconnected;
                let reason = if allowed {
                    format!("No connection details for server {}", self.id)
                } else {
                    format!("Platform refused console access to server {}", self.id)
                };
                return Err(ClientError::ConsoleRefused(reason));
            }
        };

        self.log.info(format!(
            "Connecting console at {}:{}",
            access.address, access.websocket_port
        ));

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let connection = match ConsoleConnection::connect(
            self.id,
            &access.address,
            access.websocket_port,
            &token,
            events_tx,
            &self.log,
        )
        .await
        {
            Ok(connection) => connection,
            Err(e) => {
                *self.status.write().await = ServerConnectionStatus::Disconnected;
                return Err(e);
            }
        };

        *self.connection.write().await = Some(connection.clone());
        self.spawn_console_listener(connection.clone(), events_rx);
        Ok(connection)
    }

    /// Closes the console connection and the heartbeat timer. Idempotent.
    pub async fn disconnect(&self) {
        self.clear_heartbeat_timer().await;
        let connection = self.connection.write().await.take();
        if let Some(connection) = connection {
            connection.dispose().await;
            self.log.info("Console disconnected");
        }
        *self.status.write().await = ServerConnectionStatus::Disconnected;
    }

    /// Refreshes descriptor fields from a streamed status.
    pub async fn update(&self, status: &ServerStatus) {
        let mut descriptor = self.descriptor.write().await;
        if status.name.is_some() {
            descriptor.name = status.name.clone();
        }
        if status.fleet.is_some() {
            descriptor.fleet = status.fleet.clone();
        }
        if status.playability.is_some() {
            descriptor.playability = status.playability;
        }
        descriptor.online_players = status.online_players.clone();
    }

    /// Resets the missed-heartbeat counter; called on every received
    /// heartbeat.
    pub fn reset_missed_heartbeats(&self) {
        self.missed_heartbeats.store(0, Ordering::SeqCst);
    }

    /// Stops the heartbeat timer if one is running.
    pub async fn clear_heartbeat_timer(&self) {
        if let Some(timer) = self.heartbeat_timer.lock().await.take() {
            timer.abort();
        }
    }

    /// (Re)arms the fixed-period heartbeat timer.
    ///
    /// Each tick increments the missed counter; exhausting the budget
    /// closes the console connection and stops the timer.
    pub async fn arm_heartbeat_timer(&self) {
        let interval = Duration::from_millis(self.config.server_heartbeat_interval_ms);
        let budget = self.config.max_missed_server_heartbeats;

        let mut timer = self.heartbeat_timer.lock().await;
        if let Some(previous) = timer.take() {
            previous.abort();
        }

        let server = self.weak_self.clone();
        *timer = Some(tokio::spawn(async move {
            loop {
                tokio::time::sleep(interval).await;
                let server = match server.upgrade() {
                    Some(server) => server,
                    None => return,
                };
                if server.disposed.load(Ordering::SeqCst) {
                    return;
                }
                let missed = server.missed_heartbeats.fetch_add(1, Ordering::SeqCst) + 1;
                server
                    .log
                    .debug(format!("Missed heartbeat {missed}/{budget}"));
                if missed >= budget {
                    server.log.warn(format!(
                        "Server went quiet after {missed} missed heartbeats, closing console"
                    ));
                    // Drop this task's own handle first so disconnect's
                    // timer clear does not abort us mid-teardown.
                    server.heartbeat_timer.lock().await.take();
                    server.disconnect().await;
                    return;
                }
            }
        }));
    }

    /// Tears the manager down: timer, console, status. Idempotent.
    pub async fn dispose(&self) {
        if self.disposed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.disconnect().await;
        self.log.debug("Server manager disposed");
    }

    /// Listens for console lifecycle events: promotes `Connecting` to
    /// `Connected` on the auth confirmation, and schedules reconnects on
    /// abnormal closes.
    fn spawn_console_listener(
        &self,
        connection: Arc<ConsoleConnection>,
        mut events: mpsc::UnboundedReceiver<ConsoleEvent>,
    ) {
        let server = self.weak_self.clone();
        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                let server = match server.upgrade() {
                    Some(server) => server,
                    None => return,
                };
                match event {
                    ConsoleEvent::Opened => {
                        *server.status.write().await = ServerConnectionStatus::Connected;
                        server.log.info("Console open");
                        let _ = server.events.send(ClientEvent::Connect(connection.clone()));
                    }
                    ConsoleEvent::Closed(Some(1000)) => {
                        server.log.info("Console closed normally");
                        server.disconnect().await;
                        return;
                    }
                    ConsoleEvent::Closed(code) => {
                        server.log.warn(format!(
                            "Console closed abnormally (code {code:?}), scheduling reconnect"
                        ));
                        server.disconnect().await;
                        server.spawn_reconnect();
                        return;
                    }
                }
            }
        });
    }

    /// Retries the console connection after the recovery delay,
    /// indefinitely, until it opens or the manager is disposed.
    fn spawn_reconnect(&self) {
        let delay = Duration::from_millis(self.config.server_connection_recovery_delay_ms);
        let server = self.weak_self.clone();
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(delay).await;
                let server = match server.upgrade() {
                    Some(server) => server,
                    None => return,
                };
                if server.disposed.load(Ordering::SeqCst) {
                    return;
                }
                match server.connect().await {
                    Ok(_) => return,
                    Err(e) => {
                        server
                            .log
                            .error(format!("Console reconnect failed, retrying: {e}"));
                    }
                }
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{Credentials, TokenManager};
    use crate::logging::LogVerbosity;

    fn manager() -> (Arc<ServerManager>, broadcast::Receiver<ClientEvent>) {
        let config = Arc::new(ClientConfig {
            client_id: Some("id".to_string()),
            client_secret: Some("secret".to_string()),
            server_heartbeat_interval_ms: 20,
            max_missed_server_heartbeats: 3,
            ..ClientConfig::default()
        });
        let log = Logger::new(LogVerbosity::Quiet, "");
        let credentials = Credentials::from_config(&config).unwrap();
        let tokens = TokenManager::new(config.clone(), log.clone(), credentials);
        let rest = Arc::new(RestGateway::new(config.clone(), log.clone(), tokens));
        let (events, events_rx) = broadcast::channel(16);
        (
            ServerManager::new(7, Some("S".to_string()), config, &log, rest, events),
            events_rx,
        )
    }

    #[tokio::test]
    async fn test_initial_state() {
        let (server, _rx) = manager();
        assert_eq!(server.id(), 7);
        assert_eq!(server.status().await, ServerConnectionStatus::Disconnected);
        assert!(server.connection().await.is_none());
    }

    #[tokio::test]
    async fn test_update_refreshes_descriptor() {
        let (server, _rx) = manager();
        let status: ServerStatus = serde_json::from_value(serde_json::json!({
            "id": 7,
            "name": "Renamed",
            "fleet": "att-release",
            "isOnline": true,
            "online_players": [{"id": 99, "username": "P"}],
        }))
        .unwrap();
        server.update(&status).await;

        assert_eq!(server.fleet().await, Some("att-release".to_string()));
        assert_eq!(server.online_players().await.len(), 1);

        // An empty follow-up clears the player list but keeps the fleet.
        let quiet: ServerStatus = serde_json::from_value(serde_json::json!({
            "id": 7,
            "isOnline": false,
        }))
        .unwrap();
        server.update(&quiet).await;
        assert_eq!(server.fleet().await, Some("att-release".to_string()));
        assert!(server.online_players().await.is_empty());
    }

    #[tokio::test]
    async fn test_heartbeat_budget_expires_timer() {
        let (server, _rx) = manager();
        server.reset_missed_heartbeats();
        server.arm_heartbeat_timer().await;

        // Three ticks at 20ms exhaust the budget; the timer then stops
        // itself after disconnecting (no console is open, so disconnect is
        // a no-op state-wise).
        tokio::time::sleep(Duration::from_millis(120)).await;
        assert_eq!(server.missed_heartbeats.load(Ordering::SeqCst), 3);
        assert_eq!(server.status().await, ServerConnectionStatus::Disconnected);
    }

    #[tokio::test]
    async fn test_rearming_resets_the_tick_series() {
        let (server, _rx) = manager();
        server.arm_heartbeat_timer().await;
        tokio::time::sleep(Duration::from_millis(50)).await;

        // A fresh heartbeat resets the counter and restarts the timer.
        server.reset_missed_heartbeats();
        server.arm_heartbeat_timer().await;
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(server.missed_heartbeats.load(Ordering::SeqCst) < 3);

        server.clear_heartbeat_timer().await;
        server.dispose().await;
    }

    #[tokio::test]
    async fn test_disconnect_is_idempotent() {
        let (server, _rx) = manager();
        server.disconnect().await;
        server.disconnect().await;
        assert_eq!(server.status().await, ServerConnectionStatus::Disconnected);
        server.dispose().await;
        server.dispose().await;
    }
}
