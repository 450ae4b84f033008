//! Per-server console WebSocket.
//!
//! A console connection is built from one-shot parameters (address, port,
//! token) obtained through the REST gateway. The socket is plaintext; the
//! very first outbound frame is the raw token, and authentication is
//! confirmed asynchronously by an inbound `Connection Succeeded` system
//! message. After that the channel carries command-to-CommandResult RPCs
//! and named event subscriptions.

use crate::console::message::{CommandResult, ConsoleMessage};
use crate::error::{ClientError, Result};
use crate::logging::Logger;
use crate::socket::SubscriptionHandler;
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use regex::Regex;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot, Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

type WsSink = Arc<Mutex<SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>>>;

/// Guard against raw subscription commands; users must go through
/// `subscribe`/`unsubscribe` so the callback table stays consistent.
fn subscribe_command_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"(?i)^(websocket )?(un)?subscribe").expect("static regex"))
}

/// Lifecycle notifications delivered to the owning server manager.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsoleEvent {
    /// Authentication confirmed; the connection is open for commands
    Opened,
    /// The socket closed with the given code (`None` when it simply
    /// dropped)
    Closed(Option<u16>),
}

/// One live console connection to a game server.
pub struct ConsoleConnection {
    server_id: i64,
    log: Logger,
    command_id: AtomicU64,
    pending: Mutex<HashMap<u64, oneshot::Sender<ConsoleMessage>>>,
    subscriptions: RwLock<HashMap<String, SubscriptionHandler>>,
    sink: WsSink,
    reader: Mutex<Option<JoinHandle<()>>>,
    /// Inbound events queue up here so handlers are serialised without
    /// blocking the socket reader (a handler may itself send commands)
    event_queue: mpsc::UnboundedSender<(String, Value)>,
    dispatcher: Mutex<Option<JoinHandle<()>>>,
    opened: AtomicBool,
    disposed: AtomicBool,
}

impl ConsoleConnection {
    /// Opens a console socket and authenticates with the one-shot token.
    ///
    /// Returns as soon as the token frame is on the wire; the `Opened`
    /// notification on `events` confirms authentication asynchronously.
    pub async fn connect(
        server_id: i64,
        address: &str,
        port: u16,
        token: &str,
        events: mpsc::UnboundedSender<ConsoleEvent>,
        log: &Logger,
    ) -> Result<Arc<Self>> {
        let url = format!("ws://{address}:{port}");
        let (stream, _) = connect_async(&url)
            .await
            .map_err(|e| ClientError::Network(format!("Console open failed ({url}): {e}")))?;
        let (sink, stream) = stream.split();
        let sink: WsSink = Arc::new(Mutex::new(sink));

        let (event_queue, event_rx) = mpsc::unbounded_channel();
        let connection = Arc::new(Self {
            server_id,
            log: log.with_context(&format!("console-{server_id}")),
            command_id: AtomicU64::new(0),
            pending: Mutex::new(HashMap::new()),
            subscriptions: RwLock::new(HashMap::new()),
            sink: sink.clone(),
            reader: Mutex::new(None),
            event_queue,
            dispatcher: Mutex::new(None),
            opened: AtomicBool::new(false),
            disposed: AtomicBool::new(false),
        });
        *connection.dispatcher.lock().await =
            Some(Self::spawn_dispatcher(&connection, event_rx));

        // The raw token is the first and only unwrapped frame.
        sink.lock()
            .await
            .send(Message::Text(token.to_string().into()))
            .await
            .map_err(|e| ClientError::Network(format!("Console auth frame failed: {e}")))?;

        let reader = {
            let connection = Arc::downgrade(&connection);
            let sink = sink.clone();
            let mut stream = stream;
            tokio::spawn(async move {
                let mut close_code: Option<u16> = None;

                while let Some(message) = stream.next().await {
                    let connection = match connection.upgrade() {
                        Some(connection) => connection,
                        None => return,
                    };
                    match message {
                        Ok(Message::Text(text)) => {
                            connection.dispatch(&text, &events).await;
                        }
                        Ok(Message::Ping(data)) => {
                            let _ = sink.lock().await.send(Message::Pong(data)).await;
                        }
                        Ok(Message::Close(frame)) => {
                            close_code = frame.map(|f| u16::from(f.code));
                            break;
                        }
                        Ok(_) => {}
                        Err(e) => {
                            connection.log.error(format!("Console socket error: {e}"));
                            break;
                        }
                    }
                }

                if let Some(connection) = connection.upgrade() {
                    connection.pending.lock().await.clear();
                    if !connection.disposed.load(Ordering::SeqCst) {
                        let _ = events.send(ConsoleEvent::Closed(close_code));
                    }
                }
            })
        };
        *connection.reader.lock().await = Some(reader);

        Ok(connection)
    }

    /// The id of the server this console belongs to.
    pub fn server_id(&self) -> i64 {
        self.server_id
    }

    /// Whether the `Connection Succeeded` confirmation has arrived.
    pub fn is_open(&self) -> bool {
        self.opened.load(Ordering::SeqCst) && !self.disposed.load(Ordering::SeqCst)
    }

    /// Sends a console command and awaits its `CommandResult`.
    ///
    /// Subscription commands are rejected; use `subscribe` and
    /// `unsubscribe` so the callback table stays consistent with the
    /// server-side subscription state.
    pub async fn send(&self, command: &str) -> Result<CommandResult> {
        if subscribe_command_pattern().is_match(command) {
            return Err(ClientError::InvalidUsage(format!(
                "Subscription commands must go through subscribe/unsubscribe: {command}"
            )));
        }
        self.send_raw(command).await
    }

    /// Registers a callback and subscribes to a console event.
    pub async fn subscribe(&self, event: &str, handler: SubscriptionHandler) -> Result<()> {
        let name = format!("Subscription/{event}");
        {
            let mut subscriptions = self.subscriptions.write().await;
            if subscriptions.contains_key(&name) {
                return Err(ClientError::AlreadySubscribed(name));
            }
            subscriptions.insert(name.clone(), handler);
        }

        match self.send_raw(&format!("websocket subscribe {event}")).await {
            Ok(_) => Ok(()),
            Err(e) => {
                self.subscriptions.write().await.remove(&name);
                Err(e)
            }
        }
    }

    /// Unsubscribes from a console event and removes its callback.
    pub async fn unsubscribe(&self, event: &str) -> Result<()> {
        let name = format!("Subscription/{event}");
        if !self.subscriptions.read().await.contains_key(&name) {
            return Err(ClientError::NotSubscribed(name));
        }

        self.send_raw(&format!("websocket unsubscribe {event}"))
            .await?;
        self.subscriptions.write().await.remove(&name);
        Ok(())
    }

    /// Closes the connection with code 1000 and clears every listener.
    /// Idempotent.
    pub async fn dispose(&self) {
        if self.disposed.swap(true, Ordering::SeqCst) {
            return;
        }
        let frame = CloseFrame {
            code: CloseCode::Normal,
            reason: "disposed".into(),
        };
        let _ = self
            .sink
            .lock()
            .await
            .send(Message::Close(Some(frame)))
            .await;
        if let Some(reader) = self.reader.lock().await.take() {
            reader.abort();
        }
        self.pending.lock().await.clear();
        self.subscriptions.write().await.clear();
        // Aborted last: dispose may be running on the dispatcher itself
        // (an event handler closing its own console).
        if let Some(dispatcher) = self.dispatcher.lock().await.take() {
            dispatcher.abort();
        }
        self.log.debug("Console connection disposed");
    }

    /// Sends a command frame without the subscription guard.
    async fn send_raw(&self, command: &str) -> Result<CommandResult> {
        if self.disposed.load(Ordering::SeqCst) {
            return Err(ClientError::Closed("Console disposed".to_string()));
        }

        let id = self.command_id.fetch_add(1, Ordering::SeqCst) + 1;
        let (tx, rx) = oneshot::channel();
        self.pending.lock().await.insert(id, tx);

        let frame = serde_json::json!({ "id": id, "content": command });
        let written = self
            .sink
            .lock()
            .await
            .send(Message::Text(frame.to_string().into()))
            .await
            .is_ok();
        if !written {
            self.pending.lock().await.remove(&id);
            return Err(ClientError::Network(
                "Console command could not be written".to_string(),
            ));
        }

        self.log.debug(format!("Command {id}: {command}"));
        match rx.await {
            Ok(message) => Ok(CommandResult::from(message)),
            Err(_) => Err(ClientError::Closed(
                "Console closed while awaiting command result".to_string(),
            )),
        }
    }

    /// Dispatches one inbound console frame by name.
    async fn dispatch(&self, text: &str, events: &mpsc::UnboundedSender<ConsoleEvent>) {
        let message: ConsoleMessage = match serde_json::from_str(text) {
            Ok(message) => message,
            Err(e) => {
                self.log.warn(format!("Dropped console frame: {e}"));
                return;
            }
        };

        if !self.opened.load(Ordering::SeqCst) && message.is_auth_confirmation() {
            self.opened.store(true, Ordering::SeqCst);
            self.log.info("Console authenticated");
            let _ = events.send(ConsoleEvent::Opened);
            return;
        }

        if let Some(command_id) = message.command_id {
            match self.pending.lock().await.remove(&command_id) {
                Some(tx) => {
                    let _ = tx.send(message);
                }
                None => {
                    self.log
                        .debug(format!("Command result {command_id} has no waiter"));
                }
            }
            return;
        }

        let _ = self.event_queue.send((message.event_name(), message.data));
    }

    /// Drains the event queue, invoking handlers one at a time.
    ///
    /// Handlers are serialised with respect to each other and see events
    /// in arrival order without ever blocking the socket reader.
    fn spawn_dispatcher(
        connection: &Arc<Self>,
        mut events: mpsc::UnboundedReceiver<(String, Value)>,
    ) -> JoinHandle<()> {
        let connection = Arc::downgrade(connection);
        tokio::spawn(async move {
            while let Some((name, data)) = events.recv().await {
                let connection = match connection.upgrade() {
                    Some(connection) => connection,
                    None => return,
                };
                let handler = connection.subscriptions.read().await.get(&name).cloned();
                match handler {
                    Some(handler) => handler(data).await,
                    None => connection
                        .log
                        .debug(format!("No console subscription for {name}")),
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logging::LogVerbosity;
    use serde_json::Value;
    use tokio::net::TcpListener;
    use tokio::time::Duration;

    /// A console server that expects the raw token first, confirms the
    /// connection, then answers every command frame.
    async fn spawn_console_server(expected_token: &'static str) -> (String, u16, JoinHandle<()>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let task = tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                tokio::spawn(async move {
                    let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();

                    // Raw token first, no wrapper.
                    match ws.next().await {
                        Some(Ok(Message::Text(token))) if token == expected_token => {}
                        other => panic!("expected raw token frame, got {other:?}"),
                    }
                    let hello = serde_json::json!({
                        "type": "SystemMessage",
                        "eventType": "InfoLog",
                        "data": "Connection Succeeded, authenticated",
                        "timeStamp": "2026-01-01T00:00:00Z",
                    });
                    ws.send(Message::Text(hello.to_string().into())).await.unwrap();

                    while let Some(Ok(message)) = ws.next().await {
                        if let Message::Text(text) = message {
                            let frame: Value = serde_json::from_str(&text).unwrap();
                            let id = frame["id"].as_u64().unwrap();
                            let content = frame["content"].as_str().unwrap().to_string();
                            let reply = serde_json::json!({
                                "type": "CommandResult",
                                "commandId": id,
                                "data": {"Command": content, "Result": "Success"},
                                "timeStamp": "2026-01-01T00:00:01Z",
                            });
                            ws.send(Message::Text(reply.to_string().into())).await.unwrap();
                            if content.starts_with("websocket subscribe ") {
                                let event = content.trim_start_matches("websocket subscribe ");
                                let push = serde_json::json!({
                                    "type": "Subscription",
                                    "eventType": event,
                                    "data": {"user": {"id": 99}},
                                });
                                ws.send(Message::Text(push.to_string().into())).await.unwrap();
                            }
                        }
                    }
                });
            }
        });
        (addr.ip().to_string(), addr.port(), task)
    }

    async fn open(
        address: &str,
        port: u16,
    ) -> (Arc<ConsoleConnection>, mpsc::UnboundedReceiver<ConsoleEvent>) {
        let log = Logger::new(LogVerbosity::Quiet, "");
        let (tx, rx) = mpsc::unbounded_channel();
        let connection = ConsoleConnection::connect(7, address, port, "CT", tx, &log)
            .await
            .unwrap();
        (connection, rx)
    }

    #[tokio::test]
    async fn test_token_handshake_and_open_notification() {
        let (address, port, server) = spawn_console_server("CT").await;
        let (connection, mut events) = open(&address, port).await;

        let event = tokio::time::timeout(Duration::from_secs(2), events.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(event, ConsoleEvent::Opened);
        assert!(connection.is_open());
        assert_eq!(connection.server_id(), 7);

        connection.dispose().await;
        server.abort();
    }

    #[tokio::test]
    async fn test_command_round_trip() {
        let (address, port, server) = spawn_console_server("CT").await;
        let (connection, _events) = open(&address, port).await;

        let result = connection.send("player list").await.unwrap();
        assert_eq!(result.data["Command"], "player list");
        assert_eq!(result.data["Result"], "Success");

        connection.dispose().await;
        server.abort();
    }

    #[tokio::test]
    async fn test_subscribe_like_commands_are_rejected() {
        let (address, port, server) = spawn_console_server("CT").await;
        let (connection, _events) = open(&address, port).await;

        for command in [
            "websocket subscribe PlayerJoined",
            "websocket unsubscribe PlayerJoined",
            "subscribe PlayerJoined",
            "SUBSCRIBE PlayerJoined",
            "Unsubscribe PlayerJoined",
        ] {
            let result = connection.send(command).await;
            assert!(
                matches!(result, Err(ClientError::InvalidUsage(_))),
                "{command} must be rejected"
            );
        }

        connection.dispose().await;
        server.abort();
    }

    #[tokio::test]
    async fn test_subscription_dispatch_and_bookkeeping() {
        let (address, port, server) = spawn_console_server("CT").await;
        let (connection, _events) = open(&address, port).await;

        let (tx, mut rx) = mpsc::unbounded_channel();
        let handler: SubscriptionHandler = Arc::new(move |data| {
            let tx = tx.clone();
            Box::pin(async move {
                let _ = tx.send(data);
            })
        });

        connection.subscribe("PlayerJoined", handler.clone()).await.unwrap();
        let duplicate = connection.subscribe("PlayerJoined", handler).await;
        assert!(matches!(duplicate, Err(ClientError::AlreadySubscribed(_))));

        let data = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(data["user"]["id"], 99);

        connection.unsubscribe("PlayerJoined").await.unwrap();
        let missing = connection.unsubscribe("PlayerJoined").await;
        assert!(matches!(missing, Err(ClientError::NotSubscribed(_))));

        connection.dispose().await;
        server.abort();
    }
}
