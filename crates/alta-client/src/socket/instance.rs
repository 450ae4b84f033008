//! One authenticated account WebSocket.
//!
//! An instance owns a single live socket plus the machinery around it:
//! periodic pings, the routine migration timer, RPC correlation, the
//! halted gate that parks non-migration traffic during migration and
//! recovery, and the recovery loop that re-posts every subscription after
//! an abnormal close.
//!
//! Close-code policy: 3000 ("migration completed", sent on the old socket)
//! and 3001 ("migration aborted", sent on the discarded new socket) are
//! internal and never trigger recovery; any other close does.

use crate::auth::TokenManager;
use crate::config::ClientConfig;
use crate::error::{ClientError, Result};
use crate::logging::Logger;
use crate::socket::frame::{InboundFrame, RequestFrame, WsResponse};
use crate::socket::gate::HaltedGate;
use crate::socket::SubscriptionHandler;
use crate::workers::WorkerPool;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot, Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

/// Close code sent on the old socket once a migration has handed over.
const CLOSE_MIGRATION_COMPLETED: u16 = 3000;

/// Close code sent on the new socket when a migration is aborted.
const CLOSE_MIGRATION_ABORTED: u16 = 3001;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = Arc<Mutex<SplitSink<WsStream, Message>>>;

/// One live socket together with its background tasks.
struct SocketHandle {
    generation: u64,
    sink: WsSink,
    tasks: Vec<JoinHandle<()>>,
}

impl SocketHandle {
    /// Sends a close frame with the given code; errors are ignored since
    /// the peer may already be gone.
    async fn close(&self, code: u16, reason: &'static str) {
        let frame = CloseFrame {
            code: CloseCode::from(code),
            reason: reason.into(),
        };
        let _ = self
            .sink
            .lock()
            .await
            .send(Message::Close(Some(frame)))
            .await;
    }

    fn abort_tasks(&self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}

/// An authenticated account-socket instance.
///
/// Invariants: at most one live socket; the halted gate is open iff the
/// instance is ready to carry non-migration traffic; the subscription
/// table never exceeds the router's per-socket cap (enforced by the
/// router's placement).
pub struct AccountSocket {
    weak_self: Weak<Self>,
    instance_id: u64,
    config: Arc<ClientConfig>,
    log: Logger,
    tokens: Arc<TokenManager>,
    workers: Arc<WorkerPool>,
    /// Monotone migration counter; doubles as the socket generation
    migration_id: AtomicU64,
    /// Monotone RPC correlation counter
    message_id: AtomicU64,
    /// Generation of the socket currently considered live
    live_generation: AtomicU64,
    current: RwLock<Option<SocketHandle>>,
    pending: Mutex<HashMap<u64, oneshot::Sender<WsResponse>>>,
    subscriptions: RwLock<HashMap<String, SubscriptionHandler>>,
    gate: HaltedGate,
    /// Installed while a migration awaits its confirmation frame
    migrate_slot: Mutex<Option<mpsc::Sender<WsResponse>>>,
    /// Inbound events queue up here so handlers are serialised without
    /// blocking the socket reader (a handler may itself issue RPCs on
    /// this instance)
    event_queue: mpsc::UnboundedSender<(String, Value)>,
    dispatcher: Mutex<Option<JoinHandle<()>>>,
    recovering: AtomicBool,
    disposed: AtomicBool,
}

impl AccountSocket {
    /// Opens an instance and its first socket.
    ///
    /// Opening errors are retried indefinitely with
    /// `web_socket_recovery_retry_delay_ms` between attempts, so a
    /// platform outage delays rather than fails construction.
    pub async fn connect(
        instance_id: u64,
        config: Arc<ClientConfig>,
        log: &Logger,
        tokens: Arc<TokenManager>,
        workers: Arc<WorkerPool>,
    ) -> Arc<Self> {
        let (event_queue, event_rx) = mpsc::unbounded_channel();
        let socket = Arc::new_cyclic(|weak| Self {
            weak_self: weak.clone(),
            instance_id,
            log: log.with_context(&format!("ws-{instance_id}")),
            config,
            tokens,
            workers,
            migration_id: AtomicU64::new(0),
            message_id: AtomicU64::new(0),
            live_generation: AtomicU64::new(0),
            current: RwLock::new(None),
            pending: Mutex::new(HashMap::new()),
            subscriptions: RwLock::new(HashMap::new()),
            gate: HaltedGate::new(),
            migrate_slot: Mutex::new(None),
            event_queue,
            dispatcher: Mutex::new(None),
            recovering: AtomicBool::new(false),
            disposed: AtomicBool::new(false),
        });

        *socket.dispatcher.lock().await = Some(socket.spawn_dispatcher(event_rx));
        let handle = socket.open_socket_with_retry(0).await;
        if let Some(handle) = handle {
            *socket.current.write().await = Some(handle);
            socket.gate.open();
        }
        socket
    }

    /// The instance's id within the router's pool.
    pub fn instance_id(&self) -> u64 {
        self.instance_id
    }

    /// Number of registered subscriptions.
    pub async fn subscription_count(&self) -> usize {
        self.subscriptions.read().await.len()
    }

    /// Registers a callback for `event/key` and posts the subscription.
    ///
    /// Fails with `AlreadySubscribed` when the pair is already registered.
    /// A failed subscription RPC unregisters the callback again so the
    /// table only ever reflects attempted-and-acknowledged subscriptions.
    pub async fn subscribe(
        &self,
        event: &str,
        key: &str,
        handler: SubscriptionHandler,
    ) -> Result<WsResponse> {
        let name = format!("{event}/{key}");
        {
            let mut subscriptions = self.subscriptions.write().await;
            if subscriptions.contains_key(&name) {
                return Err(ClientError::AlreadySubscribed(name));
            }
            subscriptions.insert(name.clone(), handler);
        }

        match self
            .send("POST", &format!("subscription/{event}/{key}"), None)
            .await
        {
            Ok(response) => Ok(response),
            Err(e) => {
                self.subscriptions.write().await.remove(&name);
                Err(e)
            }
        }
    }

    /// Deletes the subscription for `event/key`.
    ///
    /// Fails with `NotSubscribed` when the pair is unknown. The table
    /// entry is removed only once the platform has acknowledged the
    /// deletion.
    pub async fn unsubscribe(&self, event: &str, key: &str) -> Result<WsResponse> {
        let name = format!("{event}/{key}");
        if !self.subscriptions.read().await.contains_key(&name) {
            return Err(ClientError::NotSubscribed(name));
        }

        let response = self
            .send("DELETE", &format!("subscription/{event}/{key}"), None)
            .await?;
        self.subscriptions.write().await.remove(&name);
        Ok(response)
    }

    /// Sends an RPC and awaits its correlated response.
    ///
    /// Non-migration requests park on the halted gate first; the migration
    /// path bypasses it. Non-2xx responses and transport failures are
    /// retried up to the configured attempt budget with a fixed delay, and
    /// exhausting the budget is fatal for the request.
    pub async fn send(
        &self,
        method: &str,
        path: &str,
        content: Option<Value>,
    ) -> Result<WsResponse> {
        let attempts = self.config.web_socket_request_attempts;
        let delay = Duration::from_millis(self.config.web_socket_request_retry_delay_ms);
        let bypass_gate = path == "migrate";
        let mut last_error = "no attempt made".to_string();

        for attempt in 1..=attempts {
            if attempt > 1 {
                tokio::time::sleep(delay).await;
            }
            if self.disposed.load(Ordering::SeqCst) {
                return Err(ClientError::Closed("Instance disposed".to_string()));
            }
            if !bypass_gate {
                self.gate.wait().await;
            }
            if self.disposed.load(Ordering::SeqCst) {
                return Err(ClientError::Closed("Instance disposed".to_string()));
            }

            let id = self.message_id.fetch_add(1, Ordering::SeqCst) + 1;
            let (tx, rx) = oneshot::channel();
            self.pending.lock().await.insert(id, tx);

            let bearer = self
                .tokens
                .current()
                .await
                .map(|token| token.bearer)
                .unwrap_or_default();
            let frame = RequestFrame::new(method, path, &bearer, id, content.as_ref());
            let text = match serde_json::to_string(&frame) {
                Ok(text) => text,
                Err(e) => {
                    self.pending.lock().await.remove(&id);
                    return Err(ClientError::Network(format!("Unserializable request: {e}")));
                }
            };

            self.log.debug(format!(
                "Request {}-{id}: {method} /ws/{path} (attempt {attempt}/{attempts})",
                self.instance_id
            ));

            let written = match &*self.current.read().await {
                Some(handle) => handle
                    .sink
                    .lock()
                    .await
                    .send(Message::Text(text.into()))
                    .await
                    .is_ok(),
                None => false,
            };
            if !written {
                self.pending.lock().await.remove(&id);
                last_error = "socket write failed".to_string();
                self.log
                    .warn(format!("Request {}-{id} could not be written", self.instance_id));
                continue;
            }

            match rx.await {
                Ok(response) if response.is_success() => return Ok(response),
                Ok(response) => {
                    last_error = format!(
                        "{method} /ws/{path} answered {}: {}",
                        response.code, response.content
                    );
                    self.log.warn(format!(
                        "Request {}-{id} failed: {last_error}",
                        self.instance_id
                    ));
                }
                Err(_) => {
                    last_error = "socket closed while awaiting response".to_string();
                    self.log.warn(format!(
                        "Request {}-{id} dropped: {last_error}",
                        self.instance_id
                    ));
                }
            }
        }

        Err(ClientError::RetriesExhausted(format!(
            "{method} /ws/{path} failed after {attempts} attempts: {last_error}"
        )))
    }

    /// Rotates the underlying socket using a server-issued migration
    /// token.
    ///
    /// The platform expires account sockets after roughly two hours;
    /// migrating hands the server-side subscription state over to a fresh
    /// socket without re-posting it. A failed hand-over falls back to full
    /// recovery, since the server-side state cannot be trusted after a
    /// half-applied migration.
    ///
    /// Returns a boxed future rather than being declared `async fn`: this
    /// function calls itself via the spawned retry task, and an opaque
    /// `impl Future` return type here would make the compiler try to unfold
    /// that recursion when deciding whether the result is `Send`. The
    /// explicit boxed return type gives it a concrete, already-`Send` type
    /// to stop at.
    pub fn migrate(&self) -> std::pin::Pin<Box<dyn std::future::Future<Output = ()> + Send + '_>> {
        Box::pin(async move {
            if self.disposed.load(Ordering::SeqCst) {
                return;
            }

            // No overlapping migration: wait until normal traffic is flowing.
            self.gate.wait().await;

            let token = match self.send("GET", "migrate", None).await {
                Ok(response) => response
                    .content
                    .get("token")
                    .and_then(|t| t.as_str())
                    .map(str::to_string),
                Err(e) => {
                    self.log.warn(format!("Migration token request failed: {e}"));
                    None
                }
            };
            let token = match token {
                Some(token) => token,
                None => {
                    let retry_delay =
                        Duration::from_millis(self.config.web_socket_migration_retry_delay_ms);
                    self.log.info(format!(
                        "Retrying migration in {}ms",
                        retry_delay.as_millis()
                    ));
                    let socket = self.weak_self.clone();
                    let retry_fut: std::pin::Pin<Box<dyn std::future::Future<Output = ()> + Send>> =
                        Box::pin(async move {
                            tokio::time::sleep(retry_delay).await;
                            if let Some(socket) = socket.upgrade() {
                                socket.migrate().await;
                            }
                        });
                    tokio::spawn(retry_fut);
                    return;
                }
            };

            // Halt non-migration traffic for the hand-over.
            self.gate.close();
            let new_generation = self.migration_id.fetch_add(1, Ordering::SeqCst) + 1;

            let handle = match self.open_socket(new_generation).await {
                Ok(handle) => handle,
                Err(e) => {
                    self.log
                        .error(format!("Migration socket failed to open: {e}"));
                    self.spawn_recovery();
                    return;
                }
            };

        match self.present_migration(&handle, &token).await {
            Ok(()) => {}
            Err(e) => {
                self.log.error(format!("{e}"));
                handle.close(CLOSE_MIGRATION_ABORTED, "migration aborted").await;
                handle.abort_tasks();
                // The previous socket is still current; server-side state
                // requires a full resubscribe rather than a retried
                // migration.
                self.spawn_recovery();
                return;
            }
        }

        // Success: the new socket becomes current. Requests issued before
        // this point drain on the old socket during the hand-over window.
        let watermark = self.message_id.load(Ordering::SeqCst);
        let old = self.current.write().await.replace(handle);
        self.live_generation.store(new_generation, Ordering::SeqCst);
        self.gate.open();
        self.log
            .info(format!("Migration {new_generation} complete"));

        if let Some(old) = old {
            let handover =
                Duration::from_millis(self.config.web_socket_migration_handover_period_ms);
            let socket = self.weak_self.clone();
            tokio::spawn(async move {
                tokio::time::sleep(handover).await;
                old.close(CLOSE_MIGRATION_COMPLETED, "migration completed")
                    .await;
                old.abort_tasks();
                // Anything still unanswered was sent on the old socket and
                // will never resolve; reject it so senders retry.
                if let Some(socket) = socket.upgrade() {
                    socket
                        .pending
                        .lock()
                        .await
                        .retain(|id, _| *id > watermark);
                }
            });
        }
        })
    }

    /// Kicks off recovery on its own task.
    fn spawn_recovery(&self) {
        let socket = self.weak_self.clone();
        tokio::spawn(async move {
            if let Some(socket) = socket.upgrade() {
                socket.recover().await;
            }
        });
    }

    /// Presents the migration token on the new socket and awaits the
    /// confirmation frame.
    ///
    /// The platform does not always correlate this response, so success is
    /// detected on the raw migrate channel by key and code rather than by
    /// message id.
    async fn present_migration(&self, handle: &SocketHandle, token: &str) -> Result<()> {
        let (tx, mut rx) = mpsc::channel(1);
        *self.migrate_slot.lock().await = Some(tx);

        let bearer = self
            .tokens
            .current()
            .await
            .map(|t| t.bearer)
            .unwrap_or_default();
        let id = self.message_id.fetch_add(1, Ordering::SeqCst) + 1;
        let payload = serde_json::json!({ "token": token });
        let frame = RequestFrame::new("POST", "migrate", &bearer, id, Some(&payload));
        let text = serde_json::to_string(&frame)
            .map_err(|e| ClientError::MigrationAborted(format!("Unserializable frame: {e}")))?;

        let written = handle
            .sink
            .lock()
            .await
            .send(Message::Text(text.into()))
            .await
            .is_ok();

        let result = if !written {
            Err(ClientError::MigrationAborted(
                "Migration presentation could not be written".to_string(),
            ))
        } else {
            let timeout = Duration::from_millis(self.config.web_socket_recovery_timeout_ms);
            match tokio::time::timeout(timeout, rx.recv()).await {
                Ok(Some(response)) if response.code == 200 => Ok(()),
                Ok(Some(response)) => Err(ClientError::MigrationAborted(format!(
                    "Platform answered {}",
                    response.code
                ))),
                Ok(None) | Err(_) => Err(ClientError::MigrationAborted(
                    "No migration confirmation arrived".to_string(),
                )),
            }
        };

        *self.migrate_slot.lock().await = None;
        result
    }

    /// Re-opens the socket after an abnormal close or a failed migration
    /// and re-posts every subscription.
    ///
    /// Each round halts traffic, snapshots and clears the subscription
    /// table, opens a fresh socket, and races the resubscribe fan-out
    /// (through the worker pool) against the recovery timeout. A failed
    /// round restores the snapshot and retries after the recovery delay,
    /// indefinitely.
    pub async fn recover(&self) {
        if self.disposed.load(Ordering::SeqCst) {
            return;
        }
        if self.recovering.swap(true, Ordering::SeqCst) {
            return;
        }

        let retry_delay = Duration::from_millis(self.config.web_socket_recovery_retry_delay_ms);
        let timeout = Duration::from_millis(self.config.web_socket_recovery_timeout_ms);

        loop {
            self.gate.close();
            // Outstanding RPCs were sent on the dead socket; reject them.
            self.pending.lock().await.clear();

            let snapshot: Vec<(String, SubscriptionHandler)> = {
                let mut subscriptions = self.subscriptions.write().await;
                std::mem::take(&mut *subscriptions).into_iter().collect()
            };

            let new_generation = self.migration_id.fetch_add(1, Ordering::SeqCst) + 1;
            self.live_generation.store(new_generation, Ordering::SeqCst);
            if let Some(old) = self.current.write().await.take() {
                old.abort_tasks();
                old.close(1000, "superseded").await;
            }

            let handle = match self.open_socket_with_retry(new_generation).await {
                Some(handle) => handle,
                None => break, // disposed while retrying
            };
            *self.current.write().await = Some(handle);
            self.gate.open();

            let round = async {
                let results = futures::future::join_all(snapshot.iter().map(|(name, handler)| {
                    let handler = handler.clone();
                    async move {
                        let (event, key) = match name.split_once('/') {
                            Some(parts) => parts,
                            None => (name.as_str(), ""),
                        };
                        self.workers
                            .run(self.subscribe(event, key, handler))
                            .await
                    }
                }))
                .await;
                results.into_iter().all(|result| result.is_ok())
            };

            let succeeded = matches!(tokio::time::timeout(timeout, round).await, Ok(true));
            if succeeded {
                self.log.info(format!(
                    "Recovery complete, {} subscription(s) restored",
                    snapshot.len()
                ));
                break;
            }

            self.log.error(ClientError::RecoveryFailed(format!(
                "resubscribe round failed or timed out, retrying in {}ms",
                retry_delay.as_millis()
            )));
            {
                // Restore the snapshot; entries subscribed mid-round stay
                // and are simply re-posted next round.
                let mut subscriptions = self.subscriptions.write().await;
                for (name, handler) in snapshot {
                    subscriptions.insert(name, handler);
                }
            }
            self.gate.close();
            tokio::time::sleep(retry_delay).await;
            if self.disposed.load(Ordering::SeqCst) {
                break;
            }
        }

        self.recovering.store(false, Ordering::SeqCst);
    }

    /// Tears the instance down: halts traffic, rejects outstanding RPCs,
    /// closes the live socket with code 1000, and cancels every owned
    /// task. Idempotent.
    pub async fn dispose(&self) {
        if self.disposed.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Some(handle) = self.current.write().await.take() {
            handle.close(1000, "disposed").await;
            handle.abort_tasks();
        }
        self.pending.lock().await.clear();
        self.subscriptions.write().await.clear();
        // Release parked senders; they observe the disposal and error out.
        self.gate.open();
        // Aborted last: dispose may be running on the dispatcher itself
        // (a subscription handler tearing the client down).
        if let Some(dispatcher) = self.dispatcher.lock().await.take() {
            dispatcher.abort();
        }
        self.log.debug("Instance disposed");
    }

    /// Opens a socket, retrying indefinitely until it opens or the
    /// instance is disposed.
    async fn open_socket_with_retry(&self, generation: u64) -> Option<SocketHandle> {
        let retry_delay = Duration::from_millis(self.config.web_socket_recovery_retry_delay_ms);
        loop {
            if self.disposed.load(Ordering::SeqCst) {
                return None;
            }
            match self.open_socket(generation).await {
                Ok(handle) => return Some(handle),
                Err(e) => {
                    self.log.error(format!(
                        "Socket failed to open, retrying in {}ms: {e}",
                        retry_delay.as_millis()
                    ));
                    tokio::time::sleep(retry_delay).await;
                }
            }
        }
    }

    /// Opens one socket and spawns its reader, ping, and migration-timer
    /// tasks.
    async fn open_socket(&self, generation: u64) -> Result<SocketHandle> {
        let mut request = self
            .config
            .web_socket_url
            .as_str()
            .into_client_request()
            .map_err(|e| ClientError::Config(format!("Invalid web_socket_url: {e}")))?;

        let bearer = self
            .tokens
            .current()
            .await
            .map(|token| token.bearer)
            .unwrap_or_default();
        let headers = request.headers_mut();
        headers.insert(
            "Authorization",
            HeaderValue::from_str(&format!("Bearer {bearer}"))
                .map_err(|e| ClientError::Auth(format!("Invalid bearer token: {e}")))?,
        );
        headers.insert(
            "x-api-key",
            HeaderValue::from_str(&self.config.x_api_key)
                .map_err(|e| ClientError::Config(format!("Invalid x-api-key: {e}")))?,
        );

        let (stream, _) = connect_async(request)
            .await
            .map_err(|e| ClientError::Network(format!("WebSocket open failed: {e}")))?;
        let (sink, stream) = stream.split();
        let sink: WsSink = Arc::new(Mutex::new(sink));

        let mut tasks = Vec::new();
        tasks.push(self.spawn_reader(generation, stream, sink.clone()));
        tasks.push(self.spawn_ping(sink.clone()));
        tasks.push(self.spawn_migration_timer());

        self.log.debug(format!("Socket generation {generation} open"));
        Ok(SocketHandle {
            generation,
            sink,
            tasks,
        })
    }

    /// Spawns the inbound reader for one socket.
    ///
    /// Events are dispatched in arrival order; the handler completes
    /// before the next frame is read, which serialises message handling
    /// per socket.
    fn spawn_reader(
        &self,
        generation: u64,
        mut stream: SplitStream<WsStream>,
        sink: WsSink,
    ) -> JoinHandle<()> {
        let socket = self.weak_self.clone();
        tokio::spawn(async move {
            let mut close_code: Option<u16> = None;

            while let Some(message) = stream.next().await {
                let socket = match socket.upgrade() {
                    Some(socket) => socket,
                    None => return,
                };
                match message {
                    Ok(Message::Text(text)) => socket.dispatch_frame(&text).await,
                    Ok(Message::Ping(data)) => {
                        let _ = sink.lock().await.send(Message::Pong(data)).await;
                    }
                    Ok(Message::Pong(_)) => {}
                    Ok(Message::Binary(_)) => {
                        socket.log.warn("Binary frame rejected");
                    }
                    Ok(Message::Close(frame)) => {
                        close_code = frame.map(|f| u16::from(f.code));
                        break;
                    }
                    Ok(_) => {}
                    Err(e) => {
                        socket.log.error(format!("Socket error: {e}"));
                        break;
                    }
                }
            }

            let socket = match socket.upgrade() {
                Some(socket) => socket,
                None => return,
            };
            if socket.disposed.load(Ordering::SeqCst) {
                return;
            }
            let code = close_code.unwrap_or(1006);
            if code == CLOSE_MIGRATION_COMPLETED || code == CLOSE_MIGRATION_ABORTED {
                return;
            }
            if socket.live_generation.load(Ordering::SeqCst) != generation {
                return;
            }
            socket
                .log
                .warn(format!("Socket closed abnormally (code {code}), recovering"));
            // Recovery aborts this socket's tasks, including this reader;
            // it must run on its own task.
            socket.spawn_recovery();
        })
    }

    /// Spawns the periodic ping for one socket.
    fn spawn_ping(&self, sink: WsSink) -> JoinHandle<()> {
        let interval = Duration::from_millis(self.config.web_socket_ping_interval_ms);
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(interval).await;
                if sink
                    .lock()
                    .await
                    .send(Message::Ping(Vec::new()))
                    .await
                    .is_err()
                {
                    break;
                }
            }
        })
    }

    /// Arms the routine migration timer for one socket.
    fn spawn_migration_timer(&self) -> JoinHandle<()> {
        let interval = Duration::from_millis(self.config.web_socket_migration_interval_ms);
        let socket = self.weak_self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(interval).await;
            if let Some(socket) = socket.upgrade() {
                socket.migrate().await;
            }
        })
    }

    /// Drains the event queue, invoking handlers one at a time.
    ///
    /// Handlers for one instance are serialised with respect to each
    /// other and see events in arrival order, but the socket reader is
    /// never blocked on them, so a handler may issue RPCs on this very
    /// instance.
    fn spawn_dispatcher(
        &self,
        mut events: mpsc::UnboundedReceiver<(String, Value)>,
    ) -> JoinHandle<()> {
        let socket = self.weak_self.clone();
        tokio::spawn(async move {
            while let Some((name, content)) = events.recv().await {
                let socket = match socket.upgrade() {
                    Some(socket) => socket,
                    None => return,
                };
                let handler = socket.subscriptions.read().await.get(&name).cloned();
                match handler {
                    Some(handler) => handler(content).await,
                    None => socket.log.debug(format!("No subscription for {name}")),
                }
            }
        })
    }

    /// Classifies and dispatches one inbound text frame.
    async fn dispatch_frame(&self, text: &str) {
        let frame = match InboundFrame::parse(text) {
            Ok(frame) => frame,
            Err(e) => {
                self.log.warn(format!("Dropped frame: {e}"));
                return;
            }
        };

        match frame {
            InboundFrame::Response(response) => {
                if response.is_migrate_confirmation() {
                    if let Some(tx) = self.migrate_slot.lock().await.as_ref() {
                        let _ = tx.try_send(response);
                        return;
                    }
                }
                if response.id == 0 {
                    self.log
                        .debug(format!("Uncorrelated response for {}", response.key));
                    return;
                }
                match self.pending.lock().await.remove(&response.id) {
                    Some(tx) => {
                        let _ = tx.send(response);
                    }
                    None => {
                        self.log.debug(format!(
                            "Response {}-{} has no waiter",
                            self.instance_id, response.id
                        ));
                    }
                }
            }
            InboundFrame::Event {
                event,
                key,
                content,
                ..
            } => {
                let name = format!("{event}/{key}");
                let _ = self.event_queue.send((name, content));
            }
        }
    }
}
