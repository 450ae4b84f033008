//! Subscription fan-out across a pool of account sockets.
//!
//! The platform caps how many subscriptions one socket may carry, so the
//! router partitions subscription keys across instances: each new
//! subscription lands on the first instance with spare capacity, and a
//! fresh instance is spun up when none has any. Instances whose last
//! subscription is removed are discarded.

use crate::auth::TokenManager;
use crate::config::ClientConfig;
use crate::error::{ClientError, Result};
use crate::logging::Logger;
use crate::socket::frame::WsResponse;
use crate::socket::instance::AccountSocket;
use crate::socket::SubscriptionHandler;
use crate::workers::WorkerPool;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;

/// Partitions subscription keys across a pool of account sockets.
///
/// Invariant: every routed `(event, key)` resolves to an instance whose
/// subscription table still contains it.
pub struct SubscriptionRouter {
    config: Arc<ClientConfig>,
    log: Logger,
    tokens: Arc<TokenManager>,
    workers: Arc<WorkerPool>,
    next_instance_id: AtomicU64,
    /// Ordered so placement scans instances oldest-first
    instances: RwLock<BTreeMap<u64, Arc<AccountSocket>>>,
    /// `event/key` to owning instance id
    routes: RwLock<HashMap<String, u64>>,
}

impl SubscriptionRouter {
    /// Creates an empty router; instances are created on demand.
    pub fn new(
        config: Arc<ClientConfig>,
        log: Logger,
        tokens: Arc<TokenManager>,
        workers: Arc<WorkerPool>,
    ) -> Self {
        Self {
            config,
            log: log.with_context("router"),
            tokens,
            workers,
            next_instance_id: AtomicU64::new(0),
            instances: RwLock::new(BTreeMap::new()),
            routes: RwLock::new(HashMap::new()),
        }
    }

    /// Subscribes `(event, key)` on the first instance with spare
    /// capacity, creating a new instance when the pool is full.
    pub async fn subscribe(
        &self,
        event: &str,
        key: &str,
        handler: SubscriptionHandler,
    ) -> Result<WsResponse> {
        let name = format!("{event}/{key}");
        if self.routes.read().await.contains_key(&name) {
            return Err(ClientError::AlreadySubscribed(name));
        }

        let (instance, created) = self.place().await;
        let instance_id = instance.instance_id();

        match instance.subscribe(event, key, handler).await {
            Ok(response) => {
                self.routes.write().await.insert(name, instance_id);
                Ok(response)
            }
            Err(e) => {
                // A freshly created instance that never got its first
                // subscription is useless; drop it again.
                if created && instance.subscription_count().await == 0 {
                    self.instances.write().await.remove(&instance_id);
                    instance.dispose().await;
                }
                Err(e)
            }
        }
    }

    /// Removes the subscription for `(event, key)` and discards the
    /// owning instance when it carried nothing else.
    pub async fn unsubscribe(&self, event: &str, key: &str) -> Result<WsResponse> {
        let name = format!("{event}/{key}");
        let instance_id = match self.routes.read().await.get(&name) {
            Some(id) => *id,
            None => return Err(ClientError::NotSubscribed(name)),
        };
        let instance = match self.instances.read().await.get(&instance_id) {
            Some(instance) => instance.clone(),
            None => return Err(ClientError::NotSubscribed(name)),
        };

        let response = instance.unsubscribe(event, key).await?;
        self.routes.write().await.remove(&name);

        if instance.subscription_count().await == 0 {
            self.instances.write().await.remove(&instance_id);
            instance.dispose().await;
            self.log
                .debug(format!("Discarded empty instance {instance_id}"));
        }
        Ok(response)
    }

    /// Number of live instances in the pool.
    pub async fn instance_count(&self) -> usize {
        self.instances.read().await.len()
    }

    /// Number of routed subscriptions.
    pub async fn route_count(&self) -> usize {
        self.routes.read().await.len()
    }

    /// Disposes every instance and clears the routing table.
    pub async fn dispose(&self) {
        let instances: Vec<_> = {
            let mut map = self.instances.write().await;
            std::mem::take(&mut *map).into_values().collect()
        };
        for instance in instances {
            instance.dispose().await;
        }
        self.routes.write().await.clear();
    }

    /// Picks the first instance with spare capacity, creating one when
    /// every instance is at the cap. The boolean reports whether the
    /// returned instance was freshly created.
    async fn place(&self) -> (Arc<AccountSocket>, bool) {
        let cap = self.config.max_subscriptions_per_web_socket;
        {
            let instances = self.instances.read().await;
            for instance in instances.values() {
                if instance.subscription_count().await < cap {
                    return (instance.clone(), false);
                }
            }
        }

        let instance_id = self.next_instance_id.fetch_add(1, Ordering::SeqCst) + 1;
        self.log.info(format!(
            "Opening account socket instance {instance_id} ({} in pool)",
            self.instance_count().await
        ));
        let instance = AccountSocket::connect(
            instance_id,
            self.config.clone(),
            &self.log,
            self.tokens.clone(),
            self.workers.clone(),
        )
        .await;
        self.instances
            .write()
            .await
            .insert(instance_id, instance.clone());
        (instance, true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logging::LogVerbosity;
    use futures_util::{SinkExt, StreamExt};
    use serde_json::Value;
    use tokio::net::TcpListener;
    use tokio::task::JoinHandle;
    use tokio_tungstenite::tungstenite::Message;

    async fn spawn_mock_server() -> (String, JoinHandle<()>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let task = tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                tokio::spawn(async move {
                    let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
                    while let Some(Ok(message)) = ws.next().await {
                        if let Message::Text(text) = message {
                            let frame: Value = serde_json::from_str(&text).unwrap();
                            let reply = serde_json::json!({
                                "id": frame["id"], "event": "response",
                                "key": format!(
                                    "{} /ws/{}",
                                    frame["method"].as_str().unwrap_or(""),
                                    frame["path"].as_str().unwrap_or("")
                                ),
                                "responseCode": 200, "content": "",
                            });
                            let _ = ws.send(Message::Text(reply.to_string().into())).await;
                        }
                    }
                });
            }
        });
        (format!("ws://{addr}"), task)
    }

    fn router_with(ws_url: String, cap: usize) -> SubscriptionRouter {
        let config = Arc::new(ClientConfig {
            client_id: Some("id".to_string()),
            client_secret: Some("secret".to_string()),
            web_socket_url: ws_url,
            max_subscriptions_per_web_socket: cap,
            web_socket_request_retry_delay_ms: 20,
            web_socket_recovery_retry_delay_ms: 20,
            ..ClientConfig::default()
        });
        let log = Logger::new(LogVerbosity::Quiet, "");
        let credentials = crate::auth::Credentials::from_config(&config).unwrap();
        let tokens = TokenManager::new(config.clone(), log.clone(), credentials);
        let workers = Arc::new(WorkerPool::new(5, &log));
        SubscriptionRouter::new(config, log, tokens, workers)
    }

    fn noop_handler() -> SubscriptionHandler {
        Arc::new(|_| Box::pin(async {}))
    }

    #[tokio::test]
    async fn test_fan_out_respects_capacity() {
        let (url, server) = spawn_mock_server().await;
        let router = router_with(url, 2);

        for key in ["1", "2", "3", "4", "5"] {
            router
                .subscribe("group-update", key, noop_handler())
                .await
                .unwrap();
        }

        // Five subscriptions at two per socket need three instances, and
        // no instance may exceed the cap.
        assert_eq!(router.instance_count().await, 3);
        assert_eq!(router.route_count().await, 5);
        for instance in router.instances.read().await.values() {
            assert!(instance.subscription_count().await <= 2);
        }

        router.dispose().await;
        server.abort();
    }

    #[tokio::test]
    async fn test_routes_resolve_to_owning_instance() {
        let (url, server) = spawn_mock_server().await;
        let router = router_with(url, 2);

        for key in ["1", "2", "3"] {
            router
                .subscribe("group-update", key, noop_handler())
                .await
                .unwrap();
        }

        let routes = router.routes.read().await.clone();
        let instances = router.instances.read().await.clone();
        for (name, instance_id) in routes {
            let instance = instances.get(&instance_id).expect("route must resolve");
            let (event, key) = name.split_once('/').unwrap();
            // Re-subscribing the same pair on its owner must collide.
            let result = instance.subscribe(event, key, noop_handler()).await;
            assert!(matches!(result, Err(ClientError::AlreadySubscribed(_))));
        }

        router.dispose().await;
        server.abort();
    }

    #[tokio::test]
    async fn test_duplicate_subscription_rejected() {
        let (url, server) = spawn_mock_server().await;
        let router = router_with(url, 10);

        router
            .subscribe("group-update", "42", noop_handler())
            .await
            .unwrap();
        let duplicate = router
            .subscribe("group-update", "42", noop_handler())
            .await;
        assert!(matches!(duplicate, Err(ClientError::AlreadySubscribed(_))));

        router.dispose().await;
        server.abort();
    }

    #[tokio::test]
    async fn test_empty_instance_is_discarded() {
        let (url, server) = spawn_mock_server().await;
        let router = router_with(url, 10);

        router
            .subscribe("group-update", "42", noop_handler())
            .await
            .unwrap();
        assert_eq!(router.instance_count().await, 1);

        router.unsubscribe("group-update", "42").await.unwrap();
        assert_eq!(router.instance_count().await, 0);
        assert_eq!(router.route_count().await, 0);

        let missing = router.unsubscribe("group-update", "42").await;
        assert!(matches!(missing, Err(ClientError::NotSubscribed(_))));

        router.dispose().await;
        server.abort();
    }
}
